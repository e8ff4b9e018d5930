//! Binary protocol connection loop.
//!
//! Frames are decoded from the read buffer and dispatched one at a time, so
//! responses on a connection leave in request order.

use super::kv::KvServerMetrics;
use crate::core::error::CavernResult;
use crate::hooks::{KvClient, KvContext, KvHooks};
use crate::memd::codec::{self, encode_raw_status, DecodeResult};
use crate::memd::{Packet, Status};
use crate::topology::ClusterHandle;
use bytes::{Buf, BytesMut};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// What the loop does after a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// One accepted binary protocol connection.
pub struct KvConnection {
    client: KvClient,
    stream: TcpStream,
    cluster: ClusterHandle,
    hooks: KvHooks,
    metrics: Arc<KvServerMetrics>,
    shutdown_rx: watch::Receiver<bool>,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl KvConnection {
    pub fn new(
        client: KvClient,
        stream: TcpStream,
        cluster: ClusterHandle,
        hooks: KvHooks,
        metrics: Arc<KvServerMetrics>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            client,
            stream,
            cluster,
            hooks,
            metrics,
            shutdown_rx,
            read_buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
            write_buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
        }
    }

    /// Serve until the peer disconnects, a frame is malformed, or the server
    /// shuts down.
    pub async fn run(mut self) {
        let conn = self.client.id();
        tracing::debug!(conn = %conn, node = %self.client.node(), "kv connection opened");

        if let Err(e) = self.serve().await {
            tracing::warn!(conn = %conn, error = %e, "kv connection failed");
        }

        self.metrics.connection_closed();
        tracing::debug!(conn = %conn, "kv connection closed");
    }

    async fn serve(&mut self) -> CavernResult<()> {
        loop {
            if self.drain_frames().await? == Flow::Close {
                return Ok(());
            }

            tokio::select! {
                read = self.stream.read_buf(&mut self.read_buf) => {
                    if read? == 0 {
                        return Ok(());
                    }
                }
                _ = self.shutdown_rx.changed() => {
                    return Ok(());
                }
            }
        }
    }

    async fn drain_frames(&mut self) -> CavernResult<Flow> {
        loop {
            if *self.shutdown_rx.borrow() {
                return Ok(Flow::Close);
            }

            match codec::decode(&self.read_buf) {
                DecodeResult::Incomplete => return Ok(Flow::Continue),
                DecodeResult::Invalid(reason) => {
                    tracing::warn!(
                        conn = %self.client.id(),
                        reason = %reason,
                        "malformed frame, closing connection"
                    );
                    return Ok(Flow::Close);
                }
                DecodeResult::Unsupported {
                    magic,
                    opcode,
                    opaque,
                    consumed,
                } => {
                    self.read_buf.advance(consumed);
                    if !magic.is_request() {
                        tracing::warn!(conn = %self.client.id(), "unexpected response frame");
                        return Ok(Flow::Close);
                    }
                    tracing::debug!(
                        conn = %self.client.id(),
                        opcode = format_args!("0x{:02x}", opcode),
                        opaque,
                        "unsupported opcode"
                    );
                    self.metrics.packet_unhandled();
                    encode_raw_status(&mut self.write_buf, opcode, opaque, Status::UnknownCommand);
                    self.flush().await?;
                }
                DecodeResult::Complete(packet, consumed) => {
                    self.read_buf.advance(consumed);
                    if self.handle_packet(packet).await? == Flow::Close {
                        return Ok(Flow::Close);
                    }
                }
            }
        }
    }

    async fn handle_packet(&mut self, packet: Packet) -> CavernResult<Flow> {
        if !packet.magic.is_request() {
            tracing::warn!(conn = %self.client.id(), "unexpected response frame");
            return Ok(Flow::Close);
        }

        let (response, delay, disconnect) = {
            let mut ctx = KvContext::new(&mut self.client, &self.cluster);
            let hooks = &self.hooks;
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| hooks.dispatch(&mut ctx, &packet)));
            match outcome {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    tracing::warn!(
                        command = %packet.command,
                        opaque = packet.opaque,
                        error = %e,
                        "kv handler failed"
                    );
                }
                Err(payload) => {
                    tracing::error!(
                        command = %packet.command,
                        opaque = packet.opaque,
                        panic = %panic_message(payload.as_ref()),
                        "kv handler panicked"
                    );
                }
            }
            (
                ctx.take_response(),
                ctx.response_delay(),
                ctx.should_disconnect(),
            )
        };

        if disconnect {
            tracing::debug!(conn = %self.client.id(), "handler requested disconnect");
            return Ok(Flow::Close);
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let response = match response {
            Some(response) => {
                self.metrics.packet_handled();
                if response.opaque != packet.opaque {
                    tracing::debug!(
                        conn = %self.client.id(),
                        command = %packet.command,
                        request_opaque = packet.opaque,
                        response_opaque = response.opaque,
                        "response opaque differs from request"
                    );
                }
                response
            }
            None => {
                self.metrics.packet_unhandled();
                tracing::debug!(
                    conn = %self.client.id(),
                    command = %packet.command,
                    opaque = packet.opaque,
                    "unhandled command"
                );
                Packet::response_to(&packet).with_status(Status::UnknownCommand)
            }
        };

        codec::encode(&response, &mut self.write_buf);
        self.flush().await?;
        Ok(Flow::Continue)
    }

    async fn flush(&mut self) -> CavernResult<()> {
        self.stream.write_all(&self.write_buf).await?;
        self.write_buf.clear();
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
