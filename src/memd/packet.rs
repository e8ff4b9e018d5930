//! Packet model.

use super::{Command, Magic, Status};
use bytes::Bytes;

/// A single binary protocol frame.
///
/// Requests carry `vbucket`; responses carry `status`. Packets produced by the
/// decoder are never mutated; handlers build fresh packets for responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub magic: Magic,
    pub command: Command,
    pub datatype: u8,
    pub vbucket: u16,
    pub status: Status,
    pub opaque: u32,
    pub cas: u64,
    pub framing_extras: Bytes,
    pub extras: Bytes,
    pub key: Bytes,
    pub value: Bytes,
}

impl Packet {
    /// Create an empty request for `command`.
    pub fn request(command: Command) -> Self {
        Self {
            magic: Magic::Req,
            command,
            datatype: 0,
            vbucket: 0,
            status: Status::Success,
            opaque: 0,
            cas: 0,
            framing_extras: Bytes::new(),
            extras: Bytes::new(),
            key: Bytes::new(),
            value: Bytes::new(),
        }
    }

    /// Create a successful response to `request`.
    ///
    /// The command and opaque are copied so the client can correlate it.
    pub fn response_to(request: &Packet) -> Self {
        Self {
            magic: Magic::Res,
            command: request.command,
            opaque: request.opaque,
            ..Self::request(request.command)
        }
    }

    /// Set the opaque.
    pub fn with_opaque(mut self, opaque: u32) -> Self {
        self.opaque = opaque;
        self
    }

    /// Set the status.
    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    /// Set the vbucket.
    pub fn with_vbucket(mut self, vbucket: u16) -> Self {
        self.vbucket = vbucket;
        self
    }

    /// Set the datatype.
    pub fn with_datatype(mut self, datatype: u8) -> Self {
        self.datatype = datatype;
        self
    }

    /// Set the CAS.
    pub fn with_cas(mut self, cas: u64) -> Self {
        self.cas = cas;
        self
    }

    /// Set the extras.
    pub fn with_extras(mut self, extras: impl Into<Bytes>) -> Self {
        self.extras = extras.into();
        self
    }

    /// Set the key.
    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = key.into();
        self
    }

    /// Set the value.
    pub fn with_value(mut self, value: impl Into<Bytes>) -> Self {
        self.value = value.into();
        self
    }

    /// Set framing extras, switching to the alternative magic.
    pub fn with_framing_extras(mut self, framing_extras: impl Into<Bytes>) -> Self {
        self.framing_extras = framing_extras.into();
        self.magic = if self.magic.is_request() {
            Magic::ReqExt
        } else {
            Magic::ResExt
        };
        self
    }

    /// Key as UTF-8, if valid.
    pub fn key_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.key).ok()
    }
}
