//! Connection setup commands: HELLO, NOOP, SASL and SELECT_BUCKET.

use super::Credentials;
use crate::core::error::CavernResult;
use crate::hooks::{KvContext, KvHookManager, Next};
use crate::memd::{Command, HelloFeature, Magic, Packet, Status};
use bytes::{BufMut, BytesMut};
use std::collections::BTreeSet;

/// Features the mock agrees to in HELLO.
const SUPPORTED_FEATURES: &[HelloFeature] = &[
    HelloFeature::Datatype,
    HelloFeature::TcpNoDelay,
    HelloFeature::Xattr,
    HelloFeature::Xerror,
    HelloFeature::SelectBucket,
    HelloFeature::Json,
    HelloFeature::AltRequests,
];

pub(super) fn register(hooks: &KvHookManager, credentials: Credentials) -> CavernResult<()> {
    hooks
        .expect()
        .magic(Magic::Req)
        .cmd(Command::Hello)
        .handler(handle_hello)?;

    hooks
        .expect()
        .magic(Magic::Req)
        .cmd(Command::Noop)
        .handler(|ctx, pkt, _next| ctx.write_packet(Packet::response_to(pkt)))?;

    hooks
        .expect()
        .magic(Magic::Req)
        .cmd(Command::SaslListMechs)
        .handler(|ctx, pkt, _next| ctx.write_packet(Packet::response_to(pkt).with_value("PLAIN")))?;

    hooks
        .expect()
        .magic(Magic::Req)
        .cmd(Command::SaslAuth)
        .handler(move |ctx, pkt, next| handle_sasl_auth(&credentials, ctx, pkt, next))?;

    hooks
        .expect()
        .magic(Magic::Req)
        .cmd(Command::SelectBucket)
        .handler(handle_select_bucket)?;

    Ok(())
}

fn handle_hello(ctx: &mut KvContext<'_>, pkt: &Packet, _next: Next<'_>) -> CavernResult<()> {
    if pkt.value.len() % 2 != 0 {
        return ctx.write_packet(Packet::response_to(pkt).with_status(Status::InvalidArguments));
    }

    let mut agreed = BTreeSet::new();
    let mut value = BytesMut::with_capacity(pkt.value.len());
    for code in pkt.value.chunks_exact(2) {
        let Ok(feature) = HelloFeature::try_from(u16::from_be_bytes([code[0], code[1]])) else {
            continue;
        };
        if SUPPORTED_FEATURES.contains(&feature) && agreed.insert(feature) {
            value.put_u16(feature as u16);
        }
    }

    tracing::debug!(
        conn = %ctx.client.id(),
        agent = %String::from_utf8_lossy(&pkt.key),
        features = ?agreed,
        "hello"
    );
    ctx.client.set_features(agreed);
    ctx.write_packet(Packet::response_to(pkt).with_value(value.freeze()))
}

fn handle_sasl_auth(
    credentials: &Credentials,
    ctx: &mut KvContext<'_>,
    pkt: &Packet,
    _next: Next<'_>,
) -> CavernResult<()> {
    if pkt.key_str() != Some("PLAIN") {
        return ctx.write_packet(Packet::response_to(pkt).with_status(Status::AuthError));
    }

    // authzid NUL authcid NUL passwd
    let mut parts = pkt.value.split(|b| *b == 0).skip(1);
    let (Some(user), Some(pass)) = (parts.next(), parts.next()) else {
        return ctx.write_packet(Packet::response_to(pkt).with_status(Status::AuthError));
    };

    if user != credentials.username.as_bytes() || pass != credentials.password.as_bytes() {
        tracing::debug!(conn = %ctx.client.id(), "sasl auth rejected");
        return ctx.write_packet(Packet::response_to(pkt).with_status(Status::AuthError));
    }

    ctx.client.set_user(credentials.username.clone());
    ctx.write_packet(Packet::response_to(pkt).with_value("Authenticated"))
}

fn handle_select_bucket(ctx: &mut KvContext<'_>, pkt: &Packet, _next: Next<'_>) -> CavernResult<()> {
    let name = String::from_utf8_lossy(&pkt.key).into_owned();
    if ctx.cluster().snapshot().bucket(&name).is_none() {
        return ctx.write_packet(Packet::response_to(pkt).with_status(Status::KeyNotFound));
    }

    tracing::debug!(conn = %ctx.client.id(), bucket = %name, "bucket selected");
    ctx.client.select_bucket(name);
    ctx.write_packet(Packet::response_to(pkt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{KvClient, KvHooks};
    use crate::servers::ConnectionId;
    use crate::topology::{BucketSpec, ClusterHandle, NodeId};

    fn setup() -> (KvHooks, ClusterHandle, KvClient) {
        let hooks = KvHooks::new();
        register(
            hooks.defaults(),
            Credentials {
                username: "Administrator".to_string(),
                password: "password".to_string(),
            },
        )
        .unwrap();
        (
            hooks,
            ClusterHandle::new(),
            KvClient::new(ConnectionId(1), NodeId(0), None),
        )
    }

    fn run(hooks: &KvHooks, cluster: &ClusterHandle, client: &mut KvClient, pkt: Packet) -> Packet {
        let mut ctx = KvContext::new(client, cluster);
        assert!(hooks.dispatch(&mut ctx, &pkt).unwrap());
        ctx.take_response().unwrap()
    }

    #[test]
    fn test_hello_agrees_supported_features() {
        let (hooks, cluster, mut client) = setup();
        let mut value = BytesMut::new();
        for code in [0x12u16, 0x0b, 0x08, 0x0b, 0x99] {
            value.put_u16(code);
        }
        let req = Packet::request(Command::Hello)
            .with_key("test-agent")
            .with_value(value.freeze());

        let res = run(&hooks, &cluster, &mut client, req);

        assert_eq!(res.status, Status::Success);
        assert_eq!(&res.value[..], &[0x00, 0x0b, 0x00, 0x08]);
        assert!(client.has_feature(HelloFeature::Json));
        assert!(!client.has_feature(HelloFeature::Collections));
    }

    #[test]
    fn test_hello_odd_length() {
        let (hooks, cluster, mut client) = setup();
        let req = Packet::request(Command::Hello).with_value(vec![0x00]);
        let res = run(&hooks, &cluster, &mut client, req);
        assert_eq!(res.status, Status::InvalidArguments);
    }

    #[test]
    fn test_sasl_plain() {
        let (hooks, cluster, mut client) = setup();

        let req = Packet::request(Command::SaslAuth)
            .with_key("PLAIN")
            .with_value(&b"\0Administrator\0wrong"[..]);
        let res = run(&hooks, &cluster, &mut client, req);
        assert_eq!(res.status, Status::AuthError);
        assert_eq!(client.user(), None);

        let req = Packet::request(Command::SaslAuth)
            .with_key("PLAIN")
            .with_value(&b"\0Administrator\0password"[..]);
        let res = run(&hooks, &cluster, &mut client, req);
        assert_eq!(res.status, Status::Success);
        assert_eq!(client.user(), Some("Administrator"));
    }

    #[test]
    fn test_sasl_list_mechs() {
        let (hooks, cluster, mut client) = setup();
        let res = run(&hooks, &cluster, &mut client, Packet::request(Command::SaslListMechs));
        assert_eq!(&res.value[..], b"PLAIN");
    }

    #[test]
    fn test_select_bucket() {
        let (hooks, cluster, mut client) = setup();
        cluster.add_bucket(BucketSpec::new("default")).unwrap();

        let res = run(
            &hooks,
            &cluster,
            &mut client,
            Packet::request(Command::SelectBucket).with_key("missing"),
        );
        assert_eq!(res.status, Status::KeyNotFound);
        assert_eq!(client.selected_bucket(), None);

        let res = run(
            &hooks,
            &cluster,
            &mut client,
            Packet::request(Command::SelectBucket).with_key("default"),
        );
        assert_eq!(res.status, Status::Success);
        assert_eq!(client.selected_bucket(), Some("default"));
    }

    #[test]
    fn test_noop() {
        let (hooks, cluster, mut client) = setup();
        let res = run(
            &hooks,
            &cluster,
            &mut client,
            Packet::request(Command::Noop).with_opaque(99),
        );
        assert_eq!(res.status, Status::Success);
        assert_eq!(res.opaque, 99);
    }
}
