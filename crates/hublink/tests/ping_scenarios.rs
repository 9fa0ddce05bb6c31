//! End-to-end call/reply flows over a socketpair.
//!
//! The peer side of each pair plays the remote endpoint with raw blocking
//! I/O; the near side goes through the full stack (channel, client,
//! service dispatch, outgoing drain).

use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::OwnedFd;
use std::sync::Arc;

use bytes::Bytes;
use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};
use serde_json::Value;

use hublink::{
    encode_frame, Client, ClientConfig, DispatchContext, FrameDecoder, Message, MessageKind,
    Method, ServiceHandle, TransportMode,
};

fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn attach_client(service: &ServiceHandle) -> (Arc<Client>, File) {
    let (ours, peer): (OwnedFd, OwnedFd) = socketpair(
        AddressFamily::Unix,
        SockType::Stream,
        None,
        SockFlag::empty(),
    )
    .unwrap();
    let client = service
        .transport()
        .create_client(ours, ClientConfig::new("hub.0x2a"))
        .unwrap();
    (client, File::from(peer))
}

fn send_message(peer: &mut File, message: &Message) {
    let frame = encode_frame(message).unwrap();
    peer.write_all(&frame).unwrap();
}

// One decoder per peer, shared across calls: the channel coalesces queued
// replies into one write, so a single read can pull several frames.
fn read_message(peer: &mut File, decoder: &mut FrameDecoder) -> Message {
    let mut buf = [0u8; 4096];
    loop {
        if let Some(message) = decoder.decode_next().unwrap() {
            return message;
        }
        let n = peer.read(&mut buf).unwrap();
        assert!(n > 0, "peer closed before a full frame arrived");
        decoder.extend(&buf[..n]);
    }
}

/// Drive one inbound batch through the stack the way an event loop would.
fn pump(service: &ServiceHandle, client: &Arc<Client>) {
    client.receive_ready().unwrap();
    let passthrough = service.process_incoming(client).unwrap();
    assert!(passthrough.is_empty());
    client.flush_ready().unwrap();
}

#[test]
fn test_ping_call_gets_answer_42() {
    init_logging();
    let service = ServiceHandle::register("com.example.echo", TransportMode::Local);
    service
        .register_category(
            None,
            vec![Method::new("ping", |ctx: &DispatchContext<'_>, msg: &Message| {
                ctx.respond(
                    msg,
                    Bytes::from_static(br#"{"returnValue":true, "answer":42}"#),
                )
                .is_ok()
            })],
            vec![],
            vec![],
        )
        .unwrap();
    let (client, mut peer) = attach_client(&service);

    send_message(
        &mut peer,
        &Message::call(100, 7, "/", "ping", Bytes::from_static(b"{}")),
    );
    pump(&service, &client);

    let mut decoder = FrameDecoder::new();
    let reply = read_message(&mut peer, &mut decoder);
    assert_eq!(reply.kind(), MessageKind::Reply);
    assert_eq!(reply.token(), 7);
    assert_eq!(reply.category(), "/");
    assert_eq!(reply.method(), "ping");

    let json: Value = serde_json::from_slice(reply.payload()).unwrap();
    assert_eq!(json["returnValue"], true);
    assert_eq!(json["answer"], 42);
}

#[test]
fn test_ping_without_categories_gets_unknown_method_error() {
    init_logging();
    let service = ServiceHandle::register("com.example.empty", TransportMode::Local);
    let (client, mut peer) = attach_client(&service);

    send_message(
        &mut peer,
        &Message::call(100, 9, "/", "ping", Bytes::from_static(b"{}")),
    );
    pump(&service, &client);

    let mut decoder = FrameDecoder::new();
    let reply = read_message(&mut peer, &mut decoder);
    assert_eq!(reply.kind(), MessageKind::Error);
    assert_eq!(reply.token(), 9);

    let json: Value = serde_json::from_slice(reply.payload()).unwrap();
    assert_eq!(json["returnValue"], false);
    assert_eq!(
        json["errorText"],
        r#"Unknown method "ping" for category "/""#
    );
}

#[test]
fn test_replies_preserve_call_order() {
    init_logging();
    let service = ServiceHandle::register("com.example.echo", TransportMode::Local);
    service
        .register_category(
            None,
            vec![Method::new("echo", |ctx: &DispatchContext<'_>, msg: &Message| {
                ctx.respond(msg, msg.payload().clone()).is_ok()
            })],
            vec![],
            vec![],
        )
        .unwrap();
    let (client, mut peer) = attach_client(&service);

    for token in 1..=5u32 {
        send_message(
            &mut peer,
            &Message::call(
                u64::from(token),
                token,
                "/",
                "echo",
                format!("{{\"n\":{token}}}"),
            ),
        );
    }
    pump(&service, &client);

    // Replies come back in call order, tokens echoed.
    let mut decoder = FrameDecoder::new();
    for token in 1..=5u32 {
        let reply = read_message(&mut peer, &mut decoder);
        assert_eq!(reply.kind(), MessageKind::Reply);
        assert_eq!(reply.token(), token);
    }
}

#[test]
fn test_mixed_known_and_unknown_calls() {
    init_logging();
    let service = ServiceHandle::register("com.example.echo", TransportMode::Local);
    service
        .register_category(
            None,
            vec![Method::new("ping", |ctx: &DispatchContext<'_>, msg: &Message| {
                ctx.respond(msg, Bytes::from_static(br#"{"returnValue":true}"#))
                    .is_ok()
            })],
            vec![],
            vec![],
        )
        .unwrap();
    let (client, mut peer) = attach_client(&service);

    send_message(
        &mut peer,
        &Message::call(1, 1, "/", "ping", Bytes::from_static(b"{}")),
    );
    send_message(
        &mut peer,
        &Message::call(2, 2, "/", "bogus", Bytes::from_static(b"{}")),
    );
    pump(&service, &client);

    let mut decoder = FrameDecoder::new();
    let first = read_message(&mut peer, &mut decoder);
    assert_eq!(first.kind(), MessageKind::Reply);
    assert_eq!(first.token(), 1);

    let second = read_message(&mut peer, &mut decoder);
    assert_eq!(second.kind(), MessageKind::Error);
    assert_eq!(second.token(), 2);
    let json: Value = serde_json::from_slice(second.payload()).unwrap();
    assert_eq!(
        json["errorText"],
        r#"Unknown method "bogus" for category "/""#
    );
}
