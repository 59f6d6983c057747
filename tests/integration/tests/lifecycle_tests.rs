//! Gateway connection lifecycle tests
//!
//! Every test drives the client through the scripted transport; no network
//! is involved.
//!
//! Run with: cargo test -p integration-tests --test lifecycle_tests

use std::time::Duration;

use gateway_client::connection::ConnectionState;
use gateway_client::protocol::{GatewayMessage, OpCode};
use gateway_client::resolver::StaticResolver;
use gateway_client::{GatewayConnection, GatewayError, GatewayEvent};
use integration_tests::{
    fast_reconnect, handshake, next_event, test_gateway, ScriptedTransport,
    TEST_GATEWAY_URL, TEST_TOKEN,
};
use serde_json::json;
use tokio::time::Instant;

fn ready(session_id: &str, resume_url: Option<&str>, seq: u64) -> GatewayMessage {
    GatewayMessage::dispatch(
        "READY",
        seq,
        json!({
            "v": 10,
            "session_id": session_id,
            "resume_gateway_url": resume_url,
            "user": {"id": "1", "username": "bot"},
        }),
    )
}

// ============================================================================
// Handshake
// ============================================================================

#[tokio::test]
async fn test_hello_without_session_identifies() {
    let (transport, mut accepted) = ScriptedTransport::new();
    let gateway = test_gateway(transport);

    gateway.connect().await.unwrap();
    let mut conn = accepted.next().await.unwrap();
    assert_eq!(conn.url, format!("{TEST_GATEWAY_URL}/?v=10&encoding=json"));
    assert_eq!(gateway.state(), ConnectionState::AwaitingHello);

    let identify = handshake(&gateway, &mut conn).await.unwrap();
    assert_eq!(identify.op, OpCode::Identify);
    assert_eq!(identify.d["token"], TEST_TOKEN);
    assert_eq!(identify.d["intents"], 513);
    assert_eq!(identify.d["properties"]["os"], std::env::consts::OS);
    assert_eq!(gateway.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_send_before_handshake_is_not_connected() {
    let (transport, mut accepted) = ScriptedTransport::new();
    let gateway = test_gateway(transport);

    gateway.connect().await.unwrap();
    let mut conn = accepted.next().await.unwrap();

    let result = gateway.set_presence(json!({"status": "online"})).await;
    assert!(matches!(result, Err(GatewayError::NotConnected)));

    // Nothing was queued ahead of the handshake
    let identify = handshake(&gateway, &mut conn).await.unwrap();
    assert_eq!(identify.op, OpCode::Identify);
    assert!(conn.try_next_frame().is_none());
}

#[tokio::test]
async fn test_connect_while_running_is_rejected() {
    let (transport, mut accepted) = ScriptedTransport::new();
    let gateway = test_gateway(transport);

    gateway.connect().await.unwrap();
    let _conn = accepted.next().await.unwrap();

    assert!(matches!(gateway.connect().await, Err(GatewayError::AlreadyRunning)));
    assert!(accepted.try_next().is_none());
}

// ============================================================================
// Sending
// ============================================================================

#[tokio::test]
async fn test_sends_are_written_in_call_order() {
    let (transport, mut accepted) = ScriptedTransport::new();
    let gateway = test_gateway(transport);

    gateway.connect().await.unwrap();
    let mut conn = accepted.next().await.unwrap();
    handshake(&gateway, &mut conn).await.unwrap();

    let sends = (0..20).map(|n| gateway.set_presence(json!({ "n": n })));
    for result in futures::future::join_all(sends).await {
        result.unwrap();
    }

    for n in 0..20 {
        let frame = conn.next_frame().await.unwrap();
        assert_eq!(frame.op, OpCode::PresenceUpdate);
        assert_eq!(frame.d["n"], n);
    }
}

// ============================================================================
// Dispatch
// ============================================================================

#[tokio::test]
async fn test_dispatch_reaches_subscribers_and_sequence_never_decreases() {
    let (transport, mut accepted) = ScriptedTransport::new();
    let gateway = test_gateway(transport);
    let mut events = gateway.subscribe();

    gateway.connect().await.unwrap();
    let mut conn = accepted.next().await.unwrap();
    handshake(&gateway, &mut conn).await.unwrap();

    conn.inject(&GatewayMessage::dispatch("MESSAGE_CREATE", 1, json!({"content": "hi"})));
    conn.inject(&GatewayMessage::dispatch("MESSAGE_CREATE", 3, json!({"content": "there"})));
    conn.inject(&GatewayMessage::dispatch("TYPING_START", 2, json!({})));

    let mut received = Vec::new();
    for _ in 0..3 {
        let event = next_event(&mut events, |e| e.as_dispatch().is_some()).await.unwrap();
        received.push(event.as_dispatch().cloned().unwrap());
    }
    assert_eq!(received[0].name, "MESSAGE_CREATE");
    assert_eq!(received[0].data["content"], "hi");
    assert_eq!(received[1].sequence, Some(3));
    // Out-of-order dispatches are still delivered
    assert!(received[2].is("TYPING_START"));

    // A server-requested heartbeat reports the highest sequence seen
    conn.inject(&GatewayMessage::new(OpCode::Heartbeat, serde_json::Value::Null));
    let heartbeat = conn.next_frame().await.unwrap();
    assert_eq!(heartbeat.op, OpCode::Heartbeat);
    assert_eq!(heartbeat.d, 3);
}

#[tokio::test]
async fn test_decode_error_keeps_connection() {
    let (transport, mut accepted) = ScriptedTransport::new();
    let gateway = test_gateway(transport);
    let mut events = gateway.subscribe();

    gateway.connect().await.unwrap();
    let mut conn = accepted.next().await.unwrap();
    handshake(&gateway, &mut conn).await.unwrap();

    conn.inject_raw("{not json");
    conn.inject_raw(r#"{"op":42,"d":null}"#);
    let error = next_event(&mut events, |e| matches!(e, GatewayEvent::Error(_))).await.unwrap();
    assert!(matches!(error, GatewayEvent::Error(message) if message.starts_with("Malformed frame")));

    conn.inject(&GatewayMessage::dispatch("GUILD_CREATE", 1, json!({"id": "7"})));
    let event = next_event(&mut events, |e| e.as_dispatch().is_some()).await.unwrap();
    assert!(event.as_dispatch().unwrap().is("GUILD_CREATE"));

    assert_eq!(gateway.state(), ConnectionState::Connected);
    assert!(accepted.try_next().is_none());
    assert!(conn.close_codes().is_empty());
}

#[tokio::test]
async fn test_failed_handshake_write_is_reported() {
    let (transport, mut accepted) = ScriptedTransport::new();
    let gateway = test_gateway(transport.clone());
    let mut events = gateway.subscribe();

    gateway.connect().await.unwrap();
    let conn = accepted.next().await.unwrap();

    transport.break_writes(true);
    conn.hello(41_250);

    let error = next_event(&mut events, |e| matches!(e, GatewayEvent::Error(_))).await.unwrap();
    assert!(matches!(
        error,
        GatewayEvent::Error(message) if message.starts_with("Failed to send Identify (2)")
    ));
}

#[tokio::test]
async fn test_heartbeat_ack_is_reported() {
    let (transport, mut accepted) = ScriptedTransport::new();
    let gateway = test_gateway(transport);
    let mut events = gateway.subscribe();

    gateway.connect().await.unwrap();
    let mut conn = accepted.next().await.unwrap();
    handshake(&gateway, &mut conn).await.unwrap();

    conn.inject(&GatewayMessage::new(OpCode::Heartbeat, serde_json::Value::Null));
    assert_eq!(conn.next_frame().await.unwrap().op, OpCode::Heartbeat);
    conn.inject(&GatewayMessage::heartbeat_ack());

    let ack = next_event(&mut events, |e| matches!(e, GatewayEvent::Ack { .. })).await.unwrap();
    assert!(matches!(ack, GatewayEvent::Ack { latency: Some(_) }));
}

// ============================================================================
// Close-code policy
// ============================================================================

#[tokio::test]
async fn test_session_timeout_resumes_saved_session() {
    let (transport, mut accepted) = ScriptedTransport::new();
    let gateway = test_gateway(transport);

    gateway.connect().await.unwrap();
    let mut conn = accepted.next().await.unwrap();
    let identify = handshake(&gateway, &mut conn).await.unwrap();
    assert_eq!(identify.op, OpCode::Identify);

    conn.inject(&ready("abc", None, 1));
    conn.inject(&GatewayMessage::dispatch("MESSAGE_CREATE", 2, json!({})));
    conn.close_with(Some(4009));

    let mut conn = accepted.next().await.unwrap();
    assert_eq!(conn.url, format!("{TEST_GATEWAY_URL}/?v=10&encoding=json"));

    let resume = handshake(&gateway, &mut conn).await.unwrap();
    assert_eq!(resume.op, OpCode::Resume);
    assert_eq!(resume.d["session_id"], "abc");
    assert_eq!(resume.d["seq"], 2);
    assert_eq!(resume.d["token"], TEST_TOKEN);
}

#[tokio::test]
async fn test_unknown_opcode_close_keeps_session_and_resume_url() {
    let (transport, mut accepted) = ScriptedTransport::new();
    let gateway = test_gateway(transport);
    let mut events = gateway.subscribe();

    gateway.connect().await.unwrap();
    let mut conn = accepted.next().await.unwrap();
    handshake(&gateway, &mut conn).await.unwrap();

    conn.inject(&ready("abc", Some("wss://resume.gateway.test"), 1));
    conn.close_with(Some(4001));

    let closed = next_event(&mut events, |e| matches!(e, GatewayEvent::Closed { .. }))
        .await
        .unwrap();
    assert_eq!(
        closed,
        GatewayEvent::Closed {
            code: Some(4001),
            reconnecting: true
        }
    );

    let mut conn = accepted.next().await.unwrap();
    assert_eq!(conn.url, "wss://resume.gateway.test/?v=10&encoding=json");

    let resume = handshake(&gateway, &mut conn).await.unwrap();
    assert_eq!(resume.op, OpCode::Resume);
    assert_eq!(resume.d["session_id"], "abc");
}

#[tokio::test]
async fn test_invalid_sequence_close_forces_identify() {
    let (transport, mut accepted) = ScriptedTransport::new();
    let gateway = test_gateway(transport);

    gateway.connect().await.unwrap();
    let mut conn = accepted.next().await.unwrap();
    handshake(&gateway, &mut conn).await.unwrap();

    conn.inject(&ready("abc", Some("wss://resume.gateway.test"), 5));
    conn.close_with(Some(4007));

    // Back to the resolver, not the resume endpoint
    let mut conn = accepted.next().await.unwrap();
    assert_eq!(conn.url, format!("{TEST_GATEWAY_URL}/?v=10&encoding=json"));

    let identify = handshake(&gateway, &mut conn).await.unwrap();
    assert_eq!(identify.op, OpCode::Identify);

    // The new session starts its own sequence
    conn.inject(&GatewayMessage::new(OpCode::Heartbeat, serde_json::Value::Null));
    let heartbeat = conn.next_frame().await.unwrap();
    assert!(heartbeat.d.is_null());
}

#[tokio::test]
async fn test_authentication_failed_is_terminal() {
    let (transport, mut accepted) = ScriptedTransport::new();
    let gateway = test_gateway(transport.clone());

    gateway.connect().await.unwrap();
    let mut conn = accepted.next().await.unwrap();
    handshake(&gateway, &mut conn).await.unwrap();

    conn.close_with(Some(4004));

    let result = gateway.closed().await;
    assert!(matches!(result, Err(GatewayError::FatalClose { code: 4004, .. })));
    assert_eq!(gateway.state(), ConnectionState::Idle);
    assert!(accepted.try_next().is_none());
    assert_eq!(transport.opened_urls().len(), 1);
}

#[tokio::test]
async fn test_disallowed_intents_surfaces_error_without_reconnect() {
    let (transport, mut accepted) = ScriptedTransport::new();
    let gateway = test_gateway(transport.clone());
    let mut events = gateway.subscribe();

    gateway.connect().await.unwrap();
    let mut conn = accepted.next().await.unwrap();
    handshake(&gateway, &mut conn).await.unwrap();

    conn.close_with(Some(4014));

    let fatal = next_event(&mut events, |e| matches!(e, GatewayEvent::Fatal { .. }))
        .await
        .unwrap();
    assert_eq!(
        fatal,
        GatewayEvent::Fatal {
            code: Some(4014),
            reason: "Disallowed intents (4014)".to_string()
        }
    );

    let err = gateway.closed().await.unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(err.to_string(), "Gateway closed the connection: Disallowed intents (4014)");
    assert!(accepted.try_next().is_none());
    assert_eq!(transport.opened_urls().len(), 1);

    let result = gateway.set_presence(json!({})).await;
    assert!(matches!(result, Err(GatewayError::NotConnected)));
}

#[tokio::test]
async fn test_non_gateway_close_reconnects_with_resume() {
    let (transport, mut accepted) = ScriptedTransport::new();
    let gateway = test_gateway(transport);

    gateway.connect().await.unwrap();
    let mut conn = accepted.next().await.unwrap();
    handshake(&gateway, &mut conn).await.unwrap();
    conn.inject(&ready("abc", None, 1));

    conn.close_with(Some(1006));
    let mut conn = accepted.next().await.unwrap();
    assert_eq!(handshake(&gateway, &mut conn).await.unwrap().op, OpCode::Resume);

    conn.close_with(None);
    let mut conn = accepted.next().await.unwrap();
    assert_eq!(handshake(&gateway, &mut conn).await.unwrap().op, OpCode::Resume);
}

// ============================================================================
// Server requests
// ============================================================================

#[tokio::test]
async fn test_reconnect_request_resumes() {
    let (transport, mut accepted) = ScriptedTransport::new();
    let gateway = test_gateway(transport);

    gateway.connect().await.unwrap();
    let mut conn = accepted.next().await.unwrap();
    handshake(&gateway, &mut conn).await.unwrap();
    conn.inject(&ready("abc", None, 1));

    conn.inject_raw(r#"{"op":7,"d":null}"#);
    let mut next = accepted.next().await.unwrap();

    // The client closed the old transport itself, with a resumable code
    assert_eq!(conn.close_codes(), vec![4000]);

    next.hello(41_250);
    let resume = next.next_wire_frame().await.unwrap();
    assert_eq!(resume["op"], 6);
    assert_eq!(resume["d"]["session_id"], "abc");
    assert_eq!(resume["d"]["seq"], 1);
}

#[tokio::test]
async fn test_invalid_session_warns_and_reconnects() {
    let (transport, mut accepted) = ScriptedTransport::new();
    let gateway = test_gateway(transport);
    let mut events = gateway.subscribe();

    gateway.connect().await.unwrap();
    let mut conn = accepted.next().await.unwrap();
    handshake(&gateway, &mut conn).await.unwrap();
    conn.inject(&ready("abc", None, 1));

    conn.inject_raw(r#"{"op":9,"d":false}"#);
    let warning = next_event(&mut events, |e| matches!(e, GatewayEvent::Warn(_))).await.unwrap();
    assert!(matches!(warning, GatewayEvent::Warn(message) if message.starts_with("Invalid session")));

    let mut conn = accepted.next().await.unwrap();
    assert_eq!(handshake(&gateway, &mut conn).await.unwrap().op, OpCode::Resume);
}

// ============================================================================
// Heartbeat
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_heartbeat_delays_are_jittered_within_interval() {
    let (transport, mut accepted) = ScriptedTransport::new();
    let gateway = GatewayConnection::builder(TEST_TOKEN)
        .transport(transport)
        .resolver(StaticResolver::new(TEST_GATEWAY_URL))
        .jitter(|| 0.25)
        .build();

    gateway.connect().await.unwrap();
    let mut conn = accepted.next().await.unwrap();

    let hello_at = Instant::now();
    conn.hello(10_000);
    assert_eq!(conn.next_frame().await.unwrap().op, OpCode::Identify);

    let first = conn.next_frame().await.unwrap();
    assert_eq!(first.op, OpCode::Heartbeat);
    assert!(first.d.is_null());
    let first_delay = hello_at.elapsed();
    assert!(
        first_delay >= Duration::from_millis(2_500) && first_delay < Duration::from_millis(10_000),
        "{first_delay:?}"
    );

    let first_at = Instant::now();
    conn.inject(&GatewayMessage::heartbeat_ack());

    let second = conn.next_frame().await.unwrap();
    assert_eq!(second.op, OpCode::Heartbeat);
    let second_delay = first_at.elapsed();
    assert!(
        second_delay >= Duration::from_millis(5_000) && second_delay < Duration::from_millis(10_000),
        "{second_delay:?}"
    );

    // Both beats were acknowledged in time; no reconnect
    assert!(accepted.try_next().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_missed_ack_reconnects_with_resume() {
    let (transport, mut accepted) = ScriptedTransport::new();
    let gateway = GatewayConnection::builder(TEST_TOKEN)
        .transport(transport)
        .resolver(StaticResolver::new(TEST_GATEWAY_URL))
        .jitter(|| 0.0)
        .build();
    let mut events = gateway.subscribe();

    gateway.connect().await.unwrap();
    let mut conn = accepted.next().await.unwrap();
    conn.hello(10_000);
    assert_eq!(conn.next_frame().await.unwrap().op, OpCode::Identify);
    conn.inject(&ready("abc", None, 1));
    assert_eq!(conn.next_frame().await.unwrap().op, OpCode::Heartbeat);

    // No ack: the next due beat gives up on this connection
    let warning = next_event(&mut events, |e| matches!(e, GatewayEvent::Warn(_))).await.unwrap();
    assert_eq!(
        warning,
        GatewayEvent::Warn("Heartbeat not acknowledged; reconnecting".to_string())
    );

    let mut next = accepted.next().await.unwrap();
    assert_eq!(conn.close_codes(), vec![4000]);

    next.hello(10_000);
    assert_eq!(next.next_frame().await.unwrap().op, OpCode::Resume);
}

#[tokio::test(start_paused = true)]
async fn test_missed_ack_detection_can_be_disabled() {
    let (transport, mut accepted) = ScriptedTransport::new();
    let gateway = GatewayConnection::builder(TEST_TOKEN)
        .transport(transport)
        .resolver(StaticResolver::new(TEST_GATEWAY_URL))
        .missed_ack_reconnect(false)
        .jitter(|| 0.0)
        .build();

    gateway.connect().await.unwrap();
    let mut conn = accepted.next().await.unwrap();
    conn.hello(10_000);
    assert_eq!(conn.next_frame().await.unwrap().op, OpCode::Identify);

    for _ in 0..3 {
        assert_eq!(conn.next_frame().await.unwrap().op, OpCode::Heartbeat);
    }
    assert!(accepted.try_next().is_none());
    assert_eq!(gateway.state(), ConnectionState::Connected);
}

// ============================================================================
// Caller-driven lifecycle
// ============================================================================

#[tokio::test]
async fn test_close_is_idempotent() {
    let (transport, mut accepted) = ScriptedTransport::new();
    let gateway = test_gateway(transport);

    gateway.connect().await.unwrap();
    let mut conn = accepted.next().await.unwrap();
    handshake(&gateway, &mut conn).await.unwrap();

    gateway.close().await;
    gateway.close().await;

    assert_eq!(conn.close_codes(), vec![4000]);
    assert_eq!(gateway.state(), ConnectionState::Idle);
    assert!(gateway.closed().await.is_ok());
    assert!(matches!(
        gateway.set_presence(json!({})).await,
        Err(GatewayError::NotConnected)
    ));
}

#[tokio::test]
async fn test_connect_after_close_resumes() {
    let (transport, mut accepted) = ScriptedTransport::new();
    let gateway = test_gateway(transport);

    gateway.connect().await.unwrap();
    let mut conn = accepted.next().await.unwrap();
    handshake(&gateway, &mut conn).await.unwrap();
    conn.inject(&ready("abc", None, 4));
    conn.inject(&GatewayMessage::new(OpCode::Heartbeat, serde_json::Value::Null));
    // Wait until READY has been processed
    assert_eq!(conn.next_frame().await.unwrap().d, 4);

    gateway.close().await;
    gateway.connect().await.unwrap();

    let mut conn = accepted.next().await.unwrap();
    let resume = handshake(&gateway, &mut conn).await.unwrap();
    assert_eq!(resume.op, OpCode::Resume);
    assert_eq!(resume.d["seq"], 4);
}

#[tokio::test]
async fn test_explicit_reconnect_resumes() {
    let (transport, mut accepted) = ScriptedTransport::new();
    let gateway = test_gateway(transport);

    gateway.connect().await.unwrap();
    let mut conn = accepted.next().await.unwrap();
    handshake(&gateway, &mut conn).await.unwrap();
    conn.inject(&ready("abc", None, 1));
    conn.inject(&GatewayMessage::new(OpCode::Heartbeat, serde_json::Value::Null));
    conn.next_frame().await.unwrap();

    gateway.reconnect().await.unwrap();
    assert_eq!(conn.close_codes(), vec![4000]);

    let mut next = accepted.next().await.unwrap();
    assert_eq!(gateway.state(), ConnectionState::AwaitingHello);
    assert_eq!(handshake(&gateway, &mut next).await.unwrap().op, OpCode::Resume);
}

#[tokio::test]
async fn test_reconnect_gives_up_after_max_attempts() {
    let (transport, mut accepted) = ScriptedTransport::new();
    let gateway = GatewayConnection::builder(TEST_TOKEN)
        .transport(transport.clone())
        .resolver(StaticResolver::new(TEST_GATEWAY_URL))
        .reconnect_config(fast_reconnect(3))
        .jitter(|| 0.99)
        .build();
    let mut events = gateway.subscribe();

    gateway.connect().await.unwrap();
    let mut conn = accepted.next().await.unwrap();
    handshake(&gateway, &mut conn).await.unwrap();

    transport.fail_opens(u32::MAX);
    conn.close_with(None);

    let result = gateway.closed().await;
    assert!(matches!(result, Err(GatewayError::ReconnectExhausted { attempts: 3 })));
    // The first open plus three failed attempts
    assert_eq!(transport.opened_urls().len(), 4);

    let fatal = next_event(&mut events, |e| matches!(e, GatewayEvent::Fatal { .. }))
        .await
        .unwrap();
    assert!(matches!(fatal, GatewayEvent::Fatal { code: None, .. }));
}

#[tokio::test]
async fn test_reconnect_recovers_after_transient_open_failures() {
    let (transport, mut accepted) = ScriptedTransport::new();
    let gateway = test_gateway(transport.clone());

    gateway.connect().await.unwrap();
    let mut conn = accepted.next().await.unwrap();
    handshake(&gateway, &mut conn).await.unwrap();
    conn.inject(&ready("abc", None, 1));

    transport.fail_opens(2);
    conn.close_with(Some(4000));

    let mut conn = accepted.next().await.unwrap();
    assert_eq!(handshake(&gateway, &mut conn).await.unwrap().op, OpCode::Resume);
    assert_eq!(transport.opened_urls().len(), 4);
}
