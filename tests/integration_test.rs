use bytes::Bytes;
use futures::StreamExt;
use sse_chat_bridge::client::relay_events;
use sse_chat_bridge::decode::{decoder_for, ByteStream, DecodedStream};
use sse_chat_bridge::event::{ErrorKind, SseFrame};
use sse_chat_bridge::providers::VendorFormat;
use sse_chat_bridge::relay::{self, RelayConfig, RelayHooks, RelayOutcome};
use sse_chat_bridge::{BridgeError, Event, FinishReason};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

fn body_from_lines(lines: &[&str]) -> ByteStream {
    let text: String = lines.iter().map(|l| format!("{l}\n")).collect();
    tokio_stream::iter(vec![Ok(Bytes::from(text))]).boxed()
}

async fn decode_all(format: VendorFormat, lines: &[&str]) -> (Vec<Event>, DecodedStream) {
    let mut decoded = DecodedStream::new(body_from_lines(lines), decoder_for(format));
    let mut events = Vec::new();
    while let Some(event) = decoded.next_event().await {
        events.push(event);
    }
    (events, decoded)
}

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

// ────────────────────────────────────────────────────────────────
// Decoding
// ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_plain_text_stream() {
    let (events, _) = decode_all(
        VendorFormat::OpenAi,
        &[
            r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#,
            "",
            r#"data: {"choices":[{"delta":{"content":" there"},"finish_reason":"stop"}]}"#,
            "",
            "data: [DONE]",
        ],
    )
    .await;

    assert_eq!(
        events,
        vec![
            Event::text("Hi"),
            Event::text(" there"),
            Event::finish(FinishReason::Stop)
        ]
    );
}

#[tokio::test]
async fn test_split_tool_call_snapshot() {
    let (events, decoded) = decode_all(
        VendorFormat::OpenAi,
        &[
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","function":{"name":"getWeather","arguments":""}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"loc"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\":\"sh\"}"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
            "data: [DONE]",
        ],
    )
    .await;

    assert_eq!(events.last(), Some(&Event::finish(FinishReason::ToolCalls)));

    let calls = decoded.tool_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].index, 0);
    assert_eq!(calls[0].id, "c1");
    assert_eq!(calls[0].name, "getWeather");
    assert_eq!(calls[0].arguments, "{\"loc\":\"sh\"}");
}

#[tokio::test]
async fn test_interleaved_tool_calls() {
    let (_, decoded) = decode_all(
        VendorFormat::OpenAi,
        &[
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"a","function":{"name":"first","arguments":"{\"x\""}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":1,"id":"b","function":{"name":"second","arguments":"[1"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":":1}"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":1,"function":{"arguments":",2]"}}]}}]}"#,
            r#"data: {"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
        ],
    )
    .await;

    let calls = decoded.tool_calls();
    assert_eq!(calls.len(), 2);
    assert_eq!((calls[0].name.as_str(), calls[0].arguments.as_str()), ("first", "{\"x\":1}"));
    assert_eq!((calls[1].name.as_str(), calls[1].arguments.as_str()), ("second", "[1,2]"));
}

#[tokio::test]
async fn test_content_policy_violation_after_text() {
    let (events, _) = decode_all(
        VendorFormat::Minimax,
        &[
            r#"data: {"choices":[{"messages":[{"sender_type":"BOT","text":"Hello"}]}]}"#,
            r#"data: {"choices":[{"messages":[{"sender_type":"BOT","text":" world"}]}]}"#,
            r#"data: {"choices":[{"messages":[{"sender_type":"BOT","text":"..."}]}],"output_sensitive":true}"#,
            r#"data: {"choices":[{"finish_reason":"stop","messages":[{"text":"Hello world..."}]}]}"#,
        ],
    )
    .await;

    assert_eq!(events.len(), 3);
    assert_eq!(events[0], Event::text("Hello"));
    assert_eq!(events[1], Event::text(" world"));
    match &events[2] {
        Event::Error { kind, message } => {
            assert_eq!(*kind, ErrorKind::ContentPolicy);
            assert!(message.contains("output"), "message was {message}");
        }
        other => panic!("expected policy error, got {other:?}"),
    }
    assert!(!events.iter().any(|e| matches!(e, Event::Finish { .. })));
}

#[tokio::test]
async fn test_minimax_stream_ends_on_finish_frame() {
    let (events, _) = decode_all(
        VendorFormat::Minimax,
        &[
            r#"data: {"choices":[{"messages":[{"text":"你"}]}]}"#,
            "",
            r#"data: {"choices":[{"messages":[{"text":"好"}]}]}"#,
            "",
            r#"data: {"choices":[{"finish_reason":"stop","messages":[{"text":"你好"}]}],"base_resp":{"status_code":0,"status_msg":""}}"#,
        ],
    )
    .await;

    assert_eq!(
        events,
        vec![Event::text("你"), Event::text("好"), Event::finish(FinishReason::Stop)]
    );
}

#[tokio::test]
async fn test_nothing_follows_a_terminal_event() {
    let inputs: Vec<Vec<&str>> = vec![
        vec![
            r#"data: {"choices":[{"delta":{"content":"a"},"finish_reason":"stop"}]}"#,
            r#"data: {"choices":[{"delta":{"content":"b"}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"x"}}]}}]}"#,
            "data: [DONE]",
        ],
        vec![
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c","function":{"name":"f","arguments":""}}]},"finish_reason":"tool_calls"}]}"#,
            r#"data: {"choices":[{"delta":{"content":"leak"}}]}"#,
            "data: {broken",
        ],
        vec!["data: {broken", r#"data: {"choices":[{"delta":{"content":"b"}}]}"#, "data: [DONE]"],
        vec![
            r#"data: {"error":{"message":"overloaded"}}"#,
            r#"data: {"choices":[{"delta":{"content":"b"},"finish_reason":"stop"}]}"#,
        ],
    ];

    for lines in inputs {
        let (events, _) = decode_all(VendorFormat::OpenAi, &lines).await;
        let terminals: Vec<usize> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_terminal())
            .map(|(i, _)| i)
            .collect();
        assert_eq!(terminals, vec![events.len() - 1], "events: {events:?}");
    }
}

// ────────────────────────────────────────────────────────────────
// Relay
// ────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_idle_timeout_fires_once() {
    let config = RelayConfig {
        idle_timeout: Duration::from_secs(30),
        retry_ms: 0,
    };
    let cancel = CancellationToken::new();
    let (mut tx, relay) = relay::channel(&config, cancel.clone());

    let producer = tokio::spawn(async move {
        tx.send(Event::text("first")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(120)).await;
        tx.send(Event::text("late")).await
    });

    let timeouts = counter();
    let cancels = counter();
    let hooks = {
        let timeouts = timeouts.clone();
        let cancels = cancels.clone();
        RelayHooks::new()
            .on_timeout(move |_| {
                timeouts.fetch_add(1, Ordering::SeqCst);
            })
            .on_cancel(move |_| {
                cancels.fetch_add(1, Ordering::SeqCst);
            })
    };

    let started = tokio::time::Instant::now();
    let mut out: Vec<u8> = Vec::new();
    let report = relay.run(&mut out, hooks).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(report.outcome, RelayOutcome::TimedOut);
    assert_eq!(report.stats.events_written, 1);
    assert!(elapsed >= Duration::from_secs(30), "returned after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(31), "returned after {elapsed:?}");
    assert_eq!(timeouts.load(Ordering::SeqCst), 1);
    assert_eq!(cancels.load(Ordering::SeqCst), 0);

    let text = String::from_utf8(out).unwrap();
    assert_eq!(text.matches("event: ").count(), 1);

    assert!(cancel.is_cancelled());
    assert!(matches!(producer.await.unwrap(), Err(BridgeError::RelayClosed)));
}

#[tokio::test]
async fn test_downstream_cancellation_mid_stream() {
    let cancel = CancellationToken::new();
    let (mut tx, relay) = relay::channel(&RelayConfig::default(), cancel.clone());

    let (sent_three_tx, sent_three_rx) = oneshot::channel();
    let (go_tx, go_rx) = oneshot::channel::<()>();
    let producer = tokio::spawn(async move {
        for i in 0..3 {
            tx.send(Event::text(format!("chunk {i}"))).await.unwrap();
        }
        let _ = sent_three_tx.send(());
        let _ = go_rx.await;
        tx.send(Event::text("chunk 3")).await
    });

    let timeouts = counter();
    let cancels = counter();
    let hooks = {
        let timeouts = timeouts.clone();
        let cancels = cancels.clone();
        RelayHooks::new()
            .on_timeout(move |_| {
                timeouts.fetch_add(1, Ordering::SeqCst);
            })
            .on_cancel(move |stats| {
                assert_eq!(stats.events_written, 3);
                cancels.fetch_add(1, Ordering::SeqCst);
            })
    };
    let consumer = tokio::spawn(async move {
        let mut out: Vec<u8> = Vec::new();
        let report = relay.run(&mut out, hooks).await;
        (report, out)
    });

    sent_three_rx.await.unwrap();
    cancel.cancel();

    let (report, out) = tokio::time::timeout(Duration::from_secs(5), consumer)
        .await
        .expect("consumer should return promptly after cancellation")
        .unwrap();
    let report = report.unwrap();

    assert_eq!(report.outcome, RelayOutcome::Cancelled);
    assert_eq!(report.stats.events_written, 3);
    assert_eq!(cancels.load(Ordering::SeqCst), 1);
    assert_eq!(timeouts.load(Ordering::SeqCst), 0);
    assert!(!String::from_utf8(out).unwrap().contains("chunk 3"));

    go_tx.send(()).unwrap();
    assert!(matches!(producer.await.unwrap(), Err(BridgeError::RelayClosed)));
}

#[tokio::test]
async fn test_cancellation_interrupts_stalled_write() {
    let cancel = CancellationToken::new();
    let (mut tx, relay) = relay::channel(&RelayConfig::default(), cancel.clone());

    // The read half is held but never read, so writes beyond 64 bytes block.
    let (mut writer, _reader) = tokio::io::duplex(64);

    let cancels = counter();
    let hooks = {
        let cancels = cancels.clone();
        RelayHooks::new().on_cancel(move |stats| {
            assert_eq!(stats.events_written, 0);
            cancels.fetch_add(1, Ordering::SeqCst);
        })
    };
    let consumer = tokio::spawn(async move { relay.run(&mut writer, hooks).await });

    tx.send(Event::text("x".repeat(4096))).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!consumer.is_finished());
    cancel.cancel();

    let report = tokio::time::timeout(Duration::from_secs(3), consumer)
        .await
        .expect("relay should return once cancelled, even mid-write")
        .unwrap()
        .unwrap();
    assert_eq!(report.outcome, RelayOutcome::Cancelled);
    assert_eq!(report.stats.events_written, 0);
    assert_eq!(cancels.load(Ordering::SeqCst), 1);
    assert!(matches!(
        tx.send(Event::text("more")).await,
        Err(BridgeError::RelayClosed)
    ));
}

#[test]
fn test_send_blocks_until_consumer_receives() {
    let (mut tx, relay) = relay::channel(&RelayConfig::default(), CancellationToken::new());

    let mut send = tokio_test::task::spawn(tx.send(Event::text("held")));
    tokio_test::assert_pending!(send.poll());
    tokio_test::assert_pending!(send.poll());
    assert!(!send.is_woken());

    drop(send);
    drop(relay);
}

#[tokio::test]
async fn test_producer_error_ends_stream_like_success() {
    let cancel = CancellationToken::new();
    let (mut tx, relay) = relay::channel(&RelayConfig::default(), cancel);

    tokio::spawn(async move {
        tx.send(Event::text("partial")).await.unwrap();
        tx.send(Event::error(ErrorKind::Transport, "upstream reset"))
            .await
            .unwrap();
        tx.close();
    });

    let mut out: Vec<u8> = Vec::new();
    let report = relay.run(&mut out, RelayHooks::new()).await.unwrap();
    assert_eq!(report.outcome, RelayOutcome::Completed);
    assert_eq!(report.stats.last_event, Some("error"));
}

// ────────────────────────────────────────────────────────────────
// Wire format
// ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_relay_output_parses_back_to_events() {
    let sent = vec![
        Event::text("line one\nline two"),
        Event::ToolCallFragment {
            index: 2,
            id: "c9".to_string(),
            name: "lookup".to_string(),
            arguments_chunk: "{\"q\":\"multi\\nline\"}".to_string(),
        },
        Event::finish(FinishReason::Length),
    ];

    let (mut tx, relay) = relay::channel(&RelayConfig::default(), CancellationToken::new());
    let to_send = sent.clone();
    tokio::spawn(async move {
        for event in to_send {
            tx.send(event).await.unwrap();
        }
    });

    let mut out: Vec<u8> = Vec::new();
    relay.run(&mut out, RelayHooks::new()).await.unwrap();

    let chunks: Vec<Result<Bytes, std::io::Error>> = out
        .chunks(7)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    let received: Vec<Event> = relay_events(tokio_stream::iter(chunks))
        .map(|r| r.unwrap())
        .collect()
        .await;

    assert_eq!(received, sent);
}

#[tokio::test]
async fn test_multiline_data_round_trip() {
    use eventsource_stream::Eventsource;

    let payload = "first\n\n  indented\nlast";
    let frame = SseFrame {
        event: "note".to_string(),
        id: Some("42".to_string()),
        retry: None,
        data: payload.to_string(),
    };
    let wire = frame.encode();
    assert_eq!(wire.matches("data: ").count(), 4);

    let parsed: Vec<_> = tokio_stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from(wire))])
        .eventsource()
        .collect()
        .await;
    assert_eq!(parsed.len(), 1);
    let event = parsed[0].as_ref().unwrap();
    assert_eq!(event.event, "note");
    assert_eq!(event.id, "42");
    assert_eq!(event.data, payload);
}

// ────────────────────────────────────────────────────────────────
// HTTP end to end (local mock upstream)
// ────────────────────────────────────────────────────────────────

mod http {
    use super::*;
    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::response::Response;
    use axum::routing::post;
    use axum::Router;
    use sse_chat_bridge::client::response_events;
    use sse_chat_bridge::config::{ProviderConfig, RelaySettings};
    use sse_chat_bridge::{build_router, AppState, BridgeConfig, SessionLog};
    use std::collections::HashMap;

    const KEY_ENV: &str = "SSE_CHAT_BRIDGE_TEST_KEY";

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn upstream_ok() -> Response {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n",
            ": keep-alive\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\" there\"},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        );
        Response::builder()
            .header("content-type", "text/event-stream")
            .body(Body::from(body))
            .unwrap()
    }

    /// Streams a text delta every 20ms and never finishes.
    async fn upstream_endless() -> Response {
        let body = async_stream::stream! {
            loop {
                yield Ok::<_, std::io::Error>(Bytes::from_static(
                    b"data: {\"choices\":[{\"delta\":{\"content\":\"tick\"}}]}\n\n",
                ));
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        };
        Response::builder()
            .header("content-type", "text/event-stream")
            .body(Body::from_stream(body))
            .unwrap()
    }

    async fn upstream_unauthorized() -> Response {
        Response::builder()
            .status(StatusCode::UNAUTHORIZED)
            .header("content-type", "application/json")
            .body(Body::from(r#"{"error":{"message":"bad key","type":"auth"}}"#))
            .unwrap()
    }

    async fn bridge(upstream_base: String, log_dir: &std::path::Path) -> String {
        std::env::set_var(KEY_ENV, "test-key");
        let config = BridgeConfig {
            port: 0,
            provider: ProviderConfig {
                name: "mock".to_string(),
                base_url: Some(upstream_base),
                api_key_env: KEY_ENV.to_string(),
                format: Some(VendorFormat::OpenAi),
                group_id: None,
            },
            relay: RelaySettings::default(),
            models: HashMap::new(),
        };
        let state = Arc::new(AppState {
            config,
            client: reqwest::Client::new(),
            sessions: SessionLog::new(log_dir.join("sessions.jsonl")).unwrap(),
        });
        serve(build_router(state)).await
    }

    fn chat_body() -> serde_json::Value {
        serde_json::json!({
            "model": "mock-model",
            "messages": [{"role": "user", "content": "hello"}]
        })
    }

    #[tokio::test]
    async fn test_bridge_relays_upstream_stream() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = serve(Router::new().route("/chat/completions", post(upstream_ok))).await;
        let bridge = bridge(upstream, dir.path()).await;

        let response = reqwest::Client::new()
            .post(format!("{bridge}/v1/chat/stream"))
            .json(&chat_body())
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        let headers = response.headers();
        assert_eq!(headers["content-type"], "text/event-stream");
        assert_eq!(headers["cache-control"], "no-cache");
        assert_eq!(headers["x-accel-buffering"], "no");

        let events: Vec<Event> = response_events(response)
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(
            events,
            vec![
                Event::text("Hi"),
                Event::text(" there"),
                Event::finish(FinishReason::Stop)
            ]
        );
    }

    #[tokio::test]
    async fn test_bridge_reports_upstream_status_as_error_event() {
        let dir = tempfile::tempdir().unwrap();
        let upstream =
            serve(Router::new().route("/chat/completions", post(upstream_unauthorized))).await;
        let bridge = bridge(upstream, dir.path()).await;

        let response = reqwest::Client::new()
            .post(format!("{bridge}/v1/chat/stream"))
            .json(&chat_body())
            .send()
            .await
            .unwrap();

        let events: Vec<Event> = response_events(response)
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::Error { kind, message } => {
                assert_eq!(*kind, ErrorKind::Vendor);
                assert!(message.contains("401"));
                assert!(message.contains("bad key"));
            }
            other => panic!("expected error event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_client_disconnect_cancels_session() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = serve(Router::new().route("/chat/completions", post(upstream_endless))).await;
        let bridge = bridge(upstream, dir.path()).await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("{bridge}/v1/chat/stream"))
            .json(&chat_body())
            .send()
            .await
            .unwrap();
        let mut events = response_events(response);
        assert_eq!(events.next().await.unwrap().unwrap(), Event::text("tick"));
        drop(events);

        let mut outcome = None;
        for _ in 0..100 {
            let sessions: serde_json::Value = client
                .get(format!("{bridge}/v1/sessions"))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            if let Some(record) = sessions["data"].get(0) {
                outcome = record["outcome"].as_str().map(str::to_string);
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(outcome.as_deref(), Some("cancelled"));
    }
}

// ────────────────────────────────────────────────────────────────
// Live vendor tests (need OPENAI_API_KEY)
// ────────────────────────────────────────────────────────────────

#[tokio::test]
#[ignore = "requires OPENAI_API_KEY"]
async fn test_live_openai_stream() {
    use sse_chat_bridge::config::{ProviderConfig, RelaySettings};
    use sse_chat_bridge::message::{ChatMessage, ChatRequest};
    use sse_chat_bridge::upstream;
    use sse_chat_bridge::BridgeConfig;

    let config = BridgeConfig {
        port: 0,
        provider: ProviderConfig {
            name: "openai".to_string(),
            base_url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            format: None,
            group_id: None,
        },
        relay: RelaySettings::default(),
        models: Default::default(),
    };
    let req = ChatRequest {
        model: "gpt-4o-mini".to_string(),
        messages: vec![ChatMessage::user("Say 'hello' and nothing else.")],
        tools: None,
        extra: Default::default(),
    };

    let response = upstream::open_stream(&req, &config, &reqwest::Client::new())
        .await
        .unwrap();
    let decoded = DecodedStream::new(upstream::byte_stream(response), decoder_for(VendorFormat::OpenAi));
    let events: Vec<Event> = decoded.into_events().collect().await;

    println!("{events:?}");
    assert!(matches!(events.last(), Some(Event::Finish { .. })));
}
