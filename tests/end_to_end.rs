//! Proxy, dispatcher and collector wired together over loopback

mod common;

use axum::body::Bytes;
use axum::http::{Request, StatusCode};
use common::{settings_with, spawn_server, SharedBuffer};
use http_body_util::{BodyExt, Full};
use llm_meter::collector::{Collector, EventLog};
use llm_meter::domain::MeteringEvent;
use llm_meter::mock_upstream;
use llm_meter::proxy::types::build_http_client;
use llm_meter::Application;
use std::time::Duration;
use tokio::net::TcpListener;

async fn wait_for_lines(buffer: &SharedBuffer, count: usize) -> Vec<String> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let lines = buffer.lines();
            if lines.len() >= count {
                return lines;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("collector did not receive the events in time")
}

#[tokio::test]
async fn proxied_requests_reach_the_collector() {
    let upstream = spawn_server(mock_upstream::router()).await;
    let buffer = SharedBuffer::default();
    let collector = Collector::new(EventLog::to_writer(buffer.clone()));
    let collector_addr = spawn_server(collector.router()).await;

    let collector_url = format!("http://{collector_addr}/events");
    let settings = settings_with(
        upstream,
        &[
            ("COLLECTOR_URL", collector_url.as_str()),
            ("EVENT_FLUSH_TIMEOUT", "50ms"),
        ],
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(Application::with_settings(settings).run_until(listener, async {
        let _ = stop_rx.await;
    }));

    let client = build_http_client();
    let mut request_ids = Vec::new();
    for body in [
        r#"{"model":"gpt-4"}"#,
        r#"{"model":"gpt-4o","stream":true,"stream_options":{"include_usage":true}}"#,
    ] {
        let request = Request::post(format!("http://{proxy_addr}/v1/chat/completions"))
            .header("authorization", "Bearer team-a")
            .header("x-llm-tenant", "acme")
            .body(Full::new(Bytes::from_static(body.as_bytes())))
            .unwrap();
        let response = client.request(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        request_ids.push(
            response.headers()["x-llm-request-id"]
                .to_str()
                .unwrap()
                .to_string(),
        );
        response.into_body().collect().await.unwrap();
    }

    let lines = wait_for_lines(&buffer, 2).await;
    let events: Vec<MeteringEvent> = lines
        .iter()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();

    assert_eq!(
        events.iter().map(|e| e.request_id.to_string()).collect::<Vec<_>>(),
        request_ids
    );
    assert_eq!(events[0].model, "gpt-4");
    assert!(!events[0].stream);
    assert_eq!(events[1].model, "gpt-4o");
    assert!(events[1].stream);
    for event in &events {
        assert_eq!(event.tenant, "acme");
        assert_eq!(event.app_key, "team-a");
        assert_eq!(event.total_tokens, mock_upstream::MOCK_TOTAL_TOKENS);
        assert_eq!(event.status_code, 200);
    }

    drop(client);
    stop_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("proxy should stop")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn unreachable_collector_does_not_affect_clients() {
    let upstream = spawn_server(mock_upstream::router()).await;
    let collector_addr = common::closed_port().await;
    let collector_url = format!("http://{collector_addr}/events");
    let settings = settings_with(upstream, &[("COLLECTOR_URL", collector_url.as_str())]);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(Application::with_settings(settings).run_until(listener, async {
        let _ = stop_rx.await;
    }));

    let client = build_http_client();
    for _ in 0..3 {
        let request = Request::post(format!("http://{proxy_addr}/v1/chat/completions"))
            .header("authorization", "Bearer team-a")
            .body(Full::new(Bytes::from_static(br#"{"model":"gpt-4"}"#)))
            .unwrap();
        let response = client.request(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(!body.is_empty());
    }

    drop(client);
    stop_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("proxy should stop even with undeliverable events")
        .unwrap()
        .unwrap();
}
