//! Shared fixtures for integration tests
#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use config::Environment;
use http_body_util::BodyExt;
use llm_meter::config::ProxySettings;
use llm_meter::domain::MeteringEvent;
use llm_meter::metering::EventQueue;
use parking_lot::Mutex;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceExt;

pub const UPSTREAM_KEY: &str = "sk-upstream-secret";

/// Serve `router` on an ephemeral loopback port
pub async fn spawn_server(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// A loopback address with nothing listening on it
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

pub fn settings_with(upstream: SocketAddr, extra: &[(&str, &str)]) -> ProxySettings {
    let upstream_url = format!("http://{upstream}");
    let mut pairs = vec![
        ("UPSTREAM_OPENAI_API_KEY", UPSTREAM_KEY),
        ("UPSTREAM_OPENAI_BASE_URL", upstream_url.as_str()),
    ];
    pairs.extend_from_slice(extra);

    let map: config::Map<String, String> = pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    ProxySettings::from_source(Environment::default().source(Some(map))).unwrap()
}

pub fn settings(upstream: SocketAddr) -> ProxySettings {
    settings_with(upstream, &[])
}

pub fn chat_request(bearer: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::post("/v1/chat/completions").header("content-type", "application/json");
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

/// Send through `router` and read the whole body
pub async fn send(router: Router, request: Request<Body>) -> (Response<Body>, Vec<u8>) {
    let response = router.oneshot(request).await.unwrap();
    let (parts, body) = response.into_parts();
    let bytes = body.collect().await.unwrap().to_bytes().to_vec();
    (Response::from_parts(parts, Body::empty()), bytes)
}

/// Take every queued event
pub fn drain(queue: &EventQueue) -> Vec<MeteringEvent> {
    std::iter::from_fn(|| queue.dequeue()).collect()
}

/// Poll `queue` until it holds at least one event
pub async fn next_event(queue: &EventQueue) -> MeteringEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(event) = queue.dequeue() {
                return event;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("no metering event within 5s")
}

/// In-memory writer whose contents stay readable after an event log takes it
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn lines(&self) -> Vec<String> {
        String::from_utf8(self.0.lock().clone())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
