//! Minimal stdlib HTTP test doubles. None of the example repos pull in a
//! mock-HTTP crate (wiremock/mockito/httpmock), so an embedding provider and
//! a task runner endpoint are faked by hand over `TcpListener`, one
//! connection at a time, good enough for the deterministic single-client
//! traffic an integration test generates.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

/// Read a full HTTP/1.1 request off `stream` and return its body, using
/// `Content-Length` (what `ureq::send_json` sends for a buffered JSON body).
fn read_request_body(stream: &mut TcpStream) -> Option<Vec<u8>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        if buf.len() > 1 << 20 {
            return None;
        }
    };

    let headers = String::from_utf8_lossy(&buf[..header_end]);
    let content_length: usize = headers
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length").then(|| value.trim().to_string())
        })
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    Some(buf[header_end..(header_end + content_length).min(buf.len())].to_vec())
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) {
    let reason = if status == 200 { "OK" } else { "Internal Server Error" };
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}

/// Deterministic stand-in embedding: buckets the (prefixed) text by whether
/// it mentions a handful of topic keywords, so unrelated texts land far
/// apart in cosine distance and near-identical texts land on top of each
/// other -- enough signal to exercise dedup and ranking without a real model.
fn fake_embedding(text: &str) -> Vec<f32> {
    const TOPICS: &[&str] = &["rust", "react", "postgres", "python", "commit", "review"];
    let lower = text.to_lowercase();
    let mut v: Vec<f32> = TOPICS
        .iter()
        .map(|topic| if lower.contains(topic) { 1.0 } else { 0.0 })
        .collect();
    // keep distinct non-matching texts from colliding at the all-zero vector
    let filler = (lower.len() % 7) as f32 * 0.01;
    v.push(filler);
    v
}

/// Spawn a fake OpenAI-compatible embedding endpoint and return its base URL
/// (including the `/v1` suffix `EmbeddingConfig::api_base` expects).
pub fn spawn_embedding_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock embedding server");
    let addr = listener.local_addr().unwrap();

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let Some(body) = read_request_body(&mut stream) else { continue };
            let Ok(request) = serde_json::from_slice::<serde_json::Value>(&body) else {
                write_json_response(&mut stream, 500, "{}");
                continue;
            };

            let inputs = request.get("input").and_then(|v| v.as_array()).cloned().unwrap_or_default();
            let data: Vec<serde_json::Value> = inputs
                .iter()
                .enumerate()
                .map(|(index, text)| {
                    let text = text.as_str().unwrap_or_default();
                    serde_json::json!({ "embedding": fake_embedding(text), "index": index })
                })
                .collect();

            let response = serde_json::json!({ "data": data, "model": "test-embed", "usage": null }).to_string();
            write_json_response(&mut stream, 200, &response);
        }
    });

    format!("http://{}/v1", addr)
}

/// Spawn a fake task-runner HTTP endpoint (the shape `HttpRunner` posts to
/// and parses). Fails the first `fail_count` requests with a 500, then
/// reports success -- used to exercise the scheduler's retry path.
pub fn spawn_runner_server(fail_count: usize) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock runner server");
    let addr = listener.local_addr().unwrap();
    let attempts = Arc::new(AtomicUsize::new(0));

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            if read_request_body(&mut stream).is_none() {
                continue;
            }

            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < fail_count {
                write_json_response(&mut stream, 500, r#"{"error":"simulated runner failure"}"#);
                continue;
            }

            let response = serde_json::json!({
                "output": "done",
                "summary": "task completed",
                "tokens_used": 42,
                "cost_usd": 0.001,
            })
            .to_string();
            write_json_response(&mut stream, 200, &response);
        }
    });

    format!("http://{}/run", addr)
}
