use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use outgate::prelude::{ErrorCode, Gateway, GatewayPolicy, PolicyOverrides, RequestDescriptor};
use serde::Deserialize;

#[derive(Clone)]
struct MockResponse {
    status: u16,
    body: Vec<u8>,
    delay: Duration,
}

impl MockResponse {
    fn json(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into().into_bytes(),
            delay: Duration::ZERO,
        }
    }

    fn delayed(status: u16, body: impl Into<String>, delay: Duration) -> Self {
        Self {
            status,
            body: body.into().into_bytes(),
            delay,
        }
    }
}

struct MockServer {
    base_url: String,
    served: Arc<AtomicUsize>,
    join: Option<JoinHandle<()>>,
}

impl MockServer {
    fn start(responses: Vec<MockResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        let address = listener.local_addr().expect("read local address");
        listener
            .set_nonblocking(true)
            .expect("set listener nonblocking");

        let served = Arc::new(AtomicUsize::new(0));
        let served_clone = Arc::clone(&served);

        let join = thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(10);
            let mut response_index = 0;

            while response_index < responses.len() && Instant::now() < deadline {
                match listener.accept() {
                    Ok((mut stream, _)) => {
                        let _ = drain_request(&mut stream);

                        served_clone.fetch_add(1, Ordering::SeqCst);
                        let response = &responses[response_index];
                        response_index += 1;

                        if !response.delay.is_zero() {
                            thread::sleep(response.delay);
                        }

                        let _ = write_response(&mut stream, response);
                    }
                    Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(5));
                    }
                    Err(_) => break,
                }
            }
        });

        Self {
            base_url: format!("http://{address}"),
            served,
            join: Some(join),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn served_count(&self) -> usize {
        self.served.load(Ordering::SeqCst)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn drain_request(stream: &mut TcpStream) -> std::io::Result<()> {
    stream.set_read_timeout(Some(Duration::from_secs(1)))?;

    let mut raw = Vec::new();
    loop {
        let mut chunk = [0_u8; 1024];
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        raw.extend_from_slice(&chunk[..read]);
        if let Some(header_end) = find_header_end(&raw) {
            let header_text = String::from_utf8_lossy(&raw[..header_end]);
            let headers: BTreeMap<String, String> = header_text
                .split("\r\n")
                .skip(1)
                .filter_map(|line| line.split_once(':'))
                .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_owned()))
                .collect();
            let content_length = headers
                .get("content-length")
                .and_then(|value| value.parse::<usize>().ok())
                .unwrap_or(0);
            let mut body_len = raw.len() - header_end - 4;
            while body_len < content_length {
                let read = stream.read(&mut chunk)?;
                if read == 0 {
                    break;
                }
                body_len += read;
            }
            break;
        }
    }
    Ok(())
}

fn write_response(stream: &mut TcpStream, response: &MockResponse) -> std::io::Result<()> {
    let raw = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        response.status,
        status_text(response.status),
        response.body.len()
    );
    stream.write_all(raw.as_bytes())?;
    stream.write_all(&response.body)?;
    stream.flush()
}

fn find_header_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|window| window == b"\r\n\r\n")
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
struct Person {
    name: String,
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_call_performs_exactly_retries_plus_one_attempts() {
    let server = MockServer::start(vec![
        MockResponse::json(500, "boom"),
        MockResponse::json(500, "boom"),
        MockResponse::json(500, "boom"),
    ]);
    let gateway = Gateway::new();

    let error = gateway
        .execute_single_with::<Person>(
            &RequestDescriptor::get(server.url("/people/2")),
            PolicyOverrides::new().retries(2),
        )
        .await
        .expect_err("persistent 500 should exhaust retries");

    assert_eq!(error.status(), Some(500));
    assert_eq!(server.served_count(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn defaults_apply_when_no_overrides_are_given() {
    // Default retry budget is 3, so a persistently failing call makes four
    // attempts before surfacing the last failure.
    let server = MockServer::start(vec![
        MockResponse::json(404, "nope"),
        MockResponse::json(404, "nope"),
        MockResponse::json(404, "nope"),
        MockResponse::json(404, "nope"),
    ]);
    let gateway = Gateway::new();

    let error = gateway
        .execute_single::<Person>(&RequestDescriptor::get(server.url("/people/999")))
        .await
        .expect_err("persistent 404 should exhaust retries");

    assert_eq!(error.code(), ErrorCode::HttpStatus);
    assert_eq!(error.status(), Some(404));
    assert_eq!(server.served_count(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn retry_stops_at_first_success() {
    let server = MockServer::start(vec![
        MockResponse::json(503, "busy"),
        MockResponse::json(200, r#"{"name":"C-3PO"}"#),
    ]);
    let gateway = Gateway::new();

    let person: Person = gateway
        .execute_single(&RequestDescriptor::get(server.url("/people/2")))
        .await
        .expect("second attempt should succeed");

    assert_eq!(person.name, "C-3PO");
    assert_eq!(server.served_count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn decode_failure_is_retried_like_any_other() {
    let server = MockServer::start(vec![
        MockResponse::json(200, "mangled"),
        MockResponse::json(200, r#"{"name":"C-3PO"}"#),
    ]);
    let gateway = Gateway::new();

    let person: Person = gateway
        .execute_single_with(
            &RequestDescriptor::get(server.url("/people/2")),
            PolicyOverrides::new().retries(1),
        )
        .await
        .expect("retry after decode failure should succeed");

    assert_eq!(person.name, "C-3PO");
    assert_eq!(server.served_count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn last_failure_wins_when_retries_are_exhausted() {
    let server = MockServer::start(vec![
        MockResponse::json(500, "boom"),
        MockResponse::json(200, "mangled"),
    ]);
    let gateway = Gateway::new();

    let error = gateway
        .execute_single_with::<Person>(
            &RequestDescriptor::get(server.url("/people/2")),
            PolicyOverrides::new().retries(1),
        )
        .await
        .expect_err("both attempts fail");

    // The earlier 500 is discarded; the decode failure from the final
    // attempt is the one surfaced.
    assert_eq!(error.code(), ErrorCode::Decode);
    assert_eq!(server.served_count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transport_failure_is_retried_and_surfaced() {
    // Grab a free port, then drop the listener so connections are refused.
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind probe listener");
    let address = listener.local_addr().expect("read probe address");
    drop(listener);

    let gateway = Gateway::new();
    let error = gateway
        .execute_single_with::<Person>(
            &RequestDescriptor::get(format!("http://{address}/people/2")),
            PolicyOverrides::new().retries(1),
        )
        .await
        .expect_err("refused connection should fail the call");

    assert_eq!(error.code(), ErrorCode::Transport);
    assert!(error.status().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timeout_fires_even_with_retry_budget_remaining() {
    let server = MockServer::start(vec![MockResponse::delayed(
        200,
        r#"{"name":"C-3PO"}"#,
        Duration::from_secs(4),
    )]);
    let gateway = Gateway::new();

    let started = Instant::now();
    let error = gateway
        .execute_single_with::<Person>(
            &RequestDescriptor::get(server.url("/people/2")),
            PolicyOverrides::new().timeout_secs(1).retries(5),
        )
        .await
        .expect_err("slow server should trip the aggregate timeout");

    assert_eq!(error.code(), ErrorCode::Timeout);
    assert!(error.status().is_none());
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_secs(3));
    // The one in-flight attempt was cancelled; no retries were issued after
    // the budget expired.
    assert_eq!(server.served_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timeout_bounds_the_whole_retry_loop() {
    // Each attempt responds with an error after 400ms; a 1s aggregate budget
    // admits only a couple of attempts even though the retry budget allows
    // many more.
    let responses = (0..10)
        .map(|_| MockResponse::delayed(500, "boom", Duration::from_millis(400)))
        .collect();
    let server = MockServer::start(responses);
    let gateway = Gateway::new();

    let started = Instant::now();
    let error = gateway
        .execute_single_with::<Person>(
            &RequestDescriptor::get(server.url("/people/2")),
            PolicyOverrides::new().timeout_secs(1).retries(9),
        )
        .await
        .expect_err("budget should expire before retries do");

    assert_eq!(error.code(), ErrorCode::Timeout);
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(server.served_count() < 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn gateway_policy_defaults_can_be_tuned() {
    let server = MockServer::start(vec![
        MockResponse::json(500, "boom"),
        MockResponse::json(500, "boom"),
    ]);
    let gateway = Gateway::with_policy(GatewayPolicy::default().retries(1).timeout_secs(8));

    let error = gateway
        .execute_single::<Person>(&RequestDescriptor::get(server.url("/people/2")))
        .await
        .expect_err("both attempts fail");

    assert_eq!(error.status(), Some(500));
    assert_eq!(server.served_count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_calls_do_not_share_state() {
    let slow = MockServer::start(vec![MockResponse::delayed(
        200,
        r#"{"name":"slow"}"#,
        Duration::from_secs(4),
    )]);
    let fast = MockServer::start(vec![MockResponse::json(200, r#"{"name":"fast"}"#)]);
    let gateway = Gateway::new();

    let slow_descriptor = RequestDescriptor::get(slow.url("/slow"));
    let fast_descriptor = RequestDescriptor::get(fast.url("/fast"));
    let slow_call = gateway.execute_single_with::<Person>(
        &slow_descriptor,
        PolicyOverrides::new().timeout_secs(1).retries(0),
    );
    let fast_call = gateway.execute_single_with::<Person>(
        &fast_descriptor,
        PolicyOverrides::new().timeout_secs(5).retries(0),
    );

    let (slow_result, fast_result) = tokio::join!(slow_call, fast_call);

    // One call timing out cancels only its own exchange.
    assert_eq!(
        slow_result.expect_err("slow call should time out").code(),
        ErrorCode::Timeout
    );
    assert_eq!(
        fast_result.expect("fast call should succeed").name,
        "fast"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sequence_decode_failure_reissues_the_call() {
    let server = MockServer::start(vec![
        MockResponse::json(200, r#"[{"name":"Luke"},{"name":42}]"#),
        MockResponse::json(200, r#"[{"name":"Luke"},{"name":"R2-D2"}]"#),
    ]);
    let gateway = Gateway::new();

    let stream = gateway
        .execute_sequence_with::<Person>(
            &RequestDescriptor::get(server.url("/people")),
            PolicyOverrides::new().retries(3),
        )
        .await
        .expect("sequence call should succeed");
    let names: Vec<String> = stream
        .map(|item| item.expect("every element should decode after the reissue").name)
        .collect()
        .await;

    // The fresh exchange re-emits from its start, so the element seen before
    // the failure appears again.
    assert_eq!(names, ["Luke", "Luke", "R2-D2"]);
    assert_eq!(server.served_count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sequence_reissue_stops_when_budget_is_spent() {
    let server = MockServer::start(vec![
        MockResponse::json(200, r#"[{"name":42}]"#),
        MockResponse::json(200, r#"[{"name":42}]"#),
    ]);
    let gateway = Gateway::new();

    let mut stream = gateway
        .execute_sequence_with::<Person>(
            &RequestDescriptor::get(server.url("/people")),
            PolicyOverrides::new().retries(1),
        )
        .await
        .expect("status is fine, failure comes from decoding");

    let error = stream
        .next()
        .await
        .expect("an item should surface")
        .expect_err("decoding should fail on both attempts");
    assert_eq!(error.code(), ErrorCode::Decode);
    assert!(stream.next().await.is_none());
    assert_eq!(server.served_count(), 2);
}
