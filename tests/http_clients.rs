use capture_agent::audio::QualitySummary;
use capture_agent::config::AgentConfig;
use capture_agent::net::DeviceId;
use capture_agent::recorder::PollOutcome;
use capture_agent::remote::{
    HttpStatusClient, HttpUploadClient, StatusPoller, UploadError, Uploader,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

// ---------------------------------------------------------------------------
// Canned HTTP server
// ---------------------------------------------------------------------------

/// One request as the server saw it.  Header names are lowercased.
struct Captured {
    head: String,
    body: Vec<u8>,
}

fn response(status_line: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status_line}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn content_length(head: &str) -> usize {
    head.lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

async fn read_request(stream: &mut tokio::net::TcpStream) -> Captured {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let head_end = loop {
        let n = stream.read(&mut chunk).await.expect("read failed");
        assert!(n > 0, "client closed before sending headers");
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_lowercase();
    let len = content_length(&head);
    while buf.len() < head_end + len {
        let n = stream.read(&mut chunk).await.expect("read failed");
        assert!(n > 0, "client closed mid-body");
        buf.extend_from_slice(&chunk[..n]);
    }

    Captured {
        head,
        body: buf[head_end..head_end + len].to_vec(),
    }
}

/// Serve exactly one request with `reply`; returns the base URL and the
/// captured request.
async fn serve_once(reply: String) -> (String, JoinHandle<Captured>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept failed");
        let captured = read_request(&mut stream).await;
        stream.write_all(reply.as_bytes()).await.expect("write failed");
        let _ = stream.shutdown().await;
        captured
    });
    (format!("http://{addr}"), handle)
}

/// Accept one request and never answer.
async fn serve_silence() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept failed");
        let _ = read_request(&mut stream).await;
        sleep(Duration::from_secs(30)).await;
        drop(stream);
    });
    format!("http://{addr}")
}

/// An address nothing listens on.
async fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

fn config_for(base_url: &str) -> AgentConfig {
    let mut config = AgentConfig::default();
    config.server.base_url = base_url.to_string();
    config.server.status_timeout_ms = 300;
    config.upload.min_timeout_ms = 500;
    config
}

fn device() -> DeviceId {
    DeviceId::resolve(Some("esp32-test"), [0; 6])
}

async fn poll_with(reply: String) -> (PollOutcome, Captured) {
    let (url, server) = serve_once(reply).await;
    let client = HttpStatusClient::from_config(&config_for(&url));
    let outcome = client.poll(&device()).await;
    (outcome, server.await.unwrap())
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[tokio::test]
async fn status_true_is_recording() {
    let (outcome, req) = poll_with(response("200 OK", r#"{"recording": true}"#)).await;

    assert_eq!(outcome, PollOutcome::Recording(true));
    assert!(
        req.head.starts_with("get /status?device=esp32-test "),
        "request: {}",
        req.head
    );
}

#[tokio::test]
async fn status_false_is_not_recording() {
    let (outcome, _) = poll_with(response("200 OK", r#"{"recording":false}"#)).await;
    assert_eq!(outcome, PollOutcome::Recording(false));
}

#[tokio::test]
async fn unparseable_200_is_inconclusive() {
    let (outcome, _) = poll_with(response("200 OK", "<html>maintenance</html>")).await;
    assert_eq!(outcome, PollOutcome::Inconclusive);
}

#[tokio::test]
async fn non_200_is_inconclusive_even_with_a_flag() {
    let (outcome, _) = poll_with(response(
        "503 Service Unavailable",
        r#"{"recording": true}"#,
    ))
    .await;
    assert_eq!(outcome, PollOutcome::Inconclusive);
}

#[tokio::test]
async fn refused_status_is_inconclusive() {
    let client = HttpStatusClient::from_config(&config_for(&refused_url().await));
    assert_eq!(client.poll(&device()).await, PollOutcome::Inconclusive);
}

#[tokio::test]
async fn silent_controller_times_out_inconclusive() {
    let client = HttpStatusClient::from_config(&config_for(&serve_silence().await));

    let started = std::time::Instant::now();
    assert_eq!(client.poll(&device()).await, PollOutcome::Inconclusive);
    assert!(started.elapsed() < Duration::from_secs(5));
}

// ---------------------------------------------------------------------------
// Upload
// ---------------------------------------------------------------------------

fn summary() -> QualitySummary {
    QualitySummary {
        avg_db: Some(-30.0),
        max_db: Some(-12.5),
        min_db: Some(-48.0),
        clip_events: 1,
        silence_chunks: 4,
        source_errors: 2,
        total_chunks: 20,
        valid_chunks: 20,
    }
}

#[tokio::test]
async fn upload_sends_body_query_and_metadata() {
    let (url, server) = serve_once(response("200 OK", "ok")).await;
    let client = HttpUploadClient::from_config(&config_for(&url));
    let audio: Vec<u8> = (0..4_096u32).map(|i| (i % 251) as u8).collect();

    client.upload(&audio, &summary(), &device()).await.unwrap();

    let req = server.await.unwrap();
    assert!(
        req.head
            .starts_with("post /audio?device=esp32-test&rate=16000&bits=16&channels=1 "),
        "request: {}",
        req.head
    );
    for expected in [
        "content-type: application/octet-stream",
        "x-audio-format: pcm",
        "x-sample-rate: 16000",
        "x-bits-per-sample: 16",
        "x-channels: 1",
        "x-audio-avgdb: -30.00",
        "x-audio-maxdb: -12.50",
        "x-audio-clipcount: 1",
        "x-audio-silencechunks: 4",
        "x-audio-i2serrors: 2",
        "x-audio-totalchunks: 20",
    ] {
        assert!(req.head.contains(expected), "missing {expected:?} in {}", req.head);
    }
    assert_eq!(req.body, audio);
}

#[tokio::test]
async fn upload_accepts_204() {
    let (url, server) = serve_once(response("204 No Content", "")).await;
    let client = HttpUploadClient::from_config(&config_for(&url));

    assert!(client.upload(&[0u8; 64], &summary(), &device()).await.is_ok());
    server.await.unwrap();
}

#[tokio::test]
async fn upload_rejects_other_success_codes() {
    let (url, server) = serve_once(response("201 Created", "")).await;
    let client = HttpUploadClient::from_config(&config_for(&url));

    let err = client.upload(&[0u8; 64], &summary(), &device()).await.unwrap_err();
    assert_eq!(err.code(), 201);
    server.await.unwrap();
}

#[tokio::test]
async fn upload_server_error_keeps_status_and_body() {
    let (url, server) = serve_once(response("500 Internal Server Error", "disk full")).await;
    let client = HttpUploadClient::from_config(&config_for(&url));

    let err = client.upload(&[1u8; 128], &summary(), &device()).await.unwrap_err();
    assert_eq!(err.code(), 500);
    match err {
        UploadError::Http { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "disk full");
        }
        other => panic!("unexpected error {other:?}"),
    }
    server.await.unwrap();
}

#[tokio::test]
async fn upload_to_closed_port_is_connection_refused() {
    let client = HttpUploadClient::from_config(&config_for(&refused_url().await));

    let err = client.upload(&[0u8; 16], &summary(), &device()).await.unwrap_err();
    assert_eq!(err.code(), -1, "got {err:?}");
}

#[tokio::test]
async fn upload_without_answer_is_read_timeout() {
    let client = HttpUploadClient::from_config(&config_for(&serve_silence().await));

    let err = client.upload(&[0u8; 16], &summary(), &device()).await.unwrap_err();
    assert_eq!(err.code(), -11, "got {err:?}");
}
