use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::json;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

fn echo_handler(req: Request) -> std::pin::Pin<Box<dyn Future<Output = Response> + Send>> {
    Box::pin(async move {
        match req.method.as_str() {
            "echo" => Response::ok(req.id, req.params),
            "sleep" => {
                let ms = req.params["ms"].as_u64().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Response::ok(req.id, json!({"slept": ms}))
            }
            other => Response::error(req.id, format!("unknown method: {}", other)),
        }
    })
}

async fn start(dir: &TempDir) -> (PathBuf, CancellationToken, tokio::task::JoinHandle<Result<()>>) {
    let path = dir.path().join("run").join("agent.sock");
    let server = Server::new(path.clone(), echo_handler);
    let token = server.shutdown_token();
    let listener = server.bind().unwrap();
    let handle = tokio::spawn(async move {
        server.serve(listener).await;
        Ok(())
    });
    (path, token, handle)
}

async fn roundtrip(stream: &mut BufReader<UnixStream>, line: &str) -> Response {
    stream.get_mut().write_all(line.as_bytes()).await.unwrap();
    let mut out = String::new();
    stream.read_line(&mut out).await.unwrap();
    serde_json::from_str(&out).unwrap()
}

// ========================================================================
// Backoff
// ========================================================================

#[test]
fn accept_backoff_doubles_and_caps() {
    let mut d = None;
    let mut seen = Vec::new();
    for _ in 0..10 {
        let next = next_accept_backoff(d);
        seen.push(next);
        d = Some(next);
    }
    assert_eq!(seen[0], Duration::from_millis(50));
    assert_eq!(seen[1], Duration::from_millis(100));
    assert_eq!(seen[2], Duration::from_millis(200));
    assert_eq!(*seen.last().unwrap(), Duration::from_secs(5));
    assert!(seen.iter().all(|d| *d <= ACCEPT_BACKOFF_MAX));
}

// ========================================================================
// Binding
// ========================================================================

#[tokio::test]
async fn bind_replaces_stale_socket_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("agent.sock");
    std::fs::write(&path, b"stale").unwrap();

    let server = Server::new(path.clone(), echo_handler);
    let _listener = server.bind().unwrap();

    let meta = std::fs::metadata(&path).unwrap();
    use std::os::unix::fs::FileTypeExt;
    assert!(meta.file_type().is_socket());
    assert_eq!(meta.permissions().mode() & 0o777, 0o660);
}

#[tokio::test]
async fn bind_rejects_symlinked_socket_path() {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("elsewhere");
    std::fs::write(&target, b"").unwrap();
    let path = dir.path().join("agent.sock");
    std::os::unix::fs::symlink(&target, &path).unwrap();

    let server = Server::new(path, echo_handler);
    assert!(matches!(server.bind(), Err(ServerError::SocketSymlink { .. })));
}

#[tokio::test]
async fn bind_fails_for_missing_group() {
    let dir = TempDir::new().unwrap();
    let server = Server::new(dir.path().join("agent.sock"), echo_handler)
        .with_socket_group("fastcp-no-such-group-xyz");
    assert!(matches!(server.bind(), Err(ServerError::GroupResolution(_))));
}

// ========================================================================
// Connection handling
// ========================================================================

#[tokio::test]
async fn responses_follow_request_order_on_one_connection() {
    let dir = TempDir::new().unwrap();
    let (path, token, handle) = start(&dir).await;

    let stream = UnixStream::connect(&path).await.unwrap();
    let mut stream = BufReader::new(stream);

    // Write both requests before reading; the slow one must still answer first.
    stream
        .get_mut()
        .write_all(b"{\"id\":\"1\",\"method\":\"sleep\",\"params\":{\"ms\":80}}\n{\"id\":\"2\",\"method\":\"echo\",\"params\":{\"v\":2}}\n")
        .await
        .unwrap();
    let mut first = String::new();
    stream.read_line(&mut first).await.unwrap();
    let mut second = String::new();
    stream.read_line(&mut second).await.unwrap();

    let first: Response = serde_json::from_str(&first).unwrap();
    let second: Response = serde_json::from_str(&second).unwrap();
    assert_eq!(first.id, "1");
    assert_eq!(second.id, "2");
    assert_eq!(second.result, Some(json!({"v": 2})));

    token.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn unknown_method_returns_error_and_keeps_connection() {
    let dir = TempDir::new().unwrap();
    let (path, token, handle) = start(&dir).await;

    let mut stream = BufReader::new(UnixStream::connect(&path).await.unwrap());
    let resp = roundtrip(&mut stream, "{\"id\":\"a\",\"method\":\"bogus.call\"}\n").await;
    assert_eq!(resp.error.as_deref(), Some("unknown method: bogus.call"));
    assert!(resp.result.is_none());

    let resp = roundtrip(&mut stream, "{\"id\":\"b\",\"method\":\"echo\",\"params\":{\"x\":1}}\n").await;
    assert_eq!(resp.id, "b");
    assert_eq!(resp.result, Some(json!({"x": 1})));

    token.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn malformed_json_closes_only_that_connection() {
    let dir = TempDir::new().unwrap();
    let (path, token, handle) = start(&dir).await;

    let mut bad = BufReader::new(UnixStream::connect(&path).await.unwrap());
    let mut good = BufReader::new(UnixStream::connect(&path).await.unwrap());

    bad.get_mut().write_all(b"{oops\n").await.unwrap();
    let mut out = String::new();
    let n = bad.read_line(&mut out).await.unwrap();
    assert_eq!(n, 0, "server should close the malformed connection");

    let resp = roundtrip(&mut good, "{\"id\":\"ok\",\"method\":\"echo\",\"params\":{}}\n").await;
    assert_eq!(resp.id, "ok");

    token.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn slow_call_does_not_block_other_connections() {
    let dir = TempDir::new().unwrap();
    let (path, token, handle) = start(&dir).await;

    let mut slow = BufReader::new(UnixStream::connect(&path).await.unwrap());
    slow.get_mut()
        .write_all(b"{\"id\":\"s\",\"method\":\"sleep\",\"params\":{\"ms\":1500}}\n")
        .await
        .unwrap();

    let mut fast = BufReader::new(UnixStream::connect(&path).await.unwrap());
    let started = std::time::Instant::now();
    let resp = roundtrip(&mut fast, "{\"id\":\"f\",\"method\":\"echo\",\"params\":{}}\n").await;
    assert_eq!(resp.id, "f");
    assert!(started.elapsed() < Duration::from_millis(1000));

    token.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn shutdown_waits_for_in_flight_request() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("agent.sock");
    let finished = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&finished);
    let server = Server::new(path.clone(), move |req: Request| {
        let counter = Arc::clone(&counter);
        async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            counter.fetch_add(1, Ordering::SeqCst);
            Response::ok(req.id, json!(true))
        }
    });
    let token = server.shutdown_token();
    let listener = server.bind().unwrap();
    let handle = tokio::spawn(server.serve(listener));

    let mut stream = BufReader::new(UnixStream::connect(&path).await.unwrap());
    stream
        .get_mut()
        .write_all(b"{\"id\":\"1\",\"method\":\"any\"}\n")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    token.cancel();
    handle.await.unwrap();
    assert_eq!(finished.load(Ordering::SeqCst), 1);

    let mut out = String::new();
    stream.read_line(&mut out).await.unwrap();
    let resp: Response = serde_json::from_str(&out).unwrap();
    assert_eq!(resp.result, Some(json!(true)));
}
