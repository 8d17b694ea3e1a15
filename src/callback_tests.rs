use crate::callback::{CALLBACK_ADDR, CALLBACK_TIMEOUT, CallbackListener, REDIRECT_URL};
use crate::error::MailError;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

async fn get(url: String) -> reqwest::Response {
    reqwest::Client::new().get(url).send().await.unwrap()
}

#[test]
fn test_fixed_redirect_matches_listen_address() {
    assert_eq!(REDIRECT_URL, format!("http://{}/callback", CALLBACK_ADDR));
    assert_eq!(CALLBACK_TIMEOUT, Duration::from_secs(300));
}

#[tokio::test]
async fn test_requires_expected_state() {
    let err = CallbackListener::bind("127.0.0.1:0", "").await.err().unwrap();
    assert!(matches!(err, MailError::Auth { .. }));
}

#[tokio::test]
async fn test_code_is_returned_and_listener_stops() {
    let listener = CallbackListener::bind("127.0.0.1:0", "state123").await.unwrap();
    let addr = listener.local_addr();
    let waiter = tokio::spawn(listener.wait(TEST_TIMEOUT));

    let response = get(format!("http://{}/callback?state=state123&code=abc", addr)).await;
    assert_eq!(response.status(), 200);
    assert!(response.text().await.unwrap().contains("Authorization successful"));

    let code = waiter.await.unwrap().unwrap();
    assert_eq!(code, "abc");
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn test_state_mismatch_fails_and_listener_stops() {
    let listener = CallbackListener::bind("127.0.0.1:0", "expected").await.unwrap();
    let addr = listener.local_addr();
    let waiter = tokio::spawn(listener.wait(TEST_TIMEOUT));

    let response = get(format!("http://{}/callback?state=forged&code=abc", addr)).await;
    assert_eq!(response.status(), 400);

    let err = waiter.await.unwrap().unwrap_err();
    assert!(matches!(err, MailError::Auth { .. }));
    assert!(err.to_string().contains("invalid state"));
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn test_missing_code_fails_and_listener_stops() {
    let listener = CallbackListener::bind("127.0.0.1:0", "s").await.unwrap();
    let addr = listener.local_addr();
    let waiter = tokio::spawn(listener.wait(TEST_TIMEOUT));

    let response = get(format!("http://{}/callback?state=s", addr)).await;
    assert_eq!(response.status(), 400);

    let err = waiter.await.unwrap().unwrap_err();
    assert!(err.to_string().contains("no code"));
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn test_provider_error_is_surfaced() {
    let listener = CallbackListener::bind("127.0.0.1:0", "s").await.unwrap();
    let addr = listener.local_addr();
    let waiter = tokio::spawn(listener.wait(TEST_TIMEOUT));

    get(format!("http://{}/callback?state=s&error=access_denied", addr)).await;

    let err = waiter.await.unwrap().unwrap_err();
    assert!(err.to_string().contains("access_denied"));
}

#[tokio::test]
async fn test_timeout_stops_listener() {
    let listener = CallbackListener::bind("127.0.0.1:0", "s").await.unwrap();
    let addr = listener.local_addr();

    let err = listener.wait(Duration::from_millis(50)).await.unwrap_err();
    assert!(err.to_string().contains("timed out"));
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn test_only_first_outcome_counts() {
    let listener = CallbackListener::bind("127.0.0.1:0", "s").await.unwrap();
    let addr = listener.local_addr();

    // Both requests land before anyone waits; the first one wins
    let first = get(format!("http://{}/callback?state=s&code=first", addr)).await;
    assert_eq!(first.status(), 200);
    let second = get(format!("http://{}/callback?state=s&code=second", addr)).await;
    assert_eq!(second.status(), 200);

    assert_eq!(listener.wait(TEST_TIMEOUT).await.unwrap(), "first");
}

#[tokio::test]
async fn test_half_sent_request_does_not_block_shutdown() {
    let listener = CallbackListener::bind("127.0.0.1:0", "s").await.unwrap();
    let addr = listener.local_addr();
    let waiter = tokio::spawn(listener.wait(TEST_TIMEOUT));

    // A client that never finishes its request headers
    let mut stalled = TcpStream::connect(addr).await.unwrap();
    stalled
        .write_all(b"GET /callback?state=s HTTP/1.1\r\nHost: 127.0.0.1\r\n")
        .await
        .unwrap();

    let response = get(format!("http://{}/callback?state=s&code=abc", addr)).await;
    assert_eq!(response.status(), 200);

    let code = tokio::time::timeout(Duration::from_secs(8), waiter)
        .await
        .expect("wait() must return despite the stalled connection")
        .unwrap()
        .unwrap();
    assert_eq!(code, "abc");
    assert!(TcpStream::connect(addr).await.is_err());
    drop(stalled);
}
