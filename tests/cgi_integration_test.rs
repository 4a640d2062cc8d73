//! CGIバイナリの統合テスト
//!
//! 実際にバイナリを起動し、環境変数と標準入力でリクエストを渡す。

use std::io::Write;
use std::process::{Command, Output, Stdio};

#[test]
fn test_cgi_hello_endpoint() {
    let output = run_cgi(&[("REQUEST_METHOD", "GET"), ("PATH_INFO", "/")], b"");
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(stdout.starts_with("Status: 200 OK\r\n"));
    assert!(stdout.contains("Content-Type: application/json"));
    assert!(stdout.contains("X-Frame-Options: SAMEORIGIN"));
    assert!(stdout.contains("Hello from httpstack CGI"));
}

#[test]
fn test_cgi_echo_endpoint_get() {
    let output = run_cgi(
        &[
            ("REQUEST_METHOD", "GET"),
            ("PATH_INFO", "/echo"),
            ("QUERY_STRING", "name=test&value=123"),
            ("HTTP_X_CUSTOM_HEADER", "TestValue"),
        ],
        b"",
    );
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(stdout.starts_with("Status: 200 OK\r\n"));
    assert!(stdout.contains("\"method\":\"GET\""));
    assert!(stdout.contains("\"path\":\"/echo\""));
    assert!(stdout.contains("\"name\":\"test\""));
    assert!(stdout.contains("\"value\":\"123\""));
    assert!(stdout.contains("\"X-Custom-Header\":\"TestValue\""));
}

#[test]
fn test_cgi_echo_endpoint_post() {
    let body = br#"{"message":"Hello, world!"}"#;
    let length = body.len().to_string();
    let output = run_cgi(
        &[
            ("REQUEST_METHOD", "POST"),
            ("PATH_INFO", "/echo"),
            ("CONTENT_TYPE", "application/json"),
            ("CONTENT_LENGTH", length.as_str()),
        ],
        body,
    );
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(stdout.starts_with("Status: 200 OK\r\n"));
    assert!(stdout.contains("\"method\":\"POST\""));
    assert!(stdout.contains("\"message\":\"Hello, world!\""));
}

#[test]
fn test_cgi_cors_preflight() {
    let output = run_cgi(
        &[
            ("REQUEST_METHOD", "OPTIONS"),
            ("PATH_INFO", "/echo"),
            ("HTTP_ORIGIN", "https://app.example"),
        ],
        b"",
    );
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(stdout.starts_with("Status: 204 No Content\r\n"));
    assert!(stdout.contains("Access-Control-Allow-Origin: https://app.example\r\n"));
}

#[test]
fn test_cgi_not_found() {
    let output = run_cgi(&[("REQUEST_METHOD", "GET"), ("PATH_INFO", "/not-exists")], b"");
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(stdout.starts_with("Status: 404 Not Found\r\n"));
    assert!(stdout.ends_with("Not Found: GET /not-exists"));
}

#[test]
fn test_cgi_panic_handling() {
    let output = run_cgi(&[("REQUEST_METHOD", "GET"), ("PATH_INFO", "/panic")], b"");
    let stdout = String::from_utf8_lossy(&output.stdout);

    // パニックしても500として応答する
    assert!(output.status.success());
    assert!(stdout.starts_with("Status: 500 Internal Server Error\r\n"));
    assert!(stdout.contains("Content-Type: text/plain"));
    assert!(stdout.contains("X-Error: panic: Test panic from handler"));
    assert!(stdout.ends_with("Internal Server Error"));
}

#[test]
fn test_cgi_error_details_can_be_hidden() {
    let output = run_cgi(
        &[
            ("REQUEST_METHOD", "GET"),
            ("PATH_INFO", "/panic"),
            ("HTTPSTACK_EXPOSE_ERRORS", "false"),
        ],
        b"",
    );
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(stdout.starts_with("Status: 500 Internal Server Error\r\n"));
    assert!(!stdout.contains("X-Error"));
}

#[test]
fn test_cgi_missing_method() {
    let output = run_cgi(&[("PATH_INFO", "/")], b"");
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(stdout.starts_with("Status: 500 Internal Server Error\r\n"));
}

/// CGI環境を組み立ててバイナリを実行
fn run_cgi(vars: &[(&str, &str)], stdin_data: &[u8]) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_httpstack-cgi"))
        .env_clear()
        .envs(vars.iter().copied())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to spawn CGI process");

    if !stdin_data.is_empty() {
        let mut stdin = child.stdin.take().expect("Failed to open stdin");
        stdin.write_all(stdin_data).expect("Failed to write to stdin");
    }

    child.wait_with_output().expect("Failed to wait for CGI process")
}
