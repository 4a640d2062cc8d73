//! CGIモジュールのテスト

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use serde_json::json;

use crate::clock::FixedClock;
use crate::common::{Request, Response};
use crate::error::Error;
use crate::server::{Server, Transport};
use super::redact::{environment_summary, is_sensitive_key, redact_query_string, redact_value};
use super::request::{cgi_headers, request_from_env, request_from_parts};
use super::response::CgiTransport;

fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn build(pairs: &[(&str, &str)], body: &[u8]) -> Result<Request, Error> {
    request_from_parts(&vars(pairs), body, 1024)
}

#[test]
fn test_cgi_headers() {
    let headers = cgi_headers(&vars(&[
        ("HTTP_CONTENT_TYPE", "application/json"),
        ("HTTP_X_CUSTOM_HEADER", "test value"),
        ("HTTP_X_AUTH_TOKEN", "secret-token"),
        ("CONTENT_LENGTH", "123"),
        ("HTTP_X_BAD", "line\r\nbreak"),
        ("UNRELATED_VAR", "should not be included"),
    ]));

    let get = |name: &str| headers.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str());
    assert_eq!(get("Content-Type"), Some("application/json"));
    assert_eq!(get("X-Custom-Header"), Some("test value"));
    assert_eq!(get("X-Auth-Token"), Some("secret-token"));
    assert_eq!(get("Content-Length"), Some("123"));
    assert_eq!(get("X-Bad"), None);
    assert_eq!(headers.len(), 4);
}

#[test]
fn test_get_request_from_parts() {
    let req = build(
        &[
            ("REQUEST_METHOD", "GET"),
            ("PATH_INFO", "/echo"),
            ("QUERY_STRING", "name=test&value=123"),
            ("REMOTE_ADDR", "10.1.2.3"),
            ("HTTP_COOKIE", "theme=dark; lang=ja"),
        ],
        b"",
    )
    .unwrap();

    assert!(req.is_method("GET"));
    assert_eq!(req.path(), "/echo");
    assert_eq!(req.query("name"), Some("test"));
    assert_eq!(req.query("value"), Some("123"));
    assert_eq!(req.server_param("REMOTE_ADDR"), Some("10.1.2.3"));
    assert_eq!(req.client_ip(), Some("10.1.2.3"));
    assert_eq!(req.cookie("lang"), Some("ja"));
}

#[test]
fn test_request_uri_takes_precedence() {
    let req = build(
        &[
            ("REQUEST_METHOD", "GET"),
            ("REQUEST_URI", "/app/items?page=3"),
            ("PATH_INFO", "/items"),
            ("QUERY_STRING", "page=3"),
        ],
        b"",
    )
    .unwrap();
    assert_eq!(req.path(), "/app/items");
    assert_eq!(req.query("page"), Some("3"));
}

#[test]
fn test_form_and_json_bodies_are_parsed() {
    let form = b"name=Alice&role=admin";
    let req = build(
        &[
            ("REQUEST_METHOD", "POST"),
            ("CONTENT_TYPE", "application/x-www-form-urlencoded"),
            ("CONTENT_LENGTH", "21"),
        ],
        form,
    )
    .unwrap();
    assert_eq!(req.post("name"), Some(&json!("Alice")));
    assert_eq!(req.input("role"), Some(json!("admin")));

    let body = br#"{"id": 5}"#;
    let req = build(
        &[
            ("REQUEST_METHOD", "PUT"),
            ("CONTENT_TYPE", "application/json"),
            ("CONTENT_LENGTH", &body.len().to_string()),
        ],
        body,
    )
    .unwrap();
    assert_eq!(req.post("id"), Some(&json!(5)));
}

#[test]
fn test_multipart_upload() {
    let body = "--XyZ\r\n\
Content-Disposition: form-data; name=\"title\"\r\n\r\n\
report\r\n\
--XyZ\r\n\
Content-Disposition: form-data; name=\"doc\"; filename=\"a.txt\"\r\n\
Content-Type: text/plain\r\n\r\n\
hello file\r\n\
--XyZ--\r\n";
    let req = build(
        &[
            ("REQUEST_METHOD", "POST"),
            ("CONTENT_TYPE", "multipart/form-data; boundary=XyZ"),
            ("CONTENT_LENGTH", &body.len().to_string()),
        ],
        body.as_bytes(),
    )
    .unwrap();

    assert_eq!(req.post("title"), Some(&json!("report")));
    let file = req.file("doc").unwrap();
    assert_eq!(file.client_filename(), Some("a.txt"));
    assert_eq!(file.bytes().as_ref(), b"hello file");
}

#[test]
fn test_gzip_body_is_expanded() {
    use flate2::write::GzEncoder;
    use flate2::Compression;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(br#"{"compressed": true}"#).unwrap();
    let compressed = encoder.finish().unwrap();

    let req = build(
        &[
            ("REQUEST_METHOD", "POST"),
            ("CONTENT_TYPE", "application/json"),
            ("HTTP_CONTENT_ENCODING", "gzip"),
            ("CONTENT_LENGTH", &compressed.len().to_string()),
        ],
        &compressed,
    )
    .unwrap();
    assert_eq!(req.post("compressed"), Some(&json!(true)));
}

#[test]
fn test_construction_failures() {
    let err = build(&[("PATH_INFO", "/")], b"").unwrap_err();
    assert_eq!(err.status_code(), 500);

    let err = build(&[("REQUEST_METHOD", "POST"), ("CONTENT_LENGTH", "4096")], b"").unwrap_err();
    assert_eq!(err.status_code(), 413);

    let err = build(&[("REQUEST_METHOD", "POST"), ("CONTENT_LENGTH", "10")], b"short").unwrap_err();
    assert_eq!(err.status_code(), 400);

    let err = build(
        &[
            ("REQUEST_METHOD", "POST"),
            ("CONTENT_TYPE", "application/json"),
            ("CONTENT_LENGTH", "5"),
        ],
        b"{oops",
    )
    .unwrap_err();
    assert_eq!(err.status_code(), 400);
}

#[test]
fn test_request_from_env() {
    temp_env::with_vars(
        [
            ("REQUEST_METHOD", Some("DELETE")),
            ("REQUEST_URI", None),
            ("PATH_INFO", Some("/items/9")),
            ("QUERY_STRING", Some("force=1")),
            ("CONTENT_LENGTH", None),
            ("HTTP_X_REQUEST_ID", Some("abc-123")),
        ],
        || {
            let req = request_from_env(1024).unwrap();
            assert!(req.is_method("DELETE"));
            assert_eq!(req.path(), "/items/9");
            assert_eq!(req.query("force"), Some("1"));
            assert_eq!(req.header("X-Request-Id"), Some("abc-123"));
        },
    );
}

#[test]
fn test_transport_output_format() {
    let server = Server::new().with_clock(Arc::new(FixedClock::at(0)));
    let response = Response::created(Some("/items/1"), "done")
        .with_header("Content-Type", "text/plain")
        .with_simple_cookie("sid", "a b", 0);
    let mut transport = CgiTransport::new(Vec::new());

    server.send_to(response, &mut transport).unwrap();
    assert!(transport.headers_sent());

    let output = String::from_utf8(transport.into_inner()).unwrap();
    assert!(output.starts_with("Status: 201 Created\r\n"));
    assert!(output.contains("Location: /items/1\r\n"));
    assert!(output.contains("Content-Type: text/plain\r\n"));
    assert!(output.contains("Set-Cookie: sid=a+b; Path=/; HttpOnly; SameSite=Lax\r\n"));
    assert!(output.contains("Content-Length: 4\r\n"));
    assert!(output.ends_with("\r\n\r\ndone"));
}

#[test]
fn test_transport_skips_status_and_invalid_headers() {
    let mut transport = CgiTransport::new(Vec::new());
    transport
        .send_head(
            http::StatusCode::IM_A_TEAPOT,
            &[
                ("Status".to_string(), "200 OK".to_string()),
                ("Bad Name".to_string(), "x".to_string()),
                ("X-Ok".to_string(), "yes".to_string()),
            ],
        )
        .unwrap();
    let output = String::from_utf8(transport.into_inner()).unwrap();
    assert_eq!(output, "Status: 418 I'm a teapot\r\nX-Ok: yes\r\n\r\n");
}

#[test]
fn test_redaction() {
    assert!(is_sensitive_key("HTTP_AUTHORIZATION"));
    assert!(is_sensitive_key("HTTP_X_API_KEY"));
    assert!(!is_sensitive_key("HTTP_USER_AGENT"));

    assert_eq!(redact_value("HTTP_COOKIE", "sid=abc"), "***redacted***");
    assert_eq!(
        redact_query_string("page=2&access_token=xyz&q=rust"),
        "page=2&access_token=***redacted***&q=rust"
    );
    let long = "a".repeat(300);
    assert!(redact_value("HTTP_USER_AGENT", &long).ends_with("...[truncated]"));

    let summary = environment_summary(&vars(&[
        ("REQUEST_METHOD", "GET"),
        ("HTTP_AUTHORIZATION", "Bearer secret"),
    ]));
    assert!(summary.contains("REQUEST_METHOD=GET"));
    assert!(summary.contains("HTTP_AUTHORIZATION=***redacted***"));
    assert!(!summary.contains("secret"));
}
