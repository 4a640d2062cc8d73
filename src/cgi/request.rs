//! CGIメタ変数と標準入力からリクエストを構築する

use std::collections::HashMap;
use std::env;
use std::io::{self, Read};

use http::{Method, Uri};
use log::{debug, warn};

use crate::common::utils::{is_header_name_valid, is_header_value_valid};
use crate::common::Request;
use crate::error::Error;
use super::redact::redact_value;

/// `HTTP_X_AUTH_TOKEN` → `X-Auth-Token`
fn header_name_from_var(key: &str) -> Option<String> {
    let raw = if let Some(rest) = key.strip_prefix("HTTP_") {
        rest
    } else if key == "CONTENT_TYPE" || key == "CONTENT_LENGTH" {
        key
    } else {
        return None;
    };
    let name = raw
        .split('_')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                None => String::new(),
                Some(c) => c.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase(),
            }
        })
        .collect::<Vec<String>>()
        .join("-");
    Some(name)
}

/// メタ変数からHTTPヘッダーを取り出す（名前順、不正なものは除外）
pub fn cgi_headers(vars: &HashMap<String, String>) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = vars
        .iter()
        .filter_map(|(key, value)| {
            let name = header_name_from_var(key)?;
            if !is_header_name_valid(&name) || !is_header_value_valid(value) {
                warn!("Dropping invalid CGI header {}={}", key, redact_value(key, value));
                return None;
            }
            Some((name, value.clone()))
        })
        .collect();
    headers.sort();
    headers
}

fn request_uri(vars: &HashMap<String, String>) -> Result<Uri, Error> {
    if let Some(uri) = vars.get("REQUEST_URI").filter(|u| !u.is_empty()) {
        match uri.parse::<Uri>() {
            Ok(parsed) => return Ok(parsed),
            Err(e) => debug!("REQUEST_URI not usable ({}), falling back to PATH_INFO", e),
        }
    }
    let path = vars
        .get("PATH_INFO")
        .filter(|p| !p.is_empty())
        .map(String::as_str)
        .unwrap_or("/");
    let uri = match vars.get("QUERY_STRING").filter(|q| !q.is_empty()) {
        Some(query) => format!("{}?{}", path, query),
        None => path.to_string(),
    };
    uri.parse::<Uri>()
        .map_err(|e| Error::bad_request(format!("Invalid request path {:?}: {}", uri, e)))
}

/// CONTENT_LENGTH 分だけボディを読み込む
fn read_body<R: Read>(vars: &HashMap<String, String>, mut body: R, max_body_size: usize) -> Result<Vec<u8>, Error> {
    let content_length = match vars.get("CONTENT_LENGTH").map(|s| s.trim()) {
        Some(s) if !s.is_empty() => s
            .parse::<usize>()
            .map_err(|_| Error::bad_request(format!("Invalid CONTENT_LENGTH: {}", s)))?,
        _ => return Ok(Vec::new()),
    };
    if content_length > max_body_size {
        return Err(Error::payload_too_large(format!(
            "Request body size {} bytes exceeds maximum allowed size {} bytes",
            content_length, max_body_size
        )));
    }

    let mut buffer = vec![0u8; content_length];
    body.read_exact(&mut buffer)
        .map_err(|e| Error::bad_request(format!("Failed to read request body: {}", e)))?;
    Ok(buffer)
}

/// CGIメタ変数とボディからリクエストを構築する
///
/// gzip ボディは展開し、Content-Type に応じてフォーム・JSON・multipart を解析する。
pub fn request_from_parts<R: Read>(
    vars: &HashMap<String, String>,
    body: R,
    max_body_size: usize,
) -> Result<Request, Error> {
    let method_str = vars
        .get("REQUEST_METHOD")
        .ok_or_else(|| Error::InvalidRequestBody("REQUEST_METHOD environment variable not set".to_string()))?;
    let method = Method::from_bytes(method_str.to_ascii_uppercase().as_bytes())
        .map_err(|_| Error::bad_request(format!("Invalid HTTP method: {}", method_str)))?;
    let uri = request_uri(vars)?;

    let mut request = Request::new(method, uri).with_server_params(vars.clone());
    for (name, value) in cgi_headers(vars) {
        request = request.with_header(&name, &value);
    }

    let body = read_body(vars, body, max_body_size)?;
    debug!(
        "Built CGI request {} {} ({} body bytes)",
        request.method(),
        request.uri(),
        body.len()
    );
    request
        .with_body(body)
        .with_decompressed_body(max_body_size)?
        .with_reparsed_body()
}

/// プロセスの環境変数と標準入力から構築する
pub fn request_from_env(max_body_size: usize) -> Result<Request, Error> {
    let vars: HashMap<String, String> = env::vars().collect();
    request_from_parts(&vars, io::stdin().lock(), max_body_size)
}
