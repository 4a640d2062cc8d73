//! HTTPリクエストの値型

use std::collections::HashMap;
use std::io::Read;
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use flate2::read::GzDecoder;
use http::header::{HeaderMap, HeaderName, HeaderValue, COOKIE};
use http::{Method, Uri};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::Error;
use crate::session::Session;
use super::context::Attributes;
use super::cookie::CookieJar;
use super::upload::{parse_body, UploadedFile};
use super::utils::parse_query_string;

/// セッションを格納する属性名
pub const SESSION_ATTRIBUTE: &str = "session";

/// HTTPリクエスト
///
/// 不変の値として扱う。`with_*` は `self` を消費して新しいリクエストを返すため、
/// 先行するミドルウェアが保持している値が書き換わることはない。
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    query_params: HashMap<String, String>,
    parsed_body: HashMap<String, Value>,
    body: Bytes,
    uploaded_files: HashMap<String, UploadedFile>,
    server_params: HashMap<String, String>,
    attributes: Attributes,
    cookies: OnceLock<CookieJar>,
}

impl Request {
    /// 新しいリクエストを作成（クエリパラメータはURIから取り込む）
    pub fn new(method: Method, uri: Uri) -> Self {
        let query_params = uri.query().map(parse_query_string).unwrap_or_default();
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            query_params,
            parsed_body: HashMap::new(),
            body: Bytes::new(),
            uploaded_files: HashMap::new(),
            server_params: HashMap::new(),
            attributes: Attributes::new(),
            cookies: OnceLock::new(),
        }
    }

    /// 文字列のメソッドとURIから作成
    pub fn create(method: &str, uri: &str) -> Result<Self, Error> {
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|_| Error::bad_request(format!("Invalid HTTP method: {}", method)))?;
        let uri = uri
            .parse::<Uri>()
            .map_err(|e| Error::InvalidUri(format!("{}: {}", uri, e)))?;
        Ok(Self::new(method, uri))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// メソッドを大文字小文字を区別せずに比較
    pub fn is_method(&self, method: &str) -> bool {
        self.method.as_str().eq_ignore_ascii_case(method)
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// ヘッダーの最初の値を取得
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn header_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.header(name).unwrap_or(default)
    }

    /// 同名ヘッダーの値をすべて取得
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn query(&self, key: &str) -> Option<&str> {
        self.query_params.get(key).map(String::as_str)
    }

    pub fn query_params(&self) -> &HashMap<String, String> {
        &self.query_params
    }

    pub fn post(&self, key: &str) -> Option<&Value> {
        self.parsed_body.get(key)
    }

    pub fn post_params(&self) -> &HashMap<String, Value> {
        &self.parsed_body
    }

    /// ボディ → クエリの順に値を探す
    pub fn input(&self, key: &str) -> Option<Value> {
        self.post(key)
            .cloned()
            .or_else(|| self.query(key).map(|v| Value::String(v.to_string())))
    }

    /// 生のボディ
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// JSONボディをデシリアライズ
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        if self.body.is_empty() {
            return Err(Error::bad_request("Empty request body"));
        }
        serde_json::from_slice(&self.body)
            .map_err(|e| Error::bad_request(format!("Malformed JSON body: {}", e)))
    }

    pub fn file(&self, key: &str) -> Option<&UploadedFile> {
        self.uploaded_files.get(key)
    }

    pub fn files(&self) -> &HashMap<String, UploadedFile> {
        &self.uploaded_files
    }

    pub fn server_param(&self, key: &str) -> Option<&str> {
        self.server_params.get(key).map(String::as_str)
    }

    pub fn server_params(&self) -> &HashMap<String, String> {
        &self.server_params
    }

    /// Cookieヘッダーから遅延生成されるクッキー
    pub fn cookies(&self) -> &CookieJar {
        self.cookies.get_or_init(|| {
            let header = self.header_values(COOKIE.as_str()).join("; ");
            CookieJar::from_request_header(&header)
        })
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies().get(name).map(|c| c.value.as_str())
    }

    pub fn has_cookie(&self, name: &str) -> bool {
        self.cookies().has(name)
    }

    pub fn attribute<T: 'static>(&self, name: &str) -> Option<&T> {
        self.attributes.get(name)
    }

    pub fn shared_attribute<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        self.attributes.get_shared(name)
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// SessionMiddleware が付与したセッション
    pub fn session(&self) -> Option<Arc<Session>> {
        self.shared_attribute(SESSION_ATTRIBUTE)
    }

    /// クライアントIP（X-Forwarded-For の先頭 → REMOTE_ADDR）
    pub fn client_ip(&self) -> Option<&str> {
        self.header("X-Forwarded-For")
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .or_else(|| self.server_param("REMOTE_ADDR"))
    }

    pub fn is_ajax(&self) -> bool {
        self.header("X-Requested-With")
            .map(|v| v.eq_ignore_ascii_case("XMLHttpRequest"))
            .unwrap_or(false)
    }

    pub fn is_secure(&self) -> bool {
        let https = self
            .server_param("HTTPS")
            .map(|v| !v.is_empty() && !v.eq_ignore_ascii_case("off"))
            .unwrap_or(false);
        https
            || self
                .header("X-Forwarded-Proto")
                .map(|v| v.eq_ignore_ascii_case("https"))
                .unwrap_or(false)
            || self.uri.scheme_str() == Some("https")
    }

    pub fn wants_json(&self) -> bool {
        self.header_values("Accept")
            .iter()
            .any(|v| v.contains("/json") || v.contains("+json"))
    }

    /// ヘッダーを設定（同名の既存値は置き換え）
    ///
    /// 無効な名前/値は設定せずに警告ログを出す。
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let Some((name, value)) = to_header_pair(name, value) {
            self.headers.insert(name, value);
            self.cookies = OnceLock::new();
        }
        self
    }

    /// ヘッダーを追加（同名の既存値は残す）
    pub fn with_added_header(mut self, name: &str, value: &str) -> Self {
        if let Some((name, value)) = to_header_pair(name, value) {
            self.headers.append(name, value);
            self.cookies = OnceLock::new();
        }
        self
    }

    pub fn without_header(mut self, name: &str) -> Self {
        self.headers.remove(name);
        self.cookies = OnceLock::new();
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self.cookies = OnceLock::new();
        self
    }

    pub fn with_uri(mut self, uri: Uri) -> Self {
        self.query_params = uri.query().map(parse_query_string).unwrap_or_default();
        self.uri = uri;
        self
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.insert(key.into(), value.into());
        self
    }

    pub fn with_query_params(mut self, params: HashMap<String, String>) -> Self {
        self.query_params = params;
        self
    }

    pub fn with_parsed_body(mut self, body: HashMap<String, Value>) -> Self {
        self.parsed_body = body;
        self
    }

    /// 生のボディを設定（解析済みボディはそのまま）
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Content-Type に従って生のボディを解析し直す
    pub fn with_reparsed_body(mut self) -> Result<Self, Error> {
        let parsed = parse_body(self.header("Content-Type"), &self.body)?;
        self.parsed_body = parsed.fields;
        self.uploaded_files = parsed.files;
        Ok(self)
    }

    /// `Content-Encoding: gzip` のボディを展開する（それ以外は何もしない）
    ///
    /// 展開後のサイズが `max_size` を超える場合は 413、壊れたデータは 400 になる。
    pub fn with_decompressed_body(mut self, max_size: usize) -> Result<Self, Error> {
        let is_gzip = self
            .header("Content-Encoding")
            .map(|enc| enc.trim().eq_ignore_ascii_case("gzip"))
            .unwrap_or(false);
        if !is_gzip || self.body.is_empty() {
            return Ok(self);
        }

        let mut decoded = Vec::new();
        let limit = u64::try_from(max_size).unwrap_or(u64::MAX).saturating_add(1);
        GzDecoder::new(self.body.as_ref())
            .take(limit)
            .read_to_end(&mut decoded)
            .map_err(|e| Error::bad_request(format!("Invalid gzip body: {}", e)))?;
        if decoded.len() > max_size {
            return Err(Error::payload_too_large(format!(
                "Decompressed body exceeds maximum allowed size {} bytes",
                max_size
            )));
        }

        self.body = Bytes::from(decoded);
        self.headers.remove(http::header::CONTENT_ENCODING);
        self.headers.remove(http::header::CONTENT_LENGTH);
        Ok(self)
    }

    pub fn with_uploaded_file(mut self, key: impl Into<String>, file: UploadedFile) -> Self {
        self.uploaded_files.insert(key.into(), file);
        self
    }

    pub fn with_server_params(mut self, params: HashMap<String, String>) -> Self {
        self.server_params = params;
        self
    }

    pub fn with_server_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.server_params.insert(key.into(), value.into());
        self
    }

    pub fn with_attribute<T: Send + Sync + 'static>(mut self, name: &str, value: T) -> Self {
        self.attributes.set(name, value);
        self
    }

    pub fn with_shared_attribute<T: Send + Sync + 'static>(mut self, name: &str, value: Arc<T>) -> Self {
        self.attributes.set_shared(name, value);
        self
    }

    pub fn without_attribute(mut self, name: &str) -> Self {
        self.attributes.remove(name);
        self
    }
}

fn to_header_pair(name: &str, value: &str) -> Option<(HeaderName, HeaderValue)> {
    let parsed_name = HeaderName::from_bytes(name.as_bytes());
    let parsed_value = HeaderValue::from_str(value);
    match (parsed_name, parsed_value) {
        (Ok(n), Ok(v)) => Some((n, v)),
        _ => {
            log::warn!("Dropping invalid request header: {:?}: {:?}", name, value);
            None
        }
    }
}
