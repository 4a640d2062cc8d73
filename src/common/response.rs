//! HTTPレスポンスの値型と標準的なコンストラクタ

use std::fmt;
use std::fs::File;
use std::io;
use std::path::Path;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::header::{HeaderMap, HeaderName, HeaderValue, SET_COOKIE};
use http::{Method, StatusCode};
use serde::Serialize;

use crate::error::Error;
use super::body::Body;
use super::cookie::{Cookie, CookieJar};
use super::utils::guess_mime_type;

/// Display で出力するボディの上限
const DISPLAY_BODY_LIMIT: usize = 1024;

/// HTTPレスポンス
///
/// `with_*` は `self` を消費して新しい値を返す。
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Body,
    cookies: CookieJar,
}

impl Response {
    /// 新しいレスポンスを作成
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Body::empty(),
            cookies: CookieJar::new(),
        }
    }

    /// 数値のステータスコードから作成（100〜599のみ許可）
    pub fn try_new(status: u16) -> Result<Self, Error> {
        Ok(Self::new(status_from_u16(status)?))
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn status_code(&self) -> u16 {
        self.status.as_u16()
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect()
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains_key(name)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// ヘッダーを設定（同名の既存値は置き換え）
    ///
    /// 無効な名前/値（CRLFや制御文字を含むもの）は設定せずに警告ログを出す。
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let Some((name, value)) = to_header_pair(name, value) {
            self.headers.insert(name, value);
        }
        self
    }

    /// ヘッダーを追加（同名の既存値は残す）
    pub fn with_added_header(mut self, name: &str, value: &str) -> Self {
        if let Some((name, value)) = to_header_pair(name, value) {
            self.headers.append(name, value);
        }
        self
    }

    /// 複数のヘッダーを順に設定
    pub fn with_headers<'a, I>(self, headers: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        headers
            .into_iter()
            .fold(self, |res, (name, value)| res.with_header(name, value))
    }

    pub fn without_header(mut self, name: &str) -> Self {
        self.headers.remove(name);
        self
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    /// バッファ済みボディ（ストリームなら `None`）
    pub fn body_bytes(&self) -> Option<&Bytes> {
        self.body.as_bytes()
    }

    pub fn into_body(self) -> Body {
        self.body
    }

    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    pub fn cookie(&self, name: &str) -> Option<&Cookie> {
        self.cookies.get(name)
    }

    pub fn has_cookie(&self, name: &str) -> bool {
        self.cookies.has(name)
    }

    pub fn with_cookie(mut self, cookie: Cookie) -> Self {
        self.cookies.set(cookie);
        self
    }

    pub fn without_cookie(mut self, name: &str) -> Self {
        self.cookies.remove(name);
        self
    }

    /// 名前・値・有効期限だけを指定してクッキーを追加
    pub fn with_simple_cookie(self, name: &str, value: &str, max_age: i64) -> Self {
        self.with_cookie(Cookie::new(name, value).with_max_age(max_age))
    }

    /// クライアント側のクッキーを削除させる
    pub fn with_expired_cookie(self, name: &str, path: Option<&str>, domain: Option<&str>) -> Self {
        self.with_cookie(Cookie::expired(name, path, domain))
    }

    /// 送出用のヘッダー行（名前, 値）を生成する
    ///
    /// 同名ヘッダーは値ごとに1行、クッキーは1つにつき `Set-Cookie` 1行。
    pub fn outbound_headers_at(&self, now: DateTime<Utc>) -> Vec<(String, String)> {
        let mut lines: Vec<(String, String)> = self
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (canonical_header_name(name.as_str()), v.to_string()))
            })
            .collect();
        for value in self.cookies.to_header_values_at(now) {
            lines.push(("Set-Cookie".to_string(), value));
        }
        lines
    }

    /// 200 OK
    pub fn ok(content: impl Into<Body>) -> Self {
        Self::new(StatusCode::OK).with_body(content)
    }

    /// 201 Created（Location は指定された場合のみ）
    pub fn created(location: Option<&str>, content: impl Into<Body>) -> Self {
        let res = Self::new(StatusCode::CREATED).with_body(content);
        match location {
            Some(loc) if !loc.is_empty() => res.with_header("Location", loc),
            _ => res,
        }
    }

    /// 202 Accepted
    pub fn accepted(content: impl Into<Body>) -> Self {
        Self::new(StatusCode::ACCEPTED).with_body(content)
    }

    /// 204 No Content
    pub fn no_content() -> Self {
        Self::new(StatusCode::NO_CONTENT)
    }

    /// 400 Bad Request
    pub fn bad_request() -> Self {
        Self::new(StatusCode::BAD_REQUEST).with_body("Bad Request")
    }

    /// 401 Unauthorized
    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED).with_body("Unauthorized")
    }

    /// 403 Forbidden
    pub fn forbidden() -> Self {
        Self::new(StatusCode::FORBIDDEN).with_body("Forbidden")
    }

    /// 404 Not Found
    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND).with_body("Not Found")
    }

    /// 405 Method Not Allowed（許可メソッドがあれば Allow を付与）
    pub fn method_not_allowed(allowed: &[Method]) -> Self {
        let res = Self::new(StatusCode::METHOD_NOT_ALLOWED).with_body("Method Not Allowed");
        if allowed.is_empty() {
            return res;
        }
        let allow = allowed.iter().map(Method::as_str).collect::<Vec<_>>().join(", ");
        res.with_header("Allow", &allow)
    }

    /// 429 Too Many Requests
    pub fn too_many_requests(retry_after: u64) -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS)
            .with_header("Retry-After", &retry_after.to_string())
            .with_body("Too Many Requests")
    }

    /// 500 Internal Server Error
    pub fn server_error() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR).with_body("Internal Server Error")
    }

    /// リダイレクト（Location 付きの空ボディ）
    pub fn redirect(url: &str, status: StatusCode) -> Self {
        Self::new(status).with_header("Location", url)
    }

    /// 301 Moved Permanently
    pub fn permanent_redirect(url: &str) -> Self {
        Self::redirect(url, StatusCode::MOVED_PERMANENTLY)
    }

    /// 302 Found
    pub fn found(url: &str) -> Self {
        Self::redirect(url, StatusCode::FOUND)
    }

    /// 303 See Other
    pub fn see_other(url: &str) -> Self {
        Self::redirect(url, StatusCode::SEE_OTHER)
    }

    /// 307 Temporary Redirect
    pub fn temporary_redirect(url: &str) -> Self {
        Self::redirect(url, StatusCode::TEMPORARY_REDIRECT)
    }

    /// JSONレスポンス
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, Error> {
        let json = serde_json::to_vec(value)
            .map_err(|e| Error::ResponseSerializationError(e.to_string()))?;
        Ok(Self::new(StatusCode::OK)
            .with_header("Content-Type", "application/json")
            .with_body(json))
    }

    pub fn html(html: impl Into<String>) -> Self {
        Self::new(StatusCode::OK)
            .with_header("Content-Type", "text/html; charset=UTF-8")
            .with_body(html.into())
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(StatusCode::OK)
            .with_header("Content-Type", "text/plain; charset=UTF-8")
            .with_body(text.into())
    }

    pub fn xml(xml: impl Into<String>) -> Self {
        Self::new(StatusCode::OK)
            .with_header("Content-Type", "application/xml; charset=UTF-8")
            .with_body(xml.into())
    }

    /// コールバックからチャンクを逐次生成するストリーミングレスポンス
    ///
    /// コールバックが空のチャンクを返した時点で終端となる。
    pub fn stream<F>(callback: F) -> Self
    where
        F: FnMut(usize) -> io::Result<Vec<u8>> + Send + 'static,
    {
        Self::new(StatusCode::OK)
            .with_header("Cache-Control", "no-cache, private")
            .with_header("Content-Type", "text/plain")
            .with_body(Body::from_callback(callback))
    }

    /// ファイル内容をそのまま返す
    pub fn file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = open_readable(path)?;
        Ok(Self::new(StatusCode::OK)
            .with_header("Content-Type", guess_mime_type(path))
            .with_body(Body::Stream(Box::new(file))))
    }

    /// 添付ファイルとしてダウンロードさせる
    pub fn download(path: impl AsRef<Path>, filename: Option<&str>) -> Result<Self, Error> {
        Self::file_with_disposition(path.as_ref(), "attachment", filename, "no-cache, private")
    }

    /// ブラウザ内で表示させる
    pub fn inline(path: impl AsRef<Path>, filename: Option<&str>) -> Result<Self, Error> {
        Self::file_with_disposition(path.as_ref(), "inline", filename, "public, max-age=86400")
    }

    fn file_with_disposition(
        path: &Path,
        disposition: &str,
        filename: Option<&str>,
        cache_control: &str,
    ) -> Result<Self, Error> {
        let file = open_readable(path)?;
        let size = file.metadata()?.len();
        let filename = filename
            .map(str::to_string)
            .or_else(|| path.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "download".to_string());
        // ヘッダーを壊す文字はファイル名から除く
        let filename: String = filename
            .chars()
            .filter(|c| !c.is_control() && *c != '"')
            .collect();

        Ok(Self::new(StatusCode::OK)
            .with_header("Content-Type", guess_mime_type(path))
            .with_header(
                "Content-Disposition",
                &format!("{}; filename=\"{}\"", disposition, filename),
            )
            .with_header("Content-Length", &size.to_string())
            .with_header("Cache-Control", cache_control)
            .with_body(Body::Stream(Box::new(file))))
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HTTP/1.1 {} {}\r\n",
            self.status.as_u16(),
            self.status.canonical_reason().unwrap_or("")
        )?;
        for (name, value) in self.outbound_headers_at(Utc::now()) {
            write!(f, "{}: {}\r\n", name, value)?;
        }
        f.write_str("\r\n")?;
        // ストリームは読み出すと消費されるため空として扱う
        if let Some(bytes) = self.body.as_bytes() {
            let text = String::from_utf8_lossy(bytes);
            if bytes.len() > DISPLAY_BODY_LIMIT {
                let cut = floor_char_boundary(&text, DISPLAY_BODY_LIMIT);
                write!(f, "{}... (truncated)", &text[..cut])?;
            } else {
                f.write_str(&text)?;
            }
        }
        Ok(())
    }
}

/// 100〜599 の範囲だけをステータスコードとして受け付ける
pub fn status_from_u16(status: u16) -> Result<StatusCode, Error> {
    if !(100..=599).contains(&status) {
        return Err(Error::InvalidStatus(status));
    }
    StatusCode::from_u16(status).map_err(|_| Error::InvalidStatus(status))
}

/// `x-ratelimit-limit` → `X-Ratelimit-Limit`
pub fn canonical_header_name(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                None => String::new(),
                Some(c) => c.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase(),
            }
        })
        .collect::<Vec<String>>()
        .join("-")
}

fn to_header_pair(name: &str, value: &str) -> Option<(HeaderName, HeaderValue)> {
    match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
        (Ok(n), Ok(v)) => {
            if n == SET_COOKIE {
                log::debug!("Raw Set-Cookie header set directly; prefer Response::with_cookie");
            }
            Some((n, v))
        }
        _ => {
            log::warn!("Dropping invalid response header: {:?}: {:?}", name, value);
            None
        }
    }
}

fn open_readable(path: &Path) -> Result<File, Error> {
    File::open(path).map_err(|e| {
        Error::Io(io::Error::new(
            e.kind(),
            format!("File {} does not exist or is not readable: {}", path.display(), e),
        ))
    })
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}
