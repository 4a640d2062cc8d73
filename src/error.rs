//! エラー型の定義
//!
//! `Error::Http` だけが「タグ付き」の失敗で、ステータス・ヘッダー・メッセージを
//! そのままレスポンスに反映する。それ以外のバリアントはすべて 500 として扱われる。

use std::fmt;

use http::StatusCode;
use thiserror::Error;

/// 意図的に送出されるHTTPエラー（ステータス・ヘッダー・メッセージを保持）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    status: StatusCode,
    headers: Vec<(String, String)>,
    message: String,
}

impl HttpError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            message: message.into(),
        }
    }

    /// ヘッダーを追加
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// 複数のヘッダーをまとめて追加
    pub fn with_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status.as_u16(), self.message)
    }
}

impl std::error::Error for HttpError {}

/// アプリケーションのエラー型
#[derive(Error, Debug)]
pub enum Error {
    /// タグ付きHTTPエラー
    #[error("HTTP error: {0}")]
    Http(HttpError),

    /// ハンドラがResponse以外を返した
    #[error("Handler contract violation: {0}")]
    HandlerContract(String),

    /// 無効なリクエストボディ
    #[error("Invalid request body: {0}")]
    InvalidRequestBody(String),

    /// 無効なヘッダー
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// 無効なCookie
    #[error("Invalid cookie: {0}")]
    InvalidCookie(String),

    /// 無効なURI
    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    /// 範囲外のステータスコード
    #[error("Invalid status code: {0}")]
    InvalidStatus(u16),

    /// レスポンスのシリアライズエラー
    #[error("Failed to serialize response: {0}")]
    ResponseSerializationError(String),

    /// ストレージのエラー
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// 内部サーバーエラー
    #[error("Internal server error: {0}")]
    InternalServerError(String),
}

impl Error {
    /// 任意のステータスでタグ付きエラーを作成
    pub fn http(status: StatusCode, message: impl Into<String>) -> Self {
        Error::Http(HttpError::new(status, message))
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::http(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::http(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::http(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::http(StatusCode::NOT_FOUND, message)
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::http(StatusCode::PAYLOAD_TOO_LARGE, message)
    }

    /// 429 と Retry-After を持つタグ付きエラー
    pub fn too_many_requests(message: impl Into<String>, retry_after: i64) -> Self {
        Error::Http(
            HttpError::new(StatusCode::TOO_MANY_REQUESTS, message)
                .with_header("Retry-After", retry_after.max(0).to_string()),
        )
    }

    /// タグ付きエラーかどうか
    pub fn is_tagged(&self) -> bool {
        matches!(self, Error::Http(_))
    }

    /// エラーからHTTPステータスコードを取得
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Http(e) => e.status().as_u16(),
            _ => 500,
        }
    }
}

impl From<HttpError> for Error {
    fn from(e: HttpError) -> Self {
        Error::Http(e)
    }
}
