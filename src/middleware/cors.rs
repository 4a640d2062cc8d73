//! CORS ミドルウェア

use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::common::{Middleware, Next, Request, Response};
use crate::error::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// 許可するOrigin（`*` は全許可）
    #[serde(default = "default_origins")]
    pub allowed_origins: Vec<String>,

    /// 許可するHTTPメソッド
    #[serde(default = "default_methods")]
    pub allowed_methods: Vec<String>,

    /// 許可するリクエストヘッダー
    #[serde(default = "default_headers")]
    pub allowed_headers: Vec<String>,

    /// ブラウザに公開するレスポンスヘッダー
    #[serde(default)]
    pub exposed_headers: Vec<String>,

    /// preflight結果のキャッシュ秒数（0 なら送らない）
    #[serde(default)]
    pub max_age: u32,

    #[serde(default)]
    pub allow_credentials: bool,
}

fn default_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_methods() -> Vec<String> {
    ["GET", "POST", "PUT", "DELETE", "OPTIONS", "PATCH"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_headers() -> Vec<String> {
    ["Content-Type", "Authorization", "X-Requested-With", "Accept"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_origins(),
            allowed_methods: default_methods(),
            allowed_headers: default_headers(),
            exposed_headers: Vec::new(),
            max_age: 0,
            allow_credentials: false,
        }
    }
}

impl CorsConfig {
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.iter().any(|o| o == "*" || o == origin)
    }
}

/// OPTIONS は 204 で即座に返し、許可されたOriginにはCORSヘッダーを付与する
#[derive(Debug, Clone, Default)]
pub struct CorsMiddleware {
    config: CorsConfig,
}

impl CorsMiddleware {
    pub fn new(config: CorsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CorsConfig {
        &self.config
    }

    fn apply_headers(&self, origin: Option<&str>, response: Response, preflight: bool) -> Response {
        let origin = match origin {
            Some(origin) if !origin.is_empty() => origin,
            _ => return response,
        };
        if !self.config.is_origin_allowed(origin) {
            log::debug!("CORS origin not allowed: {}", origin);
            return response;
        }

        let mut response = response.with_header("Access-Control-Allow-Origin", origin);
        if self.config.allow_credentials {
            response = response.with_header("Access-Control-Allow-Credentials", "true");
        }
        if preflight {
            response = response
                .with_header("Access-Control-Allow-Methods", &self.config.allowed_methods.join(", "))
                .with_header("Access-Control-Allow-Headers", &self.config.allowed_headers.join(", "));
            if self.config.max_age > 0 {
                response = response.with_header("Access-Control-Max-Age", &self.config.max_age.to_string());
            }
        }
        if !self.config.exposed_headers.is_empty() {
            response = response.with_header(
                "Access-Control-Expose-Headers",
                &self.config.exposed_headers.join(", "),
            );
        }
        response
    }
}

impl Middleware for CorsMiddleware {
    fn process(&self, request: Request, next: Next<'_>) -> Result<Response, Error> {
        if request.is_method("OPTIONS") {
            let response = Response::new(StatusCode::NO_CONTENT);
            return Ok(self.apply_headers(request.header("Origin"), response, true));
        }

        let origin = request.header("Origin").map(str::to_owned);
        let response = next.run(request)?;
        Ok(self.apply_headers(origin.as_deref(), response, false))
    }
}
