//! 固定ウィンドウ方式のレート制限

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::{Clock, SystemClock};
use crate::common::{Middleware, Next, Request, Response};
use crate::error::{Error, HttpError};
use crate::storage::Storage;

/// 呼び出し元を識別する関数
pub type IdentifierResolver = Arc<dyn Fn(&Request) -> String + Send + Sync>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// ウィンドウ内で許可するリクエスト数
    pub limit: u64,
    /// ウィンドウ長（秒）
    pub window: u64,
    /// X-RateLimit-* ヘッダーを付与するか
    pub headers: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: 60,
            window: 60,
            headers: true,
        }
    }
}

/// ストレージに保存するカウンタ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateWindow {
    pub requests: u64,
    /// ウィンドウ終了時刻（UNIX秒）
    pub expires: i64,
}

pub struct RateLimitMiddleware {
    storage: Arc<dyn Storage>,
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    resolver: Option<IdentifierResolver>,
}

impl RateLimitMiddleware {
    pub fn new(storage: Arc<dyn Storage>, config: RateLimitConfig) -> Self {
        Self {
            storage,
            config,
            clock: Arc::new(SystemClock),
            resolver: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_resolver<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&Request) -> String + Send + Sync + 'static,
    {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    /// resolver → X-Forwarded-For → REMOTE_ADDR → "unknown"
    pub fn identifier(&self, request: &Request) -> String {
        if let Some(resolver) = &self.resolver {
            return resolver(request);
        }
        request
            .header("X-Forwarded-For")
            .or_else(|| request.server_param("REMOTE_ADDR"))
            .filter(|s| !s.is_empty())
            .unwrap_or("unknown")
            .to_string()
    }

    fn storage_key(identifier: &str) -> String {
        format!("ratelimit:{}", identifier)
    }

    /// 現在のウィンドウを読み込む。期限切れ・未保存・壊れた値は新しいウィンドウになる
    fn load_window(&self, key: &str, now: i64) -> Result<RateWindow, Error> {
        let fresh = RateWindow {
            requests: 0,
            expires: now.saturating_add(i64::try_from(self.config.window).unwrap_or(i64::MAX)),
        };
        let stored = match self.storage.get(key)? {
            Some(value) => serde_json::from_value::<RateWindow>(value).ok(),
            None => None,
        };
        Ok(match stored {
            Some(window) if now <= window.expires => window,
            Some(_) => {
                log::debug!("Rate limit window expired for {}", key);
                fresh
            }
            None => fresh,
        })
    }

    fn limit_headers(&self, window: &RateWindow) -> Vec<(String, String)> {
        vec![
            ("X-RateLimit-Limit".to_string(), self.config.limit.to_string()),
            (
                "X-RateLimit-Remaining".to_string(),
                self.config.limit.saturating_sub(window.requests).to_string(),
            ),
            ("X-RateLimit-Reset".to_string(), window.expires.to_string()),
        ]
    }
}

impl fmt::Debug for RateLimitMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitMiddleware")
            .field("config", &self.config)
            .field("custom_resolver", &self.resolver.is_some())
            .finish()
    }
}

impl Middleware for RateLimitMiddleware {
    fn process(&self, request: Request, next: Next<'_>) -> Result<Response, Error> {
        let identifier = self.identifier(&request);
        let key = Self::storage_key(&identifier);
        let now = self.clock.timestamp();
        let mut window = self.load_window(&key, now)?;

        if window.requests >= self.config.limit {
            let retry_after = window.expires.saturating_sub(now).max(0);
            log::info!(
                "Rate limit exceeded for {} ({} requests, retry after {}s)",
                identifier,
                window.requests,
                retry_after
            );
            let error = HttpError::new(http::StatusCode::TOO_MANY_REQUESTS, "Too Many Requests")
                .with_header("Retry-After", retry_after.to_string())
                .with_headers(self.limit_headers(&window));
            return Err(error.into());
        }

        let response = next.run(request)?;

        window.requests += 1;
        let value: Value = serde_json::to_value(window)?;
        self.storage
            .set(&key, value, Duration::from_secs(self.config.window))?;

        if !self.config.headers {
            return Ok(response);
        }
        let headers = self.limit_headers(&window);
        Ok(response.with_headers(headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))))
    }
}
