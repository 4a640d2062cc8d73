//! レスポンスキャッシュ

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::common::{Body, Cookie, Middleware, Next, Request, Response};
use crate::error::Error;
use crate::storage::Storage;

/// キャッシュキーを決める関数
pub type CacheKeyResolver = Arc<dyn Fn(&Request) -> String + Send + Sync>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// 既定のTTL（秒）
    pub ttl: u64,
    /// キャッシュ対象のメソッド
    pub methods: Vec<String>,
    /// キャッシュ対象のステータスコード
    pub status_codes: Vec<u16>,
    /// Cache-Control の no-store / no-cache / private を尊重するか
    pub respect_cache_control: bool,
    /// これらのヘッダーがあるレスポンスはキャッシュしない
    pub header_blacklist: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: 3600,
            methods: vec!["GET".to_string()],
            status_codes: vec![200, 203, 204, 300, 301, 302, 304, 404, 410],
            respect_cache_control: true,
            header_blacklist: Vec::new(),
        }
    }
}

/// ストレージに保存する形式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub cookies: Vec<String>,
    /// base64 エンコード済みのボディ
    pub body: String,
}

impl CachedResponse {
    /// バッファ済みボディのレスポンスのみ変換できる
    pub fn from_response(response: &Response) -> Option<Self> {
        let body = response.body_bytes()?;
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let cookies = response
            .cookies()
            .iter()
            .map(|cookie| cookie.to_header_value())
            .collect();
        Some(Self {
            status: response.status_code(),
            headers,
            cookies,
            body: base64::encode(body),
        })
    }

    pub fn into_response(self) -> Result<Response, Error> {
        let body = base64::decode(&self.body)
            .map_err(|e| Error::Storage(format!("corrupt cached body: {}", e)))?;
        let mut response = Response::try_new(self.status)?.with_body(Body::from(body));
        for (name, value) in &self.headers {
            response = response.with_added_header(name, value);
        }
        for raw in &self.cookies {
            match raw.parse::<Cookie>() {
                Ok(cookie) => response = response.with_cookie(cookie),
                Err(e) => log::warn!("Dropping cached cookie: {}", e),
            }
        }
        Ok(response)
    }
}

pub struct CacheMiddleware {
    storage: Arc<dyn Storage>,
    config: CacheConfig,
    key_resolver: Option<CacheKeyResolver>,
}

impl CacheMiddleware {
    pub fn new(storage: Arc<dyn Storage>, config: CacheConfig) -> Self {
        Self {
            storage,
            config,
            key_resolver: None,
        }
    }

    pub fn with_key_resolver<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&Request) -> String + Send + Sync + 'static,
    {
        self.key_resolver = Some(Arc::new(resolver));
        self
    }

    /// resolver があればその結果、なければ `METHOD|URI` の SHA-256
    pub fn cache_key(&self, request: &Request) -> String {
        if let Some(resolver) = &self.key_resolver {
            return resolver(request);
        }
        let mut hasher = Sha256::new();
        hasher.update(format!("{}|{}", request.method(), request.uri()).as_bytes());
        hex::encode(hasher.finalize())
    }

    fn applies_to(&self, request: &Request) -> bool {
        self.config
            .methods
            .iter()
            .any(|m| request.is_method(m))
    }

    fn lookup(&self, key: &str) -> Result<Option<Response>, Error> {
        let Some(value) = self.storage.get(key)? else {
            return Ok(None);
        };
        let restored = serde_json::from_value::<CachedResponse>(value)
            .map_err(Error::from)
            .and_then(CachedResponse::into_response);
        match restored {
            Ok(response) => Ok(Some(response)),
            Err(e) => {
                log::warn!("Ignoring malformed cache entry {}: {}", key, e);
                Ok(None)
            }
        }
    }

    fn cache_control_directives(response: &Response) -> Vec<String> {
        response
            .header("Cache-Control")
            .map(|value| {
                value
                    .to_ascii_lowercase()
                    .split(',')
                    .map(|d| d.trim().to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// キャッシュしてよいレスポンスか
    pub fn is_cacheable(&self, response: &Response) -> bool {
        if !self.config.status_codes.contains(&response.status_code()) {
            return false;
        }
        if self
            .config
            .header_blacklist
            .iter()
            .any(|name| response.has_header(name))
        {
            return false;
        }
        if self.config.respect_cache_control
            && Self::cache_control_directives(response)
                .iter()
                .any(|d| d == "no-store" || d == "no-cache" || d == "private")
        {
            return false;
        }
        true
    }

    /// max-age が正ならその値、なければ既定のTTL
    pub fn resolve_ttl(&self, response: &Response) -> Duration {
        let max_age = Self::cache_control_directives(response)
            .iter()
            .find_map(|d| d.strip_prefix("max-age=").map(|v| v.trim().parse::<i64>().unwrap_or(0)))
            .filter(|age| *age > 0);
        match max_age {
            Some(age) => Duration::from_secs(age as u64),
            None => Duration::from_secs(self.config.ttl),
        }
    }
}

impl fmt::Debug for CacheMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheMiddleware")
            .field("config", &self.config)
            .field("custom_key_resolver", &self.key_resolver.is_some())
            .finish()
    }
}

impl Middleware for CacheMiddleware {
    fn process(&self, request: Request, next: Next<'_>) -> Result<Response, Error> {
        if !self.applies_to(&request) {
            return next.run(request);
        }

        let key = self.cache_key(&request);
        if let Some(cached) = self.lookup(&key)? {
            log::debug!("Cache hit for {}", key);
            return Ok(cached);
        }
        log::debug!("Cache miss for {}", key);

        let response = next.run(request)?;
        if !self.is_cacheable(&response) {
            return Ok(response);
        }

        // ストリームボディはキャッシュしない
        let Some(entry) = CachedResponse::from_response(&response) else {
            log::debug!("Skipping cache for streaming body {}", key);
            return Ok(response);
        };
        let ttl = self.resolve_ttl(&response);
        self.storage.set(&key, serde_json::to_value(entry)?, ttl)?;
        Ok(response)
    }
}
