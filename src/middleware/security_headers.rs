//! セキュリティ関連ヘッダーの付与

use crate::common::{Middleware, Next, Request, Response};
use crate::error::Error;

const DEFAULT_HEADERS: [(&str, &str); 7] = [
    ("X-Content-Type-Options", "nosniff"),
    ("X-Frame-Options", "SAMEORIGIN"),
    ("X-XSS-Protection", "1; mode=block"),
    ("Referrer-Policy", "strict-origin-when-cross-origin"),
    ("Content-Security-Policy", "default-src 'self'"),
    ("Strict-Transport-Security", "max-age=31536000; includeSubDomains"),
    ("Permissions-Policy", "camera=(), microphone=(), geolocation=()"),
];

/// `next` の後で既定のセキュリティヘッダーを設定する
///
/// 上書き値は既定値にマージされる。空文字の値はそのヘッダーを無効化する。
#[derive(Debug, Clone)]
pub struct SecurityHeadersMiddleware {
    headers: Vec<(String, String)>,
}

impl SecurityHeadersMiddleware {
    pub fn new() -> Self {
        Self {
            headers: DEFAULT_HEADERS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// 既定値に上書き値をマージして作成
    pub fn with_overrides<I, K, V>(overrides: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        overrides
            .into_iter()
            .fold(Self::new(), |mw, (k, v)| mw.with_header(k, v))
    }

    /// 1つのヘッダーを追加または置き換え
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some(entry) => entry.1 = value,
            None => self.headers.push((name, value)),
        }
        self
    }

    /// 実際に付与されるヘッダー
    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl Default for SecurityHeadersMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl Middleware for SecurityHeadersMiddleware {
    fn process(&self, request: Request, next: Next<'_>) -> Result<Response, Error> {
        let response = next.run(request)?;
        Ok(response.with_headers(self.headers()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(mw: &SecurityHeadersMiddleware) -> Response {
        let handler = |_req: Request| -> Result<Response, Error> {
            Ok(Response::ok("x").with_header("X-Frame-Options", "ALLOW-FROM https://a.com"))
        };
        mw.process(Request::create("GET", "/").unwrap(), Next::new(&handler))
            .unwrap()
    }

    #[test]
    fn test_default_headers() {
        let res = run(&SecurityHeadersMiddleware::default());
        assert_eq!(res.header("X-Content-Type-Options"), Some("nosniff"));
        // ハンドラの値より優先される
        assert_eq!(res.header("X-Frame-Options"), Some("SAMEORIGIN"));
        assert_eq!(res.header("X-XSS-Protection"), Some("1; mode=block"));
        assert_eq!(res.header("Referrer-Policy"), Some("strict-origin-when-cross-origin"));
        assert_eq!(res.header("Content-Security-Policy"), Some("default-src 'self'"));
        assert_eq!(
            res.header("Strict-Transport-Security"),
            Some("max-age=31536000; includeSubDomains")
        );
        assert_eq!(
            res.header("Permissions-Policy"),
            Some("camera=(), microphone=(), geolocation=()")
        );
    }

    #[test]
    fn test_overrides_and_disabled_headers() {
        let mw = SecurityHeadersMiddleware::with_overrides([
            ("x-frame-options", "DENY"),
            ("Strict-Transport-Security", ""),
            ("Cross-Origin-Opener-Policy", "same-origin"),
        ]);
        assert_eq!(mw.headers().count(), 7);

        let res = run(&mw);
        assert_eq!(res.header("X-Frame-Options"), Some("DENY"));
        assert!(!res.has_header("Strict-Transport-Security"));
        assert_eq!(res.header("Cross-Origin-Opener-Policy"), Some("same-origin"));
    }
}
