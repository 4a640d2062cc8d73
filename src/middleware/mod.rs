//! ミドルウェアの合成と組み込みミドルウェア

pub mod cache;
pub mod content_type;
pub mod cors;
pub mod rate_limit;
pub mod security_headers;
pub mod session;
pub mod stack;

pub use cache::{CacheConfig, CacheMiddleware};
pub use content_type::ContentTypeMiddleware;
pub use cors::{CorsConfig, CorsMiddleware};
pub use rate_limit::{RateLimitConfig, RateLimitMiddleware};
pub use security_headers::SecurityHeadersMiddleware;
pub use session::SessionMiddleware;
pub use stack::MiddlewareStack;

use crate::common::{Middleware, Next, Request, Response};
use crate::error::Error;

/// クロージャをミドルウェアとして扱うためのラッパー
pub struct FnMiddleware<F> {
    f: F,
}

impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(Request, Next<'_>) -> Result<Response, Error> + Send + Sync,
{
    fn process(&self, request: Request, next: Next<'_>) -> Result<Response, Error> {
        (self.f)(request, next)
    }
}

/// クロージャからミドルウェアを作成
pub fn from_fn<F>(f: F) -> FnMiddleware<F>
where
    F: Fn(Request, Next<'_>) -> Result<Response, Error> + Send + Sync,
{
    FnMiddleware { f }
}
