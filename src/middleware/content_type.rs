//! レスポンスの Content-Type を固定するミドルウェア

use crate::common::{Middleware, Next, Request, Response};
use crate::error::Error;

/// `next` の後で Content-Type を上書きする
#[derive(Debug, Clone)]
pub struct ContentTypeMiddleware {
    content_type: String,
}

impl ContentTypeMiddleware {
    pub fn new(content_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
        }
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }
}

impl Default for ContentTypeMiddleware {
    fn default() -> Self {
        Self::new("application/json")
    }
}

impl Middleware for ContentTypeMiddleware {
    fn process(&self, request: Request, next: Next<'_>) -> Result<Response, Error> {
        let response = next.run(request)?;
        Ok(response.with_header("Content-Type", &self.content_type))
    }
}
