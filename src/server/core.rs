//! パイプラインを実行し、失敗をレスポンスに変換するディスパッチャ

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use http::StatusCode;
use log::{debug, error, info};

use crate::clock::{Clock, SystemClock};
use crate::common::utils::sanitize_header_value;
use crate::common::{Handler, Middleware, Request, Response};
use crate::error::Error;
use crate::middleware::MiddlewareStack;
use super::config::ServerConfig;

/// X-Error ヘッダーに載せるメッセージの上限
const ERROR_HEADER_MAX_LEN: usize = 200;

/// ミドルウェア列と設定を保持するサーバー
///
/// `handle` が失敗を捕捉する唯一の場所で、常にレスポンスを返す。
pub struct Server {
    config: ServerConfig,
    stack: MiddlewareStack,
    pub(super) clock: Arc<dyn Clock>,
    /// `send` で共有出力にヘッダーを書き出し済みか
    pub(super) headers_committed: AtomicBool,
}

impl Server {
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    pub fn with_config(config: ServerConfig) -> Self {
        Self {
            config,
            stack: MiddlewareStack::new(),
            clock: Arc::new(SystemClock),
            headers_committed: AtomicBool::new(false),
        }
    }

    /// Cookie の Expires 計算に使う時計を差し替える
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// ミドルウェアを追加（先に追加したものが外側）
    pub fn add_middleware<M>(mut self, middleware: M) -> Self
    where
        M: Middleware + 'static,
    {
        self.stack.add(middleware);
        self
    }

    pub fn add_boxed_middleware(mut self, middleware: Box<dyn Middleware>) -> Self {
        self.stack.add_boxed(middleware);
        self
    }

    pub fn middleware_count(&self) -> usize {
        self.stack.len()
    }

    pub fn middleware_names(&self) -> Vec<&'static str> {
        self.stack.names()
    }

    /// リクエストをパイプラインに通してレスポンスを得る
    pub fn handle<H: Handler>(&self, request: Request, handler: H) -> Response {
        debug!(
            "Handling {} {} through {} middleware",
            request.method(),
            request.uri(),
            self.stack.len()
        );
        let terminal = |req: Request| handler.handle(req);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.stack.process(request, &terminal)));

        match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => self.error_response(err),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("Panic while handling request: {}", message);
                self.internal_error(&format!("panic: {}", message))
            }
        }
    }

    /// 失敗をレスポンスに変換する
    ///
    /// タグ付きエラーはステータス・ヘッダー・メッセージをそのまま使い、
    /// それ以外は 500 と X-Error ヘッダーになる。
    pub fn error_response(&self, err: Error) -> Response {
        match err {
            Error::Http(http_err) => {
                info!("Request failed with {}", http_err);
                // 同名ヘッダーも値ごとに残す
                http_err
                    .headers()
                    .iter()
                    .fold(Response::new(http_err.status()), |res, (name, value)| {
                        res.with_added_header(name, value)
                    })
                    .with_body(http_err.message().to_string())
            }
            other => {
                error!("Unhandled error: {}", other);
                self.internal_error(&other.to_string())
            }
        }
    }

    fn internal_error(&self, detail: &str) -> Response {
        let response = Response::new(StatusCode::INTERNAL_SERVER_ERROR)
            .with_header("Content-Type", "text/plain; charset=UTF-8")
            .with_body("Internal Server Error");
        if !self.config.expose_error_details {
            return response;
        }
        response.with_header("X-Error", &sanitize_header_value(detail, ERROR_HEADER_MAX_LEN))
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("stack", &self.stack)
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
