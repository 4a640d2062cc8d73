//! httpstack: 不変のリクエスト/レスポンス型と同期ミドルウェアパイプライン
//!
//! ミドルウェアは登録順に外側から実行され、帰りは逆順になる。
//! 失敗は `Result` で伝播し、`Server::handle` だけがレスポンスに変換する。
//!
//! ```no_run
//! use httpstack::middleware::{CorsMiddleware, SecurityHeadersMiddleware};
//! use httpstack::{Json, Request, Server};
//!
//! let server = Server::new()
//!     .add_middleware(CorsMiddleware::default())
//!     .add_middleware(SecurityHeadersMiddleware::default());
//!
//! let request = Request::create("GET", "/hello").unwrap();
//! let response = server.handle(request, |req: Request| {
//!     Json(serde_json::json!({ "path": req.path() }))
//! });
//! server.send(response).unwrap();
//! ```

pub mod cgi;
pub mod clock;
pub mod common;
pub mod error;
pub mod handler;
pub mod middleware;
pub mod server;
pub mod session;
pub mod storage;

pub use clock::{Clock, FixedClock, SystemClock};
pub use common::{
    Attributes, Body, Continuation, Cookie, CookieJar, Handler, Method, Middleware, Next, Request,
    Response, SameSite, StatusCode, UploadedFile, Uri, SESSION_ATTRIBUTE,
};
pub use error::{Error, HttpError};
pub use handler::{IntoResponse, Json};
pub use middleware::{from_fn, MiddlewareStack};
pub use server::{Server, ServerConfig, Transport};
pub use session::{Session, SessionConfig};
pub use storage::{MemoryStorage, Storage};
