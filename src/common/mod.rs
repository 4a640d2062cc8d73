//! リクエスト/レスポンスの値型とコアトレイト

pub mod body;
pub mod context;
pub mod cookie;
pub mod request;
pub mod response;
pub mod traits;
pub mod upload;
pub mod utils;

pub use body::Body;
pub use context::Attributes;
pub use cookie::{Cookie, CookieJar, SameSite};
pub use request::{Request, SESSION_ATTRIBUTE};
pub use response::Response;
pub use traits::{Continuation, Handler, Middleware, Next};
pub use upload::UploadedFile;
pub use utils::get_max_body_size;

pub use http::{Method, StatusCode, Uri};
