//! CGI環境での実行をサポートするモジュール
//!
//! 環境変数と標準入力からリクエストを構築し、
//! 標準出力にCGI形式（`Status:` 行 + ヘッダー + ボディ）で出力する。

pub mod core;
pub mod redact;
pub mod request;
pub mod response;

pub use core::run_cgi;
pub use request::{cgi_headers, request_from_env, request_from_parts};
pub use response::CgiTransport;

#[cfg(test)]
mod tests;
