//! ハンドラの戻り値の扱い

pub mod response;

pub use response::{IntoResponse, Json};
