//! ディスパッチャ（パイプラインの実行・失敗の変換・出力）

pub mod config;
pub mod core;
pub mod send;
pub mod transport;

pub use config::{ServerConfig, DEFAULT_CHUNK_SIZE};
pub use core::Server;
pub use transport::Transport;
