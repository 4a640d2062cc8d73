//! サーバー設定

use std::env;

use serde::{Deserialize, Serialize};

use crate::common::utils::{get_max_body_size, DEFAULT_MAX_BODY_SIZE};

/// `send` が1回に書き出すバイト数の既定値
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 500 応答に X-Error 診断ヘッダーを付けるか
    pub expose_error_details: bool,
    pub chunk_size: usize,
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            expose_error_details: true,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

impl ServerConfig {
    /// 環境変数から読み込む（不正な値は既定値）
    ///
    /// - `HTTPSTACK_EXPOSE_ERRORS`: `1`/`true`/`yes`/`on` または `0`/`false`/`no`/`off`
    /// - `HTTPSTACK_CHUNK_SIZE`: 正の整数
    /// - `HTTPSTACK_MAX_BODY_SIZE`: バイト数
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let expose_error_details = env::var("HTTPSTACK_EXPOSE_ERRORS")
            .ok()
            .and_then(|v| parse_flag(&v))
            .unwrap_or(defaults.expose_error_details);
        let chunk_size = env::var("HTTPSTACK_CHUNK_SIZE")
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.chunk_size);
        Self {
            expose_error_details,
            chunk_size,
            max_body_size: get_max_body_size(),
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
