//! 共通ユーティリティ関数群（URLエンコード/デコード、クエリ解析、ヘッダー検証 等）

use std::collections::HashMap;
use std::env;
use std::path::Path;

use url::form_urlencoded;

/// リクエストボディ上限のデフォルト（5MB）
pub const DEFAULT_MAX_BODY_SIZE: usize = 5 * 1024 * 1024;

/// URLエンコーディングのデコード関数（`+` はスペースとして扱う）
pub fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut result = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(h), Some(l)) = (from_hex(bytes[i + 1]), from_hex(bytes[i + 2])) {
                result.push(h * 16 + l);
                i += 3;
                continue;
            }
        } else if bytes[i] == b'+' {
            result.push(b' ');
            i += 1;
            continue;
        }
        result.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&result).into_owned()
}

fn from_hex(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

/// application/x-www-form-urlencoded 形式でエンコード（スペースは `+`）
pub fn urlencode(input: &str) -> String {
    form_urlencoded::byte_serialize(input.as_bytes()).collect()
}

/// クエリ文字列をパースしてURLデコードを行う（同じキーは後勝ち）
pub fn parse_query_string(query_string: &str) -> HashMap<String, String> {
    form_urlencoded::parse(query_string.as_bytes())
        .into_owned()
        .collect()
}

/// リクエストボディの最大サイズ（バイト）を取得する
/// 優先順位: 環境変数 `HTTPSTACK_MAX_BODY_SIZE` -> デフォルト 5MB
pub fn get_max_body_size() -> usize {
    env::var("HTTPSTACK_MAX_BODY_SIZE")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(DEFAULT_MAX_BODY_SIZE)
}

/// ヘッダー値に使用可能な文字かを判定（CRLF・制御文字を拒否）
pub fn is_header_value_valid(value: &str) -> bool {
    value.chars().all(|c| {
        let code = c as u32;
        (code >= 0x20 && code != 0x7F) || c == '\t'
    })
}

/// ヘッダー名が安全なトークンかを判定
pub fn is_header_name_valid(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    // token = 1*tchar, tchar = "!#$%&'*+-.^_`|~" or DIGIT or ALPHA
    name.chars().all(|c| {
        c.is_ascii_alphanumeric()
            || matches!(c, '!' | '#' | '$' | '%' | '&' | '\'' | '*' | '+' | '-' | '.' | '^' | '_' | '`' | '|' | '~')
    })
}

/// Cookie名が安全なトークンか（RFC6265準拠の簡易版）
pub fn is_cookie_name_valid(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    const FORBIDDEN: &[char] = &[
        '(', ')', '<', '>', '@', ',', ';', ':', '\\', '"', '/', '[', ']', '?', '=', '{', '}', ' ', '\t',
    ];
    name.chars()
        .all(|c| c.is_ascii() && !c.is_ascii_control() && !FORBIDDEN.contains(&c))
}

/// 診断用ヘッダーに載せられる形へメッセージを整形する
/// 制御文字は空白へ置換し、長すぎる場合は切り詰める
pub fn sanitize_header_value(message: &str, max_len: usize) -> String {
    let cleaned: String = message
        .chars()
        .map(|c| if c.is_control() || !c.is_ascii() { ' ' } else { c })
        .collect();
    if cleaned.len() > max_len {
        format!("{}...[truncated]", &cleaned[..max_len])
    } else {
        cleaned
    }
}

/// 拡張子からMIMEタイプを推定する
pub fn guess_mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "log" => "text/plain",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "js" | "mjs" => "text/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    }
}

/// Content-TypeがJSON系かどうかを判定する
pub fn is_json_content_type(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    mime == "application/json" || mime.ends_with("+json")
}
