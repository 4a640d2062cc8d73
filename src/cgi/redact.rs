//! ログに出すCGI変数のマスク

use std::collections::HashMap;

const REDACTED: &str = "***redacted***";
const MAX_LOGGED_VALUE: usize = 200;

/// ログ出力する代表的なCGI変数
const LOGGED_VARS: [&str; 14] = [
    "REQUEST_METHOD",
    "REQUEST_URI",
    "PATH_INFO",
    "QUERY_STRING",
    "CONTENT_TYPE",
    "CONTENT_LENGTH",
    "SERVER_PROTOCOL",
    "REMOTE_ADDR",
    "HTTP_HOST",
    "HTTP_USER_AGENT",
    "HTTP_X_FORWARDED_FOR",
    "HTTP_X_REQUEST_ID",
    "HTTP_AUTHORIZATION",
    "HTTP_COOKIE",
];

/// 機密情報を含みそうなキー名か
pub fn is_sensitive_key(key: &str) -> bool {
    const PATTERNS: [&str; 14] = [
        "authorization",
        "cookie",
        "token",
        "secret",
        "password",
        "api-key",
        "api_key",
        "apikey",
        "jwt",
        "session",
        "csrf",
        "signature",
        "credential",
        "bearer",
    ];
    let lower = key.to_ascii_lowercase();
    PATTERNS.iter().any(|p| lower.contains(p))
}

/// 値をログ用にマスク・切り詰めする
pub fn redact_value(key: &str, value: &str) -> String {
    if key.eq_ignore_ascii_case("QUERY_STRING") {
        return redact_query_string(value);
    }
    if is_sensitive_key(key) {
        return REDACTED.to_string();
    }
    truncate(value)
}

/// クエリ文字列のうち機密そうなパラメータだけマスクする
pub fn redact_query_string(query: &str) -> String {
    query
        .split('&')
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((key, _)) if is_sensitive_key(key) => format!("{}={}", key, REDACTED),
            _ => truncate(part),
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// 失敗時にログへ残すCGI環境の要約
pub fn environment_summary(vars: &HashMap<String, String>) -> String {
    let lines: Vec<String> = LOGGED_VARS
        .iter()
        .filter_map(|key| {
            vars.get(*key)
                .map(|value| format!("  {}={}", key, redact_value(key, value)))
        })
        .collect();
    if lines.is_empty() {
        return "CGI environment: (empty)".to_string();
    }
    format!("CGI environment:\n{}", lines.join("\n"))
}

fn truncate(value: &str) -> String {
    if value.len() <= MAX_LOGGED_VALUE {
        return value.to_string();
    }
    let mut cut = MAX_LOGGED_VALUE;
    while !value.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...[truncated]", &value[..cut])
}
