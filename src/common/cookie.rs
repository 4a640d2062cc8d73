//! HTTPクッキー関連の実装

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use super::utils::{is_cookie_name_valid, is_header_value_valid, percent_decode, urlencode};

/// Expires 属性の日付フォーマット（例: `Tue, 31 Dec 2024 23:59:59 GMT`）
const EXPIRES_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// SameSite属性
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SameSite::Strict => write!(f, "Strict"),
            SameSite::Lax => write!(f, "Lax"),
            SameSite::None => write!(f, "None"),
        }
    }
}

impl FromStr for SameSite {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(SameSite::Strict),
            "lax" => Ok(SameSite::Lax),
            "none" => Ok(SameSite::None),
            other => Err(Error::InvalidCookie(format!("unknown SameSite policy: {}", other))),
        }
    }
}

/// HTTPクッキー
///
/// `max_age` は秒数で、0 はセッションクッキー、負の値は削除指示を表す。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub max_age: i64,
    pub path: Option<String>,
    pub domain: Option<String>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<SameSite>,
}

impl Cookie {
    /// 新しいクッキーを作成
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        // 無効な名前はパニックせずログに出して無害な名前に置換
        // 厳密な扱いが必要な場合は `try_new` を使用
        match Self::try_new(name, value) {
            Ok(c) => c,
            Err(e) => {
                log::warn!("Cookie::new received invalid name: {}. Replaced with safe defaults", e);
                Self::with_defaults("invalid".to_string(), String::new())
            }
        }
    }

    /// 新しいクッキーをResultで作成（推奨）
    pub fn try_new(name: impl Into<String>, value: impl Into<String>) -> Result<Self, Error> {
        let name = name.into();
        if !is_cookie_name_valid(&name) {
            return Err(Error::InvalidCookie(format!(
                "cookie name contains invalid characters: {:?}",
                name
            )));
        }
        Ok(Self::with_defaults(name, value.into()))
    }

    fn with_defaults(name: String, value: String) -> Self {
        Self {
            name,
            value,
            max_age: 0,
            path: Some("/".to_string()),
            domain: None,
            secure: false,
            http_only: true,
            same_site: Some(SameSite::Lax),
        }
    }

    /// 削除用のクッキー（Max-Age=-1）を作成
    pub fn expired(name: impl Into<String>, path: Option<&str>, domain: Option<&str>) -> Self {
        let mut cookie = Self::new(name, "");
        cookie.max_age = -1;
        cookie.path = path.map(str::to_string);
        cookie.domain = domain.map(str::to_string);
        cookie
    }

    /// パスを設定
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// パス属性を外す
    pub fn without_path(mut self) -> Self {
        self.path = None;
        self
    }

    /// ドメインを設定
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// 最大年齢（秒）を設定
    pub fn with_max_age(mut self, seconds: i64) -> Self {
        self.max_age = seconds;
        self
    }

    /// セキュアフラグを設定
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// HttpOnlyフラグを設定
    pub fn http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    /// SameSite属性を設定（`None` で属性ごと省略）
    pub fn with_same_site(mut self, same_site: Option<SameSite>) -> Self {
        self.same_site = same_site;
        self
    }

    /// セッションクッキーかどうか
    pub fn is_session(&self) -> bool {
        self.max_age == 0
    }

    /// 削除指示のクッキーかどうか
    pub fn is_expired(&self) -> bool {
        self.max_age < 0
    }

    /// 現在時刻を基準にSet-Cookieヘッダー値を生成
    pub fn to_header_value(&self) -> String {
        self.to_header_value_at(Utc::now())
    }

    /// 指定時刻を基準にSet-Cookieヘッダー値を生成
    ///
    /// 属性の順序は `Max-Age, Expires, Domain, Path, Secure, HttpOnly, SameSite` で固定。
    pub fn to_header_value_at(&self, now: DateTime<Utc>) -> String {
        let mut parts = vec![format!("{}={}", self.name, urlencode(&self.value))];

        if self.max_age != 0 {
            parts.push(format!("Max-Age={}", self.max_age));
            // 表現できない日時になる場合は Expires を省き Max-Age だけにする
            match Duration::try_seconds(self.max_age).and_then(|d| now.checked_add_signed(d)) {
                Some(expires) => parts.push(format!("Expires={}", expires.format(EXPIRES_FORMAT))),
                None => log::warn!(
                    "Cookie::to_header_value omitted Expires for out-of-range Max-Age {}",
                    self.max_age
                ),
            }
        }

        if let Some(domain) = self.domain.as_deref().filter(|d| !d.is_empty()) {
            if is_header_value_valid(domain) && !domain.contains(';') {
                parts.push(format!("Domain={}", domain));
            } else {
                log::warn!("Cookie::to_header_value skipped invalid Domain value: {:?}", domain);
            }
        }

        if let Some(path) = self.path.as_deref().filter(|p| !p.is_empty()) {
            if is_header_value_valid(path) && !path.contains(';') {
                parts.push(format!("Path={}", path));
            } else {
                log::warn!("Cookie::to_header_value skipped invalid Path value: {:?}", path);
            }
        }

        if self.secure {
            parts.push("Secure".to_string());
        }

        if self.http_only {
            parts.push("HttpOnly".to_string());
        }

        if let Some(same_site) = &self.same_site {
            parts.push(format!("SameSite={}", same_site));
        }

        parts.join("; ")
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_header_value())
    }
}

/// Set-Cookie 形式の文字列を解析する
///
/// 存在しない属性は付かない（Path なしなら `None`、HttpOnly なしなら `false`）。
/// Expires は Max-Age から再計算されるため読み捨てる。
impl FromStr for Cookie {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(';');
        let pair = parts.next().unwrap_or("").trim();
        let (name, raw_value) = pair.split_once('=').unwrap_or((pair, ""));
        let mut cookie = Cookie::try_new(name.trim(), percent_decode(raw_value.trim()))?;
        cookie.path = None;
        cookie.http_only = false;
        cookie.same_site = None;

        for part in parts {
            let part = part.trim();
            match part.split_once('=') {
                Some((key, val)) => {
                    let val = val.trim();
                    match key.trim().to_ascii_lowercase().as_str() {
                        "max-age" => cookie.max_age = val.parse().unwrap_or(0),
                        "path" => cookie.path = Some(val.to_string()),
                        "domain" => cookie.domain = Some(val.to_string()),
                        "samesite" => cookie.same_site = val.parse().ok(),
                        _ => {}
                    }
                }
                None => match part.to_ascii_lowercase().as_str() {
                    "secure" => cookie.secure = true,
                    "httponly" => cookie.http_only = true,
                    _ => {}
                },
            }
        }

        Ok(cookie)
    }
}

/// 名前をキーとしたクッキーの集合（挿入順を保持）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieJar {
    cookies: Vec<Cookie>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self { cookies: Vec::new() }
    }

    /// リクエストの Cookie ヘッダー（`a=1; b=2`）から構築する
    pub fn from_request_header(header: &str) -> Self {
        let mut jar = Self::new();
        for pair in header.split(';') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            match Cookie::try_new(name.trim(), percent_decode(value.trim())) {
                Ok(cookie) => jar.set(cookie),
                Err(e) => log::debug!("Skipping malformed request cookie: {}", e),
            }
        }
        jar
    }

    /// 同名のクッキーは置き換える
    pub fn set(&mut self, cookie: Cookie) {
        match self.cookies.iter_mut().find(|c| c.name == cookie.name) {
            Some(existing) => *existing = cookie,
            None => self.cookies.push(cookie),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Cookie> {
        self.cookies.iter().find(|c| c.name == name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<Cookie> {
        let index = self.cookies.iter().position(|c| c.name == name)?;
        Some(self.cookies.remove(index))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Cookie> {
        self.cookies.iter()
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn clear(&mut self) {
        self.cookies.clear();
    }

    /// 各クッキーを Set-Cookie ヘッダー値に変換する
    pub fn to_header_values_at(&self, now: DateTime<Utc>) -> Vec<String> {
        self.cookies.iter().map(|c| c.to_header_value_at(now)).collect()
    }
}

impl<'a> IntoIterator for &'a CookieJar {
    type Item = &'a Cookie;
    type IntoIter = std::slice::Iter<'a, Cookie>;

    fn into_iter(self) -> Self::IntoIter {
        self.cookies.iter()
    }
}
