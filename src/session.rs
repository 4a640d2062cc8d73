//! ストレージに保存されるセッション
//!
//! `SessionMiddleware` がリクエストごとに作成し、`Arc<Session>` としてリクエスト属性に載せる。
//! データは `session:<id>` キーで `Storage` に保存される。

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::common::{Cookie, SameSite};
use crate::error::Error;
use crate::storage::Storage;

const FLASH_KEY: &str = "_flash";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// セッションクッキー名
    pub name: String,
    /// クッキーの Max-Age（0 ならブラウザを閉じるまで）
    pub cookie_lifetime: i64,
    pub cookie_path: String,
    /// 空文字なら Domain 属性を付けない
    pub cookie_domain: String,
    pub cookie_secure: bool,
    pub cookie_httponly: bool,
    pub cookie_samesite: Option<SameSite>,
    /// ストレージ上の有効期限（分）
    pub cache_expire: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: "HTTPSTACKSESSID".to_string(),
            cookie_lifetime: 0,
            cookie_path: "/".to_string(),
            cookie_domain: String::new(),
            cookie_secure: false,
            cookie_httponly: true,
            cookie_samesite: Some(SameSite::Lax),
            cache_expire: 180,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    id: String,
    started: bool,
    is_new: bool,
    regenerated: bool,
    destroyed: bool,
    data: Map<String, Value>,
}

pub struct Session {
    storage: Arc<dyn Storage>,
    config: SessionConfig,
    state: Mutex<State>,
}

impl Session {
    pub fn new(storage: Arc<dyn Storage>, config: SessionConfig) -> Self {
        Self {
            storage,
            config,
            state: Mutex::new(State::default()),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// セッションクッキー名
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// 現在のセッションID（未開始なら空文字の場合がある）
    pub fn id(&self) -> String {
        self.lock().map(|s| s.id.clone()).unwrap_or_default()
    }

    /// 開始前にIDを指定する
    pub fn set_id(&self, id: &str) -> Result<(), Error> {
        if !is_valid_id(id) {
            return Err(Error::InvalidCookie(format!("malformed session id: {:?}", id)));
        }
        let mut state = self.lock()?;
        if state.started {
            return Err(Error::Storage("cannot change the id of an active session".to_string()));
        }
        state.id = id.to_string();
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.lock().map(|s| s.started).unwrap_or(false)
    }

    /// このリクエストで新しく作られたセッションか
    pub fn is_new(&self) -> bool {
        self.lock().map(|s| s.is_new).unwrap_or(false)
    }

    pub fn is_destroyed(&self) -> bool {
        self.lock().map(|s| s.destroyed).unwrap_or(false)
    }

    /// クッキーを送り直す必要があるか（新規作成またはID再生成）
    pub fn needs_cookie(&self) -> bool {
        self.lock()
            .map(|s| !s.destroyed && (s.is_new || s.regenerated))
            .unwrap_or(false)
    }

    /// セッションを開始する（開始済みなら何もしない）
    ///
    /// 保存されていないIDは受け付けず、新しいIDを発行する。
    pub fn start(&self) -> Result<bool, Error> {
        let mut state = self.lock()?;
        if state.started {
            return Ok(true);
        }

        let stored = if state.id.is_empty() {
            None
        } else {
            self.storage.get(&storage_key(&state.id))?
        };
        match stored {
            Some(Value::Object(data)) => {
                state.data = data;
                state.is_new = false;
            }
            other => {
                if other.is_some() {
                    log::warn!("Discarding malformed session data for {}", state.id);
                } else if !state.id.is_empty() {
                    log::debug!("Unknown session id, issuing a new one");
                }
                state.id = generate_id();
                state.data = Map::new();
                state.is_new = true;
            }
        }
        state.started = true;
        state.destroyed = false;
        Ok(true)
    }

    pub fn get(&self, key: &str) -> Result<Option<Value>, Error> {
        Ok(self.started()?.data.get(key).cloned())
    }

    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<(), Error> {
        self.started()?.data.insert(key.to_string(), value.into());
        Ok(())
    }

    pub fn has(&self, key: &str) -> Result<bool, Error> {
        Ok(self.started()?.data.contains_key(key))
    }

    pub fn remove(&self, key: &str) -> Result<Option<Value>, Error> {
        Ok(self.started()?.data.remove(key))
    }

    pub fn all(&self) -> Result<Map<String, Value>, Error> {
        Ok(self.started()?.data.clone())
    }

    pub fn clear(&self) -> Result<(), Error> {
        self.started()?.data.clear();
        Ok(())
    }

    /// セッションを破棄し、保存済みデータを削除する
    pub fn destroy(&self) -> Result<bool, Error> {
        let mut state = self.lock()?;
        if !state.id.is_empty() {
            self.storage.remove(&storage_key(&state.id))?;
        }
        state.data.clear();
        state.started = false;
        state.destroyed = true;
        Ok(true)
    }

    /// セッションIDを再生成する
    pub fn regenerate(&self, delete_old_session: bool) -> Result<bool, Error> {
        let mut state = self.started()?;
        if delete_old_session {
            self.storage.remove(&storage_key(&state.id))?;
        }
        state.id = generate_id();
        state.regenerated = true;
        Ok(true)
    }

    /// 次に読まれるまでだけ残る値を設定
    pub fn flash(&self, key: &str, value: impl Into<Value>) -> Result<(), Error> {
        let mut state = self.started()?;
        let flash = state
            .data
            .entry(FLASH_KEY)
            .or_insert_with(|| Value::Object(Map::new()));
        if !flash.is_object() {
            *flash = Value::Object(Map::new());
        }
        if let Value::Object(map) = flash {
            map.insert(key.to_string(), value.into());
        }
        Ok(())
    }

    /// フラッシュ値を取り出す（取り出した値は削除される）
    pub fn get_flash(&self, key: &str) -> Result<Option<Value>, Error> {
        let mut state = self.started()?;
        Ok(match state.data.get_mut(FLASH_KEY) {
            Some(Value::Object(map)) => map.remove(key),
            _ => None,
        })
    }

    pub fn has_flash(&self, key: &str) -> Result<bool, Error> {
        let state = self.started()?;
        Ok(matches!(state.data.get(FLASH_KEY), Some(Value::Object(map)) if map.contains_key(key)))
    }

    /// 現在のデータをストレージに書き込む
    pub fn save(&self) -> Result<(), Error> {
        let state = self.lock()?;
        if !state.started || state.destroyed {
            return Ok(());
        }
        let ttl = Duration::from_secs(self.config.cache_expire.saturating_mul(60));
        self.storage
            .set(&storage_key(&state.id), Value::Object(state.data.clone()), ttl)
    }

    /// 現在のIDを載せたセッションクッキー
    pub fn cookie(&self) -> Cookie {
        self.configure_cookie(Cookie::new(self.config.name.clone(), self.id()))
            .with_max_age(self.config.cookie_lifetime)
    }

    /// ブラウザ側のセッションクッキーを削除するためのクッキー
    pub fn expired_cookie(&self) -> Cookie {
        self.configure_cookie(Cookie::expired(self.config.name.clone(), None, None))
    }

    fn configure_cookie(&self, mut cookie: Cookie) -> Cookie {
        cookie.path = Some(self.config.cookie_path.clone()).filter(|p| !p.is_empty());
        cookie.domain = Some(self.config.cookie_domain.clone()).filter(|d| !d.is_empty());
        cookie
            .secure(self.config.cookie_secure)
            .http_only(self.config.cookie_httponly)
            .with_same_site(self.config.cookie_samesite)
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, Error> {
        self.state
            .lock()
            .map_err(|_| Error::Storage("session lock poisoned".to_string()))
    }

    /// 開始済みの状態を取得（未開始なら開始する）
    fn started(&self) -> Result<MutexGuard<'_, State>, Error> {
        self.start()?;
        self.lock()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.config.name)
            .field("id", &self.id())
            .field("started", &self.is_started())
            .finish()
    }
}

fn storage_key(id: &str) -> String {
    format!("session:{}", id)
}

fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= 128 && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}
