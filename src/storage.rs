//! キャッシュ・レート制限・セッションが使うキー/バリューストレージ

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::clock::{Clock, SystemClock};
use crate::error::Error;

/// キー/バリューストレージの契約
///
/// `get` は存在しない/期限切れのキーに対して `None` を返す。
/// `ttl` が 0 の場合は期限なしとして扱う。
#[cfg_attr(test, mockall::automock)]
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, Error>;

    fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), Error>;

    fn remove(&self, key: &str) -> Result<(), Error> {
        self.set(key, Value::Null, Duration::ZERO)
    }
}

impl<S: Storage + ?Sized> Storage for Arc<S> {
    fn get(&self, key: &str) -> Result<Option<Value>, Error> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), Error> {
        (**self).set(key, value, ttl)
    }

    fn remove(&self, key: &str) -> Result<(), Error> {
        (**self).remove(key)
    }
}

struct Entry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

/// プロセス内メモリのストレージ
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// 保持している（期限切れを含む）エントリ数
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 期限切れのエントリを削除
    pub fn purge_expired(&self) -> Result<usize, Error> {
        let now = self.clock.now();
        let mut entries = self.lock()?;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at.map_or(true, |at| at > now));
        Ok(before - entries.len())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Entry>>, Error> {
        self.entries
            .lock()
            .map_err(|_| Error::Storage("memory storage lock poisoned".to_string()))
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<Value>, Error> {
        let now = self.clock.now();
        let mut entries = self.lock()?;
        let expired = match entries.get(key) {
            Some(entry) => entry.expires_at.map_or(false, |at| at <= now),
            None => return Ok(None),
        };
        if expired {
            entries.remove(key);
            return Ok(None);
        }
        Ok(entries
            .get(key)
            .filter(|entry| !entry.value.is_null())
            .map(|entry| entry.value.clone()))
    }

    fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), Error> {
        // 表現できないほど長いTTLは期限なしとして扱う
        let expires_at = if ttl.is_zero() {
            None
        } else {
            chrono::Duration::from_std(ttl)
                .ok()
                .and_then(|ttl| self.clock.now().checked_add_signed(ttl))
        };
        self.lock()?
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), Error> {
        self.lock()?.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use serde_json::json;

    #[test]
    fn test_get_missing_key() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.get("nope").unwrap(), None);
    }

    #[test]
    fn test_set_and_expire() {
        let clock = Arc::new(FixedClock::at(1_000));
        let storage = MemoryStorage::with_clock(clock.clone());

        storage.set("k", json!({"n": 1}), Duration::from_secs(10)).unwrap();
        assert_eq!(storage.get("k").unwrap(), Some(json!({"n": 1})));

        clock.advance(10);
        assert_eq!(storage.get("k").unwrap(), None);
        assert!(storage.is_empty());
    }

    #[test]
    fn test_zero_ttl_never_expires() {
        let clock = Arc::new(FixedClock::at(0));
        let storage = MemoryStorage::with_clock(clock.clone());

        storage.set("forever", json!(true), Duration::ZERO).unwrap();
        clock.advance(1_000_000);
        assert_eq!(storage.get("forever").unwrap(), Some(json!(true)));
    }

    #[test]
    fn test_huge_ttl_is_treated_as_no_expiry() {
        let clock = Arc::new(FixedClock::at(1_000));
        let storage = MemoryStorage::with_clock(clock.clone());

        storage.set("far", json!(1), Duration::from_secs(10_000_000_000_000)).unwrap();
        storage.set("max", json!(2), Duration::MAX).unwrap();
        clock.advance(1_000_000);
        assert_eq!(storage.get("far").unwrap(), Some(json!(1)));
        assert_eq!(storage.get("max").unwrap(), Some(json!(2)));
    }

    #[test]
    fn test_remove_and_purge() {
        let clock = Arc::new(FixedClock::at(0));
        let storage = MemoryStorage::with_clock(clock.clone());

        storage.set("a", json!(1), Duration::from_secs(5)).unwrap();
        storage.set("b", json!(2), Duration::from_secs(50)).unwrap();
        storage.remove("b").unwrap();
        assert_eq!(storage.get("b").unwrap(), None);

        clock.advance(6);
        assert_eq!(storage.purge_expired().unwrap(), 1);
        assert!(storage.is_empty());
    }

    #[test]
    fn test_default_remove_writes_null() {
        let mut mock = MockStorage::new();
        mock.expect_set()
            .withf(|key, value, ttl| key.to_string() == "gone" && value.is_null() && ttl.is_zero())
            .times(1)
            .returning(|_, _, _| Ok(()));
        // automock は既定実装も差し替えるため、既定実装はラッパー経由で確認する
        struct Plain<'a>(&'a MockStorage);
        impl Storage for Plain<'_> {
            fn get(&self, key: &str) -> Result<Option<Value>, Error> {
                self.0.get(key)
            }
            fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), Error> {
                self.0.set(key, value, ttl)
            }
        }
        Plain(&mock).remove("gone").unwrap();
    }
}
