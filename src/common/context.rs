//! リクエスト属性の実装

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// リクエスト属性（ミドルウェア間でのデータ共有）
///
/// 値は `Arc` で共有されるため、`Clone` しても中身は失われない。
/// 値そのものは不変で、差し替えは新しい `Attributes` を作ることで行う。
#[derive(Clone, Default)]
pub struct Attributes {
    values: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl Attributes {
    /// 新しいAttributesを作成
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    /// 値を設定
    pub fn set<T: Send + Sync + 'static>(&mut self, key: &str, value: T) {
        self.values.insert(key.to_string(), Arc::new(value));
    }

    /// 共有済みの値をそのまま設定
    pub fn set_shared<T: Send + Sync + 'static>(&mut self, key: &str, value: Arc<T>) {
        self.values.insert(key.to_string(), value);
    }

    /// 値を参照で取得
    pub fn get<T: 'static>(&self, key: &str) -> Option<&T> {
        self.values.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    /// 値を `Arc` で取得
    pub fn get_shared<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        self.values
            .get(key)
            .and_then(|v| Arc::clone(v).downcast::<T>().ok())
    }

    /// 値を削除
    pub fn remove(&mut self, key: &str) -> bool {
        self.values.remove(key).is_some()
    }

    /// 指定されたキーが存在するかチェック
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// 全てのキーを取得
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // 値は型消去されているのでキーだけを出す
        f.debug_set().entries(self.values.keys()).finish()
    }
}
