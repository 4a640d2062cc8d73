//! リクエストにセッションを付与するミドルウェア

use std::fmt;
use std::sync::Arc;

use crate::common::{Middleware, Next, Request, Response, SESSION_ATTRIBUTE};
use crate::error::Error;
use crate::session::{Session, SessionConfig};
use crate::storage::Storage;

/// `next` の前にセッションを開始し、`session` 属性として渡す
///
/// `next` の後でデータを保存し、新規作成または再生成されたセッションにはクッキーを設定する。
pub struct SessionMiddleware {
    storage: Arc<dyn Storage>,
    config: SessionConfig,
}

impl SessionMiddleware {
    pub fn new(storage: Arc<dyn Storage>, config: SessionConfig) -> Self {
        Self { storage, config }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn open(&self, request: &Request) -> Result<Arc<Session>, Error> {
        let session = Session::new(self.storage.clone(), self.config.clone());
        if let Some(id) = request.cookie(&self.config.name) {
            if let Err(e) = session.set_id(id) {
                log::warn!("Ignoring session cookie: {}", e);
            }
        }
        session.start()?;
        Ok(Arc::new(session))
    }
}

impl fmt::Debug for SessionMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionMiddleware")
            .field("config", &self.config)
            .finish()
    }
}

impl Middleware for SessionMiddleware {
    fn process(&self, request: Request, next: Next<'_>) -> Result<Response, Error> {
        let had_cookie = request.has_cookie(&self.config.name);
        let session = self.open(&request)?;
        let request = request.with_shared_attribute(SESSION_ATTRIBUTE, session.clone());

        let response = next.run(request)?;

        if session.is_destroyed() {
            if had_cookie {
                return Ok(response.with_cookie(session.expired_cookie()));
            }
            return Ok(response);
        }

        session.save()?;
        if session.needs_cookie() {
            return Ok(response.with_cookie(session.cookie()));
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use serde_json::json;

    fn middleware(storage: Arc<dyn Storage>) -> SessionMiddleware {
        SessionMiddleware::new(storage, SessionConfig::default())
    }

    fn counter_handler(req: Request) -> Result<Response, Error> {
        let session = req
            .session()
            .ok_or_else(|| Error::InternalServerError("no session".to_string()))?;
        let visits = session.get("visits")?.and_then(|v| v.as_u64()).unwrap_or(0) + 1;
        session.set("visits", visits)?;
        Ok(Response::text(visits.to_string()))
    }

    #[test]
    fn test_new_session_sets_cookie_and_persists() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let mw = middleware(storage.clone());

        let first = mw
            .process(Request::create("GET", "/").unwrap(), Next::new(&counter_handler))
            .unwrap();
        let cookie = first.cookie("HTTPSTACKSESSID").cloned().unwrap();
        assert_eq!(cookie.max_age, 0);
        assert_eq!(first.body_bytes().unwrap().as_ref(), b"1");

        // 同じクッキーで再訪するとデータが引き継がれ、クッキーは再送されない
        let req = Request::create("GET", "/")
            .unwrap()
            .with_header("Cookie", &format!("HTTPSTACKSESSID={}", cookie.value));
        let second = mw.process(req, Next::new(&counter_handler)).unwrap();
        assert_eq!(second.body_bytes().unwrap().as_ref(), b"2");
        assert!(!second.has_cookie("HTTPSTACKSESSID"));

        assert_eq!(
            storage.get(&format!("session:{}", cookie.value)).unwrap(),
            Some(json!({"visits": 2}))
        );
    }

    #[test]
    fn test_original_request_is_untouched() {
        let mw = middleware(Arc::new(MemoryStorage::new()));
        let original = Request::create("GET", "/").unwrap();
        let kept = original.clone();

        let handler = |req: Request| -> Result<Response, Error> {
            assert!(req.session().is_some());
            Ok(Response::no_content())
        };
        mw.process(original, Next::new(&handler)).unwrap();
        assert!(kept.session().is_none());
    }

    #[test]
    fn test_destroyed_session_expires_cookie() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let mw = middleware(storage.clone());
        let first = mw
            .process(Request::create("GET", "/").unwrap(), Next::new(&counter_handler))
            .unwrap();
        let id = first.cookie("HTTPSTACKSESSID").unwrap().value.clone();

        let logout = |req: Request| -> Result<Response, Error> {
            if let Some(session) = req.session() {
                session.destroy()?;
            }
            Ok(Response::no_content())
        };
        let req = Request::create("POST", "/logout")
            .unwrap()
            .with_header("Cookie", &format!("HTTPSTACKSESSID={}", id));
        let res = mw.process(req, Next::new(&logout)).unwrap();

        assert!(res.cookie("HTTPSTACKSESSID").unwrap().is_expired());
        assert_eq!(storage.get(&format!("session:{}", id)).unwrap(), None);
    }
}
