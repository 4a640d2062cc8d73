//! ミドルウェアの合成

use std::fmt;

use log::debug;

use crate::common::{Continuation, Middleware, Next, Request, Response};
use crate::error::Error;

/// 登録順に並んだミドルウェア列
///
/// 先に登録したものほど外側になり、行きは登録順、帰りは逆順に実行される。
#[derive(Default)]
pub struct MiddlewareStack {
    middleware: Vec<Box<dyn Middleware>>,
}

impl MiddlewareStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// 末尾（最も内側）に追加
    pub fn add<M: Middleware + 'static>(&mut self, middleware: M) {
        self.middleware.push(Box::new(middleware));
    }

    /// Box化済みのミドルウェアを追加
    pub fn add_boxed(&mut self, middleware: Box<dyn Middleware>) {
        self.middleware.push(middleware);
    }

    pub fn len(&self) -> usize {
        self.middleware.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middleware.is_empty()
    }

    /// 登録済みミドルウェアの名前（登録順）
    pub fn names(&self) -> Vec<&'static str> {
        self.middleware.iter().map(|m| m.name()).collect()
    }

    /// ミドルウェア列と終端ハンドラを1つの関数に合成する
    ///
    /// `next := handler` から始め、逆順に `next := |req| mw.process(req, next)` と包み直す。
    /// ミドルウェアが空なら `handler` そのものと等価。
    pub fn compose<'a>(&'a self, handler: &'a Continuation<'a>) -> Box<Continuation<'a>> {
        let mut next: Box<Continuation<'a>> = Box::new(move |req| handler(req));
        for middleware in self.middleware.iter().rev() {
            let inner = next;
            next = Box::new(move |req| {
                debug!("Entering middleware {}", middleware.name());
                let result = middleware.process(req, Next::new(inner.as_ref()));
                debug!("Leaving middleware {}", middleware.name());
                result
            });
        }
        next
    }

    /// 合成したチェーンでリクエストを処理する
    pub fn process(&self, request: Request, handler: &Continuation<'_>) -> Result<Response, Error> {
        let chain = self.compose(handler);
        chain(request)
    }
}

impl fmt::Debug for MiddlewareStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareStack")
            .field("middleware", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::from_fn;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    fn tracer(label: &'static str, log: Log) -> impl Middleware {
        from_fn(move |req: Request, next: Next<'_>| {
            log.lock().unwrap().push(format!("before {}", label));
            let res = next.run(req)?;
            log.lock().unwrap().push(format!("after {}", label));
            Ok(res.with_added_header("X-Trace", label))
        })
    }

    #[test]
    fn test_compose_runs_in_lifo_order() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let mut stack = MiddlewareStack::new();
        stack.add(tracer("A", log.clone()));
        stack.add(tracer("B", log.clone()));

        let handler_log = log.clone();
        let handler = move |_req: Request| -> Result<Response, Error> {
            handler_log.lock().unwrap().push("handler".to_string());
            Ok(Response::ok("done"))
        };

        let res = stack
            .process(Request::create("GET", "/").unwrap(), &handler)
            .unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["before A", "before B", "handler", "after B", "after A"]
        );
        // 内側から順にヘッダーが積まれる
        assert_eq!(res.header_values("X-Trace"), vec!["B", "A"]);
    }

    #[test]
    fn test_empty_stack_is_handler() {
        let stack = MiddlewareStack::new();
        let handler = |req: Request| -> Result<Response, Error> { Ok(Response::text(req.path().to_string())) };

        let res = stack
            .process(Request::create("GET", "/plain").unwrap(), &handler)
            .unwrap();
        assert_eq!(res.body_bytes().map(|b| b.as_ref()), Some(b"/plain".as_ref()));
    }

    #[test]
    fn test_next_may_be_called_twice() {
        let calls = Arc::new(Mutex::new(0));
        let mut stack = MiddlewareStack::new();
        stack.add(from_fn(|req: Request, next: Next<'_>| {
            // 1回目が 503 なら再試行
            let first = next.run(req.clone())?;
            if first.status_code() == 503 {
                return next.run(req);
            }
            Ok(first)
        }));

        let counter = calls.clone();
        let handler = move |_req: Request| -> Result<Response, Error> {
            let mut n = counter.lock().unwrap();
            *n += 1;
            if *n == 1 {
                Ok(Response::new(http::StatusCode::SERVICE_UNAVAILABLE))
            } else {
                Ok(Response::ok("second try"))
            }
        };

        let res = stack
            .process(Request::create("GET", "/").unwrap(), &handler)
            .unwrap();
        assert_eq!(res.status_code(), 200);
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[test]
    fn test_names_in_registration_order() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let mut stack = MiddlewareStack::new();
        stack.add(tracer("A", log));
        stack.add(crate::middleware::ContentTypeMiddleware::default());

        let names = stack.names();
        assert_eq!(names.len(), 2);
        assert!(names[1].ends_with("ContentTypeMiddleware"));
    }
}
