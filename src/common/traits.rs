//! コアトレイト定義（Middleware、Handler）と継続 `Next`

use std::fmt;

use crate::error::Error;
use crate::handler::IntoResponse;
use super::request::Request;
use super::response::Response;

/// パイプラインの残り（内側のミドルウェアと終端ハンドラ）を表す関数
pub type Continuation<'a> = dyn Fn(Request) -> Result<Response, Error> + 'a;

/// ミドルウェアに渡される継続
///
/// `run` は 0 回（短絡）、1 回（通常）、複数回（リトライ）のいずれでも呼べる。
#[derive(Clone, Copy)]
pub struct Next<'a> {
    inner: &'a Continuation<'a>,
}

impl<'a> Next<'a> {
    pub fn new(inner: &'a Continuation<'a>) -> Self {
        Self { inner }
    }

    /// 残りのパイプラインを実行
    pub fn run(&self, request: Request) -> Result<Response, Error> {
        (self.inner)(request)
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Next(..)")
    }
}

/// ミドルウェアの特性
///
/// 自身の設定と外部コラボレータだけを保持し、パイプライン上の位置は知らない。
pub trait Middleware: Send + Sync {
    /// リクエストを処理し、必要なら `next` に委譲する
    fn process(&self, request: Request, next: Next<'_>) -> Result<Response, Error>;

    /// ログ出力用の名前
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// 終端ハンドラの特性
pub trait Handler {
    /// リクエストを処理してレスポンスを返す
    fn handle(&self, request: Request) -> Result<Response, Error>;
}

/// `Fn(Request) -> R`（`R: IntoResponse`）はそのままハンドラとして使える
impl<F, R> Handler for F
where
    F: Fn(Request) -> R,
    R: IntoResponse,
{
    fn handle(&self, request: Request) -> Result<Response, Error> {
        (self)(request).into_response()
    }
}
