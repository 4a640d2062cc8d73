//! ハンドラの戻り値をResponseへ変換する

use std::any::{type_name, Any};

use serde::Serialize;

use crate::common::Response;
use crate::error::Error;

/// レスポンス変換トレイト
///
/// 変換できない値は `Error::HandlerContract` になり、サーバー側で 500 として扱われる。
pub trait IntoResponse {
    /// 自身をResponseに変換
    fn into_response(self) -> Result<Response, Error>;
}

/// Response型に対する実装（恒等関数）
impl IntoResponse for Response {
    fn into_response(self) -> Result<Response, Error> {
        Ok(self)
    }
}

/// Result型に対する実装（Errはそのまま伝播）
impl<T, E> IntoResponse for Result<T, E>
where
    T: IntoResponse,
    E: Into<Error>,
{
    fn into_response(self) -> Result<Response, Error> {
        match self {
            Ok(value) => value.into_response(),
            Err(e) => Err(e.into()),
        }
    }
}

/// `None` はレスポンスを返さなかったものとして契約違反
impl IntoResponse for Option<Response> {
    fn into_response(self) -> Result<Response, Error> {
        self.ok_or_else(|| Error::HandlerContract("handler returned no response".to_string()))
    }
}

/// 型消去された値は Response の場合のみ受け付ける
impl IntoResponse for Box<dyn Any + Send> {
    fn into_response(self) -> Result<Response, Error> {
        match self.downcast::<Response>() {
            Ok(res) => Ok(*res),
            Err(_) => Err(Error::HandlerContract(
                "handler returned a value that is not a Response".to_string(),
            )),
        }
    }
}

/// シリアライズ可能な値をJSONレスポンスとして返すラッパー
#[derive(Debug, Clone)]
pub struct Json<T>(pub T);

impl<T: Serialize> IntoResponse for Json<T> {
    fn into_response(self) -> Result<Response, Error> {
        Response::json(&self.0).map_err(|e| {
            log::error!("Failed to serialize {} as JSON: {}", type_name::<T>(), e);
            e
        })
    }
}
