//! CGIメイン実行ロジック

use std::collections::HashMap;
use std::env;
use std::io;

use log::{error, info};

use crate::common::Handler;
use crate::error::Error;
use crate::server::Server;
use super::redact::environment_summary;
use super::request::request_from_parts;

/// 環境変数と標準入力からリクエストを作り、処理結果を標準出力へ書き出す
///
/// リクエストの構築に失敗した場合もサーバーの失敗変換を通したレスポンスを返す。
pub fn run_cgi<H: Handler>(server: &Server, handler: H) -> Result<(), Error> {
    let vars: HashMap<String, String> = env::vars().collect();
    let request = request_from_parts(&vars, io::stdin().lock(), server.config().max_body_size);

    let response = match request {
        Ok(request) => server.handle(request, handler),
        Err(err) => {
            error!("Failed to build CGI request: {}\n{}", err, environment_summary(&vars));
            server.error_response(err)
        }
    };

    let status = response.status_code();
    server.send(response)?;
    info!("CGI request finished with status {}", status);
    Ok(())
}
