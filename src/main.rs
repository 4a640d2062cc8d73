//! CGI環境でのエントリポイント
//!
//! 動作確認用のエンドポイントを持つ小さなアプリケーション

use std::collections::BTreeMap;

use env_logger::Env;
use log::{error, info};
use serde_json::{json, Value};

use httpstack::common::response::canonical_header_name;
use httpstack::middleware::{CorsMiddleware, SecurityHeadersMiddleware};
use httpstack::{cgi, Error, Request, Response, Server, ServerConfig};

fn hello(_req: &Request) -> Result<Response, Error> {
    Response::json(&json!({ "message": "Hello from httpstack CGI" }))
}

fn echo(req: &Request) -> Result<Response, Error> {
    let headers: BTreeMap<String, &str> = req
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (canonical_header_name(name.as_str()), v))
        })
        .collect();
    let body = if req.body().is_empty() {
        Value::Null
    } else {
        req.json::<Value>()
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(req.body()).into_owned()))
    };

    Response::json(&json!({
        "method": req.method().as_str(),
        "path": req.path(),
        "query": req.query_params(),
        "headers": headers,
        "body": body,
    }))
}

fn route(req: Request) -> Result<Response, Error> {
    match (req.method().as_str(), req.path()) {
        ("GET", "/") => hello(&req),
        ("GET", "/echo") | ("POST", "/echo") => echo(&req),
        ("GET", "/panic") => {
            info!("Handling panic request - this will panic!");
            panic!("Test panic from handler");
        }
        (method, path) => Err(Error::not_found(format!("Not Found: {} {}", method, path))),
    }
}

fn main() {
    // CGIでは標準出力がHTTPレスポンスとなるため、ログは標準エラー出力に出す
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    info!("Starting httpstack CGI application");

    let server = Server::with_config(ServerConfig::from_env())
        .add_middleware(CorsMiddleware::default())
        .add_middleware(SecurityHeadersMiddleware::default());

    if let Err(err) = cgi::run_cgi(&server, route) {
        error!("Error running CGI application: {}", err);
        std::process::exit(1);
    }
}
