//! レスポンスを出力先へ書き出す

use std::io::{self, Read, Write};
use std::sync::atomic::Ordering;

use log::{debug, warn};

use crate::cgi::CgiTransport;
use crate::common::{Body, Response};
use crate::error::Error;
use super::core::Server;
use super::transport::Transport;

impl Server {
    /// 標準出力（CGI形式）へ書き出す
    pub fn send(&self, response: Response) -> Result<(), Error> {
        let stdout = io::stdout();
        self.send_to_writer(response, stdout.lock())
    }

    /// このサーバーが共有する出力先（通常は標準出力）へCGI形式で書き出す
    ///
    /// 一度ヘッダーを書き出した後の呼び出しではボディだけを書き出す。
    pub fn send_to_writer<W: Write>(&self, response: Response, out: W) -> Result<(), Error> {
        let committed = self.headers_committed.load(Ordering::SeqCst);
        let mut transport = CgiTransport::new(out).with_headers_sent(committed);
        let result = self.send_to(response, &mut transport);
        if transport.headers_sent() {
            self.headers_committed.store(true, Ordering::SeqCst);
        }
        result
    }

    /// 任意の出力先へ書き出す
    ///
    /// ボディは `chunk_size` ごとに書き込み、毎回 flush する。
    /// ストリームの読み出しに失敗した場合は残りを読めるだけ読んで書き出し、エラーにはしない。
    pub fn send_to<T: Transport + ?Sized>(&self, response: Response, transport: &mut T) -> Result<(), Error> {
        let status = response.status();
        if transport.headers_sent() {
            warn!("Headers already sent; writing body only");
        } else {
            let mut headers = response.outbound_headers_at(self.clock.now());
            if let Some(len) = response.body().len() {
                if !response.has_header("Content-Length") {
                    headers.push(("Content-Length".to_string(), len.to_string()));
                }
            }
            transport.send_head(status, &headers)?;
        }

        let chunk_size = self.config().chunk_size.max(1);
        match response.into_body() {
            Body::Full(bytes) => {
                for chunk in bytes.chunks(chunk_size) {
                    transport.write_chunk(chunk)?;
                    transport.flush()?;
                }
            }
            Body::Stream(mut reader) => stream_body(reader.as_mut(), transport, chunk_size)?,
        }
        debug!("Response {} sent", status.as_u16());
        Ok(())
    }
}

fn stream_body<T: Transport + ?Sized>(
    reader: &mut (dyn Read + Send),
    transport: &mut T,
    chunk_size: usize,
) -> Result<(), Error> {
    let mut buf = vec![0u8; chunk_size];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => {
                transport.write_chunk(&buf[..n])?;
                transport.flush()?;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("Stream read failed, falling back to buffered output: {}", e);
                let mut rest = Vec::new();
                if let Err(e) = reader.read_to_end(&mut rest) {
                    warn!("Fallback read also failed: {}", e);
                }
                if !rest.is_empty() {
                    transport.write_chunk(&rest)?;
                    transport.flush()?;
                }
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::server::ServerConfig;
    use http::StatusCode;
    use std::sync::Arc;

    #[derive(Default)]
    struct Recorder {
        committed: bool,
        head: Option<(StatusCode, Vec<(String, String)>)>,
        chunks: Vec<Vec<u8>>,
        flushes: usize,
    }

    impl Transport for Recorder {
        fn headers_sent(&self) -> bool {
            self.committed
        }

        fn send_head(&mut self, status: StatusCode, headers: &[(String, String)]) -> io::Result<()> {
            self.committed = true;
            self.head = Some((status, headers.to_vec()));
            Ok(())
        }

        fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
            self.chunks.push(chunk.to_vec());
            Ok(())
        }

        fn flush(&mut self) -> io::Result<()> {
            self.flushes += 1;
            Ok(())
        }
    }

    /// "abc" → エラー → "def" の順に返す
    struct Flaky {
        step: usize,
    }

    impl Read for Flaky {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.step += 1;
            let data: &[u8] = match self.step {
                1 => b"abc",
                2 => return Err(io::Error::new(io::ErrorKind::Other, "disk gone")),
                3 => b"def",
                _ => b"",
            };
            buf[..data.len()].copy_from_slice(data);
            Ok(data.len())
        }
    }

    #[test]
    fn test_full_body_is_chunked_with_flush() {
        let server = Server::new();
        let body = vec![b'x'; 20_000];
        let mut out = Recorder::default();

        server.send_to(Response::ok(body), &mut out).unwrap();

        let sizes: Vec<usize> = out.chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![8192, 8192, 3616]);
        assert_eq!(out.flushes, 3);
        let (status, headers) = out.head.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert!(headers.contains(&("Content-Length".to_string(), "20000".to_string())));
    }

    #[test]
    fn test_headers_and_cookies_one_line_each() {
        let server = Server::new().with_clock(Arc::new(FixedClock::at(0)));
        let res = Response::no_content()
            .with_header("X-A", "1")
            .with_added_header("X-A", "2")
            .with_simple_cookie("a", "1", 0)
            .with_simple_cookie("b", "2", 0);
        let mut out = Recorder::default();
        server.send_to(res, &mut out).unwrap();

        let (_, headers) = out.head.unwrap();
        let values = |name: &str| -> Vec<String> {
            headers
                .iter()
                .filter(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
                .collect()
        };
        assert_eq!(values("X-A"), vec!["1", "2"]);
        assert_eq!(values("Set-Cookie"), vec!["a=1; Path=/; HttpOnly; SameSite=Lax", "b=2; Path=/; HttpOnly; SameSite=Lax"]);
    }

    #[test]
    fn test_committed_headers_are_skipped() {
        let server = Server::new();
        let mut out = Recorder {
            committed: true,
            ..Recorder::default()
        };
        server.send_to(Response::text("body"), &mut out).unwrap();
        assert!(out.head.is_none());
        assert_eq!(out.chunks, vec![b"body".to_vec()]);
    }

    #[test]
    fn test_stream_read_failure_falls_back() {
        let server = Server::with_config(ServerConfig {
            chunk_size: 4,
            ..ServerConfig::default()
        });
        let res = Response::ok(Body::Stream(Box::new(Flaky { step: 0 })));
        let mut out = Recorder::default();

        server.send_to(res, &mut out).unwrap();

        assert_eq!(out.chunks, vec![b"abc".to_vec(), b"def".to_vec()]);
        let (_, headers) = out.head.unwrap();
        assert!(!headers.iter().any(|(k, _)| k == "Content-Length"));
    }

    #[test]
    fn test_second_send_on_same_transport_writes_body_only() {
        let server = Server::new();
        let mut out = Recorder::default();

        server.send_to(Response::ok("first"), &mut out).unwrap();
        server.send_to(Response::not_found(), &mut out).unwrap();

        let (status, _) = out.head.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(out.chunks.concat(), b"firstNot Found".to_vec());
    }

    #[test]
    fn test_shared_output_emits_status_once() {
        let server = Server::new();
        let mut out: Vec<u8> = Vec::new();

        server.send_to_writer(Response::ok("a"), &mut out).unwrap();
        server.send_to_writer(Response::server_error(), &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.matches("Status:").count(), 1);
        assert!(text.starts_with("Status: 200 OK\r\n"));
        assert!(text.ends_with("\r\n\r\naInternal Server Error"));
    }

    #[test]
    fn test_callback_stream_is_written_per_chunk() {
        let server = Server::new();
        let mut parts = vec![b"two".to_vec(), b"one".to_vec()];
        let res = Response::stream(move |_| Ok(parts.pop().unwrap_or_default()));
        let mut out = Recorder::default();

        server.send_to(res, &mut out).unwrap();

        assert_eq!(out.chunks.concat(), b"onetwo".to_vec());
        assert_eq!(out.flushes, out.chunks.len());
    }
}
