//! CGI形式のレスポンス出力

use std::io::{self, Write};

use http::StatusCode;
use log::warn;

use crate::common::utils::{is_header_name_valid, is_header_value_valid};
use crate::server::Transport;

/// `Status: <code> <reason>` 行とヘッダーを書き出す出力先
pub struct CgiTransport<W: Write> {
    out: W,
    headers_sent: bool,
}

impl<W: Write> CgiTransport<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            headers_sent: false,
        }
    }

    /// ヘッダー送信済みの状態から始める（同じ出力への2回目以降の書き出し用）
    pub fn with_headers_sent(mut self, sent: bool) -> Self {
        self.headers_sent = sent;
        self
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Transport for CgiTransport<W> {
    fn headers_sent(&self) -> bool {
        self.headers_sent
    }

    fn send_head(&mut self, status: StatusCode, headers: &[(String, String)]) -> io::Result<()> {
        let reason = status.canonical_reason().unwrap_or("Unknown");
        let mut head = format!("Status: {} {}\r\n", status.as_u16(), reason);
        for (name, value) in headers {
            // Status 行はフレームワーク側で出力する
            if name.eq_ignore_ascii_case("Status") {
                continue;
            }
            if !is_header_name_valid(name) || !is_header_value_valid(value) {
                warn!("Skipping invalid response header {:?}", name);
                continue;
            }
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        head.push_str("\r\n");

        self.headers_sent = true;
        self.out.write_all(head.as_bytes())
    }

    fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.out.write_all(chunk)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}
