//! レスポンスの出力先

use std::io;

use http::StatusCode;

/// `Server::send_to` が書き込む出力先
///
/// ヘッダーが既に送出済みなら `headers_sent` が true を返し、ヘッダーの書き込みは省略される。
pub trait Transport {
    fn headers_sent(&self) -> bool;

    /// ステータス行とヘッダーを書き込む（値ごとに1行）
    fn send_head(&mut self, status: StatusCode, headers: &[(String, String)]) -> io::Result<()>;

    fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn headers_sent(&self) -> bool {
        (**self).headers_sent()
    }

    fn send_head(&mut self, status: StatusCode, headers: &[(String, String)]) -> io::Result<()> {
        (**self).send_head(status, headers)
    }

    fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        (**self).write_chunk(chunk)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }
}
