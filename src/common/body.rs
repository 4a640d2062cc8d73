//! レスポンスボディ（バッファ済み / ストリーム）

use std::fmt;
use std::io::{self, Read};

use bytes::Bytes;

/// レスポンスボディ
pub enum Body {
    /// サイズが確定しているバッファ
    Full(Bytes),
    /// 送信時に逐次読み出すストリーム
    Stream(Box<dyn Read + Send>),
}

impl Body {
    pub fn empty() -> Self {
        Body::Full(Bytes::new())
    }

    /// チャンクを返すコールバックからストリームを作る
    ///
    /// コールバックは要求サイズを受け取り、空のチャンクを返した時点で終端とみなす。
    pub fn from_callback<F>(callback: F) -> Self
    where
        F: FnMut(usize) -> io::Result<Vec<u8>> + Send + 'static,
    {
        Body::Stream(Box::new(CallbackReader {
            callback,
            pending: Vec::new(),
            offset: 0,
            finished: false,
        }))
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Body::Stream(_))
    }

    /// バッファ済みならその内容を返す
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Body::Full(bytes) => Some(bytes),
            Body::Stream(_) => None,
        }
    }

    /// バッファ済みのサイズ（ストリームは不明）
    pub fn len(&self) -> Option<usize> {
        self.as_bytes().map(Bytes::len)
    }
}

impl Default for Body {
    fn default() -> Self {
        Body::empty()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Full(bytes) => f.debug_tuple("Full").field(bytes).finish(),
            Body::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::Full(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::Full(Bytes::from(bytes))
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::Full(Bytes::from(text))
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Body::Full(Bytes::from_static(text.as_bytes()))
    }
}

impl From<&'static [u8]> for Body {
    fn from(bytes: &'static [u8]) -> Self {
        Body::Full(Bytes::from_static(bytes))
    }
}

struct CallbackReader<F> {
    callback: F,
    pending: Vec<u8>,
    offset: usize,
    finished: bool,
}

impl<F> Read for CallbackReader<F>
where
    F: FnMut(usize) -> io::Result<Vec<u8>>,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.offset >= self.pending.len() {
            if self.finished {
                return Ok(0);
            }
            self.pending = (self.callback)(buf.len())?;
            self.offset = 0;
            if self.pending.is_empty() {
                self.finished = true;
                return Ok(0);
            }
        }
        let n = (self.pending.len() - self.offset).min(buf.len());
        buf[..n].copy_from_slice(&self.pending[self.offset..self.offset + n]);
        self.offset += n;
        Ok(n)
    }
}
