//! HTTP/1.1 连接。
//!
//! `Conn` 包装一条已建立的连接（可能已经过 TLS 升级或 CONNECT 隧道），
//! 在其上一次处理一个请求-响应事务：
//!
//! - 写：请求头与请求体逐段写出，同时统计本次事务实际写出的字节数，
//!   供重试策略判断“请求是否已经上线”
//! - 读：带缓冲地读取响应头，随后在解码器的驱动下逐段交付报文体
//!
//! 事务结束后，读缓冲区里不应残留任何字节，否则连接不再可信，不能复用。

use std::fmt;
use std::io;

use bytes::{Bytes, BytesMut};
use http::Method;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::role::{self, ParsedResponse};
use super::Decoder;
use crate::client::CloseDelimited;
use crate::rt::BoxIo;

const INIT_BUFFER_SIZE: usize = 8192;

pub(crate) struct Conn {
    io: BoxIo,
    read_buf: BytesMut,
    /// 本次事务写出的字节数。
    written: u64,
    /// 本次事务是否已经收到任何响应字节。
    read_started: bool,
}

impl Conn {
    pub(crate) fn new(io: BoxIo) -> Conn {
        Conn {
            io,
            read_buf: BytesMut::with_capacity(INIT_BUFFER_SIZE),
            written: 0,
            read_started: false,
        }
    }

    /// 交出底层连接，用于在 CONNECT 隧道之上做 TLS 握手。
    pub(crate) fn into_io(self) -> (BoxIo, Bytes) {
        (self.io, self.read_buf.freeze())
    }

    /// 开始一个新的事务。
    pub(crate) fn begin(&mut self) {
        self.written = 0;
        self.read_started = false;
    }

    pub(crate) fn bytes_written(&self) -> u64 {
        self.written
    }

    pub(crate) fn response_started(&self) -> bool {
        self.read_started
    }

    /// 读缓冲区为空，连接处在报文边界上。
    pub(crate) fn is_clean(&self) -> bool {
        self.read_buf.is_empty()
    }

    pub(crate) async fn write_all(&mut self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            let n = self.io.write(buf).await?;
            if n == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }
            self.written += n as u64;
            buf = &buf[n..];
        }
        Ok(())
    }

    pub(crate) async fn flush(&mut self) -> io::Result<()> {
        self.io.flush().await
    }

    async fn fill(&mut self) -> crate::Result<usize> {
        if self.read_buf.capacity() - self.read_buf.len() < INIT_BUFFER_SIZE {
            self.read_buf.reserve(INIT_BUFFER_SIZE);
        }
        let n = self
            .io
            .read_buf(&mut self.read_buf)
            .await
            .map_err(crate::Error::new_io)?;
        if n > 0 {
            self.read_started = true;
        }
        trace!("received {} bytes", n);
        Ok(n)
    }

    /// 读取一条最终响应的头部。
    pub(crate) async fn read_head(
        &mut self,
        method: &Method,
        close_delimited: CloseDelimited,
        max_head: usize,
    ) -> crate::Result<ParsedResponse> {
        loop {
            if let Some(parsed) =
                role::parse_response(&mut self.read_buf, method, close_delimited, max_head)?
            {
                return Ok(parsed);
            }
            if self.fill().await? == 0 {
                debug!(
                    "connection closed before response head ({} bytes buffered)",
                    self.read_buf.len()
                );
                return Err(crate::Error::new_incomplete());
            }
        }
    }

    /// 读取下一段报文体。返回 `None` 表示报文体已经结束。
    pub(crate) async fn read_body(&mut self, decoder: &mut Decoder) -> crate::Result<Option<Bytes>> {
        loop {
            if decoder.is_eof() {
                return Ok(None);
            }
            if let Some(data) = decoder.decode(&mut self.read_buf)? {
                return Ok(Some(data));
            }
            if decoder.is_eof() {
                return Ok(None);
            }
            if self.fill().await? == 0 {
                decoder.on_eof()?;
                return Ok(None);
            }
        }
    }
}

impl fmt::Debug for Conn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conn")
            .field("buffered", &self.read_buf.len())
            .field("written", &self.written)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn reads_head_and_chunked_body() {
        let _ = pretty_env_logger::try_init();
        let (client, mut server) = duplex(64);
        let mut conn = Conn::new(Box::new(client));

        tokio::spawn(async move {
            server
                .write_all(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n")
                .await
                .unwrap();
            server.write_all(b"3\r\nabc\r\n").await.unwrap();
            server.write_all(b"2\r\nde\r\n0\r\n\r\n").await.unwrap();
            // keep the stream open
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        });

        conn.begin();
        let mut head = conn
            .read_head(&Method::GET, CloseDelimited::Accept, 1024)
            .await
            .unwrap();
        assert!(conn.response_started());
        let mut body = Vec::new();
        while let Some(chunk) = conn.read_body(&mut head.decoder).await.unwrap() {
            body.extend_from_slice(&chunk);
        }
        assert_eq!(body, b"abcde");
        assert!(conn.is_clean());
    }

    #[tokio::test]
    async fn counts_written_bytes_per_transaction() {
        let io = tokio_test::io::Builder::new()
            .write(b"GET / HTTP/1.1\r\n\r\n")
            .read(b"HTTP/1.1 204 No Content\r\n\r\n")
            .write(b"HEAD / HTTP/1.1\r\n\r\n")
            .read(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\n")
            .build();
        let mut conn = Conn::new(Box::new(io));

        conn.begin();
        conn.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        conn.flush().await.unwrap();
        assert_eq!(conn.bytes_written(), 18);
        let mut head = conn
            .read_head(&Method::GET, CloseDelimited::Accept, 1024)
            .await
            .unwrap();
        assert_eq!(head.status, http::StatusCode::NO_CONTENT);
        assert!(conn.read_body(&mut head.decoder).await.unwrap().is_none());
        assert!(conn.is_clean());

        conn.begin();
        assert_eq!(conn.bytes_written(), 0);
        assert!(!conn.response_started());
        conn.write_all(b"HEAD / HTTP/1.1\r\n\r\n").await.unwrap();
        assert_eq!(conn.bytes_written(), 19);
        let mut head = conn
            .read_head(&Method::HEAD, CloseDelimited::Accept, 1024)
            .await
            .unwrap();
        assert!(conn.read_body(&mut head.decoder).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eof_before_head_is_incomplete() {
        let (client, server) = duplex(64);
        drop(server);
        let mut conn = Conn::new(Box::new(client));
        let err = conn
            .read_head(&Method::GET, CloseDelimited::Accept, 1024)
            .await
            .unwrap_err();
        assert!(err.is_incomplete_message());
        assert!(!conn.response_started());
    }

    #[tokio::test]
    async fn close_delimited_body_ends_at_eof() {
        let (client, mut server) = duplex(64);
        let mut conn = Conn::new(Box::new(client));
        tokio::spawn(async move {
            server
                .write_all(b"HTTP/1.0 200 OK\r\n\r\nuntil the end")
                .await
                .unwrap();
        });
        let mut head = conn
            .read_head(&Method::GET, CloseDelimited::Accept, 1024)
            .await
            .unwrap();
        let mut body = Vec::new();
        while let Some(chunk) = conn.read_body(&mut head.decoder).await.unwrap() {
            body.extend_from_slice(&chunk);
        }
        assert_eq!(body, b"until the end");
        assert!(!head.reusable);
    }
}
