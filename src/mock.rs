//! 测试用的脚本化传输层。
//!
//! 每次 `connect` 都创建一对内存管道，服务端一侧在后台任务里逐个读取请求，
//! 记录下来，再按测试给出的脚本回应。TLS 握手直接放行。

#![allow(dead_code)]

use std::io;
use std::sync::{Arc, Mutex};

use bytes::{Buf, Bytes, BytesMut};
use futures_util::future::BoxFuture;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use crate::rt::{BoxIo, Endpoint, Transport};

/// 服务端收到的一个请求。
#[derive(Clone, Debug)]
pub(crate) struct Recorded {
    pub(crate) endpoint: String,
    pub(crate) connection: usize,
    pub(crate) method: String,
    pub(crate) target: String,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: Bytes,
}

impl Recorded {
    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// 对一个请求的回应。
pub(crate) enum Reply {
    /// 写出这些字节，连接保持打开。
    Bytes(Bytes),
    /// 写出这些字节后关闭连接。
    Close(Bytes),
    /// 不回应，直接关闭连接。
    Reset,
    /// 永远不回应。
    Stall,
}

pub(crate) fn ok(body: &str) -> Reply {
    Reply::Bytes(Bytes::from(format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    )))
}

pub(crate) fn status(code: u16, extra_headers: &str) -> Reply {
    Reply::Bytes(Bytes::from(format!(
        "HTTP/1.1 {} X\r\n{}Content-Length: 0\r\n\r\n",
        code, extra_headers
    )))
}

type Script = dyn Fn(&Recorded) -> Reply + Send + Sync;

struct MockState {
    script: Box<Script>,
    requests: Mutex<Vec<Recorded>>,
    endpoints: Mutex<Vec<Endpoint>>,
    tls: Mutex<Vec<String>>,
    fail_connects: Mutex<usize>,
}

#[derive(Clone)]
pub(crate) struct MockTransport {
    state: Arc<MockState>,
}

impl MockTransport {
    /// 对每个请求都回应 200 的传输层。
    pub(crate) fn new() -> MockTransport {
        MockTransport::script(|_| ok(""))
    }

    pub(crate) fn script<F>(script: F) -> MockTransport
    where
        F: Fn(&Recorded) -> Reply + Send + Sync + 'static,
    {
        MockTransport {
            state: Arc::new(MockState {
                script: Box::new(script),
                requests: Mutex::new(Vec::new()),
                endpoints: Mutex::new(Vec::new()),
                tls: Mutex::new(Vec::new()),
                fail_connects: Mutex::new(0),
            }),
        }
    }

    /// 接下来的 `n` 次连接以“连接被拒”失败。
    pub(crate) fn fail_connects(&self, n: usize) {
        *self.state.fail_connects.lock().unwrap() = n;
    }

    pub(crate) fn connects(&self) -> usize {
        self.state.endpoints.lock().unwrap().len()
    }

    pub(crate) fn endpoints(&self) -> Vec<Endpoint> {
        self.state.endpoints.lock().unwrap().clone()
    }

    pub(crate) fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().unwrap().clone()
    }

    pub(crate) fn tls_names(&self) -> Vec<String> {
        self.state.tls.lock().unwrap().clone()
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport").finish()
    }
}

impl Transport for MockTransport {
    fn connect(&self, endpoint: &Endpoint) -> BoxFuture<'static, io::Result<BoxIo>> {
        let state = self.state.clone();
        let endpoint = endpoint.clone();
        Box::pin(async move {
            let connection = {
                let mut endpoints = state.endpoints.lock().unwrap();
                endpoints.push(endpoint.clone());
                endpoints.len()
            };
            {
                let mut failing = state.fail_connects.lock().unwrap();
                if *failing > 0 {
                    *failing -= 1;
                    return Err(io::ErrorKind::ConnectionRefused.into());
                }
            }
            let (client, server) = tokio::io::duplex(64 * 1024);
            let name = format!("{}:{}", endpoint.host(), endpoint.port());
            tokio::spawn(serve(server, name, connection, state));
            Ok(Box::new(client) as BoxIo)
        })
    }

    fn tls_handshake(&self, io: BoxIo, server_name: &str) -> BoxFuture<'static, io::Result<BoxIo>> {
        self.state.tls.lock().unwrap().push(server_name.to_owned());
        Box::pin(async move { Ok(io) })
    }
}

async fn serve(mut io: DuplexStream, endpoint: String, connection: usize, state: Arc<MockState>) {
    let mut buf = BytesMut::new();
    loop {
        let recorded = match read_request(&mut io, &mut buf, &endpoint, connection).await {
            Some(recorded) => recorded,
            None => return,
        };
        let reply = (state.script)(&recorded);
        state.requests.lock().unwrap().push(recorded);
        match reply {
            Reply::Bytes(bytes) => {
                if io.write_all(&bytes).await.is_err() {
                    return;
                }
            }
            Reply::Close(bytes) => {
                let _ = io.write_all(&bytes).await;
                let _ = io.shutdown().await;
                return;
            }
            Reply::Reset => return,
            Reply::Stall => std::future::pending::<()>().await,
        }
    }
}

async fn fill(io: &mut DuplexStream, buf: &mut BytesMut) -> bool {
    matches!(io.read_buf(buf).await, Ok(n) if n > 0)
}

async fn read_request(
    io: &mut DuplexStream,
    buf: &mut BytesMut,
    endpoint: &str,
    connection: usize,
) -> Option<Recorded> {
    let (method, target, headers) = loop {
        let parsed = {
            let mut slots = [httparse::EMPTY_HEADER; 64];
            let mut req = httparse::Request::new(&mut slots);
            match req.parse(&buf[..]) {
                Ok(httparse::Status::Complete(n)) => Some((
                    n,
                    req.method.unwrap_or_default().to_owned(),
                    req.path.unwrap_or_default().to_owned(),
                    req.headers
                        .iter()
                        .map(|h| {
                            (
                                h.name.to_ascii_lowercase(),
                                String::from_utf8_lossy(h.value).into_owned(),
                            )
                        })
                        .collect::<Vec<_>>(),
                )),
                Ok(httparse::Status::Partial) => None,
                Err(_) => return None,
            }
        };
        match parsed {
            Some((n, method, target, headers)) => {
                buf.advance(n);
                break (method, target, headers);
            }
            None => {
                if !fill(io, buf).await {
                    return None;
                }
            }
        }
    };

    let find = |name: &str| {
        headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
    };
    let body = if find("transfer-encoding").map_or(false, |v| v.contains("chunked")) {
        read_chunked(io, buf).await?
    } else {
        let len: usize = find("content-length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0);
        while buf.len() < len {
            if !fill(io, buf).await {
                return None;
            }
        }
        buf.split_to(len).freeze()
    };

    Some(Recorded {
        endpoint: endpoint.to_owned(),
        connection,
        method,
        target,
        headers,
        body,
    })
}

async fn read_chunked(io: &mut DuplexStream, buf: &mut BytesMut) -> Option<Bytes> {
    let mut body = BytesMut::new();
    loop {
        let line_end = loop {
            if let Some(pos) = buf.windows(2).position(|w| w == b"\r\n") {
                break pos;
            }
            if !fill(io, buf).await {
                return None;
            }
        };
        let size_line = String::from_utf8_lossy(&buf[..line_end]).into_owned();
        let size = usize::from_str_radix(size_line.split(';').next()?.trim(), 16).ok()?;
        while buf.len() < line_end + 2 + size + 2 {
            if !fill(io, buf).await {
                return None;
            }
        }
        buf.advance(line_end + 2);
        body.extend_from_slice(&buf[..size]);
        buf.advance(size + 2);
        if size == 0 {
            return Some(body.freeze());
        }
    }
}
