//! 回调协议
//!
//! 一个请求的响应通过 [`AsyncHandler`] 的回调按顺序交付：
//!
//! 1. `on_status_received`：状态行
//! 2. `on_headers_received`：头部
//! 3. `on_body_part_received`：每一段报文体，零次或多次
//! 4. `on_completed` 或 `on_throwable`：二者恰有一个被调用
//!
//! 同一个 handler 上的回调从不并发。任一回调返回 [`State::Abort`] 后不再交付后续的
//! 头部或报文体，连接被关闭（响应可能不完整），然后仍然调用 `on_completed`，
//! 让 handler 收尾。回调返回错误时改为调用 `on_throwable`。
//!
//! 回调返回之前不会继续读取连接，处理慢的 handler 自然形成背压。
//!
//! 需要观察连接生命周期的 handler 可以通过 [`AsyncHandler::connection_events`]
//! 暴露一个 [`ConnectionEvents`]。这些通知只用于观察，不影响控制流。

use std::fmt;
use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use http::HeaderMap;

use crate::error::{BoxError, Error};
use crate::response::{Response, ResponseStatus};
use crate::rt::Endpoint;

/// 回调的控制信号。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// 继续交付。
    Continue,
    /// 停止交付并关闭连接。
    Abort,
}

/// 响应回调。
pub trait AsyncHandler: Send + 'static {
    /// `on_completed` 产出的值，即 [`ResponseFuture`](super::ResponseFuture) 的结果。
    type Output: Send + 'static;

    /// 收到状态行。
    fn on_status_received(&mut self, status: &ResponseStatus) -> Result<State, BoxError>;

    /// 收到全部头部。
    fn on_headers_received(&mut self, headers: &HeaderMap) -> Result<State, BoxError>;

    /// 收到一段报文体。
    fn on_body_part_received(&mut self, part: &Bytes) -> Result<State, BoxError>;

    /// 响应结束，或者某个回调返回了 `Abort`。
    fn on_completed(&mut self) -> Result<Self::Output, BoxError>;

    /// 请求失败。之后不会再有任何回调。
    fn on_throwable(&mut self, error: &Error) {
        let _ = error;
    }

    /// 可选的连接生命周期通知。
    fn connection_events(&mut self) -> Option<&mut dyn ConnectionEvents> {
        None
    }
}

/// 连接生命周期通知。全部方法默认为空操作。
#[allow(unused_variables)]
pub trait ConnectionEvents: Send {
    /// 名字解析完成。
    fn on_hostname_resolved(&mut self, host: &str, addresses: &[SocketAddr]) {}

    /// 即将尝试建立连接。
    fn on_connect_attempt(&mut self, endpoint: &Endpoint) {}

    /// 连接已建立。
    fn on_connection_open(&mut self, endpoint: &Endpoint) {}

    /// 从连接池取到一条空闲连接。
    fn on_connection_pooled(&mut self, connection_id: u64) {}

    /// TLS 握手完成。
    fn on_tls_handshake_completed(&mut self, server_name: &str) {}

    /// 即将发起第 `attempt` 次重试。
    fn on_retry(&mut self, attempt: u32) {}
}

/// 把响应完整收集为 [`Response`]。
#[derive(Default)]
pub struct CompletionHandler {
    status: Option<ResponseStatus>,
    headers: HeaderMap,
    body: BytesMut,
}

impl CompletionHandler {
    /// 创建。
    pub fn new() -> CompletionHandler {
        CompletionHandler::default()
    }
}

impl AsyncHandler for CompletionHandler {
    type Output = Response;

    fn on_status_received(&mut self, status: &ResponseStatus) -> Result<State, BoxError> {
        self.status = Some(status.clone());
        Ok(State::Continue)
    }

    fn on_headers_received(&mut self, headers: &HeaderMap) -> Result<State, BoxError> {
        self.headers = headers.clone();
        Ok(State::Continue)
    }

    fn on_body_part_received(&mut self, part: &Bytes) -> Result<State, BoxError> {
        self.body.extend_from_slice(part);
        Ok(State::Continue)
    }

    fn on_completed(&mut self) -> Result<Response, BoxError> {
        let status = self
            .status
            .take()
            .ok_or("response completed before a status line was received")?;
        Ok(Response::new(
            status,
            std::mem::take(&mut self.headers),
            self.body.split().freeze(),
        ))
    }
}

impl fmt::Debug for CompletionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionHandler")
            .field("status", &self.status)
            .field("buffered", &self.body.len())
            .finish()
    }
}
