//! 传输层能力接口
//!
//! courier 不实现套接字、TLS 或事件循环，它只要求外部提供一组最小能力：
//!
//! - 建立到某个 [`Endpoint`] 的字节流（`connect`）
//! - 在已有字节流上完成 TLS 握手（`tls_handshake`）
//! - 通过 tokio 的 `AsyncRead` / `AsyncWrite` 读写；关闭即 drop
//!
//! 另外，[`Resolve`] 允许请求携带自定义的名字解析器，解析结果会被写入
//! `Endpoint::address`，传输层直接按地址连接。

use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};

use futures_util::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};

/// 一条可读写的连接。任何满足约束的类型都自动实现它。
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Connection for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// 类型擦除后的连接。
pub type BoxIo = Box<dyn Connection>;

/// 一次连接所指向的远端：scheme、主机、端口，以及可选的目标地址与本地绑定地址。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    scheme: String,
    host: String,
    port: u16,
    address: Option<SocketAddr>,
    local_address: Option<IpAddr>,
}

impl Endpoint {
    /// 创建一个端点。
    pub fn new(scheme: impl Into<String>, host: impl Into<String>, port: u16) -> Endpoint {
        Endpoint {
            scheme: scheme.into(),
            host: host.into(),
            port,
            address: None,
            local_address: None,
        }
    }

    pub(crate) fn with_address(mut self, address: Option<SocketAddr>) -> Endpoint {
        self.address = address;
        self
    }

    pub(crate) fn with_local_address(mut self, local: Option<IpAddr>) -> Endpoint {
        self.local_address = local;
        self
    }

    /// 小写的 scheme，例如 `http`。
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// 主机名（或字面 IP）。
    pub fn host(&self) -> &str {
        &self.host
    }

    /// 端口。
    pub fn port(&self) -> u16 {
        self.port
    }

    /// 已解析或被覆盖的目标地址。存在时传输层应直接连接该地址。
    pub fn address(&self) -> Option<SocketAddr> {
        self.address
    }

    /// 需要绑定的本地地址。
    pub fn local_address(&self) -> Option<IpAddr> {
        self.local_address
    }

    /// `https` 或 `wss`。
    pub fn is_secure(&self) -> bool {
        matches!(self.scheme.as_str(), "https" | "wss")
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// 外部传输层。
///
/// `connect` 只负责建立 TCP 级别的字节流；对 https 目标，courier 会在需要时
/// （直连或 CONNECT 隧道建立之后）再调用 `tls_handshake`。
pub trait Transport: Send + Sync + 'static {
    /// 建立到 `endpoint` 的连接。
    fn connect(&self, endpoint: &Endpoint) -> BoxFuture<'static, io::Result<BoxIo>>;

    /// 在 `io` 上完成 TLS 握手。默认实现不支持 TLS。
    fn tls_handshake(
        &self,
        io: BoxIo,
        server_name: &str,
    ) -> BoxFuture<'static, io::Result<BoxIo>> {
        let _ = io;
        let msg = format!("no TLS support configured for {}", server_name);
        Box::pin(async move { Err(io::Error::new(io::ErrorKind::Unsupported, msg)) })
    }
}

/// 名字解析器。
pub trait Resolve: Send + Sync + 'static {
    /// 把 `host:port` 解析为一组地址。
    fn resolve(&self, host: &str, port: u16) -> BoxFuture<'static, io::Result<Vec<SocketAddr>>>;
}
