//! courier 错误与结果类型模块
//!
//! 本模块定义了 courier 的核心错误类型 [`Error`]。请求执行过程中可能发生的所有错误
//! （非法请求、连接失败、TLS 失败、超时、协议违规、重定向过多、用户回调失败、
//! 取消以及连接池拒绝）都被统一封装在 `Error` 中。
//!
//! ## 设计
//!
//! - **不透明错误**：`Error` 使用 `Box<ErrorImpl>` 包装内部实现，栈上只占一个指针宽度。
//!   用户通过 `is_*` 方法判断错误类别，内部的 `Kind` 不对外暴露。
//! - **错误链**：通过 `std::error::Error::source()` 暴露底层原因。
//!
//! `InvalidRequest` 在构建请求时同步返回；其余种类都经由 [`ResponseFuture`] 的
//! abort 路径恰好交付一次。
//!
//! [`ResponseFuture`]: crate::client::ResponseFuture

use std::error::Error as StdError;
use std::fmt;

/// courier 方法常用的 Result 类型别名。
pub type Result<T> = std::result::Result<T, Error>;

/// 类型擦除的错误，用户回调通过它报告失败。
pub type BoxError = Box<dyn StdError + Send + Sync>;

type Cause = BoxError;

/// 表示发送 HTTP 请求时可能发生的错误。
///
/// # 格式化
///
/// `Display` 只打印当前层级的错误描述，不包含 source 链。
/// 描述文本的具体内容不属于稳定 API，**不要依赖它**。
pub struct Error {
    inner: Box<ErrorImpl>,
}

struct ErrorImpl {
    kind: Kind,
    cause: Option<Cause>,
}

/// 错误分类。
#[derive(Debug)]
pub(super) enum Kind {
    /// 请求本身不合法：URI 无法解析、scheme 不受支持等。不会产生任何网络活动。
    InvalidRequest,
    /// DNS、TCP 或代理 CONNECT 阶段的失败。
    Connect,
    /// TLS 握手或证书校验失败。
    Tls,
    /// 连接、请求或读取超时。
    Timeout(TimeoutKind),
    /// 响应报文不合法。
    Parse(Parse),
    /// 报文完整接收之前连接就被关闭了。
    IncompleteMessage,
    /// 重定向次数超过上限。
    TooManyRedirects,
    /// 用户代码返回了错误。
    User(User),
    /// 请求被取消。
    Canceled,
    /// 连接池已满且配置为快速失败。
    PoolExhausted,
    /// 已建立连接上的读写错误。
    Io,
    /// 客户端或连接池已关闭。
    Closed,
}

#[derive(Debug)]
pub(super) enum Parse {
    Status,
    Version,
    Header,
    ContentLength,
    TransferEncoding,
    Chunk,
    TooLarge,
}

#[derive(Debug)]
pub(super) enum User {
    /// 回调（`on_status_received` 等）返回了错误。
    Callback,
    /// 请求体数据源（流、生成器、文件）报告了错误。
    Body,
}

/// 超时发生的阶段。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum TimeoutKind {
    Connect,
    Request,
    Read,
}

/// 作为超时错误的 source，用于 `Error::is_timeout` 的判断。
#[derive(Debug)]
pub(super) struct TimedOut;

impl Error {
    /// 请求在发出之前就被判定为不合法（scheme、URI、cookie 名等）。
    pub fn is_invalid_request(&self) -> bool {
        matches!(self.inner.kind, Kind::InvalidRequest)
    }

    /// 建立连接（DNS、TCP、代理隧道）失败。
    pub fn is_connect(&self) -> bool {
        matches!(self.inner.kind, Kind::Connect)
    }

    /// TLS 握手失败。
    pub fn is_tls(&self) -> bool {
        matches!(self.inner.kind, Kind::Tls)
    }

    /// 连接、请求或读取超时。
    pub fn is_timeout(&self) -> bool {
        matches!(self.inner.kind, Kind::Timeout(_)) || self.find_source::<TimedOut>().is_some()
    }

    /// 对端发送了不合法的报文（状态行、头部、分块编码等）。
    pub fn is_parse(&self) -> bool {
        matches!(
            self.inner.kind,
            Kind::Parse(_) | Kind::IncompleteMessage
        )
    }

    /// 报文完整接收之前连接就被关闭了。
    pub fn is_incomplete_message(&self) -> bool {
        matches!(self.inner.kind, Kind::IncompleteMessage)
    }

    /// 重定向次数超过了上限。
    pub fn is_too_many_redirects(&self) -> bool {
        matches!(self.inner.kind, Kind::TooManyRedirects)
    }

    /// 错误来自用户代码（回调或请求体数据源）。
    pub fn is_user(&self) -> bool {
        matches!(self.inner.kind, Kind::User(_))
    }

    /// 请求被取消。
    pub fn is_canceled(&self) -> bool {
        matches!(self.inner.kind, Kind::Canceled)
    }

    /// 连接池已满且配置为快速失败。
    pub fn is_pool_exhausted(&self) -> bool {
        matches!(self.inner.kind, Kind::PoolExhausted)
    }

    /// 已建立连接上的 I/O 错误。
    pub fn is_io(&self) -> bool {
        matches!(self.inner.kind, Kind::Io)
    }

    /// 客户端或连接池已经关闭。
    pub fn is_closed(&self) -> bool {
        matches!(self.inner.kind, Kind::Closed)
    }

    pub(super) fn new(kind: Kind) -> Error {
        Error {
            inner: Box::new(ErrorImpl { kind, cause: None }),
        }
    }

    pub(super) fn with<C: Into<Cause>>(mut self, cause: C) -> Error {
        self.inner.cause = Some(cause.into());
        self
    }

    pub(crate) fn find_source<E: StdError + 'static>(&self) -> Option<&E> {
        let mut cause = self.source();
        while let Some(err) = cause {
            if let Some(typed) = err.downcast_ref() {
                return Some(typed);
            }
            cause = err.source();
        }

        None
    }

    /// 连接建立阶段（含隧道）失败，且尚未写出任何请求字节。
    pub(crate) fn is_connect_phase(&self) -> bool {
        matches!(
            self.inner.kind,
            Kind::Connect | Kind::Timeout(TimeoutKind::Connect)
        )
    }

    pub(crate) fn new_invalid_request<C: Into<Cause>>(cause: C) -> Error {
        Error::new(Kind::InvalidRequest).with(cause)
    }

    pub(crate) fn new_connect<C: Into<Cause>>(cause: C) -> Error {
        Error::new(Kind::Connect).with(cause)
    }

    pub(crate) fn new_tls<C: Into<Cause>>(cause: C) -> Error {
        Error::new(Kind::Tls).with(cause)
    }

    pub(crate) fn new_connect_timeout() -> Error {
        Error::new(Kind::Timeout(TimeoutKind::Connect)).with(TimedOut)
    }

    pub(crate) fn new_request_timeout() -> Error {
        Error::new(Kind::Timeout(TimeoutKind::Request)).with(TimedOut)
    }

    pub(crate) fn new_read_timeout() -> Error {
        Error::new(Kind::Timeout(TimeoutKind::Read)).with(TimedOut)
    }

    pub(crate) fn new_incomplete() -> Error {
        Error::new(Kind::IncompleteMessage)
    }

    pub(crate) fn new_too_large() -> Error {
        Error::new(Kind::Parse(Parse::TooLarge))
    }

    pub(crate) fn new_too_many_redirects(max: u32) -> Error {
        Error::new(Kind::TooManyRedirects).with(format!("maximum redirects ({}) exceeded", max))
    }

    pub(crate) fn new_user_callback<C: Into<Cause>>(cause: C) -> Error {
        Error::new(Kind::User(User::Callback)).with(cause)
    }

    pub(crate) fn new_user_body<C: Into<Cause>>(cause: C) -> Error {
        Error::new(Kind::User(User::Body)).with(cause)
    }

    pub(crate) fn new_canceled() -> Error {
        Error::new(Kind::Canceled)
    }

    pub(crate) fn new_pool_exhausted() -> Error {
        Error::new(Kind::PoolExhausted)
    }

    pub(crate) fn new_io(cause: std::io::Error) -> Error {
        Error::new(Kind::Io).with(cause)
    }

    pub(crate) fn new_closed() -> Error {
        Error::new(Kind::Closed)
    }

    fn description(&self) -> &str {
        match self.inner.kind {
            Kind::InvalidRequest => "invalid request",
            Kind::Connect => "error trying to connect",
            Kind::Tls => "tls handshake failed",
            Kind::Timeout(TimeoutKind::Connect) => "connect timed out",
            Kind::Timeout(TimeoutKind::Request) => "request timed out",
            Kind::Timeout(TimeoutKind::Read) => "read timed out",
            Kind::Parse(Parse::Status) => "invalid HTTP status-code parsed",
            Kind::Parse(Parse::Version) => "invalid HTTP version parsed",
            Kind::Parse(Parse::Header) => "invalid HTTP header parsed",
            Kind::Parse(Parse::ContentLength) => "invalid content-length parsed",
            Kind::Parse(Parse::TransferEncoding) => "unexpected transfer-encoding parsed",
            Kind::Parse(Parse::Chunk) => "invalid chunked body framing",
            Kind::Parse(Parse::TooLarge) => "message head is too large",
            Kind::IncompleteMessage => "connection closed before message completed",
            Kind::TooManyRedirects => "too many redirects",
            Kind::User(User::Callback) => "error from user's handler callback",
            Kind::User(User::Body) => "error from user's request body",
            Kind::Canceled => "operation was canceled",
            Kind::PoolExhausted => "connection pool exhausted",
            Kind::Io => "connection error",
            Kind::Closed => "client closed",
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_tuple("courier::Error");
        f.field(&self.inner.kind);
        if let Some(ref cause) = self.inner.cause {
            f.field(cause);
        }
        f.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .cause
            .as_ref()
            .map(|cause| &**cause as &(dyn StdError + 'static))
    }
}

#[doc(hidden)]
impl From<Parse> for Error {
    fn from(err: Parse) -> Error {
        Error::new(Kind::Parse(err))
    }
}

impl From<httparse::Error> for Parse {
    fn from(err: httparse::Error) -> Parse {
        match err {
            httparse::Error::HeaderName
            | httparse::Error::HeaderValue
            | httparse::Error::NewLine
            | httparse::Error::Token => Parse::Header,
            httparse::Error::Status => Parse::Status,
            httparse::Error::TooManyHeaders => Parse::TooLarge,
            httparse::Error::Version => Parse::Version,
        }
    }
}

impl fmt::Display for TimedOut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("operation timed out")
    }
}

impl StdError for TimedOut {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem;

    fn assert_send_sync<T: Send + Sync + 'static>() {}

    #[test]
    fn error_satisfies_send_sync() {
        assert_send_sync::<Error>()
    }

    #[test]
    fn error_size_of() {
        assert_eq!(mem::size_of::<Error>(), mem::size_of::<usize>());
    }

    #[test]
    fn timeout_errors_carry_timed_out_source() {
        for err in [
            Error::new_connect_timeout(),
            Error::new_request_timeout(),
            Error::new_read_timeout(),
        ] {
            assert!(err.is_timeout());
            assert!(err.find_source::<TimedOut>().is_some());
        }
        assert!(Error::new_connect_timeout().is_connect_phase());
        assert!(!Error::new_read_timeout().is_connect_phase());
    }

    #[test]
    fn nested_cause_is_found() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = Error::new_user_callback(Error::new_io(io));
        assert!(err.is_user());
        assert!(err.find_source::<std::io::Error>().is_some());
    }

    #[test]
    fn httparse_errors_map_to_parse_kinds() {
        let err: Error = Parse::from(httparse::Error::Status).into();
        assert!(err.is_parse());
        assert_eq!(err.to_string(), "invalid HTTP status-code parsed");
    }
}
