use std::time::Duration;

/// 响应既没有 `Content-Length` 也不是 chunked 编码时的处理方式。
///
/// 这样的报文体只能以连接关闭作为结束，无论哪种策略，连接都不会被复用。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CloseDelimited {
    /// 把 EOF 当作报文体的正常结束。
    #[default]
    Accept,
    /// 以“报文不完整”的协议错误拒绝这类响应。
    Reject,
}

/// 客户端级配置。
///
/// 连接池相关的配置在 [`pool::Config`](crate::pool::Config) 中。
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// 建立连接（含 TLS 握手与 CONNECT 隧道）的超时。
    pub connect_timeout: Option<Duration>,
    /// 整个请求（含重定向与重试）的超时。
    pub request_timeout: Option<Duration>,
    /// 两次读进展之间允许的最长间隔。
    pub read_timeout: Option<Duration>,
    /// 是否跟随重定向。请求可单独覆盖。
    pub follow_redirect: bool,
    /// 重定向次数上限。为 0 时不跟随重定向，3xx 响应直接交给回调。
    pub max_redirects: u32,
    /// 301/302 是否保留原方法与请求体。
    pub strict_302_handling: bool,
    /// 重试次数上限。
    pub max_request_retry: u32,
    /// 是否发送 `Connection: keep-alive` 并复用连接。
    pub keep_alive: bool,
    /// 默认的 `User-Agent`，`None` 表示不发送。
    pub user_agent: Option<String>,
    /// 连接关闭分隔的报文体的处理方式。
    pub close_delimited_body: CloseDelimited,
    /// 响应头的最大字节数。
    pub max_response_head_size: usize,
    /// 禁用查询参数编码，按原样发送。
    pub disable_url_encoding: bool,
}

impl Default for ClientConfig {
    fn default() -> ClientConfig {
        ClientConfig {
            connect_timeout: Some(Duration::from_secs(5)),
            request_timeout: Some(Duration::from_secs(60)),
            read_timeout: Some(Duration::from_secs(60)),
            follow_redirect: false,
            max_redirects: 5,
            strict_302_handling: false,
            max_request_retry: 5,
            keep_alive: true,
            user_agent: Some(concat!("courier/", env!("CARGO_PKG_VERSION")).to_owned()),
            close_delimited_body: CloseDelimited::Accept,
            max_response_head_size: crate::proto::h1::DEFAULT_MAX_HEAD_SIZE,
            disable_url_encoding: false,
        }
    }
}
