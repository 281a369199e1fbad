//! HTTP 客户端
//!
//! [`Client`] 是整个库的入口：它持有配置、连接池与传输层，每个请求都在
//! 执行器上的一个后台任务里完成，调用方立即拿到一个 [`ResponseFuture`]。
//!
//! 响应通过 [`AsyncHandler`] 的回调逐步交付；只想要完整响应时使用
//! [`Client::request`]，它内部使用 [`CompletionHandler`]。
//!
//! ## 子模块结构
//!
//! - `config`：客户端级配置
//! - `handler`：回调协议
//! - `future`：请求句柄、取消与超时
//! - `exec`：单个请求的状态机（连接、写请求、读响应、重定向、重试）
//! - `redirect` / `retry`：重定向改写规则与重试判定
//! - `resumable`：断点续传

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use http::Method;

pub use self::config::{ClientConfig, CloseDelimited};
pub use self::future::{AbortHandle, ResponseFuture};
pub use self::handler::{AsyncHandler, CompletionHandler, ConnectionEvents, State};
pub use self::resumable::{
    FileListener, FileStore, ResumableHandler, ResumableIndex, ResumableListener, ResumableStore,
};

use self::future::Shared;
use crate::common::exec::{BoxSendFuture, Exec};
use crate::common::time::Time;
use crate::pool::{self, DefaultKeepAliveStrategy, KeepAliveStrategy, Partitioning, PerHost, Pool};
use crate::proto::h1::Conn;
use crate::proxy::ProxySelector;
use crate::request::{Request, RequestBuilder};
use crate::response::Response;
use crate::rt::{Executor, Timer, Transport};

mod config;
mod exec;
mod future;
mod handler;
mod redirect;
mod resumable;
mod retry;

#[cfg(test)]
mod tests;

/// 异步 HTTP 客户端。
///
/// 克隆开销很小，克隆出的句柄共享同一个连接池。
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientRef>,
}

pub(crate) struct ClientRef {
    pub(crate) config: ClientConfig,
    pub(crate) pool: Pool<Conn>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) exec: Exec,
    pub(crate) time: Time,
    pub(crate) proxy_selector: Option<Arc<dyn ProxySelector>>,
    pub(crate) keep_alive: Arc<dyn KeepAliveStrategy>,
    pub(crate) partitioning: Arc<dyn Partitioning>,
    closed: AtomicBool,
    sweeper: Once,
}

impl ClientRef {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

cfg_tokio! {
    impl Client {
        /// 使用 tokio 执行器、tokio 定时器与明文 TCP 传输的默认客户端。
        ///
        /// 需要在 tokio 运行时中发起请求。
        pub fn new() -> Client {
            Client::builder().build(crate::rt::tokio::TcpTransport::new())
        }

        /// 预先配置好 tokio 执行器与定时器的构建器。
        pub fn builder() -> Builder {
            let mut builder = Builder::new(crate::rt::tokio::TokioExecutor);
            builder.timer(crate::rt::tokio::TokioTimer);
            builder
        }
    }

    impl Default for Client {
        fn default() -> Client {
            Client::new()
        }
    }
}

impl Client {
    /// 发起请求，响应交给 `handler`。
    ///
    /// 请求在后台执行；返回的 future 在 `handler.on_completed` 返回后，或者
    /// 请求失败后完成。丢弃它不会取消请求，取消请用 [`ResponseFuture::cancel`]。
    pub fn execute<H>(&self, request: Request, handler: H) -> ResponseFuture<H::Output>
    where
        H: AsyncHandler,
    {
        let inner = &self.inner;
        inner.sweeper.call_once(|| inner.pool.spawn_idle_sweeper(&inner.exec));

        let shared = Shared::new(inner.time.clone());
        let fut = exec::execute(inner.clone(), request, handler, shared.clone());
        inner.exec.execute(fut);
        ResponseFuture::new(shared)
    }

    /// 发起请求并收集完整响应。
    pub fn request(&self, request: Request) -> ResponseFuture<Response> {
        self.execute(request, CompletionHandler::new())
    }

    /// 按客户端配置准备一个请求构建器。
    pub fn prepare(&self, method: Method, url: impl Into<String>) -> RequestBuilder {
        let mut builder = RequestBuilder::new(method, url);
        if self.inner.config.disable_url_encoding {
            builder.disable_url_encoding(true);
        }
        builder
    }

    /// 执行一个现成的请求构建器。构建失败时返回一个立即失败的 future。
    pub fn execute_builder<H>(&self, builder: &RequestBuilder, handler: H) -> ResponseFuture<H::Output>
    where
        H: AsyncHandler,
    {
        match builder.build() {
            Ok(request) => self.execute(request, handler),
            Err(err) => {
                let mut handler = handler;
                handler.on_throwable(&err);
                ResponseFuture::error(err)
            }
        }
    }

    /// 关闭客户端：拒绝新请求，关闭所有空闲连接，并中止仍绑定在连接上的请求。
    ///
    /// 重复调用是无操作。
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("closing client");
        self.inner.pool.close();
    }

    /// 客户端是否已经关闭。
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// 客户端配置。
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// 当前打开的连接数（空闲与使用中）。
    pub fn open_connections(&self) -> usize {
        self.inner.pool.total_connections()
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.inner.config)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// 客户端构建器。
pub struct Builder {
    exec: Exec,
    time: Time,
    config: ClientConfig,
    pool: pool::Config,
    proxy_selector: Option<Arc<dyn ProxySelector>>,
    keep_alive: Arc<dyn KeepAliveStrategy>,
    partitioning: Arc<dyn Partitioning>,
}

impl Builder {
    /// 使用给定的执行器创建构建器。没有设置定时器时，所有超时都不生效。
    pub fn new<E>(executor: E) -> Builder
    where
        E: Executor<BoxSendFuture> + Send + Sync + 'static,
    {
        Builder {
            exec: Exec::new(executor),
            time: Time::Empty,
            config: ClientConfig::default(),
            pool: pool::Config::default(),
            proxy_selector: None,
            keep_alive: Arc::new(DefaultKeepAliveStrategy),
            partitioning: Arc::new(PerHost),
        }
    }

    /// 设置定时器。
    pub fn timer<M>(&mut self, timer: M) -> &mut Self
    where
        M: Timer + Send + Sync + 'static,
    {
        self.time = Time::new(timer);
        self
    }

    /// 整体替换客户端配置。
    pub fn config(&mut self, config: ClientConfig) -> &mut Self {
        self.config = config;
        self
    }

    /// 建立连接的超时。默认 5 秒。
    pub fn connect_timeout(&mut self, timeout: Option<Duration>) -> &mut Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// 整个请求的超时。默认 60 秒。
    pub fn request_timeout(&mut self, timeout: Option<Duration>) -> &mut Self {
        self.config.request_timeout = timeout;
        self
    }

    /// 读进展超时。默认 60 秒。
    pub fn read_timeout(&mut self, timeout: Option<Duration>) -> &mut Self {
        self.config.read_timeout = timeout;
        self
    }

    /// 是否跟随重定向。默认不跟随。
    pub fn follow_redirect(&mut self, follow: bool) -> &mut Self {
        self.config.follow_redirect = follow;
        self
    }

    /// 重定向次数上限。默认 5。
    pub fn max_redirects(&mut self, max: u32) -> &mut Self {
        self.config.max_redirects = max;
        self
    }

    /// 301/302 是否保留原方法。
    pub fn strict_302_handling(&mut self, strict: bool) -> &mut Self {
        self.config.strict_302_handling = strict;
        self
    }

    /// 重试次数上限。默认 5。
    pub fn max_request_retry(&mut self, max: u32) -> &mut Self {
        self.config.max_request_retry = max;
        self
    }

    /// 是否保持连接。默认开启。
    pub fn keep_alive(&mut self, keep_alive: bool) -> &mut Self {
        self.config.keep_alive = keep_alive;
        self
    }

    /// 默认的 `User-Agent`，`None` 表示不发送。
    pub fn user_agent(&mut self, user_agent: Option<String>) -> &mut Self {
        self.config.user_agent = user_agent;
        self
    }

    /// 连接关闭分隔的报文体的处理方式。
    pub fn close_delimited_body(&mut self, policy: CloseDelimited) -> &mut Self {
        self.config.close_delimited_body = policy;
        self
    }

    /// 响应头的最大字节数。
    pub fn max_response_head_size(&mut self, max: usize) -> &mut Self {
        self.config.max_response_head_size = max;
        self
    }

    /// 让 [`Client::prepare`] 创建的请求不编码查询参数。
    pub fn disable_url_encoding(&mut self, disable: bool) -> &mut Self {
        self.config.disable_url_encoding = disable;
        self
    }

    /// 整体替换连接池配置。
    pub fn pool_config(&mut self, config: pool::Config) -> &mut Self {
        self.pool = config;
        self
    }

    /// 全局连接数上限。
    pub fn max_connections(&mut self, max: Option<usize>) -> &mut Self {
        self.pool.max_connections = max;
        self
    }

    /// 每个分区的连接数上限。
    pub fn max_connections_per_host(&mut self, max: Option<usize>) -> &mut Self {
        self.pool.max_connections_per_host = max;
        self
    }

    /// 空闲连接的存活时间。默认 60 秒。
    pub fn pooled_connection_idle_timeout(&mut self, timeout: Option<Duration>) -> &mut Self {
        self.pool.idle_timeout = timeout;
        self
    }

    /// 连接的最长寿命。
    pub fn connection_ttl(&mut self, ttl: Option<Duration>) -> &mut Self {
        self.pool.ttl = ttl;
        self
    }

    /// 连接数达到上限时立即失败，而不是等待。
    pub fn acquire_fail_fast(&mut self, fail_fast: bool) -> &mut Self {
        self.pool.fail_fast = fail_fast;
        self
    }

    /// TLS 连接是否入池复用。
    pub fn pool_tls(&mut self, pool_tls: bool) -> &mut Self {
        self.pool.pool_tls = pool_tls;
        self
    }

    /// 客户端级代理选择器。请求上显式设置的代理优先。
    pub fn proxy_selector<S: ProxySelector>(&mut self, selector: S) -> &mut Self {
        self.proxy_selector = Some(Arc::new(selector));
        self
    }

    /// 保持连接策略。
    pub fn keep_alive_strategy<S: KeepAliveStrategy>(&mut self, strategy: S) -> &mut Self {
        self.keep_alive = Arc::new(strategy);
        self
    }

    /// 默认的连接池分区策略。
    pub fn partitioning<P: Partitioning>(&mut self, partitioning: P) -> &mut Self {
        self.partitioning = Arc::new(partitioning);
        self
    }

    /// 使用 `transport` 构建客户端。
    pub fn build<T: Transport>(&self, transport: T) -> Client {
        Client {
            inner: Arc::new(ClientRef {
                config: self.config.clone(),
                pool: Pool::with_time(self.pool.clone(), self.time.clone()),
                transport: Arc::new(transport),
                exec: self.exec.clone(),
                time: self.time.clone(),
                proxy_selector: self.proxy_selector.clone(),
                keep_alive: self.keep_alive.clone(),
                partitioning: self.partitioning.clone(),
                closed: AtomicBool::new(false),
                sweeper: Once::new(),
            }),
        }
    }
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .field("proxy", &self.proxy_selector.is_some())
            .finish()
    }
}

