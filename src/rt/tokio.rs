//! 基于 tokio 的运行时实现
//!
//! 提供 [`TokioExecutor`]、[`TokioTimer`] 与只支持明文 TCP 的 [`TcpTransport`]。

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use pin_project_lite::pin_project;

use super::{BoxIo, Endpoint, Executor, Sleep, Timer, Transport};

/// 通过 `tokio::spawn` 执行任务。
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioExecutor;

impl<F> Executor<F> for TokioExecutor
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    fn execute(&self, fut: F) {
        ::tokio::spawn(fut);
    }
}

/// 基于 `tokio::time` 的定时器。
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioTimer;

impl Timer for TokioTimer {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Sleep>> {
        Box::pin(TokioSleep {
            inner: ::tokio::time::sleep(duration),
        })
    }

    fn sleep_until(&self, deadline: Instant) -> Pin<Box<dyn Sleep>> {
        Box::pin(TokioSleep {
            inner: ::tokio::time::sleep_until(deadline.into()),
        })
    }

    fn now(&self) -> Instant {
        ::tokio::time::Instant::now().into_std()
    }

    fn reset(&self, sleep: &mut Pin<Box<dyn Sleep>>, new_deadline: Instant) {
        if let Some(sleep) = sleep.as_mut().downcast_mut_pin::<TokioSleep>() {
            sleep.reset(new_deadline)
        } else {
            *sleep = self.sleep_until(new_deadline);
        }
    }
}

pin_project! {
    #[derive(Debug)]
    struct TokioSleep {
        #[pin]
        inner: ::tokio::time::Sleep,
    }
}

impl Future for TokioSleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.project().inner.poll(cx)
    }
}

impl Sleep for TokioSleep {}

impl TokioSleep {
    fn reset(self: Pin<&mut Self>, deadline: Instant) {
        self.project().inner.as_mut().reset(deadline.into());
    }
}

/// 明文 TCP 传输。不支持 TLS，https 目标会以 TLS 错误失败。
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpTransport {
    nodelay: bool,
}

impl TcpTransport {
    /// 创建一个 TCP 传输。
    pub fn new() -> TcpTransport {
        TcpTransport { nodelay: true }
    }

    /// 是否设置 `TCP_NODELAY`，默认开启。
    pub fn set_nodelay(&mut self, nodelay: bool) -> &mut Self {
        self.nodelay = nodelay;
        self
    }
}

impl Transport for TcpTransport {
    fn connect(&self, endpoint: &Endpoint) -> BoxFuture<'static, io::Result<BoxIo>> {
        let endpoint = endpoint.clone();
        let nodelay = self.nodelay;
        Box::pin(async move {
            let addrs: Vec<SocketAddr> = match endpoint.address() {
                Some(addr) => vec![addr],
                None => ::tokio::net::lookup_host((endpoint.host(), endpoint.port()))
                    .await?
                    .collect(),
            };

            let mut last_err = None;
            for addr in addrs {
                match connect_one(addr, &endpoint).await {
                    Ok(stream) => {
                        stream.set_nodelay(nodelay)?;
                        return Ok(Box::new(stream) as BoxIo);
                    }
                    Err(e) => {
                        debug!("connect to {} failed: {}", addr, e);
                        last_err = Some(e);
                    }
                }
            }
            Err(last_err.unwrap_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("no addresses resolved for {}", endpoint.host()),
                )
            }))
        })
    }
}

async fn connect_one(addr: SocketAddr, endpoint: &Endpoint) -> io::Result<::tokio::net::TcpStream> {
    let socket = if addr.is_ipv4() {
        ::tokio::net::TcpSocket::new_v4()?
    } else {
        ::tokio::net::TcpSocket::new_v6()?
    };
    if let Some(local) = endpoint.local_address() {
        socket.bind(SocketAddr::new(local, 0))?;
    }
    socket.connect(addr).await
}
