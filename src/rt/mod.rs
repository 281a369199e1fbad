//! 运行时抽象组件模块
//!
//! courier 与具体的异步运行时解耦，只依赖本模块定义的几个 trait：
//!
//! - **执行器（Executor）**：为每个请求生成执行任务，也用来运行连接池的空闲清扫任务。
//! - **定时器（Timer）**：连接、请求、读空闲三类超时，以及周期性清扫的节拍。
//! - **传输层（Transport）**：建立连接与 TLS 升级的外部能力。
//! - **解析器（Resolve）**：可选的按请求名字解析。
//!
//! 启用默认的 `tokio` feature 后，[`tokio`] 子模块提供了开箱即用的实现。

mod timer;
mod transport;

pub use self::timer::{Sleep, Timer};
pub use self::transport::{BoxIo, Connection, Endpoint, Resolve, Transport};

cfg_tokio! {
    pub mod tokio;
}

/// Future 执行器 trait。
///
/// # 示例
///
/// ```
/// # use courier::rt::Executor;
/// # use std::future::Future;
/// #[derive(Clone)]
/// struct TokioExecutor;
///
/// impl<F> Executor<F> for TokioExecutor
/// where
///     F: Future + Send + 'static,
///     F::Output: Send + 'static,
/// {
///     fn execute(&self, future: F) {
///         tokio::spawn(future);
///     }
/// }
/// ```
pub trait Executor<Fut> {
    /// 将 future 放入执行器中运行。
    fn execute(&self, fut: Fut);
}
