//! 日志追踪（tracing）宏模块
//!
//! 对 `tracing` crate 的日志宏做条件包装：
//!
//! 1. 启用 `tracing` feature 时，宏展开为实际的 `tracing::*` 调用
//! 2. 未启用时，宏展开为空操作
//!
//! 本模块紧跟 `cfg` 之后以 `#[macro_use]` 引入，crate 内任何位置都可以直接使用
//! `trace!`、`debug!`、`warn!` 等宏。courier 自身从不安装 subscriber，
//! 是否输出日志完全由使用方决定。

// 提供完整的一组宏，即使某些宏当前未被使用。
#![allow(unused_macros)]

/// `debug!` —— 调试级别日志宏
macro_rules! debug {
    ($($arg:tt)+) => {
        #[cfg(feature = "tracing")]
        {
            tracing::debug!($($arg)+);
        }
    }
}

/// `debug_span!` —— 创建并进入一个调试级别的 span
///
/// 整个宏体被包裹在块中，未启用 tracing 时展开为 `()`。
macro_rules! debug_span {
    ($($arg:tt)*) => {
        {
            #[cfg(feature = "tracing")]
            {
                let _span = tracing::debug_span!($($arg)+);
                _span.entered()
            }
        }
    }
}

/// `error!` —— 错误级别日志宏
macro_rules! error {
    ($($arg:tt)*) => {
        #[cfg(feature = "tracing")]
        {
            tracing::error!($($arg)+);
        }
    }
}

/// `info!` —— 信息级别日志宏
macro_rules! info {
    ($($arg:tt)*) => {
        #[cfg(feature = "tracing")]
        {
            tracing::info!($($arg)+);
        }
    }
}

/// `trace!` —— 追踪级别日志宏
///
/// 最细粒度的日志级别，状态机的每一次阶段切换都通过它记录。
macro_rules! trace {
    ($($arg:tt)*) => {
        #[cfg(feature = "tracing")]
        {
            tracing::trace!($($arg)+);
        }
    }
}

/// `trace_span!` —— 创建并进入一个追踪级别的 span
macro_rules! trace_span {
    ($($arg:tt)*) => {
        {
            #[cfg(feature = "tracing")]
            {
                let _span = tracing::trace_span!($($arg)+);
                _span.entered()
            }
        }
    }
}

/// `warn!` —— 警告级别日志宏
macro_rules! warn {
    ($($arg:tt)*) => {
        #[cfg(feature = "tracing")]
        {
            tracing::warn!($($arg)+);
        }
    }
}
