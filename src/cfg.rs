//! 条件编译配置宏模块
//!
//! courier 只有两个 feature：`tokio`（内置运行时适配）和 `tracing`（日志转发）。
//! 本模块提供 `cfg_feature!`，为被包裹的每个 item 同时加上 `#[cfg(..)]`
//! 与 docs.rs 上的 `doc(cfg(..))` 标注。
//!
//! 本模块通过 `#[macro_use]` 在 `lib.rs` 中最先被引入，其中的宏在整个 crate 内可用。

/// `cfg_feature!` —— 基础条件编译宏
///
/// 接受一个 `#![meta]` 形式的属性和一组 item，为每个 item 添加：
/// - `#[cfg($meta)]`
/// - `#[cfg_attr(docsrs, doc(cfg($meta)))]`
macro_rules! cfg_feature {
    (
        #![$meta:meta]
        $($item:item)*
    ) => {
        $(
            #[cfg($meta)]
            #[cfg_attr(docsrs, doc(cfg($meta)))]
            $item
        )*
    }
}

/// `cfg_tokio!` —— 仅在启用 `tokio` feature 时编译的代码。
macro_rules! cfg_tokio {
    ($($item:item)*) => {
        cfg_feature! {
            #![feature = "tokio"]
            $($item)*
        }
    }
}
