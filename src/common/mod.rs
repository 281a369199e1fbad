//! courier 内部共用的基础工具。
//!
//! - `exec`：类型擦除的执行器句柄
//! - `time`：定时器句柄

pub(crate) mod exec;
pub(crate) mod time;
