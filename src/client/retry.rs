//! 重试判定
//!
//! 只有在“请求肯定没被服务端处理”或者“可以安全重发”时才重试：
//!
//! - 建立连接阶段的失败（连接被拒、连接超时）
//! - 一个字节都没写出就遇到 IO 错误
//! - 复用的空闲连接在收到任何响应字节之前失败，且请求体可以重放
//!
//! TLS 失败、连接池耗尽与客户端已关闭从不重试。

use crate::error::Error;

/// 一次尝试在失败时的进展。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Attempt {
    pub(crate) bytes_written: u64,
    pub(crate) response_started: bool,
    pub(crate) reused: bool,
}

pub(crate) fn should_retry(
    err: &Error,
    attempt: Option<Attempt>,
    replayable: bool,
    retries: u32,
    max_retries: u32,
) -> bool {
    if retries >= max_retries {
        return false;
    }
    if err.is_tls() || err.is_pool_exhausted() || err.is_closed() || err.is_canceled() {
        return false;
    }
    if err.is_connect_phase() {
        return true;
    }

    let attempt = match attempt {
        Some(attempt) => attempt,
        None => return false,
    };
    if !(err.is_io() || err.is_incomplete_message()) {
        return false;
    }
    if attempt.bytes_written == 0 {
        return true;
    }
    attempt.reused && !attempt.response_started && replayable
}
