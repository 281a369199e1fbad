use http::{HeaderMap, Version};

use crate::headers;
use crate::request::Request;

/// 每次响应结束后决定连接能否回到池中。
pub trait KeepAliveStrategy: Send + Sync + 'static {
    /// 返回 `false` 时连接会被关闭。
    fn keep_alive(&self, request: &Request, version: Version, response_headers: &HeaderMap) -> bool;
}

/// 默认策略：请求或响应带 `Connection: close`，或 HTTP/1.0 响应没有
/// `Connection: keep-alive`，都不复用。
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultKeepAliveStrategy;

impl KeepAliveStrategy for DefaultKeepAliveStrategy {
    fn keep_alive(&self, request: &Request, version: Version, response_headers: &HeaderMap) -> bool {
        if headers::wants_close(request.headers()) || headers::wants_close(response_headers) {
            return false;
        }
        version != Version::HTTP_10 || headers::wants_keep_alive(response_headers)
    }
}
