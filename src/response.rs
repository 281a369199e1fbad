//! 响应
//!
//! 回调协议按事件逐步交付一条响应：[`ResponseStatus`] 在状态行解析后交付，
//! 头部紧随其后，报文体按到达的顺序分段交付。[`Response`] 是
//! [`CompletionHandler`](crate::client::CompletionHandler) 把这些事件收集起来的结果。

use std::fmt;

use bytes::Bytes;
use http::header::{AsHeaderName, SET_COOKIE};
use http::{HeaderMap, StatusCode, Version};
use url::Url;

use crate::cookie::{self, Cookie};

/// 响应状态行，以及产生它的请求 URI。
#[derive(Clone, Debug)]
pub struct ResponseStatus {
    status: StatusCode,
    version: Version,
    url: Url,
}

impl ResponseStatus {
    pub(crate) fn new(status: StatusCode, version: Version, url: Url) -> ResponseStatus {
        ResponseStatus {
            status,
            version,
            url,
        }
    }

    /// 状态码。
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// 协议版本。
    pub fn version(&self) -> Version {
        self.version
    }

    /// 最终请求的 URI（跟随重定向之后）。
    pub fn url(&self) -> &Url {
        &self.url
    }
}

/// 一条完整收集的响应。
#[derive(Clone)]
pub struct Response {
    status: ResponseStatus,
    headers: HeaderMap,
    body: Bytes,
}

impl Response {
    pub(crate) fn new(status: ResponseStatus, headers: HeaderMap, body: Bytes) -> Response {
        Response {
            status,
            headers,
            body,
        }
    }

    /// 状态码。
    pub fn status(&self) -> StatusCode {
        self.status.status()
    }

    /// 协议版本。
    pub fn version(&self) -> Version {
        self.status.version()
    }

    /// 最终请求的 URI。
    pub fn url(&self) -> &Url {
        self.status.url()
    }

    /// 全部头部。
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// 第一个同名头部的值；不是合法的可见 ASCII 时返回 `None`。
    pub fn header<K: AsHeaderName>(&self, name: K) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// 报文体。
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// 以 UTF-8 解读报文体，非法序列被替换。
    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// 取走报文体。
    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// 是否有非空的报文体。
    pub fn has_body(&self) -> bool {
        !self.body.is_empty()
    }

    /// 解码所有 `Set-Cookie` 头部，畸形的条目被跳过。
    pub fn cookies(&self) -> Vec<Cookie> {
        set_cookies(&self.headers)
    }
}

pub(crate) fn set_cookies(headers: &HeaderMap) -> Vec<Cookie> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(cookie::decode)
        .collect()
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status.status)
            .field("url", &self.status.url.as_str())
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .finish()
    }
}
