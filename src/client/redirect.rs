//! 重定向
//!
//! 根据 3xx 响应生成下一跳请求。方法改写规则：
//!
//! - 303：除 HEAD 外一律改为 GET
//! - 301/302：POST 改为 GET，除非开启了严格模式
//! - 307/308：保留原方法与请求体
//!
//! 改写为 GET 时丢弃请求体及描述它的头部。跨源时丢弃认证信息。
//! 响应里的 `Set-Cookie` 合并进下一跳的 cookie。

use http::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, HOST, LOCATION, TRANSFER_ENCODING};
use http::{HeaderMap, Method, StatusCode};

use crate::error::Error;
use crate::request::{uri, Body, Request};
use crate::response;

pub(crate) fn is_redirect(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
}

/// 生成下一跳请求。没有 `Location` 时返回 `None`，响应按原样交付。
pub(crate) fn follow(
    request: &Request,
    status: StatusCode,
    headers: &HeaderMap,
    strict_302: bool,
) -> crate::Result<Option<Request>> {
    let location = match headers.get(LOCATION) {
        Some(value) => value
            .to_str()
            .map_err(|_| Error::new_invalid_request("redirect location is not visible ASCII"))?,
        None => return Ok(None),
    };

    let url = request
        .url
        .join(location)
        .map_err(Error::new_invalid_request)?;
    let url = uri::parse(url.as_str())?;

    let mut next = request.clone();

    let switch_to_get = match status.as_u16() {
        303 => request.method != Method::HEAD,
        301 | 302 => request.method == Method::POST && !strict_302,
        _ => false,
    };
    if switch_to_get {
        next.method = Method::GET;
        next.body = Body::Empty;
        next.content_length = None;
        next.headers.remove(CONTENT_TYPE);
        next.headers.remove(CONTENT_LENGTH);
        next.headers.remove(TRANSFER_ENCODING);
    }

    if !uri::same_origin(&request.url, &url) {
        next.headers.remove(AUTHORIZATION);
        next.headers.remove(HOST);
        next.realm = None;
        next.virtual_host = None;
    }

    for cookie in response::set_cookies(headers) {
        next.cookies.retain(|c| c.name() != cookie.name());
        if !cookie.expired() {
            next.cookies.push(cookie);
        }
    }

    next.url = url;
    Ok(Some(next))
}
