//! 请求编码
//!
//! 请求目标有三种形式：
//!
//! - origin-form：`GET /path?q HTTP/1.1`，直连或经隧道时使用
//! - absolute-form：`GET http://host/path HTTP/1.1`，经明文代理转发时使用
//! - authority-form：`CONNECT host:443 HTTP/1.1`，建立隧道时使用
//!
//! 请求体长度已知时用 `Content-Length`，否则用 `Transfer-Encoding: chunked`。

use std::fmt::Write as _;

use http::{HeaderMap, Method};
use url::Url;

use crate::request::uri;

/// 请求行中的目标。
#[derive(Debug)]
pub(crate) enum Target<'a> {
    Origin(&'a Url),
    Absolute(&'a Url),
    Authority(&'a str, u16),
}

impl Target<'_> {
    fn render(&self) -> String {
        match *self {
            Target::Origin(url) => uri::origin_form(url),
            Target::Absolute(url) => uri::absolute_form(url),
            Target::Authority(host, port) => {
                let mut buf = itoa::Buffer::new();
                let mut authority = String::with_capacity(host.len() + 6);
                authority.push_str(host);
                authority.push(':');
                authority.push_str(buf.format(port));
                authority
            }
        }
    }
}

/// 把请求行与头部写入 `dst`。
pub(crate) fn encode_head(method: &Method, target: Target<'_>, headers: &HeaderMap, dst: &mut Vec<u8>) {
    let target = target.render();
    let init_cap = 30 + target.len() + headers.len() * 32;
    dst.reserve(init_cap);

    dst.extend_from_slice(method.as_str().as_bytes());
    dst.push(b' ');
    dst.extend_from_slice(target.as_bytes());
    dst.extend_from_slice(b" HTTP/1.1\r\n");

    for (name, value) in headers {
        dst.extend_from_slice(name.as_str().as_bytes());
        dst.extend_from_slice(b": ");
        dst.extend_from_slice(value.as_bytes());
        dst.extend_from_slice(b"\r\n");
    }
    dst.extend_from_slice(b"\r\n");
}

/// 请求体分帧。
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Encoder {
    kind: Kind,
}

#[derive(Debug, Clone, PartialEq)]
enum Kind {
    /// 剩余待写的字节数。
    Length(u64),
    Chunked,
}

impl Encoder {
    pub(crate) fn length(len: u64) -> Encoder {
        Encoder {
            kind: Kind::Length(len),
        }
    }

    pub(crate) fn chunked() -> Encoder {
        Encoder { kind: Kind::Chunked }
    }

    /// 为一段请求体数据分帧后写入 `dst`。
    pub(crate) fn encode(&mut self, data: &[u8], dst: &mut Vec<u8>) -> crate::Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        match self.kind {
            Kind::Chunked => {
                let mut size = String::with_capacity(10);
                let _ = write!(size, "{:X}\r\n", data.len());
                dst.extend_from_slice(size.as_bytes());
                dst.extend_from_slice(data);
                dst.extend_from_slice(b"\r\n");
            }
            Kind::Length(ref mut remaining) => {
                let len = data.len() as u64;
                if len > *remaining {
                    return Err(crate::Error::new_user_body(
                        "request body is longer than its declared content-length",
                    ));
                }
                *remaining -= len;
                dst.extend_from_slice(data);
            }
        }
        Ok(())
    }

    /// 请求体结束。chunked 写入终止块；定长时检查是否写够。
    pub(crate) fn end(&self, dst: &mut Vec<u8>) -> crate::Result<()> {
        match self.kind {
            Kind::Chunked => {
                dst.extend_from_slice(b"0\r\n\r\n");
                Ok(())
            }
            Kind::Length(0) => Ok(()),
            Kind::Length(_remaining) => {
                debug!("request body ended {} bytes short", _remaining);
                Err(crate::Error::new_user_body(
                    "request body is shorter than its declared content-length",
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{HeaderValue, HOST};

    fn head(method: Method, target: Target<'_>) -> String {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_static("example.com"));
        let mut dst = Vec::new();
        encode_head(&method, target, &headers, &mut dst);
        String::from_utf8(dst).unwrap()
    }

    #[test]
    fn request_target_forms() {
        let url = Url::parse("http://example.com/a/b?x=1").unwrap();
        assert_eq!(
            head(Method::GET, Target::Origin(&url)),
            "GET /a/b?x=1 HTTP/1.1\r\nhost: example.com\r\n\r\n"
        );
        assert_eq!(
            head(Method::GET, Target::Absolute(&url)),
            "GET http://example.com/a/b?x=1 HTTP/1.1\r\nhost: example.com\r\n\r\n"
        );
        assert_eq!(
            head(Method::CONNECT, Target::Authority("example.com", 443)),
            "CONNECT example.com:443 HTTP/1.1\r\nhost: example.com\r\n\r\n"
        );
    }

    #[test]
    fn chunked_framing() {
        let mut enc = Encoder::chunked();
        let mut dst = Vec::new();
        enc.encode(b"hello world, this is long", &mut dst).unwrap();
        enc.encode(b"", &mut dst).unwrap();
        enc.end(&mut dst).unwrap();
        assert_eq!(&dst[..], b"19\r\nhello world, this is long\r\n0\r\n\r\n");
    }

    #[test]
    fn length_is_enforced() {
        let mut enc = Encoder::length(4);
        let mut dst = Vec::new();
        enc.encode(b"ab", &mut dst).unwrap();
        assert!(enc.end(&mut dst).unwrap_err().is_user());
        enc.encode(b"cd", &mut dst).unwrap();
        enc.end(&mut dst).unwrap();
        assert!(enc.encode(b"e", &mut dst).unwrap_err().is_user());
        assert_eq!(&dst[..], b"abcd");
    }
}
