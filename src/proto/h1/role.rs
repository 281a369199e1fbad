//! 响应头解析，以及由响应头推导报文体长度。

use bytes::{Buf, BytesMut};
use http::header::{HeaderName, HeaderValue, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, Method, StatusCode, Version};

use super::{Decoder, MAX_HEADERS};
use crate::client::CloseDelimited;
use crate::error::Parse;
use crate::headers;

/// 一条完整解析的最终响应（1xx 已被跳过）。
#[derive(Debug)]
pub(crate) struct ParsedResponse {
    pub(crate) status: StatusCode,
    pub(crate) version: Version,
    pub(crate) headers: HeaderMap,
    pub(crate) decoder: Decoder,
    /// 协议层面是否允许复用连接（报文体可界定）。
    pub(crate) reusable: bool,
}

/// 从 `buf` 中解析一条响应头。
///
/// 数据不足时返回 `Ok(None)`；中途遇到的 1xx 信息性响应会被消费并丢弃。
pub(crate) fn parse_response(
    buf: &mut BytesMut,
    req_method: &Method,
    close_delimited: CloseDelimited,
    max_head: usize,
) -> crate::Result<Option<ParsedResponse>> {
    loop {
        if buf.is_empty() {
            return Ok(None);
        }

        let (len, status, version, headers) = {
            let mut raw = [httparse::EMPTY_HEADER; MAX_HEADERS];
            let mut res = httparse::Response::new(&mut raw);
            let len = match res.parse(&buf[..]).map_err(Parse::from)? {
                httparse::Status::Complete(len) => len,
                httparse::Status::Partial => {
                    if buf.len() >= max_head {
                        debug!("response head exceeded {} bytes", max_head);
                        return Err(crate::Error::new_too_large());
                    }
                    return Ok(None);
                }
            };
            if len > max_head {
                return Err(crate::Error::new_too_large());
            }

            let status = res
                .code
                .and_then(|code| StatusCode::from_u16(code).ok())
                .ok_or(Parse::Status)?;
            let version = match res.version {
                Some(0) => Version::HTTP_10,
                Some(1) => Version::HTTP_11,
                _ => return Err(Parse::Version.into()),
            };

            let mut headers = HeaderMap::with_capacity(res.headers.len());
            for header in res.headers.iter() {
                let name = HeaderName::from_bytes(header.name.as_bytes())
                    .map_err(|_| Parse::Header)?;
                let value = HeaderValue::from_bytes(header.value).map_err(|_| Parse::Header)?;
                headers.append(name, value);
            }
            (len, status, version, headers)
        };
        buf.advance(len);

        if status.is_informational() && status != StatusCode::SWITCHING_PROTOCOLS {
            trace!("ignoring informational response: {}", status);
            continue;
        }

        trace!("parsed response head: {} {:?}", status, version);
        let (decoder, reusable) = body_framing(req_method, status, version, &headers, close_delimited)?;
        return Ok(Some(ParsedResponse {
            status,
            version,
            headers,
            decoder,
            reusable,
        }));
    }
}

/// RFC 7230 3.3.3 的报文体长度规则。
fn body_framing(
    method: &Method,
    status: StatusCode,
    version: Version,
    headers: &HeaderMap,
    close_delimited: CloseDelimited,
) -> crate::Result<(Decoder, bool)> {
    if status == StatusCode::SWITCHING_PROTOCOLS {
        return Ok((Decoder::length(0), false));
    }
    if *method == Method::HEAD
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
    {
        return Ok((Decoder::length(0), true));
    }
    if *method == Method::CONNECT && status.is_success() {
        return Ok((Decoder::length(0), true));
    }

    if headers.contains_key(TRANSFER_ENCODING) {
        if version == Version::HTTP_10 {
            debug!("HTTP/1.0 response with transfer-encoding");
            return Err(Parse::TransferEncoding.into());
        }
        if headers::transfer_encoding_is_chunked(headers) {
            // content-length alongside chunked is a smuggling vector
            let reusable = !headers.contains_key(CONTENT_LENGTH);
            return Ok((Decoder::chunked(), reusable));
        }
        return close_delimited_body(close_delimited);
    }

    if headers.contains_key(CONTENT_LENGTH) {
        return match headers::content_length_parse_all(headers) {
            Some(len) => Ok((Decoder::length(len), true)),
            None => {
                debug!("illegal Content-Length header");
                Err(Parse::ContentLength.into())
            }
        };
    }

    close_delimited_body(close_delimited)
}

fn close_delimited_body(policy: CloseDelimited) -> crate::Result<(Decoder, bool)> {
    match policy {
        CloseDelimited::Accept => Ok((Decoder::eof(), false)),
        CloseDelimited::Reject => {
            debug!("rejecting response without content-length or chunked framing");
            Err(crate::Error::new_incomplete())
        }
    }
}
