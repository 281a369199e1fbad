//! HTTP 头部辅助函数模块
//!
//! 请求构建、报文编解码与 keep-alive 判定都需要对若干头部做细粒度检查。
//! 本模块把这些检查集中起来：
//!
//! - `Connection` 头中是否包含 `keep-alive` / `close`
//! - `Content-Length` 的严格解析（多个值必须一致）
//! - `Transfer-Encoding` 最后一个编码是否为 `chunked`
//! - `Content-Type` 中 `charset=` 与 `boundary=` 参数的提取
//!
//! 所有函数都是 `pub(crate)` 的纯函数，不持有任何状态。

use http::header::{HeaderValue, ValueIter, CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::HeaderMap;

pub(crate) fn connection_keep_alive(value: &HeaderValue) -> bool {
    connection_has(value, "keep-alive")
}

pub(crate) fn connection_close(value: &HeaderValue) -> bool {
    connection_has(value, "close")
}

/// 头部集合里任一 `Connection` 值包含 `close`。
pub(crate) fn wants_close(headers: &HeaderMap) -> bool {
    headers.get_all(CONNECTION).iter().any(connection_close)
}

/// 头部集合里任一 `Connection` 值包含 `keep-alive`。
pub(crate) fn wants_keep_alive(headers: &HeaderMap) -> bool {
    headers.get_all(CONNECTION).iter().any(connection_keep_alive)
}

fn connection_has(value: &HeaderValue, needle: &str) -> bool {
    if let Ok(s) = value.to_str() {
        for val in s.split(',') {
            if val.trim().eq_ignore_ascii_case(needle) {
                return true;
            }
        }
    }
    false
}

/// 解析所有 `Content-Length` 值。
///
/// 出现多个值时要求全部相等（`Content-Length: 5, 5` 合法），否则返回 `None`。
pub(crate) fn content_length_parse_all(headers: &HeaderMap) -> Option<u64> {
    content_length_parse_all_values(headers.get_all(CONTENT_LENGTH).into_iter())
}

pub(crate) fn content_length_parse_all_values(values: ValueIter<'_, HeaderValue>) -> Option<u64> {
    let mut content_length: Option<u64> = None;
    for h in values {
        if let Ok(line) = h.to_str() {
            for v in line.split(',') {
                if let Some(n) = from_digits(v.trim().as_bytes()) {
                    if content_length.is_none() {
                        content_length = Some(n)
                    } else if content_length != Some(n) {
                        return None;
                    }
                } else {
                    return None;
                }
            }
        } else {
            return None;
        }
    }

    content_length
}

/// 只接受纯十进制数字，拒绝 `+`、`-` 与空白。
pub(crate) fn from_digits(bytes: &[u8]) -> Option<u64> {
    let mut result = 0u64;
    const RADIX: u64 = 10;

    if bytes.is_empty() {
        return None;
    }

    for &b in bytes {
        match b {
            b'0'..=b'9' => {
                result = result.checked_mul(RADIX)?;
                result = result.checked_add((b - b'0') as u64)?;
            }
            _ => {
                return None;
            }
        }
    }

    Some(result)
}

pub(crate) fn transfer_encoding_is_chunked(headers: &HeaderMap) -> bool {
    is_chunked(headers.get_all(TRANSFER_ENCODING).into_iter())
}

pub(crate) fn is_chunked(mut encodings: ValueIter<'_, HeaderValue>) -> bool {
    // chunked must always be the last encoding
    if let Some(line) = encodings.next_back() {
        return is_chunked_(line);
    }

    false
}

pub(crate) fn is_chunked_(value: &HeaderValue) -> bool {
    if let Ok(s) = value.to_str() {
        if let Some(encoding) = s.rsplit(',').next() {
            return encoding.trim().eq_ignore_ascii_case("chunked");
        }
    }
    false
}

/// 从 `offset` 开始续传的 `Range` 值：`bytes=<offset>-`。
pub(crate) fn range_from(offset: u64) -> HeaderValue {
    let mut buf = itoa::Buffer::new();
    let digits = buf.format(offset);
    let mut value = String::with_capacity(7 + digits.len());
    value.push_str("bytes=");
    value.push_str(digits);
    value.push('-');
    HeaderValue::try_from(value).expect("digits are valid header bytes")
}

/// 从 `Content-Type` 中提取 `charset=` 参数，去掉可能的引号。
pub(crate) fn content_type_charset(content_type: &str) -> Option<String> {
    content_type_param(content_type, "charset")
}

/// 从 `Content-Type` 中提取 `boundary=` 参数。
pub(crate) fn content_type_boundary(content_type: &str) -> Option<String> {
    content_type_param(content_type, "boundary")
}

fn content_type_param(content_type: &str, name: &str) -> Option<String> {
    for param in content_type.split(';').skip(1) {
        let param = param.trim();
        let (key, value) = match param.split_once('=') {
            Some(kv) => kv,
            None => continue,
        };
        if !key.trim().eq_ignore_ascii_case(name) {
            continue;
        }
        let value = value.trim().trim_matches('"');
        if value.is_empty() {
            return None;
        }
        return Some(value.to_owned());
    }
    None
}
