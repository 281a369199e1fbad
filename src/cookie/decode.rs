//! `Set-Cookie` 解码
//!
//! 语法：`name '=' value (';' attribute)*`。识别的属性（大小写不敏感）：
//! `Path`、`Domain`、`Expires`、`Max-Age`、`Secure`、`HttpOnly`，其余忽略。
//!
//! - 值两侧的双引号会被去掉并记录到 `wrap` 标记；引号不配对则整条拒绝
//! - `Max-Age` 优先于 `Expires`；负数或无法解析的 `Max-Age` 视为不存在
//! - 片段以 `,` 开头说明是旧式的多 cookie 语法，停止解析
//! - 名字为空，或第一个 `;` 之前没有 `=`，整条拒绝

use std::time::SystemTime;

use super::Cookie;

/// 把一条 `Set-Cookie` 头部值解析为一个 cookie。畸形输入返回 `None`。
pub fn decode(header: &str) -> Option<Cookie> {
    let bytes = header.as_bytes();
    let len = bytes.len();
    let mut i = 0;
    let mut builder: Option<CookieBuilder> = None;

    while i < len {
        match bytes[i] {
            b',' => break,
            b'\t' | b'\n' | 0x0b | 0x0c | b'\r' | b' ' | b';' => {
                i += 1;
                continue;
            }
            _ => {}
        }

        let name_begin = i;
        let name_end;
        let mut value: Option<(usize, usize)> = None;

        loop {
            match bytes[i] {
                b';' => {
                    name_end = i;
                    break;
                }
                b'=' => {
                    name_end = i;
                    i += 1;
                    if i == len {
                        value = Some((len, len));
                        break;
                    }
                    let value_begin = i;
                    let value_end = match header[i..].find(';') {
                        Some(pos) => i + pos,
                        None => len,
                    };
                    i = value_end;
                    value = Some((value_begin, value_end));
                    break;
                }
                _ => i += 1,
            }
            if i == len {
                name_end = len;
                break;
            }
        }

        // old multiple cookies separator
        if let Some((begin, end)) = value {
            if end > begin && bytes[end - 1] == b',' {
                value = Some((begin, end - 1));
            }
        }

        match builder {
            None => {
                let cookie = init_cookie(header, name_begin, name_end, value)?;
                builder = Some(CookieBuilder::new(cookie));
            }
            Some(ref mut b) => {
                let name = &header[name_begin..name_end];
                let value = value.map(|(begin, end)| &header[begin..end]);
                b.append_attribute(name, value);
            }
        }
    }

    builder.map(CookieBuilder::finish)
}

fn init_cookie(
    header: &str,
    name_begin: usize,
    name_end: usize,
    value: Option<(usize, usize)>,
) -> Option<Cookie> {
    if name_begin == name_end {
        debug!("skipping cookie with null name");
        return None;
    }

    let (value_begin, value_end) = match value {
        Some(v) => v,
        None => {
            debug!("skipping cookie with null value");
            return None;
        }
    };

    let name = &header[name_begin..name_end];
    if let Some(_pos) = first_invalid_name_octet(name) {
        debug!(
            "skipping cookie because name '{}' contains invalid char at {}",
            name, _pos
        );
        return None;
    }

    let raw = &header[value_begin..value_end];
    let (value, wrap) = match unwrap_value(raw) {
        Some(unwrapped) => unwrapped,
        None => {
            debug!("skipping cookie because value '{}' has unbalanced quotes", raw);
            return None;
        }
    };

    if let Some(_pos) = first_invalid_value_octet(value) {
        debug!(
            "skipping cookie because value '{}' contains invalid char at {}",
            value, _pos
        );
        return None;
    }

    Some(Cookie::unchecked(name.to_owned(), value.to_owned(), wrap))
}

fn unwrap_value(raw: &str) -> Option<(&str, bool)> {
    let bytes = raw.as_bytes();
    let len = bytes.len();
    if len > 0 && bytes[0] == b'"' {
        if len >= 2 && bytes[len - 1] == b'"' {
            return Some((&raw[1..len - 1], true));
        }
        return None;
    }
    Some((raw, false))
}

fn first_invalid_name_octet(name: &str) -> Option<usize> {
    name.bytes().position(|b| {
        b <= 0x20
            || b >= 0x7f
            || matches!(
                b,
                b'(' | b')'
                    | b'<'
                    | b'>'
                    | b'@'
                    | b','
                    | b';'
                    | b':'
                    | b'\\'
                    | b'"'
                    | b'/'
                    | b'['
                    | b']'
                    | b'?'
                    | b'='
                    | b'{'
                    | b'}'
            )
    })
}

// cookie-octet = %x21 / %x23-2B / %x2D-3A / %x3C-5B / %x5D-7E
fn first_invalid_value_octet(value: &str) -> Option<usize> {
    value.bytes().position(|b| {
        !(b == 0x21
            || (0x23..=0x2b).contains(&b)
            || (0x2d..=0x3a).contains(&b)
            || (0x3c..=0x5b).contains(&b)
            || (0x5d..=0x7e).contains(&b))
    })
}

struct CookieBuilder {
    cookie: Cookie,
    max_age: Option<i64>,
    expires: Option<String>,
}

impl CookieBuilder {
    fn new(cookie: Cookie) -> CookieBuilder {
        CookieBuilder {
            cookie,
            max_age: None,
            expires: None,
        }
    }

    fn append_attribute(&mut self, name: &str, value: Option<&str>) {
        if name.eq_ignore_ascii_case("path") {
            if let Some(v) = non_empty(value) {
                self.cookie.path = Some(v.to_owned());
            }
        } else if name.eq_ignore_ascii_case("domain") {
            if let Some(v) = non_empty(value) {
                self.cookie.domain = Some(v.to_owned());
            }
        } else if name.eq_ignore_ascii_case("secure") {
            self.cookie.secure = true;
        } else if name.eq_ignore_ascii_case("httponly") {
            self.cookie.http_only = true;
        } else if name.eq_ignore_ascii_case("expires") {
            self.expires = non_empty(value).map(str::to_owned);
        } else if name.eq_ignore_ascii_case("max-age") {
            self.max_age = value
                .and_then(|v| v.trim().parse::<i64>().ok())
                .filter(|age| *age >= 0);
        }
    }

    fn finish(mut self) -> Cookie {
        self.cookie.max_age = match self.max_age {
            Some(age) => Some(age),
            None => self.expires.as_deref().and_then(expires_to_max_age),
        };
        self.cookie
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// HTTP 日期的三种格式之外，再接受 Netscape 的 `Wed, 09-Jun-2021 10:18:14 GMT`。
fn parse_expires(expires: &str) -> Option<SystemTime> {
    httpdate::parse_http_date(expires)
        .or_else(|_| httpdate::parse_http_date(&expires.replace('-', " ")))
        .ok()
}

fn expires_to_max_age(expires: &str) -> Option<i64> {
    let when = parse_expires(expires)?;
    Some(match when.duration_since(SystemTime::now()) {
        Ok(left) => {
            let secs = left.as_secs() as i64;
            if left.subsec_nanos() > 0 {
                secs + 1
            } else {
                secs
            }
        }
        Err(_) => 0,
    })
}
