//! URI 与表单编码
//!
//! 查询参数按“未保留字符集”编码：只有 `A-Za-z0-9-_~.` 保持原样，其余一律
//! 百分号编码。URI 里已有的查询串原样保留，显式添加的参数追加在后面。

use std::borrow::Cow;

use encoding_rs::Encoding;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::form_urlencoded::byte_serialize;
use url::Url;

use super::Param;
use crate::error::Error;

const QUERY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

pub(crate) fn parse(raw: &str) -> crate::Result<Url> {
    let url = Url::parse(raw).map_err(Error::new_invalid_request)?;
    match url.scheme() {
        "http" | "https" | "ws" | "wss" => {}
        other => {
            return Err(Error::new_invalid_request(format!(
                "unsupported scheme: {}",
                other
            )))
        }
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(Error::new_invalid_request(format!("missing host: {}", raw)));
    }
    Ok(url)
}

pub(crate) fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, QUERY_ENCODE_SET).to_string()
}

/// 把 `params` 合并进 `url` 的查询串。`encode` 为 `false` 时按原样拼接。
pub(crate) fn merge_query(url: &mut Url, params: &[Param], encode: bool) {
    if params.is_empty() {
        return;
    }

    let mut query = url.query().unwrap_or("").to_owned();
    for param in params {
        if !query.is_empty() {
            query.push('&');
        }
        if encode {
            query.push_str(&encode_component(param.name()));
        } else {
            query.push_str(param.name());
        }
        if let Some(value) = param.value() {
            query.push('=');
            if encode {
                query.push_str(&encode_component(value));
            } else {
                query.push_str(value);
            }
        }
    }
    url.set_query(Some(&query));
}

/// `application/x-www-form-urlencoded` 编码。
pub(crate) fn form_urlencode(params: &[Param], charset: Option<&str>) -> String {
    let mut out = String::new();
    for param in params {
        if !out.is_empty() {
            out.push('&');
        }
        out.extend(byte_serialize(&encode_text(param.name(), charset)));
        out.push('=');
        out.extend(byte_serialize(&encode_text(param.value().unwrap_or(""), charset)));
    }
    out
}

/// 按字符集把文本编码为字节；未指定或无法识别的字符集按 UTF-8 发送。
///
/// 目标字符集无法表示的字符会被替换为 `&#NNNN;` 形式的数字字符引用。
pub(crate) fn encode_text<'a>(text: &'a str, charset: Option<&str>) -> Cow<'a, [u8]> {
    let label = match charset {
        Some(label) => label.trim(),
        None => return Cow::Borrowed(text.as_bytes()),
    };
    // encoding_rs 只解码 UTF-16，编码时会退回 UTF-8
    if label.eq_ignore_ascii_case("utf-16") || label.eq_ignore_ascii_case("utf-16be") {
        return Cow::Owned(text.encode_utf16().flat_map(u16::to_be_bytes).collect());
    }
    if label.eq_ignore_ascii_case("utf-16le") {
        return Cow::Owned(text.encode_utf16().flat_map(u16::to_le_bytes).collect());
    }
    match Encoding::for_label(label.as_bytes()) {
        Some(encoding) => encoding.encode(text).0,
        None => {
            debug!("unknown charset {:?}, sending UTF-8", label);
            Cow::Borrowed(text.as_bytes())
        }
    }
}

/// 请求行中的目标：路径加查询串。
pub(crate) fn origin_form(url: &Url) -> String {
    let mut target = url.path().to_owned();
    if target.is_empty() {
        target.push('/');
    }
    if let Some(q) = url.query() {
        target.push('?');
        target.push_str(q);
    }
    target
}

/// `Host` 头部值：默认端口省略。
pub(crate) fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or("");
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_owned(),
    }
}

/// 不含 userinfo 与 fragment 的绝对 URI，用于经明文代理发送的请求。
pub(crate) fn absolute_form(url: &Url) -> String {
    let mut s = format!("{}://{}", url.scheme(), host_header(url));
    s.push_str(&origin_form(url));
    s
}

pub(crate) fn port_or_default(url: &Url) -> u16 {
    url.port_or_known_default().unwrap_or(match url.scheme() {
        "https" | "wss" => 443,
        _ => 80,
    })
}

pub(crate) fn is_secure(url: &Url) -> bool {
    matches!(url.scheme(), "https" | "wss")
}

/// 两个 URI 是否同源（scheme、主机、端口都相同）。
pub(crate) fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme() && a.host_str() == b.host_str() && port_or_default(a) == port_or_default(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_scheme() {
        assert!(parse("ftp://example.com/").unwrap_err().is_invalid_request());
        assert!(parse("not a url").unwrap_err().is_invalid_request());
        assert!(parse("wss://example.com/chat").is_ok());
    }

    #[test]
    fn encodes_everything_but_unreserved() {
        assert_eq!(encode_component("a b&c=d/é~._-"), "a%20b%26c%3Dd%2F%C3%A9~._-");
    }

    #[test]
    fn merges_with_existing_query() {
        let mut url = Url::parse("http://h/p?x=1").unwrap();
        merge_query(
            &mut url,
            &[Param::new("q", "a b"), Param::name_only("flag")],
            true,
        );
        assert_eq!(url.query(), Some("x=1&q=a%20b&flag"));
        assert_eq!(origin_form(&url), "/p?x=1&q=a%20b&flag");
    }

    #[test]
    fn host_header_omits_default_port() {
        assert_eq!(host_header(&Url::parse("http://h:80/").unwrap()), "h");
        assert_eq!(host_header(&Url::parse("http://h:8080/").unwrap()), "h:8080");
        assert_eq!(
            absolute_form(&Url::parse("http://u:p@h:8080/a?b#c").unwrap()),
            "http://h:8080/a?b"
        );
    }

    #[test]
    fn form_encoding() {
        let s = form_urlencode(&[Param::new("a", "1 2"), Param::new("b", "&")], None);
        assert_eq!(s, "a=1+2&b=%26");
    }

    #[test]
    fn form_encoding_follows_charset() {
        let params = [Param::new("name", "José")];
        assert_eq!(form_urlencode(&params, None), "name=Jos%C3%A9");
        assert_eq!(form_urlencode(&params, Some("ISO-8859-1")), "name=Jos%E9");
        assert_eq!(form_urlencode(&params, Some("no-such-charset")), "name=Jos%C3%A9");
    }

    #[test]
    fn text_encoding_follows_charset() {
        assert_eq!(&*encode_text("é", None), "é".as_bytes());
        assert_eq!(&*encode_text("é", Some("latin1")), &[0xE9u8][..]);
        assert_eq!(&*encode_text("中", Some("latin1")), b"&#20013;");
        assert_eq!(&*encode_text("hi", Some("UTF-16BE")), &[0, b'h', 0, b'i'][..]);
        assert_eq!(&*encode_text("hi", Some("utf-16le")), &[b'h', 0, b'i', 0][..]);
    }

    #[test]
    fn origins() {
        let a = Url::parse("http://h/a").unwrap();
        assert!(same_origin(&a, &Url::parse("http://h:80/b").unwrap()));
        assert!(!same_origin(&a, &Url::parse("https://h/a").unwrap()));
    }
}
