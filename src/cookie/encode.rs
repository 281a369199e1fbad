//! 请求 `Cookie` 头部编码

use super::Cookie;

/// 把一组 cookie 渲染为 `Cookie` 头部值，例如 `a=1; b="2"`。
///
/// 同名 cookie 只保留最后一个。
pub fn encode(cookies: &[Cookie]) -> String {
    let mut out = String::new();
    for (idx, cookie) in cookies.iter().enumerate() {
        if cookies[idx + 1..].iter().any(|c| c.name() == cookie.name()) {
            continue;
        }
        if !out.is_empty() {
            out.push_str("; ");
        }
        out.push_str(cookie.name());
        out.push('=');
        if cookie.wrap() {
            out.push('"');
            out.push_str(cookie.value());
            out.push('"');
        } else {
            out.push_str(cookie.value());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_pairs() {
        let mut b = Cookie::new("b", "2").unwrap();
        b.set_wrap(true);
        let cookies = vec![Cookie::new("a", "1").unwrap(), b];
        assert_eq!(encode(&cookies), "a=1; b=\"2\"");
    }

    #[test]
    fn last_duplicate_wins() {
        let cookies = vec![
            Cookie::new("a", "old").unwrap(),
            Cookie::new("c", "3").unwrap(),
            Cookie::new("a", "new").unwrap(),
        ];
        assert_eq!(encode(&cookies), "c=3; a=new");
    }

    #[test]
    fn empty_list() {
        assert_eq!(encode(&[]), "");
    }
}
