//! Cookie 模型与编解码
//!
//! - [`Cookie`]：一个结构化的 cookie，构造时校验名字
//! - [`decode`]：把一条 `Set-Cookie` 头部值解析为单个 cookie
//! - [`encode`]：把一组 cookie 渲染为请求的 `Cookie` 头部值
//!
//! 解码器只支持“一个头部一个 cookie”的格式；遇到游离的 `,` 即停止解析。
//! 畸形头部不会报错，而是返回 `None` 并记录一条 debug 日志。

mod decode;
mod encode;

pub use self::decode::decode;
pub use self::encode::encode;

use crate::error::Error;

/// 一个 HTTP cookie。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cookie {
    name: String,
    value: String,
    wrap: bool,
    domain: Option<String>,
    path: Option<String>,
    max_age: Option<i64>,
    secure: bool,
    http_only: bool,
}

impl Cookie {
    /// 创建一个会话 cookie。
    ///
    /// 名字必须非空、纯 ASCII、不含 `= , ; 空格 \t \r \n`，且不能以 `$` 开头，
    /// 否则返回非法请求错误。
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> crate::Result<Cookie> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Cookie::unchecked(name, value.into(), false))
    }

    pub(crate) fn unchecked(name: String, value: String, wrap: bool) -> Cookie {
        Cookie {
            name,
            value,
            wrap,
            domain: None,
            path: None,
            max_age: None,
            secure: false,
            http_only: false,
        }
    }

    /// 名字。
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 值（已去掉引号）。
    pub fn value(&self) -> &str {
        &self.value
    }

    /// 编码时是否用双引号包裹值。
    pub fn wrap(&self) -> bool {
        self.wrap
    }

    /// 设置编码时是否用双引号包裹值。
    pub fn set_wrap(&mut self, wrap: bool) -> &mut Self {
        self.wrap = wrap;
        self
    }

    /// `Domain` 属性。
    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    /// 设置 `Domain` 属性。
    pub fn set_domain(&mut self, domain: impl Into<String>) -> &mut Self {
        self.domain = Some(domain.into());
        self
    }

    /// `Path` 属性。
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// 设置 `Path` 属性。
    pub fn set_path(&mut self, path: impl Into<String>) -> &mut Self {
        self.path = Some(path.into());
        self
    }

    /// 剩余存活秒数。`None` 表示会话 cookie。
    pub fn max_age(&self) -> Option<i64> {
        self.max_age
    }

    /// 设置存活秒数。
    pub fn set_max_age(&mut self, max_age: Option<i64>) -> &mut Self {
        self.max_age = max_age;
        self
    }

    /// `Secure` 标记。
    pub fn secure(&self) -> bool {
        self.secure
    }

    /// 设置 `Secure` 标记。
    pub fn set_secure(&mut self, secure: bool) -> &mut Self {
        self.secure = secure;
        self
    }

    /// `HttpOnly` 标记。
    pub fn http_only(&self) -> bool {
        self.http_only
    }

    /// 设置 `HttpOnly` 标记。
    pub fn set_http_only(&mut self, http_only: bool) -> &mut Self {
        self.http_only = http_only;
        self
    }

    /// 服务器要求立即删除此 cookie（`Max-Age` 为 0 或 `Expires` 已过）。
    pub fn expired(&self) -> bool {
        matches!(self.max_age, Some(age) if age <= 0)
    }
}

fn validate_name(name: &str) -> crate::Result<()> {
    if name.is_empty() {
        return Err(Error::new_invalid_request("empty cookie name"));
    }
    if name.starts_with('$') {
        return Err(Error::new_invalid_request(format!(
            "cookie name starts with '$': {}",
            name
        )));
    }
    for b in name.bytes() {
        if !b.is_ascii() || matches!(b, b'=' | b',' | b';' | b' ' | b'\t' | b'\r' | b'\n') {
            return Err(Error::new_invalid_request(format!(
                "cookie name contains an invalid character: {:?}",
                name
            )));
        }
    }
    Ok(())
}
