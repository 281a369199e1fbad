//! 请求模型
//!
//! [`Request`] 是不可变的请求值，由 [`RequestBuilder::build`] 生成。构建过程依次：
//!
//! 1. 如挂有签名计算器，先构建一份不带计算器的副本交给它修改头部或查询参数
//! 2. 校验 scheme 只能是 `http`、`https`、`ws`、`wss`
//! 3. 编码并合并查询参数
//! 4. 未显式设置字符集时，从 `Content-Type` 的 `charset=` 推导
//! 5. 未显式设置长度且请求体不是数据流时，从 `Content-Length` 推导
//!
//! 请求体的各种表示形式互斥，见 [`Body`]。

mod body;
mod builder;
pub(crate) mod uri;

pub use self::body::{Body, BodyChunk, BodyGenerator, OneShot};
pub use self::builder::RequestBuilder;

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use base64::prelude::{Engine as _, BASE64_STANDARD};
use http::{HeaderMap, HeaderValue, Method};
use url::Url;

use crate::cookie::Cookie;
use crate::pool::Partitioning;
use crate::proxy::ProxyServer;
use crate::rt::Resolve;

/// 一个已构建完成的请求。
#[derive(Clone)]
pub struct Request {
    pub(crate) method: Method,
    pub(crate) url: Url,
    pub(crate) headers: HeaderMap,
    pub(crate) cookies: Vec<Cookie>,
    pub(crate) body: Body,
    pub(crate) charset: Option<String>,
    pub(crate) content_length: Option<u64>,
    pub(crate) proxy: Option<ProxyServer>,
    pub(crate) realm: Option<Realm>,
    pub(crate) virtual_host: Option<String>,
    pub(crate) follow_redirect: Option<bool>,
    pub(crate) request_timeout: Option<Duration>,
    pub(crate) read_timeout: Option<Duration>,
    pub(crate) range_offset: u64,
    pub(crate) address: Option<SocketAddr>,
    pub(crate) local_address: Option<IpAddr>,
    pub(crate) partitioning: Option<Arc<dyn Partitioning>>,
    pub(crate) name_resolver: Option<Arc<dyn Resolve>>,
}

impl Request {
    /// `GET` 请求构建器。
    pub fn get(url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(Method::GET, url)
    }

    /// `POST` 请求构建器。
    pub fn post(url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(Method::POST, url)
    }

    /// `PUT` 请求构建器。
    pub fn put(url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(Method::PUT, url)
    }

    /// `DELETE` 请求构建器。
    pub fn delete(url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(Method::DELETE, url)
    }

    /// `HEAD` 请求构建器。
    pub fn head(url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(Method::HEAD, url)
    }

    /// 以当前请求为蓝本的构建器。查询参数已合并进 URI。
    pub fn to_builder(&self) -> RequestBuilder {
        RequestBuilder::from_request(self)
    }

    /// 请求方法。
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// 目标 URI（查询参数已编码合并）。
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// 请求头。
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// 随请求发送的 cookie。
    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    /// 请求体。
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// 请求体字符集。
    pub fn charset(&self) -> Option<&str> {
        self.charset.as_deref()
    }

    /// 请求体长度；`None` 时使用分块传输（除非请求体长度本身已知）。
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// 请求级代理。
    pub fn proxy(&self) -> Option<&ProxyServer> {
        self.proxy.as_ref()
    }

    /// 认证信息。
    pub fn realm(&self) -> Option<&Realm> {
        self.realm.as_ref()
    }

    /// 覆盖 `Host` 头部的虚拟主机。
    pub fn virtual_host(&self) -> Option<&str> {
        self.virtual_host.as_deref()
    }

    /// 是否跟随重定向；`None` 时使用客户端配置。
    pub fn follow_redirect(&self) -> Option<bool> {
        self.follow_redirect
    }

    /// 请求级整体超时。
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    /// 请求级读空闲超时。
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    /// 断点续传的起始偏移，非零时发送 `Range: bytes=<offset>-`。
    pub fn range_offset(&self) -> u64 {
        self.range_offset
    }

    /// 覆盖的目标地址。
    pub fn address(&self) -> Option<SocketAddr> {
        self.address
    }

    /// 本地绑定地址。
    pub fn local_address(&self) -> Option<IpAddr> {
        self.local_address
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers)
            .field("body", &self.body)
            .finish()
    }
}

/// 一个名值对；值可以缺省（`?flag`）。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Param {
    name: String,
    value: Option<String>,
}

impl Param {
    /// 创建参数。
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Param {
        Param {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    /// 只有名字的参数。
    pub fn name_only(name: impl Into<String>) -> Param {
        Param {
            name: name.into(),
            value: None,
        }
    }

    /// 名字。
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 值。
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }
}

/// 认证方案。
///
/// 只有 [`AuthScheme::Basic`] 由 courier 直接生成凭据；其余方案需要与服务端
/// 多轮握手，courier 只负责携带 [`Realm`]，不会抢先发送 `Authorization`。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AuthScheme {
    /// `Basic`。
    Basic,
    /// NTLM 质询/应答。
    Ntlm,
    /// Kerberos。
    Kerberos,
    /// SPNEGO（`Negotiate`）。
    Spnego,
}

/// HTTP 认证信息。
#[derive(Clone, PartialEq, Eq)]
pub struct Realm {
    scheme: AuthScheme,
    principal: String,
    password: String,
    preemptive: bool,
    charset: Option<String>,
}

impl Realm {
    /// Basic 认证，默认抢先发送 `Authorization`。
    pub fn basic(principal: impl Into<String>, password: impl Into<String>) -> Realm {
        Realm::new(AuthScheme::Basic, principal, password)
    }

    /// 指定方案的认证信息。只有 Basic 默认抢先发送。
    pub fn new(
        scheme: AuthScheme,
        principal: impl Into<String>,
        password: impl Into<String>,
    ) -> Realm {
        Realm {
            scheme,
            principal: principal.into(),
            password: password.into(),
            preemptive: scheme == AuthScheme::Basic,
            charset: None,
        }
    }

    /// 是否抢先发送。
    pub fn set_preemptive(mut self, preemptive: bool) -> Realm {
        self.preemptive = preemptive;
        self
    }

    /// 编码 `user:pass` 时使用的字符集，默认 UTF-8。
    pub fn with_charset(mut self, charset: impl Into<String>) -> Realm {
        self.charset = Some(charset.into());
        self
    }

    /// 方案。
    pub fn scheme(&self) -> AuthScheme {
        self.scheme
    }

    /// 用户名。
    pub fn principal(&self) -> &str {
        &self.principal
    }

    /// 是否抢先发送。
    pub fn is_preemptive(&self) -> bool {
        self.preemptive
    }

    /// `Basic <base64(user:pass)>` 头部值；非 Basic 方案返回 `None`。
    pub(crate) fn basic_header(&self) -> Option<HeaderValue> {
        self.basic_header_in(None)
    }

    /// 同 [`Realm::basic_header`]，自身未指定字符集时使用 `fallback`。
    pub(crate) fn basic_header_in(&self, fallback: Option<&str>) -> Option<HeaderValue> {
        if self.scheme != AuthScheme::Basic {
            return None;
        }
        let charset = self.charset.as_deref().or(fallback);
        let credentials = format!("{}:{}", self.principal, self.password);
        let mut value = String::from("Basic ");
        value.push_str(&BASE64_STANDARD.encode(uri::encode_text(&credentials, charset)));
        let mut header = HeaderValue::try_from(value).ok()?;
        header.set_sensitive(true);
        Some(header)
    }
}

impl fmt::Debug for Realm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Realm")
            .field("scheme", &self.scheme)
            .field("principal", &self.principal)
            .field("preemptive", &self.preemptive)
            .finish()
    }
}

/// 在请求最终构建之前修改它，例如添加签名头部。
///
/// 计算器拿到的是一份不带计算器的请求副本，以及同样不带计算器的构建器；
/// 对构建器的修改会进入最终请求。
pub trait SignatureCalculator: Send + Sync + 'static {
    /// 计算签名并写入 `builder`。
    fn calculate_and_add_signature(&self, request: &Request, builder: &mut RequestBuilder);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_auth_header() {
        let realm = Realm::basic("Aladdin", "open sesame");
        let value = realm.basic_header().unwrap();
        assert_eq!(value, "Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ==");
        assert!(value.is_sensitive());
    }

    #[test]
    fn basic_auth_uses_charset() {
        let utf8 = Realm::basic("José", "pw").basic_header().unwrap();
        assert_eq!(utf8, "Basic Sm9zw6k6cHc=");

        let latin1 = Realm::basic("José", "pw").with_charset("ISO-8859-1");
        assert_eq!(latin1.basic_header().unwrap(), "Basic Sm9z6Tpwdw==");
        assert_eq!(
            Realm::basic("José", "pw").basic_header_in(Some("ISO-8859-1")).unwrap(),
            "Basic Sm9z6Tpwdw=="
        );
    }

    #[test]
    fn handshake_schemes_are_not_preemptive() {
        for scheme in [AuthScheme::Ntlm, AuthScheme::Kerberos, AuthScheme::Spnego] {
            let realm = Realm::new(scheme, "user", "secret");
            assert_eq!(realm.scheme(), scheme);
            assert!(!realm.is_preemptive());
            assert!(realm.clone().set_preemptive(true).basic_header().is_none());
        }
        assert!(Realm::basic("user", "secret").is_preemptive());
    }
}
