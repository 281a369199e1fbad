//! 代理服务器
//!
//! [`ProxyServer`] 一经构建即不可变。它可以挂在单个请求上，也可以通过
//! [`ProxySelector`] 作为客户端级配置；请求级代理优先。
//!
//! 对明文 http 目标，请求以绝对形式（absolute-form）直接发给代理；
//! 对 https 目标，先发送 `CONNECT host:port` 建立隧道，再在同一条连接上做 TLS 握手。
//!
//! NTLM、Kerberos 与 SPNEGO 代理在连接层面与明文 http 代理相同，只是不会
//! 抢先发送 Basic 形式的 `Proxy-Authorization`。

use std::fmt;

use http::HeaderValue;
use url::Url;

use crate::request::Realm;

/// 与代理之间使用的协议。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProxyType {
    /// 明文连接代理。
    Http,
    /// 通过 TLS 连接代理本身。
    Https,
    /// 需要 NTLM 认证的明文代理。
    Ntlm,
    /// 需要 Kerberos 认证的明文代理。
    Kerberos,
    /// 需要 SPNEGO 认证的明文代理。
    Spnego,
}

impl ProxyType {
    fn uses_basic_auth(self) -> bool {
        matches!(self, ProxyType::Http | ProxyType::Https)
    }
}

/// 一个代理服务器。
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyServer {
    proxy_type: ProxyType,
    host: String,
    port: u16,
    realm: Option<Realm>,
    non_proxy_hosts: Vec<String>,
    charset: Option<String>,
}

impl ProxyServer {
    /// 明文 http 代理。
    pub fn http(host: impl Into<String>, port: u16) -> ProxyServer {
        ProxyServer::new(ProxyType::Http, host, port)
    }

    /// 创建代理。
    pub fn new(proxy_type: ProxyType, host: impl Into<String>, port: u16) -> ProxyServer {
        ProxyServer {
            proxy_type,
            host: host.into(),
            port,
            realm: None,
            non_proxy_hosts: Vec::new(),
            charset: None,
        }
    }

    /// 代理认证信息，用于 `Proxy-Authorization`。
    pub fn with_realm(mut self, realm: Realm) -> ProxyServer {
        self.realm = Some(realm);
        self
    }

    /// 不经过代理的主机模式：`*.suffix`、`prefix*` 或精确匹配，大小写不敏感。
    pub fn with_non_proxy_host(mut self, pattern: impl Into<String>) -> ProxyServer {
        self.non_proxy_hosts.push(pattern.into());
        self
    }

    /// 与代理交互时使用的字符集。
    pub fn with_charset(mut self, charset: impl Into<String>) -> ProxyServer {
        self.charset = Some(charset.into());
        self
    }

    /// 协议。
    pub fn proxy_type(&self) -> ProxyType {
        self.proxy_type
    }

    /// 主机。
    pub fn host(&self) -> &str {
        &self.host
    }

    /// 端口。
    pub fn port(&self) -> u16 {
        self.port
    }

    /// 认证信息。
    pub fn realm(&self) -> Option<&Realm> {
        self.realm.as_ref()
    }

    /// 字符集。
    pub fn charset(&self) -> Option<&str> {
        self.charset.as_deref()
    }

    /// 连接代理本身时是否使用 TLS。
    pub fn is_secure(&self) -> bool {
        self.proxy_type == ProxyType::Https
    }

    /// `host` 是否命中任一不走代理的模式。
    pub fn is_ignored_for_host(&self, host: &str) -> bool {
        self.non_proxy_hosts
            .iter()
            .any(|pattern| matches_non_proxy(host, pattern))
    }

    /// 抢先发送给代理的 `Proxy-Authorization`。
    pub(crate) fn authorization(&self) -> Option<HeaderValue> {
        if !self.proxy_type.uses_basic_auth() {
            return None;
        }
        self.realm
            .as_ref()
            .filter(|realm| realm.is_preemptive())
            .and_then(|realm| realm.basic_header_in(self.charset.as_deref()))
    }
}

fn matches_non_proxy(host: &str, pattern: &str) -> bool {
    let host = host.to_ascii_lowercase();
    let pattern = pattern.trim().to_ascii_lowercase();
    if pattern.is_empty() {
        return false;
    }
    if let Some(suffix) = pattern.strip_prefix('*') {
        host.ends_with(suffix)
    } else if let Some(prefix) = pattern.strip_suffix('*') {
        host.starts_with(prefix)
    } else {
        host == pattern
    }
}

impl fmt::Debug for ProxyServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyServer")
            .field("type", &self.proxy_type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("non_proxy_hosts", &self.non_proxy_hosts)
            .finish()
    }
}

/// 为目标 URI 选择客户端级代理。
pub trait ProxySelector: Send + Sync + 'static {
    /// 返回应使用的代理；`None` 表示直连。
    fn select(&self, url: &Url) -> Option<ProxyServer>;
}

impl ProxySelector for ProxyServer {
    fn select(&self, url: &Url) -> Option<ProxyServer> {
        match url.host_str() {
            Some(host) if self.is_ignored_for_host(host) => None,
            _ => Some(self.clone()),
        }
    }
}

/// 解析出一个请求实际使用的代理：请求级优先，其次客户端级，并剔除被排除的主机。
pub(crate) fn resolve(
    request_proxy: Option<&ProxyServer>,
    selector: Option<&dyn ProxySelector>,
    url: &Url,
) -> Option<ProxyServer> {
    match request_proxy {
        Some(proxy) => proxy.select(url),
        None => selector.and_then(|s| s.select(url)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_proxy_patterns() {
        let proxy = ProxyServer::http("proxy", 3128)
            .with_non_proxy_host("*.internal.example")
            .with_non_proxy_host("LOCALHOST")
            .with_non_proxy_host("10.*");
        assert!(proxy.is_ignored_for_host("api.internal.example"));
        assert!(proxy.is_ignored_for_host("localhost"));
        assert!(proxy.is_ignored_for_host("10.1.2.3"));
        assert!(!proxy.is_ignored_for_host("example.com"));
    }

    #[test]
    fn request_proxy_overrides_client() {
        let url = Url::parse("http://example.com/").unwrap();
        let client = ProxyServer::http("client-proxy", 1);
        let req = ProxyServer::http("request-proxy", 2);
        let chosen = resolve(Some(&req), Some(&client), &url).unwrap();
        assert_eq!(chosen.host(), "request-proxy");

        let chosen = resolve(None, Some(&client), &url).unwrap();
        assert_eq!(chosen.host(), "client-proxy");

        assert!(resolve(None, None, &url).is_none());
    }

    #[test]
    fn handshake_proxies_skip_basic_credentials() {
        for proxy_type in [ProxyType::Ntlm, ProxyType::Kerberos, ProxyType::Spnego] {
            let proxy = ProxyServer::new(proxy_type, "proxy", 3128)
                .with_realm(Realm::basic("user", "secret"));
            assert!(!proxy.is_secure());
            assert!(proxy.authorization().is_none());
        }
        let basic = ProxyServer::http("proxy", 3128).with_realm(Realm::basic("user", "secret"));
        assert_eq!(basic.authorization().unwrap(), "Basic dXNlcjpzZWNyZXQ=");
    }

    #[test]
    fn proxy_charset_encodes_credentials() {
        let proxy = ProxyServer::http("proxy", 3128)
            .with_realm(Realm::basic("José", "pw"))
            .with_charset("ISO-8859-1");
        assert_eq!(proxy.authorization().unwrap(), "Basic Sm9z6Tpwdw==");
    }

    #[test]
    fn ignored_host_goes_direct() {
        let url = Url::parse("http://localhost:8080/").unwrap();
        let client = ProxyServer::http("p", 1).with_non_proxy_host("localhost");
        assert!(resolve(None, Some(&client), &url).is_none());
    }
}
