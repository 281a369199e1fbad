//! 连接池分区
//!
//! 分区键决定一个请求落在哪个池桶里，也就是“每主机”上限所计数的对象。
//! 它由两部分组成：调用方可选的覆盖地址（以及本地绑定地址），和分区策略的结果。

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use url::Url;

use crate::proxy::ProxyServer;
use crate::request::uri;

/// `scheme://host:port` 三元组。
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Authority {
    scheme: String,
    host: String,
    port: u16,
}

impl Authority {
    /// 创建。scheme 与主机会被转为小写。
    pub fn new(scheme: &str, host: &str, port: u16) -> Authority {
        Authority {
            scheme: scheme.to_ascii_lowercase(),
            host: host.to_ascii_lowercase(),
            port,
        }
    }

    /// 取 URI 的 scheme、主机与（默认）端口。
    pub fn of(url: &Url) -> Authority {
        Authority::new(url.scheme(), url.host_str().unwrap_or(""), uri::port_or_default(url))
    }

    fn of_proxy(proxy: &ProxyServer) -> Authority {
        let scheme = if proxy.is_secure() { "https" } else { "http" };
        Authority::new(scheme, proxy.host(), proxy.port())
    }

    /// scheme。
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// 主机。
    pub fn host(&self) -> &str {
        &self.host
    }

    /// 端口。
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Debug for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// 分区策略的结果。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Partition {
    target: Option<Authority>,
    proxy: Option<Authority>,
}

impl Partition {
    /// 由目标与代理组成的分区。
    pub fn new(target: Option<Authority>, proxy: Option<Authority>) -> Partition {
        Partition { target, proxy }
    }

    /// 目标部分。
    pub fn target(&self) -> Option<&Authority> {
        self.target.as_ref()
    }

    /// 代理部分。
    pub fn proxy(&self) -> Option<&Authority> {
        self.proxy.as_ref()
    }
}

/// 可插拔的分区策略。
pub trait Partitioning: Send + Sync + 'static {
    /// 计算 `target`（经由 `proxy`）所在的分区。
    fn partition(&self, target: &Url, proxy: Option<&ProxyServer>) -> Partition;
}

/// 每个目标主机一个分区（默认）。经代理的连接还按代理区分。
#[derive(Clone, Copy, Debug, Default)]
pub struct PerHost;

impl Partitioning for PerHost {
    fn partition(&self, target: &Url, proxy: Option<&ProxyServer>) -> Partition {
        Partition::new(Some(Authority::of(target)), proxy.map(Authority::of_proxy))
    }
}

/// 每个代理一个分区。
///
/// 经明文代理转发的 http 请求可以跨目标复用连接；https 目标经隧道后连接
/// 只属于那个目标，因此仍带上目标部分。没有代理时退化为每主机。
#[derive(Clone, Copy, Debug, Default)]
pub struct PerProxy;

impl Partitioning for PerProxy {
    fn partition(&self, target: &Url, proxy: Option<&ProxyServer>) -> Partition {
        match proxy {
            Some(proxy) => {
                let tunneled = uri::is_secure(target);
                Partition::new(
                    tunneled.then(|| Authority::of(target)),
                    Some(Authority::of_proxy(proxy)),
                )
            }
            None => PerHost.partition(target, None),
        }
    }
}

/// 连接池的桶标识。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PartitionKey {
    address: Option<SocketAddr>,
    local_address: Option<IpAddr>,
    partition: Partition,
}

impl PartitionKey {
    /// 组合覆盖地址、本地地址与策略结果。
    pub fn new(
        address: Option<SocketAddr>,
        local_address: Option<IpAddr>,
        partition: Partition,
    ) -> PartitionKey {
        PartitionKey {
            address,
            local_address,
            partition,
        }
    }

    /// 覆盖地址。
    pub fn address(&self) -> Option<SocketAddr> {
        self.address
    }

    /// 策略结果。
    pub fn partition(&self) -> &Partition {
        &self.partition
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.partition.target, &self.partition.proxy) {
            (Some(t), Some(p)) => write!(f, "{:?} via {:?}", t, p)?,
            (Some(t), None) => write!(f, "{:?}", t)?,
            (None, Some(p)) => write!(f, "via {:?}", p)?,
            (None, None) => f.write_str("<none>")?,
        }
        if let Some(addr) = self.address {
            write!(f, " @{}", addr)?;
        }
        Ok(())
    }
}
