use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::Stream;
use http::header::{HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, Method};

use super::body::{Body, BodyChunk, BodyGenerator};
use super::{uri, Param, Realm, Request, SignatureCalculator};
use crate::cookie::Cookie;
use crate::error::Error;
use crate::headers;
use crate::multipart::Part;
use crate::pool::Partitioning;
use crate::proxy::ProxyServer;
use crate::rt::Resolve;

/// 请求构建器。
///
/// 设置器都返回 `&mut Self` 以便链式调用；`build` 不消耗构建器，可以多次调用。
///
/// ```
/// # use courier::Request;
/// let req = Request::get("http://example.com/search")
///     .add_query_param("q", "rust async")
///     .header("accept", "text/html")
///     .build()
///     .unwrap();
/// assert_eq!(req.url().as_str(), "http://example.com/search?q=rust%20async");
/// ```
#[derive(Clone)]
pub struct RequestBuilder {
    method: Method,
    url: String,
    headers: HeaderMap,
    cookies: Vec<Cookie>,
    body: Body,
    query_params: Vec<Param>,
    charset: Option<String>,
    content_length: Option<u64>,
    proxy: Option<ProxyServer>,
    realm: Option<Realm>,
    virtual_host: Option<String>,
    follow_redirect: Option<bool>,
    request_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    range_offset: u64,
    address: Option<SocketAddr>,
    local_address: Option<IpAddr>,
    partitioning: Option<Arc<dyn Partitioning>>,
    name_resolver: Option<Arc<dyn Resolve>>,
    signature_calculator: Option<Arc<dyn SignatureCalculator>>,
    disable_url_encoding: bool,
    invalid: Option<String>,
}

impl RequestBuilder {
    /// 以方法和 URI 创建构建器。
    pub fn new(method: Method, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            cookies: Vec::new(),
            body: Body::Empty,
            query_params: Vec::new(),
            charset: None,
            content_length: None,
            proxy: None,
            realm: None,
            virtual_host: None,
            follow_redirect: None,
            request_timeout: None,
            read_timeout: None,
            range_offset: 0,
            address: None,
            local_address: None,
            partitioning: None,
            name_resolver: None,
            signature_calculator: None,
            disable_url_encoding: false,
            invalid: None,
        }
    }

    pub(super) fn from_request(req: &Request) -> RequestBuilder {
        let mut b = RequestBuilder::new(req.method.clone(), req.url.as_str());
        b.headers = req.headers.clone();
        b.cookies = req.cookies.clone();
        b.body = req.body.clone();
        b.charset = req.charset.clone();
        b.content_length = req.content_length;
        b.proxy = req.proxy.clone();
        b.realm = req.realm.clone();
        b.virtual_host = req.virtual_host.clone();
        b.follow_redirect = req.follow_redirect;
        b.request_timeout = req.request_timeout;
        b.read_timeout = req.read_timeout;
        b.range_offset = req.range_offset;
        b.address = req.address;
        b.local_address = req.local_address;
        b.partitioning = req.partitioning.clone();
        b.name_resolver = req.name_resolver.clone();
        b
    }

    /// 设置方法。
    pub fn method(&mut self, method: Method) -> &mut Self {
        self.method = method;
        self
    }

    /// 设置目标 URI。
    pub fn url(&mut self, url: impl Into<String>) -> &mut Self {
        self.url = url.into();
        self
    }

    /// 追加一个头部。名字或值非法时，`build` 返回非法请求错误。
    pub fn header<K, V>(&mut self, name: K, value: V) -> &mut Self
    where
        K: TryInto<HeaderName>,
        V: TryInto<HeaderValue>,
    {
        match (name.try_into(), value.try_into()) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            _ => self.mark_invalid("invalid header name or value"),
        }
        self
    }

    /// 设置一个头部，替换同名的已有值。
    pub fn set_header<K, V>(&mut self, name: K, value: V) -> &mut Self
    where
        K: TryInto<HeaderName>,
        V: TryInto<HeaderValue>,
    {
        match (name.try_into(), value.try_into()) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => self.mark_invalid("invalid header name or value"),
        }
        self
    }

    /// 替换全部头部。
    pub fn headers(&mut self, headers: HeaderMap) -> &mut Self {
        self.headers = headers;
        self
    }

    /// 添加一个 cookie。
    pub fn add_cookie(&mut self, cookie: Cookie) -> &mut Self {
        self.cookies.push(cookie);
        self
    }

    /// 设置请求体，替换之前任何形式的请求体。
    pub fn body(&mut self, body: impl Into<Body>) -> &mut Self {
        self.body = body.into();
        self
    }

    /// 字节请求体。
    pub fn body_bytes(&mut self, bytes: impl Into<Bytes>) -> &mut Self {
        self.body = Body::Bytes(bytes.into());
        self
    }

    /// 多段字节请求体。
    pub fn body_bytes_list(&mut self, list: Vec<Bytes>) -> &mut Self {
        self.body = Body::BytesList(list);
        self
    }

    /// 文本请求体。
    pub fn body_string(&mut self, text: impl Into<String>) -> &mut Self {
        self.body = Body::Text(text.into());
        self
    }

    /// 一次性数据流请求体。这样的请求不会被重试。
    pub fn body_stream<S>(&mut self, stream: S) -> &mut Self
    where
        S: Stream<Item = BodyChunk> + Send + 'static,
    {
        self.body = Body::stream(stream);
        self
    }

    /// 可重放的生成器请求体。
    pub fn body_generator<G: BodyGenerator>(&mut self, generator: G) -> &mut Self {
        self.body = Body::generator(generator);
        self
    }

    /// 文件请求体。
    pub fn body_file(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.body = Body::File(path.into());
        self
    }

    /// 替换全部表单参数。
    pub fn form_params(&mut self, params: Vec<Param>) -> &mut Self {
        self.body = Body::Form(params);
        self
    }

    /// 追加一个表单参数；当前请求体不是表单时会被替换。
    pub fn add_form_param(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let param = Param::new(name, value);
        match self.body {
            Body::Form(ref mut params) => params.push(param),
            _ => self.body = Body::Form(vec![param]),
        }
        self
    }

    /// 替换全部 multipart 字段。
    pub fn body_parts(&mut self, parts: Vec<Part>) -> &mut Self {
        self.body = Body::Multipart(parts);
        self
    }

    /// 追加一个 multipart 字段；当前请求体不是 multipart 时会被替换。
    pub fn add_body_part(&mut self, part: Part) -> &mut Self {
        match self.body {
            Body::Multipart(ref mut parts) => parts.push(part),
            _ => self.body = Body::Multipart(vec![part]),
        }
        self
    }

    /// 追加一个查询参数。
    pub fn add_query_param(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.query_params.push(Param::new(name, value));
        self
    }

    /// 替换全部显式查询参数。
    pub fn query_params(&mut self, params: Vec<Param>) -> &mut Self {
        self.query_params = params;
        self
    }

    /// 显式设置请求体字符集。
    pub fn charset(&mut self, charset: impl Into<String>) -> &mut Self {
        self.charset = Some(charset.into());
        self
    }

    /// 显式设置请求体长度。
    pub fn content_length(&mut self, len: u64) -> &mut Self {
        self.content_length = Some(len);
        self
    }

    /// 请求级代理，优先于客户端配置。
    pub fn proxy(&mut self, proxy: ProxyServer) -> &mut Self {
        self.proxy = Some(proxy);
        self
    }

    /// 认证信息。
    pub fn realm(&mut self, realm: Realm) -> &mut Self {
        self.realm = Some(realm);
        self
    }

    /// 覆盖 `Host` 头部。
    pub fn virtual_host(&mut self, host: impl Into<String>) -> &mut Self {
        self.virtual_host = Some(host.into());
        self
    }

    /// 覆盖客户端的重定向配置。
    pub fn follow_redirect(&mut self, follow: bool) -> &mut Self {
        self.follow_redirect = Some(follow);
        self
    }

    /// 请求级整体超时。
    pub fn request_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// 请求级读空闲超时。
    pub fn read_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// 从 `offset` 字节处继续下载。
    pub fn range_offset(&mut self, offset: u64) -> &mut Self {
        self.range_offset = offset;
        self
    }

    /// 直接连接该地址，不再解析主机名。同时参与连接池分区。
    pub fn address(&mut self, addr: SocketAddr) -> &mut Self {
        self.address = Some(addr);
        self
    }

    /// 绑定本地地址。
    pub fn local_address(&mut self, addr: IpAddr) -> &mut Self {
        self.local_address = Some(addr);
        self
    }

    /// 请求级连接池分区策略。
    pub fn partitioning(&mut self, partitioning: Arc<dyn Partitioning>) -> &mut Self {
        self.partitioning = Some(partitioning);
        self
    }

    /// 请求级名字解析器。
    pub fn name_resolver(&mut self, resolver: Arc<dyn Resolve>) -> &mut Self {
        self.name_resolver = Some(resolver);
        self
    }

    /// 签名计算器。
    pub fn signature_calculator(&mut self, calc: Arc<dyn SignatureCalculator>) -> &mut Self {
        self.signature_calculator = Some(calc);
        self
    }

    /// 不对查询参数做百分号编码。
    pub fn disable_url_encoding(&mut self, disable: bool) -> &mut Self {
        self.disable_url_encoding = disable;
        self
    }

    fn mark_invalid(&mut self, msg: &str) {
        if self.invalid.is_none() {
            self.invalid = Some(msg.to_owned());
        }
    }

    /// 构建请求。不修改构建器本身。
    pub fn build(&self) -> crate::Result<Request> {
        if let Some(calc) = self.signature_calculator.as_ref() {
            let mut unsigned = self.clone();
            unsigned.signature_calculator = None;
            let request = unsigned.finish()?;
            calc.calculate_and_add_signature(&request, &mut unsigned);
            return unsigned.finish();
        }
        self.finish()
    }

    fn finish(&self) -> crate::Result<Request> {
        if let Some(ref msg) = self.invalid {
            return Err(Error::new_invalid_request(msg.clone()));
        }

        let mut url = uri::parse(&self.url)?;
        uri::merge_query(&mut url, &self.query_params, !self.disable_url_encoding);

        let charset = self.charset.clone().or_else(|| {
            self.headers
                .get(CONTENT_TYPE)
                .and_then(|ct| ct.to_str().ok())
                .and_then(headers::content_type_charset)
        });

        let content_length = match self.content_length {
            Some(len) => Some(len),
            None if self.body.is_stream() => None,
            None if self.headers.contains_key(CONTENT_LENGTH) => {
                headers::content_length_parse_all(&self.headers)
            }
            None => None,
        };

        Ok(Request {
            method: self.method.clone(),
            url,
            headers: self.headers.clone(),
            cookies: self.cookies.clone(),
            body: self.body.clone(),
            charset,
            content_length,
            proxy: self.proxy.clone(),
            realm: self.realm.clone(),
            virtual_host: self.virtual_host.clone(),
            follow_redirect: self.follow_redirect,
            request_timeout: self.request_timeout,
            read_timeout: self.read_timeout,
            range_offset: self.range_offset,
            address: self.address,
            local_address: self.local_address,
            partitioning: self.partitioning.clone(),
            name_resolver: self.name_resolver.clone(),
        })
    }
}

impl fmt::Debug for RequestBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBuilder")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .finish()
    }
}
