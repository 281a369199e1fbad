//! 单个请求的执行
//!
//! 一个请求在后台任务中经历以下阶段：
//!
//! ```text
//! Dispatched -> Connecting -> Writing -> AwaitingResponse -> Completed
//!      ^                                     |
//!      +---------- Redirecting / Retrying ---+
//! ```
//!
//! 整个执行过程被 [`Watchdog`] 包住，取消、客户端关闭和超时都会让它提前结束；
//! 此时持有的连接随 future 一起被丢弃，`Pooled` 的析构会关闭连接并归还名额。
//!
//! 重定向与重试对 handler 不可见：handler 只看到最终那次尝试的回调。

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::{self, Either};
use futures_util::StreamExt;
use http::header::{
    HeaderValue, ACCEPT, AUTHORIZATION, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, HOST,
    PROXY_AUTHORIZATION, RANGE, TRANSFER_ENCODING, USER_AGENT,
};
use http::{HeaderMap, Method};
use tokio::io::AsyncReadExt;

use super::future::{AbortReason, Shared, Watchdog};
use super::handler::{AsyncHandler, State};
use super::{redirect, retry, ClientRef, CloseDelimited};
use crate::common::time::Time;
use crate::cookie;
use crate::error::Error;
use crate::multipart::MultipartBody;
use crate::pool::{Checkout, PartitionKey, Pooled};
use crate::proto::h1::{encode_head, Conn, Decoder, Encoder, Target};
use crate::proxy::{self, ProxyServer};
use crate::request::{uri, Body, Request};
use crate::response::ResponseStatus;
use crate::rt::{BoxIo, Endpoint};

const BODY_CHUNK_SIZE: usize = 8192;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Phase {
    Dispatched,
    Connecting,
    Writing,
    AwaitingResponse,
    Completed,
    Redirecting,
    Retrying,
    Aborted,
}

enum Step<T> {
    Done(T),
    Redirect(Request),
}

/// 请求体的分帧方式与需要额外发送的 `Content-Type`。
struct Framing {
    length: Option<u64>,
    content_type: Option<HeaderValue>,
    multipart: Option<MultipartBody>,
    // 文本与表单按请求字符集编码后的字节
    encoded: Option<Bytes>,
}

pub(crate) struct ExecutionContext<T> {
    client: Arc<ClientRef>,
    request: Request,
    shared: Arc<Shared<T>>,
    #[cfg_attr(not(feature = "tracing"), allow(dead_code))]
    phase: Phase,
    redirect_count: u32,
    retries: u32,
}

/// 执行 `request` 并把结果写入 `shared`。作为后台任务运行。
pub(crate) async fn execute<H>(
    client: Arc<ClientRef>,
    request: Request,
    mut handler: H,
    shared: Arc<Shared<H::Output>>,
) where
    H: AsyncHandler,
{
    let request_timeout = request.request_timeout.or(client.config.request_timeout);
    let read_timeout = request.read_timeout.or(client.config.read_timeout);
    let time = client.time.clone();

    let mut ctx = ExecutionContext {
        client,
        request,
        shared: shared.clone(),
        phase: Phase::Dispatched,
        redirect_count: 0,
        retries: 0,
    };

    let result = {
        let work = ctx.run(&mut handler);
        Watchdog::new(work, shared.clone(), time, request_timeout, read_timeout).await
    };

    match result {
        Ok(output) => {
            ctx.set_phase(Phase::Completed);
            shared.complete(Ok(output));
        }
        Err(err) => {
            ctx.set_phase(Phase::Aborted);
            debug!("request to {} failed: {}", ctx.request.url, err);
            handler.on_throwable(&err);
            shared.complete(Err(err));
        }
    }
}

impl<T: Send + 'static> ExecutionContext<T> {
    fn set_phase(&mut self, phase: Phase) {
        trace!("{} {}: {:?} -> {:?}", self.request.method, self.request.url, self.phase, phase);
        self.phase = phase;
    }

    async fn run<H>(&mut self, handler: &mut H) -> crate::Result<T>
    where
        H: AsyncHandler<Output = T>,
    {
        loop {
            self.set_phase(Phase::Dispatched);
            if self.client.is_closed() {
                return Err(Error::new_closed());
            }

            let proxy = proxy::resolve(
                self.request.proxy.as_ref(),
                self.client.proxy_selector.as_deref(),
                &self.request.url,
            );
            let key = self.partition_key(proxy.as_ref());

            let mut conn = match self.connect(&key, proxy.as_ref(), handler).await {
                Ok(conn) => conn,
                Err(err) => {
                    if self.should_retry(&err, None, handler) {
                        continue;
                    }
                    return Err(err);
                }
            };

            match self.attempt(&mut conn, proxy.as_ref(), handler).await {
                Ok(Step::Done(output)) => return Ok(output),
                Ok(Step::Redirect(next)) => {
                    self.set_phase(Phase::Redirecting);
                    self.redirect_count += 1;
                    debug!(
                        "redirect {}/{}: {} -> {}",
                        self.redirect_count,
                        self.client.config.max_redirects,
                        self.request.url,
                        next.url
                    );
                    self.request = next;
                }
                Err(err) => {
                    let attempt = if conn.is_released() {
                        None
                    } else {
                        Some(retry::Attempt {
                            bytes_written: conn.bytes_written(),
                            response_started: conn.response_started(),
                            reused: conn.is_reused(),
                        })
                    };
                    conn.close();
                    if self.should_retry(&err, attempt, handler) {
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    fn partition_key(&self, proxy: Option<&ProxyServer>) -> PartitionKey {
        let partitioning = self
            .request
            .partitioning
            .as_ref()
            .unwrap_or(&self.client.partitioning);
        PartitionKey::new(
            self.request.address,
            self.request.local_address,
            partitioning.partition(&self.request.url, proxy),
        )
    }

    fn should_retry<H>(
        &mut self,
        err: &Error,
        attempt: Option<retry::Attempt>,
        handler: &mut H,
    ) -> bool
    where
        H: AsyncHandler<Output = T>,
    {
        if !retry::should_retry(
            err,
            attempt,
            self.request.body.is_replayable(),
            self.retries,
            self.client.config.max_request_retry,
        ) {
            return false;
        }
        self.retries += 1;
        self.set_phase(Phase::Retrying);
        debug!(
            "retrying {} (attempt {}): {}",
            self.request.url, self.retries, err
        );
        if let Some(events) = handler.connection_events() {
            events.on_retry(self.retries);
        }
        true
    }

    async fn connect<H>(
        &mut self,
        key: &PartitionKey,
        proxy: Option<&ProxyServer>,
        handler: &mut H,
    ) -> crate::Result<Pooled<Conn>>
    where
        H: AsyncHandler<Output = T>,
    {
        let slot = match self.client.pool.acquire(key).await? {
            Checkout::Reused(conn) => {
                trace!("reusing connection {} for {}", conn.state().id(), key);
                if let Some(events) = handler.connection_events() {
                    events.on_connection_pooled(conn.state().id());
                }
                return Ok(conn);
            }
            Checkout::Fresh(slot) => slot,
        };

        self.set_phase(Phase::Connecting);
        let time = self.client.time.clone();
        let connect_timeout = time.check(self.client.config.connect_timeout, "connect_timeout");
        let establish = self.establish(proxy, handler);
        let (conn, secure, tunneled) = match connect_timeout {
            Some(dur) => match timeout(&time, dur, establish).await {
                Some(res) => res?,
                None => {
                    debug!("connect to {} timed out after {:?}", key, dur);
                    return Err(Error::new_connect_timeout());
                }
            },
            None => establish.await?,
        };

        let mut pooled = slot.into_pooled(conn, secure);
        if tunneled {
            pooled.state_mut().mark_tunneled();
        }
        debug!("connection {} established for {}", pooled.state().id(), key);
        Ok(pooled)
    }

    /// 建立连接，返回连接以及它是否经过 TLS、是否是隧道。
    async fn establish<H>(
        &self,
        proxy: Option<&ProxyServer>,
        handler: &mut H,
    ) -> crate::Result<(Conn, bool, bool)>
    where
        H: AsyncHandler<Output = T>,
    {
        let url = &self.request.url;
        let host = url.host_str().unwrap_or_default().to_owned();
        let port = uri::port_or_default(url);
        let target_secure = uri::is_secure(url);

        let endpoint = match proxy {
            Some(p) => {
                let scheme = if p.is_secure() { "https" } else { "http" };
                Endpoint::new(scheme, p.host(), p.port())
            }
            None => {
                let mut address = self.request.address;
                if address.is_none() {
                    if let Some(resolver) = self.request.name_resolver.as_ref() {
                        let addrs = resolver
                            .resolve(&host, port)
                            .await
                            .map_err(Error::new_connect)?;
                        if let Some(events) = handler.connection_events() {
                            events.on_hostname_resolved(&host, &addrs);
                        }
                        let first = addrs.first().copied().ok_or_else(|| {
                            Error::new_connect(format!("no addresses resolved for {}", host))
                        })?;
                        address = Some(first);
                    }
                }
                Endpoint::new(url.scheme(), host.clone(), port).with_address(address)
            }
        };
        let endpoint = endpoint.with_local_address(self.request.local_address);

        if let Some(events) = handler.connection_events() {
            events.on_connect_attempt(&endpoint);
        }
        let io = self.client.transport.connect(&endpoint).await.map_err(|e| {
            debug!("connect to {} failed: {}", endpoint, e);
            Error::new_connect(e)
        })?;
        if let Some(events) = handler.connection_events() {
            events.on_connection_open(&endpoint);
        }

        match proxy {
            Some(p) => {
                let io = if p.is_secure() {
                    self.tls(io, p.host(), handler).await?
                } else {
                    io
                };
                if target_secure {
                    let io = self.tunnel(io, p, &host, port).await?;
                    let io = self.tls(io, &host, handler).await?;
                    Ok((Conn::new(io), true, true))
                } else {
                    Ok((Conn::new(io), p.is_secure(), false))
                }
            }
            None if target_secure => {
                let io = self.tls(io, &host, handler).await?;
                Ok((Conn::new(io), true, false))
            }
            None => Ok((Conn::new(io), false, false)),
        }
    }

    async fn tls<H>(&self, io: BoxIo, server_name: &str, handler: &mut H) -> crate::Result<BoxIo>
    where
        H: AsyncHandler<Output = T>,
    {
        let io = self
            .client
            .transport
            .tls_handshake(io, server_name)
            .await
            .map_err(|e| {
                debug!("TLS handshake with {} failed: {}", server_name, e);
                Error::new_tls(e)
            })?;
        if let Some(events) = handler.connection_events() {
            events.on_tls_handshake_completed(server_name);
        }
        Ok(io)
    }

    /// 通过代理建立到 `host:port` 的 CONNECT 隧道。
    async fn tunnel(
        &self,
        io: BoxIo,
        proxy: &ProxyServer,
        host: &str,
        port: u16,
    ) -> crate::Result<BoxIo> {
        let mut conn = Conn::new(io);
        let mut headers = HeaderMap::new();
        let authority = HeaderValue::try_from(format!("{}:{}", host, port))
            .map_err(Error::new_invalid_request)?;
        headers.insert(HOST, authority);
        if let Some(auth) = proxy.authorization() {
            headers.insert(PROXY_AUTHORIZATION, auth);
        }
        if let Some(ua) = self.user_agent() {
            headers.insert(USER_AGENT, ua);
        }

        let mut head = Vec::new();
        encode_head(&Method::CONNECT, Target::Authority(host, port), &headers, &mut head);
        conn.write_all(&head).await.map_err(Error::new_connect)?;
        conn.flush().await.map_err(Error::new_connect)?;

        let res = conn
            .read_head(
                &Method::CONNECT,
                CloseDelimited::Accept,
                self.client.config.max_response_head_size,
            )
            .await
            .map_err(Error::new_connect)?;
        if !res.status.is_success() {
            debug!("proxy {}:{} refused tunnel: {}", proxy.host(), proxy.port(), res.status);
            return Err(Error::new_connect(format!(
                "proxy CONNECT to {}:{} failed with status {}",
                host, port, res.status
            )));
        }

        let (io, leftover) = conn.into_io();
        if !leftover.is_empty() {
            return Err(Error::new_connect(
                "proxy sent data before the tunnel was established",
            ));
        }
        trace!("tunnel to {}:{} established", host, port);
        Ok(io)
    }

    fn user_agent(&self) -> Option<HeaderValue> {
        self.client
            .config
            .user_agent
            .as_deref()
            .and_then(|ua| HeaderValue::from_str(ua).ok())
    }

    /// 在 `conn` 上完成一次请求-响应事务。
    async fn attempt<H>(
        &mut self,
        conn: &mut Pooled<Conn>,
        proxy: Option<&ProxyServer>,
        handler: &mut H,
    ) -> crate::Result<Step<T>>
    where
        H: AsyncHandler<Output = T>,
    {
        let shared = self.shared.clone();
        conn.register(move || {
            shared.abort(AbortReason::Closed);
        });

        self.set_phase(Phase::Writing);
        conn.begin();

        let framing = self.framing()?;
        let absolute = proxy.is_some() && !uri::is_secure(&self.request.url);
        let headers = self.request_headers(proxy, absolute, &framing)?;
        let target = if absolute {
            Target::Absolute(&self.request.url)
        } else {
            Target::Origin(&self.request.url)
        };
        let mut head = Vec::new();
        encode_head(&self.request.method, target, &headers, &mut head);

        let encoder = match framing.length {
            Some(len) => Encoder::length(len),
            None => Encoder::chunked(),
        };
        conn.write_all(&head).await.map_err(Error::new_io)?;
        self.write_body(conn, encoder, framing.multipart, framing.encoded).await?;
        conn.flush().await.map_err(Error::new_io)?;
        trace!("request sent ({} bytes)", conn.bytes_written());

        self.set_phase(Phase::AwaitingResponse);
        let config = &self.client.config;
        let mut res = conn
            .read_head(
                &self.request.method,
                config.close_delimited_body,
                config.max_response_head_size,
            )
            .await?;
        self.shared.touch();

        let keep_alive = config.keep_alive
            && res.reusable
            && self
                .client
                .keep_alive
                .keep_alive(&self.request, res.version, &res.headers);
        if !keep_alive {
            conn.state_mut().disable_keep_alive();
        }

        if let Some(next) = self.redirect_target(res.status, &res.headers)? {
            discard_body(conn, &mut res.decoder).await;
            return Ok(Step::Redirect(next));
        }

        let status = ResponseStatus::new(res.status, res.version, self.request.url.clone());
        if handler
            .on_status_received(&status)
            .map_err(Error::new_user_callback)?
            == State::Abort
        {
            return self.abort_delivery(conn, handler);
        }
        if handler
            .on_headers_received(&res.headers)
            .map_err(Error::new_user_callback)?
            == State::Abort
        {
            return self.abort_delivery(conn, handler);
        }

        while let Some(chunk) = conn.read_body(&mut res.decoder).await? {
            self.shared.touch();
            if handler
                .on_body_part_received(&chunk)
                .map_err(Error::new_user_callback)?
                == State::Abort
            {
                return self.abort_delivery(conn, handler);
            }
        }

        if !conn.is_clean() {
            conn.state_mut().disable_keep_alive();
        }
        conn.release();

        let output = handler.on_completed().map_err(Error::new_user_callback)?;
        Ok(Step::Done(output))
    }

    fn abort_delivery<H>(&mut self, conn: &mut Pooled<Conn>, handler: &mut H) -> crate::Result<Step<T>>
    where
        H: AsyncHandler<Output = T>,
    {
        debug!("handler aborted response from {}", self.request.url);
        conn.close();
        let output = handler.on_completed().map_err(Error::new_user_callback)?;
        Ok(Step::Done(output))
    }

    fn redirect_target(
        &self,
        status: http::StatusCode,
        headers: &HeaderMap,
    ) -> crate::Result<Option<Request>> {
        let config = &self.client.config;
        let follow = self.request.follow_redirect.unwrap_or(config.follow_redirect);
        if !follow || config.max_redirects == 0 || !redirect::is_redirect(status) {
            return Ok(None);
        }
        if self.redirect_count >= config.max_redirects {
            return Err(Error::new_too_many_redirects(config.max_redirects));
        }
        redirect::follow(&self.request, status, headers, config.strict_302_handling)
    }

    fn framing(&self) -> crate::Result<Framing> {
        let req = &self.request;
        let framing = match req.body {
            Body::Form(ref params) => {
                let encoded = uri::form_urlencode(params, req.charset.as_deref());
                Framing {
                    length: Some(encoded.len() as u64),
                    content_type: Some(HeaderValue::from_static(
                        "application/x-www-form-urlencoded",
                    )),
                    multipart: None,
                    encoded: Some(Bytes::from(encoded)),
                }
            }
            Body::Text(ref text) => {
                let encoded = Bytes::from(
                    uri::encode_text(text, req.charset.as_deref()).into_owned(),
                );
                Framing {
                    length: Some(req.content_length.unwrap_or(encoded.len() as u64)),
                    content_type: None,
                    multipart: None,
                    encoded: Some(encoded),
                }
            }
            Body::Multipart(ref parts) => {
                let declared = req.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
                let body = MultipartBody::new(parts.clone(), declared);
                let content_type =
                    HeaderValue::from_str(body.content_type()).map_err(Error::new_invalid_request)?;
                Framing {
                    length: body.content_length(),
                    content_type: Some(content_type),
                    multipart: Some(body),
                    encoded: None,
                }
            }
            ref body => Framing {
                length: req.content_length.or_else(|| body.known_length()),
                content_type: None,
                multipart: None,
                encoded: None,
            },
        };
        Ok(framing)
    }

    fn request_headers(
        &self,
        proxy: Option<&ProxyServer>,
        absolute: bool,
        framing: &Framing,
    ) -> crate::Result<HeaderMap> {
        let req = &self.request;
        let config = &self.client.config;
        let mut headers = req.headers.clone();

        if !headers.contains_key(HOST) {
            let host = match req.virtual_host {
                Some(ref vhost) => vhost.clone(),
                None => uri::host_header(&req.url),
            };
            headers.insert(HOST, HeaderValue::try_from(host).map_err(Error::new_invalid_request)?);
        }
        if !headers.contains_key(USER_AGENT) {
            if let Some(ua) = self.user_agent() {
                headers.insert(USER_AGENT, ua);
            }
        }
        if !headers.contains_key(ACCEPT) {
            headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        }
        if !headers.contains_key(CONNECTION) {
            let value = if config.keep_alive { "keep-alive" } else { "close" };
            headers.insert(CONNECTION, HeaderValue::from_static(value));
        }
        if !req.cookies.is_empty() {
            let value = HeaderValue::try_from(cookie::encode(&req.cookies))
                .map_err(Error::new_invalid_request)?;
            headers.insert(COOKIE, value);
        }
        if !headers.contains_key(AUTHORIZATION) {
            let preemptive = req.realm.as_ref().filter(|realm| realm.is_preemptive());
            if let Some(value) = preemptive.and_then(|realm| realm.basic_header()) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        if absolute && !headers.contains_key(PROXY_AUTHORIZATION) {
            if let Some(value) = proxy.and_then(ProxyServer::authorization) {
                headers.insert(PROXY_AUTHORIZATION, value);
            }
        }
        if req.range_offset > 0 && !headers.contains_key(RANGE) {
            headers.insert(RANGE, crate::headers::range_from(req.range_offset));
        }
        if let Some(ref content_type) = framing.content_type {
            headers.insert(CONTENT_TYPE, content_type.clone());
        }

        headers.remove(TRANSFER_ENCODING);
        match framing.length {
            Some(0) if !expects_body(&req.method) => {
                headers.remove(CONTENT_LENGTH);
            }
            Some(len) => {
                headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
            }
            None => {
                headers.remove(CONTENT_LENGTH);
                headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
            }
        }
        Ok(headers)
    }

    async fn write_body(
        &self,
        conn: &mut Conn,
        mut encoder: Encoder,
        multipart: Option<MultipartBody>,
        encoded: Option<Bytes>,
    ) -> crate::Result<()> {
        let mut scratch = Vec::with_capacity(BODY_CHUNK_SIZE + 16);
        match self.request.body {
            Body::Empty => {}
            Body::Bytes(ref bytes) => send_chunk(conn, &mut encoder, bytes, &mut scratch).await?,
            Body::BytesList(ref list) => {
                for bytes in list {
                    send_chunk(conn, &mut encoder, bytes, &mut scratch).await?;
                }
            }
            Body::Text(_) | Body::Form(_) => {
                if let Some(ref bytes) = encoded {
                    send_chunk(conn, &mut encoder, bytes, &mut scratch).await?;
                }
            }
            Body::Stream(ref once) => {
                let mut stream = once
                    .take()
                    .ok_or_else(|| Error::new_user_body("request body stream was already consumed"))?;
                while let Some(chunk) = stream.next().await {
                    let chunk: Bytes = chunk.map_err(Error::new_user_body)?;
                    send_chunk(conn, &mut encoder, &chunk, &mut scratch).await?;
                }
            }
            Body::Generator(ref generator) => {
                let mut stream = generator.generate();
                while let Some(chunk) = stream.next().await {
                    let chunk: Bytes = chunk.map_err(Error::new_user_body)?;
                    send_chunk(conn, &mut encoder, &chunk, &mut scratch).await?;
                }
            }
            Body::File(ref path) => send_file(conn, &mut encoder, path, &mut scratch).await?,
            Body::Multipart(_) => {
                if let Some(mut body) = multipart {
                    let mut buf = vec![0u8; BODY_CHUNK_SIZE];
                    loop {
                        let n = body.read(&mut buf).await.map_err(Error::new_user_body)?;
                        if n == 0 {
                            break;
                        }
                        send_chunk(conn, &mut encoder, &buf[..n], &mut scratch).await?;
                    }
                    body.close();
                }
            }
        }

        scratch.clear();
        encoder.end(&mut scratch)?;
        if !scratch.is_empty() {
            conn.write_all(&scratch).await.map_err(Error::new_io)?;
        }
        Ok(())
    }
}

fn expects_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

async fn send_chunk(
    conn: &mut Conn,
    encoder: &mut Encoder,
    data: &[u8],
    scratch: &mut Vec<u8>,
) -> crate::Result<()> {
    if data.is_empty() {
        return Ok(());
    }
    scratch.clear();
    encoder.encode(data, scratch)?;
    conn.write_all(scratch).await.map_err(Error::new_io)
}

async fn send_file(
    conn: &mut Conn,
    encoder: &mut Encoder,
    path: &Path,
    scratch: &mut Vec<u8>,
) -> crate::Result<()> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(Error::new_user_body)?;
    let mut buf = vec![0u8; BODY_CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).await.map_err(Error::new_user_body)?;
        if n == 0 {
            return Ok(());
        }
        send_chunk(conn, encoder, &buf[..n], scratch).await?;
    }
}

/// 读完重定向响应的报文体，让连接可以复用；读失败或无法判断边界时关闭连接。
async fn discard_body(conn: &mut Pooled<Conn>, decoder: &mut Decoder) {
    if decoder.is_close_delimited() {
        conn.close();
        return;
    }
    loop {
        match conn.read_body(decoder).await {
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(_e) => {
                debug!("failed to drain redirect body: {}", _e);
                conn.close();
                return;
            }
        }
    }
    if !conn.is_clean() {
        conn.state_mut().disable_keep_alive();
    }
    conn.release();
}

async fn timeout<F: Future>(time: &Time, dur: Duration, fut: F) -> Option<F::Output> {
    let fut = std::pin::pin!(fut);
    match future::select(fut, time.sleep(dur)).await {
        Either::Left((out, _)) => Some(out),
        Either::Right(_) => None,
    }
}
