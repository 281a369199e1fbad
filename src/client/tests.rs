use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, RANGE};
use http::{HeaderMap, Method, StatusCode};

use super::*;
use crate::cookie::Cookie;
use crate::error::BoxError;
use crate::mock::{ok, status, MockTransport, Reply};
use crate::proxy::{ProxyServer, ProxyType};
use crate::request::{AuthScheme, Body, BodyChunk, Realm};
use crate::response::ResponseStatus;

fn client(transport: &MockTransport, configure: impl FnOnce(&mut Builder)) -> Client {
    let mut builder = Client::builder();
    configure(&mut builder);
    builder.build(transport.clone())
}

#[test]
fn builder_overrides_config() {
    let mut builder = Builder::new(crate::rt::tokio::TokioExecutor);
    builder
        .follow_redirect(true)
        .max_redirects(2)
        .user_agent(None)
        .max_connections_per_host(Some(1));
    assert!(builder.config.follow_redirect);
    assert_eq!(builder.config.max_redirects, 2);
    assert!(builder.config.user_agent.is_none());
    assert_eq!(builder.pool.max_connections_per_host, Some(1));
}

#[test]
fn prepare_honors_disable_url_encoding() {
    let mut builder = Builder::new(crate::rt::tokio::TokioExecutor);
    builder.disable_url_encoding(true);
    let client = builder.build(MockTransport::new());
    let req = client
        .prepare(Method::GET, "http://example.com/")
        .add_query_param("q", "a/b")
        .build()
        .unwrap();
    assert_eq!(req.url().query(), Some("q=a/b"));
}

#[tokio::test]
async fn get_reuses_connection() {
    let _ = pretty_env_logger::try_init();
    let transport = MockTransport::script(|_| ok("hello"));
    let client = client(&transport, |_| {});

    for _ in 0..2 {
        let req = Request::get("http://example.com/path?x=1").build().unwrap();
        let res = client.request(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.body(), "hello");
    }

    assert_eq!(transport.connects(), 1);
    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    let first = &requests[0];
    assert_eq!(first.method, "GET");
    assert_eq!(first.target, "/path?x=1");
    assert_eq!(first.header("host"), Some("example.com"));
    assert_eq!(first.header("accept"), Some("*/*"));
    assert!(first.header("user-agent").unwrap().starts_with("courier/"));
    assert!(first.header("content-length").is_none());
    assert_eq!(requests[1].connection, first.connection);
}

#[tokio::test]
async fn zero_max_redirects_delivers_redirect() {
    let transport = MockTransport::script(|_| status(302, "Location: /elsewhere\r\n"));
    let client = client(&transport, |b| {
        b.follow_redirect(true).max_redirects(0);
    });

    let req = Request::get("http://example.com/").build().unwrap();
    let res = client.request(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test]
async fn follows_relative_redirect_as_get() {
    let transport = MockTransport::script(|req| match req.target.as_str() {
        "/a/start" => status(301, "Location: /other\r\n"),
        _ => ok("done"),
    });
    let client = client(&transport, |b| {
        b.follow_redirect(true);
    });

    let req = Request::post("http://example.com/a/start")
        .body_string("payload")
        .build()
        .unwrap();
    let res = client.request(req).await.unwrap();
    assert_eq!(res.body(), "done");
    assert_eq!(res.url().path(), "/other");

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].body, "payload");
    assert_eq!(requests[1].method, "GET");
    assert_eq!(requests[1].target, "/other");
    assert!(requests[1].body.is_empty());
    // the drained redirect response leaves the connection reusable
    assert_eq!(transport.connects(), 1);
}

#[tokio::test]
async fn redirect_loop_is_bounded() {
    let transport = MockTransport::script(|_| status(302, "Location: /loop\r\n"));
    let client = client(&transport, |b| {
        b.follow_redirect(true).max_redirects(2);
    });

    let req = Request::get("http://example.com/loop").build().unwrap();
    let err = client.request(req).await.unwrap_err();
    assert!(err.is_too_many_redirects());
    assert_eq!(transport.requests().len(), 3);
}

#[tokio::test]
async fn request_level_follow_overrides_client() {
    let transport = MockTransport::script(|req| match req.target.as_str() {
        "/" => status(307, "Location: /next\r\n"),
        _ => ok("next"),
    });
    let client = client(&transport, |_| {});

    let req = Request::get("http://example.com/")
        .follow_redirect(true)
        .build()
        .unwrap();
    let res = client.request(req).await.unwrap();
    assert_eq!(res.body(), "next");
}

#[tokio::test]
async fn default_headers_for_range_cookies_and_auth() {
    let transport = MockTransport::new();
    let client = client(&transport, |_| {});

    let req = Request::get("http://example.com:8080/file")
        .range_offset(500)
        .add_cookie(Cookie::new("session", "abc").unwrap())
        .realm(Realm::basic("user", "secret"))
        .build()
        .unwrap();
    client.request(req).await.unwrap();

    let recorded = &transport.requests()[0];
    assert_eq!(recorded.header(RANGE.as_str()), Some("bytes=500-"));
    assert_eq!(recorded.header(COOKIE.as_str()), Some("session=abc"));
    assert_eq!(
        recorded.header(AUTHORIZATION.as_str()),
        Some("Basic dXNlcjpzZWNyZXQ=")
    );
    assert_eq!(recorded.header("host"), Some("example.com:8080"));
}

#[tokio::test]
async fn form_multipart_and_streamed_bodies() {
    let transport = MockTransport::new();
    let client = client(&transport, |_| {});

    let form = Request::post("http://example.com/form")
        .add_form_param("a", "1")
        .add_form_param("b", "x y")
        .build()
        .unwrap();
    client.request(form).await.unwrap();

    let multipart = Request::post("http://example.com/upload")
        .add_body_part(crate::multipart::Part::text("field", "value"))
        .build()
        .unwrap();
    client.request(multipart).await.unwrap();

    let chunks: Vec<BodyChunk> = vec![Ok(Bytes::from_static(b"abc")), Ok(Bytes::from_static(b"def"))];
    let streamed = Request::put("http://example.com/stream")
        .body_stream(futures_util::stream::iter(chunks))
        .build()
        .unwrap();
    client.request(streamed).await.unwrap();

    let empty = Request::post("http://example.com/empty").build().unwrap();
    client.request(empty).await.unwrap();

    let requests = transport.requests();
    assert_eq!(requests[0].body, "a=1&b=x+y");
    assert_eq!(
        requests[0].header(CONTENT_TYPE.as_str()),
        Some("application/x-www-form-urlencoded")
    );

    let ct = requests[1].header(CONTENT_TYPE.as_str()).unwrap();
    assert!(ct.starts_with("multipart/form-data; boundary="));
    let body = String::from_utf8_lossy(&requests[1].body).into_owned();
    assert!(body.contains("name=\"field\""));
    assert!(body.contains("value"));
    assert_eq!(
        requests[1].header("content-length"),
        Some(requests[1].body.len().to_string().as_str())
    );

    assert_eq!(requests[2].header("transfer-encoding"), Some("chunked"));
    assert_eq!(requests[2].body, "abcdef");

    assert_eq!(requests[3].header("content-length"), Some("0"));
}

#[tokio::test]
async fn connect_failures_are_retried() {
    let transport = MockTransport::script(|_| ok("up"));
    transport.fail_connects(2);
    let retries = Arc::new(AtomicU32::new(0));
    let client = client(&transport, |_| {});

    let handler = Observed::new(retries.clone());
    let req = Request::get("http://example.com/").build().unwrap();
    let res = client.execute(req, handler).await.unwrap();
    assert_eq!(res.body(), "up");
    assert_eq!(transport.connects(), 3);
    assert_eq!(retries.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn retry_budget_is_respected() {
    let transport = MockTransport::new();
    transport.fail_connects(10);
    let client = client(&transport, |b| {
        b.max_request_retry(1);
    });

    let req = Request::get("http://example.com/").build().unwrap();
    let err = client.request(req).await.unwrap_err();
    assert!(err.is_connect());
    assert_eq!(transport.connects(), 2);
}

fn stale_after_first() -> impl Fn(&crate::mock::Recorded) -> Reply + Send + Sync {
    let seen = AtomicUsize::new(0);
    move |_| match seen.fetch_add(1, Ordering::SeqCst) {
        1 => Reply::Reset,
        _ => ok("fine"),
    }
}

#[tokio::test]
async fn stale_pooled_connection_is_retried() {
    let transport = MockTransport::script(stale_after_first());
    let client = client(&transport, |_| {});

    for _ in 0..2 {
        let req = Request::get("http://example.com/").build().unwrap();
        let res = client.request(req).await.unwrap();
        assert_eq!(res.body(), "fine");
    }
    assert_eq!(transport.connects(), 2);
    assert_eq!(transport.requests().len(), 3);
}

#[tokio::test]
async fn stale_connection_with_stream_body_fails() {
    let transport = MockTransport::script(stale_after_first());
    let client = client(&transport, |_| {});

    let req = Request::get("http://example.com/").build().unwrap();
    client.request(req).await.unwrap();

    let chunks: Vec<BodyChunk> = vec![Ok(Bytes::from_static(b"once"))];
    let req = Request::post("http://example.com/")
        .body(Body::stream(futures_util::stream::iter(chunks)))
        .build()
        .unwrap();
    let err = client.request(req).await.unwrap_err();
    assert!(err.is_incomplete_message(), "{:?}", err);
}

#[tokio::test]
async fn close_delimited_policy() {
    let transport = MockTransport::script(|_| {
        Reply::Close(Bytes::from_static(b"HTTP/1.1 200 OK\r\n\r\nuntil close"))
    });

    let accepting = client(&transport, |_| {});
    let req = Request::get("http://example.com/").build().unwrap();
    let res = accepting.request(req).await.unwrap();
    assert_eq!(res.body(), "until close");

    let rejecting = client(&transport, |b| {
        b.close_delimited_body(CloseDelimited::Reject).max_request_retry(0);
    });
    let req = Request::get("http://example.com/").build().unwrap();
    let err = rejecting.request(req).await.unwrap_err();
    assert!(err.is_incomplete_message());
}

#[tokio::test]
async fn handler_abort_still_completes() {
    let transport = MockTransport::script(|_| ok("ignored body"));
    let client = client(&transport, |_| {});

    let completed = Arc::new(AtomicBool::new(false));
    let handler = AbortOnStatus {
        completed: completed.clone(),
    };
    let req = Request::get("http://example.com/").build().unwrap();
    let status = client.execute(req, handler).await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert!(completed.load(Ordering::SeqCst));

    // the aborted connection was closed, not pooled
    let req = Request::get("http://example.com/").build().unwrap();
    client.request(req).await.unwrap();
    assert_eq!(transport.connects(), 2);
}

#[tokio::test]
async fn callback_error_reaches_on_throwable() {
    let transport = MockTransport::new();
    let client = client(&transport, |_| {});

    let failed = Arc::new(AtomicBool::new(false));
    let handler = FailOnHeaders {
        failed: failed.clone(),
    };
    let req = Request::get("http://example.com/").build().unwrap();
    let err = client.execute(req, handler).await.unwrap_err();
    assert!(err.is_user());
    assert!(failed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn cancel_wins() {
    let transport = MockTransport::script(|_| Reply::Stall);
    let client = client(&transport, |_| {});

    let req = Request::get("http://example.com/").build().unwrap();
    let fut = client.request(req);
    assert!(fut.cancel());
    assert!(fut.is_cancelled());
    assert!(!fut.cancel());
    let err = fut.await.unwrap_err();
    assert!(err.is_canceled());
}

#[tokio::test(start_paused = true)]
async fn request_timeout_fires() {
    let transport = MockTransport::script(|_| Reply::Stall);
    let client = client(&transport, |b| {
        b.request_timeout(Some(Duration::from_secs(1))).read_timeout(None);
    });

    let req = Request::get("http://example.com/").build().unwrap();
    let err = client.request(req).await.unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test(start_paused = true)]
async fn read_timeout_fires() {
    let transport = MockTransport::script(|_| Reply::Stall);
    let client = client(&transport, |b| {
        b.request_timeout(None).read_timeout(Some(Duration::from_millis(200)));
    });

    let req = Request::get("http://example.com/").build().unwrap();
    let err = client.request(req).await.unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test]
async fn cancel_releases_connection_and_notifies_handler() {
    let transport = MockTransport::script(|_| Reply::Stall);
    let client = client(&transport, |_| {});

    let thrown = Arc::new(Mutex::new(None));
    let handler = Thrown::new(thrown.clone());
    let fut = client.execute(Request::get("http://example.com/").build().unwrap(), handler);
    while transport.requests().is_empty() {
        tokio::task::yield_now().await;
    }
    assert_eq!(client.open_connections(), 1);

    assert!(fut.cancel());
    assert!(fut.await.unwrap_err().is_canceled());
    // the future resolves at once; the background task then unwinds
    tokio::time::timeout(Duration::from_secs(5), async {
        while thrown.lock().unwrap().is_none() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("on_throwable should follow a cancel");
    assert_eq!(*thrown.lock().unwrap(), Some("canceled"));
    assert_eq!(client.open_connections(), 0);
}

#[tokio::test(start_paused = true)]
async fn timeout_releases_connection_and_notifies_handler() {
    let transport = MockTransport::script(|_| Reply::Stall);
    let client = client(&transport, |b| {
        b.request_timeout(Some(Duration::from_secs(1))).read_timeout(None);
    });

    let thrown = Arc::new(Mutex::new(None));
    let handler = Thrown::new(thrown.clone());
    let req = Request::get("http://example.com/").build().unwrap();
    let err = client.execute(req, handler).await.unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(*thrown.lock().unwrap(), Some("timeout"));
    assert_eq!(client.open_connections(), 0);
}

#[tokio::test]
async fn redirect_to_https_opens_secure_connection() {
    let transport = MockTransport::script(|req| match req.endpoint.as_str() {
        "example.com:80" => status(302, "Location: https://example.com/secure\r\n"),
        _ => ok("secure"),
    });
    let client = client(&transport, |b| {
        b.follow_redirect(true);
    });

    let req = Request::get("http://example.com/start").build().unwrap();
    let res = client.request(req).await.unwrap();
    assert_eq!(res.body(), "secure");
    assert_eq!(res.url().scheme(), "https");

    let endpoints = transport.endpoints();
    assert_eq!(endpoints.len(), 2);
    assert_eq!((endpoints[0].scheme(), endpoints[0].port()), ("http", 80));
    assert_eq!((endpoints[1].scheme(), endpoints[1].port()), ("https", 443));
    assert_eq!(transport.tls_names(), vec!["example.com".to_owned()]);

    let requests = transport.requests();
    assert_ne!(requests[0].connection, requests[1].connection);
    assert_eq!(requests[1].target, "/secure");
    // both partitions keep their idle connection
    assert_eq!(client.open_connections(), 2);
}

#[tokio::test]
async fn total_cap_hands_idle_connection_to_other_host() {
    let transport = MockTransport::script(|_| ok("x"));
    let client = client(&transport, |b| {
        b.max_connections(Some(1));
    });

    let first = client.request(Request::get("http://a.example/").build().unwrap());
    let second = client.request(Request::get("http://b.example/").build().unwrap());
    let (first, second) = tokio::time::timeout(Duration::from_secs(5), async {
        (first.await, second.await)
    })
    .await
    .expect("second host should get the idle connection's capacity");
    assert_eq!(first.unwrap().body(), "x");
    assert_eq!(second.unwrap().body(), "x");
    assert_eq!(transport.connects(), 2);
    assert_eq!(client.open_connections(), 1);
}

#[tokio::test]
async fn text_and_form_bodies_follow_charset() {
    let transport = MockTransport::new();
    let client = client(&transport, |_| {});

    let text = Request::post("http://example.com/text")
        .body_string("José")
        .charset("ISO-8859-1")
        .build()
        .unwrap();
    client.request(text).await.unwrap();

    let form = Request::post("http://example.com/form")
        .add_form_param("name", "José")
        .charset("ISO-8859-1")
        .build()
        .unwrap();
    client.request(form).await.unwrap();

    let requests = transport.requests();
    assert_eq!(requests[0].body, &b"Jos\xE9"[..]);
    assert_eq!(requests[0].header("content-length"), Some("4"));
    assert_eq!(requests[1].body, "name=Jos%E9");
}

#[tokio::test]
async fn close_aborts_bound_requests() {
    let transport = MockTransport::script(|_| Reply::Stall);
    let client = client(&transport, |_| {});

    let req = Request::get("http://example.com/").build().unwrap();
    let fut = client.request(req);
    while transport.requests().is_empty() {
        tokio::task::yield_now().await;
    }
    client.close();
    let err = fut.await.unwrap_err();
    assert!(err.is_closed());

    let req = Request::get("http://example.com/").build().unwrap();
    assert!(client.request(req).await.unwrap_err().is_closed());
}

#[tokio::test]
async fn per_host_cap_serializes_requests() {
    let transport = MockTransport::script(|_| ok("x"));
    let client = client(&transport, |b| {
        b.max_connections_per_host(Some(1));
    });

    let futs: Vec<_> = (0..3)
        .map(|_| client.request(Request::get("http://example.com/").build().unwrap()))
        .collect();
    for fut in futs {
        assert_eq!(fut.await.unwrap().body(), "x");
    }
    assert_eq!(transport.connects(), 1);
}

#[tokio::test]
async fn plain_proxy_uses_absolute_form() {
    let transport = MockTransport::new();
    let client = client(&transport, |b| {
        b.proxy_selector(
            ProxyServer::http("proxy.local", 3128).with_realm(Realm::basic("p", "w")),
        );
    });

    let req = Request::get("http://target.example/x?y=1").build().unwrap();
    client.request(req).await.unwrap();

    let recorded = &transport.requests()[0];
    assert_eq!(recorded.endpoint, "proxy.local:3128");
    assert_eq!(recorded.target, "http://target.example/x?y=1");
    assert!(recorded.header("proxy-authorization").is_some());
}

#[tokio::test]
async fn ntlm_proxy_sends_no_basic_credentials() {
    let transport = MockTransport::new();
    let client = client(&transport, |_| {});

    let proxy = ProxyServer::new(ProxyType::Ntlm, "proxy.local", 3128)
        .with_realm(Realm::new(AuthScheme::Ntlm, "DOMAIN\\user", "secret"));
    let req = Request::get("http://target.example/x")
        .proxy(proxy)
        .build()
        .unwrap();
    client.request(req).await.unwrap();

    let recorded = &transport.requests()[0];
    assert_eq!(recorded.endpoint, "proxy.local:3128");
    assert_eq!(recorded.target, "http://target.example/x");
    assert!(recorded.header("proxy-authorization").is_none());
    assert!(transport.tls_names().is_empty());
}

#[tokio::test]
async fn https_through_proxy_tunnels() {
    let transport = MockTransport::script(|req| match req.method.as_str() {
        "CONNECT" => Reply::Bytes(Bytes::from_static(
            b"HTTP/1.1 200 Connection established\r\n\r\n",
        )),
        _ => ok("secret"),
    });
    let client = client(&transport, |_| {});

    let req = Request::get("https://secure.example/inside")
        .proxy(ProxyServer::http("proxy.local", 3128))
        .build()
        .unwrap();
    let res = client.request(req).await.unwrap();
    assert_eq!(res.body(), "secret");

    let requests = transport.requests();
    assert_eq!(requests[0].method, "CONNECT");
    assert_eq!(requests[0].target, "secure.example:443");
    assert_eq!(requests[1].target, "/inside");
    assert_eq!(transport.tls_names(), vec!["secure.example".to_owned()]);
}

#[tokio::test]
async fn refused_tunnel_is_connect_error() {
    let transport = MockTransport::script(|_| status(407, ""));
    let client = client(&transport, |b| {
        b.max_request_retry(0);
    });

    let req = Request::get("https://secure.example/")
        .proxy(ProxyServer::http("proxy.local", 3128))
        .build()
        .unwrap();
    let err = client.request(req).await.unwrap_err();
    assert!(err.is_connect());
}

#[tokio::test]
async fn https_without_tls_support_fails() {
    struct PlainOnly(MockTransport);

    impl Transport for PlainOnly {
        fn connect(
            &self,
            endpoint: &crate::rt::Endpoint,
        ) -> futures_util::future::BoxFuture<'static, std::io::Result<crate::rt::BoxIo>> {
            self.0.connect(endpoint)
        }
    }

    let client = Client::builder().build(PlainOnly(MockTransport::new()));
    let req = Request::get("https://secure.example/").build().unwrap();
    let err = client.request(req).await.unwrap_err();
    assert!(err.is_tls());
}

struct Observed {
    inner: CompletionHandler,
    events: RetryCounter,
}

struct RetryCounter(Arc<AtomicU32>);

impl ConnectionEvents for RetryCounter {
    fn on_retry(&mut self, _attempt: u32) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

impl Observed {
    fn new(retries: Arc<AtomicU32>) -> Observed {
        Observed {
            inner: CompletionHandler::new(),
            events: RetryCounter(retries),
        }
    }
}

impl AsyncHandler for Observed {
    type Output = Response;

    fn on_status_received(&mut self, status: &ResponseStatus) -> Result<State, BoxError> {
        self.inner.on_status_received(status)
    }

    fn on_headers_received(&mut self, headers: &HeaderMap) -> Result<State, BoxError> {
        self.inner.on_headers_received(headers)
    }

    fn on_body_part_received(&mut self, part: &Bytes) -> Result<State, BoxError> {
        self.inner.on_body_part_received(part)
    }

    fn on_completed(&mut self) -> Result<Response, BoxError> {
        self.inner.on_completed()
    }

    fn connection_events(&mut self) -> Option<&mut dyn ConnectionEvents> {
        Some(&mut self.events)
    }
}

struct AbortOnStatus {
    completed: Arc<AtomicBool>,
}

impl AsyncHandler for AbortOnStatus {
    type Output = StatusCode;

    fn on_status_received(&mut self, _status: &ResponseStatus) -> Result<State, BoxError> {
        Ok(State::Abort)
    }

    fn on_headers_received(&mut self, _headers: &HeaderMap) -> Result<State, BoxError> {
        panic!("headers delivered after abort");
    }

    fn on_body_part_received(&mut self, _part: &Bytes) -> Result<State, BoxError> {
        panic!("body delivered after abort");
    }

    fn on_completed(&mut self) -> Result<StatusCode, BoxError> {
        self.completed.store(true, Ordering::SeqCst);
        Ok(StatusCode::OK)
    }
}

struct FailOnHeaders {
    failed: Arc<AtomicBool>,
}

impl AsyncHandler for FailOnHeaders {
    type Output = ();

    fn on_status_received(&mut self, _status: &ResponseStatus) -> Result<State, BoxError> {
        Ok(State::Continue)
    }

    fn on_headers_received(&mut self, _headers: &HeaderMap) -> Result<State, BoxError> {
        Err("rejected".into())
    }

    fn on_body_part_received(&mut self, _part: &Bytes) -> Result<State, BoxError> {
        Ok(State::Continue)
    }

    fn on_completed(&mut self) -> Result<(), BoxError> {
        panic!("completed after a callback error");
    }

    fn on_throwable(&mut self, error: &crate::Error) {
        assert!(error.is_user());
        self.failed.store(true, Ordering::SeqCst);
    }
}

/// 记录 `on_throwable` 收到的错误类别。
struct Thrown {
    inner: CompletionHandler,
    kind: Arc<Mutex<Option<&'static str>>>,
}

impl Thrown {
    fn new(kind: Arc<Mutex<Option<&'static str>>>) -> Thrown {
        Thrown {
            inner: CompletionHandler::new(),
            kind,
        }
    }
}

impl AsyncHandler for Thrown {
    type Output = Response;

    fn on_status_received(&mut self, status: &ResponseStatus) -> Result<State, BoxError> {
        self.inner.on_status_received(status)
    }

    fn on_headers_received(&mut self, headers: &HeaderMap) -> Result<State, BoxError> {
        self.inner.on_headers_received(headers)
    }

    fn on_body_part_received(&mut self, part: &Bytes) -> Result<State, BoxError> {
        self.inner.on_body_part_received(part)
    }

    fn on_completed(&mut self) -> Result<Response, BoxError> {
        self.inner.on_completed()
    }

    fn on_throwable(&mut self, error: &crate::Error) {
        let kind = if error.is_canceled() {
            "canceled"
        } else if error.is_timeout() {
            "timeout"
        } else {
            "other"
        };
        *self.kind.lock().unwrap() = Some(kind);
    }
}
