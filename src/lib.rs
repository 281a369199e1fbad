#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![cfg_attr(test, deny(rust_2018_idioms))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! # courier
//!
//! courier 是一个异步 HTTP/1.1 客户端引擎：请求在复用的连接上发出，响应按
//! 到达的顺序通过回调逐段交付，重定向、重试、代理、multipart 请求体、
//! cookie 与断点续传都在引擎内部完成。
//!
//! ## 使用
//!
//! ```no_run
//! # async fn run() -> courier::Result<()> {
//! use courier::{Client, Request};
//!
//! let client = Client::new();
//! let request = Request::get("http://example.com/").build()?;
//! let response = client.request(request).await?;
//! println!("{} {}", response.status(), response.body_string());
//! # Ok(())
//! # }
//! ```
//!
//! 需要逐段处理响应或提前中止时，实现 [`client::AsyncHandler`] 并调用
//! [`Client::execute`]。
//!
//! ## 可选 feature
//!
//! - `tokio`（默认开启）：基于 tokio 的执行器、定时器与明文 TCP 传输。
//! - `tracing`：通过 `tracing` 输出调试日志。courier 从不安装 subscriber。
//!
//! TLS 不是内置能力：需要访问 https 目标时，提供一个实现了
//! [`rt::Transport::tls_handshake`] 的传输层。

#[doc(hidden)]
pub use http;

#[doc(no_inline)]
pub use http::{header, HeaderMap, Method, StatusCode, Version};

pub use crate::client::Client;
pub use crate::cookie::Cookie;
pub use crate::error::{BoxError, Error, Result};
pub use crate::request::{AuthScheme, Body, Param, Realm, Request, RequestBuilder};
pub use crate::response::{Response, ResponseStatus};

#[macro_use]
mod cfg;
#[macro_use]
mod trace;

pub mod client;
mod common;
pub mod cookie;
mod error;
mod headers;
#[cfg(test)]
mod mock;
pub mod multipart;
pub mod pool;
mod proto;
pub mod proxy;
pub mod request;
mod response;
pub mod rt;
