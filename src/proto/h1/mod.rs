//! HTTP/1.1 编解码。
//!
//! 子模块分工：
//! - `conn`：包装一条已建立的连接，负责带缓冲的读写与写入字节数统计
//! - `encode`：请求头序列化与请求体分帧（Content-Length / chunked）
//! - `decode`：响应体解码（定长 / chunked / 连接关闭分隔），不做任何 IO
//! - `role`：用 `httparse` 解析响应头，并据此决定响应体的解码方式

pub(crate) use self::conn::Conn;
pub(crate) use self::decode::Decoder;
pub(crate) use self::encode::{encode_head, Encoder, Target};

mod conn;
mod decode;
mod encode;
mod role;

/// 响应头的最大长度默认值。
pub(crate) const DEFAULT_MAX_HEAD_SIZE: usize = 64 * 1024;

/// 单条响应允许的最大头部数量。
const MAX_HEADERS: usize = 100;
