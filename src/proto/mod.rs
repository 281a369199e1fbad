//! 报文协议层。
//!
//! courier 只讲 HTTP/1.1：`h1` 负责请求头的序列化、请求体的分帧、响应头的解析
//! 以及响应体的解码。这一层不知道连接池、重定向或回调的存在，
//! 执行状态机只通过 [`h1::Conn`] 与它交互。

pub(crate) mod h1;
