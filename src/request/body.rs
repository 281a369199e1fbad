use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures_util::stream::{BoxStream, Stream, StreamExt};

use crate::error::BoxError;
use crate::multipart::Part;

use super::Param;

/// 请求体数据流中的一个分块。
pub type BodyChunk = Result<Bytes, BoxError>;

/// 可重放的请求体生成器：每次调用都产生一个新的数据流。
pub trait BodyGenerator: Send + Sync + 'static {
    /// 返回一个从头开始的新数据流。
    fn generate(&self) -> BoxStream<'static, BodyChunk>;

    /// 数据总长度，未知时为 `None`。
    fn content_length(&self) -> Option<u64> {
        None
    }
}

impl<F, S> BodyGenerator for F
where
    F: Fn() -> S + Send + Sync + 'static,
    S: Stream<Item = BodyChunk> + Send + 'static,
{
    fn generate(&self) -> BoxStream<'static, BodyChunk> {
        (self)().boxed()
    }
}

/// 请求体。任意时刻只会有一种表示形式。
#[derive(Clone, Default)]
pub enum Body {
    /// 无请求体。
    #[default]
    Empty,
    /// 一段字节。
    Bytes(Bytes),
    /// 多段字节，按顺序发送。
    BytesList(Vec<Bytes>),
    /// 文本，按请求的字符集发送（只支持 UTF-8 编码的内容）。
    Text(String),
    /// 一次性数据流，不能重放。
    Stream(OneShot),
    /// 可重放的生成器。
    Generator(Arc<dyn BodyGenerator>),
    /// 从磁盘读取的文件。
    File(PathBuf),
    /// `application/x-www-form-urlencoded` 表单参数。
    Form(Vec<Param>),
    /// multipart 字段。
    Multipart(Vec<Part>),
}

/// 只能被取走一次的数据流。
#[derive(Clone)]
pub struct OneShot(Arc<Mutex<Option<BoxStream<'static, BodyChunk>>>>);

impl OneShot {
    pub(crate) fn new(stream: BoxStream<'static, BodyChunk>) -> OneShot {
        OneShot(Arc::new(Mutex::new(Some(stream))))
    }

    pub(crate) fn take(&self) -> Option<BoxStream<'static, BodyChunk>> {
        self.0.lock().ok().and_then(|mut slot| slot.take())
    }
}

impl Body {
    /// 把任意数据流包装为一次性请求体。
    pub fn stream<S>(stream: S) -> Body
    where
        S: Stream<Item = BodyChunk> + Send + 'static,
    {
        Body::Stream(OneShot::new(stream.boxed()))
    }

    /// 把生成器包装为可重放请求体。
    pub fn generator<G: BodyGenerator>(generator: G) -> Body {
        Body::Generator(Arc::new(generator))
    }

    /// 是否为空。
    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }

    /// 是否为一次性数据流。
    pub fn is_stream(&self) -> bool {
        matches!(self, Body::Stream(_))
    }

    /// 重试或重定向时能否再发送一次。
    pub fn is_replayable(&self) -> bool {
        !self.is_stream()
    }

    /// 不依赖头部即可知道的长度。
    pub(crate) fn known_length(&self) -> Option<u64> {
        match self {
            Body::Empty => Some(0),
            Body::Bytes(b) => Some(b.len() as u64),
            Body::BytesList(list) => Some(list.iter().map(|b| b.len() as u64).sum()),
            Body::Text(s) => Some(s.len() as u64),
            Body::Stream(_) => None,
            Body::Generator(g) => g.content_length(),
            Body::File(path) => match std::fs::metadata(path) {
                Ok(meta) if meta.is_file() => Some(meta.len()),
                _ => None,
            },
            Body::Form(_) => None,
            Body::Multipart(_) => None,
        }
    }
}

impl fmt::Debug for OneShot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let taken = self.0.lock().map_or(true, |slot| slot.is_none());
        f.debug_struct("OneShot").field("taken", &taken).finish()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => f.write_str("Empty"),
            Body::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Body::BytesList(l) => f.debug_tuple("BytesList").field(&l.len()).finish(),
            Body::Text(s) => f.debug_tuple("Text").field(&s.len()).finish(),
            Body::Stream(_) => f.write_str("Stream"),
            Body::Generator(_) => f.write_str("Generator"),
            Body::File(p) => f.debug_tuple("File").field(p).finish(),
            Body::Form(p) => f.debug_tuple("Form").field(p).finish(),
            Body::Multipart(p) => f.debug_tuple("Multipart").field(p).finish(),
        }
    }
}

impl From<Bytes> for Body {
    fn from(b: Bytes) -> Body {
        Body::Bytes(b)
    }
}

impl From<Vec<u8>> for Body {
    fn from(v: Vec<u8>) -> Body {
        Body::Bytes(v.into())
    }
}

impl From<String> for Body {
    fn from(s: String) -> Body {
        Body::Text(s)
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Body {
        Body::Text(s.to_owned())
    }
}
