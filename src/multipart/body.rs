use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use tokio::io::{AsyncRead, ReadBuf};

use super::part::{Part, Source};
use super::{generate_boundary, length_of_parts};
use crate::headers;

const FILE_CHUNK: usize = 8 * 1024;

/// 可流式读取的 multipart 请求体。
///
/// 每次 `poll_read` 都尽量填满调用方的缓冲区，缓冲区再小也能跨多次调用续读。
/// 文件字段在轮到它时才打开，读到 EOF 后立即关闭。
pub struct MultipartBody {
    parts: Vec<Part>,
    boundary: String,
    content_type: String,
    content_length: Option<u64>,
    state: State,
    pending: Bytes,
    file: Option<tokio::fs::File>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Part(usize, Stage),
    MessageEnd,
    Done,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    Header,
    Body,
    Trailer,
}

impl MultipartBody {
    /// 创建请求体。
    ///
    /// `content_type` 是调用方已经设置的 `Content-Type`：其中带有 `boundary=`
    /// 时沿用该分隔符；不带时在末尾追加生成的分隔符；为 `None` 时使用
    /// `multipart/form-data`。
    pub fn new(parts: Vec<Part>, content_type: Option<&str>) -> MultipartBody {
        let (boundary, content_type) = match content_type {
            Some(ct) => match headers::content_type_boundary(ct) {
                Some(boundary) => (boundary, ct.to_owned()),
                None => {
                    let boundary = generate_boundary();
                    let base = ct.trim_end_matches(|c: char| c == ';' || c == ' ');
                    let ct = format!("{}; boundary={}", base, boundary);
                    (boundary, ct)
                }
            },
            None => {
                let boundary = generate_boundary();
                let ct = format!("multipart/form-data; boundary={}", boundary);
                (boundary, ct)
            }
        };

        let content_length = length_of_parts(&parts, &boundary);
        let state = if parts.is_empty() {
            State::MessageEnd
        } else {
            State::Part(0, Stage::Header)
        };

        MultipartBody {
            parts,
            boundary,
            content_type,
            content_length,
            state,
            pending: Bytes::new(),
            file: None,
        }
    }

    /// 分隔符。
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// 最终的 `Content-Type` 头部值。
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// 总长度；任一字段长度未知时为 `None`，此时应使用分块传输。
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// 提前结束读取并释放所有打开的文件。
    pub fn close(&mut self) {
        if self.file.take().is_some() {
            trace!("multipart: closing file part early");
        }
        self.pending = Bytes::new();
        self.state = State::Done;
    }

    /// 推进到下一个需要输出的片段。返回 `false` 表示需要读取文件。
    fn advance_state(&mut self) -> io::Result<bool> {
        match self.state {
            State::Part(idx, Stage::Header) => {
                let part = &self.parts[idx];
                self.pending = part.head(&self.boundary);
                if let Some(path) = part.file_path() {
                    let std_file = std::fs::File::open(path)?;
                    self.file = Some(tokio::fs::File::from_std(std_file));
                }
                self.state = State::Part(idx, Stage::Body);
                Ok(true)
            }
            State::Part(idx, Stage::Body) => match self.parts[idx].source() {
                Source::File(_) => Ok(false),
                Source::Text(_) | Source::Bytes(_) => {
                    self.pending = self.parts[idx].payload().unwrap_or_default();
                    self.state = State::Part(idx, Stage::Trailer);
                    Ok(true)
                }
            },
            State::Part(idx, Stage::Trailer) => {
                self.pending = Bytes::from_static(b"\r\n");
                self.state = if idx + 1 < self.parts.len() {
                    State::Part(idx + 1, Stage::Header)
                } else {
                    State::MessageEnd
                };
                Ok(true)
            }
            State::MessageEnd => {
                self.pending = Bytes::from(format!("--{}--\r\n", self.boundary));
                self.state = State::Done;
                Ok(true)
            }
            State::Done => Ok(true),
        }
    }
}

impl AsyncRead for MultipartBody {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let me = self.get_mut();
        let start = buf.filled().len();

        while buf.remaining() > 0 {
            if me.pending.has_remaining() {
                let n = std::cmp::min(me.pending.len(), buf.remaining());
                buf.put_slice(&me.pending[..n]);
                me.pending.advance(n);
                continue;
            }

            if me.state == State::Done {
                break;
            }

            if me.advance_state()? {
                continue;
            }

            // file body
            let file = match me.file.as_mut() {
                Some(file) => file,
                None => {
                    if let State::Part(idx, _) = me.state {
                        me.state = State::Part(idx, Stage::Trailer);
                    }
                    continue;
                }
            };

            let mut chunk = [0u8; FILE_CHUNK];
            let want = std::cmp::min(FILE_CHUNK, buf.remaining());
            let mut tmp = ReadBuf::new(&mut chunk[..want]);
            match Pin::new(file).poll_read(cx, &mut tmp) {
                Poll::Ready(Ok(())) => {
                    let n = tmp.filled().len();
                    if n == 0 {
                        trace!("multipart: file part drained, closing");
                        me.file = None;
                        if let State::Part(idx, _) = me.state {
                            me.state = State::Part(idx, Stage::Trailer);
                        }
                    } else {
                        buf.put_slice(tmp.filled());
                    }
                }
                Poll::Ready(Err(e)) => {
                    me.file = None;
                    return Poll::Ready(Err(e));
                }
                Poll::Pending => {
                    if buf.filled().len() > start {
                        return Poll::Ready(Ok(()));
                    }
                    return Poll::Pending;
                }
            }
        }

        Poll::Ready(Ok(()))
    }
}

impl fmt::Debug for MultipartBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultipartBody")
            .field("boundary", &self.boundary)
            .field("parts", &self.parts.len())
            .field("content_length", &self.content_length)
            .field("state", &self.state)
            .finish()
    }
}
