//! 响应体解码器。
//!
//! 解码器不做 IO：调用方把读到的字节放进缓冲区，反复调用 `decode` 取出报文体数据，
//! 缓冲区耗尽时再去读连接。连接读到 EOF 时调用 `on_eof`，由解码器判断报文是否完整。

use std::fmt;

use bytes::{Buf, Bytes, BytesMut};

use crate::error::Parse;

/// 报文体的三种分帧方式。
#[derive(Clone, PartialEq)]
pub(crate) struct Decoder {
    kind: Kind,
}

#[derive(Debug, Clone, PartialEq)]
enum Kind {
    /// 剩余的字节数。
    Length(u64),
    /// chunked 编码。
    Chunked { state: ChunkedState, size: u64 },
    /// 以连接关闭作为结束。布尔值表示是否已经读到 EOF。
    Eof(bool),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ChunkedState {
    Start,
    Size,
    SizeLws,
    Extension,
    SizeLf,
    Body,
    BodyCr,
    BodyLf,
    Trailer,
    TrailerLine,
    EndLf,
    End,
}

impl Decoder {
    pub(crate) fn length(len: u64) -> Decoder {
        Decoder {
            kind: Kind::Length(len),
        }
    }

    pub(crate) fn chunked() -> Decoder {
        Decoder {
            kind: Kind::Chunked {
                state: ChunkedState::Start,
                size: 0,
            },
        }
    }

    pub(crate) fn eof() -> Decoder {
        Decoder {
            kind: Kind::Eof(false),
        }
    }

    /// 报文体是否已经完整读取。
    pub(crate) fn is_eof(&self) -> bool {
        matches!(
            self.kind,
            Kind::Length(0)
                | Kind::Chunked {
                    state: ChunkedState::End,
                    ..
                }
                | Kind::Eof(true)
        )
    }

    /// 以连接关闭作为结束的报文体，连接无法复用。
    pub(crate) fn is_close_delimited(&self) -> bool {
        matches!(self.kind, Kind::Eof(_))
    }

    /// 从 `buf` 中取出下一段报文体数据。返回 `None` 表示需要更多输入，或者报文已经结束。
    pub(crate) fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, Parse> {
        match self.kind {
            Kind::Length(ref mut remaining) => {
                if *remaining == 0 || buf.is_empty() {
                    return Ok(None);
                }
                let n = (*remaining).min(buf.len() as u64) as usize;
                *remaining -= n as u64;
                Ok(Some(buf.split_to(n).freeze()))
            }
            Kind::Chunked {
                ref mut state,
                ref mut size,
            } => decode_chunked(state, size, buf),
            Kind::Eof(finished) => {
                if finished || buf.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(buf.split().freeze()))
                }
            }
        }
    }

    /// 连接读到了 EOF。定长或 chunked 报文在此之前尚未结束即视为不完整。
    pub(crate) fn on_eof(&mut self) -> crate::Result<()> {
        match self.kind {
            Kind::Eof(ref mut finished) => {
                *finished = true;
                Ok(())
            }
            _ if self.is_eof() => Ok(()),
            _ => {
                debug!("connection closed before body completed: {:?}", self);
                Err(crate::Error::new_incomplete())
            }
        }
    }
}

fn decode_chunked(
    state: &mut ChunkedState,
    size: &mut u64,
    buf: &mut BytesMut,
) -> Result<Option<Bytes>, Parse> {
    loop {
        match *state {
            ChunkedState::End => return Ok(None),
            ChunkedState::Body => {
                if buf.is_empty() {
                    return Ok(None);
                }
                let n = (*size).min(buf.len() as u64) as usize;
                *size -= n as u64;
                if *size == 0 {
                    *state = ChunkedState::BodyCr;
                }
                return Ok(Some(buf.split_to(n).freeze()));
            }
            _ => {
                if buf.is_empty() {
                    return Ok(None);
                }
                let byte = buf[0];
                buf.advance(1);
                *state = step(*state, byte, size)?;
            }
        }
    }
}

fn step(state: ChunkedState, byte: u8, size: &mut u64) -> Result<ChunkedState, Parse> {
    use self::ChunkedState::*;

    Ok(match (state, byte) {
        (Start, b) | (Size, b) if b.is_ascii_hexdigit() => {
            let digit = (b as char).to_digit(16).unwrap_or(0) as u64;
            *size = size
                .checked_mul(16)
                .and_then(|s| s.checked_add(digit))
                .ok_or(Parse::Chunk)?;
            Size
        }
        (Size, b'\t') | (Size, b' ') | (SizeLws, b'\t') | (SizeLws, b' ') => SizeLws,
        (Size, b';') | (SizeLws, b';') => Extension,
        (Size, b'\r') | (SizeLws, b'\r') | (Extension, b'\r') => SizeLf,
        (Extension, _) => Extension,
        (SizeLf, b'\n') if *size == 0 => Trailer,
        (SizeLf, b'\n') => Body,
        (BodyCr, b'\r') => BodyLf,
        (BodyLf, b'\n') => {
            *size = 0;
            Start
        }
        (Trailer, b'\r') => EndLf,
        (Trailer, _) | (TrailerLine, _) if byte != b'\n' => TrailerLine,
        (TrailerLine, b'\n') => Trailer,
        (EndLf, b'\n') => End,
        _ => {
            debug!("invalid chunk framing byte {:?} in state {:?}", byte, state);
            return Err(Parse::Chunk);
        }
    })
}

impl fmt::Debug for Decoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.kind, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(decoder: &mut Decoder, input: &[u8]) -> Result<Vec<u8>, Parse> {
        let mut buf = BytesMut::from(input);
        let mut out = Vec::new();
        while let Some(data) = decoder.decode(&mut buf)? {
            out.extend_from_slice(&data);
        }
        Ok(out)
    }

    #[test]
    fn length_stops_at_boundary() {
        let mut d = Decoder::length(5);
        let mut buf = BytesMut::from(&b"helloHTTP/1.1"[..]);
        assert_eq!(d.decode(&mut buf).unwrap().unwrap(), "hello");
        assert!(d.is_eof());
        assert_eq!(d.decode(&mut buf).unwrap(), None);
        assert_eq!(&buf[..], b"HTTP/1.1");
    }

    #[test]
    fn length_incomplete_on_eof() {
        let mut d = Decoder::length(10);
        assert_eq!(drain(&mut d, b"abc").unwrap(), b"abc");
        assert!(d.on_eof().unwrap_err().is_incomplete_message());
    }

    #[test]
    fn chunked_with_extensions_and_trailers() {
        let mut d = Decoder::chunked();
        let body = drain(
            &mut d,
            b"5;ext=1\r\nhello\r\n6 \r\n world\r\n0\r\nX-Trailer: a\r\n\r\n",
        )
        .unwrap();
        assert_eq!(body, b"hello world");
        assert!(d.is_eof());
    }

    #[test]
    fn chunked_across_reads() {
        let mut d = Decoder::chunked();
        let mut out = Vec::new();
        let mut buf = BytesMut::new();
        for piece in [&b"A\r\n01234"[..], b"56789\r", b"\n0\r", b"\n\r\n"] {
            buf.extend_from_slice(piece);
            while let Some(data) = d.decode(&mut buf).unwrap() {
                out.extend_from_slice(&data);
            }
        }
        assert_eq!(out, b"0123456789");
        assert!(d.is_eof());
    }

    #[test]
    fn chunked_rejects_garbage() {
        let mut d = Decoder::chunked();
        assert!(matches!(drain(&mut d, b"zz\r\n"), Err(Parse::Chunk)));

        let mut d = Decoder::chunked();
        assert!(matches!(drain(&mut d, b"3\r\nabcX"), Err(Parse::Chunk)));

        let mut d = Decoder::chunked();
        assert!(matches!(
            drain(&mut d, b"fffffffffffffffffff\r\n"),
            Err(Parse::Chunk)
        ));
    }

    #[test]
    fn chunked_incomplete_on_eof() {
        let mut d = Decoder::chunked();
        drain(&mut d, b"5\r\nhel").unwrap();
        assert!(d.on_eof().is_err());
    }

    #[test]
    fn eof_delimited() {
        let mut d = Decoder::eof();
        assert_eq!(drain(&mut d, b"all of it").unwrap(), b"all of it");
        assert!(!d.is_eof());
        d.on_eof().unwrap();
        assert!(d.is_eof());
        assert!(d.is_close_delimited());
    }
}
