use std::fmt;
use std::path::{Path, PathBuf};

use bytes::{BufMut, Bytes, BytesMut};

const TEXT_DEFAULT_CONTENT_TYPE: &str = "text/plain";
const TEXT_DEFAULT_CHARSET: &str = "UTF-8";
const BINARY_DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// 一个 multipart 字段。
#[derive(Clone)]
pub struct Part {
    name: String,
    source: Source,
    file_name: Option<String>,
    content_type: Option<String>,
    charset: Option<String>,
    transfer_encoding: Option<String>,
    content_id: Option<String>,
    disposition_type: Option<String>,
    headers: Vec<(String, String)>,
}

#[derive(Clone)]
pub(super) enum Source {
    Text(String),
    Bytes(Bytes),
    File(PathBuf),
}

impl Part {
    /// 文本字段，默认 `Content-Type: text/plain; charset=UTF-8`。
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Part {
        Part::new(name.into(), Source::Text(value.into()))
    }

    /// 字节字段，默认 `Content-Type: application/octet-stream`。
    pub fn bytes(name: impl Into<String>, value: impl Into<Bytes>) -> Part {
        Part::new(name.into(), Source::Bytes(value.into()))
    }

    /// 文件字段。文件在读取到该字段时才打开，文件名默认取路径的最后一段。
    pub fn file(name: impl Into<String>, path: impl Into<PathBuf>) -> Part {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned());
        let mut part = Part::new(name.into(), Source::File(path));
        part.file_name = file_name;
        part
    }

    fn new(name: String, source: Source) -> Part {
        Part {
            name,
            source,
            file_name: None,
            content_type: None,
            charset: None,
            transfer_encoding: None,
            content_id: None,
            disposition_type: None,
            headers: Vec::new(),
        }
    }

    /// 设置 `filename` 参数。
    pub fn file_name(mut self, file_name: impl Into<String>) -> Part {
        self.file_name = Some(file_name.into());
        self
    }

    /// 设置 `Content-Type`。
    pub fn content_type(mut self, content_type: impl Into<String>) -> Part {
        self.content_type = Some(content_type.into());
        self
    }

    /// 设置 `charset` 参数。
    pub fn charset(mut self, charset: impl Into<String>) -> Part {
        self.charset = Some(charset.into());
        self
    }

    /// 设置 `Content-Transfer-Encoding`。
    pub fn transfer_encoding(mut self, encoding: impl Into<String>) -> Part {
        self.transfer_encoding = Some(encoding.into());
        self
    }

    /// 设置 `Content-ID`。
    pub fn content_id(mut self, id: impl Into<String>) -> Part {
        self.content_id = Some(id.into());
        self
    }

    /// 设置 disposition 类型，默认 `form-data`。
    pub fn disposition_type(mut self, disposition: impl Into<String>) -> Part {
        self.disposition_type = Some(disposition.into());
        self
    }

    /// 追加一个自定义头部。
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Part {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// 字段名。
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(super) fn source(&self) -> &Source {
        &self.source
    }

    pub(super) fn file_path(&self) -> Option<&Path> {
        match self.source {
            Source::File(ref path) => Some(path),
            _ => None,
        }
    }

    /// 负载长度。文件不存在或不是普通文件时返回 `None`。
    pub fn payload_len(&self) -> Option<u64> {
        match self.source {
            Source::Text(ref s) => Some(s.len() as u64),
            Source::Bytes(ref b) => Some(b.len() as u64),
            Source::File(ref path) => match std::fs::metadata(path) {
                Ok(meta) if meta.is_file() => Some(meta.len()),
                _ => None,
            },
        }
    }

    pub(super) fn payload(&self) -> Option<Bytes> {
        match self.source {
            Source::Text(ref s) => Some(Bytes::copy_from_slice(s.as_bytes())),
            Source::Bytes(ref b) => Some(b.clone()),
            Source::File(_) => None,
        }
    }

    /// 字段头：起始分隔线、各个头部行以及结束的空行。
    pub(super) fn head(&self, boundary: &str) -> Bytes {
        let mut buf = BytesMut::with_capacity(128);
        buf.put_slice(b"--");
        buf.put_slice(boundary.as_bytes());
        buf.put_slice(b"\r\n");

        buf.put_slice(b"Content-Disposition: ");
        buf.put_slice(
            self.disposition_type
                .as_deref()
                .unwrap_or("form-data")
                .as_bytes(),
        );
        buf.put_slice(b"; name=\"");
        buf.put_slice(self.name.as_bytes());
        buf.put_slice(b"\"");
        if let Some(ref file_name) = self.file_name {
            buf.put_slice(b"; filename=\"");
            buf.put_slice(escape_quoted(file_name).as_bytes());
            buf.put_slice(b"\"");
        }
        buf.put_slice(b"\r\n");

        buf.put_slice(b"Content-Type: ");
        match self.source {
            Source::Text(_) => {
                buf.put_slice(
                    self.content_type
                        .as_deref()
                        .unwrap_or(TEXT_DEFAULT_CONTENT_TYPE)
                        .as_bytes(),
                );
                buf.put_slice(b"; charset=");
                buf.put_slice(
                    self.charset
                        .as_deref()
                        .unwrap_or(TEXT_DEFAULT_CHARSET)
                        .as_bytes(),
                );
            }
            Source::Bytes(_) | Source::File(_) => {
                buf.put_slice(
                    self.content_type
                        .as_deref()
                        .unwrap_or(BINARY_DEFAULT_CONTENT_TYPE)
                        .as_bytes(),
                );
                if let Some(ref charset) = self.charset {
                    buf.put_slice(b"; charset=");
                    buf.put_slice(charset.as_bytes());
                }
            }
        }
        buf.put_slice(b"\r\n");

        if let Some(ref encoding) = self.transfer_encoding {
            buf.put_slice(b"Content-Transfer-Encoding: ");
            buf.put_slice(encoding.as_bytes());
            buf.put_slice(b"\r\n");
        }
        if let Some(ref id) = self.content_id {
            buf.put_slice(b"Content-ID: ");
            buf.put_slice(id.as_bytes());
            buf.put_slice(b"\r\n");
        }
        for (name, value) in &self.headers {
            buf.put_slice(name.as_bytes());
            buf.put_slice(b": ");
            buf.put_slice(value.as_bytes());
            buf.put_slice(b"\r\n");
        }

        buf.put_slice(b"\r\n");
        buf.freeze()
    }
}

fn escape_quoted(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\r', "\\\r")
        .replace('\n', "\\\n")
}

impl fmt::Debug for Part {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Part");
        d.field("name", &self.name);
        match self.source {
            Source::Text(ref s) => d.field("text_len", &s.len()),
            Source::Bytes(ref b) => d.field("bytes_len", &b.len()),
            Source::File(ref p) => d.field("file", p),
        };
        d.field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_head_defaults() {
        let head = Part::text("greeting", "hi").head("XyZ");
        assert_eq!(
            &head[..],
            &b"--XyZ\r\n\
               Content-Disposition: form-data; name=\"greeting\"\r\n\
               Content-Type: text/plain; charset=UTF-8\r\n\
               \r\n"[..]
        );
    }

    #[test]
    fn bytes_head_with_extras() {
        let head = Part::bytes("blob", &b"\x00\x01"[..])
            .file_name("a\"b.bin")
            .content_id("<1>")
            .transfer_encoding("binary")
            .header("X-Note", "yes")
            .head("B");
        let head = std::str::from_utf8(&head).unwrap();
        assert!(head.contains("name=\"blob\"; filename=\"a\\\"b.bin\"\r\n"));
        assert!(head.contains("Content-Type: application/octet-stream\r\n"));
        assert!(head.contains("Content-Transfer-Encoding: binary\r\n"));
        assert!(head.contains("Content-ID: <1>\r\n"));
        assert!(head.ends_with("X-Note: yes\r\n\r\n"));
    }

    #[test]
    fn missing_file_has_unknown_length() {
        let part = Part::file("f", "/definitely/not/here.txt");
        assert_eq!(part.payload_len(), None);
        assert!(part.file_path().is_some());
    }
}
