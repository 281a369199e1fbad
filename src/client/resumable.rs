//! 断点续传
//!
//! [`ResumableHandler`] 包装另一个 handler，记录每个 URL 已经收到的字节数。
//! 下载中断后，用 [`ResumableHandler::adjust_request_range`] 为新请求加上
//! `Range: bytes=<n>-`，从断点继续。
//!
//! 进度保存在显式传入的 [`ResumableIndex`] 中，没有全局状态。需要跨进程
//! 保存时给它配一个 [`ResumableStore`]，并在进程退出前调用
//! [`ResumableIndex::flush`]。

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use http::header::RANGE;
use http::{HeaderMap, StatusCode};

use super::handler::{AsyncHandler, ConnectionEvents, State};
use crate::error::{BoxError, Error};
use crate::request::Request;
use crate::response::ResponseStatus;

/// 续传进度的持久化后端。
pub trait ResumableStore: Send + Sync + 'static {
    /// 读出全部记录。
    fn load(&self) -> io::Result<HashMap<String, u64>>;

    /// 用 `entries` 替换已保存的全部记录。
    fn save(&self, entries: &HashMap<String, u64>) -> io::Result<()>;
}

/// 以文本文件保存进度，每行一条 `url=字节数`。
#[derive(Clone, Debug)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// 使用 `path` 处的文件。
    pub fn new(path: impl Into<PathBuf>) -> FileStore {
        FileStore { path: path.into() }
    }

    /// 文件路径。
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResumableStore for FileStore {
    fn load(&self) -> io::Result<HashMap<String, u64>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(e),
        };

        let mut entries = HashMap::new();
        for line in text.lines() {
            // urls may contain '=' themselves
            match line.rsplit_once('=').map(|(url, n)| (url, n.trim().parse::<u64>())) {
                Some((url, Ok(n))) if !url.is_empty() => {
                    entries.insert(url.to_owned(), n);
                }
                _ if line.trim().is_empty() => {}
                _ => {
                    debug!("skipping malformed resumable record: {:?}", line);
                }
            }
        }
        Ok(entries)
    }

    fn save(&self, entries: &HashMap<String, u64>) -> io::Result<()> {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let mut file = File::create(&tmp)?;
        for (url, n) in entries {
            writeln!(file, "{}={}", url, n)?;
        }
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, &self.path)
    }
}

/// URL 到已确认字节数的映射。
pub struct ResumableIndex {
    entries: Mutex<HashMap<String, u64>>,
    store: Option<Box<dyn ResumableStore>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ResumableIndex {
    /// 只在内存中保存的索引。
    pub fn new() -> ResumableIndex {
        ResumableIndex {
            entries: Mutex::new(HashMap::new()),
            store: None,
        }
    }

    /// 从 `store` 载入已有记录，之后 `flush` 写回同一个后端。
    pub fn with_store<S: ResumableStore>(store: S) -> io::Result<ResumableIndex> {
        let entries = store.load()?;
        debug!("loaded {} resumable entries", entries.len());
        Ok(ResumableIndex {
            entries: Mutex::new(entries),
            store: Some(Box::new(store)),
        })
    }

    /// 记录 `url` 已经收到 `bytes` 字节。
    pub fn put(&self, url: &str, bytes: u64) {
        lock(&self.entries).insert(url.to_owned(), bytes);
    }

    /// 查询 `url` 的进度。
    pub fn get(&self, url: &str) -> Option<u64> {
        lock(&self.entries).get(url).copied()
    }

    /// 删除 `url` 的记录。
    pub fn remove(&self, url: &str) -> Option<u64> {
        lock(&self.entries).remove(url)
    }

    /// 记录条数。
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    /// 是否没有任何记录。
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 把当前记录写入持久化后端。没有后端时是无操作。
    pub fn flush(&self) -> io::Result<()> {
        if let Some(store) = self.store.as_ref() {
            let snapshot = lock(&self.entries).clone();
            store.save(&snapshot)?;
            trace!("flushed {} resumable entries", snapshot.len());
        }
        Ok(())
    }
}

impl Default for ResumableIndex {
    fn default() -> ResumableIndex {
        ResumableIndex::new()
    }
}

impl fmt::Debug for ResumableIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResumableIndex")
            .field("entries", &self.len())
            .field("persistent", &self.store.is_some())
            .finish()
    }
}

/// 接收续传数据的目的地。
pub trait ResumableListener: Send + 'static {
    /// 收到一段数据。
    fn on_bytes_received(&mut self, bytes: &Bytes) -> io::Result<()>;

    /// 全部数据已经收到。
    fn on_all_bytes_received(&mut self) -> io::Result<()>;

    /// 目的地已有的字节数，用于校正断点。
    fn length(&self) -> u64;
}

/// 把数据追加写入文件。
#[derive(Debug)]
pub struct FileListener {
    file: File,
    path: PathBuf,
}

impl FileListener {
    /// 以追加方式打开（或创建）`path`。
    pub fn open(path: impl Into<PathBuf>) -> io::Result<FileListener> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(FileListener { file, path })
    }

    /// 文件路径。
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResumableListener for FileListener {
    fn on_bytes_received(&mut self, bytes: &Bytes) -> io::Result<()> {
        self.file.write_all(bytes)
    }

    fn on_all_bytes_received(&mut self) -> io::Result<()> {
        self.file.flush()
    }

    fn length(&self) -> u64 {
        self.file.metadata().map(|m| m.len()).unwrap_or(0)
    }
}

/// 记录下载进度的 handler 装饰器。
///
/// 只接受 200 与 206 响应，其他状态码直接中止交付。
pub struct ResumableHandler<H> {
    inner: H,
    index: Arc<ResumableIndex>,
    listener: Option<Box<dyn ResumableListener>>,
    url: Option<String>,
    bytes_transferred: u64,
    accepted: bool,
}

impl<H: AsyncHandler> ResumableHandler<H> {
    /// 包装 `inner`，进度记录在 `index` 中。
    pub fn new(inner: H, index: Arc<ResumableIndex>) -> ResumableHandler<H> {
        ResumableHandler {
            inner,
            index,
            listener: None,
            url: None,
            bytes_transferred: 0,
            accepted: false,
        }
    }

    /// 收到的数据同时写给 `listener`。
    pub fn with_listener<L: ResumableListener>(mut self, listener: L) -> ResumableHandler<H> {
        self.listener = Some(Box::new(listener));
        self
    }

    /// 已经收到的字节数。
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    /// 手动设置断点。
    pub fn set_bytes_transferred(&mut self, bytes: u64) -> &mut Self {
        self.bytes_transferred = bytes;
        self
    }

    /// 为 `request` 补上续传用的 `Range` 头部。
    ///
    /// 断点依次取自索引中该 URL 的记录、listener 已有的长度，以及
    /// [`set_bytes_transferred`](Self::set_bytes_transferred) 设置的值。
    /// 请求已经带有 `Range` 时保持不变。
    pub fn adjust_request_range(&mut self, request: &Request) -> crate::Result<Request> {
        let url = request.url().as_str().to_owned();
        if let Some(n) = self.index.get(&url) {
            self.bytes_transferred = n;
        }
        if let Some(listener) = self.listener.as_ref() {
            let len = listener.length();
            if len > 0 && len != self.bytes_transferred {
                debug!("listener holds {} bytes, index says {}", len, self.bytes_transferred);
                self.bytes_transferred = len;
            }
        }
        self.url = Some(url);

        if self.bytes_transferred == 0 || request.headers().contains_key(RANGE) {
            return Ok(request.clone());
        }
        let mut builder = request.to_builder();
        builder.set_header(RANGE, crate::headers::range_from(self.bytes_transferred));
        builder.build()
    }

    fn track(&mut self, status: &ResponseStatus) {
        if self.url.is_none() {
            self.url = Some(status.url().as_str().to_owned());
        }
    }
}

impl<H: AsyncHandler> AsyncHandler for ResumableHandler<H> {
    type Output = H::Output;

    fn on_status_received(&mut self, status: &ResponseStatus) -> Result<State, BoxError> {
        self.track(status);
        match status.status() {
            StatusCode::OK | StatusCode::PARTIAL_CONTENT => {
                self.accepted = true;
                self.inner.on_status_received(status)
            }
            _other => {
                debug!("status {} is not resumable, aborting", _other);
                Ok(State::Abort)
            }
        }
    }

    fn on_headers_received(&mut self, headers: &HeaderMap) -> Result<State, BoxError> {
        self.inner.on_headers_received(headers)
    }

    fn on_body_part_received(&mut self, part: &Bytes) -> Result<State, BoxError> {
        if let Some(listener) = self.listener.as_mut() {
            listener.on_bytes_received(part)?;
        }
        self.bytes_transferred += part.len() as u64;
        if let Some(url) = self.url.as_deref() {
            self.index.put(url, self.bytes_transferred);
        }
        self.inner.on_body_part_received(part)
    }

    fn on_completed(&mut self) -> Result<H::Output, BoxError> {
        if self.accepted {
            if let Some(url) = self.url.as_deref() {
                self.index.remove(url);
            }
            if let Some(listener) = self.listener.as_mut() {
                listener.on_all_bytes_received()?;
            }
        }
        self.inner.on_completed()
    }

    fn on_throwable(&mut self, error: &Error) {
        self.inner.on_throwable(error)
    }

    fn connection_events(&mut self) -> Option<&mut dyn ConnectionEvents> {
        self.inner.connection_events()
    }
}

impl<H: fmt::Debug> fmt::Debug for ResumableHandler<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResumableHandler")
            .field("inner", &self.inner)
            .field("url", &self.url)
            .field("bytes_transferred", &self.bytes_transferred)
            .finish()
    }
}
