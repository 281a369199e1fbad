//! 面向调用方的响应 Future
//!
//! [`ResponseFuture`] 与执行任务共享一个完成槽位。完成是一次 CAS：正常完成、
//! 取消、客户端关闭三者中最先到达的一方决定结果，后到者的结果（比如取消之后
//! 才到达的报文体）被丢弃。
//!
//! 执行任务自身被 `Watchdog` 包裹，它同时等待三件事：请求本身、取消信号、
//! 以及请求超时与读空闲超时。读空闲超时在每次 `touch` 之后顺延。

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use atomic_waker::AtomicWaker;
use pin_project_lite::pin_project;

use crate::common::time::Time;
use crate::error::Error;
use crate::rt::Sleep;

const PENDING: u8 = 0;
const COMPLETING: u8 = 1;
const DONE: u8 = 2;

type Listener = Box<dyn FnOnce() + Send>;

/// 外部中止的原因。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum AbortReason {
    Canceled,
    Closed,
}

impl AbortReason {
    fn into_error(self) -> Error {
        match self {
            AbortReason::Canceled => Error::new_canceled(),
            AbortReason::Closed => Error::new_closed(),
        }
    }
}

pub(crate) struct Shared<T> {
    state: AtomicU8,
    result: Mutex<Option<crate::Result<T>>>,
    aborted: Mutex<Option<AbortReason>>,
    /// 等待结果的调用方。
    waiter: AtomicWaker,
    /// 执行任务，用于及时观察到中止。
    task: AtomicWaker,
    listeners: Mutex<Vec<Listener>>,
    time: Time,
    origin: Instant,
    /// 最近一次进展距 `origin` 的纳秒数。
    touched: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T> Shared<T> {
    pub(crate) fn new(time: Time) -> Arc<Shared<T>> {
        let origin = time.now();
        Arc::new(Shared {
            state: AtomicU8::new(PENDING),
            result: Mutex::new(None),
            aborted: Mutex::new(None),
            waiter: AtomicWaker::new(),
            task: AtomicWaker::new(),
            listeners: Mutex::new(Vec::new()),
            time,
            origin,
            touched: AtomicU64::new(0),
        })
    }

    /// 尝试以 `result` 完成。已经完成时返回 `false`，`result` 被丢弃。
    pub(crate) fn complete(&self, result: crate::Result<T>) -> bool {
        if !self.begin_completion() {
            trace!("response already completed, dropping late result");
            return false;
        }
        self.finish(result);
        true
    }

    /// 从外部中止：取消或客户端关闭。
    pub(crate) fn abort(&self, reason: AbortReason) -> bool {
        if !self.begin_completion() {
            return false;
        }
        *lock(&self.aborted) = Some(reason);
        self.finish(Err(reason.into_error()));
        true
    }

    fn begin_completion(&self) -> bool {
        self.state
            .compare_exchange(PENDING, COMPLETING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn finish(&self, result: crate::Result<T>) {
        *lock(&self.result) = Some(result);
        self.state.store(DONE, Ordering::Release);

        self.waiter.wake();
        self.task.wake();

        let listeners = std::mem::take(&mut *lock(&self.listeners));
        for listener in listeners {
            listener();
        }
    }

    pub(crate) fn aborted(&self) -> Option<AbortReason> {
        *lock(&self.aborted)
    }

    pub(crate) fn is_done(&self) -> bool {
        self.state.load(Ordering::Acquire) != PENDING
    }

    pub(crate) fn touch(&self) {
        let since = self.time.now().saturating_duration_since(self.origin);
        let nanos = u64::try_from(since.as_nanos()).unwrap_or(u64::MAX);
        self.touched.fetch_max(nanos, Ordering::AcqRel);
    }

    fn last_touch(&self) -> Instant {
        self.origin + Duration::from_nanos(self.touched.load(Ordering::Acquire))
    }

    fn add_listener(&self, listener: Listener) {
        let mut listeners = lock(&self.listeners);
        if self.state.load(Ordering::Acquire) == DONE {
            drop(listeners);
            listener();
        } else {
            listeners.push(listener);
        }
    }
}

/// 请求的结果。
///
/// drop 掉它并不会取消请求；需要取消时调用 [`ResponseFuture::cancel`] 或
/// 通过 [`AbortHandle`] 从别处取消。
#[must_use = "futures do nothing unless polled"]
pub struct ResponseFuture<T> {
    shared: Arc<Shared<T>>,
}

impl<T> ResponseFuture<T> {
    pub(crate) fn new(shared: Arc<Shared<T>>) -> ResponseFuture<T> {
        ResponseFuture { shared }
    }

    /// 一个已经失败的 Future。
    pub(crate) fn error(err: Error) -> ResponseFuture<T> {
        let shared = Shared::new(Time::Empty);
        shared.complete(Err(err));
        ResponseFuture { shared }
    }

    /// 取消请求。返回 `true` 表示取消生效，请求以取消错误结束。
    pub fn cancel(&self) -> bool {
        self.shared.abort(AbortReason::Canceled)
    }

    /// 是否已经结束（完成、失败或取消）。
    pub fn is_done(&self) -> bool {
        self.shared.is_done()
    }

    /// 是否因取消而结束。
    pub fn is_cancelled(&self) -> bool {
        self.shared.aborted() == Some(AbortReason::Canceled)
    }

    /// 报告消费方仍在推进，顺延读空闲超时。
    pub fn touch(&self) {
        self.shared.touch()
    }

    /// 注册一个在结束时运行一次的回调；已经结束时立即运行。
    pub fn add_listener<F>(&self, listener: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.add_listener(Box::new(listener))
    }

    /// 可以跨任务使用的控制句柄。
    pub fn abort_handle(&self) -> AbortHandle
    where
        T: Send + 'static,
    {
        AbortHandle {
            control: self.shared.clone(),
        }
    }
}

impl<T> Future for ResponseFuture<T> {
    type Output = crate::Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.shared.state.load(Ordering::Acquire) != DONE {
            self.shared.waiter.register(cx.waker());
            if self.shared.state.load(Ordering::Acquire) != DONE {
                return Poll::Pending;
            }
        }
        match lock(&self.shared.result).take() {
            Some(result) => Poll::Ready(result),
            None => panic!("ResponseFuture polled after completion"),
        }
    }
}

impl<T> fmt::Debug for ResponseFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseFuture")
            .field("done", &self.is_done())
            .finish()
    }
}

trait Control: Send + Sync {
    fn cancel(&self) -> bool;
    fn touch(&self);
    fn is_done(&self) -> bool;
    fn aborted(&self) -> Option<AbortReason>;
    fn add_listener(&self, listener: Listener);
}

impl<T: Send> Control for Shared<T> {
    fn cancel(&self) -> bool {
        self.abort(AbortReason::Canceled)
    }

    fn touch(&self) {
        Shared::touch(self)
    }

    fn is_done(&self) -> bool {
        Shared::is_done(self)
    }

    fn aborted(&self) -> Option<AbortReason> {
        Shared::aborted(self)
    }

    fn add_listener(&self, listener: Listener) {
        Shared::add_listener(self, listener)
    }
}

/// [`ResponseFuture`] 的控制句柄，可以克隆并发送到其他任务。
#[derive(Clone)]
pub struct AbortHandle {
    control: Arc<dyn Control>,
}

impl AbortHandle {
    /// 取消请求。
    pub fn cancel(&self) -> bool {
        self.control.cancel()
    }

    /// 顺延读空闲超时。
    pub fn touch(&self) {
        self.control.touch()
    }

    /// 是否已经结束。
    pub fn is_done(&self) -> bool {
        self.control.is_done()
    }

    /// 是否因取消而结束。
    pub fn is_cancelled(&self) -> bool {
        self.control.aborted() == Some(AbortReason::Canceled)
    }

    /// 注册结束回调。
    pub fn add_listener<F>(&self, listener: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.control.add_listener(Box::new(listener))
    }
}

impl fmt::Debug for AbortHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortHandle")
            .field("done", &self.is_done())
            .finish()
    }
}

struct ReadTimer {
    timeout: Duration,
    deadline: Instant,
    sleep: Pin<Box<dyn Sleep>>,
}

pin_project! {
    /// 在请求、中止信号与两类超时之间竞争。
    pub(crate) struct Watchdog<F, T> {
        #[pin]
        work: F,
        shared: Arc<Shared<T>>,
        time: Time,
        request: Option<Pin<Box<dyn Sleep>>>,
        read: Option<ReadTimer>,
    }
}

impl<F, T> Watchdog<F, T> {
    pub(crate) fn new(
        work: F,
        shared: Arc<Shared<T>>,
        time: Time,
        request_timeout: Option<Duration>,
        read_timeout: Option<Duration>,
    ) -> Watchdog<F, T> {
        let request = time
            .check(request_timeout, "request_timeout")
            .map(|dur| time.sleep(dur));
        let read = time.check(read_timeout, "read_timeout").map(|timeout| {
            shared.touch();
            let deadline = shared.last_touch() + timeout;
            ReadTimer {
                timeout,
                deadline,
                sleep: time.sleep_until(deadline),
            }
        });
        Watchdog {
            work,
            shared,
            time,
            request,
            read,
        }
    }
}

impl<F, T, O> Future for Watchdog<F, T>
where
    F: Future<Output = crate::Result<O>>,
{
    type Output = crate::Result<O>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        this.shared.task.register(cx.waker());
        if let Some(reason) = this.shared.aborted() {
            debug!("request aborted: {:?}", reason);
            return Poll::Ready(Err(reason.into_error()));
        }

        if let Poll::Ready(out) = this.work.poll(cx) {
            return Poll::Ready(out);
        }

        if let Some(sleep) = this.request.as_mut() {
            if sleep.as_mut().poll(cx).is_ready() {
                debug!("request timed out");
                return Poll::Ready(Err(Error::new_request_timeout()));
            }
        }

        if let Some(read) = this.read.as_mut() {
            while read.sleep.as_mut().poll(cx).is_ready() {
                let next = this.shared.last_touch() + read.timeout;
                if next <= read.deadline {
                    debug!("no read progress for {:?}", read.timeout);
                    return Poll::Ready(Err(Error::new_read_timeout()));
                }
                read.deadline = next;
                this.time.reset(&mut read.sleep, next);
            }
        }

        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn completes_once() {
        let shared = Shared::<u32>::new(Time::Empty);
        let fut = ResponseFuture::new(shared.clone());
        assert!(shared.complete(Ok(1)));
        assert!(!shared.complete(Ok(2)));
        assert!(!fut.cancel());
        assert!(!fut.is_cancelled());
        assert_eq!(fut.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn cancel_wins_over_late_completion() {
        let shared = Shared::<u32>::new(Time::Empty);
        let fut = ResponseFuture::new(shared.clone());
        let handle = fut.abort_handle();
        assert!(handle.cancel());
        assert!(!shared.complete(Ok(1)));
        assert!(fut.is_cancelled());
        assert!(fut.await.unwrap_err().is_canceled());
    }

    #[tokio::test]
    async fn listeners_run_once() {
        let shared = Shared::<()>::new(Time::Empty);
        let fut = ResponseFuture::new(shared.clone());
        let hits = Arc::new(AtomicUsize::new(0));

        let h = hits.clone();
        fut.add_listener(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        shared.complete(Ok(()));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let h = hits.clone();
        fut.add_listener(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn error_future() {
        let fut = ResponseFuture::<()>::error(Error::new_closed());
        assert!(fut.is_done());
        assert!(fut.await.unwrap_err().is_closed());
    }
}
