//! 连接池
//!
//! 按 [`PartitionKey`] 分桶保存可复用的连接，同时受全局总数与每分区数量两道上限约束。
//!
//! ## 并发模型
//!
//! - 每个分区有自己的互斥锁，获取、归还与清扫在分区内互斥，分区之间互不阻塞。
//!   分区表本身的锁只在查找或创建分区时短暂持有。
//! - 分区达到上限时，`acquire` 要么立即以 `PoolExhausted` 失败，要么在该分区排队；
//!   连接归还或名额释放时直接交给队首的等待者。
//! - 全局达到上限时，先尝试关闭其他分区的一条空闲连接腾出名额，否则失败或等待。
//!
//! ## 所有权
//!
//! 空闲连接归池所有；`acquire` 借出一条 [`Pooled`] 连接，或者一个用来新建连接的
//! [`Slot`] 名额。借出的连接必须恰好归还或关闭一次：[`Pooled::release`] 是幂等的，
//! 未归还就被 drop 的连接视为状态不明，直接关闭。
//!
//! 过期连接由周期性的清扫任务关闭，不在每个请求上检查整个池。

mod keep_alive;
mod key;
mod state;

pub use self::keep_alive::{DefaultKeepAliveStrategy, KeepAliveStrategy};
pub use self::key::{Authority, Partition, PartitionKey, Partitioning, PerHost, PerProxy};
pub use self::state::ConnectionState;

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::{oneshot, Notify};

use crate::common::exec::Exec;
use crate::common::time::Time;
use crate::error::Error;

/// 连接池配置。
#[derive(Clone, Debug)]
pub struct Config {
    /// 全局连接总数上限，`None` 表示不限。
    pub max_connections: Option<usize>,
    /// 每个分区的连接数上限，`None` 表示不限。
    pub max_connections_per_host: Option<usize>,
    /// 空闲连接的存活时间。为 0 时连接从不复用。
    pub idle_timeout: Option<Duration>,
    /// 连接的绝对存活上限，与是否活跃无关。
    pub ttl: Option<Duration>,
    /// 达到上限时立即失败而不是排队等待。
    pub fail_fast: bool,
    /// TLS 连接是否允许复用。
    pub pool_tls: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            max_connections: None,
            max_connections_per_host: None,
            idle_timeout: Some(Duration::from_secs(60)),
            ttl: None,
            fail_fast: false,
            pool_tls: true,
        }
    }
}

/// 连接池。克隆得到的是同一个池的句柄。
pub struct Pool<T> {
    inner: Arc<PoolInner<T>>,
}

struct PoolInner<T> {
    config: Config,
    partitions: Mutex<HashMap<PartitionKey, Arc<Bucket<T>>>>,
    total: AtomicUsize,
    capacity: Notify,
    closed: AtomicBool,
    next_id: AtomicU64,
    registry: Mutex<HashMap<u64, Aborter>>,
    time: Time,
}

type Aborter = Box<dyn FnOnce() + Send>;

struct Bucket<T> {
    key: PartitionKey,
    state: Mutex<BucketState<T>>,
}

struct BucketState<T> {
    idle: VecDeque<Idle<T>>,
    // idle + borrowed + reserved slots
    open: usize,
    waiters: VecDeque<oneshot::Sender<Handoff<T>>>,
    retired: bool,
}

struct Idle<T> {
    value: T,
    state: ConnectionState,
}

enum Handoff<T> {
    Conn(Pooled<T>),
    Slot(Slot<T>),
}

/// `acquire` 的结果。
pub enum Checkout<T> {
    /// 取到一条空闲连接。
    Reused(Pooled<T>),
    /// 取到一个新建连接的名额。
    Fresh(Slot<T>),
}

/// 已预留的连接名额。建立连接后用 [`Slot::into_pooled`] 转为池化连接；
/// 直接 drop 则归还名额。
pub struct Slot<T> {
    pool: Weak<PoolInner<T>>,
    bucket: Arc<Bucket<T>>,
    armed: bool,
}

/// 从池中借出的连接。
pub struct Pooled<T> {
    value: Option<T>,
    state: ConnectionState,
    reused: bool,
    registered: bool,
    pool: Weak<PoolInner<T>>,
    bucket: Arc<Bucket<T>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: Send + 'static> Pool<T> {
    /// 创建一个不带清扫任务的连接池。过期连接只会在获取或归还时被发现。
    pub fn new(config: Config) -> Pool<T> {
        Pool::with_time(config, Time::Empty)
    }

    pub(crate) fn with_time(config: Config, time: Time) -> Pool<T> {
        Pool {
            inner: Arc::new(PoolInner {
                config,
                partitions: Mutex::new(HashMap::new()),
                total: AtomicUsize::new(0),
                capacity: Notify::new(),
                closed: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
                registry: Mutex::new(HashMap::new()),
                time,
            }),
        }
    }

    /// 启动周期性清扫任务。任务只持有池的弱引用，池被释放或关闭后自行退出。
    pub(crate) fn spawn_idle_sweeper(&self, exec: &Exec) {
        let cfg = &self.inner.config;
        let interval = match (cfg.idle_timeout, cfg.ttl) {
            (Some(a), Some(b)) => a.min(b),
            (Some(a), None) | (None, Some(a)) => a,
            (None, None) => return,
        };
        if interval.is_zero() {
            return;
        }
        let time = self.inner.time.clone();
        if time.check(Some(interval), "pool_idle_sweep").is_none() {
            return;
        }

        let interval = interval.max(Duration::from_millis(10));
        let weak = Arc::downgrade(&self.inner);
        exec.execute(async move {
            loop {
                time.sleep(interval).await;
                let inner = match weak.upgrade() {
                    Some(inner) => inner,
                    None => break,
                };
                if inner.closed.load(Ordering::Acquire) {
                    break;
                }
                inner.sweep();
            }
            trace!("idle sweeper exiting");
        });
    }

    /// 为 `key` 获取一条连接或一个新建名额。
    ///
    /// 分区或全局达到上限时，按配置立即返回 `PoolExhausted` 或等待名额释放。
    pub async fn acquire(&self, key: &PartitionKey) -> crate::Result<Checkout<T>> {
        let cfg = &self.inner.config;
        loop {
            let notified = self.inner.capacity.notified();
            let mut notified = std::pin::pin!(notified);
            notified.as_mut().enable();

            if self.inner.closed.load(Ordering::Acquire) {
                return Err(Error::new_closed());
            }

            let bucket = self.inner.bucket(key);
            let rx = {
                let mut st = lock(&bucket.state);
                if st.retired {
                    continue;
                }

                let now = self.inner.time.now();
                let mut expired = 0;
                while let Some(mut idle) = st.idle.pop_back() {
                    if idle.state.is_expired(now, cfg.idle_timeout, cfg.ttl) {
                        trace!("closing expired connection {} for {}", idle.state.id(), key);
                        st.open -= 1;
                        expired += 1;
                        continue;
                    }
                    self.inner.release_total(expired);
                    idle.state.set_busy();
                    trace!("reusing idle connection {} for {}", idle.state.id(), key);
                    return Ok(Checkout::Reused(Pooled {
                        value: Some(idle.value),
                        state: idle.state,
                        reused: true,
                        registered: false,
                        pool: Arc::downgrade(&self.inner),
                        bucket: bucket.clone(),
                    }));
                }
                self.inner.release_total(expired);

                let host_full = cfg
                    .max_connections_per_host
                    .map_or(false, |max| st.open >= max);
                if host_full {
                    if cfg.fail_fast {
                        debug!("per-host limit reached for {}", key);
                        return Err(Error::new_pool_exhausted());
                    }
                    trace!("per-host limit reached for {}, queueing", key);
                    let (tx, rx) = oneshot::channel();
                    st.waiters.push_back(tx);
                    Some(rx)
                } else if self.inner.try_reserve_total() {
                    st.open += 1;
                    return Ok(Checkout::Fresh(Slot {
                        pool: Arc::downgrade(&self.inner),
                        bucket: bucket.clone(),
                        armed: true,
                    }));
                } else {
                    None
                }
            };

            match rx {
                Some(rx) => match rx.await {
                    Ok(Handoff::Conn(pooled)) => return Ok(Checkout::Reused(pooled)),
                    Ok(Handoff::Slot(slot)) => return Ok(Checkout::Fresh(slot)),
                    // dropped by close(), or bucket retired
                    Err(_) => continue,
                },
                None => {
                    if self.inner.reclaim_idle(key) {
                        continue;
                    }
                    if cfg.fail_fast {
                        debug!("total connection limit reached");
                        return Err(Error::new_pool_exhausted());
                    }
                    trace!("total connection limit reached, waiting");
                    notified.await;
                }
            }
        }
    }

    /// 关闭连接池：关闭所有空闲连接，唤醒并拒绝所有等待者，
    /// 并中止所有在注册表中登记过的进行中请求。之后的 `acquire` 返回 `Closed`。
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("closing connection pool");

        let buckets: Vec<_> = lock(&self.inner.partitions).values().cloned().collect();
        for bucket in buckets {
            let (idle, waiters) = {
                let mut st = lock(&bucket.state);
                let idle = std::mem::take(&mut st.idle);
                st.open -= idle.len();
                (idle, std::mem::take(&mut st.waiters))
            };
            self.inner.release_total(idle.len());
            drop(waiters);
            drop(idle);
        }
        self.inner.capacity.notify_waiters();

        let aborters: Vec<Aborter> = lock(&self.inner.registry).drain().map(|(_, f)| f).collect();
        for abort in aborters {
            abort();
        }
    }

    /// 是否已关闭。
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// 分区内的空闲连接数。
    pub fn idle_count(&self, key: &PartitionKey) -> usize {
        self.inner
            .existing_bucket(key)
            .map_or(0, |b| lock(&b.state).idle.len())
    }

    /// 分区内已打开（空闲、借出或预留）的连接数。
    pub fn open_count(&self, key: &PartitionKey) -> usize {
        self.inner
            .existing_bucket(key)
            .map_or(0, |b| lock(&b.state).open)
    }

    /// 全局已打开的连接数。
    pub fn total_connections(&self) -> usize {
        self.inner.total.load(Ordering::Acquire)
    }

    #[cfg(test)]
    fn sweep(&self) {
        self.inner.sweep()
    }
}

impl<T> PoolInner<T> {
    fn bucket(&self, key: &PartitionKey) -> Arc<Bucket<T>> {
        let mut map = lock(&self.partitions);
        map.entry(key.clone())
            .or_insert_with(|| {
                Arc::new(Bucket {
                    key: key.clone(),
                    state: Mutex::new(BucketState {
                        idle: VecDeque::new(),
                        open: 0,
                        waiters: VecDeque::new(),
                        retired: false,
                    }),
                })
            })
            .clone()
    }

    fn existing_bucket(&self, key: &PartitionKey) -> Option<Arc<Bucket<T>>> {
        lock(&self.partitions).get(key).cloned()
    }

    fn try_reserve_total(&self) -> bool {
        let max = match self.config.max_connections {
            Some(max) => max,
            None => {
                self.total.fetch_add(1, Ordering::AcqRel);
                return true;
            }
        };
        let mut current = self.total.load(Ordering::Acquire);
        loop {
            if current >= max {
                return false;
            }
            match self.total.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn release_total(&self, n: usize) {
        if n == 0 {
            return;
        }
        self.total.fetch_sub(n, Ordering::AcqRel);
        for _ in 0..n {
            self.capacity.notify_one();
        }
    }

    /// 关闭另一个分区里最旧的一条空闲连接，为全局上限腾出名额。
    fn reclaim_idle(&self, except: &PartitionKey) -> bool {
        let buckets: Vec<_> = lock(&self.partitions)
            .iter()
            .filter(|(k, _)| *k != except)
            .map(|(_, b)| b.clone())
            .collect();

        for bucket in buckets {
            let victim = {
                let mut st = lock(&bucket.state);
                let victim = st.idle.pop_front();
                if victim.is_some() {
                    st.open -= 1;
                }
                victim
            };
            if let Some(victim) = victim {
                debug!(
                    "closing idle connection {} of {} to free a slot",
                    victim.state.id(),
                    bucket.key
                );
                drop(victim);
                self.release_total(1);
                return true;
            }
        }
        false
    }

    fn sweep(&self) {
        let now = self.time.now();
        let idle_timeout = self.config.idle_timeout;
        let ttl = self.config.ttl;
        let mut evicted = 0;

        lock(&self.partitions).retain(|_key, bucket| {
            let mut st = lock(&bucket.state);
            let before = st.idle.len();
            st.idle
                .retain(|idle| !idle.state.is_expired(now, idle_timeout, ttl));
            let closed = before - st.idle.len();
            if closed > 0 {
                trace!("sweeper closed {} idle connections for {}", closed, _key);
            }
            st.open -= closed;
            evicted += closed;

            if st.open == 0 && st.waiters.is_empty() {
                st.retired = true;
                false
            } else {
                true
            }
        });

        self.release_total(evicted);
    }

    fn register(&self, id: u64, abort: Aborter) -> Option<Aborter> {
        if self.closed.load(Ordering::Acquire) {
            return Some(abort);
        }
        lock(&self.registry).insert(id, abort);
        None
    }

    fn deregister(&self, id: u64) {
        lock(&self.registry).remove(&id);
    }
}

/// 某条连接关闭或某个名额作废后，把名额交给排队者，没有排队者则归还。
fn free_slot<T>(pool: &Weak<PoolInner<T>>, bucket: &Arc<Bucket<T>>) {
    let mut st = lock(&bucket.state);
    while let Some(tx) = st.waiters.pop_front() {
        let slot = Slot {
            pool: pool.clone(),
            bucket: bucket.clone(),
            armed: true,
        };
        match tx.send(Handoff::Slot(slot)) {
            Ok(()) => return,
            Err(handoff) => {
                handoff.disarm();
            }
        }
    }
    st.open -= 1;
    drop(st);

    if let Some(inner) = pool.upgrade() {
        inner.release_total(1);
    }
}

impl<T> Handoff<T> {
    /// 取回一个没送达的交接，不触发它的释放逻辑。
    fn disarm(self) -> Option<(T, ConnectionState)> {
        match self {
            Handoff::Conn(mut pooled) => {
                let value = pooled.value.take()?;
                Some((value, pooled.state.clone()))
            }
            Handoff::Slot(mut slot) => {
                slot.armed = false;
                None
            }
        }
    }
}

impl<T> Slot<T> {
    /// 用新建的连接兑现名额。
    pub fn into_pooled(mut self, value: T, secure: bool) -> Pooled<T> {
        self.armed = false;
        let (id, now) = match self.pool.upgrade() {
            Some(inner) => (
                inner.next_id.fetch_add(1, Ordering::Relaxed),
                inner.time.now(),
            ),
            None => (0, std::time::Instant::now()),
        };
        trace!("new connection {} for {}", id, self.bucket.key);
        Pooled {
            value: Some(value),
            state: ConnectionState::new(id, secure, now),
            reused: false,
            registered: false,
            pool: self.pool.clone(),
            bucket: self.bucket.clone(),
        }
    }

    /// 名额所属的分区。
    pub fn key(&self) -> &PartitionKey {
        &self.bucket.key
    }
}

impl<T> Drop for Slot<T> {
    fn drop(&mut self) {
        if self.armed {
            self.armed = false;
            free_slot(&self.pool, &self.bucket);
        }
    }
}

impl<T> Pooled<T> {
    /// 连接状态。
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// 可修改的连接状态。
    pub fn state_mut(&mut self) -> &mut ConnectionState {
        &mut self.state
    }

    /// 是否是从池中复用的连接。
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    /// 所属分区。
    pub fn key(&self) -> &PartitionKey {
        &self.bucket.key
    }

    /// 连接是否已经归还或关闭。
    pub fn is_released(&self) -> bool {
        self.value.is_none()
    }

    /// 在池的注册表中登记一个中止回调，池关闭时会被调用。
    /// 连接归还或关闭时自动注销。池已关闭时立即调用回调。
    pub fn register<F>(&mut self, abort: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let inner = match self.pool.upgrade() {
            Some(inner) => inner,
            None => return,
        };
        match inner.register(self.state.id(), Box::new(abort)) {
            None => self.registered = true,
            Some(abort) => abort(),
        }
    }

    fn deregister(&mut self) {
        if self.registered {
            self.registered = false;
            if let Some(inner) = self.pool.upgrade() {
                inner.deregister(self.state.id());
            }
        }
    }

    /// 把连接还给池。
    ///
    /// 返回 `true` 表示连接进入空闲队列或交给了等待者；返回 `false` 表示
    /// 池拒绝复用（不保持连接、TLS 不入池、池已关闭等），连接已被关闭。
    /// 重复调用是无操作，返回 `false`。
    pub fn release(&mut self) -> bool {
        let value = match self.value.take() {
            Some(value) => value,
            None => return false,
        };
        self.deregister();

        let inner = match self.pool.upgrade() {
            Some(inner) => inner,
            None => return false,
        };
        let cfg = &inner.config;
        let now = inner.time.now();

        let reusable = self.state.is_keep_alive()
            && !inner.closed.load(Ordering::Acquire)
            && (cfg.pool_tls || !self.state.is_secure())
            && cfg.idle_timeout != Some(Duration::ZERO)
            && !self.state.ttl_expired(now, cfg.ttl);

        if !reusable {
            trace!("closing connection {}, not reusable", self.state.id());
            drop(value);
            free_slot(&self.pool, &self.bucket);
            return false;
        }

        let mut value = value;
        let mut state = self.state.clone();
        state.set_idle(now);

        let mut st = lock(&self.bucket.state);
        while let Some(tx) = st.waiters.pop_front() {
            state.set_busy();
            let handed = Pooled {
                value: Some(value),
                state,
                reused: true,
                registered: false,
                pool: self.pool.clone(),
                bucket: self.bucket.clone(),
            };
            match tx.send(Handoff::Conn(handed)) {
                Ok(()) => {
                    trace!("handed connection {} to a waiter", self.state.id());
                    return true;
                }
                Err(handoff) => match handoff.disarm() {
                    Some((v, s)) => {
                        value = v;
                        state = s;
                    }
                    // a Conn handoff always carries its value
                    None => return true,
                },
            }
        }

        trace!("connection {} returned to {}", self.state.id(), self.bucket.key);
        st.idle.push_back(Idle { value, state });
        drop(st);
        // 其它分区可能在等全局容量，唤醒一个让它回收这条空闲连接
        if cfg.max_connections.is_some() {
            inner.capacity.notify_one();
        }
        true
    }

    /// 关闭连接而不归还。幂等。
    pub fn close(&mut self) {
        if let Some(value) = self.value.take() {
            self.deregister();
            trace!("closing connection {}", self.state.id());
            drop(value);
            free_slot(&self.pool, &self.bucket);
        }
    }
}

impl<T> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // only reachable before release/close, which consume &mut self
        self.value.as_ref().expect("not dropped")
    }
}

impl<T> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value.as_mut().expect("not dropped")
    }
}

impl<T> Drop for Pooled<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T> Clone for Pool<T> {
    fn clone(&self) -> Pool<T> {
        Pool {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.inner.config)
            .field("total", &self.inner.total.load(Ordering::Relaxed))
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl<T> fmt::Debug for Checkout<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Checkout::Reused(p) => f.debug_tuple("Reused").field(p).finish(),
            Checkout::Fresh(s) => f.debug_tuple("Fresh").field(s).finish(),
        }
    }
}

impl<T> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot").field("key", &self.bucket.key).finish()
    }
}

impl<T> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled")
            .field("key", &self.bucket.key)
            .field("state", &self.state)
            .field("reused", &self.reused)
            .finish()
    }
}
