//! 定时器封装。
//!
//! `Time` 把用户提供的 [`Timer`] 包成一个可克隆的句柄，客户端、执行任务与
//! 连接池共享同一个实例。未配置定时器时所有超时都被禁用，`check` 会打印警告。

use std::{fmt, sync::Arc};
use std::{pin::Pin, time::Duration, time::Instant};

use crate::rt::Sleep;
use crate::rt::Timer;

#[derive(Clone)]
pub(crate) enum Time {
    Timer(Arc<dyn Timer + Send + Sync>),
    Empty,
}

impl fmt::Debug for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Time").finish()
    }
}

impl Time {
    pub(crate) fn new<T>(timer: T) -> Time
    where
        T: Timer + Send + Sync + 'static,
    {
        Time::Timer(Arc::new(timer))
    }

    /// # Panics
    ///
    /// 未配置定时器时 panic。调用方应先通过 `check` 确认超时可用。
    pub(crate) fn sleep(&self, duration: Duration) -> Pin<Box<dyn Sleep>> {
        match *self {
            Time::Empty => {
                panic!("You must supply a timer.")
            }
            Time::Timer(ref t) => t.sleep(duration),
        }
    }

    pub(crate) fn sleep_until(&self, deadline: Instant) -> Pin<Box<dyn Sleep>> {
        match *self {
            Time::Empty => {
                panic!("You must supply a timer.")
            }
            Time::Timer(ref t) => t.sleep_until(deadline),
        }
    }

    pub(crate) fn now(&self) -> Instant {
        match *self {
            Time::Empty => Instant::now(),
            Time::Timer(ref t) => t.now(),
        }
    }

    pub(crate) fn reset(&self, sleep: &mut Pin<Box<dyn Sleep>>, new_deadline: Instant) {
        match *self {
            Time::Empty => {
                panic!("You must supply a timer.")
            }
            Time::Timer(ref t) => t.reset(sleep, new_deadline),
        }
    }

    /// 返回真正生效的超时。没有定时器时超时被忽略。
    pub(crate) fn check(&self, dur: Option<Duration>, _name: &'static str) -> Option<Duration> {
        match (dur, self) {
            (Some(_), Time::Empty) => {
                warn!("timeout `{}` set, but no timer set", _name);
                None
            }
            (Some(dur), Time::Timer(..)) => Some(dur),
            (None, _) => None,
        }
    }
}
