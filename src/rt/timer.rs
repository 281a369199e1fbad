//! 定时器 trait 模块
//!
//! courier 的三类超时（连接、整体请求、读空闲）与连接池的空闲清扫都建立在
//! 这里的两个 trait 之上，从而不绑定任何具体运行时：
//!
//! - [`Timer`]：创建休眠 Future，并支持把已有的休眠原地改到新的截止时间
//! - [`Sleep`]：由定时器返回的 Future，在截止时间到达后完成
//!
//! 读超时依赖 `reset`：只要响应还在推进，`ResponseFuture::touch` 就会把截止时间
//! 往后推，长而健康的传输不会被误判为超时。
//!
//! 启用 `tokio` feature 时可直接使用 [`TokioTimer`](crate::rt::tokio::TokioTimer)。

use std::{
    any::TypeId,
    future::Future,
    pin::Pin,
    time::{Duration, Instant},
};

/// 定时器 trait，提供与定时器相关的功能。
pub trait Timer {
    /// 返回一个在 `duration` 时间后完成的 Future。
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Sleep>>;

    /// 返回一个在 `deadline` 时间点完成的 Future。
    fn sleep_until(&self, deadline: Instant) -> Pin<Box<dyn Sleep>>;

    /// 返回代表当前时间的 `Instant`。
    ///
    /// 测试中可以覆盖此方法以返回模拟时间。
    fn now(&self) -> Instant {
        Instant::now()
    }

    /// 把一个已有的休眠改为在 `new_deadline` 完成。
    ///
    /// 默认实现直接替换为新的休眠；具体实现可以借助 [`downcast_mut_pin`]
    /// 原地重置，省去一次分配。
    ///
    /// [`downcast_mut_pin`]: trait.Sleep.html#method.downcast_mut_pin
    fn reset(&self, sleep: &mut Pin<Box<dyn Sleep>>, new_deadline: Instant) {
        *sleep = self.sleep_until(new_deadline);
    }
}

/// 由 `Timer` 返回的休眠 Future。
pub trait Sleep: Send + Sync + Future<Output = ()> {
    #[doc(hidden)]
    /// 返回实现类型的 `TypeId`，供向下转型使用。外部无法覆盖。
    fn __type_id(&self, _: private::Sealed) -> TypeId
    where
        Self: 'static,
    {
        TypeId::of::<Self>()
    }
}

impl dyn Sleep {
    /// 检查此 `dyn Sleep` 的实际类型是否为 `T`。
    pub fn is<T>(&self) -> bool
    where
        T: Sleep + 'static,
    {
        self.__type_id(private::Sealed {}) == TypeId::of::<T>()
    }

    /// 将 `Pin<&mut dyn Sleep>` 向下转型为 `Pin<&mut T>`，类型不符时返回 `None`。
    pub fn downcast_mut_pin<T>(self: Pin<&mut Self>) -> Option<Pin<&mut T>>
    where
        T: Sleep + 'static,
    {
        if self.is::<T>() {
            unsafe {
                let inner = Pin::into_inner_unchecked(self);
                Some(Pin::new_unchecked(
                    &mut *(&mut *inner as *mut dyn Sleep as *mut T),
                ))
            }
        } else {
            None
        }
    }
}

mod private {
    #![allow(missing_debug_implementations)]
    pub struct Sealed {}
}
