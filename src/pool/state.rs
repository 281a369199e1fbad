use std::time::{Duration, Instant};

/// 每条池化连接的强类型状态，随连接在池内外流转。
#[derive(Clone, Debug)]
pub struct ConnectionState {
    id: u64,
    secure: bool,
    tunneled: bool,
    keep_alive: bool,
    created: Instant,
    idle_since: Option<Instant>,
    requests: u32,
}

impl ConnectionState {
    pub(crate) fn new(id: u64, secure: bool, now: Instant) -> ConnectionState {
        ConnectionState {
            id,
            secure,
            tunneled: false,
            keep_alive: true,
            created: now,
            idle_since: None,
            requests: 0,
        }
    }

    /// 连接编号，在一个连接池内唯一。
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 是否为 TLS 连接。
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// 标记为 TLS 连接。
    pub fn set_secure(&mut self, secure: bool) {
        self.secure = secure;
    }

    /// 是否已通过 `CONNECT` 建立隧道。复用时无需再次建立。
    pub fn is_tunneled(&self) -> bool {
        self.tunneled
    }

    /// 标记隧道已建立。
    pub fn mark_tunneled(&mut self) {
        self.tunneled = true;
    }

    /// 是否仍可复用。
    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// 任一方表示不再保持连接时调用，此后连接只会被关闭。
    pub fn disable_keep_alive(&mut self) {
        self.keep_alive = false;
    }

    /// 创建时间。
    pub fn created(&self) -> Instant {
        self.created
    }

    /// 进入空闲的时间。
    pub fn idle_since(&self) -> Option<Instant> {
        self.idle_since
    }

    /// 已在该连接上完成的请求数。
    pub fn requests(&self) -> u32 {
        self.requests
    }

    pub(crate) fn set_idle(&mut self, now: Instant) {
        self.idle_since = Some(now);
        self.requests += 1;
    }

    pub(crate) fn set_busy(&mut self) {
        self.idle_since = None;
    }

    /// 超过连接存活上限（无论是否活跃）。
    pub(crate) fn ttl_expired(&self, now: Instant, ttl: Option<Duration>) -> bool {
        match ttl {
            Some(ttl) => now.saturating_duration_since(self.created) >= ttl,
            None => false,
        }
    }

    /// 空闲过久或超过存活上限。
    pub(crate) fn is_expired(
        &self,
        now: Instant,
        idle_timeout: Option<Duration>,
        ttl: Option<Duration>,
    ) -> bool {
        if self.ttl_expired(now, ttl) {
            return true;
        }
        match (self.idle_since, idle_timeout) {
            (Some(since), Some(timeout)) => now.saturating_duration_since(since) >= timeout,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_rules() {
        let t0 = Instant::now();
        let mut st = ConnectionState::new(1, false, t0);
        let later = t0 + Duration::from_secs(10);
        assert!(!st.is_expired(later, Some(Duration::from_secs(5)), None));

        st.set_idle(t0);
        assert!(st.is_expired(later, Some(Duration::from_secs(5)), None));
        assert!(!st.is_expired(later, Some(Duration::from_secs(20)), None));
        assert!(st.is_expired(later, None, Some(Duration::from_secs(10))));

        st.set_busy();
        assert!(!st.is_expired(later, Some(Duration::from_secs(5)), None));
        assert_eq!(st.requests(), 1);
    }
}
