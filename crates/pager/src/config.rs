use std::time::Duration;

use defines::config::{
    PAGER_IDLE_TIMEOUT_MS, PAGER_KEEP_ALIVE_MS, PAGER_MAX_WORKERS, SHUTDOWN_GRACE_MS,
};

/// 每个设备的分页参数
#[derive(Debug, Clone)]
pub struct PagingConfig {
    /// 停止分页时关闭缓存后等待内核释放映射的时间
    pub grace_period: Duration,
    /// 额外服务线程的空闲超时，同时也是回收无人引用端点的周期
    pub idle_timeout: Duration,
    /// 请求组完全没有请求时，每一轮分发最多持续多久
    pub keep_alive: Duration,
    /// 服务线程数量上限，至少为 1
    pub max_workers: usize,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_millis(SHUTDOWN_GRACE_MS),
            idle_timeout: Duration::from_millis(PAGER_IDLE_TIMEOUT_MS),
            keep_alive: Duration::from_millis(PAGER_KEEP_ALIVE_MS),
            max_workers: PAGER_MAX_WORKERS,
        }
    }
}

impl PagingConfig {
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::PagingConfig;

    #[test]
    fn builder_overrides_defaults() {
        let config = PagingConfig::default()
            .with_grace_period(Duration::from_millis(10))
            .with_keep_alive(Duration::from_secs(1))
            .with_max_workers(0);
        assert_eq!(config.grace_period, Duration::from_millis(10));
        assert_eq!(config.keep_alive, Duration::from_secs(1));
        assert_eq!(config.idle_timeout, Duration::from_secs(30));
        assert_eq!(config.max_workers, 1);
    }
}
