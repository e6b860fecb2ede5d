/// 一个页大小的 bit 数
pub const PAGE_SIZE_BITS: usize = 12;
/// 页大小
pub const PAGE_SIZE: usize = 1 << PAGE_SIZE_BITS;
pub const PAGE_OFFSET_MASK: usize = PAGE_SIZE - 1;

/// 停止分页时，关闭缓存后给内核留出的反应时间
pub const SHUTDOWN_GRACE_MS: u64 = 1000;

/// 额外的服务线程空闲这么久之后退出；主线程则借此机会回收无人引用的端点
pub const PAGER_IDLE_TIMEOUT_MS: u64 = 1000 * 30;
/// 整个请求组这么久没有收到请求时，重新进入一轮分发
pub const PAGER_KEEP_ALIVE_MS: u64 = 1000 * 60 * 5;

/// 每个请求组最多同时存在的服务线程数量
pub const PAGER_MAX_WORKERS: usize = 8;
