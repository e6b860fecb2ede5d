//! Implementation of [`FrameAllocator`] which
//! controls all the page frames handed between the pager and its clients.

use std::{
    fmt,
    mem::ManuallyDrop,
    sync::atomic::{AtomicUsize, Ordering},
};

use defines::config::PAGE_SIZE;
use klocks::{Lazy, SpinMutex};
use triomphe::Arc;

/// 回收列表的上限，超过的页帧直接还给系统
const RECYCLE_LIMIT: usize = 64;

#[repr(C, align(4096))]
struct PageBytes([u8; PAGE_SIZE]);

impl PageBytes {
    fn new_zeroed() -> Box<Self> {
        Box::new(Self([0; PAGE_SIZE]))
    }
}

/// 页帧分配器，记录有多少页帧还在外面
///
/// 分配出去的 [`Frame`] 持有分配器的引用，析构时自动归还
pub struct FrameAllocator {
    in_use: AtomicUsize,
    limit: Option<usize>,
    recycled: SpinMutex<Vec<Box<PageBytes>>>,
}

static GLOBAL_FRAME_ALLOCATOR: Lazy<Arc<FrameAllocator>> = Lazy::new(FrameAllocator::new);

impl FrameAllocator {
    /// 不限制数量的分配器
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            in_use: AtomicUsize::new(0),
            limit: None,
            recycled: SpinMutex::new(Vec::new()),
        })
    }

    /// 同一时刻最多只能分配出 `limit` 个页帧
    pub fn with_limit(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            in_use: AtomicUsize::new(0),
            limit: Some(limit),
            recycled: SpinMutex::new(Vec::new()),
        })
    }

    /// 进程范围内共享的分配器
    pub fn global() -> &'static Arc<Self> {
        &*GLOBAL_FRAME_ALLOCATOR
    }

    /// 当前还没有归还的页帧数量
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    fn reserve(&self) -> bool {
        match self.limit {
            None => {
                self.in_use.fetch_add(1, Ordering::AcqRel);
                true
            }
            Some(limit) => self
                .in_use
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                    (n < limit).then_some(n + 1)
                })
                .is_ok(),
        }
    }

    fn take_bytes(&self) -> Box<PageBytes> {
        match self.recycled.lock().pop() {
            Some(mut bytes) => {
                bytes.0.fill(0);
                bytes
            }
            None => PageBytes::new_zeroed(),
        }
    }

    fn dealloc(&self, bytes: Box<PageBytes>) {
        {
            let mut recycled = self.recycled.lock();
            if recycled.len() < RECYCLE_LIMIT {
                recycled.push(bytes);
            }
        }
        self.in_use.fetch_sub(1, Ordering::AcqRel);
    }
}

/// 一个页大小、页对齐的缓冲区。分配出来时是清零的
pub struct Frame {
    bytes: ManuallyDrop<Box<PageBytes>>,
    allocator: Arc<FrameAllocator>,
}

impl Frame {
    /// 从全局分配器分配一个页帧
    pub fn alloc() -> Option<Self> {
        Self::alloc_in(FrameAllocator::global())
    }

    pub fn alloc_in(allocator: &Arc<FrameAllocator>) -> Option<Self> {
        if !allocator.reserve() {
            return None;
        }
        Some(Self {
            bytes: ManuallyDrop::new(allocator.take_bytes()),
            allocator: Arc::clone(allocator),
        })
    }

    pub fn as_page_bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.bytes.0
    }

    pub fn as_page_bytes_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        &mut self.bytes.0
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("addr", &self.as_page_bytes().as_ptr())
            .finish()
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        // SAFETY: 只会在这里取走，而且之后再也不会被用到
        let bytes = unsafe { ManuallyDrop::take(&mut self.bytes) };
        self.allocator.dealloc(bytes);
    }
}
