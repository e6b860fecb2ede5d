use std::sync::{Arc, Weak};

use bitflags::bitflags;
use compact_str::CompactString;
use defines::{
    config::PAGE_SIZE,
    error::{errno, KResult},
};
use drivers::BlockDevice;
use klocks::{SleepMutex, SleepMutexGuard};
use memory::FrameAllocator;

use crate::{
    backing::{BackingObject, MemoryObjectHandle},
    config::PagingConfig,
    group::RequestGroup,
};

bitflags! {
    /// 打开设备的一方给出的访问模式
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DeviceFlags: u32 {
        const READONLY = 1 << 0;
        /// 串行设备，不能被映射
        const SERIAL = 1 << 1;
    }
}

/// 设备描述符
///
/// 不可变的部分在创建时确定；分页相关的可变状态都在 `paging` 这把锁后面，
/// 只能在持有这把锁时访问
pub struct Device {
    name: CompactString,
    store: Arc<dyn BlockDevice>,
    block_size: usize,
    size: u64,
    flags: DeviceFlags,
    pub(crate) config: PagingConfig,
    pub(crate) frames: triomphe::Arc<FrameAllocator>,
    paging: SleepMutex<PagingState>,
}

#[derive(Default)]
pub(crate) struct PagingState {
    pub(crate) pager: Option<Arc<BackingObject>>,
    pub(crate) group: Option<Arc<RequestGroup>>,
    /// 有人正在停止分页
    pub(crate) stopping: bool,
}

impl Device {
    /// `size` 是设备的总字节数，可以不是块大小的整数倍
    ///
    /// 块大小必须是 2 的幂，而且整除页大小
    pub fn new(
        name: &str,
        store: Arc<dyn BlockDevice>,
        size: u64,
        flags: DeviceFlags,
    ) -> KResult<Self> {
        let block_size = store.block_size();
        if !block_size.is_power_of_two() || PAGE_SIZE % block_size != 0 {
            log::warn!("{name}: unsupported block size {block_size}");
            return Err(errno::EINVAL);
        }
        Ok(Self {
            name: CompactString::from(name),
            store,
            block_size,
            size,
            flags,
            config: PagingConfig::default(),
            frames: triomphe::Arc::clone(FrameAllocator::global()),
            paging: SleepMutex::new(PagingState::default()),
        })
    }

    pub fn with_config(mut self, config: PagingConfig) -> Self {
        self.config = config;
        self
    }

    /// 读页时从 `frames` 分配页帧，默认用全局分配器
    pub fn with_frame_allocator(mut self, frames: triomphe::Arc<FrameAllocator>) -> Self {
        self.frames = frames;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn flags(&self) -> DeviceFlags {
        self.flags
    }

    pub fn is_readonly(&self) -> bool {
        self.flags.contains(DeviceFlags::READONLY)
    }

    pub(crate) fn store(&self) -> &dyn BlockDevice {
        &*self.store
    }

    pub(crate) fn lock_paging(&self) -> SleepMutexGuard<'_, PagingState> {
        self.paging.lock()
    }

    /// 当前活跃的页缓存对象
    pub fn backing_object(&self) -> Option<Arc<BackingObject>> {
        self.lock_paging().pager.clone()
    }

    /// 请求组，第一次映射之后才会存在
    pub fn request_group(&self) -> Option<Arc<RequestGroup>> {
        self.lock_paging().group.clone()
    }

    /// 给内存管理者一个可以映射本设备的对象句柄
    ///
    /// 同一个设备上反复调用拿到的是同一个对象。对象已经没有端口时返回 `Ok(None)`
    pub fn get_memory_object(self: &Arc<Self>) -> KResult<Option<MemoryObjectHandle>> {
        if self.flags.contains(DeviceFlags::SERIAL) {
            return Err(errno::ENODEV);
        }

        let obj_ref = {
            let mut state = self.lock_paging();
            let group = match state.group.clone() {
                Some(group) => group,
                None => {
                    let group = RequestGroup::spawn(self.name.clone(), self.config.clone())?;
                    state.group = Some(Arc::clone(&group));
                    group
                }
            };
            // 已经没有引用或者已经关闭的对象不能复活，换一个新的
            let existing = state.pager.as_ref().and_then(BackingObject::try_ref);
            match existing {
                Some(obj_ref) => Some(obj_ref),
                None => {
                    let weak: Weak<Self> = Arc::downgrade(self);
                    let obj_ref = BackingObject::create(weak, group);
                    state.pager = obj_ref.as_ref().map(|r| Arc::clone(r.object()));
                    obj_ref
                }
            }
        };
        let Some(obj_ref) = obj_ref else {
            return Err(errno::ENODEV);
        };

        // 句柄持有自己的发送权，创建或查找时拿到的引用随后释放
        let handle = MemoryObjectHandle::make_send(&obj_ref);
        drop(obj_ref);
        Ok(handle)
    }
}
