//! 页缓存对象（backing object）以及它对外的句柄
//!
//! 每个设备同一时刻最多只有一个活跃的 [`BackingObject`]。内存管理者手里的每一个
//! [`MemoryObjectHandle`] 都对应一个发送权（`ObjectRef`），最后一个发送权被释放时，
//! 会向请求组投递一个 `NoSenders` 通知，由服务线程完成后续的清理。

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Weak,
    },
};

use atomic::Atomic;
use defines::error::{errno, KResult};
use klocks::SpinMutex;
use memory::Frame;

use crate::{
    error::PageIoError,
    group::RequestGroup,
    request::{Request, RequestKind},
};

/// 缓存策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum CachePolicy {
    /// 允许内核缓存页面，脏页可以延迟写回
    #[display("delayed")]
    Delayed,
    /// 不允许缓存，页面一旦不再使用就必须立刻归还
    #[display("immediate")]
    Immediate,
}

/// 内存管理者一侧的控制通道，由它在 `init` 请求中交给分页器
pub trait MemoryControl: Send + Sync {
    /// 修改缓存策略。`wait` 为真时，要等内核真正应用了新策略才返回
    fn change_attributes(&self, policy: CachePolicy, wait: bool) -> KResult<()>;
    /// 同步地把所有脏页通过 `write_page` 写回，然后返回
    fn sync(&self) -> KResult<()>;
}

/// 一次读页的结果
#[derive(Debug)]
pub struct PageIn {
    pub frame: Frame,
    /// 页面是否只能以只读方式映射
    pub write_lock: bool,
}

/// 对象覆盖的范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub offset: u64,
    pub size: u64,
}

/// 真正提供页面内容的一方。设备描述符实现了它
pub trait PagerBackend: Send + Sync {
    fn read_page(&self, offset: u64) -> Result<PageIn, PageIoError>;
    /// `frame` 的所有权交给后端，无论成功与否都会被释放
    fn write_page(&self, offset: u64, frame: Frame) -> KResult<()>;
    fn unlock_page(&self, offset: u64) -> KResult<()>;
    fn report_extent(&self) -> Extent;
    /// 对象的最后一个发送权消失后调用，且只调用一次
    fn clear_user_data(&self) {}
    /// 对象的端口被销毁、只剩弱引用时调用
    fn drop_weak(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::NoUninit)]
#[repr(u8)]
enum ObjectState {
    Active,
    ShutDown,
}

struct BackingInner {
    policy: CachePolicy,
    control: Option<Arc<dyn MemoryControl>>,
}

pub struct BackingObject {
    id: usize,
    backend: Weak<dyn PagerBackend>,
    group: Arc<RequestGroup>,
    /// 发送权的数量，一旦降到 0 就再也不会增加
    refs: AtomicUsize,
    state: Atomic<ObjectState>,
    /// `clear_user_data` 是否已经触发过
    released: AtomicBool,
    inner: SpinMutex<BackingInner>,
}

impl BackingObject {
    /// 创建对象并登记到请求组中，返回创建者持有的那个引用
    ///
    /// 后端已经不存在时返回 `None`
    pub(crate) fn create(
        backend: Weak<dyn PagerBackend>,
        group: Arc<RequestGroup>,
    ) -> Option<ObjectRef> {
        static NEXT_ID: AtomicUsize = AtomicUsize::new(1);

        if backend.strong_count() == 0 {
            return None;
        }
        let object = Arc::new(Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            backend,
            group,
            refs: AtomicUsize::new(1),
            state: Atomic::new(ObjectState::Active),
            released: AtomicBool::new(false),
            inner: SpinMutex::new(BackingInner {
                policy: CachePolicy::Delayed,
                control: None,
            }),
        });
        object.group.insert(Arc::clone(&object));
        log::debug!(
            "{}: created backing object {}",
            object.group.name(),
            object.id
        );
        Some(ObjectRef(object))
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn group(&self) -> &Arc<RequestGroup> {
        &self.group
    }

    pub fn policy(&self) -> CachePolicy {
        self.inner.lock().policy
    }

    pub fn refs(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.load(Ordering::Acquire) == ObjectState::ShutDown
    }

    /// 是否还能拿到新的引用
    pub fn is_alive(&self) -> bool {
        self.refs() > 0 && !self.is_shut_down()
    }

    /// 试着再拿一个引用。已经没有引用或者已经关闭的对象无法复活
    pub(crate) fn try_ref(self: &Arc<Self>) -> Option<ObjectRef> {
        if self.is_shut_down() {
            return None;
        }
        self.refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n > 0).then_some(n + 1)
            })
            .ok()?;
        Some(ObjectRef(Arc::clone(self)))
    }

    pub(crate) fn backend(&self) -> KResult<Arc<dyn PagerBackend>> {
        if self.is_shut_down() {
            return Err(errno::ENXIO);
        }
        self.backend.upgrade().ok_or(errno::ENXIO)
    }

    /// 修改缓存策略。内存管理者还没有连上来时只记录下来，等 `init` 时再告诉它
    ///
    /// 只有应用成功后，记录的策略才会改变
    pub fn change_attributes(&self, policy: CachePolicy, wait: bool) -> KResult<()> {
        let control = self.inner.lock().control.clone();
        if let Some(control) = control {
            control.change_attributes(policy, wait)?;
        }
        self.inner.lock().policy = policy;
        log::debug!(
            "{}: object {} switched to {policy} caching",
            self.group.name(),
            self.id
        );
        Ok(())
    }

    /// 让内存管理者同步写回所有脏页，然后销毁对象的端口
    ///
    /// 之后发到这个对象上的请求都会得到 `ENXIO`
    pub fn shutdown(&self) {
        if self.is_shut_down() {
            return;
        }
        let control = self.inner.lock().control.clone();
        if let Some(control) = control {
            if let Err(e) = control.sync() {
                log::warn!(
                    "{}: sync of object {} failed: {e}",
                    self.group.name(),
                    self.id
                );
            }
        }
        if self.state.swap(ObjectState::ShutDown, Ordering::AcqRel) == ObjectState::ShutDown {
            return;
        }
        self.inner.lock().control = None;
        self.group.remove(self.id);
        if let Some(backend) = self.backend.upgrade() {
            backend.drop_weak();
        }
        log::debug!("{}: object {} shut down", self.group.name(), self.id);
    }

    /// 处理 `init`：记下控制通道，并把当前的策略告诉内存管理者
    pub(crate) fn attach(&self, control: Arc<dyn MemoryControl>) -> KResult<()> {
        let policy = {
            let mut inner = self.inner.lock();
            inner.control = Some(Arc::clone(&control));
            inner.policy
        };
        control.change_attributes(policy, false)
    }

    /// 处理 `terminate`
    pub(crate) fn detach(&self) {
        self.inner.lock().control = None;
    }

    /// 最后一个发送权消失之后的清理，可能被调用多次，但只生效一次
    pub(crate) fn release_endpoint(&self) {
        if self.refs() != 0 || self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        self.group.remove(self.id);
        self.inner.lock().control = None;
        if let Some(backend) = self.backend.upgrade() {
            backend.clear_user_data();
        }
        log::debug!(
            "{}: object {} has no senders",
            self.group.name(),
            self.id
        );
    }

    pub(crate) fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl fmt::Debug for BackingObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackingObject")
            .field("id", &self.id)
            .field("refs", &self.refs())
            .field("state", &self.state.load(Ordering::Relaxed))
            .finish()
    }
}

/// 一个发送权
///
/// 克隆时计数加一，析构时减一；减到 0 时向请求组投递 `NoSenders`
pub(crate) struct ObjectRef(Arc<BackingObject>);

impl ObjectRef {
    pub(crate) fn object(&self) -> &Arc<BackingObject> {
        &self.0
    }
}

#[cfg(test)]
impl ObjectRef {
    /// 丢掉发送权但不投递 `NoSenders`，这样的端点只能靠空闲时的扫描回收
    pub(crate) fn forget_silently(self) {
        self.0.refs.fetch_sub(1, Ordering::AcqRel);
        std::mem::forget(self);
    }
}

impl Clone for ObjectRef {
    fn clone(&self) -> Self {
        self.0.refs.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(&self.0))
    }
}

impl Drop for ObjectRef {
    fn drop(&mut self) {
        if self.0.refs.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0
                .group
                .post(Request::new(Arc::clone(&self.0), RequestKind::NoSenders));
        }
    }
}

/// 交给内存管理者的对象句柄
///
/// 每个句柄都持有一个发送权。所有操作都会投递到请求组，由服务线程处理，调用者阻塞等待回复
#[derive(Clone)]
pub struct MemoryObjectHandle {
    right: ObjectRef,
}

impl MemoryObjectHandle {
    /// 对象已经没有端口时返回 `None`
    pub(crate) fn make_send(obj_ref: &ObjectRef) -> Option<Self> {
        if obj_ref.object().is_shut_down() {
            return None;
        }
        Some(Self {
            right: obj_ref.clone(),
        })
    }

    pub fn object_id(&self) -> usize {
        self.right.object().id()
    }

    pub fn same_object(&self, other: &Self) -> bool {
        Arc::ptr_eq(self.right.object(), other.right.object())
    }

    pub fn init(&self, control: Arc<dyn MemoryControl>) -> KResult<()> {
        self.call(|reply| RequestKind::Init { control, reply })
    }

    pub fn read_page(&self, offset: u64) -> KResult<PageIn> {
        self.call(|reply| RequestKind::ReadPage { offset, reply })
    }

    pub fn write_page(&self, offset: u64, frame: Frame) -> KResult<()> {
        self.call(|reply| RequestKind::WritePage {
            offset,
            frame,
            reply,
        })
    }

    pub fn unlock_page(&self, offset: u64) -> KResult<()> {
        self.call(|reply| RequestKind::UnlockPage { offset, reply })
    }

    pub fn report_extent(&self) -> KResult<Extent> {
        self.call(|reply| RequestKind::ReportExtent { reply })
    }

    pub fn terminate(&self) -> KResult<()> {
        self.call(|reply| RequestKind::Terminate { reply })
    }

    fn call<T>(
        &self,
        make: impl FnOnce(async_channel::Sender<KResult<T>>) -> RequestKind,
    ) -> KResult<T> {
        let object = self.right.object();
        if object.is_shut_down() {
            return Err(errno::ENXIO);
        }
        let (tx, rx) = async_channel::bounded(1);
        object.group.post(Request::new(Arc::clone(object), make(tx)));
        // 服务线程丢掉了回复通道，说明请求没有被处理
        rx.recv_blocking().unwrap_or(Err(errno::ENXIO))
    }
}

impl fmt::Debug for MemoryObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MemoryObjectHandle")
            .field(&self.object_id())
            .finish()
    }
}
