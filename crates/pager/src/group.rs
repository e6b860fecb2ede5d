//! 请求组：一组端点，以及服务它们的线程
//!
//! 主服务线程在请求组创建时启动，之后一直运行到进程退出。当请求到来而没有空闲线程时，
//! 会按需启动额外的服务线程（不超过 [`PagingConfig::max_workers`]），它们空闲一段时间后退出。

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use compact_str::CompactString;
use crossbeam_queue::SegQueue;
use defines::error::{errno, KResult};
use event_listener::{Event, IntoNotification, Listener};
use klocks::SpinMutex;
use smallvec::SmallVec;

use crate::{
    backing::{BackingObject, CachePolicy},
    config::PagingConfig,
    request::Request,
};

pub struct RequestGroup {
    name: CompactString,
    config: PagingConfig,
    endpoints: SpinMutex<BTreeMap<usize, Arc<BackingObject>>>,
    queue: SegQueue<Request>,
    arrived: Event,
    workers: AtomicUsize,
    idle_workers: AtomicUsize,
    /// 主线程完成的分发轮数
    rounds: AtomicUsize,
}

impl RequestGroup {
    /// 创建请求组并启动主服务线程
    pub(crate) fn spawn(name: CompactString, config: PagingConfig) -> KResult<Arc<Self>> {
        let group = Arc::new(Self {
            name,
            config,
            endpoints: SpinMutex::new(BTreeMap::new()),
            queue: SegQueue::new(),
            arrived: Event::new(),
            workers: AtomicUsize::new(1),
            idle_workers: AtomicUsize::new(0),
            rounds: AtomicUsize::new(0),
        });
        let primary = Arc::clone(&group);
        thread::Builder::new()
            .name(group.thread_name())
            .spawn(move || loop {
                primary.manage_requests(true);
                primary.rounds.fetch_add(1, Ordering::AcqRel);
                log::trace!("{}: request group idle, re-entering", primary.name);
            })
            .map_err(|e| {
                log::error!("{}: cannot spawn pager thread: {e}", group.name);
                errno::EAGAIN
            })?;
        log::debug!("{}: request group started", group.name);
        Ok(group)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 当前登记在组内的端点数量
    pub fn live_endpoints(&self) -> usize {
        self.endpoints.lock().len()
    }

    /// 当前的服务线程数量
    pub fn workers(&self) -> usize {
        self.workers.load(Ordering::Acquire)
    }

    /// 主线程因为 `keep_alive` 内没有请求而重新进入分发的次数
    pub fn rounds(&self) -> usize {
        self.rounds.load(Ordering::Acquire)
    }

    /// 对每个端点调用 `f`。先取快照再调用，`f` 中可以再操作本组
    pub fn for_each_endpoint(&self, mut f: impl FnMut(&Arc<BackingObject>)) {
        let snapshot: SmallVec<[Arc<BackingObject>; 4]> =
            self.endpoints.lock().values().cloned().collect();
        for object in &snapshot {
            f(object);
        }
    }

    /// 把所有端点切换到 `policy`，返回切换成功的那些，之后可以回滚
    pub fn switch_policy(&self, policy: CachePolicy, wait: bool) -> PolicySwitch {
        let mut switched = SmallVec::new();
        self.for_each_endpoint(|object| match object.change_attributes(policy, wait) {
            Ok(()) => switched.push(Arc::clone(object)),
            Err(e) => log::warn!(
                "{}: object {} refused {policy} caching: {e}",
                self.name,
                object.id()
            ),
        });
        PolicySwitch {
            group_name: self.name.clone(),
            switched,
        }
    }

    pub(crate) fn insert(&self, object: Arc<BackingObject>) {
        self.endpoints.lock().insert(object.id(), object);
    }

    pub(crate) fn remove(&self, id: usize) {
        self.endpoints.lock().remove(&id);
    }

    pub(crate) fn post(&self, request: Request) {
        self.queue.push(request);
        self.arrived.notify(1usize.additional());
    }

    fn thread_name(&self) -> String {
        format!("pager-{}", self.name)
    }

    fn next_request(&self, timeout: Duration) -> Option<Request> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(request) = self.queue.pop() {
                return Some(request);
            }
            let listener = self.arrived.listen();
            // 建立监听之前可能已经有请求到达
            if let Some(request) = self.queue.pop() {
                return Some(request);
            }
            listener.wait_deadline(deadline)?;
        }
    }

    /// 一轮分发。额外线程空闲超时就返回；主线程在整组 `keep_alive` 没有请求后返回
    fn manage_requests(self: &Arc<Self>, primary: bool) {
        let mut last_request = Instant::now();
        loop {
            self.idle_workers.fetch_add(1, Ordering::AcqRel);
            let request = self.next_request(self.config.idle_timeout);
            self.idle_workers.fetch_sub(1, Ordering::AcqRel);

            let Some(request) = request else {
                if !primary {
                    return;
                }
                self.reap_endpoints();
                if last_request.elapsed() >= self.config.keep_alive {
                    return;
                }
                continue;
            };
            if self.idle_workers.load(Ordering::Acquire) == 0 {
                self.spawn_extra_worker();
            }
            request.dispatch();
            last_request = Instant::now();
        }
    }

    fn spawn_extra_worker(self: &Arc<Self>) {
        let max_workers = self.config.max_workers;
        if self
            .workers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max_workers).then_some(n + 1)
            })
            .is_err()
        {
            return;
        }
        let group = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(self.thread_name())
            .spawn(move || {
                group.manage_requests(false);
                group.workers.fetch_sub(1, Ordering::AcqRel);
                log::trace!("{}: extra worker exits", group.name);
            });
        match spawned {
            Ok(_) => log::trace!("{}: spawned extra worker", self.name),
            Err(e) => {
                self.workers.fetch_sub(1, Ordering::AcqRel);
                log::warn!("{}: cannot spawn extra worker: {e}", self.name);
            }
        }
    }

    /// 回收已经没有任何引用、却还没来得及处理 `NoSenders` 的端点
    fn reap_endpoints(&self) {
        let dead: SmallVec<[Arc<BackingObject>; 4]> = self
            .endpoints
            .lock()
            .values()
            .filter(|object| object.refs() == 0 && !object.is_released())
            .cloned()
            .collect();
        for object in dead {
            object.release_endpoint();
        }
    }
}

/// [`RequestGroup::switch_policy`] 的结果
#[must_use]
pub struct PolicySwitch {
    group_name: CompactString,
    switched: SmallVec<[Arc<BackingObject>; 4]>,
}

impl PolicySwitch {
    /// 把仍然存活的端点恢复到 `policy`，不等待内核应用
    pub fn rollback(self, policy: CachePolicy) {
        for object in self.switched.iter().filter(|object| object.is_alive()) {
            if let Err(e) = object.change_attributes(policy, false) {
                log::warn!(
                    "{}: cannot restore {policy} caching on object {}: {e}",
                    self.group_name,
                    object.id()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex, Weak,
        },
        thread,
        time::{Duration, Instant},
    };

    use defines::error::{errno, KResult};
    use memory::Frame;

    use super::RequestGroup;
    use crate::{
        backing::{
            BackingObject, CachePolicy, Extent, MemoryControl, MemoryObjectHandle, PageIn,
            PagerBackend,
        },
        config::PagingConfig,
        error::PageIoError,
    };

    /// 每次读页都要花一点时间
    #[derive(Default)]
    struct SlowBackend {
        cleared: AtomicUsize,
    }

    impl PagerBackend for SlowBackend {
        fn read_page(&self, _offset: u64) -> Result<PageIn, PageIoError> {
            thread::sleep(Duration::from_millis(2));
            let frame = Frame::alloc().ok_or(PageIoError::Io)?;
            Ok(PageIn {
                frame,
                write_lock: false,
            })
        }

        fn write_page(&self, _offset: u64, _frame: Frame) -> KResult<()> {
            Ok(())
        }

        fn unlock_page(&self, _offset: u64) -> KResult<()> {
            Ok(())
        }

        fn report_extent(&self) -> Extent {
            Extent { offset: 0, size: 0 }
        }

        fn clear_user_data(&self) {
            self.cleared.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// 记录收到的策略，`refuse` 为真时拒绝关闭缓存
    #[derive(Default)]
    struct Recording {
        refuse: bool,
        calls: Mutex<Vec<CachePolicy>>,
    }

    impl Recording {
        fn calls(&self) -> Vec<CachePolicy> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl MemoryControl for Recording {
        fn change_attributes(&self, policy: CachePolicy, _wait: bool) -> KResult<()> {
            self.calls.lock().unwrap().push(policy);
            if self.refuse && policy == CachePolicy::Immediate {
                return Err(errno::EAGAIN);
            }
            Ok(())
        }

        fn sync(&self) -> KResult<()> {
            Ok(())
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let begin = Instant::now();
        while !cond() {
            assert!(begin.elapsed() < Duration::from_secs(5));
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn extra_workers_are_capped_and_retire() {
        let config = PagingConfig::default()
            .with_idle_timeout(Duration::from_millis(50))
            .with_max_workers(3);
        let group = RequestGroup::spawn("workers".into(), config).unwrap();
        let backend = Arc::new(SlowBackend::default());
        let weak: Weak<SlowBackend> = Arc::downgrade(&backend);
        let obj_ref = BackingObject::create(weak, Arc::clone(&group)).unwrap();
        let handle = MemoryObjectHandle::make_send(&obj_ref).unwrap();
        drop(obj_ref);
        assert_eq!(group.workers(), 1);

        let readers = (0..6)
            .map(|_| {
                let handle = handle.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        handle.read_page(0).unwrap();
                    }
                })
            })
            .collect::<Vec<_>>();
        let mut peak = 0;
        while readers.iter().any(|t| !t.is_finished()) {
            peak = peak.max(group.workers());
            thread::sleep(Duration::from_millis(1));
        }
        for t in readers {
            t.join().unwrap();
        }
        assert_eq!(peak, 3);

        // 额外的线程空闲超时后退出，只剩主线程
        wait_until(|| group.workers() == 1);
        assert!(handle.read_page(0).is_ok());
    }

    #[test]
    fn idle_primary_reaps_unreferenced_endpoints() {
        let config = PagingConfig::default().with_idle_timeout(Duration::from_millis(20));
        let group = RequestGroup::spawn("reaper".into(), config).unwrap();
        let backend = Arc::new(SlowBackend::default());
        let weak: Weak<SlowBackend> = Arc::downgrade(&backend);
        let obj_ref = BackingObject::create(weak, Arc::clone(&group)).unwrap();
        let object = Arc::clone(obj_ref.object());
        obj_ref.forget_silently();
        assert_eq!(object.refs(), 0);
        assert_eq!(group.live_endpoints(), 1);

        wait_until(|| group.live_endpoints() == 0);
        assert_eq!(backend.cleared.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn primary_reenters_after_keep_alive() {
        let config = PagingConfig::default()
            .with_idle_timeout(Duration::from_millis(5))
            .with_keep_alive(Duration::from_millis(20));
        let group = RequestGroup::spawn("keepalive".into(), config).unwrap();
        wait_until(|| group.rounds() >= 3);

        // 重新进入之后仍然在处理请求
        let backend = Arc::new(SlowBackend::default());
        let weak: Weak<SlowBackend> = Arc::downgrade(&backend);
        let obj_ref = BackingObject::create(weak, Arc::clone(&group)).unwrap();
        let handle = MemoryObjectHandle::make_send(&obj_ref).unwrap();
        drop(obj_ref);
        assert!(handle.read_page(0).is_ok());
        assert_eq!(handle.report_extent(), Ok(Extent { offset: 0, size: 0 }));
    }

    #[test]
    fn refusing_endpoint_is_skipped() {
        let group = RequestGroup::spawn("switch".into(), PagingConfig::default()).unwrap();
        let backend = Arc::new(SlowBackend::default());
        let weak: Weak<SlowBackend> = Arc::downgrade(&backend);
        let a = BackingObject::create(weak.clone(), Arc::clone(&group)).unwrap();
        let b = BackingObject::create(weak, Arc::clone(&group)).unwrap();
        let accepting = Arc::new(Recording::default());
        let refusing = Arc::new(Recording {
            refuse: true,
            ..Recording::default()
        });
        a.object().attach(accepting.clone()).unwrap();
        b.object().attach(refusing.clone()).unwrap();

        let switched = group.switch_policy(CachePolicy::Immediate, true);
        assert_eq!(a.object().policy(), CachePolicy::Immediate);
        assert_eq!(b.object().policy(), CachePolicy::Delayed);

        switched.rollback(CachePolicy::Delayed);
        assert_eq!(a.object().policy(), CachePolicy::Delayed);
        assert_eq!(
            accepting.calls(),
            [
                CachePolicy::Delayed,
                CachePolicy::Immediate,
                CachePolicy::Delayed
            ]
        );
        assert_eq!(
            refusing.calls(),
            [CachePolicy::Delayed, CachePolicy::Immediate]
        );
    }
}
