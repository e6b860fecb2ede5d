//! 停止分页：先让内核交还所有页面，确认没有人在用了再销毁对象

use std::{sync::Arc, thread};

use crate::{
    backing::CachePolicy,
    device::{Device, PagingState},
};

impl Device {
    /// 停止本设备上的分页，成功时清除页缓存对象
    ///
    /// 还有用户的时候会先关闭所有端点的缓存，等待一个宽限期后重新计数，仍有用户就恢复缓存并失败。
    /// `no_sync` 为真时不写回脏页，也不会强行终止正在使用的映射，只在一开始就没有用户时才成功。
    pub fn stop_paging(&self, no_sync: bool) -> bool {
        let mut state = self.lock_paging();
        let Some(pager) = state.pager.clone() else {
            return true;
        };
        if state.stopping {
            log::warn!("{}: paging is already being stopped", self.name());
            return false;
        }

        let group = Arc::clone(pager.group());
        let users = group.live_endpoints();
        if users == 0 {
            self.finish_stop(&mut state, no_sync);
            return true;
        }
        if no_sync {
            log::warn!(
                "{}: {users} users remain, refusing to stop paging without sync",
                self.name()
            );
            return false;
        }

        // 宽限期内不持有锁，`stopping` 挡住其他的停止请求，直到回滚也做完
        state.stopping = true;
        drop(state);
        let _stopping = scopeguard::guard((), |()| self.lock_paging().stopping = false);

        let switched = group.switch_policy(CachePolicy::Immediate, true);
        thread::sleep(self.config.grace_period);

        // 重新计数和销毁必须在同一次持锁内完成，否则新拿到的映射可能被一起销毁
        let mut state = self.lock_paging();
        let remaining = group.live_endpoints();
        let replaced = state
            .pager
            .as_ref()
            .is_some_and(|current| !Arc::ptr_eq(current, &pager) && current.is_alive());
        if remaining > 0 || replaced {
            drop(state);
            log::warn!(
                "{}: {remaining} users still remain after {:?}, aborting",
                self.name(),
                self.config.grace_period
            );
            switched.rollback(CachePolicy::Delayed);
            return false;
        }

        self.finish_stop(&mut state, no_sync);
        true
    }

    fn finish_stop(&self, state: &mut PagingState, no_sync: bool) {
        if let Some(pager) = state.pager.take() {
            if !no_sync {
                pager.shutdown();
            }
        }
        log::debug!("{}: paging stopped", self.name());
    }
}
