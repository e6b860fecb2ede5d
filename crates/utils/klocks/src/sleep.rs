//! 基于 `event_listener` 和自旋锁的睡眠锁
//!
//! 拿不到锁的线程会阻塞在 `Event` 上，而不是一直自旋，因此可以跨越较长的操作（如设备 I/O 或者定时等待）持有

use std::{
    fmt,
    marker::PhantomData,
    mem::ManuallyDrop,
    ops::{Deref, DerefMut},
};

use event_listener::{Event, Listener};
use spin::mutex::SpinMutexGuard;

pub struct SleepMutex<T: ?Sized> {
    lock_ops: Event,
    base: spin::mutex::SpinMutex<T>,
}

pub struct SleepMutexGuard<'a, T: ?Sized> {
    spin_guard: ManuallyDrop<SpinMutexGuard<'a, T>>,
    mutex: &'a SleepMutex<T>,
    _not_send: PhantomData<*const ()>,
}

unsafe impl<T: ?Sized + Send> Send for SleepMutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for SleepMutex<T> {}

unsafe impl<T: ?Sized + Sync> Sync for SleepMutexGuard<'_, T> {}

impl<T> SleepMutex<T> {
    #[inline(always)]
    pub const fn new(data: T) -> Self {
        SleepMutex {
            lock_ops: Event::new(),
            base: spin::mutex::SpinMutex::new(data),
        }
    }

    #[inline(always)]
    pub fn into_inner(self) -> T {
        self.base.into_inner()
    }
}

impl<T: ?Sized> SleepMutex<T> {
    #[inline]
    pub fn lock(&self) -> SleepMutexGuard<'_, T> {
        if let Some(guard) = self.try_lock() {
            return guard;
        }
        self.acquire_slow()
    }

    #[cold]
    fn acquire_slow(&self) -> SleepMutexGuard<'_, T> {
        loop {
            let listener = self.lock_ops.listen();
            // 在这中间有可能锁被释放了
            // 因此建立起监听之后要重新试着拿一下锁
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            listener.wait();
            // 被唤醒之后试着拿锁，有可能被别的线程抢先，那就再等一轮
            if let Some(guard) = self.try_lock() {
                return guard;
            }
        }
    }

    /// Returns `true` if the lock is currently held.
    ///
    /// # Safety
    ///
    /// This function provides no synchronization guarantees and so its result
    /// should be considered 'out of date' the instant it is called. Do not
    /// use it for synchronization purposes. However, it may be useful as a
    /// heuristic.
    #[inline(always)]
    pub fn is_locked(&self) -> bool {
        self.base.is_locked()
    }

    #[inline(always)]
    pub fn try_lock(&self) -> Option<SleepMutexGuard<'_, T>> {
        self.base.try_lock().map(|spin_guard| SleepMutexGuard {
            spin_guard: ManuallyDrop::new(spin_guard),
            mutex: self,
            _not_send: PhantomData,
        })
    }

    #[inline(always)]
    pub fn get_mut(&mut self) -> &mut T {
        self.base.get_mut()
    }
}

impl<T: fmt::Debug> fmt::Debug for SleepMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_lock() {
            Some(guard) => write!(f, "Mutex {{ data: ")
                .and_then(|()| (*guard).fmt(f))
                .and_then(|()| write!(f, "}}")),
            None => write!(f, "Mutex {{ <locked> }}"),
        }
    }
}

impl<'a, T: ?Sized + fmt::Debug> fmt::Debug for SleepMutexGuard<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<'a, T: ?Sized> Deref for SleepMutexGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.spin_guard
    }
}

impl<'a, T: ?Sized> DerefMut for SleepMutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.spin_guard
    }
}

impl<'a, T: ?Sized> Drop for SleepMutexGuard<'a, T> {
    fn drop(&mut self) {
        // SAFETY: 只会在这里 drop，而且之后再也不会被用到
        unsafe {
            ManuallyDrop::drop(&mut self.spin_guard);
        }
        self.mutex.lock_ops.notify(1);
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            mpsc, Arc,
        },
        thread,
        time::Duration,
    };

    use super::SleepMutex;

    #[derive(Eq, PartialEq, Debug)]
    struct NonCopy(i32);

    #[test]
    fn smoke() {
        let number = Arc::new(SleepMutex::new(1000));
        let (tx, rx) = mpsc::sync_channel(1);

        let number2 = Arc::clone(&number);
        let t = thread::spawn(move || {
            let mut locked = number2.lock();
            *locked = 10000;
            tx.send(()).unwrap();
            drop(locked);
        });

        rx.recv().unwrap();
        let locked = number.lock();
        assert_eq!(*locked, 10000);
        drop(locked);
        t.join().unwrap();
    }

    #[test]
    fn waiter_sleeps_while_holder_blocks() {
        let mutex = Arc::new(SleepMutex::new(0));
        let guard = mutex.lock();

        let mutex2 = Arc::clone(&mutex);
        let t = thread::spawn(move || {
            *mutex2.lock() += 1;
        });

        // 持锁一段较长的时间，等待者应当睡眠而不是 panic
        thread::sleep(Duration::from_millis(50));
        assert_eq!(*guard, 0);
        drop(guard);
        t.join().unwrap();
        assert_eq!(*mutex.lock(), 1);
    }

    #[test]
    fn lots_and_lots() {
        const J: u32 = 1000;
        const K: u32 = 4;

        let m = Arc::new(SleepMutex::new(0u32));
        let ts = (0..2 * K)
            .map(|_| {
                let m = Arc::clone(&m);
                thread::spawn(move || {
                    for _ in 0..J {
                        *m.lock() += 1;
                    }
                })
            })
            .collect::<Vec<_>>();
        for t in ts {
            t.join().unwrap();
        }
        assert_eq!(*m.lock(), J * K * 2);
    }

    #[test]
    fn try_lock() {
        let mutex = SleepMutex::<_>::new(42);

        // First lock succeeds
        let a = mutex.try_lock();
        assert_eq!(a.as_ref().map(|r| **r), Some(42));

        // Additional lock fails
        let b = mutex.try_lock();
        assert!(b.is_none());

        // After dropping lock, it succeeds again
        drop(a);
        let c = mutex.try_lock();
        assert_eq!(c.as_ref().map(|r| **r), Some(42));
    }

    #[test]
    fn test_into_inner_drop() {
        struct Foo(Arc<AtomicUsize>);
        impl Drop for Foo {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
        let num_drops = Arc::new(AtomicUsize::new(0));
        let m = SleepMutex::<_>::new(Foo(num_drops.clone()));
        assert_eq!(num_drops.load(Ordering::SeqCst), 0);
        {
            let _inner = m.into_inner();
            assert_eq!(num_drops.load(Ordering::SeqCst), 0);
        }
        assert_eq!(num_drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_into_inner() {
        let m = SleepMutex::<_>::new(NonCopy(10));
        assert_eq!(m.into_inner(), NonCopy(10));
    }
}
