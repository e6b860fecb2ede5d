//! 宿主环境下使用的锁：短临界区用 [`SpinMutex`]，可能持有较久的用 [`SleepMutex`]

mod kspin;
mod sleep;

pub use kspin::{SpinMutex, SpinMutexGuard};
pub use sleep::{SleepMutex, SleepMutexGuard};
pub use spin::{Lazy, Once};
