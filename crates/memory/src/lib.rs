//! 页帧的分配与回收。分页请求中传递的缓冲区都以页帧为单位

mod frame_allocator;

pub use self::frame_allocator::{Frame, FrameAllocator};
