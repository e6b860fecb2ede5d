//! 块设备的按需分页
//!
//! 把一个块设备映射成内存对象：内存管理者通过 [`MemoryObjectHandle`] 发来读页、写页等请求，
//! 由设备所属的 [`RequestGroup`] 中的服务线程处理，再经 [`PagerBackend`] 转换成块设备读写。
//! [`Device::stop_paging`] 负责在确认没有用户后销毁对象。

mod backing;
mod config;
mod device;
mod error;
mod group;
mod page_io;
mod request;
mod shutdown;

pub use self::{
    backing::{
        BackingObject, CachePolicy, Extent, MemoryControl, MemoryObjectHandle, PageIn,
        PagerBackend,
    },
    config::PagingConfig,
    device::{Device, DeviceFlags},
    error::PageIoError,
    group::{PolicySwitch, RequestGroup},
};
