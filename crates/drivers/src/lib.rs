//! 分页器所消费的设备接口，以及一个内存中的块设备实现

mod block;

pub use self::block::{ram_disk::RamDisk, BlockDevice};
