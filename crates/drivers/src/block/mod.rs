pub mod ram_disk;

use defines::error::KResult;

/// 块设备的抽象，读写都以块为单位进行
///
/// `block_id` 是起始块号，传入缓冲区的长度决定读写多少字节，不要求是块大小的整数倍。
/// 返回实际读写的字节数，可能少于请求的数量（例如越过了设备末尾）
pub trait BlockDevice: Send + Sync {
    fn block_size(&self) -> usize;
    fn read_blocks(&self, block_id: u64, buf: &mut [u8]) -> KResult<usize>;
    fn write_blocks(&self, block_id: u64, buf: &[u8]) -> KResult<usize>;
}
