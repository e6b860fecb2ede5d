use defines::error::{errno, KResult};
use klocks::SpinMutex;

use super::BlockDevice;

/// 完全放在内存里的块设备
///
/// 容量可以不是块大小的整数倍，越过末尾的读写会被截断，返回实际处理的字节数
pub struct RamDisk {
    block_size: usize,
    data: SpinMutex<Vec<u8>>,
}

impl RamDisk {
    pub fn new(block_size: usize, capacity: usize) -> Self {
        Self::from_bytes(block_size, vec![0; capacity])
    }

    pub fn from_bytes(block_size: usize, data: Vec<u8>) -> Self {
        assert!(block_size.is_power_of_two(), "bad block size {block_size}");
        Self {
            block_size,
            data: SpinMutex::new(data),
        }
    }

    /// 复制一份当前的内容
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    fn byte_offset(&self, block_id: u64) -> KResult<usize> {
        block_id
            .checked_mul(self.block_size as u64)
            .and_then(|offset| usize::try_from(offset).ok())
            .ok_or(errno::EINVAL)
    }
}

impl BlockDevice for RamDisk {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn read_blocks(&self, block_id: u64, buf: &mut [u8]) -> KResult<usize> {
        let offset = self.byte_offset(block_id)?;
        let data = self.data.lock();
        if offset >= data.len() {
            return Ok(0);
        }
        let nread = usize::min(buf.len(), data.len() - offset);
        buf[..nread].copy_from_slice(&data[offset..offset + nread]);
        log::trace!("ram disk: read {nread} bytes at block {block_id}");
        Ok(nread)
    }

    fn write_blocks(&self, block_id: u64, buf: &[u8]) -> KResult<usize> {
        let offset = self.byte_offset(block_id)?;
        let mut data = self.data.lock();
        if offset >= data.len() {
            return Err(errno::ENOSPC);
        }
        let nwrite = usize::min(buf.len(), data.len() - offset);
        data[offset..offset + nwrite].copy_from_slice(&buf[..nwrite]);
        log::trace!("ram disk: wrote {nwrite} bytes at block {block_id}");
        Ok(nwrite)
    }
}
