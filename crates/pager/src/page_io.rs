//! 页粒度的请求到块粒度设备读写的转换

use defines::{
    config::{PAGE_OFFSET_MASK, PAGE_SIZE},
    error::{errno, KResult},
};
use memory::Frame;

use crate::{
    backing::{Extent, PageIn, PagerBackend},
    device::Device,
    error::PageIoError,
};

impl Device {
    /// `offset` 处实际存在的字节数。只有最后一页可能不满一页
    fn valid_bytes_at(&self, offset: u64) -> Option<usize> {
        if offset & PAGE_OFFSET_MASK as u64 != 0 || offset >= self.size() {
            return None;
        }
        Some(u64::min(PAGE_SIZE as u64, self.size() - offset) as usize)
    }

    fn block_id(&self, offset: u64) -> u64 {
        offset / self.block_size() as u64
    }
}

impl PagerBackend for Device {
    fn read_page(&self, offset: u64) -> Result<PageIn, PageIoError> {
        let write_lock = self.is_readonly();
        let want = self.valid_bytes_at(offset).ok_or(PageIoError::Io)?;
        let mut frame = Frame::alloc_in(&self.frames).ok_or(PageIoError::Io)?;
        let buf = frame.as_page_bytes_mut();
        let nread = self
            .store()
            .read_blocks(self.block_id(offset), &mut buf[..want])
            .map_err(PageIoError::coerce)?;
        if nread < want {
            log::debug!(
                "{}: short read at {offset:#x}, {nread} of {want} bytes",
                self.name()
            );
            return Err(PageIoError::Io);
        }
        buf[want..].fill(0);
        Ok(PageIn { frame, write_lock })
    }

    fn write_page(&self, offset: u64, frame: Frame) -> KResult<()> {
        if self.is_readonly() {
            return Err(errno::EROFS);
        }
        let want = self.valid_bytes_at(offset).ok_or(PageIoError::Io)?;
        let written = self
            .store()
            .write_blocks(self.block_id(offset), &frame.as_page_bytes()[..want]);
        drop(frame);
        match written {
            Ok(n) if n >= want => Ok(()),
            Ok(n) => {
                log::debug!(
                    "{}: short write at {offset:#x}, {n} of {want} bytes",
                    self.name()
                );
                Err(PageIoError::Io.into())
            }
            Err(e) => Err(PageIoError::coerce(e).into()),
        }
    }

    fn unlock_page(&self, _offset: u64) -> KResult<()> {
        if self.is_readonly() {
            Err(errno::EROFS)
        } else {
            Ok(())
        }
    }

    fn report_extent(&self) -> Extent {
        Extent {
            offset: 0,
            size: self.size(),
        }
    }

    fn clear_user_data(&self) {
        log::debug!("{}: backing object torn down", self.name());
    }

    fn drop_weak(&self) {
        log::trace!("{}: backing object port destroyed", self.name());
    }
}
