use defines::error::{errno, Error};

/// 页 I/O 边界上允许出现的错误，只有这三种
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum PageIoError {
    #[display("I/O error")]
    Io,
    #[display("quota exceeded")]
    QuotaExceeded,
    #[display("no space left on device")]
    NoSpace,
}

impl PageIoError {
    /// 把设备报告的任意错误收窄到页 I/O 允许的范围内，其余一律视为 I/O 错误
    pub fn coerce(err: Error) -> Self {
        match err {
            errno::EDQUOT => Self::QuotaExceeded,
            errno::ENOSPC => Self::NoSpace,
            _ => Self::Io,
        }
    }
}

impl From<PageIoError> for Error {
    fn from(err: PageIoError) -> Self {
        match err {
            PageIoError::Io => errno::EIO,
            PageIoError::QuotaExceeded => errno::EDQUOT,
            PageIoError::NoSpace => errno::ENOSPC,
        }
    }
}

#[cfg(test)]
mod tests {
    use defines::error::{errno, Error};

    use super::PageIoError;

    #[test]
    fn coerces_to_three_kinds() {
        assert_eq!(PageIoError::coerce(errno::EDQUOT), PageIoError::QuotaExceeded);
        assert_eq!(PageIoError::coerce(errno::ENOSPC), PageIoError::NoSpace);
        assert_eq!(PageIoError::coerce(errno::EIO), PageIoError::Io);
        assert_eq!(PageIoError::coerce(errno::EROFS), PageIoError::Io);
        assert_eq!(PageIoError::coerce(errno::EINVAL), PageIoError::Io);
    }

    #[test]
    fn converts_back_to_errno() {
        assert_eq!(Error::from(PageIoError::NoSpace), errno::ENOSPC);
        assert_eq!(Error::from(PageIoError::Io), errno::EIO);
    }
}
