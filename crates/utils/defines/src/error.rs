#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Error(core::ffi::c_int);

impl Error {
    #[inline]
    pub fn as_isize(self) -> isize {
        self.0 as isize
    }

    pub fn info(self) -> &'static str {
        errno::error_info(self.as_isize())
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.info())
    }
}

pub type KResult<T = isize> = core::result::Result<T, Error>;

pub mod errno {
    macro_rules! declare_errno {
        ($($name:tt, $errno:literal, $desc:literal,)*) => {
            $(#[doc = $desc]
            pub const $name: super::Error = super::Error($errno);)*
            pub fn error_info(errno: isize) -> &'static str {
                match errno {
                    $($errno => ::core::concat!(stringify!($name), ", ", stringify!($desc)),)*
                    _ => "Unknown error.",
                }
            }
        };
    }

    #[rustfmt::skip]
    declare_errno!(
        EIO,            -5,     "I/O error.",
        ENXIO,          -6,     "No such device or address.",
        EAGAIN,         -11,    "Try again.",
        ENODEV,         -19,    "No such device.",
        EINVAL,         -22,    "Invalid argument.",
        ENOSPC,         -28,    "No space left on device.",
        EROFS,          -30,    "Read-only file system.",
        EDQUOT,         -122,   "Quota exceeded.",
    );
}
