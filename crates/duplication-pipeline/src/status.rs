//! Raw platform status codes and their decoding.

use core::fmt;

/// A raw platform status code (an `HRESULT` on Windows).
///
/// The pipeline classifies failures by comparing these against fixed
/// expected-error tables, so the codes the tables reference are defined here
/// as named constants rather than being pulled from platform bindings. This
/// keeps classification and its tests host-independent.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(pub i32);

impl Status {
    /// The success status.
    pub const OK: Self = Self(0);

    /// `WAIT_ABANDONED`: a wait completed because the owning thread died.
    pub const WAIT_ABANDONED: Self = Self(0x0000_0080);

    /// `E_ACCESSDENIED`: access denied, seen during session transitions.
    pub const ACCESS_DENIED: Self = Self(0x8007_0005_u32 as i32);

    /// `E_OUTOFMEMORY`.
    pub const OUT_OF_MEMORY: Self = Self(0x8007_000E_u32 as i32);

    /// `DXGI_ERROR_NOT_FOUND`: the requested output does not exist.
    pub const NOT_FOUND: Self = Self(0x887A_0002_u32 as i32);

    /// `DXGI_ERROR_DEVICE_REMOVED`: the GPU device was removed.
    pub const DEVICE_REMOVED: Self = Self(0x887A_0005_u32 as i32);

    /// `DXGI_ERROR_DEVICE_RESET`: the GPU device was reset.
    pub const DEVICE_RESET: Self = Self(0x887A_0007_u32 as i32);

    /// `DXGI_ERROR_NOT_CURRENTLY_AVAILABLE`: the OS-wide cap on concurrent
    /// duplication sessions has been reached.
    pub const DUPLICATION_UNAVAILABLE: Self = Self(0x887A_0022_u32 as i32);

    /// `DXGI_ERROR_ACCESS_LOST`: the duplication session was invalidated by a
    /// desktop switch or mode change.
    pub const ACCESS_LOST: Self = Self(0x887A_0026_u32 as i32);

    /// `DXGI_ERROR_WAIT_TIMEOUT`: no new frame arrived within the timeout.
    pub const WAIT_TIMEOUT: Self = Self(0x887A_0027_u32 as i32);

    /// `DXGI_ERROR_SESSION_DISCONNECTED`: the remote/console session ended.
    pub const SESSION_DISCONNECTED: Self = Self(0x887A_0028_u32 as i32);

    /// Returns whether this is the success status.
    pub const fn is_ok(&self) -> bool {
        self.0 == 0
    }

    /// A human-readable name for the known codes, `None` otherwise.
    pub const fn name(&self) -> Option<&'static str> {
        Some(match *self {
            Self::OK => "S_OK",
            Self::WAIT_ABANDONED => "WAIT_ABANDONED",
            Self::ACCESS_DENIED => "E_ACCESSDENIED",
            Self::OUT_OF_MEMORY => "E_OUTOFMEMORY",
            Self::NOT_FOUND => "DXGI_ERROR_NOT_FOUND",
            Self::DEVICE_REMOVED => "DXGI_ERROR_DEVICE_REMOVED",
            Self::DEVICE_RESET => "DXGI_ERROR_DEVICE_RESET",
            Self::DUPLICATION_UNAVAILABLE => "DXGI_ERROR_NOT_CURRENTLY_AVAILABLE",
            Self::ACCESS_LOST => "DXGI_ERROR_ACCESS_LOST",
            Self::WAIT_TIMEOUT => "DXGI_ERROR_WAIT_TIMEOUT",
            Self::SESSION_DISCONNECTED => "DXGI_ERROR_SESSION_DISCONNECTED",
            _ => return None,
        })
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} (0x{:08X})", self.0 as u32),
            None => write!(f, "0x{:08X}", self.0 as u32),
        }
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Status({self})")
    }
}

#[cfg(windows)]
impl From<windows_core::HRESULT> for Status {
    fn from(hresult: windows_core::HRESULT) -> Self {
        Self(hresult.0)
    }
}

#[cfg(windows)]
impl From<&windows_result::Error> for Status {
    fn from(error: &windows_result::Error) -> Self {
        Self(error.code().0)
    }
}

#[cfg(windows)]
impl From<windows_result::Error> for Status {
    fn from(error: windows_result::Error) -> Self {
        Self(error.code().0)
    }
}
