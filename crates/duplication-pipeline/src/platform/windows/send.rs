use windows::Win32::Foundation::HANDLE;

/// A wrapper to make [HANDLE] [Send].
#[derive(Debug, Clone, Copy)]
pub struct SendHANDLE(pub HANDLE);
unsafe impl Send for SendHANDLE {}
unsafe impl Sync for SendHANDLE {}
