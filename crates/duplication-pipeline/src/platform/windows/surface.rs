//! The keyed-mutex guarded shared surface and the CPU state that rides with
//! it.

use core::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use windows::Win32::Graphics::{
    Direct3D11::{
        ID3D11Device, ID3D11Texture2D, D3D11_BIND_RENDER_TARGET, D3D11_BIND_SHADER_RESOURCE,
        D3D11_RESOURCE_MISC_SHARED_KEYEDMUTEX, D3D11_TEXTURE2D_DESC, D3D11_USAGE_DEFAULT,
    },
    Dxgi::{
        Common::{DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_SAMPLE_DESC},
        IDXGIKeyedMutex, IDXGIResource,
    },
};
use windows_core::{Interface, HRESULT};

use crate::{
    pointer::PointerState,
    rect::{DirtyRegion, Rect},
    status::Status,
    surface::{MutexKey, SurfaceMutex},
};

use super::{LabelledWinResult, SendHANDLE, WinError};

/// The shared capture surface, owned by the arbitration side.
///
/// Created on the presentation device so publishes are plain same-device
/// copies; workers on the same adapter open the shared handle on their own
/// device and write through their opened instance.
pub struct SharedSurface {
    texture: ID3D11Texture2D,
    mutex: IDXGIKeyedMutex,
    handle: SendHANDLE,
    rect: Rect,
}

impl SharedSurface {
    /// Create the surface covering `rect`, in surface coordinates
    /// `(0, 0, width, height)`.
    pub fn new(device: &ID3D11Device, rect: Rect) -> LabelledWinResult<Self> {
        let desc = D3D11_TEXTURE2D_DESC {
            Width: rect.width(),
            Height: rect.height(),
            MipLevels: 1,
            ArraySize: 1,
            Format: DXGI_FORMAT_B8G8R8A8_UNORM,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Usage: D3D11_USAGE_DEFAULT,
            BindFlags: (D3D11_BIND_RENDER_TARGET.0 | D3D11_BIND_SHADER_RESOURCE.0) as u32,
            CPUAccessFlags: 0,
            MiscFlags: D3D11_RESOURCE_MISC_SHARED_KEYEDMUTEX.0 as u32,
        };

        let texture = {
            let mut texture = None;
            unsafe { device.CreateTexture2D(&desc, None, Some(&mut texture)) }
                .map_err(|e| WinError::new(e, "ID3D11Device::CreateTexture2D"))?;
            texture.expect("created texture was none")
        };

        let mutex: IDXGIKeyedMutex = texture
            .cast()
            .map_err(|e| WinError::new(e, "ID3D11Texture2D::cast"))?;

        let handle = {
            let resource: IDXGIResource = texture
                .cast()
                .map_err(|e| WinError::new(e, "ID3D11Texture2D::cast"))?;

            unsafe { resource.GetSharedHandle() }
                .map_err(|e| WinError::new(e, "IDXGIResource::GetSharedHandle"))?
        };

        Ok(Self {
            texture,
            mutex,
            handle: SendHANDLE(handle),
            rect,
        })
    }

    /// The surface texture on the owning device.
    pub const fn texture(&self) -> &ID3D11Texture2D {
        &self.texture
    }

    /// The surface rectangle, origin at `(0, 0)`.
    pub const fn rect(&self) -> Rect {
        self.rect
    }

    /// The shared handle workers open on their own devices.
    pub const fn shared_handle(&self) -> SendHANDLE {
        self.handle
    }
}

impl SurfaceMutex for SharedSurface {
    fn acquire(&self, key: MutexKey, timeout: Duration) -> Result<bool, Status> {
        acquire_keyed(&self.mutex, key, timeout)
    }

    fn release(&self, key: MutexKey) -> Result<(), Status> {
        release_keyed(&self.mutex, key)
    }
}

/// A worker's same-adapter view of the shared surface.
pub struct OpenedSurface {
    texture: ID3D11Texture2D,
    mutex: IDXGIKeyedMutex,
}

impl OpenedSurface {
    /// Open the shared handle on `device`. Fails across adapters.
    pub fn open(device: &ID3D11Device, handle: SendHANDLE) -> LabelledWinResult<Self> {
        let texture: ID3D11Texture2D = unsafe { device.OpenSharedResource(handle.0) }
            .map_err(|e| WinError::new(e, "ID3D11Device::OpenSharedResource"))?;

        let mutex = texture
            .cast()
            .map_err(|e| WinError::new(e, "ID3D11Texture2D::cast"))?;

        Ok(Self { texture, mutex })
    }

    /// The surface texture as seen by the opening device.
    pub const fn texture(&self) -> &ID3D11Texture2D {
        &self.texture
    }
}

impl SurfaceMutex for OpenedSurface {
    fn acquire(&self, key: MutexKey, timeout: Duration) -> Result<bool, Status> {
        acquire_keyed(&self.mutex, key, timeout)
    }

    fn release(&self, key: MutexKey) -> Result<(), Status> {
        release_keyed(&self.mutex, key)
    }
}

/// `WAIT_TIMEOUT` as an `HRESULT`. Success severity, so the generated
/// `AcquireSync` wrapper folds it into `Ok` and loses it; the raw vtable call
/// below keeps it visible.
const ACQUIRE_WAIT_TIMEOUT: HRESULT = HRESULT(0x0000_0102);

fn acquire_keyed(mutex: &IDXGIKeyedMutex, key: MutexKey, timeout: Duration) -> Result<bool, Status> {
    let hresult = unsafe {
        (Interface::vtable(mutex).AcquireSync)(
            Interface::as_raw(mutex),
            key.value(),
            timeout.as_millis() as u32,
        )
    };

    if hresult == ACQUIRE_WAIT_TIMEOUT {
        return Ok(false);
    }
    // Also success severity: the previous holder died without releasing.
    if hresult.0 == Status::WAIT_ABANDONED.0 {
        return Err(Status::WAIT_ABANDONED);
    }
    if hresult.is_err() {
        return Err(Status::from(hresult));
    }

    Ok(true)
}

fn release_keyed(mutex: &IDXGIKeyedMutex, key: MutexKey) -> Result<(), Status> {
    unsafe { mutex.ReleaseSync(key.value()) }.map_err(Status::from)
}

/// A cross-adapter pixel update staged through CPU memory.
///
/// Workers whose output sits on a different adapter than the surface cannot
/// open the shared handle; they read the dirty rows back through a staging
/// texture and park them here. The arbitration routine uploads them into the
/// surface at the start of its next tick.
pub struct StagedUpdate {
    /// Destination rect in surface coordinates.
    pub rect: Rect,
    /// Row stride of `data` in bytes.
    pub pitch: u32,
    /// Tightly packed rows for `rect`.
    pub data: Vec<u8>,
}

/// CPU-side capture state shared by the workers and the arbitration routine.
#[derive(Default)]
pub struct GuardedCaptureState {
    inner: Mutex<CaptureStateInner>,
}

/// The state behind the lock.
#[derive(Default)]
pub struct CaptureStateInner {
    /// The merged pointer state.
    pub pointer: PointerState,
    /// Invalidations committed to the surface but not yet republished.
    pub dirty: DirtyRegion,
    /// Pending cross-adapter pixel updates.
    pub staged: Vec<StagedUpdate>,
}

impl GuardedCaptureState {
    /// Create empty capture state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the state. Writers hold the surface's keyed mutex as well; this
    /// lock alone only covers the metadata.
    pub fn lock(&self) -> MutexGuard<'_, CaptureStateInner> {
        self.inner.lock()
    }
}
