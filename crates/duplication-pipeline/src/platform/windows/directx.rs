use windows::Win32::{
    Foundation::HMODULE,
    Graphics::{
        Direct3D::{D3D_DRIVER_TYPE, D3D_DRIVER_TYPE_HARDWARE, D3D_DRIVER_TYPE_UNKNOWN, D3D_DRIVER_TYPE_WARP},
        Direct3D11::{
            D3D11CreateDevice, ID3D11Device, ID3D11DeviceContext, D3D11_CREATE_DEVICE_BGRA_SUPPORT,
            D3D11_CREATE_DEVICE_FLAG, D3D11_SDK_VERSION,
        },
        Dxgi::{IDXGIAdapter, IDXGIAdapter1, DXGI_ERROR_UNSUPPORTED},
    },
};
use windows_core::{Interface, Result as WindowsResult};

use crate::status::Status;

use super::{LabelledWinResult, WinError};

/// The Direct3D 11 device set for one adapter's capture work.
pub struct DirectX {
    /// The adapter the device was created on, `None` for the default adapter.
    pub adapter: Option<IDXGIAdapter1>,

    /// Used to duplicate outputs and create textures.
    pub device: ID3D11Device,

    /// Used to blit acquired frames into the shared surface.
    pub context: ID3D11DeviceContext,
}

impl DirectX {
    /// Creates a device set on the default adapter, falling back to WARP when
    /// no hardware device is available.
    pub fn new() -> LabelledWinResult<Self> {
        let device = {
            let mut device = None;
            let mut result = d3d11_device_with_type(
                None,
                D3D_DRIVER_TYPE_HARDWARE,
                D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                &mut device,
            );

            if let Err(error) = &result {
                if error.code() == DXGI_ERROR_UNSUPPORTED {
                    result = d3d11_device_with_type(
                        None,
                        D3D_DRIVER_TYPE_WARP,
                        D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                        &mut device,
                    );
                }
            }
            result.map_err(|e| WinError::new(e, "D3D11CreateDevice"))?;

            device.expect("d3d11 device was none")
        };

        let context = unsafe { device.GetImmediateContext() }
            .map_err(|e| WinError::new(e, "ID3D11Device::GetImmediateContext"))?;

        Ok(Self {
            adapter: None,
            device,
            context,
        })
    }

    /// Creates a device set on a specific adapter. Duplicating an output
    /// requires a device on the output's own adapter.
    pub fn on_adapter(adapter: IDXGIAdapter1) -> LabelledWinResult<Self> {
        let base: IDXGIAdapter = adapter
            .cast()
            .map_err(|e| WinError::new(e, "IDXGIAdapter1::cast"))?;

        let device = {
            let mut device = None;
            d3d11_device_with_type(
                Some(&base),
                D3D_DRIVER_TYPE_UNKNOWN,
                D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                &mut device,
            )
            .map_err(|e| WinError::new(e, "D3D11CreateDevice"))?;

            device.expect("d3d11 device was none")
        };

        let context = unsafe { device.GetImmediateContext() }
            .map_err(|e| WinError::new(e, "ID3D11Device::GetImmediateContext"))?;

        Ok(Self {
            adapter: Some(adapter),
            device,
            context,
        })
    }

    /// Ask the device why it was removed. [`Status::OK`] while the device is
    /// still alive; feed the result to failure classification so the device's
    /// own diagnosis overrides the failing call's code.
    pub fn removed_reason(&self) -> Status {
        removed_reason(&self.device)
    }
}

/// The device-removed reason for any device, [`Status::OK`] while alive.
pub fn removed_reason(device: &ID3D11Device) -> Status {
    match unsafe { device.GetDeviceRemovedReason() } {
        Ok(()) => Status::OK,
        Err(error) => Status::from(error),
    }
}

fn d3d11_device_with_type(
    adapter: Option<&IDXGIAdapter>,
    driver_type: D3D_DRIVER_TYPE,
    flags: D3D11_CREATE_DEVICE_FLAG,
    device: *mut Option<ID3D11Device>,
) -> WindowsResult<()> {
    unsafe {
        D3D11CreateDevice(
            adapter,
            driver_type,
            HMODULE::default(),
            flags,
            None,
            D3D11_SDK_VERSION,
            Some(device),
            None,
            None,
        )
    }
}
