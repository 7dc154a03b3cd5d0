//! DXGI adapter/output walking.

use tracing::{debug, warn};
use windows::Win32::{
    Devices::Display::{
        DisplayConfigGetDeviceInfo, GetDisplayConfigBufferSizes, QueryDisplayConfig,
        DISPLAYCONFIG_DEVICE_INFO_GET_SDR_WHITE_LEVEL, DISPLAYCONFIG_DEVICE_INFO_GET_SOURCE_NAME,
        DISPLAYCONFIG_MODE_INFO, DISPLAYCONFIG_PATH_INFO, DISPLAYCONFIG_SDR_WHITE_LEVEL,
        DISPLAYCONFIG_SOURCE_DEVICE_NAME, QDC_ONLY_ACTIVE_PATHS,
    },
    Graphics::{
        Direct3D11::ID3D11Device,
        Dxgi::{
            CreateDXGIFactory1, IDXGIAdapter1, IDXGIDevice, IDXGIFactory1, IDXGIOutput1,
            IDXGIOutput6, DXGI_ADAPTER_FLAG_SOFTWARE, DXGI_ERROR_NOT_FOUND, DXGI_OUTPUT_DESC1,
        },
    },
};
use windows_core::{Interface, HRESULT, PCWSTR};

use crate::{
    consumer::{Topology, TopologyProvider},
    output::{CaptureRegionMode, OutputDescriptor},
    rect::Rect,
    status::Status,
};

use super::{LabelledWinResult, WinError};

/// Walks DXGI adapters and outputs into a [`Topology`].
///
/// Enumeration is re-run from scratch for every pipeline rebuild; descriptors
/// are replaced wholesale, never patched.
pub struct DxgiTopologyProvider {
    factory: IDXGIFactory1,
    region_mode: CaptureRegionMode,
}

impl DxgiTopologyProvider {
    /// Create a provider for the given capture-region mode.
    pub fn new(region_mode: CaptureRegionMode) -> LabelledWinResult<Self> {
        let factory = unsafe { CreateDXGIFactory1() }
            .map_err(|e| WinError::new(e, "CreateDXGIFactory1"))?;

        Ok(Self {
            factory,
            region_mode,
        })
    }

    /// The adapter at `index`.
    pub fn adapter(&self, index: usize) -> LabelledWinResult<IDXGIAdapter1> {
        unsafe { self.factory.EnumAdapters1(index as u32) }
            .map_err(|e| WinError::new(e, "IDXGIFactory1::EnumAdapters1"))
    }

    /// Reopen an output by its adapter and slot, for duplication.
    pub fn open_output(
        &self,
        adapter: &IDXGIAdapter1,
        slot: usize,
    ) -> LabelledWinResult<IDXGIOutput1> {
        let output = unsafe { adapter.EnumOutputs(slot as u32) }
            .map_err(|e| WinError::new(e, "IDXGIAdapter1::EnumOutputs"))?;

        output
            .cast()
            .map_err(|e| WinError::new(e, "IDXGIOutput::cast"))
    }

    /// The enumeration index of the adapter `device` lives on, matched by
    /// LUID. `None` when the device's adapter has no captured outputs.
    pub fn adapter_index_of(&self, device: &ID3D11Device) -> LabelledWinResult<Option<usize>> {
        let dxgi_device: IDXGIDevice = device
            .cast()
            .map_err(|e| WinError::new(e, "ID3D11Device::cast"))?;

        let adapter = unsafe { dxgi_device.GetAdapter() }
            .map_err(|e| WinError::new(e, "IDXGIDevice::GetAdapter"))?;
        let device_desc = unsafe { adapter.GetDesc() }
            .map_err(|e| WinError::new(e, "IDXGIAdapter::GetDesc"))?;

        let mut index = 0;
        loop {
            let candidate = match unsafe { self.factory.EnumAdapters1(index as u32) } {
                Ok(candidate) => candidate,
                Err(error) if error.code() == DXGI_ERROR_NOT_FOUND => return Ok(None),
                Err(error) => return Err(WinError::new(error, "IDXGIFactory1::EnumAdapters1")),
            };

            let desc = unsafe { candidate.GetDesc1() }
                .map_err(|e| WinError::new(e, "IDXGIAdapter1::GetDesc1"))?;

            if desc.AdapterLuid.LowPart == device_desc.AdapterLuid.LowPart
                && desc.AdapterLuid.HighPart == device_desc.AdapterLuid.HighPart
            {
                return Ok(Some(index));
            }

            index += 1;
        }
    }

    fn enumerate_outputs(&self) -> LabelledWinResult<Vec<OutputDescriptor>> {
        let mut outputs = Vec::new();
        let mut adapter_index = 0usize;

        loop {
            let adapter = match unsafe { self.factory.EnumAdapters1(adapter_index as u32) } {
                Ok(adapter) => adapter,
                Err(error) if error.code() == DXGI_ERROR_NOT_FOUND => break,
                Err(error) => return Err(WinError::new(error, "IDXGIFactory1::EnumAdapters1")),
            };

            let adapter_desc = unsafe { adapter.GetDesc1() }
                .map_err(|e| WinError::new(e, "IDXGIAdapter1::GetDesc1"))?;

            // Software adapters never drive physical outputs.
            if adapter_desc.Flags & DXGI_ADAPTER_FLAG_SOFTWARE.0 as u32 != 0 {
                adapter_index += 1;
                continue;
            }

            let mut slot = 0usize;
            loop {
                let output = match unsafe { adapter.EnumOutputs(slot as u32) } {
                    Ok(output) => output,
                    Err(error) if error.code() == DXGI_ERROR_NOT_FOUND => break,
                    Err(error) => return Err(WinError::new(error, "IDXGIAdapter1::EnumOutputs")),
                };

                let output6: IDXGIOutput6 = output
                    .cast()
                    .map_err(|e| WinError::new(e, "IDXGIOutput::cast"))?;
                let desc = unsafe { output6.GetDesc1() }
                    .map_err(|e| WinError::new(e, "IDXGIOutput6::GetDesc1"))?;

                if !desc.AttachedToDesktop.as_bool() {
                    let name = unsafe { PCWSTR::from_raw(desc.DeviceName.as_ptr()).to_string() }
                        .unwrap_or("Invalid Name".to_string());
                    debug!("Detached output \"{name}\" skipped");

                    slot += 1;
                    continue;
                }

                let white_level_adjustment = sdr_white_level(&desc)?.unwrap_or(1.0);

                outputs.push(OutputDescriptor {
                    index: outputs.len(),
                    adapter_index,
                    adapter_slot: slot,
                    rect: desc.DesktopCoordinates.into(),
                    white_level_adjustment,
                });

                slot += 1;
            }

            adapter_index += 1;
        }

        Ok(outputs)
    }
}

impl TopologyProvider for DxgiTopologyProvider {
    fn enumerate(&mut self) -> Result<Topology, Status> {
        let mut outputs = self.enumerate_outputs().map_err(|error| {
            warn!("Output enumeration failed: {error}");
            error.status()
        })?;

        if let CaptureRegionMode::SingleOutput(index) = self.region_mode {
            outputs.retain(|output| output.index == index);
        }

        // No usable output behaves like a hot-unplug: the caller retries
        // after a backoff until one appears.
        if outputs.is_empty() {
            return Err(Status::NOT_FOUND);
        }

        let desktop_rect = outputs
            .iter()
            .fold(Rect::default(), |union, output| union.union(&output.rect));

        Ok(Topology {
            outputs,
            desktop_rect,
            presentation_adapter: 0,
        })
    }
}

/// The output's SDR white level as a multiplier over the 80 nit reference,
/// `None` when the output has no active display-config path.
fn sdr_white_level(descriptor: &DXGI_OUTPUT_DESC1) -> LabelledWinResult<Option<f32>> {
    let mut path_elements = 0;
    let mut mode_info_elements = 0;
    unsafe {
        let result = GetDisplayConfigBufferSizes(
            QDC_ONLY_ACTIVE_PATHS,
            &mut path_elements,
            &mut mode_info_elements,
        );

        if result.is_err() {
            return Err(WinError::from_win32(result, "GetDisplayConfigBufferSizes"));
        }
    }

    let mut paths = vec![DISPLAYCONFIG_PATH_INFO::default(); path_elements as usize];
    let mut mode_infos = vec![DISPLAYCONFIG_MODE_INFO::default(); mode_info_elements as usize];
    unsafe {
        let result = QueryDisplayConfig(
            QDC_ONLY_ACTIVE_PATHS,
            &mut path_elements,
            paths.as_mut_ptr(),
            &mut mode_info_elements,
            mode_infos.as_mut_ptr(),
            None,
        );

        if result.is_err() {
            return Err(WinError::from_win32(result, "QueryDisplayConfig"));
        }
    }

    let matching_path = paths
        .iter()
        .map(|path| source_device_name(path).map(|name| (path, name)))
        .collect::<LabelledWinResult<Vec<_>>>()?
        .into_iter()
        .find(|(_, name)| *name == descriptor.DeviceName)
        .map(|(path, _)| *path);

    let Some(path) = matching_path else {
        return Ok(None);
    };

    let mut config = DISPLAYCONFIG_SDR_WHITE_LEVEL::default();
    config.header.adapterId = path.targetInfo.adapterId;
    config.header.id = path.targetInfo.id;
    config.header.r#type = DISPLAYCONFIG_DEVICE_INFO_GET_SDR_WHITE_LEVEL;
    config.header.size = size_of::<DISPLAYCONFIG_SDR_WHITE_LEVEL>() as u32;

    let result = unsafe { DisplayConfigGetDeviceInfo(&mut config.header) };
    let hresult = HRESULT::from_nt(result);
    if hresult.is_err() {
        return Err(WinError::from_hresult(hresult, "DisplayConfigGetDeviceInfo"));
    }

    Ok(Some(config.SDRWhiteLevel as f32 / 1000.0))
}

/// The GDI device name for a display-config path, matched against the DXGI
/// output descriptor's name.
fn source_device_name(path: &DISPLAYCONFIG_PATH_INFO) -> LabelledWinResult<[u16; 32]> {
    let mut config = DISPLAYCONFIG_SOURCE_DEVICE_NAME::default();
    config.header.adapterId = path.sourceInfo.adapterId;
    config.header.id = path.sourceInfo.id;
    config.header.r#type = DISPLAYCONFIG_DEVICE_INFO_GET_SOURCE_NAME;
    config.header.size = size_of::<DISPLAYCONFIG_SOURCE_DEVICE_NAME>() as u32;

    let result = unsafe { DisplayConfigGetDeviceInfo(&mut config.header) };
    let hresult = HRESULT::from_nt(result);
    if hresult.is_err() {
        return Err(WinError::from_hresult(hresult, "DisplayConfigGetDeviceInfo"));
    }

    Ok(config.viewGdiDeviceName)
}
