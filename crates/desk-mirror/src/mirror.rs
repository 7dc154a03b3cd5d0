//! The standalone mirror target.
//!
//! A real integration hands the pipeline its own presentation texture (an
//! overlay, an encoder input, a preview window). Running standalone, the
//! binary mirrors into a plain GPU texture and only accounts for what was
//! published.

use core::time::Duration;

use duplication_pipeline::{
    ConsumerQuery, ConsumerRegion, DirectX, LabelledWinResult, PointerState, PresentationTexture,
    Rect, WinError,
};
use tracing::{debug, info};
use windows::Win32::Graphics::{
    Direct3D11::{
        ID3D11Device, ID3D11DeviceContext, ID3D11Texture2D, D3D11_BIND_RENDER_TARGET,
        D3D11_BIND_SHADER_RESOURCE, D3D11_TEXTURE2D_DESC, D3D11_USAGE_DEFAULT,
    },
    Dxgi::Common::{DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_SAMPLE_DESC},
};

/// A plain texture the pipeline publishes into.
pub struct MirrorTarget {
    directx: DirectX,
    texture: ID3D11Texture2D,
    rect: Rect,
}

impl MirrorTarget {
    /// Create the target and its device. The texture starts as a placeholder
    /// and is sized by the first [`PresentationTexture::prepare`] call.
    pub fn new() -> LabelledWinResult<Self> {
        let directx = DirectX::new()?;
        let rect = Rect::new(0, 0, 1, 1);
        let texture = create_texture(&directx.device, rect)?;

        Ok(Self {
            directx,
            texture,
            rect,
        })
    }
}

impl PresentationTexture for MirrorTarget {
    fn device(&self) -> &ID3D11Device {
        &self.directx.device
    }

    fn prepare(&mut self, rect: Rect) -> LabelledWinResult<()> {
        if self.rect == rect {
            return Ok(());
        }

        self.texture = create_texture(&self.directx.device, rect)?;
        self.rect = rect;
        info!(
            "Mirror texture sized to {}x{}",
            rect.width(),
            rect.height()
        );

        Ok(())
    }

    fn context(&self) -> &ID3D11DeviceContext {
        &self.directx.context
    }

    fn texture(&self) -> &ID3D11Texture2D {
        &self.texture
    }

    fn draw_pointer(&mut self, pointer: &PointerState) -> LabelledWinResult<()> {
        // Pointer compositing belongs to a real presentation layer; the
        // standalone mirror only tracks that the pointer region changed.
        debug!(
            "Pointer at ({}, {}), visible: {}",
            pointer.position.x, pointer.position.y, pointer.visible
        );
        Ok(())
    }

    fn frame_published(&mut self, dirty: Rect) {
        debug!(
            "Published ({}, {}) to ({}, {})",
            dirty.left, dirty.top, dirty.right, dirty.bottom
        );
    }
}

fn create_texture(device: &ID3D11Device, rect: Rect) -> LabelledWinResult<ID3D11Texture2D> {
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
        MiscFlags: 0,
    };

    let mut texture = None;
    unsafe { device.CreateTexture2D(&desc, None, Some(&mut texture)) }
        .map_err(|e| WinError::new(e, "ID3D11Device::CreateTexture2D"))?;

    Ok(texture.expect("created texture was none"))
}

/// Desktop coordinates stay inside the Win32 virtual-screen range, so one
/// crop covering that whole range behaves as an always-visible full-desktop
/// viewer.
const VIRTUAL_SCREEN_BOUNDS: Rect = Rect::new(-32768, -32768, 32767, 32767);

/// A single full-desktop consumer, standing in for externally-owned overlay
/// state.
pub struct MirrorConsumers {
    limit_override: Option<Duration>,
}

impl MirrorConsumers {
    /// Create the consumer set.
    pub const fn new(limit_override: Option<Duration>) -> Self {
        Self { limit_override }
    }
}

impl ConsumerQuery for MirrorConsumers {
    fn visible_consumers(&self) -> Vec<ConsumerRegion> {
        vec![ConsumerRegion {
            crop: VIRTUAL_SCREEN_BOUNDS,
            sources_pipeline: true,
            limit_override: self.limit_override,
        }]
    }
}
