//! The Direct3D 11 / DXGI desktop duplication backend.

pub mod arbitration;
pub mod directx;
pub mod duplication;
pub mod enumerate;
mod result;
mod send;
pub mod supervisor;
pub mod surface;
pub mod worker;

pub use result::{LabelledWinResult, WinError};
pub use send::SendHANDLE;
