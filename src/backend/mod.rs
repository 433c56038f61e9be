//! Backend abstraction layer
//!
//! Provides the trait both devices implement: the wgpu device used for the
//! hardware and software tiers, and the CPU reference device.

pub mod reference;
pub mod traits;
pub mod types;
#[cfg(feature = "wgpu-backend")]
pub mod wgpu_backend;

pub use traits::*;
pub use types::*;

use reference::ReferenceBackend;
#[cfg(feature = "wgpu-backend")]
use wgpu_backend::WgpuBackend;

/// Backend wrapper that dispatches to the device picked at init
pub enum Backend {
    #[cfg(feature = "wgpu-backend")]
    Wgpu(WgpuBackend),
    Reference(ReferenceBackend),
}

impl Backend {
    /// Create the device for one tier
    pub fn new(tier: BackendTier) -> BackendResult<Self> {
        match tier {
            #[cfg(feature = "wgpu-backend")]
            BackendTier::Hardware => Ok(Backend::Wgpu(WgpuBackend::new(false)?)),
            #[cfg(feature = "wgpu-backend")]
            BackendTier::Software => Ok(Backend::Wgpu(WgpuBackend::new(true)?)),
            #[cfg(not(feature = "wgpu-backend"))]
            BackendTier::Hardware | BackendTier::Software => Err(
                BackendError::InitializationFailed("wgpu backend not compiled in".into()),
            ),
            BackendTier::Reference => Ok(Backend::Reference(ReferenceBackend::new())),
        }
    }

    /// Dynamic access to the active device
    pub fn device(&mut self) -> &mut dyn GraphicsBackend {
        match self {
            #[cfg(feature = "wgpu-backend")]
            Backend::Wgpu(b) => b,
            Backend::Reference(b) => b,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            #[cfg(feature = "wgpu-backend")]
            Backend::Wgpu(b) => b.name(),
            Backend::Reference(b) => b.name(),
        }
    }

    /// Get the reference backend if active
    pub fn as_reference(&self) -> Option<&ReferenceBackend> {
        match self {
            Backend::Reference(b) => Some(b),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }
}
