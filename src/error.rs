//! Error types surfaced by the rendering core.

use crate::backend::{BackendError, BackendTier, ViewKind};
use thiserror::Error;

/// Errors returned by device, resource, pipeline and graph operations.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("No backend tier could create a device (tried {tried:?})")]
    DeviceCreation { tried: Vec<BackendTier> },
    #[error("Failed to create resource '{label}': {reason}")]
    ResourceCreation { label: String, reason: String },
    #[error("Shader compilation failed for profile '{profile}': {message}")]
    ShaderCompile { profile: String, message: String },
    #[error("Shader reflection failed: {0}")]
    Reflection(String),
    #[error("Texture '{texture}' was not created with {view:?} usage")]
    UnsupportedView { view: ViewKind, texture: String },
    #[error("Texture '{texture}' has no {view:?} view; call make_* first")]
    MissingView { view: ViewKind, texture: String },
    #[error("Copy source and destination do not match: {0}")]
    CopyMismatch(String),
    #[error("Handle {0} does not refer to a live resource")]
    InvalidHandle(u64),
    #[error("Resource {0} is still bound and cannot be destroyed")]
    ResourceInUse(u64),
    #[error("Slot {slot} is out of range (max {max})")]
    SlotOutOfRange { slot: u32, max: u32 },
    #[error("Invalid binding: {0}")]
    InvalidBinding(String),
    #[error("Pipeline requires {what} at slot {slot} but nothing is bound")]
    UnboundSlot { what: &'static str, slot: u32 },
    #[error("No pipeline is bound")]
    NoPipeline,
    #[error("No presentation surface is attached")]
    SurfaceNotAttached,
    #[error("A presentation surface is already attached")]
    SurfaceAlreadyAttached,
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type RenderResult<T> = Result<T, RenderError>;

impl RenderError {
    /// Log the error where it is detected and hand it back
    pub(crate) fn logged(self) -> Self {
        log::error!("{self}");
        self
    }
}
