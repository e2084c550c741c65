//! Error Types
//!
//! This module defines the error types used throughout the crate.
//!
//! # Overview
//!
//! The main error type [`Error`] covers the failure modes that can reach a
//! caller:
//! - Rejected load requests (malformed descriptors)
//! - Device-side construction failures (decode, compile, allocation)
//! - Render-thread availability
//! - GPU initialization and settings parsing
//!
//! Missing or stale handles are **not** errors: `resolve` degrades to a
//! fallback resource and logs a warning instead.
//!
//! # Usage
//!
//! All fallible APIs return [`Result<T>`], an alias for
//! `std::result::Result<T, Error>`.
//!
//! ```rust,ignore
//! use resident::errors::Result;
//!
//! fn load() -> Result<()> {
//!     Ok(())
//! }
//! ```

use thiserror::Error;

use crate::handle::ResourceHandle;

/// The main error type for the resource cache.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Load Request Errors
    // ========================================================================
    /// The descriptor handed to `async_load` cannot describe a valid resource.
    #[error("Invalid {kind} descriptor: {reason}")]
    InvalidDescriptor {
        /// Resource kind that rejected the request
        kind: &'static str,
        /// Human-readable explanation
        reason: String,
    },

    /// A creation request depends on a resource that is not resident yet.
    ///
    /// The cache re-queues the request for the next tick instead of caching
    /// a failure.
    #[error("Dependency {0} is not resident yet")]
    DependencyNotReady(ResourceHandle),

    // ========================================================================
    // Construction Errors
    // ========================================================================
    /// The device failed to build a resource from a valid descriptor.
    #[error("Failed to construct {kind} '{label}': {reason}")]
    Construction {
        /// Resource kind being constructed
        kind: &'static str,
        /// Debug label of the resource
        label: String,
        /// Device-reported reason
        reason: String,
    },

    /// Shader permutation failed to compile.
    #[error("Shader compilation failed for '{label}': {reason}")]
    ShaderCompile {
        /// Debug label of the program variant
        label: String,
        /// Compiler diagnostics
        reason: String,
    },

    /// Permutation template failed to render.
    #[error("Shader template error: {0}")]
    Template(#[from] minijinja::Error),

    /// Image decoding error.
    #[error("Image decode error: {0}")]
    ImageDecode(String),

    /// File I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ========================================================================
    // Render Thread Errors
    // ========================================================================
    /// The render thread has shut down or panicked while serving a call.
    #[error("Render thread is not running")]
    RenderThreadGone,

    // ========================================================================
    // GPU Initialization Errors
    // ========================================================================
    /// Failed to request a compatible GPU adapter.
    #[error("Failed to request WGPU adapter: {0}")]
    AdapterRequestFailed(String),

    /// Failed to create the GPU device.
    #[error("Failed to create WGPU device: {0}")]
    DeviceCreateFailed(#[from] wgpu::RequestDeviceError),

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Settings file could not be parsed.
    #[error("Settings parse error: {0}")]
    Settings(#[from] serde_json::Error),
}

// ============================================================================
// Convenient conversion implementations
// ============================================================================

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::ImageDecode(err.to_string())
    }
}

impl Error {
    /// Shorthand for [`Error::InvalidDescriptor`].
    pub(crate) fn invalid(kind: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidDescriptor {
            kind,
            reason: reason.into(),
        }
    }
}

/// Alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
