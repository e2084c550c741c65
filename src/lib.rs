//! # Resident
//!
//! An asynchronous, handle-indexed cache for GPU resources, with a dedicated
//! render thread and a dependency-scheduled frame graph on top.
//!
//! Producers on any thread request resources by name or content and get a
//! [`ResourceHandle`] back immediately. Once per frame,
//! [`ResourceContext::tick`] hands queued work to the render thread, the only
//! thread that touches the device. Until a resource is resident, resolving
//! its handle yields a per-kind fallback, so callers never wait and never
//! crash on a missing or broken asset.
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`handle`] | [`ResourceHandle`], content hashing |
//! | [`cache`] | [`ResourceCache`], the generic slot table and request queues |
//! | [`managers`] | Image, geometry and render-target caches |
//! | [`shader`] | Program cache, permutations, hot reload |
//! | [`graph`] | [`FrameGraph`] pass declaration and scheduling |
//! | [`marshal`] | [`RenderThread`], the device-owning worker |
//! | [`device`] | [`RenderDevice`] trait, wgpu and headless backends |
//!
//! ```rust,ignore
//! use resident::prelude::*;
//!
//! let ctx = ResourceContext::new(HeadlessDevice::new(), CacheSettings::default())?;
//! let albedo = ctx.images().async_load("albedo", ImageDescriptor::file("albedo.png"))?;
//! ctx.tick();
//! ctx.wait_idle();
//! assert!(ctx.images().is_valid(albedo));
//! ```

pub mod cache;
pub mod context;
pub mod device;
pub mod errors;
pub mod graph;
pub mod handle;
pub mod managers;
pub mod marshal;
pub mod settings;
pub mod shader;
pub mod utils;

pub use cache::{ResourceCache, ResourceKind};
pub use context::{Caches, ResourceContext};
pub use device::{HeadlessDevice, RenderDevice, WgpuDevice};
pub use errors::{Error, Result};
pub use graph::{ClearFlags, FrameGraph, FrameStats, PassContext, RenderState, Viewport};
pub use handle::ResourceHandle;
pub use marshal::RenderThread;
pub use settings::CacheSettings;
pub use shader::{ProgramDescriptor, ShaderCache, ShaderDefines, ShaderStage};

/// Commonly used types.
pub mod prelude {
    pub use crate::context::{Caches, ResourceContext};
    pub use crate::device::{HeadlessDevice, RenderDevice, WgpuDevice};
    pub use crate::graph::{ClearFlags, FrameGraph, PassContext, RenderState, Viewport};
    pub use crate::handle::ResourceHandle;
    pub use crate::managers::{
        GeometryDescriptor, ImageDescriptor, Indices, RenderTargetDescriptor,
    };
    pub use crate::settings::CacheSettings;
    pub use crate::shader::{ProgramDescriptor, ShaderDefines, ShaderStage};
}
