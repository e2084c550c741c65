//! Type-specific resource caches built on [`ResourceCache`](crate::cache::ResourceCache).

pub mod geometry;
pub mod image;
pub mod render_target;

pub use geometry::{GeometryCache, GeometryDescriptor, Indices};
pub use image::{ImageCache, ImageDescriptor, ImageLayout, ImageSource};
pub use render_target::{
    AttachmentDesc, AttachmentSource, RenderTargetCache, RenderTargetDescriptor,
};
