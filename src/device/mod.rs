//! Render Device Abstraction
//!
//! The cache never talks to a graphics API directly. Every device-side
//! operation (object construction, destruction, pass recording) goes through
//! [`RenderDevice`], which is owned by exactly one thread: the render-thread
//! marshal. Two implementations ship with the crate:
//!
//! | Device | Module | Purpose |
//! |--------|--------|---------|
//! | [`WgpuDevice`] | `gpu` | Real GPU backend on top of `wgpu` |
//! | [`HeadlessDevice`] | `headless` | Recording backend for tests and tooling |
//!
//! Shader compilation, pixel formats and API call sequences stay behind this
//! trait; the cache only sees opaque resources.

mod gpu;
mod headless;

pub use gpu::{WgpuDevice, WgpuGeometry, WgpuImage, WgpuProgram, WgpuRenderTarget};
pub use headless::{
    DeviceCommand, DeviceProbe, DeviceStats, HeadlessDevice, HeadlessGeometry, HeadlessImage,
    HeadlessProgram, HeadlessRenderTarget,
};

use glam::Vec4;

use crate::errors::Result;
use crate::graph::{ClearFlags, RenderState, Viewport};
use crate::managers::geometry::GeometryDescriptor;
use crate::managers::image::ImageLayout;
use crate::shader::ShaderStage;

/// Upload-ready image description handed to the device.
///
/// File decoding has already happened on the render thread; `pixels` holds
/// tightly packed texel rows for every layer, or `None` for attachment
/// storage that is only ever rendered to.
#[derive(Debug, Clone, Copy)]
pub struct ImageUpload<'a> {
    pub width: u32,
    pub height: u32,
    pub layers: u32,
    pub layout: ImageLayout,
    pub format: wgpu::TextureFormat,
    pub usage: wgpu::TextureUsages,
    pub mip_levels: u32,
    pub filter: wgpu::FilterMode,
    pub wrap: wgpu::AddressMode,
    pub pixels: Option<&'a [u8]>,
}

/// One shader stage after permutation synthesis.
#[derive(Debug, Clone, Copy)]
pub struct StageCode<'a> {
    pub stage: ShaderStage,
    pub code: &'a str,
}

/// Opaque device operations, executed only on the render thread.
pub trait RenderDevice: Send + 'static {
    type Image: Send + Sync + 'static;
    type Geometry: Send + Sync + 'static;
    type Program: Send + Sync + 'static;
    type RenderTarget: Send + Sync + 'static;

    // ── Resource construction / destruction ────────────────────────────────

    fn create_image(&mut self, upload: &ImageUpload<'_>, label: &str) -> Result<Self::Image>;

    fn destroy_image(&mut self, image: Self::Image);

    fn create_geometry(
        &mut self,
        descriptor: &GeometryDescriptor,
        label: &str,
    ) -> Result<Self::Geometry>;

    fn destroy_geometry(&mut self, geometry: Self::Geometry);

    /// Compiles a program from fully synthesized stage code.
    fn compile_program(&mut self, stages: &[StageCode<'_>], label: &str)
    -> Result<Self::Program>;

    /// Builds the always-valid program bound in place of broken variants.
    fn create_dummy_program(&mut self) -> Result<Self::Program>;

    fn destroy_program(&mut self, program: Self::Program);

    fn create_render_target(
        &mut self,
        width: u32,
        height: u32,
        attachments: &[&Self::Image],
        label: &str,
    ) -> Result<Self::RenderTarget>;

    fn destroy_render_target(&mut self, target: Self::RenderTarget);

    // ── Frame recording ────────────────────────────────────────────────────

    /// Called before the first pass of a frame graph.
    fn begin_frame(&mut self) {}

    /// `None` targets the device's default output.
    fn clear(&mut self, target: Option<&Self::RenderTarget>, color: Vec4, flags: ClearFlags);

    fn begin_render_pass(
        &mut self,
        target: Option<&Self::RenderTarget>,
        viewport: &Viewport,
        state: &RenderState,
        label: &str,
    );

    fn bind_program(&mut self, program: &Self::Program);

    fn end_render_pass(&mut self);

    fn begin_compute_pass(&mut self, label: &str);

    fn end_compute_pass(&mut self);

    /// Called after the last pass of a frame graph.
    fn end_frame(&mut self) {}
}
