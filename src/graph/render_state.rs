//! Per-pass viewport, fixed-function state and clear flags.

use bitflags::bitflags;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct ClearFlags: u8 {
        const COLOR   = 1 << 0;
        const DEPTH   = 1 << 1;
        const STENCIL = 1 << 2;
    }
}

/// Pixel rectangle a pass draws into.
///
/// A zero-sized viewport covers the whole target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self::FULL
    }
}

impl Viewport {
    pub const FULL: Self = Self {
        x: 0.0,
        y: 0.0,
        width: 0.0,
        height: 0.0,
        min_depth: 0.0,
        max_depth: 1.0,
    };

    #[must_use]
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            ..Self::FULL
        }
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// Fixed-function state applied when a render pass begins.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderState {
    pub depth_test: bool,
    pub depth_write: bool,
    pub blend: Option<wgpu::BlendState>,
    pub cull_mode: Option<wgpu::Face>,
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            depth_test: true,
            depth_write: true,
            blend: None,
            cull_mode: Some(wgpu::Face::Back),
        }
    }
}

impl RenderState {
    /// Alpha-blended, depth-tested, no depth writes.
    #[must_use]
    pub fn transparent() -> Self {
        Self {
            depth_write: false,
            blend: Some(wgpu::BlendState::ALPHA_BLENDING),
            ..Self::default()
        }
    }

    /// Full-screen post-processing: no depth, no culling.
    #[must_use]
    pub fn fullscreen() -> Self {
        Self {
            depth_test: false,
            depth_write: false,
            blend: None,
            cull_mode: None,
        }
    }
}
