//! Frame Graph / Pass Scheduler
//!
//! - [`FrameGraph`]: per-frame pass declaration, dependency ordering, execution
//! - [`PassNode`]: one declared clear, raster or compute pass
//! - [`RenderState`], [`Viewport`], [`ClearFlags`]: per-pass fixed-function state

mod frame_graph;
mod node;
mod render_state;

pub use frame_graph::{FrameGraph, FrameStats};
pub use node::{PassClosure, PassContext, PassKind, PassNode};
pub use render_state::{ClearFlags, RenderState, Viewport};
