//! Pass nodes.
//!
//! A node is declared once per frame and consumed by
//! [`FrameGraph::execute`](super::FrameGraph::execute). Its closure is boxed
//! `FnOnce`: it captures whatever handles and values it needs by move and
//! resolves them through the caches when it runs on the render thread.

use std::sync::Arc;

use glam::Vec4;
use smallvec::SmallVec;

use super::render_state::{ClearFlags, RenderState, Viewport};
use crate::context::Caches;
use crate::device::RenderDevice;
use crate::handle::ResourceHandle;
use crate::shader::ShaderDefines;

/// What a pass closure can reach while it runs.
pub struct PassContext<'a, D: RenderDevice> {
    pub device: &'a mut D,
    pub caches: &'a Caches<D>,
    /// The program variant bound for render passes.
    pub program: Option<Arc<D::Program>>,
    pub target: Option<ResourceHandle>,
}

pub type PassClosure<D> = Box<dyn for<'a> FnOnce(&mut PassContext<'a, D>) + Send>;

#[derive(Debug, Clone)]
pub enum PassKind {
    Clear {
        color: Vec4,
        flags: ClearFlags,
    },
    Render {
        viewport: Viewport,
        state: RenderState,
        /// `INVALID` leaves program binding to the closure.
        program: ResourceHandle,
        defines: ShaderDefines,
    },
    Compute,
}

impl PassKind {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Clear { .. } => "Clear",
            Self::Render { .. } => "Render",
            Self::Compute => "Compute",
        }
    }
}

pub struct PassNode<D: RenderDevice> {
    pub(crate) kind: PassKind,
    pub(crate) target: Option<ResourceHandle>,
    pub(crate) closure: Option<PassClosure<D>>,
    pub(crate) dependencies: SmallVec<[ResourceHandle; 4]>,
    pub(crate) debug_name: String,
}

impl<D: RenderDevice> PassNode<D> {
    pub(crate) fn new(kind: PassKind, target: Option<ResourceHandle>) -> Self {
        Self {
            debug_name: kind.name().to_owned(),
            kind,
            target,
            closure: None,
            dependencies: SmallVec::new(),
        }
    }

    /// Sets the closure that records the pass's work.
    pub fn with(
        &mut self,
        closure: impl for<'a> FnOnce(&mut PassContext<'a, D>) + Send + 'static,
    ) -> &mut Self {
        self.closure = Some(Box::new(closure));
        self
    }

    /// Declares handles the pass reads. The pass is ordered after every pass
    /// that targets one of them and skipped if any is not resident.
    pub fn depends_on(&mut self, handles: impl IntoIterator<Item = ResourceHandle>) -> &mut Self {
        for handle in handles {
            if !self.dependencies.contains(&handle) {
                self.dependencies.push(handle);
            }
        }
        self
    }

    pub fn set_debug_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.debug_name = name.into();
        self
    }

    /// Selects the program permutation of a render pass.
    pub fn defines(&mut self, defines: ShaderDefines) -> &mut Self {
        match &mut self.kind {
            PassKind::Render { defines: slot, .. } => *slot = defines,
            other => log::warn!(
                "Defines ignored on {} pass '{}'",
                other.name(),
                self.debug_name
            ),
        }
        self
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> &PassKind {
        &self.kind
    }

    #[inline]
    #[must_use]
    pub fn target(&self) -> Option<ResourceHandle> {
        self.target
    }

    #[inline]
    #[must_use]
    pub fn dependencies(&self) -> &[ResourceHandle] {
        &self.dependencies
    }

    #[inline]
    #[must_use]
    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    /// First handle among the target and dependencies that is not resident.
    pub(crate) fn first_missing(&self, caches: &Caches<D>) -> Option<ResourceHandle> {
        if let Some(target) = self.target
            && !caches.render_targets.is_valid(target)
        {
            return Some(target);
        }
        self.dependencies
            .iter()
            .copied()
            .find(|&handle| !caches.is_resident(handle))
    }

    /// Records the pass. Residency has already been checked.
    pub(crate) fn run(self, device: &mut D, caches: &Caches<D>) {
        let Self {
            kind,
            target,
            closure,
            debug_name,
            ..
        } = self;

        match kind {
            PassKind::Clear { color, flags } => {
                {
                    let resolved = target.map(|h| caches.render_targets.resolve(h));
                    device.clear(resolved.as_deref(), color, flags);
                }
                if let Some(closure) = closure {
                    closure(&mut PassContext {
                        device,
                        caches,
                        program: None,
                        target,
                    });
                }
            }
            PassKind::Render {
                viewport,
                state,
                program,
                defines,
            } => {
                let program = program
                    .is_valid()
                    .then(|| caches.shaders.resolve_defines(device, program, &defines));
                {
                    let resolved = target.map(|h| caches.render_targets.resolve(h));
                    device.begin_render_pass(resolved.as_deref(), &viewport, &state, &debug_name);
                }
                if let Some(program) = &program {
                    device.bind_program(program);
                }
                if let Some(closure) = closure {
                    closure(&mut PassContext {
                        device: &mut *device,
                        caches,
                        program,
                        target,
                    });
                }
                device.end_render_pass();
            }
            PassKind::Compute => {
                device.begin_compute_pass(&debug_name);
                if let Some(closure) = closure {
                    closure(&mut PassContext {
                        device: &mut *device,
                        caches,
                        program: None,
                        target,
                    });
                }
                device.end_compute_pass();
            }
        }
    }
}
