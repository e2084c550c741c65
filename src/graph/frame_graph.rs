//! Frame Graph
//!
//! Passes are declared in any order and scheduled by their declared handle
//! dependencies:
//!
//! ```text
//!  declare                 compile()                    execute()
//!  ───────                 ─────────                    ─────────
//!  pass / clear / compute   writer → reader edges        per node:
//!  .depends_on(handles)     same-target writers chained    resident? ── no ──► skip
//!                           Kahn, ties by declaration       │ yes
//!                                                           ▼
//!                                                         clear / begin pass
//!                                                         bind program, closure
//! ```
//!
//! A node depends on every other node whose target is one of its declared
//! dependencies. Cyclic declarations fall back to declaration order.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use glam::Vec4;
use rustc_hash::{FxHashMap, FxHashSet};

use super::node::{PassContext, PassKind, PassNode};
use super::render_state::{ClearFlags, RenderState, Viewport};
use crate::context::Caches;
use crate::device::RenderDevice;
use crate::handle::ResourceHandle;
use crate::shader::ShaderDefines;

/// Outcome of one [`FrameGraph::execute`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub executed: usize,
    pub skipped: usize,
    /// Debug names of skipped passes, in execution order.
    pub skipped_passes: Vec<String>,
}

/// One frame's worth of declared passes.
pub struct FrameGraph<D: RenderDevice> {
    nodes: Vec<PassNode<D>>,
}

impl<D: RenderDevice> Default for FrameGraph<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: RenderDevice> FrameGraph<D> {
    #[must_use]
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn nodes(&self) -> &[PassNode<D>] {
        &self.nodes
    }

    fn push(&mut self, node: PassNode<D>) -> &mut PassNode<D> {
        self.nodes.push(node);
        let last = self.nodes.len() - 1;
        &mut self.nodes[last]
    }

    // ========================================================================
    // Declaration
    // ========================================================================

    /// Declares a raster pass into `target` (`None` for the device output).
    pub fn pass(
        &mut self,
        target: Option<ResourceHandle>,
        viewport: Viewport,
        state: RenderState,
        program: ResourceHandle,
    ) -> &mut PassNode<D> {
        self.push(PassNode::new(
            PassKind::Render {
                viewport,
                state,
                program,
                defines: ShaderDefines::new(),
            },
            target,
        ))
    }

    pub fn clear(
        &mut self,
        target: Option<ResourceHandle>,
        color: Vec4,
        flags: ClearFlags,
    ) -> &mut PassNode<D> {
        self.push(PassNode::new(PassKind::Clear { color, flags }, target))
    }

    pub fn compute_pass(
        &mut self,
        closure: impl for<'a> FnOnce(&mut PassContext<'a, D>) + Send + 'static,
        debug_name: impl Into<String>,
    ) -> &mut PassNode<D> {
        let node = self.push(PassNode::new(PassKind::Compute, None));
        node.with(closure).set_debug_name(debug_name)
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// Execution order as indices into the declared nodes.
    #[must_use]
    pub fn compile(&self) -> Vec<usize> {
        let count = self.nodes.len();

        let mut writers: FxHashMap<ResourceHandle, Vec<usize>> = FxHashMap::default();
        for (index, node) in self.nodes.iter().enumerate() {
            if let Some(target) = node.target {
                writers.entry(target).or_default().push(index);
            }
        }

        let mut edges: FxHashSet<(usize, usize)> = FxHashSet::default();
        for chain in writers.values() {
            for pair in chain.windows(2) {
                edges.insert((pair[0], pair[1]));
            }
        }
        for (reader, node) in self.nodes.iter().enumerate() {
            for handle in &node.dependencies {
                let Some(chain) = writers.get(handle) else {
                    continue;
                };
                let writes_same = node.target == Some(*handle);
                for &writer in chain {
                    // Earlier writers of a shared target already precede us.
                    if writer == reader || (writes_same && writer > reader) {
                        continue;
                    }
                    edges.insert((writer, reader));
                }
            }
        }

        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); count];
        let mut in_degree = vec![0usize; count];
        for &(from, to) in &edges {
            successors[from].push(to);
            in_degree[to] += 1;
        }

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(index, _)| Reverse(index))
            .collect();

        let mut order = Vec::with_capacity(count);
        while let Some(Reverse(index)) = ready.pop() {
            order.push(index);
            for &next in &successors[index] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() < count {
            log::warn!(
                "Frame graph has a dependency cycle; running {} passes in declaration order",
                count
            );
            return (0..count).collect();
        }
        order
    }

    /// Runs every pass in dependency order. Call on the render thread.
    ///
    /// Passes whose target or declared dependencies are not resident are
    /// skipped with a warning.
    pub fn execute(self, device: &mut D, caches: &Caches<D>) -> FrameStats {
        let order = self.compile();
        let mut pending: Vec<Option<PassNode<D>>> = self.nodes.into_iter().map(Some).collect();
        let mut stats = FrameStats::default();

        device.begin_frame();
        for index in order {
            let Some(node) = pending[index].take() else {
                continue;
            };
            if let Some(missing) = node.first_missing(caches) {
                log::warn!(
                    "Skipping pass '{}': {missing} is not resident",
                    node.debug_name
                );
                stats.skipped += 1;
                stats.skipped_passes.push(node.debug_name);
                continue;
            }
            node.run(device, caches);
            stats.executed += 1;
        }
        device.end_frame();

        stats
    }
}
