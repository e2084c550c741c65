//! Shader Cache
//!
//! Programs are loaded like any other resource; permutations are compiled
//! lazily. [`ShaderCache::resolve_defines`] looks up the variant for a
//! define set and, on a miss, synthesizes and compiles it on the calling
//! (render) thread. Successes and failures are both cached, so a broken
//! permutation is compiled once and then resolves to the dummy program.
//!
//! # Hot reload
//!
//! Every `interval_ticks` ticks the stage files of resident programs are
//! stat'ed. A program with a newer file is discarded and re-requested with the
//! same descriptor in the same tick; discard-before-create then produces a
//! fresh program with an empty variant table.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard};

use super::defines::ShaderDefines;
use super::program::{ProgramDescriptor, Programs, ShaderProgram, Variant};
use super::template::ShaderTemplates;
use crate::cache::ResourceCache;
use crate::device::{RenderDevice, StageCode};
use crate::errors::Result;
use crate::handle::ResourceHandle;
use crate::marshal::RenderThread;
use crate::settings::HotReloadSettings;

/// Program cache with lazy permutation compilation and hot reload.
pub struct ShaderCache<D: RenderDevice> {
    programs: ResourceCache<D, Programs>,
    dummy: Arc<D::Program>,
    templates: Arc<ShaderTemplates>,
    hot_reload: HotReloadSettings,
    ticks: Arc<AtomicU32>,
}

impl<D: RenderDevice> Clone for ShaderCache<D> {
    fn clone(&self) -> Self {
        Self {
            programs: self.programs.clone(),
            dummy: Arc::clone(&self.dummy),
            templates: Arc::clone(&self.templates),
            hot_reload: self.hot_reload.clone(),
            ticks: Arc::clone(&self.ticks),
        }
    }
}

impl<D: RenderDevice> ShaderCache<D> {
    /// `dummy` is bound wherever a program or permutation is unavailable.
    pub fn new(
        thread: RenderThread<D>,
        dummy: D::Program,
        hot_reload: HotReloadSettings,
    ) -> Result<Self> {
        Ok(Self {
            programs: ResourceCache::new(thread, (), ShaderProgram::empty()),
            dummy: Arc::new(dummy),
            templates: Arc::new(ShaderTemplates::new()?),
            hot_reload,
            ticks: Arc::new(AtomicU32::new(0)),
        })
    }

    /// The underlying handle-indexed cache.
    #[inline]
    #[must_use]
    pub fn programs(&self) -> &ResourceCache<D, Programs> {
        &self.programs
    }

    #[inline]
    #[must_use]
    pub fn dummy(&self) -> Arc<D::Program> {
        Arc::clone(&self.dummy)
    }

    // ========================================================================
    // Requests
    // ========================================================================

    pub fn async_load(
        &self,
        name: impl Into<String>,
        descriptor: ProgramDescriptor,
    ) -> Result<ResourceHandle> {
        self.programs.async_load(name, descriptor)
    }

    pub fn discard(&self, handle: ResourceHandle) {
        self.programs.discard(handle);
    }

    pub fn discard_all(&self) {
        self.programs.discard_all();
    }

    /// Queues an in-place mutation of a resident program.
    pub fn transact(
        &self,
        handle: ResourceHandle,
        mutator: impl FnOnce(&mut D, &mut ShaderProgram<D::Program>) + Send + 'static,
    ) {
        self.programs.transact(handle, mutator);
    }

    /// Runs the periodic hot-reload check, then hands queued work to the
    /// render thread.
    pub fn tick(&self) -> usize {
        if self.hot_reload.enabled {
            let tick = self.ticks.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
            if tick % self.hot_reload.interval_ticks.max(1) == 0 {
                self.reload_changed();
            }
        }
        self.programs.tick()
    }

    /// Re-requests every resident program whose stage files changed.
    ///
    /// Returns the number of programs queued for reload.
    pub fn reload_changed(&self) -> usize {
        let stale = self.programs.collect_resident(|handle, name, program| {
            program
                .is_stale()
                .then(|| (handle, name.map(str::to_owned), program.descriptor.clone()))
        });

        for (handle, name, descriptor) in &stale {
            log::info!(
                "Reloading program '{}'",
                name.as_deref().unwrap_or("<unnamed>")
            );
            self.programs.discard(*handle);
            if let Err(err) = self
                .programs
                .load_with_handle(*handle, name.clone(), descriptor.clone())
            {
                log::error!("Failed to re-queue program {handle}: {err}");
            }
        }
        stale.len()
    }

    // ========================================================================
    // Variants
    // ========================================================================

    /// Returns the compiled permutation of `handle` for `defines`.
    ///
    /// Compiles on a miss. Missing programs and failed permutations resolve
    /// to the dummy program. Must run on the render thread.
    pub fn resolve_defines(
        &self,
        device: &mut D,
        handle: ResourceHandle,
        defines: &ShaderDefines,
    ) -> Arc<D::Program> {
        let mut program = self.programs.resolve_mut(handle);
        if program.stages.is_empty() {
            return self.dummy();
        }

        let key = defines.variant_hash();
        if let Some(variant) = program.variants.get(&key) {
            return match variant {
                Variant::Ready(compiled) => Arc::clone(compiled),
                Variant::Failed(_) => self.dummy(),
            };
        }

        let label = format!("{} [{key:016x}]", program.label);
        let variant = match self.compile(device, &program, defines, &label) {
            Ok(compiled) => {
                log::debug!("Compiled variant {label}");
                Variant::Ready(Arc::new(compiled))
            }
            Err(err) => {
                log::error!("Variant {label} failed: {err}");
                Variant::Failed(err.to_string())
            }
        };
        let resolved = match &variant {
            Variant::Ready(compiled) => Arc::clone(compiled),
            Variant::Failed(_) => self.dummy(),
        };
        program.variants.insert(key, variant);
        resolved
    }

    fn compile(
        &self,
        device: &mut D,
        program: &ShaderProgram<D::Program>,
        defines: &ShaderDefines,
        label: &str,
    ) -> Result<D::Program> {
        let codes = program
            .stages
            .iter()
            .map(|stage| self.templates.synthesize(&stage.source, defines))
            .collect::<Result<Vec<_>>>()?;
        let stages: Vec<StageCode<'_>> = program
            .stages
            .iter()
            .zip(&codes)
            .map(|(stage, code)| StageCode {
                stage: stage.stage,
                code,
            })
            .collect();
        device.compile_program(&stages, label)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    #[must_use]
    pub fn is_valid(&self, handle: ResourceHandle) -> bool {
        self.programs.is_valid(handle)
    }

    #[must_use]
    pub fn is_queued(&self, handle: ResourceHandle) -> bool {
        self.programs.is_queued(handle)
    }

    #[must_use]
    pub fn is_discard_queued(&self, handle: ResourceHandle) -> bool {
        self.programs.is_discard_queued(handle)
    }

    #[must_use]
    pub fn is_failed(&self, handle: ResourceHandle) -> bool {
        self.programs.is_failed(handle)
    }

    pub fn resolve(
        &self,
        handle: ResourceHandle,
    ) -> MappedRwLockReadGuard<'_, ShaderProgram<D::Program>> {
        self.programs.resolve(handle)
    }

    pub fn resolve_mut(
        &self,
        handle: ResourceHandle,
    ) -> MappedRwLockWriteGuard<'_, ShaderProgram<D::Program>> {
        self.programs.resolve_mut(handle)
    }

    /// Number of cached permutations (compiled or failed) of a resident
    /// program.
    #[must_use]
    pub fn variant_count(&self, handle: ResourceHandle) -> usize {
        if !self.programs.is_valid(handle) {
            return 0;
        }
        self.programs.resolve(handle).variant_count()
    }
}
