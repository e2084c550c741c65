//! Resource Context
//!
//! [`ResourceContext`] is the single owner of the render thread and of every
//! cache. Nothing in the crate is global: producers hold a context (or cheap
//! clones of individual caches) and the render thread holds the device.
//!
//! # Frame loop
//!
//! ```rust,ignore
//! let ctx = ResourceContext::new(HeadlessDevice::new(), CacheSettings::default())?;
//! loop {
//!     let mut graph = FrameGraph::new();
//!     // ... declare passes, acquiring render targets ...
//!     ctx.tick();                 // queued loads/discards → render thread
//!     ctx.execute_graph(graph);   // recorded after this tick's work
//! }
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::cache::ResourceCache;
use crate::device::RenderDevice;
use crate::errors::{Error, Result};
use crate::graph::{FrameGraph, FrameStats};
use crate::handle::ResourceHandle;
use crate::managers::geometry::{self, GeometryCache};
use crate::managers::image::{self, ImageCache};
use crate::managers::render_target::{self, RenderTargetCache};
use crate::marshal::RenderThread;
use crate::settings::CacheSettings;
use crate::shader::ShaderCache;

/// All caches of one context. Cloning is cheap.
pub struct Caches<D: RenderDevice> {
    pub images: ImageCache<D>,
    pub geometry: GeometryCache<D>,
    pub shaders: ShaderCache<D>,
    pub render_targets: RenderTargetCache<D>,
}

impl<D: RenderDevice> Clone for Caches<D> {
    fn clone(&self) -> Self {
        Self {
            images: self.images.clone(),
            geometry: self.geometry.clone(),
            shaders: self.shaders.clone(),
            render_targets: self.render_targets.clone(),
        }
    }
}

impl<D: RenderDevice> Caches<D> {
    /// `true` if any cache holds a resident resource under `handle`.
    #[must_use]
    pub fn is_resident(&self, handle: ResourceHandle) -> bool {
        self.images.is_valid(handle)
            || self.geometry.is_valid(handle)
            || self.shaders.is_valid(handle)
            || self.render_targets.is_valid(handle)
    }
}

/// Owner of the render thread and every resource cache.
pub struct ResourceContext<D: RenderDevice> {
    thread: RenderThread<D>,
    caches: Caches<D>,
    settings: CacheSettings,
    ticks: AtomicU64,
    shut_down: AtomicBool,
}

impl<D: RenderDevice> ResourceContext<D> {
    /// Moves `device` onto a new render thread and creates the fallback
    /// resources there.
    pub fn new(device: D, settings: CacheSettings) -> Result<Self> {
        let thread = RenderThread::spawn(device, &settings.marshal)?;

        let fallbacks = thread.call(|device| -> Result<_> {
            Ok((
                image::create_fallback(device)?,
                geometry::create_fallback(device)?,
                device.create_dummy_program()?,
                render_target::create_fallback(device)?,
            ))
        });
        let (image, geometry, program, target) = match fallbacks {
            Ok(Ok(fallbacks)) => fallbacks,
            Ok(Err(err)) | Err(err) => {
                thread.shutdown();
                return Err(err);
            }
        };

        let images = ResourceCache::new(thread.clone(), (), image);
        let caches = Caches {
            geometry: ResourceCache::new(thread.clone(), (), geometry),
            shaders: ShaderCache::new(thread.clone(), program, settings.hot_reload.clone())?,
            render_targets: RenderTargetCache::new(
                ResourceCache::new(thread.clone(), images.clone(), target),
                settings.pool.frame_budget,
            ),
            images,
        };

        log::info!(
            "Resource context ready on thread '{}'",
            settings.marshal.thread_name
        );
        Ok(Self {
            thread,
            caches,
            settings,
            ticks: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[inline]
    #[must_use]
    pub fn caches(&self) -> &Caches<D> {
        &self.caches
    }

    #[inline]
    #[must_use]
    pub fn images(&self) -> &ImageCache<D> {
        &self.caches.images
    }

    #[inline]
    #[must_use]
    pub fn geometry(&self) -> &GeometryCache<D> {
        &self.caches.geometry
    }

    #[inline]
    #[must_use]
    pub fn shaders(&self) -> &ShaderCache<D> {
        &self.caches.shaders
    }

    #[inline]
    #[must_use]
    pub fn render_targets(&self) -> &RenderTargetCache<D> {
        &self.caches.render_targets
    }

    #[inline]
    #[must_use]
    pub fn render_thread(&self) -> &RenderThread<D> {
        &self.thread
    }

    #[inline]
    #[must_use]
    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Number of completed [`tick`](Self::tick) calls.
    #[must_use]
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    // ========================================================================
    // Frame
    // ========================================================================

    /// Advances the render-target pool and hands every cache's queued work
    /// to the render thread. Never blocks.
    ///
    /// Images are ticked before render targets so attachments requested in
    /// the same frame are created first.
    pub fn tick(&self) -> usize {
        let released = self.caches.render_targets.update_pool();
        if released > 0 {
            log::debug!("Render-target pool released {released} target(s)");
        }
        let submitted = self.caches.images.tick()
            + self.caches.geometry.tick()
            + self.caches.shaders.tick()
            + self.caches.render_targets.tick();
        self.ticks.fetch_add(1, Ordering::AcqRel);
        submitted
    }

    /// Queues `graph` for execution on the render thread after all work
    /// submitted so far.
    pub fn execute_graph(&self, graph: FrameGraph<D>) {
        let caches = self.caches.clone();
        self.thread.submit(move |device| {
            let stats = graph.execute(device, &caches);
            if stats.skipped > 0 {
                log::debug!(
                    "Frame executed {} pass(es), skipped {}",
                    stats.executed,
                    stats.skipped
                );
            }
        });
    }

    /// Like [`execute_graph`](Self::execute_graph), but waits for the frame
    /// and returns its statistics.
    pub fn execute_graph_blocking(&self, graph: FrameGraph<D>) -> Result<FrameStats> {
        let caches = self.caches.clone();
        self.thread
            .call(move |device| graph.execute(device, &caches))
    }

    /// Runs `f` on the render thread and waits for its result.
    pub fn call<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut D) -> R + Send + 'static,
    {
        self.thread.call(f)
    }

    /// Blocks until the render thread has run every submitted job.
    pub fn wait_idle(&self) {
        self.thread.wait_idle();
    }

    /// Ticks and waits, so every queued request has been processed.
    pub fn flush(&self) {
        self.tick();
        self.wait_idle();
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Destroys every resource on the render thread and stops it.
    ///
    /// Later calls (including the one from `Drop`) are no-ops.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        log::info!("Shutting down resource context");

        self.caches.render_targets.discard_all();
        self.caches.shaders.discard_all();
        self.caches.geometry.discard_all();
        self.caches.images.discard_all();

        self.caches.render_targets.tick();
        self.caches.shaders.programs().tick();
        self.caches.geometry.tick();
        self.caches.images.tick();

        self.thread.wait_idle();
        self.thread.shutdown();
    }

    /// Fails with [`Error::RenderThreadGone`] once the context is shut down.
    pub fn ensure_running(&self) -> Result<()> {
        if self.shut_down.load(Ordering::Acquire) || !self.thread.is_running() {
            return Err(Error::RenderThreadGone);
        }
        Ok(())
    }
}

impl<D: RenderDevice> Drop for ResourceContext<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
