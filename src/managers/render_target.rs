//! Render-Target Cache
//!
//! Render targets are keyed by their **structure**: the handle of an acquired
//! target is a rolling hash of its size and, for every attachment, format,
//! filter, wrap mode and mip count. Two passes that describe the same target
//! get the same handle and share one device object.
//!
//! # Pooling
//!
//! Acquired targets are pooled. Each pooled entry carries a frame budget:
//!
//! ```text
//!  acquire()  ──► used = true
//!  update_pool(), once per tick:
//!      used    ──► used = false, frames_left = frame_budget
//!      unused  ──► frames_left -= 1
//!                  frames_left == 0 ──► discard target
//!                                       + discard owned attachments
//! ```
//!
//! A target used every frame never expires; one that stops being acquired is
//! released on the `frame_budget`-th consecutive tick without an acquire.
//! Attachments supplied as external image handles are never discarded by
//! the pool.

use std::sync::Arc;

use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, Mutex};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::image::{ImageCache, ImageDescriptor};
use crate::cache::{ResourceCache, ResourceKind};
use crate::device::RenderDevice;
use crate::errors::{Error, Result};
use crate::handle::{HandleHasher, ResourceHandle};

const STRUCTURE_SEED: u64 = 0x5EED_0F7A_26E7;

/// One attachment the cache creates on behalf of the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachmentDesc {
    pub format: wgpu::TextureFormat,
    pub filter: wgpu::FilterMode,
    pub wrap: wgpu::AddressMode,
    pub mip_levels: u32,
}

impl AttachmentDesc {
    #[must_use]
    pub fn new(format: wgpu::TextureFormat) -> Self {
        Self {
            format,
            filter: wgpu::FilterMode::Linear,
            wrap: wgpu::AddressMode::ClampToEdge,
            mip_levels: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AttachmentSource {
    /// Attachments created (and released) by the cache.
    Formats(SmallVec<[AttachmentDesc; 4]>),
    /// Existing image handles owned by someone else.
    External(SmallVec<[ResourceHandle; 4]>),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderTargetDescriptor {
    pub width: u32,
    pub height: u32,
    pub attachments: AttachmentSource,
}

impl RenderTargetDescriptor {
    #[must_use]
    pub fn new(width: u32, height: u32, formats: &[wgpu::TextureFormat]) -> Self {
        Self {
            width,
            height,
            attachments: AttachmentSource::Formats(
                formats.iter().copied().map(AttachmentDesc::new).collect(),
            ),
        }
    }

    #[must_use]
    pub fn external(width: u32, height: u32, images: &[ResourceHandle]) -> Self {
        Self {
            width,
            height,
            attachments: AttachmentSource::External(images.iter().copied().collect()),
        }
    }

    /// Content hash of the target's structure.
    #[must_use]
    pub fn structural_handle(&self) -> ResourceHandle {
        let mut hasher = HandleHasher::with_seed(STRUCTURE_SEED);
        hasher.fold(&self.width).fold(&self.height);
        match &self.attachments {
            AttachmentSource::Formats(attachments) => {
                for (seed, attachment) in attachments.iter().enumerate() {
                    hasher
                        .fold(&seed)
                        .fold(&attachment.format)
                        .fold(&attachment.filter)
                        .fold(&attachment.wrap)
                        .fold(&attachment.mip_levels);
                }
            }
            AttachmentSource::External(images) => {
                hasher.fold(&u8::MAX);
                for image in images {
                    hasher.fold(image);
                }
            }
        }
        hasher.finish()
    }

    fn validate(&self) -> Result<()> {
        let kind = "render target";
        if self.width == 0 || self.height == 0 {
            return Err(Error::invalid(kind, "target has a zero dimension"));
        }
        match &self.attachments {
            AttachmentSource::Formats(list) if list.is_empty() => {
                Err(Error::invalid(kind, "target has no attachments"))
            }
            AttachmentSource::Formats(list) if list.iter().any(|a| a.mip_levels == 0) => {
                Err(Error::invalid(kind, "attachment mip_levels must be at least 1"))
            }
            AttachmentSource::External(list) if list.is_empty() => {
                Err(Error::invalid(kind, "target has no attachments"))
            }
            AttachmentSource::External(list) if list.iter().any(|h| !h.is_valid()) => {
                Err(Error::invalid(kind, "external attachment handle is invalid"))
            }
            _ => Ok(()),
        }
    }
}

/// Creation request queued in the target cache, once attachment images
/// have their own handles.
pub struct RenderTargetRequest {
    pub width: u32,
    pub height: u32,
    pub attachments: SmallVec<[ResourceHandle; 4]>,
}

/// Marker for the inner target cache.
pub struct RenderTargets;

impl<D: RenderDevice> ResourceKind<D> for RenderTargets {
    const KIND: &'static str = "render target";
    type Descriptor = RenderTargetRequest;
    type Resource = D::RenderTarget;
    type Env = ImageCache<D>;

    fn create(
        device: &mut D,
        request: &RenderTargetRequest,
        images: &ImageCache<D>,
        label: &str,
    ) -> Result<D::RenderTarget> {
        if let Some(&failed) = request.attachments.iter().find(|&&h| images.is_failed(h)) {
            return Err(Error::Construction {
                kind: <Self as ResourceKind<D>>::KIND,
                label: label.to_owned(),
                reason: format!("attachment {failed} failed to build"),
            });
        }
        images
            .with_resident(&request.attachments, |attachments| {
                device.create_render_target(request.width, request.height, attachments, label)
            })
            .map_err(Error::DependencyNotReady)?
    }

    fn destroy(device: &mut D, target: D::RenderTarget) {
        device.destroy_render_target(target);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PoolState {
    frames_left: u32,
    used: bool,
}

struct TargetEntry {
    attachments: SmallVec<[ResourceHandle; 4]>,
    externally_owned: bool,
    /// `None` for named targets, which live until discarded.
    pool: Option<PoolState>,
}

/// Render-target cache with structural deduplication and frame-budget
/// pooling.
pub struct RenderTargetCache<D: RenderDevice> {
    targets: ResourceCache<D, RenderTargets>,
    entries: Arc<Mutex<FxHashMap<ResourceHandle, TargetEntry>>>,
    frame_budget: u32,
}

impl<D: RenderDevice> Clone for RenderTargetCache<D> {
    fn clone(&self) -> Self {
        Self {
            targets: self.targets.clone(),
            entries: Arc::clone(&self.entries),
            frame_budget: self.frame_budget,
        }
    }
}

impl<D: RenderDevice> RenderTargetCache<D> {
    #[must_use]
    pub fn new(targets: ResourceCache<D, RenderTargets>, frame_budget: u32) -> Self {
        Self {
            targets,
            entries: Arc::new(Mutex::new(FxHashMap::default())),
            frame_budget: frame_budget.max(1),
        }
    }

    #[inline]
    fn images(&self) -> &ImageCache<D> {
        self.targets.env()
    }

    /// The underlying handle-indexed cache.
    #[inline]
    #[must_use]
    pub fn targets(&self) -> &ResourceCache<D, RenderTargets> {
        &self.targets
    }

    // ========================================================================
    // Requests
    // ========================================================================

    /// Returns the pooled target matching `descriptor`, creating it on first
    /// use. Marks it used for this tick.
    pub fn acquire(&self, descriptor: &RenderTargetDescriptor) -> Result<ResourceHandle> {
        descriptor.validate()?;
        let handle = descriptor.structural_handle();

        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&handle) {
            if let Some(pool) = &mut entry.pool {
                pool.used = true;
            }
            return Ok(handle);
        }

        let entry = self.request(handle, None, descriptor, true)?;
        log::debug!(
            "Pooled render target {handle} ({}x{})",
            descriptor.width,
            descriptor.height
        );
        entries.insert(handle, entry);
        Ok(handle)
    }

    /// Requests a named, non-pooled target. It lives until [`discard`](Self::discard).
    pub fn async_load(
        &self,
        name: impl Into<String>,
        descriptor: &RenderTargetDescriptor,
    ) -> Result<ResourceHandle> {
        descriptor.validate()?;
        let name = name.into();
        let handle = ResourceHandle::from_name(&name);

        let mut entries = self.entries.lock();
        if entries.contains_key(&handle) {
            return Ok(handle);
        }
        let entry = self.request(handle, Some(name), descriptor, false)?;
        entries.insert(handle, entry);
        Ok(handle)
    }

    fn request(
        &self,
        handle: ResourceHandle,
        name: Option<String>,
        descriptor: &RenderTargetDescriptor,
        pooled: bool,
    ) -> Result<TargetEntry> {
        let (attachments, externally_owned) = match &descriptor.attachments {
            AttachmentSource::Formats(list) => {
                let mut handles = SmallVec::new();
                for (index, attachment) in list.iter().enumerate() {
                    let image = ImageDescriptor::attachment(
                        descriptor.width,
                        descriptor.height,
                        attachment.format,
                    )
                    .with_filter(attachment.filter)
                    .with_wrap(attachment.wrap)
                    .with_mip_levels(attachment.mip_levels);
                    let image_name = name.as_ref().map(|n| format!("{n} [{index}]"));
                    handles.push(self.images().load_with_handle(
                        handle.derive(index as u32),
                        image_name,
                        image,
                    )?);
                }
                (handles, false)
            }
            AttachmentSource::External(list) => (list.clone(), true),
        };

        self.targets.load_with_handle(
            handle,
            name,
            RenderTargetRequest {
                width: descriptor.width,
                height: descriptor.height,
                attachments: attachments.clone(),
            },
        )?;

        Ok(TargetEntry {
            attachments,
            externally_owned,
            pool: pooled.then_some(PoolState {
                frames_left: self.frame_budget,
                used: true,
            }),
        })
    }

    /// Releases a target and every attachment the cache created for it.
    pub fn discard(&self, handle: ResourceHandle) {
        let entry = self.entries.lock().remove(&handle);
        match entry {
            Some(entry) => self.release(handle, &entry),
            None => self.targets.discard(handle),
        }
    }

    fn release(&self, handle: ResourceHandle, entry: &TargetEntry) {
        self.targets.discard(handle);
        if !entry.externally_owned {
            for &attachment in &entry.attachments {
                self.images().discard(attachment);
            }
        }
    }

    /// Discards every target, pooled or named.
    pub fn discard_all(&self) {
        let drained: Vec<_> = self.entries.lock().drain().collect();
        for (handle, entry) in &drained {
            self.release(*handle, entry);
        }
        self.targets.discard_all();
    }

    // ========================================================================
    // Pool
    // ========================================================================

    /// Advances every pooled entry by one tick and releases expired ones.
    ///
    /// Returns the number of targets released.
    pub fn update_pool(&self) -> usize {
        let expired: Vec<(ResourceHandle, TargetEntry)> = {
            let mut entries = self.entries.lock();
            let mut expired_handles = Vec::new();
            for (&handle, entry) in entries.iter_mut() {
                let Some(pool) = &mut entry.pool else {
                    continue;
                };
                if pool.used {
                    pool.used = false;
                    pool.frames_left = self.frame_budget;
                } else {
                    pool.frames_left = pool.frames_left.saturating_sub(1);
                    if pool.frames_left == 0 {
                        expired_handles.push(handle);
                    }
                }
            }
            expired_handles
                .into_iter()
                .filter_map(|h| entries.remove(&h).map(|e| (h, e)))
                .collect()
        };

        for (handle, entry) in &expired {
            log::debug!("Render target {handle} expired from pool");
            self.release(*handle, entry);
        }
        expired.len()
    }

    /// Hands queued target work to the render thread.
    pub fn tick(&self) -> usize {
        self.targets.tick()
    }

    // ========================================================================
    // Queries
    // ========================================================================

    #[must_use]
    pub fn is_valid(&self, handle: ResourceHandle) -> bool {
        self.targets.is_valid(handle)
    }

    #[must_use]
    pub fn is_queued(&self, handle: ResourceHandle) -> bool {
        self.targets.is_queued(handle)
    }

    #[must_use]
    pub fn is_discard_queued(&self, handle: ResourceHandle) -> bool {
        self.targets.is_discard_queued(handle)
    }

    /// Ticks a queued target has spent waiting for an attachment.
    #[must_use]
    pub fn dependency_retries(&self, handle: ResourceHandle) -> Option<u32> {
        self.targets.dependency_retries(handle)
    }

    pub fn resolve(&self, handle: ResourceHandle) -> MappedRwLockReadGuard<'_, D::RenderTarget> {
        self.targets.resolve(handle)
    }

    pub fn resolve_mut(
        &self,
        handle: ResourceHandle,
    ) -> MappedRwLockWriteGuard<'_, D::RenderTarget> {
        self.targets.resolve_mut(handle)
    }

    /// Queues an in-place mutation of a resident target.
    pub fn transact(
        &self,
        handle: ResourceHandle,
        mutator: impl FnOnce(&mut D, &mut D::RenderTarget) + Send + 'static,
    ) {
        self.targets.transact(handle, mutator);
    }

    /// Attachment image handles of a known target.
    #[must_use]
    pub fn attachments(&self, handle: ResourceHandle) -> Option<SmallVec<[ResourceHandle; 4]>> {
        self.entries
            .lock()
            .get(&handle)
            .map(|entry| entry.attachments.clone())
    }

    #[must_use]
    pub fn is_pooled(&self, handle: ResourceHandle) -> bool {
        self.entries
            .lock()
            .get(&handle)
            .is_some_and(|entry| entry.pool.is_some())
    }

    /// Remaining budget of a pooled target.
    #[must_use]
    pub fn frames_left(&self, handle: ResourceHandle) -> Option<u32> {
        self.entries
            .lock()
            .get(&handle)
            .and_then(|entry| entry.pool.map(|pool| pool.frames_left))
    }

    #[must_use]
    pub fn pooled_count(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|entry| entry.pool.is_some())
            .count()
    }
}

/// The attachment-less target every missing target handle resolves to.
pub(crate) fn create_fallback<D: RenderDevice>(device: &mut D) -> Result<D::RenderTarget> {
    device.create_render_target(1, 1, &[], "Fallback Target")
}

#[cfg(test)]
mod tests {
    use super::*;

    const RGBA16F: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
    const DEPTH: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

    #[test]
    fn test_identical_structure_same_handle() {
        let a = RenderTargetDescriptor::new(1920, 1080, &[RGBA16F, DEPTH]);
        let b = RenderTargetDescriptor::new(1920, 1080, &[RGBA16F, DEPTH]);
        assert_eq!(a.structural_handle(), b.structural_handle());
    }

    #[test]
    fn test_structure_differences_change_handle() {
        let base = RenderTargetDescriptor::new(1920, 1080, &[RGBA16F, DEPTH]);
        let resized = RenderTargetDescriptor::new(1280, 720, &[RGBA16F, DEPTH]);
        let reordered = RenderTargetDescriptor::new(1920, 1080, &[DEPTH, RGBA16F]);
        let mut filtered = base.clone();
        if let AttachmentSource::Formats(list) = &mut filtered.attachments {
            list[0].filter = wgpu::FilterMode::Nearest;
        }

        let h = base.structural_handle();
        assert_ne!(h, resized.structural_handle());
        assert_ne!(h, reordered.structural_handle());
        assert_ne!(h, filtered.structural_handle());
    }

    #[test]
    fn test_validation() {
        assert!(RenderTargetDescriptor::new(0, 1, &[RGBA16F]).validate().is_err());
        assert!(RenderTargetDescriptor::new(4, 4, &[]).validate().is_err());
        assert!(
            RenderTargetDescriptor::external(4, 4, &[ResourceHandle::INVALID])
                .validate()
                .is_err()
        );
        assert!(RenderTargetDescriptor::new(4, 4, &[RGBA16F]).validate().is_ok());
    }
}
