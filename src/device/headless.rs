//! Headless Device
//!
//! A [`RenderDevice`] that allocates no GPU memory. Every operation is
//! counted in [`DeviceStats`] and frame-recording calls are appended to a
//! command log, so tests and tools can observe exactly what the render thread
//! did. A [`DeviceProbe`] obtained before the device is moved onto the render
//! thread keeps read access to both.
//!
//! Compilation fails for any stage whose synthesized code contains an
//! `#error` line, which mirrors a real compiler rejecting a permutation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use glam::Vec4;
use parking_lot::Mutex;
use smallvec::SmallVec;
use xxhash_rust::xxh3::xxh3_64;

use super::{ImageUpload, RenderDevice, StageCode};
use crate::errors::{Error, Result};
use crate::graph::{ClearFlags, RenderState, Viewport};
use crate::managers::geometry::GeometryDescriptor;

static NEXT_HEADLESS_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_HEADLESS_ID.fetch_add(1, Ordering::Relaxed)
}

// ─── Resources ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HeadlessImage {
    pub id: u64,
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
    pub format: wgpu::TextureFormat,
    /// Bumped by callers through `transact`; the device never touches it.
    pub revision: u32,
}

#[derive(Debug, Clone)]
pub struct HeadlessGeometry {
    pub id: u64,
    pub label: String,
    pub vertex_count: u32,
    pub index_count: u32,
}

#[derive(Debug, Clone)]
pub struct HeadlessProgram {
    pub id: u64,
    pub label: String,
    /// xxh3 of all stage code, handy for asserting on permutations.
    pub code_hash: u64,
    /// The synthesized code of every stage, in declaration order.
    pub code: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct HeadlessRenderTarget {
    pub id: u64,
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub attachments: SmallVec<[u64; 4]>,
}

// ─── Observation ──────────────────────────────────────────────────────────────

/// Frame-recording calls, in the order the render thread issued them.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    BeginFrame,
    Clear {
        target: Option<u64>,
        color: [f32; 4],
        flags: ClearFlags,
    },
    BeginRenderPass {
        target: Option<u64>,
        viewport: Viewport,
        label: String,
    },
    BindProgram(u64),
    EndRenderPass,
    BeginComputePass(String),
    EndComputePass,
    EndFrame,
    /// Free-form marker pushed by pass closures via [`HeadlessDevice::mark`].
    Marker(String),
}

/// Operation counters shared between the device and its probes.
#[derive(Debug, Default)]
pub struct DeviceStats {
    images_created: AtomicU32,
    images_destroyed: AtomicU32,
    geometries_created: AtomicU32,
    geometries_destroyed: AtomicU32,
    programs_compiled: AtomicU32,
    programs_failed: AtomicU32,
    programs_destroyed: AtomicU32,
    targets_created: AtomicU32,
    targets_destroyed: AtomicU32,
    /// Name of the thread that last constructed a device object.
    last_thread: Mutex<Option<String>>,
}

macro_rules! counter_getters {
    ($($name:ident),* $(,)?) => {
        $(
            #[inline]
            #[must_use]
            pub fn $name(&self) -> u32 {
                self.$name.load(Ordering::Acquire)
            }
        )*
    };
}

impl DeviceStats {
    counter_getters!(
        images_created,
        images_destroyed,
        geometries_created,
        geometries_destroyed,
        programs_compiled,
        programs_failed,
        programs_destroyed,
        targets_created,
        targets_destroyed,
    );

    #[must_use]
    pub fn last_thread(&self) -> Option<String> {
        self.last_thread.lock().clone()
    }

    fn bump(counter: &AtomicU32) {
        counter.fetch_add(1, Ordering::AcqRel);
    }

    fn record_thread(&self) {
        *self.last_thread.lock() = std::thread::current().name().map(str::to_owned);
    }
}

/// Read access to a [`HeadlessDevice`] after it moved to the render thread.
#[derive(Clone)]
pub struct DeviceProbe {
    stats: Arc<DeviceStats>,
    commands: Arc<Mutex<Vec<DeviceCommand>>>,
}

impl DeviceProbe {
    #[inline]
    #[must_use]
    pub fn stats(&self) -> &DeviceStats {
        &self.stats
    }

    /// Snapshot of the command log.
    #[must_use]
    pub fn commands(&self) -> Vec<DeviceCommand> {
        self.commands.lock().clone()
    }

    /// Takes and clears the command log.
    pub fn drain_commands(&self) -> Vec<DeviceCommand> {
        std::mem::take(&mut *self.commands.lock())
    }
}

// ─── Device ───────────────────────────────────────────────────────────────────

/// Recording device with no GPU behind it.
pub struct HeadlessDevice {
    stats: Arc<DeviceStats>,
    commands: Arc<Mutex<Vec<DeviceCommand>>>,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    #[must_use]
    pub fn new() -> Self {
        Self {
            stats: Arc::new(DeviceStats::default()),
            commands: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Returns a probe sharing this device's counters and command log.
    #[must_use]
    pub fn probe(&self) -> DeviceProbe {
        DeviceProbe {
            stats: Arc::clone(&self.stats),
            commands: Arc::clone(&self.commands),
        }
    }

    /// Appends a marker to the command log (called from pass closures).
    pub fn mark(&mut self, marker: impl Into<String>) {
        self.push(DeviceCommand::Marker(marker.into()));
    }

    fn push(&self, command: DeviceCommand) {
        self.commands.lock().push(command);
    }
}

impl RenderDevice for HeadlessDevice {
    type Image = HeadlessImage;
    type Geometry = HeadlessGeometry;
    type Program = HeadlessProgram;
    type RenderTarget = HeadlessRenderTarget;

    fn create_image(&mut self, upload: &ImageUpload<'_>, label: &str) -> Result<HeadlessImage> {
        if let Some(pixels) = upload.pixels {
            let texel = upload.format.block_copy_size(None).ok_or_else(|| {
                Error::Construction {
                    kind: "image",
                    label: label.to_owned(),
                    reason: format!("{:?} cannot be uploaded from memory", upload.format),
                }
            })?;
            let expected = u64::from(upload.width)
                * u64::from(upload.height)
                * u64::from(upload.layers)
                * u64::from(texel);
            if pixels.len() as u64 != expected {
                return Err(Error::Construction {
                    kind: "image",
                    label: label.to_owned(),
                    reason: format!("expected {expected} bytes, got {}", pixels.len()),
                });
            }
        }

        DeviceStats::bump(&self.stats.images_created);
        self.stats.record_thread();
        Ok(HeadlessImage {
            id: next_id(),
            label: label.to_owned(),
            width: upload.width,
            height: upload.height,
            layers: upload.layers,
            format: upload.format,
            revision: 0,
        })
    }

    fn destroy_image(&mut self, _image: HeadlessImage) {
        DeviceStats::bump(&self.stats.images_destroyed);
    }

    fn create_geometry(
        &mut self,
        descriptor: &GeometryDescriptor,
        label: &str,
    ) -> Result<HeadlessGeometry> {
        DeviceStats::bump(&self.stats.geometries_created);
        self.stats.record_thread();
        Ok(HeadlessGeometry {
            id: next_id(),
            label: label.to_owned(),
            vertex_count: descriptor.vertex_count(),
            index_count: descriptor.index_count(),
        })
    }

    fn destroy_geometry(&mut self, _geometry: HeadlessGeometry) {
        DeviceStats::bump(&self.stats.geometries_destroyed);
    }

    fn compile_program(&mut self, stages: &[StageCode<'_>], label: &str) -> Result<HeadlessProgram> {
        self.stats.record_thread();
        if let Some(bad) = stages
            .iter()
            .find(|s| s.code.lines().any(|l| l.trim_start().starts_with("#error")))
        {
            DeviceStats::bump(&self.stats.programs_failed);
            return Err(Error::ShaderCompile {
                label: label.to_owned(),
                reason: format!("{:?} stage contains an #error directive", bad.stage),
            });
        }

        DeviceStats::bump(&self.stats.programs_compiled);
        let code: Vec<String> = stages.iter().map(|s| s.code.to_owned()).collect();
        Ok(HeadlessProgram {
            id: next_id(),
            label: label.to_owned(),
            code_hash: xxh3_64(code.concat().as_bytes()),
            code,
        })
    }

    fn create_dummy_program(&mut self) -> Result<HeadlessProgram> {
        Ok(HeadlessProgram {
            id: next_id(),
            label: "Dummy Program".to_owned(),
            code_hash: 0,
            code: Vec::new(),
        })
    }

    fn destroy_program(&mut self, _program: HeadlessProgram) {
        DeviceStats::bump(&self.stats.programs_destroyed);
    }

    fn create_render_target(
        &mut self,
        width: u32,
        height: u32,
        attachments: &[&HeadlessImage],
        label: &str,
    ) -> Result<HeadlessRenderTarget> {
        DeviceStats::bump(&self.stats.targets_created);
        self.stats.record_thread();
        Ok(HeadlessRenderTarget {
            id: next_id(),
            label: label.to_owned(),
            width,
            height,
            attachments: attachments.iter().map(|a| a.id).collect(),
        })
    }

    fn destroy_render_target(&mut self, _target: HeadlessRenderTarget) {
        DeviceStats::bump(&self.stats.targets_destroyed);
    }

    fn begin_frame(&mut self) {
        self.push(DeviceCommand::BeginFrame);
    }

    fn clear(&mut self, target: Option<&HeadlessRenderTarget>, color: Vec4, flags: ClearFlags) {
        self.push(DeviceCommand::Clear {
            target: target.map(|t| t.id),
            color: color.to_array(),
            flags,
        });
    }

    fn begin_render_pass(
        &mut self,
        target: Option<&HeadlessRenderTarget>,
        viewport: &Viewport,
        _state: &RenderState,
        label: &str,
    ) {
        self.push(DeviceCommand::BeginRenderPass {
            target: target.map(|t| t.id),
            viewport: *viewport,
            label: label.to_owned(),
        });
    }

    fn bind_program(&mut self, program: &HeadlessProgram) {
        self.push(DeviceCommand::BindProgram(program.id));
    }

    fn end_render_pass(&mut self) {
        self.push(DeviceCommand::EndRenderPass);
    }

    fn begin_compute_pass(&mut self, label: &str) {
        self.push(DeviceCommand::BeginComputePass(label.to_owned()));
    }

    fn end_compute_pass(&mut self) {
        self.push(DeviceCommand::EndComputePass);
    }

    fn end_frame(&mut self) {
        self.push(DeviceCommand::EndFrame);
    }
}
