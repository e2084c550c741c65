//! Program descriptors and the resident program resource.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use rustc_hash::FxHashMap;

use crate::cache::ResourceKind;
use crate::device::RenderDevice;
use crate::errors::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    Inline(String),
    /// Read on the render thread and watched for hot reload.
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSource {
    pub stage: ShaderStage,
    pub source: SourceKind,
}

/// The stages of one program. Each stage is a template; defines pick the
/// permutation at bind time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramDescriptor {
    pub stages: Vec<StageSource>,
}

impl ProgramDescriptor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn inline(mut self, stage: ShaderStage, code: impl Into<String>) -> Self {
        self.stages.push(StageSource {
            stage,
            source: SourceKind::Inline(code.into()),
        });
        self
    }

    #[must_use]
    pub fn file(mut self, stage: ShaderStage, path: impl Into<PathBuf>) -> Self {
        self.stages.push(StageSource {
            stage,
            source: SourceKind::File(path.into()),
        });
        self
    }
}

/// A stage with its source text loaded.
#[derive(Debug, Clone)]
pub struct LoadedStage {
    pub stage: ShaderStage,
    pub source: String,
    pub path: Option<PathBuf>,
    /// Modification time of `path` when it was read.
    pub modified: Option<SystemTime>,
}

impl LoadedStage {
    /// `true` when the backing file changed since it was read.
    fn is_stale(&self) -> bool {
        let Some(path) = &self.path else {
            return false;
        };
        match modified_time(path) {
            Some(now) => self.modified.is_none_or(|then| now > then),
            None => {
                log::debug!("Cannot stat {}; skipping reload check", path.display());
                false
            }
        }
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Compiled permutation, or the cached reason it failed.
pub enum Variant<P> {
    Ready(Arc<P>),
    Failed(String),
}

/// Resident program: loaded stage sources plus the lazily grown variant
/// table. Discarding the program drops every variant with it.
///
/// A variant still shared by a caller (a held `resolve_defines` result, a
/// pass context) is not handed to `destroy_program`; its device object is
/// released when the last `Arc` drops.
pub struct ShaderProgram<P> {
    pub(crate) label: String,
    pub(crate) descriptor: ProgramDescriptor,
    pub(crate) stages: Vec<LoadedStage>,
    pub(crate) variants: FxHashMap<u64, Variant<P>>,
}

impl<P> ShaderProgram<P> {
    pub(crate) fn empty() -> Self {
        Self {
            label: "Fallback Program".to_owned(),
            descriptor: ProgramDescriptor::default(),
            stages: Vec::new(),
            variants: FxHashMap::default(),
        }
    }

    #[must_use]
    pub fn stages(&self) -> &[LoadedStage] {
        &self.stages
    }

    #[must_use]
    pub fn variant_count(&self) -> usize {
        self.variants.len()
    }

    pub(crate) fn is_stale(&self) -> bool {
        self.stages.iter().any(LoadedStage::is_stale)
    }
}

/// Marker for the inner program cache.
pub struct Programs;

impl<D: RenderDevice> ResourceKind<D> for Programs {
    const KIND: &'static str = "program";
    type Descriptor = ProgramDescriptor;
    type Resource = ShaderProgram<D::Program>;
    type Env = ();

    fn validate(descriptor: &ProgramDescriptor) -> Result<()> {
        let kind = <Self as ResourceKind<D>>::KIND;
        if descriptor.stages.is_empty() {
            return Err(Error::invalid(kind, "program has no stages"));
        }
        for (i, stage) in descriptor.stages.iter().enumerate() {
            if descriptor.stages[..i].iter().any(|s| s.stage == stage.stage) {
                return Err(Error::invalid(
                    kind,
                    format!("{:?} stage declared twice", stage.stage),
                ));
            }
            if matches!(&stage.source, SourceKind::File(p) if p.as_os_str().is_empty()) {
                return Err(Error::invalid(kind, "empty stage path"));
            }
        }
        Ok(())
    }

    fn create(
        _: &mut D,
        descriptor: &ProgramDescriptor,
        _: &(),
        label: &str,
    ) -> Result<ShaderProgram<D::Program>> {
        let mut stages = Vec::with_capacity(descriptor.stages.len());
        for stage in &descriptor.stages {
            let loaded = match &stage.source {
                SourceKind::Inline(code) => LoadedStage {
                    stage: stage.stage,
                    source: code.clone(),
                    path: None,
                    modified: None,
                },
                SourceKind::File(path) => {
                    let modified = modified_time(path);
                    let source = std::fs::read_to_string(path).map_err(|e| {
                        Error::Construction {
                            kind: "program",
                            label: label.to_owned(),
                            reason: format!("{}: {e}", path.display()),
                        }
                    })?;
                    LoadedStage {
                        stage: stage.stage,
                        source,
                        path: Some(path.clone()),
                        modified,
                    }
                }
            };
            stages.push(loaded);
        }

        Ok(ShaderProgram {
            label: label.to_owned(),
            descriptor: descriptor.clone(),
            stages,
            variants: FxHashMap::default(),
        })
    }

    fn destroy(device: &mut D, program: ShaderProgram<D::Program>) {
        let mut shared = 0usize;
        for (_, variant) in program.variants {
            if let Variant::Ready(compiled) = variant {
                match Arc::try_unwrap(compiled) {
                    Ok(compiled) => device.destroy_program(compiled),
                    Err(_) => shared += 1,
                }
            }
        }
        if shared > 0 {
            log::debug!(
                "Program '{}': {shared} variant(s) still in use, left to their owners",
                program.label
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HeadlessDevice;

    fn validate(descriptor: &ProgramDescriptor) -> Result<()> {
        <Programs as ResourceKind<HeadlessDevice>>::validate(descriptor)
    }

    #[test]
    fn test_validation() {
        assert!(validate(&ProgramDescriptor::new()).is_err());
        assert!(
            validate(
                &ProgramDescriptor::new()
                    .inline(ShaderStage::Vertex, "a")
                    .inline(ShaderStage::Vertex, "b")
            )
            .is_err()
        );
        assert!(validate(&ProgramDescriptor::new().file(ShaderStage::Compute, "")).is_err());
        assert!(
            validate(
                &ProgramDescriptor::new()
                    .inline(ShaderStage::Vertex, "a")
                    .file(ShaderStage::Fragment, "shaders/lit.wgsl")
            )
            .is_ok()
        );
    }

    #[test]
    fn test_missing_file_fails_creation() {
        let mut device = HeadlessDevice::new();
        let descriptor =
            ProgramDescriptor::new().file(ShaderStage::Fragment, "/nonexistent/shader.wgsl");
        let result = <Programs as ResourceKind<HeadlessDevice>>::create(
            &mut device,
            &descriptor,
            &(),
            "missing",
        );
        assert!(matches!(result, Err(Error::Construction { .. })));
    }
}
