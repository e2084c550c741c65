//! Shader Cache Tests
//!
//! Tests for:
//! - Variant memoization per define set
//! - Failed permutations cached and resolved to the dummy program
//! - Hot reload of file-backed stages, explicit and tick-driven
//! - Variants held by callers outliving their program

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::Context;

use resident::device::{DeviceProbe, HeadlessDevice, HeadlessProgram};
use resident::settings::{CacheSettings, HotReloadSettings};
use resident::shader::{ProgramDescriptor, ShaderDefines, ShaderStage};
use resident::{ResourceContext, ResourceHandle};

const MESH_SOURCE: &str = "\
fn vs_main() {}
$$ if USE_FOG
let fog = true;
$$ endif
$$ if BROKEN
#error broken permutation
$$ endif
";

fn context_with(settings: CacheSettings) -> (ResourceContext<HeadlessDevice>, DeviceProbe) {
    let _ = env_logger::builder().is_test(true).try_init();
    let device = HeadlessDevice::new();
    let probe = device.probe();
    let ctx = ResourceContext::new(device, settings).unwrap();
    (ctx, probe)
}

fn context() -> (ResourceContext<HeadlessDevice>, DeviceProbe) {
    context_with(CacheSettings::default())
}

fn resolve(
    ctx: &ResourceContext<HeadlessDevice>,
    handle: ResourceHandle,
    defines: ShaderDefines,
) -> Arc<HeadlessProgram> {
    let shaders = ctx.shaders().clone();
    ctx.call(move |device| shaders.resolve_defines(device, handle, &defines))
        .unwrap()
}

fn scratch_file(test: &str, contents: &str) -> anyhow::Result<PathBuf> {
    let dir = std::env::temp_dir().join(format!("resident-{test}-{}", std::process::id()));
    std::fs::create_dir_all(&dir).context("creating scratch directory")?;
    let path = dir.join("mesh.wgsl");
    std::fs::write(&path, contents).context("writing shader source")?;
    Ok(path)
}

/// Rewrites `path` and pushes its mtime forward so the change is visible
/// even on filesystems with coarse timestamps.
fn touch_with(path: &PathBuf, contents: &str) -> anyhow::Result<()> {
    std::fs::write(path, contents).context("rewriting shader source")?;
    File::options()
        .write(true)
        .open(path)?
        .set_modified(SystemTime::now() + Duration::from_secs(10))
        .context("bumping modification time")?;
    Ok(())
}

// ============================================================================
// Variants
// ============================================================================

#[test]
fn same_defines_reuse_one_compiled_variant() {
    let (ctx, probe) = context();
    let handle = ctx
        .shaders()
        .async_load("mesh", ProgramDescriptor::new().inline(ShaderStage::Vertex, MESH_SOURCE))
        .unwrap();
    ctx.flush();
    assert!(ctx.shaders().is_valid(handle));

    let defines = ShaderDefines::new().with("USE_FOG", "1").with("QUALITY", "2");
    let reordered = ShaderDefines::new().with("QUALITY", "2").with("USE_FOG", "1");

    let first = resolve(&ctx, handle, defines);
    let second = resolve(&ctx, handle, reordered);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(probe.stats().programs_compiled(), 1);
    assert!(first.code[0].contains("let fog = true;"));
    assert!(first.code[0].contains("// #define USE_FOG 1"));

    let plain = resolve(&ctx, handle, ShaderDefines::new());
    assert!(!Arc::ptr_eq(&first, &plain));
    assert!(!plain.code[0].contains("fog"));
    assert_eq!(probe.stats().programs_compiled(), 2);
    assert_eq!(ctx.shaders().variant_count(handle), 2);
}

#[test]
fn failed_variant_resolves_to_dummy_and_is_not_retried() {
    let (ctx, probe) = context();
    let handle = ctx
        .shaders()
        .async_load("mesh", ProgramDescriptor::new().inline(ShaderStage::Vertex, MESH_SOURCE))
        .unwrap();
    ctx.flush();

    let broken = ShaderDefines::new().with("BROKEN", "1");
    let first = resolve(&ctx, handle, broken.clone());
    let second = resolve(&ctx, handle, broken);

    let dummy = ctx.shaders().dummy();
    assert!(Arc::ptr_eq(&first, &dummy));
    assert!(Arc::ptr_eq(&second, &dummy));
    assert_eq!(probe.stats().programs_failed(), 1);
    assert_eq!(ctx.shaders().variant_count(handle), 1);

    // Other permutations of the same program still compile.
    let fine = resolve(&ctx, handle, ShaderDefines::new());
    assert!(!Arc::ptr_eq(&fine, &dummy));
}

#[test]
fn missing_or_queued_program_resolves_to_dummy() {
    let (ctx, probe) = context();
    let dummy = ctx.shaders().dummy();

    let unknown = resolve(&ctx, ResourceHandle::from_name("nope"), ShaderDefines::new());
    assert!(Arc::ptr_eq(&unknown, &dummy));

    let queued = ctx
        .shaders()
        .async_load("late", ProgramDescriptor::new().inline(ShaderStage::Fragment, "fn fs() {}"))
        .unwrap();
    let early = resolve(&ctx, queued, ShaderDefines::new());
    assert!(Arc::ptr_eq(&early, &dummy));
    assert_eq!(probe.stats().programs_compiled(), 0);
}

#[test]
fn missing_stage_file_fails_the_program() {
    let (ctx, _) = context();
    let handle = ctx
        .shaders()
        .async_load(
            "ghost",
            ProgramDescriptor::new().file(ShaderStage::Vertex, "/nonexistent/ghost.wgsl"),
        )
        .unwrap();
    ctx.flush();

    assert!(ctx.shaders().is_failed(handle));
    let program = resolve(&ctx, handle, ShaderDefines::new());
    assert!(Arc::ptr_eq(&program, &ctx.shaders().dummy()));
}

#[test]
fn held_variant_outlives_discarded_program() {
    let (ctx, probe) = context();
    let handle = ctx
        .shaders()
        .async_load("mesh", ProgramDescriptor::new().inline(ShaderStage::Vertex, MESH_SOURCE))
        .unwrap();
    ctx.flush();

    let held = resolve(&ctx, handle, ShaderDefines::new());
    ctx.shaders().discard(handle);
    ctx.flush();

    assert!(!ctx.shaders().is_valid(handle));
    assert_eq!(probe.stats().programs_destroyed(), 0);
    assert!(held.code[0].contains("fn vs_main()"));
}

#[test]
fn unshared_variants_are_destroyed_with_their_program() {
    let (ctx, probe) = context();
    let handle = ctx
        .shaders()
        .async_load("mesh", ProgramDescriptor::new().inline(ShaderStage::Vertex, MESH_SOURCE))
        .unwrap();
    ctx.flush();

    resolve(&ctx, handle, ShaderDefines::new());
    resolve(&ctx, handle, ShaderDefines::new().with("USE_FOG", "1"));
    ctx.shaders().discard(handle);
    ctx.flush();

    assert_eq!(probe.stats().programs_destroyed(), 2);
}

#[test]
fn empty_program_descriptor_is_rejected() {
    let (ctx, _) = context();
    assert!(ctx.shaders().async_load("empty", ProgramDescriptor::new()).is_err());
}

// ============================================================================
// Hot reload
// ============================================================================

#[test]
fn edited_stage_file_is_reloaded_with_fresh_variants() -> anyhow::Result<()> {
    let (ctx, probe) = context();
    let path = scratch_file("reload", MESH_SOURCE)?;
    let handle = ctx
        .shaders()
        .async_load("mesh", ProgramDescriptor::new().file(ShaderStage::Vertex, &path))
        .unwrap();
    ctx.flush();

    let before = resolve(&ctx, handle, ShaderDefines::new()).code_hash;
    assert_eq!(ctx.shaders().variant_count(handle), 1);
    assert_eq!(ctx.shaders().reload_changed(), 0);

    touch_with(&path, "fn vs_main() { let edited = 1; }\n")?;
    assert_eq!(ctx.shaders().reload_changed(), 1);
    ctx.flush();

    assert!(ctx.shaders().is_valid(handle));
    assert_eq!(ctx.shaders().variant_count(handle), 0);
    assert_eq!(probe.stats().programs_destroyed(), 1);

    let after = resolve(&ctx, handle, ShaderDefines::new());
    assert_ne!(before, after.code_hash);
    assert!(after.code[0].contains("let edited = 1;"));
    assert_eq!(probe.stats().programs_compiled(), 2);

    // Nothing changed since the reload.
    assert_eq!(ctx.shaders().reload_changed(), 0);
    std::fs::remove_file(path)?;
    Ok(())
}

#[test]
fn tick_polls_for_changes_when_enabled() -> anyhow::Result<()> {
    let settings = CacheSettings {
        hot_reload: HotReloadSettings {
            enabled: true,
            interval_ticks: 1,
        },
        ..CacheSettings::default()
    };
    let (ctx, _) = context_with(settings);
    let path = scratch_file("poll", MESH_SOURCE)?;
    let handle = ctx
        .shaders()
        .async_load("mesh", ProgramDescriptor::new().file(ShaderStage::Vertex, &path))
        .unwrap();
    ctx.flush();
    resolve(&ctx, handle, ShaderDefines::new());

    touch_with(&path, "fn vs_main() { let polled = 1; }\n")?;
    ctx.flush();

    assert_eq!(ctx.shaders().variant_count(handle), 0);
    let after = resolve(&ctx, handle, ShaderDefines::new());
    assert!(after.code[0].contains("let polled = 1;"));
    std::fs::remove_file(path)?;
    Ok(())
}

#[test]
fn disabled_hot_reload_leaves_programs_alone() -> anyhow::Result<()> {
    let settings = CacheSettings {
        hot_reload: HotReloadSettings {
            enabled: false,
            interval_ticks: 1,
        },
        ..CacheSettings::default()
    };
    let (ctx, probe) = context_with(settings);
    let path = scratch_file("disabled", MESH_SOURCE)?;
    let handle = ctx
        .shaders()
        .async_load("mesh", ProgramDescriptor::new().file(ShaderStage::Vertex, &path))
        .unwrap();
    ctx.flush();
    resolve(&ctx, handle, ShaderDefines::new());

    touch_with(&path, "fn vs_main() {}\n")?;
    ctx.flush();
    ctx.flush();

    assert_eq!(ctx.shaders().variant_count(handle), 1);
    assert_eq!(probe.stats().programs_destroyed(), 0);
    std::fs::remove_file(path)?;
    Ok(())
}
