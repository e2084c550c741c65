//! Resource Cache Tests
//!
//! Tests for:
//! - Idempotent loads and request coalescing
//! - Discard cancelling a pending creation, discard-before-create
//! - Fallback resolution for missing, queued and failed handles
//! - Discard of unknown handles
//! - Deferred transactions and multi-threaded producers
//! - Discard racing an in-flight creation, producers holding resolve guards
//! - Image decoding from files on the render thread

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use resident::device::{DeviceProbe, HeadlessDevice};
use resident::managers::{GeometryDescriptor, ImageDescriptor, Indices};
use resident::settings::CacheSettings;
use resident::{Error, ResourceContext, ResourceHandle};

fn context() -> (ResourceContext<HeadlessDevice>, DeviceProbe) {
    let _ = env_logger::builder().is_test(true).try_init();
    let device = HeadlessDevice::new();
    let probe = device.probe();
    let ctx = ResourceContext::new(device, CacheSettings::default()).unwrap();
    (ctx, probe)
}

fn rgba(width: u32, height: u32) -> ImageDescriptor {
    ImageDescriptor::pixels(
        width,
        height,
        wgpu::TextureFormat::Rgba8Unorm,
        vec![255; (width * height * 4) as usize],
    )
}

// ============================================================================
// Loading
// ============================================================================

#[test]
fn load_becomes_valid_only_after_tick() {
    let (ctx, _) = context();
    let images = ctx.images();

    let handle = images.async_load("albedo", rgba(4, 4)).unwrap();
    assert_eq!(handle, ResourceHandle::from_name("albedo"));
    assert!(images.is_queued(handle));
    assert!(!images.is_valid(handle));

    ctx.flush();
    assert!(images.is_valid(handle));
    assert!(!images.is_queued(handle));
    assert_eq!(images.resolve(handle).width, 4);
    assert_eq!(images.name(handle).as_deref(), Some("albedo"));
}

#[test]
fn double_load_before_tick_creates_once() {
    let (ctx, probe) = context();
    let baseline = probe.stats().images_created();

    let first = ctx.images().async_load("albedo", rgba(2, 2)).unwrap();
    let second = ctx.images().async_load("albedo", rgba(2, 2)).unwrap();
    assert_eq!(first, second);

    assert_eq!(ctx.tick(), 1);
    ctx.wait_idle();
    assert_eq!(probe.stats().images_created() - baseline, 1);
}

#[test]
fn load_of_resident_handle_is_a_no_op() {
    let (ctx, probe) = context();
    let handle = ctx.images().async_load("albedo", rgba(2, 2)).unwrap();
    ctx.flush();
    let created = probe.stats().images_created();

    assert_eq!(ctx.images().async_load("albedo", rgba(8, 8)).unwrap(), handle);
    assert!(!ctx.images().is_queued(handle));
    ctx.flush();
    assert_eq!(probe.stats().images_created(), created);
    assert_eq!(ctx.images().resolve(handle).width, 2);
}

#[test]
fn invalid_descriptor_is_rejected_at_load() {
    let (ctx, _) = context();
    let cube = ImageDescriptor::cube(["px.png", "nx.png", "py.png"]);

    let result = ctx.images().async_load("sky", cube);
    assert!(matches!(result, Err(Error::InvalidDescriptor { .. })));
    assert!(!ctx.images().is_queued(ResourceHandle::from_name("sky")));
}

#[test]
fn geometry_is_uploaded_on_the_render_thread() {
    let (ctx, probe) = context();
    let triangle = GeometryDescriptor::from_vertices(&[[0.0f32, 0.0], [1.0, 0.0], [0.0, 1.0]])
        .with_indices(Indices::U16(vec![0, 1, 2]));

    let handle = ctx.geometry().async_load("triangle", triangle).unwrap();
    ctx.flush();

    let geometry = ctx.geometry().resolve(handle);
    assert_eq!(geometry.vertex_count, 3);
    assert_eq!(geometry.index_count, 3);
    assert_eq!(probe.stats().last_thread().as_deref(), Some("render-thread"));
}

// ============================================================================
// Discard
// ============================================================================

#[test]
fn discard_cancels_pending_creation() {
    let (ctx, probe) = context();
    let baseline = probe.stats().images_created();

    let handle = ctx.images().async_load("albedo", rgba(2, 2)).unwrap();
    ctx.images().discard(handle);
    assert!(!ctx.images().is_queued(handle));
    assert!(!ctx.images().is_discard_queued(handle));

    ctx.flush();
    assert!(!ctx.images().is_valid(handle));
    assert_eq!(probe.stats().images_created(), baseline);
    assert_eq!(probe.stats().images_destroyed(), 0);
}

#[test]
fn discard_destroys_resident_resource() {
    let (ctx, probe) = context();
    let handle = ctx.images().async_load("albedo", rgba(2, 2)).unwrap();
    ctx.flush();

    ctx.images().discard(handle);
    ctx.images().discard(handle);
    assert!(ctx.images().is_discard_queued(handle));
    assert!(ctx.images().is_valid(handle));

    ctx.flush();
    assert!(!ctx.images().is_valid(handle));
    assert_eq!(probe.stats().images_destroyed(), 1);
}

#[test]
fn discard_then_load_in_one_tick_yields_fresh_resource() {
    let (ctx, probe) = context();
    let handle = ctx.images().async_load("albedo", rgba(2, 2)).unwrap();
    ctx.flush();
    let old_id = ctx.images().resolve(handle).id;

    ctx.images().discard(handle);
    assert_eq!(ctx.images().async_load("albedo", rgba(8, 8)).unwrap(), handle);
    assert!(ctx.images().is_queued(handle));
    ctx.flush();

    let image = ctx.images().resolve(handle);
    assert_ne!(image.id, old_id);
    assert_eq!(image.width, 8);
    assert_eq!(probe.stats().images_destroyed(), 1);
}

#[test]
fn discard_during_in_flight_creation_destroys_result() {
    let (ctx, probe) = context();
    let created = probe.stats().images_created();

    let gate = Arc::new(Barrier::new(2));
    let blocker = Arc::clone(&gate);
    ctx.render_thread().submit(move |_| {
        blocker.wait();
    });

    let handle = ctx.images().async_load("albedo", rgba(2, 2)).unwrap();
    ctx.tick();
    ctx.images().discard(handle);
    assert!(ctx.images().is_discard_queued(handle));
    gate.wait();

    ctx.flush();
    assert!(!ctx.images().is_valid(handle));
    assert!(!ctx.images().is_queued(handle));
    assert_eq!(probe.stats().images_created() - created, 1);
    assert_eq!(probe.stats().images_destroyed(), 1);
}

#[test]
fn discard_of_unknown_or_invalid_handle_is_a_no_op() {
    let (ctx, probe) = context();
    let resident = ctx.images().async_load("albedo", rgba(2, 2)).unwrap();
    ctx.flush();

    ctx.images().discard(ResourceHandle::INVALID);
    ctx.images().discard(ResourceHandle::from_name("never-issued"));
    assert!(!ctx.images().is_discard_queued(ResourceHandle::from_name("never-issued")));

    ctx.flush();
    assert!(ctx.images().is_valid(resident));
    assert_eq!(probe.stats().images_destroyed(), 0);
}

// ============================================================================
// Fallback
// ============================================================================

#[test]
fn resolve_of_missing_handle_returns_fallback() {
    let (ctx, _) = context();

    let fallback_id = ctx.images().resolve(ResourceHandle::INVALID).id;
    let unknown = ctx.images().resolve(ResourceHandle::from_name("unknown"));
    assert_eq!(unknown.id, fallback_id);
    assert_eq!((unknown.width, unknown.height), (1, 1));
    drop(unknown);

    let queued = ctx.images().async_load("queued", rgba(2, 2)).unwrap();
    assert_eq!(ctx.images().resolve(queued).id, fallback_id);

    // Empty geometry and the attachment-less target are bindable too.
    assert_eq!(ctx.geometry().resolve(ResourceHandle::INVALID).vertex_count, 0);
    assert!(ctx.render_targets().resolve(ResourceHandle::INVALID).attachments.is_empty());
}

#[test]
fn failed_construction_is_cached_and_falls_back() {
    let (ctx, probe) = context();
    let baseline = probe.stats().images_created();

    let missing = ImageDescriptor::file("/nonexistent/albedo.png");
    let handle = ctx.images().async_load("broken", missing.clone()).unwrap();
    ctx.flush();

    assert!(ctx.images().is_failed(handle));
    assert!(!ctx.images().is_valid(handle));
    assert!(ctx.images().failure(handle).is_some());
    assert_eq!(ctx.images().resolve(handle).width, 1);

    // Not retried while the failure is cached.
    ctx.images().async_load("broken", missing).unwrap();
    assert!(!ctx.images().is_queued(handle));
    ctx.flush();
    assert_eq!(probe.stats().images_created(), baseline);
}

// ============================================================================
// Files
// ============================================================================

#[test]
fn cube_faces_are_decoded_from_files() {
    let (ctx, _) = context();
    let dir = std::env::temp_dir().join(format!("resident-cube-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let faces: Vec<_> = (0..6)
        .map(|i| {
            let path = dir.join(format!("face{i}.png"));
            image::RgbaImage::from_pixel(8, 8, image::Rgba([i * 40, 0, 0, 255]))
                .save(&path)
                .unwrap();
            path
        })
        .collect();

    let handle = ctx.images().async_load("sky", ImageDescriptor::cube(&faces)).unwrap();
    ctx.flush();

    let sky = ctx.images().resolve(handle);
    assert_eq!((sky.width, sky.height, sky.layers), (8, 8, 6));
    drop(sky);
    let _ = std::fs::remove_dir_all(dir);
}

// ============================================================================
// Transactions and producers
// ============================================================================

#[test]
fn transact_mutates_resident_resource_on_render_thread() {
    let (ctx, _) = context();
    let handle = ctx.images().async_load("albedo", rgba(2, 2)).unwrap();
    ctx.images().transact(handle, |_, image| image.revision += 1);
    ctx.flush();
    assert_eq!(ctx.images().resolve(handle).revision, 1);

    ctx.images().transact(handle, |_, image| image.revision += 1);
    ctx.flush();
    assert_eq!(ctx.images().resolve(handle).revision, 2);
}

#[test]
fn producers_on_many_threads_coalesce() {
    let (ctx, probe) = context();
    let baseline = probe.stats().images_created();
    let images = Arc::new(ctx.images().clone());

    let workers: Vec<_> = (0..8)
        .map(|worker| {
            let images = Arc::clone(&images);
            thread::spawn(move || {
                (0..16)
                    .map(|i| {
                        let name = format!("shared-{}", (worker + i) % 4);
                        images.async_load(name, rgba(1, 1)).unwrap()
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    ctx.flush();
    assert_eq!(probe.stats().images_created() - baseline, 4);
    assert_eq!(ctx.images().resident_count(), 4);
}

#[test]
fn producer_holding_resolve_guard_can_keep_loading() {
    let (ctx, _) = context();
    let a = ctx.images().async_load("a", rgba(1, 1)).unwrap();
    ctx.flush();

    let images = ctx.images().clone();
    let (tx, rx) = flume::bounded(1);
    let producer = thread::spawn(move || {
        let image = images.resolve(a);
        images.discard(a);
        images.tick();
        // Let the render thread block on the slot table.
        thread::sleep(Duration::from_millis(200));
        let c = images.async_load("c", rgba(1, 1)).unwrap();
        assert!(!images.is_valid(c));
        assert_eq!(image.width, 1);
        drop(image);
        tx.send(c).unwrap();
    });

    let c = rx
        .recv_timeout(Duration::from_secs(3))
        .expect("producer stalled while holding a resolve guard");
    producer.join().unwrap();

    ctx.flush();
    assert!(!ctx.images().is_valid(a));
    assert!(ctx.images().is_valid(c));
}

#[test]
fn shutdown_destroys_everything() {
    let (ctx, probe) = context();
    ctx.images().async_load("a", rgba(1, 1)).unwrap();
    ctx.images().async_load("b", rgba(1, 1)).unwrap();
    ctx.flush();

    ctx.shutdown();
    assert_eq!(probe.stats().images_destroyed(), 2);
    assert!(ctx.ensure_running().is_err());
    assert!(matches!(ctx.call(|_| ()), Err(Error::RenderThreadGone)));
}
