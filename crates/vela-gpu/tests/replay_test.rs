//! Surface bridge integration tests
//!
//! Batches are replayed through the recording driver and the call log is
//! checked for order and for calls that must never happen.

use vela_gpu::{
    DrawBatch, DriverCall, GeometryData, GeometryId, GpuState, HostRenderTarget, PixelFormat, RenderTargetDesc,
    RenderTargetId, ResourceKind, ResourceNotice, SoftwareDriver, SurfaceBridge, SurfaceError,
    TargetState, TextureData, TextureId, TraceDriver, VertexFormat,
};

const VIEW_A: u64 = 0xa;
const VIEW_B: u64 = 0xb;

fn quad() -> GeometryData {
    GeometryData {
        format: VertexFormat::Format2f4ub2f,
        vertices: vec![0; 80],
        indices: vec![0, 1, 2, 2, 3, 0],
    }
}

fn setup() -> SurfaceBridge<TraceDriver> {
    let mut bridge = SurfaceBridge::new(TraceDriver::new());
    let notices = [
        ResourceNotice::DefineRenderTarget {
            id: RenderTargetId(1),
            desc: RenderTargetDesc::new(32, 32),
            view: VIEW_A,
        },
        ResourceNotice::DefineRenderTarget {
            id: RenderTargetId(2),
            desc: RenderTargetDesc::new(32, 32),
            view: VIEW_B,
        },
        ResourceNotice::DefineGeometry {
            id: GeometryId(1),
            data: quad(),
        },
    ];
    for notice in notices {
        bridge.apply(notice).unwrap();
    }
    bridge
}

fn draw(target: u32, offset: u32) -> (GpuState, GeometryId, u32, u32) {
    (GpuState::new(RenderTargetId(target), 32, 32), GeometryId(1), offset, 3)
}

fn batch(sequence: u64, draws: &[(u32, u32)]) -> DrawBatch {
    draws.iter().fold(DrawBatch::new(sequence), |batch, &(target, offset)| {
        let (state, geometry, offset, count) = draw(target, offset);
        batch.draw(state, geometry, offset, count)
    })
}

// ============================================================================
// ORDERING
// ============================================================================

#[test]
fn test_commands_replay_in_emission_order() {
    let mut bridge = setup();
    bridge.submit(&batch(1, &[(1, 0), (1, 3), (1, 0)])).unwrap();

    let offsets: Vec<u32> = bridge
        .driver()
        .log()
        .draws()
        .into_iter()
        .filter_map(|call| match call {
            DriverCall::Draw { indices_offset, .. } => Some(indices_offset),
            _ => None,
        })
        .collect();
    assert_eq!(offsets, vec![0, 3, 0]);
}

#[test]
fn test_interleaved_targets_keep_their_order() {
    let mut bridge = setup();
    bridge.submit(&batch(1, &[(1, 0), (2, 0)])).unwrap();
    bridge.submit(&batch(2, &[(2, 3), (1, 3)])).unwrap();
    bridge.submit(&batch(3, &[(1, 0)])).unwrap();

    let host_a = bridge.map().host_target(RenderTargetId(1)).unwrap();
    let host_b = bridge.map().host_target(RenderTargetId(2)).unwrap();
    let per_target = |host: HostRenderTarget| -> Vec<u32> {
        bridge
            .driver()
            .log()
            .draws()
            .into_iter()
            .filter_map(|call| match call {
                DriverCall::Draw {
                    target,
                    indices_offset,
                    ..
                } if target == host => Some(indices_offset),
                _ => None,
            })
            .collect()
    };

    assert_eq!(per_target(host_a), vec![0, 3, 0]);
    assert_eq!(per_target(host_b), vec![0, 3]);
    assert_eq!(bridge.map().last_sequence(RenderTargetId(1)), Some(3));
    assert_eq!(bridge.map().last_sequence(RenderTargetId(2)), Some(2));
}

#[test]
fn test_frames_reported_per_target() {
    let mut bridge = setup();
    let report = bridge.submit(&batch(7, &[(2, 0), (1, 0)])).unwrap();

    let frames: Vec<_> = report.frames.iter().map(|f| (f.target, f.view, f.sequence)).collect();
    assert_eq!(
        frames,
        vec![(RenderTargetId(2), VIEW_B, 7), (RenderTargetId(1), VIEW_A, 7)]
    );
}

// ============================================================================
// STALENESS
// ============================================================================

#[test]
fn test_resize_makes_old_target_stale_without_host_calls() {
    let mut bridge = setup();
    bridge.submit(&batch(1, &[(1, 0)])).unwrap();
    bridge
        .apply(ResourceNotice::ResizeRenderTarget {
            id: RenderTargetId(1),
            width: 64,
            height: 64,
        })
        .unwrap();
    bridge.driver().log().clear();

    let err = bridge.submit(&batch(2, &[(1, 0)])).unwrap_err();

    assert_eq!(err, SurfaceError::StaleTarget(RenderTargetId(1)));
    assert!(bridge.driver().log().is_empty());
    assert_eq!(bridge.map().target_state(RenderTargetId(1)), Some(TargetState::Invalidated));
    assert_eq!(bridge.stats().batches_dropped, 1);
}

#[test]
fn test_stale_command_drops_whole_batch() {
    let mut bridge = setup();
    bridge.resize_render_target(RenderTargetId(2), 8, 8).unwrap();

    // The live target's draw is dropped with the stale one.
    let err = bridge.submit(&batch(1, &[(1, 0), (2, 0)])).unwrap_err();
    assert_eq!(err, SurfaceError::StaleTarget(RenderTargetId(2)));
    assert!(bridge.driver().log().is_empty());
}

#[test]
fn test_destroyed_texture_is_stale_resource() {
    let mut bridge = setup();
    bridge
        .define_texture(TextureId(5), TextureData::new(2, 2, PixelFormat::Rgba8, vec![0; 16]))
        .unwrap();
    bridge.destroy_texture(TextureId(5)).unwrap();

    let state = GpuState::new(RenderTargetId(1), 32, 32).with_texture(0, TextureId(5));
    let err = bridge
        .submit(&DrawBatch::new(1).draw(state, GeometryId(1), 0, 6))
        .unwrap_err();

    assert_eq!(
        err,
        SurfaceError::StaleResource {
            kind: ResourceKind::Texture,
            id: 5
        }
    );
    assert!(err.is_stale());
}

#[test]
fn test_never_defined_geometry_is_unknown() {
    let mut bridge = setup();
    let err = bridge
        .submit(&DrawBatch::new(1).draw(GpuState::new(RenderTargetId(1), 32, 32), GeometryId(99), 0, 3))
        .unwrap_err();

    assert_eq!(
        err,
        SurfaceError::UnknownResource {
            kind: ResourceKind::Geometry,
            id: 99
        }
    );
    assert!(!err.is_stale());
}

#[test]
fn test_invalidate_owner_only_touches_that_view() {
    let mut bridge = setup();
    bridge.submit(&batch(1, &[(1, 0), (2, 0)])).unwrap();
    let host_a = bridge.map().host_target(RenderTargetId(1)).unwrap();

    assert_eq!(bridge.invalidate_owner(VIEW_A), vec![RenderTargetId(1)]);

    assert!(bridge
        .driver()
        .log()
        .calls()
        .contains(&DriverCall::DestroyRenderTarget { host: host_a }));
    assert_eq!(bridge.map().native_target(host_a), None);
    assert!(bridge.submit(&batch(2, &[(2, 0)])).is_ok());
}

#[test]
fn test_release_all_destroys_host_resources() {
    let mut bridge = setup();
    bridge.submit(&batch(1, &[(1, 0)])).unwrap();
    bridge.release_all();

    let destroyed = bridge
        .driver()
        .log()
        .calls()
        .into_iter()
        .filter(|call| {
            matches!(
                call,
                DriverCall::DestroyRenderTarget { .. } | DriverCall::DestroyGeometry { .. }
            )
        })
        .count();
    assert_eq!(destroyed, 2);
}

// ============================================================================
// SOFTWARE DRIVER
// ============================================================================

#[test]
fn test_software_replay_paints_surface() {
    let driver = SoftwareDriver::new();
    let surfaces = driver.surfaces();
    let mut bridge = SurfaceBridge::new(driver);

    let mut vertices = Vec::new();
    for (x, y) in [(0.0f32, 0.0f32), (16.0, 0.0), (16.0, 16.0), (0.0, 16.0)] {
        vertices.extend_from_slice(&x.to_le_bytes());
        vertices.extend_from_slice(&y.to_le_bytes());
        vertices.extend_from_slice(&[10, 20, 30, 255]);
        vertices.extend_from_slice(&[0; 8]);
    }
    bridge
        .define_render_target(RenderTargetId(1), RenderTargetDesc::new(16, 16), VIEW_A)
        .unwrap();
    bridge
        .define_geometry(
            GeometryId(1),
            GeometryData {
                format: VertexFormat::Format2f4ub2f,
                vertices,
                indices: vec![0, 1, 2, 2, 3, 0],
            },
        )
        .unwrap();

    let report = bridge
        .submit(
            &DrawBatch::new(1)
                .clear(RenderTargetId(1))
                .draw(GpuState::new(RenderTargetId(1), 16, 16), GeometryId(1), 0, 6),
        )
        .unwrap();

    let host = report.frames[0].host;
    assert_eq!(surfaces.pixel(host, 10, 3), Some([10, 20, 30, 255]));
    assert_eq!(bridge.driver().frames(), 1);
}
