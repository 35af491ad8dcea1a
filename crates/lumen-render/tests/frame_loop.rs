// SPDX-License-Identifier: CEPL-1.0
mod common;

use common::{Event, MockGpu, MockHost, ScriptedAcquire, MOCK_FORMAT};
use lumen_render::{
    FrameBackend, FrameLoop, FrameStatus, PresentOutcome, RebuildOutcome, RenderError, RenderSize,
};

fn start(gpu: MockGpu, frames: usize, host: &mut MockHost) -> FrameLoop<MockGpu> {
    FrameLoop::new(gpu, frames, host).expect("frame loop")
}

#[test]
fn in_flight_bound_holds_over_many_frames() {
    for (frames, images) in [(2, 3), (2, 5), (3, 2), (1, 4)] {
        let gpu = MockGpu::new(images);
        let timeline = gpu.timeline();
        let mut host = MockHost::new(800, 600);
        let mut fl = start(gpu, frames, &mut host);

        for _ in 0..25 {
            assert_eq!(fl.render_frame(&mut host).unwrap(), FrameStatus::Presented);
            assert!(timeline.borrow().outstanding() <= frames);
        }

        let t = timeline.borrow();
        assert_eq!(t.submissions(), 25);
        assert!(
            t.max_outstanding <= frames,
            "{} outstanding with {frames} frames in flight",
            t.max_outstanding
        );
        assert!(t.violations.is_empty(), "{:?}", t.violations);
    }
}

#[test]
fn image_reacquired_out_of_order_waits_for_its_previous_owner() {
    let mut gpu = MockGpu::new(5);
    gpu.acquire_script
        .extend([ScriptedAcquire::Image(2), ScriptedAcquire::Image(2)]);
    let timeline = gpu.timeline();
    let mut host = MockHost::new(800, 600);
    let mut fl = start(gpu, 2, &mut host);

    fl.render_frame(&mut host).unwrap();
    assert_eq!(fl.image_owner(2), Some(0));

    // Frame slot 1 gets image 2 back while slot 0's submission is still pending.
    assert_eq!(timeline.borrow().outstanding(), 1);
    fl.render_frame(&mut host).unwrap();
    assert_eq!(fl.image_owner(2), Some(1));

    let t = timeline.borrow();
    assert!(t.violations.is_empty(), "{:?}", t.violations);

    let first_submit = t.positions(|e| matches!(e, Event::Submit { id: 1, fence: 0, .. }))[0];
    let waits_on_slot0 = t.positions(|e| *e == Event::WaitFence(0));
    let updates = t.positions(|e| *e == Event::Update(2));
    assert_eq!(updates.len(), 2);

    // Wait on fence A (slot 0) happened after its submit and before the second write.
    assert!(waits_on_slot0
        .iter()
        .any(|&w| w > first_submit && w < updates[1]));
    // The second frame was submitted with fence B (slot 1).
    assert!(t
        .events
        .iter()
        .any(|e| matches!(e, Event::Submit { id: 2, image: 2, fence: 1 })));
}

#[test]
fn timeline_flags_an_unguarded_write() {
    // Sanity check for the mock: skipping the owner wait must be caught.
    let mut gpu = MockGpu::new(3);
    let timeline = gpu.timeline();
    let fence = gpu.create_fence(false).unwrap();
    let mut bundle = gpu.create_bundle(RenderSize::new(64, 64)).unwrap();
    gpu.submit(&bundle, 1, 0, 0, fence).unwrap();
    gpu.update_frame_data(&mut bundle, 1).unwrap();
    assert_eq!(timeline.borrow().violations.len(), 1);
}

#[test]
fn rotating_index_returns_after_n_frames() {
    for frames in 1..=4 {
        let mut host = MockHost::new(800, 600);
        let mut fl = start(MockGpu::new(3), frames, &mut host);
        assert_eq!(fl.current_frame(), 0);
        for expected in 1..frames {
            fl.render_frame(&mut host).unwrap();
            assert_eq!(fl.current_frame(), expected);
        }
        fl.render_frame(&mut host).unwrap();
        assert_eq!(fl.current_frame(), 0);
    }
}

#[test]
fn out_of_date_acquire_rebuilds_without_submitting() {
    // N = 2, five swapchain images.
    let mut gpu = MockGpu::new(5);
    gpu.acquire_script.extend([
        ScriptedAcquire::Image(0),
        ScriptedAcquire::Image(1),
        ScriptedAcquire::OutOfDate,
    ]);
    let timeline = gpu.timeline();
    let mut host = MockHost::new(800, 600);
    let mut fl = start(gpu, 2, &mut host);

    assert_eq!(fl.render_frame(&mut host).unwrap(), FrameStatus::Presented);
    assert_eq!(fl.current_frame(), 1);
    assert_eq!(fl.render_frame(&mut host).unwrap(), FrameStatus::Presented);
    assert_eq!(fl.current_frame(), 0);

    assert_eq!(fl.render_frame(&mut host).unwrap(), FrameStatus::Rebuilt);
    assert_eq!(fl.current_frame(), 0);
    assert_eq!(fl.frames_submitted(), 2);
    assert_eq!(fl.rebuilds(), 1);

    assert_eq!(fl.render_frame(&mut host).unwrap(), FrameStatus::Presented);
    assert_eq!(fl.current_frame(), 1);
    assert_eq!(fl.frames_submitted(), 3);

    let t = timeline.borrow();
    assert_eq!(t.submissions(), 3);
    // The out-of-date frame never touched its fence.
    let reset_count = t.positions(|e| matches!(e, Event::ResetFence(_))).len();
    assert_eq!(reset_count, 3);
    assert!(t.violations.is_empty(), "{:?}", t.violations);
}

#[test]
fn rebuild_is_idempotent_for_an_unchanged_extent() {
    let gpu = MockGpu::new(4);
    let timeline = gpu.timeline();
    let mut host = MockHost::new(1280, 720);
    let mut fl = start(gpu, 2, &mut host);
    let initial = fl.bundle_info().unwrap();

    let RebuildOutcome::Rebuilt(once) = fl.rebuild_swapchain(&mut host).unwrap() else {
        panic!("first rebuild abandoned");
    };
    let RebuildOutcome::Rebuilt(twice) = fl.rebuild_swapchain(&mut host).unwrap() else {
        panic!("second rebuild abandoned");
    };

    assert_eq!(once, twice);
    assert_eq!(initial, once);
    assert_eq!(twice.images, 4);
    assert_eq!(twice.format, MOCK_FORMAT);
    assert_eq!(timeline.borrow().live_bundles, 1);
}

#[test]
fn rebuild_waits_idle_then_destroys_before_creating() {
    let gpu = MockGpu::new(3);
    let timeline = gpu.timeline();
    let mut host = MockHost::new(800, 600);
    let mut fl = start(gpu, 2, &mut host);
    fl.render_frame(&mut host).unwrap();
    fl.render_frame(&mut host).unwrap();

    fl.rebuild_swapchain(&mut host).unwrap();

    let t = timeline.borrow();
    let idle = t.positions(|e| *e == Event::WaitIdle);
    let destroy = t.positions(|e| *e == Event::DestroyBundle { generation: 1 });
    let create = t.positions(|e| matches!(e, Event::CreateBundle { generation: 2, .. }));
    assert_eq!(destroy.len(), 1);
    assert_eq!(create.len(), 1);
    assert!(idle.iter().any(|&i| i < destroy[0]));
    assert!(destroy[0] < create[0]);
    assert_eq!(t.outstanding(), 0);
    assert!(t.violations.is_empty(), "{:?}", t.violations);
}

#[test]
fn zero_extent_spins_until_the_window_comes_back() {
    let gpu = MockGpu::new(3);
    let timeline = gpu.timeline();
    let mut host = MockHost::new(1024, 768);
    let mut fl = start(gpu, 2, &mut host);

    host.size = RenderSize::new(0, 0);
    host.upcoming_sizes.extend([
        RenderSize::new(0, 0),
        RenderSize::new(0, 0),
        RenderSize::new(800, 600),
    ]);

    let outcome = fl.rebuild_swapchain(&mut host).unwrap();
    let RebuildOutcome::Rebuilt(info) = outcome else {
        panic!("rebuild abandoned");
    };
    assert_eq!(info.extent, RenderSize::new(800, 600));
    assert_eq!(host.polls, 3);

    let t = timeline.borrow();
    let sizes: Vec<RenderSize> = t
        .events
        .iter()
        .filter_map(|e| match e {
            Event::CreateBundle { size, .. } => Some(*size),
            _ => None,
        })
        .collect();
    assert_eq!(
        sizes,
        vec![RenderSize::new(1024, 768), RenderSize::new(800, 600)]
    );
}

#[test]
fn closing_while_minimized_keeps_the_old_bundle() {
    let gpu = MockGpu::new(3);
    let timeline = gpu.timeline();
    let mut host = MockHost::new(800, 600);
    let mut fl = start(gpu, 2, &mut host);

    host.size = RenderSize::new(0, 0);
    host.close_after_polls = Some(2);

    assert_eq!(
        fl.rebuild_swapchain(&mut host).unwrap(),
        RebuildOutcome::Abandoned
    );
    assert!(fl.resize_pending());
    assert_eq!(fl.bundle_info().unwrap().extent, RenderSize::new(800, 600));
    let t = timeline.borrow();
    assert_eq!(t.live_bundles, 1);
    assert!(!t.events.contains(&Event::WaitIdle));
}

#[test]
fn suboptimal_acquire_still_submits() {
    let mut gpu = MockGpu::new(3);
    gpu.acquire_script.push_back(ScriptedAcquire::Suboptimal(0));
    let mut host = MockHost::new(800, 600);
    let mut fl = start(gpu, 2, &mut host);

    assert_eq!(fl.render_frame(&mut host).unwrap(), FrameStatus::Presented);
    assert_eq!(fl.rebuilds(), 0);
    assert_eq!(fl.frames_submitted(), 1);
}

#[test]
fn stale_present_rebuilds_and_still_advances() {
    for outcome in [PresentOutcome::Suboptimal, PresentOutcome::OutOfDate] {
        let mut gpu = MockGpu::new(3);
        gpu.present_script.push_back(outcome);
        let mut host = MockHost::new(800, 600);
        let mut fl = start(gpu, 2, &mut host);

        assert_eq!(
            fl.render_frame(&mut host).unwrap(),
            FrameStatus::PresentedAndRebuilt
        );
        assert_eq!(fl.rebuilds(), 1);
        assert_eq!(fl.current_frame(), 1);
    }
}

#[test]
fn resize_signal_is_honoured_after_present() {
    let gpu = MockGpu::new(3);
    let timeline = gpu.timeline();
    let mut host = MockHost::new(800, 600);
    let mut fl = start(gpu, 2, &mut host);

    host.resized = true;
    host.size = RenderSize::new(1920, 1080);
    assert_eq!(
        fl.render_frame(&mut host).unwrap(),
        FrameStatus::PresentedAndRebuilt
    );
    assert!(!fl.resize_pending());
    assert_eq!(
        fl.bundle_info().unwrap().extent,
        RenderSize::new(1920, 1080)
    );

    let t = timeline.borrow();
    let present = t.positions(|e| matches!(e, Event::Present(_)))[0];
    let destroy = t.positions(|e| matches!(e, Event::DestroyBundle { .. }))[0];
    assert!(present < destroy);
}

#[test]
fn requested_rebuild_happens_once() {
    let mut host = MockHost::new(800, 600);
    let mut fl = start(MockGpu::new(3), 2, &mut host);
    fl.request_rebuild();
    assert_eq!(
        fl.render_frame(&mut host).unwrap(),
        FrameStatus::PresentedAndRebuilt
    );
    assert_eq!(fl.render_frame(&mut host).unwrap(), FrameStatus::Presented);
    assert_eq!(fl.rebuilds(), 1);
}

#[test]
fn acquire_failure_is_fatal() {
    let mut gpu = MockGpu::new(3);
    gpu.acquire_script.push_back(ScriptedAcquire::Fail);
    let timeline = gpu.timeline();
    let mut host = MockHost::new(800, 600);
    let mut fl = start(gpu, 2, &mut host);

    let err = fl.render_frame(&mut host).unwrap_err();
    assert!(format!("{err:#}").contains("ERROR_DEVICE_LOST"));
    assert_eq!(fl.current_frame(), 0);
    assert_eq!(timeline.borrow().submissions(), 0);
}

#[test]
fn failed_rebuild_leaves_no_bundle() {
    let mut gpu = MockGpu::new(3);
    gpu.acquire_script.push_back(ScriptedAcquire::OutOfDate);
    let timeline = gpu.timeline();
    let mut host = MockHost::new(800, 600);
    let mut fl = start(gpu, 2, &mut host);
    fl.backend_mut().fail_next_bundle = true;

    assert!(fl.render_frame(&mut host).is_err());
    assert!(fl.bundle_info().is_none());
    assert_eq!(timeline.borrow().live_bundles, 0);

    let err = fl.render_frame(&mut host).unwrap_err();
    assert_eq!(err.downcast_ref::<RenderError>(), Some(&RenderError::NoBundle));
}

#[test]
fn failed_rebuild_after_present_is_not_retried() {
    let gpu = MockGpu::new(3);
    let timeline = gpu.timeline();
    let mut host = MockHost::new(800, 600);
    let mut fl = start(gpu, 2, &mut host);
    host.resized = true;
    fl.backend_mut().fail_next_bundle = true;

    assert!(fl.render_frame(&mut host).is_err());
    assert!(fl.bundle_info().is_none());
    assert_eq!(fl.frames_submitted(), 1);
    // The frame was submitted, so the slot still moved on.
    assert_eq!(fl.current_frame(), 1);

    for _ in 0..2 {
        let err = fl.render_frame(&mut host).unwrap_err();
        assert_eq!(err.downcast_ref::<RenderError>(), Some(&RenderError::NoBundle));
    }
    let t = timeline.borrow();
    assert_eq!(t.live_bundles, 0);
    assert_eq!(
        t.positions(|e| matches!(e, Event::CreateBundle { .. })).len(),
        1
    );
}

#[test]
fn acquire_rebuild_absorbs_a_queued_resize() {
    let mut gpu = MockGpu::new(3);
    gpu.acquire_script.push_back(ScriptedAcquire::OutOfDate);
    let mut host = MockHost::new(800, 600);
    let mut fl = start(gpu, 2, &mut host);
    host.resized = true;
    host.size = RenderSize::new(1280, 720);

    assert_eq!(fl.render_frame(&mut host).unwrap(), FrameStatus::Rebuilt);
    assert_eq!(fl.render_frame(&mut host).unwrap(), FrameStatus::Presented);
    assert_eq!(fl.rebuilds(), 1);
    assert_eq!(fl.bundle_info().unwrap().extent, RenderSize::new(1280, 720));
}

#[test]
fn inconsistent_bundle_is_rejected() {
    let gpu = MockGpu::new(3);
    let timeline = gpu.timeline();
    let mut host = MockHost::new(800, 600);
    let mut fl = start(gpu, 2, &mut host);
    fl.backend_mut().mismatch_next_bundle = true;

    let err = fl.rebuild_swapchain(&mut host).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<RenderError>(),
        Some(RenderError::BundleMismatch {
            images: 3,
            framebuffers: 2,
            ..
        })
    ));
    assert!(fl.bundle_info().is_none());
    assert_eq!(timeline.borrow().live_bundles, 0);
}

#[test]
fn frames_in_flight_must_be_in_range() {
    for bad in [0, 5] {
        let mut host = MockHost::new(800, 600);
        let err = FrameLoop::new(MockGpu::new(3), bad, &mut host)
            .err()
            .expect("should be rejected");
        assert_eq!(
            err.downcast_ref::<RenderError>(),
            Some(&RenderError::InvalidFramesInFlight {
                requested: bad,
                max: 4
            })
        );
    }
}

#[test]
fn startup_while_minimized_builds_on_first_frame() {
    let gpu = MockGpu::new(3);
    let timeline = gpu.timeline();
    let mut host = MockHost::new(0, 0);
    host.close_after_polls = Some(1);

    let mut fl = start(gpu, 2, &mut host);
    assert!(fl.bundle_info().is_none());
    assert!(fl.resize_pending());

    host.closing = false;
    host.close_after_polls = None;
    host.size = RenderSize::new(640, 480);
    assert_eq!(fl.render_frame(&mut host).unwrap(), FrameStatus::Rebuilt);
    assert_eq!(fl.bundle_info().unwrap().extent, RenderSize::new(640, 480));
    assert_eq!(fl.render_frame(&mut host).unwrap(), FrameStatus::Presented);
    assert!(timeline.borrow().violations.is_empty());
}

#[test]
fn teardown_releases_everything() {
    let gpu = MockGpu::new(3);
    let timeline = gpu.timeline();
    let mut host = MockHost::new(800, 600);
    let mut fl = start(gpu, 2, &mut host);
    for _ in 0..5 {
        fl.render_frame(&mut host).unwrap();
    }
    drop(fl);

    let t = timeline.borrow();
    assert_eq!(t.live_bundles, 0);
    assert_eq!(t.fences_created(), 2);
    assert_eq!(t.fences_alive(), 0);
    assert_eq!(t.semaphores_created, 4);
    assert_eq!(t.semaphores_destroyed, 4);
    assert_eq!(t.outstanding(), 0);
    assert!(t.violations.is_empty(), "{:?}", t.violations);

    let last_idle = *t.positions(|e| *e == Event::WaitIdle).last().unwrap();
    let last_destroy = *t
        .positions(|e| matches!(e, Event::DestroyBundle { .. }))
        .last()
        .unwrap();
    assert!(last_idle < last_destroy);
}
