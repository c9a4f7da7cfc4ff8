//! End-to-end scenarios exercising the public `Tracer` facade together with
//! the lower-level lane/backpressure/selective-persistence types directly,
//! covering the cross-component behaviors a single unit test can't reach.

use adatrace_core::atf::{self, AtfFooter, AtfKind, AtfWriter};
use adatrace_core::backpressure::{BackpressureConfig, BackpressureController, BackpressureLevel, DropPolicy};
use adatrace_core::config::TracerConfig;
use adatrace_core::event::{DetailEvent, EventKind, IndexEvent};
use adatrace_core::lane::Lane;
use adatrace_core::marking::{MarkTarget, MarkingPolicy, MarkingRule, MatchKind, Probe};
use adatrace_core::selective::{SelectivePersistenceController, WindowMetadata};
use adatrace_core::shutdown::ShutdownCoordinator;
use adatrace_core::Tracer;
use std::sync::Arc;
use tempfile::tempdir;

fn read_whole(path: &std::path::Path) -> Vec<u8> {
    std::fs::read(path).unwrap()
}

#[test]
fn single_thread_detail_off_produces_exact_index_footer_and_empty_detail() {
    let dir = tempdir().unwrap();
    let mut config = TracerConfig::default();
    config.session_root = dir.path().to_path_buf();
    let tracer = Tracer::start(config, 100, "single-thread".into(), 0).unwrap();

    let handle = tracer.register_thread(7, 0).unwrap();
    let slot = handle.slot_index();
    for i in 0..1000u64 {
        let ts = 1000 + i * 100;
        handle.record(EventKind::Call, 0x1_0000_0001, 0, ts, None);
    }
    handle.unregister();

    let summary = tracer.shutdown(|| 200_000);
    assert!(summary.files_finalized >= 2);

    let index_bytes = read_whole(&tracer.index_path(slot));
    let footer_start = index_bytes.len() - atf::FOOTER_SIZE;
    assert!(AtfFooter::magic_matches(&index_bytes[footer_start..], AtfKind::Index));
    let footer = AtfFooter::decode(&index_bytes[footer_start..]).unwrap();
    assert_eq!(footer.event_count, 1000);

    let body = &index_bytes[atf::HEADER_SIZE..footer_start];
    assert_eq!(body.len(), 1000 * adatrace_core::event::INDEX_EVENT_SIZE);
    let first = IndexEvent::decode(&body[0..adatrace_core::event::INDEX_EVENT_SIZE]).unwrap();
    assert_eq!(first.timestamp_ns, 1000);
    assert_eq!(first.thread_id, 7);
    assert!(!first.has_detail());

    let detail_bytes = read_whole(&tracer.detail_path(slot));
    let detail_footer_start = detail_bytes.len() - atf::FOOTER_SIZE;
    let detail_footer = AtfFooter::decode(&detail_bytes[detail_footer_start..]).unwrap();
    assert_eq!(detail_footer.event_count, 0, "detail disabled globally: no detail records");
}

#[test]
fn paired_index_and_detail_events_link_both_directions() {
    let dir = tempdir().unwrap();
    let mut config = TracerConfig::default();
    config.session_root = dir.path().to_path_buf();
    let tracer = Tracer::start(config, 101, "bidirectional".into(), 0).unwrap();

    let handle = tracer.register_thread(3, 0).unwrap();
    let slot = handle.slot_index();
    for i in 0..100u64 {
        handle.record(EventKind::Call, 0x2000, 0, i, Some(&[i as u8; 4]));
    }
    handle.unregister();
    tracer.shutdown(|| 1);

    let index_bytes = read_whole(&tracer.index_path(slot));
    let detail_bytes = read_whole(&tracer.detail_path(slot));
    let index_footer = AtfFooter::decode(&index_bytes[index_bytes.len() - atf::FOOTER_SIZE..]).unwrap();
    let detail_footer = AtfFooter::decode(&detail_bytes[detail_bytes.len() - atf::FOOTER_SIZE..]).unwrap();
    assert_eq!(index_footer.event_count, 100);
    assert_eq!(detail_footer.event_count, 100);

    let index_body = &index_bytes[atf::HEADER_SIZE..index_bytes.len() - atf::FOOTER_SIZE];
    for i in 0..100usize {
        let start = i * adatrace_core::event::INDEX_EVENT_SIZE;
        let ev = IndexEvent::decode(&index_body[start..start + adatrace_core::event::INDEX_EVENT_SIZE]).unwrap();
        assert_eq!(ev.detail_seq, i as u32, "index[{i}].detail_seq must equal i");
    }

    let detail_body = &detail_bytes[atf::HEADER_SIZE..detail_bytes.len() - atf::FOOTER_SIZE];
    let slot_width = detail_body.len() / 100;
    for i in 0..100usize {
        let start = i * slot_width;
        let ev = DetailEvent::decode(&detail_body[start..start + slot_width]).unwrap();
        assert_eq!(ev.index_seq, i as u32, "detail[{i}].index_seq must equal i");
    }
}

#[test]
fn sustained_overload_with_drop_oldest_stays_bounded_and_keeps_newest() {
    let lane = Lane::index_lane(64, 8);
    let ctrl = BackpressureController::new(BackpressureConfig {
        pressure_ratio: 0.5,
        recovery_ratio: 0.75,
        policy: DropPolicy::DropOldest,
        ..BackpressureConfig::default()
    });

    let mut saw_dropping = false;
    for i in 0..10_000u64 {
        let record = i.to_le_bytes();
        if lane.write(&record).is_err() {
            // The state machine walks one edge per call, so pump it
            // through Normal -> Pressure -> Dropping before giving up.
            let mut level = ctrl.check_exhaustion(&lane, i);
            if level != BackpressureLevel::Dropping {
                level = ctrl.check_exhaustion(&lane, i);
            }
            if level == BackpressureLevel::Dropping {
                saw_dropping = true;
                ctrl.apply_drop_policy(&lane, record.len() as u64, i);
            }
            lane.write(&record).expect("drop-oldest must free exactly one slot");
        }
    }

    assert!(saw_dropping, "10k events into a 64-slot active ring must hit Dropping");
    assert!(ctrl.records_dropped() > 0);
    assert!(lane.pool().active_ring().len() <= lane.pool().active_ring().capacity());

    let mut seen = Vec::new();
    lane.pool().active_ring().drain(|r| seen.push(u64::from_le_bytes(r.try_into().unwrap())));
    let mut dedup = seen.clone();
    dedup.sort_unstable();
    dedup.dedup();
    assert_eq!(seen.len(), dedup.len(), "a ring must never hold the same logical slot twice");
    assert_eq!(*seen.last().unwrap(), 9999, "the newest event must survive drop-oldest");
}

#[test]
fn drop_newest_policy_makes_generated_equal_written_plus_dropped() {
    let lane = Lane::index_lane(4, 8);
    let ctrl = BackpressureController::new(BackpressureConfig {
        policy: DropPolicy::DropNewest,
        ..BackpressureConfig::default()
    });

    let mut generated = 0u64;
    for i in 0..500u64 {
        let record = i.to_le_bytes();
        generated += 1;
        if lane.write(&record).is_err() {
            let mut level = ctrl.check_exhaustion(&lane, i);
            if level != BackpressureLevel::Dropping {
                level = ctrl.check_exhaustion(&lane, i);
            }
            if level == BackpressureLevel::Dropping {
                ctrl.apply_drop_policy(&lane, record.len() as u64, i);
            }
        }
    }

    assert_eq!(generated, lane.written() + lane.dropped());
    assert!(lane.dropped() > 0, "a 4-ring pool cannot hold 500 eight-byte records");
}

#[test]
fn drop_oldest_policy_makes_generated_equal_written_plus_dropped() {
    let lane = Lane::index_lane(4, 8);
    let ctrl = BackpressureController::new(BackpressureConfig {
        policy: DropPolicy::DropOldest,
        ..BackpressureConfig::default()
    });

    let mut generated = 0u64;
    for i in 0..500u64 {
        let record = i.to_le_bytes();
        generated += 1;
        if lane.write(&record).is_err() {
            let mut level = ctrl.check_exhaustion(&lane, i);
            if level != BackpressureLevel::Dropping {
                level = ctrl.check_exhaustion(&lane, i);
            }
            if level == BackpressureLevel::Dropping {
                ctrl.apply_drop_policy(&lane, record.len() as u64, i);
            }
            lane.write(&record).expect("drop-oldest must free exactly one slot");
        }
    }

    // Drop-oldest reclassifies a written record as dropped instead of
    // double-counting it, so the invariant must hold exactly here too.
    assert_eq!(generated, lane.written() + lane.dropped());
    assert!(lane.dropped() > 0, "a 4-ring pool cannot hold 500 eight-byte records");
}

#[test]
fn concurrent_shutdown_requests_execute_teardown_exactly_once() {
    let coordinator = Arc::new(ShutdownCoordinator::new(8).unwrap());
    let mut handles = Vec::new();
    for _ in 0..10 {
        let c = Arc::clone(&coordinator);
        handles.push(std::thread::spawn(move || c.request_shutdown()));
    }
    for h in handles {
        h.join().unwrap();
    }
    assert!(coordinator.is_requested());

    let registry = adatrace_core::registry::ThreadRegistry::new(2, 2, 4, 4);
    struct NullSink;
    impl adatrace_core::drain::DrainSink for NullSink {
        fn consume_index(&mut self, _thread_id: u32, _record: &[u8]) {}
        fn consume_detail(&mut self, _thread_id: u32, _record: &[u8]) {}
    }
    let mut sink = NullSink;
    let first = coordinator.execute_shutdown(&registry, &mut sink, || 1);
    let second = coordinator.execute_shutdown(&registry, &mut sink, || 2);
    assert_eq!(second.rings_drained, 0);
    assert_eq!(second.index_records, 0);
    assert_eq!(first.timed_out, false);
}

#[test]
fn missing_footer_recovers_true_record_count_by_rescan() {
    let dir = tempdir().unwrap();
    let mut config = TracerConfig::default();
    config.session_root = dir.path().to_path_buf();
    let tracer = Tracer::start(config, 102, "crash-like".into(), 0).unwrap();

    let handle = tracer.register_thread(9, 0).unwrap();
    let slot = handle.slot_index();
    for i in 0..100u64 {
        handle.record(EventKind::Call, 1, 0, i, None);
    }
    handle.unregister();
    tracer.drain_once();
    // No shutdown/finalize call: simulates the process dying before the footer lands.

    let bytes = read_whole(&tracer.index_path(slot));
    let footer_start = bytes.len().saturating_sub(atf::FOOTER_SIZE);
    assert!(!AtfFooter::magic_matches(&bytes[footer_start..], AtfKind::Index));
    assert_eq!(atf::recover_index_records(&bytes), 100);
}

#[test]
fn selective_persistence_dumps_marked_window_and_discards_unmarked() {
    let dir = tempdir().unwrap();
    let ctrl = SelectivePersistenceController::new();

    let policy = MarkingPolicy::new(vec![MarkingRule::new(MarkTarget::Symbol, MatchKind::Literal, "hot_path")]);
    let probe = Probe::new("crate::hot_path::call", None, "ok");

    let lane_a = Lane::detail_lane(2, 32);
    let window_a = ctrl.start_new_window(1, 0);
    lane_a.write_padded(&[1; 32]).unwrap();
    assert!(ctrl.mark_event(&lane_a, &policy, &probe));
    lane_a.write_padded(&[2; 32]).unwrap();
    let _ = lane_a.pool().swap_active(); // first swap: spare ring, not yet exhausted
    lane_a.write_padded(&[3; 32]).unwrap();
    let _ = lane_a.pool().swap_active(); // second swap exhausts the 2-ring pool
    assert!(ctrl.should_dump(&lane_a));
    let window_a = ctrl.close_window_for_dump(window_a);

    let meta_path = dir.path().join("window_metadata.jsonl");
    let mut meta_file = std::fs::File::create(&meta_path).unwrap();
    ctrl.write_window_metadata(
        &mut meta_file,
        &WindowMetadata {
            window_id: window_a.window_id,
            thread_id: window_a.thread_id,
            ring_index: window_a.first_ring,
            dump_reason: "mark_seen_and_pool_exhausted",
        },
    )
    .unwrap();
    let window_a = ctrl.mark_dump_complete(window_a);
    assert_eq!(window_a.state, adatrace_core::selective::WindowState::Dumped);

    let lane_b = Lane::detail_lane(2, 32);
    let window_b = ctrl.start_new_window(2, 0);
    lane_b.write_padded(&[9; 32]).unwrap();
    let _ = lane_b.pool().swap_active();
    assert!(!ctrl.should_dump(&lane_b), "window B saw no mark");
    let window_b = ctrl.discard_window(window_b);
    assert_eq!(window_b.state, adatrace_core::selective::WindowState::Discarded);

    assert_eq!(ctrl.windows_dumped(), 1);
    assert_eq!(ctrl.windows_discarded(), 1);

    let metadata_text = std::fs::read_to_string(&meta_path).unwrap();
    assert_eq!(metadata_text.lines().count(), 1, "only the dumped window gets a metadata line");
    assert!(metadata_text.contains("\"dump_reason\":\"mark_seen_and_pool_exhausted\""));
}

#[test]
fn per_thread_timestamps_stay_non_decreasing_in_production_order() {
    let dir = tempdir().unwrap();
    let mut config = TracerConfig::default();
    config.session_root = dir.path().to_path_buf();
    let tracer = Tracer::start(config, 103, "monotonic".into(), 0).unwrap();

    let handle = tracer.register_thread(5, 0).unwrap();
    let slot = handle.slot_index();
    let mut ts = 0u64;
    for i in 0..200u64 {
        ts += (i % 7) + 1;
        handle.record(EventKind::Return, 1, 0, ts, None);
    }
    handle.unregister();
    tracer.shutdown(|| ts + 1);

    let bytes = read_whole(&tracer.index_path(slot));
    let body = &bytes[atf::HEADER_SIZE..bytes.len() - atf::FOOTER_SIZE];
    let mut last = 0u64;
    for chunk in body.chunks_exact(adatrace_core::event::INDEX_EVENT_SIZE) {
        let ev = IndexEvent::decode(chunk).unwrap();
        assert!(ev.timestamp_ns >= last, "timestamps went backward");
        last = ev.timestamp_ns;
    }
}

#[test]
fn empty_session_still_produces_valid_headers_and_footers() {
    let dir = tempdir().unwrap();
    let mut config = TracerConfig::default();
    config.session_root = dir.path().to_path_buf();
    let tracer = Tracer::start(config, 104, "empty".into(), 0).unwrap();

    let handle = tracer.register_thread(1, 0).unwrap();
    let slot = handle.slot_index();
    handle.unregister();
    tracer.shutdown(|| 0);

    let bytes = read_whole(&tracer.index_path(slot));
    assert_eq!(bytes.len(), atf::HEADER_SIZE + atf::FOOTER_SIZE);
    let footer = AtfFooter::decode(&bytes[atf::HEADER_SIZE..]).unwrap();
    assert_eq!(footer.event_count, 0);
}

#[test]
fn ring_buffer_boundary_writes_around_capacity() {
    use adatrace_core::ring_buffer::RingBuffer;
    let ring = RingBuffer::new(16, 4);
    for i in 0..15u8 {
        ring.write(&[i; 4]).unwrap();
    }
    assert!(!ring.is_full());
    ring.write(&[15; 4]).unwrap();
    assert!(ring.is_full());
    assert!(ring.write(&[16; 4]).is_err(), "capacity + 1 must fail");
}

#[test]
fn writer_created_without_any_append_still_finalizes() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("untouched.atf");
    let mut writer = AtfWriter::create(&path, AtfKind::Detail, 1, 0).unwrap();
    writer.finalize(1, false).unwrap();
    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(bytes.len(), atf::HEADER_SIZE + atf::FOOTER_SIZE);
}

#[test]
fn control_block_tracks_active_thread_count_then_completes() {
    use adatrace_core::control_block::{ControlBlock, SessionStatus};

    let dir = tempdir().unwrap();
    let mut config = TracerConfig::default();
    config.session_root = dir.path().to_path_buf();
    assert_eq!(config.index_ring_capacity, TracerConfig::default().index_ring_capacity);

    let tracer = Tracer::start(config, 555, "control-block".into(), 10).unwrap();
    assert_eq!(tracer.config().session_root, dir.path());

    let control_path = dir
        .path()
        .join("session_control-block")
        .join("pid_555")
        .join("control.bin");
    let initial = ControlBlock::read_from(&control_path).unwrap().unwrap();
    assert_eq!(initial.status, SessionStatus::Running);
    assert_eq!(initial.active_thread_count, 0);

    let h1 = tracer.register_thread(1, 20).unwrap();
    let h2 = tracer.register_thread(2, 20).unwrap();
    tracer.refresh_control_block(30).unwrap();
    let mid = ControlBlock::read_from(&control_path).unwrap().unwrap();
    assert_eq!(mid.active_thread_count, 2);
    assert_eq!(mid.last_update_ns, 30);

    h1.unregister();
    h2.unregister();
    tracer.shutdown(|| 40);
    let final_block = ControlBlock::read_from(&control_path).unwrap().unwrap();
    assert_eq!(final_block.status, SessionStatus::Completed);
    assert_eq!(final_block.active_thread_count, 0);
}
