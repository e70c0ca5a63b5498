mod common;

use std::fs;

use cltrace::capture;
use cltrace::cl::{ImageDesc, ImageFormat, MapFlags, MemFlags, MemObjectType};
use cltrace::metadata::TraceJson;
use cltrace::param::ParamValue;
use cltrace::prune::{self, Decision};
use cltrace::{CaptureSession, Handle, ImageInfo, PruneMode, ResourceKind};

use common::{config, names, MockCl, CONTEXT, DEVICE};

fn kernel_launch(q: Handle, kernel: Handle) -> cltrace::CallCapture {
    capture::enqueue_nd_range_kernel(q, kernel, None, &[64], None, &[], None, 0)
}

#[test]
fn buffer_written_before_the_window_is_restored_by_one_write() {
    let dir = tempfile::tempdir().unwrap();
    let mut cl = MockCl::new();
    let mut s = CaptureSession::new(config(&dir, 3, 3)).unwrap();

    // Frame 1: objects.
    let q = cl.create_queue(CONTEXT);
    s.capture_call(&mut cl, capture::create_command_queue(CONTEXT, DEVICE, 0, q)).unwrap();
    let buf = cl.create_buffer(vec![0; 16]);
    s.capture_call(&mut cl, capture::create_buffer(CONTEXT, MemFlags::READ_WRITE, 16, None, buf))
        .unwrap();
    let program = cl.create();
    s.capture_call(&mut cl, capture::create_program_with_source(CONTEXT, &["kernel void k(global int *p) {}"], program))
        .unwrap();
    let kernel = cl.create();
    s.capture_call(&mut cl, capture::create_kernel(program, "k", kernel)).unwrap();
    s.capture_call(&mut cl, capture::set_kernel_arg(kernel, 0, 8, Some(&buf.0.to_le_bytes()[..]), 0))
        .unwrap();
    s.capture_call(&mut cl, kernel_launch(q, kernel)).unwrap();
    assert_eq!(s.frame(), 2);

    // Frame 2: the application uploads data.
    let data: Vec<u8> = (1..=16).collect();
    cl.write(buf, 0, &data);
    s.capture_call(&mut cl, capture::enqueue_write_buffer(q, buf, true, 0, &data, &[], None, 0))
        .unwrap();
    s.capture_call(&mut cl, kernel_launch(q, kernel)).unwrap();
    assert_eq!(s.frame(), 3);
    assert_eq!(cl.reads, 1);

    let setup = s.setup_calls();
    assert_eq!(
        names(setup),
        [
            "clCreateCommandQueue",
            "clCreateBuffer",
            "clCreateProgramWithSource",
            "clCreateKernel",
            "clSetKernelArg",
            "clEnqueueWriteBuffer",
        ]
    );
    let restore = &setup[5];
    assert_eq!(restore.handle_param("buffer", 1).unwrap(), buf);
    assert_eq!(restore.param("ptr", 5).unwrap().payload.as_deref(), Some(&data[..]));
    // The implicit retain is gone once the contents are captured.
    assert_eq!(cl.refs(buf), 1);

    // Frame 3: the captured frame.
    s.capture_call(&mut cl, capture::enqueue_read_buffer(q, buf, true, 0, 16, 0x7000, &[], None, 0))
        .unwrap();
    s.capture_call(&mut cl, kernel_launch(q, kernel)).unwrap();
    assert!(s.is_finished());

    let out = dir.path();
    for file in ["app_frame001.cpp", "app.h", "app.cpp", "app.json", "app_OpenCL_info.json", "app.cltrace.bin.lz4"] {
        assert!(out.join(file).exists(), "{file} missing");
    }
    let frame = fs::read_to_string(out.join("app_frame001.cpp")).unwrap();
    assert!(frame.contains("ReplayFrame1"));
    assert!(frame.contains("clEnqueueReadBuffer"));
    assert!(frame.contains("clEnqueueNDRangeKernel"));
    let source = fs::read_to_string(out.join("app.cpp")).unwrap();
    assert!(source.contains("SetupFirstFrame"));
    assert_eq!(source.matches("clEnqueueWriteBuffer").count(), 1);

    let meta = TraceJson::read(out.join("app.json")).unwrap();
    assert_eq!(meta.trace_metadata.frame_start, 3);
    assert_eq!(meta.trace_metadata.frame_end, 3);
    assert!(meta.trace_metadata.is_binary_data_compressed);
    assert_eq!(meta.resource_capacities["clMemMap"], 1);
    assert!(meta.trace_files.contains(&"app_frame001.cpp".to_owned()));

    // Calls after the last frame are ignored.
    s.capture_call(&mut cl, capture::finish(q, 0)).unwrap();
    assert!(s.frame_calls().is_empty());
}

#[test]
fn packed_image_is_restored_with_derived_pitches() {
    let dir = tempfile::tempdir().unwrap();
    let mut cl = MockCl::new();
    let mut s = CaptureSession::new(config(&dir, 2, 2)).unwrap();

    let q = cl.create_queue(CONTEXT);
    s.capture_call(&mut cl, capture::create_command_queue(CONTEXT, DEVICE, 0, q)).unwrap();
    let info = ImageInfo {
        ty: MemObjectType::Image2D,
        width: 4,
        height: 2,
        depth: 0,
        array_size: 0,
        element_size: 4,
        row_pitch: 0,
        slice_pitch: 0,
    };
    let image = cl.create_image(info, vec![9; 32]);
    let format = ImageFormat {
        channel_order: 0x10B5,
        channel_data_type: 0x10D2,
    };
    let desc = ImageDesc {
        image_type: MemObjectType::Image2D,
        width: 4,
        height: 2,
        depth: 0,
        array_size: 0,
        row_pitch: 0,
        slice_pitch: 0,
        num_mip_levels: 0,
        num_samples: 0,
        mem_object: Handle::NULL,
    };
    s.capture_call(&mut cl, capture::create_image(CONTEXT, MemFlags::READ_WRITE, format, &desc, None, image))
        .unwrap();
    s.capture_call(&mut cl, kernel_launch(q, Handle(0x4e))).unwrap();

    let write = s
        .setup_calls()
        .iter()
        .find(|c| c.name() == "clEnqueueWriteImage")
        .expect("image snapshot");
    assert_eq!(write.scalar_param("input_row_pitch", 5).unwrap(), 16);
    assert_eq!(write.scalar_param("input_slice_pitch", 6).unwrap(), 0);
    assert_eq!(write.param("ptr", 7).unwrap().payload.as_ref().map(|p| p.len()), Some(32));
}

#[test]
fn released_event_leaves_the_other_waits_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let mut cl = MockCl::new();
    let mut s = CaptureSession::new(config(&dir, 2, 2)).unwrap();

    let q = cl.create_queue(CONTEXT);
    s.capture_call(&mut cl, capture::create_command_queue(CONTEXT, DEVICE, 0, q)).unwrap();
    let buf = cl.create_buffer(vec![0; 16]);
    s.capture_call(&mut cl, capture::create_buffer(CONTEXT, MemFlags::READ_WRITE, 16, None, buf))
        .unwrap();
    let events: Vec<Handle> = (0..3).map(|_| cl.create()).collect();
    for &e in &events {
        s.capture_call(&mut cl, capture::create_user_event(CONTEXT, e)).unwrap();
    }
    s.capture_call(
        &mut cl,
        capture::enqueue_map_buffer(q, buf, true, MapFlags::READ, 0, 16, &events, None, 0x7000),
    )
    .unwrap();

    cl.app_release(events[1]);
    s.capture_call(&mut cl, capture::release(ResourceKind::Event, events[1], 0).unwrap())
        .unwrap();

    let calls = s.frame_calls();
    assert_eq!(
        names(calls),
        [
            "clCreateCommandQueue",
            "clCreateBuffer",
            "clCreateUserEvent",
            "clCreateUserEvent",
            "clEnqueueMapBuffer",
        ]
    );
    let map = &calls[4];
    let waits = map.param("event_wait_list", 7).unwrap();
    assert_eq!(waits.handles(), [events[0], events[2]]);
    assert_eq!(s.tracker().vector(waits.id).map(<[usize]>::len), Some(2));
    assert_eq!(map.param("num_events_in_wait_list", 6).unwrap().value, ParamValue::U32(2));
}

#[test]
fn parent_buffer_outlives_its_release_while_a_sub_buffer_exists() {
    let dir = tempfile::tempdir().unwrap();
    let mut cl = MockCl::new();
    let mut s = CaptureSession::new(config(&dir, 5, 5)).unwrap();

    let parent = cl.create_buffer(vec![0; 64]);
    s.capture_call(&mut cl, capture::create_buffer(CONTEXT, MemFlags::READ_WRITE, 64, None, parent))
        .unwrap();
    let child = cl.create_sub_buffer(parent, 16, 16);
    let region = cltrace::cl::BufferRegion { origin: 16, size: 16 };
    s.capture_call(&mut cl, capture::create_sub_buffer(parent, MemFlags::READ_WRITE, region, child))
        .unwrap();

    cl.app_release(parent);
    s.capture_call(&mut cl, capture::release(ResourceKind::Mem, parent, 0).unwrap()).unwrap();
    assert!(cl.is_alive(parent));
    assert!(s.tracker().contains(ResourceKind::Mem, parent));
    assert_eq!(
        names(s.frame_calls()),
        ["clCreateBuffer", "clCreateSubBuffer", "clReleaseMemObject"]
    );

    cl.app_release(child);
    s.capture_call(&mut cl, capture::release(ResourceKind::Mem, child, 0).unwrap()).unwrap();
    assert!(s.frame_calls().is_empty());
    assert!(!cl.is_alive(child));
    assert!(!cl.is_alive(parent));
    assert!(!s.tracker().contains(ResourceKind::Mem, parent));
    assert!(s.snapshot().dirty_mems().is_empty());
}

#[test]
fn dead_producer_of_a_waited_event_becomes_a_user_event() {
    let dir = tempfile::tempdir().unwrap();
    let mut cl = MockCl::new();
    let mut s = CaptureSession::new(config(&dir, 5, 5)).unwrap();

    let q = cl.create_queue(CONTEXT);
    s.capture_call(&mut cl, capture::create_command_queue(CONTEXT, DEVICE, 0, q)).unwrap();
    let doomed = cl.create_buffer(vec![0; 8]);
    s.capture_call(&mut cl, capture::create_buffer(CONTEXT, MemFlags::READ_WRITE, 8, None, doomed))
        .unwrap();
    let kept = cl.create_buffer(vec![0; 8]);
    s.capture_call(&mut cl, capture::create_buffer(CONTEXT, MemFlags::READ_WRITE, 8, None, kept))
        .unwrap();

    let mapped = cl.create();
    s.capture_call(
        &mut cl,
        capture::enqueue_map_buffer(q, doomed, true, MapFlags::READ, 0, 8, &[], Some(mapped), 0x7000),
    )
    .unwrap();
    s.capture_call(&mut cl, capture::enqueue_unmap_mem_object(q, doomed, 0x7000, &[], None, 0))
        .unwrap();
    s.capture_call(
        &mut cl,
        capture::enqueue_map_buffer(q, kept, true, MapFlags::READ, 0, 8, &[mapped], None, 0x7100),
    )
    .unwrap();

    cl.app_release(doomed);
    s.capture_call(&mut cl, capture::release(ResourceKind::Mem, doomed, 0).unwrap()).unwrap();

    let calls = s.frame_calls();
    assert_eq!(
        names(calls),
        [
            "clCreateCommandQueue",
            "clCreateBuffer",
            "clCreateUserEvent",
            "clSetUserEventStatus",
            "clEnqueueMapBuffer",
        ]
    );
    assert_eq!(calls[2].returned_handle(), Some(mapped));
    assert_eq!(calls[4].param("event_wait_list", 7).unwrap().handles(), [mapped]);
    assert!(calls.iter().all(|c| prune::decide(c, ResourceKind::Mem, doomed) == Decision::Keep));

    // A second pass finds nothing left to do.
    let mut again = calls.to_vec();
    let mut tracker = s.tracker().clone();
    let stats = prune::prune_resource(
        &mut again,
        ResourceKind::Mem,
        doomed,
        PruneMode::Remove,
        &mut tracker,
        &|_| Some(CONTEXT),
    );
    assert!(!stats.changed());
    assert_eq!(again.len(), calls.len());
}

#[test]
fn deactivate_mode_keeps_dead_calls_for_the_inactive_setup() {
    let dir = tempfile::tempdir().unwrap();
    let mut cl = MockCl::new();
    let mut cfg = config(&dir, 2, 2);
    cfg.prune = Some(PruneMode::Deactivate);
    cfg.emit_inactive = true;
    let mut s = CaptureSession::new(cfg).unwrap();

    let q = cl.create_queue(CONTEXT);
    s.capture_call(&mut cl, capture::create_command_queue(CONTEXT, DEVICE, 0, q)).unwrap();
    let buf = cl.create_buffer(vec![0; 8]);
    s.capture_call(&mut cl, capture::create_buffer(CONTEXT, MemFlags::READ_WRITE, 8, None, buf))
        .unwrap();
    cl.app_release(buf);
    s.capture_call(&mut cl, capture::release(ResourceKind::Mem, buf, 0).unwrap()).unwrap();
    s.capture_call(&mut cl, kernel_launch(q, Handle(0x4e))).unwrap();

    let setup = s.setup_calls();
    assert_eq!(names(setup), ["clCreateCommandQueue", "clCreateBuffer", "clReleaseMemObject"]);
    assert!(setup[0].is_active);
    assert!(!setup[1].is_active && !setup[2].is_active);

    s.end_capture(&mut cl).unwrap();
    let source = fs::read_to_string(dir.path().join("app.cpp")).unwrap();
    assert!(source.contains("SetupFirstFrameInactive"));
}

#[test]
fn early_exit_writes_the_frame_in_progress() {
    let dir = tempfile::tempdir().unwrap();
    let mut cl = MockCl::new();
    let mut s = CaptureSession::new(config(&dir, 1, 5)).unwrap();

    let q = cl.create_queue(CONTEXT);
    s.capture_call(&mut cl, capture::create_command_queue(CONTEXT, DEVICE, 0, q)).unwrap();
    s.capture_call(&mut cl, kernel_launch(q, Handle(0x4e))).unwrap();
    s.capture_call(&mut cl, capture::finish(q, 0)).unwrap();
    s.end_capture(&mut cl).unwrap();

    assert!(s.is_finished());
    assert!(dir.path().join("app_frame002.cpp").exists());
    assert!(!dir.path().join("app_frame003.cpp").exists());
    let meta = TraceJson::read(dir.path().join("app.json")).unwrap();
    assert_eq!(meta.trace_metadata.frame_end, 2);
    assert_eq!(meta.binary_metadata.block_size, 1 << 12);
}

#[test]
fn exit_before_the_window_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut cl = MockCl::new();
    let mut s = CaptureSession::new(config(&dir, 3, 4)).unwrap();
    let buf = cl.create_buffer(vec![0; 8]);
    s.capture_call(&mut cl, capture::create_buffer(CONTEXT, MemFlags::READ_WRITE, 8, None, buf))
        .unwrap();
    assert_eq!(cl.refs(buf), 2);
    s.end_capture(&mut cl).unwrap();
    assert_eq!(cl.refs(buf), 1);
    assert!(!dir.path().join("app.json").exists());
}
