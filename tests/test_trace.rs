// tests/test_trace.rs — end-to-end pipeline tests against a real device.
//
// These run with `cargo test --test test_trace -- --include-ignored`.
// They are ignored by default because they need a compute adapter; a
// software rasterizer (llvmpipe) is enough — the pipeline prefers
// CPU-class adapters anyway.

use token_trace::{
    ContourTable, ErrorKind, GrayImage, KernelSource, RgbImage, TimeProfile, TracePipeline,
};

/// Path to the reference kernel shipped in the crate; exercises the
/// file-loading route.
fn reference_kernel_path() -> String {
    concat!(env!("CARGO_MANIFEST_DIR"), "/src/shaders/token_trace.wgsl").to_string()
}

/// 10×10 frame with a 3×3 foreground square at rows 3..=5, cols 3..=5.
fn square_frame() -> GrayImage {
    let mut img = GrayImage::new(10, 10);
    for y in 3..=5 {
        for x in 3..=5 {
            img.set(x, y, 255);
        }
    }
    img
}

/// The square's boundary, clockwise from its top-left corner, as the
/// tracer emits it: (row, col) pairs.
const SQUARE_PERIMETER: [(u32, u32); 8] = [
    (3, 3),
    (3, 4),
    (3, 5),
    (4, 5),
    (5, 5),
    (5, 4),
    (5, 3),
    (4, 3),
];

#[test]
#[ignore = "requires a compute adapter"]
fn test_square_contour_end_to_end() {
    let pipeline = TracePipeline::new(reference_kernel_path(), 10, 10, 17, 4)
        .expect("pipeline construction");

    let frame = square_frame();
    let mut debug = RgbImage::new(10, 10);
    let mut table = ContourTable::new(17, 4);

    let profile = pipeline
        .trace(&frame, Some(&mut debug), &mut table)
        .expect("trace");

    // Row 0: N = 16, eight boundary pairs around the square.
    let contour = table.decode_row(0).unwrap().expect("one contour");
    assert_eq!(table.row(0)[0], 16);
    assert_eq!(contour.points, SQUARE_PERIMETER);

    // Every other slot stays zero.
    for row in 1..4 {
        assert_eq!(table.decode_row(row).unwrap(), None, "row {row} not empty");
        assert!(table.row(row).iter().all(|&c| c == 0), "row {row} not zeroed");
    }

    // Debug image: background black, square boundary red, center white.
    assert_eq!(debug.get(0, 0), [0, 0, 0]);
    assert_eq!(debug.get(3, 3), [255, 0, 0]);
    assert_eq!(debug.get(4, 4), [255, 255, 255]);

    // Transfers are host-timed and the kernel ran; durations are sane.
    assert!(profile.upload > 0.0);
    assert!(profile.kernel >= 0.0);
    assert!(profile.download > 0.0);
}

#[test]
#[ignore = "requires a compute adapter"]
fn test_trace_is_reproducible_run_over_run() {
    let pipeline =
        TracePipeline::with_source(KernelSource::builtin(), 10, 10, 17, 4).unwrap();
    let frame = square_frame();

    let mut first = ContourTable::new(17, 4);
    pipeline.trace(&frame, None, &mut first).unwrap();

    for _ in 0..5 {
        let mut again = ContourTable::new(17, 4);
        pipeline.trace(&frame, None, &mut again).unwrap();
        assert_eq!(again, first, "contour table differs between runs");
    }
}

#[test]
#[ignore = "requires a compute adapter"]
fn test_upload_download_round_trip_with_copy_stub() {
    // A stub kernel that copies the binary image verbatim into the
    // contour-table buffer: the downloaded table bytes must equal the
    // uploaded image bytes, proving transfer fidelity through the full
    // pipeline path. 16×16 image = 256 bytes = a 16×4 table of u32.
    let stub = r#"
struct TraceParams {
    img_rows: u32,
    img_cols: u32,
    tbl_rows: u32,
    tbl_cols: u32,
}

@group(0) @binding(0) var<storage, read_write> bin_img: array<u32>;
@group(0) @binding(3) var<uniform> params: TraceParams;
@group(0) @binding(5) var<storage, read_write> ctbl: array<u32>;

@compute @workgroup_size(64)
fn token_trace(@builtin(global_invocation_id) gid: vec3<u32>) {
    let row = gid.x;
    if (row >= params.img_rows) {
        return;
    }
    let words_per_row = params.img_cols / 4u;
    for (var w = 0u; w < words_per_row; w++) {
        ctbl[row * words_per_row + w] = bin_img[row * words_per_row + w];
    }
}
"#;

    let pipeline = TracePipeline::with_source(
        KernelSource::from_string(stub, "copy-stub"),
        16,
        16,
        16,
        4,
    )
    .unwrap();

    let pixels: Vec<u8> = (0..256).map(|i| (i % 251) as u8).collect();
    let frame = GrayImage::from_vec(16, 16, pixels.clone());
    let mut table = ContourTable::new(16, 4);

    pipeline.trace(&frame, None, &mut table).unwrap();
    assert_eq!(table.as_bytes(), &pixels[..], "round-trip mismatch");
}

#[test]
#[ignore = "requires a compute adapter"]
fn test_profile_aggregates_across_frames() {
    let pipeline =
        TracePipeline::with_source(KernelSource::builtin(), 10, 10, 17, 4).unwrap();
    let frame = square_frame();
    let mut table = ContourTable::new(17, 4);

    let profiles: Vec<TimeProfile> = (0..3)
        .map(|_| pipeline.trace(&frame, None, &mut table).unwrap())
        .collect();
    let total: TimeProfile = profiles.iter().copied().sum();

    for p in &profiles {
        assert!(total.upload >= p.upload);
        assert!(total.kernel >= p.kernel);
        assert!(total.download >= p.download);
    }
    assert!(total.total() > 0.0);
}

#[test]
#[ignore = "requires a compute adapter"]
fn test_shape_mismatch_is_checked_at_the_boundary() {
    let pipeline =
        TracePipeline::with_source(KernelSource::builtin(), 10, 10, 17, 4).unwrap();
    let mut table = ContourTable::new(17, 4);

    // Wrong input dimensions.
    let wrong = GrayImage::new(9, 10);
    let err = pipeline.trace(&wrong, None, &mut table).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Dispatch);

    // Wrong debug-image dimensions.
    let frame = square_frame();
    let mut small_debug = RgbImage::new(5, 5);
    let err = pipeline
        .trace(&frame, Some(&mut small_debug), &mut table)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Dispatch);

    // Wrong table dimensions.
    let mut wrong_table = ContourTable::new(17, 8);
    let err = pipeline.trace(&frame, None, &mut wrong_table).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Dispatch);

    // The pipeline still works after rejected calls.
    pipeline.trace(&frame, None, &mut table).unwrap();
}

#[test]
#[ignore = "requires a compute adapter"]
fn test_missing_entry_point_is_build_error() {
    // Valid WGSL, wrong entry-point name: pipeline creation must fail
    // with a build error carrying the driver's diagnostic.
    let src = KernelSource::from_string(
        "@compute @workgroup_size(64)\nfn not_the_entry() {}\n",
        "wrong-entry",
    );
    let err = TracePipeline::with_source(src, 10, 10, 17, 4).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DeviceBuild);
    assert!(!err.to_string().is_empty());
}
