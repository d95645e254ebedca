//! Cross-backend contract tests.
//!
//! Every engine gets the same input and the same operation; the results must
//! agree on everything the shared contract promises: output geometry, alpha
//! handling, analysis within tolerance, and a balanced handle ledger.
//!
//! Run with: cargo test --test compare_backends

use pixelworks::config::VisionConfig;
use pixelworks::imaging::{
    CanvasBackend, CropRect, DetectorCache, ErrorKind, Filter, HandleLedger, ImageProcessor, Library,
    NativeBackend, ProcessingResult, ResizeParams, SoftwareBackend, VisionBackend,
};
use pixelworks::types::PixelBuffer;
use std::sync::Arc;

fn all_backends(ledger: &Arc<HandleLedger>) -> Vec<Box<dyn ImageProcessor>> {
    vec![
        Box::new(CanvasBackend::with_ledger(Arc::clone(ledger))),
        Box::new(VisionBackend::with_ledger(
            Arc::clone(ledger),
            Arc::new(DetectorCache::empty()),
            VisionConfig::default(),
        )),
        Box::new(NativeBackend::with_ledger(Arc::clone(ledger))),
        Box::new(SoftwareBackend::with_ledger(Arc::clone(ledger))),
    ]
}

fn fresh() -> (Arc<HandleLedger>, Vec<Box<dyn ImageProcessor>>) {
    let ledger = Arc::new(HandleLedger::new());
    let backends = all_backends(&ledger);
    (ledger, backends)
}

fn checker(width: u32, height: u32) -> PixelBuffer {
    let mut data = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            let v = if (x / 4 + y / 4) % 2 == 0 { 220 } else { 30 };
            data.extend_from_slice(&[v, 255 - v, 128, 255]);
        }
    }
    PixelBuffer::from_rgba(&data, width, height, 4).unwrap()
}

/// A result is either a well-formed buffer or a non-empty message.
fn assert_well_formed(what: &str, result: ProcessingResult) {
    let lib = result.library;
    match result.outcome {
        Ok(out) => {
            assert!(out.validate().is_ok(), "{lib} {what}: {}x{}x{}", out.width, out.height, out.channels);
            assert!(out.width > 0 && out.height > 0, "{lib} {what}");
        }
        Err(msg) => assert!(!msg.is_empty(), "{lib} {what}: empty error"),
    }
}

fn unsupported(result: &ProcessingResult) -> bool {
    result.error().is_some_and(|e| e.contains("not supported"))
}

fn assert_balanced(ledger: &HandleLedger) {
    let snap = ledger.snapshot();
    assert_eq!(snap.acquired, snap.released, "handles leaked: {snap:?}");
}

#[test]
fn every_backend_reports_its_own_library() {
    let (_, backends) = fresh();
    let names: Vec<Library> = backends.iter().map(|b| b.library()).collect();
    assert_eq!(names, Library::ALL.to_vec());
}

#[test]
fn geometry_operations_agree_on_output_size() {
    let (ledger, backends) = fresh();
    let input = checker(100, 50);
    for backend in &backends {
        let lib = backend.library();

        let resized = backend.resize(&input, &ResizeParams { width: 40, height: 30 });
        let out = resized.data().unwrap_or_else(|| panic!("{lib} resize: {:?}", resized.error()));
        assert_eq!((out.width, out.height), (40, 30), "{lib} resize");

        let cropped = backend.crop(&input, &CropRect { x: 10, y: 5, width: 20, height: 15 });
        let out = cropped.data().unwrap_or_else(|| panic!("{lib} crop: {:?}", cropped.error()));
        assert_eq!((out.width, out.height), (20, 15), "{lib} crop");

        let turned = backend.rotate(&input, 90.0).into_data().unwrap();
        assert_eq!((turned.width, turned.height), (50, 100), "{lib} rotate 90");
        let back = backend.rotate(&turned, -90.0).into_data().unwrap();
        assert_eq!((back.width, back.height), (100, 50), "{lib} rotate back");
    }
    assert_balanced(&ledger);
}

#[test]
fn crop_outside_bounds_fails_everywhere() {
    let (ledger, backends) = fresh();
    let input = checker(8, 8);
    for backend in &backends {
        let result = backend.crop(&input, &CropRect { x: 6, y: 0, width: 4, height: 4 });
        assert!(!result.is_success(), "{} accepted an out-of-bounds crop", backend.library());
        assert_eq!(result.library, backend.library());
    }
    assert_balanced(&ledger);
}

#[test]
fn unsupported_operation_fails_with_a_message() {
    let backend = CanvasBackend::new();
    let result = backend.sharpen(&checker(8, 8), 1.0);
    assert!(!result.is_success());
    assert!(!result.error().unwrap_or_default().is_empty());
    assert_eq!(result.library, Library::Canvas);
}

#[test]
fn analysis_agrees_on_a_solid_colour() {
    let (ledger, backends) = fresh();
    let red = PixelBuffer::filled(10, 10, &[255, 0, 0]).unwrap();
    let mut readings = Vec::new();
    for backend in &backends {
        let lib = backend.library();
        let analysis = backend
            .analyze(&red)
            .into_data()
            .unwrap_or_else(|| panic!("{lib} failed to analyze"));
        assert_eq!(analysis.dimensions.width, 10, "{lib}");
        let top = &analysis.dominant_colors[0];
        assert_eq!(top.hex, "#ff0000", "{lib}");
        assert!((top.percentage - 100.0).abs() < 0.01, "{lib}: {}", top.percentage);
        readings.push((lib, analysis.brightness));
    }
    let (_, first) = readings[0];
    for (lib, brightness) in &readings {
        assert!((brightness - first).abs() < 0.01, "{lib}: {brightness} vs {first}");
    }
    assert_balanced(&ledger);
}

#[test]
fn undeclared_detection_returns_nothing() {
    let (ledger, backends) = fresh();
    let input = checker(16, 16);
    for backend in &backends {
        let caps = backend.capabilities();
        if !caps.face_detection {
            assert!(backend.detect_faces(&input).is_empty(), "{}", backend.library());
        }
        if !caps.object_detection {
            assert!(backend.detect_objects(&input).is_empty(), "{}", backend.library());
        }
    }
    assert_balanced(&ledger);
}

#[test]
fn brightness_and_contrast_extremes() {
    let (ledger, backends) = fresh();
    let white = PixelBuffer::filled(4, 4, &[255, 255, 255, 255]).unwrap();
    for backend in &backends {
        let lib = backend.library();

        let dark = backend.adjust_brightness(&white, -1.0).into_data().unwrap();
        assert_eq!(dark.channels, 4, "{lib}");
        for px in dark.data.chunks_exact(4) {
            assert_eq!(px, [0, 0, 0, 255], "{lib} brightness -1");
        }

        let same = backend.adjust_contrast(&white, 0.0).into_data().unwrap();
        assert_eq!(same.data, white.data, "{lib} contrast 0");
    }
    assert_balanced(&ledger);
}

#[test]
fn failed_acquisition_leaves_the_shared_ledger_balanced() {
    let (ledger, backends) = fresh();
    let input = checker(12, 12);
    for backend in &backends {
        ledger.fail_on_acquire(1);
        let result = backend.resize(&input, &ResizeParams { width: 6, height: 6 });
        let msg = result.error().unwrap_or_default();
        assert!(
            msg.starts_with("failed to acquire") && msg.ends_with("handle"),
            "{}: {msg:?}",
            backend.library()
        );
        assert_balanced(&ledger);
    }

    // Nothing pending: the next round succeeds everywhere.
    for backend in &backends {
        assert!(backend.blur(&input, 1.0).is_success(), "{}", backend.library());
    }
    assert_balanced(&ledger);
    assert_eq!(ledger.outstanding(), 0);
}

#[test]
fn png_written_by_one_backend_loads_in_every_other() {
    let (ledger, backends) = fresh();
    let input = checker(9, 7);
    let png = backends[3]
        .save_image(&input, &pixelworks::imaging::SaveOptions::default())
        .unwrap();
    for backend in &backends {
        let loaded = backend.load_image(&png.clone().into()).unwrap();
        assert_eq!((loaded.width, loaded.height), (9, 7), "{}", backend.library());
    }
    assert_balanced(&ledger);
}

#[test]
fn files_on_disk_load_everywhere_and_missing_files_fail() {
    let (_, backends) = fresh();
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("checker.png");
    let png = backends[0]
        .save_image(&checker(6, 5), &pixelworks::imaging::SaveOptions::default())
        .unwrap();
    std::fs::write(&path, png).unwrap();

    let missing = tmp.path().join("missing.png");
    for backend in &backends {
        let loaded = backend.load_image(&path.clone().into()).unwrap();
        assert_eq!((loaded.width, loaded.height), (6, 5), "{}", backend.library());

        let err = backend.load_image(&missing.clone().into()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LoadFailed, "{}", backend.library());
    }
}

#[test]
fn upscaling_a_solid_colour_changes_nothing() {
    let (ledger, backends) = fresh();
    let inputs = [
        PixelBuffer::filled(2, 2, &[200, 40, 10]).unwrap(),
        PixelBuffer::filled(2, 2, &[10, 120, 250, 255]).unwrap(),
    ];
    for backend in &backends {
        let lib = backend.library();
        for input in &inputs {
            let ch = input.channels as usize;
            let out = backend
                .resize(input, &ResizeParams { width: 8, height: 8 })
                .into_data()
                .unwrap_or_else(|| panic!("{lib} resize"));
            assert_eq!((out.width, out.height, out.channels), (8, 8, input.channels), "{lib}");
            for px in out.data.chunks_exact(ch) {
                assert_eq!(px, &input.data[..ch], "{lib} {ch}-channel upscale");
            }
        }
    }
    assert_balanced(&ledger);
}

#[test]
fn enormous_intensities_are_cut_to_the_image() {
    let (ledger, backends) = fresh();
    let input = checker(12, 9);
    for backend in &backends {
        let lib = backend.library();

        let blurred = backend.blur(&input, 1e12);
        let out = blurred.data().unwrap_or_else(|| panic!("{lib} blur: {:?}", blurred.error()));
        assert_eq!((out.width, out.height), (12, 9), "{lib} blur");

        for name in ["blur", "median", "sharpen", "bilateral"] {
            let result = backend.apply_filter(&input, name, 1e12);
            if !unsupported(&result) {
                assert!(result.is_success(), "{lib} {name}: {:?}", result.error());
            }
        }

        let sharpened = backend.sharpen(&input, 1e12);
        if !unsupported(&sharpened) {
            assert!(sharpened.is_success(), "{lib} sharpen: {:?}", sharpened.error());
        }
    }
    assert_balanced(&ledger);
}

#[test]
fn parameter_extremes_never_panic() {
    let (ledger, backends) = fresh();
    let input = checker(6, 5);
    let values = [
        0.0,
        1e-6,
        1.0,
        1e12,
        -1e12,
        f32::NAN,
        f32::INFINITY,
        f32::NEG_INFINITY,
    ];
    for backend in &backends {
        for &v in &values {
            for filter in Filter::ALL {
                let name = filter.to_string();
                assert_well_formed(&format!("{name}({v})"), backend.apply_filter(&input, &name, v));
            }
            assert_well_formed(&format!("brightness({v})"), backend.adjust_brightness(&input, v));
            assert_well_formed(&format!("contrast({v})"), backend.adjust_contrast(&input, v));
            assert_well_formed(&format!("blur({v})"), backend.blur(&input, v));
            assert_well_formed(&format!("sharpen({v})"), backend.sharpen(&input, v));
            assert_well_formed(&format!("rotate({v})"), backend.rotate(&input, v));
            assert_well_formed(&format!("edges({v})"), backend.detect_edges(&input, v));
        }
    }
    assert_balanced(&ledger);
}

#[test]
fn single_pixel_images_survive_geometry() {
    let (ledger, backends) = fresh();
    let input = checker(7, 4);
    let dot = PixelBuffer::filled(1, 1, &[90, 160, 30, 255]).unwrap();
    for backend in &backends {
        let lib = backend.library();

        let tiny = backend
            .resize(&input, &ResizeParams { width: 1, height: 1 })
            .into_data()
            .unwrap_or_else(|| panic!("{lib} down to 1x1"));
        assert_eq!((tiny.width, tiny.height), (1, 1), "{lib}");
        let back = backend
            .resize(&tiny, &ResizeParams { width: 7, height: 4 })
            .into_data()
            .unwrap_or_else(|| panic!("{lib} back up"));
        assert_eq!((back.width, back.height), (7, 4), "{lib}");
        assert!(back.data.chunks_exact(4).all(|px| px == &back.data[..4]), "{lib}: {:?}", back.data);

        let turned = backend
            .rotate(&dot, 45.0)
            .into_data()
            .unwrap_or_else(|| panic!("{lib} rotate 1x1"));
        assert!(turned.width >= 1 && turned.height >= 1, "{lib}");
        assert_eq!(turned.data.len(), (turned.width * turned.height * 4) as usize, "{lib}");

        let grown = backend
            .resize(&dot, &ResizeParams { width: 3, height: 3 })
            .into_data()
            .unwrap_or_else(|| panic!("{lib} 1x1 to 3x3"));
        assert!(grown.data.chunks_exact(4).all(|px| px == [90, 160, 30, 255]), "{lib}: {:?}", grown.data);
    }
    assert_balanced(&ledger);
}
