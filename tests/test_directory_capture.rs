mod common;

use bandalign::core::batch::{BatchOrchestrator, ProcessingParams};
use bandalign::io::capture::Capture;
use bandalign::io::image_set::{DirectoryCapture, ImageSet};
use bandalign::io::raster::write_gray;
use bandalign::io::warp_store::{FileWarpMatrixStore, WarpMatrixStore};
use bandalign::types::{BandError, CalibrationMode};
use approx::assert_relative_eq;
use common::{init_logging, render};
use ndarray::Array2;
use std::f64::consts::PI;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const BLACK_LEVEL: f64 = 1000.0;
const GAIN: f64 = 0.001;

struct BandFixture<'a> {
    name: &'a str,
    shift: (f64, f64),
    irradiance: Option<f64>,
    albedo: Option<f64>,
}

fn write_capture(dir: &Path, id: &str, serial: &str, bands: &[BandFixture], raw: impl Fn(usize, (f64, f64)) -> Array2<u16>) {
    fs::create_dir_all(dir).unwrap();
    let mut entries = String::new();
    for (i, band) in bands.iter().enumerate() {
        let file = format!("IMG_{}_{}.tif", id, i + 1);
        write_gray(dir.join(&file), &raw(i, band.shift)).unwrap();

        let irradiance = band
            .irradiance
            .map(|e| format!("<irradiance>{}</irradiance>", e))
            .unwrap_or_default();
        let albedo = band
            .albedo
            .map(|a| format!("<panelAlbedo>{}</panelAlbedo>", a))
            .unwrap_or_default();
        entries.push_str(&format!(
            "<band><name>{}</name><file>{}</file><blackLevel>{}</blackLevel>\
             <radiometricGain>{}</radiometricGain>{}{}</band>",
            band.name, file, BLACK_LEVEL, GAIN, irradiance, albedo
        ));
    }
    let xml = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<capture><captureId>{}</captureId>\
         <cameraModel>RedEdge-M</cameraModel><cameraSerial>{}</cameraSerial>\
         <bandList>{}</bandList></capture>",
        id, serial, entries
    );
    fs::write(dir.join("capture.xml"), xml).unwrap();
}

fn textured(_: usize, shift: (f64, f64)) -> Array2<u16> {
    render(100, 100, shift.0, shift.1).mapv(|v| (BLACK_LEVEL as f32 + v * 100.0).round() as u16)
}

fn rgb_bands() -> Vec<BandFixture<'static>> {
    vec![
        BandFixture { name: "Blue", shift: (1.0, 0.0), irradiance: Some(1.2), albedo: None },
        BandFixture { name: "Green", shift: (0.0, 0.0), irradiance: Some(1.1), albedo: None },
        BandFixture { name: "Red", shift: (0.0, -1.0), irradiance: Some(1.0), albedo: None },
    ]
}

#[test]
fn test_radiance_and_reflectance_conversion() {
    init_logging();
    let root = TempDir::new().expect("Failed to create temp directory");
    write_capture(root.path(), "cap", "SN001", &rgb_bands(), |i, _| {
        Array2::from_elem((4, 4), 1000 + 500 * (i as u16 + 1))
    });

    let capture = DirectoryCapture::open(root.path()).unwrap();
    assert_eq!(capture.id(), "cap");
    assert_eq!(capture.band_names(), &["Blue", "Green", "Red"]);

    let radiance = capture.calibrated_bands(CalibrationMode::Radiance).unwrap();
    assert_relative_eq!(radiance[0][[0, 0]], 0.5, epsilon = 1e-6);
    assert_relative_eq!(radiance[2][[3, 3]], 1.5, epsilon = 1e-6);

    let reflectance = capture.calibrated_bands(CalibrationMode::Reflectance).unwrap();
    assert_relative_eq!(reflectance[0][[0, 0]], (0.5 * PI / 1.2) as f32, epsilon = 1e-5);
    assert_relative_eq!(reflectance[2][[1, 2]], (1.5 * PI / 1.0) as f32, epsilon = 1e-5);
}

#[test]
fn test_panel_irradiance_enables_reflectance() {
    init_logging();
    let root = TempDir::new().expect("Failed to create temp directory");
    let no_irradiance: Vec<BandFixture> = ["Blue", "Green"]
        .iter()
        .map(|&name| BandFixture { name, shift: (0.0, 0.0), irradiance: None, albedo: None })
        .collect();
    write_capture(&root.path().join("set").join("0001"), "cap", "SN001", &no_irradiance, |_, _| {
        Array2::from_elem((4, 4), 1400)
    });

    let panel: Vec<BandFixture> = ["Blue", "Green"]
        .iter()
        .map(|&name| BandFixture { name, shift: (0.0, 0.0), irradiance: None, albedo: Some(0.5) })
        .collect();
    write_capture(&root.path().join("panel"), "panel", "SN001", &panel, |_, _| {
        Array2::from_elem((4, 4), 3000)
    });

    let mut image_set = ImageSet::from_directory(root.path().join("set")).unwrap();
    assert_eq!(image_set.len(), 1);
    assert!(matches!(
        image_set.captures[0].calibrated_bands(CalibrationMode::Reflectance),
        Err(BandError::CaptureRead(_))
    ));

    let panel = DirectoryCapture::open(root.path().join("panel")).unwrap();
    // panel radiance (3000 - 1000) * 0.001 = 2.0
    let irradiance = panel.panel_irradiance().unwrap();
    assert_relative_eq!(irradiance[0], PI * 2.0 / 0.5, epsilon = 1e-9);

    image_set.apply_panel(&panel).unwrap();
    let reflectance = image_set.captures[0]
        .calibrated_bands(CalibrationMode::Reflectance)
        .unwrap();
    // 0.4 * π / (4π) = 0.1
    assert_relative_eq!(reflectance[1][[2, 2]], 0.1, epsilon = 1e-5);
}

#[test]
fn test_image_set_end_to_end() {
    init_logging();
    let root = TempDir::new().expect("Failed to create temp directory");
    let images = root.path().join("images");
    write_capture(&images.join("000").join("a"), "IMG_0001", "RM01-42", &rgb_bands(), textured);
    write_capture(&images.join("000").join("b"), "IMG_0002", "RM01-42", &rgb_bands(), textured);

    let image_set = ImageSet::from_directory(&images).unwrap();
    assert_eq!(image_set.len(), 2);

    let output = root.path().join("processed_bands");
    let matrices = root.path().join("matrices");
    let params = ProcessingParams {
        generate_thumbnails: true,
        warp_matrix_dir: matrices.clone(),
        ..ProcessingParams::default()
    };
    let report = BatchOrchestrator::with_file_store(params).run(&image_set.captures, &output);

    assert_eq!(report.processed_count(), 2, "{:?}", report.outcomes);
    assert!(matrices.join("RM01-42_warp_matrices.json").is_file());
    for id in ["IMG_0001", "IMG_0002"] {
        for band in ["Blue", "Green", "Red"] {
            assert!(output.join(id).join(format!("{}_band_{}.tif", id, band)).is_file());
        }
        assert!(output.join(id).join(format!("{}_thumbnail.jpg", id)).is_file());
    }

    let stored = FileWarpMatrixStore::new(&matrices).load("RM01-42").unwrap().unwrap();
    assert_eq!(stored.len(), 3);
    assert_eq!(stored.reference_band, 1);
}
