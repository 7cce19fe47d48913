use crate::types::{BandError, BandImage, BandResult};
use gdal::raster::{Buffer, GdalType};
use gdal::{Dataset, DriverManager};
use ndarray::{Array2, Array3};
use std::path::Path;

/// Read the first raster band of an image file as `f32`
pub fn read_band<P: AsRef<Path>>(path: P) -> BandResult<BandImage> {
    let dataset = Dataset::open(path.as_ref())?;
    let (width, height) = dataset.raster_size();

    let rasterband = dataset.rasterband(1)?;
    let band_data = rasterband.read_as::<f32>((0, 0), (width, height), (width, height), None)?;

    Array2::from_shape_vec((height, width), band_data.data).map_err(|e| {
        BandError::CaptureRead(format!(
            "Failed to reshape {}: {}",
            path.as_ref().display(),
            e
        ))
    })
}

/// Write a single-band GeoTIFF
pub fn write_gray<T, P>(path: P, image: &Array2<T>) -> BandResult<()>
where
    T: GdalType + Copy,
    P: AsRef<Path>,
{
    let (height, width) = image.dim();
    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let dataset = driver.create_with_band_type::<T, _>(
        path.as_ref(),
        width as isize,
        height as isize,
        1,
    )?;

    let mut rasterband = dataset.rasterband(1)?;
    let flat_data: Vec<T> = image.iter().copied().collect();
    let buffer = Buffer::new((width, height), flat_data);
    rasterband.write((0, 0), (width, height), &buffer)?;

    Ok(())
}

/// Write an 8-bit RGB image (rows x columns x 3) as JPEG
pub fn write_rgb_jpeg<P: AsRef<Path>>(path: P, rgb: &Array3<u8>) -> BandResult<()> {
    let (height, width, channels) = rgb.dim();
    if channels != 3 {
        return Err(BandError::Export(format!(
            "RGB image needs 3 channels, got {}",
            channels
        )));
    }

    // JPEG driver only supports CreateCopy, so stage the pixels in memory
    let mem = DriverManager::get_driver_by_name("MEM")?;
    let staging = mem.create_with_band_type::<u8, _>("", width as isize, height as isize, 3)?;
    for channel in 0..3 {
        let mut rasterband = staging.rasterband((channel + 1) as isize)?;
        let flat_data: Vec<u8> = rgb
            .index_axis(ndarray::Axis(2), channel)
            .iter()
            .copied()
            .collect();
        let buffer = Buffer::new((width, height), flat_data);
        rasterband.write((0, 0), (width, height), &buffer)?;
    }

    let jpeg = DriverManager::get_driver_by_name("JPEG")?;
    staging.create_copy(&jpeg, path.as_ref(), &[])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_gray_tiff_roundtrip_preserves_layout() {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let path = dir.path().join("band.tif");
        let image = Array2::from_shape_fn((3, 5), |(r, c)| (r * 10 + c) as u16);

        write_gray(&path, &image).unwrap();
        let read = read_band(&path).unwrap();

        assert_eq!(read.dim(), (3, 5));
        assert_eq!(read[[2, 4]], 24.0);
        assert_eq!(read[[1, 0]], 10.0);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(read_band("/nonexistent/IMG_0000_1.tif").is_err());
    }
}
