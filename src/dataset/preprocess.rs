//! Image preprocessing shared by the data pipeline and the inference utility
//!
//! decode → RGB → nearest-neighbour resize to 224×224 → CHW floats in [0, 1]

use std::path::Path;

use image::{imageops::FilterType, DynamicImage, ImageReader, RgbImage};

use crate::utils::error::{PneumoniaError, Result};
use crate::{IMAGE_SIZE, NUM_CHANNELS};

/// Number of floats in one preprocessed image
pub const IMAGE_LEN: usize = NUM_CHANNELS * IMAGE_SIZE * IMAGE_SIZE;

/// Convert any decoded image to a 224×224 RGB image
pub fn prepare_image(img: &DynamicImage) -> RgbImage {
    let size = IMAGE_SIZE as u32;
    if img.width() == size && img.height() == size {
        return img.to_rgb8();
    }
    img.resize_exact(size, size, FilterType::Nearest).to_rgb8()
}

/// Decode an image file into a 224×224 RGB image
pub fn load_image(path: &Path) -> Result<RgbImage> {
    let img = ImageReader::open(path)
        .map_err(|e| PneumoniaError::ImageLoad(path.to_path_buf(), e.to_string()))?
        .with_guessed_format()
        .map_err(|e| PneumoniaError::ImageLoad(path.to_path_buf(), e.to_string()))?
        .decode()
        .map_err(|e| PneumoniaError::ImageLoad(path.to_path_buf(), e.to_string()))?;

    Ok(prepare_image(&img))
}

/// Convert an RGB image to CHW float data rescaled to [0, 1]
pub fn to_tensor_data(img: &RgbImage) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let plane = (width * height) as usize;
    let mut data = vec![0.0f32; NUM_CHANNELS * plane];

    for (i, pixel) in img.pixels().enumerate() {
        for c in 0..NUM_CHANNELS {
            data[c * plane + i] = pixel[c] as f32 / 255.0;
        }
    }

    data
}

/// Full inference-time pipeline for an in-memory image
pub fn preprocess_image(img: &DynamicImage) -> Vec<f32> {
    to_tensor_data(&prepare_image(img))
}

/// Full inference-time pipeline for an image file
pub fn preprocess_path(path: &Path) -> Result<Vec<f32>> {
    Ok(to_tensor_data(&load_image(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb};

    #[test]
    fn test_grayscale_becomes_three_channels() {
        let gray = DynamicImage::ImageLuma8(GrayImage::from_pixel(300, 180, Luma([51])));
        let data = preprocess_image(&gray);

        assert_eq!(data.len(), IMAGE_LEN);
        assert!(data.iter().all(|&v| (v - 0.2).abs() < 1e-6));
    }

    #[test]
    fn test_values_in_unit_range_and_chw_order() {
        let img = RgbImage::from_fn(224, 224, |x, _| Rgb([255, (x % 256) as u8, 0]));
        let data = to_tensor_data(&img);
        let plane = 224 * 224;

        assert_eq!(data.len(), 3 * plane);
        assert!(data.iter().all(|&v| (0.0..=1.0).contains(&v)));
        // red plane is all ones, blue plane all zeros
        assert!(data[..plane].iter().all(|&v| v == 1.0));
        assert!(data[2 * plane..].iter().all(|&v| v == 0.0));
        assert!((data[plane + 10] - 10.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn test_load_image_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xray.png");
        RgbImage::from_pixel(64, 80, Rgb([10, 20, 30])).save(&path).unwrap();

        let img = load_image(&path).unwrap();
        assert_eq!(img.dimensions(), (224, 224));
        assert_eq!(*img.get_pixel(100, 100), Rgb([10, 20, 30]));
    }

    #[test]
    fn test_corrupt_image_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpeg");
        std::fs::write(&path, b"not an image").unwrap();

        let err = load_image(&path).unwrap_err();
        assert!(matches!(err, PneumoniaError::ImageLoad(_, _)));
    }

    #[test]
    fn test_missing_image_is_an_error() {
        let err = preprocess_path(Path::new("/nonexistent/image.png")).unwrap_err();
        assert!(matches!(err, PneumoniaError::ImageLoad(_, _)));
    }
}
