//! Annotated prediction images
//!
//! The source image is embedded as a base64 PNG in a standalone SVG, with the
//! prediction title above it.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use base64::Engine;
use image::{DynamicImage, ImageFormat};

use super::predictor::{Diagnosis, Label};
use crate::utils::charts::escape_xml;
use crate::utils::error::{PneumoniaError, Result};

/// Longest displayed side; larger images are scaled down in the SVG
const MAX_DISPLAY_SIZE: u32 = 640;
const TITLE_HEIGHT: u32 = 48;
const PADDING: u32 = 16;

const COLOR_PNEUMONIA: &str = "#c0392b";
const COLOR_NORMAL: &str = "#27ae60";

/// `<dir>/<stem>_prediction.svg` next to the input image
pub fn default_annotation_path(image_path: &Path) -> PathBuf {
    let stem = image_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    image_path.with_file_name(format!("{}_prediction.svg", stem))
}

/// Encode an image as a PNG data URI
pub fn encode_png_data_uri(image: &DynamicImage) -> Result<String> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|e| PneumoniaError::Inference(format!("Failed to encode PNG: {}", e)))?;

    let encoded = base64::engine::general_purpose::STANDARD.encode(buffer.into_inner());
    Ok(format!("data:image/png;base64,{}", encoded))
}

fn display_size(width: u32, height: u32) -> (u32, u32) {
    let longest = width.max(height).max(1);
    if longest <= MAX_DISPLAY_SIZE {
        return (width, height);
    }
    let scale = MAX_DISPLAY_SIZE as f64 / longest as f64;
    (
        ((width as f64 * scale).round() as u32).max(1),
        ((height as f64 * scale).round() as u32).max(1),
    )
}

/// Render the annotated image as an SVG document
pub fn render_annotation(image: &DynamicImage, diagnosis: &Diagnosis) -> Result<String> {
    let (width, height) = display_size(image.width(), image.height());
    let total_width = width + 2 * PADDING;
    let total_height = height + TITLE_HEIGHT + 2 * PADDING;
    let color = match diagnosis.label {
        Label::Pneumonia => COLOR_PNEUMONIA,
        Label::Normal => COLOR_NORMAL,
    };

    let mut svg = String::new();
    svg.push_str(&format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {w} {h}" width="{w}" height="{h}">"#,
        w = total_width,
        h = total_height
    ));
    svg.push_str(&format!(
        r#"<rect width="{}" height="{}" fill="white"/>"#,
        total_width, total_height
    ));
    svg.push_str(&format!(
        r#"<text x="{}" y="{}" text-anchor="middle" font-family="sans-serif" font-size="20" font-weight="bold" fill="{}">{}</text>"#,
        total_width / 2,
        PADDING + TITLE_HEIGHT / 2 + 6,
        color,
        escape_xml(&diagnosis.title())
    ));
    svg.push_str(&format!(
        r#"<image x="{}" y="{}" width="{}" height="{}" href="{}"/>"#,
        PADDING,
        PADDING + TITLE_HEIGHT,
        width,
        height,
        encode_png_data_uri(image)?
    ));
    svg.push_str("</svg>\n");

    Ok(svg)
}

/// Write the annotated image to `path`
pub fn save_annotation(image: &DynamicImage, diagnosis: &Diagnosis, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, render_annotation(image, diagnosis)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::time::Duration;

    #[test]
    fn test_default_path() {
        assert_eq!(
            default_annotation_path(Path::new("scans/person1_virus.jpeg")),
            PathBuf::from("scans/person1_virus_prediction.svg")
        );
    }

    #[test]
    fn test_svg_contains_title_and_image() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 30, Rgb([200, 200, 200])));
        let diagnosis = Diagnosis::from_probability(0.9731, None, Duration::ZERO);

        let svg = render_annotation(&image, &diagnosis).unwrap();
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains("Prediction: PNEUMONIA (97.31%)"));
        assert!(svg.contains("data:image/png;base64,"));
        assert!(svg.contains(r#"width="40" height="30""#));
    }

    #[test]
    fn test_large_images_are_scaled() {
        assert_eq!(display_size(1280, 960), (640, 480));
        assert_eq!(display_size(100, 50), (100, 50));
    }

    #[test]
    fn test_save_annotation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("scan_prediction.svg");
        let image = DynamicImage::ImageRgb8(RgbImage::new(8, 8));
        let diagnosis = Diagnosis::from_probability(0.1, None, Duration::ZERO);

        save_annotation(&image, &diagnosis, &path).unwrap();
        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.contains("NORMAL (90.00%)"));
    }
}
