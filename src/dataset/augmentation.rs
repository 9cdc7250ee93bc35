//! Data Augmentation Module for Chest X-rays
//!
//! Random geometric augmentation for the training split: rotation, shifts,
//! shear, zoom and horizontal flip. The geometric parts are composed into a
//! single affine map about the image centre and resampled once, bilinearly,
//! with out-of-range coordinates clamped to the nearest edge pixel.
//!
//! # Augmentation Strategy
//!
//! - **Training**: random transform per sample
//! - **Validation/Test/Inference**: no augmentation, rescaling only

use image::{Rgb, RgbImage};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Configuration for data augmentation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AugmentationConfig {
    /// Maximum rotation in degrees (applies ±rotation_degrees)
    pub rotation_degrees: f64,
    /// Maximum horizontal shift as a fraction of the width
    pub width_shift: f64,
    /// Maximum vertical shift as a fraction of the height
    pub height_shift: f64,
    /// Maximum shear angle in degrees
    pub shear_degrees: f64,
    /// Zoom factors are drawn from [1 - zoom, 1 + zoom], independently per axis
    pub zoom: f64,
    /// Probability of a horizontal flip
    pub horizontal_flip_prob: f64,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self::xray()
    }
}

impl AugmentationConfig {
    /// Training preset for chest X-rays
    pub fn xray() -> Self {
        Self {
            rotation_degrees: 30.0,
            width_shift: 0.15,
            height_shift: 0.15,
            shear_degrees: 0.2,
            zoom: 0.25,
            horizontal_flip_prob: 0.5,
        }
    }

    /// Disable all augmentations
    pub fn none() -> Self {
        Self {
            rotation_degrees: 0.0,
            width_shift: 0.0,
            height_shift: 0.0,
            shear_degrees: 0.0,
            zoom: 0.0,
            horizontal_flip_prob: 0.0,
        }
    }

    /// Whether any transform can fire
    pub fn is_enabled(&self) -> bool {
        *self != Self::none()
    }

    /// Validate ranges
    pub fn validate(&self) -> Result<(), String> {
        let non_negative = [
            ("rotation_degrees", self.rotation_degrees),
            ("width_shift", self.width_shift),
            ("height_shift", self.height_shift),
            ("shear_degrees", self.shear_degrees),
        ];
        for (name, value) in non_negative {
            if value.is_nan() || value < 0.0 {
                return Err(format!("{} must be non-negative, got {}", name, value));
            }
        }

        if !(0.0..1.0).contains(&self.zoom) {
            return Err(format!("zoom must be in range [0.0, 1.0), got {}", self.zoom));
        }

        if !(0.0..=1.0).contains(&self.horizontal_flip_prob) {
            return Err(format!(
                "horizontal_flip_prob must be in range [0.0, 1.0], got {}",
                self.horizontal_flip_prob
            ));
        }

        Ok(())
    }
}

/// One drawn set of transform parameters
#[derive(Clone, Debug, PartialEq)]
pub struct TransformParams {
    pub rotation_degrees: f64,
    /// Shift along rows (pixels)
    pub shift_rows: f64,
    /// Shift along columns (pixels)
    pub shift_cols: f64,
    pub shear_degrees: f64,
    pub zoom_rows: f64,
    pub zoom_cols: f64,
    pub flip_horizontal: bool,
}

impl TransformParams {
    pub fn identity() -> Self {
        Self {
            rotation_degrees: 0.0,
            shift_rows: 0.0,
            shift_cols: 0.0,
            shear_degrees: 0.0,
            zoom_rows: 1.0,
            zoom_cols: 1.0,
            flip_horizontal: false,
        }
    }

    fn is_affine_identity(&self) -> bool {
        self.rotation_degrees == 0.0
            && self.shift_rows == 0.0
            && self.shift_cols == 0.0
            && self.shear_degrees == 0.0
            && self.zoom_rows == 1.0
            && self.zoom_cols == 1.0
    }

    /// Output-to-input map in (row, col) coordinates, centred on the image
    ///
    /// Composition: rotation · shift · shear · zoom.
    fn matrix(&self, height: u32, width: u32) -> Mat3 {
        let theta = self.rotation_degrees.to_radians();
        let shear = self.shear_degrees.to_radians();

        let rotation = [
            [theta.cos(), -theta.sin(), 0.0],
            [theta.sin(), theta.cos(), 0.0],
            [0.0, 0.0, 1.0],
        ];
        let shift = [
            [1.0, 0.0, self.shift_rows],
            [0.0, 1.0, self.shift_cols],
            [0.0, 0.0, 1.0],
        ];
        let shear = [
            [1.0, -shear.sin(), 0.0],
            [0.0, shear.cos(), 0.0],
            [0.0, 0.0, 1.0],
        ];
        let zoom = [
            [self.zoom_rows, 0.0, 0.0],
            [0.0, self.zoom_cols, 0.0],
            [0.0, 0.0, 1.0],
        ];

        let transform = matmul(&matmul(&matmul(&rotation, &shift), &shear), &zoom);

        let center_row = height as f64 / 2.0 - 0.5;
        let center_col = width as f64 / 2.0 - 0.5;
        let to_center = [
            [1.0, 0.0, center_row],
            [0.0, 1.0, center_col],
            [0.0, 0.0, 1.0],
        ];
        let from_center = [
            [1.0, 0.0, -center_row],
            [0.0, 1.0, -center_col],
            [0.0, 0.0, 1.0],
        ];

        matmul(&matmul(&to_center, &transform), &from_center)
    }
}

type Mat3 = [[f64; 3]; 3];

fn matmul(a: &Mat3, b: &Mat3) -> Mat3 {
    let mut out = [[0.0; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = (0..3).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

/// Image augmenter that applies random transformations
#[derive(Clone, Debug)]
pub struct Augmenter {
    config: AugmentationConfig,
}

impl Augmenter {
    /// Create a new augmenter with the given configuration
    pub fn new(config: AugmentationConfig) -> Self {
        Self { config }
    }

    /// Create an augmenter that leaves images unchanged
    pub fn no_augmentation() -> Self {
        Self::new(AugmentationConfig::none())
    }

    pub fn config(&self) -> &AugmentationConfig {
        &self.config
    }

    /// Draw transform parameters for an image of the given size
    pub fn sample_params(&self, rng: &mut ChaCha8Rng, height: u32, width: u32) -> TransformParams {
        let c = &self.config;

        let rotation_degrees = symmetric(rng, c.rotation_degrees);
        let shift_rows = symmetric(rng, c.height_shift) * height as f64;
        let shift_cols = symmetric(rng, c.width_shift) * width as f64;
        let shear_degrees = symmetric(rng, c.shear_degrees);
        let (zoom_rows, zoom_cols) = if c.zoom > 0.0 {
            (
                rng.gen_range(1.0 - c.zoom..=1.0 + c.zoom),
                rng.gen_range(1.0 - c.zoom..=1.0 + c.zoom),
            )
        } else {
            (1.0, 1.0)
        };
        let flip_horizontal =
            c.horizontal_flip_prob > 0.0 && rng.gen::<f64>() < c.horizontal_flip_prob;

        TransformParams {
            rotation_degrees,
            shift_rows,
            shift_cols,
            shear_degrees,
            zoom_rows,
            zoom_cols,
            flip_horizontal,
        }
    }

    /// Apply a random transform to an image
    pub fn augment(&self, img: &RgbImage, rng: &mut ChaCha8Rng) -> RgbImage {
        if !self.config.is_enabled() {
            return img.clone();
        }
        let (width, height) = img.dimensions();
        let params = self.sample_params(rng, height, width);
        apply_transform(img, &params)
    }
}

fn symmetric(rng: &mut ChaCha8Rng, range: f64) -> f64 {
    if range > 0.0 {
        rng.gen_range(-range..=range)
    } else {
        0.0
    }
}

/// Apply drawn parameters: affine resample, then the optional flip
pub fn apply_transform(img: &RgbImage, params: &TransformParams) -> RgbImage {
    let (width, height) = img.dimensions();

    let mut output = if params.is_affine_identity() {
        img.clone()
    } else {
        let m = params.matrix(height, width);
        RgbImage::from_fn(width, height, |x, y| {
            let (row, col) = (y as f64, x as f64);
            let src_row = m[0][0] * row + m[0][1] * col + m[0][2];
            let src_col = m[1][0] * row + m[1][1] * col + m[1][2];
            bilinear_sample_clamped(img, src_row, src_col)
        })
    };

    if params.flip_horizontal {
        image::imageops::flip_horizontal_in_place(&mut output);
    }

    output
}

/// Sample a pixel using bilinear interpolation, clamping to the nearest edge
fn bilinear_sample_clamped(img: &RgbImage, row: f64, col: f64) -> Rgb<u8> {
    let (width, height) = img.dimensions();

    let row = row.clamp(0.0, (height - 1) as f64);
    let col = col.clamp(0.0, (width - 1) as f64);

    let r0 = row.floor() as u32;
    let c0 = col.floor() as u32;
    let r1 = (r0 + 1).min(height - 1);
    let c1 = (c0 + 1).min(width - 1);

    let fr = row - r0 as f64;
    let fc = col - c0 as f64;

    let p00 = img.get_pixel(c0, r0);
    let p01 = img.get_pixel(c1, r0);
    let p10 = img.get_pixel(c0, r1);
    let p11 = img.get_pixel(c1, r1);

    let mut result = [0u8; 3];
    for c in 0..3 {
        let v = p00[c] as f64 * (1.0 - fr) * (1.0 - fc)
            + p01[c] as f64 * (1.0 - fr) * fc
            + p10[c] as f64 * fr * (1.0 - fc)
            + p11[c] as f64 * fr * fc;

        result[c] = v.round().clamp(0.0, 255.0) as u8;
    }

    Rgb(result)
}
