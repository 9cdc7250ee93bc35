//! Chest X-ray Split Loader
//!
//! Discovers the `<root>/<split>/<CLASS>/<image>` layout. Class labels come
//! from the sorted class directory names of each split; the task is binary
//! and every split must carry the same two classes.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::DataConfig;
use crate::utils::error::{PneumoniaError, Result};
use crate::utils::format_number;

/// Image file extensions accepted by the loader (case-insensitive)
pub const IMAGE_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "bmp", "ppm", "tif", "tiff"];

/// Number of classes required by the binary classifier
pub const REQUIRED_CLASSES: usize = 2;

/// Dataset split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Split {
    Train,
    Validation,
    Test,
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Split::Train => write!(f, "train"),
            Split::Validation => write!(f, "validation"),
            Split::Test => write!(f, "test"),
        }
    }
}

/// A single image sample with its label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSample {
    /// Path to the image file
    pub path: PathBuf,
    /// Class label index (0 = NORMAL, 1 = PNEUMONIA)
    pub label: usize,
}

/// One split directory with its discovered samples
#[derive(Debug, Clone)]
pub struct SplitDirectory {
    pub split: Split,
    pub root: PathBuf,
    pub class_names: Vec<String>,
    /// Samples ordered class by class, files sorted by path
    pub samples: Vec<ImageSample>,
}

/// Sorted names of the class subdirectories of `dir`
pub fn discover_classes(dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        return Err(PneumoniaError::PathNotFound(dir.to_path_buf()));
    }

    let mut class_names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                class_names.push(name.to_string());
            }
        }
    }
    class_names.sort();

    Ok(class_names)
}

/// Whether a path has one of the accepted image extensions
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

impl SplitDirectory {
    /// Scan a split directory
    ///
    /// Fails when the directory is missing or does not contain exactly two
    /// class subdirectories.
    pub fn load(dir: &Path, split: Split) -> Result<Self> {
        info!("Scanning {} split: {:?}", split, dir);

        let class_names = discover_classes(dir)?;
        if class_names.len() != REQUIRED_CLASSES {
            return Err(PneumoniaError::Dataset(format!(
                "{} split at {} must contain exactly {} class directories, found {}: {:?}",
                split,
                dir.display(),
                REQUIRED_CLASSES,
                class_names.len(),
                class_names
            )));
        }

        let mut samples = Vec::new();
        for (label, class_name) in class_names.iter().enumerate() {
            let class_dir = dir.join(class_name);

            let mut paths = Vec::new();
            for entry in WalkDir::new(&class_dir).min_depth(1).max_depth(1) {
                let entry = entry.map_err(|e| PneumoniaError::Dataset(e.to_string()))?;
                if entry.file_type().is_file() && is_image_file(entry.path()) {
                    paths.push(entry.into_path());
                }
            }
            paths.sort();

            debug!(
                "Class '{}' (label {}): {} images",
                class_name,
                label,
                paths.len()
            );
            samples.extend(paths.into_iter().map(|path| ImageSample { path, label }));
        }

        info!("Found {} images in {} split", samples.len(), split);

        Ok(Self {
            split,
            root: dir.to_path_buf(),
            class_names,
            samples,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sample counts indexed by label
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.class_names.len()];
        for sample in &self.samples {
            counts[sample.label] += 1;
        }
        counts
    }

    /// (path, label) pairs in dataset order
    pub fn pairs(&self) -> Vec<(PathBuf, usize)> {
        self.samples
            .iter()
            .map(|s| (s.path.clone(), s.label))
            .collect()
    }

    pub fn stats(&self) -> DatasetStats {
        DatasetStats {
            split: self.split,
            total_samples: self.len(),
            class_names: self.class_names.clone(),
            class_counts: self.class_counts(),
        }
    }
}

/// Train, validation and test splits of one dataset root
#[derive(Debug, Clone)]
pub struct XrayDirectory {
    pub train: SplitDirectory,
    pub validation: SplitDirectory,
    pub test: SplitDirectory,
}

impl XrayDirectory {
    /// Scan all three splits and check they agree on class names
    pub fn load(config: &DataConfig) -> Result<Self> {
        let train = SplitDirectory::load(&config.split_dir(Split::Train), Split::Train)?;
        let validation =
            SplitDirectory::load(&config.split_dir(Split::Validation), Split::Validation)?;
        let test = SplitDirectory::load(&config.split_dir(Split::Test), Split::Test)?;

        for other in [&validation, &test] {
            ensure_same_classes(&train, other)?;
        }

        Ok(Self {
            train,
            validation,
            test,
        })
    }

    pub fn class_names(&self) -> &[String] {
        &self.train.class_names
    }

    pub fn stats(&self) -> Vec<DatasetStats> {
        vec![self.train.stats(), self.validation.stats(), self.test.stats()]
    }
}

/// Fail when two splits were labelled with different class names
pub fn ensure_same_classes(reference: &SplitDirectory, other: &SplitDirectory) -> Result<()> {
    if reference.class_names != other.class_names {
        return Err(PneumoniaError::Dataset(format!(
            "{} classes {:?} differ from {} classes {:?}",
            other.split, other.class_names, reference.split, reference.class_names
        )));
    }
    Ok(())
}

/// Statistics about one split
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetStats {
    pub split: Split,
    pub total_samples: usize,
    pub class_names: Vec<String>,
    pub class_counts: Vec<usize>,
}

impl DatasetStats {
    /// Print statistics to console
    pub fn print(&self) {
        println!(
            "\n  {} split: {} images",
            self.split,
            format_number(self.total_samples)
        );

        for (idx, (name, count)) in self
            .class_names
            .iter()
            .zip(self.class_counts.iter())
            .enumerate()
        {
            let fraction = if self.total_samples > 0 {
                *count as f32 / self.total_samples as f32
            } else {
                0.0
            };
            let bar: String = "█".repeat((fraction * 40.0) as usize);
            println!(
                "    {:1}. {:12} {:>6} {:5.1}% {}",
                idx,
                name,
                format_number(*count),
                fraction * 100.0,
                bar
            );
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    /// Write `per_class` small PNGs for NORMAL and PNEUMONIA into `dir`
    pub(crate) fn write_split(dir: &Path, per_class: usize) {
        for (label, class) in ["NORMAL", "PNEUMONIA"].iter().enumerate() {
            let class_dir = dir.join(class);
            std::fs::create_dir_all(&class_dir).unwrap();
            for i in 0..per_class {
                let shade = (40 + label * 120 + i * 3) as u8;
                RgbImage::from_pixel(32, 32, Rgb([shade, shade, shade]))
                    .save(class_dir.join(format!("img_{:03}.png", i)))
                    .unwrap();
            }
        }
    }

    #[test]
    fn test_split_loading_orders_samples() {
        let dir = tempfile::tempdir().unwrap();
        write_split(dir.path(), 3);
        std::fs::write(dir.path().join("NORMAL").join("notes.txt"), "skip me").unwrap();

        let split = SplitDirectory::load(dir.path(), Split::Test).unwrap();

        assert_eq!(split.class_names, vec!["NORMAL", "PNEUMONIA"]);
        assert_eq!(split.len(), 6);
        assert_eq!(split.class_counts(), vec![3, 3]);
        assert_eq!(split.samples[0].label, 0);
        assert!(split.samples[0].path.ends_with("NORMAL/img_000.png"));
        assert!(split.samples[5].path.ends_with("PNEUMONIA/img_002.png"));
    }

    #[test]
    fn test_wrong_class_count() {
        let dir = tempfile::tempdir().unwrap();
        write_split(dir.path(), 1);
        std::fs::create_dir_all(dir.path().join("COVID")).unwrap();

        let err = SplitDirectory::load(dir.path(), Split::Train).unwrap_err();
        assert!(matches!(err, PneumoniaError::Dataset(_)));
    }

    #[test]
    fn test_missing_split_dir() {
        let err = SplitDirectory::load(Path::new("/nonexistent/train"), Split::Train).unwrap_err();
        assert!(matches!(err, PneumoniaError::PathNotFound(_)));
    }

    #[test]
    fn test_extension_filter() {
        assert!(is_image_file(Path::new("a/IM-0001.JPEG")));
        assert!(is_image_file(Path::new("a/scan.tiff")));
        assert!(!is_image_file(Path::new("a/.DS_Store")));
        assert!(!is_image_file(Path::new("a/readme.md")));
    }

    #[test]
    fn test_directory_requires_matching_classes() {
        let dir = tempfile::tempdir().unwrap();
        for split in ["train", "val"] {
            write_split(&dir.path().join(split), 1);
        }
        let test_dir = dir.path().join("test");
        std::fs::create_dir_all(test_dir.join("NORMAL")).unwrap();
        std::fs::create_dir_all(test_dir.join("VIRAL")).unwrap();

        let config = DataConfig::new(dir.path());
        let err = XrayDirectory::load(&config).unwrap_err();
        assert!(matches!(err, PneumoniaError::Dataset(_)));
    }

    #[test]
    fn test_stats() {
        let dir = tempfile::tempdir().unwrap();
        write_split(dir.path(), 2);
        let stats = SplitDirectory::load(dir.path(), Split::Validation).unwrap().stats();
        assert_eq!(stats.total_samples, 4);
        assert_eq!(stats.class_counts, vec![2, 2]);
    }
}
