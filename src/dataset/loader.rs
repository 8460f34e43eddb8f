//! Image folder loader
//!
//! Scans a split directory laid out as `root/<class>/<image>` and assigns
//! binary labels by sorted class-directory name.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;

use super::burn_dataset::ImageItem;
use super::{IMAGE_EXTENSIONS, NUM_CLASSES};
use crate::utils::error::{EnsembleError, Result};

/// A single image file with its label
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSample {
    /// Path to the image file
    pub path: PathBuf,
    /// Binary label (index of the class directory)
    pub label: usize,
    /// Class directory name (e.g. "cats")
    pub class_name: String,
}

/// One split (train or validation) of a two-class image folder
#[derive(Debug, Clone)]
pub struct ImageFolder {
    root_dir: PathBuf,
    class_names: Vec<String>,
    samples: Vec<ImageSample>,
    image_size: usize,
}

impl ImageFolder {
    /// Open a split directory
    ///
    /// The directory must contain exactly two class subdirectories:
    /// ```text
    /// root_dir/
    /// ├── cats/
    /// │   ├── cat.0.jpg
    /// │   └── ...
    /// └── dogs/
    ///     └── ...
    /// ```
    /// Files are collected recursively and in file-name order. Images are
    /// only decoded later, when a batch asks for them.
    pub fn open<P: AsRef<Path>>(root_dir: P, image_size: usize) -> Result<Self> {
        let root_dir = root_dir.as_ref().to_path_buf();
        info!("Scanning image folder {:?}", root_dir);

        if !root_dir.is_dir() {
            return Err(EnsembleError::Dataset(format!(
                "image folder does not exist: {}",
                root_dir.display()
            )));
        }

        let mut class_names = Vec::new();
        for entry in std::fs::read_dir(&root_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    class_names.push(name.to_string());
                }
            }
        }
        class_names.sort();

        if class_names.len() != NUM_CLASSES {
            return Err(EnsembleError::Dataset(format!(
                "binary labels need exactly {} class directories in {}, found {:?}",
                NUM_CLASSES,
                root_dir.display(),
                class_names
            )));
        }

        let mut samples = Vec::new();
        for (label, class_name) in class_names.iter().enumerate() {
            let class_dir = root_dir.join(class_name);
            let before = samples.len();

            for entry in WalkDir::new(&class_dir).min_depth(1).sort_by_file_name() {
                let entry = entry.map_err(|e| {
                    EnsembleError::Dataset(format!("failed to walk {}: {}", class_dir.display(), e))
                })?;
                if !entry.file_type().is_file() || !has_image_extension(entry.path()) {
                    continue;
                }
                samples.push(ImageSample {
                    path: entry.path().to_path_buf(),
                    label,
                    class_name: class_name.clone(),
                });
            }

            debug!(
                "Class '{}' (label {}): {} images",
                class_name,
                label,
                samples.len() - before
            );
        }

        info!(
            "Found {} images belonging to {} classes",
            samples.len(),
            class_names.len()
        );

        Ok(Self {
            root_dir,
            class_names,
            samples,
            image_size,
        })
    }

    /// Root directory of this split
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Class directory names, index = label
    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    /// All samples in label-then-file-name order
    pub fn samples(&self) -> &[ImageSample] {
        &self.samples
    }

    /// Side length images are resized to
    pub fn image_size(&self) -> usize {
        self.image_size
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Decode, resize and rescale the sample at `index`
    pub fn load_item(&self, index: usize) -> Result<ImageItem> {
        let sample = self.samples.get(index).ok_or_else(|| {
            EnsembleError::Dataset(format!(
                "sample index {} out of range ({} samples)",
                index,
                self.samples.len()
            ))
        })?;
        ImageItem::from_path(&sample.path, sample.label, self.image_size)
    }

    /// Per-class image counts
    pub fn stats(&self) -> DatasetStats {
        let class_counts = self
            .class_names
            .iter()
            .enumerate()
            .map(|(label, name)| {
                let count = self.samples.iter().filter(|s| s.label == label).count();
                (name.clone(), count)
            })
            .collect();

        DatasetStats {
            root_dir: self.root_dir.clone(),
            total_samples: self.samples.len(),
            class_counts,
        }
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Statistics about one split
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetStats {
    pub root_dir: PathBuf,
    pub total_samples: usize,
    pub class_counts: Vec<(String, usize)>,
}

impl DatasetStats {
    /// Print statistics to console
    pub fn print(&self) {
        println!("  {} ({} images)", self.root_dir.display(), self.total_samples);
        for (label, (name, count)) in self.class_counts.iter().enumerate() {
            let bar_len = if self.total_samples > 0 {
                (*count as f32 / self.total_samples as f32 * 40.0) as usize
            } else {
                0
            };
            println!(
                "    {}. {:10} {:6} {}",
                label,
                name,
                count,
                "█".repeat(bar_len)
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::test_support::write_split;
    use tempfile::TempDir;

    #[test]
    fn test_open_assigns_sorted_labels() {
        let temp_dir = TempDir::new().unwrap();
        write_split(temp_dir.path(), &[("dogs", 3), ("cats", 2)], 8);

        let folder = ImageFolder::open(temp_dir.path(), 8).unwrap();
        assert_eq!(folder.class_names(), &["cats".to_string(), "dogs".to_string()]);
        assert_eq!(folder.len(), 5);
        assert!(folder.samples()[..2].iter().all(|s| s.label == 0));
        assert!(folder.samples()[2..].iter().all(|s| s.label == 1));
    }

    #[test]
    fn test_non_image_files_are_skipped() {
        let temp_dir = TempDir::new().unwrap();
        write_split(temp_dir.path(), &[("cats", 1), ("dogs", 1)], 8);
        std::fs::write(temp_dir.path().join("cats").join("notes.txt"), "not an image").unwrap();

        let folder = ImageFolder::open(temp_dir.path(), 8).unwrap();
        assert_eq!(folder.len(), 2);
    }

    #[test]
    fn test_requires_two_classes() {
        let temp_dir = TempDir::new().unwrap();
        write_split(temp_dir.path(), &[("cats", 1)], 8);

        let result = ImageFolder::open(temp_dir.path(), 8);
        assert!(matches!(result, Err(EnsembleError::Dataset(_))));
    }

    #[test]
    fn test_missing_directory() {
        let result = ImageFolder::open("/nonexistent/train", 150);
        assert!(result.is_err());
    }

    #[test]
    fn test_stats_counts() {
        let temp_dir = TempDir::new().unwrap();
        write_split(temp_dir.path(), &[("cats", 2), ("dogs", 4)], 8);

        let stats = ImageFolder::open(temp_dir.path(), 8).unwrap().stats();
        assert_eq!(stats.total_samples, 6);
        assert_eq!(stats.class_counts, vec![("cats".to_string(), 2), ("dogs".to_string(), 4)]);
    }

    #[test]
    fn test_corrupt_image_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        write_split(temp_dir.path(), &[("cats", 1), ("dogs", 1)], 8);
        std::fs::write(temp_dir.path().join("cats").join("broken.jpg"), b"garbage").unwrap();

        let folder = ImageFolder::open(temp_dir.path(), 8).unwrap();
        let broken = folder
            .samples()
            .iter()
            .position(|s| s.path.ends_with("broken.jpg"))
            .unwrap();
        assert!(matches!(folder.load_item(broken), Err(EnsembleError::ImageLoad(_, _))));
    }
}
