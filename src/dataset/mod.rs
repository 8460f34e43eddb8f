//! Dataset module: image folders, Burn batching and endless batch streams
//!
//! The expected layout is the cats-vs-dogs split structure:
//! ```text
//! base_dir/
//! ├── train/{cats,dogs}/
//! └── validation/{cats,dogs}/
//! ```

pub mod burn_dataset;
pub mod loader;
pub mod stream;

use std::path::{Path, PathBuf};

pub use burn_dataset::{ImageBatch, ImageBatcher, ImageItem, InMemoryImageDataset};
pub use loader::{DatasetStats, ImageFolder, ImageSample};
pub use stream::{CursorPolicy, ImageBatchStream, SampleSource, StreamPosition};

/// Number of class directories per split
pub const NUM_CLASSES: usize = 2;

/// File extensions accepted as images (lowercase)
pub const IMAGE_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "bmp", "ppm", "tif", "tiff"];

/// Training split directory under a base directory
pub fn train_dir<P: AsRef<Path>>(base_dir: P) -> PathBuf {
    base_dir.as_ref().join("train")
}

/// Validation split directory under a base directory
pub fn validation_dir<P: AsRef<Path>>(base_dir: P) -> PathBuf {
    base_dir.as_ref().join("validation")
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;

    use image::{ImageBuffer, Rgb};

    /// Write `count` small PNGs into each named class directory
    pub fn write_split(root: &Path, classes: &[(&str, usize)], size: u32) {
        for (class_idx, (class_name, count)) in classes.iter().enumerate() {
            let class_dir = root.join(class_name);
            std::fs::create_dir_all(&class_dir).unwrap();

            for i in 0..*count {
                let img = ImageBuffer::from_fn(size, size, |x, y| {
                    Rgb([
                        ((x * 17 + i as u32 * 31) % 256) as u8,
                        ((y * 13 + class_idx as u32 * 101) % 256) as u8,
                        ((x + y) * 7 % 256) as u8,
                    ])
                });
                img.save(class_dir.join(format!("{}.{}.png", class_name, i)))
                    .unwrap();
            }
        }
    }
}
