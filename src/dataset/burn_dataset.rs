//! Burn Dataset Integration
//!
//! Image items, an in-memory dataset implementing Burn's `Dataset` trait,
//! and the `Batcher` that stacks items into `[N, 3, H, W]` image tensors
//! and `[N, 1]` binary targets.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::loader::ImageFolder;
use crate::utils::error::{EnsembleError, Result};
use crate::IMAGE_CHANNELS;

/// A single image ready for Burn
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImageItem {
    /// Image data as flattened CHW float array [3 * H * W], values in [0, 1]
    pub image: Vec<f32>,
    /// Binary label (0 or 1)
    pub label: usize,
    /// Image path (for logging)
    pub path: String,
}

impl ImageItem {
    /// Load an image from disk, resize it and rescale by 1/255
    pub fn from_path(path: &Path, label: usize, image_size: usize) -> Result<Self> {
        let img = ImageReader::open(path)
            .and_then(|reader| reader.with_guessed_format())
            .map_err(|e| EnsembleError::ImageLoad(path.to_path_buf(), e.to_string()))?
            .decode()
            .map_err(|e| EnsembleError::ImageLoad(path.to_path_buf(), e.to_string()))?;

        Ok(Self::from_image(
            &img,
            label,
            image_size,
            path.to_string_lossy().to_string(),
        ))
    }

    /// Convert a decoded image
    ///
    /// Resizing uses nearest-neighbour sampling, the same interpolation a
    /// Keras directory iterator defaults to.
    pub fn from_image(img: &DynamicImage, label: usize, image_size: usize, path: String) -> Self {
        let rgb = img
            .resize_exact(image_size as u32, image_size as u32, FilterType::Nearest)
            .to_rgb8();

        let plane = image_size * image_size;
        let mut image = vec![0.0f32; IMAGE_CHANNELS * plane];

        for (x, y, pixel) in rgb.enumerate_pixels() {
            let offset = y as usize * image_size + x as usize;
            for c in 0..IMAGE_CHANNELS {
                image[c * plane + offset] = pixel[c] as f32 / 255.0;
            }
        }

        Self { image, label, path }
    }

    /// Create from pre-loaded image data
    pub fn from_data(image: Vec<f32>, label: usize, path: String) -> Self {
        Self { image, label, path }
    }
}

/// Dataset holding every decoded image of one split in memory
#[derive(Debug, Clone)]
pub struct InMemoryImageDataset {
    items: Vec<ImageItem>,
    image_size: usize,
}

impl InMemoryImageDataset {
    /// Wrap already decoded items, checking that every item has the right length
    pub fn new(items: Vec<ImageItem>, image_size: usize) -> Result<Self> {
        let expected = IMAGE_CHANNELS * image_size * image_size;
        if let Some(bad) = items.iter().find(|item| item.image.len() != expected) {
            return Err(EnsembleError::Dataset(format!(
                "item '{}' has {} values, expected {}",
                bad.path,
                bad.image.len(),
                expected
            )));
        }
        Ok(Self { items, image_size })
    }

    /// Decode every image of the folder in parallel
    ///
    /// The first image that fails to load aborts the whole preload.
    pub fn preload(folder: &ImageFolder) -> Result<Self> {
        let total = folder.len();
        info!("Pre-loading {} images from {:?}", total, folder.root_dir());

        let pb = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::default_bar().template(
            "  {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})",
        ) {
            pb.set_style(style.progress_chars("#>-"));
        }

        let loaded = AtomicUsize::new(0);

        let items = (0..total)
            .into_par_iter()
            .map(|index| {
                let item = folder.load_item(index);
                let count = loaded.fetch_add(1, Ordering::Relaxed);
                if count % 100 == 0 {
                    pb.set_position(count as u64);
                }
                item
            })
            .collect::<Result<Vec<_>>>()?;

        pb.finish_with_message(format!("Loaded {} images", items.len()));

        Ok(Self {
            items,
            image_size: folder.image_size(),
        })
    }

    /// Side length of every stored image
    pub fn image_size(&self) -> usize {
        self.image_size
    }

    /// Number of items per label
    pub fn class_distribution(&self) -> [usize; 2] {
        let mut counts = [0usize; 2];
        for item in &self.items {
            if item.label < counts.len() {
                counts[item.label] += 1;
            }
        }
        counts
    }
}

impl Dataset<ImageItem> for InMemoryImageDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// A batch of images with binary targets
#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    /// Images with shape [batch_size, 3, height, width]
    pub images: Tensor<B, 4>,
    /// Labels with shape [batch_size, 1]
    pub targets: Tensor<B, 2, Int>,
}

impl<B: Backend> ImageBatch<B> {
    pub fn len(&self) -> usize {
        self.images.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Batcher stacking [`ImageItem`]s into an [`ImageBatch`]
#[derive(Clone, Debug)]
pub struct ImageBatcher {
    image_size: usize,
}

impl ImageBatcher {
    pub fn new(image_size: usize) -> Self {
        Self { image_size }
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }
}

impl<B: Backend> Batcher<B, ImageItem, ImageBatch<B>> for ImageBatcher {
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> ImageBatch<B> {
        let batch_size = items.len();
        let size = self.image_size;

        let images_data: Vec<f32> = items
            .iter()
            .flat_map(|item| item.image.iter().copied())
            .collect();

        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, IMAGE_CHANNELS, size, size]),
            device,
        );

        let targets_data: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        let targets =
            Tensor::<B, 2, Int>::from_data(TensorData::new(targets_data, [batch_size, 1]), device);

        ImageBatch { images, targets }
    }
}
