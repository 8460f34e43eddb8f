//! Endless batch streams
//!
//! A training run asks for a fixed number of batches per epoch, regardless
//! of how many images the split holds. [`ImageBatchStream`] cycles over its
//! source forever, reshuffling at the start of every pass, and exposes its
//! cursor so callers decide whether consecutive runs share it.

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::burn_dataset::{ImageBatch, ImageBatcher, ImageItem, InMemoryImageDataset};
use super::loader::ImageFolder;
use crate::utils::error::{EnsembleError, Result};

/// Anything a stream can draw decoded samples from
pub trait SampleSource: Send + Sync {
    /// Number of samples
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Side length of the produced images
    fn image_size(&self) -> usize;

    /// Load the sample at `index`
    fn load(&self, index: usize) -> Result<ImageItem>;
}

impl SampleSource for ImageFolder {
    fn len(&self) -> usize {
        ImageFolder::len(self)
    }

    fn image_size(&self) -> usize {
        ImageFolder::image_size(self)
    }

    fn load(&self, index: usize) -> Result<ImageItem> {
        self.load_item(index)
    }
}

impl SampleSource for InMemoryImageDataset {
    fn len(&self) -> usize {
        Dataset::len(self)
    }

    fn image_size(&self) -> usize {
        InMemoryImageDataset::image_size(self)
    }

    fn load(&self, index: usize) -> Result<ImageItem> {
        self.get(index)
            .ok_or_else(|| EnsembleError::Dataset(format!("sample index {} out of range", index)))
    }
}

/// How batch stream cursors behave between consecutive training runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorPolicy {
    /// Rewind both streams before every run, so each run sees the same batches
    #[default]
    ResetPerRun,
    /// Keep the cursor where the previous run left it
    Carry,
}

/// Cursor of a stream: completed passes and offset into the current pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreamPosition {
    pub pass: usize,
    pub offset: usize,
}

/// Cycling, optionally shuffled source of batches
pub struct ImageBatchStream {
    name: String,
    source: Box<dyn SampleSource>,
    batcher: ImageBatcher,
    batch_size: usize,
    shuffle: bool,
    seed: u64,
    rng: ChaCha8Rng,
    order: Vec<usize>,
    position: StreamPosition,
}

impl ImageBatchStream {
    /// Create a stream over `source`
    pub fn new<S: SampleSource + 'static>(
        name: &str,
        source: S,
        batch_size: usize,
        shuffle: bool,
        seed: u64,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(EnsembleError::Config(format!(
                "batch size of stream '{}' must be positive",
                name
            )));
        }
        if source.is_empty() {
            return Err(EnsembleError::Dataset(format!(
                "stream '{}' has no images",
                name
            )));
        }

        let batcher = ImageBatcher::new(source.image_size());
        let order = (0..source.len()).collect();

        Ok(Self {
            name: name.to_string(),
            source: Box::new(source),
            batcher,
            batch_size,
            shuffle,
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
            order,
            position: StreamPosition::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of samples in one pass
    pub fn len(&self) -> usize {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Whether every pass visits the samples in a fresh random order
    pub fn is_shuffled(&self) -> bool {
        self.shuffle
    }

    pub fn image_size(&self) -> usize {
        self.source.image_size()
    }

    /// Batches per pass; the last one may be partial
    pub fn batches_per_pass(&self) -> usize {
        self.len().div_ceil(self.batch_size)
    }

    /// Current cursor
    pub fn position(&self) -> StreamPosition {
        self.position
    }

    /// Rewind to the state right after construction
    pub fn reset(&mut self) {
        self.rng = ChaCha8Rng::seed_from_u64(self.seed);
        self.position = StreamPosition::default();
    }

    /// Sample indices of the next batch, advancing the cursor
    pub fn next_indices(&mut self) -> Vec<usize> {
        if self.position.offset == 0 {
            self.begin_pass();
        }

        let start = self.position.offset;
        let end = (start + self.batch_size).min(self.order.len());
        let indices = self.order[start..end].to_vec();

        if end >= self.order.len() {
            self.position.pass += 1;
            self.position.offset = 0;
        } else {
            self.position.offset = end;
        }

        indices
    }

    /// Decoded items of the next batch
    pub fn next_items(&mut self) -> Result<Vec<ImageItem>> {
        self.next_indices()
            .into_iter()
            .map(|index| self.source.load(index))
            .collect()
    }

    /// Next batch as tensors on `device`
    pub fn next_batch<B: Backend>(&mut self, device: &B::Device) -> Result<ImageBatch<B>> {
        let items = self.next_items()?;
        Ok(<ImageBatcher as Batcher<B, ImageItem, ImageBatch<B>>>::batch(
            &self.batcher,
            items,
            device,
        ))
    }

    fn begin_pass(&mut self) {
        self.order = (0..self.source.len()).collect();
        if self.shuffle {
            self.order.shuffle(&mut self.rng);
        }
    }
}

impl std::fmt::Debug for ImageBatchStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageBatchStream")
            .field("name", &self.name)
            .field("len", &self.source.len())
            .field("batch_size", &self.batch_size)
            .field("shuffle", &self.shuffle)
            .field("position", &self.position)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use std::collections::HashSet;

    fn labelled_dataset(n: usize) -> InMemoryImageDataset {
        let items = (0..n)
            .map(|i| ImageItem::from_data(vec![i as f32; 3 * 2 * 2], i % 2, format!("img{}", i)))
            .collect();
        InMemoryImageDataset::new(items, 2).unwrap()
    }

    fn paths(items: &[ImageItem]) -> Vec<String> {
        items.iter().map(|item| item.path.clone()).collect()
    }

    #[test]
    fn test_cycles_with_partial_last_batch() {
        let mut stream = ImageBatchStream::new("train", labelled_dataset(5), 2, false, 0).unwrap();
        assert_eq!(stream.batches_per_pass(), 3);

        let sizes: Vec<usize> = (0..4).map(|_| stream.next_indices().len()).collect();
        assert_eq!(sizes, vec![2, 2, 1, 2]);
        assert_eq!(stream.position(), StreamPosition { pass: 1, offset: 2 });
    }

    #[test]
    fn test_unshuffled_order_is_sequential() {
        let mut stream = ImageBatchStream::new("val", labelled_dataset(4), 4, false, 0).unwrap();
        assert_eq!(stream.next_indices(), vec![0, 1, 2, 3]);
        assert_eq!(stream.next_indices(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_every_pass_is_a_permutation() {
        let mut stream = ImageBatchStream::new("train", labelled_dataset(10), 3, true, 7).unwrap();

        for _ in 0..3 {
            let mut seen = HashSet::new();
            for _ in 0..stream.batches_per_pass() {
                seen.extend(stream.next_indices());
            }
            assert_eq!(seen.len(), 10);
        }
    }

    #[test]
    fn test_reshuffles_between_passes() {
        let mut stream = ImageBatchStream::new("train", labelled_dataset(32), 32, true, 3).unwrap();
        let first = stream.next_indices();
        let second = stream.next_indices();
        assert_ne!(first, second);
    }

    #[test]
    fn test_reset_replays_same_batches() {
        let mut stream = ImageBatchStream::new("train", labelled_dataset(9), 4, true, 11).unwrap();
        let before: Vec<Vec<String>> = (0..5).map(|_| paths(&stream.next_items().unwrap())).collect();

        stream.reset();
        assert_eq!(stream.position(), StreamPosition::default());
        let after: Vec<Vec<String>> = (0..5).map(|_| paths(&stream.next_items().unwrap())).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_next_batch_tensor_shapes() {
        let device = Default::default();
        let mut stream = ImageBatchStream::new("train", labelled_dataset(3), 2, false, 0).unwrap();

        let batch = stream.next_batch::<NdArray>(&device).unwrap();
        assert_eq!(batch.images.dims(), [2, 3, 2, 2]);
        assert_eq!(batch.targets.dims(), [2, 1]);

        let batch = stream.next_batch::<NdArray>(&device).unwrap();
        assert_eq!(batch.images.dims(), [1, 3, 2, 2]);
    }

    #[test]
    fn test_rejects_zero_batch_size() {
        let result = ImageBatchStream::new("train", labelled_dataset(3), 0, false, 0);
        assert!(matches!(result, Err(EnsembleError::Config(_))));
    }

    #[test]
    fn test_rejects_empty_source() {
        let empty = InMemoryImageDataset::new(Vec::new(), 2).unwrap();
        let result = ImageBatchStream::new("train", empty, 2, false, 0);
        assert!(matches!(result, Err(EnsembleError::Dataset(_))));
    }
}
