use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use rand::seq::SliceRandom;
use rand::{Rng, RngCore, SeedableRng, rngs::StdRng};
use rayon::prelude::*;
use std::path::{Path, PathBuf};

use crate::config::{Direction, Preprocess, TrainingConfig};
use crate::error::TrainError;
use crate::utils::image_to_chw;

/// Anything that can be iterated batch by batch, once per epoch.
pub trait BatchSource {
    type Batch;

    /// Number of samples (not batches) per pass.
    fn num_items(&self) -> usize;

    fn batches(&mut self) -> Box<dyn Iterator<Item = Result<Self::Batch, TrainError>> + '_>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Val,
}

impl Split {
    pub fn dir_name(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PairItem {
    /// CHW floats in [-1, 1].
    pub a: Vec<f32>,
    pub b: Vec<f32>,
    pub path: PathBuf,
}

/// How the two halves of an aligned image become model inputs.
#[derive(Debug, Clone)]
pub struct PairTransform {
    pub preprocess: Preprocess,
    pub load_size: u32,
    pub crop_size: u32,
    pub flip: bool,
    pub direction: Direction,
    pub input_nc: usize,
    pub output_nc: usize,
}

impl PairTransform {
    pub fn from_config(config: &TrainingConfig, split: Split) -> Self {
        Self {
            preprocess: config.preprocess,
            load_size: config.load_size as u32,
            crop_size: config.crop_size as u32,
            flip: split == Split::Train && !config.no_flip,
            direction: config.direction,
            input_nc: config.input_nc,
            output_nc: config.output_nc,
        }
    }

    /// Resizes, crops and flips one half. `seed` makes the crop position
    /// and flip random; without it the crop is centred and never flipped.
    /// The same seed yields the same geometry for A and B.
    fn apply(&self, image: DynamicImage, seed: Option<u64>) -> DynamicImage {
        let crop = self.crop_size;
        let image = match self.preprocess {
            Preprocess::ResizeAndCrop => {
                image.resize_exact(self.load_size, self.load_size, FilterType::CatmullRom)
            }
            Preprocess::Crop if image.width() < crop || image.height() < crop => {
                image.resize_exact(crop, crop, FilterType::CatmullRom)
            }
            Preprocess::Crop => image,
            Preprocess::Resize => image.resize_exact(crop, crop, FilterType::CatmullRom),
        };

        let max_x = image.width().saturating_sub(crop);
        let max_y = image.height().saturating_sub(crop);
        let (x, y, flip) = match seed {
            Some(seed) => {
                let mut rng = StdRng::seed_from_u64(seed);
                let x = rng.gen_range(0..=max_x);
                let y = rng.gen_range(0..=max_y);
                (x, y, self.flip && rng.gen_bool(0.5))
            }
            None => (max_x / 2, max_y / 2, false),
        };

        let image = image.crop_imm(x, y, crop, crop);
        if flip { image.fliph() } else { image }
    }
}

/// Directory of images whose left half is domain A and right half domain B.
pub struct AlignedDataset {
    pub image_paths: Vec<PathBuf>,
    transform: PairTransform,
}

impl AlignedDataset {
    pub fn new(config: &TrainingConfig, split: Split) -> Result<Self, TrainError> {
        let dir = Path::new(&config.dataroot).join(split.dir_name());
        Self::from_dir(dir, PairTransform::from_config(config, split))
    }

    pub fn from_dir<P: AsRef<Path>>(path: P, transform: PairTransform) -> Result<Self, TrainError> {
        let path = path.as_ref();
        let mut image_paths = Vec::new();

        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            let path = entry.path();

            if path.is_file() {
                if let Some(ext) = path.extension().and_then(|s| s.to_str()) {
                    match ext.to_lowercase().as_str() {
                        "jpg" | "jpeg" | "png" | "bmp" | "tiff" => {
                            image_paths.push(path);
                        }
                        _ => {}
                    }
                }
            }
        }
        if image_paths.is_empty() {
            return Err(TrainError::EmptyDataset(path.to_path_buf()));
        }
        image_paths.sort();
        Ok(Self {
            image_paths,
            transform,
        })
    }

    pub fn transform(&self) -> &PairTransform {
        &self.transform
    }

    pub fn load(&self, index: usize, seed: Option<u64>) -> Result<PairItem, TrainError> {
        let path = &self.image_paths[index];
        let image = ImageReader::open(path)?
            .decode()
            .map_err(|source| TrainError::Sample {
                index,
                path: path.clone(),
                source,
            })?;

        let half = image.width() / 2;
        let left = image.crop_imm(0, 0, half, image.height());
        let right = image.crop_imm(half, 0, half, image.height());
        let (a, b) = match self.transform.direction {
            Direction::AtoB => (left, right),
            Direction::BtoA => (right, left),
        };

        let a = self.transform.apply(a, seed);
        let b = self.transform.apply(b, seed);
        Ok(PairItem {
            a: image_to_chw(&a, self.transform.input_nc),
            b: image_to_chw(&b, self.transform.output_nc),
            path: path.clone(),
        })
    }
}

impl Dataset<PairItem> for AlignedDataset {
    fn len(&self) -> usize {
        self.image_paths.len()
    }

    fn get(&self, index: usize) -> Option<PairItem> {
        if index >= self.image_paths.len() {
            return None;
        }
        self.load(index, None).ok()
    }
}

#[derive(Clone, Debug)]
pub struct PairBatcher {
    input_nc: usize,
    output_nc: usize,
    size: usize,
}

impl PairBatcher {
    pub fn new(transform: &PairTransform) -> Self {
        Self {
            input_nc: transform.input_nc,
            output_nc: transform.output_nc,
            size: transform.crop_size as usize,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PairBatch<B: Backend> {
    pub real_a: Tensor<B, 4>, // Shape: [batch_size, input_nc, crop, crop]
    pub real_b: Tensor<B, 4>, // Shape: [batch_size, output_nc, crop, crop]
    pub paths: Vec<PathBuf>,
}

impl<B: Backend> Batcher<B, PairItem, PairBatch<B>> for PairBatcher {
    fn batch(&self, items: Vec<PairItem>, device: &B::Device) -> PairBatch<B> {
        let size = self.size;
        let stack = |planes: Vec<Vec<f32>>, channels: usize| {
            let tensors: Vec<Tensor<B, 4>> = planes
                .into_iter()
                .map(|data| {
                    Tensor::<B, 3>::from_data(
                        TensorData::new(data, [channels, size, size]).convert::<B::FloatElem>(),
                        device,
                    )
                    .reshape([1, channels, size, size])
                })
                .collect();
            Tensor::cat(tensors, 0)
        };

        let mut a_planes = Vec::with_capacity(items.len());
        let mut b_planes = Vec::with_capacity(items.len());
        let mut paths = Vec::with_capacity(items.len());
        for item in items {
            a_planes.push(item.a);
            b_planes.push(item.b);
            paths.push(item.path);
        }

        PairBatch {
            real_a: stack(a_planes, self.input_nc),
            real_b: stack(b_planes, self.output_nc),
            paths,
        }
    }
}

/// Batches an [`AlignedDataset`], reshuffling every pass unless serial.
/// Samples of one batch are decoded in parallel.
///
/// burn's `DataLoader` pulls items through `Dataset::get`, which can only
/// answer `None` for a file that fails to decode, so the sample would vanish
/// from the epoch. Here the decode error fails its batch.
pub struct PairLoader<B: Backend> {
    dataset: AlignedDataset,
    batcher: PairBatcher,
    batch_size: usize,
    shuffle: bool,
    augment: bool,
    rng: StdRng,
    device: B::Device,
}

impl<B: Backend> PairLoader<B> {
    pub fn new(
        dataset: AlignedDataset,
        batch_size: usize,
        shuffle: bool,
        augment: bool,
        seed: u64,
        device: B::Device,
    ) -> Self {
        let batcher = PairBatcher::new(dataset.transform());
        Self {
            dataset,
            batcher,
            batch_size: batch_size.max(1),
            shuffle,
            augment,
            rng: StdRng::seed_from_u64(seed),
            device,
        }
    }

    /// Training split: shuffled (unless `serial_batches`) with random crops.
    pub fn train(config: &TrainingConfig, device: B::Device) -> Result<Self, TrainError> {
        let dataset = AlignedDataset::new(config, Split::Train)?;
        Ok(Self::new(
            dataset,
            config.batch_size,
            !config.serial_batches,
            true,
            config.seed,
            device,
        ))
    }

    /// Evaluation split: in order, one sample per batch, centre crops.
    pub fn eval(config: &TrainingConfig, device: B::Device) -> Result<Self, TrainError> {
        let dataset = AlignedDataset::new(config, Split::Val)?;
        Ok(Self::new(dataset, 1, false, false, config.seed, device))
    }
}

impl<B: Backend> BatchSource for PairLoader<B> {
    type Batch = PairBatch<B>;

    fn num_items(&self) -> usize {
        self.dataset.len()
    }

    fn batches(&mut self) -> Box<dyn Iterator<Item = Result<PairBatch<B>, TrainError>> + '_> {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if self.shuffle {
            order.shuffle(&mut self.rng);
        }

        let mut jobs: Vec<Vec<(usize, Option<u64>)>> = Vec::new();
        for chunk in order.chunks(self.batch_size) {
            let mut job = Vec::with_capacity(chunk.len());
            for &index in chunk {
                let seed = if self.augment {
                    Some(self.rng.next_u64())
                } else {
                    None
                };
                job.push((index, seed));
            }
            jobs.push(job);
        }

        let dataset = &self.dataset;
        let batcher = &self.batcher;
        let device = &self.device;
        Box::new(jobs.into_iter().map(move |job| {
            let items = job
                .par_iter()
                .map(|&(index, seed)| dataset.load(index, seed))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Batcher::<B, PairItem, PairBatch<B>>::batch(
                batcher, items, device,
            ))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use image::{Rgb, RgbImage};

    type TestBackend = NdArray<f32>;

    /// Writes `count` 8x4 images: left half red (A), right half blue (B).
    fn write_pairs(dir: &Path, count: usize) {
        for i in 0..count {
            let mut image = RgbImage::new(8, 4);
            for (x, _, pixel) in image.enumerate_pixels_mut() {
                *pixel = if x < 4 { Rgb([255, 0, 0]) } else { Rgb([0, 0, 255]) };
            }
            image.save(dir.join(format!("{i:03}.png"))).unwrap();
        }
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();
    }

    fn transform(direction: Direction) -> PairTransform {
        PairTransform {
            preprocess: Preprocess::ResizeAndCrop,
            load_size: 4,
            crop_size: 2,
            flip: true,
            direction,
            input_nc: 3,
            output_nc: 1,
        }
    }

    #[test]
    fn empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = AlignedDataset::from_dir(dir.path(), transform(Direction::AtoB)).err();
        assert!(matches!(err, Some(TrainError::EmptyDataset(_))));
    }

    #[test]
    fn splits_halves_by_direction() {
        let dir = tempfile::tempdir().unwrap();
        write_pairs(dir.path(), 1);

        let dataset = AlignedDataset::from_dir(dir.path(), transform(Direction::AtoB)).unwrap();
        assert_eq!(dataset.len(), 1);
        let item = dataset.get(0).unwrap();
        // A is red: R plane at 1.0, B plane at -1.0.
        assert_eq!(item.a.len(), 3 * 2 * 2);
        assert!(item.a[..4].iter().all(|v| (*v - 1.0).abs() < 1e-3));
        assert!(item.a[8..].iter().all(|v| (*v + 1.0).abs() < 1e-3));
        // B is blue and single channel here.
        assert_eq!(item.b.len(), 2 * 2);

        let swapped = AlignedDataset::from_dir(dir.path(), transform(Direction::BtoA)).unwrap();
        let item = swapped.get(0).unwrap();
        assert!(item.a[8..].iter().all(|v| (*v - 1.0).abs() < 1e-3));
    }

    #[test]
    fn loader_covers_every_sample_once_per_pass() {
        let dir = tempfile::tempdir().unwrap();
        write_pairs(dir.path(), 5);
        let dataset = AlignedDataset::from_dir(dir.path(), transform(Direction::AtoB)).unwrap();
        let mut loader = PairLoader::<TestBackend>::new(dataset, 2, true, true, 7, Default::default());

        assert_eq!(loader.num_items(), 5);
        for _ in 0..2 {
            let batches: Vec<PairBatch<TestBackend>> =
                loader.batches().collect::<Result<_, _>>().unwrap();
            let sizes: Vec<usize> = batches.iter().map(|b| b.real_a.dims()[0]).collect();
            assert_eq!(sizes, vec![2, 2, 1]);
            assert_eq!(batches[0].real_a.dims(), [2, 3, 2, 2]);
            assert_eq!(batches[0].real_b.dims(), [2, 1, 2, 2]);

            let mut paths: Vec<PathBuf> = batches.into_iter().flat_map(|b| b.paths).collect();
            paths.sort();
            paths.dedup();
            assert_eq!(paths.len(), 5);
        }
    }

    #[test]
    fn serial_loader_keeps_file_order() {
        let dir = tempfile::tempdir().unwrap();
        write_pairs(dir.path(), 3);
        let dataset = AlignedDataset::from_dir(dir.path(), transform(Direction::AtoB)).unwrap();
        let mut loader = PairLoader::<TestBackend>::new(dataset, 1, false, false, 0, Default::default());

        let names: Vec<String> = loader
            .batches()
            .map(|batch| batch.unwrap().paths[0].file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["000.png", "001.png", "002.png"]);
    }

    #[test]
    fn undecodable_file_fails_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        write_pairs(dir.path(), 1);
        std::fs::write(dir.path().join("broken.png"), b"not a png").unwrap();
        let dataset = AlignedDataset::from_dir(dir.path(), transform(Direction::AtoB)).unwrap();
        assert_eq!(dataset.len(), 2);
        assert!(dataset.get(1).is_none());
        let mut loader = PairLoader::<TestBackend>::new(dataset, 2, false, false, 0, Default::default());

        let first = loader.batches().next().unwrap();
        assert!(matches!(first, Err(TrainError::Sample { .. })));
    }
}
