use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use burn::{
    data::{
        dataloader::{batcher::Batcher, DataLoader, DataLoaderBuilder},
        dataset::{Dataset, InMemDataset},
        network::downloader,
    },
    prelude::*,
};
use flate2::read::GzDecoder;
use image::{imageops::FilterType, ImageReader};
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use tar::Archive;

use crate::error::{Error, Result};

const URL: &str = "https://s3.amazonaws.com/fast-ai-sample/cifar10.tgz";
const ARCHIVE_DIR: &str = "cifar10";
const MARKER_FILE: &str = "labels.txt";

// Directory names inside the archive, in label order.
const CLASS_DIRS: [&str; 10] = [
    "airplane",
    "automobile",
    "bird",
    "cat",
    "deer",
    "dog",
    "frog",
    "horse",
    "ship",
    "truck",
];

pub const WIDTH: usize = 32;
pub const HEIGHT: usize = 32;
pub const CHANNEL_COUNT: usize = 3;

// Maps [0, 1] onto [-1, 1].
const MEAN: [f32; 3] = [0.5, 0.5, 0.5];
const STD: [f32; 3] = [0.5, 0.5, 0.5];

#[derive(Debug, Clone, PartialEq)]
pub struct Cifar10Item {
    /// Channel-first RGB pixels.
    pub image: [[[u8; WIDTH]; HEIGHT]; CHANNEL_COUNT],
    pub label: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
}

impl Split {
    fn dir_name(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// One CIFAR-10 split held in memory.
///
/// The PNG release of the dataset is downloaded into `root` on first use and
/// reused afterwards.
pub struct Cifar10Dataset {
    pub dataset: InMemDataset<Cifar10Item>,
}

impl Dataset<Cifar10Item> for Cifar10Dataset {
    fn get(&self, index: usize) -> Option<Cifar10Item> {
        self.dataset.get(index)
    }

    fn len(&self) -> usize {
        self.dataset.len()
    }
}

impl Cifar10Dataset {
    pub fn train(root: &Path) -> Result<Self> {
        Self::new(root, Split::Train)
    }

    pub fn test(root: &Path) -> Result<Self> {
        Self::new(root, Split::Test)
    }

    pub fn new(root: &Path, split: Split) -> Result<Self> {
        let archive_dir = Self::download(root)?;
        let split_dir = archive_dir.join(split.dir_name());

        let items = Self::list_images(&split_dir)?
            .into_par_iter()
            .map(|(path, label)| load_item(&path, label))
            .collect::<Result<Vec<_>>>()?;

        log::info!(
            "Loaded {} {split} images from {}",
            items.len(),
            split_dir.display()
        );

        Ok(Self::from_items(items))
    }

    pub fn from_items(items: Vec<Cifar10Item>) -> Self {
        Self {
            dataset: InMemDataset::new(items),
        }
    }

    /// Fetches and unpacks the archive unless `root` already holds it.
    fn download(root: &Path) -> Result<PathBuf> {
        let archive_dir = root.join(ARCHIVE_DIR);

        if archive_dir.join(MARKER_FILE).exists() {
            log::info!("Using cached CIFAR-10 at {}", archive_dir.display());
            return Ok(archive_dir);
        }

        fs::create_dir_all(root).map_err(Error::io(root))?;

        log::info!("Downloading CIFAR-10 into {}", root.display());
        let bytes = downloader::download_file_as_bytes(URL, "cifar10.tgz");

        let mut archive = Archive::new(GzDecoder::new(&bytes[..]));
        archive.unpack(root).map_err(Error::io(root))?;

        Ok(archive_dir)
    }

    fn list_images(split_dir: &Path) -> Result<Vec<(PathBuf, u8)>> {
        let mut images = Vec::new();

        for (label, name) in CLASS_DIRS.iter().enumerate() {
            let class_dir = split_dir.join(name);
            if !class_dir.is_dir() {
                return Err(Error::MissingClass(class_dir));
            }

            let mut paths = fs::read_dir(&class_dir)
                .map_err(Error::io(&class_dir))?
                .map(|entry| entry.map(|entry| entry.path()))
                .collect::<io::Result<Vec<_>>>()
                .map_err(Error::io(&class_dir))?;

            paths.retain(|path| path.extension().is_some_and(|ext| ext == "png"));
            // read_dir order is platform dependent
            paths.sort();

            log::debug!("{} images in {}", paths.len(), class_dir.display());

            images.extend(paths.into_iter().map(|path| (path, label as u8)));
        }

        Ok(images)
    }
}

fn load_item(path: &Path, label: u8) -> Result<Cifar10Item> {
    let image_raw = ImageReader::open(path)
        .map_err(Error::io(path))?
        .decode()
        .map_err(|source| Error::Image {
            path: path.to_path_buf(),
            source,
        })?;

    let image_raw = if image_raw.width() as usize == WIDTH && image_raw.height() as usize == HEIGHT
    {
        image_raw
    } else {
        image_raw.resize_exact(WIDTH as u32, HEIGHT as u32, FilterType::Triangle)
    };
    let image_raw = image_raw.to_rgb8();

    let mut image = [[[0; WIDTH]; HEIGHT]; CHANNEL_COUNT];

    for (w, h, pixel) in image_raw.enumerate_pixels() {
        let [r, g, b] = pixel.0;
        image[0][h as usize][w as usize] = r;
        image[1][h as usize][w as usize] = g;
        image[2][h as usize][w as usize] = b;
    }

    Ok(Cifar10Item { image, label })
}

#[derive(Clone, Debug)]
pub struct Cifar10Batch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

#[derive(Clone)]
pub struct Cifar10Batcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> Cifar10Batcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<Cifar10Item, Cifar10Batch<B>> for Cifar10Batcher<B> {
    fn batch(&self, items: Vec<Cifar10Item>) -> Cifar10Batch<B> {
        let mean = Tensor::<B, 1>::from_floats(MEAN, &self.device).reshape([1, 3, 1, 1]);
        let std = Tensor::<B, 1>::from_floats(STD, &self.device).reshape([1, 3, 1, 1]);

        let images = items
            .iter()
            .map(|item| TensorData::from(item.image).convert::<B::FloatElem>())
            .map(|data| Tensor::<B, 3>::from_data(data, &self.device))
            .map(|tensor| tensor.reshape([1, CHANNEL_COUNT, HEIGHT, WIDTH]))
            .map(|tensor| tensor / 255.)
            .collect();

        let targets = items
            .iter()
            .map(|item| {
                Tensor::<B, 1, Int>::from_data(
                    [(item.label as i64).elem::<B::IntElem>()],
                    &self.device,
                )
            })
            .collect();

        let images = (Tensor::cat(images, 0) - mean) / std;
        let targets = Tensor::cat(targets, 0);

        Cifar10Batch { images, targets }
    }
}

/// Builds a loader that walks `dataset` once per `iter()` call.
///
/// With a seed, the order is reshuffled over the whole dataset at the start of
/// every pass, and batching stays on the calling thread: burn's worker threads
/// each own a contiguous slice of the dataset and only shuffle inside it.
/// Without a seed, `worker_count` threads prepare batches; a count of zero
/// keeps batching on the calling thread.
pub fn dataloader<B: Backend>(
    batcher: Cifar10Batcher<B>,
    dataset: Cifar10Dataset,
    batch_size: usize,
    shuffle_seed: Option<u64>,
    worker_count: usize,
) -> Arc<dyn DataLoader<Cifar10Batch<B>>> {
    let mut builder = DataLoaderBuilder::new(batcher).batch_size(batch_size);

    match shuffle_seed {
        Some(seed) => {
            if worker_count > 0 {
                log::debug!("Shuffled loader ignores {worker_count} workers");
            }
            builder = builder.shuffle(seed);
        }
        None if worker_count > 0 => {
            builder = builder.num_workers(worker_count);
        }
        None => {}
    }

    builder.build(dataset)
}
