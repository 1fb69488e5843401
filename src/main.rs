use std::path::Path;

use burn::backend::{wgpu::WgpuDevice, Autodiff, Wgpu};
use model::ModelConfig;
use training::{run, sgd_with_momentum, TrainingConfig};

pub mod data;
pub mod error;
pub mod evaluation;
pub mod model;
pub mod module;
pub mod training;

const CLASSES: [&str; 10] = [
    "plane", "car", "bird", "cat", "deer", "dog", "frog", "horse", "ship", "truck",
];

fn main() -> error::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    type Backend = Wgpu<f32, i32>;
    type AutodiffBackend = Autodiff<Backend>;

    let device = WgpuDevice::default();
    println!("{device:?}");

    run::<AutodiffBackend>(
        Path::new("data"),
        Path::new("cifar_net"),
        TrainingConfig::new(ModelConfig::new(CLASSES.len()), sgd_with_momentum(0.9)),
        device,
    )?;

    Ok(())
}
