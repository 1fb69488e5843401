use std::{fmt, path::Path};

use burn::{
    config::Config,
    data::dataloader::DataLoader,
    module::{AutodiffModule, Module},
    optim::{
        momentum::MomentumConfig, GradientsAccumulator, GradientsParams, Optimizer, SgdConfig,
    },
    record::CompactRecorder,
    tensor::{backend::AutodiffBackend, ElementConversion, Tensor},
};

use crate::{
    data::{dataloader, Cifar10Batch, Cifar10Batcher, Cifar10Dataset},
    error::{self, Error},
    evaluation::{evaluate, AccuracyCounters},
    model::{Model, ModelConfig},
};

#[derive(Config)]
pub struct TrainingConfig {
    pub model: ModelConfig,

    pub optimizer: SgdConfig,

    #[config(default = 2)]
    pub epoch_count: usize,

    #[config(default = 4)]
    pub batch_size: usize,

    #[config(default = 42)]
    pub seed: u64,

    #[config(default = 1.0e-3)]
    pub learning_rate: f64,

    #[config(default = 2)]
    pub worker_count: usize,

    /// Batches averaged into each printed loss.
    #[config(default = 2000)]
    pub log_interval: usize,
}

/// Plain SGD with classical momentum: `v = momentum * v + g; p -= lr * v`.
pub fn sgd_with_momentum(momentum: f64) -> SgdConfig {
    SgdConfig::new().with_momentum(Some(
        MomentumConfig::new()
            .with_momentum(momentum)
            .with_dampening(0.0)
            .with_nesterov(false),
    ))
}

/// Gradients of the current step, one entry per parameter.
///
/// Backward passes add into the buffer, so it must be cleared before each one.
pub struct GradientBuffer<M> {
    accumulator: GradientsAccumulator<M>,
}

impl<M> GradientBuffer<M> {
    pub fn new() -> Self {
        Self {
            accumulator: GradientsAccumulator::new(),
        }
    }

    pub fn clear(&mut self) {
        self.accumulator.grads();
    }

    pub fn backward<B: AutodiffBackend>(&mut self, module: &M, loss: Tensor<B, 1>)
    where
        M: AutodiffModule<B>,
    {
        let grads = GradientsParams::from_grads(loss.backward(), module);
        self.accumulator.accumulate(module, grads);
    }

    /// Hands the gradients over and leaves the buffer empty.
    pub fn take(&mut self) -> GradientsParams {
        self.accumulator.grads()
    }
}

impl<M> Default for GradientBuffer<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Running mean of the loss over a fixed window of batches.
#[derive(Debug, Clone)]
pub struct LossTracker {
    interval: usize,
    sum: f64,
    count: usize,
}

impl LossTracker {
    pub fn new(interval: usize) -> Self {
        Self {
            interval,
            sum: 0.0,
            count: 0,
        }
    }

    /// Returns the window mean once `interval` losses were recorded, then starts over.
    pub fn record(&mut self, loss: f64) -> Option<f64> {
        self.sum += loss;
        self.count += 1;

        if self.count != self.interval {
            return None;
        }

        let mean = self.sum / self.interval as f64;
        self.sum = 0.0;
        self.count = 0;

        Some(mean)
    }
}

/// One printed point of the training loss curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossReport {
    pub epoch: usize,
    /// 1-based batch index within the epoch.
    pub batch: usize,
    pub loss: f64,
}

impl fmt::Display for LossReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {:5}] loss: {:.3}", self.epoch, self.batch, self.loss)
    }
}

pub struct Trainer<B: AutodiffBackend, O> {
    optimizer: O,
    gradients: GradientBuffer<Model<B>>,
    epoch_count: usize,
    learning_rate: f64,
    log_interval: usize,
    history: Vec<LossReport>,
}

impl<B, O> Trainer<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<Model<B>, B>,
{
    pub fn new(config: &TrainingConfig, optimizer: O) -> Self {
        Self {
            optimizer,
            gradients: GradientBuffer::new(),
            epoch_count: config.epoch_count,
            learning_rate: config.learning_rate,
            log_interval: config.log_interval,
            history: Vec::new(),
        }
    }

    /// Every loss point reported so far, in order.
    pub fn history(&self) -> &[LossReport] {
        &self.history
    }

    pub fn fit(
        &mut self,
        mut model: Model<B>,
        dataloader: &dyn DataLoader<Cifar10Batch<B>>,
    ) -> Model<B> {
        for epoch in 1..=self.epoch_count {
            log::info!("Starting epoch {epoch}/{}", self.epoch_count);

            let mut tracker = LossTracker::new(self.log_interval);

            for (iteration, batch) in dataloader.iter().enumerate() {
                self.gradients.clear();

                let output = model.forward_classification(batch.images, batch.targets);
                let loss = output.loss.clone().into_scalar().elem::<f64>();

                self.gradients.backward(&model, output.loss);
                model = self
                    .optimizer
                    .step(self.learning_rate, model, self.gradients.take());

                if let Some(loss) = tracker.record(loss) {
                    let report = LossReport {
                        epoch,
                        batch: iteration + 1,
                        loss,
                    };
                    println!("{report}");
                    self.history.push(report);
                }
            }
        }

        model
    }
}

/// Trains on the training split, saves the parameters to `model_path` and
/// evaluates on the test split.
pub fn run<B: AutodiffBackend>(
    data_dir: &Path,
    model_path: &Path,
    config: TrainingConfig,
    device: B::Device,
) -> error::Result<AccuracyCounters> {
    let config_path = model_path.with_extension("json");
    config.save(&config_path).map_err(Error::io(&config_path))?;

    B::seed(config.seed);

    let train = Cifar10Dataset::train(data_dir)?;
    let test = Cifar10Dataset::test(data_dir)?;

    let dataloader_train = dataloader(
        Cifar10Batcher::<B>::new(device.clone()),
        train,
        config.batch_size,
        Some(config.seed),
        config.worker_count,
    );

    let dataloader_test = dataloader(
        Cifar10Batcher::<B::InnerBackend>::new(device.clone()),
        test,
        config.batch_size,
        None,
        config.worker_count,
    );

    let model = config.model.init::<B>(&device);
    let mut trainer = Trainer::new(&config, config.optimizer.init::<B, Model<B>>());

    let model = trainer.fit(model, dataloader_train.as_ref());
    println!("Finished Training");

    model
        .clone()
        .save_file(model_path, &CompactRecorder::new())
        .map_err(Error::Record)?;
    log::info!("Saved model parameters at {}", model_path.display());

    let counters = evaluate(&model.valid(), dataloader_test.as_ref());
    print!("{counters}");

    Ok(counters)
}
