use burn::{prelude::*, tensor::activation::relu, train::ClassificationOutput};
use nn::{loss::CrossEntropyLossConfig, Linear, LinearConfig};

use crate::module::conv_pool::{ConvPool, ConvPoolConfig};

// Spatial size left after both conv/pool stages on a 32x32 input.
const FEATURE_SIZE: usize = 5;
const FEATURE_CHANNELS: usize = 16;

#[derive(Module, Debug)]
pub struct Model<B: Backend> {
    conv1: ConvPool<B>,
    conv2: ConvPool<B>,

    fc1: Linear<B>,
    fc2: Linear<B>,
    fc3: Linear<B>,
}

impl<B: Backend> Model<B> {
    /// Maps `[batch, 3, 32, 32]` images to `[batch, classes]` logits.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.conv1.forward(x);
        let x = self.conv2.forward(x);

        let x: Tensor<B, 2> = x.flatten(1, 3);

        let x = relu(self.fc1.forward(x));
        let x = relu(self.fc2.forward(x));
        self.fc3.forward(x)
    }

    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);

        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }
}

#[derive(Config, Debug)]
pub struct ModelConfig {
    pub classes: usize,

    #[config(default = "[120, 84]")]
    pub hidden: [usize; 2],
}

impl ModelConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Model<B> {
        let [hidden1, hidden2] = self.hidden;

        Model {
            conv1: ConvPoolConfig::new([3, 6], [5, 5]).init(device),
            conv2: ConvPoolConfig::new([6, FEATURE_CHANNELS], [5, 5]).init(device),
            fc1: LinearConfig::new(FEATURE_CHANNELS * FEATURE_SIZE * FEATURE_SIZE, hidden1)
                .init(device),
            fc2: LinearConfig::new(hidden1, hidden2).init(device),
            fc3: LinearConfig::new(hidden2, self.classes).init(device),
        }
    }
}
