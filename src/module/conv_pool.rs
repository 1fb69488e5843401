use burn::{module::Module, nn::conv::Conv2d, prelude::*, tensor::activation::relu};
use nn::{
    conv::Conv2dConfig,
    pool::{MaxPool2d, MaxPool2dConfig},
    PaddingConfig2d,
};

/// Convolution followed by ReLU and max pooling.
#[derive(Module, Debug)]
pub struct ConvPool<B: Backend> {
    conv: Conv2d<B>,
    pool: MaxPool2d,
}

impl<B: Backend> ConvPool<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = relu(x);

        self.pool.forward(x)
    }
}

#[derive(Config, Debug)]
pub struct ConvPoolConfig {
    channels: [usize; 2],

    kernel_size: [usize; 2],

    #[config(default = "[2, 2]")]
    pool_size: [usize; 2],
}

impl ConvPoolConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvPool<B> {
        ConvPool {
            conv: Conv2dConfig::new(self.channels, self.kernel_size)
                .with_padding(PaddingConfig2d::Valid)
                .init(device),
            pool: MaxPool2dConfig::new(self.pool_size)
                .with_strides(self.pool_size)
                .init(),
        }
    }
}
