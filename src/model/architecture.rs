use burn::{
    nn::{
        BatchNorm, BatchNormConfig, LeakyRelu, LeakyReluConfig, PaddingConfig2d, Relu, Tanh,
        conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
    },
    prelude::*,
};

use crate::config::{GeneratorArch, TrainingConfig};

/// Image-to-image generator: either a ResNet encoder/decoder or a U-Net.
#[derive(Module, Debug)]
pub enum Generator<B: Backend> {
    Resnet(ResnetGenerator<B>),
    Unet(UnetGenerator<B>),
}

#[derive(Module, Debug)]
pub struct ResnetGenerator<B: Backend> {
    stem: Conv2d<B>,
    stem_norm: BatchNorm<B, 2>,
    down: Vec<ConvBlock<B>>,
    blocks: Vec<ResnetBlock<B>>,
    up: Vec<UpConvBlock<B>>,
    head: Conv2d<B>,
    activation: Relu,
    output: Tanh,
}

#[derive(Module, Debug)]
pub struct UnetGenerator<B: Backend> {
    down: Vec<ConvBlock<B>>,
    up: Vec<UpConvBlock<B>>,
    down_activation: LeakyRelu,
    up_activation: Relu,
    output: Tanh,
}

/// PatchGAN discriminator over the channel-wise concatenation of A and B.
#[derive(Module, Debug)]
pub struct Discriminator<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
    head: Conv2d<B>,
    activation: LeakyRelu,
}

#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    norm: Option<BatchNorm<B, 2>>,
}

#[derive(Module, Debug)]
pub struct UpConvBlock<B: Backend> {
    conv: ConvTranspose2d<B>,
    norm: Option<BatchNorm<B, 2>>,
}

#[derive(Module, Debug)]
pub struct ResnetBlock<B: Backend> {
    conv1: Conv2d<B>,
    norm1: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    norm2: BatchNorm<B, 2>,
    activation: Relu,
}

#[derive(Config, Debug)]
pub struct GeneratorConfig {
    pub arch: GeneratorArch,
    pub input_nc: usize,
    pub output_nc: usize,
    #[config(default = 64)]
    pub ngf: usize,
    #[config(default = 2)]
    pub n_downsampling: usize,
}

#[derive(Config, Debug)]
pub struct DiscriminatorConfig {
    /// Channels of A and B together.
    pub input_nc: usize,
    #[config(default = 64)]
    pub ndf: usize,
    #[config(default = 3)]
    pub n_layers: usize,
    #[config(default = "0.2")]
    pub leaky_relu_slope: f64,
}

#[derive(Config, Debug)]
pub struct ModelConfig {
    pub generator: GeneratorConfig,
    pub discriminator: DiscriminatorConfig,
}

impl ModelConfig {
    pub fn from_training(config: &TrainingConfig) -> Self {
        Self {
            generator: GeneratorConfig::new(config.net_g, config.input_nc, config.output_nc)
                .with_ngf(config.ngf)
                .with_n_downsampling(config.n_downsampling),
            discriminator: DiscriminatorConfig::new(config.input_nc + config.output_nc)
                .with_ndf(config.ndf)
                .with_n_layers(config.discriminator_layers()),
        }
    }
}

fn conv<B: Backend>(
    channels: [usize; 2],
    kernel: usize,
    stride: usize,
    padding: usize,
    device: &B::Device,
) -> Conv2d<B> {
    Conv2dConfig::new(channels, [kernel, kernel])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(padding, padding))
        .init(device)
}

fn norm<B: Backend>(enabled: bool, channels: usize, device: &B::Device) -> Option<BatchNorm<B, 2>> {
    enabled.then(|| BatchNormConfig::new(channels).init(device))
}

impl GeneratorConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Generator<B> {
        match self.arch.resnet_blocks() {
            Some(n_blocks) => Generator::Resnet(self.init_resnet(n_blocks, device)),
            None => Generator::Unet(self.init_unet(device)),
        }
    }

    fn init_resnet<B: Backend>(&self, n_blocks: usize, device: &B::Device) -> ResnetGenerator<B> {
        let ngf = self.ngf;
        let down = (0..self.n_downsampling)
            .map(|i| {
                let mult = 1 << i;
                ConvBlock {
                    conv: conv([ngf * mult, ngf * mult * 2], 3, 2, 1, device),
                    norm: norm(true, ngf * mult * 2, device),
                }
            })
            .collect();

        let width = ngf << self.n_downsampling;
        let blocks = (0..n_blocks)
            .map(|_| ResnetBlock {
                conv1: conv([width, width], 3, 1, 1, device),
                norm1: BatchNormConfig::new(width).init(device),
                conv2: conv([width, width], 3, 1, 1, device),
                norm2: BatchNormConfig::new(width).init(device),
                activation: Relu::new(),
            })
            .collect();

        let up = (0..self.n_downsampling)
            .map(|i| {
                let mult = 1 << (self.n_downsampling - i);
                UpConvBlock {
                    conv: ConvTranspose2dConfig::new([ngf * mult, ngf * mult / 2], [3, 3])
                        .with_stride([2, 2])
                        .with_padding([1, 1])
                        .with_padding_out([1, 1])
                        .init(device),
                    norm: norm(true, ngf * mult / 2, device),
                }
            })
            .collect();

        ResnetGenerator {
            stem: conv([self.input_nc, ngf], 7, 1, 3, device),
            stem_norm: BatchNormConfig::new(ngf).init(device),
            down,
            blocks,
            up,
            head: conv([ngf, self.output_nc], 7, 1, 3, device),
            activation: Relu::new(),
            output: Tanh::new(),
        }
    }

    fn init_unet<B: Backend>(&self, device: &B::Device) -> UnetGenerator<B> {
        let depth = self.n_downsampling;
        // Filters double per level up to 8 * ngf.
        let widths: Vec<usize> = (0..depth).map(|i| self.ngf << i.min(3)).collect();

        let down = (0..depth)
            .map(|i| {
                let in_channels = if i == 0 { self.input_nc } else { widths[i - 1] };
                ConvBlock {
                    conv: conv([in_channels, widths[i]], 4, 2, 1, device),
                    norm: norm(i > 0 && i < depth - 1, widths[i], device),
                }
            })
            .collect();

        let up = (0..depth)
            .map(|j| {
                let outermost = j == depth - 1;
                let in_channels = if j == 0 {
                    widths[depth - 1]
                } else {
                    2 * widths[depth - 1 - j]
                };
                let out_channels = if outermost {
                    self.output_nc
                } else {
                    widths[depth - 2 - j]
                };
                UpConvBlock {
                    conv: ConvTranspose2dConfig::new([in_channels, out_channels], [4, 4])
                        .with_stride([2, 2])
                        .with_padding([1, 1])
                        .init(device),
                    norm: norm(!outermost, out_channels, device),
                }
            })
            .collect();

        UnetGenerator {
            down,
            up,
            down_activation: LeakyReluConfig::new().with_negative_slope(0.2).init(),
            up_activation: Relu::new(),
            output: Tanh::new(),
        }
    }
}

impl DiscriminatorConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Discriminator<B> {
        let ndf = self.ndf;
        let mult = |n: usize| 1usize << n.min(3);

        let mut blocks = vec![ConvBlock {
            conv: conv([self.input_nc, ndf], 4, 2, 1, device),
            norm: None,
        }];
        for n in 1..self.n_layers {
            blocks.push(ConvBlock {
                conv: conv([ndf * mult(n - 1), ndf * mult(n)], 4, 2, 1, device),
                norm: norm(true, ndf * mult(n), device),
            });
        }
        let last = self.n_layers;
        blocks.push(ConvBlock {
            conv: conv([ndf * mult(last - 1), ndf * mult(last)], 4, 1, 1, device),
            norm: norm(true, ndf * mult(last), device),
        });

        Discriminator {
            blocks,
            head: conv([ndf * mult(last), 1], 4, 1, 1, device),
            activation: LeakyReluConfig::new()
                .with_negative_slope(self.leaky_relu_slope)
                .init(),
        }
    }
}

impl<B: Backend> ConvBlock<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(input);
        match &self.norm {
            Some(norm) => norm.forward(x),
            None => x,
        }
    }
}

impl<B: Backend> UpConvBlock<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(input);
        match &self.norm {
            Some(norm) => norm.forward(x),
            None => x,
        }
    }
}

impl<B: Backend> ResnetBlock<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = self.conv1.forward(input.clone());
        x = self.norm1.forward(x);
        x = self.activation.forward(x);
        x = self.conv2.forward(x);
        x = self.norm2.forward(x);
        input + x
    }
}

impl<B: Backend> ResnetGenerator<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = self.stem.forward(input);
        x = self.stem_norm.forward(x);
        x = self.activation.forward(x);
        for block in &self.down {
            x = self.activation.forward(block.forward(x));
        }
        for block in &self.blocks {
            x = block.forward(x);
        }
        for block in &self.up {
            x = self.activation.forward(block.forward(x));
        }
        x = self.head.forward(x);
        self.output.forward(x)
    }
}

impl<B: Backend> UnetGenerator<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut skips = Vec::with_capacity(self.down.len());
        let mut x = input;
        for (i, block) in self.down.iter().enumerate() {
            if i > 0 {
                x = self.down_activation.forward(x);
            }
            x = block.forward(x);
            skips.push(x.clone());
        }
        // The innermost output feeds the decoder directly.
        skips.pop();

        for block in &self.up {
            x = self.up_activation.forward(x);
            x = block.forward(x);
            if let Some(skip) = skips.pop() {
                x = Tensor::cat(vec![x, skip], 1);
            }
        }
        self.output.forward(x)
    }
}

impl<B: Backend> Generator<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Generator::Resnet(resnet) => resnet.forward(input),
            Generator::Unet(unet) => unet.forward(input),
        }
    }
}

impl<B: Backend> Discriminator<B> {
    /// Returns per-patch logits `[N, 1, h, w]`.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = input;
        for block in &self.blocks {
            x = self.activation.forward(block.forward(x));
        }
        self.head.forward(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;

    fn images(shape: [usize; 4]) -> Tensor<TestBackend, 4> {
        Tensor::random(shape, Distribution::Uniform(-1.0, 1.0), &Default::default())
    }

    #[test]
    fn resnet_generator_keeps_resolution() {
        let generator = GeneratorConfig::new(GeneratorArch::Resnet6Blocks, 3, 3)
            .with_ngf(4)
            .with_n_downsampling(2)
            .init::<TestBackend>(&Default::default());

        let output = generator.forward(images([2, 3, 16, 16]));
        assert_eq!(output.dims(), [2, 3, 16, 16]);

        let values = output.into_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[test]
    fn unet_generator_maps_channels() {
        let generator = GeneratorConfig::new(GeneratorArch::Unet128, 1, 3)
            .with_ngf(4)
            .with_n_downsampling(4)
            .init::<TestBackend>(&Default::default());

        assert!(matches!(generator, Generator::Unet(_)));
        let output = generator.forward(images([1, 1, 16, 16]));
        assert_eq!(output.dims(), [1, 3, 16, 16]);
    }

    #[test]
    fn discriminator_outputs_patch_logits() {
        let discriminator = DiscriminatorConfig::new(6)
            .with_ndf(4)
            .with_n_layers(3)
            .init::<TestBackend>(&Default::default());

        let output = discriminator.forward(images([1, 6, 32, 32]));
        assert_eq!(output.dims(), [1, 1, 2, 2]);
    }

    #[test]
    fn smallest_accepted_crop_leaves_one_patch() {
        let config = TrainingConfig::new("d".into(), "n".into(), "c".into())
            .with_net_g(GeneratorArch::Resnet6Blocks)
            .with_n_downsampling(2)
            .with_crop_size(24)
            .with_load_size(24)
            .with_ndf(4);
        config.validate().unwrap();

        let model = ModelConfig::from_training(&config);
        let discriminator = model.discriminator.init::<TestBackend>(&Default::default());
        let output = discriminator.forward(images([1, 6, 24, 24]));
        assert_eq!(output.dims(), [1, 1, 1, 1]);
    }

    #[test]
    fn model_config_concatenates_channels_for_discriminator() {
        let config = TrainingConfig::new("d".into(), "n".into(), "c".into())
            .with_input_nc(1)
            .with_output_nc(3);
        let model = ModelConfig::from_training(&config);
        assert_eq!(model.discriminator.input_nc, 4);
        assert_eq!(model.discriminator.n_layers, 3);
        assert_eq!(model.generator.n_downsampling, 8);
    }
}
