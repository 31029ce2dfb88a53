use std::fmt;
use std::str::FromStr;

use burn::module::{Ignored, Param};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{Initializer, PaddingConfig2d};
use burn::prelude::*;
use burn::tensor::activation::relu;
use burn::tensor::module::interpolate;
use burn::tensor::ops::{InterpolateMode, InterpolateOptions};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{self, StackError};
use crate::model::shape::PoolConfig;
use crate::model::variables::{LayerRole, ParamRecord};

/// Direction of a codec stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodecMode {
    /// Convolution followed by downsampling
    Encode,
    /// Upsampling followed by convolution
    Decode,
}

impl CodecMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodecMode::Encode => "encode",
            CodecMode::Decode => "decode",
        }
    }

    /// Scope name used when a codec is not given one
    pub fn default_name(&self) -> &'static str {
        match self {
            CodecMode::Encode => "encoder",
            CodecMode::Decode => "decoder",
        }
    }
}

impl FromStr for CodecMode {
    type Err = StackError;

    fn from_str(s: &str) -> error::Result<Self> {
        match s.to_lowercase().as_str() {
            "encode" | "encoder" => Ok(CodecMode::Encode),
            "decode" | "decoder" => Ok(CodecMode::Decode),
            _ => Err(StackError::InvalidMode(s.to_string())),
        }
    }
}

impl fmt::Display for CodecMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Convolution kernel shape as (height, width, in channels, out channels)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterShape {
    pub height: usize,
    pub width: usize,
    pub in_channels: usize,
    pub out_channels: usize,
}

impl FilterShape {
    pub fn new(size: [usize; 2], in_channels: usize, out_channels: usize) -> Self {
        Self {
            height: size[0],
            width: size[1],
            in_channels,
            out_channels,
        }
    }

    /// Check the shape before any tensor is allocated for it
    pub fn validate(&self) -> error::Result<()> {
        if self.in_channels == 0 || self.out_channels == 0 {
            return Err(StackError::ConfigMismatch(format!(
                "filter {self} must have positive channel counts"
            )));
        }
        // SAME convolution needs a centre cell
        if self.height % 2 == 0 || self.width % 2 == 0 {
            return Err(StackError::ConfigMismatch(format!(
                "filter {self} must have odd height and width"
            )));
        }
        Ok(())
    }
}

impl fmt::Display for FilterShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}, {}, {}]",
            self.height, self.width, self.in_channels, self.out_channels
        )
    }
}

/// Single encode or decode stage configuration
#[derive(Config, Debug)]
pub struct CodecConfig {
    /// Stack depth this codec belongs to
    pub layer: usize,
    /// Encode or decode
    pub mode: CodecMode,
    /// Kernel shape
    pub filter: FilterShape,
    /// Standard deviation of the kernel initialiser
    #[config(default = 5e-2)]
    pub stddev: f64,
    /// Scope name, defaults to `encoder`/`decoder` by mode
    pub name: Option<String>,
    /// Output spatial size, required when decoding
    pub target_size: Option<[usize; 2]>,
    /// Downsampling window, used when encoding
    #[config(default = "PoolConfig::default()")]
    pub pool: PoolConfig,
}

/// Static description of a built codec
#[derive(Debug, Clone)]
pub struct CodecSpec {
    pub name: String,
    pub layer: usize,
    pub mode: CodecMode,
    pub filter: FilterShape,
    pub target_size: Option<[usize; 2]>,
    pub pool: PoolConfig,
    pub frozen: bool,
}

/// One convolution + ReLU block, with nearest-neighbour upsampling in front
/// (decode) or SAME max-pooling behind (encode).
#[derive(Module, Debug)]
pub struct Codec<B: Backend> {
    conv: Conv2d<B>,
    pool: Option<MaxPool2d>,
    spec: Ignored<CodecSpec>,
}

impl CodecConfig {
    /// Validate and allocate the codec parameters
    pub fn init<B: Backend>(&self, device: &B::Device) -> error::Result<Codec<B>> {
        self.filter.validate()?;

        let target_size = match (self.mode, self.target_size) {
            (CodecMode::Decode, None) => return Err(StackError::MissingArgument("target_size")),
            (CodecMode::Decode, Some(size)) if size.contains(&0) => {
                return Err(StackError::ConfigMismatch(format!(
                    "decode target size {size:?} must be positive"
                )));
            }
            (CodecMode::Decode, Some(size)) => Some(size),
            (CodecMode::Encode, _) => None,
        };

        let pool = match self.mode {
            CodecMode::Encode => {
                self.pool.validate()?;
                Some(
                    MaxPool2dConfig::new(self.pool.ksize)
                        .with_strides(self.pool.strides)
                        .init(),
                )
            }
            CodecMode::Decode => None,
        };

        let name = self
            .name
            .clone()
            .unwrap_or_else(|| self.mode.default_name().to_string());

        let mut conv = Conv2dConfig::new(
            [self.filter.in_channels, self.filter.out_channels],
            [self.filter.height, self.filter.width],
        )
        .with_padding(PaddingConfig2d::Same)
        .with_initializer(Initializer::Normal {
            mean: 0.0,
            std: self.stddev,
        })
        .init(device);
        conv.bias = Some(Param::from_tensor(Tensor::zeros(
            [self.filter.out_channels],
            device,
        )));

        debug!("Allocated {} with filter {}", name, self.filter);

        Ok(Codec {
            conv,
            pool,
            spec: Ignored(CodecSpec {
                name,
                layer: self.layer,
                mode: self.mode,
                filter: self.filter,
                target_size,
                pool: self.pool,
                frozen: false,
            }),
        })
    }
}

impl<B: Backend> Codec<B> {
    /// Run the stage on a `[batch, channels, height, width]` tensor
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = match self.spec.target_size {
            Some(size) => interpolate(
                input,
                size,
                InterpolateOptions::new(InterpolateMode::Nearest),
            ),
            None => input,
        };

        let activation = relu(self.conv.forward(x));
        activation_summary(&self.spec.name, &activation);

        match &self.pool {
            Some(pool) => {
                let [_, _, height, width] = activation.dims();
                let [(top, bottom), (left, right)] = self.spec.pool.same_padding([height, width]);
                // zero padding is neutral for max-pooling after ReLU
                let padded = activation.pad((left, right, top, bottom), 0.0);
                pool.forward(padded)
            }
            None => activation,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn layer(&self) -> usize {
        self.spec.layer
    }

    pub fn mode(&self) -> CodecMode {
        self.spec.mode
    }

    pub fn is_frozen(&self) -> bool {
        self.spec.frozen
    }

    /// Kernel in burn layout `[out, in, height, width]`
    pub fn kernel(&self) -> Tensor<B, 4> {
        self.conv.weight.val()
    }

    pub fn bias(&self) -> Option<Tensor<B, 1>> {
        self.conv.bias.as_ref().map(|bias| bias.val())
    }

    /// Stop gradient tracking for every parameter of this codec
    pub fn freeze(self) -> Self {
        let mut codec = self.no_grad();
        codec.spec.0.frozen = true;
        codec
    }

    /// Parameter handles owned by this codec, named under `scope`
    pub fn param_records(&self, scope: &str) -> Vec<ParamRecord> {
        let role = LayerRole::from(self.spec.mode);
        let trainable = !self.spec.frozen;
        let prefix = format!("{}/{}", scope, self.spec.name);

        let mut records = vec![ParamRecord {
            id: self.conv.weight.id,
            name: format!("{prefix}/weights"),
            layer: self.spec.layer,
            role,
            shape: self.conv.weight.val().dims().to_vec(),
            trainable,
        }];
        if let Some(bias) = &self.conv.bias {
            records.push(ParamRecord {
                id: bias.id,
                name: format!("{prefix}/biases"),
                layer: self.spec.layer,
                role,
                shape: bias.val().dims().to_vec(),
                trainable,
            });
        }
        records
    }
}

/// Report the distribution of a post-activation tensor.
///
/// Only computed when debug logging is enabled, since reading statistics back
/// synchronises the device.
pub fn activation_summary<B: Backend, const D: usize>(name: &str, activation: &Tensor<B, D>) {
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return;
    }

    let count = activation.shape().num_elements().max(1) as f64;
    let mean = activation.clone().mean().into_scalar().elem::<f64>();
    let zeros = activation
        .clone()
        .equal_elem(0.0)
        .int()
        .sum()
        .into_scalar()
        .elem::<f64>();

    trace!(codec = name, dims = ?activation.dims(), "activation");
    debug!(
        "{} activation: mean {:.4}, sparsity {:.4}",
        name,
        mean,
        zeros / count
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn device() -> <TestBackend as Backend>::Device {
        <TestBackend as Backend>::Device::default()
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("encode".parse::<CodecMode>().unwrap(), CodecMode::Encode);
        assert_eq!("Decoder".parse::<CodecMode>().unwrap(), CodecMode::Decode);

        let err = "sideways".parse::<CodecMode>().unwrap_err();
        assert_eq!(err, StackError::InvalidMode("sideways".to_string()));
    }

    #[test]
    fn test_encode_halves_spatial_size() {
        let codec = CodecConfig::new(0, CodecMode::Encode, FilterShape::new([3, 3], 3, 8))
            .init::<TestBackend>(&device())
            .unwrap();
        assert_eq!(codec.name(), "encoder");

        let input = Tensor::<TestBackend, 4>::ones([2, 3, 9, 6], &device());
        let output = codec.forward(input);
        assert_eq!(output.dims(), [2, 8, 5, 3]);
    }

    #[test]
    fn test_decode_requires_target_size() {
        let err = CodecConfig::new(0, CodecMode::Decode, FilterShape::new([3, 3], 8, 3))
            .init::<TestBackend>(&device())
            .unwrap_err();
        assert_eq!(err, StackError::MissingArgument("target_size"));
    }

    #[test]
    fn test_decode_upsamples_to_target() {
        let codec = CodecConfig::new(1, CodecMode::Decode, FilterShape::new([3, 3], 8, 4))
            .with_name(Some("decoder/hidden_1".to_string()))
            .with_target_size(Some([9, 6]))
            .init::<TestBackend>(&device())
            .unwrap();
        assert_eq!(codec.name(), "decoder/hidden_1");

        let input = Tensor::<TestBackend, 4>::ones([1, 8, 5, 3], &device());
        assert_eq!(codec.forward(input).dims(), [1, 4, 9, 6]);
    }

    #[test]
    fn test_config_json_round_trip() {
        let config = CodecConfig::new(2, CodecMode::Decode, FilterShape::new([5, 3], 8, 4))
            .with_name(Some("decoder/hidden_2".to_string()))
            .with_target_size(Some([9, 7]));
        let json = serde_json::to_string(&config).unwrap();
        let restored: CodecConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.layer, 2);
        assert_eq!(restored.mode, CodecMode::Decode);
        assert_eq!(restored.filter, config.filter);
        assert_eq!(restored.target_size, Some([9, 7]));
        assert_eq!(restored.stddev, 5e-2);
    }

    #[rustfmt::skip]
    #[test]
    fn test_nearest_upsampling_repeats_cells() {
        let input = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(vec![1.0f32, 2.0, 3.0, 4.0], [1, 1, 2, 2]),
            &device(),
        );
        let output = interpolate(
            input,
            [4, 4],
            InterpolateOptions::new(InterpolateMode::Nearest),
        );
        let expected = TensorData::new(
            vec![
                1.0f32, 1.0, 2.0, 2.0,
                1.0, 1.0, 2.0, 2.0,
                3.0, 3.0, 4.0, 4.0,
                3.0, 3.0, 4.0, 4.0,
            ],
            [1, 1, 4, 4],
        );
        output.into_data().assert_eq(&expected, false);
    }

    #[test]
    fn test_bias_starts_at_zero() {
        let codec = CodecConfig::new(0, CodecMode::Encode, FilterShape::new([3, 3], 1, 4))
            .init::<TestBackend>(&device())
            .unwrap();
        let bias = codec.bias().unwrap();
        assert_eq!(bias.dims(), [4]);
        assert_eq!(bias.abs().sum().into_scalar(), 0.0);
        assert_eq!(codec.kernel().dims(), [4, 1, 3, 3]);
    }

    #[test]
    fn test_even_filter_is_rejected_before_allocation() {
        let err = CodecConfig::new(0, CodecMode::Encode, FilterShape::new([2, 2], 1, 4))
            .init::<TestBackend>(&device())
            .unwrap_err();
        assert!(matches!(err, StackError::ConfigMismatch(_)));
    }

    #[test]
    fn test_param_records_and_freeze() {
        let codec = CodecConfig::new(2, CodecMode::Encode, FilterShape::new([3, 3], 1, 4))
            .with_name(Some("encoder/hidden_2".to_string()))
            .init::<TestBackend>(&device())
            .unwrap();

        let records = codec.param_records("scope");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "scope/encoder/hidden_2/weights");
        assert_eq!(records[1].name, "scope/encoder/hidden_2/biases");
        assert!(records.iter().all(|r| r.trainable && r.layer == 2));
        assert!(records.iter().all(|r| r.role == LayerRole::Encoder));

        let frozen = codec.freeze();
        assert!(frozen.is_frozen());
        assert!(frozen.param_records("scope").iter().all(|r| !r.trainable));
    }
}
