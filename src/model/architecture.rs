use burn::module::Ignored;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use tracing::{debug, info};

use crate::error::{Result, StackError};
use crate::model::codec::{Codec, CodecConfig, CodecMode, FilterShape};
use crate::model::gate::{self, ControlHandle, ControlSignal};
use crate::model::shape::{ImageShape, PoolConfig, ShapeHistory};
use crate::model::variables::{filter_trainable, LayerRole, ParamRecord, VariableIndex};
use crate::model::StackedAutoencoderConfig;

/// Validated plan of a stack: channel counts, kernels and spatial sizes
#[derive(Debug, Clone, PartialEq)]
pub struct StackLayout {
    pub scope: String,
    pub input: ImageShape,
    /// `[in_channels, hidden_outputs...]`
    pub channels: Vec<usize>,
    /// One kernel size per layer
    pub filter_sizes: Vec<[usize; 2]>,
    pub pool: PoolConfig,
    pub stddev: f64,
    pub shapes: ShapeHistory,
}

impl StackLayout {
    /// Check every precondition of `config` and compute the stage shapes.
    ///
    /// Nothing is allocated here, so a failing plan leaves no state behind.
    pub fn plan(config: &StackedAutoencoderConfig) -> Result<Self> {
        let input = config.input_shape.known()?;
        let layer_num = config.layer_num;

        if layer_num == 0 {
            return Err(StackError::ConfigMismatch(
                "layer_num must be at least 1".to_string(),
            ));
        }
        if config.hidden_outputs.len() != layer_num {
            return Err(StackError::ConfigMismatch(format!(
                "hidden_outputs has {} entries, expected layer_num = {}",
                config.hidden_outputs.len(),
                layer_num
            )));
        }

        let filter_sizes = match config.filter_sizes.len() {
            1 => vec![config.filter_sizes[0]; layer_num],
            len if len == layer_num => config.filter_sizes.clone(),
            len => {
                return Err(StackError::ConfigMismatch(format!(
                    "filter_sizes has {len} entries, expected 1 or layer_num = {layer_num}"
                )));
            }
        };

        config.pool.validate()?;
        if !(config.stddev.is_finite() && config.stddev > 0.0) {
            return Err(StackError::ConfigMismatch(format!(
                "stddev must be positive, got {}",
                config.stddev
            )));
        }

        let mut channels = Vec::with_capacity(layer_num + 1);
        channels.push(input.channels);
        channels.extend_from_slice(&config.hidden_outputs);

        let layout = Self {
            scope: config.scope.clone(),
            input,
            channels,
            filter_sizes,
            pool: config.pool,
            stddev: config.stddev,
            shapes: ShapeHistory::plan(input.size(), layer_num, &config.pool),
        };

        for layer in 0..layer_num {
            layout.encoder_filter(layer).validate()?;
            layout.decoder_filter(layer).validate()?;
        }

        Ok(layout)
    }

    pub fn layer_num(&self) -> usize {
        self.filter_sizes.len()
    }

    /// Kernel of encoder `layer`: `ch[layer] -> ch[layer + 1]`
    pub fn encoder_filter(&self, layer: usize) -> FilterShape {
        FilterShape::new(
            self.filter_sizes[layer],
            self.channels[layer],
            self.channels[layer + 1],
        )
    }

    /// Kernel of decoder `layer`: `ch[layer + 1] -> ch[layer]`
    pub fn decoder_filter(&self, layer: usize) -> FilterShape {
        FilterShape::new(
            self.filter_sizes[layer],
            self.channels[layer + 1],
            self.channels[layer],
        )
    }

    pub fn encoder_name(layer: usize) -> String {
        format!("encoder/hidden_{layer}")
    }

    pub fn decoder_name(layer: usize) -> String {
        format!("decoder/hidden_{layer}")
    }

    /// Compare `[batch, channels, height, width]` dims with the planned input
    pub fn check_input(&self, dims: [usize; 4]) -> Result<()> {
        let [_, channels, height, width] = dims;
        let expected = [self.input.channels, self.input.height, self.input.width];
        if [channels, height, width] != expected {
            return Err(StackError::InputMismatch { expected, actual: dims });
        }
        Ok(())
    }
}

/// Stacked convolutional autoencoder.
///
/// `encoders[i]` and `decoders[i]` together form hidden layer `i`.
#[derive(Module, Debug)]
pub struct StackedAutoencoder<B: Backend> {
    encoders: Vec<Codec<B>>,
    decoders: Vec<Codec<B>>,
    layout: Ignored<StackLayout>,
}

/// Tensors produced by one forward pass
#[derive(Debug, Clone)]
pub struct StackOutput<B: Backend> {
    encoded: Vec<Tensor<B, 4>>,
    decoded: Tensor<B, 4>,
}

impl StackedAutoencoderConfig {
    /// Validate the configuration and allocate every codec of the stack
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<StackedAutoencoder<B>> {
        let layout = StackLayout::plan(self)?;
        let layer_num = layout.layer_num();

        let mut encoders = Vec::with_capacity(layer_num);
        let mut decoders = Vec::with_capacity(layer_num);
        for layer in 0..layer_num {
            let encoder = CodecConfig::new(layer, CodecMode::Encode, layout.encoder_filter(layer))
                .with_name(Some(StackLayout::encoder_name(layer)))
                .with_stddev(layout.stddev)
                .with_pool(layout.pool)
                .init(device)?;

            // decoder `layer` restores the size its encoder consumed
            let target = layout.shapes.at(layer);
            let decoder = CodecConfig::new(layer, CodecMode::Decode, layout.decoder_filter(layer))
                .with_name(Some(StackLayout::decoder_name(layer)))
                .with_stddev(layout.stddev)
                .with_target_size(target)
                .init(device)?;

            encoders.push(encoder);
            decoders.push(decoder);
        }

        info!(
            "Built {} with {} layers, channels {:?}",
            layout.scope, layer_num, layout.channels
        );
        for (depth, size) in layout.shapes.iter().enumerate() {
            debug!("  depth {}: {:?}", depth, size);
        }

        Ok(StackedAutoencoder {
            encoders,
            decoders,
            layout: Ignored(layout),
        })
    }
}

impl<B: Backend> StackedAutoencoder<B> {
    /// Run encode and decode stages under `control`.
    ///
    /// Layers at or beyond `control.unlocked()` are bypassed: their encoder is
    /// fed zeros and the decoder below them reads the matching encoded output
    /// instead of the deeper reconstruction.
    pub fn forward(&self, input: Tensor<B, 4>, control: ControlSignal) -> Result<StackOutput<B>> {
        self.layout.check_input(input.dims())?;
        let layer_num = self.layer_num();

        let mut encoded = Vec::with_capacity(layer_num + 1);
        encoded.push(input);
        for (i, encoder) in self.encoders.iter().enumerate() {
            let previous = encoded[i].clone();
            let stage_input = if i == 0 {
                previous
            } else {
                let bypass = previous.zeros_like();
                gate::select(control, i, previous, bypass)
            };
            encoded.push(encoder.forward(stage_input));
        }

        let innermost = layer_num - 1;
        let mut decoded = self.decoders[innermost].forward(encoded[layer_num].clone());
        for i in (0..innermost).rev() {
            let stage_input = gate::select(control, i + 1, decoded, encoded[i + 1].clone());
            decoded = self.decoders[i].forward(stage_input);
        }

        Ok(StackOutput { encoded, decoded })
    }

    /// Full reconstruction with every layer unlocked
    pub fn reconstruct(&self, input: Tensor<B, 4>) -> Result<Tensor<B, 4>> {
        let control = ControlSignal::all(self.layer_num());
        Ok(self.forward(input, control)?.into_decoded())
    }

    pub fn control_signal(&self) -> ControlHandle {
        ControlHandle::new(self.layer_num())
    }

    pub fn layout(&self) -> &StackLayout {
        &self.layout
    }

    pub fn shape_history(&self) -> &ShapeHistory {
        &self.layout.shapes
    }

    pub fn layer_num(&self) -> usize {
        self.encoders.len()
    }

    pub fn channels(&self) -> &[usize] {
        &self.layout.channels
    }

    pub fn scope(&self) -> &str {
        &self.layout.scope
    }

    pub fn encoder(&self, layer: usize) -> Option<&Codec<B>> {
        self.encoders.get(layer)
    }

    pub fn decoder(&self, layer: usize) -> Option<&Codec<B>> {
        self.decoders.get(layer)
    }

    /// Parameters of encoder and decoder `layer`.
    ///
    /// `None` and `Some(true)` return trainable parameters only, `Some(false)`
    /// returns all of them. A layer that was never built yields nothing.
    pub fn variables_for_layer(&self, layer: usize, trainable: Option<bool>) -> Vec<ParamRecord> {
        let records = [self.encoders.get(layer), self.decoders.get(layer)]
            .into_iter()
            .flatten()
            .flat_map(|codec| codec.param_records(self.scope()))
            .collect();
        filter_trainable(records, trainable)
    }

    /// Snapshot of every parameter, trainable or not
    pub fn variable_index(&self) -> VariableIndex {
        let mut index = VariableIndex::new();
        for codec in self.encoders.iter().chain(self.decoders.iter()) {
            index.insert(
                codec.layer(),
                LayerRole::from(codec.mode()),
                codec.param_records(self.scope()),
            );
        }
        index
    }

    /// Stop training encoder and decoder `layer`
    pub fn freeze_layer(self, layer: usize) -> Self {
        let freeze = |codecs: Vec<Codec<B>>| -> Vec<Codec<B>> {
            codecs
                .into_iter()
                .map(|codec| if codec.layer() == layer { codec.freeze() } else { codec })
                .collect()
        };

        debug!("Freezing layer {}", layer);
        Self {
            encoders: freeze(self.encoders),
            decoders: freeze(self.decoders),
            layout: self.layout,
        }
    }
}

impl<B: Backend> StackOutput<B> {
    /// Encoded output at depth `index`, the deepest code when `None`.
    ///
    /// Depth 0 is the input itself.
    pub fn encoded(&self, index: Option<usize>) -> Result<&Tensor<B, 4>> {
        let layer_num = self.layer_num();
        let index = index.unwrap_or(layer_num);
        self.encoded
            .get(index)
            .ok_or(StackError::IndexOutOfRange { index, layer_num })
    }

    pub fn encodings(&self) -> &[Tensor<B, 4>] {
        &self.encoded
    }

    pub fn decoded(&self) -> &Tensor<B, 4> {
        &self.decoded
    }

    pub fn into_decoded(self) -> Tensor<B, 4> {
        self.decoded
    }

    pub fn layer_num(&self) -> usize {
        self.encoded.len() - 1
    }
}

impl<B: AutodiffBackend> StackOutput<B> {
    /// Detach from the autodiff graph
    pub fn inner(self) -> StackOutput<B::InnerBackend> {
        StackOutput {
            encoded: self.encoded.into_iter().map(|t| t.inner()).collect(),
            decoded: self.decoded.inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::shape::InputShape;
    use burn::backend::NdArray;
    use std::collections::HashSet;

    type TestBackend = NdArray<f32>;

    fn device() -> <TestBackend as Backend>::Device {
        <TestBackend as Backend>::Device::default()
    }

    fn build(config: &StackedAutoencoderConfig) -> StackedAutoencoder<TestBackend> {
        config.init::<TestBackend>(&device()).unwrap()
    }

    #[test]
    fn test_round_trip_shapes() {
        let model = build(&StackedAutoencoderConfig::rgb_default());
        let input = Tensor::<TestBackend, 4>::random(
            [2, 3, 64, 64],
            burn::tensor::Distribution::Uniform(0.0, 1.0),
            &device(),
        );

        let output = model.forward(input.clone(), ControlSignal::all(2)).unwrap();
        assert_eq!(output.decoded().dims(), [2, 3, 64, 64]);
        assert_eq!(output.encodings().len(), 3);
        assert_eq!(output.encoded(Some(1)).unwrap().dims(), [2, 16, 32, 32]);
        assert_eq!(output.encoded(Some(2)).unwrap().dims(), [2, 32, 16, 16]);
        output
            .encoded(Some(0))
            .unwrap()
            .to_data()
            .assert_eq(&input.into_data(), true);
    }

    #[test]
    fn test_odd_sizes_are_restored() {
        let config = StackedAutoencoderConfig::new(InputShape::image(7, 5, 1), 2, vec![4, 4]);
        let model = build(&config);
        assert_eq!(
            model.shape_history().iter().copied().collect::<Vec<_>>(),
            vec![[7, 5], [4, 3], [2, 2]]
        );

        let input = Tensor::<TestBackend, 4>::ones([3, 1, 7, 5], &device());
        let decoded = model.reconstruct(input).unwrap();
        assert_eq!(decoded.dims(), [3, 1, 7, 5]);
    }

    #[test]
    fn test_encoded_index_bounds() {
        let model = build(&StackedAutoencoderConfig::small());
        let input = Tensor::<TestBackend, 4>::ones([1, 1, 28, 28], &device());
        let output = model.forward(input, ControlSignal::all(2)).unwrap();

        let err = output.encoded(Some(3)).unwrap_err();
        assert_eq!(err, StackError::IndexOutOfRange { index: 3, layer_num: 2 });

        let deepest = output.encoded(None).unwrap().to_data();
        deepest.assert_eq(&output.encoded(Some(2)).unwrap().to_data(), true);
    }

    #[test]
    fn test_variables_for_layer_is_exact() {
        let config = StackedAutoencoderConfig::new(InputShape::image(16, 16, 1), 3, vec![2, 3, 4]);
        let model = build(&config);

        let records = model.variables_for_layer(1, None);
        assert_eq!(records.len(), 4);
        for record in &records {
            assert!(
                record.name.starts_with("stack_autoencoder/encoder/hidden_1/")
                    || record.name.starts_with("stack_autoencoder/decoder/hidden_1/"),
                "unexpected {}",
                record.name
            );
        }
        assert_eq!(records[0].shape, vec![3, 2, 3, 3]);
        assert!(model.variables_for_layer(99, None).is_empty());
    }

    #[test]
    fn test_encoder_gating_follows_control() {
        let config = StackedAutoencoderConfig::new(InputShape::image(16, 16, 2), 3, vec![4, 4, 4]);
        let model = build(&config);
        let input = Tensor::<TestBackend, 4>::random(
            [2, 2, 16, 16],
            burn::tensor::Distribution::Uniform(0.0, 1.0),
            &device(),
        );

        for unlocked in 0..=3 {
            let output = model.forward(input.clone(), ControlSignal::new(unlocked)).unwrap();
            for i in 1..3 {
                let previous = output.encoded(Some(i)).unwrap().clone();
                let effective = if i < unlocked { previous.clone() } else { previous.zeros_like() };
                let expected = model.encoder(i).unwrap().forward(effective);
                output
                    .encoded(Some(i + 1))
                    .unwrap()
                    .to_data()
                    .assert_eq(&expected.into_data(), true);
            }
        }
    }

    #[test]
    fn test_decoder_gating_follows_control() {
        let config = StackedAutoencoderConfig::new(InputShape::image(8, 8, 1), 2, vec![2, 4]);
        let model = build(&config);
        let input = Tensor::<TestBackend, 4>::ones([1, 1, 8, 8], &device());

        // layer 1 locked: decoder 0 reads encoder 0's output
        let output = model.forward(input.clone(), ControlSignal::new(1)).unwrap();
        let expected = model
            .decoder(0)
            .unwrap()
            .forward(output.encoded(Some(1)).unwrap().clone());
        output.decoded().to_data().assert_eq(&expected.into_data(), true);

        // full stack: decoder 0 reads decoder 1's reconstruction
        let output = model.forward(input, ControlSignal::new(2)).unwrap();
        let inner = model
            .decoder(1)
            .unwrap()
            .forward(output.encoded(Some(2)).unwrap().clone());
        let expected = model.decoder(0).unwrap().forward(inner);
        output.decoded().to_data().assert_eq(&expected.into_data(), true);
    }

    #[test]
    fn test_decoder_chain_for_every_control_value() {
        let config = StackedAutoencoderConfig::new(InputShape::image(9, 7, 2), 3, vec![3, 4, 5])
            .with_pool(PoolConfig::new([3, 3], [2, 2]));
        let model = build(&config);
        let input = Tensor::<TestBackend, 4>::random(
            [2, 2, 9, 7],
            burn::tensor::Distribution::Uniform(0.0, 1.0),
            &device(),
        );
        let decode = |layer: usize, x: Tensor<TestBackend, 4>| model.decoder(layer).unwrap().forward(x);

        for value in 0..=4 {
            let output = model.forward(input.clone(), ControlSignal::new(value)).unwrap();
            let code = |depth: usize| output.encoded(Some(depth)).unwrap().clone();

            // the deepest unlocked decoder reads its own encoder's code
            let expected = match value {
                0 | 1 => decode(0, code(1)),
                2 => decode(0, decode(1, code(2))),
                _ => decode(0, decode(1, decode(2, code(3)))),
            };
            assert_eq!(output.decoded().dims(), [2, 2, 9, 7]);
            output.decoded().to_data().assert_eq(&expected.into_data(), true);
        }
    }

    #[test]
    fn test_invalid_configs_fail_before_allocation() {
        let unknown = InputShape::from_dims([Some(4), Some(64), None, Some(3)]);
        let err = StackedAutoencoderConfig::new(unknown, 2, vec![16, 32])
            .init::<TestBackend>(&device())
            .unwrap_err();
        assert!(matches!(err, StackError::UnknownShape { .. }));

        let err = StackedAutoencoderConfig::new(InputShape::image(64, 64, 3), 3, vec![16, 32])
            .init::<TestBackend>(&device())
            .unwrap_err();
        assert!(matches!(err, StackError::ConfigMismatch(_)));

        let err = StackedAutoencoderConfig::new(InputShape::image(64, 64, 3), 2, vec![16, 32])
            .with_filter_sizes(vec![[3, 3], [3, 3], [3, 3]])
            .init::<TestBackend>(&device())
            .unwrap_err();
        assert!(matches!(err, StackError::ConfigMismatch(_)));

        let err = StackedAutoencoderConfig::new(InputShape::image(64, 64, 3), 0, vec![])
            .init::<TestBackend>(&device())
            .unwrap_err();
        assert!(matches!(err, StackError::ConfigMismatch(_)));
    }

    #[test]
    fn test_per_layer_filter_sizes() {
        let config = StackedAutoencoderConfig::new(InputShape::image(16, 16, 3), 2, vec![4, 8])
            .with_filter_sizes(vec![[5, 5], [3, 3]]);
        let layout = StackLayout::plan(&config).unwrap();
        assert_eq!(layout.encoder_filter(0), FilterShape::new([5, 5], 3, 4));
        assert_eq!(layout.decoder_filter(1), FilterShape::new([3, 3], 8, 4));
        assert_eq!(layout.channels, vec![3, 4, 8]);
    }

    #[test]
    fn test_forward_rejects_wrong_input() {
        let model = build(&StackedAutoencoderConfig::small());
        let input = Tensor::<TestBackend, 4>::ones([1, 3, 28, 28], &device());
        let err = model.forward(input, ControlSignal::all(2)).unwrap_err();
        assert_eq!(
            err,
            StackError::InputMismatch {
                expected: [1, 28, 28],
                actual: [1, 3, 28, 28],
            }
        );
    }

    #[test]
    fn test_scopes_do_not_share_parameters() {
        let a = build(&StackedAutoencoderConfig::small().with_scope("a".to_string()));
        let b = build(&StackedAutoencoderConfig::small().with_scope("b".to_string()));

        let collect = |model: &StackedAutoencoder<TestBackend>| {
            (0..model.layer_num())
                .flat_map(|layer| model.variables_for_layer(layer, Some(false)))
                .collect::<Vec<_>>()
        };
        let (records_a, records_b) = (collect(&a), collect(&b));

        let ids: HashSet<_> = records_a.iter().map(|r| r.id).collect();
        let names: HashSet<_> = records_a.iter().map(|r| r.name.clone()).collect();
        assert!(records_b.iter().all(|r| !ids.contains(&r.id)));
        assert!(records_b.iter().all(|r| !names.contains(&r.name)));

        let input = Tensor::<TestBackend, 4>::ones([1, 1, 28, 28], &device());
        assert_eq!(b.reconstruct(input).unwrap().dims(), [1, 1, 28, 28]);
    }

    #[test]
    fn test_freeze_layer() {
        let model = build(&StackedAutoencoderConfig::small()).freeze_layer(0);

        assert!(model.variables_for_layer(0, None).is_empty());
        assert!(model.variables_for_layer(0, Some(true)).is_empty());
        assert_eq!(model.variables_for_layer(0, Some(false)).len(), 4);
        assert_eq!(model.variables_for_layer(1, None).len(), 4);
        assert!(model.encoder(0).unwrap().is_frozen());
        assert!(model.decoder(0).unwrap().is_frozen());
    }

    #[test]
    fn test_variable_index_snapshot() {
        let model = build(&StackedAutoencoderConfig::small());
        let index = model.variable_index();

        assert_eq!(index.layers(), vec![0, 1]);
        assert_eq!(index.get(1, LayerRole::Decoder).len(), 2);
        // 1->8 and 8->16 encoders plus the mirrored decoders, 3x3 kernels
        let expected = 2 * (9 * 8 + 9 * 8 * 16) + (8 + 16) + (1 + 8);
        assert_eq!(index.num_params(), expected);

        let handle = model.control_signal();
        assert_eq!(handle.name(), "layer_train");
        assert_eq!(handle.full(), ControlSignal::all(2));
    }
}
