use std::collections::BTreeMap;
use std::fmt;

use burn::module::ParamId;
use serde::{Deserialize, Serialize};

use crate::model::codec::CodecMode;

/// Side of the stack a parameter belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LayerRole {
    Encoder,
    Decoder,
}

impl From<CodecMode> for LayerRole {
    fn from(mode: CodecMode) -> Self {
        match mode {
            CodecMode::Encode => LayerRole::Encoder,
            CodecMode::Decode => LayerRole::Decoder,
        }
    }
}

impl fmt::Display for LayerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerRole::Encoder => write!(f, "encoder"),
            LayerRole::Decoder => write!(f, "decoder"),
        }
    }
}

/// Handle to one parameter tensor of the stack
#[derive(Debug, Clone, PartialEq)]
pub struct ParamRecord {
    /// Identity used by optimizers to match gradients
    pub id: ParamId,
    /// Scoped name, e.g. `stack_autoencoder/encoder/hidden_1/weights`
    pub name: String,
    pub layer: usize,
    pub role: LayerRole,
    pub shape: Vec<usize>,
    pub trainable: bool,
}

impl ParamRecord {
    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Keep the records selected by a `trainable` filter.
///
/// `None` and `Some(true)` keep trainable parameters, `Some(false)` keeps all.
pub fn filter_trainable(records: Vec<ParamRecord>, trainable: Option<bool>) -> Vec<ParamRecord> {
    match trainable {
        Some(false) => records,
        None | Some(true) => records.into_iter().filter(|r| r.trainable).collect(),
    }
}

/// Snapshot of every parameter in a stack, keyed by layer and role
#[derive(Debug, Clone, Default)]
pub struct VariableIndex {
    entries: BTreeMap<(usize, LayerRole), Vec<ParamRecord>>,
}

impl VariableIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, layer: usize, role: LayerRole, records: Vec<ParamRecord>) {
        self.entries.entry((layer, role)).or_default().extend(records);
    }

    pub fn get(&self, layer: usize, role: LayerRole) -> &[ParamRecord] {
        self.entries
            .get(&(layer, role))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Encoder and decoder parameters of `layer`
    pub fn for_layer(&self, layer: usize, trainable: Option<bool>) -> Vec<ParamRecord> {
        let records = [LayerRole::Encoder, LayerRole::Decoder]
            .iter()
            .flat_map(|role| self.get(layer, *role).iter().cloned())
            .collect();
        filter_trainable(records, trainable)
    }

    /// Parameter ids of `layer`, ready for `GradientsParams::from_params`
    pub fn param_ids(&self, layer: usize, trainable: Option<bool>) -> Vec<ParamId> {
        self.for_layer(layer, trainable)
            .into_iter()
            .map(|record| record.id)
            .collect()
    }

    pub fn layers(&self) -> Vec<usize> {
        let mut layers: Vec<usize> = self.entries.keys().map(|(layer, _)| *layer).collect();
        layers.dedup();
        layers
    }

    pub fn num_params(&self) -> usize {
        self.entries
            .values()
            .flatten()
            .map(ParamRecord::num_elements)
            .sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(usize, LayerRole), &Vec<ParamRecord>)> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(layer: usize, role: LayerRole, trainable: bool) -> ParamRecord {
        ParamRecord {
            id: ParamId::new(),
            name: format!("s/{role}/hidden_{layer}/weights"),
            layer,
            role,
            shape: vec![4, 1, 3, 3],
            trainable,
        }
    }

    #[test]
    fn test_layer_lookup_is_exact() {
        let mut index = VariableIndex::new();
        index.insert(1, LayerRole::Encoder, vec![record(1, LayerRole::Encoder, true)]);
        index.insert(10, LayerRole::Encoder, vec![record(10, LayerRole::Encoder, true)]);
        index.insert(1, LayerRole::Decoder, vec![record(1, LayerRole::Decoder, true)]);

        let layer_one = index.for_layer(1, None);
        assert_eq!(layer_one.len(), 2);
        assert!(layer_one.iter().all(|r| r.layer == 1));
        assert!(index.for_layer(99, None).is_empty());
        assert_eq!(index.layers(), vec![1, 10]);
        assert_eq!(index.num_params(), 3 * 36);
    }

    #[test]
    fn test_trainable_filter() {
        let mut index = VariableIndex::new();
        index.insert(
            0,
            LayerRole::Encoder,
            vec![record(0, LayerRole::Encoder, true), record(0, LayerRole::Encoder, false)],
        );

        assert_eq!(index.for_layer(0, None).len(), 1);
        assert_eq!(index.for_layer(0, Some(true)).len(), 1);
        assert_eq!(index.for_layer(0, Some(false)).len(), 2);
        assert_eq!(index.param_ids(0, Some(false)).len(), 2);
    }
}
