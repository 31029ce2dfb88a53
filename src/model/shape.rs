use serde::{Deserialize, Serialize};

use crate::error::{Result, StackError};

/// Declared input shape, in (batch, height, width, channels) order.
///
/// Entries may be unknown (`None`) at declaration time. The stack can only be
/// planned once height, width and channels are known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputShape {
    pub batch: Option<usize>,
    pub height: Option<usize>,
    pub width: Option<usize>,
    pub channels: Option<usize>,
}

impl InputShape {
    /// Fully known image shape with a free batch dimension
    pub fn image(height: usize, width: usize, channels: usize) -> Self {
        Self {
            batch: None,
            height: Some(height),
            width: Some(width),
            channels: Some(channels),
        }
    }

    /// Build from raw dimensions in (batch, height, width, channels) order
    pub fn from_dims(dims: [Option<usize>; 4]) -> Self {
        let [batch, height, width, channels] = dims;
        Self { batch, height, width, channels }
    }

    pub fn dims(&self) -> [Option<usize>; 4] {
        [self.batch, self.height, self.width, self.channels]
    }

    /// Resolve the statically required dimensions
    pub fn known(&self) -> Result<ImageShape> {
        match (self.height, self.width, self.channels) {
            (Some(height), Some(width), Some(channels)) => Ok(ImageShape { height, width, channels }),
            _ => Err(StackError::UnknownShape { dims: self.dims() }),
        }
    }
}

/// Statically known spatial size and channel count of an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageShape {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl ImageShape {
    pub fn new(height: usize, width: usize, channels: usize) -> Self {
        Self { height, width, channels }
    }

    pub fn size(&self) -> [usize; 2] {
        [self.height, self.width]
    }

    /// Channels-first tensor dims for a batch of this shape
    pub fn batch_dims(&self, batch: usize) -> [usize; 4] {
        [batch, self.channels, self.height, self.width]
    }
}

/// Max-pooling window used by encode stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub ksize: [usize; 2],
    pub strides: [usize; 2],
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            ksize: [2, 2],
            strides: [2, 2],
        }
    }
}

impl PoolConfig {
    pub fn new(ksize: [usize; 2], strides: [usize; 2]) -> Self {
        Self { ksize, strides }
    }

    pub fn validate(&self) -> Result<()> {
        if self.ksize.contains(&0) || self.strides.contains(&0) {
            return Err(StackError::ConfigMismatch(format!(
                "pool ksize {:?} and strides {:?} must be positive",
                self.ksize, self.strides
            )));
        }
        Ok(())
    }

    /// Spatial size after SAME pooling
    pub fn output_size(&self, size: [usize; 2]) -> [usize; 2] {
        [
            size[0].div_ceil(self.strides[0]),
            size[1].div_ceil(self.strides[1]),
        ]
    }

    /// SAME padding as `[(top, bottom), (left, right)]`, extra cells at the end
    pub fn same_padding(&self, size: [usize; 2]) -> [(usize, usize); 2] {
        let out = self.output_size(size);
        let pad = |dim: usize| {
            let needed = (out[dim] - 1) * self.strides[dim] + self.ksize[dim];
            let total = needed.saturating_sub(size[dim]);
            (total / 2, total - total / 2)
        };
        [pad(0), pad(1)]
    }
}

/// Spatial size produced at each encode stage, the input size first.
///
/// Decode stages consume it in reverse so each decoder restores the exact
/// size of the matching encoder input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeHistory {
    sizes: Vec<[usize; 2]>,
}

impl ShapeHistory {
    pub fn new(input: [usize; 2]) -> Self {
        Self { sizes: vec![input] }
    }

    /// Plan all encode stages for a stack of `layer_num` layers
    pub fn plan(input: [usize; 2], layer_num: usize, pool: &PoolConfig) -> Self {
        let mut history = Self::new(input);
        for _ in 0..layer_num {
            let next = pool.output_size(history.last());
            history.record(next);
        }
        history
    }

    pub fn record(&mut self, size: [usize; 2]) {
        self.sizes.push(size);
    }

    pub fn at(&self, depth: usize) -> Option<[usize; 2]> {
        self.sizes.get(depth).copied()
    }

    pub fn last(&self) -> [usize; 2] {
        // never empty: constructed with the input size
        self.sizes[self.sizes.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &[usize; 2]> {
        self.sizes.iter()
    }
}
