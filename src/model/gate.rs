use burn::prelude::*;
use serde::{Deserialize, Serialize};

/// Name under which the control value is exposed to callers
pub const CONTROL_NAME: &str = "layer_train";

/// Number of layers unlocked for real gradient flow in one execution.
///
/// A fresh value is supplied to every forward pass. It is never stored on the
/// model, so concurrent passes with different values do not interact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ControlSignal(usize);

impl ControlSignal {
    pub fn new(unlocked: usize) -> Self {
        Self(unlocked)
    }

    /// Every layer of a `layer_num` deep stack unlocked
    pub fn all(layer_num: usize) -> Self {
        Self(layer_num)
    }

    pub fn unlocked(&self) -> usize {
        self.0
    }

    /// Whether `layer` receives its real input
    pub fn unlocks(&self, layer: usize) -> bool {
        layer < self.0
    }
}

/// Handle describing the control input of a built stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlHandle {
    name: &'static str,
    layer_num: usize,
}

impl ControlHandle {
    pub fn new(layer_num: usize) -> Self {
        Self {
            name: CONTROL_NAME,
            layer_num,
        }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn layer_num(&self) -> usize {
        self.layer_num
    }

    /// Signal unlocking the first `layers` layers
    pub fn unlock(&self, layers: usize) -> ControlSignal {
        ControlSignal::new(layers)
    }

    /// Signal unlocking the whole stack
    pub fn full(&self) -> ControlSignal {
        ControlSignal::all(self.layer_num)
    }
}

/// Pick `real` when `layer` is unlocked by `control`, `bypass` otherwise.
///
/// The branch that is not taken is dropped, so nothing downstream receives
/// gradient through it.
pub fn select<B: Backend, const D: usize>(
    control: ControlSignal,
    layer: usize,
    real: Tensor<B, D>,
    bypass: Tensor<B, D>,
) -> Tensor<B, D> {
    debug_assert_eq!(real.dims(), bypass.dims(), "gate branches must share a shape");

    if control.unlocks(layer) {
        real
    } else {
        bypass
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_select_follows_control() {
        let device = <TestBackend as Backend>::Device::default();
        let real = Tensor::<TestBackend, 4>::ones([1, 2, 3, 3], &device);

        for unlocked in 0..4 {
            let control = ControlSignal::new(unlocked);
            for layer in 0..3 {
                let out = select(control, layer, real.clone(), real.zeros_like());
                let total = out.sum().into_scalar();
                if layer < unlocked {
                    assert_eq!(total, 18.0);
                } else {
                    assert_eq!(total, 0.0);
                }
            }
        }
    }

    #[test]
    fn test_handle_mints_signals() {
        let handle = ControlHandle::new(3);
        assert_eq!(handle.name(), "layer_train");
        assert_eq!(handle.full(), ControlSignal::all(3));
        assert!(handle.unlock(1).unlocks(0));
        assert!(!handle.unlock(1).unlocks(1));
    }
}
