//! Optimizers Burn does not ship: Adamax and Adadelta
//!
//! Both follow the Keras update rules and plug into Burn through
//! [`SimpleOptimizer`] wrapped in an [`OptimizerAdaptor`], the same way
//! Burn's own Adam is built.

use burn::config::Config;
use burn::module::AutodiffModule;
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::SimpleOptimizer;
use burn::LearningRate;
use burn::record::Record;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::Tensor;

/// Configuration for [`Adamax`]
#[derive(Config, Debug)]
pub struct AdamaxConfig {
    #[config(default = 0.9)]
    pub beta_1: f32,
    #[config(default = 0.999)]
    pub beta_2: f32,
    #[config(default = 1e-7)]
    pub epsilon: f32,
}

/// Adam variant using the infinity norm of past gradients
#[derive(Clone, Debug)]
pub struct Adamax {
    beta_1: f32,
    beta_2: f32,
    epsilon: f32,
}

/// Per-parameter Adamax state
#[derive(Record, Clone)]
pub struct AdamaxState<B: Backend, const D: usize> {
    pub time: usize,
    /// First moment
    pub moment: Tensor<B, D>,
    /// Exponentially weighted infinity norm
    pub norm: Tensor<B, D>,
}

impl AdamaxConfig {
    /// Initialize the optimizer for a module
    pub fn init<B: AutodiffBackend, M: AutodiffModule<B>>(&self) -> OptimizerAdaptor<Adamax, M, B> {
        OptimizerAdaptor::from(Adamax {
            beta_1: self.beta_1,
            beta_2: self.beta_2,
            epsilon: self.epsilon,
        })
    }
}

impl<B: Backend> SimpleOptimizer<B> for Adamax {
    type State<const D: usize> = AdamaxState<B, D>;

    fn step<const D: usize>(
        &self,
        lr: LearningRate,
        tensor: Tensor<B, D>,
        grad: Tensor<B, D>,
        state: Option<Self::State<D>>,
    ) -> (Tensor<B, D>, Option<Self::State<D>>) {
        let (moment, norm, time) = match state {
            Some(state) => (
                state
                    .moment
                    .mul_scalar(self.beta_1)
                    .add(grad.clone().mul_scalar(1.0 - self.beta_1)),
                state.norm.mul_scalar(self.beta_2).max_pair(grad.abs()),
                state.time + 1,
            ),
            None => (grad.clone().mul_scalar(1.0 - self.beta_1), grad.abs(), 1),
        };

        let step_size = lr / (1.0 - (self.beta_1 as f64).powi(time as i32));
        let delta = moment
            .clone()
            .div(norm.clone().add_scalar(self.epsilon))
            .mul_scalar(step_size);

        (tensor.sub(delta), Some(AdamaxState { time, moment, norm }))
    }

    fn to_device<const D: usize>(mut state: Self::State<D>, device: &B::Device) -> Self::State<D> {
        state.moment = state.moment.to_device(device);
        state.norm = state.norm.to_device(device);
        state
    }
}

/// Configuration for [`Adadelta`]
#[derive(Config, Debug)]
pub struct AdadeltaConfig {
    /// Decay rate of both running averages
    #[config(default = 0.95)]
    pub rho: f32,
    #[config(default = 1e-7)]
    pub epsilon: f32,
}

/// Learning-rate-free adaptive optimizer (the learning rate only scales the update)
#[derive(Clone, Debug)]
pub struct Adadelta {
    rho: f32,
    epsilon: f32,
}

/// Per-parameter Adadelta state
#[derive(Record, Clone)]
pub struct AdadeltaState<B: Backend, const D: usize> {
    /// Running average of squared gradients
    pub grad_sq: Tensor<B, D>,
    /// Running average of squared updates
    pub delta_sq: Tensor<B, D>,
}

impl AdadeltaConfig {
    /// Initialize the optimizer for a module
    pub fn init<B: AutodiffBackend, M: AutodiffModule<B>>(&self) -> OptimizerAdaptor<Adadelta, M, B> {
        OptimizerAdaptor::from(Adadelta {
            rho: self.rho,
            epsilon: self.epsilon,
        })
    }
}

impl<B: Backend> SimpleOptimizer<B> for Adadelta {
    type State<const D: usize> = AdadeltaState<B, D>;

    fn step<const D: usize>(
        &self,
        lr: LearningRate,
        tensor: Tensor<B, D>,
        grad: Tensor<B, D>,
        state: Option<Self::State<D>>,
    ) -> (Tensor<B, D>, Option<Self::State<D>>) {
        let (grad_sq, delta_sq) = match state {
            Some(state) => (state.grad_sq, state.delta_sq),
            None => (grad.zeros_like(), grad.zeros_like()),
        };

        let grad_sq = grad_sq
            .mul_scalar(self.rho)
            .add(grad.clone().powi_scalar(2).mul_scalar(1.0 - self.rho));

        let update = delta_sq
            .clone()
            .add_scalar(self.epsilon)
            .sqrt()
            .div(grad_sq.clone().add_scalar(self.epsilon).sqrt())
            .mul(grad);

        let delta_sq = delta_sq
            .mul_scalar(self.rho)
            .add(update.clone().powi_scalar(2).mul_scalar(1.0 - self.rho));

        (
            tensor.sub(update.mul_scalar(lr)),
            Some(AdadeltaState { grad_sq, delta_sq }),
        )
    }

    fn to_device<const D: usize>(mut state: Self::State<D>, device: &B::Device) -> Self::State<D> {
        state.grad_sq = state.grad_sq.to_device(device);
        state.delta_sq = state.delta_sq.to_device(device);
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn tensor(values: [f32; 2]) -> Tensor<TestBackend, 1> {
        Tensor::from_floats(TensorData::from(values), &Default::default())
    }

    fn values(tensor: Tensor<TestBackend, 1>) -> Vec<f32> {
        tensor.into_data().to_vec().unwrap()
    }

    fn assert_close(actual: &[f32], expected: &[f32]) {
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-5, "{:?} != {:?}", actual, expected);
        }
    }

    #[test]
    fn test_adamax_first_step_moves_by_learning_rate() {
        let optim = Adamax {
            beta_1: 0.9,
            beta_2: 0.999,
            epsilon: 1e-7,
        };
        let (param, state) = SimpleOptimizer::<TestBackend>::step(
            &optim,
            0.01,
            tensor([1.0, -2.0]),
            tensor([0.5, -4.0]),
            None,
        );

        // m / u = sign(g) after bias correction on the first step
        assert_close(&values(param), &[0.99, -1.99]);
        let state = state.unwrap();
        assert_eq!(state.time, 1);
        assert_close(&values(state.norm), &[0.5, 4.0]);
    }

    #[test]
    fn test_adamax_norm_keeps_decayed_maximum() {
        let optim = Adamax {
            beta_1: 0.9,
            beta_2: 0.5,
            epsilon: 1e-7,
        };
        let (param, state) = SimpleOptimizer::<TestBackend>::step(
            &optim,
            0.01,
            tensor([0.0, 0.0]),
            tensor([4.0, 1.0]),
            None,
        );
        let (_, state) = SimpleOptimizer::<TestBackend>::step(
            &optim,
            0.01,
            param,
            tensor([1.0, 3.0]),
            state,
        );

        let state = state.unwrap();
        assert_eq!(state.time, 2);
        // max(0.5 * 4, 1) and max(0.5 * 1, 3)
        assert_close(&values(state.norm), &[2.0, 3.0]);
    }

    #[test]
    fn test_adadelta_first_step() {
        let optim = Adadelta {
            rho: 0.95,
            epsilon: 1e-7,
        };
        let (param, state) = SimpleOptimizer::<TestBackend>::step(
            &optim,
            1.0,
            tensor([1.0, 1.0]),
            tensor([1.0, -1.0]),
            None,
        );

        // update = sqrt(eps) / sqrt(0.05 + eps) * g
        let update = (1e-7f32).sqrt() / (0.05f32 + 1e-7).sqrt();
        assert_close(&values(param), &[1.0 - update, 1.0 + update]);

        let state = state.unwrap();
        assert_close(&values(state.grad_sq), &[0.05, 0.05]);
    }

    #[test]
    fn test_adadelta_zero_gradient_keeps_parameters() {
        let optim = Adadelta {
            rho: 0.95,
            epsilon: 1e-7,
        };
        let (param, _) = SimpleOptimizer::<TestBackend>::step(
            &optim,
            1.0,
            tensor([3.0, -3.0]),
            tensor([0.0, 0.0]),
            None,
        );
        assert_close(&values(param), &[3.0, -3.0]);
    }

    #[test]
    fn test_config_defaults() {
        let adamax = AdamaxConfig::new();
        assert_eq!(adamax.beta_1, 0.9);
        assert_eq!(adamax.beta_2, 0.999);

        let adadelta = AdadeltaConfig::new().with_rho(0.9);
        assert_eq!(adadelta.rho, 0.9);
        assert_eq!(adadelta.epsilon, 1e-7);
    }
}
