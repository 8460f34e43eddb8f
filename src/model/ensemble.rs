//! Averaging ensemble with a trainable dense tail
//!
//! Every member sees the same input batch; their `[N, 1]` outputs are
//! averaged and the mean is fed through a small dense network.

use burn::{
    module::Module,
    tensor::{backend::Backend, Tensor},
};

use super::classifier::{build_dense_stack, Classifier, DenseLayer, ScalarClassifier};
use super::spec::{summarize_layers, FeatureShape, InputShape, LayerSpec, LayerSummary};
use crate::utils::error::{EnsembleError, Result};

const ENSEMBLE_NAME: &str = "ensemble";

/// Layers applied to the averaged member output
pub fn ensemble_tail_spec() -> Vec<LayerSpec> {
    vec![
        LayerSpec::dense(256),
        LayerSpec::dropout(0.5),
        LayerSpec::BatchNorm,
        LayerSpec::dense(128),
        LayerSpec::dropout(0.5),
        LayerSpec::BatchNorm,
        LayerSpec::dense(64),
        LayerSpec::dropout(0.5),
        LayerSpec::BatchNorm,
        LayerSpec::dense(32),
        LayerSpec::leaky_relu(0.3),
        LayerSpec::sigmoid_output(),
    ]
}

/// Shapes and parameter counts of the tail, starting from the averaged output
pub fn tail_summary() -> Result<Vec<LayerSummary>> {
    summarize_layers(ENSEMBLE_NAME, &ensemble_tail_spec(), FeatureShape::Flat(1))
}

/// Trained classifiers composed into one model
#[derive(Module, Debug)]
pub struct EnsembleComposite<B: Backend> {
    members: Vec<Classifier<B>>,
    tail: Vec<DenseLayer<B>>,
    input_channels: usize,
    input_height: usize,
    input_width: usize,
}

impl<B: Backend> EnsembleComposite<B> {
    /// Take ownership of the members and attach a freshly initialized tail
    ///
    /// All members must declare the same input shape.
    pub fn compose(members: Vec<Classifier<B>>, device: &B::Device) -> Result<Self> {
        let input = members
            .first()
            .map(|member| member.input_shape())
            .ok_or_else(|| EnsembleError::invalid_spec(ENSEMBLE_NAME, "no members to compose"))?;

        if let Some((index, member)) = members
            .iter()
            .enumerate()
            .find(|(_, member)| member.input_shape() != input)
        {
            return Err(EnsembleError::invalid_spec(
                ENSEMBLE_NAME,
                format!(
                    "member {} expects input {}, member 0 expects {}",
                    index,
                    member.input_shape(),
                    input
                ),
            ));
        }

        let tail = build_dense_stack(ENSEMBLE_NAME, &ensemble_tail_spec(), 1, device)?;

        Ok(Self {
            members,
            tail,
            input_channels: input.channels,
            input_height: input.height,
            input_width: input.width,
        })
    }

    /// Stop gradients from reaching member parameters
    pub fn freeze_members(mut self) -> Self {
        self.members = self
            .members
            .into_iter()
            .map(|member| member.no_grad())
            .collect();
        self
    }

    pub fn members(&self) -> &[Classifier<B>] {
        &self.members
    }

    pub fn num_members(&self) -> usize {
        self.members.len()
    }

    /// Give the members back, dropping the tail
    pub fn into_members(self) -> Vec<Classifier<B>> {
        self.members
    }

    /// Output of every member, `[N, 1]` each
    pub fn member_outputs(&self, images: Tensor<B, 4>) -> Vec<Tensor<B, 2>> {
        self.members
            .iter()
            .map(|member| member.forward(images.clone()))
            .collect()
    }

    /// Unweighted mean of the member outputs, `[N, 1]`
    pub fn average(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let n = self.members.len();
        Tensor::cat(self.member_outputs(images), 1)
            .sum_dim(1)
            .div_scalar(n as f32)
    }

    /// Averaged member output fed through the tail
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = self.average(images);
        for layer in &self.tail {
            x = layer.forward(x);
        }
        x
    }

    pub fn input_shape(&self) -> InputShape {
        InputShape::new(self.input_channels, self.input_height, self.input_width)
    }
}

impl<B: Backend> ScalarClassifier<B> for EnsembleComposite<B> {
    fn input_shape(&self) -> InputShape {
        EnsembleComposite::input_shape(self)
    }

    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        EnsembleComposite::forward(self, images)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::spec::ClassifierSpec;
    use burn::backend::Autodiff;
    use burn::optim::GradientsParams;
    use burn::tensor::Distribution;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn small_spec(name: &str, filters: usize, size: usize) -> ClassifierSpec {
        ClassifierSpec::new(
            name,
            vec![
                LayerSpec::conv(filters, 3),
                LayerSpec::max_pool(2),
                LayerSpec::Flatten,
                LayerSpec::dense(6),
                LayerSpec::sigmoid_output(),
            ],
        )
        .with_input(InputShape::new(3, size, size))
    }

    fn small_members<B: Backend>(device: &B::Device) -> Vec<Classifier<B>> {
        (1..=3)
            .map(|i| small_spec(&format!("m{}", i), i + 1, 8).init(device).unwrap())
            .collect()
    }

    #[test]
    fn test_average_is_member_mean() {
        let device = Default::default();
        let ensemble = EnsembleComposite::compose(small_members::<TestBackend>(&device), &device).unwrap();
        let input = Tensor::<TestBackend, 4>::random([4, 3, 8, 8], Distribution::Default, &device);

        let outputs: Vec<Vec<f32>> = ensemble
            .member_outputs(input.clone())
            .into_iter()
            .map(|t| t.into_data().to_vec().unwrap())
            .collect();
        let averaged: Vec<f32> = ensemble.average(input).into_data().to_vec().unwrap();

        assert_eq!(averaged.len(), 4);
        for (row, value) in averaged.iter().enumerate() {
            let mean = outputs.iter().map(|o| o[row]).sum::<f32>() / outputs.len() as f32;
            assert!((value - mean).abs() < 1e-6);
        }
    }

    #[test]
    fn test_average_of_the_eight_members() {
        let device = Default::default();
        let members = crate::model::build_classifiers::<TestBackend>(&device).unwrap();
        let ensemble = EnsembleComposite::compose(members, &device).unwrap();
        assert_eq!(ensemble.num_members(), crate::ENSEMBLE_SIZE);

        let input = Tensor::<TestBackend, 4>::random([2, 3, 150, 150], Distribution::Default, &device);
        let outputs: Vec<Vec<f32>> = ensemble
            .member_outputs(input.clone())
            .into_iter()
            .map(|t| t.into_data().to_vec().unwrap())
            .collect();
        let averaged: Vec<f32> = ensemble.average(input).into_data().to_vec().unwrap();

        for (row, value) in averaged.iter().enumerate() {
            let sum: f32 = outputs.iter().map(|o| o[row]).sum();
            assert!((value - sum / 8.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_forward_shape() {
        let device = Default::default();
        let ensemble = EnsembleComposite::compose(small_members::<TestBackend>(&device), &device).unwrap();
        let input = Tensor::<TestBackend, 4>::random([3, 3, 8, 8], Distribution::Default, &device);

        let output = ensemble.try_forward(input).unwrap();
        assert_eq!(output.dims(), [3, 1]);
        let values: Vec<f32> = output.into_data().to_vec().unwrap();
        assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_compose_moves_members() {
        let device = Default::default();
        let members = small_members::<TestBackend>(&device);
        let params: usize = members.iter().map(|m| m.num_params()).sum();

        let ensemble = EnsembleComposite::compose(members, &device).unwrap();
        assert_eq!(ensemble.num_members(), 3);
        assert!(ensemble.num_params() > params);
        assert_eq!(ensemble.into_members().len(), 3);
    }

    #[test]
    fn test_compose_rejects_empty() {
        let device = Default::default();
        let result = EnsembleComposite::<TestBackend>::compose(Vec::new(), &device);
        assert!(matches!(result, Err(EnsembleError::InvalidSpec { .. })));
    }

    #[test]
    fn test_compose_rejects_mixed_inputs() {
        let device = Default::default();
        let members = vec![
            small_spec("a", 2, 8).init::<TestBackend>(&device).unwrap(),
            small_spec("b", 2, 10).init::<TestBackend>(&device).unwrap(),
        ];
        assert!(EnsembleComposite::compose(members, &device).is_err());
    }

    #[test]
    fn test_wrong_input_is_rejected() {
        let device = Default::default();
        let ensemble = EnsembleComposite::compose(small_members::<TestBackend>(&device), &device).unwrap();
        let input = Tensor::<TestBackend, 4>::zeros([1, 3, 6, 6], &device);
        assert!(matches!(
            ensemble.try_forward(input),
            Err(EnsembleError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_frozen_members_receive_no_gradients() {
        type AdBackend = Autodiff<TestBackend>;
        let device = Default::default();
        let input = Tensor::<AdBackend, 4>::random([4, 3, 8, 8], Distribution::Default, &device);

        let trainable = EnsembleComposite::compose(small_members::<AdBackend>(&device), &device).unwrap();
        let loss = trainable.forward(input.clone()).mean();
        let all = GradientsParams::from_grads(loss.backward(), &trainable);

        let frozen = EnsembleComposite::compose(small_members::<AdBackend>(&device), &device)
            .unwrap()
            .freeze_members();
        let loss = frozen.forward(input).mean();
        let tail_only = GradientsParams::from_grads(loss.backward(), &frozen);

        assert!(!tail_only.is_empty());
        assert!(tail_only.len() < all.len());
    }

    #[test]
    fn test_tail_summary() {
        let rows = tail_summary().unwrap();
        assert_eq!(rows.len(), 12);
        assert_eq!(rows[0].params, 2 * 256);
        assert_eq!(rows.last().unwrap().output, FeatureShape::Flat(1));
    }
}
