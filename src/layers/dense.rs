use serde::{Serialize, Deserialize};
use crate::{math::matrix::Matrix, activation::activation::ActivationFunction};

/// One fully-connected layer of the dense reference network.
///
/// `weights` is stored `input_size × size` so that a forward step is the row
/// product `x · W + b`; the exported parameter layout (`[out][in]`) is its
/// transpose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer{
    pub size: usize,
    pub weights: Matrix,
    pub biases: Matrix,
    pub activator: ActivationFunction
}

impl Layer {
    /// A randomly initialised layer (He weights, zero biases).
    pub fn new(size: usize, input_size: usize, activation: ActivationFunction) -> Layer {
        Layer {
            size,
            weights: Matrix::he(input_size, size, input_size),
            biases: Matrix::zeros(1, size),
            activator: activation
        }
    }

    /// Builds a layer from a `[out][in]` weight tensor and its bias vector.
    pub fn from_parameters(weights: &[Vec<f64>], biases: &[f64], activation: ActivationFunction) -> Layer {
        Layer {
            size: biases.len(),
            weights: Matrix::from_data(weights.to_vec()).transpose(),
            biases: Matrix::row(biases.to_vec()),
            activator: activation
        }
    }

    pub fn input_size(&self) -> usize {
        self.weights.rows
    }

    pub fn feed_from(&self, input: Vec<f64>) -> Vec<f64> {
        let z = &Matrix::row(input) * &self.weights + self.biases.clone();
        let a = z.map(|x| self.activator.function(x));
        a.data.into_iter().next().unwrap_or_default()
    }

    /// The weight tensor in exported `[out][in]` layout.
    pub fn weight_tensor(&self) -> Vec<Vec<f64>> {
        self.weights.transpose().data
    }

    pub fn bias_vector(&self) -> Vec<f64> {
        self.biases.data.first().cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameters_are_read_in_out_in_layout() {
        // Two inputs, one output: y = 1*x0 - 1*x1 + 0.5
        let layer = Layer::from_parameters(&[vec![1.0, -1.0]], &[0.5], ActivationFunction::Identity);
        assert_eq!(layer.input_size(), 2);
        assert_eq!(layer.feed_from(vec![3.0, 1.0]), vec![2.5]);
        assert_eq!(layer.weight_tensor(), vec![vec![1.0, -1.0]]);
    }

    #[test]
    fn relu_clamps_negative_sums() {
        let layer = Layer::from_parameters(&[vec![1.0], vec![-1.0]], &[0.0, 0.0], ActivationFunction::ReLU);
        assert_eq!(layer.feed_from(vec![2.0]), vec![2.0, 0.0]);
    }
}
