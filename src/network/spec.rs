use serde::{Serialize, Deserialize};
use crate::activation::activation::ActivationFunction;
use crate::network::network::Network;

/// Architecture of a fully-connected ReLU network.
///
/// Fields:
/// - `input_size`        — number of input features
/// - `hidden_size`       — width of every hidden layer
/// - `num_hidden_layers` — number of hidden layers (at least one)
/// - `output_size`       — number of output nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub input_size: usize,
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub output_size: usize,
}

impl Default for NetworkSpec {
    fn default() -> Self {
        NetworkSpec { input_size: 1, hidden_size: 4, num_hidden_layers: 10, output_size: 1 }
    }
}

impl NetworkSpec {
    /// Node count per layer, input layer first.
    pub fn layer_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![self.input_size];
        sizes.extend(std::iter::repeat(self.hidden_size).take(self.num_hidden_layers.max(1)));
        sizes.push(self.output_size);
        sizes
    }

    /// A randomly initialised network with this architecture.
    pub fn build(&self) -> Network {
        let sizes = self.layer_sizes();
        let last = sizes.len() - 2;
        Network::new(
            sizes.windows(2).enumerate()
                .map(|(i, w)| {
                    let activation = if i == last { ActivationFunction::Identity } else { ActivationFunction::ReLU };
                    (w[1], w[0], activation)
                })
                .collect(),
        )
    }
}
