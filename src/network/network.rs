use crate::{activation::activation::ActivationFunction, layers::dense::Layer};
use crate::error::{RelunetError, Result};
use crate::network::state_dict::StateDict;
use serde::{Serialize, Deserialize};

/// Dense tensor form of a ReLU-FNN. The relational evaluation is checked
/// against this forward pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub layers: Vec<Layer>,
}

impl Network {
    /// Builds a randomly initialised network from (size, input_size, activation) tuples.
    pub fn new(layer_specs: Vec<(usize, usize, ActivationFunction)>) -> Network {
        let layers = layer_specs.into_iter()
            .map(|(size, input_size, activation)| Layer::new(size, input_size, activation))
            .collect();
        Network { layers }
    }

    /// Rebuilds the network from an exported parameter state: ReLU on every
    /// hidden layer, identity on the output layer.
    pub fn from_state_dict(state_dict: &StateDict) -> Result<Network> {
        let params = state_dict.layers()?;
        let last = params.len() - 1;
        let layers = params.iter().enumerate()
            .map(|(i, p)| {
                let activation = if i == last { ActivationFunction::Identity } else { ActivationFunction::ReLU };
                Layer::from_parameters(p.weights, p.biases, activation)
            })
            .collect();
        Ok(Network { layers })
    }

    /// Exports the parameters as `fc<N>.weight` / `fc<N>.bias` pairs.
    pub fn to_state_dict(&self) -> StateDict {
        let mut state_dict = StateDict::new();
        for (i, layer) in self.layers.iter().enumerate() {
            state_dict.push_layer(&format!("fc{}", i + 1), layer.weight_tensor(), layer.bias_vector());
        }
        state_dict
    }

    /// Forward pass producing the raw (pre-softmax) outputs.
    pub fn forward(&self, input: &[f64]) -> Result<Vec<f64>> {
        let expected = self.layers.first().map_or(0, Layer::input_size);
        if input.len() != expected {
            return Err(RelunetError::precondition(format!(
                "network takes {} inputs, got {}", expected, input.len()
            )));
        }
        let mut current = input.to_vec();
        for layer in &self.layers {
            current = layer.feed_from(current);
        }
        Ok(current)
    }

    /// Serializes the network weights to a pretty-printed JSON file.
    pub fn save_json(&self, path: &str) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Deserializes a network from a JSON file previously written by `save_json`.
    pub fn load_json(path: &str) -> Result<Network> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}
