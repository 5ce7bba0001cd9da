use serde::{Serialize, Deserialize};
use crate::error::{RelunetError, Result};

/// A parameter tensor as exported by a training procedure: either a weight
/// matrix in `[out][in]` layout or a bias vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Tensor {
    Matrix(Vec<Vec<f64>>),
    Vector(Vec<f64>),
}

/// One named entry of a state dict, e.g. `fc1.weight`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub values: Tensor,
}

/// The ordered parameter state of a trained ReLU-FNN.
///
/// Entries strictly alternate weight matrix, bias vector per layer, starting
/// with the first hidden layer and ending with the output layer. On disk this
/// is a JSON array of `{ "name": ..., "values": ... }` objects, so the order
/// survives serialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateDict {
    pub parameters: Vec<Parameter>,
}

/// A validated weight/bias pair borrowed from a [`StateDict`].
#[derive(Debug, Clone, Copy)]
pub struct LayerParams<'a> {
    pub weight_name: &'a str,
    pub bias_name: &'a str,
    /// `[to_index][from_index]`
    pub weights: &'a [Vec<f64>],
    pub biases: &'a [f64],
}

impl<'a> LayerParams<'a> {
    pub fn input_size(&self) -> usize {
        self.weights.first().map_or(0, Vec::len)
    }

    pub fn output_size(&self) -> usize {
        self.biases.len()
    }
}

impl StateDict {
    pub fn new() -> StateDict {
        StateDict::default()
    }

    /// Appends a `<prefix>.weight` / `<prefix>.bias` pair.
    pub fn push_layer(&mut self, prefix: &str, weights: Vec<Vec<f64>>, biases: Vec<f64>) {
        self.parameters.push(Parameter {
            name: format!("{prefix}.weight"),
            values: Tensor::Matrix(weights),
        });
        self.parameters.push(Parameter {
            name: format!("{prefix}.bias"),
            values: Tensor::Vector(biases),
        });
    }

    /// Validates the parameter sequence and returns it as weight/bias pairs.
    ///
    /// Fails with [`RelunetError::Precondition`] when the sequence does not
    /// alternate weight/bias, a matrix is ragged or empty, or consecutive
    /// shapes do not line up.
    pub fn layers(&self) -> Result<Vec<LayerParams<'_>>> {
        if self.parameters.is_empty() {
            return Err(RelunetError::precondition("state dict has no parameters"));
        }
        if self.parameters.len() % 2 != 0 {
            return Err(RelunetError::precondition(format!(
                "state dict has {} parameters; expected weight/bias pairs",
                self.parameters.len()
            )));
        }

        let mut layers = Vec::with_capacity(self.parameters.len() / 2);
        for pair in self.parameters.chunks(2) {
            let (weight, bias) = (&pair[0], &pair[1]);
            let weights = match &weight.values {
                Tensor::Matrix(m) => m.as_slice(),
                Tensor::Vector(_) => {
                    return Err(RelunetError::precondition(format!(
                        "`{}` must be a weight matrix", weight.name
                    )))
                }
            };
            let biases = match &bias.values {
                Tensor::Vector(v) => v.as_slice(),
                Tensor::Matrix(_) => {
                    return Err(RelunetError::precondition(format!(
                        "`{}` must be a bias vector", bias.name
                    )))
                }
            };

            let cols = weights.first().map_or(0, Vec::len);
            if cols == 0 || biases.is_empty() {
                return Err(RelunetError::precondition(format!(
                    "`{}` / `{}` must not be empty", weight.name, bias.name
                )));
            }
            if weights.iter().any(|row| row.len() != cols) {
                return Err(RelunetError::precondition(format!(
                    "`{}` has rows of differing length", weight.name
                )));
            }
            if weights.len() != biases.len() {
                return Err(RelunetError::precondition(format!(
                    "`{}` has {} rows but `{}` has {} values",
                    weight.name, weights.len(), bias.name, biases.len()
                )));
            }
            if let Some(prev) = layers.last().map(|l: &LayerParams<'_>| l.output_size()) {
                if prev != cols {
                    return Err(RelunetError::precondition(format!(
                        "`{}` expects {} inputs but the previous layer has {} nodes",
                        weight.name, cols, prev
                    )));
                }
            }

            layers.push(LayerParams {
                weight_name: &weight.name,
                bias_name: &bias.name,
                weights,
                biases,
            });
        }
        Ok(layers)
    }

    /// Node count per layer, input layer first.
    pub fn layer_widths(&self) -> Result<Vec<usize>> {
        let layers = self.layers()?;
        let mut widths = vec![layers[0].input_size()];
        widths.extend(layers.iter().map(LayerParams::output_size));
        Ok(widths)
    }

    /// Learnable parameters: every weight plus every bias.
    pub fn parameter_count(&self) -> Result<usize> {
        Ok(self
            .layers()?
            .iter()
            .map(|l| l.input_size() * l.output_size() + l.output_size())
            .sum())
    }

    /// Serializes the state dict to a pretty-printed JSON file.
    pub fn save_json(&self, path: &str) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Deserializes a state dict from a JSON file.
    pub fn load_json(path: &str) -> Result<StateDict> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}
