use serde::{Serialize, Deserialize};

/// Activations a ReLU-FNN uses: ReLU between layers, identity on the output
/// layer (the raw logits stored in the relational encoding).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivationFunction {
    ReLU,
    Identity,
}

impl ActivationFunction {
    /// Element-wise activation.
    pub fn function(&self, x: f64) -> f64 {
        match self {
            ActivationFunction::ReLU => if x > 0.0 { x } else { 0.0 },
            ActivationFunction::Identity => x,
        }
    }
}
