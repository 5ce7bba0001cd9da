pub mod activation;
pub mod log_softmax;

pub use activation::ActivationFunction;
pub use log_softmax::{argmax, log_softmax};
