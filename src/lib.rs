pub mod math;
pub mod activation;
pub mod layers;
pub mod network;
pub mod error;
pub mod config;
pub mod db;
pub mod encoder;
pub mod query;
pub mod eval;
pub mod graph;
pub mod input;

// Convenience re-exports
pub use math::matrix::Matrix;
pub use activation::activation::ActivationFunction;
pub use layers::dense::Layer;
pub use network::network::Network;
pub use network::spec::NetworkSpec;
pub use network::state_dict::StateDict;
pub use error::{RelunetError, Result};
pub use config::settings::Settings;
pub use encoder::encoder::{encode_model, load_models, load_state_dict};
pub use query::analysis::Analyzer;
pub use query::suite::{Query, QuerySuite};
pub use eval::driver::{pivot, Evaluator};
pub use eval::saliency::saliency_map;
pub use graph::graph::NetworkGraph;
