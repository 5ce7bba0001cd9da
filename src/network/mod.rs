pub mod network;
pub mod spec;
pub mod state_dict;

pub use network::Network;
pub use spec::NetworkSpec;
pub use state_dict::{LayerParams, Parameter, StateDict, Tensor};
