pub mod encoder;

pub use encoder::{encode_model, load_models, load_state_dict, EdgeRow, EncodedModel, ModelEncoding, NodeRow};
