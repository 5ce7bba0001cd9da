pub mod analysis;
pub mod suite;

pub use analysis::{Analyzer, LayerCount, ModelLayerCount, ModelParameterCount, PruningReport};
pub use suite::{Query, QuerySuite};
