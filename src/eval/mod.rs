pub mod driver;
pub mod saliency;

pub use driver::{
    input_rows, pivot, Evaluation, Evaluator, InputRow, Metric, ModelEvaluation, ModelOutputRow, ModelPrediction,
    OutputRow, PivotTable,
};
pub use saliency::{saliency_map, SaliencyMap};
