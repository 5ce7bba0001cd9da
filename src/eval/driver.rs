use std::fmt;
use std::time::Instant;

use duckdb::{params, Appender, Connection};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::activation::log_softmax::{argmax, log_softmax};
use crate::db::loader::{batch_insert, TableRow, DEFAULT_BATCH_SIZE};
use crate::db::transaction::ScopedTransaction;
use crate::error::{RelunetError, Result};
use crate::query::suite::{Query, QuerySuite};

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// One row of the `input` table. `input_node_idx` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputRow {
    pub input_set_id: i64,
    pub input_node_idx: i64,
    pub input_value: f64,
}

impl TableRow for InputRow {
    fn append_to(&self, appender: &mut Appender<'_>) -> duckdb::Result<()> {
        appender.append_row(params![self.input_set_id, self.input_node_idx, self.input_value])
    }
}

/// Input rows for a batch: sample `s` becomes input set `s`.
pub fn input_rows<S: AsRef<[f64]>>(samples: &[S]) -> impl Iterator<Item = InputRow> + '_ {
    samples.iter().enumerate().flat_map(|(s, sample)| {
        sample.as_ref().iter().enumerate().map(move |(i, &value)| InputRow {
            input_set_id: s as i64,
            input_node_idx: i as i64 + 1,
            input_value: value,
        })
    })
}

/// One output node of one input set, as returned by the forward pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRow {
    pub input_set_id: i64,
    pub node_id: i64,
    pub name: String,
    pub output_value: f64,
    pub log_softmax: f64,
}

/// One output node of one model for one input set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelOutputRow {
    pub model_id: i64,
    pub model_name: String,
    pub input_set_id: i64,
    pub node_id: i64,
    pub output_value: f64,
    pub log_softmax: f64,
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Result of a single-model evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Output rows ordered by input set, then node id.
    pub rows: Vec<OutputRow>,
    /// Index of the output node with the largest log-softmax, per sample.
    /// `None` when the forward pass produced no outputs for that sample.
    pub predictions: Vec<Option<usize>>,
}

impl Evaluation {
    /// Prediction for the first sample.
    pub fn prediction(&self) -> Option<usize> {
        self.predictions.first().copied().flatten()
    }

    /// Raw output values of one input set, in node id order.
    pub fn outputs(&self, input_set_id: i64) -> Vec<f64> {
        self.rows.iter().filter(|r| r.input_set_id == input_set_id).map(|r| r.output_value).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPrediction {
    pub model_id: i64,
    pub model_name: String,
    pub input_set_id: i64,
    pub prediction: usize,
    /// `exp` of the largest log-softmax value.
    pub confidence: f64,
}

/// Result of evaluating every model in the database on the same inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelEvaluation {
    pub rows: Vec<ModelOutputRow>,
    /// Ordered by input set, then model id.
    pub predictions: Vec<ModelPrediction>,
}

impl ModelEvaluation {
    pub fn predictions_for(&self, input_set_id: i64) -> Vec<ModelPrediction> {
        self.predictions.iter().filter(|p| p.input_set_id == input_set_id).cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Loads inputs and runs the forward-pass templates on one connection.
///
/// Every evaluation truncates and refills the `input` table, runs the query
/// and commits, all inside one transaction, so concurrent evaluations must
/// use separate connections.
pub struct Evaluator<'a> {
    conn: &'a Connection,
    suite: &'a QuerySuite,
    batch_size: usize,
}

impl<'a> Evaluator<'a> {
    pub fn new(conn: &'a Connection, suite: &'a QuerySuite) -> Self {
        Evaluator { conn, suite, batch_size: DEFAULT_BATCH_SIZE }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn evaluate(&self, sample: &[f64]) -> Result<Evaluation> {
        self.evaluate_batch(std::slice::from_ref(&sample))
    }

    /// Evaluates every sample in one forward pass; sample `s` is input set
    /// `s` in the returned rows.
    ///
    /// Predictions are taken over all output rows of a set, so the database
    /// must hold exactly one model. Use [`Evaluator::evaluate_models_batch`]
    /// when several are loaded.
    pub fn evaluate_batch<S: AsRef<[f64]>>(&self, samples: &[S]) -> Result<Evaluation> {
        let started = Instant::now();
        let models: i64 = self.conn.query_row("SELECT COUNT(*) FROM model", [], |row| row.get(0))?;
        if models != 1 {
            return Err(RelunetError::precondition(format!(
                "single-model evaluation needs exactly one model, found {models}; compare models instead"
            )));
        }
        let tx = ScopedTransaction::begin(self.conn)?;
        load_inputs(&tx, samples, self.batch_size)?;

        let rows = {
            let mut stmt = tx.prepare(self.suite.sql(Query::Eval))?;
            let rows = stmt.query_map([], |row| {
                Ok(OutputRow {
                    input_set_id: row.get(0)?,
                    node_id: row.get(1)?,
                    name: row.get(2)?,
                    output_value: row.get(3)?,
                    log_softmax: row.get(4)?,
                })
            })?;
            rows.collect::<duckdb::Result<Vec<_>>>()?
        };
        tx.commit()?;

        let predictions = (0..samples.len() as i64)
            .map(|set| {
                let scores: Vec<f64> =
                    rows.iter().filter(|r| r.input_set_id == set).map(|r| r.log_softmax).collect();
                argmax(&scores)
            })
            .collect();

        info!(samples = samples.len(), rows = rows.len(), elapsed_ms = started.elapsed().as_millis() as u64, "evaluated");
        Ok(Evaluation { rows, predictions })
    }

    pub fn evaluate_models(&self, sample: &[f64]) -> Result<ModelEvaluation> {
        self.evaluate_models_batch(std::slice::from_ref(&sample))
    }

    /// Evaluates every model in the database. Log-softmax is taken per
    /// (input set, model) over that model's output nodes.
    pub fn evaluate_models_batch<S: AsRef<[f64]>>(&self, samples: &[S]) -> Result<ModelEvaluation> {
        let started = Instant::now();
        let tx = ScopedTransaction::begin(self.conn)?;
        load_inputs(&tx, samples, self.batch_size)?;

        let mut rows = {
            let mut stmt = tx.prepare(self.suite.sql(Query::EvalMulti))?;
            let rows = stmt.query_map([], |row| {
                Ok(ModelOutputRow {
                    model_id: row.get(0)?,
                    model_name: row.get(1)?,
                    input_set_id: row.get(2)?,
                    node_id: row.get(3)?,
                    output_value: row.get(4)?,
                    log_softmax: 0.0,
                })
            })?;
            rows.collect::<duckdb::Result<Vec<_>>>()?
        };
        tx.commit()?;

        // Group by (input set, model) without relying on the query's order.
        rows.sort_by_key(|r| (r.input_set_id, r.model_id, r.node_id));
        let mut predictions = Vec::new();
        for group in rows.chunk_by_mut(|a, b| (a.input_set_id, a.model_id) == (b.input_set_id, b.model_id)) {
            let values: Vec<f64> = group.iter().map(|r| r.output_value).collect();
            let scores = log_softmax(&values);
            for (row, &score) in group.iter_mut().zip(&scores) {
                row.log_softmax = score;
            }
            if let Some(prediction) = argmax(&scores) {
                predictions.push(ModelPrediction {
                    model_id: group[0].model_id,
                    model_name: group[0].model_name.clone(),
                    input_set_id: group[0].input_set_id,
                    prediction,
                    confidence: scores[prediction].exp(),
                });
            }
        }

        info!(
            samples = samples.len(),
            predictions = predictions.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "evaluated all models"
        );
        Ok(ModelEvaluation { rows, predictions })
    }

    /// Runs the occlusion forward pass over the inputs already loaded.
    /// `position` is the 1-based input index replaced by 0, or `None`.
    pub fn evaluate_occluded(&self, position: Option<usize>) -> Result<Vec<OutputRow>> {
        run_occluded(self.conn, self.suite, position)
    }
}

pub(crate) fn run_occluded(conn: &Connection, suite: &QuerySuite, position: Option<usize>) -> Result<Vec<OutputRow>> {
    let position = position.map_or(-1, |p| p as i64);
    let mut stmt = conn.prepare(suite.sql(Query::EvalOccluded))?;
    let rows = stmt.query_map(params![position], |row| {
        Ok(OutputRow {
            input_set_id: row.get(0)?,
            node_id: row.get(1)?,
            name: row.get(2)?,
            output_value: row.get(3)?,
            log_softmax: row.get(4)?,
        })
    })?;
    Ok(rows.collect::<duckdb::Result<Vec<_>>>()?)
}

fn load_inputs<S: AsRef<[f64]>>(tx: &ScopedTransaction<'_>, samples: &[S], batch_size: usize) -> Result<usize> {
    tx.execute_batch("TRUNCATE input")?;
    batch_insert(tx, "input", input_rows(samples), batch_size)
}

// ---------------------------------------------------------------------------
// Pivot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    Prediction,
    Confidence,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Prediction => write!(f, "Prediction"),
            Metric::Confidence => write!(f, "Confidence"),
        }
    }
}

/// Metric × model table: one row per [`Metric`], one column per model.
#[derive(Debug, Clone, PartialEq)]
pub struct PivotTable {
    pub columns: Vec<String>,
    pub rows: Vec<(Metric, Vec<f64>)>,
}

impl PivotTable {
    pub fn get(&self, metric: Metric, model_name: &str) -> Option<f64> {
        let column = self.columns.iter().position(|c| c == model_name)?;
        let (_, values) = self.rows.iter().find(|(m, _)| *m == metric)?;
        values.get(column).copied()
    }
}

/// Reshapes per-model predictions, ordered by model id, into a
/// [`PivotTable`] with `Confidence` and `Prediction` rows.
pub fn pivot(predictions: &[ModelPrediction]) -> PivotTable {
    let mut sorted: Vec<&ModelPrediction> = predictions.iter().collect();
    sorted.sort_by_key(|p| p.model_id);

    PivotTable {
        columns: sorted.iter().map(|p| p.model_name.clone()).collect(),
        rows: vec![
            (Metric::Confidence, sorted.iter().map(|p| p.confidence).collect()),
            (Metric::Prediction, sorted.iter().map(|p| p.prediction as f64).collect()),
        ],
    }
}

impl fmt::Display for PivotTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.columns.iter().map(String::len).max().unwrap_or(0).max(10);
        write!(f, "{:<12}", "")?;
        for column in &self.columns {
            write!(f, " {column:>width$}")?;
        }
        writeln!(f)?;
        for (metric, values) in &self.rows {
            write!(f, "{:<12}", metric.to_string())?;
            for value in values {
                match metric {
                    Metric::Prediction => write!(f, " {:>width$}", *value as usize)?,
                    Metric::Confidence => write!(f, " {value:>width$.4}")?,
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema;
    use crate::encoder::{load_models, load_state_dict};
    use crate::network::StateDict;

    fn difference() -> StateDict {
        let mut sd = StateDict::new();
        sd.push_layer("fc", vec![vec![1.0, -1.0]], vec![0.0]);
        sd
    }

    /// 2 inputs -> 2 hidden -> 3 outputs.
    fn classifier(sign: f64) -> StateDict {
        let mut sd = StateDict::new();
        sd.push_layer("fc1", vec![vec![1.0, 0.0], vec![0.0, 1.0]], vec![0.0, 0.0]);
        sd.push_layer("fc2", vec![vec![sign, 0.0], vec![0.0, sign], vec![0.5, 0.5]], vec![0.0, 0.0, 0.1]);
        sd
    }

    #[test]
    fn difference_of_equal_inputs_is_zero() {
        let conn = schema::open_in_memory().unwrap();
        load_state_dict(&conn, "diff", &difference(), 16).unwrap();
        let suite = QuerySuite::builtin();

        let eval = Evaluator::new(&conn, &suite).evaluate(&[1.0, 1.0]).unwrap();
        assert_eq!(eval.rows.len(), 1);
        assert_eq!(eval.rows[0].output_value, 0.0);
        assert_eq!(eval.rows[0].log_softmax, 0.0);
        assert_eq!(eval.prediction(), Some(0));
    }

    #[test]
    fn batch_rows_are_grouped_per_sample() {
        let conn = schema::open_in_memory().unwrap();
        load_state_dict(&conn, "clf", &classifier(1.0), 16).unwrap();
        let suite = QuerySuite::builtin();
        let evaluator = Evaluator::new(&conn, &suite).with_batch_size(3);

        let eval = evaluator.evaluate_batch(&[vec![3.0, 0.0], vec![0.0, 3.0], vec![-1.0, -1.0]]).unwrap();
        assert_eq!(eval.rows.len(), 9);
        assert_eq!(eval.predictions, vec![Some(0), Some(1), Some(2)]);
        assert_eq!(eval.outputs(2), vec![0.0, 0.0, 0.1]);

        for set in 0..3 {
            let total: f64 = eval.rows.iter().filter(|r| r.input_set_id == set).map(|r| r.log_softmax.exp()).sum();
            assert!((total - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn input_table_is_replaced_between_evaluations() {
        let conn = schema::open_in_memory().unwrap();
        load_state_dict(&conn, "clf", &classifier(1.0), 16).unwrap();
        let suite = QuerySuite::builtin();
        let evaluator = Evaluator::new(&conn, &suite);

        evaluator.evaluate_batch(&[vec![1.0, 2.0], vec![2.0, 1.0]]).unwrap();
        let eval = evaluator.evaluate(&[0.0, 5.0]).unwrap();
        assert_eq!(eval.predictions, vec![Some(1)]);
        let inputs: i64 = conn.query_row("SELECT COUNT(*) FROM input", [], |row| row.get(0)).unwrap();
        assert_eq!(inputs, 2);
    }

    #[test]
    fn evaluation_recovers_from_an_abandoned_transaction() {
        let conn = schema::open_in_memory().unwrap();
        load_state_dict(&conn, "diff", &difference(), 16).unwrap();
        conn.execute_batch("BEGIN TRANSACTION").unwrap();
        let suite = QuerySuite::builtin();
        let eval = Evaluator::new(&conn, &suite).evaluate(&[4.0, 1.0]).unwrap();
        assert_eq!(eval.outputs(0), vec![3.0]);
    }

    #[test]
    fn models_are_compared_side_by_side() {
        let conn = schema::open_in_memory().unwrap();
        load_models(&conn, &[("plus".into(), classifier(1.0)), ("minus".into(), classifier(-1.0))], 16).unwrap();
        let suite = QuerySuite::builtin();

        let eval = Evaluator::new(&conn, &suite).evaluate_models(&[2.0, 0.0]).unwrap();
        assert_eq!(eval.rows.len(), 6);
        let names: Vec<&str> = eval.predictions.iter().map(|p| p.model_name.as_str()).collect();
        assert_eq!(names, ["plus", "minus"]);
        assert_eq!(eval.predictions[0].prediction, 0);
        assert_eq!(eval.predictions[1].prediction, 2);
        for p in &eval.predictions {
            assert!(p.confidence > 0.0 && p.confidence <= 1.0);
        }

        let table = pivot(&eval.predictions_for(0));
        assert_eq!(table.columns, ["plus", "minus"]);
        assert_eq!(table.get(Metric::Prediction, "minus"), Some(2.0));
        assert!(table.to_string().contains("Confidence"));
    }

    #[test]
    fn single_model_evaluation_rejects_several_models() {
        let conn = schema::open_in_memory().unwrap();
        load_models(&conn, &[("plus".into(), classifier(1.0)), ("minus".into(), classifier(-1.0))], 16).unwrap();
        let suite = QuerySuite::builtin();

        let err = Evaluator::new(&conn, &suite).evaluate(&[1.0, 2.0]).unwrap_err();
        assert!(matches!(err, RelunetError::Precondition(_)), "{err}");

        let empty = schema::open_in_memory().unwrap();
        let err = Evaluator::new(&empty, &suite).evaluate(&[1.0, 2.0]).unwrap_err();
        assert!(matches!(err, RelunetError::Precondition(_)), "{err}");
    }

    #[test]
    fn log_softmax_is_normalized_per_model() {
        let conn = schema::open_in_memory().unwrap();
        let encoded =
            load_models(&conn, &[("plus".into(), classifier(1.0)), ("minus".into(), classifier(-1.0))], 16).unwrap();
        let suite = QuerySuite::builtin();
        let tx = ScopedTransaction::begin(&conn).unwrap();
        load_inputs(&tx, &[vec![1.0, 2.0]], 16).unwrap();
        tx.commit().unwrap();

        let mut stmt = conn.prepare(suite.sql(Query::Eval)).unwrap();
        let rows: Vec<(i64, f64)> =
            stmt.query_map([], |row| Ok((row.get(1)?, row.get(4)?))).unwrap().collect::<duckdb::Result<_>>().unwrap();
        assert_eq!(rows.len(), 6);

        let model_of = |node: i64| -> i64 {
            conn.query_row("SELECT model_id FROM node WHERE id = ?", params![node], |row| row.get(0)).unwrap()
        };
        for model in encoded.iter().map(|m| m.model_id) {
            let total: f64 = rows.iter().filter(|(node, _)| model_of(*node) == model).map(|(_, l)| l.exp()).sum();
            assert!((total - 1.0).abs() < 1e-9, "model {model}: {total}");
        }
    }

    #[test]
    fn occluding_a_position_zeroes_it() {
        let conn = schema::open_in_memory().unwrap();
        load_state_dict(&conn, "diff", &difference(), 16).unwrap();
        let suite = QuerySuite::builtin();
        let evaluator = Evaluator::new(&conn, &suite);
        evaluator.evaluate(&[4.0, 1.0]).unwrap();

        assert_eq!(evaluator.evaluate_occluded(None).unwrap()[0].output_value, 3.0);
        assert_eq!(evaluator.evaluate_occluded(Some(1)).unwrap()[0].output_value, -1.0);
        assert_eq!(evaluator.evaluate_occluded(Some(2)).unwrap()[0].output_value, 4.0);
    }
}
