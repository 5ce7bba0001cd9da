//! Typed runners for the structural and functional analysis queries.
//!
//! ```ignore
//! let analyzer = Analyzer::new(&conn, &suite);
//! let layers = analyzer.layer_counts()?;
//! let prunable = analyzer.pruning_candidates(1e-3)?;
//! ```

use duckdb::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::error::{RelunetError, Result};
use crate::graph::pwl::Breakpoint;
use crate::query::suite::{Query, QuerySuite};

/// Runs the analysis templates of a [`QuerySuite`] against one connection.
pub struct Analyzer<'a> {
    conn: &'a Connection,
    suite: &'a QuerySuite,
}

impl<'a> Analyzer<'a> {
    pub fn new(conn: &'a Connection, suite: &'a QuerySuite) -> Self {
        Analyzer { conn, suite }
    }

    /// Node count per layer, input layer first.
    pub fn layer_counts(&self) -> Result<Vec<LayerCount>> {
        let mut stmt = self.conn.prepare(self.suite.sql(Query::Layers))?;
        let rows = stmt.query_map([], |row| Ok(LayerCount { layer: row.get(0)?, nodes: row.get(1)? }))?;
        Ok(rows.collect::<duckdb::Result<_>>()?)
    }

    pub fn layer_counts_by_model(&self) -> Result<Vec<ModelLayerCount>> {
        let mut stmt = self.conn.prepare(self.suite.sql(Query::LayersMulti))?;
        let rows = stmt.query_map([], |row| {
            Ok(ModelLayerCount {
                model_id: row.get(0)?,
                model_name: row.get(1)?,
                layer: row.get(2)?,
                nodes: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<duckdb::Result<_>>()?)
    }

    /// Biases of every non-input node plus one weight per edge.
    pub fn parameter_count(&self) -> Result<i64> {
        let count: Option<i64> = self.conn.query_row(self.suite.sql(Query::Parameters), [], |row| row.get(0))?;
        count.ok_or_else(|| RelunetError::Query("parameter count returned NULL".into()))
    }

    pub fn parameter_counts_by_model(&self) -> Result<Vec<ModelParameterCount>> {
        let mut stmt = self.conn.prepare(self.suite.sql(Query::ParametersMulti))?;
        let rows = stmt.query_map([], |row| {
            Ok(ModelParameterCount { model_id: row.get(0)?, model_name: row.get(1)?, parameters: row.get(2)? })
        })?;
        Ok(rows.collect::<duckdb::Result<_>>()?)
    }

    /// Ids of nodes whose outgoing weights all satisfy `|w| <= threshold`.
    pub fn pruning_candidates(&self, threshold: f64) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(self.suite.sql(Query::Pruning))?;
        let rows = stmt.query_map(params![threshold], |row| row.get(0))?;
        Ok(rows.collect::<duckdb::Result<_>>()?)
    }

    pub fn pruning_report(&self, threshold: f64) -> Result<Vec<PruningReport>> {
        let mut stmt = self.conn.prepare(self.suite.sql(Query::PruningMulti))?;
        let rows = stmt.query_map(params![threshold], |row| {
            Ok(PruningReport {
                model_id: row.get(0)?,
                model_name: row.get(1)?,
                hidden_nodes: row.get(2)?,
                prunable_nodes: row.get(3)?,
                percentage_prunable: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<duckdb::Result<_>>()?)
    }

    /// Breakpoints of a one-input, one-hidden-layer, one-output network,
    /// sorted by `x`.
    pub fn breakpoints(&self) -> Result<Vec<Breakpoint>> {
        let mut stmt = self.conn.prepare(self.suite.sql(Query::Pwl))?;
        let rows = stmt.query_map([], |row| Ok(Breakpoint { x: row.get(0)?, y: row.get(1)?, slope: row.get(2)? }))?;
        Ok(rows.collect::<duckdb::Result<_>>()?)
    }

    /// Integral of the network output over `[from, to]`; `None` when no
    /// segment between two breakpoints overlaps the bounds.
    ///
    /// Segments that straddle a bound are clipped to it, so the result near
    /// the bounds differs from summing whole segments that start inside them.
    pub fn integral(&self, from: f64, to: f64) -> Result<Option<f64>> {
        Ok(self.conn.query_row(self.suite.sql(Query::Integral), params![from, to], |row| row.get(0))?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerCount {
    pub layer: i64,
    pub nodes: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelLayerCount {
    pub model_id: i64,
    pub model_name: String,
    pub layer: i64,
    pub nodes: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelParameterCount {
    pub model_id: i64,
    pub model_name: String,
    pub parameters: i64,
}

/// Prunable share of one model's hidden nodes. `percentage_prunable` is
/// rounded to two decimals and `None` for a model without hidden nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PruningReport {
    pub model_id: i64,
    pub model_name: String,
    pub hidden_nodes: i64,
    pub prunable_nodes: i64,
    pub percentage_prunable: Option<f64>,
}
