use std::collections::HashMap;
use std::path::Path;

use tracing::debug;

use crate::error::{RelunetError, Result};

/// The SQL templates shipped with the crate, one per `queries/<name>.sql`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Query {
    Eval,
    EvalMulti,
    EvalOccluded,
    Layers,
    LayersMulti,
    Parameters,
    ParametersMulti,
    Pruning,
    PruningMulti,
    Pwl,
    Integral,
}

impl Query {
    pub const ALL: [Query; 11] = [
        Query::Eval,
        Query::EvalMulti,
        Query::EvalOccluded,
        Query::Layers,
        Query::LayersMulti,
        Query::Parameters,
        Query::ParametersMulti,
        Query::Pruning,
        Query::PruningMulti,
        Query::Pwl,
        Query::Integral,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            Query::Eval => "eval.sql",
            Query::EvalMulti => "eval_multi.sql",
            Query::EvalOccluded => "eval_occluded.sql",
            Query::Layers => "layers.sql",
            Query::LayersMulti => "layers_multi.sql",
            Query::Parameters => "parameters.sql",
            Query::ParametersMulti => "parameters_multi.sql",
            Query::Pruning => "pruning.sql",
            Query::PruningMulti => "pruning_multi.sql",
            Query::Pwl => "pwl.sql",
            Query::Integral => "integral.sql",
        }
    }

    fn builtin_sql(self) -> &'static str {
        match self {
            Query::Eval => include_str!("../../queries/eval.sql"),
            Query::EvalMulti => include_str!("../../queries/eval_multi.sql"),
            Query::EvalOccluded => include_str!("../../queries/eval_occluded.sql"),
            Query::Layers => include_str!("../../queries/layers.sql"),
            Query::LayersMulti => include_str!("../../queries/layers_multi.sql"),
            Query::Parameters => include_str!("../../queries/parameters.sql"),
            Query::ParametersMulti => include_str!("../../queries/parameters_multi.sql"),
            Query::Pruning => include_str!("../../queries/pruning.sql"),
            Query::PruningMulti => include_str!("../../queries/pruning_multi.sql"),
            Query::Pwl => include_str!("../../queries/pwl.sql"),
            Query::Integral => include_str!("../../queries/integral.sql"),
        }
    }
}

/// SQL text for every [`Query`], loaded as opaque strings.
///
/// The built-in templates can be replaced file by file from a directory;
/// files missing from the directory keep their built-in text.
#[derive(Debug, Clone)]
pub struct QuerySuite {
    overrides: HashMap<Query, String>,
}

impl QuerySuite {
    pub fn builtin() -> QuerySuite {
        QuerySuite { overrides: HashMap::new() }
    }

    pub fn from_dir(dir: &Path) -> Result<QuerySuite> {
        if !dir.is_dir() {
            return Err(RelunetError::Query(format!("query directory {} not found", dir.display())));
        }
        let mut overrides = HashMap::new();
        for query in Query::ALL {
            let path = dir.join(query.file_name());
            if path.is_file() {
                debug!(path = %path.display(), "overriding built-in query");
                overrides.insert(query, std::fs::read_to_string(&path)?);
            }
        }
        Ok(QuerySuite { overrides })
    }

    pub fn sql(&self, query: Query) -> &str {
        self.overrides.get(&query).map_or(query.builtin_sql(), String::as_str)
    }
}

impl Default for QuerySuite {
    fn default() -> Self {
        QuerySuite::builtin()
    }
}
