use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::db::loader::DEFAULT_BATCH_SIZE;
use crate::error::Result;
use crate::input::image::Normalization;
use crate::query::suite::QuerySuite;

/// Runtime settings, read from a JSON file. Every field has a default, so a
/// partial file (or none at all) is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Where `encode` exports the database and the other commands import it.
    pub export_dir: PathBuf,
    /// Directory whose `<name>.sql` files replace the built-in queries.
    pub query_dir: Option<PathBuf>,
    pub batch_size: usize,
    /// Applied to image inputs; `None` feeds raw [0, 1] pixels.
    pub normalization: Option<Normalization>,
    pub image_width: u32,
    pub image_height: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            export_dir: PathBuf::from("relunet-db"),
            query_dir: None,
            batch_size: DEFAULT_BATCH_SIZE,
            normalization: Some(Normalization::default()),
            image_width: 28,
            image_height: 28,
        }
    }
}

impl Settings {
    pub fn save_json(&self, path: &str) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn load_json(path: &str) -> Result<Settings> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }

    /// The built-in queries with this configuration's overrides applied.
    pub fn query_suite(&self) -> Result<QuerySuite> {
        match &self.query_dir {
            Some(dir) => QuerySuite::from_dir(dir),
            None => Ok(QuerySuite::builtin()),
        }
    }
}
