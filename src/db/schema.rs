//! Relational schema for encoded networks.
//!
//! ```text
//! model(id, name)
//! node(id, bias, name, model_id)        id drawn from seq_node
//! edge(src, dst, weight, model_id)      complete bipartite between layers
//! input(input_set_id, input_node_idx, input_value)
//! ```
//!
//! Foreign keys are omitted so bulk loads stay fast; the encoder is the only
//! writer of `model`, `node` and `edge`.

use std::path::Path;

use duckdb::Connection;
use tracing::{debug, info};

use crate::config::settings::Settings;
use crate::db::transaction::ScopedTransaction;
use crate::error::Result;

const DROP_SCHEMA: &str = r#"
    DROP TABLE IF EXISTS edge;
    DROP TABLE IF EXISTS node;
    DROP TABLE IF EXISTS input;
    DROP TABLE IF EXISTS model;
    DROP SEQUENCE IF EXISTS seq_node;
"#;

const CREATE_SCHEMA: &str = r#"
    CREATE SEQUENCE seq_node START 1;

    CREATE TABLE model(
        id BIGINT PRIMARY KEY,
        name VARCHAR
    );

    CREATE TABLE node(
        id BIGINT PRIMARY KEY DEFAULT NEXTVAL('seq_node'),
        bias DOUBLE,
        name VARCHAR,
        model_id BIGINT
    );

    CREATE TABLE edge(
        src BIGINT,
        dst BIGINT,
        weight DOUBLE,
        model_id BIGINT
    );

    CREATE TABLE input(
        input_set_id BIGINT,
        input_node_idx BIGINT,
        input_value DOUBLE
    );
"#;

/// Row counts of the encoded tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableCounts {
    pub models: i64,
    pub nodes: i64,
    pub edges: i64,
}

/// Opens an empty in-memory database.
pub fn open_in_memory() -> Result<Connection> {
    Ok(Connection::open_in_memory()?)
}

/// Drops and recreates every schema object. Runs as one transaction, so a
/// failure leaves the previous schema in place rather than a partial one.
pub fn initialize(conn: &Connection) -> Result<()> {
    let tx = ScopedTransaction::begin(conn)?;
    tx.execute_batch(DROP_SCHEMA)?;
    tx.execute_batch(CREATE_SCHEMA)?;
    tx.commit()?;
    info!("initialized node/edge/input/model schema");
    Ok(())
}

/// Draws `count` consecutive ids from `seq_node` and returns the first one.
///
/// The block is contiguous because the encoder is the only consumer of the
/// sequence while a model is loaded.
pub fn reserve_node_ids(conn: &Connection, count: usize) -> Result<i64> {
    let sql = format!(
        "SELECT MIN(id) FROM (SELECT NEXTVAL('seq_node') AS id FROM range({}))",
        count.max(1)
    );
    let first: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
    debug!(first, count, "reserved node ids");
    Ok(first)
}

/// The id the next registered model receives.
pub fn next_model_id(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COALESCE(MAX(id), 0) + 1 FROM model", [], |row| row.get(0))?)
}

pub fn table_counts(conn: &Connection) -> Result<TableCounts> {
    Ok(conn.query_row(
        "SELECT (SELECT COUNT(*) FROM model), (SELECT COUNT(*) FROM node), (SELECT COUNT(*) FROM edge)",
        [],
        |row| Ok(TableCounts { models: row.get(0)?, nodes: row.get(1)?, edges: row.get(2)? }),
    )?)
}

/// Writes the database to `dir` in DuckDB's portable export format,
/// replacing any previous export.
pub fn export_database(conn: &Connection, dir: &Path) -> Result<()> {
    if dir.is_dir() {
        std::fs::remove_dir_all(dir)?;
    }
    conn.execute_batch(&format!("EXPORT DATABASE '{}'", sql_path(dir)))?;
    info!(dir = %dir.display(), "exported database");
    Ok(())
}

/// Opens the database exported to `settings.export_dir`.
pub fn open(settings: &Settings) -> Result<Connection> {
    import_database(&settings.export_dir)
}

/// Opens a fresh in-memory connection populated from an export directory.
pub fn import_database(dir: &Path) -> Result<Connection> {
    let conn = open_in_memory()?;
    conn.execute_batch(&format!("IMPORT DATABASE '{}'", sql_path(dir)))?;
    info!(dir = %dir.display(), "imported database");
    Ok(conn)
}

/// Quotes a path for use inside a single-quoted SQL literal.
fn sql_path(path: &Path) -> String {
    path.display().to_string().replace('\'', "''")
}
