use duckdb::{Appender, Connection};
use tracing::debug;

use crate::error::Result;

/// Rows buffered per appender flush. Ten million rows take roughly 4 GB, so
/// the default stays a little below that.
pub const DEFAULT_BATCH_SIZE: usize = 8_000_000;

/// A row that can be appended to its table, columns in table order.
pub trait TableRow {
    fn append_to(&self, appender: &mut Appender<'_>) -> duckdb::Result<()>;
}

/// Loads a lazy row stream into `table` in batches of at most `batch_size`
/// rows, preserving order. Returns the number of rows loaded.
///
/// A failed append aborts the load; rows of already flushed batches stay.
pub fn batch_insert<R, I>(conn: &Connection, table: &str, rows: I, batch_size: usize) -> Result<usize>
where
    R: TableRow,
    I: IntoIterator<Item = R>,
{
    let batch_size = batch_size.max(1);
    let mut rows = rows.into_iter();
    let mut batch: Vec<R> = Vec::with_capacity(batch_size.min(1 << 16));
    let mut total = 0;

    loop {
        batch.clear();
        batch.extend(rows.by_ref().take(batch_size));
        if batch.is_empty() {
            break;
        }

        let mut appender = conn.appender(table)?;
        for row in &batch {
            row.append_to(&mut appender)?;
        }
        appender.flush()?;

        total += batch.len();
        debug!(table, rows = batch.len(), total, "appended batch");
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use duckdb::params;

    struct Pair(i64, f64);

    impl TableRow for Pair {
        fn append_to(&self, appender: &mut Appender<'_>) -> duckdb::Result<()> {
            appender.append_row(params![self.0, self.1])
        }
    }

    #[test]
    fn loads_across_several_batches_in_order() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE pairs(k BIGINT, v DOUBLE)").unwrap();

        let loaded = batch_insert(&conn, "pairs", (0..10).map(|i| Pair(i, i as f64 * 0.5)), 3).unwrap();
        assert_eq!(loaded, 10);

        let mut stmt = conn.prepare("SELECT k, v FROM pairs ORDER BY rowid").unwrap();
        let rows: Vec<(i64, f64)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .collect::<duckdb::Result<_>>()
            .unwrap();
        assert_eq!(rows.len(), 10);
        assert_eq!(rows[9], (9, 4.5));
        assert!(rows.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn empty_stream_loads_nothing() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE pairs(k BIGINT, v DOUBLE)").unwrap();
        assert_eq!(batch_insert(&conn, "pairs", Vec::<Pair>::new(), 100).unwrap(), 0);
    }
}
