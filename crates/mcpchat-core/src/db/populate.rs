//! Fills tables with generated rows.

use rand::Rng;
use serde::Serialize;
use tracing::{debug, info};

use super::fake::{self, FakeValue, TypeFamily};
use super::{quote_ident, ColumnInfo, Database};

/// Outcome of a populate run.
#[derive(Debug, Clone, Serialize)]
pub struct PopulateReport {
    pub table: String,
    pub rows: usize,
    /// The INSERT that was executed, if any rows were generated.
    pub statement: Option<String>,
}

pub struct Populator<'a> {
    db: &'a Database,
}

impl<'a> Populator<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Generate `rows` fake rows for `table` and insert them in one statement.
    pub fn populate_table(&self, table: &str, rows: usize) -> anyhow::Result<PopulateReport> {
        self.populate_table_with(&mut rand::thread_rng(), table, rows)
    }

    pub fn populate_table_with<R: Rng>(
        &self,
        rng: &mut R,
        table: &str,
        rows: usize,
    ) -> anyhow::Result<PopulateReport> {
        let all = self.db.columns(table)?;
        let rowid = rowid_alias(&all, self.db.has_rowid(table)?).map(str::to_string);
        let columns: Vec<ColumnInfo> = all
            .into_iter()
            .filter(|c| rowid.as_deref() != Some(c.name.as_str()))
            .collect();
        if columns.is_empty() {
            anyhow::bail!("table {} has no columns to populate", table);
        }
        for col in &columns {
            debug!(table, column = %col.name, sql_type = %col.sql_type, nullable = col.nullable, "Column");
        }

        let mut values = generate_rows(rng, &columns, rows)?;
        self.assign_unique_keys(rng, table, &columns, &mut values)?;
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        let statement = build_insert(table, &names, &values);

        if let Some(ref sql) = statement {
            self.db.execute_batch(sql)?;
            info!(table, rows, "Populated table");
        }

        Ok(PopulateReport {
            table: table.to_string(),
            rows: values.len(),
            statement,
        })
    }

    /// Overwrite primary-key cells so no two rows, generated or stored,
    /// share a key value. Integer keys count up from the current maximum;
    /// other keys are redrawn until they are unused.
    fn assign_unique_keys<R: Rng>(
        &self,
        rng: &mut R,
        table: &str,
        columns: &[ColumnInfo],
        rows: &mut [Vec<FakeValue>],
    ) -> anyhow::Result<()> {
        for (i, col) in columns.iter().enumerate().filter(|(_, c)| c.primary_key) {
            if TypeFamily::from_declared(&col.sql_type)? == TypeFamily::Integer {
                let start = self.db.max_integer(table, &col.name)?.unwrap_or(0);
                for (n, row) in rows.iter_mut().enumerate() {
                    let key = i64::try_from(n)
                        .ok()
                        .and_then(|n| start.checked_add(n + 1))
                        .ok_or_else(|| anyhow::anyhow!("key column {} is exhausted", col.name))?;
                    row[i] = FakeValue::Integer(key);
                }
                continue;
            }

            let mut taken = self.db.literal_values(table, &col.name)?;
            for row in rows.iter_mut() {
                let mut attempts = 1;
                while !taken.insert(row[i].to_sql_literal()) {
                    if attempts == KEY_ATTEMPTS {
                        anyhow::bail!("could not generate a unique value for key column {}", col.name);
                    }
                    row[i] = fake::generate(rng, col)?;
                    attempts += 1;
                }
            }
            debug!(table, column = %col.name, "Generated unique key values");
        }
        Ok(())
    }
}

/// Redraws allowed per row before a non-integer key column is given up on.
const KEY_ATTEMPTS: usize = 100;

/// The column that aliases the rowid, if any. SQLite only does this for a
/// lone primary key declared exactly `INTEGER` on a rowid table; `INT`,
/// `BIGINT`, composite keys and `WITHOUT ROWID` keys are ordinary columns
/// that must be filled in.
fn rowid_alias(columns: &[ColumnInfo], has_rowid: bool) -> Option<&str> {
    if !has_rowid {
        return None;
    }
    let mut keys = columns.iter().filter(|c| c.primary_key);
    match (keys.next(), keys.next()) {
        (Some(key), None) if key.sql_type.trim().eq_ignore_ascii_case("INTEGER") => {
            Some(key.name.as_str())
        }
        _ => None,
    }
}

/// Generate `count` rows, one value per column.
pub fn generate_rows<R: Rng>(
    rng: &mut R,
    columns: &[ColumnInfo],
    count: usize,
) -> anyhow::Result<Vec<Vec<FakeValue>>> {
    (0..count)
        .map(|_| columns.iter().map(|col| fake::generate(rng, col)).collect())
        .collect()
}

/// Build a multi-row INSERT. Returns `None` for an empty row set.
pub fn build_insert(table: &str, columns: &[&str], rows: &[Vec<FakeValue>]) -> Option<String> {
    if rows.is_empty() {
        return None;
    }

    let header = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let values = rows
        .iter()
        .map(|row| {
            let cells = row
                .iter()
                .map(FakeValue::to_sql_literal)
                .collect::<Vec<_>>()
                .join(", ");
            format!("({cells})")
        })
        .collect::<Vec<_>>()
        .join(",\n");

    Some(format!(
        "INSERT INTO {} ({})\nVALUES\n{};",
        quote_ident(table),
        header,
        values
    ))
}
