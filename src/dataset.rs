use anyhow::{Context, Result, bail};
use duckdb::Connection;
use std::path::Path;

/// A named column of integers
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<i64>,
}

/// Small columnar table; every column has the same length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    columns: Vec<Column>,
}

impl Frame {
    /// Columns `a` and `b`, both holding `0..rows`
    pub fn from_range(rows: usize) -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let sql = format!("SELECT range AS a, range AS b FROM range({}) ORDER BY range", rows);
        Self::load(&conn, &sql, &["a".to_string(), "b".to_string()])
    }

    /// Read `columns` from a CSV file, casting each to BIGINT
    pub fn from_csv(path: &Path, columns: &[String]) -> Result<Self> {
        if columns.is_empty() {
            bail!("No columns requested from {}", path.display());
        }

        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let select = columns
            .iter()
            .map(|name| format!("CAST({} AS BIGINT)", quote_ident(name)))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {} FROM read_csv_auto({})",
            select,
            quote_literal(&path.to_string_lossy())
        );
        Self::load(&conn, &sql, columns)
            .context(format!("Failed to load {}", path.display()))
    }

    fn load(conn: &Connection, sql: &str, names: &[String]) -> Result<Self> {
        let mut columns: Vec<Column> = names
            .iter()
            .map(|name| Column {
                name: name.clone(),
                values: Vec::new(),
            })
            .collect();

        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            for (i, column) in columns.iter_mut().enumerate() {
                column.values.push(row.get(i)?);
            }
        }

        Ok(Self { columns })
    }

    /// Number of rows
    pub fn height(&self) -> usize {
        self.columns.first().map_or(0, |c| c.values.len())
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Result<&[i64]> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
            .context(format!("Column not found: {}", name))
    }

    /// Replace column `name`, or append it if absent
    pub fn with_column(&mut self, name: &str, values: Vec<i64>) -> Result<()> {
        if !self.columns.is_empty() && values.len() != self.height() {
            bail!(
                "Column {} has {} values, frame has {} rows",
                name,
                values.len(),
                self.height()
            );
        }

        match self.columns.iter_mut().find(|c| c.name == name) {
            Some(column) => column.values = values,
            None => self.columns.push(Column {
                name: name.to_string(),
                values,
            }),
        }
        Ok(())
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
