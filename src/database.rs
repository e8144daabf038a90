use anyhow::{Context, Result, anyhow};
use duckdb::Connection;
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = r#"
    CREATE SEQUENCE IF NOT EXISTS users_id_seq START 1;
    CREATE TABLE IF NOT EXISTS users (
        id BIGINT PRIMARY KEY DEFAULT nextval('users_id_seq'),
        name VARCHAR(256) NOT NULL CHECK (length(name) BETWEEN 1 AND 256),
        create_date TIMESTAMP NOT NULL DEFAULT current_timestamp
    );
"#;

/// Process-wide handle on a DuckDB database instance.
///
/// Holds the root connection; sessions get their own connection to the same
/// instance through [`Database::connect`].
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database at `path`. `:memory:` gives a private in-memory instance.
    pub fn open(path: &str) -> Result<Self> {
        let conn =
            Connection::open(path).context(format!("Failed to open database at {}", path))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create the `users` table and its id sequence if they do not exist yet
    pub fn create_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(SCHEMA)
            .context("Failed to create users schema")?;
        Ok(())
    }

    /// Open a new connection to the same database instance
    pub fn connect(&self) -> Result<Connection> {
        let conn = self.lock()?;
        conn.try_clone()
            .context("Failed to clone database connection")
    }

    /// Count committed users
    pub fn count_users(&self) -> Result<usize> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT COUNT(*) FROM users")?;
        let count: i64 = stmt.query_row([], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection lock poisoned"))
    }
}
