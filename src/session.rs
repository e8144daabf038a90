//! Scoped database sessions.
//!
//! [`SessionManager`] owns the [`Database`] for the lifetime of the process and
//! hands out one [`Session`] per unit of work. A session owns its own DuckDB
//! connection, starts a transaction before its first statement and is always
//! rolled back (if still open) and closed when released, either explicitly via
//! [`Session::finish`] / [`Session::release`] or implicitly on drop.

use crate::database::Database;
use crate::error::SessionError;
use anyhow::{Context, Result, anyhow};
use duckdb::Connection;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, info, warn};

struct Engine {
    db: Database,
    open_sessions: Arc<AtomicUsize>,
    next_session_id: AtomicU64,
}

pub struct SessionManager {
    url: String,
    engine: RwLock<Option<Arc<Engine>>>,
}

impl SessionManager {
    /// Create a manager for `url`. Nothing is opened until [`SessionManager::init`].
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            engine: RwLock::new(None),
        }
    }

    /// Open the database engine
    pub fn init(&self) -> Result<()> {
        let mut slot = self
            .engine
            .write()
            .map_err(|_| anyhow!("session manager lock poisoned"))?;
        if slot.is_some() {
            return Err(SessionError::AlreadyInitialized.into());
        }

        let db = Database::open(&self.url)?;
        *slot = Some(Arc::new(Engine {
            db,
            open_sessions: Arc::new(AtomicUsize::new(0)),
            next_session_id: AtomicU64::new(1),
        }));

        info!(url = %self.url, "Database engine initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.engine.read().map(|slot| slot.is_some()).unwrap_or(false)
    }

    /// Create the schema if it does not exist yet
    pub async fn create_tables(&self) -> Result<()> {
        let engine = self.engine()?;
        tokio::task::spawn_blocking(move || engine.db.create_schema()).await??;
        debug!(url = %self.url, "Schema ready");
        Ok(())
    }

    /// Count committed users through the root connection
    pub async fn count_users(&self) -> Result<usize> {
        let engine = self.engine()?;
        tokio::task::spawn_blocking(move || engine.db.count_users()).await?
    }

    /// Hand out a new session with its own connection
    pub fn acquire(&self) -> Result<Session> {
        let engine = self.engine()?;
        let conn = engine.db.connect()?;
        let id = engine.next_session_id.fetch_add(1, Ordering::SeqCst);
        let open = engine.open_sessions.fetch_add(1, Ordering::SeqCst) + 1;

        debug!(session = id, open_sessions = open, "Session acquired");
        Ok(Session {
            id,
            conn: Some(Arc::new(Mutex::new(conn))),
            in_transaction: false,
            open_sessions: Arc::clone(&engine.open_sessions),
        })
    }

    /// Sessions acquired and not yet released
    pub fn open_sessions(&self) -> usize {
        match self.engine() {
            Ok(engine) => engine.open_sessions.load(Ordering::SeqCst),
            Err(_) => 0,
        }
    }

    /// Dispose of the engine. Sessions still out keep their own connection until released.
    pub async fn shutdown(&self) -> Result<()> {
        let engine = self
            .engine
            .write()
            .map_err(|_| anyhow!("session manager lock poisoned"))?
            .take()
            .ok_or(SessionError::NotInitialized)?;

        let open = engine.open_sessions.load(Ordering::SeqCst);
        if open > 0 {
            warn!(open_sessions = open, "Shutting down with sessions still open");
        }
        tokio::task::spawn_blocking(move || drop(engine)).await?;

        info!(url = %self.url, "Database engine disposed");
        Ok(())
    }

    fn engine(&self) -> Result<Arc<Engine>> {
        let slot = self
            .engine
            .read()
            .map_err(|_| anyhow!("session manager lock poisoned"))?;
        slot.as_ref()
            .map(Arc::clone)
            .ok_or_else(|| SessionError::NotInitialized.into())
    }
}

/// One unit of work against the database.
///
/// Owned by a single request and passed by `&mut` to whatever needs the database.
pub struct Session {
    id: u64,
    conn: Option<Arc<Mutex<Connection>>>,
    in_transaction: bool,
    open_sessions: Arc<AtomicUsize>,
}

impl Session {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    pub fn is_released(&self) -> bool {
        self.conn.is_none()
    }

    /// Run `op` on the session connection from the blocking pool,
    /// beginning a transaction first if none is open.
    pub async fn run<T, F>(&mut self, op: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.connection()?;
        let begin = !self.in_transaction;

        // Set before awaiting: if `op` panics, BEGIN has already run.
        if begin {
            self.in_transaction = true;
        }

        let begun = tokio::task::spawn_blocking(move || -> Result<Result<T>> {
            let conn = lock(&conn);
            if begin {
                conn.execute_batch("BEGIN TRANSACTION")
                    .context("Failed to begin transaction")?;
            }
            Ok(op(&conn))
        })
        .await?;

        match begun {
            Ok(outcome) => outcome,
            Err(e) => {
                if begin {
                    self.in_transaction = false;
                }
                Err(e)
            }
        }
    }

    pub async fn commit(&mut self) -> Result<()> {
        self.end_transaction("COMMIT").await
    }

    pub async fn rollback(&mut self) -> Result<()> {
        self.end_transaction("ROLLBACK").await
    }

    /// Roll back whatever is still open and close the connection.
    /// Calling it again is a no-op.
    pub async fn release(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let id = self.id;
        let rollback = std::mem::take(&mut self.in_transaction);
        let open_sessions = Arc::clone(&self.open_sessions);

        let closed =
            tokio::task::spawn_blocking(move || close(id, conn, rollback, &open_sessions)).await;
        if let Err(e) = closed {
            warn!(session = id, error = %e, "Session close task failed");
        }
    }

    /// Settle the session for `outcome`: roll back on error, then release.
    /// `outcome` is returned unchanged.
    pub async fn finish<T>(mut self, outcome: Result<T>) -> Result<T> {
        if let Err(e) = &outcome {
            debug!(session = self.id, error = %e, "Rolling back after failure");
            if let Err(rollback_err) = self.rollback().await {
                warn!(session = self.id, error = %rollback_err, "Rollback failed");
            }
        }
        self.release().await;
        outcome
    }

    async fn end_transaction(&mut self, statement: &'static str) -> Result<()> {
        let conn = self.connection()?;
        if !self.in_transaction {
            return Ok(());
        }
        // Whatever the result, DuckDB no longer has this transaction open.
        self.in_transaction = false;

        tokio::task::spawn_blocking(move || -> Result<()> {
            lock(&conn)
                .execute_batch(statement)
                .context(format!("Failed to {}", statement.to_lowercase()))?;
            Ok(())
        })
        .await?
    }

    fn connection(&self) -> Result<Arc<Mutex<Connection>>> {
        self.conn
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| SessionError::Released(self.id).into())
    }
}

// Slow path for sessions abandoned by cancellation or panic: the rollback
// blocks the current thread. Handlers settle sessions through `finish`.
impl Drop for Session {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            debug!(session = self.id, "Session dropped without release");
            close(self.id, conn, self.in_transaction, &self.open_sessions);
        }
    }
}

// A panic inside `run` poisons the lock; DuckDB keeps the connection usable, so recover it.
fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(PoisonError::into_inner)
}

fn close(id: u64, conn: Arc<Mutex<Connection>>, rollback: bool, open_sessions: &AtomicUsize) {
    if rollback {
        let rolled_back = lock(&conn)
            .execute_batch("ROLLBACK")
            .context("Failed to roll back on close");
        if let Err(e) = rolled_back {
            warn!(session = id, error = %e, "Rollback on close failed");
        }
    }
    drop(conn);
    let open = open_sessions.fetch_sub(1, Ordering::SeqCst) - 1;
    debug!(session = id, rolled_back = rollback, open_sessions = open, "Session closed");
}
