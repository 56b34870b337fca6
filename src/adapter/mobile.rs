//! Mobile adapter: thin wrapper over a host-provided SQL plugin.
//!
//! The host application supplies an object implementing [`MobilePlugin`];
//! this adapter only manages lifecycle and forwards statements with
//! positional parameters as-is.

use super::{
    AdapterContext, AdapterKind, AdapterState, StateCell, StorageAdapter, TxFlag,
};
use crate::error::{Error, Result};
use crate::params::Params;
use crate::types::{Row, RowId, RunResult, Value};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

const LIMITATIONS: &[&str] = &[
    "named parameters are not supported",
    "behavior depends on the host plugin implementation",
];

/// Outcome reported by a plugin mutation.
#[derive(Debug, Clone, Default)]
pub struct PluginRunResult {
    /// Rows affected.
    pub changes: u64,
    /// Engine-assigned rowid, when the statement inserted one.
    pub last_insert_row_id: Option<i64>,
}

/// Host-provided native SQL plugin.
///
/// One plugin can serve several named databases; the adapter addresses
/// its own by the configured database name.
#[async_trait]
pub trait MobilePlugin: Send + Sync + 'static {
    /// Opens (or creates) a named database.
    async fn open_database(&self, name: &str) -> anyhow::Result<()>;

    /// Closes a named database.
    async fn close_database(&self, name: &str) -> anyhow::Result<()>;

    /// Executes a mutating statement with positional parameters.
    async fn execute(
        &self,
        database: &str,
        sql: &str,
        params: &[Value],
    ) -> anyhow::Result<PluginRunResult>;

    /// Executes a query with positional parameters.
    async fn query(&self, database: &str, sql: &str, params: &[Value])
        -> anyhow::Result<Vec<Row>>;
}

/// Options for the mobile adapter.
#[derive(Clone)]
pub struct MobileOptions {
    /// Database name passed to the plugin.
    pub database: String,
    /// The host plugin.
    pub plugin: Arc<dyn MobilePlugin>,
}

impl MobileOptions {
    /// Options addressing `database` through `plugin`.
    pub fn new(database: impl Into<String>, plugin: Arc<dyn MobilePlugin>) -> Self {
        Self {
            database: database.into(),
            plugin,
        }
    }
}

impl std::fmt::Debug for MobileOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MobileOptions")
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

/// Mobile storage adapter.
pub struct MobileAdapter {
    state: StateCell,
    tx: TxFlag,
    options: MobileOptions,
}

impl MobileAdapter {
    /// Creates a closed handle; call `open` before use.
    pub fn new(options: MobileOptions) -> Self {
        Self {
            state: StateCell::new(AdapterKind::Mobile),
            tx: TxFlag::new(AdapterKind::Mobile),
            options,
        }
    }

    /// The plugin takes positional values only.
    fn positional_values(params: &Params) -> Result<Vec<Value>> {
        match params {
            Params::Empty => Ok(Vec::new()),
            Params::Positional(values) => Ok(values.clone()),
            Params::Named(pairs) => {
                let marker = pairs
                    .first()
                    .map(|(name, _)| format!("@{name}"))
                    .unwrap_or_else(|| "@".to_string());
                Err(Error::bind(marker))
            }
        }
    }
}

#[async_trait]
impl StorageAdapter for MobileAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Mobile
    }

    fn state(&self) -> AdapterState {
        self.state.get()
    }

    fn context(&self) -> AdapterContext {
        AdapterContext {
            kind: AdapterKind::Mobile,
            capabilities: AdapterKind::Mobile.capabilities(),
            descriptor: self.options.database.clone(),
            limitations: LIMITATIONS,
        }
    }

    async fn open(&self) -> Result<()> {
        if !self.state.begin_open()? {
            return Ok(());
        }
        match self.options.plugin.open_database(&self.options.database).await {
            Ok(()) => {
                // Best effort; some plugins pre-configure their journal.
                if let Err(e) = self
                    .options
                    .plugin
                    .execute(&self.options.database, "PRAGMA journal_mode = WAL", &[])
                    .await
                {
                    warn!(error = %e, "could not enable WAL through plugin");
                }
                self.state.open_succeeded();
                info!(database = %self.options.database, "mobile adapter opened");
                Ok(())
            }
            Err(e) => {
                self.state.open_failed();
                Err(Error::open_failed(AdapterKind::Mobile, e))
            }
        }
    }

    async fn close(&self) -> Result<()> {
        if !self.state.begin_close()? {
            return Ok(());
        }
        let result = self
            .options
            .plugin
            .close_database(&self.options.database)
            .await;
        self.tx.clear();
        match result {
            Ok(()) => {
                self.state.close_succeeded();
                debug!(database = %self.options.database, "mobile adapter closed");
                Ok(())
            }
            Err(e) => {
                self.state.close_failed();
                Err(Error::backend(AdapterKind::Mobile, e))
            }
        }
    }

    async fn run(&self, sql: &str, params: &Params) -> Result<RunResult> {
        self.state.ensure_open()?;
        let values = Self::positional_values(params)?;
        let result = self
            .options
            .plugin
            .execute(&self.options.database, sql, &values)
            .await
            .map_err(|e| Error::backend(AdapterKind::Mobile, e))?;
        Ok(RunResult {
            changes: result.changes,
            last_insert_row_id: result.last_insert_row_id.map(RowId::from_i64),
        })
    }

    async fn all(&self, sql: &str, params: &Params) -> Result<Vec<Row>> {
        self.state.ensure_open()?;
        let values = Self::positional_values(params)?;
        self.options
            .plugin
            .query(&self.options.database, sql, &values)
            .await
            .map_err(|e| Error::backend(AdapterKind::Mobile, e))
    }

    async fn exec(&self, script: &str) -> Result<()> {
        self.state.ensure_open()?;
        for statement in crate::placeholder::split_script(script) {
            self.options
                .plugin
                .execute(&self.options.database, &statement, &[])
                .await
                .map_err(|e| Error::backend(AdapterKind::Mobile, e))?;
        }
        Ok(())
    }

    async fn begin(&self) -> Result<()> {
        self.state.ensure_open()?;
        self.tx.try_begin()?;
        let result = self
            .options
            .plugin
            .execute(&self.options.database, "BEGIN", &[])
            .await
            .map_err(|e| Error::backend(AdapterKind::Mobile, e));
        if result.is_err() {
            self.tx.clear();
        }
        result.map(|_| ())
    }

    async fn commit(&self) -> Result<()> {
        self.state.ensure_open()?;
        self.tx.ensure_active()?;
        self.options
            .plugin
            .execute(&self.options.database, "COMMIT", &[])
            .await
            .map_err(|e| Error::backend(AdapterKind::Mobile, e))?;
        self.tx.try_end()
    }

    async fn rollback(&self) -> Result<()> {
        self.state.ensure_open()?;
        self.tx.try_end()?;
        self.options
            .plugin
            .execute(&self.options.database, "ROLLBACK", &[])
            .await
            .map_err(|e| Error::backend(AdapterKind::Mobile, e))
            .map(|_| ())
    }
}
