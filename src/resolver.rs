//! Priority-driven backend resolution with ordered fallback.
//!
//! The resolver walks a priority list of adapter kinds, instantiates each
//! candidate and tries to open it, returning the first that succeeds.
//! Every failure cause is collected; exhausting the list surfaces them
//! bundled. The resolver holds no state beyond the single call.

use crate::adapter::{
    AdapterKind, BlobAdapter, BlobOptions, MemoryAdapter, MobileAdapter, NativeAdapter,
    NetworkAdapter, StorageAdapter, WasmAdapter, WasmOptions,
};
use crate::config::{STORAGE_ADAPTER_ENV, StorageConfig};
use crate::error::{Error, Result};
use crate::service::Storage;
use std::sync::Arc;
use tracing::{info, warn};

/// Resolves and opens a backend for `config`.
///
/// The candidate order is the configured priority (or the derived
/// default), with the `STORAGE_ADAPTER` environment variable, when set,
/// moved to the front.
///
/// # Errors
///
/// Returns `Config` for an unknown environment override, or `Resolution`
/// bundling every open failure when no candidate could be opened.
pub async fn resolve(config: StorageConfig) -> Result<Storage> {
    let env_override = std::env::var(STORAGE_ADAPTER_ENV).ok();
    resolve_with_override(config, env_override.as_deref()).await
}

/// Resolution with an explicit override in place of the environment
/// variable; `resolve` delegates here.
///
/// # Errors
///
/// Same conditions as [`resolve`].
pub async fn resolve_with_override(
    config: StorageConfig,
    kind_override: Option<&str>,
) -> Result<Storage> {
    let mut priority = config.default_priority();

    if let Some(value) = kind_override {
        let kind = AdapterKind::parse(value).ok_or_else(|| {
            Error::config(format!(
                "{STORAGE_ADAPTER_ENV}='{value}' is not a known adapter kind"
            ))
        })?;
        priority.retain(|k| *k != kind);
        priority.insert(0, kind);
    }

    let mut causes = Vec::new();
    for kind in priority {
        let adapter = match build(kind, &config) {
            Ok(adapter) => adapter,
            Err(e) => {
                warn!(kind = %kind, error = %e, "candidate not constructible");
                causes.push(format!("{kind}: {e}"));
                continue;
            }
        };
        match adapter.open().await {
            Ok(()) => {
                info!(kind = %kind, "storage backend resolved");
                return Ok(Storage::new(adapter));
            }
            Err(e) => {
                warn!(kind = %kind, error = %e, "candidate failed to open");
                causes.push(format!("{kind}: {e}"));
            }
        }
    }

    Err(Error::Resolution { causes })
}

/// Instantiates a closed adapter for `kind` from its config section.
fn build(kind: AdapterKind, config: &StorageConfig) -> Result<Arc<dyn StorageAdapter>> {
    match kind {
        AdapterKind::Native => {
            let options = config
                .native
                .clone()
                .ok_or_else(|| Error::config("native backend requires a file path"))?;
            Ok(Arc::new(NativeAdapter::new(options)))
        }
        AdapterKind::Wasm => {
            let options = config.wasm.clone().unwrap_or_else(WasmOptions::default);
            Ok(Arc::new(WasmAdapter::new(options)))
        }
        AdapterKind::Network => {
            let options = config
                .network
                .clone()
                .ok_or_else(|| Error::config("network backend requires a connection string"))?;
            Ok(Arc::new(NetworkAdapter::new(options)))
        }
        AdapterKind::Blob => {
            let options = config
                .blob
                .clone()
                .unwrap_or_else(|| BlobOptions::new("unistore"));
            Ok(Arc::new(BlobAdapter::new(options)))
        }
        AdapterKind::Mobile => {
            let options = config
                .mobile
                .clone()
                .ok_or_else(|| Error::config("mobile backend requires a host plugin"))?;
            Ok(Arc::new(MobileAdapter::new(options)))
        }
        AdapterKind::Memory => Ok(Arc::new(MemoryAdapter::new())),
    }
}
