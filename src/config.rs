//! Configuration for backend resolution.
//!
//! Each backend has its own typed option record; the resolver consumes
//! the whole configuration rather than an untyped bag. Data-only sections
//! deserialize from config files; the mobile section carries a host
//! plugin object and is supplied programmatically.

use crate::adapter::{
    AdapterKind, BlobOptions, MobileOptions, NativeOptions, NetworkOptions, WasmOptions,
};
use serde::Deserialize;

/// Environment variable overriding the resolution priority head.
pub const STORAGE_ADAPTER_ENV: &str = "STORAGE_ADAPTER";

/// Whole-record configuration consumed by the resolver.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct StorageConfig {
    /// Explicit priority list. When absent, a default is derived from
    /// which sections are present.
    #[serde(default)]
    pub priority: Option<Vec<AdapterKind>>,
    /// Native file-backed engine options.
    #[serde(default)]
    pub native: Option<NativeOptions>,
    /// Single-task embedded engine options.
    #[serde(default)]
    pub wasm: Option<WasmOptions>,
    /// Network-attached engine options.
    #[serde(default)]
    pub network: Option<NetworkOptions>,
    /// Blob-persisted engine options.
    #[serde(default)]
    pub blob: Option<BlobOptions>,
    /// Host plugin options; not loadable from files.
    #[serde(skip)]
    pub mobile: Option<MobileOptions>,
}

impl StorageConfig {
    /// Configuration resolving to a native file-backed database.
    pub fn native(options: NativeOptions) -> Self {
        Self {
            native: Some(options),
            ..Self::default()
        }
    }

    /// Configuration resolving to a network-attached database.
    pub fn network(options: NetworkOptions) -> Self {
        Self {
            network: Some(options),
            ..Self::default()
        }
    }

    /// Configuration resolving to a blob-persisted database.
    pub fn blob(options: BlobOptions) -> Self {
        Self {
            blob: Some(options),
            ..Self::default()
        }
    }

    /// Configuration resolving through a host plugin.
    pub fn mobile(options: MobileOptions) -> Self {
        Self {
            mobile: Some(options),
            ..Self::default()
        }
    }

    /// Pins the priority list explicitly.
    pub fn with_priority(mut self, priority: Vec<AdapterKind>) -> Self {
        self.priority = Some(priority);
        self
    }

    /// The candidate order before any environment override: the explicit
    /// list when set, otherwise derived from the configured sections.
    pub fn default_priority(&self) -> Vec<AdapterKind> {
        if let Some(priority) = &self.priority {
            return priority.clone();
        }
        if self.mobile.is_some() {
            vec![AdapterKind::Mobile, AdapterKind::Blob, AdapterKind::Wasm]
        } else if self.network.is_some() {
            vec![AdapterKind::Network, AdapterKind::Native, AdapterKind::Wasm]
        } else if self.blob.is_some() {
            vec![AdapterKind::Blob, AdapterKind::Wasm]
        } else {
            vec![AdapterKind::Native, AdapterKind::Wasm]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_priority_prefers_native_then_wasm() {
        let config = StorageConfig::default();
        assert_eq!(
            config.default_priority(),
            vec![AdapterKind::Native, AdapterKind::Wasm]
        );
    }

    #[test]
    fn network_section_puts_network_first() {
        let config = StorageConfig::network(NetworkOptions::new("postgres://localhost/db"));
        assert_eq!(
            config.default_priority(),
            vec![AdapterKind::Network, AdapterKind::Native, AdapterKind::Wasm]
        );
    }

    #[test]
    fn blob_section_puts_blob_first() {
        let config = StorageConfig::blob(BlobOptions::new("app"));
        assert_eq!(
            config.default_priority(),
            vec![AdapterKind::Blob, AdapterKind::Wasm]
        );
    }

    #[test]
    fn explicit_priority_wins() {
        let config = StorageConfig::default().with_priority(vec![AdapterKind::Memory]);
        assert_eq!(config.default_priority(), vec![AdapterKind::Memory]);
    }
}
