//! Runtime configuration
//!
//! There is no process-wide "current app". Every [`Transaction`](crate::Transaction)
//! and collection receives a [`RealtimeContext`] explicitly, which bundles the
//! backend collaborator with the configuration below.

use crate::db::Backend;
use crate::models::Node;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Upper bound for precondition waves, beyond which a commit is treated as runaway
const MAX_SUPPORTED_PRECONDITION_WAVES: usize = 4096;

/// Layout and behaviour settings shared by transactions and collections
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Root key of the mirrored link tree
    pub links_key: String,

    /// Sub-key under which a collection's view is persisted
    pub items_key: String,

    /// Sub-key holding an element's link records
    pub link_items_key: String,

    /// Timeout passed to `Backend::load`, in milliseconds
    pub load_timeout_ms: u64,

    /// Upload blobs alongside the value commit instead of after it
    pub upload_files_concurrently: bool,

    /// Maximum number of precondition waves drained by one commit
    pub max_precondition_waves: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            links_key: "__lnks".to_string(),
            items_key: "__itms".to_string(),
            link_items_key: "__l_itms".to_string(),
            load_timeout_ms: 30_000,
            upload_files_concurrently: true,
            max_precondition_waves: 64,
        }
    }
}

impl RealtimeConfig {
    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    /// Root of the link mirror tree
    pub fn links_root(&self) -> Node {
        Node::root().child(&self.links_key)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        for (name, key) in [
            ("links_key", &self.links_key),
            ("items_key", &self.items_key),
            ("link_items_key", &self.link_items_key),
        ] {
            if key.is_empty() {
                return Err(format!("{} cannot be empty", name));
            }
            if key.contains('/') {
                return Err(format!("{} cannot contain '/'", name));
            }
        }

        if self.items_key == self.link_items_key {
            return Err("items_key and link_items_key must differ".to_string());
        }

        if self.load_timeout_ms == 0 {
            return Err("load_timeout_ms must be greater than 0".to_string());
        }

        if self.max_precondition_waves == 0 {
            return Err("max_precondition_waves must be greater than 0".to_string());
        }

        if self.max_precondition_waves > MAX_SUPPORTED_PRECONDITION_WAVES {
            return Err(format!(
                "max_precondition_waves cannot exceed {}",
                MAX_SUPPORTED_PRECONDITION_WAVES
            ));
        }

        Ok(())
    }
}

/// Backend plus configuration, cloned into every transaction and collection
#[derive(Clone)]
pub struct RealtimeContext {
    backend: Arc<dyn Backend>,
    config: Arc<RealtimeConfig>,
}

impl RealtimeContext {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self::with_config(backend, RealtimeConfig::default())
    }

    /// Create a context with a custom configuration
    ///
    /// # Panics
    ///
    /// Panics if `config` does not pass [`RealtimeConfig::validate`].
    pub fn with_config(backend: Arc<dyn Backend>, config: RealtimeConfig) -> Self {
        if let Err(reason) = config.validate() {
            panic!("Invalid realtime configuration: {}", reason);
        }
        Self {
            backend,
            config: Arc::new(config),
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    /// Generate a fresh database key through the backend
    pub fn generate_key(&self) -> String {
        self.backend.generate_auto_id()
    }
}

impl std::fmt::Debug for RealtimeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
