use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::error;

use crate::config::BrokerSettings;
use crate::utils::BrokerError;

/// Receives errors the engine cannot return to a caller, such as a failing
/// handler callback in the dispatch loop. Arguments are the queue name and
/// the error.
pub type ErrorHook = Arc<dyn Fn(&str, &BrokerError) + Send + Sync>;

/// Everything a queue needs from its surroundings.
///
/// Built once by whoever owns the broker and handed to every queue, so two
/// brokers in one process never share state.
#[derive(Clone)]
pub struct BrokerContext {
    pub data_dir: PathBuf,
    /// Where the queue catalog is kept. `None` disables the catalog.
    pub catalog_file: Option<PathBuf>,
    pub sweep_interval: Duration,
    pub maintenance_interval: Duration,
    error_hook: ErrorHook,
}

impl BrokerContext {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            catalog_file: None,
            sweep_interval: Duration::from_secs(1),
            maintenance_interval: Duration::from_secs(5),
            error_hook: Arc::new(log_error),
        }
    }

    pub fn from_settings(settings: &BrokerSettings) -> Self {
        let data_dir = PathBuf::from(&settings.data_dir);
        let catalog_file = data_dir.join(&settings.catalog_file);
        Self {
            catalog_file: Some(catalog_file),
            sweep_interval: Duration::from_millis(settings.sweep_interval_ms),
            maintenance_interval: Duration::from_millis(settings.maintenance_interval_ms),
            ..Self::new(data_dir)
        }
    }

    pub fn with_catalog(mut self, file: impl Into<PathBuf>) -> Self {
        self.catalog_file = Some(file.into());
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    pub fn with_error_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str, &BrokerError) + Send + Sync + 'static,
    {
        self.error_hook = Arc::new(hook);
        self
    }

    /// Default log file of a queue: `<data_dir>/<name>.wal`.
    pub fn queue_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(format!("{name}.wal"))
    }

    pub fn catalog_file(&self) -> Option<&Path> {
        self.catalog_file.as_deref()
    }

    pub fn report(&self, queue: &str, err: &BrokerError) {
        (self.error_hook)(queue, err);
    }
}

impl fmt::Debug for BrokerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerContext")
            .field("data_dir", &self.data_dir)
            .field("catalog_file", &self.catalog_file)
            .field("sweep_interval", &self.sweep_interval)
            .field("maintenance_interval", &self.maintenance_interval)
            .finish_non_exhaustive()
    }
}

fn log_error(queue: &str, err: &BrokerError) {
    error!(%queue, error = %err, "Delivery engine error");
}
