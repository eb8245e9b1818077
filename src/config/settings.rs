use serde::Deserialize;

/// Top-level configuration settings for the application.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Settings {
    pub broker: BrokerSettings,
}

/// Configuration settings for the broker.
///
/// `catalog_file` is resolved against `data_dir` when it is relative.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    pub data_dir: String,
    pub catalog_file: String,
    /// How often each queue checks for overdue acknowledgments and expired
    /// messages.
    pub sweep_interval_ms: u64,
    /// How often each queue flushes buffered logs and checks whether they
    /// need shrinking.
    pub maintenance_interval_ms: u64,
    pub log_level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub broker: Option<PartialBrokerSettings>,
}

/// Partial broker settings.
#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub data_dir: Option<String>,
    pub catalog_file: Option<String>,
    pub sweep_interval_ms: Option<u64>,
    pub maintenance_interval_ms: Option<u64>,
    pub log_level: Option<String>,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            catalog_file: "queues.json".to_string(),
            sweep_interval_ms: 1_000,
            maintenance_interval_ms: 5_000,
            log_level: "info".to_string(),
        }
    }
}

/// Provides default values for `Settings`.
///
/// Ensures the application has sensible defaults if no configuration is provided.
impl Default for Settings {
    fn default() -> Self {
        Self {
            broker: BrokerSettings::default(),
        }
    }
}

impl PartialSettings {
    /// Fills every missing value from `Settings::default()`.
    pub fn merge_with_defaults(self) -> Settings {
        let default = Settings::default().broker;
        let Some(broker) = self.broker else {
            return Settings { broker: default };
        };

        Settings {
            broker: BrokerSettings {
                data_dir: broker.data_dir.unwrap_or(default.data_dir),
                catalog_file: broker.catalog_file.unwrap_or(default.catalog_file),
                sweep_interval_ms: broker
                    .sweep_interval_ms
                    .unwrap_or(default.sweep_interval_ms),
                maintenance_interval_ms: broker
                    .maintenance_interval_ms
                    .unwrap_or(default.maintenance_interval_ms),
                log_level: broker.log_level.unwrap_or(default.log_level),
            },
        }
    }
}
