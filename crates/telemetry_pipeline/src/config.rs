//! Process settings read from the environment.
//!
//! Two prefixes are recognised: `EXAMPLE_*` for the demo programs and the
//! standard `OTEL_*` variables for the pipeline itself.
//!
//! | Variable                          | Key                      | Default                 |
//! |-----------------------------------|--------------------------|-------------------------|
//! | `EXAMPLE_SERVER_PORT`             | `server_port`            | `3030`                  |
//! | `EXAMPLE_UPSTREAM_URL`            | `upstream_url`           | `https://httpbin.org`   |
//! | `OTEL_SERVICE_NAME`               | `service_name`           | per binary              |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT`     | `exporter_otlp_endpoint` | `http://localhost:4318` |
//! | `OTEL_SDK_DISABLED`               | `sdk_disabled`           | `false`                 |
//! | `OTEL_LOG_LEVEL`                  | `log_level`              | `info`                  |
//! | `OTEL_LOG_FORMAT`                 | `log_format`             | `text`                  |
//! | `OTEL_TRACES_SAMPLER_ARG`         | `traces_sampler_arg`     | unset (sample all)      |
//! | `OTEL_BSP_SCHEDULE_DELAY`         | `bsp_schedule_delay`     | `5000` ms               |
//! | `OTEL_BSP_EXPORT_TIMEOUT`         | `bsp_export_timeout`     | `30000` ms              |
//! | `OTEL_BSP_MAX_QUEUE_SIZE`         | `bsp_max_queue_size`     | `2048`                  |
//! | `OTEL_BSP_MAX_EXPORT_BATCH_SIZE`  | `bsp_max_export_batch_size` | `512`                |

use crate::batch_processor::BatchConfig;
use crate::sampler::{AlwaysOn, Sampler, TraceIdRatio};
use config::{Config, ConfigError, Environment, Map};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Settings {
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    #[serde(default = "default_upstream_url")]
    pub upstream_url: String,
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default = "default_otlp_endpoint")]
    pub exporter_otlp_endpoint: String,
    /// Export to stdout instead of the collector
    #[serde(default)]
    pub sdk_disabled: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// `text` or `json`
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Root sampling ratio in `[0, 1]`
    #[serde(default)]
    pub traces_sampler_arg: Option<f64>,
    #[serde(default = "default_schedule_delay_ms")]
    pub bsp_schedule_delay: u64,
    #[serde(default = "default_export_timeout_ms")]
    pub bsp_export_timeout: u64,
    #[serde(default = "default_max_queue_size")]
    pub bsp_max_queue_size: usize,
    #[serde(default = "default_max_export_batch_size")]
    pub bsp_max_export_batch_size: usize,
}

impl Settings {
    /// Reads the process environment.
    pub fn new() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Reads the given variables instead of the process environment.
    pub fn from_vars(vars: Map<String, String>) -> Result<Self, ConfigError> {
        Self::load(Some(vars))
    }

    fn load(vars: Option<Map<String, String>>) -> Result<Self, ConfigError> {
        Config::builder()
            .set_default("server_port", i64::from(default_server_port()))?
            .set_default("upstream_url", default_upstream_url())?
            .set_default("exporter_otlp_endpoint", default_otlp_endpoint())?
            .set_default("sdk_disabled", false)?
            .set_default("log_level", default_log_level())?
            .set_default("log_format", default_log_format())?
            .add_source(
                Environment::with_prefix("EXAMPLE")
                    .try_parsing(true)
                    .source(vars.clone()),
            )
            .add_source(
                Environment::with_prefix("OTEL")
                    .try_parsing(true)
                    .source(vars),
            )
            .build()?
            .try_deserialize()
    }

    /// `OTEL_SERVICE_NAME` if set, otherwise `fallback`.
    pub fn service_name_or(&self, fallback: &str) -> String {
        self.service_name
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| fallback.to_string())
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig::default()
            .with_max_queue_size(self.bsp_max_queue_size)
            .with_max_export_batch_size(self.bsp_max_export_batch_size)
            .with_scheduled_delay(Duration::from_millis(self.bsp_schedule_delay))
            .with_export_timeout(Duration::from_millis(self.bsp_export_timeout))
    }

    /// Ratio sampler when a sampler argument is configured, otherwise
    /// every root is sampled.
    pub fn sampler(&self) -> Arc<dyn Sampler> {
        match self.traces_sampler_arg {
            Some(ratio) => Arc::new(TraceIdRatio::new(ratio)),
            None => Arc::new(AlwaysOn),
        }
    }

    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_port: default_server_port(),
            upstream_url: default_upstream_url(),
            service_name: None,
            exporter_otlp_endpoint: default_otlp_endpoint(),
            sdk_disabled: false,
            log_level: default_log_level(),
            log_format: default_log_format(),
            traces_sampler_arg: None,
            bsp_schedule_delay: default_schedule_delay_ms(),
            bsp_export_timeout: default_export_timeout_ms(),
            bsp_max_queue_size: default_max_queue_size(),
            bsp_max_export_batch_size: default_max_export_batch_size(),
        }
    }
}

fn default_server_port() -> u16 {
    3030
}

fn default_upstream_url() -> String {
    "https://httpbin.org".to_string()
}

fn default_otlp_endpoint() -> String {
    "http://localhost:4318".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_schedule_delay_ms() -> u64 {
    5_000
}

fn default_export_timeout_ms() -> u64 {
    30_000
}

fn default_max_queue_size() -> usize {
    2048
}

fn default_max_export_batch_size() -> usize {
    512
}
