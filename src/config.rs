use serde::Deserialize;
use std::path::Path;

use crate::models::DEFAULT_LIMIT_SIZE;

/// Top-level config loaded from `tsql.toml`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TsqlConfig {
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub clickhouse: ClickhouseConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlannerConfig {
    /// Upper bound on the number of time buckets a query may produce.
    #[serde(default = "default_max_time_points")]
    pub max_time_points: i64,
    /// LIMIT used when the statement has none.
    #[serde(default = "default_limit")]
    pub default_limit: i64,
    #[serde(default = "default_time_key")]
    pub time_key: String,
    /// Unit timestamps are stored in (`ns`, `us`, `ms`, `s`, ...).
    #[serde(default = "default_original_time_unit")]
    pub original_time_unit: String,
    /// Unit timestamps are reported in. Empty means RFC3339 strings.
    #[serde(default)]
    pub target_time_unit: String,
    #[serde(default)]
    pub debug: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_time_points: default_max_time_points(),
            default_limit: default_limit(),
            time_key: default_time_key(),
            original_time_unit: default_original_time_unit(),
            target_time_unit: String::new(),
            debug: false,
        }
    }
}

fn default_max_time_points() -> i64 {
    512
}

fn default_limit() -> i64 {
    DEFAULT_LIMIT_SIZE
}

fn default_time_key() -> String {
    "timestamp".to_string()
}

fn default_original_time_unit() -> String {
    "ns".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ClickhouseConfig {
    /// Table to select from. Defaults to the statement's measurement name.
    pub table: Option<String>,
}

impl TsqlConfig {
    /// Load config from a TOML file. Returns defaults if the file doesn't exist.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("config file not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&contents)?;
        tracing::info!("loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_sections_missing() {
        let cfg = TsqlConfig::from_toml("").unwrap();
        assert_eq!(cfg.planner.max_time_points, 512);
        assert_eq!(cfg.planner.default_limit, DEFAULT_LIMIT_SIZE);
        assert_eq!(cfg.planner.time_key, "timestamp");
        assert_eq!(cfg.planner.original_time_unit, "ns");
        assert!(cfg.clickhouse.table.is_none());
    }

    #[test]
    fn partial_overrides() {
        let cfg = TsqlConfig::from_toml(
            r#"
            [planner]
            max_time_points = 100
            target_time_unit = "ms"

            [clickhouse]
            table = "monitor.metrics_all"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.planner.max_time_points, 100);
        assert_eq!(cfg.planner.target_time_unit, "ms");
        assert_eq!(cfg.planner.time_key, "timestamp");
        assert_eq!(cfg.clickhouse.table.as_deref(), Some("monitor.metrics_all"));
    }

    #[test]
    fn missing_file_uses_defaults() {
        let cfg = TsqlConfig::load("/nonexistent/tsql.toml").unwrap();
        assert_eq!(cfg.planner.max_time_points, 512);
    }
}
