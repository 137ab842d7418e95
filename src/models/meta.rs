use serde::{Deserialize, Serialize};

/// Field catalogue of one metric, as reported by the metadata registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricMeta {
    pub name: String,
    #[serde(default)]
    pub tag_keys: Vec<String>,
    #[serde(default)]
    pub number_keys: Vec<String>,
    #[serde(default)]
    pub string_keys: Vec<String>,
}

/// Field-type lookup collaborator. Only the ClickHouse planner consults it, to
/// tell string fields from number fields.
pub trait MetaProvider: Send + Sync {
    fn metric_meta(&self, org_name: &str, terminus_key: &str, metrics: &[String]) -> Result<Vec<MetricMeta>, String>;
}

/// In-memory provider, handy for tests and fixed catalogues.
#[derive(Debug, Clone, Default)]
pub struct StaticMeta {
    pub metrics: Vec<MetricMeta>,
}

impl MetaProvider for StaticMeta {
    fn metric_meta(&self, _org_name: &str, _terminus_key: &str, metrics: &[String]) -> Result<Vec<MetricMeta>, String> {
        Ok(self
            .metrics
            .iter()
            .filter(|m| metrics.iter().any(|name| name == &m.name))
            .cloned()
            .collect())
    }
}
