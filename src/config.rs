use anyhow::Result;
use figment::{
    providers::{Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

fn default_env() -> String {
    "dev".to_string()
}

fn default_function_namespace() -> String {
    "fnpool-fn".to_string()
}

fn default_event_buffer() -> usize {
    128
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClusterConfig {
    /// Run against the in-process cluster backend instead of a real API
    /// server. Dev mode only.
    #[serde(default)]
    pub in_memory: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub enable_tracing: bool,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub structured_logging: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_env")]
    pub env: String,
    #[serde(default)]
    pub instance_id: Option<String>,
    /// Namespace warm deployments and specialized pods live in.
    #[serde(default = "default_function_namespace")]
    pub function_namespace: String,
    /// Capacity of the environment notification channel; a consumer that
    /// falls further behind than this starts dropping to the resync path.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig {
            env: default_env(),
            instance_id: None,
            function_namespace: default_function_namespace(),
            event_buffer: default_event_buffer(),
            cluster: Default::default(),
            telemetry: Default::default(),
        }
    }
}

impl ExecutorConfig {
    pub fn from_path(path: &str) -> Result<ExecutorConfig> {
        let config_str = std::fs::read_to_string(path)?;
        let config: ExecutorConfig = Figment::new().merge(Yaml::string(&config_str)).extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.function_namespace.is_empty() {
            return Err(anyhow::anyhow!("function_namespace must not be empty"));
        }
        if self.event_buffer == 0 {
            return Err(anyhow::anyhow!("event_buffer must be at least 1"));
        }
        if self.telemetry.endpoint.is_some() && !self.telemetry.enable_tracing {
            return Err(anyhow::anyhow!(
                "telemetry endpoint set but tracing is not enabled"
            ));
        }
        Ok(())
    }

    pub fn instance_id(&self) -> String {
        self.instance_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::ExecutorConfig;

    #[test]
    fn test_default_config_validates() {
        ExecutorConfig::default().validate().unwrap();
    }

    #[test]
    fn test_endpoint_without_tracing_is_rejected() {
        let mut config = ExecutorConfig::default();
        config.telemetry.endpoint = Some("http://localhost:4317".to_string());
        assert!(config.validate().is_err());
    }
}
