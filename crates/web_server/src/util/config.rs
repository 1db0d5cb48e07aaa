use std::str::FromStr;

use super::errors::StdError;

pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = StdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(StdError::InvalidArgument(format!("unknown LOG_FORMAT '{other}'"))),
        }
    }
}

/// Runtime settings of the operator process, read from the environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Namespace to watch; `None` watches the whole cluster.
    pub watch_namespace: Option<String>,
    /// Forces OpenShift support on or off; `None` discovers it from the API server.
    pub openshift: Option<bool>,
    pub bind_address: String,
    pub log_format: LogFormat,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            openshift: None,
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            log_format: LogFormat::Compact,
        }
    }
}

impl OperatorConfig {
    pub fn from_env() -> Result<Self, StdError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, StdError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let openshift = match non_empty("OPENSHIFT") {
            None => None,
            Some(v) => Some(v.parse::<bool>().map_err(|_| {
                StdError::InvalidArgument(format!("OPENSHIFT must be 'true' or 'false', got '{v}'"))
            })?),
        };

        Ok(Self {
            watch_namespace: non_empty("WATCH_NAMESPACE"),
            openshift,
            bind_address: non_empty("BIND_ADDRESS").unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string()),
            log_format: non_empty("LOG_FORMAT")
                .map(|v| v.parse::<LogFormat>())
                .transpose()?
                .unwrap_or_default(),
        })
    }
}
