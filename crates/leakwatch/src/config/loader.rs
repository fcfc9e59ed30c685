use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

/// Checks the constraints the schema cannot express.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    let severity = &config.severity;
    let in_range = |v: f64| (0.0..=1.0).contains(&v);
    if !in_range(severity.medium) || !in_range(severity.high) || severity.medium > severity.high {
        return Err(ConfigError::Validation {
            message: format!(
                "Severity thresholds must satisfy 0 <= medium <= high <= 1 (medium {}, high {})",
                severity.medium, severity.high
            ),
        });
    }

    if config.batch_size == 0 {
        return Err(ConfigError::Validation {
            message: "batch_size must be greater than 0".to_string(),
        });
    }

    if config.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "worker_count must be greater than 0".to_string(),
        });
    }

    if !in_range(config.max_skip_ratio) {
        return Err(ConfigError::Validation {
            message: format!("max_skip_ratio {} outside [0, 1]", config.max_skip_ratio),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogFormat;
    use crate::inference::TimeoutPolicy;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = load_config_from_str(r#"{ "version": "1.0" }"#).unwrap();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.severity.high, 0.85);
        assert_eq!(config.severity.medium, 0.5);
        assert_eq!(config.adapter.timeout_ms, 30_000);
        assert_eq!(config.adapter.timeout_policy, TimeoutPolicy::Fatal);
        assert_eq!(config.max_skip_ratio, 0.5);
        assert_eq!(config.timestamp_field, "invoice_date");
        assert_eq!(config.logging.format, LogFormat::Text);
        assert!(config.worker_count >= 1);
        assert!(config.job_deadline().is_none());
    }

    #[test]
    fn test_full_config() {
        let config_json = r#"
        {
            "version": "1.0",
            "database_path": "/var/lib/leakwatch/leakwatch.db",
            "worker_count": 4,
            "batch_size": 25,
            "severity": { "high": 0.9, "medium": 0.6 },
            "adapter": { "timeout_ms": 500, "timeout_policy": "skip", "max_concurrency": 2 },
            "job_deadline_secs": 600,
            "max_skip_ratio": 0.1,
            "timestamp_field": "billed_at",
            "logging": { "filter": "leakwatch=debug", "format": "json" }
        }
        "#;

        let config = load_config_from_str(config_json).unwrap();
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.severity.high, 0.9);
        assert_eq!(config.adapter.timeout_policy, TimeoutPolicy::Skip);
        assert_eq!(config.adapter.max_concurrency, Some(2));
        assert_eq!(config.job_deadline().map(|d| d.as_secs()), Some(600));
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_schema_rejects_unknown_and_bad_values() {
        let result = load_config_from_str(r#"{ "version": "1.0", "batch_size": 0 }"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));

        let result = load_config_from_str(r#"{ "version": "1.0", "input_directory": "/in" }"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));

        let result = load_config_from_str(r#"{ "version": "2.0" }"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));

        let result =
            load_config_from_str(r#"{ "version": "1.0", "adapter": { "timeout_policy": "retry" } }"#);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_thresholds_must_be_ordered() {
        let result = load_config_from_str(
            r#"{ "version": "1.0", "severity": { "high": 0.4, "medium": 0.6 } }"#,
        );
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            load_config_from_str("{ not json"),
            Err(ConfigError::ParseJson(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{ "version": "1.0", "batch_size": 7 }}"#).unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.batch_size, 7);

        assert!(matches!(
            load_config("/nonexistent/leakwatch.json"),
            Err(ConfigError::ReadFile { .. })
        ));
    }
}
