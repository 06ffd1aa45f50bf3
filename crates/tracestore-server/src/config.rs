use serde::Deserialize;
use std::path::Path;
use tracestore_mongodb::MongoConfig;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub mongodb: MongoConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            log_format: LogFormat::Json,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_full_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[general]
log_level = "debug"
log_format = "pretty"

[mongodb]
url = "mongodb://db.internal:27017"
database = "jaeger"
collection = "spans_v2"
timeout_seconds = 10
span_ttl_seconds = 86400
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.general.log_format, LogFormat::Pretty);
        assert_eq!(config.mongodb.url, "mongodb://db.internal:27017");
        assert_eq!(config.mongodb.database, "jaeger");
        assert_eq!(config.mongodb.collection, "spans_v2");
        assert_eq!(config.mongodb.timeout_seconds, 10);
        assert_eq!(config.mongodb.span_ttl_seconds, 86_400);
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[mongodb]\ndatabase = \"other\"").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.general.log_level, "warn");
        assert_eq!(config.general.log_format, LogFormat::Json);
        assert_eq!(config.mongodb.database, "other");
        assert_eq!(config.mongodb.collection, "spans");
        assert_eq!(config.mongodb.timeout_seconds, 5);
    }

    #[test]
    fn test_unreadable_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(&dir.path().join("absent.toml")).is_err());
    }
}
