//! Configuration loading: `datasources.json` under the config directory.

use std::path::Path;

use anyhow::{anyhow, Context, Result};

use sqlexec::storage::{SourceConfig, SourceType};

pub const DEFAULT_CONFIG_DIR: &str = "config";
pub const DEFAULT_PROMPT: &str = "sqlexec";

/// Loads the datasource list. A missing file yields one in-memory source
/// named `default`, so the shell works out of the box; a malformed file is
/// a configuration error (exit code 1 at the binary edge).
pub fn load_datasources(config_dir: &Path) -> Result<Vec<SourceConfig>> {
    let path = config_dir.join("datasources.json");
    if !path.exists() {
        log::info!(
            "no datasources.json under {}; starting with a default memory source",
            config_dir.display()
        );
        return Ok(vec![SourceConfig::new("default", SourceType::Memory)]);
    }
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    let configs: Vec<SourceConfig> = serde_json::from_str(&raw)
        .with_context(|| format!("cannot parse {}", path.display()))?;

    if configs.is_empty() {
        return Err(anyhow!("{} declares no data sources", path.display()));
    }
    for (idx, cfg) in configs.iter().enumerate() {
        if cfg.name.trim().is_empty() {
            return Err(anyhow!("data source #{} has an empty name", idx + 1));
        }
        if configs.iter().filter(|other| other.name == cfg.name).count() > 1 {
            return Err(anyhow!("duplicate data source name '{}'", cfg.name));
        }
        match cfg.source_type {
            SourceType::Csv | SourceType::Jsonl => {
                if cfg.option_str("path").is_none() {
                    return Err(anyhow!(
                        "data source '{}' ({}) needs an options.path",
                        cfg.name,
                        cfg.source_type
                    ));
                }
            }
            SourceType::Memory => {}
        }
    }
    Ok(configs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_defaults_to_memory() {
        let dir = tempfile::tempdir().unwrap();
        let configs = load_datasources(dir.path()).unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].name, "default");
        assert_eq!(configs[0].source_type, SourceType::Memory);
    }

    #[test]
    fn parses_a_full_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("datasources.json"),
            r#"[
                {"name": "mem", "type": "memory"},
                {"name": "people", "type": "csv", "writable": false,
                 "options": {"path": "/data/people.csv", "header": true}},
                {"name": "events", "type": "jsonl",
                 "options": {"path": "/data/events.jsonl"}, "database": "analytics"}
            ]"#,
        )
        .unwrap();

        let configs = load_datasources(dir.path()).unwrap();
        assert_eq!(configs.len(), 3);
        assert!(configs[0].writable);
        assert!(!configs[1].writable);
        assert_eq!(configs[1].option_str("path"), Some("/data/people.csv"));
        assert_eq!(configs[2].database.as_deref(), Some("analytics"));
    }

    #[test]
    fn rejects_bad_configs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("datasources.json");

        std::fs::write(&path, "{not json").unwrap();
        assert!(load_datasources(dir.path()).is_err());

        std::fs::write(&path, "[]").unwrap();
        assert!(load_datasources(dir.path()).is_err());

        std::fs::write(
            &path,
            r#"[{"name": "a", "type": "memory"}, {"name": "a", "type": "memory"}]"#,
        )
        .unwrap();
        assert!(load_datasources(dir.path()).is_err());

        std::fs::write(&path, r#"[{"name": "p", "type": "csv"}]"#).unwrap();
        assert!(load_datasources(dir.path()).is_err());
    }
}
