//! Configuration validation.

use super::{AdapterType, Config, ConnectionConfig};
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    for (id, conn) in &config.connections {
        validate_connection(id, conn)?;
    }

    if config.migration.max_retries > 100 {
        return Err(MigrateError::Config(
            "migration.max_retries must be at most 100".into(),
        ));
    }

    for (i, set) in config.rules.iter().enumerate() {
        if set.rules.is_empty() {
            return Err(MigrateError::Config(format!(
                "rules[{}] ({} -> {}) has no rules",
                i, set.source, set.target
            )));
        }
        for (j, rule) in set.rules.iter().enumerate() {
            if rule.replacement.is_none() && rule.note.is_none() {
                return Err(MigrateError::Config(format!(
                    "rules[{}].rules[{}] needs a replacement or a note",
                    i, j
                )));
            }
            regex::RegexBuilder::new(&rule.pattern)
                .case_insensitive(rule.case_insensitive)
                .build()
                .map_err(|e| {
                    MigrateError::Config(format!(
                        "rules[{}].rules[{}] has an invalid pattern: {}",
                        i, j, e
                    ))
                })?;
        }
    }

    Ok(())
}

fn validate_connection(id: &str, conn: &ConnectionConfig) -> Result<()> {
    match conn.r#type {
        AdapterType::Snapshot => {
            if conn.path.is_none() {
                return Err(MigrateError::Config(format!(
                    "connections.{}.path is required for snapshot connections",
                    id
                )));
            }
        }
        AdapterType::Postgres | AdapterType::Mysql => {
            if conn.host.is_empty() {
                return Err(MigrateError::Config(format!(
                    "connections.{}.host is required",
                    id
                )));
            }
            if conn.database.is_empty() {
                return Err(MigrateError::Config(format!(
                    "connections.{}.database is required",
                    id
                )));
            }
            if conn.user.is_empty() {
                return Err(MigrateError::Config(format!(
                    "connections.{}.user is required",
                    id
                )));
            }
            if conn.max_connections == 0 {
                return Err(MigrateError::Config(format!(
                    "connections.{}.max_connections must be at least 1",
                    id
                )));
            }
        }
    }

    if conn.r#type == AdapterType::Postgres
        && !matches!(conn.ssl_mode.to_lowercase().as_str(), "disable" | "prefer")
    {
        return Err(MigrateError::Config(format!(
            "connections.{}.ssl_mode '{}' is not supported (use 'disable' or 'prefer')",
            id, conn.ssl_mode
        )));
    }

    #[cfg(not(feature = "mysql"))]
    if conn.r#type == AdapterType::Mysql {
        return Err(MigrateError::Config(format!(
            "connections.{} uses type 'mysql', which requires the 'mysql' feature",
            id
        )));
    }

    #[cfg(not(feature = "postgres"))]
    if conn.r#type == AdapterType::Postgres {
        return Err(MigrateError::Config(format!(
            "connections.{} uses type 'postgres', which requires the 'postgres' feature",
            id
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MigrationConfig, RuleConfig, RuleSetConfig, StateConfig};
    use crate::convert::Severity;
    use crate::core::Dialect;
    use std::collections::BTreeMap;

    fn snapshot_conn() -> ConnectionConfig {
        ConnectionConfig {
            r#type: AdapterType::Snapshot,
            dialect: Some(Dialect::Mysql),
            host: String::new(),
            port: None,
            database: String::new(),
            user: String::new(),
            password: String::new(),
            schema: None,
            ssl_mode: "disable".to_string(),
            max_connections: 4,
            path: Some("schema.yaml".into()),
            script: None,
        }
    }

    fn pg_conn() -> ConnectionConfig {
        ConnectionConfig {
            r#type: AdapterType::Postgres,
            dialect: None,
            host: "localhost".to_string(),
            port: Some(5432),
            database: "target_db".to_string(),
            user: "postgres".to_string(),
            password: "password".to_string(),
            schema: Some("public".to_string()),
            ssl_mode: "disable".to_string(),
            max_connections: 4,
            path: None,
            script: None,
        }
    }

    fn valid_config() -> Config {
        let mut connections = BTreeMap::new();
        connections.insert("src".to_string(), snapshot_conn());
        connections.insert("tgt".to_string(), pg_conn());
        Config {
            connections,
            migration: MigrationConfig::default(),
            state: StateConfig::default(),
            rules: Vec::new(),
        }
    }

    fn rule(pattern: &str) -> RuleConfig {
        RuleConfig {
            name: None,
            pattern: pattern.to_string(),
            replacement: Some("X".to_string()),
            note: None,
            severity: Severity::Info,
            case_insensitive: true,
        }
    }

    #[test]
    fn test_valid_config() {
        let config = valid_config();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_snapshot_requires_path() {
        let mut config = valid_config();
        config.connections.get_mut("src").unwrap().path = None;
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("connections.src.path"));
    }

    #[test]
    fn test_missing_host() {
        let mut config = valid_config();
        config.connections.get_mut("tgt").unwrap().host = "".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_ssl_require_rejected() {
        let mut config = valid_config();
        config.connections.get_mut("tgt").unwrap().ssl_mode = "require".to_string();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("ssl_mode"));
    }

    #[test]
    fn test_invalid_rule_pattern() {
        let mut config = valid_config();
        config.rules.push(RuleSetConfig {
            source: Dialect::Mysql,
            target: Dialect::Postgres,
            kinds: Vec::new(),
            rules: vec![rule("(unclosed")],
        });
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("invalid pattern"));
    }

    #[test]
    fn test_rule_needs_replacement_or_note() {
        let mut config = valid_config();
        let mut r = rule("ZEROFILL");
        r.replacement = None;
        config.rules.push(RuleSetConfig {
            source: Dialect::Mysql,
            target: Dialect::Postgres,
            kinds: Vec::new(),
            rules: vec![r],
        });
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_connection_debug_redacts_password() {
        let mut conn = pg_conn();
        conn.password = "super_secret_password_123".to_string();
        let debug_output = format!("{:?}", conn);
        assert!(
            debug_output.contains("[REDACTED]"),
            "Debug output should contain [REDACTED]"
        );
        assert!(
            !debug_output.contains("super_secret_password_123"),
            "Debug output should not contain actual password value"
        );
    }
}
