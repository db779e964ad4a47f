//! Rule-based translation of object definitions between dialects.
//!
//! Rules are registered per `(source dialect, target dialect, object kind)`
//! and run in registration order, each on the previous rule's output. A key
//! with no rules is not an error: the definition passes through unchanged
//! with a low-confidence note so that one unsupported object never blocks the
//! rest of a migration.

mod builtin;
mod rules;

pub(crate) use rules::compile;
pub use rules::{ConversionRule, FnRule, NoteRule, RegexRule, RuleOutcome, Severity};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RuleSetConfig;
use crate::core::{Dialect, ObjectDescriptor, ObjectKind};
use crate::error::Result;

/// How far a converted definition can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        };
        f.write_str(s)
    }
}

/// A note produced during conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionNote {
    pub severity: Severity,
    pub message: String,
    /// Rule that produced the note, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
}

impl ConversionNote {
    fn engine(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            rule: None,
        }
    }
}

impl fmt::Display for ConversionNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)
    }
}

/// Output of [`ConversionEngine::convert`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionResult {
    pub target_ddl: String,
    pub notes: Vec<ConversionNote>,
    pub confidence: Confidence,
    /// Names of the rules that changed the text, in order.
    pub applied_rules: Vec<String>,
}

type RuleKey = (Dialect, Dialect, ObjectKind);

/// Ordered rule registry keyed by dialect pair and object kind.
#[derive(Default)]
pub struct ConversionEngine {
    rules: HashMap<RuleKey, Vec<Arc<dyn ConversionRule>>>,
}

impl ConversionEngine {
    /// Create an engine with no rules.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an engine with the built-in rule catalog registered.
    pub fn with_builtins() -> Result<Self> {
        let mut engine = Self::new();
        builtin::register(&mut engine)?;
        Ok(engine)
    }

    /// Built-in rules followed by the configured rule sets.
    pub fn from_config(rule_sets: &[RuleSetConfig]) -> Result<Self> {
        let mut engine = Self::with_builtins()?;
        for set in rule_sets {
            engine.register_rule_set(set)?;
        }
        Ok(engine)
    }

    /// Register one configured rule set after any existing rules.
    pub fn register_rule_set(&mut self, set: &RuleSetConfig) -> Result<()> {
        let kinds: &[ObjectKind] = if set.kinds.is_empty() {
            &ObjectKind::ALL
        } else {
            &set.kinds
        };
        for rule in &set.rules {
            let rule: Arc<dyn ConversionRule> = Arc::from(rules::from_config(rule)?);
            self.register_for(set.source, set.target, kinds, rule);
        }
        debug!(
            "Registered {} configured rules for {} -> {}",
            set.rules.len(),
            set.source,
            set.target
        );
        Ok(())
    }

    /// Append a rule for one object kind.
    pub fn register(
        &mut self,
        source: Dialect,
        target: Dialect,
        kind: ObjectKind,
        rule: Arc<dyn ConversionRule>,
    ) {
        self.rules.entry((source, target, kind)).or_default().push(rule);
    }

    /// Append a rule for several object kinds.
    pub fn register_for(
        &mut self,
        source: Dialect,
        target: Dialect,
        kinds: &[ObjectKind],
        rule: Arc<dyn ConversionRule>,
    ) {
        for &kind in kinds {
            self.register(source, target, kind, rule.clone());
        }
    }

    /// Number of rules registered for a key.
    pub fn rule_count(&self, source: Dialect, target: Dialect, kind: ObjectKind) -> usize {
        self.rules
            .get(&(source, target, kind))
            .map_or(0, Vec::len)
    }

    /// Check whether any rule is registered for a key.
    pub fn has_rules(&self, source: Dialect, target: Dialect, kind: ObjectKind) -> bool {
        self.rule_count(source, target, kind) > 0
    }

    /// Dialect pairs with at least one rule, sorted.
    pub fn pairs(&self) -> Vec<(Dialect, Dialect)> {
        let mut pairs: Vec<(Dialect, Dialect)> = self.rules.keys().map(|(s, t, _)| (*s, *t)).collect();
        pairs.sort();
        pairs.dedup();
        pairs
    }

    /// Convert one object's definition from `source` to `target`.
    pub fn convert(
        &self,
        descriptor: &ObjectDescriptor,
        source: Dialect,
        target: Dialect,
    ) -> ConversionResult {
        if descriptor.source_definition.trim().is_empty() {
            return ConversionResult {
                target_ddl: String::new(),
                notes: vec![ConversionNote::engine(Severity::Warning, "no source definition")],
                confidence: Confidence::Low,
                applied_rules: Vec::new(),
            };
        }

        if source == target {
            return ConversionResult {
                target_ddl: descriptor.source_definition.clone(),
                notes: vec![ConversionNote::engine(
                    Severity::Info,
                    "same dialect, no conversion needed",
                )],
                confidence: Confidence::High,
                applied_rules: Vec::new(),
            };
        }

        let rules = match self.rules.get(&(source, target, descriptor.kind)) {
            Some(rules) if !rules.is_empty() => rules,
            _ => {
                debug!(
                    "No {} -> {} rules for {}, leaving {} unconverted",
                    source,
                    target,
                    descriptor.kind,
                    descriptor.qualified_name()
                );
                return ConversionResult {
                    target_ddl: descriptor.source_definition.clone(),
                    notes: vec![ConversionNote::engine(
                        Severity::Warning,
                        format!(
                            "no conversion rules for {} {} -> {}; definition left unconverted",
                            descriptor.kind,
                            source.display_name(),
                            target.display_name()
                        ),
                    )],
                    confidence: Confidence::Low,
                    applied_rules: Vec::new(),
                };
            }
        };

        let mut text = descriptor.source_definition.clone();
        let mut notes = Vec::new();
        let mut applied_rules = Vec::new();

        for rule in rules {
            let outcome = rule.apply(&text, descriptor);
            if let Some(rewritten) = outcome.text {
                if rewritten != text {
                    applied_rules.push(rule.name().to_string());
                    text = rewritten;
                }
            }
            if let Some((severity, message)) = outcome.note {
                notes.push(ConversionNote {
                    severity,
                    message,
                    rule: Some(rule.name().to_string()),
                });
            }
        }

        let confidence = match notes.iter().map(|n| n.severity).max() {
            Some(Severity::Unsupported) => Confidence::Low,
            Some(Severity::Warning) => Confidence::Medium,
            _ => Confidence::High,
        };

        ConversionResult {
            target_ddl: text.trim().to_string(),
            notes,
            confidence,
            applied_rules,
        }
    }
}

impl fmt::Debug for ConversionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionEngine")
            .field("pairs", &self.pairs())
            .field("keys", &self.rules.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuleConfig;

    fn engine() -> ConversionEngine {
        ConversionEngine::with_builtins().unwrap()
    }

    fn table(def: &str) -> ObjectDescriptor {
        ObjectDescriptor::new(ObjectKind::Table, "app", "t", def)
    }

    #[test]
    fn test_builtins_compile() {
        let engine = engine();
        assert!(engine.has_rules(Dialect::Mysql, Dialect::Postgres, ObjectKind::Table));
        assert!(engine.has_rules(Dialect::Oracle, Dialect::GaussDb, ObjectKind::Procedure));
        assert!(engine.pairs().contains(&(Dialect::Mysql, Dialect::GaussDb)));
    }

    #[test]
    fn test_varchar2_length_preserved_without_notes() {
        let result = engine().convert(
            &table("CREATE TABLE app.t (name VARCHAR2(100))"),
            Dialect::Oracle,
            Dialect::Postgres,
        );
        assert_eq!(result.target_ddl, "CREATE TABLE app.t (name VARCHAR(100))");
        assert!(result.notes.is_empty());
        assert_eq!(result.confidence, Confidence::High);
    }

    #[test]
    fn test_auto_increment_without_identity_rule_is_noted() {
        let source = "CREATE TABLE app.t (id INT AUTO_INCREMENT PRIMARY KEY)";
        let result = engine().convert(&table(source), Dialect::Mysql, Dialect::Oracle);
        assert_eq!(result.target_ddl, source);
        assert!(result
            .notes
            .iter()
            .any(|n| n.message.contains("no direct equivalent; manual adjustment required")));
        assert_eq!(result.confidence, Confidence::Medium);
    }

    #[test]
    fn test_mysql_table_to_postgres() {
        let source = "CREATE TABLE `orders` (\n  `id` int(11) NOT NULL AUTO_INCREMENT,\n  `paid` tinyint(1) DEFAULT '0',\n  `created` datetime DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,\n  `body` longtext,\n  `meta` json,\n  PRIMARY KEY (`id`)\n) ENGINE=InnoDB AUTO_INCREMENT=42 DEFAULT CHARSET=utf8mb4";
        let result = engine().convert(&table(source), Dialect::Mysql, Dialect::Postgres);
        assert_eq!(
            result.target_ddl,
            "CREATE TABLE \"orders\" (\n  \"id\" SERIAL NOT NULL,\n  \"paid\" BOOLEAN DEFAULT '0',\n  \"created\" TIMESTAMP DEFAULT CURRENT_TIMESTAMP,\n  \"body\" TEXT,\n  \"meta\" JSONB,\n  PRIMARY KEY (\"id\")\n)"
        );
        assert!(result
            .notes
            .iter()
            .any(|n| n.severity == Severity::Warning && n.message.contains("ON UPDATE")));
        assert_eq!(result.confidence, Confidence::Medium);
        assert!(result.applied_rules.contains(&"int_auto_increment".to_string()));
    }

    #[test]
    fn test_conversion_is_deterministic() {
        let engine = engine();
        let d = table("CREATE TABLE t (a NUMBER(10), b NUMBER(12,2), c CLOB, d DATE DEFAULT SYSDATE)");
        let first = engine.convert(&d, Dialect::Oracle, Dialect::Postgres);
        let second = engine.convert(&d, Dialect::Oracle, Dialect::Postgres);
        assert_eq!(first, second);
        assert_eq!(
            first.target_ddl,
            "CREATE TABLE t (a INTEGER, b NUMERIC(12,2), c TEXT, d DATE DEFAULT CURRENT_TIMESTAMP)"
        );
    }

    #[test]
    fn test_missing_rule_set_degrades_gracefully() {
        let d = ObjectDescriptor::new(ObjectKind::View, "dbo", "v", "CREATE VIEW dbo.v AS SELECT TOP 5 * FROM t");
        let result = engine().convert(&d, Dialect::SqlServer, Dialect::Mysql);
        assert_eq!(result.target_ddl, d.source_definition);
        assert_eq!(result.confidence, Confidence::Low);
        assert!(result.notes[0].message.contains("unconverted"));
    }

    #[test]
    fn test_same_dialect_passthrough() {
        let d = table("CREATE TABLE t (id serial)");
        let result = engine().convert(&d, Dialect::Postgres, Dialect::Postgres);
        assert_eq!(result.target_ddl, "CREATE TABLE t (id serial)");
        assert_eq!(result.confidence, Confidence::High);
        assert_eq!(result.notes[0].message, "same dialect, no conversion needed");
    }

    #[test]
    fn test_empty_definition() {
        let result = engine().convert(&table("  "), Dialect::Mysql, Dialect::Postgres);
        assert_eq!(result.target_ddl, "");
        assert_eq!(result.confidence, Confidence::Low);
    }

    #[test]
    fn test_fulltext_index_is_low_confidence() {
        let d = ObjectDescriptor::new(
            ObjectKind::Index,
            "shop",
            "ft_body",
            "CREATE FULLTEXT INDEX ft_body ON posts (body)",
        );
        let result = engine().convert(&d, Dialect::Mysql, Dialect::Postgres);
        assert_eq!(result.confidence, Confidence::Low);
        assert_eq!(result.target_ddl, d.source_definition);
    }

    #[test]
    fn test_rules_apply_in_registration_order() {
        let mut engine = ConversionEngine::new();
        let first = RegexRule::new("first", "A", "B").unwrap();
        let second = RegexRule::new("second", "B", "C").unwrap();
        engine.register(Dialect::Mysql, Dialect::Postgres, ObjectKind::View, Arc::new(first));
        engine.register(Dialect::Mysql, Dialect::Postgres, ObjectKind::View, Arc::new(second));
        let d = ObjectDescriptor::new(ObjectKind::View, "", "v", "A");
        let result = engine.convert(&d, Dialect::Mysql, Dialect::Postgres);
        assert_eq!(result.target_ddl, "C");
        assert_eq!(result.applied_rules, vec!["first", "second"]);
    }

    #[test]
    fn test_configured_rules_run_after_builtins() {
        let set = RuleSetConfig {
            source: Dialect::Oracle,
            target: Dialect::Postgres,
            kinds: vec![ObjectKind::Table],
            rules: vec![RuleConfig {
                name: Some("numeric_to_decimal".into()),
                pattern: r"\bNUMERIC\b".into(),
                replacement: Some("DECIMAL".into()),
                note: None,
                severity: Severity::Info,
                case_insensitive: true,
            }],
        };
        let engine = ConversionEngine::from_config(&[set]).unwrap();
        let result = engine.convert(&table("x NUMBER(5,1)"), Dialect::Oracle, Dialect::Postgres);
        assert_eq!(result.target_ddl, "x DECIMAL(5,1)");
        let view = ObjectDescriptor::new(ObjectKind::View, "", "v", "SELECT CAST(x AS NUMBER) FROM t");
        let result = engine.convert(&view, Dialect::Oracle, Dialect::Postgres);
        assert_eq!(result.target_ddl, "SELECT CAST(x AS NUMERIC) FROM t");
    }
}
