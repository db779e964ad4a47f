//! Recognizing what a DDL statement creates.

use regex::Regex;

use crate::convert::compile;
use crate::core::{ObjectKind, ObjectRef};
use crate::error::Result;

const IDENT: &str = r#"(?:[`"\[]?[\w$]+[`"\]]?)(?:\.[`"\[]?[\w$]+[`"\]]?)?"#;

/// Split `schema.name` (optionally quoted) into its parts.
pub fn split_qualified(ident: &str) -> (Option<String>, String) {
    let unquote = |s: &str| s.trim().trim_matches(|c| matches!(c, '`' | '"' | '[' | ']')).to_string();
    match ident.split_once('.') {
        Some((schema, name)) => (Some(unquote(schema)), unquote(name)),
        None => (None, unquote(ident)),
    }
}

/// Extracts the object a `CREATE ...` or `ALTER TABLE ... ADD CONSTRAINT`
/// statement defines.
#[derive(Debug)]
pub struct DdlParser {
    create: Regex,
    add_constraint: Regex,
    on_table: Regex,
}

impl DdlParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            create: compile(&format!(
                r"^\s*CREATE\s+(?:OR\s+REPLACE\s+)?(?:UNIQUE\s+|TEMPORARY\s+|MATERIALIZED\s+|FULLTEXT\s+|SPATIAL\s+)?(?:DEFINER\s*=\s*\S+\s+)?(TABLE|VIEW|INDEX|SEQUENCE|FUNCTION|PROCEDURE|TRIGGER)\s+(IF\s+NOT\s+EXISTS\s+)?({})",
                IDENT
            ), true)?,
            add_constraint: compile(&format!(
                r"^\s*ALTER\s+TABLE\s+(?:ONLY\s+)?({})\s+ADD\s+CONSTRAINT\s+({})",
                IDENT, IDENT
            ), true)?,
            on_table: compile(&format!(r"\bON\s+({})", IDENT), true)?,
        })
    }

    /// The created object and whether the statement tolerates an existing one
    /// (`IF NOT EXISTS` / `OR REPLACE`).
    pub fn created_object(&self, ddl: &str, default_schema: &str) -> Option<(ObjectRef, bool)> {
        if let Some(c) = self.create.captures(ddl) {
            let kind: ObjectKind = c[1].parse().ok()?;
            let (schema, name) = split_qualified(&c[3]);
            let schema = match (schema, kind) {
                (Some(s), _) => s,
                // An unqualified index or trigger lives in its table's schema.
                (None, ObjectKind::Index | ObjectKind::Trigger) => {
                    let rest = &ddl[c.get(0)?.end()..];
                    self.on_table
                        .captures(rest)
                        .and_then(|t| split_qualified(&t[1]).0)
                        .unwrap_or_else(|| default_schema.to_string())
                }
                (None, _) => default_schema.to_string(),
            };
            let tolerant = c.get(2).is_some() || c[0].to_uppercase().contains("OR REPLACE");
            return Some((ObjectRef::new(kind, schema, name), tolerant));
        }

        let c = self.add_constraint.captures(ddl)?;
        let (table_schema, _) = split_qualified(&c[1]);
        let (_, name) = split_qualified(&c[2]);
        let schema = table_schema.unwrap_or_else(|| default_schema.to_string());
        Some((ObjectRef::new(ObjectKind::Constraint, schema, name), false))
    }
}
