//! Schema object descriptors shared by every stage of a migration.
//!
//! An [`ObjectDescriptor`] is the engine-agnostic form of one schema object:
//! its kind, qualified name, raw definition text and the objects it depends on.
//! Adapters produce descriptors; the resolver orders them; the converter
//! rewrites their definitions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MigrateError;

/// SQL dialect of a database engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Mysql,
    Postgres,
    Oracle,
    SqlServer,
    GaussDb,
}

impl Dialect {
    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Mysql => "mysql",
            Dialect::Postgres => "postgres",
            Dialect::Oracle => "oracle",
            Dialect::SqlServer => "sqlserver",
            Dialect::GaussDb => "gaussdb",
        }
    }

    /// Human-readable product name used in reports.
    pub fn display_name(&self) -> &'static str {
        match self {
            Dialect::Mysql => "MySQL",
            Dialect::Postgres => "PostgreSQL",
            Dialect::Oracle => "Oracle",
            Dialect::SqlServer => "SQL Server",
            Dialect::GaussDb => "GaussDB",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Dialect::Mysql),
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            "oracle" => Ok(Dialect::Oracle),
            "sqlserver" | "mssql" | "sql_server" => Ok(Dialect::SqlServer),
            "gaussdb" | "gauss" | "opengauss" => Ok(Dialect::GaussDb),
            other => Err(MigrateError::Config(format!(
                "Unknown dialect: '{}'. Supported: mysql, postgres, oracle, sqlserver, gaussdb",
                other
            ))),
        }
    }
}

/// Kind of schema object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Table,
    Index,
    View,
    Function,
    Procedure,
    Trigger,
    Sequence,
    Constraint,
}

impl ObjectKind {
    /// All kinds, in declaration order.
    pub const ALL: [ObjectKind; 8] = [
        ObjectKind::Table,
        ObjectKind::Index,
        ObjectKind::View,
        ObjectKind::Function,
        ObjectKind::Procedure,
        ObjectKind::Trigger,
        ObjectKind::Sequence,
        ObjectKind::Constraint,
    ];

    /// Execution priority used to break ties between ready objects.
    /// Lower runs first.
    pub fn priority(&self) -> u8 {
        match self {
            ObjectKind::Sequence | ObjectKind::Table => 0,
            ObjectKind::Constraint | ObjectKind::Index => 1,
            ObjectKind::View => 2,
            ObjectKind::Function | ObjectKind::Procedure => 3,
            ObjectKind::Trigger => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Table => "table",
            ObjectKind::Index => "index",
            ObjectKind::View => "view",
            ObjectKind::Function => "function",
            ObjectKind::Procedure => "procedure",
            ObjectKind::Trigger => "trigger",
            ObjectKind::Sequence => "sequence",
            ObjectKind::Constraint => "constraint",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectKind {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        ObjectKind::ALL
            .into_iter()
            .find(|k| k.as_str() == lower)
            .ok_or_else(|| MigrateError::Config(format!("Unknown object kind: '{}'", s)))
    }
}

/// Identity of a schema object: `(kind, schema, name)`.
///
/// Field order gives the derived `Ord` a stable meaning used for sorting.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: ObjectKind,
    pub schema: String,
    pub name: String,
}

impl ObjectRef {
    pub fn new(kind: ObjectKind, schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// `schema.name`, or just `name` when the schema is empty.
    pub fn qualified_name(&self) -> String {
        if self.schema.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.schema, self.name)
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.qualified_name())
    }
}

/// Foreign key carried by a table-to-table reference.
///
/// Only references with this information can be deferred when the
/// resolver has to break a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyRef {
    /// Constraint name.
    pub name: String,

    /// Constraint clause as it appears inside the table definition,
    /// e.g. `CONSTRAINT fk_emp_dept FOREIGN KEY (dept_id) REFERENCES departments (id)`.
    pub clause: String,
}

/// A declared dependency of one object on another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    #[serde(flatten)]
    pub target: ObjectRef,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<ForeignKeyRef>,
}

impl Reference {
    pub fn to(target: ObjectRef) -> Self {
        Self {
            target,
            foreign_key: None,
        }
    }

    pub fn is_deferrable(&self) -> bool {
        self.foreign_key.is_some()
    }
}

/// Normalized description of one source schema object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    pub kind: ObjectKind,

    #[serde(default)]
    pub schema: String,

    pub name: String,

    /// Raw definition text in the source dialect.
    #[serde(default, alias = "definition")]
    pub source_definition: String,

    /// Objects this one depends on. Never contains the object itself.
    #[serde(default)]
    pub references: Vec<Reference>,
}

impl ObjectDescriptor {
    pub fn new(
        kind: ObjectKind,
        schema: impl Into<String>,
        name: impl Into<String>,
        source_definition: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            schema: schema.into(),
            name: name.into(),
            source_definition: source_definition.into(),
            references: Vec::new(),
        }
    }

    /// Add a plain dependency.
    pub fn depends_on(mut self, kind: ObjectKind, schema: &str, name: &str) -> Self {
        self.push_reference(Reference::to(ObjectRef::new(kind, schema, name)));
        self
    }

    /// Add a foreign key dependency on another table.
    pub fn foreign_key(
        mut self,
        schema: &str,
        table: &str,
        constraint: impl Into<String>,
        clause: impl Into<String>,
    ) -> Self {
        self.push_reference(Reference {
            target: ObjectRef::new(ObjectKind::Table, schema, table),
            foreign_key: Some(ForeignKeyRef {
                name: constraint.into(),
                clause: clause.into(),
            }),
        });
        self
    }

    /// Add a reference, ignoring self-references and duplicates.
    ///
    /// A target may be referenced by several foreign keys, one entry per
    /// constraint name. A plain reference to a target that already has an
    /// entry adds nothing; a foreign key to a target held only by a plain
    /// reference replaces it.
    pub fn push_reference(&mut self, reference: Reference) {
        if reference.target == self.object_ref() {
            return;
        }
        let Some(fk) = &reference.foreign_key else {
            if !self.references.iter().any(|r| r.target == reference.target) {
                self.references.push(reference);
            }
            return;
        };

        let duplicate = self.references.iter().any(|r| {
            r.target == reference.target && r.foreign_key.as_ref().is_some_and(|f| f.name == fk.name)
        });
        if duplicate {
            return;
        }
        let plain = self
            .references
            .iter()
            .position(|r| r.target == reference.target && r.foreign_key.is_none());
        match plain {
            Some(i) => self.references[i] = reference,
            None => self.references.push(reference),
        }
    }

    /// Drop self-references and duplicates, keeping the first occurrence.
    pub fn normalize(mut self) -> Self {
        let refs = std::mem::take(&mut self.references);
        for r in refs {
            self.push_reference(r);
        }
        self
    }

    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(self.kind, self.schema.clone(), self.name.clone())
    }

    pub fn qualified_name(&self) -> String {
        self.object_ref().qualified_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_aliases() {
        assert_eq!("PostgreSQL".parse::<Dialect>().unwrap(), Dialect::Postgres);
        assert_eq!("mssql".parse::<Dialect>().unwrap(), Dialect::SqlServer);
        assert_eq!("openGauss".parse::<Dialect>().unwrap(), Dialect::GaussDb);
        assert!("db2".parse::<Dialect>().is_err());
    }

    #[test]
    fn test_kind_priority_order() {
        assert!(ObjectKind::Table.priority() < ObjectKind::Index.priority());
        assert!(ObjectKind::Index.priority() < ObjectKind::View.priority());
        assert!(ObjectKind::View.priority() < ObjectKind::Function.priority());
        assert!(ObjectKind::Procedure.priority() < ObjectKind::Trigger.priority());
        assert_eq!(ObjectKind::Sequence.priority(), ObjectKind::Table.priority());
    }

    #[test]
    fn test_self_reference_is_dropped() {
        let d = ObjectDescriptor::new(ObjectKind::Table, "hr", "employees", "CREATE TABLE ...")
            .depends_on(ObjectKind::Table, "hr", "employees")
            .depends_on(ObjectKind::Table, "hr", "departments")
            .depends_on(ObjectKind::Table, "hr", "departments");
        assert_eq!(d.references.len(), 1);
        assert_eq!(d.references[0].target.name, "departments");
    }

    #[test]
    fn test_each_foreign_key_to_a_table_is_kept() {
        let d = ObjectDescriptor::new(ObjectKind::Table, "app", "orders", "")
            .foreign_key("app", "users", "fk_created_by", "FOREIGN KEY (created_by) REFERENCES users (id)")
            .foreign_key("app", "users", "fk_updated_by", "FOREIGN KEY (updated_by) REFERENCES users (id)")
            .foreign_key("app", "users", "fk_created_by", "FOREIGN KEY (created_by) REFERENCES users (id)")
            .depends_on(ObjectKind::Table, "app", "users");
        let names: Vec<&str> = d
            .references
            .iter()
            .filter_map(|r| r.foreign_key.as_ref().map(|fk| fk.name.as_str()))
            .collect();
        assert_eq!(d.references.len(), 2);
        assert_eq!(names, vec!["fk_created_by", "fk_updated_by"]);
    }

    #[test]
    fn test_foreign_key_upgrades_plain_reference() {
        let d = ObjectDescriptor::new(ObjectKind::Table, "app", "a", "")
            .depends_on(ObjectKind::Table, "app", "b")
            .foreign_key("app", "b", "fk_a_b", "FOREIGN KEY (b_id) REFERENCES b (id)");
        assert_eq!(d.references.len(), 1);
        assert!(d.references[0].is_deferrable());
        assert_eq!(d.references[0].foreign_key.as_ref().unwrap().name, "fk_a_b");
    }

    #[test]
    fn test_normalize_removes_self_reference_from_deserialized() {
        let yaml = r#"
kind: view
schema: app
name: v_orders
definition: SELECT * FROM orders
references:
  - { kind: view, schema: app, name: v_orders }
  - { kind: table, schema: app, name: orders }
"#;
        let d: ObjectDescriptor = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(d.references.len(), 2);
        let d = d.normalize();
        assert_eq!(d.references.len(), 1);
        assert_eq!(d.source_definition, "SELECT * FROM orders");
    }

    #[test]
    fn test_object_ref_display() {
        let r = ObjectRef::new(ObjectKind::Index, "public", "idx_name");
        assert_eq!(r.to_string(), "index:public.idx_name");
        let r = ObjectRef::new(ObjectKind::Table, "", "t");
        assert_eq!(r.to_string(), "table:t");
    }
}
