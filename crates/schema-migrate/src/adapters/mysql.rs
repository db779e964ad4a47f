//! MySQL/MariaDB adapter.
//!
//! Tables come from `SHOW CREATE TABLE`, split so that secondary indexes
//! become objects of their own. Views, routines and triggers come from
//! `information_schema`. Uses SQLx for connection pooling.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow, MySqlSslMode};
use sqlx::Row;
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::core::{DatabaseAdapter, DdlOutcome, Dialect, ObjectDescriptor, ObjectKind};
use crate::error::{MigrateError, Result};

use super::ddl::split_qualified;

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// A `SHOW CREATE TABLE` result taken apart.
#[derive(Debug, Default, PartialEq)]
struct TableParts {
    definition: String,
    /// (index name, CREATE INDEX statement)
    indexes: Vec<(String, String)>,
    /// (referenced schema, referenced table, constraint name, clause)
    foreign_keys: Vec<(String, String, String, String)>,
}

/// MySQL or MariaDB database.
pub struct MysqlAdapter {
    id: String,
    dialect: Dialect,
    schema: String,
    pool: MySqlPool,
}

impl MysqlAdapter {
    /// Create the adapter with a lazily connecting pool.
    pub fn new(id: &str, conn: &ConnectionConfig) -> Result<Self> {
        if conn.database.is_empty() && conn.schema.is_none() {
            return Err(MigrateError::Config(format!(
                "connections.{}: mysql needs a database or schema",
                id
            )));
        }

        let mut options = MySqlConnectOptions::new()
            .host(&conn.host)
            .port(conn.port_or_default())
            .username(&conn.user)
            .password(&conn.password)
            .ssl_mode(MySqlSslMode::Preferred);
        if !conn.database.is_empty() {
            options = options.database(&conn.database);
        }

        let pool = MySqlPoolOptions::new()
            .max_connections(conn.max_connections.max(1) as u32)
            .acquire_timeout(POOL_CONNECTION_TIMEOUT)
            .connect_lazy_with(options);

        Ok(Self {
            id: id.to_string(),
            dialect: conn.dialect.unwrap_or(Dialect::Mysql),
            schema: conn.schema.clone().unwrap_or_else(|| conn.database.clone()),
            pool,
        })
    }

    fn connection_error(&self, e: sqlx::Error) -> MigrateError {
        match e {
            sqlx::Error::Database(_) => MigrateError::Mysql(e),
            other => MigrateError::connection(&self.id, other),
        }
    }

    async fn fetch(&self, query: &str, schema: &str) -> Result<Vec<MySqlRow>> {
        sqlx::query(query)
            .bind(schema)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.connection_error(e))
    }

    async fn show_create(&self, what: &str, schema: &str, name: &str, column: usize) -> Result<Option<String>> {
        let sql = format!("SHOW CREATE {} {}.{}", what, quote_ident(schema), quote_ident(name));
        let row = sqlx::query(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| self.connection_error(e))?;
        Ok(text(&row, column))
    }

    async fn load_tables(&self, schema: &str) -> Result<Vec<ObjectDescriptor>> {
        let query = r#"
            SELECT CAST(TABLE_NAME AS CHAR(255)) AS TABLE_NAME
            FROM information_schema.TABLES
            WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE'
            ORDER BY TABLE_NAME
        "#;
        let mut objects = Vec::new();
        for row in self.fetch(query, schema).await? {
            let table: String = row.get("TABLE_NAME");
            let Some(ddl) = self.show_create("TABLE", schema, &table, 1).await? else {
                warn!("{}: no definition returned for table {}.{}", self.id, schema, table);
                continue;
            };

            let parts = split_table_definition(schema, &table, &ddl);
            let mut descriptor =
                ObjectDescriptor::new(ObjectKind::Table, schema, &table, parts.definition);
            for (ref_schema, ref_table, name, clause) in parts.foreign_keys {
                descriptor = descriptor.foreign_key(&ref_schema, &ref_table, name, clause);
            }
            objects.push(descriptor);

            for (name, index_ddl) in parts.indexes {
                objects.push(
                    ObjectDescriptor::new(ObjectKind::Index, schema, name, index_ddl)
                        .depends_on(ObjectKind::Table, schema, &table),
                );
            }
        }
        Ok(objects)
    }

    /// Views, with references found by scanning the stored definition, which
    /// MySQL always writes with fully qualified names.
    async fn load_views(&self, schema: &str, relations: &[(ObjectKind, String)]) -> Result<Vec<ObjectDescriptor>> {
        let query = r#"
            SELECT CAST(TABLE_NAME AS CHAR(255)) AS TABLE_NAME,
                   CAST(VIEW_DEFINITION AS CHAR) AS VIEW_DEFINITION
            FROM information_schema.VIEWS
            WHERE TABLE_SCHEMA = ?
            ORDER BY TABLE_NAME
        "#;
        let mut views = Vec::new();
        for row in self.fetch(query, schema).await? {
            let name: String = row.get("TABLE_NAME");
            let body: Option<String> = row.try_get("VIEW_DEFINITION").ok();
            let body = body.unwrap_or_default();
            let def = format!(
                "CREATE VIEW {}.{} AS {}",
                quote_ident(schema),
                quote_ident(&name),
                body
            );
            let mut descriptor = ObjectDescriptor::new(ObjectKind::View, schema, &name, def);
            for (kind, relation) in view_references(schema, &body, relations) {
                descriptor = descriptor.depends_on(kind, schema, &relation);
            }
            views.push(descriptor);
        }
        Ok(views)
    }

    async fn load_routines(&self, schema: &str) -> Result<Vec<ObjectDescriptor>> {
        let query = r#"
            SELECT CAST(ROUTINE_NAME AS CHAR(255)) AS ROUTINE_NAME,
                   CAST(ROUTINE_TYPE AS CHAR(32)) AS ROUTINE_TYPE
            FROM information_schema.ROUTINES
            WHERE ROUTINE_SCHEMA = ?
            ORDER BY ROUTINE_NAME
        "#;
        let mut routines = Vec::new();
        for row in self.fetch(query, schema).await? {
            let name: String = row.get("ROUTINE_NAME");
            let routine_type: String = row.get("ROUTINE_TYPE");
            let (kind, what) = if routine_type.eq_ignore_ascii_case("PROCEDURE") {
                (ObjectKind::Procedure, "PROCEDURE")
            } else {
                (ObjectKind::Function, "FUNCTION")
            };
            match self.show_create(what, schema, &name, 2).await? {
                Some(def) => routines.push(ObjectDescriptor::new(kind, schema, name, def)),
                None => warn!(
                    "{}: definition of {} {}.{} is not visible (missing privilege?)",
                    self.id, kind, schema, name
                ),
            }
        }
        Ok(routines)
    }

    async fn load_triggers(&self, schema: &str) -> Result<Vec<ObjectDescriptor>> {
        let query = r#"
            SELECT CAST(TRIGGER_NAME AS CHAR(255)) AS TRIGGER_NAME,
                   CAST(EVENT_OBJECT_TABLE AS CHAR(255)) AS EVENT_OBJECT_TABLE,
                   CAST(ACTION_TIMING AS CHAR(16)) AS ACTION_TIMING,
                   CAST(EVENT_MANIPULATION AS CHAR(16)) AS EVENT_MANIPULATION,
                   CAST(ACTION_STATEMENT AS CHAR) AS ACTION_STATEMENT
            FROM information_schema.TRIGGERS
            WHERE TRIGGER_SCHEMA = ?
            ORDER BY EVENT_OBJECT_TABLE, ACTION_ORDER
        "#;
        let rows = self.fetch(query, schema).await?;
        Ok(rows
            .iter()
            .map(|row| {
                let name: String = row.get("TRIGGER_NAME");
                let table: String = row.get("EVENT_OBJECT_TABLE");
                let timing: String = row.get("ACTION_TIMING");
                let event: String = row.get("EVENT_MANIPULATION");
                let statement: String = row.get("ACTION_STATEMENT");
                let def = format!(
                    "CREATE TRIGGER {}.{} {} {} ON {}.{} FOR EACH ROW {}",
                    quote_ident(schema),
                    quote_ident(&name),
                    timing,
                    event,
                    quote_ident(schema),
                    quote_ident(&table),
                    statement
                );
                ObjectDescriptor::new(ObjectKind::Trigger, schema, name, def).depends_on(
                    ObjectKind::Table,
                    schema,
                    &table,
                )
            })
            .collect())
    }
}

#[async_trait]
impl DatabaseAdapter for MysqlAdapter {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn name(&self) -> &str {
        "mysql"
    }

    async fn introspect(&self, schema: Option<&str>) -> Result<Vec<ObjectDescriptor>> {
        let schema = schema.unwrap_or(&self.schema);

        let mut objects = self.load_tables(schema).await?;
        debug!("{}: {} tables and indexes in '{}'", self.id, objects.len(), schema);

        let query = r#"
            SELECT CAST(TABLE_NAME AS CHAR(255)) AS TABLE_NAME,
                   CAST(TABLE_TYPE AS CHAR(32)) AS TABLE_TYPE
            FROM information_schema.TABLES
            WHERE TABLE_SCHEMA = ?
        "#;
        let relations: Vec<(ObjectKind, String)> = self
            .fetch(query, schema)
            .await?
            .iter()
            .map(|row| {
                let name: String = row.get("TABLE_NAME");
                let table_type: String = row.get("TABLE_TYPE");
                let kind = if table_type.eq_ignore_ascii_case("VIEW") {
                    ObjectKind::View
                } else {
                    ObjectKind::Table
                };
                (kind, name)
            })
            .collect();

        objects.extend(self.load_views(schema, &relations).await?);
        objects.extend(self.load_routines(schema).await?);
        objects.extend(self.load_triggers(schema).await?);

        info!(
            "Introspected {} objects from {} schema '{}'",
            objects.len(),
            self.id,
            schema
        );
        Ok(objects)
    }

    async fn execute_ddl(&self, ddl: &str) -> Result<DdlOutcome> {
        match sqlx::raw_sql(ddl).execute(&self.pool).await {
            Ok(_) => Ok(DdlOutcome::Applied),
            Err(sqlx::Error::Database(db)) => {
                let code = db
                    .code()
                    .map(|c| format!(" (SQLSTATE {})", c))
                    .unwrap_or_default();
                Ok(DdlOutcome::Failed(format!("{}{}", db.message(), code)))
            }
            Err(e) => Err(MigrateError::connection(&self.id, e)),
        }
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| MigrateError::connection(&self.id, e))?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Read a text column that the server may return as VARCHAR or as bytes.
fn text(row: &MySqlRow, index: usize) -> Option<String> {
    row.try_get::<Option<String>, _>(index)
        .ok()
        .flatten()
        .or_else(|| {
            row.try_get::<Option<Vec<u8>>, _>(index)
                .ok()
                .flatten()
                .map(|b| String::from_utf8_lossy(&b).into_owned())
        })
}

fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Name between the first pair of backticks at the start of `s`.
fn leading_ident(s: &str) -> Option<(&str, &str)> {
    let rest = s.trim_start().strip_prefix('`')?;
    let end = rest.find('`')?;
    Some((&rest[..end], &rest[end + 1..]))
}

/// Split `SHOW CREATE TABLE` output: qualify the table name, move secondary
/// indexes out into `CREATE INDEX` statements and collect foreign keys.
fn split_table_definition(schema: &str, table: &str, ddl: &str) -> TableParts {
    let qualified = format!("{}.{}", quote_ident(schema), quote_ident(table));
    let mut lines = ddl.lines();
    let header = lines.next().unwrap_or_default();
    let header = header.replacen(&quote_ident(table), &qualified, 1);

    let mut body = Vec::new();
    let mut tail = String::new();
    let mut parts = TableParts::default();

    for line in lines {
        let trimmed = line.trim();
        if trimmed.starts_with(')') {
            tail = trimmed.to_string();
            continue;
        }
        let entry = trimmed.trim_end_matches(',');

        let (prefix, rest) = if let Some(rest) = entry.strip_prefix("KEY ") {
            ("", rest)
        } else if let Some(rest) = entry.strip_prefix("FULLTEXT KEY ") {
            ("FULLTEXT ", rest)
        } else if let Some(rest) = entry.strip_prefix("SPATIAL KEY ") {
            ("SPATIAL ", rest)
        } else {
            if entry.starts_with("CONSTRAINT ") && entry.contains("FOREIGN KEY") {
                if let Some(fk) = foreign_key(schema, entry) {
                    parts.foreign_keys.push(fk);
                }
            }
            body.push(format!("  {}", entry));
            continue;
        };

        match leading_ident(rest) {
            Some((name, columns)) => parts.indexes.push((
                name.to_string(),
                format!(
                    "CREATE {}INDEX {} ON {} {}",
                    prefix,
                    quote_ident(name),
                    qualified,
                    columns.trim()
                ),
            )),
            None => body.push(format!("  {}", entry)),
        }
    }

    parts.definition = format!("{}\n{}\n{}", header, body.join(",\n"), tail);
    parts
}

/// `CONSTRAINT `fk` FOREIGN KEY (...) REFERENCES `[db`.]`t` (...)`
fn foreign_key(schema: &str, clause: &str) -> Option<(String, String, String, String)> {
    let (name, _) = leading_ident(clause.strip_prefix("CONSTRAINT ")?)?;
    let target = clause.split_once("REFERENCES ")?.1;
    let ident = target.split_whitespace().next()?;
    let ident = ident.split('(').next()?;
    let (ref_schema, ref_table) = split_qualified(ident);
    Some((
        ref_schema.unwrap_or_else(|| schema.to_string()),
        ref_table,
        name.to_string(),
        clause.to_string(),
    ))
}

/// Relations of `schema` mentioned in a view body.
fn view_references(
    schema: &str,
    body: &str,
    relations: &[(ObjectKind, String)],
) -> Vec<(ObjectKind, String)> {
    relations
        .iter()
        .filter(|(_, name)| {
            body.contains(&format!("{}.{}", quote_ident(schema), quote_ident(name)))
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPLOYEES: &str = "CREATE TABLE `employees` (
  `id` int NOT NULL AUTO_INCREMENT,
  `dept_id` int DEFAULT NULL,
  `bio` text,
  PRIMARY KEY (`id`),
  UNIQUE KEY `uq_email` (`email`),
  KEY `ix_dept` (`dept_id`) USING BTREE,
  FULLTEXT KEY `ft_bio` (`bio`),
  CONSTRAINT `fk_emp_dept` FOREIGN KEY (`dept_id`) REFERENCES `departments` (`id`) ON DELETE CASCADE
) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4";

    #[test]
    fn test_split_moves_indexes_out() {
        let parts = split_table_definition("hr", "employees", EMPLOYEES);

        assert!(parts.definition.starts_with("CREATE TABLE `hr`.`employees` ("));
        assert!(parts.definition.contains("UNIQUE KEY `uq_email`"));
        assert!(!parts.definition.contains("ix_dept"));
        assert!(!parts.definition.contains("ft_bio"));
        assert!(parts
            .definition
            .contains("REFERENCES `departments` (`id`) ON DELETE CASCADE\n) ENGINE=InnoDB"));
        assert!(!parts.definition.contains(",\n)"));

        assert_eq!(
            parts.indexes,
            vec![
                (
                    "ix_dept".to_string(),
                    "CREATE INDEX `ix_dept` ON `hr`.`employees` (`dept_id`) USING BTREE".to_string()
                ),
                (
                    "ft_bio".to_string(),
                    "CREATE FULLTEXT INDEX `ft_bio` ON `hr`.`employees` (`bio`)".to_string()
                ),
            ]
        );
    }

    #[test]
    fn test_foreign_keys_default_to_own_schema() {
        let parts = split_table_definition("hr", "employees", EMPLOYEES);
        assert_eq!(parts.foreign_keys.len(), 1);
        let (ref_schema, ref_table, name, clause) = &parts.foreign_keys[0];
        assert_eq!(ref_schema, "hr");
        assert_eq!(ref_table, "departments");
        assert_eq!(name, "fk_emp_dept");
        assert!(clause.starts_with("CONSTRAINT `fk_emp_dept` FOREIGN KEY"));

        let (ref_schema, ref_table, _, _) = foreign_key(
            "hr",
            "CONSTRAINT `fk_x` FOREIGN KEY (`a`) REFERENCES `core`.`accounts` (`id`)",
        )
        .unwrap();
        assert_eq!((ref_schema.as_str(), ref_table.as_str()), ("core", "accounts"));
    }

    #[test]
    fn test_view_references() {
        let relations = vec![
            (ObjectKind::Table, "employees".to_string()),
            (ObjectKind::Table, "emp".to_string()),
            (ObjectKind::View, "v_staff".to_string()),
        ];
        let body = "select `hr`.`employees`.`id` AS `id` from `hr`.`employees` join `hr`.`v_staff`";
        let refs = view_references("hr", body, &relations);
        assert_eq!(
            refs,
            vec![
                (ObjectKind::Table, "employees".to_string()),
                (ObjectKind::View, "v_staff".to_string()),
            ]
        );
    }
}
