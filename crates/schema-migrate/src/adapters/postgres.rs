//! PostgreSQL adapter.
//!
//! Introspects the system catalogs (`pg_class`, `pg_constraint`, `pg_proc`,
//! ...) and rebuilds a `CREATE` statement per object. GaussDB speaks the same
//! wire protocol and catalogs; configure it with `dialect: gaussdb`.
//!
//! Uses deadpool-postgres for connection pooling. The pool connects on first
//! use, so building the adapter never touches the network.

use std::collections::BTreeMap;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use tokio_postgres::Config as PgConfig;
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::core::{
    DatabaseAdapter, DdlOutcome, Dialect, ObjectDescriptor, ObjectKind, ObjectRef, Reference,
};
use crate::error::{MigrateError, Result};

const DEFAULT_SCHEMA: &str = "public";

/// One column as read from `pg_attribute`.
#[derive(Debug, Clone, PartialEq)]
struct ColumnRow {
    name: String,
    data_type: String,
    not_null: bool,
    default: Option<String>,
}

/// PostgreSQL (or GaussDB) database.
pub struct PostgresAdapter {
    id: String,
    dialect: Dialect,
    schema: String,
    pool: Pool,
}

impl PostgresAdapter {
    /// Create the adapter and its (not yet connected) pool.
    pub fn new(id: &str, conn: &ConnectionConfig) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&conn.host);
        pg_config.port(conn.port_or_default());
        pg_config.dbname(&conn.database);
        pg_config.user(&conn.user);
        pg_config.password(&conn.password);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        if conn.ssl_mode.eq_ignore_ascii_case("disable") {
            warn!(
                "Connection '{}': TLS is disabled. Credentials will be transmitted in plaintext.",
                id
            );
        }
        let mgr = Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config);
        let pool = Pool::builder(mgr)
            .max_size(conn.max_connections.max(1))
            .build()
            .map_err(|e| MigrateError::connection(id, format!("creating pool: {}", e)))?;

        Ok(Self {
            id: id.to_string(),
            dialect: conn.dialect.unwrap_or(Dialect::Postgres),
            schema: conn
                .schema
                .clone()
                .unwrap_or_else(|| DEFAULT_SCHEMA.to_string()),
            pool,
        })
    }

    async fn client(&self) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::connection(&self.id, e))
    }

    /// Tables with their columns and constraints inlined. Foreign keys also
    /// become deferrable references.
    async fn load_tables(&self, client: &Object, schema: &str) -> Result<Vec<ObjectDescriptor>> {
        let query = r#"
            SELECT c.relname, a.attname,
                   format_type(a.atttypid, a.atttypmod),
                   a.attnotnull,
                   pg_get_expr(d.adbin, d.adrelid)
            FROM pg_catalog.pg_attribute a
            JOIN pg_catalog.pg_class c ON c.oid = a.attrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
            LEFT JOIN pg_catalog.pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
            WHERE n.nspname = $1
              AND c.relkind IN ('r', 'p')
              AND a.attnum > 0
              AND NOT a.attisdropped
            ORDER BY c.relname, a.attnum
        "#;
        let mut columns: BTreeMap<String, Vec<ColumnRow>> = BTreeMap::new();
        for row in client.query(query, &[&schema]).await? {
            columns.entry(row.get(0)).or_default().push(ColumnRow {
                name: row.get(1),
                data_type: row.get(2),
                not_null: row.get(3),
                default: row.get(4),
            });
        }

        let query = r#"
            SELECT c.relname, con.conname, con.contype::text,
                   pg_get_constraintdef(con.oid),
                   rn.nspname, rt.relname
            FROM pg_catalog.pg_constraint con
            JOIN pg_catalog.pg_class c ON c.oid = con.conrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
            LEFT JOIN pg_catalog.pg_class rt ON rt.oid = con.confrelid
            LEFT JOIN pg_catalog.pg_namespace rn ON rn.oid = rt.relnamespace
            WHERE n.nspname = $1
              AND con.contype IN ('p', 'u', 'c', 'f')
            ORDER BY c.relname, con.contype DESC, con.conname
        "#;
        let mut constraints: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut foreign_keys: BTreeMap<String, Vec<(String, String, String, String)>> =
            BTreeMap::new();
        for row in client.query(query, &[&schema]).await? {
            let table: String = row.get(0);
            let name: String = row.get(1);
            let contype: String = row.get(2);
            let clause = format!("CONSTRAINT {} {}", quote_ident(&name), row.get::<_, String>(3));
            if contype == "f" {
                let ref_schema: Option<String> = row.get(4);
                let ref_table: Option<String> = row.get(5);
                if let (Some(ref_schema), Some(ref_table)) = (ref_schema, ref_table) {
                    foreign_keys
                        .entry(table.clone())
                        .or_default()
                        .push((ref_schema, ref_table, name, clause.clone()));
                }
            }
            constraints.entry(table).or_default().push(clause);
        }

        let mut tables = Vec::new();
        for (table, cols) in &columns {
            let clauses = constraints.get(table).map(Vec::as_slice).unwrap_or(&[]);
            let mut descriptor = ObjectDescriptor::new(
                ObjectKind::Table,
                schema,
                table,
                table_definition(schema, table, cols, clauses),
            );
            for (ref_schema, ref_table, name, clause) in
                foreign_keys.remove(table).unwrap_or_default()
            {
                descriptor = descriptor.foreign_key(&ref_schema, &ref_table, name, clause);
            }
            tables.push(descriptor);
        }
        debug!("{}: {} tables in '{}'", self.id, tables.len(), schema);
        Ok(tables)
    }

    /// Indexes not backing a constraint (those travel with the table).
    async fn load_indexes(&self, client: &Object, schema: &str) -> Result<Vec<ObjectDescriptor>> {
        let query = r#"
            SELECT i.tablename, i.indexname, i.indexdef
            FROM pg_catalog.pg_indexes i
            WHERE i.schemaname = $1
              AND NOT EXISTS (
                  SELECT 1
                  FROM pg_catalog.pg_constraint con
                  JOIN pg_catalog.pg_class ic ON ic.oid = con.conindid
                  JOIN pg_catalog.pg_namespace n ON n.oid = ic.relnamespace
                  WHERE ic.relname = i.indexname AND n.nspname = i.schemaname
              )
            ORDER BY i.tablename, i.indexname
        "#;
        let rows = client.query(query, &[&schema]).await?;
        Ok(rows
            .iter()
            .map(|row| {
                let table: String = row.get(0);
                let name: String = row.get(1);
                let def: String = row.get(2);
                ObjectDescriptor::new(ObjectKind::Index, schema, name, def).depends_on(
                    ObjectKind::Table,
                    schema,
                    &table,
                )
            })
            .collect())
    }

    async fn load_views(&self, client: &Object, schema: &str) -> Result<Vec<ObjectDescriptor>> {
        let query = r#"
            SELECT c.relname, c.relkind::text, pg_get_viewdef(c.oid, true)
            FROM pg_catalog.pg_class c
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
            WHERE n.nspname = $1 AND c.relkind IN ('v', 'm')
            ORDER BY c.relname
        "#;
        let mut views: Vec<ObjectDescriptor> = client
            .query(query, &[&schema])
            .await?
            .iter()
            .map(|row| {
                let name: String = row.get(0);
                let relkind: String = row.get(1);
                let body: String = row.get(2);
                let keyword = if relkind == "m" { "MATERIALIZED VIEW" } else { "VIEW" };
                let def = format!(
                    "CREATE {} {}.{} AS\n{}",
                    keyword,
                    quote_ident(schema),
                    quote_ident(&name),
                    body.trim_end().trim_end_matches(';')
                );
                ObjectDescriptor::new(ObjectKind::View, schema, name, def)
            })
            .collect();

        // View -> relation edges recorded by the rewrite rules
        let query = r#"
            SELECT DISTINCT v.relname, rn.nspname, r.relname, r.relkind::text
            FROM pg_catalog.pg_rewrite rw
            JOIN pg_catalog.pg_class v ON v.oid = rw.ev_class
            JOIN pg_catalog.pg_namespace vn ON vn.oid = v.relnamespace
            JOIN pg_catalog.pg_depend d
              ON d.objid = rw.oid
             AND d.classid = 'pg_catalog.pg_rewrite'::regclass
             AND d.refclassid = 'pg_catalog.pg_class'::regclass
            JOIN pg_catalog.pg_class r ON r.oid = d.refobjid
            JOIN pg_catalog.pg_namespace rn ON rn.oid = r.relnamespace
            WHERE vn.nspname = $1
              AND v.relkind IN ('v', 'm')
              AND r.oid <> v.oid
              AND r.relkind IN ('r', 'p', 'v', 'm')
        "#;
        for row in client.query(query, &[&schema]).await? {
            let view: String = row.get(0);
            let ref_schema: String = row.get(1);
            let ref_name: String = row.get(2);
            let relkind: String = row.get(3);
            let kind = if matches!(relkind.as_str(), "v" | "m") {
                ObjectKind::View
            } else {
                ObjectKind::Table
            };
            if let Some(v) = views.iter_mut().find(|v| v.name == view) {
                v.push_reference(Reference::to(ObjectRef::new(kind, ref_schema, ref_name)));
            }
        }
        Ok(views)
    }

    /// Free-standing sequences (not owned by a serial/identity column).
    async fn load_sequences(&self, client: &Object, schema: &str) -> Result<Vec<ObjectDescriptor>> {
        let query = r#"
            SELECT c.relname,
                   format('CREATE SEQUENCE %I.%I START WITH %s INCREMENT BY %s MINVALUE %s MAXVALUE %s%s',
                          n.nspname, c.relname, s.seqstart, s.seqincrement, s.seqmin, s.seqmax,
                          CASE WHEN s.seqcycle THEN ' CYCLE' ELSE '' END)
            FROM pg_catalog.pg_sequence s
            JOIN pg_catalog.pg_class c ON c.oid = s.seqrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
            WHERE n.nspname = $1
              AND NOT EXISTS (
                  SELECT 1 FROM pg_catalog.pg_depend d
                  WHERE d.objid = c.oid AND d.deptype IN ('a', 'i')
              )
            ORDER BY c.relname
        "#;
        let rows = client.query(query, &[&schema]).await?;
        Ok(rows
            .iter()
            .map(|row| {
                let name: String = row.get(0);
                let def: String = row.get(1);
                ObjectDescriptor::new(ObjectKind::Sequence, schema, name, def)
            })
            .collect())
    }

    /// Functions and procedures, excluding ones installed by extensions.
    async fn load_routines(&self, client: &Object, schema: &str) -> Result<Vec<ObjectDescriptor>> {
        let query = r#"
            SELECT p.proname, p.prokind::text, pg_get_functiondef(p.oid)
            FROM pg_catalog.pg_proc p
            JOIN pg_catalog.pg_namespace n ON n.oid = p.pronamespace
            WHERE n.nspname = $1
              AND p.prokind IN ('f', 'p')
              AND NOT EXISTS (
                  SELECT 1 FROM pg_catalog.pg_depend d
                  WHERE d.objid = p.oid AND d.deptype = 'e'
              )
            ORDER BY p.proname
        "#;
        let rows = client.query(query, &[&schema]).await?;
        Ok(rows
            .iter()
            .map(|row| {
                let name: String = row.get(0);
                let prokind: String = row.get(1);
                let def: String = row.get(2);
                let kind = if prokind == "p" {
                    ObjectKind::Procedure
                } else {
                    ObjectKind::Function
                };
                ObjectDescriptor::new(kind, schema, name, def.trim_end())
            })
            .collect())
    }

    async fn load_triggers(&self, client: &Object, schema: &str) -> Result<Vec<ObjectDescriptor>> {
        let query = r#"
            SELECT c.relname, t.tgname, pg_get_triggerdef(t.oid, true), pn.nspname, p.proname
            FROM pg_catalog.pg_trigger t
            JOIN pg_catalog.pg_class c ON c.oid = t.tgrelid
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
            JOIN pg_catalog.pg_proc p ON p.oid = t.tgfoid
            JOIN pg_catalog.pg_namespace pn ON pn.oid = p.pronamespace
            WHERE n.nspname = $1 AND NOT t.tgisinternal
            ORDER BY c.relname, t.tgname
        "#;
        let rows = client.query(query, &[&schema]).await?;
        Ok(rows
            .iter()
            .map(|row| {
                let table: String = row.get(0);
                let name: String = row.get(1);
                let def: String = row.get(2);
                let fn_schema: String = row.get(3);
                let function: String = row.get(4);
                ObjectDescriptor::new(ObjectKind::Trigger, schema, name, def)
                    .depends_on(ObjectKind::Table, schema, &table)
                    .depends_on(ObjectKind::Function, &fn_schema, &function)
            })
            .collect())
    }
}

#[async_trait]
impl DatabaseAdapter for PostgresAdapter {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn name(&self) -> &str {
        "postgres"
    }

    async fn introspect(&self, schema: Option<&str>) -> Result<Vec<ObjectDescriptor>> {
        let schema = schema.unwrap_or(&self.schema);
        let client = self.client().await?;

        let mut objects = self.load_sequences(&client, schema).await?;
        objects.extend(self.load_tables(&client, schema).await?);
        objects.extend(self.load_indexes(&client, schema).await?);
        objects.extend(self.load_views(&client, schema).await?);
        objects.extend(self.load_routines(&client, schema).await?);
        objects.extend(self.load_triggers(&client, schema).await?);

        info!(
            "Introspected {} objects from {} schema '{}'",
            objects.len(),
            self.id,
            schema
        );
        Ok(objects)
    }

    async fn execute_ddl(&self, ddl: &str) -> Result<DdlOutcome> {
        let client = self.client().await?;
        match client.batch_execute(ddl).await {
            Ok(()) => Ok(DdlOutcome::Applied),
            Err(e) => match e.as_db_error() {
                Some(db) => Ok(DdlOutcome::Failed(format!(
                    "{} (SQLSTATE {})",
                    db.message(),
                    db.code().code()
                ))),
                None => Err(MigrateError::connection(&self.id, e)),
            },
        }
    }

    async fn ping(&self) -> Result<()> {
        let client = self.client().await?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| MigrateError::connection(&self.id, e))?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close();
    }
}

/// Quote an identifier only when it would not survive unquoted.
fn quote_ident(name: &str) -> String {
    let plain = name
        .chars()
        .next()
        .map(|c| c.is_ascii_lowercase() || c == '_')
        .unwrap_or(false)
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '$');
    if plain {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

fn table_definition(schema: &str, table: &str, columns: &[ColumnRow], constraints: &[String]) -> String {
    let mut lines: Vec<String> = columns
        .iter()
        .map(|c| {
            let mut line = format!("    {} {}", quote_ident(&c.name), c.data_type);
            if let Some(default) = &c.default {
                line.push_str(" DEFAULT ");
                line.push_str(default);
            }
            if c.not_null {
                line.push_str(" NOT NULL");
            }
            line
        })
        .collect();
    lines.extend(constraints.iter().map(|c| format!("    {}", c)));
    format!(
        "CREATE TABLE {}.{} (\n{}\n)",
        quote_ident(schema),
        quote_ident(table),
        lines.join(",\n")
    )
}
