//! Built-in conversion rules.
//!
//! Covers MySQL to PostgreSQL/GaussDB, MySQL to Oracle, and Oracle to
//! PostgreSQL/GaussDB. Anything else can be supplied through the `rules`
//! section of the configuration.

use std::sync::Arc;

use regex::Captures;

use crate::core::{Dialect, ObjectKind};
use crate::error::Result;

use super::rules::{compile, ConversionRule, FnRule, NoteRule, RegexRule, RuleOutcome, Severity};
use super::ConversionEngine;

const ALL: &[ObjectKind] = &ObjectKind::ALL;
const TABLE: &[ObjectKind] = &[ObjectKind::Table];
const INDEX: &[ObjectKind] = &[ObjectKind::Index];
const ROUTINES: &[ObjectKind] = &[ObjectKind::Function, ObjectKind::Procedure, ObjectKind::Trigger];

/// (name, pattern, replacement)
type Rewrite = (&'static str, &'static str, &'static str);

const MYSQL_TABLE_OPTIONS: &[Rewrite] = &[
    ("engine", r"\s+ENGINE\s*=\s*\w+", ""),
    ("auto_increment_option", r"\s+AUTO_INCREMENT\s*=\s*\d+", ""),
    ("charset", r"\s+(?:DEFAULT\s+)?(?:CHARSET|CHARACTER\s+SET)\s*=?\s*\w+", ""),
    ("collate", r"\s+COLLATE\s*=?\s*\w+", ""),
    ("row_format", r"\s+ROW_FORMAT\s*=\s*\w+", ""),
    ("comment", r"\s+COMMENT\s*=?\s*'[^']*'", ""),
    ("unsigned", r"\s+UNSIGNED\b", ""),
    ("zerofill", r"\s+ZEROFILL\b", ""),
];

const MYSQL_TO_PG_INTEGERS: &[Rewrite] = &[
    (
        "bigint_auto_increment",
        r"\bBIGINT(?:\s*\(\s*\d+\s*\))?((?:\s+NOT\s+NULL)?)\s+AUTO_INCREMENT\b",
        "BIGSERIAL$1",
    ),
    (
        "smallint_auto_increment",
        r"\bSMALLINT(?:\s*\(\s*\d+\s*\))?((?:\s+NOT\s+NULL)?)\s+AUTO_INCREMENT\b",
        "SMALLSERIAL$1",
    ),
    (
        "int_auto_increment",
        r"\b(?:INT|INTEGER|MEDIUMINT)(?:\s*\(\s*\d+\s*\))?((?:\s+NOT\s+NULL)?)\s+AUTO_INCREMENT\b",
        "SERIAL$1",
    ),
    ("tinyint_boolean", r"\bTINYINT\s*\(\s*1\s*\)", "BOOLEAN"),
    ("tinyint", r"\bTINYINT\b(?:\s*\(\s*\d+\s*\))?", "SMALLINT"),
    ("mediumint", r"\bMEDIUMINT\b(?:\s*\(\s*\d+\s*\))?", "INTEGER"),
    ("int_display_width", r"\b(BIGINT|SMALLINT)\s*\(\s*\d+\s*\)", "$1"),
    ("int", r"\bINT\b(?:\s*\(\s*\d+\s*\))?", "INTEGER"),
];

const MYSQL_TO_PG_TYPES: &[Rewrite] = &[
    ("float", r"\bFLOAT\b(?:\s*\(\s*\d+(?:\s*,\s*\d+)?\s*\))?", "REAL"),
    ("datetime", r"\bDATETIME\b", "TIMESTAMP"),
    ("text", r"\b(?:LONG|MEDIUM|TINY)TEXT\b", "TEXT"),
    ("blob", r"\b(?:LONG|MEDIUM|TINY)?BLOB\b", "BYTEA"),
    ("binary", r"\b(?:VAR)?BINARY\s*\(\s*\d+\s*\)", "BYTEA"),
    ("json", r"\bJSON\b", "JSONB"),
];

const MYSQL_TO_ORACLE_TYPES: &[Rewrite] = &[
    ("varchar", r"\bVARCHAR\s*\(", "VARCHAR2("),
    ("text", r"\b(?:LONG|MEDIUM|TINY)?TEXT\b", "CLOB"),
    ("datetime", r"\bDATETIME\b", "TIMESTAMP"),
    ("tinyint_boolean", r"\bTINYINT\s*\(\s*1\s*\)", "NUMBER(1)"),
    ("double", r"\bDOUBLE\b", "BINARY_DOUBLE"),
];

const ORACLE_TO_PG_TYPES: &[Rewrite] = &[
    ("number_integer", r"\bNUMBER\s*\(\s*10\s*\)", "INTEGER"),
    ("number_bigint", r"\bNUMBER\s*\(\s*19\s*\)", "BIGINT"),
    ("number_precision_scale", r"\bNUMBER\s*\(\s*(\d+)\s*,\s*(\d+)\s*\)", "NUMERIC($1,$2)"),
    ("number", r"\bNUMBER\b", "NUMERIC"),
    ("varchar2", r"\bVARCHAR2\s*\(\s*(\d+)\s*(?:BYTE|CHAR)?\s*\)", "VARCHAR($1)"),
    ("nvarchar2", r"\bNVARCHAR2\s*\(\s*(\d+)\s*\)", "VARCHAR($1)"),
    ("clob", r"\bN?CLOB\b", "TEXT"),
    ("long_raw", r"\bLONG\s+RAW\b", "BYTEA"),
    ("blob", r"\bBLOB\b", "BYTEA"),
    ("raw", r"\bRAW\s*\(\s*\d+\s*\)", "BYTEA"),
    ("binary_float", r"\bBINARY_FLOAT\b", "REAL"),
    ("binary_double", r"\bBINARY_DOUBLE\b", "DOUBLE PRECISION"),
    ("sysdate", r"\bSYS(?:DATE|TIMESTAMP)\b", "CURRENT_TIMESTAMP"),
    ("nvl", r"\bNVL\s*\(", "COALESCE("),
    ("sys_guid", r"\bSYS_GUID\s*\(\s*\)", "GEN_RANDOM_UUID()"),
];

/// (name, pattern, message) for warnings shared by Oracle targets.
type Warning = (&'static str, &'static str, &'static str);

const ORACLE_TO_PG_WARNINGS: &[Warning] = &[
    (
        "connect_by",
        r"\bCONNECT\s+BY\b",
        "CONNECT BY hierarchical query; rewrite as WITH RECURSIVE",
    ),
    (
        "outer_join",
        r"\(\+\)",
        "Oracle (+) outer join; rewrite with LEFT/RIGHT JOIN",
    ),
    ("rownum", r"\bROWNUM\b", "ROWNUM; rewrite with LIMIT or ROW_NUMBER() OVER ()"),
    ("decode", r"\bDECODE\s*\(", "DECODE; rewrite as CASE"),
    ("merge", r"\bMERGE\s+INTO\b", "MERGE INTO; rewrite as INSERT ... ON CONFLICT"),
    ("dual", r"\bFROM\s+DUAL\b", "FROM DUAL is not needed in the target"),
];

const ORACLE_TO_GAUSSDB_PACKAGES: &[Rewrite] = &[
    ("dbms_random_value", r"\bDBMS_RANDOM\.VALUE\b", "DBE_RANDOM.GET_VALUE"),
    ("dbms_random_seed", r"\bDBMS_RANDOM\.SEED\b", "DBE_RANDOM.SET_SEED"),
    (
        "utl_raw_cast_from_number",
        r"\bUTL_RAW\.CAST_FROM_NUMBER\b",
        "DBE_RAW.CAST_FROM_NUMBER_TO_RAW",
    ),
    (
        "utl_raw_cast_to_number",
        r"\bUTL_RAW\.CAST_TO_NUMBER\b",
        "DBE_RAW.CAST_TO_NUMBER_FROM_RAW",
    ),
    ("dbms_sql_open_cursor", r"\bDBMS_SQL\.OPEN_CURSOR\b", "DBE_SQL.REGISTER_CONTEXT"),
    ("dbms_lob", r"\bDBMS_LOB\.", "DBE_LOB."),
    ("dbms_output", r"\bDBMS_OUTPUT\.", "DBE_OUTPUT."),
    ("dbms_random", r"\bDBMS_RANDOM\.", "DBE_RANDOM."),
    ("utl_raw", r"\bUTL_RAW\.", "DBE_RAW."),
    ("dbms_sql", r"\bDBMS_SQL\.", "DBE_SQL."),
    ("not_equal_spacing", r"!\s+=", "!="),
];

/// Rules in registration order, each with the kinds it applies to.
struct RuleList(Vec<(&'static [ObjectKind], Arc<dyn ConversionRule>)>);

impl RuleList {
    fn new() -> Self {
        Self(Vec::new())
    }

    fn push(&mut self, kinds: &'static [ObjectKind], rule: impl ConversionRule + 'static) {
        self.0.push((kinds, Arc::new(rule)));
    }

    fn rewrites(&mut self, kinds: &'static [ObjectKind], table: &[Rewrite]) -> Result<()> {
        for (name, pattern, replacement) in table {
            self.push(kinds, RegexRule::new(*name, pattern, *replacement)?);
        }
        Ok(())
    }

    fn warnings(&mut self, kinds: &'static [ObjectKind], table: &[Warning]) -> Result<()> {
        for (name, pattern, message) in table {
            self.push(kinds, NoteRule::new(*name, pattern, Severity::Warning, *message)?);
        }
        Ok(())
    }

    fn register(&self, engine: &mut ConversionEngine, source: Dialect, target: Dialect) {
        for (kinds, rule) in &self.0 {
            engine.register_for(source, target, kinds, rule.clone());
        }
    }
}

/// Register the full built-in catalog.
pub(super) fn register(engine: &mut ConversionEngine) -> Result<()> {
    let mysql_pg = mysql_to_postgres()?;
    mysql_pg.register(engine, Dialect::Mysql, Dialect::Postgres);

    let mut mysql_gauss = mysql_to_postgres()?;
    mysql_gauss.push(
        ALL,
        FnRule::new("gaussdb_compatibility", |_, _| {
            RuleOutcome::noted(
                Severity::Info,
                "converted with PostgreSQL rules (GaussDB compatibility mode)",
            )
        }),
    );
    mysql_gauss.register(engine, Dialect::Mysql, Dialect::GaussDb);

    mysql_to_oracle()?.register(engine, Dialect::Mysql, Dialect::Oracle);
    oracle_to_postgres()?.register(engine, Dialect::Oracle, Dialect::Postgres);
    oracle_to_gaussdb()?.register(engine, Dialect::Oracle, Dialect::GaussDb);

    Ok(())
}

fn auto_increment_note() -> Result<NoteRule> {
    NoteRule::new(
        "auto_increment",
        r"\bAUTO_INCREMENT\b",
        Severity::Warning,
        "AUTO_INCREMENT: no direct equivalent; manual adjustment required",
    )
}

fn negative_scale_note() -> Result<NoteRule> {
    NoteRule::new(
        "number_negative_scale",
        r"\bNUMBER\s*\(\s*\d+\s*,\s*-\d+\s*\)",
        Severity::Warning,
        "NUMBER(p,-s) has no direct target equivalent; manual rounding required",
    )
}

/// `DOUBLE` becomes `DOUBLE PRECISION` unless it already is one.
fn double_precision() -> Result<FnRule> {
    let re = compile(r"\bDOUBLE\b(?:\s*\(\s*\d+\s*,\s*\d+\s*\))?(\s+PRECISION\b)?", true)?;
    Ok(FnRule::new("double", move |text, _| {
        if !re.is_match(text) {
            return RuleOutcome::unchanged();
        }
        let out = re.replace_all(text, |c: &Captures| {
            if c.get(1).is_some() {
                c[0].to_string()
            } else {
                "DOUBLE PRECISION".to_string()
            }
        });
        RuleOutcome::rewritten(out.into_owned())
    }))
}

fn mysql_to_postgres() -> Result<RuleList> {
    let mut list = RuleList::new();
    list.push(ALL, RegexRule::new("backticks", "`", "\"")?);
    list.rewrites(ALL, MYSQL_TABLE_OPTIONS)?;
    list.rewrites(ALL, MYSQL_TO_PG_INTEGERS)?;
    list.push(ALL, double_precision()?);
    list.push(
        ALL,
        RegexRule::new(
            "on_update_current_timestamp",
            r"\s+ON\s+UPDATE\s+CURRENT_TIMESTAMP(?:\s*\(\s*\d*\s*\))?",
            "",
        )?
        .with_note(
            Severity::Warning,
            "ON UPDATE CURRENT_TIMESTAMP removed; maintain the column with a trigger",
        ),
    );
    list.rewrites(ALL, MYSQL_TO_PG_TYPES)?;
    list.push(
        ALL,
        RegexRule::new("enum", r"\bENUM\s*\([^)]*\)", "VARCHAR(50)")?.with_note(
            Severity::Warning,
            "ENUM converted to VARCHAR(50); consider adding a CHECK constraint",
        ),
    );
    list.push(ALL, auto_increment_note()?);
    list.push(
        ALL,
        NoteRule::new(
            "fulltext",
            r"\bFULLTEXT\b",
            Severity::Unsupported,
            "FULLTEXT index not supported; consider GIN/GiST with tsvector",
        )?,
    );
    list.push(INDEX, RegexRule::new("using_btree", r"\s+USING\s+BTREE\b", "")?);
    list.push(
        INDEX,
        NoteRule::new(
            "using_hash",
            r"\bUSING\s+HASH\b",
            Severity::Warning,
            "HASH index may behave differently in the target",
        )?,
    );
    Ok(list)
}

fn mysql_to_oracle() -> Result<RuleList> {
    let mut list = RuleList::new();
    list.push(ALL, RegexRule::new("backticks", "`", "\"")?);
    list.rewrites(ALL, MYSQL_TABLE_OPTIONS)?;
    list.rewrites(ALL, MYSQL_TO_ORACLE_TYPES)?;
    list.push(ALL, auto_increment_note()?);
    Ok(list)
}

fn oracle_to_postgres() -> Result<RuleList> {
    let mut list = RuleList::new();
    list.push(ALL, negative_scale_note()?);
    list.rewrites(ALL, ORACLE_TO_PG_TYPES)?;
    list.warnings(ALL, ORACLE_TO_PG_WARNINGS)?;
    list.push(
        ROUTINES,
        FnRule::new("plsql_body", |_, _| {
            RuleOutcome::noted(
                Severity::Warning,
                "PL/SQL body must be reviewed for PL/pgSQL compatibility",
            )
        }),
    );
    Ok(list)
}

fn oracle_to_gaussdb() -> Result<RuleList> {
    let mut list = RuleList::new();
    list.push(ALL, negative_scale_note()?);
    list.push(
        ALL,
        NoteRule::new(
            "dbms_random_legacy",
            r"\bDBMS_RANDOM\.(?:INITIALIZE|NORMAL|RANDOM)\b",
            Severity::Unsupported,
            "DBMS_RANDOM.INITIALIZE/NORMAL/RANDOM have no DBE_RANDOM equivalent",
        )?,
    );
    list.rewrites(ALL, ORACLE_TO_GAUSSDB_PACKAGES)?;

    let char_units = compile(r"\bVARCHAR2\s*\(\s*(\d+)\s+CHAR\s*\)", true)?;
    list.push(
        ALL,
        FnRule::new("varchar2_char_units", move |text, _| {
            if !char_units.is_match(text) {
                return RuleOutcome::unchanged();
            }
            let out = char_units.replace_all(text, |c: &Captures| {
                match c[1].parse::<u64>() {
                    Ok(n) => format!("VARCHAR2({})", n.saturating_mul(4)),
                    Err(_) => c[0].to_string(),
                }
            });
            RuleOutcome::rewritten(out.into_owned()).with_note(
                Severity::Info,
                "VARCHAR2(n CHAR) sized as n*4 bytes (GaussDB only supports BYTE units)",
            )
        }),
    );

    list.push(
        TABLE,
        NoteRule::new(
            "date_precision",
            r"\bDATE\b",
            Severity::Warning,
            "DATE is stored as TIMESTAMP(0); sub-second precision is lost",
        )?,
    );
    list.push(
        ALL,
        NoteRule::new(
            "connect_by",
            r"\bCONNECT\s+BY\b",
            Severity::Warning,
            "GaussDB supports CONNECT BY only in filtering mode; consider WITH RECURSIVE",
        )?,
    );
    Ok(list)
}
