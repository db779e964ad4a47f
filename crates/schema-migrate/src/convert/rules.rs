//! Conversion rule trait and the stock rule shapes.

use std::fmt;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::config::RuleConfig;
use crate::core::ObjectDescriptor;
use crate::error::{MigrateError, Result};

/// How much a note should worry the operator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational, conversion is expected to be faithful.
    #[default]
    Info,
    /// Converted, but behavior may differ; review before relying on it.
    Warning,
    /// The construct cannot be expressed in the target; manual work needed.
    Unsupported,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Unsupported => "unsupported",
        };
        f.write_str(s)
    }
}

/// What a single rule did to the text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleOutcome {
    /// Rewritten text, or `None` to leave the input untouched.
    pub text: Option<String>,
    /// Note to attach to the conversion.
    pub note: Option<(Severity, String)>,
}

impl RuleOutcome {
    pub fn unchanged() -> Self {
        Self::default()
    }

    pub fn rewritten(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            note: None,
        }
    }

    pub fn noted(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            text: None,
            note: Some((severity, message.into())),
        }
    }

    pub fn with_note(mut self, severity: Severity, message: impl Into<String>) -> Self {
        self.note = Some((severity, message.into()));
        self
    }
}

/// A pure transformation of definition text.
///
/// Rules must be deterministic: the same text and descriptor always produce
/// the same outcome.
pub trait ConversionRule: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, text: &str, descriptor: &ObjectDescriptor) -> RuleOutcome;
}

/// Compile a case-insensitive pattern.
pub(crate) fn compile(pattern: &str, case_insensitive: bool) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .build()
        .map_err(|e| MigrateError::Rule(format!("invalid pattern '{}': {}", pattern, e)))
}

/// Regex search-and-replace, optionally noting each match.
pub struct RegexRule {
    name: String,
    regex: Regex,
    replacement: String,
    note: Option<(Severity, String)>,
}

impl RegexRule {
    /// Case-insensitive rewrite. `replacement` may use `$1` group references.
    pub fn new(name: impl Into<String>, pattern: &str, replacement: impl Into<String>) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            regex: compile(pattern, true)?,
            replacement: replacement.into(),
            note: None,
        })
    }

    pub fn with_note(mut self, severity: Severity, message: impl Into<String>) -> Self {
        self.note = Some((severity, message.into()));
        self
    }
}

impl ConversionRule for RegexRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, text: &str, _descriptor: &ObjectDescriptor) -> RuleOutcome {
        if !self.regex.is_match(text) {
            return RuleOutcome::unchanged();
        }
        let rewritten = self.regex.replace_all(text, self.replacement.as_str()).into_owned();
        RuleOutcome {
            text: Some(rewritten),
            note: self.note.clone(),
        }
    }
}

/// Attaches a note when the pattern matches; never changes the text.
pub struct NoteRule {
    name: String,
    regex: Regex,
    severity: Severity,
    message: String,
}

impl NoteRule {
    pub fn new(
        name: impl Into<String>,
        pattern: &str,
        severity: Severity,
        message: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            regex: compile(pattern, true)?,
            severity,
            message: message.into(),
        })
    }
}

impl ConversionRule for NoteRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, text: &str, _descriptor: &ObjectDescriptor) -> RuleOutcome {
        if self.regex.is_match(text) {
            RuleOutcome::noted(self.severity, self.message.clone())
        } else {
            RuleOutcome::unchanged()
        }
    }
}

type RuleFn = dyn Fn(&str, &ObjectDescriptor) -> RuleOutcome + Send + Sync;

/// Rule backed by a closure, for rewrites a single regex cannot express.
pub struct FnRule {
    name: String,
    f: Box<RuleFn>,
}

impl FnRule {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&str, &ObjectDescriptor) -> RuleOutcome + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            f: Box::new(f),
        }
    }
}

impl ConversionRule for FnRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, text: &str, descriptor: &ObjectDescriptor) -> RuleOutcome {
        (self.f)(text, descriptor)
    }
}

impl fmt::Debug for FnRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnRule").field("name", &self.name).finish()
    }
}

/// Build a rule from configuration.
pub fn from_config(rule: &RuleConfig) -> Result<Box<dyn ConversionRule>> {
    let name = rule.name.clone().unwrap_or_else(|| rule.pattern.clone());
    let regex = compile(&rule.pattern, rule.case_insensitive)?;

    match (&rule.replacement, &rule.note) {
        (Some(replacement), note) => Ok(Box::new(RegexRule {
            name,
            regex,
            replacement: replacement.clone(),
            note: note.as_ref().map(|n| (rule.severity, n.clone())),
        })),
        (None, Some(note)) => Ok(Box::new(NoteRule {
            name,
            regex,
            severity: rule.severity,
            message: note.clone(),
        })),
        (None, None) => Err(MigrateError::Rule(format!(
            "rule '{}' has neither a replacement nor a note",
            name
        ))),
    }
}
