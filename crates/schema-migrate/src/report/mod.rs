//! Migration reports.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::convert::Confidence;
use crate::core::ObjectKind;
use crate::error::{MigrateError, Result};
use crate::state::{ItemStatus, MigrationItem, MigrationTask};
use crate::verify::ComparisonReport;

/// Output format for [`MigrationReport`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReportFormat {
    Json,
    #[default]
    Markdown,
}

impl FromStr for ReportFormat {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(ReportFormat::Json),
            "markdown" | "md" => Ok(ReportFormat::Markdown),
            _ => Err(MigrateError::Config(format!("Unknown report format: '{}'", s))),
        }
    }
}

/// Item counts for the whole task.
#[derive(Debug, Clone, Serialize)]
pub struct ReportStatistics {
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub pending: u32,
    /// Completed share of all items, in percent.
    pub success_rate: f64,
}

/// Item counts for one object kind.
#[derive(Debug, Clone, Default, Serialize)]
pub struct KindStatistics {
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub pending: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemDetail {
    pub execution_order: u32,
    pub object_type: ObjectKind,
    pub object_name: String,
    pub status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub retry_count: u32,
}

impl From<&MigrationItem> for ItemDetail {
    fn from(item: &MigrationItem) -> Self {
        Self {
            execution_order: item.execution_order,
            object_type: item.object_type,
            object_name: item.qualified_name(),
            status: item.status,
            error_message: item.error_message.clone(),
            retry_count: item.retry_count,
        }
    }
}

/// Conversion notes worth a human look for one item.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionWarning {
    pub execution_order: u32,
    pub object_type: ObjectKind,
    pub object_name: String,
    pub confidence: Confidence,
    pub notes: Vec<String>,
}

/// Task, items and (optionally) comparison data in one document.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub generated_at: DateTime<Utc>,
    pub task: MigrationTask,
    pub outcome: String,
    pub statistics: ReportStatistics,
    pub items_by_kind: BTreeMap<ObjectKind, KindStatistics>,
    pub failed_items: Vec<ItemDetail>,
    pub skipped_items: Vec<ItemDetail>,
    pub conversion_warnings: Vec<ConversionWarning>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison: Option<ComparisonReport>,
}

fn is_warning(note: &str) -> bool {
    note.starts_with("warning:") || note.starts_with("unsupported:")
}

impl MigrationReport {
    pub fn build(task: MigrationTask, items: &[MigrationItem], comparison: Option<ComparisonReport>) -> Self {
        let mut items_by_kind: BTreeMap<ObjectKind, KindStatistics> = BTreeMap::new();
        for item in items {
            let stats = items_by_kind.entry(item.object_type).or_default();
            stats.total += 1;
            match item.status {
                ItemStatus::Completed => stats.completed += 1,
                ItemStatus::Failed => stats.failed += 1,
                ItemStatus::Skipped => stats.skipped += 1,
                ItemStatus::Pending | ItemStatus::Executing => stats.pending += 1,
            }
        }

        let conversion_warnings = items
            .iter()
            .filter_map(|item| {
                let notes: Vec<String> = item
                    .conversion_notes
                    .iter()
                    .filter(|n| is_warning(n))
                    .cloned()
                    .collect();
                if notes.is_empty() && item.confidence != Confidence::Low {
                    return None;
                }
                Some(ConversionWarning {
                    execution_order: item.execution_order,
                    object_type: item.object_type,
                    object_name: item.qualified_name(),
                    confidence: item.confidence,
                    notes,
                })
            })
            .collect();

        let success_rate = if task.total_items == 0 {
            0.0
        } else {
            (task.completed_items as f64 / task.total_items as f64 * 1000.0).round() / 10.0
        };

        Self {
            generated_at: Utc::now(),
            outcome: task.outcome_label(),
            statistics: ReportStatistics {
                total: task.total_items,
                completed: task.completed_items,
                failed: task.failed_items,
                skipped: task.skipped_items,
                pending: task.pending_items + task.executing_items,
                success_rate,
            },
            items_by_kind,
            failed_items: items
                .iter()
                .filter(|i| i.status == ItemStatus::Failed)
                .map(ItemDetail::from)
                .collect(),
            skipped_items: items
                .iter()
                .filter(|i| i.status == ItemStatus::Skipped)
                .map(ItemDetail::from)
                .collect(),
            conversion_warnings,
            comparison,
            task,
        }
    }

    pub fn render(&self, format: ReportFormat) -> Result<String> {
        match format {
            ReportFormat::Json => self.to_json(),
            ReportFormat::Markdown => Ok(self.to_markdown()),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let t = &self.task;
        let s = &self.statistics;

        let _ = writeln!(out, "# Migration Report: {}", t.id);
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "- **Source**: {} ({}){}",
            t.source_connection,
            t.source_dialect.display_name(),
            t.source_schema.as_deref().map(|s| format!(", schema `{}`", s)).unwrap_or_default()
        );
        let _ = writeln!(
            out,
            "- **Target**: {} ({}){}",
            t.target_connection,
            t.target_dialect.display_name(),
            t.target_schema.as_deref().map(|s| format!(", schema `{}`", s)).unwrap_or_default()
        );
        let _ = writeln!(out, "- **Status**: {}", self.outcome);
        if let Some(err) = &t.error_message {
            let _ = writeln!(out, "- **Error**: {}", err);
        }
        let _ = writeln!(out, "- **Created**: {}", t.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
        if let Some(done) = t.completed_at {
            let _ = writeln!(out, "- **Finished**: {}", done.format("%Y-%m-%d %H:%M:%S UTC"));
        }

        let _ = writeln!(out, "\n## Statistics\n");
        let _ = writeln!(out, "| Total | Completed | Failed | Skipped | Pending | Success |");
        let _ = writeln!(out, "|------:|----------:|-------:|--------:|--------:|--------:|");
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} | {:.1}% |",
            s.total, s.completed, s.failed, s.skipped, s.pending, s.success_rate
        );

        if !self.items_by_kind.is_empty() {
            let _ = writeln!(out, "\n## Objects by Kind\n");
            let _ = writeln!(out, "| Kind | Total | Completed | Failed | Skipped | Pending |");
            let _ = writeln!(out, "|------|------:|----------:|-------:|--------:|--------:|");
            for (kind, k) in &self.items_by_kind {
                let _ = writeln!(
                    out,
                    "| {} | {} | {} | {} | {} | {} |",
                    kind, k.total, k.completed, k.failed, k.skipped, k.pending
                );
            }
        }

        if !self.failed_items.is_empty() {
            let _ = writeln!(out, "\n## Failed Items\n");
            for d in &self.failed_items {
                let _ = writeln!(
                    out,
                    "- #{} {} `{}` (retries: {}): {}",
                    d.execution_order,
                    d.object_type,
                    d.object_name,
                    d.retry_count,
                    d.error_message.as_deref().unwrap_or("no error recorded")
                );
            }
        }

        if !self.skipped_items.is_empty() {
            let _ = writeln!(out, "\n## Skipped Items\n");
            for d in &self.skipped_items {
                let _ = writeln!(out, "- #{} {} `{}`", d.execution_order, d.object_type, d.object_name);
            }
        }

        if !self.conversion_warnings.is_empty() {
            let _ = writeln!(out, "\n## Conversion Warnings\n");
            for w in &self.conversion_warnings {
                let _ = writeln!(
                    out,
                    "- #{} {} `{}` (confidence: {})",
                    w.execution_order, w.object_type, w.object_name, w.confidence
                );
                for note in &w.notes {
                    let _ = writeln!(out, "  - {}", note);
                }
            }
        }

        if let Some(c) = &self.comparison {
            let _ = writeln!(out, "\n## Verification\n");
            let _ = writeln!(
                out,
                "{} matched, {} missing, {} altered, {} extra in target.",
                c.matched.len(),
                c.missing_in_target.len(),
                c.altered_in_target.len(),
                c.extra_in_target.len()
            );
            for e in &c.missing_in_target {
                let _ = writeln!(
                    out,
                    "- missing: {} `{}`{}",
                    e.target.kind,
                    e.target.qualified_name(),
                    e.detail.as_deref().map(|d| format!(" ({})", d)).unwrap_or_default()
                );
            }
            for e in &c.altered_in_target {
                let _ = writeln!(
                    out,
                    "- altered: {} `{}`{}",
                    e.target.kind,
                    e.target.qualified_name(),
                    e.detail.as_deref().map(|d| format!(" ({})", d)).unwrap_or_default()
                );
            }
            for r in &c.extra_in_target {
                let _ = writeln!(out, "- extra: {} `{}`", r.kind, r.qualified_name());
            }
            for note in &c.notes {
                let _ = writeln!(out, "- note: {}", note);
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Dialect;
    use crate::state::TaskStatus;

    fn fixture() -> (MigrationTask, Vec<MigrationItem>) {
        let mut task = MigrationTask::new("legacy", "warehouse", Dialect::Mysql, Dialect::Postgres);
        let mk = |order: u32, kind: ObjectKind, name: &str, status: ItemStatus| MigrationItem {
            task_id: task.id,
            execution_order: order,
            object_type: kind,
            object_name: name.to_string(),
            schema_name: "hr".to_string(),
            status,
            source_ddl: String::new(),
            target_ddl: String::new(),
            conversion_notes: Vec::new(),
            confidence: Confidence::High,
            deferred: false,
            error_message: None,
            retry_count: 0,
            executed_at: None,
        };
        let mut items = vec![
            mk(1, ObjectKind::Table, "departments", ItemStatus::Completed),
            mk(2, ObjectKind::Table, "employees", ItemStatus::Completed),
            mk(3, ObjectKind::Index, "ix_emp", ItemStatus::Failed),
            mk(4, ObjectKind::View, "v_staff", ItemStatus::Skipped),
        ];
        items[2].error_message = Some("relation does not exist".into());
        items[2].retry_count = 2;
        items[1].conversion_notes = vec![
            "info: same dialect".into(),
            "warning: ENUM converted to VARCHAR(50); consider adding a CHECK constraint".into(),
        ];
        task.recount(&items);
        task.status = TaskStatus::Failed;
        (task, items)
    }

    #[test]
    fn test_statistics() {
        let (task, items) = fixture();
        let report = MigrationReport::build(task, &items, None);
        assert_eq!(report.statistics.total, 4);
        assert_eq!(report.statistics.completed, 2);
        assert_eq!(report.statistics.success_rate, 50.0);
        assert_eq!(report.items_by_kind[&ObjectKind::Table].completed, 2);
        assert_eq!(report.failed_items.len(), 1);
        assert_eq!(report.skipped_items.len(), 1);
        assert_eq!(report.conversion_warnings.len(), 1);
        assert_eq!(report.conversion_warnings[0].notes.len(), 1);
        assert_eq!(report.outcome, "completed with errors, 1 item failed");
    }

    #[test]
    fn test_markdown_sections() {
        let (task, items) = fixture();
        let md = MigrationReport::build(task, &items, None).to_markdown();
        assert!(md.starts_with("# Migration Report: "));
        assert!(md.contains("- **Status**: completed with errors, 1 item failed"));
        assert!(md.contains("| 4 | 2 | 1 | 1 | 0 | 50.0% |"));
        assert!(md.contains("- #3 index `hr.ix_emp` (retries: 2): relation does not exist"));
        assert!(md.contains("## Skipped Items"));
        assert!(!md.contains("## Verification"));
    }

    #[test]
    fn test_json_has_comparison_when_present() {
        let (task, items) = fixture();
        let comparison = ComparisonReport {
            task_id: task.id,
            ..Default::default()
        };
        let json = MigrationReport::build(task, &items, Some(comparison))
            .render(ReportFormat::Json)
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["statistics"]["failed"], 1);
        assert_eq!(value["items_by_kind"]["table"]["total"], 2);
        assert!(value["comparison"].is_object());
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("JSON".parse::<ReportFormat>().unwrap(), ReportFormat::Json);
        assert_eq!("md".parse::<ReportFormat>().unwrap(), ReportFormat::Markdown);
        assert!("html".parse::<ReportFormat>().is_err());
    }
}
