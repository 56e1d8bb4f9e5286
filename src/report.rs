//! Run report rendering

use crate::action::{ActionOutcome, ActionResult};
use crate::policy::RunReport;
use clap::ValueEnum;

/// Longest detail cell in table output
const MAX_DETAIL_WIDTH: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

/// Render reports in `format`
pub fn render(reports: &[RunReport], format: OutputFormat, show_excluded: bool) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(reports)?),
        OutputFormat::Table => Ok(reports
            .iter()
            .map(|r| render_table(r, show_excluded))
            .collect::<Vec<_>>()
            .join("\n")),
    }
}

/// Plain-text table of one report
pub fn render_table(report: &RunReport, show_excluded: bool) -> String {
    let mut out = format!(
        "Policy {} on {}: {} of {} matched{}\n",
        report.policy,
        report.resource,
        report.matched,
        report.population,
        if report.cancelled { " (cancelled)" } else { "" }
    );

    let mut rows: Vec<[String; 4]> = report.results.iter().map(row).collect();
    if show_excluded {
        rows.extend(report.excluded.iter().map(row));
    }

    if rows.is_empty() {
        out.push_str("  no actions taken\n");
    } else {
        let header = [
            "ACTION".to_string(),
            "RESOURCE".to_string(),
            "STATUS".to_string(),
            "DETAIL".to_string(),
        ];
        let mut widths = [0usize; 4];
        for cells in std::iter::once(&header).chain(rows.iter()) {
            for (width, cell) in widths.iter_mut().zip(cells) {
                *width = (*width).max(cell.chars().count());
            }
        }
        for cells in std::iter::once(&header).chain(rows.iter()) {
            let line = cells
                .iter()
                .zip(widths)
                .map(|(cell, width)| format!("{:<width$}", cell, width = width))
                .collect::<Vec<_>>()
                .join("  ");
            out.push_str("  ");
            out.push_str(line.trim_end());
            out.push('\n');
        }
    }

    let summary = report.summary();
    out.push_str(&format!(
        "  {} succeeded, {} failed, {} skipped ({} ms)\n",
        summary.succeeded,
        summary.failed,
        summary.skipped,
        (report.finished_at - report.started_at).num_milliseconds()
    ));
    out
}

fn row(result: &ActionResult) -> [String; 4] {
    let detail = match &result.outcome {
        ActionOutcome::Succeeded { response } if response.is_null() => String::new(),
        ActionOutcome::Succeeded { response } => response.to_string(),
        ActionOutcome::Failed { kind, message } => format!("{}: {}", kind, message),
        ActionOutcome::Skipped { reason } => reason.clone(),
    };
    [
        result.action.clone(),
        result.resource_id.clone(),
        result.outcome.label().to_string(),
        truncate(&detail, MAX_DETAIL_WIDTH),
    ]
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept)
}
