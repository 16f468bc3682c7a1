//! Markdown comparison report for a finished run.

use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};

use crate::domain::{AttemptResult, BenchmarkRun};

/// One comparison row per model, in request order.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
    pub model_id: String,
    pub ok: bool,
    pub duration_ms: u64,
    pub time_to_first_unit_ms: Option<u64>,
    pub tokens_per_second: Option<f64>,
    pub cost_estimate: Option<f64>,
    /// Isolation branch and verification tally for execution runs.
    pub execution: Option<String>,
    pub error: Option<String>,
}

impl ReportRow {
    fn from_result(result: &AttemptResult) -> Self {
        let execution = result.execution.as_ref().map(|e| {
            let passed = e.verification.iter().filter(|v| v.passed).count();
            format!(
                "`{}` ({} pass, {}/{} checks)",
                e.branch_name,
                e.attempt_number,
                passed,
                e.verification.len()
            )
        });
        Self {
            model_id: result.model_id.clone(),
            ok: result.is_success(),
            duration_ms: result.duration_ms,
            time_to_first_unit_ms: result.time_to_first_unit_ms,
            tokens_per_second: result.tokens_per_second,
            cost_estimate: result.cost_estimate,
            execution,
            error: result.error.clone(),
        }
    }
}

/// Comparison view over a [`BenchmarkRun`].
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub run_id: String,
    pub operation: String,
    pub timestamp: String,
    pub rows: Vec<ReportRow>,
}

impl RunReport {
    pub fn from_run(run: &BenchmarkRun) -> Self {
        Self {
            run_id: run.id.0.clone(),
            operation: run.operation.clone(),
            timestamp: run.timestamp.to_rfc3339(),
            rows: run.results.iter().map(ReportRow::from_result).collect(),
        }
    }

    /// Fastest successful model, if any succeeded.
    pub fn fastest(&self) -> Option<&ReportRow> {
        self.rows
            .iter()
            .filter(|r| r.ok)
            .min_by_key(|r| r.duration_ms)
    }

    pub fn render_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Benchmark `{}`\n", self.operation);
        let _ = writeln!(out, "- run: `{}`", self.run_id);
        let _ = writeln!(out, "- at: {}", self.timestamp);
        let failures = self.rows.iter().filter(|r| !r.ok).count();
        let _ = writeln!(out, "- models: {} ({} failed)", self.rows.len(), failures);
        if let Some(best) = self.fastest() {
            let _ = writeln!(out, "- fastest: `{}` ({} ms)", best.model_id, best.duration_ms);
        }
        out.push('\n');

        let with_execution = self.rows.iter().any(|r| r.execution.is_some());
        out.push_str("| model | status | duration (ms) | ttfu (ms) | tokens/s | cost (USD) |");
        if with_execution {
            out.push_str(" execution |");
        }
        out.push('\n');
        out.push_str("|---|---|---:|---:|---:|---:|");
        if with_execution {
            out.push_str("---|");
        }
        out.push('\n');

        for row in &self.rows {
            let _ = write!(
                out,
                "| `{}` | {} | {} | {} | {} | {} |",
                row.model_id,
                if row.ok { "ok" } else { "error" },
                row.duration_ms,
                dash(row.time_to_first_unit_ms.map(|v| v.to_string())),
                dash(row.tokens_per_second.map(|v| format!("{v:.1}"))),
                dash(row.cost_estimate.map(|v| format!("{v:.4}"))),
            );
            if with_execution {
                let _ = write!(out, " {} |", dash(row.execution.clone()));
            }
            out.push('\n');
        }

        let errors: Vec<_> = self
            .rows
            .iter()
            .filter_map(|r| r.error.as_ref().map(|e| (&r.model_id, e)))
            .collect();
        if !errors.is_empty() {
            out.push_str("\n## Errors\n");
            for (model_id, error) in errors {
                let _ = writeln!(out, "- `{}`: {}", model_id, error.replace('\n', " "));
            }
        }
        out
    }
}

fn dash(value: Option<String>) -> String {
    value.unwrap_or_else(|| "-".to_string())
}

/// Write the Markdown report for `run` to `path`.
pub fn write_report_md(path: &Path, run: &BenchmarkRun) -> Result<()> {
    let md = RunReport::from_run(run).render_markdown();
    std::fs::write(path, md).with_context(|| format!("write {:?}", path))?;
    Ok(())
}
