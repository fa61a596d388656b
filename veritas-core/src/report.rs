//! Validation report assembly and rendering.

use std::fmt::Write as _;

use chrono::Utc;
use uuid::Uuid;
use veritas_graphs::UsageKind;

use crate::types::{ReportSummary, ValidatedEvent, ValidationReport, Verdict};

/// Description of the hallucination-rate denominator carried in every report.
pub const RATE_BASIS: &str = "HALLUCINATED / (call + attribute_access events)";

/// Summarize classified events into a report.
///
/// The hallucination rate counts only member-level usages: imports and
/// instantiations never contribute to either side of the ratio.
pub fn build_report(
    script: &str,
    events: Vec<ValidatedEvent>,
    truncated: bool,
    failures: Vec<String>,
) -> ValidationReport {
    let mut summary = ReportSummary {
        rate_basis: RATE_BASIS.to_string(),
        total: events.len(),
        ..ReportSummary::default()
    };

    for event in &events {
        match event.verdict {
            Verdict::Valid => summary.valid += 1,
            Verdict::Hallucinated => summary.hallucinated += 1,
            Verdict::SignatureMismatch => summary.signature_mismatch += 1,
            Verdict::Uncertain => summary.uncertain += 1,
            Verdict::Unknown => summary.unknown += 1,
        }
        if matches!(event.kind, UsageKind::Call | UsageKind::AttributeAccess) {
            summary.rate_denominator += 1;
        }
    }

    #[allow(clippy::cast_precision_loss)]
    let hallucination_rate = if summary.rate_denominator == 0 {
        0.0
    } else {
        member_hallucinations(&events) as f64 / summary.rate_denominator as f64
    };

    ValidationReport {
        id: Uuid::new_v4(),
        script: script.to_string(),
        generated_at: Utc::now(),
        summary,
        hallucination_rate,
        truncated,
        failures,
        events,
    }
}

pub fn to_json(report: &ValidationReport) -> serde_json::Result<String> {
    serde_json::to_string_pretty(report)
}

/// Plain-text rendering for terminals. Leaves out the report id and
/// timestamp so output is stable across runs.
pub fn render_text(report: &ValidationReport) -> String {
    let mut out = String::new();
    let s = &report.summary;
    let _ = writeln!(out, "Script: {}", report.script);
    let _ = writeln!(
        out,
        "Events: {} (valid {}, hallucinated {}, signature mismatch {}, uncertain {}, unknown {})",
        s.total, s.valid, s.hallucinated, s.signature_mismatch, s.uncertain, s.unknown
    );
    let _ = writeln!(
        out,
        "Hallucination rate: {:.2} ({} of {} member usages)",
        report.hallucination_rate,
        member_hallucinations(&report.events),
        s.rate_denominator
    );
    if report.truncated {
        let _ = writeln!(out, "Truncated: validation budget exhausted");
    }
    for failure in &report.failures {
        let _ = writeln!(out, "Failure: {failure}");
    }

    if !report.events.is_empty() {
        out.push('\n');
    }
    for event in &report.events {
        let _ = writeln!(
            out,
            "{:>4}:{:<3} {:<18} {:<16} {}",
            event.line,
            event.column,
            event.verdict.as_str(),
            event.kind.as_str(),
            event.symbol
        );
        if event.verdict != Verdict::Valid {
            let _ = writeln!(out, "         {}", event.detail);
        }
        if let Some(signature) = &event.expected_signature {
            let _ = writeln!(out, "         expected: {signature}");
        }
        if !event.suggestions.is_empty() {
            let _ = writeln!(out, "         did you mean: {}", event.suggestions.join(", "));
        }
    }
    out
}

/// HALLUCINATED verdicts among call and attribute-access events.
fn member_hallucinations(events: &[ValidatedEvent]) -> usize {
    events
        .iter()
        .filter(|e| {
            e.verdict == Verdict::Hallucinated
                && matches!(e.kind, UsageKind::Call | UsageKind::AttributeAccess)
        })
        .count()
}
