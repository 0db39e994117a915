use crate::aggregate::{compute_statistics, detect_changes, ChangeEvent, Statistics};
use crate::pipeline::Prediction;
use serde::Serialize;
use std::fmt::Write as _;

/// Everything one analysis produces, in presentation field names.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct AnalysisReport {
    pub results: Vec<Prediction>,
    pub emotion_changes: Vec<ChangeEvent>,
    pub statistics: Statistics,
}

impl AnalysisReport {
    pub fn from_predictions(results: Vec<Prediction>) -> Self {
        let emotion_changes = detect_changes(&results);
        let statistics = compute_statistics(&results);
        Self {
            results,
            emotion_changes,
            statistics,
        }
    }

    /// Plain-text timeline for terminals.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Timeline:");
        for p in &self.results {
            let _ = writeln!(
                out,
                "  {} - {}  {:<10} {:>5.1}%",
                format_timestamp(p.start_time),
                format_timestamp(p.end_time),
                p.emotion,
                p.confidence * 100.0
            );
        }

        if !self.emotion_changes.is_empty() {
            let _ = writeln!(out, "\nChanges:");
            for c in &self.emotion_changes {
                let _ = writeln!(
                    out,
                    "  {}  {} -> {} ({:.1}%)",
                    format_timestamp(c.timestamp),
                    c.from_emotion,
                    c.to_emotion,
                    c.confidence * 100.0
                );
            }
        }

        let s = &self.statistics;
        let dominant = s
            .dominant_emotion
            .map(|e| e.to_string())
            .unwrap_or_else(|| "Unknown".to_string());
        let _ = writeln!(out, "\nDominant emotion: {dominant}");
        let _ = writeln!(out, "Total duration: {:.2}s", s.total_duration);
        for (e, d) in s.emotion_durations.iter() {
            let pct = s.emotion_percentages.get(e).copied().unwrap_or(0.0);
            let count = s.emotion_counts.get(e).copied().unwrap_or(0);
            let _ = writeln!(out, "  {:<10} {:>7.2}s {:>6.2}% ({count} chunks)", e, d, pct);
        }
        out
    }
}

/// `MM:SS`, truncating fractional seconds. Minutes keep counting past 59.
pub fn format_timestamp(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    };
    format!("{:02}:{:02}", total / 60, total % 60)
}
