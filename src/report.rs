//! Plain-text rendering of a snapshot for terminals and logs.
//!
//! Shows one status line per section, a table of provider health, and a
//! sparkline per trended key.

use std::fmt::Write;

use hudwatch_sdk::format::format_ms;
use hudwatch_sdk::{section_error, Snapshot, HEALTH_SECTION};
use serde::Deserialize;

/// Sparkline characters (8 levels of height).
const SPARKLINE_CHARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Samples shown per sparkline.
const SPARKLINE_WIDTH: usize = 8;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HealthRow {
    id: String,
    last_time_ms: f64,
    avg_time_ms: f64,
    build_count: u64,
    status: String,
    last_error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HealthView {
    providers: Vec<HealthRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrendView {
    history: std::collections::BTreeMap<String, Vec<f64>>,
    order: Vec<String>,
    top_n: usize,
}

/// Render `snapshot` as text, drawing trend lines from the section
/// `trend_section`.
pub fn render(snapshot: &Snapshot, trend_section: &str) -> String {
    let mut out = String::new();
    let meta = &snapshot.meta;

    let _ = write!(out, "build #{} at {}", meta.build, meta.iso_time);
    if !meta.version.is_empty() {
        let _ = write!(out, " (v{})", meta.version);
    }
    if meta.paused {
        out.push_str(" [paused]");
    }
    out.push('\n');

    for (id, value) in snapshot.iter() {
        match section_error(value) {
            Some(message) => {
                let _ = writeln!(out, "  {:<20} error: {}", id, message);
            }
            None => {
                let _ = writeln!(out, "  {:<20} ok", id);
            }
        }
    }

    if let Some(health) = parse_section::<HealthView>(snapshot, HEALTH_SECTION) {
        render_health(&mut out, &health);
    }

    if let Some(trend) = parse_section::<TrendView>(snapshot, trend_section) {
        render_trend(&mut out, trend_section, &trend);
    }

    out
}

fn parse_section<T: for<'de> Deserialize<'de>>(snapshot: &Snapshot, id: &str) -> Option<T> {
    let value = snapshot.section(id)?;
    if section_error(value).is_some() {
        return None;
    }
    serde_json::from_value(value.clone()).ok()
}

fn render_health(out: &mut String, health: &HealthView) {
    if health.providers.is_empty() {
        return;
    }

    out.push('\n');
    let _ = writeln!(
        out,
        "  {:<20} {:>7} {:>10} {:>10}  {}",
        "provider", "builds", "last", "avg", "status"
    );
    for row in &health.providers {
        let _ = write!(
            out,
            "  {:<20} {:>7} {:>10} {:>10}  {}",
            row.id,
            row.build_count,
            format_ms(row.last_time_ms),
            format_ms(row.avg_time_ms),
            row.status
        );
        if let Some(error) = &row.last_error {
            let _ = write!(out, " ({})", error);
        }
        out.push('\n');
    }
}

fn render_trend(out: &mut String, id: &str, trend: &TrendView) {
    if trend.order.is_empty() {
        return;
    }

    out.push('\n');
    let _ = writeln!(out, "  {} (top {})", id, trend.top_n);
    for key in trend.order.iter().take(trend.top_n) {
        let samples = trend.history.get(key).map(Vec::as_slice).unwrap_or(&[]);
        let latest = samples.last().copied().unwrap_or_default();
        let _ = writeln!(
            out,
            "  {:<20} {} {}",
            key,
            render_sparkline(samples),
            format_value(latest)
        );
    }
}

/// Scale the last few samples onto the sparkline levels, relative to their
/// own maximum.
fn render_sparkline(samples: &[f64]) -> String {
    if samples.is_empty() {
        return " ".repeat(SPARKLINE_WIDTH);
    }

    let start = samples.len().saturating_sub(SPARKLINE_WIDTH);
    let window = &samples[start..];
    let max = window.iter().copied().fold(0.0_f64, f64::max);

    window
        .iter()
        .map(|&v| {
            let level = if max > 0.0 {
                ((v.max(0.0) / max) * 7.0).round() as usize
            } else {
                0
            };
            SPARKLINE_CHARS[level.min(7)]
        })
        .collect()
}

fn format_value(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{:.2}", v)
    }
}

/// Serialize a snapshot for `--once` output.
pub fn to_json(snapshot: &Snapshot) -> serde_json::Result<String> {
    serde_json::to_string_pretty(snapshot)
}
