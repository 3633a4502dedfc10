use crate::analyser::containers::FlowResult;
use crate::analyser::stats::{LatencySummary, Summary, VolumeSummary};
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

pub const CSV_HEADER: &str = "tcp_stream,CH_to_SH_ms,CH_to_END_ms,bytes_c2s,bytes_s2c";
const CSV_EOL: &str = "\r\n";

/// Quotes a CSV field if it contains a delimiter, quote, or line break.
fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Renders the per-stream table. Millisecond columns carry exactly 6 decimals.
pub fn flows_as_csv(results: &[FlowResult]) -> String {
    let mut out = String::new();
    out.push_str(CSV_HEADER);
    out.push_str(CSV_EOL);

    for r in results {
        out.push_str(&format!(
            "{},{:.6},{:.6},{},{}",
            escape_field(&r.flow),
            r.ch_to_sh_ms,
            r.ch_to_end_ms,
            r.bytes_c2s,
            r.bytes_s2c
        ));
        out.push_str(CSV_EOL);
    }

    out
}

/// Writes `data` to `path` in full, truncating any existing file.
pub fn data_to_file(data: &str, path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    writer
        .write_all(data.as_bytes())
        .and_then(|_| writer.flush())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

pub fn write_flow_table(results: &[FlowResult], path: &Path) -> Result<()> {
    log::info!("Writing {} rows to {}", results.len(), path.display());
    data_to_file(&flows_as_csv(results), path)
}

/// Three decimals, or `NA` when the statistic could not be computed.
pub fn fmt_stat(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:.3}"),
        None => String::from("NA"),
    }
}

fn latency_line(label: &str, s: &LatencySummary) -> String {
    format!(
        "  {label}: median={}, p25={}, p75={}, p95={}",
        fmt_stat(s.median),
        fmt_stat(s.p25),
        fmt_stat(s.p75),
        fmt_stat(s.p95)
    )
}

fn volume_line(label: &str, s: &VolumeSummary) -> String {
    format!("  {label}: median={}, p95={}", fmt_stat(s.median), fmt_stat(s.p95))
}

/// The human-readable report. Stops after the stream count when nothing qualified.
pub fn render_results(summary: &Summary) -> String {
    let mut lines = vec![String::from("SUMMARY"), format!("  Streams: {}", summary.streams)];

    if let Some(stats) = &summary.statistics {
        lines.push(latency_line("CH\u{2192}SH (ms)", &stats.ch_to_sh_ms));
        lines.push(latency_line("CH\u{2192}END (ms)", &stats.ch_to_end_ms));
        lines.push(volume_line("Bytes/HS C\u{2192}S", &stats.bytes_c2s));
        lines.push(volume_line("Bytes/HS S\u{2192}C", &stats.bytes_s2c));
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

pub fn print_results(summary: &Summary) {
    print!("{}", render_results(summary));
}

#[derive(Serialize)]
struct Report<'a> {
    streams: &'a [FlowResult],
    summary: &'a Summary,
}

/// Per-stream rows plus the summary, as formatted JSON.
pub fn data_as_json(results: &[FlowResult], summary: &Summary) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&Report { streams: results, summary })
}
