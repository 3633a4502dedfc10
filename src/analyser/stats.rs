//! Distribution statistics over the per-flow results.
use serde::Serialize;
use super::containers::FlowResult;

fn sorted(values: &[f64]) -> Vec<f64> {
    let mut v = values.to_vec();
    v.sort_by(|a, b| a.total_cmp(b));
    v
}

/// Middle value for odd lengths, mean of the two middle values for even lengths.
/// `None` for an empty slice.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let v = sorted(values);
    let mid = v.len() / 2;
    if v.len() % 2 == 1 {
        Some(v[mid])
    } else {
        Some((v[mid - 1] + v[mid]) / 2.0)
    }
}

/// Linear-interpolation percentile, `p` in `[0, 1]`. `None` for an empty slice.
///
/// With `k = (n - 1) * p`, interpolates between the order statistics at `floor(k)` and
/// `min(floor(k) + 1, n - 1)`.
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let v = sorted(values);
    let k = (v.len() - 1) as f64 * p;
    let f = k as usize;
    let c = (f + 1).min(v.len() - 1);
    if f == c {
        return Some(v[f]);
    }
    Some(v[f] + (v[c] - v[f]) * (k - f as f64))
}

/// Median and quartile spread of a latency metric, in milliseconds.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LatencySummary {
    pub median: Option<f64>,
    pub p25: Option<f64>,
    pub p75: Option<f64>,
    pub p95: Option<f64>,
}

impl LatencySummary {
    pub fn from_samples(values: &[f64]) -> Self {
        Self {
            median: median(values),
            p25: percentile(values, 0.25),
            p75: percentile(values, 0.75),
            p95: percentile(values, 0.95),
        }
    }
}

/// Median and tail of a byte-volume metric.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VolumeSummary {
    pub median: Option<f64>,
    pub p95: Option<f64>,
}

impl VolumeSummary {
    pub fn from_samples(values: &[f64]) -> Self {
        Self {
            median: median(values),
            p95: percentile(values, 0.95),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FlowStatistics {
    pub ch_to_sh_ms: LatencySummary,
    pub ch_to_end_ms: LatencySummary,
    pub bytes_c2s: VolumeSummary,
    pub bytes_s2c: VolumeSummary,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Summary {
    pub streams: usize,
    /// Absent when no stream qualified.
    pub statistics: Option<FlowStatistics>,
}

/// Summarises the per-flow rows. Statistics are only computed when there is at least one row.
pub fn summarise(results: &[FlowResult]) -> Summary {
    if results.is_empty() {
        return Summary { streams: 0, statistics: None };
    }

    let column = |f: fn(&FlowResult) -> f64| results.iter().map(f).collect::<Vec<f64>>();

    Summary {
        streams: results.len(),
        statistics: Some(FlowStatistics {
            ch_to_sh_ms: LatencySummary::from_samples(&column(|r| r.ch_to_sh_ms)),
            ch_to_end_ms: LatencySummary::from_samples(&column(|r| r.ch_to_end_ms)),
            bytes_c2s: VolumeSummary::from_samples(&column(|r| r.bytes_c2s as f64)),
            bytes_s2c: VolumeSummary::from_samples(&column(|r| r.bytes_s2c as f64)),
        }),
    }
}
