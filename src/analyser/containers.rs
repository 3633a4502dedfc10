use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Capture-tool-assigned stream identifier (tshark's `tcp.stream`), compared as a string.
pub type FlowId = String;

/// Settings shared by every pass of the analysis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AnalysisConfig {
    /// TCP port the TLS server listens on. Decides which side of a flow is the client.
    pub server_port: i64,
}

/// TLS handshake message types we care about. Everything else only counts towards
/// the last-seen handshake timestamp.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandshakeType {
    ClientHello,
    ServerHello,
    Finished,
    Other(i64),
}

impl HandshakeType {
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => HandshakeType::ClientHello,
            2 => HandshakeType::ServerHello,
            20 => HandshakeType::Finished,
            other => HandshakeType::Other(other),
        }
    }
}

impl fmt::Display for HandshakeType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HandshakeType::Other(code) => write!(f, "Other({code})"),
            _ => write!(f, "{:?}", self),
        }
    }
}

/// One row of the handshake table.
#[derive(Clone, Debug, PartialEq)]
pub struct HandshakeEvent {
    pub flow: FlowId,
    pub hs_type: HandshakeType,
    pub timestamp: f64,
    pub src_port: Option<i64>,
    pub dst_port: Option<i64>,
}

/// One row of the frame table, minus the flow id it is filed under.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameRecord {
    pub timestamp: f64,
    pub src_port: i64,
    pub dst_port: i64,
    pub frame_len: i64,
    pub tcp_len: i64,   // -1 when tshark left tcp.len empty
}

impl FrameRecord {
    /// Bytes this frame contributes: TCP payload if known, whole frame otherwise.
    pub fn payload_len(&self) -> i64 {
        if self.tcp_len >= 0 {
            self.tcp_len
        } else {
            self.frame_len
        }
    }
}

/// Handshake reference points of a single flow. Every field stays `None` until observed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FlowTimings {
    /// Earliest ClientHello.
    pub ch: Option<f64>,
    /// Earliest ServerHello.
    pub sh: Option<f64>,
    /// Earliest Finished sent from the client port.
    pub fin_client: Option<f64>,
    /// Latest handshake record of any type.
    pub last_hs: Option<f64>,
}

impl FlowTimings {
    /// End of the handshake window: client Finished when seen, else the last handshake record.
    pub fn end(&self) -> Option<f64> {
        self.fin_client.or(self.last_hs)
    }
}

/// Per-flow chronological frame sequences.
#[derive(Debug, Default)]
pub struct FrameLedger {
    flows: HashMap<FlowId, Vec<FrameRecord>>,
}

impl FrameLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, flow: FlowId, frame: FrameRecord) {
        self.flows.entry(flow).or_insert_with(Vec::new).push(frame);
    }

    /// Puts every flow in timestamp order. The sort is stable, so frames sharing a
    /// timestamp keep their table order.
    pub fn sort(&mut self) {
        for frames in self.flows.values_mut() {
            frames.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        }
    }

    pub fn frames(&self, flow: &str) -> Option<&[FrameRecord]> {
        self.flows.get(flow).map(Vec::as_slice)
    }

    pub fn flow_count(&self) -> usize {
        self.flows.len()
    }
}

/// Final row for one flow.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FlowResult {
    #[serde(rename = "tcp_stream")]
    pub flow: FlowId,
    #[serde(rename = "CH_to_SH_ms")]
    pub ch_to_sh_ms: f64,
    #[serde(rename = "CH_to_END_ms")]
    pub ch_to_end_ms: f64,
    pub bytes_c2s: i64,
    pub bytes_s2c: i64,
}

/// Why a table row was thrown away.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RowError {
    #[error("expected at least {needed} fields, found {found}")]
    TooFewFields { needed: usize, found: usize },
    #[error("column {column} is not a number: {value:?}")]
    BadNumber { column: &'static str, value: String },
}

impl RowError {
    pub fn bad_number(column: &'static str, value: &str) -> Self {
        RowError::BadNumber {
            column,
            value: value.to_string(),
        }
    }
}
