//! Contains utilities for reading the tab-separated tables tshark produces with `-T fields`.
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use super::containers::{AnalysisConfig, FlowId, FrameLedger, FrameRecord, HandshakeEvent, HandshakeType, RowError};
use super::core::HandshakeLog;

/// Handshake table: tcp.stream, tls.handshake.type, frame.time_epoch are required.
pub const HS_MIN_FIELDS: usize = 3;
/// Frame table: everything up to frame.len is required, tcp.len is optional.
pub const FRAME_MIN_FIELDS: usize = 7;

// Column positions, matching the tshark field lists used to export the tables.
const HS_TYPE: usize = 1;
const HS_TIME: usize = 2;
const HS_SRCPORT: usize = 4;
const HS_DSTPORT: usize = 6;

const FRAME_TIME: usize = 1;
const FRAME_SRCPORT: usize = 3;
const FRAME_DSTPORT: usize = 5;
const FRAME_LEN: usize = 6;
const FRAME_TCP_LEN: usize = 7;

/// Parses a base-10 integer field. Empty or malformed fields are absent.
pub fn parse_int(field: &str) -> Option<i64> {
    field.trim().parse::<i64>().ok()
}

/// Parses a float field (seconds since epoch). Empty or malformed fields are absent.
pub fn parse_float(field: &str) -> Option<f64> {
    field.trim().parse::<f64>().ok()
}

/// Splits one record into tab-separated fields, honouring `"` quoting the way tshark's
/// `-E quote=d` writes it: a field opening with `"` runs to its closing quote, may hold tabs,
/// and `""` inside it stands for one `"`. Quotes in the middle of a bare field are literal.
/// An unterminated quoted field ends at the end of the record.
fn split_row(line: &str) -> Vec<String> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut chars = line.chars().peekable();
    let mut at_start = true;
    let mut quoted = false;

    while let Some(c) = chars.next() {
        if quoted {
            if c != '"' {
                field.push(c);
            } else if chars.peek() == Some(&'"') {
                chars.next();
                field.push('"');
            } else {
                quoted = false;
            }
            continue;
        }

        match c {
            '\t' => {
                fields.push(std::mem::take(&mut field));
                at_start = true;
            }
            '"' if at_start => {
                quoted = true;
                at_start = false;
            }
            _ => {
                field.push(c);
                at_start = false;
            }
        }
    }

    fields.push(field);
    fields
}

/// Turns one line of the handshake table into a [HandshakeEvent].
///
/// Ports are optional; a missing or malformed port column just leaves that port unknown.
pub fn parse_handshake_row(line: &str) -> Result<HandshakeEvent, RowError> {
    let fields = split_row(line);
    if fields.len() < HS_MIN_FIELDS {
        return Err(RowError::TooFewFields { needed: HS_MIN_FIELDS, found: fields.len() });
    }

    let code = parse_int(&fields[HS_TYPE])
        .ok_or_else(|| RowError::bad_number("tls.handshake.type", &fields[HS_TYPE]))?;
    let timestamp = parse_float(&fields[HS_TIME])
        .ok_or_else(|| RowError::bad_number("frame.time_epoch", &fields[HS_TIME]))?;

    Ok(HandshakeEvent {
        flow: fields[0].clone(),
        hs_type: HandshakeType::from_code(code),
        timestamp,
        src_port: fields.get(HS_SRCPORT).and_then(|f| parse_int(f)),
        dst_port: fields.get(HS_DSTPORT).and_then(|f| parse_int(f)),
    })
}

/// Turns one line of the frame table into its flow id and [FrameRecord].
pub fn parse_frame_row(line: &str) -> Result<(FlowId, FrameRecord), RowError> {
    let fields = split_row(line);
    if fields.len() < FRAME_MIN_FIELDS {
        return Err(RowError::TooFewFields { needed: FRAME_MIN_FIELDS, found: fields.len() });
    }

    let timestamp = parse_float(&fields[FRAME_TIME])
        .ok_or_else(|| RowError::bad_number("frame.time_epoch", &fields[FRAME_TIME]))?;
    let src_port = parse_int(&fields[FRAME_SRCPORT])
        .ok_or_else(|| RowError::bad_number("tcp.srcport", &fields[FRAME_SRCPORT]))?;
    let dst_port = parse_int(&fields[FRAME_DSTPORT])
        .ok_or_else(|| RowError::bad_number("tcp.dstport", &fields[FRAME_DSTPORT]))?;
    let frame_len = parse_int(&fields[FRAME_LEN])
        .ok_or_else(|| RowError::bad_number("frame.len", &fields[FRAME_LEN]))?;
    // tshark leaves tcp.len empty on some frames
    let tcp_len = fields.get(FRAME_TCP_LEN).and_then(|f| parse_int(f)).unwrap_or(-1);

    Ok((
        fields[0].clone(),
        FrameRecord {
            timestamp,
            src_port,
            dst_port,
            frame_len,
            tcp_len,
        },
    ))
}

/// Calls `f` with every record of the file at `path`, then closes it.
///
/// Records end at `\n`, `\r\n`, or a lone `\r`. Bytes that are not valid UTF-8 are
/// decoded lossily. `f` also gets the 1-based line the record sits on.
fn for_each_line<F: FnMut(usize, &str)>(path: &Path, mut f: F) -> Result<usize> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let reader = BufReader::new(file);
    let mut count = 0;

    for (index, line) in reader.split(b'\n').enumerate() {
        let line = line.with_context(|| format!("Failed reading {}", path.display()))?;
        let line = String::from_utf8_lossy(&line);
        for record in line.strip_suffix('\r').unwrap_or(&line).split('\r') {
            f(index + 1, record);
            count += 1;
        }
    }

    Ok(count)
}

/// Loads the handshake table and folds every valid row into a [HandshakeLog].
///
/// Malformed rows are skipped. The table has no header; every line is data.
pub fn load_handshakes(path: &Path, config: &AnalysisConfig) -> Result<HandshakeLog> {
    log::info!("Loading handshake records from {}", path.display());
    let mut handshakes = HandshakeLog::new();
    let mut skipped = 0;

    let total = for_each_line(path, |lineno, line| match parse_handshake_row(line) {
        Ok(event) => handshakes.ingest(event, config.server_port),
        Err(e) => {
            log::trace!("{}:{lineno}: skipping handshake row: {e}", path.display());
            skipped += 1;
        }
    })?;

    log::info!("Read {total} handshake rows ({skipped} skipped), {} streams with a ClientHello", handshakes.flow_count());
    Ok(handshakes)
}

/// Loads the frame table into a [FrameLedger], with each flow sorted chronologically.
pub fn load_frames(path: &Path) -> Result<FrameLedger> {
    log::info!("Loading frames from {}", path.display());
    let mut ledger = FrameLedger::new();
    let mut skipped = 0;

    let total = for_each_line(path, |lineno, line| match parse_frame_row(line) {
        Ok((flow, frame)) => ledger.record(flow, frame),
        Err(e) => {
            log::trace!("{}:{lineno}: skipping frame row: {e}", path.display());
            skipped += 1;
        }
    })?;

    ledger.sort();
    log::info!("Read {total} frame rows ({skipped} skipped) across {} streams", ledger.flow_count());
    Ok(ledger)
}
