use std::collections::HashMap;
use super::containers::{AnalysisConfig, FlowId, FlowResult, FlowTimings, FrameLedger, FrameRecord, HandshakeEvent, HandshakeType};
use super::scan::{self, Direction};

/// Handshake timings and client-port guesses for every flow in the handshake table.
#[derive(Debug, Default)]
pub struct HandshakeLog {
    timings: HashMap<FlowId, FlowTimings>,
    client_ports: HashMap<FlowId, i64>,
    // Flows in the order their first ClientHello row appeared
    order: Vec<FlowId>,
}

fn keep_earliest(slot: &mut Option<f64>, timestamp: f64) {
    if slot.map_or(true, |current| timestamp < current) {
        *slot = Some(timestamp);
    }
}

fn keep_latest(slot: &mut Option<f64>, timestamp: f64) {
    if slot.map_or(true, |current| timestamp > current) {
        *slot = Some(timestamp);
    }
}

impl HandshakeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one handshake record into the log.
    ///
    /// The client port of a flow is the source port of the first record, in table order,
    /// that is addressed to the server port. That is table order, not capture time: an
    /// unsorted handshake table can yield a different guess than a sorted one.
    /// The guess is taken before the record itself is classified, so a Finished record
    /// can both establish the client port and count as the client's Finished.
    pub fn ingest(&mut self, event: HandshakeEvent, server_port: i64) {
        if let (Some(src), Some(dst)) = (event.src_port, event.dst_port) {
            if dst == server_port && !self.client_ports.contains_key(&event.flow) {
                log::trace!("Stream {}: client port {src} (from {})", event.flow, event.hs_type);
                self.client_ports.insert(event.flow.clone(), src);
            }
        }

        let ts = event.timestamp;
        let timings = self.timings.entry(event.flow.clone()).or_default();

        match event.hs_type {
            HandshakeType::ClientHello => {
                if timings.ch.is_none() {
                    self.order.push(event.flow.clone());
                }
                keep_earliest(&mut timings.ch, ts);
            }
            HandshakeType::ServerHello => keep_earliest(&mut timings.sh, ts),
            HandshakeType::Finished => {
                // Only the client's Finished closes the window; the server's is ignored here.
                let guess = self.client_ports.get(&event.flow);
                if event.src_port.is_some() && event.src_port == guess.copied() {
                    keep_earliest(&mut timings.fin_client, ts);
                }
            }
            HandshakeType::Other(_) => {}
        }

        keep_latest(&mut timings.last_hs, ts);
    }

    pub fn timings(&self, flow: &str) -> Option<&FlowTimings> {
        self.timings.get(flow)
    }

    pub fn client_port(&self, flow: &str) -> Option<i64> {
        self.client_ports.get(flow).copied()
    }

    /// Flows with a ClientHello, in first-seen order.
    pub fn flows(&self) -> impl Iterator<Item = &FlowId> {
        self.order.iter()
    }

    /// Number of flows with a ClientHello.
    pub fn flow_count(&self) -> usize {
        self.order.len()
    }
}

/// Sums the payload of every frame in `[start, end]`, split by direction.
/// Returns `(client_to_server, server_to_client)`. Sums saturate at `i64::MAX`.
fn sum_window(
    frames: &[FrameRecord],
    start: f64,
    end: f64,
    server_port: i64,
    client_port: i64,
) -> (i64, i64) {
    let mut c2s: i64 = 0;
    let mut s2c: i64 = 0;

    for frame in frames {
        if frame.timestamp < start || frame.timestamp > end {
            continue;
        }
        match scan::classify(frame, server_port, client_port) {
            Some(Direction::ClientToServer) => c2s = c2s.saturating_add(frame.payload_len()),
            Some(Direction::ServerToClient) => s2c = s2c.saturating_add(frame.payload_len()),
            None => {}
        }
    }

    (c2s, s2c)
}

/// Correlates the handshake log with the frame ledger and produces one row per qualifying flow.
///
/// A flow qualifies when it has both a ClientHello and a ServerHello and an end reference
/// (client Finished, else the last handshake record). Flows whose client port cannot be
/// resolved are still reported, with zero byte counts.
pub fn analyse(handshakes: &HandshakeLog, ledger: &FrameLedger, config: &AnalysisConfig) -> Vec<FlowResult> {
    log::info!("Starting analysis.");
    let mut results = Vec::new();

    for flow in handshakes.flows() {
        let Some(timings) = handshakes.timings(flow) else {
            continue;
        };
        let (Some(ch), Some(sh)) = (timings.ch, timings.sh) else {
            log::debug!("Stream {flow}: no ServerHello, dropped");
            continue;
        };
        let Some(end) = timings.end() else {
            log::debug!("Stream {flow}: no handshake end, dropped");
            continue;
        };

        let frames = ledger.frames(flow);
        let client_port = scan::resolve_client_port(handshakes.client_port(flow), frames, config.server_port);

        let (bytes_c2s, bytes_s2c) = match (frames, client_port) {
            (Some(frames), Some(client_port)) => sum_window(frames, ch, end, config.server_port, client_port),
            _ => {
                log::debug!("Stream {flow}: direction unknown, byte counts left at zero");
                (0, 0)
            }
        };

        results.push(FlowResult {
            flow: flow.clone(),
            ch_to_sh_ms: (sh - ch) * 1000.0,
            ch_to_end_ms: (end - ch) * 1000.0,
            bytes_c2s,
            bytes_s2c,
        });
    }

    log::info!("{} of {} streams produced a result", results.len(), handshakes.flow_count());
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVER: i64 = 443;
    const CLIENT: i64 = 51000;

    fn event(flow: &str, code: i64, timestamp: f64, src: Option<i64>, dst: Option<i64>) -> HandshakeEvent {
        HandshakeEvent {
            flow: flow.to_string(),
            hs_type: HandshakeType::from_code(code),
            timestamp,
            src_port: src,
            dst_port: dst,
        }
    }

    fn c2s(flow: &str, code: i64, timestamp: f64) -> HandshakeEvent {
        event(flow, code, timestamp, Some(CLIENT), Some(SERVER))
    }

    fn s2c(flow: &str, code: i64, timestamp: f64) -> HandshakeEvent {
        event(flow, code, timestamp, Some(SERVER), Some(CLIENT))
    }

    fn frame(timestamp: f64, src_port: i64, dst_port: i64, tcp_len: i64) -> FrameRecord {
        FrameRecord {
            timestamp,
            src_port,
            dst_port,
            frame_len: tcp_len + 66,
            tcp_len,
        }
    }

    fn log_of(events: Vec<HandshakeEvent>) -> HandshakeLog {
        let mut log = HandshakeLog::new();
        for e in events {
            log.ingest(e, SERVER);
        }
        log
    }

    fn config() -> AnalysisConfig {
        AnalysisConfig { server_port: SERVER }
    }

    #[test]
    fn earliest_hello_wins_regardless_of_order() {
        let log = log_of(vec![
            c2s("1", 1, 5.0),
            c2s("1", 1, 3.0),
            s2c("1", 2, 6.0),
            s2c("1", 2, 4.0),
            c2s("1", 1, 4.5),
        ]);
        let timings = log.timings("1").unwrap();
        assert_eq!(timings.ch, Some(3.0));
        assert_eq!(timings.sh, Some(4.0));
        assert_eq!(timings.last_hs, Some(6.0));
        assert_eq!(log.flow_count(), 1);
    }

    #[test]
    fn client_port_guess_follows_table_order() {
        // A later-timestamped record listed first still decides the client port.
        let log = log_of(vec![
            event("1", 11, 9.0, Some(60000), Some(SERVER)),
            c2s("1", 1, 1.0),
        ]);
        assert_eq!(log.client_port("1"), Some(60000));
    }

    #[test]
    fn guess_needs_both_ports() {
        let log = log_of(vec![event("1", 1, 1.0, None, Some(SERVER)), event("1", 2, 1.1, Some(CLIENT), None)]);
        assert_eq!(log.client_port("1"), None);
    }

    #[test]
    fn finished_only_from_client() {
        let log = log_of(vec![
            c2s("1", 1, 1.0),
            s2c("1", 2, 1.1),
            s2c("1", 20, 1.2),
            c2s("1", 20, 1.4),
            c2s("1", 20, 1.3),
        ]);
        let timings = log.timings("1").unwrap();
        assert_eq!(timings.fin_client, Some(1.3));
        assert_eq!(timings.last_hs, Some(1.4));
    }

    #[test]
    fn finished_can_establish_client_port() {
        let log = log_of(vec![s2c("1", 2, 1.1), c2s("1", 20, 1.3)]);
        assert_eq!(log.client_port("1"), Some(CLIENT));
        assert_eq!(log.timings("1").unwrap().fin_client, Some(1.3));
    }

    #[test]
    fn finished_before_any_guess_is_not_client() {
        let log = log_of(vec![event("1", 20, 1.3, Some(CLIENT), None), c2s("1", 1, 1.0)]);
        assert_eq!(log.timings("1").unwrap().fin_client, None);
    }

    #[test]
    fn flows_keep_first_clienthello_order() {
        let log = log_of(vec![c2s("9", 1, 1.0), s2c("2", 2, 1.0), c2s("2", 1, 2.0), c2s("9", 1, 0.5)]);
        let order: Vec<&str> = log.flows().map(String::as_str).collect();
        assert_eq!(order, vec!["9", "2"]);
    }

    #[test]
    fn scenario_full_flow() {
        let log = log_of(vec![c2s("5", 1, 0.000), s2c("5", 2, 0.010), c2s("5", 20, 0.050)]);
        let mut ledger = FrameLedger::new();
        ledger.record("5".into(), frame(0.000, CLIENT, SERVER, 40));
        ledger.record("5".into(), frame(0.010, SERVER, CLIENT, 200));
        ledger.record("5".into(), frame(0.050, CLIENT, SERVER, 60));
        // outside the window
        ledger.record("5".into(), frame(0.060, CLIENT, SERVER, 1000));
        // unrelated ports
        ledger.record("5".into(), frame(0.020, 1234, 5678, 1000));
        ledger.sort();

        let results = analyse(&log, &ledger, &config());
        assert_eq!(results.len(), 1);
        let row = &results[0];
        assert_eq!(row.flow, "5");
        assert!((row.ch_to_sh_ms - 10.0).abs() < 1e-9);
        assert!((row.ch_to_end_ms - 50.0).abs() < 1e-9);
        assert_eq!(row.bytes_c2s, 100);
        assert_eq!(row.bytes_s2c, 200);
    }

    #[test]
    fn end_defaults_to_last_handshake_record() {
        let log = log_of(vec![c2s("1", 1, 1.0), s2c("1", 2, 1.25)]);
        let results = analyse(&log, &FrameLedger::new(), &config());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].ch_to_end_ms, results[0].ch_to_sh_ms);
        assert_eq!(results[0].ch_to_sh_ms, 250.0);
    }

    #[test]
    fn end_may_precede_clienthello() {
        let log = log_of(vec![c2s("1", 20, 0.5), c2s("1", 1, 1.0), s2c("1", 2, 1.1)]);
        let results = analyse(&log, &FrameLedger::new(), &config());
        assert_eq!(results[0].ch_to_end_ms, -500.0);
    }

    #[test]
    fn missing_serverhello_drops_flow() {
        let log = log_of(vec![c2s("1", 1, 1.0), c2s("1", 20, 1.1), s2c("2", 2, 1.0)]);
        assert!(analyse(&log, &FrameLedger::new(), &config()).is_empty());
    }

    #[test]
    fn unresolved_direction_reports_zero_bytes() {
        let log = log_of(vec![event("1", 1, 1.0, None, None), event("1", 2, 1.1, None, None)]);
        let mut ledger = FrameLedger::new();
        ledger.record("1".into(), frame(1.05, 50000, 8443, 500));
        ledger.record("1".into(), frame(1.06, 8443, 50000, 500));
        ledger.sort();

        let results = analyse(&log, &ledger, &config());
        assert_eq!(results.len(), 1);
        assert_eq!((results[0].bytes_c2s, results[0].bytes_s2c), (0, 0));
    }

    #[test]
    fn huge_frames_saturate_instead_of_overflowing() {
        let log = log_of(vec![c2s("1", 1, 1.0), s2c("1", 2, 1.1)]);
        let mut ledger = FrameLedger::new();
        for ts in [1.02, 1.03] {
            ledger.record(
                "1".into(),
                FrameRecord {
                    timestamp: ts,
                    src_port: CLIENT,
                    dst_port: SERVER,
                    frame_len: i64::MAX,
                    tcp_len: -1,
                },
            );
        }
        ledger.record("1".into(), frame(1.04, SERVER, CLIENT, 10));
        ledger.sort();

        let results = analyse(&log, &ledger, &config());
        assert_eq!(results[0].bytes_c2s, i64::MAX);
        assert_eq!(results[0].bytes_s2c, 10);
    }

    #[test]
    fn direction_falls_back_to_frames() {
        let log = log_of(vec![event("1", 1, 1.0, None, None), event("1", 2, 1.1, None, None)]);
        let mut ledger = FrameLedger::new();
        // Earliest frame to the server decides, even though it is listed second.
        ledger.record("1".into(), frame(1.02, 40001, SERVER, 70));
        ledger.record("1".into(), frame(1.01, 40000, SERVER, 30));
        ledger.record("1".into(), frame(1.03, SERVER, 40000, 90));
        ledger.sort();

        let results = analyse(&log, &ledger, &config());
        assert_eq!(results[0].bytes_c2s, 30);
        assert_eq!(results[0].bytes_s2c, 90);
    }
}
