use super::containers::FrameRecord;

/// Which way a frame travelled, relative to the resolved client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

/// Returns the source port of the first frame, in chronological order, sent to the server port.
pub fn scan_for_client_port(frames: &[FrameRecord], server_port: i64) -> Option<i64> {
    frames
        .iter()
        .find(|frame| frame.dst_port == server_port)
        .map(|frame| frame.src_port)
}

/// Resolves the client port of a flow.
///
/// The guess taken while reading the handshake table wins. Only without one do we
/// look at the flow's frames. `None` means the direction is unknown.
pub fn resolve_client_port(guess: Option<i64>, frames: Option<&[FrameRecord]>, server_port: i64) -> Option<i64> {
    guess.or_else(|| {
        let port = frames.and_then(|frames| scan_for_client_port(frames, server_port));
        if let Some(port) = port {
            log::debug!("Client port {port} taken from frame table");
        }
        port
    })
}

/// Classifies a frame by its ports. Frames matching neither pairing are `None`.
pub fn classify(frame: &FrameRecord, server_port: i64, client_port: i64) -> Option<Direction> {
    if frame.dst_port == server_port && frame.src_port == client_port {
        Some(Direction::ClientToServer)
    } else if frame.src_port == server_port && frame.dst_port == client_port {
        Some(Direction::ServerToClient)
    } else {
        None
    }
}
