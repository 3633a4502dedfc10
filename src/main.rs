mod analyser;
mod ui;

use analyser::containers::AnalysisConfig;
use clap::{error::ErrorKind, ArgAction, Parser};
use log::LevelFilter;
use simple_logger::SimpleLogger;
use std::path::PathBuf;
use ui::output;

const USAGE: &str = "Usage: tlshs <hs.tsv> <frames.tsv> <server_port> <out.csv>";

/// tlshs measures TLS handshake latency and byte volume per TCP stream from tshark field exports
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Handshake records: tcp.stream, tls.handshake.type, frame.time_epoch, ip.src, tcp.srcport, ip.dst, tcp.dstport
    hs_file: PathBuf,

    /// Frames: tcp.stream, frame.time_epoch, ip.src, tcp.srcport, ip.dst, tcp.dstport, frame.len, tcp.len
    frames_file: PathBuf,

    /// TCP port of the TLS server
    #[arg(allow_negative_numbers = true)]
    server_port: i64,

    /// Per-stream CSV to write
    out_file: PathBuf,

    /// Also print per-stream rows and summary as formatted JSON
    #[arg(short = 'j', long, action = ArgAction::SetTrue)]
    json: bool,
}

fn main() -> anyhow::Result<()> {
    if let Err(e) = SimpleLogger::new().with_level(LevelFilter::Warn).env().init() {
        eprintln!("Logger already initialised: {e}");
    }

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => err.exit(),
            _ => {
                log::debug!("Rejected arguments: {err}");
                println!("{USAGE}");
                std::process::exit(1);
            }
        },
    };

    let config = AnalysisConfig { server_port: args.server_port };
    log::info!("Server port {}", config.server_port);

    let handshakes = analyser::utils::load_handshakes(&args.hs_file, &config)?;
    let ledger = analyser::utils::load_frames(&args.frames_file)?;
    let results = analyser::core::analyse(&handshakes, &ledger, &config);

    // ---- Output ----
    output::write_flow_table(&results, &args.out_file)?;

    let summary = analyser::stats::summarise(&results);
    output::print_results(&summary);

    if args.json {
        println!("{}", output::data_as_json(&results, &summary)?);
    }

    Ok(())
}
