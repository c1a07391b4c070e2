use clap::Parser;
use clap_derive::Parser;
use gobackn::byte_stream::WriterSink;
use gobackn::config::ArqConfig;
use gobackn::receiver::Receiver;
use gobackn::sequence_log::WriteSequenceLog;
use gobackn::transport::{DatagramTransport, LossyTransport, UdpTransport};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::BufWriter;
use tracing::{error, info, Level};

/// Receives a file from a Go-Back-N sender, typically through a network emulator
#[derive(Parser)]
struct Args {
    emulator_host: String,
    emulator_port: u16,
    local_port: u16,
    file: PathBuf,

    #[clap(long, default_value_t = 10)]
    window_size: u32,

    #[clap(long, default_value_t = 32)]
    seq_modulus: u32,

    /// ignored by the receiver, accepted for symmetry with the sender
    #[clap(long, default_value_t = 100)]
    retransmit_ms: u64,

    /// probability for dropping each outgoing ACK, for testing without an emulator
    #[clap(long, default_value_t = 0.0)]
    loss_rate: f64,

    /// directory for arrival.log
    #[clap(long)]
    seq_log_dir: Option<PathBuf>,

    /// how long to keep answering retransmitted END packets after the transfer
    #[clap(long, default_value_t = 0)]
    end_linger_ms: u64,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    if let Err(e) = receive_file(args).await {
        error!("transfer failed: {:#}", e);
        return Err(e);
    }
    Ok(())
}

async fn receive_file(args: Args) -> anyhow::Result<()> {
    let config = Arc::new(ArqConfig {
        window_size: args.window_size,
        seq_modulus: args.seq_modulus,
        retransmit_delay: Duration::from_millis(args.retransmit_ms),
        end_linger: Duration::from_millis(args.end_linger_ms),
        ..ArqConfig::default_config()
    });

    let local_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, args.local_port));
    let udp = UdpTransport::bind(local_addr, (args.emulator_host.as_str(), args.emulator_port)).await?;
    let transport: Arc<dyn DatagramTransport> = if args.loss_rate > 0.0 {
        Arc::new(LossyTransport::new(udp, args.loss_rate)?)
    }
    else {
        Arc::new(udp)
    };

    let mut receiver = Receiver::new(config, transport)?;
    if let Some(dir) = &args.seq_log_dir {
        receiver = receiver.with_sequence_log(Box::new(WriteSequenceLog::receiver_files(dir)?));
    }

    let file = File::create(&args.file).await?;
    let summary = receiver.run(&mut WriterSink::new(BufWriter::new(file))).await?;
    info!("received {} bytes into {:?}: {} duplicates, {} discarded", summary.delivered_bytes, args.file, summary.duplicates, summary.discarded);
    Ok(())
}
