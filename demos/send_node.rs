use clap::Parser;
use clap_derive::Parser;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{error, info, Level};
use vdes_rtt::sentence::tdb::reassembled_sentence;
use vdes_rtt::session::{run_send_session, SessionConfig};
use vdes_rtt::timing::{format_utc, format_utc_millis};
use vdes_rtt::udp::config::{MulticastReceiveConfig, SendConfig};
use vdes_rtt::udp::multicast::MulticastSocket;
use vdes_rtt::util::clock::SystemUtcClock;
use vdes_rtt::util::stop_signal::StopSignal;

/// Sends a fragment sentence repeatedly for one measurement period, paced by the acknowledgements
///  received from a multicast group
#[derive(Parser)]
struct Args {
    /// e.g. 192.168.0.10:60002
    target_address: SocketAddr,
    /// e.g. 0.0.0.0:60003
    ack_bind_address: SocketAddr,
    ack_multicast_group: Ipv4Addr,

    #[clap(long, default_value_t = Ipv4Addr::UNSPECIFIED)]
    interface: Ipv4Addr,

    #[clap(long, default_value = "200000001")]
    src: String,
    #[clap(long, default_value = "200000002")]
    dst: String,
    /// 6-bit armored payload of the sentence to send
    #[clap(long, default_value = "11")]
    payload: String,

    #[clap(long, default_value_t = 60)]
    duration_secs: u64,

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

    let sentence = reassembled_sentence(&args.src, &args.dst, &args.payload, 0);
    info!("sending {}", sentence);

    let send_config = SendConfig::new(args.target_address);
    let ack_config = MulticastReceiveConfig::new(args.ack_bind_address, args.ack_multicast_group, args.interface);
    let session_config = SessionConfig {
        measurement_duration: Duration::from_secs(args.duration_secs),
        ack_receive_timeout: ack_config.socket_timeout,
    };

    let send_socket = UdpSocket::bind("0.0.0.0:0").await?;
    let mut ack_socket = MulticastSocket::bind(&ack_config)?;

    let stop = StopSignal::new();
    let stop_on_ctrl_c = stop.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(_) => {
                info!("Ctrl-C received - stopping");
                stop_on_ctrl_c.request_stop();
            }
            Err(e) => error!("failed to listen for Ctrl-C: {}", e),
        }
    });

    let summary = run_send_session(&session_config, &send_config, &send_socket, &mut ack_socket, &sentence, &stop, &SystemUtcClock).await?;

    info!("period:            {} - {}", format_utc(summary.send_start), format_utc_millis(summary.send_end));
    info!("completed sends:   {}", summary.send_count);
    info!("payload chars:     {} ({} per sentence)", summary.payload_total_chars, summary.payload_chars_per_sentence);
    match summary.average_ack_latency_ms {
        Some(latency) => info!("average latency:   {:.1} ms", latency),
        None => info!("average latency:   n/a"),
    }
    Ok(())
}
