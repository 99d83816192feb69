use clap::Parser;
use clap_derive::Parser;
use std::net::{Ipv4Addr, SocketAddr};
use tracing::{error, info, Level};
use vdes_rtt::reassembly::ReassemblerConfig;
use vdes_rtt::timing::format_utc;
use vdes_rtt::udp::config::MulticastReceiveConfig;
use vdes_rtt::udp::measurement_receiver::run_measurement_receive;
use vdes_rtt::util::clock::SystemUtcClock;
use vdes_rtt::util::stop_signal::StopSignal;

/// Receives fragment sentences from a multicast group for one measurement window
#[derive(Parser)]
struct Args {
    /// e.g. 0.0.0.0:60001
    bind_address: SocketAddr,
    multicast_group: Ipv4Addr,

    #[clap(long, default_value_t = Ipv4Addr::UNSPECIFIED)]
    interface: Ipv4Addr,

    /// track reassembly success / failure without reporting it
    #[clap(long, default_value_t = false)]
    hide_split_counts: bool,

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

    let config = MulticastReceiveConfig::new(args.bind_address, args.multicast_group, args.interface);
    let reassembler_config = ReassemblerConfig {
        report_split_counts: !args.hide_split_counts,
        ..Default::default()
    };

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

    let metrics = run_measurement_receive(&config, reassembler_config, &stop, &SystemUtcClock).await?;

    info!("window:            {} - {}", format_utc(metrics.window.start), format_utc(metrics.window.end));
    info!("received:          {}", metrics.received_count);
    info!("payload chars:     {}", metrics.payload_total_chars);
    info!("split success:     {}", metrics.split_counts.success);
    info!("split failure:     {}", metrics.split_counts.failure);
    info!("pending at window end: {}", metrics.pending_groups_at_boundary);
    Ok(())
}
