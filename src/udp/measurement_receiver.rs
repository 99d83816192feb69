//! The receive side of a measurement: fragment sentences arriving on a multicast group are
//!  reassembled and accumulated until the measurement window ends.
//!
//! The window does not exist until the first fragment sentence arrives. It starts at that
//!  fragment's arrival and ends at the next UTC minute boundary after it.

use crate::reassembly::{Reassembler, ReassemblerConfig, SplitCounts};
use crate::sentence::tdb::{extract_tdb_sentences, payload_char_count};
use crate::timing::{format_utc, format_utc_millis, minute_boundary_after};
use crate::udp::config::MulticastReceiveConfig;
use crate::udp::multicast::{DatagramSource, MulticastSocket};
use crate::util::clock::UtcClock;
use crate::util::stop_signal::StopSignal;
use anyhow::bail;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, error, info, span, trace, warn, Level};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MeasurementWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}
impl MeasurementWindow {
    pub fn starting_at(start: DateTime<Utc>) -> MeasurementWindow {
        MeasurementWindow {
            start,
            end: minute_boundary_after(start),
        }
    }

    pub fn is_over(&self, now: DateTime<Utc>) -> bool {
        now >= self.end
    }
}

/// A sentence that was accepted into the measurement, i.e. a non-fragmented sentence or a
///  reassembled one
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivedRecord {
    pub at: DateTime<Utc>,
    pub sentence: String,
    pub payload_chars: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReceiveMetrics {
    pub window: MeasurementWindow,
    pub received_count: u64,
    pub payload_total_chars: u64,
    pub split_counts: SplitCounts,
    /// counts regardless of whether split counts are reported, see [ReassemblerConfig]
    pub tracked_split_counts: SplitCounts,
    /// the number of incomplete groups that were closed as failures when the window ended
    pub pending_groups_at_boundary: usize,
    pub records: Vec<ReceivedRecord>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DatagramOutcome {
    Continue,
    WindowOver,
}

/// Accumulates the received sentences of one measurement window
pub struct MeasurementReceiver {
    reassembler: Reassembler,
    window: Option<MeasurementWindow>,
    received_count: u64,
    payload_total_chars: u64,
    records: Vec<ReceivedRecord>,
}

impl MeasurementReceiver {
    pub fn new(reassembler_config: ReassemblerConfig) -> MeasurementReceiver {
        MeasurementReceiver {
            reassembler: Reassembler::new(reassembler_config),
            window: None,
            received_count: 0,
            payload_total_chars: 0,
            records: Vec::new(),
        }
    }

    pub fn window(&self) -> Option<MeasurementWindow> {
        self.window
    }

    pub fn received_count(&self) -> u64 {
        self.received_count
    }

    pub fn is_window_over(&self, now: DateTime<Utc>) -> bool {
        self.window.is_some_and(|w| w.is_over(now))
    }

    /// Processes the fragment sentences contained in a received text one at a time, stopping
    ///  at the first sentence that arrives after the window ended
    pub fn on_datagram(&mut self, text: &str, clock: &dyn UtcClock) -> DatagramOutcome {
        for sentence in extract_tdb_sentences(text) {
            let now = clock.now();
            if self.is_window_over(now) {
                return DatagramOutcome::WindowOver;
            }

            let window = match self.window {
                Some(window) => window,
                None => {
                    let window = MeasurementWindow::starting_at(now);
                    info!("first fragment received at {} - measurement window ends at {}", format_utc_millis(window.start), format_utc(window.end));
                    self.window = Some(window);
                    window
                }
            };
            if window.is_over(now) {
                return DatagramOutcome::WindowOver;
            }

            for accepted in self.reassembler.reassemble(&[sentence], now) {
                self.accumulate(accepted, now);
            }
        }
        DatagramOutcome::Continue
    }

    fn accumulate(&mut self, sentence: String, at: DateTime<Utc>) {
        let Some(payload_chars) = payload_char_count(&sentence) else {
            return;
        };

        self.received_count += 1;
        self.payload_total_chars += payload_chars as u64;
        debug!("accepted sentence #{} with {} payload characters: {}", self.received_count, payload_chars, sentence);

        self.records.push(ReceivedRecord {
            at,
            sentence,
            payload_chars,
        });
    }

    /// Closes the window, counting groups that are still incomplete as failures. Fails if no
    ///  fragment was ever received, i.e. there is no window to report on.
    pub fn finish(mut self) -> anyhow::Result<ReceiveMetrics> {
        let Some(window) = self.window else {
            bail!("no fragment sentence was received - there is no measurement window");
        };

        let pending_groups_at_boundary = self.reassembler.finalize_pending_groups_as_boundary_failure();
        let metrics = ReceiveMetrics {
            window,
            received_count: self.received_count,
            payload_total_chars: self.payload_total_chars,
            split_counts: self.reassembler.counts(),
            tracked_split_counts: self.reassembler.tracked_counts(),
            pending_groups_at_boundary,
            records: self.records,
        };

        info!("measurement window {} - {} finished: {} sentences, {} payload characters, split success={} failure={}",
            format_utc(window.start), format_utc(window.end), metrics.received_count, metrics.payload_total_chars,
            metrics.split_counts.success, metrics.split_counts.failure);
        Ok(metrics)
    }
}

/// Joins the configured multicast group and receives one measurement window. Socket setup
///  failures are returned as errors, per-datagram failures are logged.
pub async fn run_measurement_receive(
    config: &MulticastReceiveConfig,
    reassembler_config: ReassemblerConfig,
    stop: &StopSignal,
    clock: &dyn UtcClock,
) -> anyhow::Result<ReceiveMetrics> {
    let mut socket = MulticastSocket::bind(config)?;
    receive_measurement(&mut socket, config.socket_timeout, reassembler_config, stop, clock).await
}

pub async fn receive_measurement<S: DatagramSource + ?Sized>(
    source: &mut S,
    socket_timeout: Duration,
    reassembler_config: ReassemblerConfig,
    stop: &StopSignal,
    clock: &dyn UtcClock,
) -> anyhow::Result<ReceiveMetrics> {
    info!("starting measurement receive loop");

    let mut receiver = MeasurementReceiver::new(reassembler_config);
    loop {
        if stop.is_stop_requested() {
            info!("stop requested - ending measurement receive loop");
            break;
        }
        if receiver.is_window_over(clock.now()) {
            info!("measurement window is over");
            break;
        }

        let (datagram, from) = match source.recv_datagram(socket_timeout).await {
            Ok(Some(x)) => x,
            Ok(None) => continue,
            Err(e) => {
                error!("socket error: {}", e);
                continue;
            }
        };

        let correlation_id = Uuid::new_v4();
        let span = span!(Level::TRACE, "datagram_received", ?correlation_id);
        let _entered = span.enter();

        let text = String::from_utf8_lossy(&datagram);
        trace!("received datagram from {:?}: {:?}", from, text);

        if receiver.on_datagram(&text, clock) == DatagramOutcome::WindowOver {
            info!("measurement window is over - ignoring the rest of the datagram");
            break;
        }
    }

    if receiver.window().is_none() {
        warn!("receive loop ended before any fragment sentence arrived");
    }
    receiver.finish()
}
