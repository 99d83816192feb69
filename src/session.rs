//! A send session runs the send loop and the ack receiver side by side for one measurement
//!  period that starts at a UTC minute boundary, so that a receiver started independently on
//!  the other end of the link measures the same period.

use crate::records::{average_ack_latency_ms, collect_sentence_records, SentenceRecord, SentenceRecorder};
use crate::sentence::tdb::payload_char_count;
use crate::timing::{format_utc, format_utc_millis, next_minute_boundary, wait_duration};
use crate::udp::ack_receiver::receive_acks;
use crate::udp::config::SendConfig;
use crate::udp::multicast::DatagramSource;
use crate::udp::send_loop::{run_send_loop, SendSocket};
use crate::util::clock::UtcClock;
use crate::util::stop_signal::StopSignal;
use anyhow::{anyhow, bail};
use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

pub struct SessionConfig {
    pub measurement_duration: Duration,
    /// see [crate::udp::config::MulticastReceiveConfig::socket_timeout]
    pub ack_receive_timeout: Duration,
}

impl SessionConfig {
    pub fn new() -> SessionConfig {
        SessionConfig {
            measurement_duration: Duration::from_secs(60),
            ack_receive_timeout: Duration::from_secs(1),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.measurement_duration.is_zero() {
            bail!("measurement duration must be positive");
        }
        if self.ack_receive_timeout.is_zero() {
            bail!("ack receive timeout must be positive");
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SendSessionSummary {
    pub send_count: u64,
    pub payload_chars_per_sentence: usize,
    pub payload_total_chars: u64,
    pub send_start: DateTime<Utc>,
    /// the planned end, or the time the session was stopped if that was earlier
    pub send_end: DateTime<Utc>,
    pub average_ack_latency_ms: Option<f64>,
    pub records: Vec<SentenceRecord>,
}

/// Sleeps until `target` on the UTC clock, waking up at least every `poll_interval` to check
///  `is_aborted`. Returns `true` if the target was reached, `false` if aborted.
async fn sleep_until_utc(target: DateTime<Utc>, clock: &dyn UtcClock, poll_interval: Duration, is_aborted: impl Fn() -> bool) -> bool {
    loop {
        if is_aborted() {
            return false;
        }
        let remaining = wait_duration(target, clock.now());
        if remaining.is_zero() {
            return true;
        }
        tokio::time::sleep(remaining.min(poll_interval)).await;
    }
}

pub async fn run_send_session(
    config: &SessionConfig,
    send_config: &SendConfig,
    socket: &dyn SendSocket,
    ack_source: &mut dyn DatagramSource,
    sentence: &str,
    stop: &StopSignal,
    clock: &dyn UtcClock,
) -> anyhow::Result<SendSessionSummary> {
    config.validate()?;
    send_config.validate()?;
    let payload_chars_per_sentence = payload_char_count(sentence)
        .ok_or_else(|| anyhow!("sentence to send has no payload field: {}", sentence))?;

    let send_start = next_minute_boundary(clock.now());
    info!("waiting for the next minute boundary at {} to start sending", format_utc(send_start));

    if !sleep_until_utc(send_start, clock, send_config.ack_wait_interval, || stop.is_stop_requested()).await {
        info!("stopped before the send session started");
        return Ok(SendSessionSummary {
            send_count: 0,
            payload_chars_per_sentence,
            payload_total_chars: 0,
            send_start,
            send_end: clock.now(),
            average_ack_latency_ms: None,
            records: Vec::new(),
        });
    }

    let planned_end = send_start + TimeDelta::from_std(config.measurement_duration)?;
    info!("starting send session at {}, planned end {}", format_utc_millis(clock.now()), format_utc(planned_end));

    let unit_stop = StopSignal::new();
    let (ack_sender, mut ack_receiver) = mpsc::channel(send_config.ack_channel_capacity);
    let (recorder, mut record_receiver) = SentenceRecorder::new();

    let ack_unit = receive_acks(ack_source, config.ack_receive_timeout, &ack_sender, &recorder, &unit_stop, clock);
    let send_unit = run_send_loop(socket, send_config, sentence, &mut ack_receiver, &recorder, &unit_stop, clock);
    let timer = async {
        let completed = sleep_until_utc(planned_end, clock, send_config.ack_wait_interval, || stop.is_stop_requested()).await;
        unit_stop.request_stop();
        if completed {
            planned_end
        }
        else {
            info!("send session stopped before its planned end");
            clock.now()
        }
    };

    let ((), send_count, send_end) = tokio::join!(ack_unit, send_unit, timer);

    let records = collect_sentence_records(&mut record_receiver);
    let summary = SendSessionSummary {
        send_count,
        payload_chars_per_sentence,
        payload_total_chars: send_count * payload_chars_per_sentence as u64,
        send_start,
        send_end,
        average_ack_latency_ms: average_ack_latency_ms(&records),
        records,
    };

    info!("send session {} - {} finished: {} completed sends, {} payload characters, average ack latency {:?} ms",
        format_utc(summary.send_start), format_utc_millis(summary.send_end), summary.send_count,
        summary.payload_total_chars, summary.average_ack_latency_ms);
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::Direction;
    use crate::udp::send_loop::MockSendSocket;
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::TimeZone;
    use std::net::SocketAddr;

    const SENTENCE: &str = "!VATDB,1,1,0,200000001,200000002,0,0,15M,2*1A";

    /// UTC time driven by Tokio's (paused) clock
    struct TokioClock {
        base: DateTime<Utc>,
        started: tokio::time::Instant,
    }
    impl TokioClock {
        fn new(base: DateTime<Utc>) -> TokioClock {
            TokioClock {
                base,
                started: tokio::time::Instant::now(),
            }
        }
    }
    impl UtcClock for TokioClock {
        fn now(&self) -> DateTime<Utc> {
            self.base + TimeDelta::from_std(self.started.elapsed()).unwrap()
        }
    }

    /// Delivers the datagrams pushed into a channel, each after a fixed latency
    struct ChannelSource {
        datagrams: mpsc::UnboundedReceiver<Bytes>,
        latency: Duration,
    }
    #[async_trait]
    impl DatagramSource for ChannelSource {
        async fn recv_datagram(&mut self, timeout: Duration) -> anyhow::Result<Option<(Bytes, SocketAddr)>> {
            match tokio::time::timeout(timeout, self.datagrams.recv()).await {
                Ok(Some(datagram)) => {
                    tokio::time::sleep(self.latency).await;
                    Ok(Some((datagram, "10.0.0.1:60003".parse()?)))
                }
                Ok(None) => {
                    tokio::time::sleep(timeout).await;
                    Ok(None)
                }
                Err(_) => Ok(None),
            }
        }
    }

    /// a link that acknowledges every sentence with 'enqueued' and 'complete', 100ms apart
    fn acknowledging_link() -> (MockSendSocket, ChannelSource) {
        let (ack_sender, datagrams) = mpsc::unbounded_channel();

        let mut socket = MockSendSocket::new();
        socket.expect_send_sentence()
            .returning(move |_, _| {
                ack_sender.send(Bytes::from_static(b"$VETMK,0,0*41\r\n")).unwrap();
                ack_sender.send(Bytes::from_static(b"$VETMK,0,1*40\r\n")).unwrap();
                Ok(())
            });

        (socket, ChannelSource { datagrams, latency: Duration::from_millis(100) })
    }

    fn utc(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, h, m, s).unwrap()
    }

    fn send_config() -> SendConfig {
        SendConfig::new("127.0.0.1:60002".parse().unwrap())
    }

    fn session_config(measurement_secs: u64) -> SessionConfig {
        SessionConfig {
            measurement_duration: Duration::from_secs(measurement_secs),
            ..SessionConfig::new()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_runs_from_minute_boundary() {
        let clock = TokioClock::new(utc(12, 0, 30) + TimeDelta::milliseconds(500));
        let (socket, mut ack_source) = acknowledging_link();

        let summary = run_send_session(&session_config(5), &send_config(), &socket, &mut ack_source, SENTENCE, &StopSignal::new(), &clock).await.unwrap();

        assert_eq!(summary.send_start, utc(12, 1, 0));
        assert_eq!(summary.send_end, utc(12, 1, 5));
        assert!((24..=25).contains(&summary.send_count), "{}", summary.send_count);
        assert_eq!(summary.payload_chars_per_sentence, 3);
        assert_eq!(summary.payload_total_chars, summary.send_count * 3);

        let latency = summary.average_ack_latency_ms.unwrap();
        assert!((latency - 200.0).abs() < 1.0, "{}", latency);

        assert!(summary.records.first().is_some_and(|r| r.direction == Direction::Sent && r.at >= utc(12, 1, 0)));
        assert!(summary.records.windows(2).all(|w| w[0].at <= w[1].at));
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_stopped_before_start() {
        let clock = TokioClock::new(utc(12, 0, 30));
        let stop = StopSignal::new();
        let (_, datagrams) = mpsc::unbounded_channel();
        let mut ack_source = ChannelSource { datagrams, latency: Duration::ZERO };

        let mut socket = MockSendSocket::new();
        socket.expect_send_sentence().never();

        let stop_later = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            stop_later.request_stop();
        });

        let summary = run_send_session(&session_config(60), &send_config(), &socket, &mut ack_source, SENTENCE, &stop, &clock).await.unwrap();
        assert_eq!(summary.send_count, 0);
        assert_eq!(summary.payload_total_chars, 0);
        assert_eq!(summary.send_start, utc(12, 1, 0));
        assert!(summary.send_end >= utc(12, 0, 40) && summary.send_end < utc(12, 1, 0));
        assert!(summary.records.is_empty());
        assert_eq!(summary.average_ack_latency_ms, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_stopped_early() {
        let clock = TokioClock::new(utc(12, 0, 59));
        let stop = StopSignal::new();
        let (socket, mut ack_source) = acknowledging_link();

        let stop_later = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            stop_later.request_stop();
        });

        let summary = run_send_session(&session_config(60), &send_config(), &socket, &mut ack_source, SENTENCE, &stop, &clock).await.unwrap();
        assert_eq!(summary.send_start, utc(12, 1, 0));
        assert!(summary.send_end >= utc(12, 1, 2) && summary.send_end < utc(12, 1, 3), "{}", summary.send_end);
        assert!(summary.send_count > 0);
    }

    #[tokio::test]
    async fn test_session_sentence_without_payload() {
        let clock = TokioClock::new(utc(12, 0, 0));
        let (socket, mut ack_source) = acknowledging_link();

        let result = run_send_session(&session_config(60), &send_config(), &socket, &mut ack_source, "!VATDB,1,1", &StopSignal::new(), &clock).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_session_config_validation() {
        assert!(SessionConfig::new().validate().is_ok());
        assert!(session_config(0).validate().is_err());
    }
}
