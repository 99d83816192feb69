//! The sender's receive unit: it listens for acknowledgement sentences and forwards their flags
//!  to the send loop

use crate::records::{Direction, SentenceRecorder};
use crate::sentence::ack::{contains_ack_sentence, extract_ack_flag};
use crate::udp::multicast::DatagramSource;
use crate::util::clock::UtcClock;
use crate::util::stop_signal::StopSignal;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, span, trace, warn, Level};
use uuid::Uuid;

/// Receives until the stop signal is observed. Receive errors are logged, and the loop
///  continues.
pub async fn receive_acks<S: DatagramSource + ?Sized>(
    source: &mut S,
    socket_timeout: Duration,
    ack_sender: &mpsc::Sender<i64>,
    recorder: &SentenceRecorder,
    stop: &StopSignal,
    clock: &dyn UtcClock,
) {
    info!("starting ack receive loop");

    while !stop.is_stop_requested() {
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
        trace!("received datagram from {:?}", from);
        forward_ack(&text, clock.now(), ack_sender, recorder);
    }

    info!("stop requested - ending ack receive loop");
}

/// Records a received text if it carries an acknowledgement, and passes the acknowledgement's
///  flag on to the send loop without blocking. A flag that does not fit into the channel is
///  dropped.
pub fn forward_ack(text: &str, at: DateTime<Utc>, ack_sender: &mpsc::Sender<i64>, recorder: &SentenceRecorder) {
    info!("received: {}", text.trim_end());

    if contains_ack_sentence(text) {
        recorder.record(at, Direction::Received, text);
    }

    let Some(flag) = extract_ack_flag(text) else {
        return;
    };

    match ack_sender.try_send(flag) {
        Ok(_) => debug!("forwarded ack flag {}", flag),
        Err(TrySendError::Full(_)) => warn!("ack channel is full - dropping ack flag {}", flag),
        Err(TrySendError::Closed(_)) => warn!("ack channel is closed - dropping ack flag {}", flag),
    }
}
