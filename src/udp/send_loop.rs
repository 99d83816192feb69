use crate::records::{Direction, SentenceRecorder};
use crate::sentence::ack::AckFlag;
use crate::udp::config::SendConfig;
use crate::util::clock::UtcClock;
use crate::util::stop_signal::StopSignal;
use anyhow::bail;
use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// This is an abstraction for sending a sentence on a UDP socket, introduced to facilitate
///  mocking the I/O part away for testing
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SendSocket: Send + Sync + 'static {
    async fn send_sentence(&self, to: SocketAddr, sentence: &[u8]) -> anyhow::Result<()>;
}

#[async_trait]
impl SendSocket for UdpSocket {
    async fn send_sentence(&self, to: SocketAddr, sentence: &[u8]) -> anyhow::Result<()> {
        trace!("UDP socket: sending {} bytes to {:?}", sentence.len(), to);

        let num_sent = self.send_to(sentence, to).await?;
        if num_sent != sentence.len() {
            bail!("sent {} of {} bytes to {:?}", num_sent, sentence.len(), to);
        }
        Ok(())
    }
}

/// Discards acknowledgement flags left over from a previous cycle so they are not mistaken for
///  the acknowledgement of the next send. Returns the number of discarded flags.
pub fn drain_stale_acks(ack_receiver: &mut mpsc::Receiver<i64>) -> usize {
    let mut num_discarded = 0;
    while ack_receiver.try_recv().is_ok() {
        num_discarded += 1;
    }
    if num_discarded > 0 {
        info!("discarded {} stale ack flag(s)", num_discarded);
    }
    num_discarded
}

/// Waits for the next acknowledgement flag that ends the wait, i.e. any flag except
///  [AckFlag::Enqueued]. Returns `None` if the stop signal is observed first.
pub async fn wait_for_ack(ack_receiver: &mut mpsc::Receiver<i64>, stop: &StopSignal, poll_interval: Duration) -> Option<i64> {
    loop {
        if stop.is_stop_requested() {
            return None;
        }

        match tokio::time::timeout(poll_interval, ack_receiver.recv()).await {
            Err(_) => continue,
            Ok(None) => {
                // no producer left, so nothing can arrive before the stop signal
                trace!("ack channel is closed");
                tokio::time::sleep(poll_interval).await;
            }
            Ok(Some(flag)) if flag == AckFlag::Enqueued as i64 => {
                debug!("ack flag {} - sentence is enqueued, waiting for completion", flag);
            }
            Ok(Some(flag)) => return Some(flag),
        }
    }
}

/// Sends `sentence` to the configured target repeatedly, each time waiting for its
///  acknowledgement before sending the next one, until the stop signal is observed. Returns the
///  number of sends that were acknowledged as complete.
pub async fn run_send_loop(
    socket: &dyn SendSocket,
    config: &SendConfig,
    sentence: &str,
    ack_receiver: &mut mpsc::Receiver<i64>,
    recorder: &SentenceRecorder,
    stop: &StopSignal,
    clock: &dyn UtcClock,
) -> u64 {
    info!("starting send loop to {:?}", config.target_addr);

    let mut num_completed = 0;
    while !stop.is_stop_requested() {
        drain_stale_acks(ack_receiver);

        if let Err(e) = socket.send_sentence(config.target_addr, sentence.as_bytes()).await {
            error!("error sending sentence to {:?}: {}", config.target_addr, e);
            tokio::time::sleep(config.ack_wait_interval).await;
            continue;
        }
        recorder.record(clock.now(), Direction::Sent, sentence);
        debug!("sent {} bytes to {:?}", sentence.len(), config.target_addr);

        let Some(flag) = wait_for_ack(ack_receiver, stop, config.ack_wait_interval).await else {
            break;
        };

        if flag == AckFlag::Complete as i64 {
            num_completed += 1;
            debug!("send #{} acknowledged as complete", num_completed);
        }
        else {
            warn!("unexpected ack flag {} - proceeding with the next send", flag);
        }
    }

    info!("send loop stopped after {} completed sends", num_completed);
    num_completed
}
