//! Timestamped log of the sentences a send session transmitted and the acknowledgements it
//!  received, and the latency statistics derived from it

use crate::sentence::ack::{extract_ack_flag, AckFlag};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tracing::{trace, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Sent,
    Received,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentenceRecord {
    pub at: DateTime<Utc>,
    pub direction: Direction,
    pub text: String,
}

/// The writing end of the record log, shared by the send loop and the ack receiver. Recording
///  never blocks.
#[derive(Clone, Debug)]
pub struct SentenceRecorder {
    sender: mpsc::UnboundedSender<SentenceRecord>,
}

impl SentenceRecorder {
    pub fn new() -> (SentenceRecorder, mpsc::UnboundedReceiver<SentenceRecord>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (SentenceRecorder { sender }, receiver)
    }

    pub fn record(&self, at: DateTime<Utc>, direction: Direction, text: &str) {
        trace!("recording {:?} sentence at {}", direction, at);

        let record = SentenceRecord {
            at,
            direction,
            text: text.to_string(),
        };
        if self.sender.send(record).is_err() {
            warn!("sentence record log is closed - dropping {:?} record", direction);
        }
    }
}

/// Drains all records that are currently buffered, sorted by timestamp. Records with equal
///  timestamps keep their arrival order.
pub fn collect_sentence_records(receiver: &mut mpsc::UnboundedReceiver<SentenceRecord>) -> Vec<SentenceRecord> {
    let mut records = Vec::new();
    while let Ok(record) = receiver.try_recv() {
        records.push(record);
    }
    records.sort_by_key(|r| r.at);
    records
}

/// Pairs every sent sentence with the next received 'complete' acknowledgement (first in, first
///  out) and returns the average time between the two in milliseconds, or `None` if there is no
///  such pair.
///
/// Records are expected in time order (see [collect_sentence_records]).
pub fn average_ack_latency_ms(records: &[SentenceRecord]) -> Option<f64> {
    let mut pending_sends = VecDeque::new();
    let mut latencies_ms = Vec::new();

    for record in records {
        match record.direction {
            Direction::Sent => pending_sends.push_back(record.at),
            Direction::Received => {
                if extract_ack_flag(&record.text) != Some(AckFlag::Complete as i64) {
                    continue;
                }
                if let Some(sent_at) = pending_sends.pop_front() {
                    let latency = record.at - sent_at;
                    latencies_ms.push(latency.num_microseconds().unwrap_or(i64::MAX) as f64 / 1000.0);
                }
            }
        }
    }

    if latencies_ms.is_empty() {
        return None;
    }
    Some(latencies_ms.iter().sum::<f64>() / latencies_ms.len() as f64)
}
