//! Acknowledgement sentences pace the sender: `$VETMK,0,<flag>[*<checksum>]`

use crate::sentence::checksum::strip_checksum;
use num_enum::TryFromPrimitive;
use tracing::warn;

pub const ACK_SENTENCE_ID: &str = "$VETMK";
pub const ACK_SEQUENCE_MARKER: &str = "0";

#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive)]
#[repr(i64)]
pub enum AckFlag {
    /// the sentence was queued for transmission on the link, but is not sent yet
    Enqueued = 0,
    Complete = 1,
}

pub fn contains_ack_sentence(received_text: &str) -> bool {
    received_text.contains(ACK_SENTENCE_ID)
}

/// Extracts the raw flag value from the first acknowledgement sentence in a received text.
///
/// Texts without an acknowledgement marker yield `None` silently; structurally broken
///  acknowledgement sentences yield `None` with a warning. Values other than the known
///  [AckFlag]s are returned as-is so the caller can report them.
pub fn extract_ack_flag(received_text: &str) -> Option<i64> {
    let start = received_text.find(ACK_SENTENCE_ID)?;
    let sentence = received_text[start..].lines().next().unwrap_or_default();
    let fields = strip_checksum(sentence).split(',').collect::<Vec<_>>();

    if fields.len() < 3 {
        warn!("acknowledgement sentence has too few fields - ignoring: {}", sentence.trim());
        return None;
    }

    let sentence_id = fields[0].trim();
    if sentence_id != ACK_SENTENCE_ID {
        warn!("unexpected acknowledgement sentence id {:?} - ignoring: {}", sentence_id, sentence.trim());
        return None;
    }

    let sequence = fields[1].trim();
    if sequence != ACK_SEQUENCE_MARKER {
        warn!("unexpected acknowledgement sequence field {:?} - ignoring: {}", sequence, sentence.trim());
        return None;
    }

    let flag = fields[2].trim();
    match flag.parse::<i64>() {
        Ok(flag) => Some(flag),
        Err(_) => {
            warn!("acknowledgement flag {:?} is not an integer - ignoring: {}", flag, sentence.trim());
            None
        }
    }
}
