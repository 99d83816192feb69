use crate::ais::sixbit::{bits_to_payload, pad_to_char_boundary};
use crate::sentence::tdb::{reassembled_sentence, GroupKey};
use anyhow::bail;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Why a group left the set of open groups
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    Reassembled,
    ParseFailure,
    /// a new index 1 arrived while the group was still incomplete
    Superseded,
    DuplicateIndex,
    PayloadConversion,
    BuildFailure,
    Expired,
    /// the measurement window ended while the group was incomplete
    Boundary,
}
impl CloseReason {
    pub fn is_success(&self) -> bool {
        *self == CloseReason::Reassembled
    }
}
impl Display for CloseReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            CloseReason::Reassembled => "reassembled",
            CloseReason::ParseFailure => "parse failure",
            CloseReason::Superseded => "superseded by a new first fragment",
            CloseReason::DuplicateIndex => "duplicate index",
            CloseReason::PayloadConversion => "payload conversion failure",
            CloseReason::BuildFailure => "build failure",
            CloseReason::Expired => "expired",
            CloseReason::Boundary => "measurement window boundary",
        };
        write!(f, "{}", text)
    }
}

/// The fragments of one message received so far, as decoded bit strings by index
#[derive(Debug)]
pub struct SegmentGroup {
    segments: BTreeMap<u32, Vec<bool>>,
    last_received_at: DateTime<Utc>,
}
impl SegmentGroup {
    pub fn new(received_at: DateTime<Utc>) -> SegmentGroup {
        SegmentGroup {
            segments: BTreeMap::new(),
            last_received_at: received_at,
        }
    }

    pub fn last_received_at(&self) -> DateTime<Utc> {
        self.last_received_at
    }

    pub fn contains_index(&self, index: u32) -> bool {
        self.segments.contains_key(&index)
    }

    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }

    pub fn insert(&mut self, index: u32, bits: Vec<bool>, received_at: DateTime<Utc>) {
        self.segments.insert(index, bits);
        self.last_received_at = received_at;
    }

    pub fn is_complete(&self, total: u32) -> bool {
        self.segments.len() >= total as usize
    }

    /// Concatenates the fragments' bits in index order and synthesizes a single-fragment
    ///  sentence from them
    pub fn build_sentence(&self, key: &GroupKey) -> anyhow::Result<String> {
        let mut combined = Vec::new();
        for index in 1..=key.total {
            match self.segments.get(&index) {
                Some(bits) => combined.extend_from_slice(bits),
                None => bail!("fragment #{} is missing", index),
            }
        }

        if combined.is_empty() {
            bail!("combined payload is empty");
        }

        let fill = pad_to_char_boundary(&mut combined);
        let payload = bits_to_payload(&combined);
        Ok(reassembled_sentence(&key.src, &key.dst, &payload, fill))
    }
}
