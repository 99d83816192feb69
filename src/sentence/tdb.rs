//! TDB fragment sentences. The link splits an application message into numbered fragments:
//!
//! ```ascii
//! !<type>,<total>,<index>,<seq>,<src>,<dst>,<unused>,<unused>,<payload>,<fill>[*<checksum>]
//!  0      1       2       3     4     5     6        7        8         9
//! ```
//!
//! `<type>` is five characters ending in `TDB` (e.g. `VATDB`). `<payload>` is AIS 6-bit armored,
//!  and `<fill>` is the number of padding bits in its last character.

use crate::ais::sixbit::MAX_FILL_BITS;
use crate::sentence::checksum::{strip_checksum, with_checksum};
use anyhow::{anyhow, bail};
use std::fmt::{Display, Formatter};
use tracing::warn;

pub const FRAGMENT_TYPE_LEN: usize = 5;
pub const FRAGMENT_TYPE_SUFFIX: &str = "TDB";
pub const REASSEMBLED_SENTENCE_TYPE: &str = "VATDB";
pub const PAYLOAD_FIELD_INDEX: usize = 8;

const NUM_FIELDS: usize = 10;
const NUM_IDENTITY_FIELDS: usize = 6;

/// The parsed view of one fragment sentence
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TdbSegment {
    pub total: u32,
    /// 1-based, `1 <= index <= total`
    pub index: u32,
    pub src: String,
    pub dst: String,
    pub payload: String,
    pub fill: u8,
}
impl TdbSegment {
    pub fn group_key(&self) -> GroupKey {
        GroupKey {
            total: self.total,
            src: self.src.clone(),
            dst: self.dst.clone(),
        }
    }
}

/// Fragments of one message share `(total, src, dst)`
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub total: u32,
    pub src: String,
    pub dst: String,
}
impl Display for GroupKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "total={}, src={}, dst={}", self.total, self.src, self.dst)
    }
}

/// What can be salvaged from a fragment that failed to parse - enough to decide whether it
///  belongs to a group that must be closed as failed
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartialIdentity {
    pub total: u32,
    pub index: Option<u32>,
    pub src: String,
    pub dst: String,
}
impl PartialIdentity {
    pub fn group_key(&self) -> GroupKey {
        GroupKey {
            total: self.total,
            src: self.src.clone(),
            dst: self.dst.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SegmentParse {
    Parsed(TdbSegment),
    Invalid {
        identity: Option<PartialIdentity>,
        reason: String,
    },
}

/// Checks the sentence type token, i.e. the part between `!` and the first `,`
pub fn is_tdb_sentence(sentence: &str) -> bool {
    let Some(rest) = sentence.strip_prefix('!') else {
        return false;
    };
    let Some((token, _)) = rest.split_once(',') else {
        return false;
    };
    token.chars().count() == FRAGMENT_TYPE_LEN && token.ends_with(FRAGMENT_TYPE_SUFFIX)
}

/// Extracts all fragment sentences from a received text. A datagram can carry several lines,
///  and a line can contain several `!` start markers: each candidate runs from its marker to
///  the next marker or the end of the line.
pub fn extract_tdb_sentences(received_text: &str) -> Vec<String> {
    let mut result = Vec::new();
    for line in received_text.lines() {
        let starts = line.match_indices('!')
            .map(|(offs, _)| offs)
            .collect::<Vec<_>>();

        for (i, &start) in starts.iter().enumerate() {
            let end = starts.get(i + 1).copied().unwrap_or(line.len());
            let candidate = line[start..end].trim();
            if is_tdb_sentence(candidate) {
                result.push(candidate.to_string());
            }
        }
    }
    result
}

fn parse_int(value: &str, field_name: &str) -> anyhow::Result<i64> {
    let value = value.trim();
    if value.is_empty() {
        bail!("{} is empty", field_name);
    }
    value.parse()
        .map_err(|_| anyhow!("{} is not an integer: {:?}", field_name, value))
}

pub fn parse_tdb_sentence(sentence: &str) -> SegmentParse {
    match try_parse_tdb_sentence(sentence) {
        Ok(segment) => SegmentParse::Parsed(segment),
        Err(e) => SegmentParse::Invalid {
            identity: try_extract_identity(sentence),
            reason: e.to_string(),
        },
    }
}

fn try_parse_tdb_sentence(sentence: &str) -> anyhow::Result<TdbSegment> {
    let fields = strip_checksum(sentence).split(',').collect::<Vec<_>>();
    if fields.len() < NUM_FIELDS {
        bail!("expected at least {} fields, got {}", NUM_FIELDS, fields.len());
    }

    let total = parse_int(fields[1], "total")?;
    let index = parse_int(fields[2], "index")?;
    let _seq = parse_int(fields[3], "seq")?;
    let src = fields[4].trim();
    let dst = fields[5].trim();
    let payload = fields[PAYLOAD_FIELD_INDEX].trim();
    let fill = parse_int(fields[9], "fill")?;

    if total < 1 || total > u32::MAX as i64 {
        bail!("total {} is out of range", total);
    }
    if index < 1 || index > total {
        bail!("index {} is outside 1..={}", index, total);
    }
    if !(0..=MAX_FILL_BITS as i64).contains(&fill) {
        bail!("fill {} is outside 0..={}", fill, MAX_FILL_BITS);
    }
    if payload.is_empty() {
        bail!("payload is empty");
    }

    Ok(TdbSegment {
        total: total as u32,
        index: index as u32,
        src: src.to_string(),
        dst: dst.to_string(),
        payload: payload.to_string(),
        fill: fill as u8,
    })
}

fn try_extract_identity(sentence: &str) -> Option<PartialIdentity> {
    let fields = strip_checksum(sentence).split(',').collect::<Vec<_>>();
    if fields.len() < NUM_IDENTITY_FIELDS {
        return None;
    }

    let total = parse_int(fields[1], "total").ok()?;
    if total < 1 || total > u32::MAX as i64 {
        return None;
    }
    let index = parse_int(fields[2], "index").ok()
        .and_then(|i| u32::try_from(i).ok());

    let src = fields[4].trim();
    let dst = fields[5].trim();
    if src.is_empty() || dst.is_empty() {
        return None;
    }

    Some(PartialIdentity {
        total: total as u32,
        index,
        src: src.to_string(),
        dst: dst.to_string(),
    })
}

/// Synthesizes the single-fragment sentence for a reassembled message
pub fn reassembled_sentence(src: &str, dst: &str, payload: &str, fill: u8) -> String {
    let body = format!("{},1,1,0,{},{},0,0,{},{}", REASSEMBLED_SENTENCE_TYPE, src, dst, payload, fill);
    with_checksum('!', &body)
}

/// The number of payload characters of a sentence, used for throughput accounting. Returns
///  `None` (and logs) if the sentence has too few fields to locate the payload.
pub fn payload_char_count(sentence: &str) -> Option<usize> {
    match strip_checksum(sentence).split(',').nth(PAYLOAD_FIELD_INDEX) {
        Some(payload) => Some(payload.chars().count()),
        None => {
            warn!("sentence has too few fields to extract the payload - excluding it from accumulation: {}", sentence);
            None
        }
    }
}
