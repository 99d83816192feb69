use crate::ais::sixbit::payload_to_bits;
use crate::reassembly::group::{CloseReason, SegmentGroup};
use crate::sentence::tdb::{is_tdb_sentence, parse_tdb_sentence, GroupKey, PartialIdentity, SegmentParse, TdbSegment};
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use std::time::Duration;
use tracing::{debug, trace, warn};

#[derive(Clone, Debug)]
pub struct ReassemblerConfig {
    /// An open group is closed as failed if no fragment arrived for it for longer than this
    pub expiry: Duration,

    /// If false, closed groups are still tracked (see [Reassembler::tracked_counts]), but the
    ///  externally reported counts stay at zero
    pub report_split_counts: bool,
}
impl Default for ReassemblerConfig {
    fn default() -> Self {
        ReassemblerConfig {
            expiry: Duration::from_secs(30),
            report_split_counts: true,
        }
    }
}

/// Number of multi-fragment groups closed by success or failure
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SplitCounts {
    pub success: u64,
    pub failure: u64,
}
impl SplitCounts {
    fn add(&mut self, reason: CloseReason) {
        if reason.is_success() {
            self.success += 1;
        }
        else {
            self.failure += 1;
        }
    }
}

/// Reassembles fragmented TDB sentences into single sentences.
///
/// Groups are keyed by `(total, src, dst)`. Sentences with `total < 2` bypass grouping and are
///  neither stored nor counted. Every group with `total >= 2` that is closed - by successful
///  reassembly or by any kind of failure - is counted exactly once.
///
/// NB: The reassembler is owned by a single receive unit and is not shared
pub struct Reassembler {
    config: ReassemblerConfig,
    groups: FxHashMap<GroupKey, SegmentGroup>,
    tracked: SplitCounts,
    reported: SplitCounts,
}
impl Default for Reassembler {
    fn default() -> Self {
        Reassembler::new(ReassemblerConfig::default())
    }
}

impl Reassembler {
    pub fn new(config: ReassemblerConfig) -> Reassembler {
        Reassembler {
            config,
            groups: Default::default(),
            tracked: Default::default(),
            reported: Default::default(),
        }
    }

    /// the externally reported success / failure counts
    pub fn counts(&self) -> SplitCounts {
        self.reported
    }

    /// success / failure counts regardless of [ReassemblerConfig::report_split_counts]
    pub fn tracked_counts(&self) -> SplitCounts {
        self.tracked
    }

    pub fn num_open_groups(&self) -> usize {
        self.groups.len()
    }

    /// Processes a batch of sentences received at the same time, returning the sentences that
    ///  are ready for further processing: non-fragmented sentences unchanged, and reassembled
    ///  sentences for groups completed by this batch.
    ///
    /// Groups that expired relative to `received_at` are closed before the batch is registered.
    pub fn reassemble<S: AsRef<str>>(&mut self, sentences: &[S], received_at: DateTime<Utc>) -> Vec<String> {
        self.expire_groups(received_at);

        let mut result = Vec::new();
        for sentence in sentences {
            let sentence = sentence.as_ref().trim();
            if sentence.is_empty() {
                warn!("empty sentence - discarding");
                continue;
            }

            if !is_tdb_sentence(sentence) {
                result.push(sentence.to_string());
                continue;
            }

            match parse_tdb_sentence(sentence) {
                SegmentParse::Parsed(segment) => {
                    if segment.total < 2 {
                        result.push(sentence.to_string());
                        continue;
                    }
                    if let Some(reassembled) = self.register_segment(segment, received_at) {
                        result.push(reassembled);
                    }
                }
                SegmentParse::Invalid { identity, reason } => {
                    if let Some(identity) = identity {
                        self.on_unparsable_fragment(identity);
                    }
                    warn!("unparsable TDB sentence - discarding: {} ({})", sentence, reason);
                }
            }
        }
        result
    }

    /// Closes all open groups as failed because the measurement window ended, returning the
    ///  number of groups closed this way
    pub fn finalize_pending_groups_as_boundary_failure(&mut self) -> usize {
        let pending = self.groups.keys()
            .cloned()
            .collect::<Vec<_>>();

        for key in &pending {
            warn!("incomplete TDB group at measurement window boundary - counting as failure: {}", key);
            self.close_group(key, CloseReason::Boundary);
        }
        pending.len()
    }

    fn on_unparsable_fragment(&mut self, identity: PartialIdentity) {
        if identity.total < 2 {
            return;
        }
        let key = identity.group_key();
        if identity.index == Some(1) || self.groups.contains_key(&key) {
            warn!("unparsable fragment for TDB group - counting as failure: {}", key);
            self.close_group(&key, CloseReason::ParseFailure);
        }
    }

    fn register_segment(&mut self, segment: TdbSegment, received_at: DateTime<Utc>) -> Option<String> {
        let key = segment.group_key();

        // a repeated first fragment starts a new message; any other repeat is a duplicate
        if segment.index == 1 && self.groups.get(&key).is_some_and(|g| g.contains_index(1)) {
            warn!("new first fragment while TDB group is incomplete - discarding the old group: {}", key);
            self.close_group(&key, CloseReason::Superseded);
        }

        if self.groups.get(&key).is_some_and(|g| g.contains_index(segment.index)) {
            warn!("duplicate fragment #{} for TDB group - discarding the group: {}", segment.index, key);
            self.close_group(&key, CloseReason::DuplicateIndex);
            return None;
        }

        let bits = match payload_to_bits(&segment.payload, segment.fill) {
            Ok(bits) => bits,
            Err(e) => {
                warn!("payload of fragment #{} is not valid 6-bit ASCII - discarding the group: {}: {}", segment.index, key, e);
                self.close_group(&key, CloseReason::PayloadConversion);
                return None;
            }
        };

        let group = self.groups.entry(key.clone())
            .or_insert_with(|| SegmentGroup::new(received_at));
        group.insert(segment.index, bits, received_at);
        trace!("registered fragment #{} for TDB group {} ({} of {})", segment.index, key, group.num_segments(), key.total);

        if !group.is_complete(key.total) {
            return None;
        }

        match group.build_sentence(&key) {
            Ok(sentence) => {
                debug!("reassembled TDB group {}: {}", key, sentence);
                self.close_group(&key, CloseReason::Reassembled);
                Some(sentence)
            }
            Err(e) => {
                warn!("failed to build reassembled sentence - discarding the group: {}: {}", key, e);
                self.close_group(&key, CloseReason::BuildFailure);
                None
            }
        }
    }

    fn expire_groups(&mut self, received_at: DateTime<Utc>) {
        let mut expired = Vec::new();
        for (key, group) in &self.groups {
            match (received_at - group.last_received_at()).to_std() {
                Err(_) => {
                    warn!("receive time {} is before the last fragment of TDB group {} - skipping expiry check", received_at, key);
                }
                Ok(elapsed) => {
                    if elapsed > self.config.expiry {
                        expired.push(key.clone());
                    }
                }
            }
        }

        for key in expired {
            warn!("TDB group expired after {:?} - counting as failure: {}", self.config.expiry, key);
            self.close_group(&key, CloseReason::Expired);
        }
    }

    /// Removes the group (if it is open) and counts it. A failure is counted even if the
    ///  group was not open yet, i.e. its first fragment was already broken.
    fn close_group(&mut self, key: &GroupKey, reason: CloseReason) {
        self.groups.remove(key);
        debug!("closing TDB group {}: {}", key, reason);

        self.tracked.add(reason);
        if self.config.report_split_counts {
            self.reported.add(reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sentence::tdb::reassembled_sentence;
    use chrono::{TimeDelta, TimeZone};
    use rstest::rstest;

    const FIRST: &str = "!VATDB,2,1,1,200000001,200000002,0,0,11,0*00";
    const SECOND: &str = "!VATDB,2,2,1,200000001,200000002,0,0,22,0*00";

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 10).unwrap()
    }

    fn secs(s: i64) -> DateTime<Utc> {
        t0() + TimeDelta::seconds(s)
    }

    #[test]
    fn test_two_fragments() {
        let mut reassembler = Reassembler::default();

        assert!(reassembler.reassemble(&[FIRST], secs(0)).is_empty());
        assert_eq!(reassembler.num_open_groups(), 1);

        let result = reassembler.reassemble(&[SECOND], secs(1));
        assert_eq!(result, vec![reassembled_sentence("200000001", "200000002", "1122", 0)]);
        assert!(result[0].starts_with("!VATDB,1,1,0,200000001,200000002,0,0,"));
        assert_eq!(reassembler.counts(), SplitCounts { success: 1, failure: 0 });
        assert_eq!(reassembler.num_open_groups(), 0);
    }

    #[test]
    fn test_out_of_order_fragments() {
        let mut reassembler = Reassembler::default();

        assert!(reassembler.reassemble(&[SECOND], secs(0)).is_empty());
        let result = reassembler.reassemble(&[FIRST], secs(1));

        assert_eq!(result, vec![reassembled_sentence("200000001", "200000002", "1122", 0)]);
        assert_eq!(reassembler.counts(), SplitCounts { success: 1, failure: 0 });
        assert_eq!(reassembler.num_open_groups(), 0);
        assert_eq!(reassembler.finalize_pending_groups_as_boundary_failure(), 0);
        assert_eq!(reassembler.counts(), SplitCounts { success: 1, failure: 0 });
    }

    #[test]
    fn test_first_fragment_last_in_one_batch() {
        let mut reassembler = Reassembler::default();

        let result = reassembler.reassemble(&[
            "!VATDB,3,3,5,a,b,0,0,33,0",
            "!VATDB,3,2,5,a,b,0,0,22,0",
            "!VATDB,3,1,5,a,b,0,0,11,0",
        ], secs(0));

        assert_eq!(result, vec![reassembled_sentence("a", "b", "112233", 0)]);
        assert_eq!(reassembler.counts(), SplitCounts { success: 1, failure: 0 });
        assert_eq!(reassembler.num_open_groups(), 0);
    }

    #[test]
    fn test_fragments_in_one_batch_with_fill() {
        let mut reassembler = Reassembler::default();

        let result = reassembler.reassemble(&[
            "!VATDB,3,1,4,7,8,0,0,w,2",
            "!VATDB,3,2,4,7,8,0,0,w,0",
            "!VATDB,3,3,4,7,8,0,0,0w,0*00",
        ], secs(0));

        // 1111 + 111111 + 000000 111111 -> 22 bits, padded with 2 zero bits
        assert_eq!(result, vec![reassembled_sentence("7", "8", "wt3t", 2)]);
        assert_eq!(reassembler.counts(), SplitCounts { success: 1, failure: 0 });
    }

    #[test]
    fn test_duplicate_index() {
        let mut reassembler = Reassembler::default();

        assert!(reassembler.reassemble(&[FIRST], secs(0)).is_empty());
        assert!(reassembler.reassemble(&[FIRST], secs(1)).is_empty());
        assert_eq!(reassembler.counts(), SplitCounts { success: 0, failure: 1 });

        // the resent first fragment opens a new group
        assert_eq!(reassembler.num_open_groups(), 1);
        let result = reassembler.reassemble(&[SECOND], secs(2));
        assert_eq!(result, vec![reassembled_sentence("200000001", "200000002", "1122", 0)]);
        assert_eq!(reassembler.counts(), SplitCounts { success: 1, failure: 1 });
    }

    #[test]
    fn test_duplicate_index_other_than_first() {
        let mut reassembler = Reassembler::default();

        assert!(reassembler.reassemble(&[
            "!VATDB,3,1,1,a,b,0,0,11,0",
            "!VATDB,3,2,1,a,b,0,0,11,0",
            "!VATDB,3,2,1,a,b,0,0,11,0",
        ], secs(0)).is_empty());
        assert_eq!(reassembler.counts(), SplitCounts { success: 0, failure: 1 });
        assert_eq!(reassembler.num_open_groups(), 0);
    }

    #[test]
    fn test_superseded_by_new_first_fragment() {
        let mut reassembler = Reassembler::default();

        assert!(reassembler.reassemble(&[FIRST], secs(0)).is_empty());
        let result = reassembler.reassemble(&[
            "!VATDB,2,1,2,200000001,200000002,0,0,33,0",
            SECOND,
        ], secs(2));

        assert_eq!(result, vec![reassembled_sentence("200000001", "200000002", "3322", 0)]);
        assert_eq!(reassembler.counts(), SplitCounts { success: 1, failure: 1 });
    }

    #[rstest]
    #[case::just_over_timeout(31, 1)]
    #[case::at_timeout(30, 0)]
    fn test_expiry(#[case] delay_secs: i64, #[case] expected_failures: u64) {
        let mut reassembler = Reassembler::default();

        assert!(reassembler.reassemble(&[FIRST], secs(0)).is_empty());
        assert!(reassembler.reassemble(&["!VATDB,1,1,0,x,y,0,0,1,0"], secs(delay_secs)).len() == 1);

        assert_eq!(reassembler.counts(), SplitCounts { success: 0, failure: expected_failures });
        assert_eq!(reassembler.num_open_groups(), 1 - expected_failures as usize);
    }

    #[test]
    fn test_expired_group_does_not_complete() {
        let mut reassembler = Reassembler::default();

        assert!(reassembler.reassemble(&[FIRST], secs(0)).is_empty());
        // the group expires before the second fragment is registered, which opens a new group
        assert!(reassembler.reassemble(&[SECOND], secs(45)).is_empty());

        assert_eq!(reassembler.counts(), SplitCounts { success: 0, failure: 1 });
        assert_eq!(reassembler.num_open_groups(), 1);
    }

    #[test]
    fn test_expiry_refreshed_by_later_fragment() {
        let mut reassembler = Reassembler::default();

        assert!(reassembler.reassemble(&["!VATDB,3,1,1,a,b,0,0,11,0"], secs(0)).is_empty());
        assert!(reassembler.reassemble(&["!VATDB,3,2,1,a,b,0,0,11,0"], secs(25)).is_empty());
        assert_eq!(reassembler.reassemble(&["!VATDB,3,3,1,a,b,0,0,11,0"], secs(50)).len(), 1);

        assert_eq!(reassembler.counts(), SplitCounts { success: 1, failure: 0 });
    }

    #[test]
    fn test_clock_going_backwards_skips_expiry() {
        let mut reassembler = Reassembler::default();

        assert!(reassembler.reassemble(&[FIRST], secs(100)).is_empty());
        assert!(reassembler.reassemble(&["!VATDB,1,1,0,x,y,0,0,1,0"], secs(0)).len() == 1);

        assert_eq!(reassembler.counts(), SplitCounts::default());
        assert_eq!(reassembler.num_open_groups(), 1);
    }

    #[test]
    fn test_non_integer_index_after_first_fragment() {
        let mut reassembler = Reassembler::default();

        assert!(reassembler.reassemble(&[FIRST], secs(0)).is_empty());
        assert!(reassembler.reassemble(&["!VATDB,2,x,1,200000001,200000002,0,0,22,0*00"], secs(1)).is_empty());

        assert_eq!(reassembler.counts(), SplitCounts { success: 0, failure: 1 });
        assert_eq!(reassembler.num_open_groups(), 0);
    }

    #[rstest]
    #[case::broken_first_fragment("!VATDB,2,1,1,a,b,0,0,11,9", 1)]
    #[case::broken_later_fragment_without_group("!VATDB,2,2,1,a,b,0,0,11,9", 0)]
    #[case::broken_single_fragment("!VATDB,1,1,1,a,b,0,0,,0", 0)]
    #[case::no_identity("!VATDB,2,1", 0)]
    fn test_unparsable_without_open_group(#[case] sentence: &str, #[case] expected_failures: u64) {
        let mut reassembler = Reassembler::default();

        assert!(reassembler.reassemble(&[sentence], secs(0)).is_empty());
        assert_eq!(reassembler.counts(), SplitCounts { success: 0, failure: expected_failures });
        assert_eq!(reassembler.num_open_groups(), 0);
    }

    #[test]
    fn test_invalid_payload_character() {
        let mut reassembler = Reassembler::default();

        assert!(reassembler.reassemble(&[FIRST], secs(0)).is_empty());
        assert!(reassembler.reassemble(&["!VATDB,2,2,1,200000001,200000002,0,0,2x,0"], secs(1)).is_empty());

        assert_eq!(reassembler.counts(), SplitCounts { success: 0, failure: 1 });
        assert_eq!(reassembler.num_open_groups(), 0);
    }

    #[test]
    fn test_fill_exceeding_payload_bits() {
        let mut reassembler = Reassembler::default();

        // a single character has 6 bits, fill 5 is fine
        assert!(reassembler.reassemble(&["!VATDB,2,1,1,a,b,0,0,1,5"], secs(0)).is_empty());
        assert_eq!(reassembler.reassemble(&["!VATDB,2,2,1,a,b,0,0,1,5"], secs(0)).len(), 1);
        assert_eq!(reassembler.counts(), SplitCounts { success: 1, failure: 0 });
    }

    #[test]
    fn test_boundary_finalization() {
        let mut reassembler = Reassembler::default();

        assert!(reassembler.reassemble(&[FIRST], secs(0)).is_empty());
        assert_eq!(reassembler.finalize_pending_groups_as_boundary_failure(), 1);
        assert_eq!(reassembler.counts(), SplitCounts { success: 0, failure: 1 });
        assert_eq!(reassembler.num_open_groups(), 0);

        assert_eq!(reassembler.finalize_pending_groups_as_boundary_failure(), 0);
        assert_eq!(reassembler.counts(), SplitCounts { success: 0, failure: 1 });
    }

    #[test]
    fn test_independent_groups() {
        let mut reassembler = Reassembler::default();

        assert!(reassembler.reassemble(&[
            "!VATDB,2,1,1,a,b,0,0,11,0",
            "!VATDB,2,1,1,a,c,0,0,11,0",
            "!VATDB,3,1,1,a,b,0,0,11,0",
        ], secs(0)).is_empty());
        assert_eq!(reassembler.num_open_groups(), 3);

        let result = reassembler.reassemble(&["!VATDB,2,2,1,a,c,0,0,22,0"], secs(1));
        assert_eq!(result, vec![reassembled_sentence("a", "c", "1122", 0)]);
        assert_eq!(reassembler.num_open_groups(), 2);
        assert_eq!(reassembler.finalize_pending_groups_as_boundary_failure(), 2);
        assert_eq!(reassembler.counts(), SplitCounts { success: 1, failure: 2 });
    }

    #[rstest]
    #[case::single_fragment("!VATDB,1,1,0,200000001,200000002,0,0,11,0*6A")]
    #[case::other_sentence("$VETMK,0,1*40")]
    #[case::vdm("!AIVDM,1,1,,A,13u@Dt002s000000,0*00")]
    fn test_passthrough(#[case] sentence: &str) {
        let mut reassembler = Reassembler::default();

        let result = reassembler.reassemble(&[format!("  {}\r\n", sentence)], secs(0));
        assert_eq!(result, vec![sentence.to_string()]);
        assert_eq!(reassembler.counts(), SplitCounts::default());
        assert_eq!(reassembler.tracked_counts(), SplitCounts::default());
        assert_eq!(reassembler.num_open_groups(), 0);
    }

    #[test]
    fn test_empty_sentence_is_discarded() {
        let mut reassembler = Reassembler::default();
        assert!(reassembler.reassemble(&["", "  "], secs(0)).is_empty());
    }

    #[test]
    fn test_unreported_counts_are_tracked() {
        let mut reassembler = Reassembler::new(ReassemblerConfig {
            report_split_counts: false,
            ..Default::default()
        });

        assert!(reassembler.reassemble(&[FIRST], secs(0)).is_empty());
        assert_eq!(reassembler.reassemble(&[SECOND], secs(1)).len(), 1);
        assert!(reassembler.reassemble(&[FIRST], secs(2)).is_empty());
        assert_eq!(reassembler.finalize_pending_groups_as_boundary_failure(), 1);

        assert_eq!(reassembler.counts(), SplitCounts::default());
        assert_eq!(reassembler.tracked_counts(), SplitCounts { success: 1, failure: 1 });
    }
}
