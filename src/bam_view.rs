//! Normalized in-memory projection of one BAM record.
//!
//! [`ReadView`] carries exactly the fields the pipelines consume, decoupling
//! them from the BAM library's lazily-decoded record type. A view is built
//! once by the reader stage and owned by the worker that processes it.

use anyhow::{anyhow, Result};
use noodles::bam;
use noodles::sam;
use noodles::sam::alignment::record::cigar::op::Kind as CigarKind;
use noodles::sam::alignment::record::data::field::{value::Array, Tag, Value};
use noodles::sam::alignment::record::{Flags, QualityScores as _};

use crate::motif::reverse_complement;

const TAG_IPD_FWD: Tag = Tag::new(b'f', b'i');
const TAG_IPD_REV: Tag = Tag::new(b'r', b'i');
const TAG_PW_FWD: Tag = Tag::new(b'f', b'p');
const TAG_PW_REV: Tag = Tag::new(b'r', b'p');
const TAG_NPASS_FWD: Tag = Tag::new(b'f', b'n');
const TAG_NPASS_REV: Tag = Tag::new(b'r', b'n');

#[derive(Debug, Clone)]
pub struct ReadView {
    pub name: String,
    /// Aligned query span in stored-sequence orientation (soft clips excluded).
    pub qalign_start: usize,
    pub qalign_end: usize,
    /// Read bases/qualities in sequencer (forward) orientation.
    pub fwd_seq: Vec<u8>,
    pub fwd_qual: Option<Vec<u8>>,
    pub ref_name: Option<String>,
    /// 0-based half-open reference span.
    pub ref_start: Option<usize>,
    pub ref_end: Option<usize>,
    pub cigar: Vec<(CigarKind, usize)>,
    pub flags: Flags,
    pub mapq: u8,
    pub nm: Option<i64>,
    /// Kinetic tags; `None` means the tag is absent, which is distinct from an
    /// empty array.
    pub ipd_fwd: Option<Vec<u8>>,
    pub ipd_rev: Option<Vec<u8>>,
    pub pw_fwd: Option<Vec<u8>>,
    pub pw_rev: Option<Vec<u8>>,
    pub npass_fwd: i32,
    pub npass_rev: i32,
}

impl ReadView {
    pub fn from_record(record: &bam::Record, header: &sam::Header) -> Result<Self> {
        let name = record
            .name()
            .map(|n| n.to_string())
            .unwrap_or_default();
        let flags = record.flags();

        let mut cigar = Vec::new();
        for result in record.cigar().iter() {
            let op = result?;
            cigar.push((op.kind(), op.len()));
        }

        let mut seq: Vec<u8> = record.sequence().iter().collect();
        let mut qual = record
            .quality_scores()
            .iter()
            .collect::<std::io::Result<Vec<u8>>>()
            .map_err(|e| anyhow!("bad quality scores for read {name}: {e}"))?;
        // 0xff-filled quality means "absent" in BAM.
        let has_qual = !qual.is_empty() && qual.iter().any(|&q| q != 0xff);
        if flags.is_reverse_complemented() {
            seq = reverse_complement(&seq);
            qual.reverse();
        }

        let ref_name = match record.reference_sequence_id() {
            Some(Ok(id)) => header
                .reference_sequences()
                .get_index(id)
                .map(|(n, _)| n.to_string()),
            Some(Err(e)) => return Err(anyhow!("bad reference id for read {name}: {e}")),
            None => None,
        };
        let ref_start = match record.alignment_start() {
            Some(Ok(pos)) => Some(pos.get() - 1),
            Some(Err(e)) => return Err(anyhow!("bad alignment start for read {name}: {e}")),
            None => None,
        };
        let ref_end = ref_start.map(|start| start + reference_span(&cigar));

        let (qalign_start, qalign_end) = query_alignment_span(&cigar, seq.len());

        Ok(ReadView {
            name,
            qalign_start,
            qalign_end,
            fwd_seq: seq,
            fwd_qual: if has_qual { Some(qual) } else { None },
            ref_name,
            ref_start,
            ref_end,
            cigar,
            flags,
            mapq: record.mapping_quality().map(|q| q.get()).unwrap_or(255),
            nm: get_int_tag(record, Tag::EDIT_DISTANCE),
            ipd_fwd: get_u8_array_tag(record, TAG_IPD_FWD),
            ipd_rev: get_u8_array_tag(record, TAG_IPD_REV),
            pw_fwd: get_u8_array_tag(record, TAG_PW_FWD),
            pw_rev: get_u8_array_tag(record, TAG_PW_REV),
            npass_fwd: get_int_tag(record, TAG_NPASS_FWD).unwrap_or(0) as i32,
            npass_rev: get_int_tag(record, TAG_NPASS_REV).unwrap_or(0) as i32,
        })
    }

    pub fn read_len(&self) -> usize {
        self.fwd_seq.len()
    }

    /// Aligned query span flipped to forward-sequence coordinates. Clip
    /// boundaries are reported query-orientation-relative, so they mirror
    /// around the read length on reverse-strand alignments.
    pub fn forward_align_span(&self) -> (usize, usize) {
        if self.flags.is_reverse_complemented() {
            let len = self.read_len();
            (len - self.qalign_end, len - self.qalign_start)
        } else {
            (self.qalign_start, self.qalign_end)
        }
    }
}

fn reference_span(cigar: &[(CigarKind, usize)]) -> usize {
    cigar
        .iter()
        .filter(|(kind, _)| {
            matches!(
                kind,
                CigarKind::Match
                    | CigarKind::Deletion
                    | CigarKind::Skip
                    | CigarKind::SequenceMatch
                    | CigarKind::SequenceMismatch
            )
        })
        .map(|(_, len)| len)
        .sum()
}

/// First and one-past-last aligned base in the stored sequence: leading and
/// trailing soft clips bound the span.
fn query_alignment_span(cigar: &[(CigarKind, usize)], seq_len: usize) -> (usize, usize) {
    let mut start = 0usize;
    for &(kind, len) in cigar {
        match kind {
            CigarKind::HardClip => {}
            CigarKind::SoftClip => start += len,
            _ => break,
        }
    }
    let mut end = seq_len;
    for &(kind, len) in cigar.iter().rev() {
        match kind {
            CigarKind::HardClip => {}
            CigarKind::SoftClip => end = end.saturating_sub(len),
            _ => break,
        }
    }
    (start.min(seq_len), end.max(start.min(seq_len)))
}

fn get_u8_array_tag(record: &bam::Record, tag: Tag) -> Option<Vec<u8>> {
    let data = record.data();
    // Bind before returning: the match scrutinee borrows `data`.
    let values = match data.get(&tag) {
        Some(Ok(Value::Array(Array::UInt8(values)))) => {
            values.iter().collect::<std::io::Result<Vec<u8>>>().ok()
        }
        _ => None,
    };
    values
}

fn get_int_tag(record: &bam::Record, tag: Tag) -> Option<i64> {
    let data = record.data();
    let value = match data.get(&tag) {
        Some(Ok(value)) => value.as_int(),
        _ => None,
    };
    value
}
