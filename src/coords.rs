//! Query↔reference coordinate mapping derived from CIGAR operation lists,
//! plus the per-position mismatch/indel status map used for the optional
//! mapping features.

use crate::types::UNMAPPED;
use noodles::sam::alignment::record::cigar::op::Kind as CigarKind;

/// Status flag bits for a mapped query position.
pub const MAP_INSERTION: i32 = 1;
pub const MAP_DELETION: i32 = 2;
pub const MAP_MISMATCH: i32 = 4;

/// Map each query position of the aligned span to its reference offset
/// (relative to the alignment start), or [`UNMAPPED`] for insertions.
///
/// `span_len` is the aligned query span (clips excluded); the returned array
/// has length `span_len + 1`, the final entry being the one-past-the-end
/// reference offset. On the reverse strand the CIGAR is walked back to front
/// so offsets stay forward-sequence-oriented. Mapped offsets are
/// monotonically non-decreasing.
pub fn query_to_ref_positions(
    cigar: &[(CigarKind, usize)],
    strand: i8,
    span_len: usize,
) -> Vec<i64> {
    let mut q2r = vec![UNMAPPED; span_len + 1];
    let mut qpos: usize = 0;
    let mut rpos: i64 = -1;

    let mut walk = |kind: CigarKind, len: usize, q2r: &mut Vec<i64>| match kind {
        CigarKind::Insertion => {
            qpos += len;
        }
        CigarKind::Deletion | CigarKind::Skip => {
            rpos += len as i64;
        }
        CigarKind::Match | CigarKind::SequenceMatch | CigarKind::SequenceMismatch => {
            for offset in 0..len {
                if qpos + offset < span_len {
                    q2r[qpos + offset] = rpos + offset as i64 + 1;
                }
            }
            qpos += len;
            rpos += len as i64;
        }
        // Clips lie outside the aligned span; padding consumes nothing.
        CigarKind::SoftClip | CigarKind::HardClip | CigarKind::Pad => {}
    };

    if strand >= 0 {
        for &(kind, len) in cigar {
            walk(kind, len, &mut q2r);
        }
    } else {
        for &(kind, len) in cigar.iter().rev() {
            walk(kind, len, &mut q2r);
        }
    }
    if qpos <= span_len {
        q2r[qpos] = rpos + 1;
    }
    q2r
}

/// Classify each mapped query position against the reference window.
///
/// `q2r` must have length `query.len() + 1` (from [`query_to_ref_positions`]).
/// Bit 0: insertion (no reference base). Bit 1: deletion-adjacent (previous
/// mapped offset was not exactly one less). Bit 2: case-insensitive base
/// mismatch. Position 0 has no previous context and never gets the deletion
/// bit; the trailing sentinel entry stays 0.
pub fn query_to_ref_map_status(q2r: &[i64], query: &[u8], reference: &[u8]) -> Vec<i32> {
    assert_eq!(q2r.len(), query.len() + 1);
    let mut status = vec![0i32; q2r.len()];

    if q2r[0] == UNMAPPED {
        status[0] = MAP_INSERTION;
    } else if !base_eq(query[0], reference[q2r[0] as usize]) {
        status[0] = MAP_MISMATCH;
    }

    for idx in 1..q2r.len().saturating_sub(1) {
        if q2r[idx] == UNMAPPED {
            status[idx] = MAP_INSERTION;
            continue;
        }
        if !base_eq(query[idx], reference[q2r[idx] as usize]) {
            status[idx] += MAP_MISMATCH;
        }
        if q2r[idx - 1] != UNMAPPED && q2r[idx] != q2r[idx - 1] + 1 {
            status[idx] += MAP_DELETION;
        }
    }
    status
}

fn base_eq(a: u8, b: u8) -> bool {
    a.to_ascii_uppercase() == b.to_ascii_uppercase()
}

/// Slice W-length (`2 * half_width + 1`) status windows around a site for the
/// forward and reverse strands. Positions falling outside the read pad with
/// [`MAP_INSERTION`]; the reverse window is flipped to read along the
/// complement strand.
pub fn kmer_map_windows(
    offset: i64,
    rev_offset: i64,
    half_width: usize,
    status: &[i32],
) -> (Vec<i32>, Vec<i32>) {
    // Drop the trailing sentinel entry.
    let status = &status[..status.len() - 1];
    let fwd = padded_window(status, offset, half_width);
    let mut rev = padded_window(status, rev_offset, half_width);
    rev.reverse();
    (fwd, rev)
}

fn padded_window(status: &[i32], center: i64, half_width: usize) -> Vec<i32> {
    let width = 2 * half_width + 1;
    let mut window = Vec::with_capacity(width);
    for i in 0..width {
        let pos = center - half_width as i64 + i as i64;
        if pos < 0 || pos >= status.len() as i64 {
            window.push(MAP_INSERTION);
        } else {
            window.push(status[pos as usize]);
        }
    }
    window
}

/// Percent identity from CIGAR counts and the NM tag.
///
/// NM counts mismatches plus inserted and deleted bases, so
/// mismatches = NM − I − D and matches = M − mismatches. A missing NM tag is
/// treated as indels-only (no mismatches).
pub fn percent_identity(cigar: &[(CigarKind, usize)], nm: Option<i64>) -> f64 {
    let mut aligned = 0i64;
    let mut ins = 0i64;
    let mut del = 0i64;
    for &(kind, len) in cigar {
        match kind {
            CigarKind::Match | CigarKind::SequenceMatch | CigarKind::SequenceMismatch => {
                aligned += len as i64;
            }
            CigarKind::Insertion => ins += len as i64,
            CigarKind::Deletion => del += len as i64,
            _ => {}
        }
    }
    let total = aligned + ins + del;
    if total == 0 {
        return 0.0;
    }
    let mismatches = (nm.unwrap_or(ins + del) - ins - del).max(0);
    (aligned - mismatches).max(0) as f64 / total as f64
}
