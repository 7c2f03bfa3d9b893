use kinemod::coords::{
    kmer_map_windows, percent_identity, query_to_ref_map_status, query_to_ref_positions,
    MAP_DELETION, MAP_INSERTION, MAP_MISMATCH,
};
use noodles::sam::alignment::record::cigar::op::Kind;

#[test]
fn all_match_cigar_maps_every_position() {
    let q2r = query_to_ref_positions(&[(Kind::Match, 5)], 1, 5);
    assert_eq!(q2r, vec![0, 1, 2, 3, 4, 5]);
}

#[test]
fn insertion_yields_unmapped_sentinels() {
    // 3M 2I 3M: query positions 3 and 4 are inserted bases.
    let cigar = [(Kind::Match, 3), (Kind::Insertion, 2), (Kind::Match, 3)];
    let q2r = query_to_ref_positions(&cigar, 1, 8);
    assert_eq!(q2r, vec![0, 1, 2, -1, -1, 3, 4, 5, 6]);
}

#[test]
fn deletion_skips_reference_bases() {
    let cigar = [(Kind::Match, 3), (Kind::Deletion, 2), (Kind::Match, 3)];
    let q2r = query_to_ref_positions(&cigar, 1, 6);
    assert_eq!(q2r, vec![0, 1, 2, 5, 6, 7, 8]);
}

#[test]
fn mapped_offsets_are_monotonic() {
    let cigar = [
        (Kind::Match, 2),
        (Kind::Insertion, 1),
        (Kind::Match, 2),
        (Kind::Deletion, 3),
        (Kind::Match, 2),
    ];
    let q2r = query_to_ref_positions(&cigar, 1, 7);
    let mapped: Vec<i64> = q2r.iter().copied().filter(|&p| p != -1).collect();
    for pair in mapped.windows(2) {
        assert!(pair[0] <= pair[1]);
    }
}

#[test]
fn reverse_strand_walks_cigar_back_to_front() {
    // Soft clip is at the other end once the CIGAR is reversed.
    let cigar = [(Kind::SoftClip, 2), (Kind::Match, 4)];
    let q2r = query_to_ref_positions(&cigar, -1, 4);
    assert_eq!(q2r, vec![0, 1, 2, 3, 4]);
}

#[test]
fn map_status_flags_mismatch() {
    let q2r = vec![0, 1, 2, 3, 4];
    let status = query_to_ref_map_status(&q2r, b"ACGT", b"AgGT");
    assert_eq!(status, vec![0, MAP_MISMATCH, 0, 0, 0]);
}

#[test]
fn map_status_flags_insertion_and_deletion() {
    // Query position 1 inserted; position 3 jumps a deleted reference base.
    let q2r = vec![0, -1, 2, 5, 6];
    let status = query_to_ref_map_status(&q2r, b"AAAA", b"AAAAAAA");
    assert_eq!(status[1], MAP_INSERTION);
    // Position after an insertion has no mapped predecessor, so no deletion bit.
    assert_eq!(status[2], 0);
    assert_eq!(status[3], MAP_DELETION);
}

#[test]
fn map_status_position_zero_never_gets_deletion_bit() {
    let q2r = vec![2, 3, 4];
    let status = query_to_ref_map_status(&q2r, b"TT", b"AATT");
    assert_eq!(status[0], 0);
}

#[test]
fn kmer_map_windows_pad_with_insertion_flag() {
    // 5 positions plus the trailing sentinel.
    let status = vec![0, 4, 0, 2, 0, 0];
    let (fwd, rev) = kmer_map_windows(1, 3, 2, &status);
    assert_eq!(fwd, vec![MAP_INSERTION, 0, 4, 0, 2]);
    // Reverse window around 3 is [4, 0, 2, 0, pad], flipped.
    assert_eq!(rev, vec![MAP_INSERTION, 0, 2, 0, 4]);
}

#[test]
fn percent_identity_from_nm() {
    let cigar = [(Kind::Match, 10)];
    assert!((percent_identity(&cigar, Some(2)) - 0.8).abs() < 1e-12);
}

#[test]
fn percent_identity_discounts_indels_from_nm() {
    let cigar = [(Kind::Match, 8), (Kind::Insertion, 1), (Kind::Deletion, 1)];
    // NM=4 → 2 mismatches; (8-2)/10.
    assert!((percent_identity(&cigar, Some(4)) - 0.6).abs() < 1e-12);
}

#[test]
fn percent_identity_without_nm_assumes_no_mismatches() {
    let cigar = [(Kind::Match, 9), (Kind::Insertion, 1)];
    assert!((percent_identity(&cigar, None) - 0.9).abs() < 1e-12);
}
