use kinemod::bam_view::ReadView;
use kinemod::cli::ExtractMode;
use kinemod::coords::MAP_MISMATCH;
use kinemod::extract::{expected_batches, extract_read_features, ExtractConfig};
use kinemod::fasta::FastaDb;
use kinemod::motif::expand_motifs;
use kinemod::normalize::NormMethod;
use noodles::sam::alignment::record::cigar::op::Kind;
use noodles::sam::alignment::record::Flags;

fn denovo_config(seq_len: usize) -> ExtractConfig {
    ExtractConfig {
        mode: ExtractMode::Denovo,
        half_width: (seq_len - 1) / 2,
        motifs: expand_motifs("CG").unwrap(),
        motif_len: 2,
        mod_loc: 0,
        methy_label: 1,
        norm: NormMethod::Zscore,
        no_decode: false,
        mapq: 1,
        identity: 0.0,
        no_supplementary: false,
        mapfea: false,
        include_clipped: false,
        loginfo: false,
        holeids_e: None,
        holeids_ne: None,
        fasta: None,
    }
}

fn synthetic_view(seq: &[u8]) -> ReadView {
    let len = seq.len();
    ReadView {
        name: "m0/1/ccs".to_string(),
        qalign_start: 0,
        qalign_end: len,
        fwd_seq: seq.to_vec(),
        fwd_qual: Some(vec![30; len]),
        ref_name: None,
        ref_start: None,
        ref_end: None,
        cigar: Vec::new(),
        flags: Flags::UNMAPPED,
        mapq: 255,
        nm: None,
        ipd_fwd: Some(vec![10; len]),
        ipd_rev: Some(vec![10; len]),
        pw_fwd: Some(vec![7; len]),
        pw_rev: Some(vec![7; len]),
        npass_fwd: 6,
        npass_rev: 5,
    }
}

#[test]
fn denovo_single_cg_site_at_window_boundary() {
    // One CG, target base at offset 10; with half-width 10 both strand
    // windows fit exactly inside the 22-base read.
    let seq = b"AAAAAAAAAACGTTTTTTTTTT";
    let cfg = denovo_config(21);
    let rows = extract_read_features(&synthetic_view(seq), &cfg);

    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.chrom, ".");
    assert_eq!(row.chrom_pos, -1);
    assert_eq!(row.strand, '.');
    assert_eq!(row.read_offset, 10);
    assert_eq!(row.fwd.seq.len(), 21);
    assert_eq!(row.rev.seq.len(), 21);
    for arr in [&row.fwd.ipd, &row.fwd.pw, &row.fwd.qual, &row.rev.ipd, &row.rev.pw, &row.rev.qual]
    {
        assert_eq!(arr.len(), 21);
        // Uniform signal input normalizes to all zeros.
        assert!(arr.iter().all(|&x| x == 0.0));
    }
    assert!(row.fwd.map.is_none());
    assert!(row.rev.map.is_none());
    assert_eq!(row.fwd.npass, 6);
    assert_eq!(row.rev.npass, 5);
    assert_eq!(row.label, 1);
}

#[test]
fn reverse_kmer_is_complement_of_forward_window() {
    let seq = b"AAAAAAAAAACGTTTTTTTTTT";
    let cfg = denovo_config(21);
    let rows = extract_read_features(&synthetic_view(seq), &cfg);
    let row = &rows[0];
    assert_eq!(row.fwd.seq, "AAAAAAAAAACGTTTTTTTTT");
    // rev window is centered one base over, on the reverse complement.
    assert_eq!(row.rev.seq.len(), 21);
    assert!(row.rev.seq.contains("CG"));
}

#[test]
fn sites_too_close_to_read_ends_are_dropped() {
    // CG at offset 2: forward window cannot fit.
    let seq = b"AACGAAAAAAAAAAAAAAAAAA";
    let cfg = denovo_config(21);
    let rows = extract_read_features(&synthetic_view(seq), &cfg);
    assert!(rows.is_empty());
}

#[test]
fn smaller_window_finds_interior_sites() {
    let seq = b"AAAAACGAAACGAAAAA";
    let cfg = denovo_config(5);
    let rows = extract_read_features(&synthetic_view(seq), &cfg);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].read_offset, 5);
    assert_eq!(rows[1].read_offset, 10);
    assert_eq!(rows[0].fwd.seq, "AACGA");
}

#[test]
fn extraction_is_deterministic() {
    let seq = b"AAAAACGAAACGAAAAA";
    let cfg = denovo_config(5);
    let view = synthetic_view(seq);
    let first = extract_read_features(&view, &cfg);
    let second = extract_read_features(&view, &cfg);
    assert_eq!(first, second);
    let first_tsv: Vec<String> = first.iter().map(|r| r.to_tsv()).collect();
    let second_tsv: Vec<String> = second.iter().map(|r| r.to_tsv()).collect();
    assert_eq!(first_tsv, second_tsv);
}

#[test]
fn mismatched_signal_length_drops_the_read() {
    let seq = b"AAAAACGAAACGAAAAA";
    let cfg = denovo_config(5);
    let mut view = synthetic_view(seq);
    view.ipd_fwd = Some(vec![10; seq.len() - 1]);
    assert!(extract_read_features(&view, &cfg).is_empty());
}

#[test]
fn absent_signal_tag_drops_the_read() {
    let seq = b"AAAAACGAAACGAAAAA";
    let cfg = denovo_config(5);
    let mut view = synthetic_view(seq);
    view.pw_rev = None;
    assert!(extract_read_features(&view, &cfg).is_empty());
}

#[test]
fn tsv_row_has_22_columns_with_placeholder_spreads() {
    let seq = b"AAAAACGAAACGAAAAA";
    let cfg = denovo_config(5);
    let rows = extract_read_features(&synthetic_view(seq), &cfg);
    let line = rows[0].to_tsv();
    let fields: Vec<&str> = line.split('\t').collect();
    assert_eq!(fields.len(), 22);
    // ipd/pw spread columns and denovo map columns are placeholders.
    assert_eq!(fields[8], ".");
    assert_eq!(fields[10], ".");
    assert_eq!(fields[12], ".");
    assert_eq!(fields[20], ".");
    // comma-joined arrays have one value per window position.
    assert_eq!(fields[7].split(',').count(), 5);
    assert_eq!(fields[11].split(',').count(), 5);
}

fn align_config(seq_len: usize) -> ExtractConfig {
    let mut cfg = denovo_config(seq_len);
    cfg.mode = ExtractMode::Align;
    cfg
}

fn aligned_view(
    seq: &[u8],
    cigar: Vec<(Kind, usize)>,
    qalign: (usize, usize),
    ref_span: (usize, usize),
    reverse: bool,
) -> ReadView {
    let mut view = synthetic_view(seq);
    view.cigar = cigar;
    view.qalign_start = qalign.0;
    view.qalign_end = qalign.1;
    view.ref_name = Some("chr1".to_string());
    view.ref_start = Some(ref_span.0);
    view.ref_end = Some(ref_span.1);
    view.mapq = 60;
    view.flags = if reverse {
        Flags::REVERSE_COMPLEMENTED
    } else {
        Flags::empty()
    };
    view
}

#[test]
fn align_mode_reports_absolute_forward_coordinates() {
    let seq = b"AAAAAAAAAACGTTTTTTTTTT";
    let cfg = align_config(21);
    let view = aligned_view(seq, vec![(Kind::Match, 22)], (0, 22), (1000, 1022), false);
    let rows = extract_read_features(&view, &cfg);

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].chrom, "chr1");
    assert_eq!(rows[0].strand, '+');
    // Site at read offset 10 maps to reference offset 10 under an all-match
    // CIGAR, so the absolute position is ref_start + 10.
    assert_eq!(rows[0].chrom_pos, 1010);
}

#[test]
fn align_mode_mirrors_reverse_strand_coordinates() {
    let seq = b"AAAAAAAAAACGTTTTTTTTTT";
    let cfg = align_config(21);
    let view = aligned_view(seq, vec![(Kind::Match, 22)], (0, 22), (1000, 1022), true);
    let rows = extract_read_features(&view, &cfg);

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].strand, '-');
    // ref_end - 1 - q2r = 1022 - 1 - 10.
    assert_eq!(rows[0].chrom_pos, 1011);
}

#[test]
fn clipped_sites_skipped_unless_included() {
    let seq = b"AAAAAAAAAACGTTTTTTTTTT";
    // Leading 12-base soft clip puts the CG site outside the aligned span.
    let cigar = vec![(Kind::SoftClip, 12), (Kind::Match, 10)];
    let view = aligned_view(seq, cigar, (12, 22), (1000, 1010), false);

    let cfg = align_config(21);
    assert!(extract_read_features(&view, &cfg).is_empty());

    let mut cfg = align_config(21);
    cfg.include_clipped = true;
    let rows = extract_read_features(&view, &cfg);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].chrom, "chr1");
    assert_eq!(rows[0].chrom_pos, -1);
    assert_eq!(rows[0].strand, '+');
    assert!(rows[0].fwd.map.is_none());
}

#[test]
fn mapfea_windows_flag_reference_mismatches() {
    let seq = b"AAAAAAAAAACGTTTTTTTTTT";
    let mut contig = vec![b'A'; 1000];
    contig.extend_from_slice(seq);
    // Reference disagrees with the read at offset 15.
    contig[1015] = b'G';

    let mut cfg = align_config(21);
    cfg.mapfea = true;
    cfg.fasta = Some(FastaDb::from_contigs(vec![("chr1".to_string(), contig)]));
    let view = aligned_view(seq, vec![(Kind::Match, 22)], (0, 22), (1000, 1022), false);
    let rows = extract_read_features(&view, &cfg);

    assert_eq!(rows.len(), 1);
    let fwd = rows[0].fwd.map.as_ref().unwrap();
    assert_eq!(fwd.len(), 21);
    assert_eq!(fwd[15], MAP_MISMATCH);
    assert_eq!(fwd.iter().filter(|&&s| s != 0).count(), 1);
    // Reverse window is shifted one base over and flipped.
    let rev = rows[0].rev.map.as_ref().unwrap();
    assert_eq!(rev[6], MAP_MISMATCH);
}

#[test]
fn batch_count_is_ceiling_of_reads_over_batch_size() {
    assert_eq!(expected_batches(0, 50), 0);
    assert_eq!(expected_batches(1, 50), 1);
    assert_eq!(expected_batches(50, 50), 1);
    assert_eq!(expected_batches(51, 50), 2);
    assert_eq!(expected_batches(101, 50), 3);
}
