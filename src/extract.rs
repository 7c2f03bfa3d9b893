//! Feature-extraction pipeline: stream BAM records in batches, fan out to
//! worker threads that window kinetic signals around motif sites, and drain
//! feature rows through a single TSV writer.

use anyhow::{anyhow, Context, Result};
use crossfire::mpmc;
use flate2::write::GzEncoder;
use flate2::Compression;
use noodles::bam;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;

use crate::bam_view::ReadView;
use crate::cli::{ExtractArgs, ExtractMode};
use crate::codec;
use crate::coords;
use crate::fasta::FastaDb;
use crate::motif::{expand_motifs, motif_sites, reverse_complement};
use crate::normalize::{normalize_signals, NormMethod};
use crate::types::{HashSet, HashSetExt, UNMAPPED};

#[derive(Debug, Default)]
pub struct Stats {
    pub total_reads: u64,
    pub failed_reads: u64,
    pub batches: u64,
    pub rows_written: u64,
}

/// Validated extraction configuration shared read-only across workers.
pub struct ExtractConfig {
    pub mode: ExtractMode,
    pub half_width: usize,
    pub motifs: Vec<Vec<u8>>,
    pub motif_len: usize,
    pub mod_loc: usize,
    pub methy_label: u8,
    pub norm: NormMethod,
    pub no_decode: bool,
    pub mapq: u8,
    pub identity: f64,
    pub no_supplementary: bool,
    pub mapfea: bool,
    pub include_clipped: bool,
    pub loginfo: bool,
    pub holeids_e: Option<HashSet<String>>,
    pub holeids_ne: Option<HashSet<String>>,
    pub fasta: Option<FastaDb>,
}

impl ExtractConfig {
    pub fn from_args(args: &ExtractArgs) -> Result<Self> {
        if args.seq_len % 2 == 0 {
            return Err(anyhow!("--seq-len must be odd, got {}", args.seq_len));
        }
        let motifs = expand_motifs(&args.motifs)?;
        let motif_len = motifs[0].len();
        if args.mod_loc >= motif_len {
            return Err(anyhow!(
                "--mod-loc {} is outside the motif (length {})",
                args.mod_loc,
                motif_len
            ));
        }
        let fasta = match (args.mode, &args.reference) {
            (ExtractMode::Align, Some(path)) => Some(FastaDb::load(path)?),
            (ExtractMode::Align, None) => {
                return Err(anyhow!("--reference is required in align mode"));
            }
            (ExtractMode::Denovo, _) => None,
        };
        if args.mapfea && args.mode != ExtractMode::Align {
            return Err(anyhow!("--mapfea requires --mode align"));
        }
        Ok(Self {
            mode: args.mode,
            half_width: (args.seq_len - 1) / 2,
            motifs,
            motif_len,
            mod_loc: args.mod_loc,
            methy_label: args.methy_label,
            norm: args.norm,
            no_decode: args.no_decode,
            mapq: args.mapq,
            identity: args.identity,
            no_supplementary: args.no_supplementary,
            mapfea: args.mapfea,
            include_clipped: args.include_clipped,
            loginfo: args.loginfo,
            holeids_e: read_name_set(args.holeids_e.as_deref())?,
            holeids_ne: read_name_set(args.holeids_ne.as_deref())?,
            fasta,
        })
    }
}

fn read_name_set(path: Option<&Path>) -> Result<Option<HashSet<String>>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let file = File::open(path)
        .with_context(|| format!("failed to open read-name list {}", path.display()))?;
    let mut names = HashSet::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if let Some(name) = line.split('\t').next() {
            if !name.is_empty() {
                names.insert(name.to_string());
            }
        }
    }
    tracing::info!(count = names.len(), path = %path.display(), "loaded read-name list");
    Ok(Some(names))
}

/// One strand's fixed-width feature block.
#[derive(Debug, Clone, PartialEq)]
pub struct KmerBlock {
    pub seq: String,
    pub npass: i32,
    pub ipd: Vec<f64>,
    pub pw: Vec<f64>,
    pub qual: Vec<f64>,
    pub map: Option<Vec<i32>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub chrom: String,
    pub chrom_pos: i64,
    pub strand: char,
    pub read_name: String,
    pub read_offset: usize,
    pub fwd: KmerBlock,
    pub rev: KmerBlock,
    pub label: u8,
}

impl FeatureRow {
    /// 22 tab-separated columns; numeric sub-arrays are comma-joined and
    /// absent array columns (ipd/pw spreads, denovo map columns) are ".".
    pub fn to_tsv(&self) -> String {
        let mut fields: Vec<String> = Vec::with_capacity(22);
        fields.push(self.chrom.clone());
        fields.push(self.chrom_pos.to_string());
        fields.push(self.strand.to_string());
        fields.push(self.read_name.clone());
        fields.push(self.read_offset.to_string());
        push_kmer_fields(&mut fields, &self.fwd);
        push_kmer_fields(&mut fields, &self.rev);
        fields.push(self.label.to_string());
        fields.join("\t")
    }
}

fn push_kmer_fields(fields: &mut Vec<String>, kmer: &KmerBlock) {
    fields.push(kmer.seq.clone());
    fields.push(kmer.npass.to_string());
    fields.push(join_floats(&kmer.ipd));
    fields.push(".".to_string());
    fields.push(join_floats(&kmer.pw));
    fields.push(".".to_string());
    fields.push(join_floats(&kmer.qual));
    fields.push(match &kmer.map {
        Some(map) => join_ints(map),
        None => ".".to_string(),
    });
}

fn join_floats(xs: &[f64]) -> String {
    xs.iter()
        .map(|x| x.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn join_ints(xs: &[i32]) -> String {
    xs.iter()
        .map(|x| x.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Expected number of batches for a pre-scanned record count.
pub fn expected_batches(total: u64, batch_size: usize) -> u64 {
    (total + batch_size as u64 - 1) / batch_size as u64
}

pub fn default_output_path(input: &Path, gzip: bool) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default();
    let name = if gzip {
        format!("{}.features.tsv.gz", stem.to_string_lossy())
    } else {
        format!("{}.features.tsv", stem.to_string_lossy())
    };
    input.with_file_name(name)
}

pub fn run(args: &ExtractArgs) -> Result<Stats> {
    let start = Instant::now();
    let cfg = ExtractConfig::from_args(args)?;

    let out_path = match &args.output {
        Some(path) => {
            let mut path = path.clone();
            if args.gzip && path.extension().is_none_or(|e| e != "gz") {
                path.set_file_name(format!("{}.gz", path.file_name().unwrap_or_default().to_string_lossy()));
            }
            path
        }
        None => default_output_path(&args.in_bam, args.gzip),
    };
    let out_file = File::create(&out_path)
        .with_context(|| format!("failed to create {}", out_path.display()))?;
    let mut out: Box<dyn Write + Send> = if args.gzip {
        Box::new(BufWriter::new(GzEncoder::new(out_file, Compression::default())))
    } else {
        Box::new(BufWriter::new(out_file))
    };

    let mut stats = Stats::default();

    // Pre-scan for the total record count; two passes over the input keep the
    // batch accounting simple.
    let mut reader = bam::io::reader::Builder
        .build_from_path(&args.in_bam)
        .with_context(|| format!("failed to open {}", args.in_bam.display()))?;
    let header = reader.read_header()?;

    if args.mode == ExtractMode::Align && header.reference_sequences().is_empty() {
        // Unaligned input in reference-aware mode: documented empty-pipeline
        // fallback, the output file is created but stays empty.
        tracing::warn!(
            "input has no sequences defined; align the reads first or use --mode denovo"
        );
        out.flush()?;
        return Ok(stats);
    }

    let mut total: u64 = 0;
    for result in reader.records() {
        result?;
        total += 1;
    }
    let n_batches = expected_batches(total, args.holes_batch);
    tracing::info!(
        reads = total,
        batches = n_batches,
        batch_size = args.holes_batch,
        "pre-scan complete"
    );

    let worker_count = if args.threads <= 3 { 1 } else { args.threads - 3 };
    crossfire::detect_backoff_cfg();
    let cap = worker_count.saturating_mul(4).max(8);
    let (tx_work, rx_work) = mpmc::bounded_blocking::<Vec<ReadView>>(cap);
    let (tx_rows, rx_rows) = mpmc::bounded_blocking::<Vec<String>>(cap);

    let cfg_ref = &cfg;
    let rows_written = thread::scope(|scope| -> Result<u64> {
        let writer_handle = scope.spawn(move || -> Result<u64> {
            let mut written: u64 = 0;
            while let Ok(batch) = rx_rows.recv() {
                for line in &batch {
                    out.write_all(line.as_bytes())?;
                    out.write_all(b"\n")?;
                }
                out.flush()?;
                written += batch.len() as u64;
            }
            out.flush()?;
            Ok(written)
        });

        let mut worker_handles = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let rx_work = rx_work.clone();
            let tx_rows = tx_rows.clone();
            worker_handles.push(scope.spawn(move || {
                let mut processed: u64 = 0;
                let mut failed: u64 = 0;
                while let Ok(batch) = rx_work.recv() {
                    let mut lines = Vec::new();
                    for view in &batch {
                        let rows = extract_read_features(view, cfg_ref);
                        if rows.is_empty() {
                            failed += 1;
                        } else {
                            lines.extend(rows.iter().map(FeatureRow::to_tsv));
                        }
                        processed += 1;
                    }
                    if !lines.is_empty() && tx_rows.send(lines).is_err() {
                        break;
                    }
                }
                tracing::info!(worker_id, processed, failed, "extract worker finished");
                (processed, failed)
            }));
        }
        // Only workers hold row senders from here on, so the writer stops as
        // soon as the last worker exits.
        drop(tx_rows);

        let mut reader = bam::io::reader::Builder.build_from_path(&args.in_bam)?;
        let header = reader.read_header()?;
        let mut batch: Vec<ReadView> = Vec::with_capacity(args.holes_batch);
        for result in reader.records() {
            let record = result?;
            let view = ReadView::from_record(&record, &header)?;
            stats.total_reads += 1;
            batch.push(view);
            if batch.len() == args.holes_batch {
                stats.batches += 1;
                tx_work
                    .send(std::mem::take(&mut batch))
                    .map_err(|_| anyhow!("extract workers exited early"))?;
            }
        }
        if !batch.is_empty() {
            stats.batches += 1;
            tx_work
                .send(batch)
                .map_err(|_| anyhow!("extract workers exited early"))?;
        }
        drop(tx_work);

        for handle in worker_handles {
            let (_, failed) = handle.join().map_err(|_| anyhow!("extract worker panicked"))?;
            stats.failed_reads += failed;
        }
        writer_handle
            .join()
            .map_err(|_| anyhow!("feature writer panicked"))?
    })?;

    stats.rows_written = rows_written;
    tracing::info!(
        reads = stats.total_reads,
        failed = stats.failed_reads,
        rows = stats.rows_written,
        output = %out_path.display(),
        elapsed_s = start.elapsed().as_secs_f64(),
        "feature extraction complete"
    );
    Ok(stats)
}

/// Extract all candidate-site feature rows from one read. An empty result
/// means the read was filtered or unusable; the caller counts it as failed.
pub fn extract_read_features(view: &ReadView, cfg: &ExtractConfig) -> Vec<FeatureRow> {
    if let Some(included) = &cfg.holeids_e {
        if !included.contains(&view.name) {
            return Vec::new();
        }
    }
    if let Some(excluded) = &cfg.holeids_ne {
        if excluded.contains(&view.name) {
            return Vec::new();
        }
    }

    let aligned = cfg.mode == ExtractMode::Align;
    if aligned {
        let flags = view.flags;
        if flags.is_unmapped() || flags.is_secondary() || flags.is_duplicate() {
            log_skip(cfg, &view.name, "unmapped/secondary/duplicate");
            return Vec::new();
        }
        if cfg.no_supplementary && flags.is_supplementary() {
            log_skip(cfg, &view.name, "supplementary");
            return Vec::new();
        }
        if view.mapq < cfg.mapq {
            log_skip(cfg, &view.name, "low mapping quality");
            return Vec::new();
        }
        if coords::percent_identity(&view.cigar, view.nm) < cfg.identity {
            log_skip(cfg, &view.name, "low alignment identity");
            return Vec::new();
        }
    }

    let seq = &view.fwd_seq;
    let seq_rc = reverse_complement(seq);
    let reverse = view.flags.is_reverse_complemented();

    let qual_raw: Vec<f64> = match &view.fwd_qual {
        Some(qual) => qual.iter().map(|&q| q as f64).collect(),
        None => {
            if cfg.loginfo {
                tracing::warn!(read = %view.name, "no base qualities, using zeros");
            }
            vec![0.0; seq.len()]
        }
    };
    let qual = normalize_signals(&qual_raw, cfg.norm);

    let (seq_start, seq_end) = view.forward_align_span();

    let mut q2r: Option<Vec<i64>> = None;
    let mut map_status: Option<Vec<i32>> = None;
    if aligned {
        let strand_code: i8 = if reverse { -1 } else { 1 };
        let positions =
            coords::query_to_ref_positions(&view.cigar, strand_code, seq_end - seq_start);
        if cfg.mapfea {
            match reference_window(view, cfg, reverse) {
                Some(refseq) => {
                    map_status = Some(coords::query_to_ref_map_status(
                        &positions,
                        &seq[seq_start..seq_end],
                        &refseq,
                    ));
                }
                None => {
                    log_skip(cfg, &view.name, "reference window unavailable");
                    return Vec::new();
                }
            }
        }
        q2r = Some(positions);
    }

    let Some((ipd_fwd, ipd_rev, pw_fwd, pw_rev)) = prepare_signals(view, cfg) else {
        log_skip(cfg, &view.name, "missing or mismatched ipd/pw arrays");
        return Vec::new();
    };

    let b = cfg.half_width;
    let rev_shift = (cfg.motif_len - 1 - cfg.mod_loc) as i64 - cfg.mod_loc as i64;
    let sites = motif_sites(seq, &cfg.motifs, cfg.mod_loc);

    let mut rows = Vec::new();
    for loc in sites {
        let rev_loc = loc as i64 + rev_shift;
        let rev_loc_in_rev = seq.len() as i64 - 1 - rev_loc;
        // Both strand windows must fit inside the read; near-end sites are
        // dropped, not padded.
        if !(window_fits(loc as i64, b, seq.len()) && window_fits(rev_loc_in_rev, b, seq.len())) {
            continue;
        }
        let rev_loc = rev_loc as usize;
        let rev_loc_in_rev = rev_loc_in_rev as usize;

        let mut chrom = ".".to_string();
        let mut chrom_pos: i64 = UNMAPPED;
        let mut strand = '.';
        let mut fwd_map: Option<Vec<i32>> = None;
        let mut rev_map: Option<Vec<i32>> = None;

        if let Some(q2r) = &q2r {
            chrom = view.ref_name.clone().unwrap_or_else(|| ".".to_string());
            strand = if reverse { '-' } else { '+' };
            if seq_start <= loc && loc < seq_end {
                let offset = loc - seq_start;
                let rev_offset = rev_loc as i64 - seq_start as i64;
                if q2r[offset] != UNMAPPED {
                    chrom_pos = if reverse {
                        view.ref_end.unwrap_or(0) as i64 - 1 - q2r[offset]
                    } else {
                        q2r[offset] + view.ref_start.unwrap_or(0) as i64
                    };
                }
                if let Some(status) = &map_status {
                    let (f, r) =
                        coords::kmer_map_windows(offset as i64, rev_offset, b, status);
                    fwd_map = Some(f);
                    rev_map = Some(r);
                }
            } else {
                // Site falls in a soft-clipped region.
                if !cfg.include_clipped {
                    continue;
                }
                if cfg.mapfea {
                    fwd_map = Some(vec![coords::MAP_INSERTION; 2 * b + 1]);
                    rev_map = Some(vec![coords::MAP_INSERTION; 2 * b + 1]);
                }
            }
        }

        let fwd = KmerBlock {
            seq: String::from_utf8_lossy(&seq[loc - b..=loc + b]).into_owned(),
            npass: view.npass_fwd,
            ipd: ipd_fwd[loc - b..=loc + b].to_vec(),
            pw: pw_fwd[loc - b..=loc + b].to_vec(),
            qual: qual[loc - b..=loc + b].to_vec(),
            map: fwd_map,
        };
        // Reverse-strand arrays are stored reverse-complement-oriented, but
        // qualities stay forward-oriented, so that window flips.
        let mut rev_qual = qual[rev_loc - b..=rev_loc + b].to_vec();
        rev_qual.reverse();
        let rev = KmerBlock {
            seq: String::from_utf8_lossy(&seq_rc[rev_loc_in_rev - b..=rev_loc_in_rev + b])
                .into_owned(),
            npass: view.npass_rev,
            ipd: ipd_rev[rev_loc_in_rev - b..=rev_loc_in_rev + b].to_vec(),
            pw: pw_rev[rev_loc_in_rev - b..=rev_loc_in_rev + b].to_vec(),
            qual: rev_qual,
            map: rev_map,
        };

        rows.push(FeatureRow {
            chrom: chrom.clone(),
            chrom_pos,
            strand,
            read_name: view.name.clone(),
            read_offset: loc,
            fwd,
            rev,
            label: cfg.methy_label,
        });
    }
    rows
}

fn window_fits(center: i64, half_width: usize, len: usize) -> bool {
    center >= half_width as i64 && center < len as i64 - half_width as i64
}

fn reference_window(view: &ReadView, cfg: &ExtractConfig, reverse: bool) -> Option<Vec<u8>> {
    let fasta = cfg.fasta.as_ref()?;
    let name = view.ref_name.as_deref()?;
    let refseq = fasta.get_slice(name, view.ref_start?, view.ref_end?)?;
    if reverse {
        Some(reverse_complement(&refseq))
    } else {
        Some(refseq)
    }
}

/// Decode and normalize the four kinetic arrays. Each must match the read
/// length exactly; anything else means the record has no usable signal.
fn prepare_signals(
    view: &ReadView,
    cfg: &ExtractConfig,
) -> Option<(Vec<f64>, Vec<f64>, Vec<f64>, Vec<f64>)> {
    let len = view.read_len();
    let mut arrays = Vec::with_capacity(4);
    for codes in [&view.ipd_fwd, &view.ipd_rev, &view.pw_fwd, &view.pw_rev] {
        let codes = codes.as_ref()?;
        if codes.len() != len {
            return None;
        }
        let frames = if cfg.no_decode {
            codec::raw_frames(codes)
        } else {
            codec::decode_frames(codes)
        };
        arrays.push(normalize_signals(&frames, cfg.norm));
    }
    let pw_rev = arrays.pop()?;
    let pw_fwd = arrays.pop()?;
    let ipd_rev = arrays.pop()?;
    let ipd_fwd = arrays.pop()?;
    Some((ipd_fwd, ipd_rev, pw_fwd, pw_rev))
}

fn log_skip(cfg: &ExtractConfig, name: &str, reason: &str) {
    if cfg.loginfo {
        tracing::warn!(read = name, reason, "skipping read");
    }
}
