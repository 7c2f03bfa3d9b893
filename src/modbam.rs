//! Tag-injection pipeline: join per-read modification calls into BAM records,
//! encode MM/ML tags, strip stale kinetic tags, and write a coordinate-sorted,
//! indexed output BAM.

use anyhow::{anyhow, Context, Result};
use bstr::BString;
use crossfire::mpmc;
use noodles::bam;
use noodles::sam;
use noodles::sam::alignment::io::Write as _;
use noodles::sam::alignment::record::data::field::Tag;
use noodles::sam::alignment::record_buf::data::field::{value::Array, Value};
use noodles::sam::alignment::RecordBuf;
use rust_htslib::bam as hts;
use rust_htslib::bam::Read as HtsRead;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;

use crate::calls::CallTable;
use crate::cli::ModbamArgs;
use crate::motif::reverse_complement;

const TAG_MM: Tag = Tag::new(b'M', b'M');
const TAG_ML: Tag = Tag::new(b'M', b'L');
const PULSE_TAGS: [Tag; 4] = [
    Tag::new(b'f', b'i'),
    Tag::new(b'f', b'p'),
    Tag::new(b'r', b'i'),
    Tag::new(b'r', b'p'),
];

#[derive(Debug, Default)]
pub struct Stats {
    pub total_reads: u64,
    pub written: u64,
    pub tagged: u64,
    pub dropped: u64,
}

/// Convert call offsets to MM tag deltas over occurrences of the canonical
/// base in the forward-oriented sequence: first matched occurrence index,
/// then each inter-occurrence gap minus one.
///
/// Every offset must land on an occurrence of `mod_base`; anything else means
/// the calls do not belong to this sequence and the record must be rejected.
pub fn locs_to_mm_deltas(locs: &[usize], fwd_seq: &[u8], mod_base: u8) -> Result<Vec<usize>> {
    if locs.is_empty() {
        return Err(anyhow!("empty call-offset list"));
    }
    let base_locs: Vec<usize> = fwd_seq
        .iter()
        .enumerate()
        .filter(|(_, &b)| b.to_ascii_uppercase() == mod_base)
        .map(|(i, _)| i)
        .collect();

    let mut orders: Vec<Option<usize>> = vec![None; locs.len()];
    let mut locs_idx = 0usize;
    for (base_idx, &base_loc) in base_locs.iter().enumerate() {
        if locs_idx >= locs.len() {
            break;
        }
        if base_loc == locs[locs_idx] {
            orders[locs_idx] = Some(base_idx);
            locs_idx += 1;
        }
    }
    let orders: Vec<usize> = orders
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| anyhow!("call offset does not match any {} occurrence", mod_base as char))?;

    let mut deltas = Vec::with_capacity(orders.len());
    deltas.push(orders[0]);
    for pair in orders.windows(2) {
        deltas.push(pair[1] - 1 - pair[0]);
    }
    Ok(deltas)
}

/// Inverse of [`locs_to_mm_deltas`], given the same occurrence list.
pub fn mm_deltas_to_locs(deltas: &[usize], fwd_seq: &[u8], mod_base: u8) -> Vec<usize> {
    let base_locs: Vec<usize> = fwd_seq
        .iter()
        .enumerate()
        .filter(|(_, &b)| b.to_ascii_uppercase() == mod_base)
        .map(|(i, _)| i)
        .collect();
    let mut locs = Vec::with_capacity(deltas.len());
    let mut order: usize = 0;
    for (i, &delta) in deltas.iter().enumerate() {
        order = if i == 0 { delta } else { order + delta + 1 };
        if let Some(&loc) = base_locs.get(order) {
            locs.push(loc);
        }
    }
    locs
}

/// Quantize probabilities to ML bytes: floor(p * 256), clamped into [0, 255].
pub fn probs_to_ml(probs: &[f64]) -> Vec<u8> {
    probs
        .iter()
        .map(|&p| ((p * 256.0).floor() as i64).clamp(0, 255) as u8)
        .collect()
}

pub fn default_output_path(input: &Path) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default();
    input.with_file_name(format!("{}.modbam.bam", stem.to_string_lossy()))
}

pub fn run(args: &ModbamArgs) -> Result<Stats> {
    let start = Instant::now();
    let mod_base = args.mod_base.to_ascii_uppercase() as u8;

    let table = CallTable::load(&args.per_read_calls)?;
    tracing::info!(reads = table.len(), "loaded per-read call table");

    let out_path = args
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&args.in_bam));

    let mut reader = bam::io::reader::Builder
        .build_from_path(&args.in_bam)
        .with_context(|| format!("failed to open {}", args.in_bam.display()))?;
    let header = reader.read_header()?;

    let out_file = File::create(&out_path)
        .with_context(|| format!("failed to create {}", out_path.display()))?;
    let mut writer = bam::io::Writer::new(out_file);
    writer.write_header(&header)?;

    let worker_count = args.threads.saturating_sub(2).max(1);
    crossfire::detect_backoff_cfg();
    let cap = worker_count.saturating_mul(4).max(8);
    let (tx_work, rx_work) = mpmc::bounded_blocking::<Vec<bam::Record>>(cap);
    let (tx_out, rx_out) = mpmc::bounded_blocking::<Vec<(RecordBuf, bool)>>(cap);

    let mut stats = Stats::default();
    let header_ref = &header;
    let table_ref = &table;
    let mod_code = args.mod_code.as_str();
    let rm_pulse = args.rm_pulse;

    let (written, tagged) = thread::scope(|scope| -> Result<(u64, u64)> {
        let writer_handle = scope.spawn(move || -> Result<(u64, u64)> {
            let mut written: u64 = 0;
            let mut tagged: u64 = 0;
            while let Ok(batch) = rx_out.recv() {
                for (record, has_mm) in &batch {
                    writer.write_alignment_record(header_ref, record)?;
                    written += 1;
                    if *has_mm {
                        tagged += 1;
                    }
                }
            }
            Ok((written, tagged))
        });

        let mut worker_handles = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let rx_work = rx_work.clone();
            let tx_out = tx_out.clone();
            worker_handles.push(scope.spawn(move || {
                let mut dropped: u64 = 0;
                while let Ok(batch) = rx_work.recv() {
                    let mut out = Vec::with_capacity(batch.len());
                    for record in &batch {
                        match retag_record(
                            record, header_ref, table_ref, mod_base, mod_code, rm_pulse,
                        ) {
                            Ok(item) => out.push(item),
                            Err(e) => {
                                // Local abort: this record's calls are
                                // inconsistent with its sequence, skip it and
                                // keep the batch going.
                                tracing::warn!(error = %e, "skipping alignment");
                                dropped += 1;
                            }
                        }
                    }
                    if !out.is_empty() && tx_out.send(out).is_err() {
                        break;
                    }
                }
                tracing::info!(worker_id, dropped, "modbam worker finished");
                dropped
            }));
        }
        drop(tx_out);

        let mut batch: Vec<bam::Record> = Vec::with_capacity(args.batch_size);
        for result in reader.records() {
            let record = result?;
            stats.total_reads += 1;
            batch.push(record);
            if batch.len() == args.batch_size {
                tx_work
                    .send(std::mem::take(&mut batch))
                    .map_err(|_| anyhow!("modbam workers exited early"))?;
            }
        }
        if !batch.is_empty() {
            tx_work
                .send(batch)
                .map_err(|_| anyhow!("modbam workers exited early"))?;
        }
        drop(tx_work);

        for handle in worker_handles {
            stats.dropped += handle.join().map_err(|_| anyhow!("modbam worker panicked"))?;
        }
        writer_handle
            .join()
            .map_err(|_| anyhow!("modbam writer panicked"))?
    })?;

    stats.written = written;
    stats.tagged = tagged;

    tracing::info!("sorting and indexing {}", out_path.display());
    sort_and_index(&out_path, args.threads)?;

    tracing::info!(
        reads = stats.total_reads,
        written = stats.written,
        tagged = stats.tagged,
        dropped = stats.dropped,
        output = %out_path.display(),
        elapsed_s = start.elapsed().as_secs_f64(),
        "modbam generation complete"
    );
    Ok(stats)
}

/// Rebuild one record with fresh MM/ML tags. The flag reports whether
/// modification tags were added; an `Err` means the record's calls failed the
/// occurrence assertion and the record is dropped.
fn retag_record(
    record: &bam::Record,
    header: &sam::Header,
    table: &CallTable,
    mod_base: u8,
    mod_code: &str,
    rm_pulse: bool,
) -> Result<(RecordBuf, bool)> {
    let name = record.name().map(|n| n.to_string()).unwrap_or_default();
    let mut buf = RecordBuf::try_from_alignment_record(header, record)?;

    let data = buf.data_mut();
    data.remove(&TAG_MM);
    data.remove(&TAG_ML);
    if rm_pulse {
        for tag in PULSE_TAGS {
            data.remove(&tag);
        }
    }

    let Some(call) = table.get(&name) else {
        return Ok((buf, false));
    };

    // Modification coordinates are read-orientation; flip the stored sequence
    // back to how it came off the sequencer for reverse-strand alignments.
    let stored: Vec<u8> = record.sequence().iter().collect();
    let fwd_seq = if record.flags().is_reverse_complemented() {
        reverse_complement(&stored)
    } else {
        stored
    };

    let deltas = locs_to_mm_deltas(&call.locs, &fwd_seq, mod_base)
        .with_context(|| format!("read {name}"))?;
    let ml = probs_to_ml(&call.probs);

    let mm_string = format!(
        "{},{};",
        mod_code,
        deltas
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(",")
    );
    let data = buf.data_mut();
    data.insert(TAG_MM, Value::String(BString::from(mm_string)));
    data.insert(TAG_ML, Value::Array(Array::UInt8(ml)));

    Ok((buf, true))
}

/// Rewrite header text so the @HD line carries `SO:coordinate`, as samtools
/// sort would on its output.
pub fn coordinate_sorted_header_text(text: &str) -> String {
    let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
    if let Some(hd) = lines.iter_mut().find(|l| l.starts_with("@HD")) {
        if hd.contains("SO:") {
            *hd = hd
                .split('\t')
                .map(|f| if f.starts_with("SO:") { "SO:coordinate" } else { f })
                .collect::<Vec<_>>()
                .join("\t");
        } else {
            hd.push_str("\tSO:coordinate");
        }
    } else {
        lines.insert(0, "@HD\tVN:1.6\tSO:coordinate".to_string());
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn header_from_text(text: &str) -> hts::Header {
    let mut header = hts::Header::new();
    for line in text.lines() {
        if let Some(comment) = line.strip_prefix("@CO\t") {
            header.push_comment(comment.as_bytes());
        } else if let Some(rest) = line.strip_prefix('@') {
            let mut fields = rest.split('\t');
            let Some(kind) = fields.next() else { continue };
            let mut record = hts::header::HeaderRecord::new(kind.as_bytes());
            for field in fields {
                if let Some((tag, value)) = field.split_once(':') {
                    record.push_tag(tag.as_bytes(), value);
                }
            }
            header.push_record(&record);
        }
    }
    header
}

/// Post-pass: coordinate-sort the written BAM in place and build a BAI index.
fn sort_and_index(path: &Path, threads: usize) -> Result<()> {
    let mut reader = hts::Reader::from_path(path)?;
    let template = hts::Header::from_template(reader.header());
    let text = String::from_utf8_lossy(&template.to_bytes()).into_owned();
    let header = header_from_text(&coordinate_sorted_header_text(&text));

    let mut records: Vec<hts::Record> = Vec::new();
    for result in reader.records() {
        records.push(result?);
    }
    // Unmapped records (tid -1) go last, as samtools sort does.
    records.sort_by_key(|r| (r.tid() < 0, r.tid(), r.pos()));

    let sorted_path = path.with_extension("sorted.bam");
    {
        let mut writer = hts::Writer::from_path(&sorted_path, &header, hts::Format::Bam)?;
        for record in &records {
            writer.write(record)?;
        }
    }
    std::fs::rename(&sorted_path, path)?;

    hts::index::build(path, None, hts::index::Type::Bai, threads as u32)
        .map_err(|e| anyhow!("failed to index {}: {}", path.display(), e))?;
    Ok(())
}
