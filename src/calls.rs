//! Per-read modification call table.
//!
//! The call-mods aggregation step produces one row per read: read name, the
//! forward-sequence offsets of its called sites, and the per-site modified
//! probabilities. The injection pipeline only needs name-keyed lookup, so the
//! whole table loads into a hash map up front; when several rows share a read
//! name (supplementary alignments), the one with the largest span wins.

use anyhow::{anyhow, Context, Result};
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use crate::types::{HashMap, HashMapExt};

#[derive(Debug, Clone)]
pub struct PerReadCall {
    /// Tie-break key for duplicate read names; longest record wins, first
    /// loaded wins on equal length.
    pub span_len: i64,
    /// Forward-sequence offsets of called sites, ascending.
    pub locs: Vec<usize>,
    /// Modified probabilities in [0, 1], parallel to `locs`.
    pub probs: Vec<f64>,
}

#[derive(Debug, Default)]
pub struct CallTable {
    calls: HashMap<String, PerReadCall>,
}

impl CallTable {
    /// Load a per-read call TSV (optionally gzipped). Expected columns:
    /// read_name, chrom, strand, span_len, comma-joined locs, comma-joined probs.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open per-read calls {}", path.display()))?;
        let reader: Box<dyn Read> = if path.extension().is_some_and(|e| e == "gz") {
            Box::new(MultiGzDecoder::new(file))
        } else {
            Box::new(file)
        };

        let mut calls: HashMap<String, PerReadCall> = HashMap::new();
        for (lineno, line) in BufReader::new(reader).lines().enumerate() {
            let line = line?;
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 6 {
                return Err(anyhow!(
                    "per-read calls line {}: expected 6 columns, got {}",
                    lineno + 1,
                    fields.len()
                ));
            }
            let name = fields[0].to_string();
            let span_len: i64 = fields[3]
                .parse()
                .with_context(|| format!("per-read calls line {}: bad span length", lineno + 1))?;
            let locs = parse_list::<usize>(fields[4])
                .with_context(|| format!("per-read calls line {}: bad locs", lineno + 1))?;
            let probs = parse_list::<f64>(fields[5])
                .with_context(|| format!("per-read calls line {}: bad probs", lineno + 1))?;
            if locs.len() != probs.len() {
                return Err(anyhow!(
                    "per-read calls line {}: {} locs vs {} probs",
                    lineno + 1,
                    locs.len(),
                    probs.len()
                ));
            }

            let call = PerReadCall { span_len, locs, probs };
            match calls.get(&name) {
                Some(existing) if existing.span_len >= span_len => {}
                _ => {
                    calls.insert(name, call);
                }
            }
        }
        Ok(Self { calls })
    }

    pub fn get(&self, read_name: &str) -> Option<&PerReadCall> {
        self.calls.get(read_name)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

fn parse_list<T: std::str::FromStr>(s: &str) -> Result<Vec<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    s.split(',')
        .map(|v| v.parse::<T>().map_err(Into::into))
        .collect()
}
