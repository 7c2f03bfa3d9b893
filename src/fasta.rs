use anyhow::Result;
use needletail::parse_fastx_file;
use std::path::Path;

use crate::types::{HashMap, HashMapExt};

/// In-memory reference contigs with random-access slicing.
#[derive(Debug, Default)]
pub struct FastaDb {
    seqs: HashMap<String, Vec<u8>>,
}

impl FastaDb {
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = parse_fastx_file(path)
            .map_err(|e| anyhow::anyhow!("failed to open FASTA {}: {}", path.display(), e))?;
        let mut seqs: HashMap<String, Vec<u8>> = HashMap::new();

        while let Some(result) = reader.next() {
            let record =
                result.map_err(|e| anyhow::anyhow!("failed to parse FASTA record: {}", e))?;
            let name = std::str::from_utf8(record.id())
                .unwrap_or("")
                .split_whitespace()
                .next()
                .unwrap_or("")
                .to_string();
            let seq = record.seq().to_vec();
            seqs.insert(name, seq);
        }

        Ok(Self { seqs })
    }

    /// 0-based, half-open [start, end) slice of a contig, uppercased.
    pub fn get_slice(&self, seqname: &str, start: usize, end: usize) -> Option<Vec<u8>> {
        let seq = self.seqs.get(seqname)?;
        if start <= end && end <= seq.len() {
            let mut out = seq[start..end].to_vec();
            for b in &mut out {
                *b = b.to_ascii_uppercase();
            }
            Some(out)
        } else {
            None
        }
    }

    /// Build directly from in-memory contigs (used by tests and library callers).
    pub fn from_contigs(contigs: Vec<(String, Vec<u8>)>) -> Self {
        Self {
            seqs: contigs.into_iter().collect(),
        }
    }
}
