//! Motif handling: IUPAC expansion, complement tables, and the
//! reference-free motif site scan over read sequences.

use anyhow::{anyhow, Result};

fn iupac_bases(letter: u8) -> &'static [u8] {
    match letter.to_ascii_uppercase() {
        b'A' => b"A",
        b'C' => b"C",
        b'G' => b"G",
        b'T' => b"T",
        b'R' => b"AG",
        b'Y' => b"CT",
        b'S' => b"CG",
        b'W' => b"AT",
        b'K' => b"GT",
        b'M' => b"AC",
        b'B' => b"CGT",
        b'D' => b"AGT",
        b'H' => b"ACT",
        b'V' => b"ACG",
        _ => b"ACGT",
    }
}

fn complement_base(base: u8) -> u8 {
    match base {
        b'A' | b'a' => b'T',
        b'T' | b't' => b'A',
        b'C' | b'c' => b'G',
        b'G' | b'g' => b'C',
        b'W' | b'w' => b'W',
        b'S' | b's' => b'S',
        b'M' | b'm' => b'K',
        b'K' | b'k' => b'M',
        b'R' | b'r' => b'Y',
        b'Y' | b'y' => b'R',
        b'B' | b'b' => b'V',
        b'V' | b'v' => b'B',
        b'D' | b'd' => b'H',
        b'H' | b'h' => b'D',
        _ => b'N',
    }
}

/// Reverse complement, uppercased output for recognized bases.
pub fn reverse_complement(seq: &[u8]) -> Vec<u8> {
    seq.iter().rev().map(|&b| complement_base(b)).collect()
}

/// Expand a comma-separated motif string with IUPAC degenerate letters into
/// the literal motif set, e.g. "CHG" → [CAG, CCG, CTG].
///
/// All motifs must have the same length; mixed lengths make the symmetric
/// reverse-strand offset rule ill-defined, so they are rejected up front.
pub fn expand_motifs(motif_str: &str) -> Result<Vec<Vec<u8>>> {
    let mut motifs: Vec<Vec<u8>> = Vec::new();
    for raw in motif_str.split(',') {
        let raw = raw.trim().as_bytes();
        if raw.is_empty() {
            return Err(anyhow!("empty motif in {motif_str:?}"));
        }
        let mut expanded: Vec<Vec<u8>> = vec![Vec::with_capacity(raw.len())];
        for &letter in raw {
            let choices = iupac_bases(letter);
            let mut next = Vec::with_capacity(expanded.len() * choices.len());
            for prefix in &expanded {
                for &base in choices {
                    let mut m = prefix.clone();
                    m.push(base);
                    next.push(m);
                }
            }
            expanded = next;
        }
        motifs.extend(expanded);
    }
    let len = motifs[0].len();
    if motifs.iter().any(|m| m.len() != len) {
        return Err(anyhow!("all motifs must have the same length: {motif_str:?}"));
    }
    motifs.sort();
    motifs.dedup();
    Ok(motifs)
}

/// Scan `seq` for every (possibly overlapping) occurrence of a motif and
/// return the ascending 0-based offsets of the target base within each match.
///
/// All motifs must share one length and one `mod_loc`; this is a caller
/// precondition, enforced where the motif set is built.
pub fn motif_sites(seq: &[u8], motifs: &[Vec<u8>], mod_loc: usize) -> Vec<usize> {
    let Some(motif_len) = motifs.first().map(|m| m.len()) else {
        return Vec::new();
    };
    if seq.len() < motif_len {
        return Vec::new();
    }
    let mut sites = Vec::new();
    for i in 0..=(seq.len() - motif_len) {
        let window = &seq[i..i + motif_len];
        if motifs.iter().any(|m| m.as_slice() == window) {
            sites.push(i + mod_loc);
        }
    }
    sites
}
