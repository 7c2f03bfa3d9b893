//! kinemod: kinetic-signal feature extraction and MM/ML modification-tag
//! injection for PacBio HiFi BAMs.
//!
//! Two pipelines share one shape: a reader streams alignment records in
//! fixed-size batches over a bounded channel, worker threads transform each
//! batch, and a single writer drains the results.
//!
//! - [`extract`] windows normalized IPD/PW kinetics into fixed-width k-mer
//!   feature rows around candidate motif sites, for a downstream classifier.
//! - [`modbam`] goes the other way: per-read modification calls are encoded
//!   as MM/ML tags and written back into a sorted, indexed BAM.

pub mod bam_view;
pub mod calls;
pub mod cli;
pub mod codec;
pub mod coords;
pub mod extract;
pub mod fasta;
pub mod modbam;
pub mod motif;
pub mod normalize;
pub mod types;
