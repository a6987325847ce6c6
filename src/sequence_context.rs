//! Sequence windows around canonical-transcript variants, strand and stop
//! codon classification, and the benign/pathogenic context comparison.

use std::collections::HashMap;
use std::fmt;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::Deserialize;

use crate::aggregate_transcripts::{read_table, stable_transcript_id};
use crate::contingency_stats::{positional_chi2, PositionTest};
use crate::error::{Result, VepFlatError};
use crate::read_vcf_gz::open_maybe_gz;
use crate::reformat_vcf::{get_base_filename, output_path, TsvWriter};

const STOP_CODONS: [&str; 3] = ["TAA", "TAG", "TGA"];

pub fn complement(base: char) -> Option<char> {
    match base.to_ascii_uppercase() {
        'A' => Some('T'),
        'T' => Some('A'),
        'C' => Some('G'),
        'G' => Some('C'),
        _ => None,
    }
}

/// Transcript cDNA sequences keyed by version-stripped id.
#[derive(Debug, Clone, Default)]
pub struct TranscriptSequences {
    sequences: HashMap<String, String>,
}

impl TranscriptSequences {
    /// Read a (gzip or plain) FASTA; the id is the first word of each header.
    pub fn from_fasta(path: &Path) -> Result<Self> {
        let reader = open_maybe_gz(path)?;
        let mut sequences = HashMap::new();
        let mut current: Option<(String, String)> = None;

        for line in reader.lines() {
            let line = line.map_err(|e| VepFlatError::io(path, e))?;
            let line = line.trim_end();
            if let Some(header) = line.strip_prefix('>') {
                if let Some((id, sequence)) = current.take() {
                    sequences.insert(id, sequence);
                }
                let id = header.split_whitespace().next().unwrap_or("");
                current = Some((stable_transcript_id(id).to_string(), String::new()));
            } else if let Some((_, sequence)) = current.as_mut() {
                sequence.push_str(&line.to_ascii_uppercase());
            }
        }
        if let Some((id, sequence)) = current {
            sequences.insert(id, sequence);
        }

        info!("🧬 {} transcript sequences from {}", sequences.len(), path.display());
        Ok(TranscriptSequences { sequences })
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        TranscriptSequences {
            sequences: pairs
                .into_iter()
                .map(|(id, seq)| {
                    (
                        stable_transcript_id(id.as_ref()).to_string(),
                        seq.as_ref().to_ascii_uppercase(),
                    )
                })
                .collect(),
        }
    }

    pub fn get(&self, transcript_id: &str) -> Option<&str> {
        self.sequences
            .get(stable_transcript_id(transcript_id))
            .map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }
}

/// `left` bases before and `right` bases after the 1-based `cdna_position`,
/// variant base included at index `left`. `None` unless the window fits
/// strictly inside the sequence.
pub fn extract_context(sequence: &str, cdna_position: usize, left: usize, right: usize) -> Option<&str> {
    if cdna_position <= left || cdna_position + right >= sequence.len() {
        return None;
    }
    let index = cdna_position - 1;
    sequence.get(index - left..=index + right)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strand {
    Forward,
    Reverse,
}

impl fmt::Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Strand::Forward => write!(f, "+"),
            Strand::Reverse => write!(f, "-"),
        }
    }
}

/// Strand of the transcript relative to the VCF REF allele.
pub fn infer_strand(context: &str, left: usize, reference: &str) -> Option<Strand> {
    let base = context.chars().nth(left)?;
    let mut reference = reference.chars();
    let ref_base = reference.next()?.to_ascii_uppercase();
    if reference.next().is_some() {
        return None;
    }

    if base == ref_base {
        Some(Strand::Forward)
    } else if complement(ref_base) == Some(base) {
        Some(Strand::Reverse)
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodonOutcome {
    /// Variant at codon position 1, 2 or 3 of the created stop codon.
    Stop { position: u8, codon: String },
    NoStop,
    NoStrand,
}

impl CodonOutcome {
    pub fn columns(&self) -> (String, String) {
        match self {
            CodonOutcome::Stop { position, codon } => (position.to_string(), codon.clone()),
            CodonOutcome::NoStop => ("No_stop".to_string(), "No_stop".to_string()),
            CodonOutcome::NoStrand => ("No_strand".to_string(), "No_strand".to_string()),
        }
    }
}

/// Put ALT into the context and look for a stop codon ending at, centred on,
/// or starting at the variant base.
pub fn stop_codon_frame(context: &str, left: usize, alternate: &str, strand: Option<Strand>) -> CodonOutcome {
    let Some(strand) = strand else {
        return CodonOutcome::NoStrand;
    };
    let Some(alt) = alternate.chars().next().map(|c| c.to_ascii_uppercase()) else {
        return CodonOutcome::NoStop;
    };
    let alt = match strand {
        Strand::Forward => Some(alt),
        Strand::Reverse => complement(alt),
    };
    let Some(alt) = alt else {
        return CodonOutcome::NoStop;
    };

    let mut bases: Vec<char> = context.chars().collect();
    if left >= bases.len() {
        return CodonOutcome::NoStop;
    }
    bases[left] = alt;

    for (position, start) in [(3u8, left.checked_sub(2)), (2, left.checked_sub(1)), (1, Some(left))] {
        let Some(start) = start else {
            continue;
        };
        if start + 3 > bases.len() {
            continue;
        }
        let codon: String = bases[start..start + 3].iter().collect();
        if STOP_CODONS.contains(&codon.as_str()) {
            return CodonOutcome::Stop { position, codon };
        }
    }
    CodonOutcome::NoStop
}

/// Columns of the canonical table used for context extraction.
#[derive(Debug, Clone, Deserialize)]
pub struct CanonicalVariant {
    #[serde(rename = "Ref")]
    pub reference: String,
    #[serde(rename = "Alt")]
    pub alternate: String,
    #[serde(rename = "Canonical_transcript")]
    pub transcript: String,
    #[serde(rename = "cDNA_position")]
    pub cdna_position: String,
}

/// A variant with its sequence context and classification.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextRecord {
    pub transcript: String,
    pub cdna_position: usize,
    pub context: String,
    pub strand: Option<Strand>,
    pub codon: CodonOutcome,
}

/// Build context records for rows with exactly one transcript and an
/// integer cDNA position whose window fits the transcript.
pub fn collect_contexts(
    variants: &[CanonicalVariant],
    sequences: &TranscriptSequences,
    left: usize,
    right: usize,
) -> Vec<ContextRecord> {
    let mut records = Vec::new();
    for variant in variants {
        if variant.transcript.is_empty() || variant.transcript.contains(',') {
            continue;
        }
        let Ok(cdna_position) = variant.cdna_position.trim().parse::<usize>() else {
            continue;
        };
        let Some(sequence) = sequences.get(&variant.transcript) else {
            debug!("{} has no sequence", variant.transcript);
            continue;
        };
        let Some(context) = extract_context(sequence, cdna_position, left, right) else {
            continue;
        };

        let strand = infer_strand(context, left, &variant.reference);
        let codon = stop_codon_frame(context, left, &variant.alternate, strand);
        records.push(ContextRecord {
            transcript: variant.transcript.clone(),
            cdna_position,
            context: context.to_string(),
            strand,
            codon,
        });
    }
    records
}

pub fn read_canonical_variants(path: &Path) -> Result<Vec<CanonicalVariant>> {
    read_table(path, &["Ref", "Alt", "Canonical_transcript", "cDNA_position"])
}

#[derive(Debug, Clone, Copy)]
pub struct ContextWindow {
    pub left: usize,
    pub right: usize,
}

impl Default for ContextWindow {
    fn default() -> Self {
        ContextWindow { left: 12, right: 12 }
    }
}

/// Contexts with a defined strand from one canonical table.
pub fn load_contexts(
    table: &Path,
    sequences: &TranscriptSequences,
    window: ContextWindow,
) -> Result<Vec<ContextRecord>> {
    let variants = read_canonical_variants(table)?;
    let mut records = collect_contexts(&variants, sequences, window.left, window.right);
    let total = records.len();
    records.retain(|r| r.strand.is_some());
    info!(
        "📊 {}: {} of {} variants with a stranded context",
        table.display(),
        records.len(),
        total
    );
    Ok(records)
}

/// Per-position comparison of pathogenic against benign contexts.
pub fn context_bias(benign: &[ContextRecord], pathogenic: &[ContextRecord]) -> Vec<PositionTest> {
    let benign: Vec<&str> = benign.iter().map(|r| r.context.as_str()).collect();
    let pathogenic: Vec<&str> = pathogenic.iter().map(|r| r.context.as_str()).collect();
    positional_chi2(&benign, &pathogenic)
}

pub fn write_position_tests(
    path: &Path,
    tests: &[PositionTest],
    window: ContextWindow,
    compress: bool,
) -> Result<()> {
    let mut writer = TsvWriter::create(path, compress)?;
    writer
        .write_row(&["Position", "Chi2", "P_value", "P_adjusted"])
        .map_err(|e| VepFlatError::io(path, e))?;

    for (index, test) in tests.iter().enumerate() {
        let offset = index as i64 - window.left as i64;
        let position = if offset > 0 {
            format!("+{offset}")
        } else {
            offset.to_string()
        };
        let statistic = test
            .test
            .statistic
            .map(|s| s.to_string())
            .unwrap_or_else(|| "NaN".to_string());
        writer
            .write_row(&[
                position,
                statistic,
                test.test.p_value.to_string(),
                test.p_adjusted.to_string(),
            ])
            .map_err(|e| VepFlatError::io(path, e))?;
    }
    writer.finish().map_err(|e| VepFlatError::io(path, e))
}

/// `<dir>/<table name>_contexts.tsv` for the contexts of one canonical table.
pub fn contexts_path(table: &Path, dir: &Path, compress: bool) -> PathBuf {
    let name = format!("{}_contexts", get_base_filename(table));
    output_path(table, Some(dir), Some(&name), compress)
}

pub fn write_context_records(path: &Path, records: &[ContextRecord], compress: bool) -> Result<()> {
    let mut writer = TsvWriter::create(path, compress)?;
    writer
        .write_row(&[
            "Canonical_transcript",
            "cDNA_position",
            "Context",
            "Strand",
            "Codon_position",
            "Codon",
        ])
        .map_err(|e| VepFlatError::io(path, e))?;

    for record in records {
        let (position, codon) = record.codon.columns();
        let strand = record
            .strand
            .map(|s| s.to_string())
            .unwrap_or_else(|| "Not_defined".to_string());
        writer
            .write_row(&[
                record.transcript.clone(),
                record.cdna_position.to_string(),
                record.context.clone(),
                strand,
                position,
                codon,
            ])
            .map_err(|e| VepFlatError::io(path, e))?;
    }
    writer.finish().map_err(|e| VepFlatError::io(path, e))
}
