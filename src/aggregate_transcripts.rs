//! Per-transcript summaries of loss-of-function variants joined with
//! constraint and expression reference tables.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{Result, VepFlatError};
use crate::field_schema::{ANCESTRY_GROUPS, MISSING};
use crate::read_vcf_gz::open_maybe_gz;
use crate::reformat_vcf::TsvWriter;
use crate::transcript_selector::TRANSCRIPT_PREFIX;

/// Consequences counted as loss of function.
pub const LOF_CONSEQUENCES: [&str; 4] = [
    "stop_gained",
    "frameshift_variant",
    "splice_donor_variant",
    "splice_acceptor_variant",
];

pub const SUMMARY_HEADER: [&str; 19] = [
    "Transcript_ID",
    "AC",
    "AC_afr",
    "AC_amr",
    "AC_nfe",
    "AC_asj",
    "AC_sas",
    "AC_eas",
    "AC_mid",
    "AC_fin",
    "Gene_name",
    "Gene_id",
    "Variant",
    "Max_AC_in_transcript",
    "Consequence_of_max_AC",
    "AC/Variant",
    "LOEUF_transcript",
    "Exon_number",
    "Max_median_expression",
];

/// One row of the per-transcript gnomAD table.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranscriptRow {
    #[serde(rename = "ALT")]
    pub alternate: String,
    #[serde(rename = "AC")]
    pub ac: String,
    #[serde(rename = "AC_afr")]
    pub ac_afr: String,
    #[serde(rename = "AC_amr")]
    pub ac_amr: String,
    #[serde(rename = "AC_nfe")]
    pub ac_nfe: String,
    #[serde(rename = "AC_asj")]
    pub ac_asj: String,
    #[serde(rename = "AC_sas")]
    pub ac_sas: String,
    #[serde(rename = "AC_eas")]
    pub ac_eas: String,
    #[serde(rename = "AC_mid")]
    pub ac_mid: String,
    #[serde(rename = "AC_fin")]
    pub ac_fin: String,
    #[serde(rename = "Consequence")]
    pub consequence: String,
    #[serde(rename = "SYMBOL")]
    pub symbol: String,
    #[serde(rename = "Gene")]
    pub gene: String,
    #[serde(rename = "Feature_Type")]
    pub feature_type: String,
    #[serde(rename = "Feature")]
    pub feature: String,
    #[serde(rename = "BIOTYPE")]
    pub biotype: String,
}

const TRANSCRIPT_ROW_COLUMNS: [&str; 16] = [
    "ALT",
    "AC",
    "AC_afr",
    "AC_amr",
    "AC_nfe",
    "AC_asj",
    "AC_sas",
    "AC_eas",
    "AC_mid",
    "AC_fin",
    "Consequence",
    "SYMBOL",
    "Gene",
    "Feature_Type",
    "Feature",
    "BIOTYPE",
];

impl TranscriptRow {
    pub fn allele_count(&self) -> Option<u64> {
        parse_count(&self.ac)
    }

    /// `AC_<pop>` counts in [`ANCESTRY_GROUPS`] order.
    pub fn population_counts(&self) -> [Option<u64>; 8] {
        [
            &self.ac_afr,
            &self.ac_amr,
            &self.ac_nfe,
            &self.ac_asj,
            &self.ac_sas,
            &self.ac_eas,
            &self.ac_mid,
            &self.ac_fin,
        ]
        .map(|value| parse_count(value))
    }

    /// Protein-coding transcript feature with a loss-of-function consequence.
    pub fn is_loss_of_function(&self) -> bool {
        self.feature_type == "Transcript"
            && self.biotype == "protein_coding"
            && LOF_CONSEQUENCES.contains(&self.consequence.as_str())
            && self.feature.contains(TRANSCRIPT_PREFIX)
    }
}

fn parse_count(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok()
}

/// Ensembl id without its `.N` version suffix.
pub fn stable_transcript_id(id: &str) -> &str {
    id.split('.').next().unwrap_or(id)
}

/// How a summarized transcript id is matched against reference table ids.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IdMatch {
    /// Reference id contains the version-stripped transcript id. Can match
    /// an unrelated longer id; the first matching reference row wins.
    #[default]
    Substring,
    /// Version-stripped ids are equal.
    StableId,
}

impl IdMatch {
    pub fn matches(&self, reference_id: &str, transcript_id: &str) -> bool {
        let stable = stable_transcript_id(transcript_id);
        if stable.is_empty() {
            return false;
        }
        match self {
            IdMatch::Substring => reference_id.contains(stable),
            IdMatch::StableId => stable_transcript_id(reference_id) == stable,
        }
    }
}

pub trait ReferenceRecord {
    fn transcript_id(&self) -> &str;
}

/// Row of the gnomAD transcript constraint table.
#[derive(Debug, Clone, Deserialize)]
pub struct ConstraintRecord {
    pub transcript: String,
    #[serde(rename = "lof.oe_ci.upper")]
    pub loeuf: String,
    pub num_coding_exons: String,
}

impl ReferenceRecord for ConstraintRecord {
    fn transcript_id(&self) -> &str {
        &self.transcript
    }
}

/// Row of the per-transcript expression table.
#[derive(Debug, Clone, Deserialize)]
pub struct ExpressionRecord {
    #[serde(rename = "ID_transcript")]
    pub id_transcript: String,
    #[serde(rename = "Max_median_expression")]
    pub max_median_expression: String,
}

impl ReferenceRecord for ExpressionRecord {
    fn transcript_id(&self) -> &str {
        &self.id_transcript
    }
}

#[derive(Debug, Clone)]
pub struct ReferenceTable<T> {
    records: Vec<T>,
}

impl<T: ReferenceRecord> ReferenceTable<T> {
    pub fn new(records: Vec<T>) -> Self {
        ReferenceTable { records }
    }

    /// First record matching `transcript_id` in table order.
    pub fn lookup(&self, transcript_id: &str, mode: IdMatch) -> Option<&T> {
        self.records
            .iter()
            .find(|record| mode.matches(record.transcript_id(), transcript_id))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptSummary {
    pub transcript_id: String,
    pub ac: u64,
    pub population_ac: [u64; 8],
    /// Distinct symbols in first-seen order; more than one means the input
    /// is ambiguous for this transcript.
    pub gene_names: Vec<String>,
    pub gene_ids: Vec<String>,
    pub variants: usize,
    pub max_ac: Option<u64>,
    pub consequence_of_max_ac: Option<String>,
    pub loeuf: Option<String>,
    pub exon_number: Option<String>,
    pub max_median_expression: Option<String>,
}

impl TranscriptSummary {
    /// Summed allele count per distinct alternate allele.
    pub fn ac_per_variant(&self) -> Option<f64> {
        if self.variants == 0 {
            None
        } else {
            Some(self.ac as f64 / self.variants as f64)
        }
    }

    pub fn to_row(&self) -> Vec<String> {
        let optional = |value: &Option<String>| match value.as_deref() {
            Some(v) if !v.is_empty() => v.to_string(),
            _ => MISSING.to_string(),
        };

        let mut row = vec![self.transcript_id.clone(), self.ac.to_string()];
        row.extend(self.population_ac.iter().map(|count| count.to_string()));
        row.push(self.gene_names.join(","));
        row.push(self.gene_ids.join(","));
        row.push(self.variants.to_string());
        row.push(
            self.max_ac
                .map(|ac| ac.to_string())
                .unwrap_or_else(|| MISSING.to_string()),
        );
        row.push(optional(&self.consequence_of_max_ac));
        row.push(
            self.ac_per_variant()
                .map(|ratio| ratio.to_string())
                .unwrap_or_else(|| MISSING.to_string()),
        );
        row.push(optional(&self.loeuf));
        row.push(optional(&self.exon_number));
        row.push(optional(&self.max_median_expression));
        row
    }
}

#[derive(Debug, Default)]
struct TranscriptGroup {
    ac: u64,
    population_ac: [u64; 8],
    gene_names: Vec<String>,
    gene_ids: Vec<String>,
    alternates: Vec<String>,
    max: Option<(u64, String)>,
}

fn push_unique(values: &mut Vec<String>, value: &str) {
    if !values.iter().any(|v| v == value) {
        values.push(value.to_string());
    }
}

impl TranscriptGroup {
    fn add(&mut self, row: &TranscriptRow) {
        let ac = row.allele_count();
        self.ac += ac.unwrap_or(0);
        for (total, count) in self.population_ac.iter_mut().zip(row.population_counts()) {
            *total += count.unwrap_or(0);
        }
        push_unique(&mut self.gene_names, &row.symbol);
        push_unique(&mut self.gene_ids, &row.gene);
        if !row.alternate.is_empty() && row.alternate != MISSING {
            push_unique(&mut self.alternates, &row.alternate);
        }

        // strictly greater keeps the first row on ties
        if let Some(ac) = ac {
            if self.max.as_ref().map_or(true, |(best, _)| ac > *best) {
                self.max = Some((ac, row.consequence.clone()));
            }
        }
    }

    fn into_summary(self, transcript_id: String) -> TranscriptSummary {
        let (max_ac, consequence_of_max_ac) = match self.max {
            Some((ac, consequence)) => (Some(ac), Some(consequence)),
            None => (None, None),
        };
        TranscriptSummary {
            transcript_id,
            ac: self.ac,
            population_ac: self.population_ac,
            gene_names: self.gene_names,
            gene_ids: self.gene_ids,
            variants: self.alternates.len(),
            max_ac,
            consequence_of_max_ac,
            loeuf: None,
            exon_number: None,
            max_median_expression: None,
        }
    }
}

/// Group rows by `Feature`, ordered by transcript id.
pub fn summarize_transcripts(rows: &[TranscriptRow]) -> Vec<TranscriptSummary> {
    let mut groups: BTreeMap<&str, TranscriptGroup> = BTreeMap::new();
    for row in rows {
        groups.entry(row.feature.as_str()).or_default().add(row);
    }

    groups
        .into_iter()
        .map(|(transcript_id, group)| group.into_summary(transcript_id.to_string()))
        .collect()
}

/// Fill the constraint and expression columns. Unmatched transcripts keep
/// `None`.
pub fn join_reference_tables(
    summaries: &mut [TranscriptSummary],
    constraint: &ReferenceTable<ConstraintRecord>,
    expression: &ReferenceTable<ExpressionRecord>,
    mode: IdMatch,
) {
    let mut unmatched = 0;
    for summary in summaries.iter_mut() {
        if let Some(record) = constraint.lookup(&summary.transcript_id, mode) {
            summary.loeuf = Some(record.loeuf.clone());
            summary.exon_number = Some(record.num_coding_exons.clone());
        } else {
            unmatched += 1;
            debug!("{} not found in constraint table", summary.transcript_id);
        }
        if let Some(record) = expression.lookup(&summary.transcript_id, mode) {
            summary.max_median_expression = Some(record.max_median_expression.clone());
        } else {
            debug!("{} not found in expression table", summary.transcript_id);
        }
    }
    if unmatched > 0 {
        info!("🔍 {unmatched} transcripts without constraint metrics");
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AggregateOptions {
    /// Keep only protein-coding loss-of-function rows before grouping.
    pub filter_rows: bool,
    pub id_match: IdMatch,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        AggregateOptions {
            filter_rows: true,
            id_match: IdMatch::Substring,
        }
    }
}

/// Read a tab-separated table (plain or gzip) into `T`, checking that the
/// listed columns exist.
pub fn read_table<T: DeserializeOwned>(path: &Path, required: &[&str]) -> Result<Vec<T>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .quoting(false)
        .from_reader(open_maybe_gz(path)?);

    let headers = reader.headers()?.clone();
    if let Some(column) = required.iter().find(|c| !headers.iter().any(|h| h == **c)) {
        return Err(VepFlatError::MissingColumn {
            column: column.to_string(),
            path: path.to_path_buf(),
        });
    }

    let mut records = Vec::new();
    for record in reader.deserialize() {
        records.push(record?);
    }
    Ok(records)
}

pub fn read_transcript_rows(path: &Path) -> Result<Vec<TranscriptRow>> {
    read_table(path, &TRANSCRIPT_ROW_COLUMNS)
}

pub fn read_constraint_table(path: &Path) -> Result<ReferenceTable<ConstraintRecord>> {
    let records = read_table(path, &["transcript", "lof.oe_ci.upper", "num_coding_exons"])?;
    Ok(ReferenceTable::new(records))
}

pub fn read_expression_table(path: &Path) -> Result<ReferenceTable<ExpressionRecord>> {
    let records = read_table(path, &["ID_transcript", "Max_median_expression"])?;
    Ok(ReferenceTable::new(records))
}

/// Read, filter, group and join. Tables are concatenated in argument order.
pub fn aggregate_tables(
    inputs: &[PathBuf],
    constraint: &Path,
    expression: &Path,
    options: AggregateOptions,
) -> Result<Vec<TranscriptSummary>> {
    let mut rows = Vec::new();
    for input in inputs {
        let table = read_transcript_rows(input)?;
        info!("📖 {} rows from {}", table.len(), input.display());
        rows.extend(table);
    }

    if options.filter_rows {
        let before = rows.len();
        rows.retain(TranscriptRow::is_loss_of_function);
        info!("🔎 {} of {before} rows are protein-coding LoF", rows.len());
    }

    let mut summaries = summarize_transcripts(&rows);
    let constraint = read_constraint_table(constraint)?;
    let expression = read_expression_table(expression)?;
    join_reference_tables(&mut summaries, &constraint, &expression, options.id_match);
    Ok(summaries)
}

pub fn write_summaries(path: &Path, summaries: &[TranscriptSummary], compress: bool) -> Result<()> {
    let mut writer = TsvWriter::create(path, compress)?;
    writer
        .write_row(&SUMMARY_HEADER)
        .map_err(|e| VepFlatError::io(path, e))?;
    for summary in summaries {
        writer
            .write_row(&summary.to_row())
            .map_err(|e| VepFlatError::io(path, e))?;
    }
    writer.finish().map_err(|e| VepFlatError::io(path, e))
}
