//! Per-source row layouts and the streaming TSV emitter.

use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, info, trace};

use crate::error::{Result, VepFlatError};
use crate::essentials_fields::VariantRecord;
use crate::field_schema::{ClinvarSchema, FieldSchema, FieldSlot, PopulationSchema, MISSING};
use crate::get_info_from_header::check_schema_against_header;
use crate::info_tokenizer::InfoTokens;
use crate::read_vcf_gz::VcfReader;
use crate::transcript_selector::{decode_strided, CanonicalPredicate, CanonicalSelector};

pub const CANONICAL_HEADER: [&str; 14] = [
    "Chr",
    "Position",
    "rsID",
    "Ref",
    "Alt",
    "AC",
    "Impact",
    "Consequence",
    "Gene_symbol",
    "Canonical_transcript",
    "cDNA_position",
    "LoF",
    "LoF_flag",
    "LoF_filter",
];

/// Annotation fields behind the canonical table's transcript columns, in
/// column order.
const CANONICAL_FIELDS: [&str; 8] = [
    "IMPACT",
    "Consequence",
    "SYMBOL",
    "Feature",
    "cDNA_position",
    "LoF",
    "LoF_flags",
    "LoF_filter",
];

pub const CLINVAR_HEADER: [&str; 17] = [
    "CHROM",
    "POS",
    "ID",
    "REF",
    "ALT",
    "CLNSIG",
    "CLNVC",
    "GENEINFO",
    "MC",
    "Consequence",
    "SYMBOL",
    "Gene",
    "Feature_type",
    "Feature",
    "BIOTYPE",
    "cDNA_position",
    "CANONICAL",
];

const CLINVAR_INFO_COLUMNS: [&str; 4] = ["CLNSIG", "CLNVC", "GENEINFO", "MC"];

const CLINVAR_FIELDS: [&str; 8] = [
    "Consequence",
    "SYMBOL",
    "Gene",
    "Feature_type",
    "Feature",
    "BIOTYPE",
    "cDNA_position",
    "CANONICAL",
];

/// Annotation fields of the per-transcript gnomAD table. `Feature_type` is
/// written as `Feature_Type` in the header.
const TRANSCRIPT_FIELDS: [&str; 16] = [
    "Consequence",
    "IMPACT",
    "SYMBOL",
    "Gene",
    "Feature_type",
    "Feature",
    "BIOTYPE",
    "EXON",
    "INTRON",
    "ALLELE_NUM",
    "VARIANT_CLASS",
    "CANONICAL",
    "LoF",
    "LoF_filter",
    "LoF_flags",
    "LoF_info",
];

pub const CANONICAL_SEPARATOR: &str = ", ";

/// Builds the output rows of one data source.
pub trait RowBuilder: Sync {
    fn name(&self) -> &'static str;

    fn header(&self) -> Vec<String>;

    /// FILTER and chromosome checks applied before any INFO parsing.
    fn accepts(&self, record: &VariantRecord) -> bool;

    /// Warn when the VCF header disagrees with the schema this source uses.
    fn check_header(&self, header: &str);

    /// Append the rows for one accepted variant.
    fn build_rows(&self, record: &VariantRecord, rows: &mut Vec<Vec<String>>);
}

fn leading_columns(record: &VariantRecord, chromosome: String, alternate: &str) -> Vec<String> {
    vec![
        chromosome,
        record.position.to_string(),
        record.id.clone(),
        record.reference.clone(),
        alternate.to_string(),
    ]
}

fn resolve<S: FieldSchema>(fields: &[&str]) -> Result<Vec<FieldSlot<S>>> {
    fields.iter().map(|field| S::slot(field)).collect()
}

/// gnomAD variants reduced to their canonical Ensembl transcripts, one row
/// per variant.
#[derive(Debug, Clone)]
pub struct CanonicalRows {
    selector: CanonicalSelector<PopulationSchema>,
}

impl CanonicalRows {
    pub fn new(protein_coding_only: bool) -> Result<Self> {
        let mut predicate = CanonicalPredicate::new()?;
        if protein_coding_only {
            predicate = predicate.protein_coding_only()?;
        }
        Ok(CanonicalRows {
            selector: CanonicalSelector::new(predicate, &CANONICAL_FIELDS)?,
        })
    }
}

impl RowBuilder for CanonicalRows {
    fn name(&self) -> &'static str {
        "canonical"
    }

    fn header(&self) -> Vec<String> {
        CANONICAL_HEADER.iter().map(|s| s.to_string()).collect()
    }

    fn accepts(&self, record: &VariantRecord) -> bool {
        record.chromosome.starts_with("chr") && record.passes(&["PASS"])
    }

    fn check_header(&self, header: &str) {
        check_schema_against_header::<PopulationSchema>(header, &["vep", "CSQ"]);
    }

    fn build_rows(&self, record: &VariantRecord, rows: &mut Vec<Vec<String>>) {
        let tokens = InfoTokens::parse(&record.info, &["AC"]);
        if !tokens.has_annotation() {
            trace!("{}:{} has no annotation", record.chromosome, record.position);
            return;
        }

        let slots = tokens.flat_slots();
        let transcripts = decode_strided(&slots);
        let selected = self.selector.select(&transcripts);

        let mut row = leading_columns(record, record.chromosome.clone(), &record.alternate);
        row.push(tokens.value_or_missing("AC").to_string());
        row.extend(
            CANONICAL_FIELDS
                .iter()
                .map(|field| selected.joined(field, CANONICAL_SEPARATOR)),
        );
        rows.push(row);
    }
}

/// ClinVar variants with every VEP transcript on its own row.
#[derive(Debug, Clone)]
pub struct ClinvarRows {
    fields: Vec<FieldSlot<ClinvarSchema>>,
}

impl ClinvarRows {
    pub fn new() -> Result<Self> {
        Ok(ClinvarRows {
            fields: resolve(&CLINVAR_FIELDS)?,
        })
    }
}

impl RowBuilder for ClinvarRows {
    fn name(&self) -> &'static str {
        "clinvar"
    }

    fn header(&self) -> Vec<String> {
        CLINVAR_HEADER.iter().map(|s| s.to_string()).collect()
    }

    // ClinVar leaves FILTER unset
    fn accepts(&self, record: &VariantRecord) -> bool {
        record.passes(&["PASS", "."])
    }

    fn check_header(&self, header: &str) {
        check_schema_against_header::<ClinvarSchema>(header, &["CSQ", "vep"]);
    }

    fn build_rows(&self, record: &VariantRecord, rows: &mut Vec<Vec<String>>) {
        let tokens = InfoTokens::parse(&record.info, ClinvarSchema::INFO_KEYS);

        let chromosome = if record.chromosome.starts_with("chr") {
            record.chromosome.clone()
        } else {
            format!("chr{}", record.chromosome)
        };
        let mut shared = leading_columns(record, chromosome, &record.alternate);
        shared.extend(
            CLINVAR_INFO_COLUMNS
                .iter()
                .map(|key| tokens.value_or_missing(key).to_string()),
        );

        let transcripts = tokens.transcript_blocks::<ClinvarSchema>();
        if transcripts.is_empty() {
            let mut row = shared;
            row.extend(self.fields.iter().map(|_| MISSING.to_string()));
            rows.push(row);
            return;
        }

        for transcript in &transcripts {
            let mut row = shared.clone();
            row.extend(self.fields.iter().map(|slot| transcript.value(*slot).to_string()));
            rows.push(row);
        }
    }
}

/// gnomAD variants with population counts and every VEP transcript on its
/// own row. Input of the transcript aggregation.
#[derive(Debug, Clone)]
pub struct TranscriptRows {
    fields: Vec<FieldSlot<PopulationSchema>>,
}

impl TranscriptRows {
    pub fn new() -> Result<Self> {
        Ok(TranscriptRows {
            fields: resolve(&TRANSCRIPT_FIELDS)?,
        })
    }
}

impl RowBuilder for TranscriptRows {
    fn name(&self) -> &'static str {
        "transcripts"
    }

    fn header(&self) -> Vec<String> {
        let mut header: Vec<String> = ["CHROM", "POS", "ID", "REF", "ALT"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        header.extend(PopulationSchema::INFO_KEYS.iter().map(|s| s.to_string()));
        header.extend(TRANSCRIPT_FIELDS.iter().map(|field| match *field {
            "Feature_type" => "Feature_Type".to_string(),
            other => other.to_string(),
        }));
        header
    }

    fn accepts(&self, record: &VariantRecord) -> bool {
        record.passes(&["PASS"])
    }

    fn check_header(&self, header: &str) {
        check_schema_against_header::<PopulationSchema>(header, &["vep", "CSQ"]);
    }

    fn build_rows(&self, record: &VariantRecord, rows: &mut Vec<Vec<String>>) {
        let tokens = InfoTokens::parse(&record.info, PopulationSchema::INFO_KEYS);

        let mut shared = leading_columns(
            record,
            record.chromosome.clone(),
            record.first_alternate(),
        );
        shared.extend(
            PopulationSchema::INFO_KEYS
                .iter()
                .map(|key| tokens.value_or_missing(key).to_string()),
        );

        let transcripts = tokens.transcript_blocks::<PopulationSchema>();
        if transcripts.is_empty() {
            let mut row = shared;
            row.extend(self.fields.iter().map(|_| MISSING.to_string()));
            rows.push(row);
            return;
        }

        for transcript in &transcripts {
            let mut row = shared.clone();
            row.extend(self.fields.iter().map(|slot| transcript.value(*slot).to_string()));
            rows.push(row);
        }
    }
}

/// Header-first TSV sink, optionally gzip compressed.
pub enum TsvWriter {
    Plain(BufWriter<File>),
    Gzip(BufWriter<GzEncoder<File>>),
}

impl TsvWriter {
    /// Create (or truncate) `path`, creating parent directories as needed.
    pub fn create(path: &Path, compress: bool) -> Result<Self> {
        if let Some(parent) = path.parent() {
            create_dir_all(parent).map_err(|e| VepFlatError::io(parent, e))?;
        }
        let file = File::create(path).map_err(|e| VepFlatError::io(path, e))?;

        if compress {
            let encoder = GzEncoder::new(file, Compression::default());
            Ok(TsvWriter::Gzip(BufWriter::new(encoder)))
        } else {
            Ok(TsvWriter::Plain(BufWriter::new(file)))
        }
    }

    pub fn write_row<S: AsRef<str>>(&mut self, row: &[S]) -> std::io::Result<()> {
        let line = row.iter().map(|v| v.as_ref()).collect::<Vec<_>>().join("\t");
        match self {
            TsvWriter::Plain(writer) => writeln!(writer, "{line}"),
            TsvWriter::Gzip(writer) => writeln!(writer, "{line}"),
        }
    }

    pub fn finish(self) -> std::io::Result<()> {
        match self {
            TsvWriter::Plain(mut writer) => writer.flush(),
            TsvWriter::Gzip(writer) => {
                let encoder = writer.into_inner().map_err(|e| e.into_error())?;
                encoder.finish()?.flush()
            }
        }
    }
}

/// Counters reported after one file has been flattened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReformatStats {
    pub variants_read: usize,
    pub variants_kept: usize,
    pub rows_written: usize,
}

/// Stream `input` through `builder` into the TSV at `output`.
pub fn reformat_vcf(
    input: &Path,
    output: &Path,
    builder: &dyn RowBuilder,
    compress: bool,
) -> Result<ReformatStats> {
    let mut reader = VcfReader::open(input)?;
    builder.check_header(reader.header());

    let mut writer = TsvWriter::create(output, compress)?;
    writer
        .write_row(&builder.header())
        .map_err(|e| VepFlatError::io(output, e))?;

    let mut stats = ReformatStats::default();
    let mut rows = Vec::new();

    while let Some(line) = reader.next_line()? {
        stats.variants_read += 1;
        let record = VariantRecord::from_line(&line, reader.line_number())?;
        if !builder.accepts(&record) {
            continue;
        }
        stats.variants_kept += 1;

        builder.build_rows(&record, &mut rows);
        for row in rows.drain(..) {
            writer
                .write_row(&row)
                .map_err(|e| VepFlatError::io(output, e))?;
            stats.rows_written += 1;
        }
    }
    writer.finish().map_err(|e| VepFlatError::io(output, e))?;

    debug!("{} rows: {:?}", builder.name(), stats);
    info!(
        "✅ {} → {} ({} of {} variants, {} rows)",
        input.display(),
        output.display(),
        stats.variants_kept,
        stats.variants_read,
        stats.rows_written
    );
    Ok(stats)
}

/// Output path for `input`: `<dir>/<name>.tsv`, where the name defaults to
/// the input file name without its `.vcf.gz`, `.vcf`, `.tsv` or `.gz`
/// extension.
pub fn output_path(
    input: &Path,
    output_dir: Option<&Path>,
    output_name: Option<&str>,
    compress: bool,
) -> PathBuf {
    let mut name = match output_name {
        Some(name) if name.ends_with(".tsv") => name.to_string(),
        Some(name) => format!("{name}.tsv"),
        None => format!("{}.tsv", get_base_filename(input)),
    };
    if compress {
        name.push_str(".gz");
    }
    output_dir.unwrap_or_else(|| Path::new(".")).join(name)
}

/// [`output_path`] for every input. Fails when `output_name` is given for
/// several inputs or when two inputs would write the same file.
pub fn output_paths(
    inputs: &[PathBuf],
    output_dir: Option<&Path>,
    output_name: Option<&str>,
    compress: bool,
) -> Result<Vec<PathBuf>> {
    if output_name.is_some() && inputs.len() > 1 {
        return Err(VepFlatError::InvalidConfig(
            "--output-name needs exactly one input file".to_string(),
        ));
    }

    let mut outputs: Vec<PathBuf> = Vec::with_capacity(inputs.len());
    for input in inputs {
        let output = output_path(input, output_dir, output_name, compress);
        if let Some(index) = outputs.iter().position(|o| *o == output) {
            return Err(VepFlatError::InvalidConfig(format!(
                "{} and {} would both write {}",
                inputs[index].display(),
                input.display(),
                output.display()
            )));
        }
        outputs.push(output);
    }
    Ok(outputs)
}

/// File name without its VCF or TSV extensions.
pub fn get_base_filename(path: &Path) -> String {
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("output");

    filename
        .strip_suffix(".vcf.gz")
        .or_else(|| filename.strip_suffix(".vcf.bgz"))
        .or_else(|| filename.strip_suffix(".vcf"))
        .or_else(|| filename.strip_suffix(".tsv.gz"))
        .or_else(|| filename.strip_suffix(".tsv"))
        .or_else(|| filename.strip_suffix(".gz"))
        .unwrap_or(filename)
        .to_string()
}
