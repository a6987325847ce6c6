use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use pretty_assertions::assert_eq;
use tempfile::tempdir;

use vep_flatten::{
    aggregate_transcripts::{aggregate_tables, write_summaries, AggregateOptions, IdMatch},
    error::VepFlatError,
    field_schema::{ClinvarSchema, FieldSchema, PopulationSchema},
    read_vcf_gz::VcfReader,
    reformat_vcf::{
        output_path, output_paths, reformat_vcf, CanonicalRows, ClinvarRows, TranscriptRows,
    },
    sequence_context::{
        context_bias, contexts_path, load_contexts, write_context_records, write_position_tests,
        ContextWindow, TranscriptSequences,
    },
};

fn block<S: FieldSchema>(values: &[(&str, &str)]) -> String {
    let mut fields = vec![""; S::FIELDS.len()];
    for (name, value) in values {
        let offset = S::offset(name).unwrap();
        fields[offset] = *value;
    }
    fields.join("|")
}

fn write_vcf(path: &Path, info_header: &str, lines: &[String]) {
    let mut file = File::create(path).unwrap();
    writeln!(file, "##fileformat=VCFv4.2").unwrap();
    writeln!(file, "{info_header}").unwrap();
    writeln!(file, "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO").unwrap();
    for line in lines {
        writeln!(file, "{line}").unwrap();
    }
}

fn vep_header<S: FieldSchema>(id: &str) -> String {
    let format: Vec<&str> = S::FIELDS.iter().map(|f| if f.is_empty() { "x" } else { *f }).collect();
    format!(
        "##INFO=<ID={id},Number=.,Type=String,Description=\"Consequence annotations from Ensembl VEP. Format: {}\">",
        format.join("|")
    )
}

fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|l| l.to_string())
        .collect()
}

fn columns(line: &str) -> Vec<&str> {
    line.split('\t').collect()
}

// ------------------------------------------------------------------------------
// Tests for read_vcf_gz.rs
// ------------------------------------------------------------------------------

#[test]
fn test_reader_plain_vcf_with_blank_lines() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("plain.vcf");
    write_vcf(
        &path,
        "##INFO=<ID=DP,Number=1,Type=Integer,Description=\"Total Depth\">",
        &[
            "chr1\t100\t.\tA\tG\t60\tPASS\tDP=10".to_string(),
            "".to_string(),
            "chr2\t200\trs123\tC\tT\t80\tPASS\tDP=20".to_string(),
        ],
    );

    let mut reader = VcfReader::open(&path).unwrap();
    assert_eq!(reader.header().matches('\n').count(), 2);
    assert!(reader.columns_title().starts_with("#CHROM"));

    let mut lines = Vec::new();
    while let Some(line) = reader.next_line().unwrap() {
        lines.push(line);
    }
    assert_eq!(lines.len(), 2);
    assert!(lines[1].starts_with("chr2\t200"));
}

#[test]
fn test_reader_gzip_vcf() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("compressed.vcf.gz");
    let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
    writeln!(encoder, "##fileformat=VCFv4.2").unwrap();
    writeln!(encoder, "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO").unwrap();
    writeln!(encoder, "chr1\t100\t.\tA\tG\t60\tPASS\tDP=10").unwrap();
    encoder.finish().unwrap();

    let mut reader = VcfReader::open(&path).unwrap();
    assert_eq!(
        reader.next_line().unwrap().as_deref(),
        Some("chr1\t100\t.\tA\tG\t60\tPASS\tDP=10")
    );
    assert_eq!(reader.next_line().unwrap(), None);
}

#[test]
fn test_reader_missing_file() {
    let result = VcfReader::open(Path::new("/nonexistent/input.vcf"));
    assert!(matches!(result, Err(VepFlatError::Io { .. })));
}

#[test]
fn test_reader_skips_comment_before_first_record() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("commented.vcf");
    write_vcf(
        &path,
        "##INFO=<ID=DP,Number=1,Type=Integer,Description=\"Total Depth\">",
        &[
            "# exported from pipeline".to_string(),
            "chr1\t100\t.\tA\tG\t60\tPASS\tDP=10".to_string(),
        ],
    );

    let mut reader = VcfReader::open(&path).unwrap();
    let line = reader.next_line().unwrap().unwrap();
    assert!(line.starts_with("chr1\t100"));
    assert_eq!(reader.line_number(), 5);
    assert_eq!(reader.next_line().unwrap(), None);
}

// ------------------------------------------------------------------------------
// Tests for reformat_vcf.rs
// ------------------------------------------------------------------------------

#[test]
fn test_canonical_table_end_to_end() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("gnomad.chr1.vcf");

    let first = block::<PopulationSchema>(&[
        ("Allele", "G"),
        ("Consequence", "stop_gained"),
        ("IMPACT", "HIGH"),
        ("SYMBOL", "GENE1"),
        ("Feature_type", "Transcript"),
        ("Feature", "ENST0001"),
        ("BIOTYPE", "protein_coding"),
        ("cDNA_position", "10"),
        ("CANONICAL", "YES"),
        ("LoF", "HC"),
    ]);
    let second = block::<PopulationSchema>(&[
        ("Allele", "G"),
        ("Consequence", "missense_variant"),
        ("IMPACT", "MODERATE"),
        ("SYMBOL", "GENE2"),
        ("Feature", "ENST0002"),
        ("CANONICAL", "YES"),
    ]);
    let regulatory = block::<PopulationSchema>(&[
        ("Allele", "G"),
        ("Consequence", "regulatory_region_variant"),
        ("Feature_type", "RegulatoryFeature"),
        ("Feature", "ENSR0003"),
    ]);

    write_vcf(
        &input,
        &vep_header::<PopulationSchema>("vep"),
        &[
            format!("chr1\t100\trs1\tA\tG\t.\tPASS\tAC=5;AF=0.1;vep={first},{second},{regulatory}"),
            format!("chr1\t150\t.\tA\tC\t.\tAC0\tAC=0;vep={first}"),
            format!("chr1\t200\t.\tC\tT\t.\tPASS\tAC=2;vep={regulatory}"),
            "chr1\t300\t.\tG\tA\t.\tPASS\tAC=1;AF=0.01".to_string(),
        ],
    );

    let output = dir.path().join("canonical.tsv");
    let stats = reformat_vcf(&input, &output, &CanonicalRows::new(false).unwrap(), false).unwrap();
    assert_eq!(stats.variants_read, 4);
    assert_eq!(stats.variants_kept, 3);
    assert_eq!(stats.rows_written, 2);

    let lines = read_lines(&output);
    assert_eq!(lines.len(), 3);
    assert_eq!(
        columns(&lines[0]),
        vec![
            "Chr", "Position", "rsID", "Ref", "Alt", "AC", "Impact", "Consequence",
            "Gene_symbol", "Canonical_transcript", "cDNA_position", "LoF", "LoF_flag",
            "LoF_filter",
        ]
    );
    assert_eq!(
        columns(&lines[1]),
        vec![
            "chr1", "100", "rs1", "A", "G", "5", "HIGH, MODERATE",
            "stop_gained, missense_variant", "GENE1, GENE2", "ENST0001, ENST0002", "10",
            "HC", "", "",
        ]
    );
    assert_eq!(
        columns(&lines[2]),
        vec!["chr1", "200", ".", "C", "T", "2", "", "", "", "", "", "", "", ""]
    );
}

#[test]
fn test_canonical_table_protein_coding_only() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("gnomad.vcf");
    let coding = block::<PopulationSchema>(&[
        ("SYMBOL", "GENE1"),
        ("Feature_type", "Transcript"),
        ("Feature", "ENST0001"),
        ("BIOTYPE", "protein_coding"),
        ("CANONICAL", "YES"),
    ]);
    let lncrna = block::<PopulationSchema>(&[
        ("SYMBOL", "GENE2"),
        ("Feature_type", "Transcript"),
        ("Feature", "ENST0002"),
        ("BIOTYPE", "lncRNA"),
        ("CANONICAL", "YES"),
    ]);
    write_vcf(
        &input,
        &vep_header::<PopulationSchema>("vep"),
        &[format!("chr3\t10\t.\tA\tT\t.\tPASS\tAC=1;vep={coding},{lncrna}")],
    );

    let output = dir.path().join("coding.tsv");
    reformat_vcf(&input, &output, &CanonicalRows::new(true).unwrap(), false).unwrap();
    let lines = read_lines(&output);
    assert_eq!(columns(&lines[1])[8], "GENE1");
    assert_eq!(columns(&lines[1])[9], "ENST0001");
}

#[test]
fn test_clinvar_table_end_to_end() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("clinvar.vcf");

    let brca = block::<ClinvarSchema>(&[
        ("Allele", "T"),
        ("Consequence", "stop_gained"),
        ("SYMBOL", "BRCA1"),
        ("Gene", "672"),
        ("Feature_type", "Transcript"),
        ("Feature", "NM_007294.4"),
        ("BIOTYPE", "protein_coding"),
        ("cDNA_position", "5266"),
        ("CANONICAL", "YES"),
    ]);
    let other = block::<ClinvarSchema>(&[
        ("Allele", "T"),
        ("Consequence", "downstream_gene_variant"),
        ("SYMBOL", "NBR2"),
        ("Feature", "NR_003108.2"),
    ]);

    write_vcf(
        &input,
        &vep_header::<ClinvarSchema>("CSQ"),
        &[
            format!(
                "17\t43057051\t17662\tC\tT\t.\t.\tALLELEID=32701;CLNSIG=Pathogenic;CLNVC=single_nucleotide_variant;MC=SO:0001587|nonsense;CSQ={brca},{other}"
            ),
            "chr2\t2000\t999\tG\tA\t.\tPASS\tCLNSIG=Benign".to_string(),
            "chr3\t3000\t1000\tG\tA\t.\tLowQual\tCLNSIG=Benign".to_string(),
        ],
    );

    let output = dir.path().join("clinvar.tsv");
    let stats = reformat_vcf(&input, &output, &ClinvarRows::new().unwrap(), false).unwrap();
    assert_eq!(stats.rows_written, 3);

    let lines = read_lines(&output);
    assert_eq!(columns(&lines[0]).len(), 17);
    assert_eq!(
        columns(&lines[1]),
        vec![
            "chr17", "43057051", "17662", "C", "T", "Pathogenic", "single_nucleotide_variant",
            ".", "SO:0001587|nonsense", "stop_gained", "BRCA1", "672", "Transcript",
            "NM_007294.4", "protein_coding", "5266", "YES",
        ]
    );
    assert_eq!(columns(&lines[2])[0], "chr17");
    assert_eq!(columns(&lines[2])[13], "NR_003108.2");
    assert_eq!(columns(&lines[2])[16], "");

    let empty = columns(&lines[3]);
    assert_eq!(&empty[..6], &["chr2", "2000", "999", "G", "A", "Benign"]);
    assert!(empty[6..].iter().all(|v| *v == "."));
}

#[test]
fn test_clinvar_molecular_consequence_last_without_csq() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("clinvar_mc.vcf");
    write_vcf(
        &input,
        &vep_header::<ClinvarSchema>("CSQ"),
        &["1\t500\t42\tG\tA\t.\t.\tCLNSIG=Pathogenic;MC=SO:0001583|missense_variant,SO:0001587|nonsense".to_string()],
    );

    let output = dir.path().join("clinvar_mc.tsv");
    let stats = reformat_vcf(&input, &output, &ClinvarRows::new().unwrap(), false).unwrap();
    assert_eq!(stats.rows_written, 1);

    let lines = read_lines(&output);
    let row = columns(&lines[1]);
    assert_eq!(&row[..6], &["chr1", "500", "42", "G", "A", "Pathogenic"]);
    assert_eq!(row[8], "SO:0001583|missense_variant,SO:0001587|nonsense");
    assert!(row[9..].iter().all(|v| *v == "."));
}

#[test]
fn test_compressed_output_is_gzip() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("small.vcf");
    write_vcf(
        &input,
        &vep_header::<ClinvarSchema>("CSQ"),
        &["chr1\t1\t1\tA\tG\t.\t.\tCLNSIG=Benign".to_string()],
    );

    let output = output_path(&input, Some(dir.path()), None, true);
    assert!(output.ends_with("small.tsv.gz"));
    reformat_vcf(&input, &output, &ClinvarRows::new().unwrap(), true).unwrap();

    let bytes = fs::read(&output).unwrap();
    assert_eq!(&bytes[..2], &[0x1f, 0x8b]);
}

#[test]
fn test_malformed_line_aborts_file() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("broken.vcf");
    write_vcf(
        &input,
        &vep_header::<ClinvarSchema>("CSQ"),
        &["chr1\tnot_a_position\t.\tA\tG\t.\tPASS\tAC=1".to_string()],
    );

    let output = dir.path().join("broken.tsv");
    let result = reformat_vcf(&input, &output, &ClinvarRows::new().unwrap(), false);
    assert!(matches!(result, Err(VepFlatError::MalformedLine { line: 4, .. })));
}

#[test]
fn test_output_path_naming() {
    let dir = Path::new("out");
    assert_eq!(
        output_path(Path::new("data/gnomad.chr1.vcf.bgz"), Some(dir), None, false),
        PathBuf::from("out/gnomad.chr1.tsv")
    );
    assert_eq!(
        output_path(Path::new("clinvar.vcf.gz"), None, None, true),
        PathBuf::from("./clinvar.tsv.gz")
    );
    assert_eq!(
        output_path(Path::new("x.vcf"), Some(dir), Some("custom"), false),
        PathBuf::from("out/custom.tsv")
    );
    assert_eq!(
        output_path(Path::new("x.vcf"), Some(dir), Some("custom.tsv"), false),
        PathBuf::from("out/custom.tsv")
    );
}

#[test]
fn test_output_paths_reject_collisions() {
    let dir = Path::new("out");
    let inputs = vec![PathBuf::from("a/chr1.vcf.gz"), PathBuf::from("b/chr2.vcf.gz")];
    assert_eq!(
        output_paths(&inputs, Some(dir), None, false).unwrap(),
        vec![PathBuf::from("out/chr1.tsv"), PathBuf::from("out/chr2.tsv")]
    );

    let clashing = vec![PathBuf::from("a/chr1.vcf.gz"), PathBuf::from("b/chr1.vcf.bgz")];
    assert!(matches!(
        output_paths(&clashing, Some(dir), None, false),
        Err(VepFlatError::InvalidConfig(_))
    ));
    assert!(matches!(
        output_paths(&inputs, Some(dir), Some("merged"), false),
        Err(VepFlatError::InvalidConfig(_))
    ));
}

// ------------------------------------------------------------------------------
// Tests for aggregate_transcripts.rs
// ------------------------------------------------------------------------------

#[test]
fn test_transcripts_table_then_aggregate() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("gnomad.chr1.vcf");

    let lof = |allele: &str| {
        block::<PopulationSchema>(&[
            ("Allele", allele),
            ("Consequence", "stop_gained"),
            ("SYMBOL", "GENE1"),
            ("Gene", "ENSG0001"),
            ("Feature_type", "Transcript"),
            ("Feature", "ENST0001.3"),
            ("BIOTYPE", "protein_coding"),
            ("CANONICAL", "YES"),
            ("LoF", "HC"),
        ])
    };
    let missense = block::<PopulationSchema>(&[
        ("Consequence", "missense_variant"),
        ("SYMBOL", "GENE2"),
        ("Gene", "ENSG0002"),
        ("Feature_type", "Transcript"),
        ("Feature", "ENST0002.1"),
        ("BIOTYPE", "protein_coding"),
    ]);

    write_vcf(
        &input,
        &vep_header::<PopulationSchema>("vep"),
        &[
            format!("chr1\t100\t.\tA\tG,T\t.\tPASS\tAC=4;AC_afr=1;AC_nfe=3;AN=100;vep={},{missense}", lof("G")),
            format!("chr1\t200\t.\tC\tT\t.\tPASS\tAC=6;AC_afr=6;vep={}", lof("T")),
            "chr1\t300\t.\tC\tA\t.\tPASS\tAC=9".to_string(),
        ],
    );

    let table = dir.path().join("gnomad.chr1.tsv");
    let stats = reformat_vcf(&input, &table, &TranscriptRows::new().unwrap(), false).unwrap();
    assert_eq!(stats.rows_written, 4);

    let lines = read_lines(&table);
    let header = columns(&lines[0]);
    assert_eq!(header.len(), 5 + 27 + 16);
    assert!(header.contains(&"Feature_Type"));
    let first = columns(&lines[1]);
    assert_eq!(first[4], "G");
    assert_eq!(first[5], "4");
    assert_eq!(first[7], ".");

    let constraint = dir.path().join("constraint.tsv");
    fs::write(
        &constraint,
        "gene\ttranscript\tlof.oe_ci.upper\tnum_coding_exons\n\
         GENE1\tENST0001\t0.35\t12\n\
         GENE2\tENST0002\t1.2\t4\n",
    )
    .unwrap();
    let expression = dir.path().join("expression.tsv");
    fs::write(
        &expression,
        "ID_transcript\tMax_median_expression\nENST0001.3\t42.5\n",
    )
    .unwrap();

    let summaries = aggregate_tables(
        &[table.clone()],
        &constraint,
        &expression,
        AggregateOptions::default(),
    )
    .unwrap();
    assert_eq!(summaries.len(), 1);

    let summary = &summaries[0];
    assert_eq!(summary.transcript_id, "ENST0001.3");
    assert_eq!(summary.ac, 10);
    assert_eq!(summary.population_ac, [7, 0, 3, 0, 0, 0, 0, 0]);
    assert_eq!(summary.variants, 2);
    assert_eq!(summary.max_ac, Some(6));
    assert_eq!(summary.ac_per_variant(), Some(5.0));
    assert_eq!(summary.loeuf.as_deref(), Some("0.35"));
    assert_eq!(summary.exon_number.as_deref(), Some("12"));
    assert_eq!(summary.max_median_expression.as_deref(), Some("42.5"));

    let unfiltered = aggregate_tables(
        &[table],
        &constraint,
        &expression,
        AggregateOptions {
            filter_rows: false,
            id_match: IdMatch::StableId,
        },
    )
    .unwrap();
    let ids: Vec<&str> = unfiltered.iter().map(|s| s.transcript_id.as_str()).collect();
    assert_eq!(ids, vec![".", "ENST0001.3", "ENST0002.1"]);
    assert_eq!(unfiltered[2].loeuf.as_deref(), Some("1.2"));
    assert_eq!(unfiltered[2].max_median_expression, None);

    let output = dir.path().join("summary.tsv");
    write_summaries(&output, &summaries, false).unwrap();
    let written = read_lines(&output);
    assert_eq!(written.len(), 2);
    assert_eq!(
        columns(&written[1]),
        vec![
            "ENST0001.3", "10", "7", "0", "3", "0", "0", "0", "0", "0", "GENE1", "ENSG0001",
            "2", "6", "stop_gained", "5", "0.35", "12", "42.5",
        ]
    );
}

#[test]
fn test_aggregate_missing_column() {
    let dir = tempdir().unwrap();
    let table = dir.path().join("rows.tsv");
    fs::write(&table, "ALT\tAC\tFeature\nG\t1\tENST1\n").unwrap();
    let reference = dir.path().join("empty.tsv");
    fs::write(&reference, "transcript\n").unwrap();

    let result = aggregate_tables(&[table], &reference, &reference, AggregateOptions::default());
    match result {
        Err(VepFlatError::MissingColumn { column, .. }) => assert_eq!(column, "AC_afr"),
        other => panic!("expected missing column, got {other:?}"),
    }
}

// ------------------------------------------------------------------------------
// Tests for sequence_context.rs
// ------------------------------------------------------------------------------

#[test]
fn test_context_bias_pipeline() {
    let dir = tempdir().unwrap();
    let fasta = dir.path().join("transcripts.fa");
    fs::write(
        &fasta,
        ">ENST1.2 cdna chromosome:GRCh38:1\naaaaaccccc\nTACGGGGG\n>ENST2.1 cdna\nACGT\n",
    )
    .unwrap();
    let sequences = TranscriptSequences::from_fasta(&fasta).unwrap();
    assert_eq!(sequences.len(), 2);
    assert_eq!(sequences.get("ENST1"), Some("AAAAACCCCCTACGGGGG"));

    let header = "Chr\tPosition\trsID\tRef\tAlt\tAC\tImpact\tConsequence\tGene_symbol\tCanonical_transcript\tcDNA_position\tLoF\tLoF_flag\tLoF_filter";
    let benign = dir.path().join("benign.tsv");
    fs::write(
        &benign,
        format!(
            "{header}\n\
             chr1\t1\t.\tC\tA\t1\tHIGH\tstop_gained\tG1\tENST1\t13\tHC\t\t\n\
             chr1\t2\t.\tG\tA\t1\tLOW\tsynonymous_variant\tG1\tENST1\t14\t\t\t\n\
             chr1\t3\t.\tG\tT\t1\tHIGH\tstop_gained\tG1\tENST1\t13\tHC\t\t\n\
             chr1\t4\t.\tA\tT\t1\tHIGH\tstop_gained\tG1, G2\tENST1, ENST2\t13\tHC\t\t\n\
             chr1\t5\t.\tA\tT\t1\tHIGH\tstop_gained\tG1\tENST1\t2\tHC\t\t\n"
        ),
    )
    .unwrap();
    let pathogenic = dir.path().join("pathogenic.tsv");
    fs::write(
        &pathogenic,
        format!(
            "{header}\n\
             chr1\t1\t.\tC\tA\t1\tHIGH\tstop_gained\tG1\tENST1\t13\tHC\t\t\n\
             chr1\t6\t.\tA\tT\t1\tHIGH\tstop_gained\tG1\tENST1\t12\tHC\t\t\n\
             chr1\t7\t.\tC\tA\t1\tHIGH\tstop_gained\tG1\tENST1\t12\tHC\t\t\n"
        ),
    )
    .unwrap();

    let window = ContextWindow { left: 3, right: 3 };
    let benign = load_contexts(&benign, &sequences, window).unwrap();
    let pathogenic = load_contexts(&pathogenic, &sequences, window).unwrap();

    let contexts: Vec<&str> = benign.iter().map(|r| r.context.as_str()).collect();
    assert_eq!(contexts, vec!["CTACGGG", "TACGGGG", "CTACGGG"]);
    // C reference on an A base has no strand
    assert_eq!(pathogenic.len(), 2);

    let tests = context_bias(&benign, &pathogenic);
    assert_eq!(tests.len(), 7);

    let output = dir.path().join("bias.tsv");
    write_position_tests(&output, &tests, window, false).unwrap();
    let lines = read_lines(&output);
    let positions: Vec<&str> = lines[1..].iter().map(|l| columns(l)[0]).collect();
    assert_eq!(positions, vec!["-3", "-2", "-1", "0", "+1", "+2", "+3"]);
    assert!(lines[1..].iter().all(|l| columns(l)[3].parse::<f64>().unwrap() <= 1.0));

    let contexts_dir = dir.path().join("contexts");
    let benign_contexts = contexts_path(&dir.path().join("benign.tsv"), &contexts_dir, false);
    assert_eq!(benign_contexts, contexts_dir.join("benign_contexts.tsv"));
    assert_eq!(
        contexts_path(Path::new("tables/pathogenic.tsv.gz"), &contexts_dir, true),
        contexts_dir.join("pathogenic_contexts.tsv.gz")
    );

    write_context_records(&benign_contexts, &benign, false).unwrap();
    let written = read_lines(&benign_contexts);
    assert_eq!(written.len(), 4);
    assert_eq!(
        columns(&written[1]),
        vec!["ENST1", "13", "CTACGGG", "+", "3", "TAA"]
    );
    assert_eq!(columns(&written[3])[3], "-");
}
