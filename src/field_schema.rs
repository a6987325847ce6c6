//! Per-source layouts of the pipe-delimited VEP annotation.
//!
//! Every data source ships its own slot order, so annotations and resolved
//! field slots carry their schema as a type parameter. A slot resolved for
//! the ClinVar layout cannot be read from a gnomAD annotation.

use std::fmt;
use std::marker::PhantomData;

use crate::error::{Result, VepFlatError};

/// Missing-value sentinel written for absent INFO keys and annotations.
pub const MISSING: &str = ".";

/// The eight gnomAD genetic ancestry groups carried as `AC_<pop>` keys.
pub const ANCESTRY_GROUPS: [&str; 8] = ["afr", "amr", "nfe", "asj", "sas", "eas", "mid", "fin"];

pub trait FieldSchema: Copy + fmt::Debug + 'static {
    const NAME: &'static str;
    /// Slot names in annotation order. Reserved slots are empty strings.
    const FIELDS: &'static [&'static str];
    /// INFO keys read next to the annotation.
    const INFO_KEYS: &'static [&'static str];

    fn offset(name: &str) -> Option<usize> {
        if name.is_empty() {
            return None;
        }
        Self::FIELDS.iter().position(|field| *field == name)
    }

    fn slot(name: &str) -> Result<FieldSlot<Self>> {
        Self::offset(name)
            .map(|offset| FieldSlot {
                offset,
                _schema: PhantomData,
            })
            .ok_or_else(|| VepFlatError::UnknownField {
                field: name.to_string(),
                schema: Self::NAME,
            })
    }
}

/// gnomAD v4 VEP layout.
#[derive(Debug, Clone, Copy)]
pub struct PopulationSchema;

impl FieldSchema for PopulationSchema {
    const NAME: &'static str = "population";
    const FIELDS: &'static [&'static str] = &[
        "Allele",
        "Consequence",
        "IMPACT",
        "SYMBOL",
        "Gene",
        "Feature_type",
        "Feature",
        "BIOTYPE",
        "EXON",
        "INTRON",
        "HGVSc",
        "HGVSp",
        "cDNA_position",
        "CDS_position",
        "Protein_position",
        "Amino_acids",
        "Codons",
        "ALLELE_NUM",
        "DISTANCE",
        "STRAND",
        "FLAGS",
        "VARIANT_CLASS",
        "SYMBOL_SOURCE",
        "HGNC_ID",
        "CANONICAL",
        "MANE_SELECT",
        "MANE_PLUS_CLINICAL",
        "TSL",
        "APPRIS",
        "CCDS",
        "ENSP",
        "UNIPROT_ISOFORM",
        "SOURCE",
        "",
        "",
        "DOMAINS",
        "miRNA",
        "HGVS_OFFSET",
        "PUBMED",
        "MOTIF_NAME",
        "MOTIF_POS",
        "HIGH_INF_POS",
        "MOTIF_SCORE_CHANGE",
        "TRANSCRIPTION_FACTORS",
        "LoF",
        "LoF_filter",
        "LoF_flags",
        "LoF_info",
    ];
    const INFO_KEYS: &'static [&'static str] = &[
        "AC", "AC_afr", "AC_amr", "AC_nfe", "AC_asj", "AC_sas", "AC_eas", "AC_mid", "AC_fin",
        "AN", "AN_afr", "AN_amr", "AN_nfe", "AN_asj", "AN_sas", "AN_eas", "AN_mid", "AN_fin",
        "AF", "AF_afr", "AF_amr", "AF_nfe", "AF_asj", "AF_sas", "AF_eas", "AF_mid", "AF_fin",
    ];
}

/// ClinVar VEP layout.
#[derive(Debug, Clone, Copy)]
pub struct ClinvarSchema;

impl FieldSchema for ClinvarSchema {
    const NAME: &'static str = "clinvar";
    const FIELDS: &'static [&'static str] = &[
        "Allele",
        "Consequence",
        "IMPACT",
        "SYMBOL",
        "Gene",
        "Feature_type",
        "Feature",
        "BIOTYPE",
        "EXON",
        "INTRON",
        "HGVSc",
        "HGVSp",
        "cDNA_position",
        "CDS_position",
        "Protein_position",
        "Amino_acids",
        "Codons",
        "Existing_variation",
        "DISTANCE",
        "STRAND",
        "FLAGS",
        "SYMBOL_SOURCE",
        "HGNC_ID",
        "CANONICAL",
    ];
    const INFO_KEYS: &'static [&'static str] = &[
        "AF_ESP", "AF_EXAC", "AF_TGP", "ALLELEID", "CLNDN", "CLNDNINCL", "CLNDISDB",
        "CLNDISDBINCL", "CLNHGVS", "CLNREVSTAT", "CLNSIG", "CLNSIGCONF", "CLNSIGINCL", "CLNVC",
        "CLNVCSO", "CLNVI", "DBVARID", "GENEINFO", "MC", "ONCDN", "ONCDNINCL", "ONCDISDB",
        "ONCDISDBINCL", "ONC", "ONCINCL", "ONCREVSTAT", "ONCCONF", "ORIGIN", "RS", "SCIDN",
        "SCIDNINCL", "SCIDISDB", "SCIDISDBINCL", "SCIREVSTAT", "SCI", "SCIINCL",
    ];
}

/// A field offset resolved against schema `S`.
#[derive(Debug)]
pub struct FieldSlot<S> {
    offset: usize,
    _schema: PhantomData<S>,
}

impl<S> Clone for FieldSlot<S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S> Copy for FieldSlot<S> {}

impl<S: FieldSchema> FieldSlot<S> {
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn name(&self) -> &'static str {
        S::FIELDS[self.offset]
    }
}

/// One transcript record of a VEP annotation, borrowed from the INFO string.
#[derive(Debug, Clone)]
pub struct TranscriptAnnotation<'a, S> {
    values: Vec<&'a str>,
    _schema: PhantomData<S>,
}

impl<'a, S: FieldSchema> TranscriptAnnotation<'a, S> {
    pub fn new(values: Vec<&'a str>) -> Self {
        TranscriptAnnotation {
            values,
            _schema: PhantomData,
        }
    }

    /// Split one `|`-delimited record.
    pub fn parse(record: &'a str) -> Self {
        Self::new(record.split('|').collect())
    }

    /// Raw slot value, or `""` when the record stops short of the slot.
    pub fn value(&self, slot: FieldSlot<S>) -> &'a str {
        self.values.get(slot.offset).copied().unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
