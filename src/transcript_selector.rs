//! Recovery of transcript records from VEP annotations and selection of the
//! canonical Ensembl transcripts among them.

use crate::error::Result;
use crate::field_schema::{FieldSchema, FieldSlot, PopulationSchema, TranscriptAnnotation};

/// Distance between consecutive `Feature` slots when a gnomAD annotation is
/// split on `|` without first splitting on `,`. The separator fuses the last
/// slot of one record with the first slot of the next, so records repeat one
/// slot short of the schema width.
pub const POPULATION_STRIDE: usize = 47;

pub const TRANSCRIPT_PREFIX: &str = "ENST";

/// Decode a flat gnomAD annotation into typed transcript records.
///
/// The walk is anchored on `Feature`. A trailing block that stops before its
/// `Feature`, `SYMBOL` or `CANONICAL` slot is dropped; any later slot missing
/// from a kept block reads as `""`.
pub fn decode_strided<'a>(slots: &[&'a str]) -> Vec<TranscriptAnnotation<'a, PopulationSchema>> {
    let width = PopulationSchema::FIELDS.len();
    let feature = offset_of("Feature");
    let required = [feature, offset_of("SYMBOL"), offset_of("CANONICAL")]
        .into_iter()
        .max()
        .unwrap_or(feature)
        + 1;

    let mut records = Vec::new();
    for anchor in (feature..slots.len()).step_by(POPULATION_STRIDE) {
        let start = anchor - feature;
        if start + required > slots.len() {
            break;
        }
        let end = (start + width).min(slots.len());
        let mut values = slots[start..end].to_vec();

        if start > 0 {
            // previous record's LoF_info and this record's Allele
            values[0] = values[0].rsplit(',').next().unwrap_or("");
        }
        if values.len() == width {
            values[width - 1] = values[width - 1].split(',').next().unwrap_or("");
        }
        records.push(TranscriptAnnotation::new(values));
    }
    records
}

fn offset_of(name: &str) -> usize {
    PopulationSchema::offset(name).unwrap_or(0)
}

/// Canonical transcript test: gene symbol present, Ensembl transcript id and
/// the `CANONICAL` flag set. Optionally restricted to protein-coding
/// transcript features.
#[derive(Debug, Clone, Copy)]
pub struct CanonicalPredicate<S> {
    symbol: FieldSlot<S>,
    feature: FieldSlot<S>,
    canonical: FieldSlot<S>,
    protein_coding: Option<(FieldSlot<S>, FieldSlot<S>)>,
}

impl<S: FieldSchema> CanonicalPredicate<S> {
    pub fn new() -> Result<Self> {
        Ok(CanonicalPredicate {
            symbol: S::slot("SYMBOL")?,
            feature: S::slot("Feature")?,
            canonical: S::slot("CANONICAL")?,
            protein_coding: None,
        })
    }

    /// Also require `Feature_type == Transcript` and `BIOTYPE == protein_coding`.
    pub fn protein_coding_only(mut self) -> Result<Self> {
        self.protein_coding = Some((S::slot("Feature_type")?, S::slot("BIOTYPE")?));
        Ok(self)
    }

    pub fn accepts(&self, annotation: &TranscriptAnnotation<'_, S>) -> bool {
        let canonical = !annotation.value(self.symbol).is_empty()
            && annotation.value(self.feature).starts_with(TRANSCRIPT_PREFIX)
            && !annotation.value(self.canonical).is_empty();

        match self.protein_coding {
            Some((feature_type, biotype)) => {
                canonical
                    && annotation.value(feature_type) == "Transcript"
                    && annotation.value(biotype) == "protein_coding"
            }
            None => canonical,
        }
    }
}

/// Values of the requested fields over all canonical transcripts of one
/// variant, one sequence per field.
///
/// Empty values are not recorded, so sequences of different fields may have
/// different lengths and are not positionally aligned.
#[derive(Debug, Clone, Default)]
pub struct CanonicalFields<'a> {
    columns: Vec<(&'static str, Vec<&'a str>)>,
    transcripts: usize,
}

impl<'a> CanonicalFields<'a> {
    pub fn values(&self, field: &str) -> &[&'a str] {
        self.columns
            .iter()
            .find(|(name, _)| *name == field)
            .map(|(_, values)| values.as_slice())
            .unwrap_or(&[])
    }

    pub fn joined(&self, field: &str, separator: &str) -> String {
        self.values(field).join(separator)
    }

    /// Number of transcripts that passed the predicate.
    pub fn transcript_count(&self) -> usize {
        self.transcripts
    }
}

#[derive(Debug, Clone)]
pub struct CanonicalSelector<S> {
    predicate: CanonicalPredicate<S>,
    requested: Vec<FieldSlot<S>>,
}

impl<S: FieldSchema> CanonicalSelector<S> {
    pub fn new(predicate: CanonicalPredicate<S>, fields: &[&str]) -> Result<Self> {
        let requested = fields
            .iter()
            .map(|field| S::slot(field))
            .collect::<Result<Vec<_>>>()?;
        Ok(CanonicalSelector {
            predicate,
            requested,
        })
    }

    pub fn select<'a>(&self, annotations: &[TranscriptAnnotation<'a, S>]) -> CanonicalFields<'a> {
        let mut selected = CanonicalFields {
            columns: self
                .requested
                .iter()
                .map(|slot| (slot.name(), Vec::new()))
                .collect(),
            transcripts: 0,
        };

        for annotation in annotations.iter().filter(|a| self.predicate.accepts(a)) {
            selected.transcripts += 1;
            for (slot, (_, values)) in self.requested.iter().zip(selected.columns.iter_mut()) {
                let value = annotation.value(*slot);
                if !value.is_empty() {
                    values.push(value);
                }
            }
        }
        selected
    }
}
