use crate::field_schema::{FieldSchema, TranscriptAnnotation, MISSING};

/// INFO column split into the recognized `key=value` pairs and the trailing
/// VEP annotation token.
#[derive(Debug, Clone, Default)]
pub struct InfoTokens<'a> {
    values: Vec<(&'a str, &'a str)>,
    annotation: Option<&'a str>,
}

impl<'a> InfoTokens<'a> {
    /// Tokenize `info`, keeping only keys listed in `recognized`.
    pub fn parse(info: &'a str, recognized: &[&str]) -> Self {
        let mut values = Vec::new();

        for token in info.split(';') {
            // Flags and empty tokens carry nothing we report
            let Some((key, value)) = token.split_once('=') else {
                continue;
            };
            if recognized.contains(&key) && !values.iter().any(|(seen, _)| *seen == key) {
                values.push((key, value));
            }
        }

        let annotation = info
            .rsplit(';')
            .next()
            .filter(|token| token.contains('|'))
            .and_then(|token| annotation_value(token, recognized))
            .filter(|token| !token.is_empty());

        InfoTokens { values, annotation }
    }

    pub fn get(&self, key: &str) -> Option<&'a str> {
        self.values
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, value)| *value)
    }

    /// Value of `key`, or the `.` sentinel when the key was absent.
    pub fn value_or_missing(&self, key: &str) -> &'a str {
        self.get(key).unwrap_or(MISSING)
    }

    /// The raw annotation token with any `vep=`/`CSQ=` prefix removed.
    pub fn annotation(&self) -> Option<&'a str> {
        self.annotation
    }

    pub fn has_annotation(&self) -> bool {
        self.annotation.is_some()
    }

    /// Comma-separated transcript records, each split on `|`.
    pub fn transcript_blocks<S: FieldSchema>(&self) -> Vec<TranscriptAnnotation<'a, S>> {
        match self.annotation {
            Some(annotation) => annotation.split(',').map(TranscriptAnnotation::parse).collect(),
            None => Vec::new(),
        }
    }

    /// The whole annotation split on `|` only, commas left in place.
    pub fn flat_slots(&self) -> Vec<&'a str> {
        match self.annotation {
            Some(annotation) => annotation.split('|').collect(),
            None => Vec::new(),
        }
    }
}

/// INFO ids that carry a VEP annotation.
pub const ANNOTATION_KEYS: [&str; 2] = ["vep", "CSQ"];

/// The annotation inside the last INFO token: either a bare record list or
/// the value of an annotation id. Other keyed values (`MC=SO:...|nonsense`)
/// are not annotations.
fn annotation_value<'a>(token: &'a str, recognized: &[&str]) -> Option<&'a str> {
    match token.split_once('=') {
        Some((key, rest)) if !key.contains('|') => {
            (ANNOTATION_KEYS.contains(&key) && !recognized.contains(&key)).then_some(rest)
        }
        _ => Some(token),
    }
}
