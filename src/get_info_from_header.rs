use log::{debug, warn};
use regex::Regex;

use crate::field_schema::FieldSchema;

/// Field names from the `Format:` description of an annotation INFO line
/// (`vep` in gnomAD, `CSQ` in VEP-annotated ClinVar).
pub fn extract_annotation_format(header: &str, info_id: &str) -> Option<Vec<String>> {
    let pattern = format!(
        r#"##INFO=<ID={},.*?Description=".*?Format:\s*([^"]+)""#,
        regex::escape(info_id)
    );
    let annotation_regex = Regex::new(&pattern).ok()?;

    let captures = annotation_regex.captures(header)?;
    let format_str = captures.get(1)?;
    Some(
        format_str
            .as_str()
            .split('|')
            .map(|s| s.trim().to_string())
            .collect(),
    )
}

/// Compare the header's annotation layout with schema `S`, ignoring reserved
/// slots. Returns `false` and logs a warning on the first disagreement.
pub fn check_schema_against_header<S: FieldSchema>(header: &str, info_ids: &[&str]) -> bool {
    let Some((id, names)) = info_ids
        .iter()
        .find_map(|id| extract_annotation_format(header, id).map(|names| (*id, names)))
    else {
        debug!("No annotation Format line in header, {} schema assumed", S::NAME);
        return true;
    };

    if names.len() != S::FIELDS.len() {
        warn!(
            "⚠️  {id} header declares {} fields, {} schema has {}",
            names.len(),
            S::NAME,
            S::FIELDS.len()
        );
        return false;
    }

    for (index, (declared, expected)) in names.iter().zip(S::FIELDS).enumerate() {
        if !expected.is_empty() && !declared.eq_ignore_ascii_case(expected) {
            warn!(
                "⚠️  {id} field {index} is '{declared}' in header but '{expected}' in {} schema",
                S::NAME
            );
            return false;
        }
    }
    true
}
