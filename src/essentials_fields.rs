use crate::error::{Result, VepFlatError};

/// The fixed leading VCF columns of one data line. Sample columns are ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantRecord {
    pub chromosome: String,
    pub position: u64,
    pub id: String,
    pub reference: String,
    pub alternate: String,
    pub filter: String,
    pub info: String,
}

impl VariantRecord {
    pub fn from_line(line: &str, line_number: usize) -> Result<Self> {
        let fields: Vec<&str> = line.split('\t').collect();

        if fields.len() < 8 {
            return Err(VepFlatError::MalformedLine {
                line: line_number,
                reason: format!("expected at least 8 columns, found {}", fields.len()),
            });
        }

        let position = fields[1]
            .parse::<u64>()
            .map_err(|e| VepFlatError::MalformedLine {
                line: line_number,
                reason: format!("invalid POS '{}': {e}", fields[1]),
            })?;

        Ok(VariantRecord {
            chromosome: fields[0].to_string(),
            position,
            id: fields[2].to_string(),
            reference: fields[3].to_string(),
            alternate: fields[4].to_string(),
            filter: fields[6].to_string(),
            info: fields[7].to_string(),
        })
    }

    pub fn alternates(&self) -> impl Iterator<Item = &str> {
        self.alternate.split(',')
    }

    pub fn first_alternate(&self) -> &str {
        self.alternates().next().unwrap_or("")
    }

    pub fn passes(&self, markers: &[&str]) -> bool {
        markers.contains(&self.filter.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_parsing() {
        let line = "chr1\t100\trs1\tA\tG,T\t60\tPASS\tAC=2\tGT\t0/1";
        let record = VariantRecord::from_line(line, 5).unwrap();
        assert_eq!(record.chromosome, "chr1");
        assert_eq!(record.position, 100);
        assert_eq!(record.id, "rs1");
        assert_eq!(record.first_alternate(), "G");
        assert_eq!(record.alternates().count(), 2);
        assert_eq!(record.info, "AC=2");
        assert!(record.passes(&["PASS"]));
        assert!(!record.passes(&["."]));
    }

    #[test]
    fn test_missing_info_is_fatal() {
        let err = VariantRecord::from_line("chr1\t100\t.\tA\tG\t60\tPASS", 9).unwrap_err();
        assert!(matches!(err, VepFlatError::MalformedLine { line: 9, .. }));
    }

    #[test]
    fn test_invalid_position() {
        let err = VariantRecord::from_line("chr1\tx\t.\tA\tG\t.\tPASS\t.", 1).unwrap_err();
        assert!(err.to_string().contains("invalid POS"));
    }
}
