pub mod aggregate_transcripts;
pub mod contingency_stats;
pub mod error;
pub mod essentials_fields;
pub mod field_schema;
pub mod get_info_from_header;
pub mod info_tokenizer;
pub mod read_vcf_gz;
pub mod reformat_vcf;
pub mod sequence_context;
pub mod transcript_selector;
