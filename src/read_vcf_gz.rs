use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use log::{debug, info};

use crate::error::{Result, VepFlatError};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Open a file as a buffered line source, decompressing gzip/bgzip input.
pub fn open_maybe_gz(path: &Path) -> Result<Box<dyn BufRead>> {
    let mut file = File::open(path).map_err(|e| VepFlatError::io(path, e))?;

    let mut magic = [0u8; 2];
    let read = file.read(&mut magic).map_err(|e| VepFlatError::io(path, e))?;
    let file = File::open(path).map_err(|e| VepFlatError::io(path, e))?;

    if read == 2 && magic == GZIP_MAGIC {
        debug!("{} is gzip compressed", path.display());
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Streaming VCF reader. Meta lines are collected up front; data lines are
/// handed out one at a time.
pub struct VcfReader {
    path: PathBuf,
    lines: std::io::Lines<Box<dyn BufRead>>,
    header: String,
    columns_title: String,
    pending: Option<String>,
    line_number: usize,
}

impl VcfReader {
    pub fn open(path: &Path) -> Result<Self> {
        let mut lines = open_maybe_gz(path)?.lines();
        let mut header = String::new();
        let mut columns_title = String::new();
        let mut pending = None;
        let mut line_number = 0;

        for line in lines.by_ref() {
            let line = line.map_err(|e| VepFlatError::io(path, e))?;
            line_number += 1;
            if line.starts_with("##") {
                header.push_str(&line);
                header.push('\n');
            } else if line.starts_with("#CHROM") {
                columns_title = line;
            } else if !line.trim().is_empty() && !line.starts_with('#') {
                pending = Some(line);
                break;
            }
        }

        info!(
            "📖 Opened {} ({} header lines)",
            path.display(),
            header.matches('\n').count()
        );

        Ok(VcfReader {
            path: path.to_path_buf(),
            lines,
            header,
            columns_title,
            pending,
            line_number,
        })
    }

    /// The `##` meta lines, newline terminated.
    pub fn header(&self) -> &str {
        &self.header
    }

    pub fn columns_title(&self) -> &str {
        &self.columns_title
    }

    /// 1-based number of the line most recently returned.
    pub fn line_number(&self) -> usize {
        self.line_number
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Next non-empty data line, or `None` at end of file.
    pub fn next_line(&mut self) -> Result<Option<String>> {
        if let Some(line) = self.pending.take() {
            return Ok(Some(line));
        }
        for line in self.lines.by_ref() {
            let line = line.map_err(|e| VepFlatError::io(&self.path, e))?;
            self.line_number += 1;
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            return Ok(Some(line));
        }
        Ok(None)
    }
}
