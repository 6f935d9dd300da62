//! Cluster index reader: one compressed CDX chunk per line

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

use flate2::read::MultiGzDecoder;

/// Byte range of one gzip member inside a CDX file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexChunkRef {
    pub filename: String,
    pub offset: u64,
    pub length: u64,
}

/// Parse one `cluster.idx` line.
///
/// Format: `<surt> <timestamp>\t<cdx file>\t<offset>\t<length>\t<seq>`.
/// Only the file, offset and length columns are used.
pub fn parse_cluster_line(line: &str) -> Option<IndexChunkRef> {
    let mut cols = line.split('\t');
    let _key = cols.next()?;
    let filename = cols.next()?.trim();
    let offset = cols.next()?.trim().parse().ok()?;
    let length = cols.next()?.trim().parse().ok()?;
    if filename.is_empty() {
        return None;
    }
    Some(IndexChunkRef {
        filename: filename.to_string(),
        offset,
        length,
    })
}

/// Iterator over the chunks listed in a cluster index, in file order.
///
/// Blank lines are skipped; a malformed line yields an `InvalidData` error
/// naming the line number.
pub struct ClusterIndex {
    lines: io::Lines<BufReader<Box<dyn Read + Send>>>,
    line_no: usize,
}

impl ClusterIndex {
    /// Open a cluster index file; `.gz` files are decompressed on the fly.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let reader: Box<dyn Read + Send> = if path.extension().is_some_and(|e| e == "gz") {
            Box::new(MultiGzDecoder::new(file))
        } else {
            Box::new(file)
        };
        Ok(Self::from_reader(reader))
    }

    pub fn from_reader(reader: Box<dyn Read + Send>) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
            line_no: 0,
        }
    }
}

impl Iterator for ClusterIndex {
    type Item = io::Result<IndexChunkRef>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e)),
            };
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            return Some(parse_cluster_line(&line).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("cluster index line {}: malformed: {line:?}", self.line_no),
                )
            }));
        }
    }
}
