use anyhow::{Context, Result};
use flate2::write;
use flate2::Compression;
use std::ffi::OsStr;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

const BUFFER_SIZE: usize = 128 * 1024;

/// Write normal or compressed files seamlessly
/// Uses the presence of a `.gz` extension to decide, "-" writes to stdout.
pub fn writer(filename: &str) -> Result<Box<dyn Write>> {
    if filename == "-" {
        return Ok(Box::new(BufWriter::with_capacity(BUFFER_SIZE, io::stdout())));
    }
    let path = Path::new(filename);
    let file =
        File::create(path).with_context(|| format!("couldn't create {}", path.display()))?;

    if path.extension() == Some(OsStr::new("gz")) {
        Ok(Box::new(BufWriter::with_capacity(
            BUFFER_SIZE,
            write::GzEncoder::new(file, Compression::default()),
        )))
    } else {
        Ok(Box::new(BufWriter::with_capacity(BUFFER_SIZE, file)))
    }
}

/// Read normal or compressed files seamlessly
/// Compression is sniffed from the magic bytes, "-" reads from stdin.
/// ```
/// use std::io::BufRead;
/// let lines = biowrangle::myio::reader(".test/contigs.fa").unwrap().lines().count();
/// assert!(lines > 0);
/// ```
pub fn reader(filename: &str) -> Result<Box<dyn BufRead>> {
    let raw: Box<dyn io::Read> = if filename == "-" {
        Box::new(io::stdin())
    } else {
        let file = File::open(filename).with_context(|| format!("couldn't open {}", filename))?;
        // too short to hold a compression magic number
        if file.metadata().map(|m| m.len() < 5).unwrap_or(false) {
            return Ok(Box::new(BufReader::new(file)));
        }
        Box::new(file)
    };
    let (decoded, _format) = niffler::get_reader(raw)
        .with_context(|| format!("couldn't detect compression of {}", filename))?;
    Ok(Box::new(BufReader::with_capacity(BUFFER_SIZE, decoded)))
}

/// Read every line of a (possibly compressed) file, trailing whitespace removed.
pub fn read_lines(filename: &str) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    for line in reader(filename)?.lines() {
        let line = line.with_context(|| format!("error reading {}", filename))?;
        lines.push(line.trim_end().to_string());
    }
    Ok(lines)
}

/// File name without directories or the final extension, e.g. `dir/org1.fna` -> `org1`.
/// ```
/// assert_eq!(biowrangle::myio::file_stem("genomes/ecoli.fna"), "ecoli");
/// assert_eq!(biowrangle::myio::file_stem("reads.bam"), "reads");
/// ```
pub fn file_stem(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| filename.to_string())
}

/// Path without its final extension, keeping the directory.
pub fn strip_extension(filename: &str) -> String {
    Path::new(filename)
        .with_extension("")
        .to_string_lossy()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_gzip_round_trip_through_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt.gz");
        let path = path.to_str().unwrap();
        {
            let mut out = writer(path).unwrap();
            writeln!(out, "hello").unwrap();
            out.flush().unwrap();
        }
        // the file must really be compressed
        let mut magic = [0u8; 2];
        File::open(path).unwrap().read_exact(&mut magic).unwrap();
        assert_eq!(magic, [0x1f, 0x8b]);
        assert_eq!(read_lines(path).unwrap(), vec!["hello".to_string()]);
    }

    #[test]
    fn test_strip_extension() {
        assert_eq!(strip_extension("a/b/reads.sorted.bam"), "a/b/reads.sorted");
    }
}
