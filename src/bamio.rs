use anyhow::{Context, Result};
use rust_htslib::bam::{self, Read};

/// Open a sam/bam/cram, "-" reads from stdin.
pub fn reader_from_path_or_stdin(path: &str, threads: usize) -> Result<bam::Reader> {
    let mut bam = if path == "-" {
        bam::Reader::from_stdin().context("Failed to open alignments from stdin")?
    } else {
        bam::Reader::from_path(path).with_context(|| format!("Failed to open {}", path))?
    };
    bam.set_threads(threads)
        .context("Failed to set threads for BAM reader")?;
    Ok(bam)
}

/// `@PG` record naming this program and the full command line.
pub fn pg_record(subcommand: &str) -> bam::header::HeaderRecord<'static> {
    let mut pg_line = bam::header::HeaderRecord::new(b"PG");
    pg_line.push_tag(b"ID", format!("biowrangle-{}", subcommand));
    pg_line.push_tag(b"PN", "biowrangle");
    pg_line.push_tag(b"VN", env!("CARGO_PKG_VERSION"));
    let full_cmd = std::env::args()
        .map(|arg| arg.replace(' ', "\\ "))
        .collect::<Vec<String>>()
        .join(" ");
    pg_line.push_tag(b"CL", full_cmd);
    pg_line
}

/// Output format from the file name: `.sam` writes text, everything else BAM.
pub fn format_for_path(path: &str) -> bam::Format {
    if path.ends_with(".sam") {
        bam::Format::Sam
    } else {
        bam::Format::Bam
    }
}

/// Open a writer for `header`, "-" writes BAM to stdout.
pub fn writer_from_path_or_stdout(
    path: &str,
    header: &bam::Header,
    threads: usize,
) -> Result<bam::Writer> {
    let mut writer = if path == "-" {
        bam::Writer::from_stdout(header, bam::Format::Bam)
            .context("Failed to create BAM writer for stdout")?
    } else {
        bam::Writer::from_path(path, header, format_for_path(path))
            .with_context(|| format!("Failed to create writer for {}", path))?
    };
    writer
        .set_threads(threads)
        .context("Failed to set threads for BAM writer")?;
    Ok(writer)
}

/// Reference names and lengths in header order.
pub fn references(header: &bam::HeaderView) -> Vec<(String, u64)> {
    (0..header.target_count())
        .map(|tid| {
            let name = String::from_utf8_lossy(header.tid2name(tid)).to_string();
            let len = header.target_len(tid).unwrap_or(0);
            (name, len)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_references_from_sam() {
        let bam = reader_from_path_or_stdin(".test/pairs.sam", 1).unwrap();
        let refs = references(bam.header());
        assert_eq!(refs[0], ("contig_1".to_string(), 4000));
        assert_eq!(refs.len(), 3);
    }

    #[test]
    fn test_format_for_path() {
        assert!(matches!(format_for_path("out.sam"), bam::Format::Sam));
        assert!(matches!(format_for_path("out.bam"), bam::Format::Bam));
    }
}
