use super::bamio;
use super::blast;
use anyhow::{bail, Context, Result};
use rust_htslib::bam::{self, Read};
use std::collections::HashSet;
use std::io::Write;

#[derive(Debug, Clone)]
pub struct CircularOptions {
    pub min_length: u64,
    pub start_boundary: u64,
    pub end_boundary: u64,
    pub min_links: usize,
    pub quiet: bool,
    pub summary: bool,
}

impl Default for CircularOptions {
    fn default() -> Self {
        CircularOptions {
            min_length: 3000,
            start_boundary: 700,
            end_boundary: 700,
            min_links: 3,
            quiet: false,
            summary: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairKind {
    /// both mates on this contig, one at each end
    Circular,
    /// the mate is on another contig and this read sits near an end
    OtherContig,
}

/// Classify a mapped read with a mapped mate, positions are 0-based.
/// ```
/// use biowrangle::circular::{classify_pair, PairKind};
/// assert_eq!(classify_pair(0, 10, 0, 4500, 5000, 700, 700), Some(PairKind::Circular));
/// assert_eq!(classify_pair(0, 4600, 1, 20, 5000, 700, 700), Some(PairKind::OtherContig));
/// assert_eq!(classify_pair(0, 2000, 0, 2100, 5000, 700, 700), None);
/// ```
pub fn classify_pair(
    tid: i32,
    pos: i64,
    mtid: i32,
    mpos: i64,
    ref_len: u64,
    start_boundary: u64,
    end_boundary: u64,
) -> Option<PairKind> {
    let start = start_boundary as i64;
    let end = ref_len as i64 - end_boundary as i64;
    if tid != mtid {
        if pos <= start || pos >= end {
            return Some(PairKind::OtherContig);
        }
    } else if (pos <= start && mpos >= end) || (pos >= end && mpos <= start) {
        return Some(PairKind::Circular);
    }
    None
}

/// Read names supporting each kind of link on one contig.
#[derive(Debug, Clone, Default)]
pub struct ContigReport {
    pub name: String,
    pub length: u64,
    pub circular: HashSet<Vec<u8>>,
    pub other: HashSet<Vec<u8>>,
}

/// Queries that are not fragments of a longer subject.
/// Needs `-outfmt '6 std qlen slen'`; self hits are ignored.
pub fn fragment_filter(filename: &str) -> Result<HashSet<String>> {
    let mut all = HashSet::new();
    let mut fragments = HashSet::new();
    for hit in blast::read_tab(filename)? {
        let (Some(qlen), Some(slen)) = (hit.qlen, hit.slen) else {
            bail!("provide tabular blast+ with -outfmt '6 std qlen slen'");
        };
        if hit.qseqid == hit.sseqid {
            continue;
        }
        all.insert(hit.qseqid.clone());
        if qlen > 0
            && hit.length as f64 / qlen as f64 >= 0.9
            && slen as f64 / qlen as f64 >= 1.5
        {
            log::debug!("{} is a fragment of {}", hit.qseqid, hit.sseqid);
            fragments.insert(hit.qseqid);
        }
    }
    Ok(all.difference(&fragments).cloned().collect())
}

/// Collect circular and cross-contig pairs for every reference of a BAM.
pub fn scan_bam(path: &str, opts: &CircularOptions, threads: usize) -> Result<Vec<ContigReport>> {
    let mut bam = bamio::reader_from_path_or_stdin(path, threads)?;
    let mut reports: Vec<ContigReport> = bamio::references(bam.header())
        .into_iter()
        .map(|(name, length)| ContigReport {
            name,
            length,
            ..Default::default()
        })
        .collect();
    let mut rec = bam::Record::new();
    while let Some(r) = bam.read(&mut rec) {
        r.with_context(|| format!("Error reading {}", path))?;
        if !rec.is_paired() || rec.is_unmapped() || rec.is_mate_unmapped() || rec.tid() < 0 {
            continue;
        }
        let Some(report) = reports.get_mut(rec.tid() as usize) else {
            continue;
        };
        match classify_pair(
            rec.tid(),
            rec.pos(),
            rec.mtid(),
            rec.mpos(),
            report.length,
            opts.start_boundary,
            opts.end_boundary,
        ) {
            Some(PairKind::Circular) => {
                report.circular.insert(rec.qname().to_vec());
            }
            Some(PairKind::OtherContig) => {
                report.other.insert(rec.qname().to_vec());
            }
            None => {}
        }
    }
    Ok(reports)
}

/// Print circular contigs and an optional summary line. Returns the circular contig names.
pub fn write_report<W: Write>(
    out: &mut W,
    reports: &[ContigReport],
    keep: Option<&HashSet<String>>,
    opts: &CircularOptions,
) -> Result<Vec<String>> {
    let mut total = 0;
    let mut circular = Vec::new();
    for report in reports {
        if keep.map_or(false, |k| !k.contains(&report.name)) {
            continue;
        }
        total += 1;
        if report.length < opts.min_length {
            continue;
        }
        if report.circular.len() >= opts.min_links {
            if !opts.quiet {
                writeln!(
                    out,
                    "{} {} {} {}",
                    report.name,
                    report.length,
                    report.circular.len(),
                    report.other.len()
                )?;
            }
            circular.push(report.name.clone());
        }
    }
    if opts.summary {
        let pct = if total == 0 {
            0.0
        } else {
            circular.len() as f64 / total as f64
        };
        writeln!(
            out,
            "total: {} circular: {} percentage: {:.6}",
            total,
            circular.len(),
            pct
        )?;
    }
    Ok(circular)
}

/// `circular` subcommand.
pub fn run(bams: &[String], blast: Option<&str>, opts: &CircularOptions, threads: usize) -> Result<()> {
    let keep = match blast {
        Some(f) => Some(fragment_filter(f)?),
        None => None,
    };
    let mut out = std::io::BufWriter::new(std::io::stdout());
    for bam in bams {
        let reports = scan_bam(bam, opts, threads)?;
        let circular = write_report(&mut out, &reports, keep.as_ref(), opts)?;
        log::info!("{} circular contigs in {}", circular.len(), bam);
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundaries_follow_options() {
        // with a 100bp start boundary a read at 500 no longer counts
        assert_eq!(classify_pair(0, 500, 0, 4900, 5000, 100, 700), None);
        assert_eq!(
            classify_pair(0, 500, 0, 4900, 5000, 700, 700),
            Some(PairKind::Circular)
        );
        assert_eq!(classify_pair(0, 4900, 0, 50, 5000, 700, 50), None);
    }

    #[test]
    fn test_circular_fixture() {
        let opts = CircularOptions {
            summary: true,
            ..Default::default()
        };
        let reports = scan_bam(".test/circular.sam", &opts, 1).unwrap();
        assert_eq!(reports[0].circular.len(), 3);
        assert_eq!(reports[0].other.len(), 1);
        let mut out = Vec::new();
        let circular = write_report(&mut out, &reports, None, &opts).unwrap();
        assert_eq!(circular, vec!["ring".to_string()]);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "ring 5000 3 1\ntotal: 3 circular: 1 percentage: 0.333333\n"
        );
    }

    #[test]
    fn test_fragment_filter() {
        let keep = fragment_filter(".test/contig_self.blast_tab").unwrap();
        assert!(keep.contains("ring"));
        assert!(!keep.contains("short"));
        assert!(!keep.contains("line"));
        assert!(fragment_filter(".test/hits.blast_tab").is_err());
    }
}
