use super::bamio;
use super::bed::{Region, RegionSet};
use super::cigar;
use super::fasta;
use super::myio;
use anyhow::{bail, Context, Result};
use rust_htslib::bam::record::Cigar;
use rust_htslib::bam::{self, Read};
use std::collections::HashMap;
use std::io::Write;

/// Unmapped, secondary, QC-failed and duplicate reads never count.
const SKIPPED_FLAGS: u16 = 0x4 | 0x100 | 0x200 | 0x400;

/// Read and base level filters applied while counting depth.
#[derive(Debug, Clone, Copy, Default)]
pub struct DepthFilter {
    pub min_mapq: u8,
    pub min_baseq: u8,
    /// minimum query length implied by the CIGAR, 0 disables
    pub min_qlen: u64,
    /// count reads with a deletion or reference skip at the position
    pub count_deletions: bool,
}

/// Per-base depth of one reference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefDepth {
    pub depth: Vec<u32>,
    /// positions with at least one alignment passing the read filters
    pub covered: Vec<bool>,
}

impl RefDepth {
    pub fn new(len: u64) -> RefDepth {
        RefDepth {
            depth: vec![0; len as usize],
            covered: vec![false; len as usize],
        }
    }

    pub fn len(&self) -> usize {
        self.depth.len()
    }

    pub fn is_empty(&self) -> bool {
        self.depth.is_empty()
    }

    /// Depth at `pos`, zero past the end of the reference.
    pub fn at(&self, pos: u64) -> u32 {
        self.depth.get(pos as usize).copied().unwrap_or(0)
    }

    pub fn is_covered(&self, pos: u64) -> bool {
        self.covered.get(pos as usize).copied().unwrap_or(false)
    }

    /// Sum of depths over `[st, en)`.
    pub fn total(&self, st: u64, en: u64) -> u64 {
        (st..en).map(|pos| self.at(pos) as u64).sum()
    }

    /// Mean depth over the whole reference, zero positions included.
    /// ```
    /// let mut d = biowrangle::coverage::RefDepth::new(4);
    /// d.depth = vec![1, 2, 3, 0];
    /// assert_eq!(d.mean(), 1.5);
    /// ```
    pub fn mean(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.total(0, self.len() as u64) as f64 / self.len() as f64
    }

    fn mark(&mut self, pos: usize, counts: bool) {
        if pos < self.depth.len() {
            self.covered[pos] = true;
            if counts {
                self.depth[pos] += 1;
            }
        }
    }

    /// Add the reference positions of one alignment.
    fn add(&mut self, rec: &bam::Record, filter: &DepthFilter) {
        if rec.flags() & SKIPPED_FLAGS != 0 || rec.mapq() < filter.min_mapq {
            return;
        }
        let ops = rec.cigar();
        if filter.min_qlen > 0 && cigar::query_len(ops.iter()) < filter.min_qlen {
            return;
        }
        let quals = rec.qual();
        let mut rpos = rec.pos().max(0) as usize;
        let mut qpos = 0;
        for op in ops.iter() {
            let len = op.len() as usize;
            match op {
                Cigar::Match(_) | Cigar::Equal(_) | Cigar::Diff(_) => {
                    for i in 0..len {
                        let passes = quals
                            .get(qpos + i)
                            .map_or(true, |q| *q >= filter.min_baseq);
                        self.mark(rpos + i, passes);
                    }
                    rpos += len;
                    qpos += len;
                }
                Cigar::Del(_) | Cigar::RefSkip(_) => {
                    for r in rpos..rpos + len {
                        self.mark(r, filter.count_deletions);
                    }
                    rpos += len;
                }
                Cigar::Ins(_) | Cigar::SoftClip(_) => qpos += len,
                Cigar::HardClip(_) | Cigar::Pad(_) => {}
            }
        }
    }
}

/// Streams the depths of a coordinate sorted alignment file, one reference at a time.
pub struct DepthReader {
    path: String,
    bam: bam::Reader,
    refs: Vec<(String, u64)>,
    filter: DepthFilter,
    record: bam::Record,
    /// `record` holds an alignment that has not been counted yet
    pending: bool,
    done: bool,
    last_tid: i32,
    /// lowest reference that can still be requested
    next_tid: usize,
}

impl DepthReader {
    pub fn from_path(path: &str, filter: DepthFilter, threads: usize) -> Result<DepthReader> {
        let bam = bamio::reader_from_path_or_stdin(path, threads)?;
        let refs = bamio::references(bam.header());
        Ok(DepthReader {
            path: path.to_string(),
            bam,
            refs,
            filter,
            record: bam::Record::new(),
            pending: false,
            done: false,
            last_tid: -1,
            next_tid: 0,
        })
    }

    /// Reference names and lengths in header order.
    pub fn refs(&self) -> &[(String, u64)] {
        &self.refs
    }

    pub fn tid(&self, name: &str) -> Option<usize> {
        self.refs.iter().position(|(n, _)| n == name)
    }

    /// Depths of reference `tid`. References must be requested in header
    /// order; alignments on references that are skipped over are discarded.
    pub fn reference(&mut self, tid: usize) -> Result<RefDepth> {
        let Some((name, len)) = self.refs.get(tid) else {
            bail!("{} has no reference number {}", self.path, tid);
        };
        if tid < self.next_tid {
            bail!(
                "{} was requested after a later reference of {}; are the headers in the same order?",
                name,
                self.path
            );
        }
        let mut depth = RefDepth::new(*len);
        loop {
            if !self.pending {
                if self.done {
                    break;
                }
                match self.bam.read(&mut self.record) {
                    None => {
                        self.done = true;
                        break;
                    }
                    Some(r) => r.with_context(|| format!("Failed to read {}", self.path))?,
                }
                let rtid = self.record.tid();
                if rtid >= 0 && rtid < self.last_tid {
                    bail!("{} is not sorted by coordinate", self.path);
                }
                self.last_tid = self.last_tid.max(rtid);
                self.pending = true;
            }
            let rtid = self.record.tid();
            if rtid < 0 {
                // unplaced reads end a sorted file
                self.done = true;
                self.pending = false;
                break;
            }
            let rtid = rtid as usize;
            if rtid > tid {
                break;
            }
            if rtid == tid {
                depth.add(&self.record, &self.filter);
            }
            self.pending = false;
        }
        self.next_tid = tid + 1;
        log::debug!("Counted depth of {} in {}", name, self.path);
        Ok(depth)
    }
}

/// The reference name then the depth of each covered position, or all zeros
/// for a reference without coverage.
pub fn csv_row(name: &str, depth: &RefDepth) -> Vec<String> {
    let mut row = vec![name.to_string()];
    let covered: Vec<String> = depth
        .depth
        .iter()
        .zip(&depth.covered)
        .filter(|(_, c)| **c)
        .map(|(d, _)| d.to_string())
        .collect();
    if covered.is_empty() {
        row.extend(std::iter::repeat("0".to_string()).take(depth.len()));
    } else {
        row.extend(covered);
    }
    row
}

/// Write `<stem>.cov.csv` with one [`csv_row`] per reference.
pub fn coverage_csv(reader: &mut DepthReader, outfile: &str) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new()
        .flexible(true)
        .quote_style(csv::QuoteStyle::NonNumeric)
        .from_writer(myio::writer(outfile)?);
    for tid in 0..reader.refs().len() {
        let name = reader.refs()[tid].0.clone();
        let depth = reader.reference(tid)?;
        wtr.write_record(&csv_row(&name, &depth))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Per-base csv files next to each input, or `name average` lines on `out`.
pub fn write_coverage<W: Write>(
    out: &mut W,
    bams: &[String],
    averages: bool,
    threads: usize,
) -> Result<()> {
    let filter = DepthFilter {
        count_deletions: true,
        ..Default::default()
    };
    for bam in bams {
        let mut reader = DepthReader::from_path(bam, filter, threads)?;
        if averages {
            for tid in 0..reader.refs().len() {
                let name = reader.refs()[tid].0.clone();
                let depth = reader.reference(tid)?;
                writeln!(out, "{} {:?}", name, depth.mean())?;
            }
        } else {
            let outfile = format!("{}.cov.csv", myio::strip_extension(bam));
            coverage_csv(&mut reader, &outfile)?;
            log::info!("Wrote {}", outfile);
        }
    }
    Ok(())
}

/// `coverage` subcommand.
pub fn run_coverage(bams: &[String], averages: bool, threads: usize) -> Result<()> {
    let mut out = myio::writer("-")?;
    write_coverage(&mut out, bams, averages, threads)?;
    out.flush()?;
    Ok(())
}

/// How `depth` reports its results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthMode {
    PerBase,
    Average,
    Window(u64),
}

/// Restrict output to a region and/or the intervals of a BED file.
#[derive(Debug, Default)]
pub struct DepthTarget {
    pub region: Option<Region>,
    pub bed: Option<RegionSet>,
}

impl DepthTarget {
    fn in_bed(&self, name: &str, pos: u64) -> bool {
        match &self.bed {
            Some(set) => set.overlaps(name, pos),
            None => true,
        }
    }

    fn wants(&self, name: &str, pos: u64) -> bool {
        if let Some(rgn) = &self.region {
            if !rgn.contains(name, pos) {
                return false;
            }
        }
        self.in_bed(name, pos)
    }

    /// Range of reference `name` to report, `None` when it is excluded.
    fn span(&self, name: &str, len: u64) -> Option<(u64, u64)> {
        match &self.region {
            Some(rgn) if rgn.name != name => None,
            Some(rgn) => Some((rgn.st.min(len), rgn.en.min(len))),
            None => Some((0, len)),
        }
    }
}

/// Mean depth of each table over the positions of `[st, en)` inside the BED.
fn averages(tables: &[RefDepth], name: &str, st: u64, en: u64, target: &DepthTarget) -> Vec<String> {
    let n = (st..en).filter(|pos| target.in_bed(name, *pos)).count();
    tables
        .iter()
        .map(|t| {
            if n == 0 {
                return "0.00".to_string();
            }
            let total: u64 = (st..en)
                .filter(|pos| target.in_bed(name, *pos))
                .map(|pos| t.at(pos) as u64)
                .sum();
            format!("{:.2}", total as f64 / n as f64)
        })
        .collect()
}

/// Write the depth results of reference `name`, one table per alignment file.
pub fn write_reference<W: Write>(
    out: &mut W,
    name: &str,
    len: u64,
    tables: &[RefDepth],
    target: &DepthTarget,
    mode: DepthMode,
) -> Result<()> {
    let Some((st, en)) = target.span(name, len) else {
        return Ok(());
    };
    match mode {
        DepthMode::PerBase => {
            for pos in st..en {
                if !tables.iter().any(|t| t.is_covered(pos)) || !target.wants(name, pos) {
                    continue;
                }
                write!(out, "{}\t{}", name, pos + 1)?;
                for t in tables {
                    write!(out, "\t{}", t.at(pos))?;
                }
                writeln!(out)?;
            }
        }
        DepthMode::Average => {
            let avgs = averages(tables, name, st, en, target);
            writeln!(out, "{}\t{}\t{}", name, en - st, avgs.join("\t"))?;
        }
        DepthMode::Window(size) => {
            let mut w_st = st;
            while w_st < en {
                let w_en = (w_st + size).min(en);
                let avgs = averages(tables, name, w_st, w_en, target);
                writeln!(out, "{}\t{}\t{}\t{}", name, w_st, w_en, avgs.join("\t"))?;
                w_st = w_en;
            }
        }
    }
    Ok(())
}

/// Write depth results of several alignment files. References come from the
/// first file and are matched by name in the others; a missing reference or
/// position has depth 0.
pub fn write_depths<W: Write>(
    out: &mut W,
    readers: &mut [DepthReader],
    target: &DepthTarget,
    mode: DepthMode,
) -> Result<()> {
    if readers.is_empty() {
        return Ok(());
    }
    if mode == DepthMode::Average && target.bed.is_some() {
        bail!("average coverage (-a) cannot be combined with a BED file (-b)");
    }
    let refs = readers[0].refs().to_vec();
    for (name, len) in &refs {
        if target.span(name, *len).is_none() {
            continue;
        }
        let mut tables = Vec::with_capacity(readers.len());
        for reader in readers.iter_mut() {
            let table = match reader.tid(name) {
                Some(tid) => reader.reference(tid)?,
                None => RefDepth::default(),
            };
            tables.push(table);
        }
        write_reference(out, name, *len, &tables, target, mode)?;
    }
    Ok(())
}

/// `depth` subcommand.
pub fn run_depth(
    bams: &[String],
    filter: &DepthFilter,
    target: &DepthTarget,
    mode: DepthMode,
    threads: usize,
) -> Result<()> {
    let mut readers = bams
        .iter()
        .map(|bam| DepthReader::from_path(bam, *filter, threads))
        .collect::<Result<Vec<_>>>()?;
    if let Some((first, rest)) = readers.split_first() {
        for (bam, reader) in bams[1..].iter().zip(rest) {
            if first.refs() != reader.refs() {
                log::warn!("References of {} differ from {}", bam, bams[0]);
            }
        }
        if let Some(rgn) = &target.region {
            if first.tid(&rgn.name).is_none() {
                bail!("Region {} is not a reference of {}", rgn, bams[0]);
            }
        }
    }
    let mut out = myio::writer("-")?;
    write_depths(&mut out, &mut readers, target, mode)?;
    out.flush()?;
    Ok(())
}

/// `contig-coverage` subcommand: per contig of at least `min_len`, in fasta
/// order, either `name,length,gc,average` or the full per-base depth row.
pub fn run_contig_coverage(
    bam: &str,
    fasta_file: &str,
    min_len: usize,
    per_base: bool,
    outfile: &str,
    threads: usize,
) -> Result<()> {
    let contigs: Vec<fasta::Contig> = fasta::read_fasta(fasta_file)?
        .into_iter()
        .filter(|c| c.len() >= min_len)
        .collect();
    let mut reader = DepthReader::from_path(bam, DepthFilter::default(), threads)?;

    let mut tids: Vec<usize> = contigs.iter().filter_map(|c| reader.tid(&c.name)).collect();
    tids.sort_unstable();
    tids.dedup();
    let mut rows: HashMap<usize, String> = HashMap::new();
    for tid in tids {
        let depth = reader.reference(tid)?;
        let row = if per_base {
            let row: Vec<String> = depth.depth.iter().map(|d| d.to_string()).collect();
            row.join(",")
        } else {
            format!("{:?}", depth.mean())
        };
        rows.insert(tid, row);
    }

    let mut out = myio::writer(outfile)?;
    for contig in &contigs {
        let Some(row) = reader.tid(&contig.name).and_then(|tid| rows.get(&tid)) else {
            log::warn!("{} is not a reference in {}", contig.name, bam);
            continue;
        };
        if per_base {
            writeln!(out, "{},{}", contig.name, row)?;
        } else {
            writeln!(
                out,
                "{},{},{:?},{}",
                contig.name,
                contig.len(),
                contig.gc_fraction(),
                row
            )?;
        }
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bed;

    fn toy() -> RefDepth {
        RefDepth {
            depth: vec![0, 2, 2, 4, 0, 0],
            covered: vec![false, true, true, true, false, false],
        }
    }

    fn write_toy(tables: &[RefDepth], target: &DepthTarget, mode: DepthMode) -> String {
        let mut out = Vec::new();
        write_reference(&mut out, "a", 6, tables, target, mode).unwrap();
        write_reference(&mut out, "b", 3, &vec![RefDepth::new(3); tables.len()], target, mode)
            .unwrap();
        String::from_utf8(out).unwrap()
    }

    fn open(paths: &[&str], filter: DepthFilter) -> Vec<DepthReader> {
        paths
            .iter()
            .map(|p| DepthReader::from_path(p, filter, 1).unwrap())
            .collect()
    }

    fn copy_fixture(dir: &tempfile::TempDir, name: &str) -> String {
        let path = dir.path().join(name);
        std::fs::copy(".test/depth.sam", &path).unwrap();
        path.to_str().unwrap().to_string()
    }

    #[test]
    fn test_per_base_skips_uncovered() {
        let text = write_toy(&[toy()], &DepthTarget::default(), DepthMode::PerBase);
        assert_eq!(text, "a\t2\t2\na\t3\t2\na\t4\t4\n");
    }

    #[test]
    fn test_average_and_region() {
        let text = write_toy(&[toy(), toy()], &DepthTarget::default(), DepthMode::Average);
        assert_eq!(text, "a\t6\t1.33\t1.33\nb\t3\t0.00\t0.00\n");
        let target = DepthTarget {
            region: Some(bed::parse_region("a:2-4").unwrap()),
            bed: None,
        };
        let text = write_toy(&[toy()], &target, DepthMode::Average);
        assert_eq!(text, "a\t3\t2.67\n");
    }

    #[test]
    fn test_windows() {
        let text = write_toy(&[toy()], &DepthTarget::default(), DepthMode::Window(4));
        assert_eq!(text, "a\t0\t4\t2.00\na\t4\t6\t0.00\nb\t0\t3\t0.00\n");
    }

    #[test]
    fn test_window_average_uses_bed_positions_only() {
        let dir = tempfile::tempdir().unwrap();
        let bed_file = dir.path().join("a.bed");
        std::fs::write(&bed_file, "a\t2\t4\n").unwrap();
        let target = DepthTarget {
            region: None,
            bed: Some(RegionSet::from_bed(bed_file.to_str().unwrap()).unwrap()),
        };
        let mut out = Vec::new();
        write_reference(&mut out, "a", 6, &[toy()], &target, DepthMode::Window(4)).unwrap();
        // positions 2 and 3 are in the bed: (2 + 4) / 2
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "a\t0\t4\t3.00\na\t4\t6\t0.00\n"
        );
    }

    #[test]
    fn test_average_with_bed_is_error() {
        let target = DepthTarget {
            region: None,
            bed: Some(RegionSet::default()),
        };
        let mut readers = open(&[".test/depth.sam"], DepthFilter::default());
        let mut out = Vec::new();
        assert!(write_depths(&mut out, &mut readers, &target, DepthMode::Average).is_err());
    }

    #[test]
    fn test_missing_positions_count_as_zero() {
        let short = RefDepth {
            depth: vec![5],
            covered: vec![true],
        };
        let mut out = Vec::new();
        write_reference(
            &mut out,
            "a",
            6,
            &[toy(), short],
            &DepthTarget::default(),
            DepthMode::PerBase,
        )
        .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "a\t1\t0\t5\na\t2\t2\t0\na\t3\t2\t0\na\t4\t4\t0\n"
        );
    }

    #[test]
    fn test_files_with_different_references() {
        // the second file only has a shorter chrA and no chrB
        let mut readers = open(
            &[".test/depth.sam", ".test/depth_short.sam"],
            DepthFilter::default(),
        );
        let mut out = Vec::new();
        write_depths(&mut out, &mut readers, &DepthTarget::default(), DepthMode::PerBase)
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 15);
        assert_eq!(lines[0], "chrA\t1\t2\t0");
        assert_eq!(lines[2], "chrA\t3\t2\t1");
        assert_eq!(lines[5], "chrA\t6\t3\t1");
        assert_eq!(lines[6], "chrA\t7\t3\t0");
        assert_eq!(lines[14], "chrA\t15\t1\t0");

        let mut readers = open(
            &[".test/depth.sam", ".test/depth_short.sam"],
            DepthFilter::default(),
        );
        let mut out = Vec::new();
        write_depths(&mut out, &mut readers, &DepthTarget::default(), DepthMode::Average)
            .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "chrA\t20\t1.40\t0.20\nchrB\t10\t0.00\t0.00\n"
        );
    }

    #[test]
    fn test_streamed_depths() {
        let mut reader = DepthReader::from_path(".test/depth.sam", DepthFilter::default(), 1).unwrap();
        let tid = reader.tid("chrA").unwrap();
        let d = reader.reference(tid).unwrap();
        // two reads over 1-10 and one read over 6-15 with a 2bp deletion at 9-10
        assert_eq!(&d.depth[0..5], &[2, 2, 2, 2, 2]);
        assert_eq!(&d.depth[5..8], &[3, 3, 3]);
        assert_eq!(&d.depth[8..10], &[2, 2]);
        assert!(d.covered[8]);
        assert_eq!(d.depth[15], 0);
        assert!(!d.covered[15]);
        assert_eq!(reader.reference(tid + 1).unwrap(), RefDepth::new(10));
        assert!(reader.reference(tid).is_err());

        let with_dels = DepthFilter {
            count_deletions: true,
            ..Default::default()
        };
        let mut reader = DepthReader::from_path(".test/depth.sam", with_dels, 1).unwrap();
        assert_eq!(&reader.reference(tid).unwrap().depth[8..10], &[3, 3]);

        let mapq = DepthFilter {
            min_mapq: 30,
            ..Default::default()
        };
        let mut reader = DepthReader::from_path(".test/depth.sam", mapq, 1).unwrap();
        assert_eq!(reader.reference(tid).unwrap().depth[0], 1);
    }

    #[test]
    fn test_csv_row_pads_empty_reference() {
        assert_eq!(csv_row("a", &toy()), vec!["a", "2", "2", "4"]);
        assert_eq!(csv_row("b", &RefDepth::new(3)), vec!["b", "0", "0", "0"]);
    }

    #[test]
    fn test_coverage_csv_next_to_input() {
        let dir = tempfile::tempdir().unwrap();
        let sam = copy_fixture(&dir, "sample.sam");
        let mut out = Vec::new();
        write_coverage(&mut out, &[sam], false, 1).unwrap();
        assert!(out.is_empty());
        let text = std::fs::read_to_string(dir.path().join("sample.cov.csv")).unwrap();
        assert_eq!(
            text,
            "\"chrA\",2,2,2,2,2,3,3,3,3,3,1,1,1,1,1\n\"chrB\",0,0,0,0,0,0,0,0,0,0\n"
        );
    }

    #[test]
    fn test_coverage_averages() {
        let dir = tempfile::tempdir().unwrap();
        let sam = copy_fixture(&dir, "sample.sam");
        let mut out = Vec::new();
        write_coverage(&mut out, &[sam], true, 1).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "chrA 1.5\nchrB 0.0\n");
        assert!(!dir.path().join("sample.cov.csv").exists());
    }

    #[test]
    fn test_contig_coverage() {
        let dir = tempfile::tempdir().unwrap();
        let fa = dir.path().join("ref.fa");
        std::fs::write(
            &fa,
            ">chrB\nAAAAAAAAAA\n>chrA\nACGTACGTACGTACGTACGT\n>chrC\nGGGGGGGGGGGG\n",
        )
        .unwrap();
        let fa = fa.to_str().unwrap();
        let out = dir.path().join("cov.csv");
        let out = out.to_str().unwrap();

        run_contig_coverage(".test/depth.sam", fa, 15, false, out, 1).unwrap();
        assert_eq!(std::fs::read_to_string(out).unwrap(), "chrA,20,0.5,1.4\n");

        // chrC is not in the bam and is skipped; rows keep the fasta order
        run_contig_coverage(".test/depth.sam", fa, 5, true, out, 1).unwrap();
        assert_eq!(
            std::fs::read_to_string(out).unwrap(),
            "chrB,0,0,0,0,0,0,0,0,0,0\n\
             chrA,2,2,2,2,2,3,3,3,2,2,1,1,1,1,1,0,0,0,0,0\n"
        );
    }
}
