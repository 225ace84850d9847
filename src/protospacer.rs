use super::blast;
use super::fasta;
use super::myio;
use anyhow::{Context, Result};
use bio::alphabets::dna::revcomp;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::Path;

lazy_static! {
    static ref SPACER_RE: Regex = Regex::new(r"G(\d+)SP(\d+)").unwrap();
}

/// A spacer hit on a target, coordinates as BLAST reports them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Protospacer {
    pub gid: String,
    pub spid: String,
    pub target: String,
    pub start: u64,
    pub end: u64,
}

/// # Example
/// ```
/// let (gid, spid) = biowrangle::protospacer::spacer_ids("G12SP3").unwrap();
/// assert_eq!((gid.as_str(), spid.as_str()), ("12", "3"));
/// assert!(biowrangle::protospacer::spacer_ids("spacer_3").is_none());
/// ```
pub fn spacer_ids(query: &str) -> Option<(String, String)> {
    let caps = SPACER_RE.captures(query)?;
    Some((caps[1].to_string(), caps[2].to_string()))
}

impl Protospacer {
    pub fn is_reverse(&self) -> bool {
        self.start > self.end
    }

    fn header(&self) -> String {
        format!(
            "G{}SP{} Target={} {} {};",
            self.gid, self.spid, self.target, self.start, self.end
        )
    }

    /// Left and right flanks of `len` bases read in the spacer's orientation.
    /// A flank running off either end of `seq` is `None`.
    pub fn flanks(&self, seq: &[u8], len: u64) -> (Option<Vec<u8>>, Option<Vec<u8>>) {
        let (lo, hi) = if self.is_reverse() {
            (self.end, self.start)
        } else {
            (self.start, self.end)
        };
        // 0-based: protospacer is [lo - 1, hi)
        let before = (lo > len && lo <= seq.len() as u64 + 1)
            .then(|| seq[(lo - 1 - len) as usize..(lo - 1) as usize].to_vec());
        let after = (hi + len <= seq.len() as u64)
            .then(|| seq[hi as usize..(hi + len) as usize].to_vec());
        if self.is_reverse() {
            (after.map(|s| revcomp(&s)), before.map(|s| revcomp(&s)))
        } else {
            (before, after)
        }
    }
}

/// Spacer hits grouped by CRISPR id, in file order within a group.
pub fn read_hits(filename: &str) -> Result<BTreeMap<String, Vec<Protospacer>>> {
    let mut groups: BTreeMap<String, Vec<Protospacer>> = BTreeMap::new();
    for hit in blast::read_tab(filename)? {
        let Some((gid, spid)) = spacer_ids(&hit.qseqid) else {
            log::warn!("{} is not named like G<n>SP<n>, skipping", hit.qseqid);
            continue;
        };
        groups.entry(gid.clone()).or_default().push(Protospacer {
            gid,
            spid,
            target: hit.sseqid,
            start: hit.sstart,
            end: hit.send,
        });
    }
    Ok(groups)
}

/// Write `<gid>.protospacers.l.fa` and `<gid>.protospacers.r.fa` for every CRISPR.
/// Returns the number of flanks written.
pub fn run(blastfile: &str, targets: &str, len: u64, outdir: &str) -> Result<usize> {
    let groups = read_hits(blastfile)?;
    let seqs: HashMap<String, Vec<u8>> = fasta::read_fasta(targets)?
        .into_iter()
        .map(|c| (c.name, c.seq))
        .collect();
    std::fs::create_dir_all(outdir).with_context(|| format!("Failed to create {}", outdir))?;

    let mut written = 0;
    for (gid, protos) in &groups {
        let base = Path::new(outdir).join(format!("{}.protospacers", gid));
        let base = base.to_string_lossy();
        let mut left = myio::writer(&format!("{}.l.fa", base))?;
        let mut right = myio::writer(&format!("{}.r.fa", base))?;
        for proto in protos {
            let Some(seq) = seqs.get(&proto.target) else {
                log::warn!("target {} of {} not in {}", proto.target, proto.header(), targets);
                continue;
            };
            let (l, r) = proto.flanks(seq, len);
            if let Some(l) = l {
                writeln!(left, ">{} left flank ({}bp)", proto.header(), len)?;
                left.write_all(&l)?;
                writeln!(left)?;
                written += 1;
            }
            if let Some(r) = r {
                writeln!(right, ">{} right flank ({}bp)", proto.header(), len)?;
                right.write_all(&r)?;
                writeln!(right)?;
                written += 1;
            }
        }
        left.flush()?;
        right.flush()?;
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proto(start: u64, end: u64) -> Protospacer {
        Protospacer {
            gid: "1".to_string(),
            spid: "1".to_string(),
            target: "t".to_string(),
            start,
            end,
        }
    }

    #[test]
    fn test_flanks_forward_and_reverse() {
        let seq = b"AAAACCCCGGGGTTTT";
        // protospacer is CCCC at 5..8
        let (l, r) = proto(5, 8).flanks(seq, 3);
        assert_eq!(l.unwrap(), b"AAA".to_vec());
        assert_eq!(r.unwrap(), b"GGG".to_vec());
        let (l, r) = proto(8, 5).flanks(seq, 3);
        assert_eq!(l.unwrap(), b"CCC".to_vec());
        assert_eq!(r.unwrap(), b"TTT".to_vec());
    }

    #[test]
    fn test_flanks_off_the_ends() {
        let seq = b"AAAACCCCGGGGTTTT";
        let (l, r) = proto(2, 14).flanks(seq, 3);
        assert!(l.is_none());
        assert!(r.is_none());
        let (l, r) = proto(4, 13).flanks(seq, 3);
        assert_eq!(l.unwrap(), b"AAA".to_vec());
        assert_eq!(r.unwrap(), b"TTT".to_vec());
    }

    #[test]
    fn test_flank_files_per_crispr() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().to_str().unwrap();
        assert_eq!(run(".test/hits.blast_tab", ".test/contigs.fa", 15, out).unwrap(), 4);
        let left = std::fs::read_to_string(dir.path().join("1.protospacers.l.fa")).unwrap();
        assert_eq!(
            left,
            ">G1SP1 Target=contig_1 21 50; left flank (15bp)\nAGACAATTACATAAC\n\
             >G1SP2 Target=contig_1 40 11; left flank (15bp)\nCACACTGGGCCAACA\n"
        );
        let right = std::fs::read_to_string(dir.path().join("1.protospacers.r.fa")).unwrap();
        assert_eq!(
            right,
            ">G1SP1 Target=contig_1 21 50; right flank (15bp)\nGTGTGAATCGCTTAA\n"
        );
        let right2 = std::fs::read_to_string(dir.path().join("2.protospacers.r.fa")).unwrap();
        assert!(right2.is_empty());
        let left2 = std::fs::read_to_string(dir.path().join("2.protospacers.l.fa")).unwrap();
        assert!(left2.ends_with("\nACGATTAACTGATAA\n"));
        // hits on unknown targets still get (empty) files
        assert!(dir.path().join("3.protospacers.l.fa").exists());
    }
}
