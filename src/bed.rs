use super::myio;
use anyhow::{bail, Context, Result};
use bio::io::bed;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;

lazy_static! {
    static ref RGN_RE: Regex = Regex::new(r"^(.+):([0-9,]+)-([0-9,]+)$").unwrap();
}

#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub name: String,
    pub st: u64,
    pub en: u64,
}

impl Region {
    pub fn contains(&self, name: &str, pos: u64) -> bool {
        self.name == name && pos >= self.st && pos < self.en
    }
    pub fn len(&self) -> u64 {
        self.en - self.st
    }
    pub fn is_empty(&self) -> bool {
        self.en == self.st
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}-{}", self.name, self.st + 1, self.en)
    }
}

/// parse region strings, a bare contig name covers the whole contig.
/// # Example
/// ```
/// let rgn = biowrangle::bed::parse_region("chr1:1-1000").unwrap();
/// assert_eq!("chr1", rgn.name);
/// assert_eq!(0, rgn.st);
/// assert_eq!(1000, rgn.en);
///
/// let rgn2 = biowrangle::bed::parse_region("chr1:2-2000:1-1000").unwrap();
/// assert_eq!("chr1:2-2000", rgn2.name);
///
/// let whole = biowrangle::bed::parse_region("contig_7").unwrap();
/// assert_eq!(u64::MAX, whole.en);
/// ```
pub fn parse_region(region: &str) -> Result<Region> {
    let Some(caps) = RGN_RE.captures(region) else {
        return Ok(Region {
            name: region.to_string(),
            st: 0,
            en: u64::MAX,
        });
    };
    let name = caps[1].to_string();
    let st = caps[2]
        .replace(',', "")
        .parse::<u64>()
        .with_context(|| format!("bad region start: {}", region))?;
    let en = caps[3]
        .replace(',', "")
        .parse::<u64>()
        .with_context(|| format!("bad region end: {}", region))?;
    if st == 0 || st > en {
        bail!("Region start must be positive and less than end: {}", region);
    }
    Ok(Region {
        name,
        st: st - 1,
        en,
    })
}

/// Regions from a BED file grouped by contig, used for fast position lookups.
#[derive(Default, Debug)]
pub struct RegionSet {
    by_contig: HashMap<String, Vec<(u64, u64)>>,
}

impl RegionSet {
    /// parse bed file
    /// # Example
    /// ```
    /// let set = biowrangle::bed::RegionSet::from_bed(".test/regions.bed").unwrap();
    /// assert!(set.overlaps("contig_1", 15));
    /// assert!(!set.overlaps("contig_1", 500));
    /// ```
    pub fn from_bed(filename: &str) -> Result<RegionSet> {
        let mut set = RegionSet::default();
        let mut records = bed::Reader::new(myio::reader(filename)?);
        for (idx, rec) in records.records().enumerate() {
            let rec = rec.with_context(|| format!("error parsing bed at line {}", idx + 1))?;
            set.by_contig
                .entry(rec.chrom().to_string())
                .or_default()
                .push((rec.start(), rec.end()));
        }
        for intervals in set.by_contig.values_mut() {
            intervals.sort_unstable();
        }
        log::debug!("read {} contigs from {}", set.by_contig.len(), filename);
        Ok(set)
    }

    /// true when `pos` (0-based) falls inside any interval on `name`.
    pub fn overlaps(&self, name: &str, pos: u64) -> bool {
        match self.by_contig.get(name) {
            Some(intervals) => {
                // intervals are sorted by start, only those starting at or before pos matter
                let upto = intervals.partition_point(|(st, _)| *st <= pos);
                intervals[..upto].iter().any(|(_, en)| pos < *en)
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_contains() {
        let rgn = parse_region("contig_1:11-20").unwrap();
        assert!(rgn.contains("contig_1", 10));
        assert!(rgn.contains("contig_1", 19));
        assert!(!rgn.contains("contig_1", 20));
        assert!(!rgn.contains("contig_2", 12));
        assert_eq!(rgn.len(), 10);
        assert_eq!(rgn.to_string(), "contig_1:11-20");
    }

    #[test]
    fn test_bad_region() {
        assert!(parse_region("chr1:100-10").is_err());
        assert!(parse_region("chr1:0-10").is_err());
    }

    #[test]
    fn test_region_set_overlaps() {
        let mut set = RegionSet::default();
        set.by_contig
            .insert("a".to_string(), vec![(0, 5), (2, 40), (50, 60)]);
        assert!(set.overlaps("a", 30));
        assert!(set.overlaps("a", 55));
        assert!(!set.overlaps("a", 45));
        assert!(!set.overlaps("b", 1));
    }
}
