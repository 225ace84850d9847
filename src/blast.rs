use super::myio;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fmt;
use std::io::Read;
use std::str::FromStr;

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    WrongColumnCount { expected: &'static str, found: usize },
    ParseColumn { column: usize, value: String },
}
type TabResult<T> = Result<T, crate::blast::Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::WrongColumnCount { expected, found } => {
                write!(f, "expected {} columns but found {}", expected, found)
            }
            Error::ParseColumn { column, value } => {
                write!(f, "could not parse column {}: {:?}", column + 1, value)
            }
        }
    }
}

impl std::error::Error for Error {}

fn column<T: FromStr>(fields: &[&str], column: usize) -> TabResult<T> {
    fields[column].parse::<T>().map_err(|_| Error::ParseColumn {
        column,
        value: fields[column].to_string(),
    })
}

/// One line of `-outfmt 6` (`std`), optionally followed by `qlen slen`.
#[derive(Debug, Clone, PartialEq)]
pub struct TabHit {
    pub qseqid: String,
    pub sseqid: String,
    pub pident: f64,
    pub length: u64,
    pub mismatch: u64,
    pub gapopen: u64,
    pub qstart: u64,
    pub qend: u64,
    pub sstart: u64,
    pub send: u64,
    pub evalue: f64,
    pub bitscore: f64,
    pub qlen: Option<u64>,
    pub slen: Option<u64>,
}

impl TabHit {
    /// # Example
    /// ```
    /// use biowrangle::blast::TabHit;
    /// let hit = TabHit::from_line("q1\ts1\t99.5\t200\t1\t0\t1\t200\t500\t301\t1e-50\t370").unwrap();
    /// assert_eq!(hit.subject_range(), (301, 500));
    /// assert!(hit.is_reverse());
    /// assert_eq!(hit.qlen, None);
    /// ```
    pub fn from_line(line: &str) -> TabResult<TabHit> {
        let fields: Vec<&str> = line.trim_end().split('\t').collect();
        if fields.len() != 12 && fields.len() != 14 {
            return Err(Error::WrongColumnCount {
                expected: "12 (std) or 14 (std qlen slen)",
                found: fields.len(),
            });
        }
        let (qlen, slen) = if fields.len() == 14 {
            (
                Some(column::<u64>(&fields, 12)?),
                Some(column::<u64>(&fields, 13)?),
            )
        } else {
            (None, None)
        };
        Ok(TabHit {
            qseqid: fields[0].to_string(),
            sseqid: fields[1].to_string(),
            pident: column(&fields, 2)?,
            length: column(&fields, 3)?,
            mismatch: column(&fields, 4)?,
            gapopen: column(&fields, 5)?,
            qstart: column(&fields, 6)?,
            qend: column(&fields, 7)?,
            sstart: column(&fields, 8)?,
            send: column(&fields, 9)?,
            evalue: column(&fields, 10)?,
            bitscore: column(&fields, 11)?,
            qlen,
            slen,
        })
    }

    /// Hit on the minus strand of the subject.
    pub fn is_reverse(&self) -> bool {
        self.sstart > self.send
    }

    /// 1-based inclusive subject coordinates, lowest first.
    pub fn subject_range(&self) -> (u64, u64) {
        if self.is_reverse() {
            (self.send, self.sstart)
        } else {
            (self.sstart, self.send)
        }
    }
}

/// Read every hit of a tabular BLAST file, skipping comments and blank lines.
pub fn read_tab(filename: &str) -> Result<Vec<TabHit>> {
    let mut hits = Vec::new();
    for (idx, line) in myio::read_lines(filename)?.iter().enumerate() {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let hit = TabHit::from_line(line)
            .with_context(|| format!("Bad BLAST line {} in {}", idx + 1, filename))?;
        hits.push(hit);
    }
    log::debug!("{} hits in {}", hits.len(), filename);
    Ok(hits)
}

/// The columns of a fragment search that ANIb needs:
/// `qseqid sseqid length mismatch pident nident qlen ...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentHit {
    pub qseqid: String,
    pub length: u64,
    pub mismatch: u64,
    pub nident: u64,
    pub qlen: u64,
}

impl FragmentHit {
    pub fn from_line(line: &str) -> TabResult<FragmentHit> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 7 {
            return Err(Error::WrongColumnCount {
                expected: "at least 7",
                found: fields.len(),
            });
        }
        Ok(FragmentHit {
            qseqid: fields[0].to_string(),
            length: column(&fields, 2)?,
            mismatch: column(&fields, 3)?,
            nident: column(&fields, 5)?,
            qlen: column(&fields, 6)?,
        })
    }
}

//
// BLAST XML (-outfmt 5)
//
#[derive(Debug, Deserialize)]
#[serde(rename = "BlastOutput")]
struct BlastOutputXml {
    #[serde(rename = "BlastOutput_iterations")]
    iterations: Option<IterationsXml>,
}

#[derive(Debug, Deserialize)]
struct IterationsXml {
    #[serde(rename = "Iteration", default)]
    iterations: Vec<Iteration>,
}

/// The hits of one query sequence.
#[derive(Debug, Deserialize)]
pub struct Iteration {
    #[serde(rename = "Iteration_query-ID", default)]
    pub query_id: String,
    #[serde(rename = "Iteration_query-def", default)]
    pub query_def: String,
    #[serde(rename = "Iteration_query-len", default)]
    pub query_len: u64,
    #[serde(rename = "Iteration_hits")]
    hits: Option<HitsXml>,
}

#[derive(Debug, Deserialize)]
struct HitsXml {
    #[serde(rename = "Hit", default)]
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
pub struct Hit {
    #[serde(rename = "Hit_id", default)]
    pub id: String,
    #[serde(rename = "Hit_def", default)]
    pub def: String,
    #[serde(rename = "Hit_accession", default)]
    pub accession: String,
    #[serde(rename = "Hit_len", default)]
    pub len: u64,
    #[serde(rename = "Hit_hsps")]
    hsps: Option<HspsXml>,
}

#[derive(Debug, Deserialize)]
struct HspsXml {
    #[serde(rename = "Hsp", default)]
    hsps: Vec<Hsp>,
}

fn default_frame() -> i32 {
    1
}

#[derive(Debug, Deserialize)]
pub struct Hsp {
    #[serde(rename = "Hsp_query-from")]
    pub query_from: u64,
    #[serde(rename = "Hsp_query-to")]
    pub query_to: u64,
    #[serde(rename = "Hsp_hit-from")]
    pub hit_from: u64,
    #[serde(rename = "Hsp_hit-to")]
    pub hit_to: u64,
    #[serde(rename = "Hsp_query-frame", default = "default_frame")]
    pub query_frame: i32,
    #[serde(rename = "Hsp_hit-frame", default = "default_frame")]
    pub hit_frame: i32,
    #[serde(rename = "Hsp_qseq")]
    pub qseq: String,
    #[serde(rename = "Hsp_hseq")]
    pub hseq: String,
    #[serde(rename = "Hsp_midline", default)]
    pub midline: String,
}

impl Iteration {
    pub fn hits(&self) -> &[Hit] {
        self.hits.as_ref().map(|h| h.hits.as_slice()).unwrap_or(&[])
    }

    /// First word of the query definition, or the query id when BLAST had no definition line.
    pub fn query_name(&self) -> &str {
        match self.query_def.split_whitespace().next() {
            Some(name) if self.query_def != "No definition line" => name,
            _ => self.query_id.as_str(),
        }
    }
}

impl Hit {
    pub fn hsps(&self) -> &[Hsp] {
        self.hsps.as_ref().map(|h| h.hsps.as_slice()).unwrap_or(&[])
    }

    /// First word of the hit definition, falling back on the accession.
    pub fn subject_name(&self) -> &str {
        match self.def.split_whitespace().next() {
            Some(name) if self.def != "No definition line" => name,
            _ => self.accession.as_str(),
        }
    }
}

impl Hsp {
    /// Aligned to the opposite strand of the subject.
    pub fn is_reverse(&self) -> bool {
        self.query_frame != self.hit_frame || self.hit_from > self.hit_to
    }

    /// The midline when it spans every alignment column. Text content is
    /// trimmed on parsing, so a midline starting or ending in a space is lost.
    pub fn full_midline(&self) -> Option<&[u8]> {
        if !self.midline.is_empty() && self.midline.len() == self.qseq.len() {
            Some(self.midline.as_bytes())
        } else {
            None
        }
    }
}

/// Parse a BLAST XML report.
pub fn parse_xml_str(xml: &str) -> Result<Vec<Iteration>> {
    let parsed: BlastOutputXml =
        quick_xml::de::from_str(xml).context("Malformed BLAST XML")?;
    Ok(parsed
        .iterations
        .map(|its| its.iterations)
        .unwrap_or_default())
}

pub fn parse_xml(filename: &str) -> Result<Vec<Iteration>> {
    let mut xml = String::new();
    myio::reader(filename)?
        .read_to_string(&mut xml)
        .with_context(|| format!("Could not read {}", filename))?;
    parse_xml_str(&xml).with_context(|| format!("Could not parse {}", filename))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrong_columns() {
        assert_eq!(
            TabHit::from_line("a\tb\t1"),
            Err(Error::WrongColumnCount {
                expected: "12 (std) or 14 (std qlen slen)",
                found: 3
            })
        );
        assert!(matches!(
            TabHit::from_line("a\tb\tx\t200\t1\t0\t1\t200\t1\t200\t0\t370"),
            Err(Error::ParseColumn { column: 2, .. })
        ));
    }

    #[test]
    fn test_with_lengths() {
        let hit = TabHit::from_line("q\ts\t100\t950\t0\t0\t1\t950\t1\t950\t0\t1000\t1000\t2000")
            .unwrap();
        assert_eq!(hit.qlen, Some(1000));
        assert_eq!(hit.slen, Some(2000));
        assert!(!hit.is_reverse());
    }

    #[test]
    fn test_fragment_hit() {
        let hit = FragmentHit::from_line(
            "frag00001 frag00042 1000 10 99.00 990 1020 1020 1 1000 1 1000 990 99.00 0",
        )
        .unwrap();
        assert_eq!(hit.length, 1000);
        assert_eq!(hit.mismatch, 10);
        assert_eq!(hit.nident, 990);
        assert_eq!(hit.qlen, 1020);
    }

    #[test]
    fn test_parse_xml() {
        let its = parse_xml(".test/hits.xml").unwrap();
        assert_eq!(its.len(), 2);
        assert_eq!(its[0].query_name(), "read_1");
        assert_eq!(its[0].query_len, 20);
        let hit = &its[0].hits()[0];
        assert_eq!(hit.subject_name(), "contig_1");
        assert_eq!(hit.hsps().len(), 1);
        assert!(!hit.hsps()[0].is_reverse());
        assert_eq!(hit.hsps()[0].full_midline(), Some(&b"|||||||| |||| ||"[..]));
        assert!(its[1].hits()[0].hsps()[0].is_reverse());
    }
}
