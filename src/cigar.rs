use rust_htslib::bam::record::Cigar::*;
use rust_htslib::bam::record::{Cigar, CigarString};
use std::fmt;

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    /// an alignment column with a gap in both sequences
    DoubleGap { column: usize },
    /// the query and subject strings are not the same length
    UnevenAlignment { query: usize, subject: usize },
    /// the midline does not cover every alignment column
    UnevenMidline { columns: usize, midline: usize },
}
type CigarResult<T> = Result<T, crate::cigar::Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::DoubleGap { column } => {
                write!(f, "alignment column {} is gapped in both sequences", column)
            }
            Error::UnevenAlignment { query, subject } => write!(
                f,
                "alignment strings differ in length: query {}, subject {}",
                query, subject
            ),
            Error::UnevenMidline { columns, midline } => write!(
                f,
                "midline has {} characters for {} alignment columns",
                midline, columns
            ),
        }
    }
}

impl std::error::Error for Error {}

/// # Example
/// ```
/// use biowrangle::cigar;
/// use rust_htslib::bam::record::Cigar::*;
/// assert!(cigar::consumes_query(&Diff(5)));
/// assert!(!cigar::consumes_query(&HardClip(5)));
/// ```
pub fn consumes_query(cigar_opt: &Cigar) -> bool {
    matches!(
        cigar_opt,
        Match(_i) | Ins(_i) | SoftClip(_i) | Diff(_i) | Equal(_i)
    )
}

/// Query length implied by a CIGAR, hard clips excluded.
pub fn query_len<'a>(ops: impl IntoIterator<Item = &'a Cigar>) -> u64 {
    ops.into_iter()
        .filter(|op| consumes_query(op))
        .map(|op| op.len() as u64)
        .sum()
}

/// Bases of the original read accounted for by the CIGAR: every operation but deletions.
/// Hard clips count, so for a full read this equals the read length.
pub fn read_len_with_clips(ops: &[Cigar]) -> u64 {
    ops.iter()
        .filter(|op| !matches!(op, Del(_)))
        .map(|op| op.len() as u64)
        .sum()
}

/// Append an operation, merging it into the previous one when they are the same kind.
fn push_op(ops: &mut Vec<Cigar>, op: Cigar) {
    if let Some(last) = ops.last_mut() {
        let merged = match (&*last, &op) {
            (Match(a), Match(b)) => Some(Match(a + b)),
            (Equal(a), Equal(b)) => Some(Equal(a + b)),
            (Ins(a), Ins(b)) => Some(Ins(a + b)),
            (Del(a), Del(b)) => Some(Del(a + b)),
            (HardClip(a), HardClip(b)) => Some(HardClip(a + b)),
            _ => None,
        };
        if let Some(merged) = merged {
            *last = merged;
            return;
        }
    }
    ops.push(op);
}

/// Build a CIGAR from a gapped pairwise alignment as reported by BLAST.
///
/// `q_from`/`q_to` are the 1-based query coordinates of the alignment and
/// `q_len` the full query length, used to add hard clips for the unaligned ends.
/// Columns marked `|` in the BLAST `midline` become `=`, other aligned columns `M`,
/// gaps in the query `D` and gaps in the subject `I`. Without a midline, identical
/// residues are treated as marked.
/// # Example
/// ```
/// use biowrangle::cigar;
/// let c = cigar::from_alignment(b"AC-GTA", b"ACTGCA", Some(b"|| | |"), 3, 7, 10).unwrap();
/// assert_eq!(c.to_string(), "2H2=1D1=1M1=3H");
/// ```
pub fn from_alignment(
    query: &[u8],
    subject: &[u8],
    midline: Option<&[u8]>,
    q_from: u64,
    q_to: u64,
    q_len: u64,
) -> CigarResult<CigarString> {
    if query.len() != subject.len() {
        return Err(Error::UnevenAlignment {
            query: query.len(),
            subject: subject.len(),
        });
    }
    if let Some(midline) = midline {
        if midline.len() != query.len() {
            return Err(Error::UnevenMidline {
                columns: query.len(),
                midline: midline.len(),
            });
        }
    }
    let mut ops = Vec::new();
    if q_from > 1 {
        ops.push(HardClip((q_from - 1) as u32));
    }
    for (column, (q, s)) in query.iter().zip(subject).enumerate() {
        let marked = match midline {
            Some(m) => m[column] == b'|',
            None => q.eq_ignore_ascii_case(s),
        };
        let op = match (*q == b'-', *s == b'-') {
            (false, false) if marked => Equal(1),
            (false, false) => Match(1),
            (true, false) => Del(1),
            (false, true) => Ins(1),
            (true, true) => return Err(Error::DoubleGap { column }),
        };
        push_op(&mut ops, op);
    }
    if q_to < q_len {
        push_op(&mut ops, HardClip((q_len - q_to) as u32));
    }
    Ok(CigarString(ops))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_length_identity() {
        let c = from_alignment(b"ACGT", b"ACGT", None, 1, 4, 4).unwrap();
        assert_eq!(c.0, vec![Equal(4)]);
        assert_eq!(read_len_with_clips(&c.0), 4);
    }

    #[test]
    fn test_runs_are_merged() {
        let c = from_alignment(b"AAGG--TT", b"ACGGCCTA", None, 1, 6, 6).unwrap();
        assert_eq!(c.0, vec![Equal(1), Match(1), Equal(2), Del(2), Equal(1), Match(1)]);
        assert_eq!(query_len(&c.0), 6);
    }

    #[test]
    fn test_insertion_and_clips_account_for_read() {
        let c = from_alignment(b"ACGTT", b"AC-TT", Some(b"|| ||"), 11, 15, 30).unwrap();
        assert_eq!(c.to_string(), "10H2=1I2=15H");
        assert_eq!(read_len_with_clips(&c.0), 30);
    }

    #[test]
    fn test_double_gap_is_error() {
        assert_eq!(
            from_alignment(b"A-", b"A-", None, 1, 1, 1),
            Err(Error::DoubleGap { column: 1 })
        );
    }

    #[test]
    fn test_uneven_alignment() {
        assert!(from_alignment(b"AC", b"A", None, 1, 2, 2).is_err());
        assert!(from_alignment(b"AC", b"AC", Some(b"|"), 1, 2, 2).is_err());
    }

    #[test]
    fn test_unmarked_n_column_is_match() {
        let c = from_alignment(b"ANA", b"ANA", Some(b"| |"), 1, 3, 3).unwrap();
        assert_eq!(c.to_string(), "1=1M1=");
        let c = from_alignment(b"ANA", b"ANA", None, 1, 3, 3).unwrap();
        assert_eq!(c.to_string(), "3=");
    }
}
