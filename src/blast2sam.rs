use super::blast::{self, Hsp, Iteration};
use super::cigar;
use super::fasta;
use super::myio;
use anyhow::{bail, Context, Result};
use bio::alphabets::dna::revcomp;
use rust_htslib::bam::record::CigarString;
use std::collections::HashMap;
use std::io::Write;

/// One alignment line of the SAM output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamLine {
    pub qname: String,
    pub flag: u16,
    pub rname: String,
    /// 1-based leftmost position
    pub pos: u64,
    pub cigar: CigarString,
    pub seq: String,
}

impl std::fmt::Display for SamLine {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t255\t{}\t*\t0\t0\t{}\t*",
            self.qname, self.flag, self.rname, self.pos, self.cigar, self.seq
        )
    }
}

/// Convert one HSP into a SAM line against `rname`.
pub fn hsp_to_sam(qname: &str, query_len: u64, rname: &str, hsp: &Hsp) -> Result<SamLine> {
    let midline = hsp.full_midline();
    if midline.is_none() && !hsp.midline.is_empty() {
        log::warn!(
            "Midline of {} against {} does not span the alignment, comparing residues",
            qname,
            rname
        );
    }
    let mut cigar = cigar::from_alignment(
        hsp.qseq.as_bytes(),
        hsp.hseq.as_bytes(),
        midline,
        hsp.query_from,
        hsp.query_to,
        query_len,
    )
    .with_context(|| format!("Bad alignment for {} against {}", qname, rname))?;

    let accounted = cigar::read_len_with_clips(&cigar.0);
    if accounted != query_len {
        log::warn!(
            "CIGAR does not match the length of {}: {} {} != {}",
            qname,
            cigar,
            accounted,
            query_len
        );
    }

    let dna: Vec<u8> = hsp.qseq.bytes().filter(|b| *b != b'-').collect();
    let (flag, seq) = if hsp.is_reverse() {
        cigar.0.reverse();
        (0x10, revcomp(dna))
    } else {
        (0, dna)
    };
    Ok(SamLine {
        qname: qname.to_string(),
        flag,
        rname: rname.to_string(),
        pos: hsp.hit_from.min(hsp.hit_to),
        cigar,
        seq: String::from_utf8_lossy(&seq).to_string(),
    })
}

/// SAM header with one `@SQ` per reference in input order.
pub fn sam_header(refs: &[(String, usize)]) -> String {
    let mut header = String::from("@HD\tVN:1.0\n");
    for (name, len) in refs {
        header.push_str(&format!("@SQ\tSN:{}\tLN:{}\n", name, len));
    }
    header
}

/// All alignments of the report as SAM lines, checking every subject is a known reference.
pub fn iterations_to_sam(
    iterations: &[Iteration],
    ref_lens: &HashMap<String, usize>,
) -> Result<Vec<SamLine>> {
    let mut lines = Vec::new();
    for it in iterations {
        for hit in it.hits() {
            let rname = hit.subject_name();
            if !ref_lens.contains_key(rname) {
                bail!(
                    "BLAST subject {} of query {} is not in the reference fasta",
                    rname,
                    it.query_name()
                );
            }
            for hsp in hit.hsps() {
                lines.push(hsp_to_sam(it.query_name(), it.query_len, rname, hsp)?);
            }
        }
    }
    Ok(lines)
}

pub fn blast_to_sam(xml: &str, reference: &str, output: &str) -> Result<usize> {
    let refs: Vec<(String, usize)> = fasta::read_fasta(reference)?
        .into_iter()
        .map(|c| {
            let len = c.len();
            (c.name, len)
        })
        .collect();
    let ref_lens: HashMap<String, usize> = refs.iter().cloned().collect();

    let iterations = blast::parse_xml(xml)?;
    log::info!("{} queries in {}", iterations.len(), xml);
    let lines = iterations_to_sam(&iterations, &ref_lens)?;

    let mut out = myio::writer(output)?;
    write!(out, "{}", sam_header(&refs))?;
    for line in &lines {
        writeln!(out, "{}", line)?;
    }
    out.flush()?;
    Ok(lines.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_and_reverse_hits() {
        let its = blast::parse_xml(".test/hits.xml").unwrap();
        let mut lens = HashMap::new();
        lens.insert("contig_1".to_string(), 200);
        let lines = iterations_to_sam(&its, &lens).unwrap();
        assert_eq!(lines.len(), 2);

        let fwd = &lines[0];
        assert_eq!(fwd.flag, 0);
        assert_eq!(fwd.pos, 11);
        assert_eq!(fwd.cigar.to_string(), "2H8=1I4=1M2=2H");
        assert_eq!(fwd.seq, "ACGTACGTAGGGCTTA");

        let rev = &lines[1];
        assert_eq!(rev.flag, 16);
        assert_eq!(rev.pos, 101);
        assert_eq!(rev.cigar.to_string(), "10=");
        assert_eq!(rev.seq, "AAAACCCGGT");
        assert_eq!(
            rev.to_string(),
            "read_2\t16\tcontig_1\t101\t255\t10=\t*\t0\t0\tAAAACCCGGT\t*"
        );
    }

    #[test]
    fn test_n_columns_follow_midline() {
        let xml = "<BlastOutput><BlastOutput_iterations><Iteration>\
            <Iteration_query-ID>Query_1</Iteration_query-ID>\
            <Iteration_query-def>read_n</Iteration_query-def>\
            <Iteration_query-len>6</Iteration_query-len>\
            <Iteration_hits><Hit><Hit_def>contig_1</Hit_def><Hit_len>200</Hit_len><Hit_hsps><Hsp>\
            <Hsp_query-from>1</Hsp_query-from><Hsp_query-to>6</Hsp_query-to>\
            <Hsp_hit-from>5</Hsp_hit-from><Hsp_hit-to>10</Hsp_hit-to>\
            <Hsp_qseq>ACNNGT</Hsp_qseq><Hsp_hseq>ACNNGT</Hsp_hseq>\
            <Hsp_midline>||  ||</Hsp_midline>\
            </Hsp></Hit_hsps></Hit></Iteration_hits></Iteration></BlastOutput_iterations></BlastOutput>";
        let its = blast::parse_xml_str(xml).unwrap();
        let mut lens = HashMap::new();
        lens.insert("contig_1".to_string(), 200);
        let lines = iterations_to_sam(&its, &lens).unwrap();
        assert_eq!(lines[0].cigar.to_string(), "2=2M2=");
        assert_eq!(lines[0].pos, 5);
    }

    #[test]
    fn test_unknown_reference() {
        let its = blast::parse_xml(".test/hits.xml").unwrap();
        assert!(iterations_to_sam(&its, &HashMap::new()).is_err());
    }

    #[test]
    fn test_header() {
        let refs = vec![("a".to_string(), 10), ("b".to_string(), 20)];
        assert_eq!(
            sam_header(&refs),
            "@HD\tVN:1.0\n@SQ\tSN:a\tLN:10\n@SQ\tSN:b\tLN:20\n"
        );
    }
}
