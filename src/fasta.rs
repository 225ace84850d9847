use super::myio;
use anyhow::{bail, Context, Result};
use bio::io::fasta;
use needletail::{parse_fastx_file, parse_fastx_stdin, FastxReader};
use std::io::Write;

/// A named sequence read from a fasta file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contig {
    pub name: String,
    pub seq: Vec<u8>,
}

impl Contig {
    pub fn len(&self) -> usize {
        self.seq.len()
    }
    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }
    /// Fraction of G and C bases.
    /// ```
    /// use biowrangle::fasta::Contig;
    /// let c = Contig { name: "x".to_string(), seq: b"GGCCAATT".to_vec() };
    /// assert!((c.gc_fraction() - 0.5).abs() < 1e-6);
    /// ```
    pub fn gc_fraction(&self) -> f32 {
        bio::seq_analysis::gc::gc_content(&self.seq)
    }
}

/// Read all records of a (possibly gzipped) fasta file into memory.
/// # Example
/// ```
/// let contigs = biowrangle::fasta::read_fasta(".test/contigs.fa").unwrap();
/// assert_eq!(contigs[0].name, "contig_1");
/// ```
pub fn read_fasta(filename: &str) -> Result<Vec<Contig>> {
    let reader = fasta::Reader::new(myio::reader(filename)?);
    let mut contigs = Vec::new();
    for (idx, rec) in reader.records().enumerate() {
        let rec = rec.with_context(|| format!("Error reading record {} of {}", idx + 1, filename))?;
        contigs.push(Contig {
            name: rec.id().to_string(),
            seq: rec.seq().to_vec(),
        });
    }
    log::debug!("Read {} sequences from {}", contigs.len(), filename);
    Ok(contigs)
}

/// Open a fasta or fastq file, or stdin for "-", with needletail.
pub fn fastx_reader(filename: &str) -> Result<Box<dyn FastxReader>> {
    let reader = if filename == "-" {
        parse_fastx_stdin()
    } else {
        parse_fastx_file(filename)
    };
    reader.with_context(|| format!("Missing or invalid fastx input: {}", filename))
}

/// Sum of all sequence lengths in a fasta file, ambiguity symbols included.
pub fn total_length(filename: &str) -> Result<u64> {
    let reader = fasta::Reader::new(myio::reader(filename)?);
    let mut total = 0;
    for rec in reader.records() {
        total += rec.with_context(|| format!("Error reading {}", filename))?.seq().len() as u64;
    }
    Ok(total)
}

/// Write one fasta record, wrapping the sequence at 60 columns.
pub fn write_record<W: Write>(out: &mut W, header: &str, seq: &[u8]) -> Result<()> {
    writeln!(out, ">{}", header)?;
    for line in seq.chunks(60) {
        out.write_all(line)?;
        out.write_all(b"\n")?;
    }
    Ok(())
}

/// Split every record into consecutive pieces of `fragsize` bases,
/// keeping the trailing short piece. Pieces are named `fragNNNNN` with
/// a counter that runs across the whole file. Returns the number of fragments.
pub fn fragment_fasta(infile: &str, outfile: &str, fragsize: usize) -> Result<usize> {
    if fragsize == 0 {
        bail!("Fragment size must be positive");
    }
    let mut out = myio::writer(outfile)?;
    let mut count = 0;
    for contig in read_fasta(infile)? {
        for piece in contig.seq.chunks(fragsize) {
            count += 1;
            write_record(&mut out, &format!("frag{:05}", count), piece)?;
        }
    }
    out.flush()?;
    log::info!("Wrote {} fragments of {} to {}", count, infile, outfile);
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragments_keep_trailing_piece() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.fa");
        std::fs::write(&input, ">a\nACGTACGTAC\n>b\nGGG\n").unwrap();
        let output = dir.path().join("out.fa");
        let n = fragment_fasta(input.to_str().unwrap(), output.to_str().unwrap(), 4).unwrap();
        // a -> 4 + 4 + 2, b -> 3
        assert_eq!(n, 4);
        let frags = read_fasta(output.to_str().unwrap()).unwrap();
        let names: Vec<&str> = frags.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["frag00001", "frag00002", "frag00003", "frag00004"]);
        assert_eq!(frags[2].seq, b"AC".to_vec());
        assert_eq!(frags[3].seq, b"GGG".to_vec());
    }

    #[test]
    fn test_total_length() {
        let total = total_length(".test/contigs.fa").unwrap();
        let contigs = read_fasta(".test/contigs.fa").unwrap();
        assert_eq!(total, contigs.iter().map(|c| c.len() as u64).sum::<u64>());
    }
}
