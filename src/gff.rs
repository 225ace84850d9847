use super::fasta;
use super::myio;
use super::plot;
use anyhow::{Context, Result};
use bio::alphabets::dna::revcomp;
use bio::io::gff::{self, GffType};
use bio_types::strand::Strand;
use std::collections::HashMap;
use std::io::Write;

/// Features of a GFF3 file together with any sequences in its `##FASTA` section.
#[derive(Debug, Default)]
pub struct GffFile {
    pub features: Vec<gff::Record>,
    /// `##sequence-region` lengths, in file order
    pub regions: Vec<(String, u64)>,
    pub sequences: HashMap<String, Vec<u8>>,
}

impl GffFile {
    /// Length of a sequence from its region directive, embedded sequence or
    /// the furthest feature end, in that order.
    pub fn seq_len(&self, name: &str) -> u64 {
        if let Some((_, len)) = self.regions.iter().find(|(n, _)| n == name) {
            return *len;
        }
        if let Some(seq) = self.sequences.get(name) {
            return seq.len() as u64;
        }
        self.features
            .iter()
            .filter(|f| f.seqname() == name)
            .map(|f| *f.end())
            .max()
            .unwrap_or(0)
    }

    /// Name of the first sequence described by the file.
    pub fn first_seqname(&self) -> Option<String> {
        self.regions
            .first()
            .map(|(n, _)| n.clone())
            .or_else(|| self.features.first().map(|f| f.seqname().to_string()))
    }
}

/// Parse GFF3 text. Parsing of features stops at `##FASTA`.
/// ```
/// let gff = biowrangle::gff::parse_gff(".test/genes.gff").unwrap();
/// assert_eq!(gff.features.len(), 4);
/// assert_eq!(gff.seq_len("contig_1"), 60);
/// ```
pub fn parse_gff(filename: &str) -> Result<GffFile> {
    let lines = myio::read_lines(filename)?;
    let split = lines
        .iter()
        .position(|l| l.starts_with("##FASTA"))
        .unwrap_or(lines.len());
    let mut gff_file = GffFile::default();

    for line in lines[..split].iter().filter(|l| l.starts_with("##sequence-region")) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if let (Some(name), Some(Ok(len))) = (fields.get(1), fields.get(3).map(|l| l.parse::<u64>())) {
            gff_file.regions.push((name.to_string(), len));
        }
    }

    let mut text = lines[..split]
        .iter()
        .filter(|l| !l.starts_with('#') && !l.trim().is_empty())
        .cloned()
        .collect::<Vec<String>>()
        .join("\n");
    text.push('\n');
    let mut reader = gff::Reader::new(text.as_bytes(), GffType::GFF3);
    for (idx, rec) in reader.records().enumerate() {
        let rec = rec.with_context(|| format!("Bad GFF feature {} in {}", idx + 1, filename))?;
        gff_file.features.push(rec);
    }

    let mut name: Option<String> = None;
    for line in lines.iter().skip(split + 1) {
        if let Some(header) = line.strip_prefix('>') {
            let n = header.split_whitespace().next().unwrap_or_default().to_string();
            gff_file.sequences.insert(n.clone(), Vec::new());
            name = Some(n);
        } else if let Some(n) = &name {
            if let Some(seq) = gff_file.sequences.get_mut(n) {
                seq.extend(line.trim().bytes());
            }
        }
    }
    log::debug!(
        "{} features and {} sequences in {}",
        gff_file.features.len(),
        gff_file.sequences.len(),
        filename
    );
    Ok(gff_file)
}

/// Sequence of a feature, reverse complemented on the minus strand.
pub fn feature_seq(feature: &gff::Record, seq: &[u8]) -> Option<Vec<u8>> {
    let st = feature.start().checked_sub(1)? as usize;
    let en = *feature.end() as usize;
    if st >= en || en > seq.len() {
        return None;
    }
    let piece = &seq[st..en];
    match feature.strand() {
        Some(Strand::Reverse) => Some(revcomp(piece)),
        _ => Some(piece.to_vec()),
    }
}

/// `gff-extract`: print `>locus_tag` and the sequence of every top level feature.
pub fn extract<W: Write>(out: &mut W, gff_file: &str, fasta_file: Option<&str>) -> Result<usize> {
    let mut gff = parse_gff(gff_file)?;
    if let Some(f) = fasta_file {
        for contig in fasta::read_fasta(f)? {
            gff.sequences.insert(contig.name, contig.seq);
        }
    }
    let mut written = 0;
    for feature in &gff.features {
        if feature.attributes().get("Parent").is_some() {
            continue;
        }
        let Some(seq) = gff.sequences.get(feature.seqname()) else {
            log::warn!("No sequence for {}, skipping feature", feature.seqname());
            continue;
        };
        let Some(tag) = feature.attributes().get("locus_tag") else {
            log::warn!(
                "skipping feature as it doesn't have a locus tag: {} {}:{}-{}",
                feature.feature_type(),
                feature.seqname(),
                feature.start(),
                feature.end()
            );
            continue;
        };
        let Some(piece) = feature_seq(feature, seq) else {
            log::warn!("{} lies outside of {}", tag, feature.seqname());
            continue;
        };
        writeln!(out, ">{}", tag)?;
        out.write_all(&piece)?;
        writeln!(out)?;
        written += 1;
    }
    Ok(written)
}

fn feature_colour(feature: &gff::Record) -> Option<&'static str> {
    match feature.feature_type() {
        "CDS" => {
            if feature.attributes().get("product").map(|p| p.as_str()) == Some("hypothetical protein") {
                Some("#BDBDBD")
            } else {
                Some("#2B8CBE")
            }
        }
        "source" | "region" => None,
        _ => Some("#000000"),
    }
}

/// One track per GFF file, drawn on a common scale set by the longest sequence.
pub fn gene_tracks(files: &[GffFile]) -> svg::Document {
    let width = 900.0;
    let padding = 25.0;
    let track_h = 40.0;
    let seq_len = files
        .iter()
        .filter_map(|g| g.first_seqname().map(|n| g.seq_len(&n)))
        .max()
        .unwrap_or(1)
        .max(1);
    let xs = plot::Scale::new((0.0, seq_len as f64), (padding, width - padding));
    let height = padding * 2.0 + track_h * files.len() as f64 + 20.0;
    let mut doc = plot::document(width, height);

    for (idx, gff) in files.iter().enumerate() {
        let Some(name) = gff.first_seqname() else {
            continue;
        };
        let y = padding + track_h * idx as f64;
        doc = doc
            .add(plot::line(
                xs.map(0.0),
                y + track_h / 2.0,
                xs.map(gff.seq_len(&name) as f64),
                y + track_h / 2.0,
                "#888888",
            ))
            .add(plot::label(padding, y + 8.0, name.clone(), 9));
        for feature in gff.features.iter().filter(|f| f.seqname() == name) {
            let Some(colour) = feature_colour(feature) else {
                continue;
            };
            let x0 = xs.map(*feature.start() as f64 - 1.0);
            let x1 = xs.map(*feature.end() as f64);
            let top = match feature.strand() {
                Some(Strand::Reverse) => y + track_h / 2.0,
                _ => y + 12.0,
            };
            doc = doc.add(
                plot::rect(x0, top, x1 - x0, 14.0, colour).set("stroke", colour),
            );
        }
    }

    let axis_y = padding + track_h * files.len() as f64 + 5.0;
    doc = doc.add(plot::line(xs.map(0.0), axis_y, xs.map(seq_len as f64), axis_y, "black"));
    for tick in plot::ticks(0.0, seq_len as f64, 8) {
        let x = xs.map(tick);
        doc = doc
            .add(plot::line(x, axis_y, x, axis_y + 4.0, "black"))
            .add(plot::label(x, axis_y + 14.0, format!("{}", tick), 8).set("text-anchor", "middle"));
    }
    doc
}

/// `gff-plot` subcommand.
pub fn run_plot(outfile: &str, gffs: &[String]) -> Result<()> {
    let files = gffs.iter().map(|g| parse_gff(g)).collect::<Result<Vec<_>>>()?;
    plot::save(outfile, &gene_tracks(&files))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_fasta_and_strand() {
        let mut out = Vec::new();
        let n = extract(&mut out, ".test/genes.gff", None).unwrap();
        // the feature without a locus tag and the child exon are skipped
        assert_eq!(n, 2);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, ">LT_0001\nATGAAACCC\n>LT_0002\nCATGGG\n");
    }

    #[test]
    fn test_plot_colours() {
        let gff = parse_gff(".test/genes.gff").unwrap();
        let colours: Vec<Option<&str>> = gff.features.iter().map(feature_colour).collect();
        assert_eq!(colours[0], Some("#2B8CBE"));
        assert_eq!(colours[1], Some("#BDBDBD"));
        let svg = gene_tracks(&[gff]).to_string();
        assert!(svg.contains("#BDBDBD"));
        assert!(svg.contains("contig_1"));
    }
}
