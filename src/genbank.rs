use super::myio;
use anyhow::{bail, Context, Result};
use gb_io::reader::SeqReader;
use gb_io::seq::{Feature, Location, Seq};
use std::io::Write;
use std::path::Path;

/// Read every entry of a (possibly gzipped) GenBank file.
pub fn read_genbank(filename: &str) -> Result<Vec<Seq>> {
    let mut seqs = Vec::new();
    for (idx, seq) in SeqReader::new(myio::reader(filename)?).enumerate() {
        seqs.push(seq.with_context(|| format!("Error parsing entry {} of {}", idx + 1, filename))?);
    }
    log::debug!("{} entries in {}", seqs.len(), filename);
    Ok(seqs)
}

/// First value of a qualifier.
pub fn qualifier(feature: &Feature, key: &str) -> Option<String> {
    feature
        .qualifiers
        .iter()
        .find(|(k, _)| &**k == key)
        .and_then(|(_, v)| v.clone())
}

/// 1-based inclusive spans of a location, in the order they are written.
pub fn location_spans(location: &Location) -> Vec<(i64, i64)> {
    match location {
        Location::Range((st, _), (en, _)) => vec![(st + 1, *en)],
        Location::Complement(inner) => location_spans(inner),
        Location::Join(parts)
        | Location::Order(parts)
        | Location::Bond(parts)
        | Location::OneOf(parts) => parts.iter().flat_map(location_spans).collect(),
        _ => vec![],
    }
}

/// `genbank-cds`: `locus_tag from to product` for every span of every CDS.
pub fn cds_table<W: Write>(out: &mut W, filename: &str) -> Result<()> {
    for seq in read_genbank(filename)? {
        for feature in seq.features.iter().filter(|f| &*f.kind == "CDS") {
            let name = qualifier(feature, "locus_tag").unwrap_or_default();
            let product = qualifier(feature, "product").unwrap_or_default();
            for (from, to) in location_spans(&feature.location) {
                writeln!(out, "{}\t{}\t{}\t{}", name, from, to, product)?;
            }
        }
    }
    Ok(())
}

/// Qualifiers making up a translation header, from a colon separated format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderFormat {
    pub keys: Vec<&'static str>,
    pub prepend_accession: bool,
}

impl std::str::FromStr for HeaderFormat {
    type Err = anyhow::Error;

    /// ```
    /// let f: biowrangle::genbank::HeaderFormat = "l:p:A".parse().unwrap();
    /// assert_eq!(f.keys, vec!["locus_tag", "product"]);
    /// assert!(f.prepend_accession);
    /// ```
    fn from_str(s: &str) -> Result<Self> {
        let mut keys = Vec::new();
        let mut prepend_accession = false;
        for code in s.split(':').filter(|c| !c.is_empty()) {
            let key = match code {
                "l" => "locus_tag",
                "g" => "gene",
                "p" => "product",
                "n" => "note",
                "f" => "function",
                "P" => "protein_id",
                "A" => {
                    prepend_accession = true;
                    continue;
                }
                other => bail!(
                    "Unknown identifier {} in format, use l, g, p, n, f, P or A",
                    other
                ),
            };
            keys.push(key);
        }
        Ok(HeaderFormat {
            keys,
            prepend_accession,
        })
    }
}

fn accession(seq: &Seq) -> String {
    seq.accession
        .clone()
        .filter(|a| !a.is_empty())
        .or_else(|| seq.name.clone())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Fasta records of every `/translation` of one entry.
pub fn write_translations<W: Write>(out: &mut W, seq: &Seq, format: &HeaderFormat) -> Result<usize> {
    let mut n = 0;
    for feature in &seq.features {
        let Some(translation) = qualifier(feature, "translation") else {
            continue;
        };
        let info: Vec<String> = format
            .keys
            .iter()
            .filter_map(|k| qualifier(feature, k))
            .collect();
        let info = info.join(" ");
        if format.prepend_accession {
            writeln!(out, ">{}_{}", accession(seq), info)?;
        } else {
            writeln!(out, ">{}", info)?;
        }
        let translation: String = translation.split_whitespace().collect();
        writeln!(out, "{}", translation)?;
        n += 1;
    }
    Ok(n)
}

/// `genbank-translations` subcommand. With `split` every entry goes to
/// `<outdir>/<accession>.faa`, otherwise everything is written to stdout.
pub fn run_translations(filename: &str, format: &HeaderFormat, split: bool, outdir: &str) -> Result<usize> {
    let mut total = 0;
    let mut stdout = myio::writer("-")?;
    for seq in read_genbank(filename)? {
        if split {
            let path = Path::new(outdir).join(format!("{}.faa", accession(&seq)));
            let mut out = myio::writer(&path.to_string_lossy())?;
            total += write_translations(&mut out, &seq, format)?;
            out.flush()?;
        } else {
            total += write_translations(&mut stdout, &seq, format)?;
        }
    }
    stdout.flush()?;
    log::info!("Wrote {} translations from {}", total, filename);
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cds_spans() {
        let mut out = Vec::new();
        cds_table(&mut out, ".test/phage.gb").unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "PHG_1\t1\t30\tterminase large subunit\n\
             PHG_2\t40\t60\thypothetical protein\n\
             PHG_2\t70\t90\thypothetical protein\n"
        );
    }

    #[test]
    fn test_translation_headers() {
        let seqs = read_genbank(".test/phage.gb").unwrap();
        let mut out = Vec::new();
        let format: HeaderFormat = "l:g:p".parse().unwrap();
        assert_eq!(write_translations(&mut out, &seqs[0], &format).unwrap(), 2);
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with(">PHG_1 terL terminase large subunit\nMKKLLPPRRK\n"));
        assert!(text.contains(">PHG_2 hypothetical protein\nMSTV\n"));

        let mut out = Vec::new();
        let format: HeaderFormat = "l:A".parse().unwrap();
        write_translations(&mut out, &seqs[0], &format).unwrap();
        assert!(String::from_utf8(out).unwrap().starts_with(">PHG001_PHG_1\n"));
        assert!("l:x".parse::<HeaderFormat>().is_err());
    }

    #[test]
    fn test_split_entries() {
        let dir = tempfile::tempdir().unwrap();
        let format: HeaderFormat = "l".parse().unwrap();
        let n = run_translations(".test/phage.gb", &format, true, dir.path().to_str().unwrap()).unwrap();
        assert_eq!(n, 2);
        assert!(dir.path().join("PHG001.faa").exists());
    }
}
