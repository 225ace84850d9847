use super::cli::NcbiFileType;
use super::http::Fetch;
use super::myio;
use anyhow::{bail, Result};
use lazy_static::lazy_static;
use regex::Regex;
use std::path::Path;

pub const NCBI_URL: &str = "https://ftp.ncbi.nlm.nih.gov";

lazy_static! {
    static ref ACC_RE: Regex = Regex::new(r"^([A-Za-z]+)_(\d+)\.(\d+)$").unwrap();
    static ref HREF_RE: Regex = Regex::new(r#"href="([^"]+)""#).unwrap();
}

impl NcbiFileType {
    pub fn suffix(&self) -> &'static str {
        match self {
            NcbiFileType::Fna => "_genomic.fna.gz",
            NcbiFileType::Faa => "_protein.faa.gz",
            NcbiFileType::Ffn => "_cds_from_genomic.fna.gz",
            NcbiFileType::Gb => "_genomic.gbff.gz",
            NcbiFileType::Gff => "_genomic.gff.gz",
        }
    }
}

/// Directory of an assembly accession on the genomes server.
/// ```
/// let path = biowrangle::ncbi::accession_path("GCA_001871445.1").unwrap();
/// assert_eq!(path, "genomes/all/GCA/001/871/445");
/// assert!(biowrangle::ncbi::accession_path("GCA001871445").is_err());
/// ```
pub fn accession_path(accession: &str) -> Result<String> {
    let Some(caps) = ACC_RE.captures(accession.trim()) else {
        bail!("could not get the assembly path from {}", accession);
    };
    let digits = caps[2].as_bytes();
    if digits.len() % 3 != 0 {
        bail!("assembly number of {} is not a multiple of three digits", accession);
    }
    let parts: Vec<&str> = digits
        .chunks(3)
        .filter_map(|c| std::str::from_utf8(c).ok())
        .collect();
    Ok(format!("genomes/all/{}/{}", &caps[1], parts.join("/")))
}

/// Entry names of an HTML directory listing, trailing `/` removed.
pub fn listing_entries(html: &str) -> Vec<String> {
    HREF_RE
        .captures_iter(html)
        .map(|c| c[1].trim_end_matches('/').to_string())
        .filter(|name| !name.is_empty() && !name.contains('?') && !name.starts_with('/') && !name.contains(':'))
        .collect()
}

/// URLs of the requested files for one accession.
pub fn assembly_urls<F: Fetch>(
    fetch: &F,
    base_url: &str,
    accession: &str,
    types: &[NcbiFileType],
) -> Result<Vec<String>> {
    let dir = format!("{}/{}", base_url, accession_path(accession)?);
    let mut urls = Vec::new();
    for entry in listing_entries(&fetch.text(&format!("{}/", dir))?)
        .into_iter()
        .filter(|e| e.contains(accession))
    {
        let entry_dir = format!("{}/{}", dir, entry);
        let files = listing_entries(&fetch.text(&format!("{}/", entry_dir))?);
        for t in types {
            let wanted = format!("{}{}", entry, t.suffix());
            if files.contains(&wanted) {
                urls.push(format!("{}/{}", entry_dir, wanted));
            } else {
                log::warn!("{} has no {}", entry, wanted);
            }
        }
    }
    if urls.is_empty() {
        log::warn!("No files found for {}", accession);
    }
    Ok(urls)
}

/// `ncbi-download` subcommand.
pub fn run<F: Fetch>(
    fetch: &F,
    base_url: &str,
    infile: &str,
    types: &[NcbiFileType],
    path_only: bool,
    outdir: &str,
) -> Result<usize> {
    let mut n = 0;
    for accession in myio::read_lines(infile)?.iter().filter(|l| !l.trim().is_empty()) {
        for url in assembly_urls(fetch, base_url, accession.trim(), types)? {
            if path_only {
                println!("{}", url);
            } else {
                let name = url.rsplit('/').next().unwrap_or_default();
                let path = Path::new(outdir).join(name).to_string_lossy().to_string();
                let bytes = fetch.download(&url, &path)?;
                log::info!("Downloaded {} ({} bytes) to {}", name, bytes, path);
            }
            n += 1;
        }
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::mock::MockFetch;

    const TOP: &str = r#"<html><body><a href="/genomes/all/GCA/001/871/">Parent Directory</a>
<a href="GCA_001871445.1_ASM187144v1/">GCA_001871445.1_ASM187144v1/</a>
<a href="GCA_001871449.1_other/">GCA_001871449.1_other/</a></body></html>"#;
    const INNER: &str = r#"<a href="?C=N;O=D">Name</a>
<a href="GCA_001871445.1_ASM187144v1_genomic.fna.gz">x</a>
<a href="GCA_001871445.1_ASM187144v1_protein.faa.gz">x</a>"#;

    fn fetch() -> MockFetch {
        MockFetch::with(&[
            ("https://ncbi/genomes/all/GCA/001/871/445/", TOP),
            (
                "https://ncbi/genomes/all/GCA/001/871/445/GCA_001871445.1_ASM187144v1/",
                INNER,
            ),
            (
                "https://ncbi/genomes/all/GCA/001/871/445/GCA_001871445.1_ASM187144v1/GCA_001871445.1_ASM187144v1_genomic.fna.gz",
                "data",
            ),
        ])
    }

    #[test]
    fn test_listing() {
        let entries = listing_entries(TOP);
        assert_eq!(
            entries,
            vec!["GCA_001871445.1_ASM187144v1", "GCA_001871449.1_other"]
        );
    }

    #[test]
    fn test_urls_for_requested_types() {
        let urls = assembly_urls(
            &fetch(),
            "https://ncbi",
            "GCA_001871445.1",
            &[NcbiFileType::Fna, NcbiFileType::Gff],
        )
        .unwrap();
        assert_eq!(
            urls,
            vec!["https://ncbi/genomes/all/GCA/001/871/445/GCA_001871445.1_ASM187144v1/GCA_001871445.1_ASM187144v1_genomic.fna.gz"]
        );
    }

    #[test]
    fn test_download() {
        let dir = tempfile::tempdir().unwrap();
        let infile = dir.path().join("acc.txt");
        std::fs::write(&infile, "GCA_001871445.1\n").unwrap();
        let outdir = dir.path().to_str().unwrap();
        let n = run(&fetch(), "https://ncbi", infile.to_str().unwrap(), &[NcbiFileType::Fna], false, outdir).unwrap();
        assert_eq!(n, 1);
        let saved = dir.path().join("GCA_001871445.1_ASM187144v1_genomic.fna.gz");
        assert_eq!(std::fs::read_to_string(saved).unwrap(), "data");
    }
}
