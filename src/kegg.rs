use super::http::Fetch;
use super::myio;
use anyhow::{bail, Result};
use std::io::Write;

pub const KEGG_URL: &str = "https://rest.kegg.jp";
const BATCH: usize = 10;

/// Genes listed in a `/link/genes/` response, one per line in the second column.
pub fn linked_genes(body: &str) -> Result<Vec<String>> {
    let mut genes = Vec::new();
    for line in body.lines().filter(|l| !l.trim().is_empty()) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 2 {
            bail!("Unexpected KEGG link line: {}", line);
        }
        genes.push(fields[1].to_string());
    }
    Ok(genes)
}

/// `kegg-genes`: print the sequences of every gene annotated with the KOs.
pub fn genes_for_kos<F: Fetch, W: Write>(
    fetch: &F,
    out: &mut W,
    base_url: &str,
    kos: &[String],
    ntseq: bool,
) -> Result<usize> {
    let seqtype = if ntseq { "ntseq" } else { "aaseq" };
    let mut total = 0;
    for ko_batch in kos.chunks(BATCH) {
        let body = fetch.text(&format!("{}/link/genes/{}", base_url, ko_batch.join("+")))?;
        let genes = linked_genes(&body)?;
        log::info!("{} genes for {}", genes.len(), ko_batch.join(" "));
        for gene_batch in genes.chunks(BATCH) {
            let body = fetch.text(&format!("{}/get/{}/{}", base_url, gene_batch.join("+"), seqtype))?;
            out.write_all(body.as_bytes())?;
        }
        total += genes.len();
    }
    Ok(total)
}

/// `kegg-product`: annotate `name KO` lines with the KO description.
pub fn products<F: Fetch, W: Write>(fetch: &F, out: &mut W, base_url: &str, infile: &str) -> Result<()> {
    for line in myio::read_lines(infile)? {
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            [] => continue,
            [name, ko] => {
                let body = fetch.text(&format!("{}/find/ko/{}", base_url, ko))?;
                writeln!(out, "{}\t{}", name, body.trim_end())?;
            }
            [name, ..] => writeln!(out, "{}\t\thypothetical protein", name)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::mock::MockFetch;

    #[test]
    fn test_genes_are_fetched_in_batches() {
        let kos: Vec<String> = (1..=11).map(|i| format!("K{:05}", i)).collect();
        let first = kos[..10].join("+");
        let link: String = (0..12).map(|i| format!("ko:K00001\teco:b{:04}\n", i)).collect();
        let genes1: Vec<String> = (0..10).map(|i| format!("eco:b{:04}", i)).collect();
        let genes2: Vec<String> = (10..12).map(|i| format!("eco:b{:04}", i)).collect();
        let link_url = format!("http://kegg/link/genes/{}", first);
        let get1 = format!("http://kegg/get/{}/aaseq", genes1.join("+"));
        let get2 = format!("http://kegg/get/{}/aaseq", genes2.join("+"));
        let fetch = MockFetch::with(&[
            (link_url.as_str(), link.as_str()),
            ("http://kegg/link/genes/K00011", ""),
            (get1.as_str(), ">a\nMK\n"),
            (get2.as_str(), ">b\nML\n"),
        ]);
        let mut out = Vec::new();
        let n = genes_for_kos(&fetch, &mut out, "http://kegg", &kos, false).unwrap();
        assert_eq!(n, 12);
        assert_eq!(String::from_utf8(out).unwrap(), ">a\nMK\n>b\nML\n");
        assert_eq!(fetch.requests.borrow().len(), 4);
    }

    #[test]
    fn test_products() {
        let dir = tempfile::tempdir().unwrap();
        let infile = dir.path().join("kos.txt");
        std::fs::write(&infile, "gene1 K00001\ngene2\n\n").unwrap();
        let fetch = MockFetch::with(&[(
            "http://kegg/find/ko/K00001",
            "ko:K00001\tE1.1.1.1; alcohol dehydrogenase\n",
        )]);
        let mut out = Vec::new();
        products(&fetch, &mut out, "http://kegg", infile.to_str().unwrap()).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "gene1\tko:K00001\tE1.1.1.1; alcohol dehydrogenase\ngene2\t\thypothetical protein\n"
        );
    }

    #[test]
    fn test_bad_link_line() {
        assert!(linked_genes("ko:K1 a b\n").is_err());
    }
}
