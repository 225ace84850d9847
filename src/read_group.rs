use super::bamio;
use super::myio;
use anyhow::{bail, Context, Result};
use num_format::{Locale, ToFormattedString};
use rust_htslib::bam::header::HeaderRecord;
use rust_htslib::bam::record::Aux;
use rust_htslib::bam::{self, Header, Read};
use std::collections::HashMap;

/// Platforms accepted in the `PL` field of an `@RG` line.
pub const PLATFORMS: [&str; 7] = [
    "CAPILLARY",
    "LS454",
    "ILLUMINA",
    "SOLID",
    "HELICOS",
    "IONTORRENT",
    "PACBIO",
];

/// Optional fields copied into every `@RG` line.
#[derive(Debug, Default, Clone)]
pub struct ReadGroupInfo {
    /// sequencing center, upper-cased on output
    pub cn: Option<String>,
    pub ds: Option<String>,
    pub dt: Option<String>,
    pub pi: Option<u32>,
    pub pl: String,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct TagCounts {
    pub tagged: u64,
    pub untagged: u64,
}

/// Map every read name listed in `files` to the file it came from.
/// A name listed in several files ends up in the last one.
pub fn read_group_map(files: &[String]) -> Result<HashMap<String, String>> {
    let mut read_map = HashMap::new();
    for file in files {
        let before = read_map.len();
        for name in myio::read_lines(file)? {
            if name.is_empty() {
                continue;
            }
            read_map.insert(name, file.clone());
        }
        log::debug!("{} new read names from {}", read_map.len() - before, file);
    }
    Ok(read_map)
}

/// One `@RG` record per read-name file.
fn rg_record<'a>(id: &str, info: &ReadGroupInfo) -> HeaderRecord<'a> {
    let mut rg = HeaderRecord::new(b"RG");
    rg.push_tag(b"ID", id);
    if let Some(cn) = &info.cn {
        rg.push_tag(b"CN", cn.to_uppercase());
    }
    if let Some(ds) = &info.ds {
        rg.push_tag(b"DS", ds);
    }
    if let Some(dt) = &info.dt {
        rg.push_tag(b"DT", dt);
    }
    if let Some(pi) = info.pi {
        rg.push_tag(b"PI", pi);
    }
    rg.push_tag(b"PL", &info.pl);
    rg
}

/// Copy the header of `template` without its `@RG` lines and add one `@RG`
/// line for every read-name file.
pub fn read_group_header(
    template: &bam::HeaderView,
    files: &[String],
    info: &ReadGroupInfo,
) -> Header {
    let text = String::from_utf8_lossy(template.as_bytes()).to_string();
    let mut header = Header::new();
    let mut dropped = 0;
    for line in text.lines().filter(|l| l.starts_with('@')) {
        if line.starts_with("@RG") {
            dropped += 1;
            continue;
        }
        header.push_record(&HeaderRecord::new(line.trim_start_matches('@').as_bytes()));
    }
    if dropped > 0 {
        log::info!("Replacing {} existing @RG lines", dropped);
    }
    for file in files {
        header.push_record(&rg_record(file, info));
    }
    header.push_record(&bamio::pg_record("add-rg"));
    header
}

/// `dir/reads.bam` -> `dir/reads.wRG.bam`
/// ```
/// assert_eq!(biowrangle::read_group::default_output("x/a.sam"), "x/a.wRG.bam");
/// ```
pub fn default_output(input: &str) -> String {
    format!("{}.wRG.bam", myio::strip_extension(input))
}

/// Tag every record of `input` with the read group of its name and write it to `output`.
pub fn add_read_groups(
    input: &str,
    files: &[String],
    info: &ReadGroupInfo,
    output: &str,
    threads: usize,
) -> Result<TagCounts> {
    if !PLATFORMS.contains(&info.pl.as_str()) {
        bail!("PL must be one of {}, got {}", PLATFORMS.join(", "), info.pl);
    }
    let read_map = read_group_map(files)?;
    log::info!("{} read names across {} files", read_map.len(), files.len());

    let mut reader = bamio::reader_from_path_or_stdin(input, threads)?;
    let header = read_group_header(reader.header(), files, info);
    let mut writer = bamio::writer_from_path_or_stdout(output, &header, threads)?;

    let mut counts = TagCounts::default();
    for rec in reader.records() {
        let mut rec = rec.with_context(|| format!("Failed to read a record from {}", input))?;
        let name = String::from_utf8_lossy(rec.qname()).to_string();
        match read_map.get(&name) {
            Some(rg) => {
                // absent tags are not an error here
                let _ = rec.remove_aux(b"RG");
                rec.push_aux(b"RG", Aux::String(rg))
                    .with_context(|| format!("Failed to add RG to {}", name))?;
                counts.tagged += 1;
            }
            None => {
                log::debug!("{} is not listed in any read group", name);
                counts.untagged += 1;
            }
        }
        writer
            .write(&rec)
            .with_context(|| format!("Failed to write {}", name))?;
    }
    if counts.untagged > 0 {
        log::warn!(
            "{} records had no read group and were written untagged",
            counts.untagged.to_formatted_string(&Locale::en)
        );
    }
    log::info!(
        "Tagged {} records into {}",
        counts.tagged.to_formatted_string(&Locale::en),
        output
    );
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> ReadGroupInfo {
        ReadGroupInfo {
            cn: Some("jgi".to_string()),
            pi: Some(300),
            pl: "ILLUMINA".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_later_files_override() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, "r1\nr2 \n").unwrap();
        std::fs::write(&b, "r2\n").unwrap();
        let files = vec![
            a.to_str().unwrap().to_string(),
            b.to_str().unwrap().to_string(),
        ];
        let map = read_group_map(&files).unwrap();
        assert_eq!(map["r1"], files[0]);
        assert_eq!(map["r2"], files[1]);
    }

    #[test]
    fn test_header_has_one_rg_per_file() {
        let reader = bam::Reader::from_path(".test/pairs.sam").unwrap();
        let files = vec!["early.txt".to_string(), "late.txt".to_string()];
        let header = read_group_header(reader.header(), &files, &info());
        let text = String::from_utf8(header.to_bytes()).unwrap();
        let rg: Vec<&str> = text.lines().filter(|l| l.starts_with("@RG")).collect();
        assert_eq!(rg.len(), 2);
        assert!(rg[0].contains("ID:early.txt"));
        assert!(rg[0].contains("CN:JGI"));
        assert!(rg[0].contains("PI:300"));
        assert!(rg[0].contains("PL:ILLUMINA"));
        assert!(!rg.iter().any(|l| l.contains("ID:old")));
        assert!(text.contains("@SQ\tSN:contig_1\tLN:4000"));
        assert!(text.contains("@PG"));
    }

    #[test]
    fn test_records_are_tagged() {
        let dir = tempfile::tempdir().unwrap();
        let names = dir.path().join("names.txt");
        std::fs::write(&names, "pairA\npairB\n").unwrap();
        let files = vec![names.to_str().unwrap().to_string()];
        let out = dir.path().join("out.sam");
        let out = out.to_str().unwrap();
        let counts = add_read_groups(".test/pairs.sam", &files, &info(), out, 1).unwrap();
        assert_eq!(counts.tagged, 4);
        assert!(counts.untagged > 0);

        let mut reader = bam::Reader::from_path(out).unwrap();
        for rec in reader.records() {
            let rec = rec.unwrap();
            match rec.qname() {
                b"pairA" | b"pairB" => match rec.aux(b"RG") {
                    Ok(Aux::String(rg)) => assert_eq!(rg, files[0]),
                    _ => panic!("missing RG"),
                },
                _ => assert!(rec.aux(b"RG").is_err()),
            }
        }
    }

    #[test]
    fn test_unknown_platform_is_rejected() {
        let mut bad = info();
        bad.pl = "NANOPORE".to_string();
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.bam");
        assert!(add_read_groups(".test/pairs.sam", &[], &bad, out.to_str().unwrap(), 1).is_err());
    }
}
