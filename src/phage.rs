use super::blast::TabHit;
use super::fasta;
use super::myio;
use super::plot;
use anyhow::{bail, Context, Result};
use chrono::{Datelike, NaiveDate};
use rust_htslib::bcf::{self, record::Numeric, Read};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use svg::node::element::{Circle, Polyline};
use svg::Document;

/// Sample name to sampling date, read from `sample<TAB>YYYY-MM-DD` lines.
#[derive(Debug, Default, Clone)]
pub struct Timepoints {
    dates: HashMap<String, NaiveDate>,
}

impl Timepoints {
    /// # Example
    /// ```
    /// let tp = biowrangle::phage::Timepoints::from_tsv(".test/timepoints.tsv").unwrap();
    /// assert_eq!(tp.get("V90104").unwrap().to_string(), "2011-04-01");
    /// assert!(tp.get("nope").is_none());
    /// ```
    pub fn from_tsv(filename: &str) -> Result<Timepoints> {
        let mut dates = HashMap::new();
        for (idx, line) in myio::read_lines(filename)?.iter().enumerate() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((sample, date)) = line.split_once('\t') else {
                bail!("line {} of {} is not sample<TAB>date", idx + 1, filename);
            };
            let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
                .with_context(|| format!("bad date on line {} of {}", idx + 1, filename))?;
            dates.insert(sample.to_string(), date);
        }
        Ok(Timepoints { dates })
    }

    pub fn get(&self, sample: &str) -> Option<NaiveDate> {
        self.dates.get(sample).copied()
    }

    /// Earliest and latest date of every sample.
    pub fn span(&self) -> Option<(NaiveDate, NaiveDate)> {
        let lo = self.dates.values().min()?;
        let hi = self.dates.values().max()?;
        Some((*lo, *hi))
    }
}

/// Everything drawn for one phage contig.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ContigData {
    pub length: u64,
    /// (1-based position, date)
    pub spacers: Vec<(u64, NaiveDate)>,
    pub snps: Vec<(u64, NaiveDate)>,
    pub rel_abundance: Vec<(NaiveDate, f64)>,
}

/// Contig lengths from the FASTA, restricted to `wanted` when it is not empty.
pub fn load_contigs(filename: &str, wanted: &[String]) -> Result<BTreeMap<String, ContigData>> {
    let mut contigs = BTreeMap::new();
    for contig in fasta::read_fasta(filename)? {
        if !wanted.is_empty() && !wanted.contains(&contig.name) {
            continue;
        }
        contigs.insert(
            contig.name.clone(),
            ContigData {
                length: contig.len() as u64,
                ..Default::default()
            },
        );
    }
    if contigs.is_empty() {
        log::warn!("no contigs selected from {}", filename);
    }
    Ok(contigs)
}

/// Add a point per sample carrying a non-reference, called genotype.
/// Records below `min_qual` are skipped, a missing QUAL is kept.
pub fn add_snps(
    contigs: &mut BTreeMap<String, ContigData>,
    vcf: &str,
    min_qual: f32,
    timepoints: &Timepoints,
) -> Result<usize> {
    let mut reader =
        bcf::Reader::from_path(vcf).with_context(|| format!("Failed to open {}", vcf))?;
    let samples: Vec<String> = reader
        .header()
        .samples()
        .iter()
        .map(|s| myio::file_stem(&String::from_utf8_lossy(s)))
        .collect();
    let dates: Vec<Option<NaiveDate>> = samples.iter().map(|s| timepoints.get(s)).collect();
    for (sample, date) in samples.iter().zip(&dates) {
        if date.is_none() {
            log::warn!("no timepoint for VCF sample {}, its SNPs are skipped", sample);
        }
    }

    let mut added = 0;
    for rec in reader.records() {
        let rec = rec.with_context(|| format!("Failed to read a record from {}", vcf))?;
        let qual = rec.qual();
        if !qual.is_missing() && qual < min_qual {
            continue;
        }
        let Some(rid) = rec.rid() else { continue };
        let name = String::from_utf8_lossy(rec.header().rid2name(rid)?).to_string();
        let Some(data) = contigs.get_mut(&name) else {
            continue;
        };
        let pos = rec.pos() as u64 + 1;
        let genotypes = rec.genotypes()?;
        for (idx, date) in dates.iter().enumerate() {
            let Some(date) = date else { continue };
            let gt = genotypes.get(idx);
            if gt.iter().any(|allele| allele.index().map_or(false, |i| i > 0)) {
                data.snps.push((pos, *date));
                added += 1;
            }
        }
    }
    log::debug!("{} SNP points from {}", added, vcf);
    Ok(added)
}

/// Sample key of a spacer query name, the four characters after a two letter prefix.
/// ```
/// assert_eq!(biowrangle::phage::spacer_sample("S_2705_12"), Some("2705"));
/// assert_eq!(biowrangle::phage::spacer_sample("S_27"), None);
/// ```
pub fn spacer_sample(query: &str) -> Option<&str> {
    query.get(2..6)
}

pub fn add_spacers(
    contigs: &mut BTreeMap<String, ContigData>,
    spacers: &str,
    timepoints: &Timepoints,
) -> Result<usize> {
    let mut added = 0;
    for (idx, line) in myio::read_lines(spacers)?.iter().enumerate() {
        if line.is_empty() || line.starts_with('#') || line.starts_with("M8") {
            continue;
        }
        let hit = TabHit::from_line(line)
            .with_context(|| format!("Bad BLAST line {} in {}", idx + 1, spacers))?;
        let Some(data) = contigs.get_mut(&hit.sseqid) else {
            continue;
        };
        let date = spacer_sample(&hit.qseqid).and_then(|s| timepoints.get(s));
        match date {
            Some(date) => {
                data.spacers.push((hit.subject_range().0, date));
                added += 1;
            }
            None => log::warn!("no timepoint for spacer {}", hit.qseqid),
        }
    }
    log::debug!("{} spacer points from {}", added, spacers);
    Ok(added)
}

/// Relative abundance table, a header of sample names then `contig v1 v2 ...` rows.
pub fn add_rel_abundance(
    contigs: &mut BTreeMap<String, ContigData>,
    filename: &str,
    timepoints: &Timepoints,
) -> Result<()> {
    let lines = myio::read_lines(filename)?;
    let Some(header) = lines.first() else {
        bail!("{} is empty", filename);
    };
    let dates: Vec<Option<NaiveDate>> = header
        .split('\t')
        .skip(1)
        .map(|s| {
            let date = timepoints.get(&myio::file_stem(s));
            if date.is_none() {
                log::warn!("no timepoint for abundance column {}", s);
            }
            date
        })
        .collect();

    for (idx, line) in lines.iter().enumerate().skip(1) {
        let mut fields = line.split('\t');
        let Some(name) = fields.next() else { continue };
        let Some(data) = contigs.get_mut(name) else {
            continue;
        };
        for (value, date) in fields.zip(&dates) {
            let Some(date) = date else { continue };
            let value = value.parse::<f64>().with_context(|| {
                format!("bad abundance {:?} on line {} of {}", value, idx + 1, filename)
            })?;
            data.rel_abundance.push((*date, value));
        }
        data.rel_abundance
            .sort_by(|a, b| a.0.cmp(&b.0).then(a.1.total_cmp(&b.1)));
    }
    Ok(())
}

const WIDTH: f64 = 900.0;
const HEIGHT: f64 = 500.0;
const MARGIN: f64 = 70.0;
const PANEL: f64 = 160.0;

fn day(date: NaiveDate) -> f64 {
    date.num_days_from_ce() as f64
}

/// Scatter of spacer and SNP positions over time with an abundance panel on the right.
pub fn plot_contig(name: &str, data: &ContigData, span: (NaiveDate, NaiveDate)) -> Document {
    let main_right = WIDTH - PANEL - MARGIN;
    let bottom = HEIGHT - MARGIN;
    let xs = plot::Scale::new((0.0, data.length as f64), (MARGIN, main_right));
    let ys = plot::Scale::new((day(span.0), day(span.1)), (bottom, MARGIN));

    let mut doc = plot::document(WIDTH, HEIGHT)
        .add(plot::label(MARGIN, MARGIN / 2.0, name, 16))
        .add(plot::line(MARGIN, bottom, main_right, bottom, "black"))
        .add(plot::line(MARGIN, MARGIN, MARGIN, bottom, "black"))
        .add(plot::label(
            (MARGIN + main_right) / 2.0 - 60.0,
            HEIGHT - 20.0,
            "genome position (bp)",
            12,
        ));

    for tick in plot::ticks(0.0, data.length as f64, 5) {
        let x = xs.map(tick);
        doc = doc
            .add(plot::line(x, bottom, x, bottom + 5.0, "black"))
            .add(plot::label(x - 10.0, bottom + 18.0, format!("{}", tick), 10));
    }
    let mut dates: Vec<NaiveDate> = data
        .spacers
        .iter()
        .chain(&data.snps)
        .map(|(_, d)| *d)
        .chain(data.rel_abundance.iter().map(|(d, _)| *d))
        .chain([span.0, span.1])
        .collect();
    dates.sort_unstable();
    dates.dedup();
    for date in &dates {
        let y = ys.map(day(*date));
        doc = doc
            .add(plot::line(MARGIN - 5.0, y, MARGIN, y, "black"))
            .add(plot::label(4.0, y + 4.0, date.to_string(), 10));
    }

    for (pos, date) in &data.snps {
        doc = doc.add(
            Circle::new()
                .set("cx", xs.map(*pos as f64))
                .set("cy", ys.map(day(*date)))
                .set("r", 1.5)
                .set("fill", "grey"),
        );
    }
    for (pos, date) in &data.spacers {
        doc = doc.add(
            Circle::new()
                .set("cx", xs.map(*pos as f64))
                .set("cy", ys.map(day(*date)))
                .set("r", 4)
                .set("fill", "red")
                .set("fill-opacity", 0.5),
        );
    }

    // abundance panel shares the date axis
    let left = main_right + 20.0;
    let right = WIDTH - MARGIN / 2.0;
    doc = doc
        .add(plot::line(left, bottom, right, bottom, "black"))
        .add(plot::label(left, HEIGHT - 20.0, "relative abundance", 12));
    if !data.rel_abundance.is_empty() {
        let max = data
            .rel_abundance
            .iter()
            .map(|(_, v)| *v)
            .fold(0.0, f64::max);
        let vs = plot::Scale::new((0.0, if max > 0.0 { max } else { 1.0 }), (left, right));
        let points: Vec<String> = data
            .rel_abundance
            .iter()
            .map(|(d, v)| format!("{:.2},{:.2}", vs.map(*v), ys.map(day(*d))))
            .collect();
        doc = doc
            .add(
                Polyline::new()
                    .set("points", points.join(" "))
                    .set("fill", "none")
                    .set("stroke", "grey")
                    .set("stroke-dasharray", "4,3"),
            )
            .add(plot::label(right - 30.0, bottom + 18.0, format!("{:.3}", max), 10));
    }
    doc
}

pub struct PhageInputs<'a> {
    pub contigs: &'a str,
    pub wanted: &'a [String],
    pub snps: Option<&'a str>,
    pub min_qual: f32,
    pub spacers: Option<&'a str>,
    pub rel_abundance: Option<&'a str>,
    pub timepoints: &'a str,
}

pub fn run(inputs: &PhageInputs, outdir: &str) -> Result<usize> {
    let timepoints = Timepoints::from_tsv(inputs.timepoints)?;
    let Some(span) = timepoints.span() else {
        bail!("no timepoints in {}", inputs.timepoints);
    };
    let mut contigs = load_contigs(inputs.contigs, inputs.wanted)?;
    if let Some(vcf) = inputs.snps {
        add_snps(&mut contigs, vcf, inputs.min_qual, &timepoints)?;
    }
    if let Some(spacers) = inputs.spacers {
        add_spacers(&mut contigs, spacers, &timepoints)?;
    }
    if let Some(rel) = inputs.rel_abundance {
        add_rel_abundance(&mut contigs, rel, &timepoints)?;
    }

    std::fs::create_dir_all(outdir).with_context(|| format!("Failed to create {}", outdir))?;
    for (name, data) in &contigs {
        let path = Path::new(outdir).join(format!("{}.svg", name));
        plot::save(&path.to_string_lossy(), &plot_contig(name, data, span))?;
    }
    Ok(contigs.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn loaded() -> (BTreeMap<String, ContigData>, Timepoints) {
        let tp = Timepoints::from_tsv(".test/timepoints.tsv").unwrap();
        let contigs = load_contigs(".test/phage_contigs.fa", &["phage_1".to_string()]).unwrap();
        (contigs, tp)
    }

    #[test]
    fn test_contig_filter() {
        let (contigs, _) = loaded();
        assert_eq!(contigs.len(), 1);
        assert_eq!(contigs["phage_1"].length, 100);
        let all = load_contigs(".test/phage_contigs.fa", &[]).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_snps_respect_quality_and_genotype() {
        let (mut contigs, tp) = loaded();
        let n = add_snps(&mut contigs, ".test/snps.vcf", 20.0, &tp).unwrap();
        assert_eq!(n, 2);
        assert_eq!(
            contigs["phage_1"].snps,
            vec![(10, date("2012-02-01")), (30, date("2011-04-01"))]
        );
    }

    #[test]
    fn test_spacers_skip_m8_and_unknown_contigs() {
        let (mut contigs, tp) = loaded();
        add_spacers(&mut contigs, ".test/spacers.blast_tab", &tp).unwrap();
        assert_eq!(
            contigs["phage_1"].spacers,
            vec![(41, date("2011-05-27")), (61, date("2011-08-01"))]
        );
    }

    #[test]
    fn test_rel_abundance_sorted_by_date() {
        let (mut contigs, tp) = loaded();
        add_rel_abundance(&mut contigs, ".test/rel_abundance.tsv", &tp).unwrap();
        assert_eq!(
            contigs["phage_1"].rel_abundance,
            vec![(date("2011-04-01"), 0.25), (date("2012-02-01"), 0.5)]
        );
    }

    #[test]
    fn test_run_writes_one_svg_per_contig() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().to_str().unwrap();
        let wanted = vec!["phage_1".to_string()];
        let inputs = PhageInputs {
            contigs: ".test/phage_contigs.fa",
            wanted: &wanted,
            snps: Some(".test/snps.vcf"),
            min_qual: 20.0,
            spacers: Some(".test/spacers.blast_tab"),
            rel_abundance: Some(".test/rel_abundance.tsv"),
            timepoints: ".test/timepoints.tsv",
        };
        assert_eq!(run(&inputs, out).unwrap(), 1);
        let svg = std::fs::read_to_string(dir.path().join("phage_1.svg")).unwrap();
        assert!(svg.contains("phage_1"));
        assert!(svg.contains("stroke-dasharray"));
        assert!(!dir.path().join("phage_2.svg").exists());
    }
}
