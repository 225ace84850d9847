use super::blast::FragmentHit;
use super::cli::AniMethod;
use super::fasta;
use super::myio;
use super::plot;
use super::tetra;
use anyhow::{bail, Context, Result};
use colored::Colorize;
use itertools::Itertools;
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    /// a 7 column delta line with a non-integer field
    DeltaLine { line: usize, text: String },
    /// output file stem without `_vs_`
    PairName { file: String },
}
type AniResult<T> = Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::DeltaLine { line, text } => {
                write!(f, "bad alignment line {} in delta file: {}", line, text)
            }
            Error::PairName { file } => {
                write!(f, "{} is not named <query>_vs_<subject>", file)
            }
        }
    }
}

impl std::error::Error for Error {}

/// Settings of one `ani` run.
#[derive(Debug, Clone)]
pub struct AniOptions {
    pub outdir: PathBuf,
    pub method: AniMethod,
    pub fragsize: usize,
    pub force: bool,
    pub noclobber: bool,
    pub skip_nucmer: bool,
    pub skip_blast: bool,
    pub nucmer_exe: String,
    pub promer_exe: String,
    pub blast_exe: String,
    pub makeblastdb_exe: String,
    pub tree: Option<String>,
    pub heatmap: bool,
}

/// An external program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub program: String,
    pub args: Vec<String>,
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.program, self.args.join(" "))
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct JobSummary {
    pub succeeded: usize,
    pub failed: usize,
}

/// Run every job on the rayon pool. Failures are logged and counted, never fatal.
pub fn run_jobs(jobs: &[Job]) -> JobSummary {
    log::info!("Running {} jobs", jobs.len());
    let results: Vec<bool> = jobs
        .par_iter()
        .map(|job| {
            log::debug!("{}", job);
            match Command::new(&job.program)
                .args(&job.args)
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .output()
            {
                Ok(output) if output.status.success() => {
                    log::info!("Job completed with status {}: {}", output.status, job);
                    true
                }
                Ok(output) => {
                    log::warn!(
                        "Job failed with status {}: {}\n{}",
                        output.status,
                        job,
                        String::from_utf8_lossy(&output.stderr).trim_end()
                    );
                    false
                }
                Err(e) => {
                    log::warn!("Job could not be started ({}): {}", e, job);
                    false
                }
            }
        })
        .collect();
    let summary = JobSummary {
        succeeded: results.iter().filter(|ok| **ok).count(),
        failed: results.iter().filter(|ok| !**ok).count(),
    };
    if summary.failed > 0 {
        log::warn!(
            "{} of {} jobs failed, their comparisons will be missing",
            summary.failed,
            jobs.len()
        );
    }
    summary
}

/// Create the output directory.
/// An existing directory is an error unless `force` is set, in which case it is
/// removed and recreated, or reused as is with `noclobber`.
pub fn make_outdir(outdir: &Path, force: bool, noclobber: bool) -> Result<()> {
    if outdir.exists() {
        if !force {
            bail!(
                "Output directory {} would overwrite existing files (use --force)",
                outdir.display()
            );
        }
        if noclobber {
            log::warn!("NOCLOBBER: reusing {}", outdir.display());
            return Ok(());
        }
        log::info!("Removing directory {} and everything below it", outdir.display());
        fs::remove_dir_all(outdir)
            .with_context(|| format!("Could not remove {}", outdir.display()))?;
    }
    fs::create_dir_all(outdir).with_context(|| format!("Could not create {}", outdir.display()))?;
    Ok(())
}

/// Organism names (file stems) mapped to their total sequence length.
pub fn org_lengths(files: &[String]) -> Result<BTreeMap<String, u64>> {
    let mut lengths = BTreeMap::new();
    for file in files {
        let org = myio::file_stem(file);
        if lengths.contains_key(&org) {
            bail!("Two inputs share the organism name {}", org);
        }
        lengths.insert(org, fasta::total_length(file)?);
    }
    Ok(lengths)
}

fn prefix(outdir: &Path, f1: &str, f2: &str) -> String {
    outdir
        .join(format!("{}_vs_{}", myio::file_stem(f1), myio::file_stem(f2)))
        .to_string_lossy()
        .to_string()
}

/// One `nucmer -mum` (or `promer`) job per unordered pair of inputs.
pub fn nucmer_jobs(files: &[String], prog: &str, outdir: &Path) -> Vec<Job> {
    files
        .iter()
        .tuple_combinations()
        .map(|(f1, f2)| Job {
            program: prog.to_string(),
            args: vec![
                "-mum".to_string(),
                "-p".to_string(),
                prefix(outdir, f1, f2),
                f1.clone(),
                f2.clone(),
            ],
        })
        .collect()
}

pub fn makeblastdb_jobs(fragment_files: &[String], exe: &str) -> Vec<Job> {
    fragment_files
        .iter()
        .map(|f| Job {
            program: exe.to_string(),
            args: vec![
                "-out".to_string(),
                myio::strip_extension(f),
                "-dbtype".to_string(),
                "nucl".to_string(),
                "-in".to_string(),
                f.clone(),
            ],
        })
        .collect()
}

/// One `blastn` job per unordered pair of fragmented inputs, searching the first
/// against the database of the second.
pub fn blast_jobs(fragment_files: &[String], exe: &str, outdir: &Path) -> Vec<Job> {
    let mut jobs = Vec::new();
    for (f1, f2) in fragment_files.iter().tuple_combinations() {
        let mut args = vec![
            "-out".to_string(),
            format!("{}.blast_tab", prefix(outdir, f1, f2)),
            "-query".to_string(),
            f1.clone(),
            "-db".to_string(),
            myio::strip_extension(f2),
        ];
        args.extend(
            [
                "-xdrop_gap_final",
                "150",
                "-penalty",
                "-1",
                "-dust",
                "no",
                "-max_target_seqs",
                "1",
                "-outfmt",
                "6 qseqid sseqid length mismatch pident nident qlen slen qstart qend sstart send positive ppos gaps",
                "-gapopen",
                "0",
                "-gapextend",
                "2",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        jobs.push(Job {
            program: exe.to_string(),
            args,
        });
    }
    jobs
}

/// Split every input into `fragsize` pieces written to `<outdir>/<stem>.fasta`.
pub fn fragment_inputs(files: &[String], outdir: &Path, fragsize: usize) -> Result<Vec<String>> {
    files
        .iter()
        .map(|f| {
            let out = outdir
                .join(format!("{}.fasta", myio::file_stem(f)))
                .to_string_lossy()
                .to_string();
            fasta::fragment_fasta(f, &out, fragsize)?;
            Ok(out)
        })
        .collect()
}

/// Total aligned length and similarity errors of a NUCmer delta file.
/// Only the 7 column alignment header lines count.
pub fn parse_delta_str(text: &str) -> AniResult<(u64, u64)> {
    let mut aln_length = 0;
    let mut sim_errors = 0;
    for (idx, line) in text.lines().enumerate() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() || fields[0] == "NUCMER" || fields[0] == "PROMER" || fields[0].starts_with('>') {
            continue;
        }
        if fields.len() != 7 {
            continue;
        }
        let bad = || Error::DeltaLine {
            line: idx + 1,
            text: line.to_string(),
        };
        let st: i64 = fields[0].parse().map_err(|_| bad())?;
        let en: i64 = fields[1].parse().map_err(|_| bad())?;
        let errors: u64 = fields[4].parse().map_err(|_| bad())?;
        aln_length += (en - st).unsigned_abs();
        sim_errors += errors;
    }
    Ok((aln_length, sim_errors))
}

/// Aligned length and errors of fragment searches, counting a query fragment only
/// when more than 70% of it aligns with more than 30% identity.
pub fn parse_blast_str(text: &str) -> Result<(u64, u64)> {
    // qid -> (aligned, identical, qlen, mismatches)
    let mut per_query: HashMap<String, (u64, u64, u64, u64)> = HashMap::new();
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let hit = FragmentHit::from_line(line)
            .with_context(|| format!("Bad BLAST line {}", idx + 1))?;
        let entry = per_query.entry(hit.qseqid).or_default();
        entry.0 += hit.length;
        entry.1 += hit.nident;
        entry.2 = hit.qlen;
        entry.3 += hit.mismatch;
    }
    let mut aln_length = 0;
    let mut sim_errors = 0;
    for (aligned, identical, qlen, mismatches) in per_query.values() {
        let ql = *qlen as f64;
        if ql > 0.0 && *aligned as f64 / ql > 0.7 && *identical as f64 / ql > 0.3 {
            aln_length += aligned;
            sim_errors += mismatches;
        }
    }
    Ok((aln_length, sim_errors))
}

/// `dir/A_vs_B.delta` -> (A, B)
pub fn pair_names(file: &Path) -> AniResult<(String, String)> {
    let stem = file
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    match stem.split_once("_vs_") {
        Some((q, s)) => Ok((q.to_string(), s.to_string())),
        None => Err(Error::PairName {
            file: file.display().to_string(),
        }),
    }
}

/// Pairwise results keyed by (query, subject).
#[derive(Debug, Default, Clone)]
pub struct PairwiseTables {
    pub lengths: HashMap<(String, String), f64>,
    pub sim_errors: HashMap<(String, String), f64>,
    pub perc_ids: HashMap<(String, String), f64>,
    /// both orientations: aligned length over the length of the first organism
    pub perc_aln: HashMap<(String, String), f64>,
}

impl PairwiseTables {
    pub fn add(
        &mut self,
        q: &str,
        s: &str,
        aln_length: u64,
        sim_errors: u64,
        org_lengths: &BTreeMap<String, u64>,
    ) -> Result<()> {
        let perc_id = if aln_length == 0 {
            0.0
        } else {
            1.0 - sim_errors as f64 / aln_length as f64
        };
        let key = (q.to_string(), s.to_string());
        let rev = (s.to_string(), q.to_string());
        let len_of = |org: &str| -> Result<f64> {
            match org_lengths.get(org) {
                Some(l) if *l > 0 => Ok(*l as f64),
                Some(_) => bail!("{} has no sequence", org),
                None => bail!("{} is not one of the input organisms", org),
            }
        };
        self.perc_aln.insert(key.clone(), aln_length as f64 / len_of(q)?);
        self.perc_aln.insert(rev, aln_length as f64 / len_of(s)?);
        self.lengths.insert(key.clone(), aln_length as f64);
        self.sim_errors.insert(key.clone(), sim_errors as f64);
        self.perc_ids.insert(key, perc_id);
        if perc_id > 0.95 {
            log::info!("{} and {} share {:.4} identity", q, s, perc_id);
        }
        Ok(())
    }
}

/// Files in `dir` with the given extension, sorted.
fn files_with_extension(dir: &Path, ext: &str) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("Could not list {}", dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().map_or(false, |e| e == ext))
        .collect();
    files.sort();
    Ok(files)
}

/// Collect every `*.delta` (or `*.blast_tab`) file of the output directory.
pub fn process_outputs(
    outdir: &Path,
    ext: &str,
    org_lengths: &BTreeMap<String, u64>,
) -> Result<PairwiseTables> {
    let mut tables = PairwiseTables::default();
    let files = files_with_extension(outdir, ext)?;
    log::info!("Processing {} .{} files", files.len(), ext);
    for file in files {
        let (q, s) = pair_names(&file)?;
        log::info!("Query organism: {}; Subject organism: {}", q, s);
        let text = fs::read_to_string(&file)
            .with_context(|| format!("Could not read {}", file.display()))?;
        let (aln_length, sim_errors) = if ext == "delta" {
            parse_delta_str(&text).with_context(|| format!("In {}", file.display()))?
        } else {
            parse_blast_str(&text).with_context(|| format!("In {}", file.display()))?
        };
        tables.add(&q, &s, aln_length, sim_errors, org_lengths)?;
    }
    Ok(tables)
}

/// Square matrix in name order with zeros on the diagonal.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    pub names: Vec<String>,
    pub values: Vec<Vec<f64>>,
}

fn timestamp() -> String {
    chrono::Local::now().format("%a %b %e %H:%M:%S %Y").to_string()
}

/// Write a tab separated square matrix with `NA` on the diagonal. Off-diagonal
/// cells are looked up in either orientation and missing comparisons are `NA`.
pub fn write_table<W: Write>(
    out: &mut W,
    names: &[String],
    values: &HashMap<(String, String), f64>,
    comment: &str,
) -> Result<Matrix> {
    let mut names = names.to_vec();
    names.sort();
    names.dedup();
    writeln!(out, "# biowrangle ani {}", timestamp())?;
    if !comment.is_empty() {
        writeln!(out, "# {}", comment)?;
    }
    writeln!(out, "\t{}", names.join("\t"))?;
    let mut matrix = Vec::new();
    for n1 in &names {
        let mut outrow = vec![n1.clone()];
        let mut row = Vec::new();
        for n2 in &names {
            if n1 == n2 {
                outrow.push("NA".to_string());
                row.push(0.0);
                continue;
            }
            let val = values
                .get(&(n1.clone(), n2.clone()))
                .or_else(|| values.get(&(n2.clone(), n1.clone())));
            match val {
                Some(v) => {
                    outrow.push(v.to_string());
                    row.push(*v);
                }
                None => {
                    outrow.push("NA".to_string());
                    row.push(0.0);
                }
            }
        }
        writeln!(out, "{}", outrow.join("\t"))?;
        matrix.push(row);
    }
    Ok(Matrix {
        names,
        values: matrix,
    })
}

fn write_table_file(
    outdir: &Path,
    filename: &str,
    names: &[String],
    values: &HashMap<(String, String), f64>,
    comment: &str,
) -> Result<Matrix> {
    let path = outdir.join(filename).to_string_lossy().to_string();
    let mut out = myio::writer(&path)?;
    let matrix = write_table(&mut out, names, values, comment)?;
    out.flush()?;
    log::info!("Wrote data to {}", path);
    Ok(matrix)
}

/// Leaf names of a newick tree in the order they appear.
/// ```
/// let leaves = biowrangle::ani::newick_leaves("((a:0.1,b:0.2)90:0.3,'c d':0.4);");
/// assert_eq!(leaves, vec!["a", "b", "c d"]);
/// ```
pub fn newick_leaves(newick: &str) -> Vec<String> {
    let mut leaves = Vec::new();
    let mut label = String::new();
    let mut in_label = false;
    let mut after_close = false;
    let mut quoted = false;
    for ch in newick.chars() {
        if quoted {
            if ch == '\'' {
                quoted = false;
            } else {
                label.push(ch);
            }
            continue;
        }
        match ch {
            '\'' => {
                quoted = true;
                in_label = !after_close;
            }
            '(' | ',' | ')' | ';' | ':' => {
                if in_label && !label.trim().is_empty() {
                    leaves.push(label.trim().to_string());
                }
                label.clear();
                in_label = false;
                if ch != ':' {
                    after_close = ch == ')';
                }
                if ch == ':' {
                    // branch length until the next delimiter, never a label
                    after_close = true;
                }
            }
            c if c.is_whitespace() && !in_label => {}
            c => {
                if !after_close {
                    in_label = true;
                    label.push(c);
                }
            }
        }
    }
    leaves
}

/// Reorder a matrix so rows and columns follow `order`.
pub fn reorder(matrix: &Matrix, order: &[String]) -> Result<Matrix> {
    let idx: Vec<usize> = order
        .iter()
        .map(|n| {
            matrix
                .names
                .iter()
                .position(|m| m == n)
                .with_context(|| format!("Tree leaf {} is not an input organism", n))
        })
        .collect::<Result<_>>()?;
    Ok(Matrix {
        names: order.to_vec(),
        values: idx
            .iter()
            .map(|i| idx.iter().map(|j| matrix.values[*i][*j]).collect())
            .collect(),
    })
}

/// Merge the lower triangle of identities with the upper triangle of alignment
/// fractions, coloured on separate ramps.
pub fn heatmap(ids: &Matrix, aln: &Matrix) -> svg::Document {
    let n = ids.names.len();
    let cell = 40.0;
    let margin = 20.0 + 7.0 * ids.names.iter().map(|s| s.len()).max().unwrap_or(1) as f64;
    let size = margin + cell * n as f64 + 20.0;
    let range = |m: &Matrix, lower: bool| {
        let vals: Vec<f64> = (0..n)
            .flat_map(|i| (0..n).map(move |j| (i, j)))
            .filter(|(i, j)| if lower { i > j } else { i < j })
            .map(|(i, j)| m.values[i][j])
            .collect();
        let lo = vals.iter().cloned().fold(f64::INFINITY, f64::min);
        let hi = vals.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        (lo, hi)
    };
    let (id_lo, id_hi) = range(ids, true);
    let (aln_lo, aln_hi) = range(aln, false);
    let norm = |v: f64, lo: f64, hi: f64| if hi > lo { (v - lo) / (hi - lo) } else { 1.0 };

    let mut doc = plot::document(size, size);
    for i in 0..n {
        for j in 0..n {
            let fill = if i > j {
                plot::ramp(norm(ids.values[i][j], id_lo, id_hi), (239, 243, 255), (8, 69, 148))
            } else if i < j {
                plot::ramp(norm(aln.values[i][j], aln_lo, aln_hi), (242, 240, 247), (84, 39, 143))
            } else {
                "#dddddd".to_string()
            };
            doc = doc.add(
                plot::rect(margin + cell * j as f64, 10.0 + cell * i as f64, cell, cell, &fill)
                    .set("stroke", "white"),
            );
        }
        let y = 10.0 + cell * (i as f64 + 0.5) + 4.0;
        doc = doc.add(plot::label(margin - 5.0, y, ids.names[i].clone(), 11).set("text-anchor", "end"));
        let x = margin + cell * (i as f64 + 0.5);
        let y = 10.0 + cell * n as f64 + 12.0;
        doc = doc.add(
            plot::label(x, y, ids.names[i].clone(), 11)
                .set("text-anchor", "end")
                .set("transform", format!("rotate(-45 {} {})", x, y)),
        );
    }
    doc
}

/// Tetranucleotide Z-scores of every organism and their pairwise correlations.
pub fn calculate_tetra(files: &[String], outdir: &Path) -> Result<()> {
    let scores: Vec<(String, BTreeMap<String, f64>)> = files
        .par_iter()
        .map(|f| Ok((myio::file_stem(f), tetra::org_z_scores(f)?)))
        .collect::<Result<_>>()?;
    let scores: BTreeMap<String, BTreeMap<String, f64>> = scores.into_iter().collect();
    let orgs: Vec<String> = scores.keys().cloned().collect();

    let path = outdir.join("tetra_z_scores.tab").to_string_lossy().to_string();
    let mut out = myio::writer(&path)?;
    writeln!(out, "# biowrangle ani {}", timestamp())?;
    writeln!(out, "# tetranucleotide frequency Z-scores")?;
    writeln!(out, "\t{}", orgs.join("\t"))?;
    let mut tets: Vec<&String> = scores.values().flat_map(|z| z.keys()).collect();
    tets.sort();
    tets.dedup();
    for tet in tets {
        let row: Vec<String> = orgs
            .iter()
            .map(|o| match scores[o].get(tet) {
                Some(z) => format!("{:.2}", z),
                None => "NA".to_string(),
            })
            .collect();
        writeln!(out, "{}\t{}", tet, row.join("\t"))?;
    }
    out.flush()?;

    let mut corrs = HashMap::new();
    for (o1, o2) in orgs.iter().tuple_combinations() {
        corrs.insert((o1.clone(), o2.clone()), tetra::pearson(&scores[o1], &scores[o2]));
    }
    write_table_file(outdir, "tetra_corr.tab", &orgs, &corrs, "TETRA")?;
    Ok(())
}

/// `ani` subcommand.
pub fn run(files: &[String], opts: &AniOptions) -> Result<()> {
    if files.len() < 2 {
        bail!("At least two input genomes are needed");
    }
    make_outdir(&opts.outdir, opts.force, opts.noclobber)?;
    log::info!("Running {:?} on {} genomes", opts.method, files.len());

    let (tables, label) = match opts.method {
        AniMethod::Tetra => return calculate_tetra(files, &opts.outdir),
        AniMethod::Anim | AniMethod::Aaim => {
            let (prog, label) = if opts.method == AniMethod::Anim {
                (&opts.nucmer_exe, "ANIm")
            } else {
                (&opts.promer_exe, "AAIm")
            };
            let lengths = org_lengths(files)?;
            let jobs = nucmer_jobs(files, prog, &opts.outdir);
            if opts.skip_nucmer {
                log::warn!("{}", "mummer run skipped!".yellow());
            } else {
                run_jobs(&jobs);
            }
            (process_outputs(&opts.outdir, "delta", &lengths)?, label)
        }
        AniMethod::Anib => {
            let fragments = fragment_inputs(files, &opts.outdir, opts.fragsize)?;
            let lengths = org_lengths(files)?;
            run_jobs(&makeblastdb_jobs(&fragments, &opts.makeblastdb_exe));
            let jobs = blast_jobs(&fragments, &opts.blast_exe, &opts.outdir);
            if opts.skip_blast {
                log::warn!("{}", "BLASTN run skipped!".yellow());
            } else {
                run_jobs(&jobs);
            }
            (process_outputs(&opts.outdir, "blast_tab", &lengths)?, "ANIb")
        }
    };

    let names: Vec<String> = files.iter().map(|f| myio::file_stem(f)).collect();
    write_table_file(&opts.outdir, "aln_lengths.tab", &names, &tables.lengths, "Alignment lengths")?;
    write_table_file(&opts.outdir, "sim_errors.tab", &names, &tables.sim_errors, "Similarity errors")?;
    let ids = write_table_file(&opts.outdir, "perc_ids.tab", &names, &tables.perc_ids, label)?;
    let aln = write_table_file(
        &opts.outdir,
        "perc_aln.tab",
        &names,
        &tables.perc_aln,
        "Minimum % aligned nt",
    )?;

    if opts.heatmap {
        let (ids, aln) = match &opts.tree {
            Some(tree) => {
                let text = fs::read_to_string(tree)
                    .with_context(|| format!("Could not read {}", tree))?;
                let mut leaves = newick_leaves(&text);
                leaves.reverse();
                (reorder(&ids, &leaves)?, reorder(&aln, &leaves)?)
            }
            None => {
                log::info!("No tree file given, heatmap rows are sorted by name");
                (ids, aln)
            }
        };
        let path = opts.outdir.join("heatmap.svg").to_string_lossy().to_string();
        plot::save(&path, &heatmap(&ids, &aln))?;
    }
    Ok(())
}
