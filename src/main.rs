use anyhow::{Context, Result};
use biowrangle::cli::{Cli, Commands};
use biowrangle::*;
use colored::Colorize;
use env_logger::{Builder, Target};
use log::LevelFilter;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

fn main() {
    parse_cli();
}

pub fn parse_cli() {
    let pg_start = Instant::now();
    let args = cli::make_cli_parse();
    let matches = cli::make_cli_app().get_matches();
    let subcommand = matches.subcommand_name().unwrap_or("biowrangle").to_string();

    // set the logging level
    let min_log_level = match args.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let target = match &args.logfile {
        Some(path) => match File::create(path) {
            Ok(file) => Target::Pipe(Box::new(file)),
            Err(e) => {
                eprintln!("Failed to create log file {}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => Target::Stderr,
    };
    Builder::new().target(target).filter(None, min_log_level).init();

    log::debug!("DEBUG logging enabled");
    log::trace!("TRACE logging enabled");

    // set up number of threads to use globally
    if let Err(e) = rayon::ThreadPoolBuilder::new()
        .num_threads(args.threads)
        .build_global()
    {
        log::warn!("Could not size the thread pool: {}", e);
    }

    if let Err(e) = run(&args) {
        log::error!("{} failed: {:#}", subcommand, e);
        std::process::exit(1);
    }

    let duration = pg_start.elapsed();
    log::info!(
        "{} done! Time elapsed: {}",
        subcommand.bright_green().bold(),
        format!("{:.2?}", duration).bright_yellow().bold()
    );
}

fn run(args: &Cli) -> Result<()> {
    match &args.command {
        //
        // Run AddRg
        //
        Some(Commands::AddRg {
            input,
            output,
            cn,
            ds,
            dt,
            pi,
            pl,
            files,
        }) => {
            let info = read_group::ReadGroupInfo {
                cn: cn.clone(),
                ds: ds.clone(),
                dt: dt.clone(),
                pi: *pi,
                pl: pl.clone(),
            };
            let output = output
                .clone()
                .unwrap_or_else(|| read_group::default_output(input));
            read_group::add_read_groups(input, files, &info, &output, args.threads)?;
        }
        //
        // Run Blast2sam
        //
        Some(Commands::Blast2sam {
            xml,
            reference,
            output,
        }) => {
            let n = blast2sam::blast_to_sam(xml, reference, output)?;
            log::info!("Wrote {} alignments", n);
        }
        //
        // Run coverage tools
        //
        Some(Commands::Coverage { bams, averages }) => {
            coverage::run_coverage(bams, *averages, args.threads)?;
        }
        Some(Commands::Depth {
            bams,
            region,
            bed,
            min_baseq,
            min_mapq,
            min_qlen,
            average,
            window,
        }) => {
            let filter = coverage::DepthFilter {
                min_mapq: *min_mapq,
                min_baseq: *min_baseq,
                min_qlen: *min_qlen,
                count_deletions: false,
            };
            let target = coverage::DepthTarget {
                region: region.as_deref().map(bed::parse_region).transpose()?,
                bed: bed.as_deref().map(bed::RegionSet::from_bed).transpose()?,
            };
            let mode = match (average, window) {
                (true, _) => coverage::DepthMode::Average,
                (false, Some(w)) => coverage::DepthMode::Window(*w),
                (false, None) => coverage::DepthMode::PerBase,
            };
            coverage::run_depth(bams, &filter, &target, mode, args.threads)?;
        }
        Some(Commands::ContigCoverage {
            bam,
            fasta,
            min_length,
            output,
            per_base,
        }) => {
            coverage::run_contig_coverage(bam, fasta, *min_length, *per_base, output, args.threads)?;
        }
        //
        // Run ANI
        //
        Some(Commands::Ani {
            infiles,
            outdir,
            method,
            fragsize,
            force,
            noclobber,
            skip_nucmer,
            skip_blast,
            nucmer_exe,
            promer_exe,
            blast_exe,
            makeblastdb_exe,
            tree,
            no_heatmap,
        }) => {
            let opts = ani::AniOptions {
                outdir: PathBuf::from(outdir),
                method: *method,
                fragsize: *fragsize,
                force: *force,
                noclobber: *noclobber,
                skip_nucmer: *skip_nucmer,
                skip_blast: *skip_blast,
                nucmer_exe: nucmer_exe.clone(),
                promer_exe: promer_exe.clone(),
                blast_exe: blast_exe.clone(),
                makeblastdb_exe: makeblastdb_exe.clone(),
                tree: tree.clone(),
                heatmap: !no_heatmap,
            };
            ani::run(infiles, &opts)?;
        }
        Some(Commands::AniPlot {
            filename,
            output,
            xmin,
            xmax,
        }) => {
            ani_plot::run(filename, output, *xmin, *xmax)?;
        }
        //
        // Run graph builders
        //
        Some(Commands::Debruijn {
            infile,
            outfile,
            kmer,
            max,
            collapse,
        }) => {
            debruijn::run(infile, outfile, *kmer, *max, *collapse)?;
        }
        Some(Commands::Fastg2graph { fastg, graphfile }) => {
            fastg::run(fastg, graphfile)?;
        }
        Some(Commands::MateLinks {
            bam,
            outfile,
            wanted_contigs,
            number_links,
            min_contig_len,
            end_length,
        }) => {
            let opts = mate_links::LinkOptions {
                min_contig_len: *min_contig_len,
                end_length: *end_length,
                min_links: *number_links,
                wanted: None,
            };
            mate_links::run(bam, outfile, wanted_contigs.as_deref(), opts, args.threads)?;
        }
        Some(Commands::Components {
            infile,
            outdir,
            format,
        }) => {
            components::run(infile, outdir, *format)?;
        }
        //
        // Run Circular
        //
        Some(Commands::Circular {
            bams,
            quiet,
            summary,
            min_length,
            start_boundary,
            end_boundary,
            minimum_links,
            blast_output,
        }) => {
            let opts = circular::CircularOptions {
                min_length: *min_length,
                start_boundary: *start_boundary,
                end_boundary: *end_boundary,
                min_links: *minimum_links,
                quiet: *quiet,
                summary: *summary,
            };
            circular::run(bams, blast_output.as_deref(), &opts, args.threads)?;
        }
        //
        // Run annotation tools
        //
        Some(Commands::GffExtract { gff, fasta }) => {
            let mut out = myio::writer("-")?;
            gff::extract(&mut out, gff, fasta.as_deref())?;
            out.flush()?;
        }
        Some(Commands::GffPlot { outfile, gffs }) => {
            gff::run_plot(outfile, gffs)?;
        }
        Some(Commands::GenbankCds { genbank }) => {
            let mut out = myio::writer("-")?;
            genbank::cds_table(&mut out, genbank)?;
            out.flush()?;
        }
        Some(Commands::GenbankTranslations {
            genbank,
            format,
            split_entries,
            outdir,
        }) => {
            let format: genbank::HeaderFormat = format
                .parse()
                .with_context(|| format!("Bad header format {}", format))?;
            genbank::run_translations(genbank, &format, *split_entries, outdir)?;
        }
        Some(Commands::Protospacers {
            blast,
            sequences,
            length,
            outdir,
        }) => {
            let n = protospacer::run(blast, sequences, *length, outdir)?;
            log::info!("Wrote {} flanks", n);
        }
        Some(Commands::PhagePlot {
            contigs,
            timepoints,
            rel_abundance,
            snp_quality,
            snps,
            spacers,
            filter,
            output,
        }) => {
            let inputs = phage::PhageInputs {
                contigs,
                wanted: filter,
                snps: snps.as_deref(),
                min_qual: *snp_quality,
                spacers: spacers.as_deref(),
                rel_abundance: rel_abundance.as_deref(),
                timepoints,
            };
            let n = phage::run(&inputs, output)?;
            log::info!("Plotted {} contigs", n);
        }
        //
        // Run web lookups
        //
        Some(Commands::NcbiDownload {
            infile,
            types,
            path_only,
            outdir,
            base_url,
        }) => {
            let client = http::HttpClient::new()?;
            ncbi::run(&client, base_url, infile, types, *path_only, outdir)?;
        }
        Some(Commands::KeggGenes {
            kos,
            ntseq,
            base_url,
        }) => {
            let client = http::HttpClient::new()?;
            let mut out = myio::writer("-")?;
            kegg::genes_for_kos(&client, &mut out, base_url, kos, *ntseq)?;
            out.flush()?;
        }
        Some(Commands::KeggProduct { infile, base_url }) => {
            let client = http::HttpClient::new()?;
            let mut out = myio::writer("-")?;
            kegg::products(&client, &mut out, base_url, infile)?;
            out.flush()?;
        }
        //
        // no command opt
        //
        None => {}
    };
    Ok(())
}
