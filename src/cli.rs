use clap::IntoApp;
use clap::{AppSettings, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[clap(
    author,
    version,
    about,
    propagate_version = true,
    subcommand_required = true,
    infer_subcommands = true,
    arg_required_else_help = true,
    help_expected = true
)]
#[clap(global_setting(AppSettings::DeriveDisplayOrder))]
pub struct Cli {
    /// Threads for decompression and external aligner jobs.
    #[clap(short, long, default_value_t = 8)]
    pub threads: usize,

    /// Logging level [-v: Info, -vv: Debug, -vvv: Trace].
    #[clap(short, long, parse(from_occurrences), help_heading = "DEBUG")]
    pub verbose: usize,

    /// Write the log to this file instead of stderr.
    #[clap(long, help_heading = "DEBUG")]
    pub logfile: Option<String>,

    #[clap(subcommand)]
    pub command: Option<Commands>,
}

/// Pairwise comparison used by `ani`.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AniMethod {
    /// NUCmer alignments.
    Anim,
    /// BLASTN of fragmented genomes.
    Anib,
    /// PROmer alignments.
    Aaim,
    /// Tetranucleotide frequency correlation.
    Tetra,
}

/// On-disk graph formats.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphFormat {
    Gml,
    Gexf,
}

/// Files of an NCBI assembly directory.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NcbiFileType {
    /// Genomic nucleotide fasta.
    Fna,
    /// Protein fasta.
    Faa,
    /// CDS nucleotide fasta.
    Ffn,
    /// GenBank flat file.
    Gb,
    /// GFF3 annotation.
    Gff,
}

///
/// Every subcommand of biowrangle and its help description.
///
/// Enum variants are CamelCase while the command line uses kebab-case,
/// e.g. `AddRg` is invoked as `biowrangle add-rg` and `Fastg2graph` as
/// `biowrangle fastg2graph`.
///
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Tag every read of a sam/bam with the read group of the file listing its name.
    #[clap(visible_aliases = &["rg"])]
    AddRg {
        /// Input sam/bam.
        #[clap(short, long)]
        input: String,
        /// Output bam, defaults to <input>.wRG.bam.
        #[clap(short, long)]
        output: Option<String>,
        /// Sequencing center.
        #[clap(long)]
        cn: Option<String>,
        /// Read group description.
        #[clap(long)]
        ds: Option<String>,
        /// Date the run was produced.
        #[clap(long)]
        dt: Option<String>,
        /// Predicted median insert size.
        #[clap(long)]
        pi: Option<u32>,
        /// Sequencing platform.
        #[clap(
            long,
            value_parser = ["CAPILLARY", "LS454", "ILLUMINA", "SOLID", "HELICOS", "IONTORRENT", "PACBIO"]
        )]
        pl: String,
        /// Files of read names, one read group per file.
        #[clap(required = true)]
        files: Vec<String>,
    },
    /// Convert BLAST XML to sam.
    Blast2sam {
        /// BLAST XML (-outfmt 5).
        xml: String,
        /// Fasta of the BLAST database sequences.
        reference: String,
        /// Output sam.
        #[clap(default_value = "-")]
        output: String,
    },
    /// Per-base depth of each reference, written to <bam>.cov.csv.
    Coverage {
        /// Input bam files.
        #[clap(required = true)]
        bams: Vec<String>,
        /// Print the average coverage of each reference instead.
        #[clap(short, long)]
        averages: bool,
    },
    /// Depth of one or more bam files in the manner of samtools depth.
    Depth {
        /// Input bam files.
        #[clap(required = true)]
        bams: Vec<String>,
        /// Only report this region, e.g. chr1:1-1000.
        #[clap(short, long)]
        region: Option<String>,
        /// Only report positions inside these bed intervals.
        #[clap(short, long, conflicts_with = "average")]
        bed: Option<String>,
        /// Minimum base quality.
        #[clap(short = 'q', long, default_value_t = 0)]
        min_baseq: u8,
        /// Minimum mapping quality.
        #[clap(short = 'Q', long, default_value_t = 0)]
        min_mapq: u8,
        /// Minimum query length implied by the CIGAR.
        #[clap(short = 'l', long, default_value_t = 0)]
        min_qlen: u64,
        /// Print the average depth of each reference.
        #[clap(short, long)]
        average: bool,
        /// Print the average depth of windows of this size.
        #[clap(short, long, conflicts_with = "average")]
        window: Option<u64>,
    },
    /// Length, GC fraction and average coverage of each contig.
    #[clap(visible_aliases = &["cc"])]
    ContigCoverage {
        /// Input bam.
        bam: String,
        /// Fasta of the contigs.
        fasta: String,
        /// Skip contigs shorter than this.
        #[clap(short = 'l', long, default_value_t = 1000)]
        min_length: usize,
        /// Output csv.
        #[clap(short, long, default_value = "-")]
        output: String,
        /// Print the depth of every position instead.
        #[clap(long)]
        per_base: bool,
    },
    /// Average nucleotide identity between genomes.
    Ani {
        /// Genome fasta files, one organism each.
        #[clap(required = true)]
        infiles: Vec<String>,
        /// Output directory.
        #[clap(short, long)]
        outdir: String,
        /// Comparison method.
        #[clap(short, long, value_enum, ignore_case = true, default_value_t = AniMethod::Anim)]
        method: AniMethod,
        /// Fragment size for ANIb.
        #[clap(short = 's', long, default_value_t = 1020)]
        fragsize: usize,
        /// Allow the output directory to exist.
        #[clap(short, long)]
        force: bool,
        /// Keep the contents of an existing output directory.
        #[clap(long)]
        noclobber: bool,
        /// Reuse existing NUCmer/PROmer output.
        #[clap(long)]
        skip_nucmer: bool,
        /// Reuse existing BLAST output.
        #[clap(long)]
        skip_blast: bool,
        /// NUCmer executable.
        #[clap(long, default_value = "nucmer")]
        nucmer_exe: String,
        /// PROmer executable.
        #[clap(long, default_value = "promer")]
        promer_exe: String,
        /// BLASTN executable.
        #[clap(long, default_value = "blastn")]
        blast_exe: String,
        /// makeblastdb executable.
        #[clap(long, default_value = "makeblastdb")]
        makeblastdb_exe: String,
        /// Newick tree ordering the heatmap.
        #[clap(long)]
        tree: Option<String>,
        /// Do not draw heatmap.svg.
        #[clap(long)]
        no_heatmap: bool,
    },
    /// Grid of pairwise identity histograms.
    AniPlot {
        /// Csv of nameA_nameB,value,value,...
        filename: String,
        /// Output svg.
        output: String,
        /// Minimum of the x axis.
        #[clap(short = 'x', long, default_value_t = 50.0)]
        xmin: f64,
        /// Maximum of the x axis.
        #[clap(short = 'X', long, default_value_t = 105.0)]
        xmax: f64,
    },
    /// Build a de Bruijn graph of the k-mers in fasta/fastq reads.
    Debruijn {
        /// Input fasta/fastq.
        #[clap(short, long, default_value = "-")]
        infile: String,
        /// Output gexf.
        #[clap(short, long)]
        outfile: String,
        /// K-mer size, must be odd.
        #[clap(short, long, default_value_t = 63)]
        kmer: usize,
        /// Stop after this many records.
        #[clap(short, long)]
        max: Option<usize>,
        /// Merge unbranched paths into single nodes.
        #[clap(long)]
        collapse: bool,
    },
    /// Download files of NCBI assemblies.
    NcbiDownload {
        /// Accessions like GCA_001871445.1, one per line.
        infile: String,
        /// Files to download, may be repeated.
        #[clap(short = 'f', long = "outfmt", value_enum, required = true)]
        types: Vec<NcbiFileType>,
        /// Only print the urls.
        #[clap(short, long)]
        path_only: bool,
        /// Download directory.
        #[clap(long, default_value = ".")]
        outdir: String,
        /// NCBI genomes server.
        #[clap(long, default_value = "https://ftp.ncbi.nlm.nih.gov")]
        base_url: String,
    },
    /// Convert the headers of a fastg into a gml graph.
    Fastg2graph {
        /// Input fastg.
        fastg: String,
        /// Output gml.
        graphfile: String,
    },
    /// Find contigs joined end to end by read pairs.
    Circular {
        /// Input bam files.
        #[clap(required = true)]
        bams: Vec<String>,
        /// Do not print per contig results.
        #[clap(short, long)]
        quiet: bool,
        /// Print the fraction of circular contigs.
        #[clap(short = 'S', long)]
        summary: bool,
        /// Skip contigs shorter than this.
        #[clap(short, long = "min-contig-length", default_value_t = 3000)]
        min_length: u64,
        /// Distance from the start that counts as the start.
        #[clap(short, long, default_value_t = 700)]
        start_boundary: u64,
        /// Distance from the end that counts as the end.
        #[clap(short, long, default_value_t = 700)]
        end_boundary: u64,
        /// Read pairs needed to call a contig circular.
        #[clap(short = 'l', long, default_value_t = 3)]
        minimum_links: usize,
        /// Self BLAST of the contigs with -outfmt '6 std qlen slen', drops fragments.
        #[clap(short, long)]
        blast_output: Option<String>,
    },
    /// Fasta of the features of a gff3, named by locus_tag.
    GffExtract {
        /// Input gff3.
        gff: String,
        /// Sequences, when the gff has no ##FASTA section.
        fasta: Option<String>,
    },
    /// Table of locus_tag, coordinates and product of every CDS in a GenBank file.
    GenbankCds {
        /// Input GenBank file.
        genbank: String,
    },
    /// Fasta of the CDS translations of a GenBank file.
    GenbankTranslations {
        /// Input GenBank file.
        genbank: String,
        /// Colon separated header qualifiers: l=locus_tag g=gene p=product
        /// n=note f=function P=protein_id A=prepend accession.
        #[clap(short, long, default_value = "l:g:p:n:f")]
        format: String,
        /// One file per entry, named after its accession.
        #[clap(short, long)]
        split_entries: bool,
        /// Directory for --split-entries files.
        #[clap(short, long, default_value = ".")]
        outdir: String,
    },
    /// Download the sequences of every gene in KEGG orthologies.
    KeggGenes {
        /// KEGG orthology identifiers.
        #[clap(required = true)]
        kos: Vec<String>,
        /// Nucleotide instead of protein sequences.
        #[clap(short, long)]
        ntseq: bool,
        /// KEGG REST server.
        #[clap(long, default_value = "https://rest.kegg.jp")]
        base_url: String,
    },
    /// Look up the KEGG product of `name ko` lines.
    KeggProduct {
        /// Lines of `name ko`, or just `name` for unannotated genes.
        #[clap(short, long, default_value = "-")]
        infile: String,
        /// KEGG REST server.
        #[clap(long, default_value = "https://rest.kegg.jp")]
        base_url: String,
    },
    /// Plot spacer hits, SNPs and abundance of phage contigs over time.
    PhagePlot {
        /// Fasta of the phage contigs.
        #[clap(short, long)]
        contigs: String,
        /// Tab separated sample name and YYYY-MM-DD date.
        #[clap(long)]
        timepoints: String,
        /// Relative abundance table.
        #[clap(short, long)]
        rel_abundance: Option<String>,
        /// Minimum SNP quality.
        #[clap(short = 'q', long, default_value_t = 20.0)]
        snp_quality: f32,
        /// Vcf of SNPs.
        #[clap(short, long)]
        snps: Option<String>,
        /// Tabular BLAST of spacers against the contigs.
        #[clap(short = 'S', long)]
        spacers: Option<String>,
        /// Only plot these contigs, may be repeated.
        #[clap(short, long)]
        filter: Vec<String>,
        /// Output directory.
        #[clap(short, long, default_value = ".")]
        output: String,
    },
    /// Draw the features of gff files as tracks.
    GffPlot {
        /// Output svg.
        outfile: String,
        /// Input gff3 files, one track each.
        #[clap(required = true)]
        gffs: Vec<String>,
    },
    /// Graph of contigs whose ends are joined by mate pairs.
    MateLinks {
        /// Input bam of mate pairs.
        bam: String,
        /// Output gml.
        outfile: String,
        /// Only consider contigs listed in this file.
        #[clap(short = 'f', long)]
        wanted_contigs: Option<String>,
        /// Links needed to keep an edge.
        #[clap(short = 'n', long, default_value_t = 3)]
        number_links: u64,
        /// Skip contigs shorter than this.
        #[clap(short, long, default_value_t = 500)]
        min_contig_len: u64,
        /// Bases at each contig end where reads are counted.
        #[clap(short, long, default_value_t = 500)]
        end_length: u64,
    },
    /// Write the connected components of a graph to separate files.
    Components {
        /// Input graph.
        infile: String,
        /// Output directory.
        #[clap(default_value = ".")]
        outdir: String,
        /// Format of the input graph.
        #[clap(short, long, value_enum, default_value_t = GraphFormat::Gexf)]
        format: GraphFormat,
    },
    /// Flanking sequence of protospacers for PAM discovery.
    Protospacers {
        /// Tabular BLAST of G<n>SP<n> spacers.
        blast: String,
        /// Fasta of the BLAST subjects.
        sequences: String,
        /// Flank length.
        #[clap(short, long, default_value_t = 15)]
        length: u64,
        /// Output directory.
        #[clap(short, long, default_value = ".")]
        outdir: String,
    },
}

pub fn make_cli_parse() -> Cli {
    Cli::parse()
}

pub fn make_cli_app() -> clap::Command<'static> {
    Cli::command()
}
