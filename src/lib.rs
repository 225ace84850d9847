//! # Command line interface for biowrangle
//! [biowrangle command line interface, subcommands, and options.](cli::Commands)
//! # README for biowrangle
#![doc = include_str!("../README.md")]
/// Average nucleotide identity between genomes.
pub mod ani;
/// Histogram grids of pairwise identities.
pub mod ani_plot;
/// Opening and writing sam/bam/cram files.
pub mod bamio;
/// Region strings and bed files.
pub mod bed;
/// Tabular and XML BLAST output.
pub mod blast;
/// BLAST XML to sam conversion.
pub mod blast2sam;
/// CIGAR strings from pairwise alignments.
pub mod cigar;
/// Contigs joined end to end by read pairs.
pub mod circular;
/// Command line interface for biowrangle.
pub mod cli;
/// Connected components of graph files.
pub mod components;
/// Per-base and average depth from bam files.
pub mod coverage;
/// De Bruijn graphs of read k-mers.
pub mod debruijn;
/// Functions for fasta and fastq files.
pub mod fasta;
/// Graphs from fastg headers.
pub mod fastg;
/// GenBank CDS tables and translations.
pub mod genbank;
/// GFF3 feature extraction and plotting.
pub mod gff;
/// GML and GEXF graph files.
pub mod graph_io;
/// Blocking HTTP behind a small trait.
pub mod http;
/// KEGG REST lookups.
pub mod kegg;
/// Graphs of contigs linked by mate pairs.
pub mod mate_links;
/// Module for automatically reading a writing compressed or uncompressed files.
pub mod myio;
/// NCBI assembly downloads.
pub mod ncbi;
/// Phage contig plots of spacers, SNPs and abundance over time.
pub mod phage;
/// Small svg plotting helpers.
pub mod plot;
/// Protospacer flanks for PAM discovery.
pub mod protospacer;
/// Read group tagging.
pub mod read_group;
/// Tetranucleotide frequency Z-scores.
pub mod tetra;
