use super::bamio;
use super::graph_io::{self, AttrValue, EdgeData, NodeData};
use super::myio;
use anyhow::{Context, Result};
use petgraph::graph::UnGraph;
use rust_htslib::bam::{self, Read};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;

#[derive(Debug, Clone)]
pub struct LinkOptions {
    pub min_contig_len: u64,
    pub end_length: u64,
    pub min_links: u64,
    pub wanted: Option<HashSet<String>>,
}

impl Default for LinkOptions {
    fn default() -> Self {
        LinkOptions {
            min_contig_len: 500,
            end_length: 500,
            min_links: 3,
            wanted: None,
        }
    }
}

/// Number of contig-end windows, start and end, that the 0-based half-open
/// interval `[st, en)` overlaps. The start window begins at position 1.
/// ```
/// use biowrangle::mate_links::end_windows;
/// assert_eq!(end_windows(10, 20, 4000, 500), 1);
/// assert_eq!(end_windows(2000, 2010, 4000, 500), 0);
/// assert_eq!(end_windows(10, 20, 600, 500), 2);
/// ```
pub fn end_windows(st: u64, en: u64, ref_len: u64, end_length: u64) -> u64 {
    let mut n = 0;
    if st < end_length && en > 1 {
        n += 1;
    }
    if st < ref_len && en > ref_len.saturating_sub(end_length) {
        n += 1;
    }
    n
}

/// Link weights between contig pairs, names ordered within each pair.
#[derive(Debug, Default)]
pub struct MateLinks {
    pub weights: BTreeMap<(String, String), u64>,
    pub lengths: HashMap<String, u64>,
}

impl MateLinks {
    pub fn add(&mut self, a: &str, b: &str, n: u64) {
        let key = if a < b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        };
        *self.weights.entry(key).or_insert(0) += n;
    }

    /// Undirected graph of the links with at least `min_links` supporting reads.
    pub fn graph(&self, min_links: u64) -> UnGraph<NodeData, EdgeData> {
        let mut graph = UnGraph::new_undirected();
        let mut index = HashMap::new();
        for ((a, b), w) in self.weights.iter().filter(|(_, w)| **w >= min_links) {
            let mut ids = [a, b].map(|name| {
                let idx = graph_io::ensure_node(&mut graph, &mut index, name);
                if let Some(len) = self.lengths.get(name.as_str()) {
                    graph[idx]
                        .attrs
                        .insert("length".to_string(), AttrValue::Int(*len as i64));
                }
                idx
            });
            ids.sort();
            let mut edge = EdgeData::default();
            edge.attrs.insert("weight".to_string(), AttrValue::Int(*w as i64));
            graph.add_edge(ids[0], ids[1], edge);
        }
        graph
    }
}

/// Scan a BAM for reads near contig ends whose mate maps to another contig.
pub fn find_links(path: &str, opts: &LinkOptions, threads: usize) -> Result<MateLinks> {
    let mut bam = bamio::reader_from_path_or_stdin(path, threads)?;
    let refs = bamio::references(bam.header());
    let considered: Vec<bool> = refs
        .iter()
        .map(|(name, len)| {
            *len >= opts.min_contig_len && opts.wanted.as_ref().map_or(true, |w| w.contains(name))
        })
        .collect();
    log::info!(
        "{} of {} references are considered for links",
        considered.iter().filter(|c| **c).count(),
        refs.len()
    );

    let mut links = MateLinks::default();
    let mut rec = bam::Record::new();
    while let Some(r) = bam.read(&mut rec) {
        r.with_context(|| format!("Error reading {}", path))?;
        if !rec.is_paired() || rec.is_unmapped() || rec.is_mate_unmapped() {
            continue;
        }
        let (tid, mtid) = (rec.tid(), rec.mtid());
        if tid < 0 || mtid < 0 || tid == mtid || !considered[tid as usize] {
            continue;
        }
        let (name, len) = &refs[tid as usize];
        let (mate_name, mate_len) = &refs[mtid as usize];
        let n = end_windows(
            rec.pos() as u64,
            rec.cigar().end_pos() as u64,
            *len,
            opts.end_length,
        );
        if n > 0 {
            links.lengths.insert(name.clone(), *len);
            links.lengths.insert(mate_name.clone(), *mate_len);
            links.add(name, mate_name, n);
        }
    }
    Ok(links)
}

/// `mate-links` subcommand.
pub fn run(
    bam: &str,
    outfile: &str,
    wanted: Option<&str>,
    mut opts: LinkOptions,
    threads: usize,
) -> Result<()> {
    if let Some(f) = wanted {
        opts.wanted = Some(myio::read_lines(f)?.into_iter().collect());
    }
    let links = find_links(bam, &opts, threads)?;
    let graph = links.graph(opts.min_links);
    log::info!(
        "{} of {} contig pairs have at least {} links",
        graph.edge_count(),
        links.weights.len(),
        opts.min_links
    );
    let mut out = myio::writer(outfile)?;
    graph_io::write_gml(&mut out, &graph)?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_links_from_pairs() {
        let links = find_links(".test/pairs.sam", &LinkOptions::default(), 1).unwrap();
        let key = ("contig_1".to_string(), "contig_2".to_string());
        assert_eq!(links.weights[&key], 4);
        let key = ("contig_1".to_string(), "contig_3".to_string());
        assert_eq!(links.weights[&key], 1);

        let g = links.graph(3);
        assert_eq!(g.node_count(), 2);
        assert_eq!(g.edge_count(), 1);
        let e = g.edge_indices().next().unwrap();
        assert_eq!(g[e].attrs["weight"], AttrValue::Int(4));
    }

    #[test]
    fn test_wanted_and_min_length() {
        let opts = LinkOptions {
            wanted: Some(["contig_2".to_string()].into_iter().collect()),
            ..Default::default()
        };
        let links = find_links(".test/pairs.sam", &opts, 1).unwrap();
        assert_eq!(links.weights.values().sum::<u64>(), 2);

        let opts = LinkOptions {
            min_contig_len: 3500,
            ..Default::default()
        };
        let links = find_links(".test/pairs.sam", &opts, 1).unwrap();
        // only the contig_1 side of each pair is seen
        let key = ("contig_1".to_string(), "contig_2".to_string());
        assert_eq!(links.weights[&key], 2);
    }
}
