use super::fasta;
use super::graph_io::{self, EdgeData, NodeData};
use super::myio;
use anyhow::{bail, Context, Result};
use bio::alphabets::dna::revcomp;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction::{Incoming, Outgoing};
use std::collections::{HashMap, HashSet, VecDeque};
use std::io::Write;

/// k-mer graph with one node per distinct k-mer and no parallel edges.
#[derive(Debug, Default)]
pub struct KmerGraph {
    pub graph: DiGraph<NodeData, EdgeData>,
    index: HashMap<String, NodeIndex>,
}

impl KmerGraph {
    pub fn new() -> KmerGraph {
        KmerGraph::default()
    }

    fn node(&mut self, kmer: &str) -> NodeIndex {
        graph_io::ensure_node(&mut self.graph, &mut self.index, kmer)
    }

    /// Thread one read through the graph. The read is replaced by its reverse
    /// complement when that sorts first, and k-mers start at offsets `0..len-k`.
    /// ```
    /// let mut g = biowrangle::debruijn::KmerGraph::new();
    /// g.add_read(b"AAACCC", 3);
    /// // AAA -> AAC -> ACC, the final CCC is never visited
    /// assert_eq!(g.graph.node_count(), 3);
    /// assert_eq!(g.graph.edge_count(), 2);
    /// ```
    pub fn add_read(&mut self, read: &[u8], k: usize) {
        let read = read.to_ascii_uppercase();
        let rc = revcomp(read.as_slice());
        let seq = if rc < read { rc } else { read };
        if k == 0 || seq.len() <= k {
            return;
        }
        let mut prev: Option<NodeIndex> = None;
        for i in 0..seq.len() - k {
            let kmer = String::from_utf8_lossy(&seq[i..i + k]).to_string();
            let node = self.node(&kmer);
            if let Some(p) = prev {
                self.graph.update_edge(p, node, EdgeData::default());
            }
            prev = Some(node);
        }
    }
}

fn unbranched(graph: &DiGraph<NodeData, EdgeData>, node: NodeIndex) -> bool {
    graph.neighbors_directed(node, Incoming).count() == 1
        && graph.neighbors_directed(node, Outgoing).count() == 1
}

/// A run of nodes to merge together with the nodes wired into its ends.
#[derive(Debug)]
struct LinearPath {
    nodes: Vec<NodeIndex>,
    begin: Vec<NodeIndex>,
    end: Vec<NodeIndex>,
}

/// Walk out from `root` in one direction while nodes stay unbranched. The first
/// branching node closes the walk and is part of it; its neighbours in that
/// direction are returned.
fn extend(
    graph: &DiGraph<NodeData, EdgeData>,
    root: NodeIndex,
    dir: petgraph::Direction,
    path: &mut VecDeque<NodeIndex>,
    in_path: &mut HashSet<NodeIndex>,
) -> Vec<NodeIndex> {
    let mut node = root;
    loop {
        if !unbranched(graph, node) {
            return graph.neighbors_directed(node, dir).collect();
        }
        let Some(next) = graph.neighbors_directed(node, dir).next() else {
            return vec![];
        };
        if !in_path.insert(next) {
            // cycle
            return vec![];
        }
        match dir {
            Outgoing => path.push_back(next),
            Incoming => path.push_front(next),
        }
        node = next;
    }
}

fn linear_paths(graph: &DiGraph<NodeData, EdgeData>) -> Vec<LinearPath> {
    let mut seen = HashSet::new();
    let mut paths = Vec::new();
    for root in graph.node_indices() {
        if seen.contains(&root) || !unbranched(graph, root) {
            continue;
        }
        let mut path = VecDeque::from([root]);
        let mut in_path = HashSet::from([root]);
        let end = extend(graph, root, Outgoing, &mut path, &mut in_path);
        let begin = extend(graph, root, Incoming, &mut path, &mut in_path);
        seen.extend(path.iter().copied());
        seen.extend(end.iter().copied());
        seen.extend(begin.iter().copied());
        if path.len() > 1 {
            paths.push(LinearPath {
                nodes: path.into_iter().collect(),
                begin,
                end,
            });
        }
    }
    paths
}

/// Replace every unbranched path by a single node spelling its sequence.
/// Returns the number of merged nodes created.
/// ```
/// let mut g = biowrangle::debruijn::KmerGraph::new();
/// g.add_read(b"ACGTTGCAT", 3);
/// biowrangle::debruijn::collapse_linear_paths(&mut g.graph);
/// assert_eq!(g.graph.node_count(), 1);
/// assert_eq!(g.graph[petgraph::graph::NodeIndex::new(0)].label, "ACGTTGCA");
/// ```
pub fn collapse_linear_paths(graph: &mut DiGraph<NodeData, EdgeData>) -> usize {
    let paths = linear_paths(graph);
    let mut removed = HashSet::new();
    for path in &paths {
        for node in &path.nodes {
            if !removed.insert(*node) {
                log::error!("Node {} is part of more than one path", graph[*node].label);
            }
        }
    }

    let mut collapsed = DiGraph::new();
    let mut mapping = HashMap::new();
    for node in graph.node_indices().filter(|n| !removed.contains(n)) {
        mapping.insert(node, collapsed.add_node(graph[node].clone()));
    }
    for edge in graph.edge_indices() {
        let Some((a, b)) = graph.edge_endpoints(edge) else {
            continue;
        };
        if let (Some(a), Some(b)) = (mapping.get(&a), mapping.get(&b)) {
            collapsed.update_edge(*a, *b, graph[edge].clone());
        }
    }
    for path in &paths {
        let mut label = graph[path.nodes[0]].label.clone();
        for node in &path.nodes[1..] {
            if let Some(last) = graph[*node].label.chars().last() {
                label.push(last);
            }
        }
        log::debug!("Collapsed {} nodes into {}", path.nodes.len(), label);
        let merged = collapsed.add_node(NodeData::new(label));
        for succ in path.end.iter().filter_map(|n| mapping.get(n)) {
            collapsed.update_edge(merged, *succ, EdgeData::default());
        }
        for pred in path.begin.iter().filter_map(|n| mapping.get(n)) {
            collapsed.update_edge(*pred, merged, EdgeData::default());
        }
    }
    *graph = collapsed;
    paths.len()
}

/// `debruijn` subcommand.
pub fn run(infile: &str, outfile: &str, k: usize, max: Option<usize>, collapse: bool) -> Result<()> {
    if k % 2 != 1 {
        bail!("The k-mer size must be an odd number, got {}", k);
    }
    let mut reader = fasta::fastx_reader(infile)?;
    let mut kmers = KmerGraph::new();
    let mut count = 0;
    while let Some(rec) = reader.next() {
        if max.map_or(false, |m| count > m) {
            break;
        }
        let rec = rec.with_context(|| format!("Error reading record {} of {}", count + 1, infile))?;
        kmers.add_read(&rec.seq(), k);
        count += 1;
    }
    log::info!(
        "{} reads gave {} k-mers and {} edges",
        count,
        kmers.graph.node_count(),
        kmers.graph.edge_count()
    );
    let mut graph = kmers.graph;
    if collapse {
        let n = collapse_linear_paths(&mut graph);
        log::info!("Collapsed {} linear paths, {} nodes remain", n, graph.node_count());
    }
    let mut out = myio::writer(outfile)?;
    graph_io::write_gexf(&mut out, &graph)?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reverse_complement_is_canonical() {
        let mut a = KmerGraph::new();
        a.add_read(b"TTTGGG", 3);
        let mut b = KmerGraph::new();
        b.add_read(b"CCCAAA", 3);
        let la: Vec<&String> = a.graph.node_weights().map(|n| &n.label).collect();
        let lb: Vec<&String> = b.graph.node_weights().map(|n| &n.label).collect();
        assert_eq!(la, lb);
        assert_eq!(la[0], "CCC");
    }

    #[test]
    fn test_no_parallel_edges() {
        let mut g = KmerGraph::new();
        g.add_read(b"AACCGGTTAA", 3);
        g.add_read(b"AACCGGTTAA", 3);
        assert_eq!(g.graph.edge_count(), 6);
        g.add_read(b"AC", 3);
        assert_eq!(g.graph.node_count(), 7);
    }

    #[test]
    fn test_collapse_at_a_fork() {
        // ACG forks into two arms and closes both of them
        let mut g: DiGraph<NodeData, EdgeData> = DiGraph::new();
        let names = ["AAC", "ACG", "CGT", "GTA", "CGG", "GGA"];
        let n: Vec<NodeIndex> = names.iter().map(|s| g.add_node(NodeData::new(*s))).collect();
        for (a, b) in [(0, 1), (1, 2), (2, 3), (1, 4), (4, 5)] {
            g.add_edge(n[a], n[b], EdgeData::default());
        }
        let merged = collapse_linear_paths(&mut g);
        assert_eq!(merged, 2);
        let mut labels: Vec<String> = g.node_weights().map(|n| n.label.clone()).collect();
        labels.sort();
        assert_eq!(labels, vec!["AAC", "ACGGA", "ACGTA"]);
        assert_eq!(g.edge_count(), 2);
    }

    #[test]
    fn test_collapse_cycle_terminates() {
        let mut g: DiGraph<NodeData, EdgeData> = DiGraph::new();
        let a = g.add_node(NodeData::new("ACG"));
        let b = g.add_node(NodeData::new("CGA"));
        let c = g.add_node(NodeData::new("GAC"));
        g.add_edge(a, b, EdgeData::default());
        g.add_edge(b, c, EdgeData::default());
        g.add_edge(c, a, EdgeData::default());
        assert_eq!(collapse_linear_paths(&mut g), 1);
        assert_eq!(g.node_count(), 1);
    }

    #[test]
    fn test_even_k_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("g.gexf");
        assert!(run(".test/contigs.fa", out.to_str().unwrap(), 4, None, false).is_err());
        run(".test/contigs.fa", out.to_str().unwrap(), 5, Some(0), true).unwrap();
        let g = graph_io::parse_gexf(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert!(g.node_count() > 0);
    }
}
