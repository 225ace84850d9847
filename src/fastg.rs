use super::fasta;
use super::graph_io::{self, AttrValue, EdgeData, NodeData};
use super::myio;
use anyhow::{Context, Result};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;
use std::io::Write;

/// Assembly graph read from FASTG headers.
#[derive(Debug, Default)]
pub struct FastgGraph {
    pub graph: DiGraph<NodeData, EdgeData>,
    index: HashMap<String, NodeIndex>,
}

/// `EDGE_2_length_50_cov_3.5` -> (50, 3.5)
fn edge_stats(name: &str) -> Result<(i64, f64)> {
    let tokens: Vec<&str> = name.split('_').collect();
    let length = tokens
        .get(3)
        .and_then(|t| t.parse().ok())
        .with_context(|| format!("No length in FASTG edge name {}", name))?;
    let coverage = tokens
        .get(5)
        .and_then(|t| t.parse().ok())
        .with_context(|| format!("No coverage in FASTG edge name {}", name))?;
    Ok((length, coverage))
}

impl FastgGraph {
    pub fn new() -> FastgGraph {
        FastgGraph::default()
    }

    fn node(&mut self, name: &str) -> Result<NodeIndex> {
        let (length, coverage) = edge_stats(name)?;
        let idx = graph_io::ensure_node(&mut self.graph, &mut self.index, name);
        let attrs = &mut self.graph[idx].attrs;
        attrs.insert("length".to_string(), AttrValue::Int(length));
        attrs.insert("coverage".to_string(), AttrValue::Float(coverage));
        Ok(idx)
    }

    /// Add the links of one header. Headers without `:` carry no links and are skipped.
    /// ```
    /// let mut g = biowrangle::fastg::FastgGraph::new();
    /// g.add_header("EDGE_1_length_100_cov_2.5:EDGE_2_length_50_cov_3.0',EDGE_3_length_70_cov_1.0;").unwrap();
    /// assert_eq!(g.graph.node_count(), 3);
    /// assert_eq!(g.graph.edge_count(), 2);
    /// ```
    pub fn add_header(&mut self, header: &str) -> Result<()> {
        let header = header.split_whitespace().next().unwrap_or_default();
        let Some((key, links)) = header.split_once(':') else {
            return Ok(());
        };
        let key = key.trim_end_matches('\'');
        let key_idx = self.node(key)?;
        for link in links.split(',') {
            let link = link.strip_suffix(';').unwrap_or(link);
            if link.is_empty() {
                continue;
            }
            match link.strip_suffix('\'') {
                // reverse complement, so it comes before the key
                Some(name) => {
                    let idx = self.node(name)?;
                    self.graph.update_edge(idx, key_idx, EdgeData::default());
                }
                None => {
                    let idx = self.node(link)?;
                    self.graph.update_edge(key_idx, idx, EdgeData::default());
                }
            }
        }
        Ok(())
    }
}

/// `fastg2graph` subcommand.
pub fn run(infile: &str, outfile: &str) -> Result<()> {
    let mut reader = fasta::fastx_reader(infile)?;
    let mut fastg = FastgGraph::new();
    let mut count = 0;
    while let Some(rec) = reader.next() {
        let rec = rec.with_context(|| format!("Error reading record {} of {}", count + 1, infile))?;
        let header = String::from_utf8_lossy(rec.id()).to_string();
        fastg
            .add_header(&header)
            .with_context(|| format!("Bad FASTG header {}", header))?;
        count += 1;
    }
    log::info!(
        "{} records gave {} nodes and {} edges",
        count,
        fastg.graph.node_count(),
        fastg.graph.edge_count()
    );
    let mut out = myio::writer(outfile)?;
    graph_io::write_gml(&mut out, &fastg.graph)?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_direction() {
        let mut g = FastgGraph::new();
        g.add_header("EDGE_1_length_100_cov_2.5':EDGE_2_length_50_cov_3.0';").unwrap();
        g.add_header("EDGE_4_length_10_cov_1.0;").unwrap();
        assert_eq!(g.graph.node_count(), 2);
        let e = g.graph.edge_indices().next().unwrap();
        let (a, b) = g.graph.edge_endpoints(e).unwrap();
        assert_eq!(g.graph[a].label, "EDGE_2_length_50_cov_3.0");
        assert_eq!(g.graph[b].label, "EDGE_1_length_100_cov_2.5");
        assert_eq!(g.graph[b].attrs["length"], AttrValue::Int(100));
        assert_eq!(g.graph[a].attrs["coverage"], AttrValue::Float(3.0));
    }

    #[test]
    fn test_bad_header() {
        let mut g = FastgGraph::new();
        assert!(g.add_header("EDGE_1:EDGE_2;").is_err());
    }

    #[test]
    fn test_fastg_file_to_gml() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("g.gml");
        run(".test/assembly.fastg", out.to_str().unwrap()).unwrap();
        let text = std::fs::read_to_string(&out).unwrap();
        assert!(text.starts_with("graph [\n  directed 1\n"));
        let g = graph_io::parse_gml(&text).unwrap();
        assert_eq!(g.node_count(), 3);
        // 2->1, 1->3, 2->3 and 1->2
        assert_eq!(g.edge_count(), 4);
    }
}
