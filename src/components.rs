use super::cli::GraphFormat;
use super::graph_io;
use super::myio;
use anyhow::Result;
use petgraph::algo::tarjan_scc;
use std::io::Write;
use std::path::Path;

/// Node labels of every connected component with more than one node,
/// largest component first. Labels within a component are sorted.
pub fn components(filename: &str, format: GraphFormat) -> Result<Vec<Vec<String>>> {
    let graph = graph_io::read_graph(filename, format)?;
    let mut comps: Vec<Vec<String>> = tarjan_scc(&graph)
        .into_iter()
        .filter(|c| c.len() > 1)
        .map(|c| {
            let mut labels: Vec<String> = c.iter().map(|n| graph[*n].label.clone()).collect();
            labels.sort();
            labels
        })
        .collect();
    comps.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    Ok(comps)
}

/// `components` subcommand, writes `<outdir>/component_<i>`.
pub fn run(filename: &str, outdir: &str, format: GraphFormat) -> Result<usize> {
    let comps = components(filename, format)?;
    for (idx, comp) in comps.iter().enumerate() {
        let path = Path::new(outdir).join(format!("component_{}", idx));
        let mut out = myio::writer(&path.to_string_lossy())?;
        for label in comp {
            writeln!(out, "{}", label)?;
        }
        out.flush()?;
    }
    log::info!("Wrote {} components to {}", comps.len(), outdir);
    Ok(comps.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_components_largest_first() {
        let comps = components(".test/links.gml", GraphFormat::Gml).unwrap();
        assert_eq!(
            comps,
            vec![
                vec!["a".to_string(), "b".to_string(), "c".to_string()],
                vec!["d".to_string(), "e".to_string()],
            ]
        );
    }

    #[test]
    fn test_component_files() {
        let dir = tempfile::tempdir().unwrap();
        let outdir = dir.path().to_str().unwrap();
        assert_eq!(run(".test/kmers.gexf", outdir, GraphFormat::Gexf).unwrap(), 1);
        let text = std::fs::read_to_string(dir.path().join("component_0")).unwrap();
        assert_eq!(text, "AAC\nACG\nCGT\n");
        assert!(!dir.path().join("component_1").exists());
    }
}
