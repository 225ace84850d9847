use super::cli::GraphFormat;
use super::myio;
use anyhow::{bail, Context, Result};
use petgraph::graph::{Graph, NodeIndex};
use petgraph::{EdgeType, Undirected};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::Write;

/// A scalar attribute of a node or an edge.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AttrValue::Int(v) => write!(f, "{}", v),
            AttrValue::Float(v) => write!(f, "{}", v),
            AttrValue::Str(v) => write!(f, "{}", v),
        }
    }
}

impl AttrValue {
    fn gexf_type(&self) -> &'static str {
        match self {
            AttrValue::Int(_) => "long",
            AttrValue::Float(_) => "double",
            AttrValue::Str(_) => "string",
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Int(v) => Some(*v as f64),
            AttrValue::Float(v) => Some(*v),
            AttrValue::Str(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeData {
    pub label: String,
    pub attrs: BTreeMap<String, AttrValue>,
}

impl NodeData {
    pub fn new(label: impl Into<String>) -> NodeData {
        NodeData {
            label: label.into(),
            attrs: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeData {
    pub attrs: BTreeMap<String, AttrValue>,
}

/// Add a node with this label unless one exists already.
pub fn ensure_node<Ty: EdgeType>(
    graph: &mut Graph<NodeData, EdgeData, Ty>,
    index: &mut HashMap<String, NodeIndex>,
    label: &str,
) -> NodeIndex {
    if let Some(idx) = index.get(label) {
        return *idx;
    }
    let idx = graph.add_node(NodeData::new(label));
    index.insert(label.to_string(), idx);
    idx
}

//
// GML
//
fn gml_quote(s: &str) -> String {
    format!("\"{}\"", s.replace('&', "&amp;").replace('"', "&quot;"))
}

fn gml_value(v: &AttrValue) -> String {
    match v {
        AttrValue::Str(s) => gml_quote(s),
        AttrValue::Float(f) if f.fract() == 0.0 && f.is_finite() => format!("{:.1}", f),
        other => other.to_string(),
    }
}

/// Write a graph in GML, node ids are their indices.
pub fn write_gml<W: Write, Ty: EdgeType>(
    out: &mut W,
    graph: &Graph<NodeData, EdgeData, Ty>,
) -> Result<()> {
    writeln!(out, "graph [")?;
    if graph.is_directed() {
        writeln!(out, "  directed 1")?;
    }
    for idx in graph.node_indices() {
        let node = &graph[idx];
        writeln!(out, "  node [")?;
        writeln!(out, "    id {}", idx.index())?;
        writeln!(out, "    label {}", gml_quote(&node.label))?;
        for (key, val) in &node.attrs {
            writeln!(out, "    {} {}", key, gml_value(val))?;
        }
        writeln!(out, "  ]")?;
    }
    for edge in graph.edge_indices() {
        let Some((a, b)) = graph.edge_endpoints(edge) else {
            continue;
        };
        writeln!(out, "  edge [")?;
        writeln!(out, "    source {}", a.index())?;
        writeln!(out, "    target {}", b.index())?;
        for (key, val) in &graph[edge].attrs {
            writeln!(out, "    {} {}", key, gml_value(val))?;
        }
        writeln!(out, "  ]")?;
    }
    writeln!(out, "]")?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
enum GmlValue {
    Scalar(AttrValue),
    List(Vec<(String, GmlValue)>),
}

#[derive(Debug, PartialEq)]
enum GmlToken {
    Word(String),
    Text(String),
    Open,
    Close,
}

fn gml_tokens(text: &str) -> Result<Vec<GmlToken>> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '#' => {
                // comment to end of line
                for n in chars.by_ref() {
                    if n == '\n' {
                        break;
                    }
                }
            }
            '[' => tokens.push(GmlToken::Open),
            ']' => tokens.push(GmlToken::Close),
            '"' => {
                let mut s = String::new();
                let mut closed = false;
                for n in chars.by_ref() {
                    if n == '"' {
                        closed = true;
                        break;
                    }
                    s.push(n);
                }
                if !closed {
                    bail!("Unterminated string in GML");
                }
                tokens.push(GmlToken::Text(
                    s.replace("&quot;", "\"").replace("&amp;", "&"),
                ));
            }
            c => {
                let mut s = c.to_string();
                while let Some(n) = chars.peek() {
                    if n.is_whitespace() || *n == '[' || *n == ']' {
                        break;
                    }
                    s.push(*n);
                    chars.next();
                }
                tokens.push(GmlToken::Word(s));
            }
        }
    }
    Ok(tokens)
}

fn gml_list<I: Iterator<Item = GmlToken>>(
    tokens: &mut I,
    top: bool,
) -> Result<Vec<(String, GmlValue)>> {
    let mut list = Vec::new();
    loop {
        let key = match tokens.next() {
            Some(GmlToken::Word(k)) => k,
            Some(GmlToken::Close) if !top => return Ok(list),
            None if top => return Ok(list),
            other => bail!("Expected a GML key, found {:?}", other),
        };
        let value = match tokens.next() {
            Some(GmlToken::Open) => GmlValue::List(gml_list(tokens, false)?),
            Some(GmlToken::Text(s)) => GmlValue::Scalar(AttrValue::Str(s)),
            Some(GmlToken::Word(w)) => {
                if let Ok(i) = w.parse::<i64>() {
                    GmlValue::Scalar(AttrValue::Int(i))
                } else if let Ok(f) = w.parse::<f64>() {
                    GmlValue::Scalar(AttrValue::Float(f))
                } else {
                    bail!("Bad GML value {} for key {}", w, key);
                }
            }
            other => bail!("Expected a value for GML key {}, found {:?}", key, other),
        };
        list.push((key, value));
    }
}

fn gml_id(items: &[(String, GmlValue)], key: &str) -> Result<String> {
    match items.iter().find(|(k, _)| k == key) {
        Some((_, GmlValue::Scalar(v))) => Ok(v.to_string()),
        _ => bail!("GML element without {}", key),
    }
}

/// Parse GML text into an undirected graph.
/// ```
/// let text = "graph [ node [ id 0 label \"a\" length 10 ] node [ id 1 label \"b\" ] edge [ source 0 target 1 weight 3 ] ]";
/// let g = biowrangle::graph_io::parse_gml(text).unwrap();
/// assert_eq!(g.node_count(), 2);
/// assert_eq!(g.edge_count(), 1);
/// ```
pub fn parse_gml(text: &str) -> Result<Graph<NodeData, EdgeData, Undirected>> {
    let mut tokens = gml_tokens(text)?.into_iter();
    let top = gml_list(&mut tokens, true)?;
    let Some(items) = top.into_iter().find_map(|(k, v)| match v {
        GmlValue::List(items) if k == "graph" => Some(items),
        _ => None,
    }) else {
        bail!("No graph found in GML");
    };

    let mut graph = Graph::new_undirected();
    let mut ids = HashMap::new();
    for (key, value) in &items {
        let GmlValue::List(fields) = value else { continue };
        if key != "node" {
            continue;
        }
        let id = gml_id(fields, "id")?;
        let mut node = NodeData::new(id.clone());
        for (k, v) in fields {
            match (k.as_str(), v) {
                ("id", _) => {}
                ("label", GmlValue::Scalar(l)) => node.label = l.to_string(),
                (_, GmlValue::Scalar(a)) => {
                    node.attrs.insert(k.clone(), a.clone());
                }
                _ => {}
            }
        }
        ids.insert(id, graph.add_node(node));
    }
    for (key, value) in &items {
        let GmlValue::List(fields) = value else { continue };
        if key != "edge" {
            continue;
        }
        let source = gml_id(fields, "source")?;
        let target = gml_id(fields, "target")?;
        let (Some(a), Some(b)) = (ids.get(&source), ids.get(&target)) else {
            bail!("GML edge {} -> {} references an unknown node", source, target);
        };
        let mut edge = EdgeData::default();
        for (k, v) in fields {
            if k == "source" || k == "target" {
                continue;
            }
            if let GmlValue::Scalar(a) = v {
                edge.attrs.insert(k.clone(), a.clone());
            }
        }
        graph.add_edge(*a, *b, edge);
    }
    Ok(graph)
}

//
// GEXF
//
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "gexf")]
struct GexfXml {
    #[serde(rename = "@xmlns", default)]
    xmlns: String,
    #[serde(rename = "@version", default)]
    version: String,
    graph: GexfGraphXml,
}

#[derive(Debug, Serialize, Deserialize)]
struct GexfGraphXml {
    #[serde(rename = "@defaultedgetype", default)]
    defaultedgetype: String,
    #[serde(rename = "@mode", default)]
    mode: String,
    #[serde(default)]
    attributes: Vec<GexfAttributesXml>,
    #[serde(default)]
    nodes: GexfNodesXml,
    #[serde(default)]
    edges: GexfEdgesXml,
}

#[derive(Debug, Serialize, Deserialize)]
struct GexfAttributesXml {
    #[serde(rename = "@class")]
    class: String,
    #[serde(rename = "@mode", default)]
    mode: String,
    #[serde(default)]
    attribute: Vec<GexfAttributeXml>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GexfAttributeXml {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@title")]
    title: String,
    #[serde(rename = "@type", default)]
    kind: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct GexfNodesXml {
    #[serde(default)]
    node: Vec<GexfNodeXml>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GexfNodeXml {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@label", default, skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    attvalues: Option<GexfAttValuesXml>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct GexfEdgesXml {
    #[serde(default)]
    edge: Vec<GexfEdgeXml>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GexfEdgeXml {
    #[serde(rename = "@id", default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(rename = "@source")]
    source: String,
    #[serde(rename = "@target")]
    target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    attvalues: Option<GexfAttValuesXml>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct GexfAttValuesXml {
    #[serde(default)]
    attvalue: Vec<GexfAttValueXml>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GexfAttValueXml {
    #[serde(rename = "@for")]
    key: String,
    #[serde(rename = "@value")]
    value: String,
}

/// Attribute declarations for one class, keyed by title.
fn gexf_declarations<'a>(
    class: &str,
    attrs: impl Iterator<Item = &'a BTreeMap<String, AttrValue>>,
) -> (GexfAttributesXml, HashMap<String, String>) {
    let mut titles: BTreeMap<String, &'static str> = BTreeMap::new();
    for map in attrs {
        for (k, v) in map {
            titles.entry(k.clone()).or_insert_with(|| v.gexf_type());
        }
    }
    let mut ids = HashMap::new();
    let mut attribute = Vec::new();
    for (idx, (title, kind)) in titles.into_iter().enumerate() {
        ids.insert(title.clone(), idx.to_string());
        attribute.push(GexfAttributeXml {
            id: idx.to_string(),
            title,
            kind: kind.to_string(),
        });
    }
    (
        GexfAttributesXml {
            class: class.to_string(),
            mode: "static".to_string(),
            attribute,
        },
        ids,
    )
}

fn gexf_values(
    attrs: &BTreeMap<String, AttrValue>,
    ids: &HashMap<String, String>,
) -> Option<GexfAttValuesXml> {
    if attrs.is_empty() {
        return None;
    }
    Some(GexfAttValuesXml {
        attvalue: attrs
            .iter()
            .filter_map(|(k, v)| {
                ids.get(k).map(|id| GexfAttValueXml {
                    key: id.clone(),
                    value: v.to_string(),
                })
            })
            .collect(),
    })
}

/// Write a graph in GEXF 1.2, node ids are their labels.
pub fn write_gexf<W: Write, Ty: EdgeType>(
    out: &mut W,
    graph: &Graph<NodeData, EdgeData, Ty>,
) -> Result<()> {
    let (node_decl, node_ids) = gexf_declarations("node", graph.node_weights().map(|n| &n.attrs));
    let (edge_decl, edge_ids) = gexf_declarations("edge", graph.edge_weights().map(|e| &e.attrs));
    let mut attributes = Vec::new();
    for decl in [node_decl, edge_decl] {
        if !decl.attribute.is_empty() {
            attributes.push(decl);
        }
    }
    let nodes = graph
        .node_weights()
        .map(|n| GexfNodeXml {
            id: n.label.clone(),
            label: Some(n.label.clone()),
            attvalues: gexf_values(&n.attrs, &node_ids),
        })
        .collect();
    let edges = graph
        .edge_indices()
        .filter_map(|e| {
            let (a, b) = graph.edge_endpoints(e)?;
            Some(GexfEdgeXml {
                id: Some(e.index().to_string()),
                source: graph[a].label.clone(),
                target: graph[b].label.clone(),
                attvalues: gexf_values(&graph[e].attrs, &edge_ids),
            })
        })
        .collect();
    let gexf = GexfXml {
        xmlns: "http://www.gexf.net/1.2draft".to_string(),
        version: "1.2".to_string(),
        graph: GexfGraphXml {
            defaultedgetype: if graph.is_directed() {
                "directed"
            } else {
                "undirected"
            }
            .to_string(),
            mode: "static".to_string(),
            attributes,
            nodes: GexfNodesXml { node: nodes },
            edges: GexfEdgesXml { edge: edges },
        },
    };
    let body = quick_xml::se::to_string(&gexf).context("Failed to serialize GEXF")?;
    writeln!(out, "<?xml version='1.0' encoding='utf-8'?>")?;
    writeln!(out, "{}", body)?;
    Ok(())
}

fn typed_value(value: &str, kind: Option<&String>) -> AttrValue {
    match kind.map(|k| k.as_str()) {
        Some("long" | "integer" | "int") => value
            .parse()
            .map(AttrValue::Int)
            .unwrap_or_else(|_| AttrValue::Str(value.to_string())),
        Some("double" | "float") => value
            .parse()
            .map(AttrValue::Float)
            .unwrap_or_else(|_| AttrValue::Str(value.to_string())),
        _ => AttrValue::Str(value.to_string()),
    }
}

fn read_attvalues(
    values: &Option<GexfAttValuesXml>,
    decl: &HashMap<String, (String, String)>,
) -> BTreeMap<String, AttrValue> {
    let mut attrs = BTreeMap::new();
    for v in values.iter().flat_map(|v| v.attvalue.iter()) {
        let (title, kind) = match decl.get(&v.key) {
            Some((title, kind)) => (title.clone(), Some(kind)),
            None => (v.key.clone(), None),
        };
        attrs.insert(title, typed_value(&v.value, kind));
    }
    attrs
}

/// Parse GEXF text into an undirected graph.
pub fn parse_gexf(text: &str) -> Result<Graph<NodeData, EdgeData, Undirected>> {
    let gexf: GexfXml = quick_xml::de::from_str(text).context("Malformed GEXF")?;
    let mut decls: HashMap<&str, HashMap<String, (String, String)>> = HashMap::new();
    for attrs in &gexf.graph.attributes {
        let entry = decls.entry(attrs.class.as_str()).or_default();
        for a in &attrs.attribute {
            entry.insert(a.id.clone(), (a.title.clone(), a.kind.clone()));
        }
    }
    let empty = HashMap::new();
    let node_decl = decls.get("node").unwrap_or(&empty);
    let edge_decl = decls.get("edge").unwrap_or(&empty);

    let mut graph = Graph::new_undirected();
    let mut ids = HashMap::new();
    for n in &gexf.graph.nodes.node {
        let node = NodeData {
            label: n.label.clone().unwrap_or_else(|| n.id.clone()),
            attrs: read_attvalues(&n.attvalues, node_decl),
        };
        ids.insert(n.id.clone(), graph.add_node(node));
    }
    for e in &gexf.graph.edges.edge {
        let (Some(a), Some(b)) = (ids.get(&e.source), ids.get(&e.target)) else {
            bail!("GEXF edge {} -> {} references an unknown node", e.source, e.target);
        };
        graph.add_edge(
            *a,
            *b,
            EdgeData {
                attrs: read_attvalues(&e.attvalues, edge_decl),
            },
        );
    }
    Ok(graph)
}

/// Read a GML or GEXF file as an undirected graph.
pub fn read_graph(filename: &str, format: GraphFormat) -> Result<Graph<NodeData, EdgeData, Undirected>> {
    let text = myio::read_lines(filename)?.join("\n");
    let graph = match format {
        GraphFormat::Gml => parse_gml(&text),
        GraphFormat::Gexf => parse_gexf(&text),
    }
    .with_context(|| format!("Failed to read graph from {}", filename))?;
    log::info!(
        "{} has {} nodes and {} edges",
        filename,
        graph.node_count(),
        graph.edge_count()
    );
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use petgraph::Directed;

    fn sample() -> Graph<NodeData, EdgeData, Directed> {
        let mut g = Graph::new();
        let mut a = NodeData::new("EDGE_1");
        a.attrs.insert("length".to_string(), AttrValue::Int(100));
        a.attrs.insert("coverage".to_string(), AttrValue::Float(2.5));
        let a = g.add_node(a);
        let b = g.add_node(NodeData::new("EDGE_2"));
        let mut e = EdgeData::default();
        e.attrs.insert("weight".to_string(), AttrValue::Int(4));
        g.add_edge(a, b, e);
        g
    }

    #[test]
    fn test_gml_written_then_read() {
        let mut out = Vec::new();
        write_gml(&mut out, &sample()).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("  directed 1\n"));
        assert!(text.contains("    label \"EDGE_1\"\n"));
        assert!(text.contains("    coverage 2.5\n"));
        let g = parse_gml(&text).unwrap();
        assert_eq!(g.node_count(), 2);
        let a = g.node_indices().find(|n| g[*n].label == "EDGE_1").unwrap();
        assert_eq!(g[a].attrs["length"], AttrValue::Int(100));
        let e = g.edge_indices().next().unwrap();
        assert_eq!(g[e].attrs["weight"], AttrValue::Int(4));
    }

    #[test]
    fn test_gml_errors() {
        assert!(parse_gml("graph [ node [ id 0 label \"a ] ]").is_err());
        assert!(parse_gml("graph [ edge [ source 0 target 1 ] ]").is_err());
        assert!(parse_gml("digraph").is_err());
    }

    #[test]
    fn test_gexf_written_then_read() {
        let mut out = Vec::new();
        write_gexf(&mut out, &sample()).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("defaultedgetype=\"directed\""));
        let g = parse_gexf(&text).unwrap();
        assert_eq!(g.node_count(), 2);
        assert_eq!(g.edge_count(), 1);
        let a = g.node_indices().find(|n| g[*n].label == "EDGE_1").unwrap();
        assert_eq!(g[a].attrs["coverage"], AttrValue::Float(2.5));
    }

    #[test]
    fn test_read_fixture_files() {
        let g = read_graph(".test/links.gml", GraphFormat::Gml).unwrap();
        assert_eq!(g.node_count(), 5);
        let g = read_graph(".test/kmers.gexf", GraphFormat::Gexf).unwrap();
        assert_eq!(g.node_count(), 4);
        assert_eq!(g.edge_count(), 2);
    }
}
