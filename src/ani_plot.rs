use super::myio;
use super::plot;
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use svg::Document;

/// Values of one genome pair from a `nameA_nameB,v1,v2,...` line.
#[derive(Debug, Clone, PartialEq)]
pub struct PairValues {
    pub first: String,
    pub second: String,
    pub values: Vec<f64>,
}

/// Read the pairwise identity CSV.
/// ```
/// let pairs = biowrangle::ani_plot::read_pairs(".test/ani_pairs.csv").unwrap();
/// assert_eq!(pairs.len(), 3);
/// assert_eq!(pairs[0].first, "g1");
/// assert_eq!(pairs[0].second, "g2");
/// ```
pub fn read_pairs(filename: &str) -> Result<Vec<PairValues>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(myio::reader(filename)?);
    let mut pairs = Vec::new();
    for (idx, rec) in rdr.records().enumerate() {
        let rec = rec.with_context(|| format!("Bad CSV record {} in {}", idx + 1, filename))?;
        let Some(name) = rec.get(0) else { continue };
        let (first, second) = name
            .split_once('_')
            .with_context(|| format!("{} is not a pair of names joined by '_'", name))?;
        let values = rec
            .iter()
            .skip(1)
            .filter(|v| !v.trim().is_empty())
            .map(|v| {
                v.trim()
                    .parse::<f64>()
                    .with_context(|| format!("Bad value {} for {}", v, name))
            })
            .collect::<Result<Vec<f64>>>()?;
        pairs.push(PairValues {
            first: first.to_string(),
            second: second.to_string(),
            values,
        });
    }
    Ok(pairs)
}

/// Bin counts of the values falling inside `[lo, hi]`.
pub fn histogram(values: &[f64], bins: usize, lo: f64, hi: f64) -> Vec<usize> {
    let mut counts = vec![0; bins];
    if bins == 0 || hi <= lo {
        return counts;
    }
    let width = (hi - lo) / bins as f64;
    for v in values.iter().filter(|v| **v >= lo && **v <= hi) {
        let bin = (((v - lo) / width) as usize).min(bins - 1);
        counts[bin] += 1;
    }
    counts
}

fn panel(
    mut doc: Document,
    pair: &PairValues,
    origin: (f64, f64),
    size: (f64, f64),
    xrange: (f64, f64),
) -> Document {
    let (x0, y0) = origin;
    let (w, h) = size;
    let counts = histogram(&pair.values, 100, xrange.0, xrange.1);
    let max = counts.iter().copied().max().unwrap_or(0).max(1) as f64;
    let xs = plot::Scale::new(xrange, (x0, x0 + w));
    let ys = plot::Scale::new((0.0, max), (y0 + h, y0));
    let bin_width = (xrange.1 - xrange.0) / counts.len() as f64;

    doc = doc.add(plot::rect(x0, y0, w, h, "none").set("stroke", "black"));
    for (idx, count) in counts.iter().enumerate().filter(|(_, c)| **c > 0) {
        let left = xs.map(xrange.0 + idx as f64 * bin_width);
        let right = xs.map(xrange.0 + (idx + 1) as f64 * bin_width);
        let top = ys.map(*count as f64);
        doc = doc.add(plot::rect(left, top, right - left, y0 + h - top, "steelblue"));
    }
    for tick in plot::ticks(0.0, max, 6) {
        let y = ys.map(tick);
        doc = doc
            .add(plot::line(x0 - 3.0, y, x0, y, "black"))
            .add(plot::label(x0 - 5.0, y + 2.0, format!("{}", tick), 6).set("text-anchor", "end"));
    }

    let mean = if pair.values.is_empty() {
        0.0
    } else {
        pair.values.iter().sum::<f64>() / pair.values.len() as f64
    };
    doc.add(plot::label(x0 + 4.0, y0 + 9.0, format!("A: {:.1}", mean), 6))
        .add(plot::label(x0 + 4.0, y0 + 17.0, format!("C: {}", pair.values.len()), 6))
}

/// Lower triangular grid of histograms, one panel per genome pair. Pairs are
/// laid out from the last line of the input backwards, as rows of growing length.
pub fn matrix_plot(pairs: &[PairValues], xmin: f64, xmax: f64) -> Document {
    let genomes: BTreeSet<&str> = pairs
        .iter()
        .flat_map(|p| [p.first.as_str(), p.second.as_str()])
        .collect();
    let dim = genomes.len().saturating_sub(1).max(1);
    let (cell_w, cell_h) = (160.0, 110.0);
    let (left, top) = (70.0, 20.0);
    let (w, h) = (cell_w - 30.0, cell_h - 25.0);
    let mut doc = plot::document(left + cell_w * dim as f64 + 10.0, top + cell_h * dim as f64 + 40.0);

    let xs_ticks = plot::ticks(xmin, xmax, 4);
    let mut remaining = pairs.iter().rev();
    for row in 0..dim {
        let y0 = top + cell_h * row as f64;
        for col in 0..=row {
            let Some(pair) = remaining.next() else { break };
            let x0 = left + cell_w * col as f64;
            if col == 0 {
                doc = doc.add(
                    plot::label(12.0, y0 + h / 2.0, pair.first.clone(), 9)
                        .set("transform", format!("rotate(-90 12 {})", y0 + h / 2.0))
                        .set("text-anchor", "middle"),
                );
            }
            doc = panel(doc, pair, (x0, y0), (w, h), (xmin, xmax));
            let xs = plot::Scale::new((xmin, xmax), (x0, x0 + w));
            for tick in &xs_ticks {
                let x = xs.map(*tick);
                doc = doc
                    .add(plot::line(x, y0 + h, x, y0 + h + 3.0, "black"))
                    .add(plot::label(x, y0 + h + 10.0, format!("{}", tick), 6).set("text-anchor", "middle"));
            }
            if row == dim - 1 {
                doc = doc.add(
                    plot::label(x0 + w / 2.0, y0 + h + 22.0, pair.second.clone(), 9)
                        .set("text-anchor", "middle"),
                );
            }
        }
    }
    doc
}

/// `ani-plot` subcommand.
pub fn run(filename: &str, output: &str, xmin: f64, xmax: f64) -> Result<()> {
    let pairs = read_pairs(filename)?;
    log::info!("Read {} genome pairs from {}", pairs.len(), filename);
    plot::save(output, &matrix_plot(&pairs, xmin, xmax))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_bins() {
        let counts = histogram(&[50.0, 50.4, 77.5, 105.0, 120.0, 10.0], 100, 50.0, 105.0);
        assert_eq!(counts.len(), 100);
        assert_eq!(counts[0], 2);
        assert_eq!(counts[99], 1);
        assert_eq!(counts.iter().sum::<usize>(), 4);
    }

    #[test]
    fn test_matrix_plot_has_a_panel_per_pair() {
        let pairs = read_pairs(".test/ani_pairs.csv").unwrap();
        let svg = matrix_plot(&pairs, 50.0, 105.0).to_string();
        assert_eq!(svg.matches("C: ").count(), 3);
        assert!(svg.contains("C: 4"));
    }
}
