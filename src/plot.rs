use anyhow::{Context, Result};
use svg::node::element::{Line, Rectangle, Text};
use svg::Document;

pub const FONT: &str = "sans-serif";

/// Linear map from data coordinates onto a pixel range.
#[derive(Debug, Clone, Copy)]
pub struct Scale {
    pub domain: (f64, f64),
    pub range: (f64, f64),
}

impl Scale {
    pub fn new(domain: (f64, f64), range: (f64, f64)) -> Scale {
        Scale { domain, range }
    }

    /// # Example
    /// ```
    /// let s = biowrangle::plot::Scale::new((0.0, 10.0), (100.0, 200.0));
    /// assert_eq!(s.map(5.0), 150.0);
    /// ```
    pub fn map(&self, v: f64) -> f64 {
        let span = self.domain.1 - self.domain.0;
        if span == 0.0 {
            return self.range.0;
        }
        self.range.0 + (v - self.domain.0) / span * (self.range.1 - self.range.0)
    }
}

pub fn document(width: f64, height: f64) -> Document {
    Document::new()
        .set("viewBox", (0.0, 0.0, width, height))
        .set("width", width)
        .set("height", height)
        .add(
            Rectangle::new()
                .set("x", 0)
                .set("y", 0)
                .set("width", width)
                .set("height", height)
                .set("fill", "white"),
        )
}

pub fn label(x: f64, y: f64, content: impl Into<String>, size: u32) -> Text {
    Text::new(content.into())
        .set("x", x)
        .set("y", y)
        .set("font-family", FONT)
        .set("font-size", size)
        .set("fill", "black")
}

pub fn line(x1: f64, y1: f64, x2: f64, y2: f64, stroke: &str) -> Line {
    Line::new()
        .set("x1", x1)
        .set("y1", y1)
        .set("x2", x2)
        .set("y2", y2)
        .set("stroke", stroke)
        .set("stroke-width", 1)
}

pub fn rect(x: f64, y: f64, width: f64, height: f64, fill: &str) -> Rectangle {
    Rectangle::new()
        .set("x", x)
        .set("y", y)
        .set("width", width.max(0.0))
        .set("height", height.max(0.0))
        .set("fill", fill)
}

/// Interpolate between two colours, `t` is clamped to `[0, 1]`.
/// ```
/// use biowrangle::plot::ramp;
/// assert_eq!(ramp(0.0, (255, 255, 255), (0, 0, 255)), "#ffffff");
/// assert_eq!(ramp(1.0, (255, 255, 255), (0, 0, 255)), "#0000ff");
/// ```
pub fn ramp(t: f64, low: (u8, u8, u8), high: (u8, u8, u8)) -> String {
    let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
    let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * t).round() as u8;
    format!(
        "#{:02x}{:02x}{:02x}",
        mix(low.0, high.0),
        mix(low.1, high.1),
        mix(low.2, high.2)
    )
}

/// Roughly `n` evenly spaced, rounded tick values covering `[lo, hi]`.
pub fn ticks(lo: f64, hi: f64, n: usize) -> Vec<f64> {
    if hi <= lo || n == 0 {
        return vec![lo];
    }
    let raw = (hi - lo) / n as f64;
    let mag = 10f64.powf(raw.log10().floor());
    let step = [1.0, 2.0, 5.0, 10.0]
        .iter()
        .map(|m| m * mag)
        .find(|s| *s >= raw)
        .unwrap_or(10.0 * mag);
    let mut v = (lo / step).ceil() * step;
    let mut out = Vec::new();
    while v <= hi + step * 1e-9 {
        out.push(v);
        v += step;
    }
    out
}

pub fn save(path: &str, doc: &Document) -> Result<()> {
    svg::save(path, doc).with_context(|| format!("Failed to write {}", path))?;
    log::info!("Wrote {}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_are_round() {
        assert_eq!(ticks(0.0, 10.0, 5), vec![0.0, 2.0, 4.0, 6.0, 8.0, 10.0]);
        assert_eq!(ticks(50.0, 105.0, 4), vec![60.0, 80.0, 100.0]);
    }

    #[test]
    fn test_scale_inverted_range() {
        let s = Scale::new((0.0, 1.0), (100.0, 0.0));
        assert_eq!(s.map(0.25), 75.0);
        assert_eq!(Scale::new((3.0, 3.0), (0.0, 10.0)).map(3.0), 0.0);
    }

    #[test]
    fn test_save_writes_svg() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.svg");
        let doc = document(10.0, 10.0).add(label(1.0, 1.0, "hi", 8));
        save(path.to_str().unwrap(), &doc).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("<svg"));
        assert!(text.contains("hi"));
    }
}
