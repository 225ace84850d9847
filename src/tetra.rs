use super::fasta;
use anyhow::Result;
use bio::alphabets::dna::revcomp;
use std::collections::BTreeMap;

const BASES: [u8; 4] = [b'A', b'C', b'G', b'T'];

fn code(b: u8) -> Option<usize> {
    match b {
        b'A' => Some(0),
        b'C' => Some(1),
        b'G' => Some(2),
        b'T' => Some(3),
        _ => None,
    }
}

/// Index of an unambiguous k-mer, `None` when it holds anything but A, C, G or T.
fn index(kmer: &[u8]) -> Option<usize> {
    kmer.iter()
        .try_fold(0usize, |acc, b| code(*b).map(|c| acc * 4 + c))
}

fn decode(mut idx: usize, k: usize) -> String {
    let mut kmer = vec![b'A'; k];
    for i in (0..k).rev() {
        kmer[i] = BASES[idx % 4];
        idx /= 4;
    }
    String::from_utf8_lossy(&kmer).to_string()
}

/// Mono- to tetranucleotide counts over both strands of a genome.
#[derive(Debug, Clone)]
pub struct TetraCounts {
    pub mono: [u64; 4],
    pub di: [u64; 16],
    pub tri: [u64; 64],
    pub tetra: [u64; 256],
}

impl Default for TetraCounts {
    fn default() -> Self {
        TetraCounts {
            mono: [0; 4],
            di: [0; 16],
            tri: [0; 64],
            tetra: [0; 256],
        }
    }
}

impl TetraCounts {
    fn bump(table: &mut [u64], kmer: &[u8]) {
        if let Some(i) = index(kmer) {
            table[i] += 1;
        }
    }

    /// Count one strand. Di-, tri- and tetranucleotides are counted at every offset
    /// that leaves four bases, then the di- and trinucleotides of the last four bases
    /// are added so those counts reach the end of the strand.
    fn add_strand(&mut self, s: &[u8]) {
        for b in s {
            if let Some(c) = code(*b) {
                self.mono[c] += 1;
            }
        }
        let n = s.len();
        for i in 0..n.saturating_sub(4) {
            Self::bump(&mut self.di, &s[i..i + 2]);
            Self::bump(&mut self.tri, &s[i..i + 3]);
            Self::bump(&mut self.tetra, &s[i..i + 4]);
        }
        if n >= 4 {
            Self::bump(&mut self.tri, &s[n - 4..n - 1]);
            Self::bump(&mut self.tri, &s[n - 3..]);
            Self::bump(&mut self.di, &s[n - 4..n - 2]);
            Self::bump(&mut self.di, &s[n - 3..n - 1]);
            Self::bump(&mut self.di, &s[n - 2..]);
        }
    }

    pub fn add_sequence(&mut self, seq: &[u8]) {
        let upper = seq.to_ascii_uppercase();
        self.add_strand(&upper);
        self.add_strand(&revcomp(upper.as_slice()));
    }

    /// Z-score of every observed tetranucleotide following Teeling et al. (2004).
    pub fn z_scores(&self) -> BTreeMap<String, f64> {
        let mut z = BTreeMap::new();
        let mut zero_sd = Vec::new();
        for t in 0..256 {
            let observed = self.tetra[t];
            if observed == 0 {
                continue;
            }
            // t = b0 b1 b2 b3
            let tri1 = self.tri[t / 4] as f64;
            let tri2 = self.tri[t % 64] as f64;
            let di = self.di[(t / 4) % 16] as f64;
            let expected = tri1 * tri2 / di;
            let sd = (expected * (di - tri1) * (di - tri2) / (di * di)).sqrt();
            let score = if sd == 0.0 {
                zero_sd.push(decode(t, 4));
                1.0 / (di * di)
            } else {
                (observed as f64 - expected) / sd
            };
            z.insert(decode(t, 4), score);
        }
        if !zero_sd.is_empty() {
            log::warn!("Zero variance for tetranucleotides {:?}", zero_sd);
        }
        z
    }
}

pub fn org_z_scores(filename: &str) -> Result<BTreeMap<String, f64>> {
    let mut counts = TetraCounts::default();
    for contig in fasta::read_fasta(filename)? {
        counts.add_sequence(&contig.seq);
    }
    let z = counts.z_scores();
    log::info!("{} tetranucleotides scored for {}", z.len(), filename);
    Ok(z)
}

/// Pearson correlation of two Z-score profiles over the tetranucleotides they share.
/// ```
/// use std::collections::BTreeMap;
/// let a: BTreeMap<String, f64> = [("AAAA", 1.0), ("ACGT", 2.0), ("TTTT", 3.0)]
///     .iter().map(|(k, v)| (k.to_string(), *v)).collect();
/// let b: BTreeMap<String, f64> = a.iter().map(|(k, v)| (k.clone(), v * 2.0)).collect();
/// assert!((biowrangle::tetra::pearson(&a, &b) - 1.0).abs() < 1e-9);
/// ```
pub fn pearson(a: &BTreeMap<String, f64>, b: &BTreeMap<String, f64>) -> f64 {
    let pairs: Vec<(f64, f64)> = a
        .iter()
        .filter_map(|(k, za)| b.get(k).map(|zb| (*za, *zb)))
        .collect();
    if pairs.is_empty() {
        return 0.0;
    }
    let n = pairs.len() as f64;
    let mean_a = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_b = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let mut prods = 0.0;
    let mut sq_a = 0.0;
    let mut sq_b = 0.0;
    for (za, zb) in &pairs {
        prods += (za - mean_a) * (zb - mean_b);
        sq_a += (za - mean_a).powi(2);
        sq_b += (zb - mean_b).powi(2);
    }
    prods / (sq_a * sq_b).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_round_trip() {
        assert_eq!(index(b"AAAA"), Some(0));
        assert_eq!(index(b"TTTT"), Some(255));
        assert_eq!(index(b"ANGT"), None);
        assert_eq!(decode(index(b"GATC").unwrap(), 4), "GATC");
    }

    #[test]
    fn test_counts_include_both_strands() {
        let mut c = TetraCounts::default();
        c.add_sequence(b"acgtac");
        // ACGTAC and its reverse complement GTACGT
        assert_eq!(c.mono, [3, 3, 3, 3]);
        // tetranucleotides at offsets 0 and 1 of each strand
        assert_eq!(c.tetra[index(b"ACGT").unwrap()], 1);
        assert_eq!(c.tetra[index(b"CGTA").unwrap()], 1);
        assert_eq!(c.tetra[index(b"GTAC").unwrap()], 1);
        assert_eq!(c.tetra[index(b"TACG").unwrap()], 1);
        assert_eq!(c.tetra.iter().sum::<u64>(), 4);
        // once at the start of ACGTAC, once in the tail of GTACGT
        assert_eq!(c.tri[index(b"ACG").unwrap()], 2);
        assert_eq!(c.di.iter().sum::<u64>(), 10);
    }

    #[test]
    fn test_scores_only_observed() {
        let mut c = TetraCounts::default();
        c.add_sequence(b"ACGTACGTTTGACCA");
        let z = c.z_scores();
        assert!(z.contains_key("ACGT"));
        assert!(!z.contains_key("GGGG"));
        assert!(z.values().all(|v| v.is_finite()));
    }

    #[test]
    fn test_pearson_anticorrelated() {
        let a: BTreeMap<String, f64> = [("A", 1.0), ("B", 2.0), ("C", 3.0)]
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect();
        let b: BTreeMap<String, f64> = a.iter().map(|(k, v)| (k.clone(), -v)).collect();
        assert!((pearson(&a, &b) + 1.0).abs() < 1e-9);
    }
}
