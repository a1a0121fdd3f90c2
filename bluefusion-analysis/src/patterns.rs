use std::collections::{HashMap, HashSet};

use crate::entropy::shannon_entropy;

/// A repeated byte substring found in an inspected payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    pub bytes: Vec<u8>,
    pub positions: Vec<usize>,
    pub length: usize,
    pub count: usize,
    pub frequency: f64,
}

/// The full result of running the repeat/coverage/entropy analysis over one
/// payload.
#[derive(Debug, Clone)]
pub struct PatternMatch {
    pub input_len: usize,
    pub patterns: Vec<Pattern>,
    pub coverage: f64,
    pub entropy: f64,
}

/// Find repeating substrings of `data` with length in `[min_len, max_len]`,
/// prune them by longest-first coverage, and report entropy.
pub fn analyze_patterns(data: &[u8], min_len: usize, max_len: usize) -> PatternMatch {
    let n = data.len();
    let entropy = shannon_entropy(data);
    if n == 0 || min_len == 0 {
        return PatternMatch { input_len: n, patterns: Vec::new(), coverage: 0.0, entropy };
    }

    let upper = max_len.min(n / 2);
    let mut candidates: Vec<Pattern> = Vec::new();
    if min_len <= upper {
        for length in min_len..=upper {
            if length == 0 || length > n {
                continue;
            }
            let num_positions = n - length + 1;
            let mut by_bytes: HashMap<&[u8], Vec<usize>> = HashMap::new();
            for start in 0..num_positions {
                let slice = &data[start..start + length];
                by_bytes.entry(slice).or_default().push(start);
            }
            for (slice, positions) in by_bytes {
                if positions.len() < 2 {
                    continue;
                }
                let frequency = positions.len() as f64 / num_positions as f64;
                candidates.push(Pattern {
                    bytes: slice.to_vec(),
                    count: positions.len(),
                    positions,
                    length,
                    frequency,
                });
            }
        }
    }

    // Longest-first coverage pruning: admission is tracked against the
    // set of occurrence start offsets already claimed by a longer/earlier
    // pattern, while the *reported* coverage below is the real byte-span
    // union of the admitted set.
    candidates.sort_by(|a, b| {
        b.length.cmp(&a.length).then(b.count.cmp(&a.count)).then(a.bytes.cmp(&b.bytes))
    });

    let mut claimed_starts: HashSet<usize> = HashSet::new();
    let mut admitted = Vec::new();
    for candidate in candidates {
        let has_new = candidate.positions.iter().any(|p| !claimed_starts.contains(p));
        if !has_new {
            continue;
        }
        claimed_starts.extend(candidate.positions.iter().copied());
        admitted.push(candidate);
    }

    let mut covered_bytes: HashSet<usize> = HashSet::new();
    for pattern in &admitted {
        for &start in &pattern.positions {
            covered_bytes.extend(start..start + pattern.length);
        }
    }
    let coverage = covered_bytes.len() as f64 / n as f64;

    PatternMatch { input_len: n, patterns: admitted, coverage, entropy }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_b_three_byte_cycle() {
        let data = [1u8, 2, 3].repeat(3); // 01 02 03 x3
        let result = analyze_patterns(&data, 2, 8);
        let three_byte = result
            .patterns
            .iter()
            .find(|p| p.length == 3 && p.bytes == vec![1, 2, 3])
            .expect("3-byte repeat should be admitted");
        assert!(three_byte.count >= 3);
        assert!(result.coverage >= 0.99);
        assert!(result.entropy < 0.6);
    }

    #[test]
    fn every_admitted_pattern_has_count_at_least_two() {
        let data = b"abcabcabcxyzxyzxyz";
        let result = analyze_patterns(data, 2, 6);
        for pattern in &result.patterns {
            assert!(pattern.count >= 2);
        }
    }

    #[test]
    fn no_repeats_yields_empty_pattern_list() {
        let data: Vec<u8> = (0..32u8).collect();
        let result = analyze_patterns(&data, 2, 8);
        assert!(result.patterns.is_empty());
    }
}
