/// Shannon entropy over the byte distribution of `data`, normalized to
/// `[0, 1]` by dividing by 8 bits.
///
/// An empty input has no information and is defined as `0.0`.
pub fn shannon_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut counts = [0u32; 256];
    for &b in data {
        counts[b as usize] += 1;
    }
    let n = data.len() as f64;
    let mut h = 0.0;
    for &c in counts.iter() {
        if c == 0 {
            continue;
        }
        let p = c as f64 / n;
        h -= p * p.log2();
    }
    (h / 8.0).clamp(0.0, 1.0)
}
