use bluefusion_analysis::shannon_entropy;

/// Decrypt with a repeating key: `plaintext[i] = ciphertext[i] ^ key[i % key.len()]`.
pub fn decrypt_repeating(ciphertext: &[u8], key: &[u8]) -> Vec<u8> {
    if key.is_empty() {
        return ciphertext.to_vec();
    }
    ciphertext.iter().enumerate().map(|(i, &b)| b ^ key[i % key.len()]).collect()
}

/// Decrypt with a key whose first byte increments once per block of
/// `key.len()` ciphertext bytes.
pub fn decrypt_counter_incrementing(ciphertext: &[u8], key: &[u8]) -> Vec<u8> {
    if key.is_empty() {
        return ciphertext.to_vec();
    }
    let key_len = key.len();
    ciphertext
        .iter()
        .enumerate()
        .map(|(i, &b)| {
            let block = (i / key_len) as u8;
            let key_byte = key[i % key_len].wrapping_add(block);
            b ^ key_byte
        })
        .collect()
}

/// Recover a repeating XOR key of `key_len` bytes given known plaintext
/// starting at `offset` in the ciphertext.
pub fn recover_key_known_plaintext(ciphertext: &[u8], known_plaintext: &[u8], offset: usize, key_len: usize) -> Option<Vec<u8>> {
    if key_len == 0 || offset + known_plaintext.len() > ciphertext.len() {
        return None;
    }
    let mut key = vec![0u8; key_len];
    let mut known_at: Vec<Option<u8>> = vec![None; key_len];

    for (i, &pt) in known_plaintext.iter().enumerate() {
        let ct_index = offset + i;
        let key_index = ct_index % key_len;
        let byte = ciphertext[ct_index] ^ pt;
        match known_at[key_index] {
            Some(existing) if existing != byte => return None,
            _ => known_at[key_index] = Some(byte),
        }
    }

    for (i, slot) in known_at.into_iter().enumerate() {
        key[i] = slot?;
    }
    Some(key)
}

/// Per-candidate-key-length score: repetition ratio of the most common
/// byte value at each key-phase position, and normalized entropy of the
/// whole ciphertext under that candidate. Lengths with a
/// repetition ratio above 10% are reported as likely XOR key lengths.
#[derive(Debug, Clone, Copy)]
pub struct KeyLengthCandidate {
    pub key_len: usize,
    pub repetition_ratio: f64,
    pub entropy: f64,
}

pub fn analyze_key_length_candidates(ciphertext: &[u8], max_key_len: usize) -> Vec<KeyLengthCandidate> {
    let mut candidates = Vec::new();
    for key_len in 1..=max_key_len.min(ciphertext.len().saturating_sub(1)).max(1) {
        if key_len == 0 || ciphertext.len() < key_len * 2 {
            continue;
        }
        let mut phase_matches = 0usize;
        let mut phase_total = 0usize;
        for phase in 0..key_len {
            let bytes_at_phase: Vec<u8> = ciphertext.iter().skip(phase).step_by(key_len).copied().collect();
            if bytes_at_phase.len() < 2 {
                continue;
            }
            let mut counts = std::collections::HashMap::new();
            for &b in &bytes_at_phase {
                *counts.entry(b).or_insert(0usize) += 1;
            }
            let most_common = counts.values().copied().max().unwrap_or(0);
            phase_matches += most_common;
            phase_total += bytes_at_phase.len();
        }
        let repetition_ratio = if phase_total == 0 { 0.0 } else { phase_matches as f64 / phase_total as f64 };
        candidates.push(KeyLengthCandidate { key_len, repetition_ratio, entropy: shannon_entropy(ciphertext) });
    }
    candidates
}

/// Likely key lengths: those with a repetition ratio above 10%.
pub fn likely_key_lengths(candidates: &[KeyLengthCandidate]) -> Vec<usize> {
    candidates.iter().filter(|c| c.repetition_ratio > 0.10).map(|c| c.key_len).collect()
}
