use crate::entropy::shannon_entropy;

/// Best-guess classification of an opaque payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Ascii,
    Utf8,
    PackedBcd,
    LikelyEncrypted,
    Unknown,
}

/// Entropy above this threshold, with none of the structured encodings
/// matching, is reported as likely AES-CCM ciphertext rather than unknown.
const LIKELY_ENCRYPTED_ENTROPY: f64 = 0.85;

fn is_ascii_printable(data: &[u8]) -> bool {
    if data.is_empty() {
        return false;
    }
    let printable = data.iter().filter(|&&b| (0x20..=0x7E).contains(&b)).count();
    printable as f64 / data.len() as f64 >= 0.8
}

fn is_packed_bcd(data: &[u8]) -> bool {
    !data.is_empty() && data.iter().all(|b| (b & 0x0F) <= 9 && (b >> 4) <= 9)
}

/// Classify `data` by the priority order most-specific to least-specific:
/// ASCII, then UTF-8, then packed BCD, then (if entropy is high) likely
/// encrypted, else unknown.
pub fn detect_encoding(data: &[u8]) -> Encoding {
    if is_ascii_printable(data) {
        return Encoding::Ascii;
    }
    if is_packed_bcd(data) {
        return Encoding::PackedBcd;
    }
    if !data.is_empty() && std::str::from_utf8(data).is_ok() {
        return Encoding::Utf8;
    }
    if shannon_entropy(data) >= LIKELY_ENCRYPTED_ENTROPY {
        return Encoding::LikelyEncrypted;
    }
    Encoding::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_ascii_text() {
        assert_eq!(detect_encoding(b"Hello, BlueFusion!"), Encoding::Ascii);
    }

    #[test]
    fn detects_packed_bcd() {
        assert_eq!(detect_encoding(&[0x12, 0x34, 0x56]), Encoding::PackedBcd);
    }

    #[test]
    fn high_entropy_random_bytes_are_likely_encrypted() {
        let data: Vec<u8> = (0..=255u8).collect();
        assert_eq!(detect_encoding(&data), Encoding::LikelyEncrypted);
    }
}
