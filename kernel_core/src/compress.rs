//! Page compression codec
//!
//! Run-length encoding over raw page bytes. Deliberately simple: the
//! point is deterministic, dependency-free residency reduction for cold
//! pages, not compression ratio. Zero-filled pages (the common case for
//! demand-populated memory) collapse to a handful of bytes.
//!
//! Encoded form is a sequence of `(count, byte)` pairs, count 1..=255.

use core_types::MemoryError;

/// Compresses a byte buffer with run-length encoding
pub fn compress(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut iter = data.iter();
    let mut current = match iter.next() {
        Some(byte) => *byte,
        None => return out,
    };
    let mut run: u8 = 1;
    for &byte in iter {
        if byte == current && run < u8::MAX {
            run += 1;
        } else {
            out.push(run);
            out.push(current);
            current = byte;
            run = 1;
        }
    }
    out.push(run);
    out.push(current);
    out
}

/// Decompresses a run-length encoded buffer
///
/// `expected_len` is the exact size of the original buffer; any mismatch
/// or truncated pair means the stored bytes are corrupt.
pub fn decompress(encoded: &[u8], expected_len: usize) -> Result<Vec<u8>, MemoryError> {
    if encoded.len() % 2 != 0 {
        return Err(MemoryError::CorruptCompressedPage(
            "truncated run pair".to_string(),
        ));
    }
    let mut out = Vec::with_capacity(expected_len);
    for pair in encoded.chunks_exact(2) {
        let (run, byte) = (pair[0], pair[1]);
        if run == 0 {
            return Err(MemoryError::CorruptCompressedPage(
                "zero-length run".to_string(),
            ));
        }
        out.extend(std::iter::repeat(byte).take(run as usize));
        if out.len() > expected_len {
            return Err(MemoryError::CorruptCompressedPage(format!(
                "expanded past expected length {}",
                expected_len
            )));
        }
    }
    if out.len() != expected_len {
        return Err(MemoryError::CorruptCompressedPage(format!(
            "expanded to {} bytes, expected {}",
            out.len(),
            expected_len
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::PAGE_SIZE;

    #[test]
    fn test_zero_page_collapses() {
        let page = vec![0u8; PAGE_SIZE as usize];
        let encoded = compress(&page);
        // 4096 zeros = 17 runs of 255 plus one of 21
        assert!(encoded.len() <= 36);
        let back = decompress(&encoded, page.len()).unwrap();
        assert_eq!(back, page);
    }

    #[test]
    fn test_mixed_content_round_trip() {
        let mut page = vec![0u8; 512];
        page.extend_from_slice(b"the quick brown fox");
        page.extend(vec![0xAB; 300]);
        let encoded = compress(&page);
        let back = decompress(&encoded, page.len()).unwrap();
        assert_eq!(back, page);
    }

    #[test]
    fn test_empty_input() {
        assert!(compress(&[]).is_empty());
        assert_eq!(decompress(&[], 0).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_truncated_pair_is_corrupt() {
        let err = decompress(&[3], 3).unwrap_err();
        assert!(matches!(err, MemoryError::CorruptCompressedPage(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_length_mismatch_is_corrupt() {
        let encoded = compress(&[1, 2, 3]);
        let err = decompress(&encoded, 5).unwrap_err();
        assert!(matches!(err, MemoryError::CorruptCompressedPage(_)));
    }

    #[test]
    fn test_zero_run_is_corrupt() {
        let err = decompress(&[0, 7], 0).unwrap_err();
        assert!(matches!(err, MemoryError::CorruptCompressedPage(_)));
    }
}
