//! Payload masking, RFC 6455 Section 5.3.
//!
//! `masked[i] = payload[i] ^ key[i % 4]`. The operation is its own inverse, so the same
//! functions mask outgoing payloads and unmask incoming ones.

/// Masks or unmasks `buf` in place with `mask`.
#[inline]
pub fn apply_mask(buf: &mut [u8], mask: [u8; 4]) {
    apply_mask_words(buf, mask);
}

/// Writes `src` masked with `mask` into `dst`.
///
/// # Panics
/// Panics if `dst` and `src` differ in length.
#[inline]
pub fn apply_mask_into(dst: &mut [u8], src: &[u8], mask: [u8; 4]) {
    assert_eq!(dst.len(), src.len(), "mask source and destination differ in length");
    dst.copy_from_slice(src);
    apply_mask_words(dst, mask);
}

/// Byte at a time. Used for the unaligned edges of a buffer.
#[inline]
fn apply_mask_bytes(buf: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= mask[i & 3];
    }
}

/// Masks the aligned middle of `buf` one `u32` at a time.
///
/// The key is rotated by the length of the unaligned prefix so that every word lines up
/// with the key position it would have had byte by byte.
#[inline]
fn apply_mask_words(buf: &mut [u8], mask: [u8; 4]) {
    // SAFETY: any bit pattern is a valid u32 and align_to_mut only hands out the
    // properly aligned middle part.
    let (prefix, words, suffix) = unsafe { buf.align_to_mut::<u32>() };
    apply_mask_bytes(prefix, mask);

    let shift = (prefix.len() & 3) as u32 * 8;
    let word = u32::from_ne_bytes(mask);
    let word = if shift == 0 {
        word
    } else if cfg!(target_endian = "big") {
        word.rotate_left(shift)
    } else {
        word.rotate_right(shift)
    };

    for w in words.iter_mut() {
        *w ^= word;
    }
    apply_mask_bytes(suffix, word.to_ne_bytes());
}
