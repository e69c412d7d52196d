//! UTF-8 validation for Text messages and Close reasons.
//!
//! Validation is backed by [`std::str::from_utf8`], or by `simdutf8` when the `simd`
//! feature is enabled. Both reject overlong encodings, surrogate code points and
//! truncated sequences.
use crate::{Result, WebSocketError};

/// Returns `true` if `buf` is a complete, well-formed UTF-8 sequence.
#[inline]
pub fn is_valid(buf: &[u8]) -> bool {
    parse_str(buf).is_ok()
}

/// Interprets `buf` as UTF-8, failing with [`WebSocketError::InvalidUTF8`].
#[inline]
pub(crate) fn parse_str(buf: &[u8]) -> Result<&str> {
    #[cfg(not(feature = "simd"))]
    let res = std::str::from_utf8(buf).map_err(|_| WebSocketError::InvalidUTF8);
    #[cfg(feature = "simd")]
    let res = simdutf8::basic::from_utf8(buf).map_err(|_| WebSocketError::InvalidUTF8);
    res
}

/// Incremental validator for a Text message arriving in fragments.
///
/// The reassembly buffer is fed after every fragment. Bytes already known to be valid
/// are not inspected again, and a sequence that can never become valid is rejected as
/// soon as it shows up instead of after the final fragment.
#[derive(Debug, Default)]
pub struct Validator {
    valid_up_to: usize,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets any progress, ready for the next message.
    pub fn reset(&mut self) {
        self.valid_up_to = 0;
    }

    /// Validates the tail of `buf` not seen by a previous call.
    ///
    /// `buf` must be the same buffer grown since the last call. When `fin` is false a
    /// multi-byte sequence cut at the end of `buf` is accepted, since the next fragment
    /// may complete it.
    pub fn feed(&mut self, buf: &[u8], fin: bool) -> Result<()> {
        let tail = &buf[self.valid_up_to..];

        #[cfg(not(feature = "simd"))]
        let res = std::str::from_utf8(tail).map_err(|err| (err.valid_up_to(), err.error_len()));
        #[cfg(feature = "simd")]
        let res =
            simdutf8::compat::from_utf8(tail).map_err(|err| (err.valid_up_to(), err.error_len()));

        match res {
            Ok(_) => {
                self.valid_up_to = buf.len();
                Ok(())
            }
            // incomplete sequence at the end of the buffer
            Err((valid_up_to, None)) if !fin => {
                self.valid_up_to += valid_up_to;
                Ok(())
            }
            Err(_) => Err(WebSocketError::InvalidUTF8),
        }
    }
}
