//! Timing attack protection utilities

/// Constant-time string comparison to prevent timing attacks.
///
/// Only the length is leaked, the position of the first differing byte is
/// not.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (byte_a, byte_b) in a.bytes().zip(b.bytes()) {
        result |= byte_a ^ byte_b;
    }

    result == 0
}
