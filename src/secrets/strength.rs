//! Secret strength heuristics.
//!
//! These checks catch placeholder values (short strings, long runs of the same
//! few characters). `log2(distinct chars)` is an upper bound on per-character
//! entropy for the observed alphabet, not a measurement of how the value was
//! generated, so passing here does not certify cryptographic strength.

use std::collections::HashSet;

/// Minimum number of characters for a secret to be considered strong.
pub const MIN_LENGTH: usize = 32;

/// Minimum `log2(distinct chars)`; 3.0 bits means at least 8 distinct characters.
pub const MIN_BITS_PER_CHAR: f64 = 3.0;

/// Minimum estimated entropy for generated rotation material.
pub const MIN_GENERATED_ENTROPY_BITS: f64 = 128.0;

/// Returns true if `value` fails the length or character-diversity floor.
pub fn is_weak(value: &str) -> bool {
    weakness_reason(value).is_some()
}

/// Explains why `value` is weak, or `None` if it passes.
pub fn weakness_reason(value: &str) -> Option<String> {
    let length = value.chars().count();
    if length < MIN_LENGTH {
        return Some(format!("length {} is below the minimum of {}", length, MIN_LENGTH));
    }

    let bits = bits_per_char(value);
    if bits < MIN_BITS_PER_CHAR {
        return Some(format!(
            "character diversity of {:.2} bits/char is below {:.1}",
            bits, MIN_BITS_PER_CHAR
        ));
    }

    None
}

/// `log2` of the number of distinct characters in `value`.
pub fn bits_per_char(value: &str) -> f64 {
    let distinct: HashSet<char> = value.chars().collect();
    if distinct.is_empty() {
        return 0.0;
    }
    (distinct.len() as f64).log2()
}

/// Length times [`bits_per_char`].
pub fn estimated_entropy_bits(value: &str) -> f64 {
    value.chars().count() as f64 * bits_per_char(value)
}
