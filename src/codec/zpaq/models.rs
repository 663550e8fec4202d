//! Built-in context-model programs.
//!
//! Each program is a complete block-header body: a 2-byte little-endian
//! length, the five parameter bytes (`hh hm ph pm n`), `n` component
//! descriptors, and the 0-terminated context-hashing bytecode.  Three
//! programs trade speed for modeling strength; the back-end level picks one.

/// Fast: a single indirect context map over an order-2-ish hash.
pub const MODEL_MIN: &[u8] = &[
    26, 0, 1, 2, 0, 0, 2, 3, 16, 8, 19, 0, 0, 96, 4, 28, //
    59, 10, 59, 112, 25, 10, 59, 10, 59, 112, 56, 0,
];

/// Balanced: an ISSE chain over orders 1..4 plus a match model, mixed.
pub const MODEL_MID: &[u8] = &[
    69, 0, 3, 3, 0, 0, 8, 3, 5, 8, 13, 0, 8, 17, 1, 8, //
    18, 2, 8, 18, 3, 8, 19, 4, 4, 22, 24, 7, 16, 0, 7, 24, //
    255, 0, 17, 104, 74, 4, 95, 1, 59, 112, 10, 25, 59, 112, 10, 25, //
    59, 112, 10, 25, 59, 112, 10, 25, 59, 112, 10, 25, 59, 10, 59, 112, //
    25, 69, 207, 8, 112, 56, 0,
];

/// Maximum: a longer ISSE chain, sparse and word contexts, match model,
/// mixers and a two-stage SSE.
pub const MODEL_MAX: &[u8] = &[
    196, 0, 5, 9, 0, 0, 22, 1, 160, 3, 5, 8, 13, 1, 8, 16, //
    2, 8, 18, 3, 8, 19, 4, 8, 19, 5, 8, 20, 6, 4, 22, 24, //
    3, 17, 8, 19, 9, 3, 13, 3, 13, 3, 13, 3, 14, 7, 16, 0, //
    15, 24, 255, 7, 8, 0, 16, 10, 255, 6, 0, 15, 16, 24, 0, 9, //
    8, 17, 32, 255, 6, 8, 17, 18, 16, 255, 9, 16, 19, 32, 255, 6, //
    0, 19, 20, 16, 0, 0, 17, 104, 74, 4, 95, 2, 59, 112, 10, 25, //
    59, 112, 10, 25, 59, 112, 10, 25, 59, 112, 10, 25, 59, 112, 10, 25, //
    59, 10, 59, 112, 10, 25, 59, 112, 10, 25, 69, 183, 32, 239, 64, 47, //
    14, 231, 91, 47, 10, 25, 60, 26, 48, 134, 151, 20, 112, 63, 9, 70, //
    223, 0, 39, 3, 25, 112, 26, 52, 25, 25, 74, 10, 4, 59, 112, 25, //
    10, 4, 59, 112, 25, 10, 4, 59, 112, 25, 65, 143, 212, 72, 4, 59, //
    112, 8, 143, 216, 8, 68, 175, 60, 60, 25, 69, 207, 9, 112, 25, 25, //
    25, 25, 25, 112, 56, 0,
];

/// Map a back-end compression level (1..=9) to a model program.
pub fn model_for_level(level: u32) -> &'static [u8] {
    match level {
        0..=3 => MODEL_MIN,
        4..=7 => MODEL_MID,
        _ => MODEL_MAX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn declared_len(model: &[u8]) -> usize {
        usize::from(model[0]) | usize::from(model[1]) << 8
    }

    #[test]
    fn length_prefixes_are_consistent() {
        for model in [MODEL_MIN, MODEL_MID, MODEL_MAX] {
            assert_eq!(model.len(), declared_len(model) + 2);
            // Bytecode sections end with a 0 terminator.
            assert_eq!(*model.last().unwrap(), 0);
        }
    }

    #[test]
    fn all_levels_resolve() {
        for level in 1..=9 {
            assert!(!model_for_level(level).is_empty());
        }
        assert_eq!(model_for_level(1), MODEL_MIN);
        assert_eq!(model_for_level(7), MODEL_MID);
        assert_eq!(model_for_level(9), MODEL_MAX);
    }
}
