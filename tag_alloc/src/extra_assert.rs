// Assertions that only fire with the "extra_assertions" feature. Without the
// feature the condition is still type checked but never evaluated.

macro_rules! extra_assert {
    ( $( $args:tt )* ) => {
        if cfg!(feature = "extra_assertions") {
            assert!( $( $args )* );
        }
    };
}

macro_rules! extra_assert_eq {
    ( $( $args:tt )* ) => {
        if cfg!(feature = "extra_assertions") {
            assert_eq!( $( $args )* );
        }
    };
}

/// Freed payloads are filled with this byte when "extra_assertions" is on.
///
/// If you see unexpected `0x57575757` values, then either (a) you have a
/// use-after-free, or (b) there is a bug in `tag_alloc`.
pub(crate) const FREE_PATTERN: u8 = 0x57;

/// Poison a payload that just became free.
#[inline]
pub(crate) fn write_free_pattern(payload: &mut [u8]) {
    if cfg!(feature = "extra_assertions") {
        for byte in payload.iter_mut() {
            *byte = FREE_PATTERN;
        }
    }
}

/// Check that a free payload was not written to while it sat in the heap.
#[inline]
pub(crate) fn assert_is_poisoned_with_free_pattern(payload: &[u8]) {
    if cfg!(feature = "extra_assertions") {
        if let Some(i) = payload.iter().position(|byte| *byte != FREE_PATTERN) {
            panic!(
                "free payload byte {} is {:#x}, expected the free pattern {:#x}",
                i, payload[i], FREE_PATTERN
            );
        }
    }
}
