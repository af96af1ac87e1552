//! Power-of-two helpers behind mask-based wraparound.

/// Rounds `n` up to a power of two.
///
/// Returns `Some(1)` for `n == 0`, `n` itself when it is already a power of
/// two, and `None` when the result would not fit in a `usize`
/// (`n > usize::MAX / 2 + 1`).
#[inline]
#[must_use]
pub const fn next_power_of_two(n: usize) -> Option<usize> {
    if n == 0 {
        return Some(1);
    }
    n.checked_next_power_of_two()
}

/// Returns `true` iff `n` is non-zero and has a single bit set.
#[inline]
#[must_use]
pub const fn is_power_of_two(n: usize) -> bool {
    n != 0 && n & (n - 1) == 0
}

/// Advances a cursor by one slot, wrapping to 0 at capacity.
///
/// `mask` is `capacity - 1`; capacity is always a power of two, so this is
/// `(cursor + 1) % capacity` without the division.
#[inline]
#[must_use]
pub const fn bump_cursor(cursor: usize, mask: usize) -> usize {
    cursor.wrapping_add(1) & mask
}
