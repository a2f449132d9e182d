/// `ceil(n / by)`, `by` must be non-zero
pub const fn div_ceil(n: usize, by: usize) -> usize {
    (n + by - 1) / by
}

/// Convert an unsigned byte or block count to the signed slot
/// representation, saturating at `isize::MAX`.
pub fn to_signed(n: usize) -> isize {
    isize::try_from(n).unwrap_or(isize::MAX)
}
