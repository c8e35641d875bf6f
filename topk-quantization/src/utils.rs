/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

/// Perform the computation `ceil(x / y)` where `x`, `y`, and the returned value are all
/// integers.
///
/// # Panics
///
/// Panics if `y == T::default()` as Rust's default `x / y` operator is used.
pub(crate) fn div_round_up<T>(x: T, y: T) -> T
where
    T: std::ops::Div<Output = T>
        + std::ops::Rem<Output = T>
        + std::ops::Add<Output = T>
        + Default
        + std::cmp::Eq
        + From<u8>
        + Copy,
{
    (x / y)
        + if (x % y) != T::default() {
            T::from(1)
        } else {
            T::default()
        }
}

///////////
// Tests //
///////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_div_round_up() {
        assert_eq!(div_round_up(0usize, 128), 0);
        assert_eq!(div_round_up(1usize, 128), 1);
        assert_eq!(div_round_up(127usize, 128), 1);
        assert_eq!(div_round_up(128usize, 128), 1);
        assert_eq!(div_round_up(129usize, 128), 2);
        assert_eq!(div_round_up(257usize, 128), 3);
        assert_eq!(div_round_up(usize::MAX, 1), usize::MAX);
        assert_eq!(div_round_up(7u32, 2), 4);
    }
}
