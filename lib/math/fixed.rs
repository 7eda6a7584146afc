//! 128-bit multiply-then-divide with explicit rounding.
//!
//! Every stake-times-time and amount-times-ratio computation in the
//! maintenance engine goes through [`mul_div`] so that intermediate
//! products never lose precision in 64 bits.
//!
//! # Rounding Conventions
//! - `Rounding::Up` (ceil): budgets that must be able to drain a reserve
//! - `Rounding::Down` (floor): payouts and stake decay

use thiserror::Error;

/// Errors from fixed-point operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FixedPointError {
    #[error("division by zero")]
    DivisionByZero,
    #[error("result exceeds u64::MAX")]
    Overflow,
}

/// Rounding strategy for [`mul_div`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rounding {
    /// Round up (ceil).
    Up,
    /// Round down (floor).
    Down,
}

/// Compute `a * b / d` with a 128-bit intermediate product.
///
/// Fails with [`FixedPointError::Overflow`] when the exact result does not
/// fit in a `u64`, and with [`FixedPointError::DivisionByZero`] when
/// `d == 0`.
pub fn mul_div(
    a: u64,
    b: u64,
    d: u64,
    rounding: Rounding,
) -> Result<u64, FixedPointError> {
    if d == 0 {
        return Err(FixedPointError::DivisionByZero);
    }
    let product = u128::from(a) * u128::from(b);
    let quotient = match rounding {
        Rounding::Down => product / u128::from(d),
        Rounding::Up => {
            (product + (u128::from(d) - 1)) / u128::from(d)
        }
    };
    u64::try_from(quotient).map_err(|_| FixedPointError::Overflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mul_div_exact() {
        assert_eq!(mul_div(10, 10, 4, Rounding::Down).unwrap(), 25);
        assert_eq!(mul_div(10, 10, 4, Rounding::Up).unwrap(), 25);
    }

    #[test]
    fn test_mul_div_rounding() {
        assert_eq!(mul_div(10, 10, 3, Rounding::Down).unwrap(), 33);
        assert_eq!(mul_div(10, 10, 3, Rounding::Up).unwrap(), 34);
        assert_eq!(mul_div(1, 1, 2, Rounding::Down).unwrap(), 0);
        assert_eq!(mul_div(1, 1, 2, Rounding::Up).unwrap(), 1);
    }

    #[test]
    fn test_mul_div_wide_intermediate() {
        // The intermediate product exceeds u64 but the result fits.
        assert_eq!(
            mul_div(u64::MAX, u64::MAX, u64::MAX, Rounding::Down).unwrap(),
            u64::MAX
        );
        assert_eq!(
            mul_div(u64::MAX, 1 << 32, 1 << 33, Rounding::Down).unwrap(),
            u64::MAX / 2
        );
    }

    #[test]
    fn test_mul_div_overflow() {
        assert_eq!(
            mul_div(u64::MAX, 2, 1, Rounding::Down),
            Err(FixedPointError::Overflow)
        );
        // Ceiling pushes an in-range floor result out of range.
        assert_eq!(
            mul_div(u64::MAX, 3, 3, Rounding::Down).unwrap(),
            u64::MAX
        );
        assert_eq!(
            mul_div(u64::MAX, 4, 3, Rounding::Up),
            Err(FixedPointError::Overflow)
        );
    }

    #[test]
    fn test_mul_div_division_by_zero() {
        assert_eq!(
            mul_div(1, 1, 0, Rounding::Down),
            Err(FixedPointError::DivisionByZero)
        );
    }
}
