use std::ops::AddAssign;

use num_bigint::{BigInt, BigUint, Sign};

/// Exact base-10 number: `digits * 10^-scale`.
///
/// Floats enter through their shortest round-trip decimal form, so `1.005`
/// is exactly 1.005 here rather than the nearest binary double.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Decimal {
    digits: BigInt,
    scale: u32,
}

fn pow10(exponent: u32) -> BigUint {
    BigUint::from(10u32).pow(exponent)
}

impl Decimal {
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        // f64's Display is the shortest round-trip form and never uses an
        // exponent.
        let text = value.to_string();
        let (int, frac) = text.split_once('.').unwrap_or((text.as_str(), ""));
        let digits = format!("{}{}", int, frac).parse().ok()?;
        Some(Self {
            digits,
            scale: frac.len() as u32,
        })
    }

    fn rescaled(&self, scale: u32) -> BigInt {
        &self.digits * BigInt::from(pow10(scale - self.scale))
    }

    /// Divides by `divisor` and rounds half away from zero to `places`
    /// decimals.
    pub fn div_rounded(&self, divisor: u64, places: u32) -> Self {
        let numerator = self.digits.magnitude() * pow10(places);
        let denominator = pow10(self.scale) * BigUint::from(divisor);

        let mut quotient = &numerator / &denominator;
        let remainder = &numerator % &denominator;
        if remainder * 2u32 >= denominator {
            quotient += 1u32;
        }

        Self {
            digits: BigInt::from_biguint(self.digits.sign(), quotient),
            scale: places,
        }
    }

    pub fn round(&self, places: u32) -> Self {
        self.div_rounded(1, places)
    }

    pub fn to_f64(&self) -> f64 {
        let magnitude = self.digits.magnitude().to_string();
        let scale = self.scale as usize;
        let padded = format!("{:0>width$}", magnitude, width = scale + 1);
        let (int, frac) = padded.split_at(padded.len() - scale);
        let sign = if self.digits.sign() == Sign::Minus { "-" } else { "" };
        let text = if frac.is_empty() {
            format!("{}{}", sign, int)
        } else {
            format!("{}{}.{}", sign, int, frac)
        };
        // Always a plain decimal literal, which f64 parses.
        text.parse().unwrap_or(f64::NAN)
    }
}

impl AddAssign<&Decimal> for Decimal {
    fn add_assign(&mut self, other: &Decimal) {
        let scale = self.scale.max(other.scale);
        self.digits = self.rescaled(scale) + other.rescaled(scale);
        self.scale = scale;
    }
}
