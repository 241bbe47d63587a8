//! Log-linear histogram with two significant decimal digits per bucket.
//!
//! A value `v` lands in the bucket `m * 10^(e-1)` where `m` is its two
//! leading digits (10..=99, signed) and `e` its decimal exponent. Buckets
//! serialize as `H[<lower bound>]=<count>`, e.g. `H[3.0e+01]=2`.

use std::collections::HashMap;

const MIN_EXP: i32 = -128;
const MAX_EXP: i32 = 127;
/// Absorbs division error so e.g. 0.29 / 0.01 lands on 29, not 28.999...
const BIN_EPSILON: f64 = 1e-13;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Bucket {
    /// Signed two-digit mantissa, 0 for the zero bucket.
    val: i8,
    exp: i8,
}

impl Bucket {
    const ZERO: Bucket = Bucket { val: 0, exp: 0 };

    fn for_value(v: f64) -> Option<Bucket> {
        if !v.is_finite() {
            return None;
        }
        if v == 0.0 {
            return Some(Bucket::ZERO);
        }
        let abs = v.abs();
        let mut exp = abs.log10().floor() as i32;
        let mut mantissa = (abs / 10f64.powi(exp - 1) + BIN_EPSILON).floor() as i32;
        // log10/powi rounding can push the mantissa one decade off
        if mantissa >= 100 {
            mantissa /= 10;
            exp += 1;
        } else if mantissa < 10 {
            mantissa *= 10;
            exp -= 1;
        }
        if exp < MIN_EXP {
            return Some(Bucket::ZERO);
        }
        if exp > MAX_EXP {
            return None;
        }
        let val = if v < 0.0 { -mantissa } else { mantissa };
        Some(Bucket {
            val: val as i8,
            exp: exp as i8,
        })
    }

    fn lower_bound(&self) -> f64 {
        if self.val == 0 {
            return 0.0;
        }
        self.val as f64 * 10f64.powi(self.exp as i32 - 1)
    }

    fn render(&self, count: u64) -> String {
        if self.val == 0 {
            return format!("H[0]={count}");
        }
        let sign = if self.val < 0 { "-" } else { "" };
        let digits = self.val.unsigned_abs();
        let exp = self.exp as i32;
        let exp_sign = if exp < 0 { '-' } else { '+' };
        format!(
            "H[{sign}{}.{}e{exp_sign}{:02}]={count}",
            digits / 10,
            digits % 10,
            exp.abs()
        )
    }
}

/// Bucketed value distribution recorded by `timing` / `record_value`.
#[derive(Debug, Clone, Default)]
pub struct Histogram {
    buckets: HashMap<Bucket, u64>,
}

impl Histogram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one sample. NaN and infinities are dropped.
    pub fn record_value(&mut self, v: f64) {
        if let Some(bucket) = Bucket::for_value(v) {
            *self.buckets.entry(bucket).or_insert(0) += 1;
        }
    }

    /// Serialized buckets, ordered by bucket lower bound.
    pub fn snapshot(&self) -> Vec<String> {
        let mut buckets: Vec<(&Bucket, &u64)> = self.buckets.iter().collect();
        buckets.sort_by(|a, b| a.0.lower_bound().total_cmp(&b.0.lower_bound()));
        buckets
            .into_iter()
            .map(|(bucket, count)| bucket.render(*count))
            .collect()
    }

    pub fn reset(&mut self) {
        self.buckets.clear();
    }

    /// Total number of recorded samples.
    pub fn count(&self) -> u64 {
        self.buckets.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
