// Log-space arithmetic used throughout the EM machinery.
//
// All probability mass in the quantifier lives in log space; these helpers
// keep the additions numerically stable even when the operands differ by
// hundreds of orders of magnitude.

use std::sync::atomic::{AtomicU64, Ordering};

pub const LOG_0: f64 = f64::NEG_INFINITY;
pub const LOG_1: f64 = 0.0;
pub const LOG_ONEHALF: f64 = -std::f64::consts::LN_2;

// ln of the smallest positive normal f64; below this the smaller operand
// cannot move the larger one.
const LOG_EPSILON: f64 = -708.396_418_532_264_1;

/// Stable computation of ln(exp(x) + exp(y)).
#[inline]
pub fn log_add(x: f64, y: f64) -> f64 {
    let (small, big) = if x < y { (x, y) } else { (y, x) };
    if big == LOG_0 {
        return LOG_0;
    }
    if small == LOG_0 || small - big < LOG_EPSILON {
        return big;
    }
    big + (small - big).exp().ln_1p()
}

/// ln(Σ exp(x_i)) over an iterator of log-space values.
pub fn log_sum_exp<I: IntoIterator<Item = f64>>(vals: I) -> f64 {
    vals.into_iter().fold(LOG_0, log_add)
}

/// An f64 accumulator that can be updated concurrently from several EM
/// workers. The value is stored as its bit pattern in an `AtomicU64`;
/// updates are retried compare-and-swap loops, so concurrent log-adds
/// serialize per field without a lock.
#[derive(Debug)]
pub struct AtomicF64 {
    bits: AtomicU64,
}

impl AtomicF64 {
    pub fn new(val: f64) -> Self {
        AtomicF64 {
            bits: AtomicU64::new(val.to_bits()),
        }
    }

    #[inline]
    pub fn load(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }

    pub fn store(&self, val: f64) {
        self.bits.store(val.to_bits(), Ordering::Release);
    }

    /// Atomically set the value to `log_add(current, addend)`.
    pub fn fetch_log_add(&self, addend: f64) {
        let mut cur = self.bits.load(Ordering::Acquire);
        loop {
            let next = log_add(f64::from_bits(cur), addend).to_bits();
            match self.bits.compare_exchange_weak(
                cur,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(observed) => cur = observed,
            }
        }
    }

    /// Atomically set the value to `current + addend` (linear domain).
    pub fn fetch_add(&self, addend: f64) {
        let mut cur = self.bits.load(Ordering::Acquire);
        loop {
            let next = (f64::from_bits(cur) + addend).to_bits();
            match self.bits.compare_exchange_weak(
                cur,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(observed) => cur = observed,
            }
        }
    }
}
