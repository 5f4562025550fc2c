// Fragment-length distribution: an online-updatable pmf over integer
// fragment lengths, kept entirely in log space.
//
// The distribution is seeded from a Gaussian prior convolved with a small
// binomial kernel, and sharpened during burn-in by `add_val` calls carrying
// the current forgetting mass. Lookups normalize against the running total,
// so no explicit renormalization pass is ever needed.

use crate::math::{log_add, log_sum_exp, LOG_0};

#[derive(Debug)]
pub struct FragmentLengthDistribution {
    /// log mass per length; index 0 is unused (fragment length 0 means
    /// "unknown" and never receives mass).
    hist: Vec<f64>,
    /// log of the total mass in `hist`.
    tot_mass: f64,
    /// log-space binomial smoothing kernel of size kernel_n + 1.
    kernel: Vec<f64>,
}

fn log_normal_pdf(x: f64, mu: f64, sigma: f64) -> f64 {
    let z = (x - mu) / sigma;
    -0.5 * (2.0 * std::f64::consts::PI).ln() - sigma.ln() - 0.5 * z * z
}

fn log_binomial_kernel(n: usize, p: f64) -> Vec<f64> {
    let mut kernel = Vec::with_capacity(n + 1);
    for i in 0..=n {
        // C(n, i) is tiny for the kernel sizes used here; a direct product
        // is exact.
        let mut choose = 1.0f64;
        for j in 0..i {
            choose *= (n - j) as f64 / (j + 1) as f64;
        }
        kernel.push(choose.ln() + (i as f64) * p.ln() + ((n - i) as f64) * (1.0 - p).ln());
    }
    kernel
}

impl FragmentLengthDistribution {
    /// `alpha` scales the prior pseudo-mass; `max_val` is the largest
    /// representable fragment length. The prior is a Gaussian with the given
    /// mean and standard deviation, clipped to `[1, max_val]` and smoothed
    /// with a binomial(kernel_n, kernel_p) kernel.
    pub fn new(
        alpha: f64,
        max_val: usize,
        prior_mu: f64,
        prior_sigma: f64,
        kernel_n: usize,
        kernel_p: f64,
    ) -> Self {
        let kernel = log_binomial_kernel(kernel_n, kernel_p);

        let mut raw = vec![LOG_0; max_val + 1];
        for (l, slot) in raw.iter_mut().enumerate().skip(1) {
            *slot = alpha.ln() + log_normal_pdf(l as f64, prior_mu, prior_sigma);
        }

        // Convolve the clipped Gaussian with the kernel; mass that would
        // fall outside [1, max_val] is pushed back onto the boundary.
        let half = kernel_n / 2;
        let mut hist = vec![LOG_0; max_val + 1];
        for l in 1..=max_val {
            for (i, &kw) in kernel.iter().enumerate() {
                let target = (l + i).saturating_sub(half).clamp(1, max_val);
                hist[target] = log_add(hist[target], raw[l] + kw);
            }
        }

        let tot_mass = log_sum_exp(hist.iter().copied());
        FragmentLengthDistribution {
            hist,
            tot_mass,
            kernel,
        }
    }

    pub fn max_val(&self) -> usize {
        self.hist.len() - 1
    }

    /// log P(L = len). Lengths beyond the maximum are clamped.
    pub fn pmf(&self, len: usize) -> f64 {
        if len == 0 {
            return LOG_0;
        }
        let len = len.min(self.max_val());
        self.hist[len] - self.tot_mass
    }

    /// Add `log_mass` worth of evidence for fragment length `len`, spread
    /// over the smoothing kernel. A length of zero is a no-op.
    pub fn add_val(&mut self, len: usize, log_mass: f64) {
        if len == 0 {
            return;
        }
        let max = self.max_val();
        let len = len.min(max);
        let half = self.kernel.len() / 2;
        for i in 0..self.kernel.len() {
            let target = (len + i).saturating_sub(half).clamp(1, max);
            let w = log_mass + self.kernel[i];
            self.hist[target] = log_add(self.hist[target], w);
            self.tot_mass = log_add(self.tot_mass, w);
        }
    }

    /// Expected fragment length under the current distribution.
    pub fn mean(&self) -> f64 {
        let mut acc = 0.0;
        for l in 1..=self.max_val() {
            acc += l as f64 * self.pmf(l).exp();
        }
        acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_fld() -> FragmentLengthDistribution {
        FragmentLengthDistribution::new(1.0, 800, 200.0, 80.0, 4, 0.5)
    }

    #[test]
    fn prior_is_normalized() {
        let fld = default_fld();
        let total: f64 = (1..=800).map(|l| fld.pmf(l).exp()).sum();
        assert!((total - 1.0).abs() < 1e-9, "total = {}", total);
    }

    #[test]
    fn prior_peaks_at_mean() {
        let fld = default_fld();
        assert!(fld.pmf(200) > fld.pmf(100));
        assert!(fld.pmf(200) > fld.pmf(400));
        assert!((fld.mean() - 200.0).abs() < 2.0);
    }

    #[test]
    fn add_val_shifts_mass() {
        let mut fld = default_fld();
        let before = fld.pmf(350);
        // Heavy evidence at 350 relative to the prior mass.
        for _ in 0..100 {
            fld.add_val(350, 0.0);
        }
        assert!(fld.pmf(350) > before);
        // Still a distribution.
        let total: f64 = (1..=800).map(|l| fld.pmf(l).exp()).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn zero_length_update_is_noop() {
        let mut fld = default_fld();
        let before = fld.tot_mass;
        fld.add_val(0, 0.0);
        assert_eq!(fld.tot_mass, before);
    }

    #[test]
    fn overlong_lengths_clamp() {
        let mut fld = default_fld();
        fld.add_val(5000, 0.0);
        assert!(fld.pmf(5000) == fld.pmf(800));
    }
}
