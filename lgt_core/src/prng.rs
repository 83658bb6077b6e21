//! One seeded pseudo-random source per tracker instance.
//!
//! All randomness in the engine flows through this type: no hidden global
//! state, no process-wide seed flag (§9 design note). `rand_chacha::ChaCha8Rng`
//! stands in for the source's Mersenne Twister - a modern, reproducible
//! CSPRNG-shaped generator seeded explicitly at construction.

use nalgebra::{Matrix2, Point2, Vector2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};

pub struct Prng {
    rng: ChaCha8Rng,
}

impl Prng {
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn uniform_f32(&mut self, lo: f32, hi: f32) -> f32 {
        self.rng.gen_range(lo..hi)
    }

    /// Draws one sample from a bivariate Gaussian with mean `mu` and
    /// covariance `sigma`, via the Cholesky factor of `sigma`. Falls back to
    /// an isotropic unit-diagonal factor if `sigma` isn't positive-definite
    /// (a caller's convergence loop should treat this as "sigma degraded"
    /// and reset it, per the Numeric error kind).
    pub fn gaussian_2d(&mut self, mu: Point2<f32>, sigma: Matrix2<f32>) -> Point2<f32> {
        let l = sigma.cholesky().map(|c| c.l()).unwrap_or_else(Matrix2::identity);
        let z = Vector2::new(
            <StandardNormal as Distribution<f32>>::sample(&StandardNormal, &mut self.rng),
            <StandardNormal as Distribution<f32>>::sample(&StandardNormal, &mut self.rng),
        );
        Point2::from(mu.coords + l * z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_yields_same_sequence() {
        let mut a = Prng::seeded(42);
        let mut b = Prng::seeded(42);
        for _ in 0..10 {
            assert_eq!(a.uniform_f32(0.0, 1.0), b.uniform_f32(0.0, 1.0));
        }
    }

    #[test]
    fn different_seeds_diverge() {
        let mut a = Prng::seeded(0);
        let mut b = Prng::seeded(1);
        let seq_a: Vec<f32> = (0..5).map(|_| a.uniform_f32(0.0, 1.0)).collect();
        let seq_b: Vec<f32> = (0..5).map(|_| b.uniform_f32(0.0, 1.0)).collect();
        assert_ne!(seq_a, seq_b);
    }

    #[test]
    fn gaussian_sample_is_finite() {
        let mut rng = Prng::seeded(7);
        let p = rng.gaussian_2d(Point2::new(0.0, 0.0), Matrix2::identity());
        assert!(p.x.is_finite() && p.y.is_finite());
    }
}
