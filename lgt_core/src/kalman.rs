//! Constant-velocity Kalman filter tracking the patch constellation's
//! centroid.
//!
//! Grounded on the teacher's `AugmentedStateFilter` (predict/correct
//! structuring, Joseph-form covariance update, Cholesky-failure self-healing
//! reset) but the state dimension here never changes - there is no lag
//! history to augment - so fixed-size `nalgebra::{Matrix4, Vector4}` replace
//! the teacher's `DMatrix`/`DVector`.

use nalgebra::{Matrix2, Matrix4, Vector2, Vector4};
use serde::{Deserialize, Serialize};

/// State = `(x, y, vx, vy)`, constant-velocity motion, `dt = 1` per frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CentroidFilter {
    state_post: Vector4<f32>,
    error_cov_post: Matrix4<f32>,
    process_noise: Matrix4<f32>,
    measurement_noise: Matrix2<f32>,
}

fn transition() -> Matrix4<f32> {
    #[rustfmt::skip]
    let f = Matrix4::new(
        1.0, 0.0, 1.0, 0.0,
        0.0, 1.0, 0.0, 1.0,
        0.0, 0.0, 1.0, 0.0,
        0.0, 0.0, 0.0, 1.0,
    );
    f
}

fn measurement() -> nalgebra::Matrix2x4<f32> {
    #[rustfmt::skip]
    let h = nalgebra::Matrix2x4::new(
        1.0, 0.0, 0.0, 0.0,
        0.0, 1.0, 0.0, 0.0,
    );
    h
}

impl CentroidFilter {
    /// `diag` is the initial region's diagonal length (pixels), used to scale
    /// process and measurement noise per the data model's spectral-density
    /// rule: process ≈ `(0.2·diag·10)²`, measurement ≈ `(0.1·diag·10)²`.
    pub fn new(initial_centroid: Vector2<f32>, diag: f32) -> Self {
        let process_sigma = 0.2 * diag * 10.0;
        let measurement_sigma = 0.1 * diag * 10.0;
        let process_noise = Matrix4::identity() * (process_sigma * process_sigma);
        let measurement_noise = Matrix2::identity() * (measurement_sigma * measurement_sigma);
        let state_post = Vector4::new(initial_centroid.x, initial_centroid.y, 0.0, 0.0);
        let error_cov_post = Matrix4::identity() * (4.0 * measurement_sigma * measurement_sigma);
        Self {
            state_post,
            error_cov_post,
            process_noise,
            measurement_noise,
        }
    }

    pub fn position(&self) -> Vector2<f32> {
        Vector2::new(self.state_post.x, self.state_post.y)
    }

    pub fn velocity(&self) -> Vector2<f32> {
        Vector2::new(self.state_post.z, self.state_post.w)
    }

    /// Advances the state by one frame and returns the predicted centroid.
    /// Does not touch `error_cov_post` in place - the predicted covariance
    /// is folded into `state_post`/an internal prior until `correct` runs.
    pub fn predict(&mut self) -> Vector2<f32> {
        let f = transition();
        self.state_post = f * self.state_post;
        self.error_cov_post = f * self.error_cov_post * f.transpose() + self.process_noise;
        self.position()
    }

    /// Corrects the prediction against an observed centroid. On singular
    /// innovation covariance (degenerate numeric state), resets to a
    /// high-uncertainty diagonal and keeps the predicted state rather than
    /// propagating a NaN/inf correction.
    pub fn correct(&mut self, measurement_value: Vector2<f32>) {
        let h = measurement();
        let innovation = measurement_value - h * self.state_post;
        let s = h * self.error_cov_post * h.transpose() + self.measurement_noise;

        let s_inv = match s.try_inverse() {
            Some(inv) if inv.iter().all(|v| v.is_finite()) => inv,
            _ => {
                tracing::warn!("kalman innovation covariance singular, resetting");
                self.reset_covariance();
                return;
            }
        };

        let gain = self.error_cov_post * h.transpose() * s_inv;
        self.state_post += gain * innovation;

        let identity = Matrix4::identity();
        let i_kh = identity - gain * h;
        self.error_cov_post =
            i_kh * self.error_cov_post * i_kh.transpose() + gain * self.measurement_noise * gain.transpose();

        if !self.state_post.iter().all(|v| v.is_finite()) {
            tracing::warn!("kalman state diverged, resetting");
            self.state_post = Vector4::new(measurement_value.x, measurement_value.y, 0.0, 0.0);
            self.reset_covariance();
        }
    }

    fn reset_covariance(&mut self) {
        self.error_cov_post = Matrix4::identity() * 1000.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn stationary_target_keeps_zero_velocity() {
        let mut kf = CentroidFilter::new(Vector2::new(100.0, 100.0), 56.0);
        for _ in 0..10 {
            kf.predict();
            kf.correct(Vector2::new(100.0, 100.0));
        }
        assert_relative_eq!(kf.velocity().x, 0.0, epsilon = 1.0);
        assert_relative_eq!(kf.velocity().y, 0.0, epsilon = 1.0);
    }

    #[test]
    fn constant_velocity_is_tracked() {
        let mut kf = CentroidFilter::new(Vector2::new(50.0, 50.0), 56.0);
        let mut truth = Vector2::new(50.0, 50.0);
        for _ in 0..50 {
            truth += Vector2::new(2.0, 1.0);
            kf.predict();
            kf.correct(truth);
        }
        let speed = kf.velocity().norm();
        assert!((speed - 2.236).abs() / 2.236 < 0.2, "speed = {speed}");
    }

    #[test]
    fn recovers_from_nan_measurement() {
        let mut kf = CentroidFilter::new(Vector2::new(0.0, 0.0), 10.0);
        kf.predict();
        kf.correct(Vector2::new(f32::NAN, 0.0));
        kf.predict();
        kf.correct(Vector2::new(5.0, 5.0));
        assert!(kf.position().x.is_finite());
        assert!(kf.position().y.is_finite());
    }
}
