//! Radial lens distortion model
//!
//! The warp shader pushes each sample outward by
//! `r * (K0 + K1*r^2 + K2*r^4 + K3*r^6)`, measured from the lens center in
//! [-1,1] per-eye viewport units. The helpers here pick the render texture
//! oversampling so the warped image still covers the viewport.

use crate::stereo::StereoEye;

/// Number of refinement rounds run by [`Distortion::calc_scale_inverse`].
pub const SCALE_INVERSE_ITERATIONS: usize = 20;

/// Largest target accepted by [`Distortion::calc_scale_inverse`].
pub const SCALE_INVERSE_MAX: f32 = 10.0;

/// Residual the inverse solver reaches for targets up to 3.0 with
/// coefficient sets of the shipped panels.
pub const SCALE_INVERSE_TOLERANCE: f32 = 1e-3;

/// Relative residual the inverse solver reaches over the whole accepted
/// range `(0, SCALE_INVERSE_MAX]`.
pub const SCALE_INVERSE_RELATIVE_TOLERANCE: f32 = 5e-3;

/// Distortion shader parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Distortion {
    pub k: [f32; 4],
    /// Offset of the lens center from the eye viewport center, in [-1,1] units.
    pub x_center_offset: f32,
    pub y_center_offset: f32,
    /// Render texture oversampling; 1.0 means no fit was requested.
    pub scale: f32,
}

impl Distortion {
    pub fn new(k0: f32, k1: f32, k2: f32, k3: f32) -> Self {
        Self {
            k: [k0, k1, k2, k3],
            x_center_offset: 0.0,
            y_center_offset: 0.0,
            scale: 1.0,
        }
    }

    pub fn set_coefficients(&mut self, k0: f32, k1: f32, k2: f32, k3: f32) {
        self.k = [k0, k1, k2, k3];
    }

    /// Forward distortion of radius `s`. Must match the shader's warp.
    pub fn evaluate(&self, s: f32) -> f32 {
        let ssq = s * s;
        s * (self.k[0] + self.k[1] * ssq + self.k[2] * ssq * ssq + self.k[3] * ssq * ssq * ssq)
    }

    /// Scale at which input and output coincide at `fit_radius`.
    /// `fit_radius` must be non-zero.
    pub fn calc_scale_for_fit_radius(&self, fit_radius: f32) -> f32 {
        self.evaluate(fit_radius) / fit_radius
    }

    /// Finds `s` such that `evaluate(s) == target_scale`.
    ///
    /// The polynomial has no usable closed-form inverse, so this runs a
    /// bounded hill climb: start at half the target, step by a quarter of it,
    /// halve the step whenever neither direction improves the residual.
    pub fn calc_scale_inverse(&self, target_scale: f32) -> f32 {
        debug_assert!(
            target_scale <= SCALE_INVERSE_MAX,
            "calc_scale_inverse target {} exceeds {}",
            target_scale,
            SCALE_INVERSE_MAX
        );

        let mut delta = target_scale * 0.25;
        let mut s = target_scale * 0.5;
        let mut d = (target_scale - self.evaluate(s)).abs();

        for _ in 0..SCALE_INVERSE_ITERATIONS {
            let s_up = s + delta;
            let s_down = s - delta;
            let d_up = (target_scale - self.evaluate(s_up)).abs();
            let d_down = (target_scale - self.evaluate(s_down)).abs();

            if d_up < d {
                s = s_up;
                d = d_up;
            } else if d_down < d {
                s = s_down;
                d = d_down;
            } else {
                delta *= 0.5;
            }
        }

        s
    }

    /// Scale the renderer may divide by. A zero or negative scale (for example
    /// from an all-zero polynomial) disables distortion fitting.
    pub fn effective_scale(&self) -> f32 {
        if self.scale > 0.0 && self.scale.is_finite() {
            self.scale
        } else {
            1.0
        }
    }

    /// Per-eye copy handed to the renderer. The right eye sees the lens
    /// center mirrored; the shared model is never touched.
    pub fn for_eye(&self, eye: StereoEye) -> Distortion {
        let mut dc = *self;
        if eye == StereoEye::Right {
            dc.x_center_offset = -dc.x_center_offset;
        }
        dc
    }
}

impl Default for Distortion {
    fn default() -> Self {
        Self::new(1.0, 0.18, 0.115, 0.0)
    }
}
