//! Stereo configuration
//!
//! `StereoConfig` owns every physical and display input (HMD geometry, IPD,
//! stereo mode, window viewport, distortion fit point, 2D overlay FOV) and
//! derives per-eye render parameters from them. Inputs only mark the cache
//! stale; the derived block is rebuilt in one pass the next time anything
//! derived is read, since aspect, distortion scale, FOV and the projection
//! matrices all feed into each other.
//!
//! Not thread safe: mutate and read from the render thread only.

use glam::Mat4;
use log::{debug, info, warn};

use crate::distortion::Distortion;
use crate::eye_params::StereoRenderParams;
use crate::hmd::HmdInfo;
use crate::viewport::Viewport;

/// Near clip plane of the 3D projection.
pub const Z_NEAR: f32 = 0.3;
/// Far clip plane of the 3D projection.
pub const Z_FAR: f32 = 1000.0;
/// Distance of the virtual plane the 2D overlay is drawn on, in meters.
pub const UI_PLANE_DISTANCE: f32 = 0.8;
/// Default field of view covered by the [-1,1] 2D overlay area.
pub const DEFAULT_AREA_2D_FOV_DEGREES: f32 = 85.0;

// Keeps the perspective matrix finite for degenerate screen geometry.
const MIN_PROJECTION_FOV: f32 = 0.01;

// Fit points closer than this to the center count as "no fit".
const FIT_EPSILON: f32 = 0.0001;

/// How the scene is split between the eyes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StereoMode {
    None,
    LeftRight,
}

/// Eye whose parameters are requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StereoEye {
    Center,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CacheState {
    Stale,
    Fresh,
}

pub struct StereoConfig {
    // Inputs
    mode: StereoMode,
    ipd: f32,
    aspect_multiplier: f32,
    hmd: HmdInfo,
    distortion: Distortion,
    // In [-1,1] half-screen viewport units.
    distortion_fit_x: f32,
    distortion_fit_y: f32,
    full_view: Viewport,
    area_2d_fov: f32,

    // Derived
    state: CacheState,
    recompute_count: u64,
    y_fov: f32,
    aspect: f32,
    projection_center_offset: f32,
    eye_params: [StereoRenderParams; 2],

    // 2D overlay
    fov_pixels: f32,
    ortho_center: Mat4,
    ortho_pixel_offset: f32,
}

impl StereoConfig {
    pub fn new(mode: StereoMode, full_viewport: Viewport) -> Self {
        let distortion = Distortion::default();

        let hmd = HmdInfo {
            distortion_k: [distortion.k[0], distortion.k[1], distortion.k[2]],
            ..HmdInfo::default()
        };

        Self {
            mode,
            ipd: HmdInfo::DEFAULT_IPD,
            aspect_multiplier: 1.0,
            hmd,
            distortion,
            // Fit the top of the image.
            distortion_fit_x: 0.0,
            distortion_fit_y: 1.0,
            full_view: full_viewport,
            area_2d_fov: DEFAULT_AREA_2D_FOV_DEGREES.to_radians(),
            state: CacheState::Stale,
            recompute_count: 0,
            y_fov: 0.0,
            aspect: full_viewport.aspect(),
            projection_center_offset: 0.0,
            eye_params: [StereoRenderParams::default(), StereoRenderParams::default()],
            fov_pixels: 0.0,
            ortho_center: Mat4::IDENTITY,
            ortho_pixel_offset: 0.0,
        }
    }

    // --- Inputs ---

    pub fn set_stereo_mode(&mut self, mode: StereoMode) {
        if mode != self.mode {
            info!("Stereo mode: {:?} -> {:?}", self.mode, mode);
        }
        self.mode = mode;
        self.mark_stale();
    }

    pub fn stereo_mode(&self) -> StereoMode {
        self.mode
    }

    /// Replaces the HMD snapshot; K0..K2 are copied into the distortion model.
    pub fn set_hmd_info(&mut self, hmd: HmdInfo) {
        info!(
            "HMD info: {}x{} px, {:.4}x{:.4} m, lens separation {:.4} m",
            hmd.h_resolution, hmd.v_resolution, hmd.h_screen_size, hmd.v_screen_size,
            hmd.lens_separation_distance
        );
        self.hmd = hmd;
        self.distortion.k[0] = hmd.distortion_k[0];
        self.distortion.k[1] = hmd.distortion_k[1];
        self.distortion.k[2] = hmd.distortion_k[2];
        self.mark_stale();
    }

    pub fn hmd_info(&self) -> &HmdInfo {
        &self.hmd
    }

    /// Eye-to-screen distance combines screen-to-lens and lens-to-pupil
    /// distances. Changing it changes the FOV.
    pub fn eye_to_screen_distance(&self) -> f32 {
        self.hmd.eye_to_screen_distance
    }

    pub fn set_eye_to_screen_distance(&mut self, esd: f32) {
        self.hmd.eye_to_screen_distance = esd;
        self.mark_stale();
    }

    /// Interpupillary distance in meters.
    pub fn set_ipd(&mut self, ipd: f32) {
        self.ipd = ipd;
        self.mark_stale();
    }

    pub fn ipd(&self) -> f32 {
        self.ipd
    }

    /// Full render target viewport; covers both eyes in stereo.
    pub fn set_full_viewport(&mut self, vp: Viewport) {
        if vp != self.full_view {
            self.full_view = vp;
            self.mark_stale();
        }
    }

    pub fn full_viewport(&self) -> Viewport {
        self.full_view
    }

    pub fn set_aspect_multiplier(&mut self, m: f32) {
        self.aspect_multiplier = m;
        self.mark_stale();
    }

    pub fn aspect_multiplier(&self) -> f32 {
        self.aspect_multiplier
    }

    /// Sets the point, in [-1,1] left-eye viewport units, at which the source
    /// and distorted images coincide. (0,0) disables fitting.
    pub fn set_distortion_fit_point_vp(&mut self, x: f32, y: f32) {
        self.distortion_fit_x = x;
        self.distortion_fit_y = y;
        self.mark_stale();
    }

    /// Same as [`set_distortion_fit_point_vp`](Self::set_distortion_fit_point_vp)
    /// with the point given in left-eye texture pixels.
    pub fn set_distortion_fit_point_pixels(&mut self, x: f32, y: f32) {
        let w = self.full_view.w as f32;
        let h = self.full_view.h as f32;
        self.distortion_fit_x = if w != 0.0 { 4.0 * x / w - 1.0 } else { 0.0 };
        self.distortion_fit_y = if h != 0.0 { 2.0 * y / h - 1.0 } else { 0.0 };
        self.mark_stale();
    }

    pub fn distortion_fit_point(&self) -> (f32, f32) {
        (self.distortion_fit_x, self.distortion_fit_y)
    }

    /// Replaces every distortion setting. Center offset and scale are
    /// recomputed from the HMD on the next read.
    pub fn set_distortion_config(&mut self, d: Distortion) {
        self.distortion = d;
        self.mark_stale();
    }

    pub fn set_distortion_k(&mut self, i: usize, k: f32) {
        match self.distortion.k.get_mut(i) {
            Some(slot) => {
                *slot = k;
                self.mark_stale();
            }
            None => warn!("Ignoring distortion coefficient K{}", i),
        }
    }

    pub fn distortion_k(&self, i: usize) -> f32 {
        self.distortion.k.get(i).copied().unwrap_or(0.0)
    }

    /// Field of view the [-1,1] 2D area stretches to.
    pub fn set_2d_area_fov(&mut self, fov_radians: f32) {
        self.area_2d_fov = fov_radians;
        self.mark_stale();
    }

    pub fn area_2d_fov(&self) -> f32 {
        self.area_2d_fov
    }

    // --- Derived state ---

    pub fn aspect(&mut self) -> f32 {
        self.update_if_dirty();
        self.aspect
    }

    pub fn y_fov_radians(&mut self) -> f32 {
        self.update_if_dirty();
        self.y_fov
    }

    pub fn y_fov_degrees(&mut self) -> f32 {
        self.y_fov_radians().to_degrees()
    }

    /// Horizontal projection center offset in one-eye [-1,1] viewport units.
    /// Positive for the left eye, negated for the right.
    pub fn projection_center_offset(&mut self) -> f32 {
        self.update_if_dirty();
        self.projection_center_offset
    }

    pub fn distortion_config(&mut self) -> &Distortion {
        self.update_if_dirty();
        &self.distortion
    }

    /// Factor by which the render texture is enlarged so the distorted
    /// result fills the viewport.
    pub fn distortion_scale(&mut self) -> f32 {
        self.update_if_dirty();
        self.distortion.scale
    }

    /// Size of one screen pixel in 2D overlay units.
    pub fn unit_pixel_2d(&mut self) -> f32 {
        self.update_if_dirty();
        let denom = self.fov_pixels * self.distortion.effective_scale();
        if denom > 0.0 {
            2.0 / denom
        } else {
            0.0
        }
    }

    pub fn eye_render_params(&mut self, eye: StereoEye) -> &StereoRenderParams {
        self.update_if_dirty();
        let index = match (self.mode, eye) {
            (StereoMode::None, _) => 0,
            (StereoMode::LeftRight, StereoEye::Center | StereoEye::Left) => 0,
            (StereoMode::LeftRight, StereoEye::Right) => 1,
        };
        &self.eye_params[index]
    }

    /// Number of times the derived block has been rebuilt.
    pub fn recompute_count(&self) -> u64 {
        self.recompute_count
    }

    pub fn is_stale(&self) -> bool {
        self.state == CacheState::Stale
    }

    // --- Recompute ---

    fn mark_stale(&mut self) {
        self.state = CacheState::Stale;
    }

    fn update_if_dirty(&mut self) {
        if self.state == CacheState::Stale {
            self.update_computed_state();
        }
    }

    fn update_computed_state(&mut self) {
        // Stereo halves the width available to each eye.
        self.aspect = self.full_view.aspect();
        self.aspect *= if self.mode == StereoMode::None {
            1.0
        } else {
            0.5
        };
        self.aspect *= self.aspect_multiplier;

        self.update_distortion_offset_and_scale();

        // Distance from the vertical center to the render edge as perceived
        // through the lens; larger than the screen due to magnification.
        let perceived_half_screen = (self.hmd.v_screen_size / 2.0) * self.distortion.scale;
        self.y_fov = 2.0 * perceived_half_screen.atan2(self.hmd.eye_to_screen_distance);

        self.update_projection_offset();
        self.update_2d();
        self.update_eye_params();

        self.recompute_count += 1;
        self.state = CacheState::Fresh;

        debug!(
            "Stereo recompute #{}: aspect={:.4} yfov={:.2}deg scale={:.4} proj_offset={:.4}",
            self.recompute_count,
            self.aspect,
            self.y_fov.to_degrees(),
            self.distortion.scale,
            self.projection_center_offset
        );
    }

    fn update_distortion_offset_and_scale(&mut self) {
        // Lens center shift depends only on the optics, not on the IPD.
        let h_size = self.hmd.h_screen_size;
        self.distortion.x_center_offset = if h_size != 0.0 {
            let lens_offset = self.hmd.lens_separation_distance * 0.5;
            let lens_shift = h_size * 0.25 - lens_offset;
            4.0 * lens_shift / h_size
        } else {
            debug!("Zero screen width, lens center offset cleared");
            0.0
        };

        if self.distortion_fit_x.abs() < FIT_EPSILON && self.distortion_fit_y.abs() < FIT_EPSILON {
            self.distortion.scale = 1.0;
            return;
        }

        // Distortion-centered coordinates of the fit point.
        let stereo_aspect = 0.5 * self.full_view.aspect();
        let dx = self.distortion_fit_x - self.distortion.x_center_offset;
        let dy = if stereo_aspect != 0.0 {
            self.distortion_fit_y / stereo_aspect
        } else {
            self.distortion_fit_y
        };
        let fit_radius = (dx * dx + dy * dy).sqrt();

        let scale = if fit_radius < FIT_EPSILON {
            1.0
        } else {
            self.distortion.calc_scale_for_fit_radius(fit_radius)
        };
        self.distortion.scale = if scale.is_finite() { scale } else { 1.0 };
    }

    fn update_projection_offset(&mut self) {
        // Post-projection x spans [-1,1] with the left viewport center at a
        // quarter of the screen width. Shift it onto the eye center, computed
        // in meters and then rescaled to viewport units.
        let h_size = self.hmd.h_screen_size;
        self.projection_center_offset = if h_size != 0.0 {
            let view_center = h_size * 0.25;
            let eye_projection_shift = view_center - self.ipd * 0.5;
            4.0 * eye_projection_shift / h_size
        } else {
            0.0
        };
    }

    fn update_2d(&mut self) {
        // The orthographic projection fakes a screen at UI_PLANE_DISTANCE
        // while the HMD screen sits a few centimeters from the eye, which
        // adds an off-center shift proportional to the eye separation.
        let eye_distance_screen_pixels = self.hmd.h_pixels_per_meter() * self.ipd;
        let off_center_shift_pixels =
            (self.hmd.eye_to_screen_distance / UI_PLANE_DISTANCE) * eye_distance_screen_pixels;
        let left_pixel_center =
            (self.hmd.h_resolution / 2) as f32 - eye_distance_screen_pixels / 2.0;
        let right_pixel_center = eye_distance_screen_pixels / 2.0;
        let pixel_difference = left_pixel_center - right_pixel_center;

        // Pixels within the 2D FOV, after distortion scaling.
        let scale = self.distortion.effective_scale();
        let perceived_half_screen =
            (self.area_2d_fov * 0.5).tan() * self.hmd.eye_to_screen_distance;
        let vfov_size = 2.0 * perceived_half_screen / scale;
        self.fov_pixels = if self.hmd.v_screen_size != 0.0 {
            self.hmd.v_resolution as f32 * vfov_size / self.hmd.v_screen_size
        } else {
            0.0
        };

        let half_w = self.full_view.w as f32 * 0.5;
        let h = self.full_view.h as f32;
        let sx = if half_w != 0.0 {
            self.fov_pixels / half_w
        } else {
            0.0
        };
        let sy = if h != 0.0 { -self.fov_pixels / h } else { 0.0 };
        self.ortho_center = Mat4::from_diagonal(glam::Vec4::new(sx, sy, 0.0, 1.0));

        let ortho_pixel_offset = (pixel_difference + off_center_shift_pixels / scale) * 0.5;
        self.ortho_pixel_offset = if self.fov_pixels != 0.0 {
            ortho_pixel_offset * 2.0 / self.fov_pixels
        } else {
            0.0
        };
    }

    fn update_eye_params(&mut self) {
        // Center eye projection; left/right are shifted copies of it.
        let aspect = if self.aspect > 0.0 && self.aspect.is_finite() {
            self.aspect
        } else {
            1.0
        };
        let fov = self.y_fov.clamp(
            MIN_PROJECTION_FOV,
            std::f32::consts::PI - MIN_PROJECTION_FOV,
        );
        let proj_center = Mat4::perspective_rh(fov, aspect, Z_NEAR, Z_FAR);

        match self.mode {
            StereoMode::None => {
                self.eye_params[0] = StereoRenderParams::new(
                    StereoEye::Center,
                    self.full_view,
                    0.0,
                    proj_center,
                    self.ortho_center,
                    None,
                );
            }
            StereoMode::LeftRight => {
                let offset = self.projection_center_offset;
                let (left_vp, right_vp) = self.full_view.split_left_right();
                let half_ipd = self.ipd * 0.5;

                let mut left = StereoRenderParams::new(
                    StereoEye::Left,
                    left_vp,
                    half_ipd,
                    translation_x(offset) * proj_center,
                    self.ortho_center * translation_x(self.ortho_pixel_offset),
                    Some(self.distortion),
                );
                left.projection_center_offset = offset;

                let mut right = StereoRenderParams::new(
                    StereoEye::Right,
                    right_vp,
                    -half_ipd,
                    translation_x(-offset) * proj_center,
                    self.ortho_center * translation_x(-self.ortho_pixel_offset),
                    Some(self.distortion),
                );
                right.projection_center_offset = -offset;

                self.eye_params = [left, right];
            }
        }
    }
}

impl Default for StereoConfig {
    fn default() -> Self {
        Self::new(StereoMode::None, Viewport::new(0, 0, 1280, 800))
    }
}

fn translation_x(x: f32) -> Mat4 {
    Mat4::from_translation(glam::Vec3::new(x, 0.0, 0.0))
}
