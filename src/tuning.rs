//! Interactive calibration adjustments
//!
//! Rate-based tweaks driven by held keys or gamepad buttons while wearing
//! the HMD. Each adjustment returns a short message for an on-screen toast.

use log::info;

use crate::post_process::PostProcess;
use crate::stereo::{StereoConfig, StereoMode};

/// IPD change per second of adjustment, in meters.
pub const IPD_RATE: f32 = 0.0025;
/// Eye-to-screen distance change per second, in meters.
pub const EYE_TO_SCREEN_RATE: f32 = 0.01;
/// Aspect ratio change per second.
pub const ASPECT_RATE: f32 = 0.01;
/// Distortion coefficient change per second.
pub const DISTORTION_K_RATE: f32 = 0.03;

// Screens wider than 7" are fit at their left edge, smaller ones at the top.
const WIDE_SCREEN_SIZE: f32 = 0.140;

/// Preset combinations of stereo split and warp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    /// Single view, no warp.
    Mono,
    /// Left/right split without distortion correction.
    Stereo,
    /// Left/right split with the distortion warp.
    StereoHmd,
}

impl DisplayMode {
    pub fn stereo_mode(self) -> StereoMode {
        match self {
            DisplayMode::Mono => StereoMode::None,
            DisplayMode::Stereo | DisplayMode::StereoHmd => StereoMode::LeftRight,
        }
    }

    pub fn post_process(self) -> PostProcess {
        match self {
            DisplayMode::StereoHmd => PostProcess::Distortion,
            _ => PostProcess::None,
        }
    }

    /// Applies the stereo split to `config` and returns the post-process to
    /// use for subsequent frames.
    pub fn apply(self, config: &mut StereoConfig) -> PostProcess {
        config.set_stereo_mode(self.stereo_mode());
        info!("Display mode: {:?}", self);
        self.post_process()
    }

    pub fn label(self) -> &'static str {
        match self {
            DisplayMode::Mono => "StereoMode: None",
            DisplayMode::Stereo => "StereoMode: Stereo + No Distortion",
            DisplayMode::StereoHmd => "StereoMode: Stereo + Distortion",
        }
    }
}

pub fn adjust_ipd(config: &mut StereoConfig, dt: f32) -> String {
    config.set_ipd(config.ipd() + IPD_RATE * dt);
    format!("EyeDistance: {:6.4}", config.ipd())
}

pub fn adjust_eye_to_screen_distance(config: &mut StereoConfig, dt: f32) -> String {
    let esd = config.eye_to_screen_distance() + EYE_TO_SCREEN_RATE * dt;
    config.set_eye_to_screen_distance(esd);
    format!("ESD:{:6.3}  FOV: {:6.3}", esd, config.y_fov_degrees())
}

/// Changes the effective aspect ratio through the aspect multiplier.
pub fn adjust_aspect(config: &mut StereoConfig, dt: f32) -> String {
    let multiplier = config.aspect_multiplier();
    let aspect = config.aspect();
    let raw_aspect = if multiplier != 0.0 {
        aspect / multiplier
    } else {
        aspect
    };
    let new_aspect = aspect + ASPECT_RATE * dt;
    if raw_aspect != 0.0 {
        config.set_aspect_multiplier(new_aspect / raw_aspect);
    }
    format!("Aspect: {:6.3}", new_aspect)
}

pub fn adjust_distortion_k(config: &mut StereoConfig, index: usize, dt: f32) -> String {
    config.set_distortion_k(index, config.distortion_k(index) + DISTORTION_K_RATE * dt);
    format!("K{}: {:6.4}", index, config.distortion_k(index))
}

/// Switches between fitting the distorted image to the screen edge and no
/// fit at all.
pub fn toggle_distortion_fit(config: &mut StereoConfig) -> String {
    if config.distortion_scale() == 1.0 {
        if config.hmd_info().h_screen_size > WIDE_SCREEN_SIZE {
            config.set_distortion_fit_point_vp(-1.0, 0.0);
        } else {
            config.set_distortion_fit_point_vp(0.0, 1.0);
        }
    } else {
        config.set_distortion_fit_point_vp(0.0, 0.0);
    }
    format!("DistortionScale: {:6.4}", config.distortion_scale())
}

/// Tunable values saved before an adjustment session, so they can be
/// restored if the result looks wrong.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TuningSnapshot {
    pub k: [f32; 4],
    pub eye_to_screen_distance: f32,
    pub aspect_multiplier: f32,
    pub ipd: f32,
}

impl TuningSnapshot {
    pub fn capture(config: &StereoConfig) -> Self {
        Self {
            k: std::array::from_fn(|i| config.distortion_k(i)),
            eye_to_screen_distance: config.eye_to_screen_distance(),
            aspect_multiplier: config.aspect_multiplier(),
            ipd: config.ipd(),
        }
    }

    pub fn restore(&self, config: &mut StereoConfig) {
        for (i, k) in self.k.iter().enumerate() {
            config.set_distortion_k(i, *k);
        }
        config.set_eye_to_screen_distance(self.eye_to_screen_distance);
        config.set_aspect_multiplier(self.aspect_multiplier);
        config.set_ipd(self.ipd);
    }
}
