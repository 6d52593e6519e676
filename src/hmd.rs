//! Physical description of the head-mounted display.
//!
//! A snapshot is pushed by the device layer whenever a display is detected;
//! `HmdInfo::default()` stands in when nothing is attached.

/// HMD screen, lens and distortion measurements. Lengths are in meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HmdInfo {
    pub h_resolution: u32,
    pub v_resolution: u32,
    pub h_screen_size: f32,
    pub v_screen_size: f32,
    pub lens_separation_distance: f32,
    pub eye_to_screen_distance: f32,
    /// Interpupillary distance reported by the device profile.
    pub interpupillary_distance: f32,
    pub distortion_k: [f32; 3],
}

impl HmdInfo {
    pub const DEFAULT_IPD: f32 = 0.064;

    /// Pixels per meter across the screen width; 0 for a degenerate screen.
    pub fn h_pixels_per_meter(&self) -> f32 {
        if self.h_screen_size > 0.0 {
            self.h_resolution as f32 / self.h_screen_size
        } else {
            0.0
        }
    }
}

impl Default for HmdInfo {
    // Fake 7" 1280x800 panel used for testing without a device plugged in.
    fn default() -> Self {
        let h_screen_size = Self::DEFAULT_IPD * 2.0;
        Self {
            h_resolution: 1280,
            v_resolution: 800,
            h_screen_size,
            v_screen_size: h_screen_size / (1280.0 / 800.0),
            lens_separation_distance: 0.064,
            eye_to_screen_distance: 0.047,
            interpupillary_distance: Self::DEFAULT_IPD,
            distortion_k: [1.0, 0.18, 0.115],
        }
    }
}
