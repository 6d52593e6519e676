//! HMD Stereo - stereo rendering parameters and lens distortion correction
//!
//! Converts physical HMD measurements (screen size, lens separation,
//! eye-to-screen distance, IPD) into per-eye viewports, projections and
//! distortion shader parameters, and runs the full-screen warp pass that
//! counteracts the lens distortion.
//!
//! Typical frame:
//! ```no_run
//! use hmd_stereo::{
//!     backend::headless::HeadlessBackend, DistortionRenderPass, PostProcess, StereoConfig,
//!     StereoEye, StereoMode, Viewport,
//! };
//!
//! let mut config = StereoConfig::new(StereoMode::LeftRight, Viewport::new(0, 0, 1280, 800));
//! let mut pass = DistortionRenderPass::new(HeadlessBackend::new(), 1280, 800);
//! pass.set_scene_render_scale(config.distortion_scale());
//!
//! for eye in [StereoEye::Left, StereoEye::Right] {
//!     pass.begin_frame(PostProcess::Distortion);
//!     config.eye_render_params(eye).apply(&mut pass);
//!     // draw the scene with the eye's view_adjust * view
//!     pass.end_frame();
//! }
//! ```

use std::sync::Once;

use log::info;

pub mod backend;
pub mod distortion;
pub mod eye_params;
pub mod hmd;
pub mod post_process;
pub mod renderer;
pub mod stereo;
pub mod tuning;
pub mod viewport;

pub use distortion::Distortion;
pub use eye_params::StereoRenderParams;
pub use hmd::HmdInfo;
pub use post_process::{DistortionRenderPass, PostProcess, WarpUniforms};
pub use stereo::{StereoConfig, StereoEye, StereoMode};
pub use viewport::Viewport;

static LOGGER_INIT: Once = Once::new();

/// Installs the platform logger once; later calls do nothing.
pub fn init_logging() {
    LOGGER_INIT.call_once(|| {
        #[cfg(target_os = "android")]
        android_logger::init_once(
            android_logger::Config::default()
                .with_max_level(log::LevelFilter::Info)
                .with_tag("HmdStereo"),
        );

        #[cfg(not(target_os = "android"))]
        {
            let _ = env_logger::Builder::from_env(
                env_logger::Env::default().default_filter_or("info"),
            )
            .try_init();
        }

        info!("HMD stereo logging initialized");
    });
}
