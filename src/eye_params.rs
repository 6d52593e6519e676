//! Per-eye render parameters produced by `StereoConfig`.

use glam::{Mat4, Vec3};

use crate::backend::RenderBackend;
use crate::distortion::Distortion;
use crate::post_process::DistortionRenderPass;
use crate::stereo::StereoEye;
use crate::viewport::Viewport;

/// Everything the renderer needs to draw the scene for one eye.
#[derive(Debug, Clone, PartialEq)]
pub struct StereoRenderParams {
    pub eye: StereoEye,
    /// Viewport that we are rendering to.
    pub viewport: Viewport,
    pub projection_center_offset: f32,
    /// Shared distortion model; the right-eye mirror is applied in
    /// [`apply_distortion`](Self::apply_distortion).
    pub distortion: Option<Distortion>,
    /// Translation applied to the view matrix (half IPD).
    pub view_adjust: Mat4,
    pub projection: Mat4,
    /// Orthographic projection for the 2D overlay.
    pub ortho_projection: Mat4,
}

impl StereoRenderParams {
    pub fn new(
        eye: StereoEye,
        viewport: Viewport,
        view_offset: f32,
        projection: Mat4,
        ortho_projection: Mat4,
        distortion: Option<Distortion>,
    ) -> Self {
        Self {
            eye,
            viewport,
            projection_center_offset: 0.0,
            distortion,
            view_adjust: Mat4::from_translation(Vec3::new(view_offset, 0.0, 0.0)),
            projection,
            ortho_projection,
        }
    }

    /// Sets viewport and 3D projection on the pass, then the distortion.
    pub fn apply<B: RenderBackend>(&self, pass: &mut DistortionRenderPass<B>) {
        pass.set_viewport(self.viewport);
        pass.set_projection(self.projection);
        self.apply_distortion(pass);
    }

    /// Same as [`apply`](Self::apply) with the 2D orthographic projection.
    pub fn apply_2d<B: RenderBackend>(&self, pass: &mut DistortionRenderPass<B>) {
        pass.set_viewport(self.viewport);
        pass.set_projection(self.ortho_projection);
        self.apply_distortion(pass);
    }

    /// Pushes this eye's view of the distortion model. Returns false when the
    /// eye has no distortion (mono rendering).
    pub fn apply_distortion<B: RenderBackend>(&self, pass: &mut DistortionRenderPass<B>) -> bool {
        match self.eye_distortion() {
            Some(dc) => {
                pass.set_distortion_config(dc);
                true
            }
            None => false,
        }
    }

    pub fn eye_distortion(&self) -> Option<Distortion> {
        self.distortion.map(|d| d.for_eye(self.eye))
    }
}

impl Default for StereoRenderParams {
    fn default() -> Self {
        Self::new(
            StereoEye::Center,
            Viewport::default(),
            0.0,
            Mat4::IDENTITY,
            Mat4::IDENTITY,
            None,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{Command, HeadlessBackend};

    fn eye(eye: StereoEye, x_center_offset: f32) -> StereoRenderParams {
        let mut d = Distortion::default();
        d.x_center_offset = x_center_offset;
        StereoRenderParams::new(
            eye,
            Viewport::new(640, 0, 640, 800),
            -0.032,
            Mat4::from_scale(Vec3::splat(2.0)),
            Mat4::from_scale(Vec3::splat(3.0)),
            Some(d),
        )
    }

    #[test]
    fn test_apply_order() {
        let mut pass = DistortionRenderPass::new(HeadlessBackend::new(), 1280, 800);
        let params = eye(StereoEye::Right, 0.1);
        params.apply(&mut pass);

        let cmds = pass.backend().commands();
        assert_eq!(cmds[0], Command::SetViewport(params.viewport));
        assert_eq!(cmds[1], Command::SetProjection(params.projection));
        assert_eq!(pass.distortion_config().x_center_offset, -0.1);
        // Shared model untouched.
        assert_eq!(params.distortion.map(|d| d.x_center_offset), Some(0.1));
    }

    #[test]
    fn test_apply_2d_uses_ortho() {
        let mut pass = DistortionRenderPass::new(HeadlessBackend::new(), 1280, 800);
        let params = eye(StereoEye::Left, 0.1);
        params.apply_2d(&mut pass);
        assert!(pass
            .backend()
            .commands()
            .contains(&Command::SetProjection(params.ortho_projection)));
        assert_eq!(pass.distortion_config().x_center_offset, 0.1);
    }

    #[test]
    fn test_mono_has_no_distortion() {
        let mut pass = DistortionRenderPass::new(HeadlessBackend::new(), 1280, 800);
        let params = StereoRenderParams::default();
        assert!(!params.apply_distortion(&mut pass));
    }

    #[test]
    fn test_view_adjust_translation() {
        let params = eye(StereoEye::Right, 0.0);
        let p = params.view_adjust.transform_point3(Vec3::ZERO);
        assert_eq!(p, Vec3::new(-0.032, 0.0, 0.0));
    }
}
