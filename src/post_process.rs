//! Lens distortion post-process
//!
//! While warping, 3D drawing goes into an off-screen color target sized
//! `ceil(scene_render_scale * window)`. `end_frame` switches back to the
//! presentation target and draws one full-screen quad that samples the
//! off-screen target through the distortion polynomial.
//!
//! If the target cannot be allocated the frame is rendered directly,
//! unwarped; allocation is retried on the next `begin_frame`.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};
use log::{debug, info, warn};

use crate::backend::{RenderBackend, RenderTarget};
use crate::distortion::Distortion;
use crate::viewport::Viewport;

/// Post-processing requested for a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostProcess {
    None,
    Distortion,
}

// Warp shader uniforms; layout matches `Warp` in shaders/distortion.wgsl.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct WarpUniforms {
    pub lens_center: [f32; 2],
    pub screen_center: [f32; 2],
    pub scale: [f32; 2],
    pub scale_in: [f32; 2],
    pub viewport_half: [f32; 2],
    pub padding: [f32; 2],
    pub hmd_warp_param: [f32; 4],
    pub tex_matrix: [[f32; 4]; 4],
    pub clear_color: [f32; 4],
}

impl WarpUniforms {
    /// Uniforms for warping `viewport` of a `window_size` presentation
    /// target. All positions are normalized to the window.
    pub fn compute(
        viewport: Viewport,
        window_size: (u32, u32),
        distortion: &Distortion,
        clear_color: [f32; 4],
    ) -> Self {
        let win_w = window_size.0.max(1) as f32;
        let win_h = window_size.1.max(1) as f32;
        let w = viewport.w as f32 / win_w;
        let h = viewport.h as f32 / win_h;
        let x = viewport.x as f32 / win_w;
        let y = viewport.y as f32 / win_h;

        let aspect = viewport.aspect();
        let scale_factor = 1.0 / distortion.effective_scale();
        let inv = |v: f32| if v != 0.0 { 2.0 / v } else { 0.0 };

        // The center offset is in [-1,1] eye units, which map to a quarter
        // of the normalized window width per unit.
        let lens_center = [x + (w + distortion.x_center_offset * 0.5) * 0.5, y + h * 0.5];
        let tex_matrix = Mat4::from_cols(
            Vec4::new(w, 0.0, 0.0, 0.0),
            Vec4::new(0.0, h, 0.0, 0.0),
            Vec4::ZERO,
            Vec4::new(x, y, 0.0, 1.0),
        );

        Self {
            lens_center,
            screen_center: [x + w * 0.5, y + h * 0.5],
            scale: [(w / 2.0) * scale_factor, (h / 2.0) * scale_factor * aspect],
            scale_in: [inv(w), inv(h) / aspect],
            viewport_half: [w * 0.5, h * 0.5],
            padding: [0.0; 2],
            hmd_warp_param: distortion.k,
            tex_matrix: tex_matrix.to_cols_array_2d(),
            clear_color,
        }
    }
}

/// Drives a backend through the direct or warped rendering of a frame.
pub struct DistortionRenderPass<B: RenderBackend> {
    backend: B,
    window_size: (u32, u32),
    viewport: Viewport,
    projection: Mat4,
    current: PostProcess,
    scene_target: Option<RenderTarget>,
    scene_render_scale: f32,
    distortion: Distortion,
    clear_color: [f32; 4],
}

impl<B: RenderBackend> DistortionRenderPass<B> {
    pub fn new(backend: B, window_width: u32, window_height: u32) -> Self {
        Self {
            backend,
            window_size: (window_width, window_height),
            viewport: Viewport::new(0, 0, window_width as i32, window_height as i32),
            projection: Mat4::IDENTITY,
            current: PostProcess::None,
            scene_target: None,
            scene_render_scale: 1.0,
            distortion: Distortion::default(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn window_size(&self) -> (u32, u32) {
        self.window_size
    }

    /// Drops the cached scene target if the size changed; it is recreated
    /// at the next warped frame.
    pub fn set_window_size(&mut self, width: u32, height: u32) {
        if (width, height) != self.window_size {
            self.window_size = (width, height);
            self.release_scene_target();
        }
    }

    /// Render texture oversampling, normally `StereoConfig::distortion_scale`.
    pub fn set_scene_render_scale(&mut self, scale: f32) {
        if scale != self.scene_render_scale {
            self.scene_render_scale = scale;
            self.release_scene_target();
        }
    }

    pub fn scene_render_scale(&self) -> f32 {
        self.scene_render_scale
    }

    /// Color shown around the warped image.
    pub fn set_distortion_clear_color(&mut self, color: [f32; 4]) {
        self.clear_color = color;
    }

    pub fn set_distortion_config(&mut self, distortion: Distortion) {
        self.distortion = distortion;
    }

    pub fn distortion_config(&self) -> &Distortion {
        &self.distortion
    }

    /// Sets the logical viewport. While warping, the backend receives it
    /// scaled by the scene render scale.
    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
        let real = if self.current == PostProcess::Distortion {
            viewport.scaled(self.scene_render_scale)
        } else {
            viewport
        };
        self.backend.set_real_viewport(real);
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn set_projection(&mut self, projection: Mat4) {
        self.projection = projection;
        self.backend.set_projection(&projection);
    }

    pub fn is_warping(&self) -> bool {
        self.current == PostProcess::Distortion
    }

    pub fn scene_target(&self) -> Option<RenderTarget> {
        self.scene_target
    }

    /// Starts a frame. With `PostProcess::Distortion`, 3D drawing is routed
    /// to the off-screen target; on allocation failure the frame falls back
    /// to direct rendering.
    pub fn begin_frame(&mut self, post_process: PostProcess) {
        self.current = match post_process {
            PostProcess::Distortion if self.ensure_scene_target() => PostProcess::Distortion,
            _ => PostProcess::None,
        };

        match (self.current, self.scene_target) {
            (PostProcess::Distortion, Some(target)) => {
                self.backend.set_render_target(Some(target));
                self.set_viewport(self.viewport);
            }
            _ => self.backend.set_render_target(None),
        }
        self.backend.set_projection(&self.projection);
    }

    /// Finishes a frame, running the warp pass when the frame was warped.
    pub fn end_frame(&mut self) {
        if self.current == PostProcess::None {
            return;
        }
        let Some(target) = self.scene_target else {
            self.current = PostProcess::None;
            return;
        };

        self.backend.set_render_target(None);
        self.backend.set_real_viewport(self.viewport);
        self.backend.clear(self.clear_color);
        let uniforms = self.warp_uniforms();
        self.backend.draw_full_screen_quad(target, &uniforms);

        self.current = PostProcess::None;
    }

    /// Uniforms for warping the current viewport.
    pub fn warp_uniforms(&self) -> WarpUniforms {
        WarpUniforms::compute(
            self.viewport,
            self.window_size,
            &self.distortion,
            self.clear_color,
        )
    }

    fn scaled_target_size(&self) -> (u32, u32) {
        let s = |v: u32| (self.scene_render_scale * v as f32).ceil().max(0.0) as u32;
        (s(self.window_size.0), s(self.window_size.1))
    }

    fn ensure_scene_target(&mut self) -> bool {
        let (w, h) = self.scaled_target_size();
        if let Some(target) = self.scene_target {
            if target.width == w && target.height == h {
                return true;
            }
            self.release_scene_target();
        }

        match self.backend.create_render_target(w, h) {
            Ok(target) => {
                info!(
                    "Scene render target {}x{} (scale {:.3})",
                    w, h, self.scene_render_scale
                );
                self.scene_target = Some(target);
                true
            }
            Err(e) => {
                warn!(
                    "Scene render target {}x{} unavailable, rendering unwarped: {:#}",
                    w, h, e
                );
                false
            }
        }
    }

    fn release_scene_target(&mut self) {
        if let Some(target) = self.scene_target.take() {
            debug!("Releasing scene render target {}", target.id);
            self.backend.release_render_target(target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{Command, HeadlessBackend};
    use approx::assert_relative_eq;

    fn pass() -> DistortionRenderPass<HeadlessBackend> {
        DistortionRenderPass::new(HeadlessBackend::new(), 1280, 800)
    }

    #[test]
    fn test_uniform_layout() {
        assert_eq!(std::mem::size_of::<WarpUniforms>(), 144);
    }

    #[test]
    fn test_direct_frame() {
        let mut p = pass();
        p.begin_frame(PostProcess::None);
        p.end_frame();
        let cmds = p.backend().commands();
        assert_eq!(cmds[0], Command::SetRenderTarget(None));
        assert_eq!(p.backend().warp_draws(), 0);
        assert_eq!(p.backend().allocation_attempts(), 0);
    }

    #[test]
    fn test_warped_frame_allocates_scaled_target() {
        let mut p = pass();
        p.set_scene_render_scale(1.5);
        p.begin_frame(PostProcess::Distortion);
        assert!(p.is_warping());
        let target = p.scene_target().unwrap();
        assert_eq!((target.width, target.height), (1920, 1200));

        p.set_viewport(Viewport::new(0, 0, 640, 800));
        assert_eq!(
            p.backend().commands().last(),
            Some(&Command::SetViewport(Viewport::new(0, 0, 960, 1200)))
        );

        p.end_frame();
        assert!(!p.is_warping());
        let cmds = p.backend().commands();
        let n = cmds.len();
        assert_eq!(cmds[n - 4], Command::SetRenderTarget(None));
        assert_eq!(
            cmds[n - 3],
            Command::SetViewport(Viewport::new(0, 0, 640, 800))
        );
        assert_eq!(cmds[n - 2], Command::Clear([0.0, 0.0, 0.0, 1.0]));
        assert!(
            matches!(cmds[n - 1], Command::DrawFullScreenQuad { source, .. } if source == target.id)
        );
    }

    #[test]
    fn test_target_reused_until_invalidated() {
        let mut p = pass();
        p.begin_frame(PostProcess::Distortion);
        p.end_frame();
        p.begin_frame(PostProcess::Distortion);
        p.end_frame();
        assert_eq!(p.backend().allocation_attempts(), 1);

        p.set_scene_render_scale(1.25);
        assert!(p.scene_target().is_none());
        p.begin_frame(PostProcess::Distortion);
        assert_eq!(p.backend().allocation_attempts(), 2);
        assert_eq!(p.backend().live_targets().len(), 1);

        p.set_window_size(1920, 1080);
        assert!(p.backend().live_targets().is_empty());
    }

    #[test]
    fn test_allocation_failure_falls_back_and_retries() {
        let mut p = pass();
        p.backend_mut().fail_allocations = true;
        p.begin_frame(PostProcess::Distortion);
        assert!(!p.is_warping());
        assert!(p.backend().commands().contains(&Command::SetRenderTarget(None)));
        p.end_frame();
        assert_eq!(p.backend().warp_draws(), 0);

        p.backend_mut().fail_allocations = false;
        p.begin_frame(PostProcess::Distortion);
        assert!(p.is_warping());
        p.end_frame();
        assert_eq!(p.backend().warp_draws(), 1);
    }

    #[test]
    fn test_uniforms_for_left_eye() {
        let mut d = Distortion::new(1.0, 0.22, 0.24, 0.0);
        d.x_center_offset = 0.1;
        d.scale = 2.0;
        let u = WarpUniforms::compute(Viewport::new(0, 0, 640, 800), (1280, 800), &d, [0.0; 4]);

        assert_relative_eq!(u.lens_center[0], (0.5 + 0.05) * 0.5);
        assert_relative_eq!(u.lens_center[1], 0.5);
        assert_eq!(u.screen_center, [0.25, 0.5]);
        assert_relative_eq!(u.scale[0], 0.125);
        assert_relative_eq!(u.scale[1], 0.25 * 0.8);
        assert_relative_eq!(u.scale_in[0], 4.0);
        assert_relative_eq!(u.scale_in[1], 2.0 / 0.8);
        assert_eq!(u.hmd_warp_param, [1.0, 0.22, 0.24, 0.0]);
        assert_eq!(u.viewport_half, [0.25, 0.5]);
    }

    #[test]
    fn test_tex_matrix_maps_to_eye_region() {
        let d = Distortion::default();
        let u = WarpUniforms::compute(Viewport::new(640, 0, 640, 800), (1280, 800), &d, [0.0; 4]);
        let m = Mat4::from_cols_array_2d(&u.tex_matrix);
        let corner = m * Vec4::new(1.0, 1.0, 0.0, 1.0);
        assert_eq!((corner.x, corner.y), (1.0, 1.0));
        let origin = m * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert_eq!((origin.x, origin.y), (0.5, 0.0));
    }

    #[test]
    fn test_zero_scale_treated_as_disabled() {
        let mut d = Distortion::default();
        d.scale = 0.0;
        let u = WarpUniforms::compute(Viewport::new(0, 0, 640, 800), (1280, 800), &d, [0.0; 4]);
        assert!(u.scale.iter().all(|v| v.is_finite()));
        assert_relative_eq!(u.scale[0], 0.25);
    }
}
