//! Renderer backend protocol.
//!
//! The stereo core never talks to a graphics API directly. A backend creates
//! off-screen color targets, routes drawing to them or to the presentation
//! target, and draws the full-screen warp quad. `crate::renderer` implements
//! it on wgpu; `headless` records calls for tests and CI.

use glam::Mat4;

use crate::post_process::WarpUniforms;
use crate::viewport::Viewport;

pub mod headless;

/// Handle to an off-screen color target owned by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderTarget {
    pub id: u32,
    pub width: u32,
    pub height: u32,
}

pub trait RenderBackend {
    /// Allocates a color target that can be rendered into and sampled.
    fn create_render_target(&mut self, width: u32, height: u32) -> anyhow::Result<RenderTarget>;

    fn release_render_target(&mut self, target: RenderTarget);

    /// Routes subsequent drawing to `target`, or to the presentation target for `None`.
    fn set_render_target(&mut self, target: Option<RenderTarget>);

    /// Sets the viewport in pixels of the current render target, with no
    /// stereo or render-scale adjustment.
    fn set_real_viewport(&mut self, viewport: Viewport);

    fn set_projection(&mut self, projection: &Mat4);

    /// Clears the current viewport of the current render target.
    fn clear(&mut self, color: [f32; 4]);

    /// Draws a quad over the current viewport sampling `source` through the
    /// warp shader.
    fn draw_full_screen_quad(&mut self, source: RenderTarget, uniforms: &WarpUniforms);
}
