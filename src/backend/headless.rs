//! Headless backend: records protocol calls instead of drawing.
//!
//! Used by tests and CI runs without a GPU. Allocation failures can be
//! injected to exercise the direct-rendering fallback.

use glam::Mat4;
use log::debug;

use super::{RenderBackend, RenderTarget};
use crate::post_process::WarpUniforms;
use crate::viewport::Viewport;

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    CreateTarget { id: u32, width: u32, height: u32 },
    ReleaseTarget(u32),
    SetRenderTarget(Option<u32>),
    SetViewport(Viewport),
    SetProjection(Mat4),
    Clear([f32; 4]),
    DrawFullScreenQuad { source: u32, uniforms: WarpUniforms },
}

#[derive(Debug)]
pub struct HeadlessBackend {
    commands: Vec<Command>,
    next_id: u32,
    live_targets: Vec<RenderTarget>,
    /// Largest width/height accepted by `create_render_target`.
    pub max_target_size: u32,
    /// When set, every allocation fails.
    pub fail_allocations: bool,
    allocation_attempts: u32,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
            next_id: 1,
            live_targets: Vec::new(),
            max_target_size: 8192,
            fail_allocations: false,
            allocation_attempts: 0,
        }
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Returns and clears the recorded commands.
    pub fn take_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    pub fn live_targets(&self) -> &[RenderTarget] {
        &self.live_targets
    }

    pub fn allocation_attempts(&self) -> u32 {
        self.allocation_attempts
    }

    /// Number of warp draws recorded so far.
    pub fn warp_draws(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, Command::DrawFullScreenQuad { .. }))
            .count()
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderBackend for HeadlessBackend {
    fn create_render_target(&mut self, width: u32, height: u32) -> anyhow::Result<RenderTarget> {
        self.allocation_attempts += 1;
        if self.fail_allocations {
            anyhow::bail!(
                "headless allocation of {}x{} target disabled",
                width,
                height
            );
        }
        if width == 0
            || height == 0
            || width > self.max_target_size
            || height > self.max_target_size
        {
            anyhow::bail!(
                "target size {}x{} outside 1..={}",
                width,
                height,
                self.max_target_size
            );
        }

        let target = RenderTarget {
            id: self.next_id,
            width,
            height,
        };
        self.next_id += 1;
        self.live_targets.push(target);
        self.commands.push(Command::CreateTarget {
            id: target.id,
            width,
            height,
        });
        debug!(
            "Headless: created target {} ({}x{})",
            target.id, width, height
        );
        Ok(target)
    }

    fn release_render_target(&mut self, target: RenderTarget) {
        self.live_targets.retain(|t| t.id != target.id);
        self.commands.push(Command::ReleaseTarget(target.id));
    }

    fn set_render_target(&mut self, target: Option<RenderTarget>) {
        self.commands.push(Command::SetRenderTarget(target.map(|t| t.id)));
    }

    fn set_real_viewport(&mut self, viewport: Viewport) {
        self.commands.push(Command::SetViewport(viewport));
    }

    fn set_projection(&mut self, projection: &Mat4) {
        self.commands.push(Command::SetProjection(*projection));
    }

    fn clear(&mut self, color: [f32; 4]) {
        self.commands.push(Command::Clear(color));
    }

    fn draw_full_screen_quad(&mut self, source: RenderTarget, uniforms: &WarpUniforms) {
        self.commands.push(Command::DrawFullScreenQuad {
            source: source.id,
            uniforms: *uniforms,
        });
    }
}
