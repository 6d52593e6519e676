//! End-to-end frames through the headless backend.

use approx::assert_relative_eq;
use hmd_stereo::backend::headless::{Command, HeadlessBackend};
use hmd_stereo::tuning::{self, DisplayMode};
use hmd_stereo::{
    DistortionRenderPass, HmdInfo, PostProcess, StereoConfig, StereoEye, StereoMode, Viewport,
};

fn dev_kit() -> StereoConfig {
    let mut config = StereoConfig::new(StereoMode::LeftRight, Viewport::new(0, 0, 1280, 800));
    config.set_hmd_info(HmdInfo {
        h_resolution: 1280,
        v_resolution: 800,
        h_screen_size: 0.12096,
        v_screen_size: 0.0756,
        lens_separation_distance: 0.064,
        eye_to_screen_distance: 0.0387,
        interpupillary_distance: 0.064,
        distortion_k: [1.0, 0.18, 0.115],
    });
    config.set_ipd(0.064);
    config.set_distortion_fit_point_vp(0.0, 1.0);
    config
}

fn render_eyes(
    config: &mut StereoConfig,
    pass: &mut DistortionRenderPass<HeadlessBackend>,
    post: PostProcess,
) -> Vec<Vec<Command>> {
    let mut frames = Vec::new();
    for eye in [StereoEye::Left, StereoEye::Right] {
        pass.begin_frame(post);
        config.eye_render_params(eye).apply(pass);
        pass.end_frame();
        frames.push(pass.backend_mut().take_commands());
    }
    frames
}

fn warp_draws(frames: &[Vec<Command>]) -> usize {
    frames
        .iter()
        .flatten()
        .filter(|c| matches!(c, Command::DrawFullScreenQuad { .. }))
        .count()
}

#[test]
fn test_dev_kit_derived_values() {
    let mut config = dev_kit();
    assert_relative_eq!(config.aspect(), 0.8, max_relative = 1e-6);
    assert_relative_eq!(config.distortion_scale(), 1.563_84, max_relative = 1e-4);
    assert_relative_eq!(
        config.distortion_config().x_center_offset,
        -0.058_201,
        max_relative = 1e-3
    );
    assert_relative_eq!(
        config.projection_center_offset(),
        -0.058_201,
        max_relative = 1e-3
    );

    let expected_fov = 2.0 * (0.0378_f32 * config.distortion_scale()).atan2(0.0387);
    assert_relative_eq!(config.y_fov_radians(), expected_fov, max_relative = 1e-5);
    assert_eq!(config.recompute_count(), 1);
}

#[test]
fn test_warped_stereo_frame() {
    let mut config = dev_kit();
    let scale = config.distortion_scale();
    let mut pass = DistortionRenderPass::new(HeadlessBackend::new(), 1280, 800);
    pass.set_scene_render_scale(scale);

    let frames = render_eyes(&mut config, &mut pass, PostProcess::Distortion);

    let target = pass.scene_target().unwrap();
    assert_eq!(target.width, (scale * 1280.0).ceil() as u32);
    assert_eq!(target.height, (scale * 800.0).ceil() as u32);
    assert_eq!(pass.backend().allocation_attempts(), 1);
    assert_eq!(pass.backend().live_targets(), &[target]);

    let eye_viewports = [Viewport::new(0, 0, 640, 800), Viewport::new(640, 0, 640, 800)];
    let mut lens_centers = Vec::new();
    for (cmds, vp) in frames.iter().zip(eye_viewports) {
        // Scene drawing goes to the scaled region of the off-screen target.
        assert!(cmds.contains(&Command::SetRenderTarget(Some(target.id))));
        assert!(cmds.contains(&Command::SetViewport(vp.scaled(scale))));

        let n = cmds.len();
        assert_eq!(cmds[n - 4], Command::SetRenderTarget(None));
        assert_eq!(cmds[n - 3], Command::SetViewport(vp));
        assert_eq!(cmds[n - 2], Command::Clear([0.0, 0.0, 0.0, 1.0]));
        match &cmds[n - 1] {
            Command::DrawFullScreenQuad { source, uniforms } => {
                assert_eq!(*source, target.id);
                lens_centers.push(uniforms.lens_center[0]);
            }
            other => panic!("expected warp draw, got {:?}", other),
        }
    }

    // Lens centers are mirrored about the middle of the screen.
    assert!(lens_centers[0] < 0.25);
    assert!(lens_centers[1] > 0.75);
    assert_relative_eq!(lens_centers[0] + lens_centers[1], 1.0, epsilon = 1e-5);
}

#[test]
fn test_ipd_change_moves_projection_only() {
    let mut config = dev_kit();
    let before = config.eye_render_params(StereoEye::Left).clone();
    let scale = config.distortion_scale();

    config.set_ipd(0.074);
    let after = config.eye_render_params(StereoEye::Left).clone();

    assert!(after.projection_center_offset < before.projection_center_offset);
    assert_relative_eq!(after.view_adjust.w_axis.x, 0.037, max_relative = 1e-6);
    assert_eq!(after.viewport, before.viewport);
    // Lens geometry does not depend on the eyes.
    assert_eq!(config.distortion_scale(), scale);
    assert_eq!(after.distortion, before.distortion);
    assert_eq!(config.recompute_count(), 2);
}

#[test]
fn test_mode_switch_to_mono() {
    let mut config = dev_kit();
    let mut pass = DistortionRenderPass::new(HeadlessBackend::new(), 1280, 800);
    render_eyes(&mut config, &mut pass, PostProcess::None);

    let post = DisplayMode::Mono.apply(&mut config);
    assert_eq!(post, PostProcess::None);
    assert_relative_eq!(config.aspect(), 1.6, max_relative = 1e-6);

    pass.begin_frame(post);
    let center = config.eye_render_params(StereoEye::Center).clone();
    center.apply(&mut pass);
    pass.end_frame();

    assert_eq!(center.viewport, Viewport::new(0, 0, 1280, 800));
    assert!(center.distortion.is_none());
    assert_eq!(center.view_adjust, glam::Mat4::IDENTITY);
    assert_eq!(pass.backend().warp_draws(), 0);
    assert!(pass.backend().live_targets().is_empty());
}

#[test]
fn test_allocation_failure_renders_unwarped() {
    let mut config = dev_kit();
    let mut backend = HeadlessBackend::new();
    backend.max_target_size = 1024;
    let mut pass = DistortionRenderPass::new(backend, 1280, 800);
    pass.set_scene_render_scale(config.distortion_scale());

    let frames = render_eyes(&mut config, &mut pass, PostProcess::Distortion);
    assert_eq!(warp_draws(&frames), 0);
    assert_eq!(pass.backend().allocation_attempts(), 2);
    for cmds in &frames {
        assert!(!cmds
            .iter()
            .any(|c| matches!(c, Command::SetRenderTarget(Some(_)))));
    }
    // Direct rendering uses the unscaled eye viewport.
    assert!(frames[0].contains(&Command::SetViewport(Viewport::new(
        0, 0, 640, 800
    ))));

    pass.backend_mut().max_target_size = 8192;
    let frames = render_eyes(&mut config, &mut pass, PostProcess::Distortion);
    assert_eq!(warp_draws(&frames), 2);
    assert_eq!(pass.backend().allocation_attempts(), 3);
}

#[test]
fn test_toggle_fit_resizes_target() {
    let mut config = dev_kit();
    let mut pass = DistortionRenderPass::new(HeadlessBackend::new(), 1280, 800);
    pass.set_scene_render_scale(config.distortion_scale());
    render_eyes(&mut config, &mut pass, PostProcess::Distortion);
    let fitted = pass.scene_target().unwrap();

    tuning::toggle_distortion_fit(&mut config);
    assert_eq!(config.distortion_scale(), 1.0);
    pass.set_scene_render_scale(config.distortion_scale());
    render_eyes(&mut config, &mut pass, PostProcess::Distortion);

    let unfitted = pass.scene_target().unwrap();
    assert_ne!(fitted.id, unfitted.id);
    assert_eq!((unfitted.width, unfitted.height), (1280, 800));
    assert_eq!(pass.backend().live_targets(), &[unfitted]);
}

#[test]
fn test_overlay_uses_ortho_projection() {
    let mut config = dev_kit();
    let mut pass = DistortionRenderPass::new(HeadlessBackend::new(), 1280, 800);
    let params = config.eye_render_params(StereoEye::Right).clone();

    pass.begin_frame(PostProcess::None);
    params.apply_2d(&mut pass);
    pass.end_frame();

    assert_eq!(
        pass.backend().commands().last(),
        Some(&Command::SetProjection(params.ortho_projection))
    );
    assert_eq!(
        pass.distortion_config().x_center_offset,
        -params.distortion.unwrap().x_center_offset
    );
}
