//! Scene viewer
//!
//! Opens a window and renders the procedural demo scene through the frame
//! core. An optional first argument names a renderer config file (`.toml`
//! or `.ron`); without it the viewer enables the depth pre-pass and a
//! vignette post effect.

mod demo_scene;
mod window;

use demo_scene::DemoScene;
use frame_core::config::{Config, ConfigError, PostEffectConfig, RendererConfig, ShaderConfig};
use frame_core::foundation::logging;
use frame_core::render::{FrameRenderer, RenderError};
use glfw::{Action, Key, WindowEvent};
use log::{error, info};
use std::time::Instant;
use thiserror::Error;
use window::{Window, WindowError};

const WINDOW_WIDTH: u32 = 1280;
const WINDOW_HEIGHT: u32 = 720;

#[derive(Error, Debug)]
enum ViewerError {
    #[error(transparent)]
    Window(#[from] WindowError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

fn load_config() -> Result<RendererConfig, ConfigError> {
    match std::env::args().nth(1) {
        Some(path) => {
            info!("Loading renderer config from {}", path);
            RendererConfig::load_from_file(&path)
        }
        None => Ok(RendererConfig::new("Scene Viewer")
            .with_shaders(ShaderConfig::with_path_resolution())
            .with_depth_prepass(true)
            .with_post_effect(PostEffectConfig::named("vignette"))),
    }
}

fn run() -> Result<(), ViewerError> {
    let config = load_config()?;
    let mut window = Window::new(&config.application_name, WINDOW_WIDTH, WINDOW_HEIGHT)?;

    let extensions = window.required_instance_extensions()?;
    let mut renderer = FrameRenderer::new(
        &config,
        &extensions,
        |instance| window.create_surface(instance),
        window.framebuffer_extent(),
    )?;

    let mut scene = DemoScene::build(&renderer)?;
    renderer.load_scene(&scene.graph, scene.graph.root())?;

    let start = Instant::now();
    let mut minimized = false;
    while !window.should_close() {
        if minimized {
            window.wait_events();
        }

        for event in window.poll_events() {
            match event {
                WindowEvent::Key(Key::Escape, _, Action::Press, _) | WindowEvent::Close => {
                    window.set_should_close(true);
                }
                WindowEvent::FramebufferSize(width, height) => {
                    let (width, height) = (width.max(0) as u32, height.max(0) as u32);
                    minimized = width == 0 || height == 0;
                    renderer.on_resize(width, height);
                }
                _ => {}
            }
        }

        scene.animate(start.elapsed().as_secs_f32() * 0.8)?;
        renderer.draw_frame(&scene.graph)?;
    }

    renderer.shutdown()?;
    info!("Viewer closed");
    Ok(())
}

fn main() {
    logging::init();

    if let Err(e) = run() {
        error!("Viewer failed: {}", e);
        std::process::exit(1);
    }
}
