// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use lumen_assets::{Mesh, Texture};
use lumen_core::init_tracing;
use lumen_platform::WindowHost;
use lumen_render::{FrameStatus, PresentationHost, Renderer};
use lumen_render_vk::{RendererOptions, ShaderBlobs, VkRenderer};
use tracing::{error, info};

mod config;
mod controls;

use config::{load_cfg, AppCfg};
use controls::Controls;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file
    #[arg(long, default_value = "lumen.toml")]
    config: PathBuf,
    /// Wavefront OBJ to draw instead of the built-in quads
    #[arg(long)]
    model: Option<PathBuf>,
    /// Image to sample instead of the checkerboard
    #[arg(long)]
    texture: Option<PathBuf>,
    /// Frames the CPU may run ahead of the GPU (1..=4)
    #[arg(long)]
    frames_in_flight: Option<usize>,
    /// Exit after this many presented frames
    #[arg(long)]
    max_frames: Option<u64>,
}

impl Args {
    fn apply(&self, cfg: &mut AppCfg) {
        if let Some(p) = &self.model {
            cfg.assets.model = Some(p.clone());
        }
        if let Some(p) = &self.texture {
            cfg.assets.texture = Some(p.clone());
        }
        if let Some(n) = self.frames_in_flight {
            cfg.render.frames_in_flight = n;
        }
    }
}

fn run(cfg: &AppCfg, max_frames: Option<u64>) -> Result<()> {
    let mesh = match &cfg.assets.model {
        Some(path) => Mesh::load_obj(path)?,
        None => Mesh::textured_quads(),
    };
    let texture = match &cfg.assets.texture {
        Some(path) => Texture::load(path)?,
        None => Texture::checkerboard(256),
    };

    let mut options = RendererOptions::with_built_in_shaders()?;
    if let Some(dir) = &cfg.assets.shader_dir {
        options.shaders = ShaderBlobs::from_dir(dir)?;
    }
    options.vsync = cfg.render.vsync;
    options.vsync_mode = cfg.render.vsync_mode.into();
    options.clear_color = cfg.render.clear_color;
    options.frames_in_flight = cfg.render.frames_in_flight;
    options.rotation_speed = cfg.render.rotation_speed;

    let mut host = WindowHost::new(&cfg.window.title, cfg.window.width, cfg.window.height)?;
    let (display, window) = host.window_handles()?;
    // SAFETY: `renderer` is declared after `host`, so it is dropped first.
    let mut renderer = unsafe {
        VkRenderer::new(display, window, &mut host, &mesh, &texture, options)
            .context("renderer init")?
    };

    let mut controls = Controls::new(&cfg.render);
    let mut presented: u64 = 0;
    let mut frames: u32 = 0;
    let mut last_fps_instant = Instant::now();

    loop {
        host.poll_events();
        if host.should_close() {
            break;
        }
        let mut changes = Vec::new();
        if let Some(focused) = host.take_focus_change() {
            changes.extend(controls.on_focus(focused));
        }
        for key in host.take_keys() {
            changes.extend(controls.on_key(key));
        }
        for change in changes {
            controls::apply(&mut renderer, change);
        }

        match renderer.render(&mut host)? {
            FrameStatus::Presented | FrameStatus::PresentedAndRebuilt => {
                presented += 1;
                frames = frames.saturating_add(1);
            }
            FrameStatus::Rebuilt => {}
            FrameStatus::Skipped => break,
        }

        if max_frames.is_some_and(|max| presented >= max) {
            info!("reached --max-frames {presented}");
            break;
        }

        let now = Instant::now();
        if now.duration_since(last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", frames);
            host.set_title(&format!("{} | {} fps", cfg.window.title, frames));
            frames = 0;
            last_fps_instant = now;
        }
    }

    info!(
        "exiting after {} frames, {} swapchain rebuilds",
        presented,
        renderer.frame_loop().rebuilds()
    );
    drop(renderer);
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let mut cfg = load_cfg(&args.config);
    args.apply(&mut cfg);
    info!("config = {:?}", cfg);

    run(&cfg, args.max_frames).inspect_err(|e| error!("fatal: {e:#}"))
}
