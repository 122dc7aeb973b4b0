// SPDX-License-Identifier: CEPL-1.0
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use tracing::info;
use vktut_render::{PresentPreference, RenderOptions};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Config file; missing means built-in defaults
    #[arg(long, default_value = "vktut.toml")]
    pub config: PathBuf,

    /// Fixed frame slot count; 0 = one per swapchain image
    #[arg(long)]
    pub frames_in_flight: Option<u32>,

    /// Preferred present mode; FIFO is the fallback
    #[arg(long, value_enum)]
    pub present_mode: Option<PresentModeCfg>,

    /// Directory holding triangle.vert.spv and triangle.frag.spv
    #[arg(long)]
    pub shader_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PresentModeCfg {
    Fifo,
    #[default]
    Mailbox,
}

impl From<PresentModeCfg> for PresentPreference {
    fn from(m: PresentModeCfg) -> Self {
        match m {
            PresentModeCfg::Fifo => PresentPreference::Fifo,
            PresentModeCfg::Mailbox => PresentPreference::Mailbox,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            title: "Vulkan Tutorial Sandbox".to_owned(),
            width: 900,
            height: 600,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
    pub present_mode: PresentModeCfg,
    pub frames_in_flight: u32,
    pub shader_dir: PathBuf,
    pub validation: bool,
    pub mesh_triangles: u32,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: [0.0, 0.0, 0.0, 1.0],
            present_mode: PresentModeCfg::Mailbox,
            frames_in_flight: 0,
            shader_dir: PathBuf::from("shaders"),
            validation: true,
            mesh_triangles: 1000,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AppCfg {
    pub window: WindowCfg,
    pub render: RenderCfg,
}

impl AppCfg {
    pub fn parse(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Missing file gives defaults; an unreadable or malformed one is fatal.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(s) => Self::parse(&s).with_context(|| format!("parse {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e).with_context(|| format!("read {}", path.display())),
        }
    }

    /// Command-line flags win over the file.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(n) = args.frames_in_flight {
            self.render.frames_in_flight = n;
        }
        if let Some(m) = args.present_mode {
            self.render.present_mode = m;
        }
        if let Some(dir) = &args.shader_dir {
            self.render.shader_dir = dir.clone();
        }
    }

    pub fn render_options(&self) -> RenderOptions {
        let r = &self.render;
        RenderOptions {
            app_name: self.window.title.clone(),
            clear_color: r.clear_color,
            present: r.present_mode.into(),
            frames_in_flight: (r.frames_in_flight > 0).then_some(r.frames_in_flight),
            shader_dir: r.shader_dir.clone(),
            validation: r.validation,
            mesh_triangles: r.mesh_triangles,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let cfg = AppCfg::parse("").unwrap();
        assert_eq!(cfg, AppCfg::default());
        assert_eq!(cfg.window.width, 900);
        assert_eq!(cfg.window.height, 600);
        assert_eq!(cfg.render.mesh_triangles, 1000);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = AppCfg::parse(
            r#"
            [render]
            present_mode = "fifo"
            frames_in_flight = 2
            "#,
        )
        .unwrap();
        assert_eq!(cfg.render.present_mode, PresentModeCfg::Fifo);
        assert_eq!(cfg.render.frames_in_flight, 2);
        assert_eq!(cfg.render.shader_dir, PathBuf::from("shaders"));
        assert_eq!(cfg.window, WindowCfg::default());
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(AppCfg::parse("[render]\npresent_mode = \"immediate\"").is_err());
        assert!(AppCfg::parse("[render]\nframes_in_flight = -1").is_err());
        assert!(AppCfg::parse("[window\n").is_err());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let path = std::env::temp_dir().join("vktut-config-does-not-exist.toml");
        assert_eq!(AppCfg::load(&path).unwrap(), AppCfg::default());
    }

    #[test]
    fn flags_override_file() {
        let mut cfg = AppCfg::parse("[render]\nframes_in_flight = 3\nshader_dir = \"a\"").unwrap();
        let args = Args::parse_from([
            "vktut",
            "--frames-in-flight",
            "2",
            "--present-mode",
            "fifo",
            "--shader-dir",
            "b",
        ]);
        cfg.apply_args(&args);
        assert_eq!(cfg.render.frames_in_flight, 2);
        assert_eq!(cfg.render.present_mode, PresentModeCfg::Fifo);
        assert_eq!(cfg.render.shader_dir, PathBuf::from("b"));
    }

    #[test]
    fn absent_flags_leave_file_alone() {
        let mut cfg = AppCfg::parse("[render]\nframes_in_flight = 3").unwrap();
        cfg.apply_args(&Args::parse_from(["vktut"]));
        assert_eq!(cfg.render.frames_in_flight, 3);
        assert_eq!(cfg.render.present_mode, PresentModeCfg::Mailbox);
    }

    #[test]
    fn zero_frames_in_flight_ties_to_images() {
        let cfg = AppCfg::default();
        let opts = cfg.render_options();
        assert_eq!(opts.frames_in_flight, None);
        assert_eq!(opts.present, PresentPreference::Mailbox);

        let mut fixed = AppCfg::default();
        fixed.render.frames_in_flight = 2;
        assert_eq!(fixed.render_options().frames_in_flight, Some(2));
    }
}
