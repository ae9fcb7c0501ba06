// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every field has a default, so a missing or partial config.toml is fine.
// `Config::validate` rejects combinations the frame pipeline cannot run with.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub simulation: SimulationConfig,
    pub debug: DebugConfig,
    pub controls: ControlsConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Fireworks".to_string(),
            width: 1400,
            height: 1000,
            fullscreen: false,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    /// Preferred present mode; FIFO is used when it is not offered
    pub present_mode: String,
    pub clear_color: [f32; 4],
    /// Upper bound for the MSAA sample count
    pub max_samples: u32,
    /// Directory holding the compiled SPIR-V modules
    pub shader_dir: PathBuf,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "mailbox".to_string(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            max_samples: 64,
            shader_dir: PathBuf::from("shaders/bin"),
        }
    }
}

/// Particle simulation settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub particle_count: u32,
    /// Compute work-group width, must divide `particle_count`
    pub workgroup_size: u32,
    /// Seconds of animation before the particles are re-launched
    pub reset_seconds: f64,
    pub min_speed: f32,
    pub max_speed: f32,
    /// Radius of the disk the launch center is drawn from
    pub spawn_radius: f32,
    /// Distance from star center to tip
    pub star_size: f32,
    /// Fixed RNG seed; wall-clock time when absent
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            particle_count: 1024,
            workgroup_size: 256,
            reset_seconds: 10.0,
            min_speed: 0.1,
            max_speed: 1.0,
            spawn_radius: 0.5,
            star_size: 0.05,
            seed: None,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_to_file: false,
            log_file: "fireworks.log".to_string(),
            show_fps: true,
        }
    }
}

/// Control key bindings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ControlsConfig {
    pub fullscreen_key: String,
    pub quit_keys: Vec<String>,
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            fullscreen_key: "F11".to_string(),
            quit_keys: vec!["Escape".to_string(), "Q".to_string()],
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Reject settings the renderer cannot honor
    pub fn validate(&self) -> Result<()> {
        let sim = &self.simulation;

        anyhow::ensure!(sim.particle_count > 0, "particle_count must be positive");
        anyhow::ensure!(sim.workgroup_size > 0, "workgroup_size must be positive");
        anyhow::ensure!(
            sim.particle_count % sim.workgroup_size == 0,
            "particle_count ({}) must be a multiple of workgroup_size ({})",
            sim.particle_count,
            sim.workgroup_size
        );
        anyhow::ensure!(
            sim.min_speed <= sim.max_speed,
            "min_speed ({}) exceeds max_speed ({})",
            sim.min_speed,
            sim.max_speed
        );
        anyhow::ensure!(
            sim.reset_seconds > 0.0 && Duration::try_from_secs_f64(sim.reset_seconds).is_ok(),
            "reset_seconds must be a positive, finite number of seconds (got {})",
            sim.reset_seconds
        );
        anyhow::ensure!(
            self.window.width > 0 && self.window.height > 0,
            "window size must be non-zero"
        );

        Ok(())
    }

    /// Get present mode as Vulkan enum
    pub fn get_present_mode(&self) -> ash::vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => ash::vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => ash::vk::PresentModeKHR::MAILBOX,
            "fifo" => ash::vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => ash::vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to MAILBOX",
                    self.graphics.present_mode
                );
                ash::vk::PresentModeKHR::MAILBOX
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config = Config::parse(
            r#"
            [simulation]
            particle_count = 2048
            "#,
        )
        .unwrap();

        assert_eq!(config.simulation.particle_count, 2048);
        assert_eq!(config.simulation.workgroup_size, 256);
        assert_eq!(config.window.title, "Fireworks");
        config.validate().unwrap();
    }

    #[test]
    fn rejects_indivisible_particle_count() {
        let config = Config::parse(
            r#"
            [simulation]
            particle_count = 2000
            workgroup_size = 256
            "#,
        )
        .unwrap();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("multiple of workgroup_size"));
    }

    #[test]
    fn rejects_inverted_speed_bounds() {
        let mut config = Config::default();
        config.simulation.min_speed = 2.0;
        config.simulation.max_speed = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_workgroup() {
        let mut config = Config::default();
        config.simulation.workgroup_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unbounded_reset_interval() {
        let config = Config::parse("[simulation]\nreset_seconds = inf\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("reset_seconds"));

        let config = Config::parse("[simulation]\nreset_seconds = 1e300\n").unwrap();
        assert!(config.validate().is_err());

        let config = Config::parse("[simulation]\nreset_seconds = nan\n").unwrap();
        assert!(config.validate().is_err());

        let config = Config::parse("[simulation]\nreset_seconds = 0.0\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn present_mode_parsing() {
        let mut config = Config::default();
        assert_eq!(config.get_present_mode(), ash::vk::PresentModeKHR::MAILBOX);

        config.graphics.present_mode = "FIFO".to_string();
        assert_eq!(config.get_present_mode(), ash::vk::PresentModeKHR::FIFO);

        config.graphics.present_mode = "bogus".to_string();
        assert_eq!(config.get_present_mode(), ash::vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn seed_is_optional() {
        let config = Config::parse("[simulation]\nseed = 7\n").unwrap();
        assert_eq!(config.simulation.seed, Some(7));
        assert_eq!(Config::default().simulation.seed, None);
    }
}
