use core::time::Duration;
use std::{
    fs,
    io::{self, Read},
    path::PathBuf,
};

use duplication_pipeline::{CaptureRegionMode, FpsLimit, UpdateLimitMode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const SETTINGS_FILE: &str = "desk-mirror.toml";

/// Which part of the desktop to mirror.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureRegion {
    /// The union of every active output.
    CombinedDesktop,
    /// A single output by enumeration index.
    SingleOutput { index: usize },
}

/// The update-rate limit written in the settings file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateLimit {
    /// Publish every frame.
    Off,
    /// At most one publish per `interval` milliseconds.
    Milliseconds { interval: u32 },
    /// A target frame rate, snapped to the nearest supported step.
    FramesPerSecond { fps: u32 },
}

/// The settings file contents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Which part of the desktop to mirror.
    pub capture_region: CaptureRegion,
    /// The update-rate limit.
    pub update_limit: UpdateLimit,
    /// The longest the pipeline waits for a frame before checking for a
    /// deferred refresh, in milliseconds.
    pub max_refresh_delay_ms: u64,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to open settings file:\n{0}")]
    OpenFile(#[source] io::Error),

    #[error("Failed to save settings file:\n{0}")]
    SaveFile(#[from] SaveError),

    #[error("Failed to read settings file:\n{0}")]
    ReadFile(#[source] io::Error),

    #[error("Failed to deserialize settings:\n{0}")]
    Deserialize(#[from] toml::de::Error),
}

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("Failed to serialize settings:\n{0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to write file:\n{0}")]
    Write(#[from] io::Error),
}

impl Settings {
    pub fn load_or_create() -> Result<Self, LoadError> {
        let file = fs::File::open(Self::file_path());

        if file
            .as_ref()
            .is_err_and(|e| e.kind() == std::io::ErrorKind::NotFound)
        {
            let settings = Self::default();
            settings.save()?;

            return Ok(settings);
        }

        let mut file = file.map_err(LoadError::OpenFile)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(LoadError::ReadFile)?;

        let settings: Self = toml::from_str(&contents)?;

        Ok(settings)
    }

    pub fn save(&self) -> Result<(), SaveError> {
        let toml_string = toml::to_string_pretty(self)?;

        fs::write(Self::file_path(), toml_string.as_bytes())?;
        Ok(())
    }

    pub fn file_path() -> PathBuf {
        PathBuf::from(SETTINGS_FILE)
    }

    /// The capture-region mode these settings describe.
    pub fn region_mode(&self) -> CaptureRegionMode {
        match self.capture_region {
            CaptureRegion::CombinedDesktop => CaptureRegionMode::CombinedDesktop,
            CaptureRegion::SingleOutput { index } => CaptureRegionMode::SingleOutput(index),
        }
    }

    /// The update-rate limit these settings describe.
    pub fn update_limit_mode(&self) -> UpdateLimitMode {
        match self.update_limit {
            UpdateLimit::Off => UpdateLimitMode::Off,
            UpdateLimit::Milliseconds { interval } => UpdateLimitMode::Milliseconds(interval),
            UpdateLimit::FramesPerSecond { fps } => {
                UpdateLimitMode::FramesPerSecond(nearest_fps_step(fps))
            }
        }
    }

    /// The arbitration wait budget these settings describe.
    pub fn max_refresh_delay(&self) -> Duration {
        Duration::from_millis(self.max_refresh_delay_ms)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            capture_region: CaptureRegion::CombinedDesktop,
            update_limit: UpdateLimit::Off,
            max_refresh_delay_ms: 500,
        }
    }
}

/// Snap a requested frame rate to the nearest supported step, rounding up so
/// a request is never limited harder than asked.
fn nearest_fps_step(fps: u32) -> FpsLimit {
    const STEPS: &[(u32, FpsLimit)] = &[
        (1, FpsLimit::Fps1),
        (2, FpsLimit::Fps2),
        (5, FpsLimit::Fps5),
        (10, FpsLimit::Fps10),
        (15, FpsLimit::Fps15),
        (20, FpsLimit::Fps20),
        (25, FpsLimit::Fps25),
        (30, FpsLimit::Fps30),
        (40, FpsLimit::Fps40),
        (50, FpsLimit::Fps50),
        (60, FpsLimit::Fps60),
        (75, FpsLimit::Fps75),
        (90, FpsLimit::Fps90),
        (120, FpsLimit::Fps120),
        (144, FpsLimit::Fps144),
    ];

    for (step, limit) in STEPS {
        if fps <= *step {
            return *limit;
        }
    }

    FpsLimit::Fps144
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_round_trip_through_toml() {
        let settings = Settings::default();
        let serialized = toml::to_string_pretty(&settings).unwrap();
        let restored: Settings = toml::from_str(&serialized).unwrap();

        assert_eq!(restored.max_refresh_delay_ms, settings.max_refresh_delay_ms);
        assert!(matches!(
            restored.capture_region,
            CaptureRegion::CombinedDesktop
        ));
        assert!(matches!(restored.update_limit, UpdateLimit::Off));
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let restored: Settings = toml::from_str("max_refresh_delay_ms = 250").unwrap();
        assert_eq!(restored.max_refresh_delay_ms, 250);
        assert!(matches!(restored.update_limit, UpdateLimit::Off));
    }

    #[test]
    fn frame_rates_snap_up_to_the_next_step() {
        assert_eq!(nearest_fps_step(30), FpsLimit::Fps30);
        assert_eq!(nearest_fps_step(31), FpsLimit::Fps40);
        assert_eq!(nearest_fps_step(1), FpsLimit::Fps1);
        assert_eq!(nearest_fps_step(1000), FpsLimit::Fps144);
    }

    #[test]
    fn settings_map_to_pipeline_modes() {
        let settings = Settings {
            capture_region: CaptureRegion::SingleOutput { index: 1 },
            update_limit: UpdateLimit::FramesPerSecond { fps: 60 },
            max_refresh_delay_ms: 100,
        };

        assert_eq!(settings.region_mode(), CaptureRegionMode::SingleOutput(1));
        assert_eq!(
            settings.update_limit_mode(),
            UpdateLimitMode::FramesPerSecond(FpsLimit::Fps60)
        );
        assert_eq!(settings.max_refresh_delay(), Duration::from_millis(100));
    }
}
