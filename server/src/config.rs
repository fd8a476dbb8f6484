//! Game settings and the reload loop that keeps asking for a valid file.

use crate::error::ConfigError;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use shared::MAX_SIDE;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

/// Longest tick period accepted from a settings file, in seconds.
pub const MAX_TURN_TIME: f64 = 3600.0;

/// What happens when a snake head leaves the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryPolicy {
    /// Leaving the board ends the game.
    #[default]
    Bounded,
    /// Coordinates wrap around modulo the board size.
    Wrap,
}

/// Validated game settings consumed at the start of every round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub width: i32,
    pub height: i32,
    pub players_number: usize,
    /// Tick period in seconds.
    pub turn_time: f64,
    pub apples_number: usize,
    #[serde(default)]
    pub boundary: BoundaryPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            width: 15,
            height: 9,
            players_number: 1,
            turn_time: 0.3,
            apples_number: 1,
            boundary: BoundaryPolicy::Bounded,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=2).contains(&self.players_number) {
            return Err(ConfigError::Invalid(
                "number of players must be 1 or 2".to_string(),
            ));
        }
        if !(4..=MAX_SIDE).contains(&self.width) {
            return Err(ConfigError::Invalid(format!(
                "width must be between 4 and {}",
                MAX_SIDE
            )));
        }
        if !(4..=MAX_SIDE).contains(&self.height) {
            return Err(ConfigError::Invalid(format!(
                "height must be between 4 and {}",
                MAX_SIDE
            )));
        }
        if !self.turn_time.is_finite()
            || self.turn_time <= 0.0
            || self.turn_time > MAX_TURN_TIME
        {
            return Err(ConfigError::Invalid(format!(
                "turn_time must be a positive number of seconds up to {}",
                MAX_TURN_TIME
            )));
        }
        Ok(())
    }

    /// Tick period, clamped to [`MAX_TURN_TIME`] for settings that skipped
    /// validation.
    pub fn turn_duration(&self) -> Duration {
        let longest = Duration::from_secs_f64(MAX_TURN_TIME);
        Duration::try_from_secs_f64(self.turn_time)
            .map_or(longest, |period| period.min(longest))
    }
}

/// Reads settings from a YAML file and, on failure, hands the file to an
/// external fixer before trying again.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    path: PathBuf,
    editor: Option<String>,
    retry_delay: Duration,
}

impl ConfigLoader {
    pub fn new(path: impl Into<PathBuf>, editor: Option<String>) -> Self {
        Self {
            path: path.into(),
            editor,
            retry_delay: Duration::from_secs(5),
        }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Single attempt: read, parse and validate.
    pub async fn load(&self) -> Result<Settings, ConfigError> {
        let text = tokio::fs::read_to_string(&self.path).await?;
        let settings: Settings = serde_yaml::from_str(&text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Keeps retrying until the file holds valid settings. A missing file is
    /// created with defaults first.
    pub async fn load_validated(&self) -> Settings {
        loop {
            if matches!(tokio::fs::try_exists(&self.path).await, Ok(false)) {
                if let Err(e) = self.write_defaults().await {
                    error!("Failed to create {}: {}", self.path.display(), e);
                }
            }
            match self.load().await {
                Ok(settings) => return settings,
                Err(e) => {
                    error!("Settings in {} rejected: {}", self.path.display(), e);
                    self.request_fix().await;
                }
            }
        }
    }

    async fn write_defaults(&self) -> Result<(), ConfigError> {
        let text = serde_yaml::to_string(&Settings::default())?;
        tokio::fs::write(&self.path, text).await?;
        info!("Wrote default settings to {}", self.path.display());
        Ok(())
    }

    /// Blocks until somebody had a chance to repair the file.
    async fn request_fix(&self) {
        match &self.editor {
            Some(editor) => {
                info!("Opening {} in {}", self.path.display(), editor);
                match Command::new(editor).arg(&self.path).status().await {
                    Ok(status) if !status.success() => {
                        warn!("Editor exited with {}", status);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Failed to launch {}: {}", editor, e);
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
            None => {
                warn!(
                    "Fix {} and it will be reloaded in {:?}",
                    self.path.display(),
                    self.retry_delay
                );
                tokio::time::sleep(self.retry_delay).await;
            }
        }
    }
}

/// Where the session gets its settings from each round.
#[derive(Debug, Clone)]
pub enum SettingsSource {
    Fixed(Settings),
    File(ConfigLoader),
}

impl SettingsSource {
    pub async fn load(&self) -> Settings {
        match self {
            SettingsSource::Fixed(settings) => settings.clone(),
            SettingsSource::File(loader) => loader.load_validated().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings_are_valid() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn test_validation_bounds() {
        let base = Settings::default();

        let cases = vec![
            Settings { players_number: 0, ..base.clone() },
            Settings { players_number: 3, ..base.clone() },
            Settings { width: 3, ..base.clone() },
            Settings { height: 3, ..base.clone() },
            Settings { width: MAX_SIDE + 1, ..base.clone() },
            Settings { turn_time: 0.0, ..base.clone() },
            Settings { turn_time: f64::NAN, ..base.clone() },
            Settings { turn_time: MAX_TURN_TIME + 1.0, ..base.clone() },
            Settings { turn_time: 1e30, ..base.clone() },
        ];

        for settings in cases {
            assert!(
                matches!(settings.validate(), Err(ConfigError::Invalid(_))),
                "{:?} should be rejected",
                settings
            );
        }
    }

    #[test]
    fn test_turn_duration_never_panics() {
        let longest = Duration::from_secs_f64(MAX_TURN_TIME);
        for turn_time in [1e30, f64::INFINITY, f64::NAN, -1.0] {
            let settings = Settings { turn_time, ..Settings::default() };
            assert_eq!(settings.turn_duration(), longest);
        }

        let hour = Settings { turn_time: MAX_TURN_TIME, ..Settings::default() };
        assert!(hour.validate().is_ok());
        assert_eq!(hour.turn_duration(), longest);
    }

    #[test]
    fn test_parse_yaml() {
        let settings: Settings = serde_yaml::from_str(
            "width: 20\nheight: 10\nplayers_number: 2\nturn_time: 0.25\napples_number: 3\nboundary: wrap\n",
        )
        .unwrap();
        assert_eq!(settings.width, 20);
        assert_eq!(settings.players_number, 2);
        assert_eq!(settings.boundary, BoundaryPolicy::Wrap);
        assert_eq!(settings.turn_duration(), Duration::from_millis(250));
    }

    #[test]
    fn test_boundary_defaults_to_bounded() {
        let settings: Settings = serde_yaml::from_str(
            "width: 8\nheight: 8\nplayers_number: 1\nturn_time: 1\napples_number: 1\n",
        )
        .unwrap();
        assert_eq!(settings.boundary, BoundaryPolicy::Bounded);
    }

    #[tokio::test]
    async fn test_loader_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "width: 6\nheight: 5\nplayers_number: 2\nturn_time: 0.1\napples_number: 2"
        )
        .unwrap();

        let loader = ConfigLoader::new(file.path(), None);
        let settings = loader.load().await.unwrap();
        assert_eq!(settings.height, 5);
        assert_eq!(settings.apples_number, 2);
    }

    #[tokio::test]
    async fn test_loader_reports_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "width: 2\nheight: 5\nplayers_number: 1\nturn_time: 0.1\napples_number: 2"
        )
        .unwrap();
        let loader = ConfigLoader::new(file.path(), None);
        assert!(matches!(loader.load().await, Err(ConfigError::Invalid(_))));

        let mut garbage = tempfile::NamedTempFile::new().unwrap();
        writeln!(garbage, "width: [").unwrap();
        let loader = ConfigLoader::new(garbage.path(), None);
        assert!(matches!(loader.load().await, Err(ConfigError::Parse(_))));
    }

    #[tokio::test]
    async fn test_missing_file_gets_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arena.yaml");
        let loader = ConfigLoader::new(&path, None);

        let settings = loader.load_validated().await;
        assert_eq!(settings, Settings::default());
        assert!(path.exists());
    }
}
