use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_fps() -> f64 { 10.0 }

fn default_save_key() -> String { "dasca-save-v1".into() }

fn default_autosave_interval() -> Option<f64> { Some(30.0) }

fn default_halt_on_task_error() -> bool { true }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GameConfig {
    /// Nominal tick rate. One tick advances every Variable by 1/fps seconds.
    #[serde(default = "default_fps")]
    pub fps: f64,
    /// Key the serialized game is stored under.
    #[serde(default = "default_save_key")]
    pub save_key: String,
    /// Virtual seconds between automatic saves. None disables autosave.
    #[serde(default = "default_autosave_interval")]
    pub autosave_interval: Option<f64>,
    /// Stop the scheduler when a task fails.
    #[serde(default = "default_halt_on_task_error")]
    pub halt_on_task_error: bool,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            fps:                default_fps(),
            save_key:           default_save_key(),
            autosave_interval:  default_autosave_interval(),
            halt_on_task_error: default_halt_on_task_error(),
        }
    }
}

impl GameConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    /// In tests, use GameConfig::default_test().
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {}: {e}", path.display()))?;
        let config: GameConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config {}: {e}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if !(self.fps.is_finite() && self.fps > 0.0) {
            anyhow::bail!("fps must be a positive number, got {}", self.fps);
        }
        if self.save_key.is_empty() {
            anyhow::bail!("save_key must not be empty");
        }
        if let Some(interval) = self.autosave_interval {
            if !(interval.is_finite() && interval > 0.0) {
                anyhow::bail!("autosave_interval must be positive or null, got {interval}");
            }
        }
        Ok(())
    }

    /// Config with hardcoded values for use in tests: no autosave, and task
    /// failures keep the scheduler running so tests can inspect them.
    pub fn default_test() -> Self {
        Self {
            fps:                10.0,
            save_key:           "dasca-test".into(),
            autosave_interval:  None,
            halt_on_task_error: false,
        }
    }
}
