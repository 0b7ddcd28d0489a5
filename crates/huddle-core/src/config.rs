use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Top-level runtime config (huddle.toml + HUDDLE_* env overrides).
///
/// Every option has a default, so a missing config file yields a fully
/// usable configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HuddleConfig {
    /// Root directory (or container prefix) for the blob store.
    #[serde(default = "default_storage_root")]
    pub storage_root: String,

    /// Regex every extracted patient id must match.
    #[serde(default = "default_patient_id_pattern")]
    pub patient_id_pattern: String,

    /// Scheduler iteration cap per user turn.
    #[serde(default = "default_max_turn_iterations")]
    pub max_turn_iterations: u32,

    /// Wall-clock budget for one whole turn, in seconds.
    #[serde(default = "default_turn_deadline_seconds")]
    pub turn_deadline_seconds: u64,

    /// Lowercase phrases that trigger the clear-everything path.
    #[serde(default = "default_clear_commands")]
    pub clear_commands: Vec<String>,

    /// Path of the YAML document supplying the agent roster.
    #[serde(default = "default_agents_config_path")]
    pub agents_config_path: String,
}

impl Default for HuddleConfig {
    fn default() -> Self {
        Self {
            storage_root: default_storage_root(),
            patient_id_pattern: default_patient_id_pattern(),
            max_turn_iterations: default_max_turn_iterations(),
            turn_deadline_seconds: default_turn_deadline_seconds(),
            clear_commands: default_clear_commands(),
            agents_config_path: default_agents_config_path(),
        }
    }
}

impl HuddleConfig {
    /// Load config from a TOML file with HUDDLE_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.huddle/huddle.toml
    ///
    /// Env overrides use the flat option names, e.g.
    /// `HUDDLE_PATIENT_ID_PATTERN`, `HUDDLE_MAX_TURN_ITERATIONS`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: HuddleConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("HUDDLE_"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        Ok(config)
    }

    /// True when the (trimmed, lowercased) user text is a clear command.
    pub fn is_clear_command(&self, user_text: &str) -> bool {
        let needle = user_text.trim().to_lowercase();
        self.clear_commands.iter().any(|c| c == &needle)
    }
}

fn default_storage_root() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.huddle/conversations")
}

fn default_patient_id_pattern() -> String {
    crate::types::DEFAULT_PATIENT_ID_PATTERN.to_string()
}

fn default_max_turn_iterations() -> u32 {
    30
}

fn default_turn_deadline_seconds() -> u64 {
    120
}

fn default_clear_commands() -> Vec<String> {
    [
        "clear",
        "clear patient",
        "clear context",
        "clear patient context",
    ]
    .map(String::from)
    .to_vec()
}

fn default_agents_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.huddle/agents.yaml")
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.huddle/huddle.toml")
}
