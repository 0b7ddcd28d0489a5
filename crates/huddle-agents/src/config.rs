use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{AgentError, Result};

/// Static definition of one agent, loaded at startup from the roster YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub name: String,
    /// System prompt for LLM agents.
    #[serde(default)]
    pub instructions: String,
    /// One-line description shown to the selector and in plans.
    #[serde(default)]
    pub description: String,
    /// Exactly one roster entry moderates the group chat.
    #[serde(default)]
    pub facilitator: bool,
    #[serde(default)]
    pub temperature: f32,
    /// Names of tool capabilities to attach, resolved via the registry.
    #[serde(default)]
    pub tools: Vec<String>,
    /// External agents are opaque delegates behind a transport endpoint.
    #[serde(default)]
    pub external: bool,
    /// Endpoint address for external agents.
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// Roster document shape:
///
/// ```yaml
/// agents:
///   - name: Facilitator
///     facilitator: true
///     instructions: |
///       You moderate the tumor board...
///   - name: Radiology
///     instructions: ...
///     tools: [read_imaging_report]
/// ```
#[derive(Debug, Deserialize)]
struct RosterDoc {
    agents: Vec<AgentConfig>,
}

/// Load and validate the agent roster from a YAML file.
pub fn load_agent_configs(path: &str) -> Result<Vec<AgentConfig>> {
    let text = std::fs::read_to_string(path)?;
    let configs = parse_agent_configs(&text)?;
    info!(%path, agents = configs.len(), "loaded agent roster");
    Ok(configs)
}

/// Parse and validate a roster document from YAML text.
pub fn parse_agent_configs(yaml: &str) -> Result<Vec<AgentConfig>> {
    let doc: RosterDoc = serde_yaml::from_str(yaml)?;
    validate(&doc.agents)?;
    Ok(doc.agents)
}

/// Name of the single facilitator in a validated roster.
pub fn facilitator_name(configs: &[AgentConfig]) -> Result<String> {
    configs
        .iter()
        .find(|c| c.facilitator)
        .map(|c| c.name.clone())
        .ok_or_else(|| AgentError::Config("roster has no facilitator".to_string()))
}

fn validate(configs: &[AgentConfig]) -> Result<()> {
    if configs.is_empty() {
        return Err(AgentError::Config("roster is empty".to_string()));
    }

    let facilitators = configs.iter().filter(|c| c.facilitator).count();
    if facilitators != 1 {
        return Err(AgentError::Config(format!(
            "roster must declare exactly one facilitator, found {facilitators}"
        )));
    }

    let mut seen = std::collections::HashSet::new();
    for config in configs {
        if config.name.trim().is_empty() {
            return Err(AgentError::Config("agent with empty name".to_string()));
        }
        if !seen.insert(config.name.as_str()) {
            return Err(AgentError::Config(format!(
                "duplicate agent name {:?}",
                config.name
            )));
        }
        if config.external && config.endpoint.is_none() {
            return Err(AgentError::Config(format!(
                "external agent {:?} needs an endpoint",
                config.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROSTER: &str = r#"
agents:
  - name: Facilitator
    facilitator: true
    description: Moderates the tumor board.
    instructions: |
      You moderate a multi-disciplinary tumor board.
  - name: Radiology
    description: Reads imaging studies.
    instructions: You summarize imaging findings.
    temperature: 0.2
    tools: [read_imaging_report]
  - name: PathologyViewer
    description: Opaque external viewer.
    external: true
    endpoint: "https://pathology.example/invoke"
"#;

    #[test]
    fn parses_full_roster() {
        let configs = parse_agent_configs(ROSTER).unwrap();
        assert_eq!(configs.len(), 3);
        assert_eq!(facilitator_name(&configs).unwrap(), "Facilitator");

        let radiology = &configs[1];
        assert!((radiology.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(radiology.tools, vec!["read_imaging_report"]);

        let external = &configs[2];
        assert!(external.external);
        assert_eq!(
            external.endpoint.as_deref(),
            Some("https://pathology.example/invoke")
        );
    }

    #[test]
    fn temperature_defaults_to_zero() {
        let configs = parse_agent_configs(ROSTER).unwrap();
        assert_eq!(configs[0].temperature, 0.0);
    }

    #[test]
    fn rejects_zero_or_two_facilitators() {
        let none = "agents:\n  - name: A\n  - name: B\n";
        assert!(parse_agent_configs(none).is_err());

        let two = "agents:\n  - name: A\n    facilitator: true\n  - name: B\n    facilitator: true\n";
        assert!(parse_agent_configs(two).is_err());
    }

    #[test]
    fn rejects_duplicate_names_and_endpointless_external() {
        let dup = "agents:\n  - name: A\n    facilitator: true\n  - name: A\n";
        assert!(parse_agent_configs(dup).is_err());

        let external = "agents:\n  - name: A\n    facilitator: true\n  - name: B\n    external: true\n";
        assert!(parse_agent_configs(external).is_err());
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agents.yaml");
        std::fs::write(&path, ROSTER).unwrap();

        let configs = load_agent_configs(path.to_str().unwrap()).unwrap();
        assert_eq!(configs.len(), 3);
    }
}
