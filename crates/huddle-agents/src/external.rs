use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use huddle_core::types::Message;

use crate::error::{AgentError, Result};

/// Per-request timeout for external delegates.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Opaque delegate agent addressed by a transport endpoint.
///
/// The core does not know what runs behind the endpoint; it POSTs the
/// history and wraps whatever comes back as this agent's message.
pub struct ExternalAgent {
    name: String,
    description: String,
    endpoint: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for ExternalAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalAgent")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[derive(Serialize)]
struct InvokeRequest<'a> {
    agent: &'a str,
    messages: &'a [Message],
}

#[derive(Deserialize)]
struct InvokeResponse {
    content: String,
}

impl ExternalAgent {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            name: name.into(),
            description: description.into(),
            endpoint: endpoint.into(),
            client,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    #[instrument(skip(self, history), fields(agent = %self.name))]
    pub async fn invoke(&self, history: &[Message]) -> Result<Message> {
        let body = InvokeRequest {
            agent: &self.name,
            messages: history,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::External {
                name: self.name.clone(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(AgentError::External {
                name: self.name.clone(),
                reason: format!("endpoint returned {}", response.status()),
            });
        }

        let parsed: InvokeResponse = response.json().await.map_err(|e| AgentError::External {
            name: self.name.clone(),
            reason: format!("bad response body: {e}"),
        })?;

        info!(chars = parsed.content.len(), "external agent replied");
        Ok(Message::assistant(&self.name, parsed.content))
    }
}
