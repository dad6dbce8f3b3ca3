//! Registry of linked agents

use super::agent::{AgentAction, SimAgent};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FleetError {
    #[error("Agent {0} not connected")]
    NotConnected(String),

    #[error("No agents to launch")]
    NothingToLaunch,
}

/// Linked agents, keyed by id
pub struct Fleet {
    agents: RwLock<BTreeMap<String, SimAgent>>,
}

impl Default for Fleet {
    fn default() -> Self {
        Self::new()
    }
}

impl Fleet {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(BTreeMap::new()),
        }
    }

    /// Link agents. Already linked ids keep their state.
    pub async fn link(&self, ids: &[String]) {
        let mut agents = self.agents.write().await;
        for id in ids {
            if !agents.contains_key(id) {
                info!("Linked agent {}", id);
                agents.insert(id.clone(), SimAgent::new());
            }
        }
    }

    pub async fn unlink(&self, ids: &[String]) {
        let mut agents = self.agents.write().await;
        for id in ids {
            if agents.remove(id).is_some() {
                info!("Unlinked agent {}", id);
            }
        }
    }

    pub async fn unlink_all(&self) {
        let mut agents = self.agents.write().await;
        info!("Unlinked all {} agents", agents.len());
        agents.clear();
    }

    pub async fn linked_ids(&self) -> Vec<String> {
        self.agents.read().await.keys().cloned().collect()
    }

    pub async fn is_linked(&self, id: &str) -> bool {
        self.agents.read().await.contains_key(id)
    }

    /// Apply an action now, or queue it for launch when `setcmd` is set
    pub async fn command(&self, id: &str, action: AgentAction, setcmd: bool) -> Result<(), FleetError> {
        let mut agents = self.agents.write().await;
        let agent = agents
            .get_mut(id)
            .ok_or_else(|| FleetError::NotConnected(id.to_string()))?;

        if setcmd {
            debug!("Agent {}: queued {}", id, action.name());
            agent.queue(action);
        } else {
            debug!("Agent {}: {:?}", id, action);
            agent.apply(&action);
        }
        Ok(())
    }

    /// Run queued actions on the given agents, or on every linked agent.
    /// Ids that are not linked are skipped.
    pub async fn launch(&self, ids: Option<&[String]>) -> Result<usize, FleetError> {
        let mut agents = self.agents.write().await;
        let targets: Vec<String> = match ids {
            Some(ids) if !ids.is_empty() => ids.to_vec(),
            _ => agents.keys().cloned().collect(),
        };
        if targets.is_empty() {
            return Err(FleetError::NothingToLaunch);
        }

        let mut launched = 0;
        for id in &targets {
            if let Some(agent) = agents.get_mut(id) {
                let ran = agent.launch();
                info!("Agent {}: launched {} queued actions", id, ran);
                launched += 1;
            }
        }
        Ok(launched)
    }

    /// Status of the given agents, or of every linked agent
    pub async fn status(&self, ids: Option<&[String]>) -> Map<String, Value> {
        let agents = self.agents.read().await;
        let targets: Vec<String> = match ids {
            Some(ids) => ids.to_vec(),
            None => agents.keys().cloned().collect(),
        };

        targets
            .into_iter()
            .map(|id| {
                let entry = match agents.get(&id) {
                    Some(agent) => Value::Object(agent.status()),
                    None => json!({ "error": "Not connected" }),
                };
                (id, entry)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn test_link_merges_and_unlink_removes() {
        let fleet = Fleet::new();
        fleet.link(&ids(&["74", "72"])).await;
        fleet.command("72", AgentAction::Arm, false).await.unwrap();

        // Relinking keeps existing state
        fleet.link(&ids(&["72", "76"])).await;
        assert_eq!(fleet.linked_ids().await, ids(&["72", "74", "76"]));
        assert_eq!(fleet.status(None).await["72"]["armed"], json!(true));

        fleet.unlink(&ids(&["74", "99"])).await;
        assert_eq!(fleet.linked_ids().await, ids(&["72", "76"]));

        fleet.unlink_all().await;
        assert!(fleet.linked_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_command_requires_link() {
        let fleet = Fleet::new();
        let err = fleet.command("9", AgentAction::Land, false).await.unwrap_err();
        assert_eq!(err.to_string(), "Agent 9 not connected");
    }

    #[tokio::test]
    async fn test_launch_targets() {
        let fleet = Fleet::new();
        assert_eq!(fleet.launch(None).await, Err(FleetError::NothingToLaunch));

        fleet.link(&ids(&["72", "74"])).await;
        fleet.command("72", AgentAction::Arm, true).await.unwrap();
        fleet.command("74", AgentAction::Arm, true).await.unwrap();

        assert_eq!(fleet.launch(Some(ids(&["72", "99"]).as_slice())).await, Ok(1));
        let status = fleet.status(None).await;
        assert_eq!(status["72"]["armed"], json!(true));
        assert_eq!(status["74"]["armed"], json!(false));

        assert_eq!(fleet.launch(None).await, Ok(2));
        assert_eq!(fleet.status(None).await["74"]["armed"], json!(true));
    }

    #[tokio::test]
    async fn test_status_of_unknown_agent() {
        let fleet = Fleet::new();
        fleet.link(&ids(&["72"])).await;
        let status = fleet.status(Some(ids(&["72", "80"]).as_slice())).await;
        assert_eq!(status["80"], json!({ "error": "Not connected" }));
        assert!(status["72"].get("pos").is_some());
    }
}
