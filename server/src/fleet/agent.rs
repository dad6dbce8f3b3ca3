//! A single simulated agent

use serde_json::{json, Map, Value};

/// Something an agent can be told to do
#[derive(Debug, Clone, PartialEq)]
pub enum AgentAction {
    Origin { lat: f64, lon: f64 },
    Arm,
    Disarm,
    Takeoff { altitude: f32, time: f32 },
    Move { position: [f32; 3], time: f32 },
    Land,
    Home,
    Delay { seconds: f32 },
    Kill,
}

impl AgentAction {
    pub fn name(&self) -> &'static str {
        match self {
            AgentAction::Origin { .. } => "origin",
            AgentAction::Arm => "arm",
            AgentAction::Disarm => "disarm",
            AgentAction::Takeoff { .. } => "takeoff",
            AgentAction::Move { .. } => "move",
            AgentAction::Land => "land",
            AgentAction::Home => "home",
            AgentAction::Delay { .. } => "delay",
            AgentAction::Kill => "kill",
        }
    }
}

/// In-memory stand-in for a linked drone. Movements complete instantly.
#[derive(Debug, Clone, Default)]
pub struct SimAgent {
    pub armed: bool,
    pub airborne: bool,
    /// Local `[x, y, z]` position in metres
    pub position: [f32; 3],
    pub origin: Option<(f64, f64)>,
    queued: Vec<AgentAction>,
}

impl SimAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, action: &AgentAction) {
        match action {
            AgentAction::Origin { lat, lon } => self.origin = Some((*lat, *lon)),
            AgentAction::Arm => self.armed = true,
            AgentAction::Disarm => self.armed = false,
            AgentAction::Takeoff { altitude, .. } => {
                self.airborne = true;
                self.position[2] = *altitude;
            }
            AgentAction::Move { position, .. } => {
                self.position = *position;
                self.airborne = position[2] > 0.0;
            }
            AgentAction::Land => {
                self.position[2] = 0.0;
                self.airborne = false;
            }
            AgentAction::Home => {
                self.position = [0.0, 0.0, 0.0];
                self.airborne = false;
            }
            // Nothing to simulate; the wait itself happens in the request handler
            AgentAction::Delay { .. } => {}
            AgentAction::Kill => {
                self.armed = false;
                self.airborne = false;
                self.position[2] = 0.0;
                self.queued.clear();
            }
        }
    }

    /// Hold an action until the next launch
    pub fn queue(&mut self, action: AgentAction) {
        self.queued.push(action);
    }

    pub fn queued(&self) -> &[AgentAction] {
        &self.queued
    }

    /// Apply every queued action in order. Returns how many ran.
    pub fn launch(&mut self) -> usize {
        let queued = std::mem::take(&mut self.queued);
        for action in &queued {
            self.apply(action);
        }
        queued.len()
    }

    pub fn status(&self) -> Map<String, Value> {
        let mut status = Map::new();
        status.insert("armed".into(), json!(self.armed));
        status.insert("airborne".into(), json!(self.airborne));
        status.insert("pos".into(), json!(self.position));
        status.insert(
            "origin".into(),
            self.origin.map_or(Value::Null, |(lat, lon)| json!([lat, lon])),
        );
        status.insert(
            "queued".into(),
            Value::from(self.queued().iter().map(|a| a.name()).collect::<Vec<_>>()),
        );
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flight_sequence() {
        let mut agent = SimAgent::new();
        agent.apply(&AgentAction::Arm);
        agent.apply(&AgentAction::Takeoff { altitude: 10.0, time: 15.0 });
        assert!(agent.airborne);
        assert_eq!(agent.position, [0.0, 0.0, 10.0]);

        agent.apply(&AgentAction::Move { position: [-5.0, 0.0, 7.0], time: 12.0 });
        agent.apply(&AgentAction::Land);
        assert_eq!(agent.position, [-5.0, 0.0, 0.0]);
        assert!(!agent.airborne);
        assert!(agent.armed);
    }

    #[test]
    fn test_launch_runs_queue_in_order() {
        let mut agent = SimAgent::new();
        agent.queue(AgentAction::Arm);
        agent.queue(AgentAction::Takeoff { altitude: 4.0, time: 2.0 });
        agent.queue(AgentAction::Land);
        assert!(!agent.armed);

        assert_eq!(agent.launch(), 3);
        assert!(agent.armed);
        assert!(!agent.airborne);
        assert!(agent.queued().is_empty());
    }

    #[test]
    fn test_kill_drops_queue() {
        let mut agent = SimAgent::new();
        agent.apply(&AgentAction::Arm);
        agent.queue(AgentAction::Home);
        agent.apply(&AgentAction::Kill);
        assert!(!agent.armed);
        assert_eq!(agent.launch(), 0);
    }

    #[test]
    fn test_status_shape() {
        let mut agent = SimAgent::new();
        agent.apply(&AgentAction::Origin { lat: 41.5, lon: -8.25 });
        agent.queue(AgentAction::Arm);

        let status = Value::Object(agent.status());
        assert_eq!(status["origin"], json!([41.5, -8.25]));
        assert_eq!(status["queued"], json!(["arm"]));
        assert_eq!(status["armed"], json!(false));
    }
}
