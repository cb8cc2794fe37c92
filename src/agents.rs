//! Agent roster keyed by phone number and call attribution.
//!
//! The roster is read once at startup from a JSON document of the form
//!
//! ```json
//! { "agents": { "09631084471": { "name": "Prateek", "department": "Customer Success", "active": true } } }
//! ```
//!
//! Entry order in the file is kept: when several numbers could match a call
//! the first one listed wins.
use anyhow::{anyhow, Result};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Agent {
    pub number: String,
    pub name: String,
    pub department: String,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn describe(&self) -> &'static str {
        match self {
            Direction::Inbound => "Incoming call from Customer",
            Direction::Outbound => "Outgoing call to Customer",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => write!(f, "inbound"),
            Direction::Outbound => write!(f, "outbound"),
        }
    }
}

/// Who handled a call and who the customer was.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCallContext {
    pub agent: Agent,
    pub customer_number: String,
    pub direction: Direction,
}

#[derive(Debug, Clone, Default)]
pub struct AgentDirectory {
    agents: Vec<Agent>,
}

#[derive(Deserialize)]
struct AgentEntry {
    name: String,
    #[serde(default = "default_department")]
    department: String,
    #[serde(default = "default_active")]
    active: bool,
}

fn default_department() -> String {
    "Customer Success".to_string()
}

fn default_active() -> bool {
    true
}

#[derive(Default)]
struct OrderedAgents(Vec<Agent>);

impl<'de> Deserialize<'de> for OrderedAgents {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct OrderedAgentsVisitor;

        impl<'de> Visitor<'de> for OrderedAgentsVisitor {
            type Value = OrderedAgents;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "a map of phone number to agent")
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut agents = Vec::new();
                while let Some((number, entry)) = map.next_entry::<String, AgentEntry>()? {
                    agents.push(Agent {
                        number: number.trim().to_string(),
                        name: entry.name,
                        department: entry.department,
                        active: entry.active,
                    });
                }
                Ok(OrderedAgents(agents))
            }
        }

        deserializer.deserialize_map(OrderedAgentsVisitor)
    }
}

#[derive(Deserialize)]
struct DirectoryFile {
    #[serde(default)]
    agents: OrderedAgents,
}

impl AgentDirectory {
    pub fn new(agents: Vec<Agent>) -> Result<Self> {
        if let Some(agent) = agents.iter().find(|a| a.number.is_empty()) {
            return Err(anyhow!("agent {} has an empty phone number", agent.name));
        }
        Ok(Self { agents })
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let file: DirectoryFile = serde_json::from_str(content)?;
        Self::new(file.agents.0)
    }

    /// Loads the roster; a missing file yields an empty directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(
                path = %path.display(),
                "agent config not found, no calls can be attributed"
            );
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("{}: {}", e, path.display()))?;
        let directory =
            Self::from_json(&content).map_err(|e| anyhow!("{}: {}", path.display(), e))?;
        info!(agents = directory.len(), "loaded agent directory");
        Ok(directory)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    /// Attributes a call to the first agent whose number occurs in either
    /// party. The agent placing the call makes it outbound.
    pub fn resolve(&self, caller: &str, called: &str) -> Option<ResolvedCallContext> {
        self.agents
            .iter()
            .find(|agent| caller.contains(&agent.number) || called.contains(&agent.number))
            .map(|agent| {
                let (direction, customer) = if caller.contains(&agent.number) {
                    (Direction::Outbound, called)
                } else {
                    (Direction::Inbound, caller)
                };
                ResolvedCallContext {
                    agent: agent.clone(),
                    customer_number: customer.to_string(),
                    direction,
                }
            })
    }
}
