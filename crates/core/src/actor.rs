use serde::{Deserialize, Serialize};

use crate::TeamId;

/// Authenticated caller acting inside one team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    subject: String,
    team_id: TeamId,
}

impl Actor {
    /// Creates an actor from the identity subject and the team it acts in.
    #[must_use]
    pub fn new(subject: impl Into<String>, team_id: TeamId) -> Self {
        Self {
            subject: subject.into(),
            team_id,
        }
    }

    /// Creates the actor used by background jobs for a team.
    #[must_use]
    pub fn system(team_id: TeamId) -> Self {
        Self::new("system", team_id)
    }

    /// Returns the stable subject recorded in audit trails.
    #[must_use]
    pub fn subject(&self) -> &str {
        self.subject.as_str()
    }

    /// Returns the team scope of the actor.
    #[must_use]
    pub fn team_id(&self) -> TeamId {
        self.team_id
    }
}
