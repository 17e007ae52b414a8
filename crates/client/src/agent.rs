use std::sync::{Mutex, PoisonError};

use glam::{Quat, Vec3, Vec4};
use uuid::Uuid;

/// Mirror of the agent's own avatar, written through from object updates
/// that target the local agent.
#[derive(Debug, Clone, Copy)]
pub struct AgentState {
    pub local_id: u32,
    pub position: Vec3,
    pub velocity: Vec3,
    pub rotation: Quat,
    pub collision_plane: Vec4,
    /// Local id of the seat object, zero when standing.
    pub sitting_on: u32,
}

impl Default for AgentState {
    fn default() -> Self {
        Self {
            local_id: 0,
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            collision_plane: Vec4::new(0.0, 0.0, 1.0, 0.0),
            sitting_on: 0,
        }
    }
}

/// Identity and local mirrors for the logged-in agent. Ids are assigned by
/// the login handler once the grid answers.
#[derive(Debug, Default)]
pub struct AgentContext {
    ids: Mutex<(Uuid, Uuid)>,
    state: Mutex<AgentState>,
}

impl AgentContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn agent_id(&self) -> Uuid {
        self.ids().0
    }

    pub fn session_id(&self) -> Uuid {
        self.ids().1
    }

    pub fn set_ids(&self, agent_id: Uuid, session_id: Uuid) {
        *self.ids.lock().unwrap_or_else(PoisonError::into_inner) = (agent_id, session_id);
    }

    pub fn state(&self) -> AgentState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut AgentState) -> R) -> R {
        f(&mut self.state.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn ids(&self) -> (Uuid, Uuid) {
        *self.ids.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
