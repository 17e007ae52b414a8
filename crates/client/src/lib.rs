//! Client-side session stack for the grid UDP protocol: per-simulator
//! circuits with reliable delivery, the packet pipeline, a live world
//! model fed by object updates, dead-reckoning between updates, and the
//! login bootstrap.
//!
//! The wire layer lives in `sim-proto`; this crate owns sockets, tasks,
//! and shared state. Lock order is session, then circuit, then world.

pub mod agent;
pub mod blocking;
pub mod circuit;
pub mod error;
pub mod events;
pub mod interp;
pub mod login;
pub mod objects;
pub mod pipeline;
pub mod session;
pub mod settings;
pub mod world;

pub use agent::{AgentContext, AgentState};
pub use circuit::{Circuit, CircuitState, CircuitStats, ReliableHandle};
pub use error::{DisconnectReason, LoginError, NetError};
pub use events::{ClientEvent, EventBroadcaster, LoginStatus};
pub use login::{login, LoginTransport};
pub use pipeline::{IncomingPacket, PacketHandler, PacketPipeline};
pub use session::Session;
pub use settings::Settings;
pub use world::{Avatar, Primitive, SimWorld};

pub use sim_proto as proto;
