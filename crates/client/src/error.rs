use sim_proto::codec::CodecError;
use sim_proto::login::LoginParseError;

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("no simulator: region handshake did not arrive in time")]
    HandshakeTimeout,
    #[error("not connected to a simulator")]
    NotConnected,
    #[error("reliable packet {sequence} abandoned after {resends} resends")]
    Abandoned { sequence: u32, resends: u32 },
    #[error("circuit is closed")]
    CircuitClosed,
    #[error("logout reply did not arrive in time")]
    LogoutTimeout,
}

#[derive(Debug, thiserror::Error)]
pub enum LoginError {
    #[error("login transport error: {0}")]
    Transport(String),
    #[error("invalid login response: {0}")]
    InvalidResponse(#[from] LoginParseError),
    #[error("login failed ({reason}): {message}")]
    Failed { reason: String, message: String },
    #[error("could not reach the simulator: {0}")]
    Connect(#[from] NetError),
}

/// Why a circuit or the whole session went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    ClientInitiated,
    ServerInitiated,
    NetworkTimeout,
    /// The last simulator went away on its own.
    SimShutdown,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientInitiated => "client initiated",
            Self::ServerInitiated => "server initiated",
            Self::NetworkTimeout => "network timeout",
            Self::SimShutdown => "sim shutdown",
        }
    }
}
