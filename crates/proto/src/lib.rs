//! Wire-level protocol layer for the grid UDP protocol: packet framing,
//! zerocoding, the typed message catalog, throttle blocks, fixed-point
//! quantization, and the login-response data model.
//!
//! Everything here is purely functional over buffers; sockets, tasks, and
//! world state live in `sim-client`.

pub mod codec;
pub mod header;
pub mod login;
pub mod messages;
pub mod quant;
pub mod region;
pub mod throttle;
pub mod zerocode;

pub use codec::{CodecError, Reader, Writer};
pub use header::{PacketFlags, PacketHeader, MAX_APPENDED_ACKS, MIN_HEADER_LEN};
pub use login::{LoginReply, LoginRequest, LoginState};
pub use messages::{Message, MessageId};
pub use throttle::Throttle;
