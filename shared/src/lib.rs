//! Wire-level building blocks shared by the server and player agents:
//! the JSON message envelope, the protocol error taxonomy, and the
//! point-to-point transport the state machines run on top of.

pub mod envelope;
pub mod error;
pub mod transport;

pub use envelope::{decode, encode, Envelope, MessageKind};
pub use error::ProtocolError;
pub use transport::{ChannelEndpoint, ChannelHub, Transport, TransportError, UdpEndpoint};
