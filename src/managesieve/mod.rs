//! The ManageSieve (RFC 5804) client: wire framing, response parsing, SASL
//! mechanisms, and the session state machine.

pub mod client;
pub mod response;
pub mod sasl;
pub mod transport;

pub use client::{Capabilities, ConnectOptions, ScriptListing, SessionState, SieveClient};
pub use sasl::Credentials;
