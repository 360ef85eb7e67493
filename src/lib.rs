//! Sieve (RFC 5228) script parsing and a ManageSieve (RFC 5804) client.

pub mod error;
pub mod managesieve;
pub mod sieve;

pub use error::{AuthError, Error, LexError, ParseError, ProtocolError, ServerError, TimeoutError, TransportError};
pub use managesieve::{Capabilities, ConnectOptions, Credentials, ScriptListing, SessionState, SieveClient};
pub use sieve::{Command, Script, Value, parse, parse_with_registry};
