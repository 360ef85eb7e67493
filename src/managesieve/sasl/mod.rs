//! SASL mechanisms for `AUTHENTICATE`.
//!
//! A mechanism is a tiny state machine: an optional initial response sent
//! alongside the `AUTHENTICATE` command, then zero or more challenge/
//! response round trips driven by [`SaslMechanism::step`].

mod digest_md5;
mod login;
mod oauthbearer;
mod plain;

pub use digest_md5::DigestMd5;
pub use login::Login;
pub use oauthbearer::OAuthBearer;
pub use plain::Plain;

use crate::error::AuthError;

/// Credentials a mechanism needs. Not every field is used by every
/// mechanism (`token` is OAUTHBEARER-only; `realm` is DIGEST-MD5-only).
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub realm: Option<String>,
    pub token: Option<String>,
}

/// What the mechanism wants to do next after seeing a server challenge.
pub enum Step {
    /// Send this response and expect another challenge.
    Respond(Vec<u8>),
    /// The mechanism has nothing more to send; wait for the server's final
    /// verdict.
    Done,
}

pub trait SaslMechanism {
    /// The mechanism name as sent in `AUTHENTICATE "NAME"`.
    fn name(&self) -> &'static str;

    /// The client-first response sent as the initial literal, if the
    /// mechanism sends one unprompted.
    fn initial_response(&mut self) -> Option<Vec<u8>>;

    /// Produces the next response to a base64-decoded server challenge.
    fn step(&mut self, challenge: &[u8]) -> Result<Step, AuthError>;
}

/// Builds the named mechanism, or `None` if unrecognized.
pub fn by_name(name: &str, creds: Credentials) -> Option<Box<dyn SaslMechanism + Send>> {
    match name.to_ascii_uppercase().as_str() {
        "PLAIN" => Some(Box::new(Plain::new(creds))),
        "LOGIN" => Some(Box::new(Login::new(creds))),
        "DIGEST-MD5" => Some(Box::new(DigestMd5::new(creds))),
        "OAUTHBEARER" => Some(Box::new(OAuthBearer::new(creds))),
        _ => None,
    }
}
