//! SASL PLAIN (RFC 4616): a single initial response, no further challenges.

use crate::error::AuthError;

use super::{Credentials, SaslMechanism, Step};

pub struct Plain {
    creds: Credentials,
    sent: bool,
}

impl Plain {
    pub fn new(creds: Credentials) -> Self {
        Plain { creds, sent: false }
    }
}

impl SaslMechanism for Plain {
    fn name(&self) -> &'static str {
        "PLAIN"
    }

    fn initial_response(&mut self) -> Option<Vec<u8>> {
        self.sent = true;
        let mut out = Vec::new();
        out.push(0u8);
        out.extend_from_slice(self.creds.username.as_bytes());
        out.push(0u8);
        out.extend_from_slice(self.creds.password.as_bytes());
        Some(out)
    }

    fn step(&mut self, _challenge: &[u8]) -> Result<Step, AuthError> {
        Ok(Step::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_response_is_nul_separated() {
        let mut plain = Plain::new(Credentials {
            username: "u".into(),
            password: "p".into(),
            ..Default::default()
        });
        let resp = plain.initial_response().unwrap();
        assert_eq!(resp, b"\0u\0p");
    }
}
