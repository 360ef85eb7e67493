//! SASL OAUTHBEARER (RFC 7628): a single initial response carrying the
//! bearer token; if the server rejects it with a challenge, the client
//! aborts by sending a lone `\x01`.

use crate::error::AuthError;

use super::{Credentials, SaslMechanism, Step};

pub struct OAuthBearer {
    creds: Credentials,
    aborted: bool,
}

impl OAuthBearer {
    pub fn new(creds: Credentials) -> Self {
        OAuthBearer {
            creds,
            aborted: false,
        }
    }
}

impl SaslMechanism for OAuthBearer {
    fn name(&self) -> &'static str {
        "OAUTHBEARER"
    }

    fn initial_response(&mut self) -> Option<Vec<u8>> {
        let token = self.creds.token.clone().unwrap_or_default();
        let gs2_header = format!("n,a={},", self.creds.username);
        let mut out = gs2_header.into_bytes();
        out.push(0x01);
        out.extend_from_slice(format!("auth=Bearer {token}").as_bytes());
        out.push(0x01);
        out.push(0x01);
        Some(out)
    }

    fn step(&mut self, _challenge: &[u8]) -> Result<Step, AuthError> {
        if self.aborted {
            return Err(AuthError::ExchangeFailed(
                "server rejected OAUTHBEARER token a second time".to_string(),
            ));
        }
        self.aborted = true;
        Ok(Step::Respond(vec![0x01]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_response_carries_bearer_token() {
        let mut mech = OAuthBearer::new(Credentials {
            username: "user@example.com".into(),
            token: Some("abc123".into()),
            ..Default::default()
        });
        let resp = mech.initial_response().unwrap();
        let text = String::from_utf8(resp).unwrap();
        assert_eq!(text, "n,a=user@example.com,\u{1}auth=Bearer abc123\u{1}\u{1}");
    }

    #[test]
    fn failure_response_is_a_single_control_byte() {
        let mut mech = OAuthBearer::new(Credentials {
            username: "u".into(),
            token: Some("t".into()),
            ..Default::default()
        });
        mech.initial_response();
        match mech.step(b"{\"status\":\"invalid_token\"}").unwrap() {
            Step::Respond(bytes) => assert_eq!(bytes, vec![0x01]),
            Step::Done => panic!("expected an abort response"),
        }
    }
}
