//! SASL DIGEST-MD5 (RFC 2831). No initial response; the server's first
//! challenge carries `realm`/`nonce`/`qop`, the client computes a
//! challenge-response digest, and the server's second challenge (carrying
//! `rspauth`) is acknowledged with an empty response.

use md5::{Digest, Md5};
use rand::RngCore;

use crate::error::AuthError;

use super::{Credentials, SaslMechanism, Step};

enum Stage {
    AwaitingChallenge,
    AwaitingRspauth,
    Done,
}

pub struct DigestMd5 {
    creds: Credentials,
    stage: Stage,
}

impl DigestMd5 {
    pub fn new(creds: Credentials) -> Self {
        DigestMd5 {
            creds,
            stage: Stage::AwaitingChallenge,
        }
    }
}

fn md5_hex(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn gen_cnonce() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex_encode(&bytes)
}

/// Parses a DIGEST-MD5 challenge's comma-separated `key=value` /
/// `key="value"` pairs. Does not handle backslash-escaped quotes within
/// values — the server-generated nonces/realms this mechanism sees never
/// contain them.
fn parse_challenge(challenge: &str) -> std::collections::HashMap<String, String> {
    let mut map = std::collections::HashMap::new();
    for part in split_unquoted_commas(challenge) {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        let key = key.trim().to_string();
        let value = value.trim();
        let value = value.strip_prefix('"').unwrap_or(value);
        let value = value.strip_suffix('"').unwrap_or(value);
        map.insert(key, value.to_string());
    }
    map
}

fn split_unquoted_commas(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in s.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ',' if !in_quotes => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

impl SaslMechanism for DigestMd5 {
    fn name(&self) -> &'static str {
        "DIGEST-MD5"
    }

    fn initial_response(&mut self) -> Option<Vec<u8>> {
        None
    }

    fn step(&mut self, challenge: &[u8]) -> Result<Step, AuthError> {
        match self.stage {
            Stage::AwaitingChallenge => {
                let text = std::str::from_utf8(challenge).map_err(|_| {
                    AuthError::ExchangeFailed("DIGEST-MD5 challenge was not valid UTF-8".to_string())
                })?;
                let fields = parse_challenge(text);
                let nonce = fields.get("nonce").ok_or_else(|| {
                    AuthError::ExchangeFailed("DIGEST-MD5 challenge missing nonce".to_string())
                })?;
                let realm = fields
                    .get("realm")
                    .cloned()
                    .or_else(|| self.creds.realm.clone())
                    .unwrap_or_default();
                let qop = fields
                    .get("qop")
                    .map(|s| s.split(',').next().unwrap_or("auth").to_string())
                    .unwrap_or_else(|| "auth".to_string());

                let cnonce = gen_cnonce();
                let nc = "00000001";
                let digest_uri = format!("sieve/{realm}");

                let ha1 = md5_hex(&format!(
                    "{}:{}:{}",
                    self.creds.username, realm, self.creds.password
                ));
                let ha2 = md5_hex(&format!("AUTHENTICATE:{digest_uri}"));
                let response = md5_hex(&format!("{ha1}:{nonce}:{nc}:{cnonce}:{qop}:{ha2}"));

                let message = format!(
                    "username=\"{}\",realm=\"{}\",nonce=\"{}\",cnonce=\"{}\",nc={},qop={},digest-uri=\"{}\",response={},charset=utf-8",
                    self.creds.username, realm, nonce, cnonce, nc, qop, digest_uri, response
                );

                self.stage = Stage::AwaitingRspauth;
                Ok(Step::Respond(message.into_bytes()))
            }
            Stage::AwaitingRspauth => {
                self.stage = Stage::Done;
                Ok(Step::Respond(Vec::new()))
            }
            Stage::Done => Err(AuthError::ExchangeFailed(
                "DIGEST-MD5 exchange already completed".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_challenge_fields() {
        let fields = parse_challenge(
            r#"realm="example.com",nonce="OA6MG9tEQGm2hh",qop="auth",charset=utf-8,algorithm=md5-sess"#,
        );
        assert_eq!(fields.get("realm").unwrap(), "example.com");
        assert_eq!(fields.get("nonce").unwrap(), "OA6MG9tEQGm2hh");
        assert_eq!(fields.get("qop").unwrap(), "auth");
        assert_eq!(fields.get("charset").unwrap(), "utf-8");
    }

    #[test]
    fn response_message_includes_expected_fields() {
        let mut mech = DigestMd5::new(Credentials {
            username: "chris".into(),
            password: "secret".into(),
            realm: Some("elwood.innosoft.com".into()),
            ..Default::default()
        });
        let challenge = br#"realm="elwood.innosoft.com",nonce="OA6MG9tEQGm2hh",qop="auth",algorithm=md5-sess"#;
        let step = mech.step(challenge).unwrap();
        let bytes = match step {
            Step::Respond(b) => b,
            Step::Done => panic!("expected a response"),
        };
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("username=\"chris\""));
        assert!(text.contains("realm=\"elwood.innosoft.com\""));
        assert!(text.contains("nonce=\"OA6MG9tEQGm2hh\""));
        assert!(text.contains("digest-uri=\"sieve/elwood.innosoft.com\""));
        assert!(text.contains("response="));
        assert!(text.contains("charset=utf-8"));
    }

    #[test]
    fn second_step_acks_rspauth_with_empty_response() {
        let mut mech = DigestMd5::new(Credentials {
            username: "u".into(),
            password: "p".into(),
            ..Default::default()
        });
        mech.step(br#"realm="r",nonce="n",qop="auth""#).unwrap();
        match mech.step(b"rspauth=abcdef").unwrap() {
            Step::Respond(bytes) => assert!(bytes.is_empty()),
            Step::Done => panic!("expected an empty ack response"),
        }
        assert!(mech.step(b"anything").is_err());
    }
}
