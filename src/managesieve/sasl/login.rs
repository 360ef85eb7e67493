//! SASL LOGIN: no initial response; the server prompts twice, for username
//! then password, in whatever order/wording it likes — this mechanism just
//! answers the first two challenges it sees in that order.

use crate::error::AuthError;

use super::{Credentials, SaslMechanism, Step};

pub struct Login {
    creds: Credentials,
    replied: u8,
}

impl Login {
    pub fn new(creds: Credentials) -> Self {
        Login { creds, replied: 0 }
    }
}

impl SaslMechanism for Login {
    fn name(&self) -> &'static str {
        "LOGIN"
    }

    fn initial_response(&mut self) -> Option<Vec<u8>> {
        None
    }

    fn step(&mut self, _challenge: &[u8]) -> Result<Step, AuthError> {
        match self.replied {
            0 => {
                self.replied = 1;
                Ok(Step::Respond(self.creds.username.clone().into_bytes()))
            }
            1 => {
                self.replied = 2;
                Ok(Step::Respond(self.creds.password.clone().into_bytes()))
            }
            _ => Err(AuthError::ExchangeFailed(
                "LOGIN mechanism received more challenges than expected".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers_username_then_password_in_order() {
        let mut login = Login::new(Credentials {
            username: "alice".into(),
            password: "hunter2".into(),
            ..Default::default()
        });
        assert!(login.initial_response().is_none());
        match login.step(b"Username:").unwrap() {
            Step::Respond(bytes) => assert_eq!(bytes, b"alice"),
            Step::Done => panic!("expected a response"),
        }
        match login.step(b"Password:").unwrap() {
            Step::Respond(bytes) => assert_eq!(bytes, b"hunter2"),
            Step::Done => panic!("expected a response"),
        }
        assert!(login.step(b"?").is_err());
    }
}
