use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

/// Shared console password. The login name only selects the acting user
/// once the session is open.
#[derive(Debug)]
pub struct ConsoleAuthSource {
    password: String,
}

impl ConsoleAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for ConsoleAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        tracing::debug!(user = login.user().unwrap_or("-"), "console login");
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
