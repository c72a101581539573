use async_trait::async_trait;

use crate::model::{Caller, Role, UserId};

/// Credentials presented in a connection's `hello` frame.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub password: String,
    pub user: UserId,
    pub role: Role,
}

/// Turns a handshake into an authenticated caller.
#[async_trait]
pub trait AuthSource: Send + Sync {
    /// `None` rejects the connection.
    async fn authenticate(&self, credentials: &Credentials) -> Option<Caller>;
}

/// One password shared by every trusted front end. The front end vouches
/// for the user id and role it forwards.
#[derive(Debug)]
pub struct SharedSecretAuth {
    password: String,
}

impl SharedSecretAuth {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[async_trait]
impl AuthSource for SharedSecretAuth {
    async fn authenticate(&self, credentials: &Credentials) -> Option<Caller> {
        constant_time_eq(credentials.password.as_bytes(), self.password.as_bytes())
            .then(|| Caller::new(credentials.user, credentials.role))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(password: &str) -> Credentials {
        Credentials {
            password: password.into(),
            user: UserId::new(),
            role: Role::Provider,
        }
    }

    #[tokio::test]
    async fn accepts_matching_password() {
        let auth = SharedSecretAuth::new("s3cret".into());
        let c = creds("s3cret");
        let caller = auth.authenticate(&c).await.unwrap();
        assert_eq!(caller, Caller::new(c.user, Role::Provider));
    }

    #[tokio::test]
    async fn rejects_wrong_or_prefix_password() {
        let auth = SharedSecretAuth::new("s3cret".into());
        assert!(auth.authenticate(&creds("s3cre")).await.is_none());
        assert!(auth.authenticate(&creds("s3cret!")).await.is_none());
        assert!(auth.authenticate(&creds("")).await.is_none());
    }
}
