//! Authentication and session lifecycle.
//!
//! Registration and login live on the HTTP surface; sockets authenticate by
//! presenting the bearer token in their first `join` event. A token maps to
//! at most one principal, and binding is per socket.

pub mod password;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::store::Store;
use nexus_proto::id::entity_id;
use nexus_proto::model::UserStatus;
use rand::RngCore;
use rand::rngs::OsRng;
use std::sync::Arc;
use tracing::info;

/// Avatar glyph and color pools for fresh accounts.
const COLORS: [&str; 8] = [
    "#e06c75", "#d19a66", "#e5c07b", "#98c379", "#56b6c2", "#61afef", "#c678dd", "#be5046",
];

/// Authenticated identity bound to a socket.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: String,
    pub session_token: String,
}

/// Outcome of register/login, consumed by the HTTP layer.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub token: String,
    pub user: crate::store::UserRow,
}

pub struct SessionManager {
    store: Store,
    token_ttl_secs: i64,
}

impl SessionManager {
    pub fn new(store: Store, config: &Config) -> Arc<Self> {
        Arc::new(Self {
            store,
            token_ttl_secs: config.token_ttl.as_secs() as i64,
        })
    }

    /// Register a new account: user row, Personal server, first session.
    pub async fn register(&self, username: &str, password: &str) -> AppResult<LoginOutcome> {
        validate_username(username)?;
        if password.len() < 8 {
            return Err(AppError::Validation(
                "password must be at least 8 characters".into(),
            ));
        }

        let hash = password::hash_password(password.to_string())
            .await
            .map_err(|e| AppError::Internal(format!("password hashing failed: {e}")))?;

        let user_id = entity_id("u");
        let color = COLORS[rand::random::<usize>() % COLORS.len()];
        let avatar = username
            .chars()
            .next()
            .map(|c| c.to_uppercase().to_string())
            .unwrap_or_else(|| "?".into());

        let user = self
            .store
            .users()
            .create(&user_id, username, &hash, color, &avatar)
            .await
            .map_err(|e| {
                if e.is_unique_violation() {
                    AppError::Conflict(format!("username {username} is taken"))
                } else {
                    AppError::Store(e)
                }
            })?;

        // Every user owns exactly one Personal server.
        self.store
            .servers()
            .provision_personal(&entity_id("s"), &user_id, &entity_id("r"))
            .await?;

        let token = self.issue_token(&user_id).await?;
        info!(user = %user_id, username = %username, "account registered");
        Ok(LoginOutcome { token, user })
    }

    pub async fn login(&self, username: &str, password: &str) -> AppResult<LoginOutcome> {
        let Some(user) = self.store.users().by_username(username).await? else {
            // Unknown username still pays for a full hash verification, so
            // the response time does not reveal whether the account exists.
            dummy_password_verify(password).await;
            return Err(AppError::AuthInvalid);
        };
        let ok = password::verify_password(password.to_string(), user.password_hash.clone())
            .await
            .map_err(|e| AppError::Internal(format!("password verification failed: {e}")))?;
        if !ok {
            return Err(AppError::AuthInvalid);
        }

        let token = self.issue_token(&user.id).await?;
        info!(user = %user.id, "login");
        Ok(LoginOutcome { token, user })
    }

    /// Resolve a bearer token to a principal.
    pub async fn authenticate(&self, token: &str) -> AppResult<Principal> {
        let Some(session) = self.store.users().session(token).await? else {
            return Err(AppError::AuthInvalid);
        };
        if session.revoked != 0 {
            return Err(AppError::AuthInvalid);
        }
        if session.is_expired(chrono::Utc::now().timestamp()) {
            return Err(AppError::AuthExpired);
        }
        let user = self.store.users().by_id(&session.user_id).await?;
        if user.deleted != 0 {
            return Err(AppError::AuthInvalid);
        }
        Ok(Principal {
            user_id: session.user_id,
            session_token: session.token,
        })
    }

    pub async fn logout(&self, token: &str) -> AppResult<()> {
        self.store.users().revoke_session(token).await?;
        Ok(())
    }

    /// Soft-retire the account behind a token and revoke every session.
    pub async fn delete_account(&self, token: &str) -> AppResult<String> {
        let principal = self.authenticate(token).await?;
        self.store.users().soft_delete(&principal.user_id).await?;
        info!(user = %principal.user_id, "account deleted");
        Ok(principal.user_id)
    }

    /// Declared status (`online`/`idle`/`dnd`/`offline`) as the user set it.
    pub async fn set_declared_status(&self, user_id: &str, status: UserStatus) -> AppResult<()> {
        let value = match status {
            UserStatus::Online => "online",
            UserStatus::Idle => "idle",
            UserStatus::Dnd => "dnd",
            UserStatus::Offline => "offline",
        };
        self.store.users().set_declared_status(user_id, value).await?;
        Ok(())
    }

    async fn issue_token(&self, user_id: &str) -> AppResult<String> {
        let mut raw = [0u8; 32];
        OsRng.fill_bytes(&mut raw);
        let token: String = raw.iter().map(|b| format!("{b:02x}")).collect();
        self.store
            .users()
            .insert_session(&token, user_id, self.token_ttl_secs)
            .await?;
        Ok(token)
    }
}

/// Dummy password verification for constant-time account lookup.
async fn dummy_password_verify(password: &str) {
    // Argon2id hash of "password" with the default parameters.
    const DUMMY_HASH: &str =
        "$argon2id$v=19$m=19456,t=2,p=1$gZiV/M1gPc22ElAH/Jh1Hw$CWOrkoo7oJBQ/iyh7uJ0LO2aLEfrHwTWllSAxT0zRno";
    let _ = password::verify_password(password.to_string(), DUMMY_HASH.to_string()).await;
}

/// Username rules: 1-32 chars from a restricted set, starting alphanumeric.
fn validate_username(username: &str) -> AppResult<()> {
    if username.is_empty() || username.len() > 32 {
        return Err(AppError::Validation(
            "username must be 1-32 characters".into(),
        ));
    }
    let mut chars = username.chars();
    let first = chars.next().unwrap_or(' ');
    if !first.is_ascii_alphanumeric() {
        return Err(AppError::Validation(
            "username must start with a letter or digit".into(),
        ));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(AppError::Validation(
            "username may only contain letters, digits, '_', '.' and '-'".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dummy_verify_accepts_any_input() {
        dummy_password_verify("test").await;
        dummy_password_verify("").await;
        dummy_password_verify(&"x".repeat(100)).await;
    }

    #[test]
    fn username_rules() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("a1_b.c-d").is_ok());
        assert!(validate_username("").is_err());
        assert!(validate_username("_leading").is_err());
        assert!(validate_username("space name").is_err());
        assert!(validate_username(&"x".repeat(33)).is_err());
    }
}
