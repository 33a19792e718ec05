use crate::application_impl::RefreshTokenMinter;
use crate::application_port::*;
use crate::domain_model::{DEFAULT_MAX_REFRESH_TOKENS, Role, UserId, UserProfile};
use crate::domain_port::{Clock, CredentialRecord, CredentialStore, RotateOutcome};
use std::sync::Arc;

const USERNAME_LEN: std::ops::RangeInclusive<usize> = 3..=20;
const MIN_PASSWORD_LEN: usize = 6;

pub struct RealAuthService {
    store: Arc<dyn CredentialStore>,
    credential_hasher: Arc<dyn CredentialHasher>,
    token_codec: Arc<dyn TokenCodec>,
    minter: Arc<RefreshTokenMinter>,
    clock: Arc<dyn Clock>,
    max_refresh_tokens: usize,
}

impl RealAuthService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        credential_hasher: Arc<dyn CredentialHasher>,
        token_codec: Arc<dyn TokenCodec>,
        minter: Arc<RefreshTokenMinter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            credential_hasher,
            token_codec,
            minter,
            clock,
            max_refresh_tokens: DEFAULT_MAX_REFRESH_TOKENS,
        }
    }

    pub fn with_max_refresh_tokens(mut self, cap: usize) -> Self {
        self.max_refresh_tokens = cap.max(1);
        self
    }

    fn validate_signup(&self, username: &str, email: &str, password: &str) -> Result<(), AuthError> {
        if !USERNAME_LEN.contains(&username.chars().count()) {
            return Err(AuthError::Validation(format!(
                "username must be {} to {} characters",
                USERNAME_LEN.start(),
                USERNAME_LEN.end()
            )));
        }
        if !is_valid_email(email) {
            return Err(AuthError::Validation("please include a valid email".to_string()));
        }
        Self::validate_password(password)
    }

    fn validate_password(password: &str) -> Result<(), AuthError> {
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::Validation(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        Ok(())
    }

    #[inline]
    fn normalize_email(email: &str) -> String {
        email.trim().to_lowercase()
    }

    /// Issue an access token and persist a fresh refresh token for `user_id`.
    async fn issue_tokens(&self, user_id: UserId) -> Result<AuthTokens, AuthError> {
        let (access_token, access_token_expires_at) =
            self.token_codec.issue_access_token(user_id).await?;
        let (refresh_token, record) = self.minter.mint(self.clock.now())?;
        let refresh_token_expires_at = record.expires_at;

        let evicted = self
            .store
            .push_refresh_token(user_id, record, self.max_refresh_tokens)
            .await?;
        if evicted > 0 {
            tracing::debug!(%user_id, evicted, "evicted oldest refresh tokens");
        }

        Ok(AuthTokens {
            access_token,
            refresh_token,
            access_token_expires_at,
            refresh_token_expires_at,
        })
    }
}

/// Shape check only: a non-empty local part and a dotted domain.
fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

#[async_trait::async_trait]
impl AuthService for RealAuthService {
    async fn register(&self, request: RegisterInput) -> Result<AuthTokens, AuthError> {
        let RegisterInput {
            username,
            email,
            password,
        } = request;
        let username = username.trim().to_string();
        let email = Self::normalize_email(&email);

        self.validate_signup(&username, &email, &password)?;

        let password_hash = self.credential_hasher.hash_password(&password).await?;
        let user_id = UserId::new_random();
        self.store
            .create_user(CredentialRecord {
                user_id,
                username,
                email,
                password_hash,
                role: Role::User,
                created_at: self.clock.now(),
            })
            .await?;

        tracing::info!(%user_id, "user registered");
        self.issue_tokens(user_id).await
    }

    async fn login(&self, request: LoginInput) -> Result<AuthTokens, AuthError> {
        let LoginInput { email, password } = request;

        let rec = self
            .store
            .find_by_email(&Self::normalize_email(&email))
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        let ok = self
            .credential_hasher
            .verify_password(&password, &rec.password_hash)
            .await?;
        if !ok {
            return Err(AuthError::InvalidCredentials);
        }

        tracing::info!(user_id = %rec.user_id, "user logged in");
        self.issue_tokens(rec.user_id).await
    }

    async fn authenticate(&self, token: Option<&str>) -> Result<Identity, AuthError> {
        let token = token.map(str::trim).filter(|t| !t.is_empty());
        let Some(token) = token else {
            return Err(AuthError::NoToken);
        };
        self.token_codec
            .verify_access_token(&AccessToken(token.to_string()))
            .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<AuthTokens, AuthError> {
        let presented = refresh_token.trim();
        if presented.is_empty() {
            return Err(AuthError::InvalidRefreshToken);
        }

        let now = self.clock.now();
        let presented_digest = self.minter.digest(presented)?;
        let (replacement_token, replacement) = self.minter.mint(now)?;
        let refresh_token_expires_at = replacement.expires_at;

        let outcome = self
            .store
            .rotate_refresh_token(&presented_digest, replacement, self.max_refresh_tokens, now)
            .await?;

        let user_id = match outcome {
            RotateOutcome::Rotated { user_id, evicted } => {
                tracing::debug!(%user_id, evicted, "refresh token rotated");
                user_id
            }
            RotateOutcome::Expired { user_id } => {
                tracing::debug!(%user_id, "expired refresh token presented");
                return Err(AuthError::ExpiredRefreshToken);
            }
            RotateOutcome::Missing => return Err(AuthError::InvalidRefreshToken),
        };

        let (access_token, access_token_expires_at) =
            self.token_codec.issue_access_token(user_id).await?;

        Ok(AuthTokens {
            access_token,
            refresh_token: replacement_token,
            access_token_expires_at,
            refresh_token_expires_at,
        })
    }

    async fn logout(&self, user_id: UserId, refresh_token: &str) -> Result<(), AuthError> {
        let digest = self.minter.digest(refresh_token.trim())?;
        let removed = self.store.revoke_refresh_token(user_id, &digest).await?;
        tracing::info!(%user_id, removed, "user logged out");
        Ok(())
    }

    async fn current_user(&self, user_id: UserId) -> Result<UserProfile, AuthError> {
        self.store
            .find_by_id(user_id)
            .await?
            .map(|rec| rec.profile())
            .ok_or(AuthError::UserNotFound)
    }

    async fn change_password(
        &self,
        user_id: UserId,
        request: ChangePasswordInput,
    ) -> Result<(), AuthError> {
        let ChangePasswordInput {
            current_password,
            new_password,
        } = request;

        let rec = self
            .store
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        let ok = self
            .credential_hasher
            .verify_password(&current_password, &rec.password_hash)
            .await?;
        if !ok {
            return Err(AuthError::InvalidCredentials);
        }
        Self::validate_password(&new_password)?;

        let password_hash = self.credential_hasher.hash_password(&new_password).await?;
        let revoked = self.store.change_password(user_id, &password_hash).await?;
        tracing::info!(%user_id, revoked, "password changed");
        Ok(())
    }
}
