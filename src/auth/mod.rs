// =============================================================================
// Authentication service — credentials, session lifecycle, persistence
// =============================================================================
//
// Login order of preference:
//
//   1. Restore persisted session material (corrupt file -> delete, fall
//      through; a restored token is probed before it is trusted).
//   2. Fresh credential login. A configured device token skips the
//      interactive challenge; otherwise a TOTP code is generated from the
//      challenge secret. The code itself never appears on any log surface.
//
// Session material persists with owner-only permissions (0o600). Logout
// failures are logged but never fatal.
// =============================================================================

pub mod totp;

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{self, AuditLogger, LogDomain};
use crate::broker::{BrokerApi, LoginRequest, SessionData};
use crate::config::BotConfig;
use crate::error::{TradingError, TradingResult};
use crate::resilience::{with_retry, RetryPolicy};

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Validated authentication inputs. Secret fields are private; the only
/// display form is the masked payload.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: String,
    mfa_secret: Option<String>,
    device_token: Option<String>,
}

impl Credentials {
    pub fn from_config(cfg: &BotConfig) -> TradingResult<Self> {
        let username = cfg.username.trim().to_string();
        if !is_email_shaped(&username) {
            return Err(TradingError::invalid_input(
                "ROBINHOOD_USERNAME must be an email address",
            ));
        }
        if cfg.password.is_empty() {
            return Err(TradingError::invalid_input(
                "ROBINHOOD_PASSWORD must not be empty",
            ));
        }
        if let Some(secret) = &cfg.mfa_secret {
            if !totp::is_valid_secret(secret) {
                return Err(TradingError::invalid_input(
                    "ROBINHOOD_MFA_SECRET must be base32",
                ));
            }
        }
        if let Some(token) = &cfg.device_token {
            if Uuid::parse_str(token).is_err() {
                return Err(TradingError::invalid_input(
                    "ROBINHOOD_DEVICE_TOKEN is not a valid device token",
                ));
            }
        }
        Ok(Self {
            username,
            password: cfg.password.clone(),
            mfa_secret: cfg.mfa_secret.clone(),
            device_token: cfg.device_token.clone(),
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Masked representation for audit records.
    fn masked(&self) -> serde_json::Value {
        json!({
            "username": audit::mask_username(&self.username),
            "password": audit::MASKED_PASSWORD,
            "mfa_secret": self.mfa_secret.as_deref().map(audit::mask_secret),
            "device_token": self.device_token.as_deref().map(audit::mask_device_token),
        })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &audit::mask_username(&self.username))
            .field("password", &audit::MASKED_PASSWORD)
            .finish()
    }
}

fn is_email_shaped(username: &str) -> bool {
    match username.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
        }
        None => false,
    }
}

// ---------------------------------------------------------------------------
// AuthService
// ---------------------------------------------------------------------------

pub struct AuthService {
    broker: Arc<dyn BrokerApi>,
    credentials: Credentials,
    session_path: PathBuf,
    audit: Arc<AuditLogger>,
    session: RwLock<Option<SessionData>>,
}

impl AuthService {
    pub fn new(
        broker: Arc<dyn BrokerApi>,
        credentials: Credentials,
        session_path: PathBuf,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self {
            broker,
            credentials,
            session_path,
            audit,
            session: RwLock::new(None),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.read().is_some()
    }

    pub fn get_session(&self) -> Option<SessionData> {
        self.session.read().clone()
    }

    /// Establish a usable session: restore first, fresh login otherwise.
    pub async fn login(&self) -> TradingResult<()> {
        if self.try_restore().await {
            return Ok(());
        }

        let via_device_token = self.credentials.device_token.is_some();
        if via_device_token {
            info!("login via device token");
        } else if self.credentials.mfa_secret.is_some() {
            info!("login challenge response will be generated");
        }

        let session = with_retry(
            || async {
                // The challenge code is time-based, so rebuild it per attempt.
                let mfa_code = match (&self.credentials.device_token, &self.credentials.mfa_secret)
                {
                    (Some(_), _) => None,
                    (None, Some(secret)) => Some(totp::generate(secret, crate::clock::now_utc())?),
                    (None, None) => None,
                };
                let request = LoginRequest {
                    username: self.credentials.username.clone(),
                    password: self.credentials.password.clone(),
                    mfa_code,
                    device_token: self.credentials.device_token.clone(),
                };
                self.broker.login(&request).await
            },
            &RetryPolicy::default(),
        )
        .await?;

        self.persist(&session);
        *self.session.write() = Some(session);
        self.audit.event(
            LogDomain::Bot,
            "auth.login",
            None,
            json!({
                "credentials": self.credentials.masked(),
                "via_device_token": via_device_token,
                "restored": false,
            }),
        );
        Ok(())
    }

    /// Re-establish the session after expiry without a full credential flow.
    pub async fn refresh_token(&self) -> TradingResult<bool> {
        let Some(current) = self.get_session() else {
            return Ok(false);
        };
        let refreshed = self.broker.refresh(&current).await?;
        self.persist(&refreshed);
        *self.session.write() = Some(refreshed);
        info!("broker session refreshed");
        Ok(true)
    }

    /// Broker logout, session file removal, in-memory clear. Never fatal.
    pub async fn logout(&self) {
        if let Err(e) = self.broker.logout().await {
            warn!(error = %e, "broker logout failed — clearing local session anyway");
        }
        if self.session_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.session_path) {
                warn!(error = %e, "could not remove persisted session file");
            }
        }
        *self.session.write() = None;
        self.audit
            .event(LogDomain::Bot, "auth.logout", None, json!({}));
    }

    // -------------------------------------------------------------------------
    // Persistence
    // -------------------------------------------------------------------------

    /// Attempt to restore a persisted session. Returns true when the restored
    /// session is installed and usable. Any parse failure deletes the file.
    async fn try_restore(&self) -> bool {
        let raw = match std::fs::read_to_string(&self.session_path) {
            Ok(raw) => raw,
            Err(_) => return false,
        };

        let session: SessionData = match serde_json::from_str(&raw) {
            Ok(session) => session,
            Err(e) => {
                warn!(
                    path = %self.session_path.display(),
                    error = %e,
                    "persisted session unparseable — deleting"
                );
                let _ = std::fs::remove_file(&self.session_path);
                return false;
            }
        };

        match self.broker.restore(&session).await {
            Ok(()) => {
                *self.session.write() = Some(session);
                self.audit.event(
                    LogDomain::Bot,
                    "auth.login",
                    None,
                    json!({"restored": true}),
                );
                info!("session restored from persisted material");
                true
            }
            Err(e) => {
                warn!(error = %e, "persisted session rejected by broker — deleting");
                let _ = std::fs::remove_file(&self.session_path);
                false
            }
        }
    }

    fn persist(&self, session: &SessionData) {
        let write = || -> std::io::Result<()> {
            let content = serde_json::to_string_pretty(session)?;
            std::fs::write(&self.session_path, content)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(
                    &self.session_path,
                    std::fs::Permissions::from_mode(0o600),
                )?;
            }
            Ok(())
        };
        if let Err(e) = write() {
            warn!(
                path = %self.session_path.display(),
                error = %e,
                "could not persist session material"
            );
        }
    }
}
