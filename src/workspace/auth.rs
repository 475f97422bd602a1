//! Password hashing, sign-in/sign-up and bearer sessions.

use std::collections::HashMap;
use std::sync::Arc;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::access::Viewer;
use super::models::*;
use super::store::{Snapshot, new_id};
use crate::errors::{AuthError, WorkspaceError};

pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AuthError::Hash(e.to_string()))
}

/// Check a password against a PHC hash string. An unparsable hash never matches.
pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Organization id derived from its display name: lowercase, with every
/// character outside `[a-z0-9]` replaced by `-`.
pub fn org_slug(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                '-'
            }
        })
        .collect()
}

pub fn avatar_url(name: &str) -> String {
    format!("https://picsum.photos/seed/{}/50", name)
}

/// Login id inside an organization: the local part of the given address at the org id.
pub fn login_id(email: &str, org_id: &str) -> String {
    let local = email.split('@').next().unwrap_or_default().trim();
    format!("{}@{}", local, org_id)
}

// ── Sign-in / sign-up ─────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SignUpMode {
    /// Found a new organization and become its admin.
    Create,
    /// Join an existing organization with an invite token.
    Join,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignUpRequest {
    pub mode: SignUpMode,
    #[serde(default)]
    pub org_name: Option<String>,
    pub full_name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub invite_token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignUpOutcome {
    pub user: PublicUser,
    pub message: String,
    pub mode: SignUpMode,
}

/// Resolve the user behind an e-mail/password pair.
///
/// Unknown e-mail and wrong password both yield `InvalidCredentials`.
pub fn sign_in(snap: &Snapshot, email: &str, password: &str) -> Result<User, AuthError> {
    let user = snap
        .user_by_email(email.trim())
        .ok_or(AuthError::InvalidCredentials)?;
    if !verify_password(password, &user.password_hash) {
        return Err(AuthError::InvalidCredentials);
    }
    Ok(user.clone())
}

/// Register a user, creating their organization or consuming an invite.
///
/// `password_hash` is computed by the caller so the slow hash runs outside
/// the store lock. Must run inside a store transaction: on error the
/// organization created in `Create` mode is rolled back with the rest.
pub fn sign_up(
    snap: &mut Snapshot,
    req: SignUpRequest,
    password_hash: String,
    require_approval: bool,
) -> Result<SignUpOutcome, AuthError> {
    let full_name = req.full_name.trim().to_string();
    if full_name.is_empty() {
        return Err(WorkspaceError::invalid("Full name is required.").into());
    }
    if req.email.trim().is_empty() || req.password.is_empty() {
        return Err(WorkspaceError::invalid("E-mail and password are required.").into());
    }

    let (organization, role, status) = match req.mode {
        SignUpMode::Create => {
            let org_name = req
                .org_name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .ok_or_else(|| WorkspaceError::invalid("Organization name is required."))?;
            let organization = Organization {
                id: org_slug(org_name),
                name: org_name.to_string(),
                invite_tokens: Vec::new(),
            };
            snap.add_organization(organization.clone())?;
            (organization, UserRole::Admin, UserStatus::Active)
        }
        SignUpMode::Join => {
            let token = req
                .invite_token
                .as_deref()
                .filter(|t| !t.is_empty())
                .ok_or_else(|| WorkspaceError::invalid("An invite token is required."))?;
            let organization = snap
                .consume_invite_token(token)
                .ok_or(AuthError::InvalidInvite)?;
            let status = if require_approval {
                UserStatus::PendingApproval
            } else {
                UserStatus::Active
            };
            (organization, UserRole::Member, status)
        }
    };

    let user = User {
        id: new_id("user"),
        name: full_name.clone(),
        email: login_id(&req.email, &organization.id),
        password_hash,
        role,
        avatar: avatar_url(&full_name),
        organization_id: organization.id.clone(),
        status,
    };
    snap.add_user(user.clone())?;

    let message = match (req.mode, status) {
        (SignUpMode::Create, _) => format!(
            "Your organization is ready! Your new login ID is {}.",
            user.email
        ),
        (SignUpMode::Join, UserStatus::Active) => format!(
            "Welcome to {}! Your account is active. Your new login ID is {}.",
            organization.name, user.email
        ),
        (SignUpMode::Join, UserStatus::PendingApproval) => format!(
            "Welcome to {}! An administrator must approve your account. Your new login ID is {}.",
            organization.name, user.email
        ),
    };

    tracing::info!(
        user_id = %user.id,
        org = %organization.id,
        mode = ?req.mode,
        "User signed up"
    );

    Ok(SignUpOutcome {
        user: PublicUser::from(&user),
        message,
        mode: req.mode,
    })
}

/// Add a fresh single-use invite token to `org`.
pub fn issue_invite(snap: &mut Snapshot, org: &str) -> Result<String, WorkspaceError> {
    let token = format!("invite-{}", Uuid::new_v4());
    snap.add_invite_token(org, token.clone())?;
    Ok(token)
}

/// Admin-only: invite token for the viewer's organization.
pub fn generate_invite(snap: &mut Snapshot, viewer: &Viewer) -> Result<String, WorkspaceError> {
    viewer.require_admin("generate invite links")?;
    issue_invite(snap, viewer.org())
}

// ── Sessions ──────────────────────────────────────────────────────────

/// Upper bound on the session lifetime (ten years).
pub const MAX_SESSION_TTL_HOURS: u64 = 87_600;

#[derive(Debug, Clone)]
struct Session {
    user_id: String,
    expires_at: DateTime<Utc>,
}

/// In-process bearer token map. Sessions do not survive a restart.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl_hours: u64) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            ttl: Duration::hours(ttl_hours.min(MAX_SESSION_TTL_HOURS) as i64),
        }
    }

    pub async fn issue(&self, user_id: &str) -> String {
        let token = Uuid::new_v4().to_string();
        let session = Session {
            user_id: user_id.to_string(),
            expires_at: Utc::now() + self.ttl,
        };
        self.sessions.write().await.insert(token.clone(), session);
        token
    }

    /// User id behind `token`. Expired sessions are dropped on access.
    pub async fn resolve(&self, token: &str) -> Result<String, AuthError> {
        let now = Utc::now();
        {
            let sessions = self.sessions.read().await;
            match sessions.get(token) {
                Some(s) if s.expires_at > now => return Ok(s.user_id.clone()),
                Some(_) => {}
                None => return Err(AuthError::Unauthenticated),
            }
        }
        self.sessions.write().await.remove(token);
        Err(AuthError::Unauthenticated)
    }

    pub async fn revoke(&self, token: &str) -> bool {
        self.sessions.write().await.remove(token).is_some()
    }

    /// Drop every session of a user, e.g. after the account is removed.
    pub async fn revoke_user(&self, user_id: &str) {
        self.sessions
            .write()
            .await
            .retain(|_, s| s.user_id != user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::store::fixtures::{ORG, snapshot};

    fn signup(mode: SignUpMode) -> SignUpRequest {
        SignUpRequest {
            mode,
            org_name: None,
            full_name: "Nina New".into(),
            email: "nina@example.com".into(),
            password: "hunter2".into(),
            invite_token: None,
        }
    }

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("s3cret").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("s3cret", &hash));
        assert!(!verify_password("wrong", &hash));
    }

    #[test]
    fn test_verify_fails_closed_on_garbage_hash() {
        assert!(!verify_password("password", ""));
        assert!(!verify_password("password", "not-a-phc-string"));
    }

    #[test]
    fn test_org_slug() {
        assert_eq!(org_slug("Acme Corp."), "acme-corp-");
        assert_eq!(org_slug("TickTrek Inc"), "ticktrek-inc");
        assert_eq!(org_slug("A1_b2"), "a1-b2");
    }

    #[test]
    fn test_login_id_uses_local_part() {
        assert_eq!(login_id("nina@example.com", "acme"), "nina@acme");
        assert_eq!(login_id("nina", "acme"), "nina@acme");
    }

    #[test]
    fn test_sign_in_is_case_insensitive_and_vague() {
        let mut snap = snapshot();
        snap.users[0].password_hash = hash_password("letmein").unwrap();

        let user = sign_in(&snap, "ADMIN.user@TickTrek-Inc", "letmein").unwrap();
        assert_eq!(user.id, "user-1");

        let wrong = sign_in(&snap, "admin.user@ticktrek-inc", "nope").unwrap_err();
        let unknown = sign_in(&snap, "ghost@ticktrek-inc", "letmein").unwrap_err();
        assert_eq!(wrong.to_string(), unknown.to_string());
    }

    #[test]
    fn test_no_fixed_password_backdoor() {
        let mut snap = snapshot();
        snap.users[0].password_hash = hash_password("letmein").unwrap();
        assert!(sign_in(&snap, "admin.user@ticktrek-inc", "password").is_err());
    }

    #[test]
    fn test_sign_up_create_makes_active_admin() {
        let mut snap = snapshot();
        let mut req = signup(SignUpMode::Create);
        req.org_name = Some("Acme Corp".into());
        let out = sign_up(&mut snap, req, "hash".into(), true).unwrap();

        assert_eq!(out.user.role, UserRole::Admin);
        assert_eq!(out.user.status, UserStatus::Active);
        assert_eq!(out.user.email, "nina@acme-corp");
        assert_eq!(out.user.avatar, "https://picsum.photos/seed/Nina New/50");
        assert!(snap.organization("acme-corp").is_some());
        assert!(out.message.contains("nina@acme-corp"));
    }

    #[test]
    fn test_sign_up_create_rejects_existing_org() {
        let mut snap = snapshot();
        let mut req = signup(SignUpMode::Create);
        req.org_name = Some("TickTrek Inc".into());
        let err = sign_up(&mut snap, req, "hash".into(), false).unwrap_err();
        assert!(matches!(
            err,
            AuthError::Workspace(WorkspaceError::Conflict(_))
        ));
    }

    #[test]
    fn test_sign_up_join_consumes_token() {
        let mut snap = snapshot();
        let token = issue_invite(&mut snap, ORG).unwrap();
        assert!(token.starts_with("invite-"));

        let mut req = signup(SignUpMode::Join);
        req.invite_token = Some(token.clone());
        let out = sign_up(&mut snap, req.clone(), "hash".into(), false).unwrap();
        assert_eq!(out.user.role, UserRole::Member);
        assert_eq!(out.user.status, UserStatus::Active);
        assert_eq!(out.user.organization_id, ORG);

        // Second use of the same link fails.
        req.email = "other@example.com".into();
        assert!(matches!(
            sign_up(&mut snap, req, "hash".into(), false).unwrap_err(),
            AuthError::InvalidInvite
        ));
    }

    #[test]
    fn test_sign_up_join_pending_when_approval_required() {
        let mut snap = snapshot();
        let token = issue_invite(&mut snap, ORG).unwrap();
        let mut req = signup(SignUpMode::Join);
        req.invite_token = Some(token);
        let out = sign_up(&mut snap, req, "hash".into(), true).unwrap();
        assert_eq!(out.user.status, UserStatus::PendingApproval);
    }

    #[test]
    fn test_sign_up_duplicate_login_id() {
        let mut snap = snapshot();
        let token = issue_invite(&mut snap, ORG).unwrap();
        let mut req = signup(SignUpMode::Join);
        req.invite_token = Some(token);
        req.email = "Admin.User@gmail.com".into();
        let err = sign_up(&mut snap, req, "hash".into(), false).unwrap_err();
        assert!(matches!(
            err,
            AuthError::Workspace(WorkspaceError::Conflict(_))
        ));
    }

    #[test]
    fn test_generate_invite_is_admin_only() {
        let mut snap = snapshot();
        let member = Viewer::resolve(&snap, "user-3").unwrap();
        assert!(generate_invite(&mut snap, &member).is_err());

        let admin = Viewer::resolve(&snap, "user-1").unwrap();
        let token = generate_invite(&mut snap, &admin).unwrap();
        assert!(
            snap.organization(ORG)
                .unwrap()
                .invite_tokens
                .contains(&token)
        );
    }

    #[tokio::test]
    async fn test_sessions_issue_resolve_revoke() {
        let sessions = SessionStore::new(1);
        let token = sessions.issue("user-3").await;
        assert_eq!(sessions.resolve(&token).await.unwrap(), "user-3");
        assert!(sessions.revoke(&token).await);
        assert!(matches!(
            sessions.resolve(&token).await.unwrap_err(),
            AuthError::Unauthenticated
        ));
    }

    #[tokio::test]
    async fn test_expired_session_is_rejected() {
        let sessions = SessionStore::new(0);
        let token = sessions.issue("user-3").await;
        assert!(sessions.resolve(&token).await.is_err());
    }

    #[tokio::test]
    async fn test_revoke_user_drops_all_their_sessions() {
        let sessions = SessionStore::new(1);
        let a = sessions.issue("user-3").await;
        let b = sessions.issue("user-3").await;
        let c = sessions.issue("user-4").await;
        sessions.revoke_user("user-3").await;
        assert!(sessions.resolve(&a).await.is_err());
        assert!(sessions.resolve(&b).await.is_err());
        assert!(sessions.resolve(&c).await.is_ok());
    }
}
