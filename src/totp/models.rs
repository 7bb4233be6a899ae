use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{postgres::PgRow, FromRow, Row};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MfaKind {
    Totp,
    Webauthn,
}

impl MfaKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Totp => "totp",
            Self::Webauthn => "webauthn",
        }
    }

    /// Parse the persisted `mfa_methods.kind` value.
    fn from_db(value: &str) -> Result<Self, sqlx::Error> {
        match value {
            "totp" => Ok(Self::Totp),
            "webauthn" => Ok(Self::Webauthn),
            _ => Err(sqlx::Error::Decode(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid mfa_methods.kind value: {value}"),
            )))),
        }
    }
}

/// A second factor bound to an account. At most one row per kind.
#[derive(Debug, Clone)]
pub struct MfaMethod {
    pub id: Uuid,
    pub account_id: Uuid,
    pub kind: MfaKind,
    /// `nonce || ciphertext` of the shared secret.
    pub secret_ciphertext: Vec<u8>,
    pub label: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, PgRow> for MfaMethod {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let kind: String = row.try_get("kind")?;
        Ok(Self {
            id: row.try_get("id")?,
            account_id: row.try_get("account_id")?,
            kind: MfaKind::from_db(&kind)?,
            secret_ciphertext: row.try_get("secret_ciphertext")?,
            label: row.try_get("label")?,
            enabled: row.try_get("enabled")?,
            created_at: row.try_get("created_at")?,
            last_used_at: row.try_get("last_used_at")?,
        })
    }
}

/// Client-facing view; never carries the secret.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MfaMethodSummary {
    pub id: Uuid,
    pub kind: MfaKind,
    pub label: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl From<&MfaMethod> for MfaMethodSummary {
    fn from(method: &MfaMethod) -> Self {
        Self {
            id: method.id,
            kind: method.kind,
            label: method.label.clone(),
            enabled: method.enabled,
            created_at: method.created_at,
            last_used_at: method.last_used_at,
        }
    }
}
