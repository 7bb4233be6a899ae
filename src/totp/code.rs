use super::TotpError;
use totp_rs::{Algorithm, Secret, TOTP};

pub const DIGITS: usize = 6;
pub const STEP_SECONDS: u64 = 30;
/// Adjacent steps accepted on either side of the current one.
pub const SKEW_STEPS: u8 = 1;

/// What a client needs to enroll an authenticator app.
#[derive(Debug, Clone)]
pub struct Enrollment {
    pub secret_base32: String,
    pub otpauth_uri: String,
}

/// RFC 6238 codes: SHA-1, 6 digits, 30 second step, one step of skew.
#[derive(Debug, Clone)]
pub struct OneTimeCodeVerifier {
    issuer: String,
}

impl OneTimeCodeVerifier {
    /// `:` is not allowed in an otpauth issuer and is stripped.
    #[must_use]
    pub fn new(issuer: &str) -> Self {
        Self {
            issuer: issuer.replace(':', ""),
        }
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Fresh 160-bit shared secret.
    ///
    /// # Errors
    /// Returns an error if the generated secret cannot be decoded.
    pub fn generate_secret() -> Result<Vec<u8>, TotpError> {
        Secret::generate_secret()
            .to_bytes()
            .map_err(|err| TotpError::Secret(err.to_string()))
    }

    fn totp(&self, secret: &[u8], account_name: &str) -> Result<TOTP, TotpError> {
        TOTP::new(
            Algorithm::SHA1,
            DIGITS,
            SKEW_STEPS,
            STEP_SECONDS,
            secret.to_vec(),
            Some(self.issuer.clone()),
            account_name.replace(':', ""),
        )
        .map_err(|err| TotpError::Secret(err.to_string()))
    }

    /// # Errors
    /// Returns an error if the secret is too short.
    pub fn enrollment(&self, secret: &[u8], account_name: &str) -> Result<Enrollment, TotpError> {
        let totp = self.totp(secret, account_name)?;
        Ok(Enrollment {
            secret_base32: totp.get_secret_base32(),
            otpauth_uri: totp.get_url(),
        })
    }

    /// # Errors
    /// Returns an error if the secret is too short.
    pub fn code_at(&self, secret: &[u8], unix_seconds: u64) -> Result<String, TotpError> {
        Ok(self.totp(secret, "code")?.generate(unix_seconds))
    }

    /// Accepts the code for the step containing `unix_seconds` or either neighbour.
    ///
    /// Anything that is not exactly six ASCII digits is rejected without
    /// computing a code.
    ///
    /// # Errors
    /// Returns an error if the secret is too short.
    pub fn verify_at(&self, secret: &[u8], code: &str, unix_seconds: u64) -> Result<bool, TotpError> {
        let code = code.trim();
        if code.len() != DIGITS || !code.bytes().all(|byte| byte.is_ascii_digit()) {
            return Ok(false);
        }
        Ok(self.totp(secret, "code")?.check(code, unix_seconds))
    }
}
