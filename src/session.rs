use crate::token::TokenMinter;

/// Credential holder for one virtual user. Owned by exactly one VU task;
/// concurrent VUs each hold their own, so credentials cannot
/// cross-contaminate.
#[derive(Debug)]
pub struct Session {
    subject: String,
    credential: Option<String>,
    iterations: u64,
}

impl Session {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            credential: None,
            iterations: 0,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn credential(&self) -> Option<&str> {
        self.credential.as_deref()
    }

    /// Mints the initial credential (empty cart snapshot) if none is held.
    /// An existing credential is left untouched; there is no client-side
    /// expiry check.
    pub fn ensure(&mut self, minter: &TokenMinter) -> Result<(), jsonwebtoken::errors::Error> {
        if self.credential.is_none() {
            self.credential = Some(minter.mint(&self.subject, &[])?);
        }
        Ok(())
    }

    /// Adopts a server-issued replacement; `None` keeps the current token.
    pub fn rotate(&mut self, candidate: Option<String>) {
        if let Some(token) = candidate {
            self.credential = Some(token);
        }
    }

    /// Bumps and returns the iteration counter.
    pub fn begin_iteration(&mut self) -> u64 {
        self.iterations += 1;
        self.iterations
    }
}
