//! Capture authorization tokens.
//!
//! A [`CaptureToken`] is the evidence that the platform granted screen
//! capture. Tokens are only constructed from an accepted grant and are
//! invalidated exactly once when the owning session is destroyed.

/// Result code a platform grant carries when the user accepted the capture
/// prompt.
pub const GRANT_OK: i32 = 0;

/// Raw grant handed back by the platform's capture-consent flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureGrant {
    /// Platform result code ([`GRANT_OK`] means accepted).
    pub code: i32,
    /// Opaque payload handle backing the capture session. Zero means the
    /// platform returned nothing.
    pub payload: u64,
}

impl CaptureGrant {
    /// Grant representing an accepted capture prompt.
    pub fn accepted(payload: u64) -> Self {
        Self {
            code: GRANT_OK,
            payload,
        }
    }

    /// Grant representing a denied or cancelled capture prompt.
    pub fn denied(code: i32) -> Self {
        Self { code, payload: 0 }
    }
}

/// Authorization to capture the screen, derived from an accepted grant.
///
/// Invalidation is one-way: once invalidated a token never becomes valid
/// again.
#[derive(Debug)]
pub struct CaptureToken {
    code: i32,
    payload: u64,
    valid: bool,
}

impl CaptureToken {
    /// Build a token from a platform grant. Returns `None` when the grant
    /// was denied or the platform returned no payload.
    pub fn from_grant(grant: CaptureGrant) -> Option<Self> {
        if grant.code != GRANT_OK || grant.payload == 0 {
            return None;
        }

        Some(Self {
            code: grant.code,
            payload: grant.payload,
            valid: true,
        })
    }

    /// Whether the token is still usable for starting captures.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// The platform result code this token was built from.
    pub fn code(&self) -> i32 {
        self.code
    }

    /// The opaque platform payload handle.
    pub fn payload(&self) -> u64 {
        self.payload
    }

    /// Invalidate the token. Idempotent.
    pub fn invalidate(&mut self) {
        self.valid = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_from_accepted_grant() {
        let token = CaptureToken::from_grant(CaptureGrant::accepted(42)).unwrap();
        assert!(token.is_valid());
        assert_eq!(token.payload(), 42);
        assert_eq!(token.code(), GRANT_OK);
    }

    #[test]
    fn test_denied_grant_yields_no_token() {
        assert!(CaptureToken::from_grant(CaptureGrant::denied(1)).is_none());
    }

    #[test]
    fn test_empty_payload_yields_no_token() {
        let grant = CaptureGrant {
            code: GRANT_OK,
            payload: 0,
        };
        assert!(CaptureToken::from_grant(grant).is_none());
    }

    #[test]
    fn test_invalidate_is_one_way_and_idempotent() {
        let mut token = CaptureToken::from_grant(CaptureGrant::accepted(7)).unwrap();
        assert!(token.is_valid());

        token.invalidate();
        assert!(!token.is_valid());

        token.invalidate();
        assert!(!token.is_valid());
    }
}
