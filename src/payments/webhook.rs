//! Inbound gateway webhook events
//!
//! Providers decode their own payload formats into [`WebhookEvent`]; the
//! checkout flow only acts on events it understands.

use hmac::{Hmac, Mac};
use sha2::Sha512;

type HmacSha512 = Hmac<Sha512>;

/// A decoded, signature-checked webhook event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    /// A charge for the given gateway reference completed
    ChargeSucceeded { reference: String },
    /// Any other event, kept by name for logging
    Ignored { event: String },
}

/// Outcome reported back to the webhook caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// The intent moved to successful and the subscription was ensured
    Reconciled { intent_id: String },
    /// The intent was already reconciled by another path
    AlreadyReconciled { intent_id: String },
    /// No stored intent carries the reference
    UnknownReference { reference: String },
    Ignored { event: String },
}

/// Hex HMAC-SHA512 of `payload` under `secret`
pub fn sign_sha512(secret: &str, payload: &[u8]) -> String {
    let mut mac =
        HmacSha512::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Compare a hex HMAC-SHA512 signature in constant time
pub fn verify_sha512(secret: &str, payload: &[u8], signature: &str) -> bool {
    let provided = match hex::decode(signature.trim()) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac =
        HmacSha512::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload);
    mac.verify_slice(&provided).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_round_trip() {
        let payload = br#"{"event":"charge.success"}"#;
        let signature = sign_sha512("sk_test_secret", payload);
        assert!(verify_sha512("sk_test_secret", payload, &signature));
    }

    #[test]
    fn test_signature_rejects_tampering() {
        let signature = sign_sha512("sk_test_secret", br#"{"event":"charge.success"}"#);
        assert!(!verify_sha512(
            "sk_test_secret",
            br#"{"event":"charge.success","hacked":true}"#,
            &signature
        ));
        assert!(!verify_sha512("other_secret", br#"{"event":"charge.success"}"#, &signature));
        assert!(!verify_sha512("sk_test_secret", b"{}", "not-hex"));
    }
}
