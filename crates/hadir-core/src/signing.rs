//! HMAC-SHA256 signatures over attendance outcomes.
//!
//! The signed message is every outcome field except the signature, each
//! written as `<byte length>:<value>`. Numbers use their shortest exact
//! decimal form; the evidence image enters as its SHA-256 digest.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::types::{AttendanceOutcome, AttendanceStatus};

type HmacSha256 = Hmac<Sha256>;

/// Domain separator so the key cannot be replayed for other message types.
const DOMAIN: &str = "hadir.attendance.v1";

/// Signs outcomes with a device-held secret.
#[derive(Clone)]
pub struct OutcomeSigner {
    key: Vec<u8>,
}

impl OutcomeSigner {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }

    fn mac(&self, outcome: &AttendanceOutcome) -> HmacSha256 {
        // HMAC accepts keys of any length.
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.key)
            .unwrap_or_else(|_| unreachable!("HMAC key length is unrestricted"));
        mac.update(canonical_message(outcome).as_bytes());
        mac
    }

    /// Compute the hex signature and store it on the outcome.
    pub fn sign(&self, outcome: &mut AttendanceOutcome) {
        let tag = self.mac(outcome).finalize().into_bytes();
        outcome.signature = Some(hex::encode(tag));
    }

    /// Constant-time check of the outcome's signature. Unsigned outcomes fail.
    pub fn verify(&self, outcome: &AttendanceOutcome) -> bool {
        let Some(sig) = outcome.signature.as_deref() else {
            return false;
        };
        let Ok(bytes) = hex::decode(sig) else {
            return false;
        };
        self.mac(outcome).verify_slice(&bytes).is_ok()
    }
}

impl std::fmt::Debug for OutcomeSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutcomeSigner").finish_non_exhaustive()
    }
}

fn canonical_message(o: &AttendanceOutcome) -> String {
    let status = match o.status {
        AttendanceStatus::Success => "SUCCESS",
        AttendanceStatus::Failed => "FAILED",
    };
    let evidence = hex::encode(Sha256::digest(o.evidence_image.as_bytes()));
    let fields = [
        DOMAIN.to_string(),
        o.id.clone(),
        o.identity_id.clone(),
        o.display_name.clone(),
        o.timestamp_utc.timestamp_millis().to_string(),
        status.to_string(),
        o.reason_code.clone().unwrap_or_default(),
        o.measured_distance_m.to_string(),
        o.location.lat.to_string(),
        o.location.lng.to_string(),
        evidence,
    ];
    let mut msg = String::new();
    for field in &fields {
        msg.push_str(&field.len().to_string());
        msg.push(':');
        msg.push_str(field);
    }
    msg
}
