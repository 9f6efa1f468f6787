// src/core/bus/secure.rs

use super::BusMessage;
use crate::core::errors::CoredgeError;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;
pub type Signature = [u8; 32];

const UNSIGNED: Signature = [0u8; 32];

/// The datagram actually sent over UDP: a bus message, the sender's wall clock,
/// and an HMAC over both.
#[derive(Serialize, Deserialize, bincode::Encode, bincode::Decode, Debug, Clone)]
pub struct SecureBusMessage {
    pub message: BusMessage,
    pub timestamp_ms: u64,
    pub signature: Signature,
}

fn mac_for(
    message: &BusMessage,
    timestamp_ms: u64,
    password: &str,
) -> Result<HmacSha256, CoredgeError> {
    let bytes = bincode::encode_to_vec((message, timestamp_ms), bincode::config::standard())
        .map_err(|e| CoredgeError::Internal(format!("Failed to encode bus message: {e}")))?;
    let mut mac = HmacSha256::new_from_slice(password.as_bytes())
        .map_err(|_| CoredgeError::Internal("Failed to create HMAC instance".into()))?;
    mac.update(&bytes);
    Ok(mac)
}

impl SecureBusMessage {
    /// Signs `message`. Without a password the signature is all zeros.
    pub fn new(
        message: BusMessage,
        timestamp_ms: u64,
        password: &Option<String>,
    ) -> Result<Self, CoredgeError> {
        let Some(pass) = password else {
            return Ok(Self {
                message,
                timestamp_ms,
                signature: UNSIGNED,
            });
        };

        let signature_bytes = mac_for(&message, timestamp_ms, pass)?
            .finalize()
            .into_bytes();
        let signature: Signature = signature_bytes
            .as_slice()
            .try_into()
            .map_err(|_| CoredgeError::Internal("Invalid signature length".into()))?;

        Ok(Self {
            message,
            timestamp_ms,
            signature,
        })
    }

    /// Checks the signature against our password.
    pub fn verify(&self, password: &Option<String>) -> Result<bool, CoredgeError> {
        let Some(pass) = password else {
            return Ok(self.signature == UNSIGNED);
        };
        if self.signature == UNSIGNED {
            return Ok(false);
        }
        let mac = mac_for(&self.message, self.timestamp_ms, pass)?;
        Ok(mac.verify_slice(&self.signature).is_ok())
    }

    /// True if the sender's clock is within `window_ms` of ours, in either direction.
    pub fn is_fresh(&self, now_ms: u64, window_ms: u64) -> bool {
        now_ms.saturating_sub(self.timestamp_ms) <= window_ms
            && self.timestamp_ms.saturating_sub(now_ms) <= window_ms
    }

    pub fn encode(&self) -> Result<Vec<u8>, CoredgeError> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| CoredgeError::Internal(format!("Failed to encode datagram: {e}")))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CoredgeError> {
        bincode::decode_from_slice::<Self, _>(bytes, bincode::config::standard())
            .map(|(message, _)| message)
            .map_err(|e| CoredgeError::Protocol(format!("Malformed bus datagram: {e}")))
    }
}
