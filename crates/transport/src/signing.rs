//! Request signing.
//!
//! Every outbound call carries five metadata entries that let the receiver
//! authenticate the caller:
//!
//! | key           | value                                         |
//! |---------------|-----------------------------------------------|
//! | `x-signature` | hex of the 65-byte recoverable signature      |
//! | `x-signer-id` | checksummed address derived from the key      |
//! | `x-timestamp` | unix seconds at signing time                  |
//! | `x-nonce`     | 16 random bytes, hex                          |
//! | `x-chain-id`  | chain / subnet identifier                     |
//!
//! The signed message is the compact JSON object
//! `{"chain_id","method","nonce","request","timestamp"}` with keys sorted at
//! every depth. `request` is omitted when the body is absent or empty. The
//! message is hashed with Keccak-256 and signed with secp256k1.

use crate::error::{SigningError, SigningResult};
use alloy_primitives::{keccak256, Address};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use tonic::metadata::{MetadataMap, MetadataValue};

/// Metadata key for the hex signature.
pub const SIGNATURE_KEY: &str = "x-signature";
/// Metadata key for the signer address.
pub const SIGNER_ID_KEY: &str = "x-signer-id";
/// Metadata key for the signing timestamp.
pub const TIMESTAMP_KEY: &str = "x-timestamp";
/// Metadata key for the per-call nonce.
pub const NONCE_KEY: &str = "x-nonce";
/// Metadata key for the chain identifier.
pub const CHAIN_ID_KEY: &str = "x-chain-id";

/// Length of a recoverable signature: `r || s || v`.
pub const SIGNATURE_LEN: usize = 65;

/// secp256k1 key with its derived address.
#[derive(Clone)]
pub struct Signer {
    key: SigningKey,
    address: Address,
}

impl Signer {
    /// Wrap an existing signing key.
    pub fn new(key: SigningKey) -> Self {
        let address = address_of(key.verifying_key());
        Self { key, address }
    }

    /// Parse a 32-byte hex private key, with or without `0x` prefix.
    pub fn from_hex(private_key: &str) -> SigningResult<Self> {
        let trimmed = private_key.trim();
        let trimmed = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        let bytes = hex::decode(trimmed).map_err(|e| SigningError::InvalidKey(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(SigningError::InvalidKey(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            )));
        }

        let key =
            SigningKey::from_slice(&bytes).map_err(|e| SigningError::InvalidKey(e.to_string()))?;
        Ok(Self::new(key))
    }

    /// Address derived from the public key.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Sign `data` (hashed with Keccak-256), returning `r || s || v`.
    pub fn sign(&self, data: &[u8]) -> SigningResult<[u8; SIGNATURE_LEN]> {
        let digest = keccak256(data);
        let (signature, recovery_id) = self.key.sign_prehash_recoverable(digest.as_slice())?;

        let mut out = [0u8; SIGNATURE_LEN];
        out[..64].copy_from_slice(&signature.to_bytes());
        out[64] = recovery_id.to_byte();
        Ok(out)
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Address for a public key: last 20 bytes of the Keccak-256 of the
/// uncompressed point without its prefix byte.
pub fn address_of(key: &VerifyingKey) -> Address {
    let point = key.as_affine().to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

/// Recover the address that produced `signature` over `data`.
///
/// Accepts recovery ids in both `0/1` and `27/28` form.
pub fn recover_signer(data: &[u8], signature: &[u8]) -> SigningResult<Address> {
    if signature.len() != SIGNATURE_LEN {
        return Err(SigningError::InvalidSignature(format!(
            "expected {SIGNATURE_LEN} bytes, got {}",
            signature.len()
        )));
    }

    let sig = Signature::from_slice(&signature[..64])?;
    let v = signature[64];
    let v = if v >= 27 { v - 27 } else { v };
    let recovery_id = RecoveryId::from_byte(v)
        .ok_or_else(|| SigningError::InvalidSignature(format!("bad recovery id {v}")))?;

    let digest = keccak256(data);
    let key = VerifyingKey::recover_from_prehash(digest.as_slice(), &sig, recovery_id)?;
    Ok(address_of(&key))
}

#[derive(Serialize)]
struct CanonicalPayload<'a> {
    chain_id: &'a str,
    method: &'a str,
    nonce: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request: Option<Value>,
    timestamp: i64,
}

/// Canonical bytes signed for one call.
pub fn canonical_payload(
    chain_id: &str,
    method: &str,
    timestamp: i64,
    nonce: &str,
    request: Option<Value>,
) -> SigningResult<Vec<u8>> {
    let request = request.map(canonicalize).filter(|body| match body {
        Value::Null => false,
        Value::Object(map) => !map.is_empty(),
        _ => true,
    });

    let payload = CanonicalPayload {
        chain_id,
        method,
        nonce,
        request,
        timestamp,
    };
    Ok(serde_json::to_vec(&payload)?)
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (key, value) in entries {
                sorted.insert(key, canonicalize(value));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Fresh 16-byte hex nonce.
pub fn generate_nonce() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

/// The five authentication entries for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedMetadata {
    /// Hex signature, no prefix.
    pub signature: String,
    /// Checksummed signer address.
    pub signer_id: String,
    /// Unix seconds.
    pub timestamp: i64,
    /// Hex nonce.
    pub nonce: String,
    /// Chain identifier.
    pub chain_id: String,
}

impl SignedMetadata {
    /// Key/value pairs in header form.
    pub fn pairs(&self) -> [(&'static str, String); 5] {
        [
            (SIGNATURE_KEY, self.signature.clone()),
            (SIGNER_ID_KEY, self.signer_id.clone()),
            (TIMESTAMP_KEY, self.timestamp.to_string()),
            (NONCE_KEY, self.nonce.clone()),
            (CHAIN_ID_KEY, self.chain_id.clone()),
        ]
    }

    /// Insert the entries into gRPC request metadata.
    pub fn apply(&self, metadata: &mut MetadataMap) -> SigningResult<()> {
        for (key, value) in self.pairs() {
            let value = MetadataValue::try_from(value.as_str())
                .map_err(|_| SigningError::Metadata { key })?;
            metadata.insert(key, value);
        }
        Ok(())
    }

    /// Check that the signature was produced by `signer_id` for this call.
    pub fn verify<R: Serialize + ?Sized>(
        &self,
        method: &str,
        request: Option<&R>,
    ) -> SigningResult<bool> {
        let body = request.map(serde_json::to_value).transpose()?;
        let payload =
            canonical_payload(&self.chain_id, method, self.timestamp, &self.nonce, body)?;
        let signature = hex::decode(&self.signature)
            .map_err(|e| SigningError::InvalidSignature(e.to_string()))?;
        let recovered = recover_signer(&payload, &signature)?;
        Ok(recovered.to_checksum(None) == self.signer_id)
    }
}

/// Signs calls for one key and chain id.
#[derive(Debug, Clone)]
pub struct RequestSigner {
    signer: Signer,
    chain_id: String,
}

impl RequestSigner {
    /// Create a request signer.
    pub fn new(signer: Signer, chain_id: impl Into<String>) -> Self {
        Self {
            signer,
            chain_id: chain_id.into(),
        }
    }

    /// Underlying key.
    pub fn signer(&self) -> &Signer {
        &self.signer
    }

    /// Chain identifier placed in `x-chain-id`.
    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    /// Sign a call to `method` carrying `request`.
    pub fn sign<R: Serialize + ?Sized>(
        &self,
        method: &str,
        request: Option<&R>,
    ) -> SigningResult<SignedMetadata> {
        let body = request.map(serde_json::to_value).transpose()?;
        let timestamp = chrono::Utc::now().timestamp();
        let nonce = generate_nonce();
        self.sign_with(method, body, timestamp, nonce)
    }

    /// Sign the opening of a server stream; the body is not included.
    pub fn sign_stream(&self, method: &str) -> SigningResult<SignedMetadata> {
        self.sign::<Value>(method, None)
    }

    fn sign_with(
        &self,
        method: &str,
        body: Option<Value>,
        timestamp: i64,
        nonce: String,
    ) -> SigningResult<SignedMetadata> {
        let payload = canonical_payload(&self.chain_id, method, timestamp, &nonce, body)?;
        let signature = self.signer.sign(&payload)?;

        Ok(SignedMetadata {
            signature: hex::encode(signature),
            signer_id: self.signer.address().to_checksum(None),
            timestamp,
            nonce,
            chain_id: self.chain_id.clone(),
        })
    }
}
