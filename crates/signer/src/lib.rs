//! The Signer component (A). The rest of the system is polymorphic over the
//! [`Signer`] trait; the concrete backend is chosen once at startup from
//! `SIGNER_BACKEND`.

use async_trait::async_trait;
use ethers::core::k256::ecdsa::RecoveryId;
use ethers::signers::{LocalWallet, Signer as EthersSigner};
use ethers::types::{Address, Signature, H256};

#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    /// Transient — the signing backend could not be reached this time.
    #[error("signer unavailable: {0}")]
    Unavailable(String),
    /// Fatal — the backend refused to sign (e.g. policy rejection).
    #[error("signer denied: {0}")]
    Denied(String),
}

/// A 32-byte message digest plus the raw (`r`, `s`, `v`) signature bytes
/// over it, ready for RLP assembly of a type-3 transaction.
#[derive(Debug, Clone, Copy)]
pub struct RawSignature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    pub y_parity: bool,
}

#[async_trait]
pub trait Signer: Send + Sync {
    fn address(&self) -> Address;

    /// Signs a 32-byte digest (e.g. the keccak256 of an RLP-encoded
    /// unsigned type-3 transaction) and returns the raw signature.
    async fn sign_digest(&self, digest: H256) -> Result<RawSignature, SignerError>;

    /// Signs an arbitrary message using the Ethereum "personal_sign"
    /// prefix, for off-chain signature recovery (not used for the blob tx
    /// itself, but for verifying the payload signer against the escrow's
    /// recorded `user`).
    async fn sign_message(&self, message: &[u8]) -> Result<Signature, SignerError>;
}

/// In-memory raw-key backend, wrapping `ethers::signers::LocalWallet`.
pub struct RawKeySigner {
    wallet: LocalWallet,
}

impl RawKeySigner {
    pub fn new(private_key: &str, chain_id: u64) -> Result<Self, SignerError> {
        let wallet: LocalWallet = private_key
            .parse()
            .map_err(|e| SignerError::Denied(format!("invalid private key: {e}")))?;
        Ok(Self {
            wallet: wallet.with_chain_id(chain_id),
        })
    }
}

#[async_trait]
impl Signer for RawKeySigner {
    fn address(&self) -> Address {
        self.wallet.address()
    }

    async fn sign_digest(&self, digest: H256) -> Result<RawSignature, SignerError> {
        let signature: Signature = self
            .wallet
            .sign_hash(digest)
            .map_err(|e| SignerError::Denied(e.to_string()))?;
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        signature.r.to_big_endian(&mut r);
        signature.s.to_big_endian(&mut s);
        let y_parity = match signature.v {
            0 | 1 => signature.v == 1,
            v => RecoveryId::from_byte(((v + 1) % 2) as u8).is_some() && v % 2 == 0,
        };
        Ok(RawSignature { r, s, y_parity })
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Signature, SignerError> {
        self.wallet
            .sign_message(message)
            .await
            .map_err(|e| SignerError::Denied(e.to_string()))
    }
}

/// Remote KMS/HSM backend. A complete HSM integration is out of scope for
/// this proxy; this stub documents the seam the rest of the system is
/// written against, talking to a signing endpoint that exposes `/address`
/// and `/sign` over HTTP.
pub struct KmsSigner {
    endpoint: String,
    address: Address,
    client: reqwest::Client,
}

impl KmsSigner {
    pub async fn connect(endpoint: &str) -> Result<Self, SignerError> {
        let client = reqwest::Client::new();
        let resp = client
            .get(format!("{endpoint}/address"))
            .send()
            .await
            .map_err(|e| SignerError::Unavailable(e.to_string()))?
            .json::<AddressResponse>()
            .await
            .map_err(|e| SignerError::Unavailable(e.to_string()))?;
        let address: Address = resp
            .address
            .parse()
            .map_err(|e| SignerError::Unavailable(format!("{e}")))?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            address,
            client,
        })
    }
}

#[derive(serde::Deserialize)]
struct AddressResponse {
    address: String,
}

#[derive(serde::Serialize)]
struct SignDigestRequest {
    digest: String,
}

#[derive(serde::Deserialize)]
struct SignDigestResponse {
    r: String,
    s: String,
    y_parity: bool,
}

#[async_trait]
impl Signer for KmsSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign_digest(&self, digest: H256) -> Result<RawSignature, SignerError> {
        let resp = self
            .client
            .post(format!("{}/sign", self.endpoint))
            .json(&SignDigestRequest {
                digest: format!("0x{}", hex::encode(digest.as_bytes())),
            })
            .send()
            .await
            .map_err(|e| SignerError::Unavailable(e.to_string()))?
            .json::<SignDigestResponse>()
            .await
            .map_err(|e| SignerError::Unavailable(e.to_string()))?;

        let r = decode_32(&resp.r)?;
        let s = decode_32(&resp.s)?;
        Ok(RawSignature {
            r,
            s,
            y_parity: resp.y_parity,
        })
    }

    async fn sign_message(&self, _message: &[u8]) -> Result<Signature, SignerError> {
        Err(SignerError::Denied(
            "KMS backend does not support personal-message signing".into(),
        ))
    }
}

fn decode_32(hex_str: &str) -> Result<[u8; 32], SignerError> {
    let bytes = hex::decode(hex_str.trim_start_matches("0x"))
        .map_err(|e| SignerError::Unavailable(e.to_string()))?;
    if bytes.len() != 32 {
        return Err(SignerError::Unavailable("expected 32-byte component".into()));
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}
