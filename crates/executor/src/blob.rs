//! Field-element blob layout and KZG commitment/proof construction.

use c_kzg::{Blob as KzgBlob, KzgCommitment, KzgProof, KzgSettings};
use ethers::types::H256;
use sha2::{Digest, Sha256};
use std::sync::Arc;

pub const FIELD_ELEMENTS_PER_BLOB: usize = 4096;
pub const BYTES_PER_FIELD_ELEMENT: usize = 32;
pub const BLOB_SIZE_BYTES: usize = FIELD_ELEMENTS_PER_BLOB * BYTES_PER_FIELD_ELEMENT;
const VERSIONED_HASH_VERSION_KZG: u8 = 0x01;

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("payload does not fit in a single blob: {0} bytes > {BLOB_SIZE_BYTES} field-element budget")]
    TooLarge(usize),
    #[error("kzg error: {0}")]
    Kzg(String),
}

/// A payload laid out into the 4096 x 32-byte field-element grid required
/// by the blob transaction format. Each field element's leading byte is
/// forced to zero so every element is a valid member of the BLS scalar
/// field regardless of payload content.
pub struct EncodedBlob {
    pub bytes: [u8; BLOB_SIZE_BYTES],
}

impl EncodedBlob {
    /// Packs `payload` 31 bytes at a time into each 32-byte field element,
    /// leaving the leading byte zero. Returns `TooLarge` if the payload
    /// does not fit in the 4096-element budget this way.
    pub fn encode(payload: &[u8]) -> Result<Self, BlobError> {
        let usable_bytes_per_element = BYTES_PER_FIELD_ELEMENT - 1;
        let capacity = usable_bytes_per_element * FIELD_ELEMENTS_PER_BLOB;
        if payload.len() > capacity {
            return Err(BlobError::TooLarge(payload.len()));
        }

        let mut bytes = [0u8; BLOB_SIZE_BYTES];
        for (i, chunk) in payload.chunks(usable_bytes_per_element).enumerate() {
            let offset = i * BYTES_PER_FIELD_ELEMENT;
            bytes[offset + 1..offset + 1 + chunk.len()].copy_from_slice(chunk);
        }
        Ok(Self { bytes })
    }

    fn as_kzg_blob(&self) -> KzgBlob {
        KzgBlob::from_bytes(&self.bytes).expect("blob layout is always exactly BYTES_PER_BLOB long")
    }
}

/// `commitment = BlobToCommitment(blob)`, `proof = ComputeBlobProof(blob,
/// commitment)`, `versionedHash = CommitmentToVersionedHash(commitment)`.
pub struct BlobCommitment {
    pub commitment: [u8; 48],
    pub proof: [u8; 48],
    pub versioned_hash: H256,
}

pub fn commit(blob: &EncodedBlob, settings: &Arc<KzgSettings>) -> Result<BlobCommitment, BlobError> {
    let kzg_blob = blob.as_kzg_blob();

    let commitment = KzgCommitment::blob_to_kzg_commitment(&kzg_blob, settings)
        .map_err(|e| BlobError::Kzg(format!("{e:?}")))?;
    let commitment_bytes: [u8; 48] = *commitment.to_bytes().as_ref();

    let proof = KzgProof::compute_blob_kzg_proof(&kzg_blob, &commitment.to_bytes(), settings)
        .map_err(|e| BlobError::Kzg(format!("{e:?}")))?;
    let proof_bytes: [u8; 48] = *proof.to_bytes().as_ref();

    let versioned_hash = kzg_to_versioned_hash(&commitment_bytes);

    Ok(BlobCommitment {
        commitment: commitment_bytes,
        proof: proof_bytes,
        versioned_hash,
    })
}

fn kzg_to_versioned_hash(commitment: &[u8; 48]) -> H256 {
    let mut hasher = Sha256::new();
    hasher.update(commitment);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out[0] = VERSIONED_HASH_VERSION_KZG;
    out[1..].copy_from_slice(&digest[1..]);
    H256::from(out)
}
