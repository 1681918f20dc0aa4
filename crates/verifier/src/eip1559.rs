//! Minimal EIP-1559 (type-2) transaction assembly for the escrow's
//! `completeJob` call. The blob-carrying transaction is a separate,
//! heavier type-3 construction that lives in `blobkit-executor`; this one
//! only needs calldata, a `to`, and a gas estimate.

use blobkit_signer::Signer;
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::rlp::RlpStream;
use ethers::utils::keccak256;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Eip1559Request {
    pub chain_id: u64,
    pub nonce: U256,
    pub max_priority_fee_per_gas: U256,
    pub max_fee_per_gas: U256,
    pub gas_limit: U256,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
}

impl Eip1559Request {
    fn encode_unsigned(&self) -> Vec<u8> {
        let mut stream = RlpStream::new();
        stream.begin_list(9);
        stream.append(&self.chain_id);
        stream.append(&self.nonce);
        stream.append(&self.max_priority_fee_per_gas);
        stream.append(&self.max_fee_per_gas);
        stream.append(&self.gas_limit);
        stream.append(&self.to);
        stream.append(&self.value);
        stream.append(&self.data.as_ref());
        stream.begin_list(0); // empty access list
        let mut out = vec![0x02];
        out.extend_from_slice(stream.as_raw());
        out
    }

    pub fn signing_digest(&self) -> H256 {
        H256::from(keccak256(self.encode_unsigned()))
    }

    fn encode_signed(&self, r: [u8; 32], s: [u8; 32], y_parity: bool) -> Bytes {
        let mut stream = RlpStream::new();
        stream.begin_list(12);
        stream.append(&self.chain_id);
        stream.append(&self.nonce);
        stream.append(&self.max_priority_fee_per_gas);
        stream.append(&self.max_fee_per_gas);
        stream.append(&self.gas_limit);
        stream.append(&self.to);
        stream.append(&self.value);
        stream.append(&self.data.as_ref());
        stream.begin_list(0);
        stream.append(&(y_parity as u64));
        stream.append(&U256::from_big_endian(&r));
        stream.append(&U256::from_big_endian(&s));
        let mut out = vec![0x02];
        out.extend_from_slice(stream.as_raw());
        Bytes::from(out)
    }

    /// Signs via the polymorphic `Signer` and returns the raw transaction
    /// bytes ready for `eth_sendRawTransaction`.
    pub async fn sign(&self, signer: &Arc<dyn Signer>) -> anyhow::Result<Bytes> {
        let digest = self.signing_digest();
        let sig = signer
            .sign_digest(digest)
            .await
            .map_err(|e| anyhow::anyhow!("completeJob signing failed: {e}"))?;
        Ok(self.encode_signed(sig.r, sig.s, sig.y_parity))
    }
}
