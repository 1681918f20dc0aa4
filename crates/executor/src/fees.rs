//! Blob gas fee market (EIP-4844) and the EIP-1559 execution fee oracle
//! used for the blob transaction's non-blob gas fields.

use ethers::providers::{Http, Middleware, Provider};
use ethers::types::U256;
use serde::{Deserialize, Serialize};

pub const MIN_BASE_FEE_PER_BLOB_GAS: u64 = 1;
pub const BLOB_BASE_FEE_UPDATE_FRACTION: u64 = 3_338_477;
pub const GAS_PER_BLOB: u64 = 1 << 17;

/// Taylor-series approximation of `factor * e^(numerator/denominator)`,
/// exactly as specified by EIP-4844.
pub fn fake_exponential(factor: u128, numerator: u128, denominator: u128) -> u128 {
    let mut i: u128 = 1;
    let mut output: u128 = 0;
    let mut numerator_accum = factor * denominator;

    while numerator_accum > 0 {
        output += numerator_accum;
        numerator_accum = (numerator_accum * numerator) / (denominator * i);
        i += 1;
    }

    output / denominator
}

#[derive(Debug, Deserialize, Serialize)]
struct BlockHeaderFields {
    #[serde(default, rename = "baseFeePerGas")]
    base_fee_per_gas: Option<String>,
    #[serde(default, rename = "excessBlobGas")]
    excess_blob_gas: Option<String>,
}

fn parse_hex_u128(value: &str) -> u128 {
    u128::from_str_radix(value.trim_start_matches("0x"), 16).unwrap_or(0)
}

/// `excessBlobGas` and `baseFeePerGas` are Cancun header fields not exposed
/// by ethers' typed `Block<H256>` in the pinned version, so they are read
/// via a raw `eth_getBlockByNumber` call instead.
pub async fn latest_header_fields(provider: &Provider<Http>) -> anyhow::Result<(u128, u128)> {
    let raw: BlockHeaderFields = provider
        .request("eth_getBlockByNumber", ("latest", false))
        .await?;

    let base_fee = raw.base_fee_per_gas.as_deref().map(parse_hex_u128).unwrap_or(0);
    let excess_blob_gas = raw.excess_blob_gas.as_deref().map(parse_hex_u128).unwrap_or(0);
    Ok((base_fee, excess_blob_gas))
}

pub fn blob_gas_price(excess_blob_gas: u128) -> u128 {
    fake_exponential(
        MIN_BASE_FEE_PER_BLOB_GAS as u128,
        excess_blob_gas,
        BLOB_BASE_FEE_UPDATE_FRACTION as u128,
    )
}

#[derive(Debug, Clone, Copy)]
pub struct BlobFeeEstimate {
    pub max_fee_per_blob_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

/// Derives the blob-gas and execution-gas fee caps for a single-blob
/// transaction, with `maxFeePerBlobGas >= blobGasPrice * 1.5` as the spec
/// requires, and the EIP-1559 fields from the execution fee oracle.
pub async fn estimate(provider: &Provider<Http>) -> anyhow::Result<BlobFeeEstimate> {
    let (_, excess_blob_gas) = latest_header_fields(provider).await?;
    let price = blob_gas_price(excess_blob_gas);
    // 1.5x multiplier kept in integer arithmetic: (price * 3) / 2.
    let max_fee_per_blob_gas = U256::from((price * 3) / 2);

    let (max_fee_per_gas, max_priority_fee_per_gas) = provider.estimate_eip1559_fees(None).await?;

    Ok(BlobFeeEstimate {
        max_fee_per_blob_gas,
        max_fee_per_gas,
        max_priority_fee_per_gas,
    })
}
