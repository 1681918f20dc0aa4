use ethers::contract::abigen;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Provider};
use ethers::signers::LocalWallet;

abigen!(
    BlobEscrow,
    r#"[
        function getJobDetails(bytes32 jobId) external view returns (address user, uint256 amount, uint256 timestamp, bool completed, bytes32 blobTxHash, bytes32 paymentTxHash)
        function getJobTimeout() external view returns (uint256)
        function completeJob(bytes32 jobId, bytes32 blobTxHash) external
        function refundExpiredJob(bytes32 jobId) external
    ]"#
);

/// The signer-backed ethers client used for escrow writes. Reads go
/// through the same client's inner provider so the breaker wraps both
/// uniformly.
pub type EscrowSigningClient = SignerMiddleware<Provider<Http>, LocalWallet>;
