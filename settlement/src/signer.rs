//! Wallet signing capability.
//!
//! The settlement layer never holds key material. It is handed a
//! [`WalletSigner`] and asks it to sign; whether that is a browser wallet,
//! a hardware device, or an in-process keypair is not our business.
//!
//! [`KeypairSigner`] is the in-process implementation, used by services
//! that custody their own payout key and by the test suite.

use async_trait::async_trait;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;

use crate::transaction::SettlementTransaction;
use crate::types::Address;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignerError {
    /// The transaction's fee payer is not the account this signer controls.
    #[error("signer {signer} cannot sign for fee payer {fee_payer}")]
    WrongSigner { signer: Address, fee_payer: Address },

    /// Signing without a sequencing token would produce a useless signature.
    #[error("transaction has no sequencing token")]
    MissingSequencingToken,

    /// The wallet (or its user) declined.
    #[error("signing request rejected: {0}")]
    Rejected(String),
}

/// Signs settlement transactions on behalf of one account.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    /// The account whose signature this signer produces.
    fn address(&self) -> Address;

    /// Returns `tx` with its fee-payer signature set.
    async fn sign(&self, tx: SettlementTransaction) -> Result<SettlementTransaction, SignerError>;
}

/// An Ed25519 keypair held in memory. The address is the base58 public key.
pub struct KeypairSigner {
    signing_key: SigningKey,
    address: Address,
}

impl std::fmt::Debug for KeypairSigner {
    // Never print key bytes.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeypairSigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl KeypairSigner {
    /// Fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    /// Deterministic keypair from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(seed))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let address = Address::new(bs58::encode(signing_key.verifying_key().as_bytes()).into_string());
        Self {
            signing_key,
            address,
        }
    }

    /// Synchronous signing, for callers that are not in an async context.
    pub fn sign_in_place(&self, tx: &mut SettlementTransaction) -> Result<(), SignerError> {
        if tx.fee_payer != self.address {
            return Err(SignerError::WrongSigner {
                signer: self.address.clone(),
                fee_payer: tx.fee_payer.clone(),
            });
        }
        if tx.sequencing_token.is_none() {
            return Err(SignerError::MissingSequencingToken);
        }
        let signature = self.signing_key.sign(&tx.signable_bytes());
        tx.signature = Some(bs58::encode(signature.to_bytes()).into_string());
        Ok(())
    }
}

#[async_trait]
impl WalletSigner for KeypairSigner {
    fn address(&self) -> Address {
        self.address.clone()
    }

    async fn sign(
        &self,
        mut tx: SettlementTransaction,
    ) -> Result<SettlementTransaction, SignerError> {
        self.sign_in_place(&mut tx)?;
        Ok(tx)
    }
}

/// Checks the fee payer's signature against the transaction's current
/// signable bytes. `false` for unsigned, malformed, or stale signatures.
pub fn verify_fee_payer_signature(tx: &SettlementTransaction) -> bool {
    let Some(sig_b58) = tx.signature.as_deref() else {
        return false;
    };

    let key_bytes: [u8; 32] = match bs58::decode(tx.fee_payer.as_str()).into_vec() {
        Ok(bytes) => match bytes.try_into() {
            Ok(arr) => arr,
            Err(_) => return false,
        },
        Err(_) => return false,
    };
    let sig_bytes: [u8; 64] = match bs58::decode(sig_b58).into_vec() {
        Ok(bytes) => match bytes.try_into() {
            Ok(arr) => arr,
            Err(_) => return false,
        },
        Err(_) => return false,
    };

    let Ok(verifying_key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };
    let signature = Signature::from_bytes(&sig_bytes);
    verifying_key
        .verify(&tx.signable_bytes(), &signature)
        .is_ok()
}
