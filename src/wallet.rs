use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{read_keypair_file, Keypair, Signer};
use solana_sdk::transaction::VersionedTransaction;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalletError {
    /// The user declined to sign.
    #[error("user rejected the request")]
    Rejected,
    #[error("signing failed: {0}")]
    Signing(String),
}

impl WalletError {
    /// Adapters that only report a message are classified the way wallet UIs word rejections.
    pub fn from_message(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("user rejected") || lower.contains("user denied") {
            WalletError::Rejected
        } else {
            WalletError::Signing(message.to_string())
        }
    }
}

/// The connected wallet.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    fn pubkey(&self) -> Pubkey;
    async fn sign_transaction(&self, tx: VersionedTransaction) -> Result<VersionedTransaction, WalletError>;
}

/// Local keypair wallet; never prompts, so it never rejects.
pub struct KeypairWallet {
    keypair: Keypair,
}

impl KeypairWallet {
    pub fn new(keypair: Keypair) -> Self {
        Self { keypair }
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let keypair = read_keypair_file(path)
            .map_err(|e| anyhow::anyhow!("failed to read keypair {}: {e}", path.display()))?;
        Ok(Self::new(keypair))
    }
}

#[async_trait]
impl WalletSigner for KeypairWallet {
    fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    async fn sign_transaction(&self, tx: VersionedTransaction) -> Result<VersionedTransaction, WalletError> {
        VersionedTransaction::try_new(tx.message, &[&self.keypair])
            .map_err(|e| WalletError::Signing(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::hash::Hash;
    use solana_sdk::instruction::{AccountMeta, Instruction};
    use solana_sdk::message::{Message, VersionedMessage};
    use solana_sdk::signature::Signature;

    fn unsigned_for(payer: &Pubkey) -> VersionedTransaction {
        let ix = Instruction::new_with_bytes(
            Pubkey::new_unique(),
            &[7],
            vec![AccountMeta::new(*payer, true)],
        );
        let message = Message::new_with_blockhash(&[ix], Some(payer), &Hash::new_unique());
        VersionedTransaction {
            signatures: vec![Signature::default()],
            message: VersionedMessage::Legacy(message),
        }
    }

    #[test]
    fn rejection_messages_are_recognised() {
        assert_eq!(
            WalletError::from_message("WalletSignTransactionError: User rejected the request."),
            WalletError::Rejected
        );
        assert!(matches!(
            WalletError::from_message("Ledger disconnected"),
            WalletError::Signing(_)
        ));
    }

    #[tokio::test]
    async fn keypair_wallet_signs_its_own_transactions() {
        let wallet = KeypairWallet::new(Keypair::new());
        let signed = wallet
            .sign_transaction(unsigned_for(&wallet.pubkey()))
            .await
            .unwrap();
        assert_ne!(signed.signatures[0], Signature::default());
        assert!(signed.verify_with_results().iter().all(|ok| *ok));
    }

    #[tokio::test]
    async fn keypair_wallet_refuses_foreign_payer() {
        let wallet = KeypairWallet::new(Keypair::new());
        let err = wallet
            .sign_transaction(unsigned_for(&Pubkey::new_unique()))
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::Signing(_)));
    }
}
