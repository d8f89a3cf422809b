//! Signing of transaction plans

use blake2b_simd::Params;
use rand::rngs::OsRng;
use rand::RngCore;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};

use warp_sync::keys::address::Receiver;
use warp_sync::keys::KeyError;
use warp_sync::note_encryption::{encrypt_note, Note, NoteEncryptionError};
use warp_sync::primitives::{AccountId, NoteData, NoteId, ShieldedProtocol, TxId, TxOut};
use warp_sync::transaction::{
    ShieldedOutput, ShieldedSpend, Transaction, TransparentInput, TX_VERSION,
};
use warp_sync::tree::{OrchardNode, SaplingNode, TreeNode};

use super::error::WalletError;
use super::propose::{PlannedInput, TransactionPlan};
use super::LightWallet;

/// Errors that can result from signing a plan
#[allow(missing_docs)] // error types document themselves
#[derive(Debug, thiserror::Error)]
pub enum SignError {
    #[error("account {0} is watch-only")]
    WatchOnlyAccount(AccountId),
    #[error("invalid key. {0}")]
    InvalidKey(#[from] KeyError),
    #[error("{0:?} anchor of the plan is no longer in the wallet's tree")]
    StaleAnchor(ShieldedProtocol),
    #[error("plan is stale. {0}")]
    StaleWitness(String),
    #[error("failed to create spend proof. {0}")]
    Proof(String),
    #[error("failed to encrypt output. {0}")]
    Encryption(#[from] NoteEncryptionError),
    #[error("signing failed. {0}")]
    Secp(#[from] secp256k1::Error),
    #[error("wallet error. {0}")]
    Wallet(#[from] WalletError),
}

/// Creates the spend proofs of shielded inputs.
pub trait SpendProver {
    /// Proves that `input` is a note in the tree with root `anchor`, spendable with the validating key `ak`.
    fn prove_spend(
        &self,
        input: &PlannedInput,
        anchor: &[u8; 32],
        ak: &[u8],
    ) -> Result<Vec<u8>, SignError>;
}

/// Prover checking the input's witness against the anchor and committing to the spend.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalProver;

impl SpendProver for LocalProver {
    fn prove_spend(
        &self,
        input: &PlannedInput,
        anchor: &[u8; 32],
        ak: &[u8],
    ) -> Result<Vec<u8>, SignError> {
        let note = input.note();
        let (NoteId::Shielded { protocol, position }, NoteData::Shielded { cmx, .. }) =
            (note.id(), note.data())
        else {
            return Err(SignError::Proof(format!("{:?} is not a shielded note", note.id())));
        };
        let witness = input
            .witness()
            .as_ref()
            .ok_or_else(|| SignError::Proof(format!("no witness for position {position}")))?;
        if witness.position() != position {
            return Err(SignError::Proof(format!(
                "witness for position {} used for position {position}",
                witness.position()
            )));
        }
        let root = match protocol {
            ShieldedProtocol::Sapling => witness.root(SaplingNode::from_bytes(*cmx)).to_bytes(),
            ShieldedProtocol::Orchard => witness.root(OrchardNode::from_bytes(*cmx)).to_bytes(),
        };
        if &root != anchor {
            return Err(SignError::Proof(format!(
                "witness of position {position} does not match the anchor"
            )));
        }

        let proof = Params::new()
            .hash_length(32)
            .personal(b"Warp_SpendProof_")
            .to_state()
            .update(anchor)
            .update(cmx)
            .update(&position.to_le_bytes())
            .update(ak)
            .finalize();

        Ok(proof.as_bytes().to_vec())
    }
}

/// Fully authorized transaction ready for broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    /// Transaction id
    pub txid: TxId,
    /// Serialized transaction
    pub raw: Vec<u8>,
}

impl LightWallet {
    // a plan is only valid against the tree it was created from
    fn check_plan(&self, plan: &TransactionPlan) -> Result<(), SignError> {
        if self.wallet_height() != Some(plan.wallet_height()) {
            return Err(SignError::StaleWitness(format!(
                "wallet height changed from {} since planning",
                plan.wallet_height()
            )));
        }
        for (protocol, anchor) in plan.anchors() {
            if self
                .commitment_trees()
                .root_at_checkpoint(*protocol, plan.anchor_height())
                .as_ref()
                != Some(anchor)
            {
                return Err(SignError::StaleAnchor(*protocol));
            }
        }
        for input in plan.inputs() {
            let note_id = input.note().id();
            let note = self
                .notes()
                .get(&note_id)
                .ok_or(WalletError::UnknownNote(note_id))?;
            if !note.is_spendable() {
                return Err(SignError::StaleWitness(format!(
                    "note {note_id:?} is no longer spendable"
                )));
            }
        }

        Ok(())
    }

    /// Builds and signs the transaction of a plan.
    ///
    /// Fails without changing the wallet if the account can not spend, or if the wallet synced since the plan was
    /// created.
    pub fn sign_plan(
        &self,
        plan: &TransactionPlan,
        prover: &impl SpendProver,
    ) -> Result<SignedTransaction, SignError> {
        let account_id = plan.account_id();
        let account = self.account(account_id)?;
        let spending_key = account
            .spending_key()
            .ok_or(SignError::WatchOnlyAccount(account_id))?;
        self.check_plan(plan)?;

        let secp = Secp256k1::new();
        let mut transaction = Transaction {
            version: TX_VERSION,
            expiry_height: plan.expiry_height(),
            fee: plan.fee(),
            transparent_inputs: Vec::new(),
            transparent_outputs: Vec::new(),
            shielded_spends: Vec::new(),
            shielded_outputs: Vec::new(),
        };
        let mut transparent_keys: Vec<SecretKey> = Vec::new();
        let mut spend_keys: Vec<SecretKey> = Vec::new();

        for input in plan.inputs() {
            let note = input.note();
            match (note.id(), note.data()) {
                (NoteId::Transparent(prevout), NoteData::Transparent { address, .. }) => {
                    let secret_key = account.transparent_secret_key(address)?.ok_or(
                        SignError::InvalidKey(KeyError::InvalidKey(
                            "transparent address is not derived by the account",
                        )),
                    )?;
                    transaction.transparent_inputs.push(TransparentInput {
                        prevout,
                        value: note.value(),
                        pubkey: PublicKey::from_secret_key(&secp, &secret_key)
                            .serialize()
                            .to_vec(),
                        signature: Vec::new(),
                    });
                    transparent_keys.push(secret_key);
                }
                (NoteId::Shielded { protocol, .. }, NoteData::Shielded { nullifier, .. }) => {
                    let anchor = plan
                        .anchors()
                        .get(&protocol)
                        .ok_or(SignError::StaleAnchor(protocol))?;
                    let ask = spending_key.spending_key(protocol).ask()?;
                    let ak = PublicKey::from_secret_key(&secp, &ask).serialize().to_vec();
                    let proof = prover.prove_spend(input, anchor, &ak)?;
                    transaction.shielded_spends.push(ShieldedSpend {
                        protocol,
                        anchor: *anchor,
                        nullifier: *nullifier,
                        ak,
                        proof,
                        spend_auth_sig: Vec::new(),
                    });
                    spend_keys.push(ask);
                }
                (note_id, _) => {
                    return Err(WalletError::Corrupt(format!(
                        "note {note_id:?} data does not match its pool"
                    ))
                    .into())
                }
            }
        }

        for output in plan.outputs() {
            match output.receiver {
                Receiver::Transparent(address) => transaction.transparent_outputs.push(TxOut {
                    value: output.value,
                    address,
                }),
                Receiver::Shielded(address) => {
                    let mut rseed = [0u8; 32];
                    OsRng.fill_bytes(&mut rseed);
                    let note = Note::from_parts(address, output.value, rseed);
                    let encrypted = encrypt_note(&note, &output.memo)?;
                    transaction.shielded_outputs.push(ShieldedOutput {
                        protocol: note.protocol(),
                        cmx: encrypted.cmx,
                        ephemeral_key: encrypted.ephemeral_key,
                        enc_ciphertext: encrypted.enc_ciphertext,
                        memo_ciphertext: encrypted.memo_ciphertext,
                    });
                }
            }
        }

        let message = Message::from_slice(&transaction.sighash())?;
        for (input, secret_key) in transaction
            .transparent_inputs
            .iter_mut()
            .zip(transparent_keys.iter())
        {
            input.signature = secp.sign_ecdsa(&message, secret_key).serialize_compact().to_vec();
        }
        for (spend, ask) in transaction.shielded_spends.iter_mut().zip(spend_keys.iter()) {
            spend.spend_auth_sig = secp.sign_ecdsa(&message, ask).serialize_compact().to_vec();
        }

        let txid = transaction.txid();
        tracing::info!(
            "Signed transaction {} with {} spends and {} outputs.",
            txid,
            transaction.transparent_inputs.len() + transaction.shielded_spends.len(),
            transaction.transparent_outputs.len() + transaction.shielded_outputs.len()
        );

        Ok(SignedTransaction {
            txid,
            raw: transaction.to_bytes(),
        })
    }
}
