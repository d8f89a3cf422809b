//! Note encryption
//!
//! A note is encrypted to the transmission key of the recipient with a key agreed from an ephemeral secret derived
//! from the note's random seed. The compact ciphertext carries value and random seed and is enough to detect and
//! spend the note. The memo is encrypted separately so that compact blocks can omit it.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::keys::shielded::{IncomingViewingKey, PaymentAddress};
use crate::primitives::{CompactOutput, Memo, ShieldedProtocol, MEMO_SIZE};
use crate::utils::blake2b_32;

/// Size of the note plaintext carried in compact outputs: value and random seed.
pub const COMPACT_NOTE_SIZE: usize = 8 + 32;
/// Size of the compact note ciphertext including the authentication tag.
pub const ENC_CIPHERTEXT_SIZE: usize = COMPACT_NOTE_SIZE + 16;
/// Size of the memo ciphertext including the authentication tag.
pub const MEMO_CIPHERTEXT_SIZE: usize = MEMO_SIZE + 16;

const NOTE_NONCE: [u8; 12] = [0u8; 12];
const MEMO_NONCE: [u8; 12] = [1u8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];

/// Errors associated with note encryption
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NoteEncryptionError {
    /// AEAD encryption failed
    #[error("failed to encrypt note")]
    Encryption,
}

/// Shielded note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Note {
    recipient: PaymentAddress,
    value: u64,
    rseed: [u8; 32],
}

impl Note {
    /// Creates a note from its parts.
    pub fn from_parts(recipient: PaymentAddress, value: u64, rseed: [u8; 32]) -> Self {
        Note {
            recipient,
            value,
            rseed,
        }
    }

    /// Recipient address
    pub fn recipient(&self) -> PaymentAddress {
        self.recipient
    }

    /// Note value
    pub fn value(&self) -> u64 {
        self.value
    }

    /// Random seed
    pub fn rseed(&self) -> [u8; 32] {
        self.rseed
    }

    /// Pool of the note
    pub fn protocol(&self) -> ShieldedProtocol {
        self.recipient.protocol()
    }

    /// Note commitment, the leaf appended to the pool's commitment tree.
    pub fn cmx(&self) -> [u8; 32] {
        let personal = match self.protocol() {
            ShieldedProtocol::Sapling => b"Warp_Sapling_cm_",
            ShieldedProtocol::Orchard => b"Warp_Orchard_cm_",
        };

        blake2b_32(
            personal,
            &[self.recipient.pk_d(), &self.value.to_le_bytes(), &self.rseed],
        )
    }

    fn esk(&self) -> StaticSecret {
        StaticSecret::from(blake2b_32(b"Warp_EskDerive__", &[&self.rseed]))
    }

    fn plaintext(&self) -> [u8; COMPACT_NOTE_SIZE] {
        let mut plaintext = [0u8; COMPACT_NOTE_SIZE];
        plaintext[..8].copy_from_slice(&self.value.to_le_bytes());
        plaintext[8..].copy_from_slice(&self.rseed);
        plaintext
    }
}

/// Output ciphertexts of an encrypted note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedNote {
    /// Note commitment
    pub cmx: [u8; 32],
    /// Ephemeral public key
    pub ephemeral_key: [u8; 32],
    /// Compact note ciphertext
    pub enc_ciphertext: Vec<u8>,
    /// Memo ciphertext
    pub memo_ciphertext: Vec<u8>,
}

fn kdf(protocol: ShieldedProtocol, shared_secret: &[u8; 32], ephemeral_key: &[u8; 32]) -> ChaCha20Poly1305 {
    let tag = match protocol {
        ShieldedProtocol::Sapling => [0x02],
        ShieldedProtocol::Orchard => [0x03],
    };
    let key = blake2b_32(b"Warp_Note_KDF___", &[shared_secret, ephemeral_key, &tag]);

    ChaCha20Poly1305::new(Key::from_slice(&key))
}

/// Encrypts a note and memo to the note's recipient.
pub fn encrypt_note(note: &Note, memo: &Memo) -> Result<EncryptedNote, NoteEncryptionError> {
    let esk = note.esk();
    let ephemeral_key = PublicKey::from(&esk).to_bytes();
    let pk_d = PublicKey::from(*note.recipient.pk_d());
    let shared_secret = esk.diffie_hellman(&pk_d);
    let cipher = kdf(note.protocol(), shared_secret.as_bytes(), &ephemeral_key);

    let enc_ciphertext = cipher
        .encrypt(Nonce::from_slice(&NOTE_NONCE), note.plaintext().as_slice())
        .map_err(|_| NoteEncryptionError::Encryption)?;
    let memo_ciphertext = cipher
        .encrypt(Nonce::from_slice(&MEMO_NONCE), memo.to_bytes().as_slice())
        .map_err(|_| NoteEncryptionError::Encryption)?;

    Ok(EncryptedNote {
        cmx: note.cmx(),
        ephemeral_key,
        enc_ciphertext,
        memo_ciphertext,
    })
}

fn agree(ivk: &IncomingViewingKey, ephemeral_key: &[u8; 32]) -> ChaCha20Poly1305 {
    let shared_secret = ivk
        .secret()
        .diffie_hellman(&PublicKey::from(*ephemeral_key));

    kdf(ivk.protocol(), shared_secret.as_bytes(), ephemeral_key)
}

/// Attempts to decrypt a compact output with an incoming viewing key.
///
/// Returns `None` if the output is not addressed to the key. A successful decryption is only accepted if the
/// plaintext reproduces the output's note commitment.
pub fn try_compact_note_decryption(
    ivk: &IncomingViewingKey,
    output: &CompactOutput,
) -> Option<Note> {
    if output.protocol != ivk.protocol() || output.ciphertext.len() != ENC_CIPHERTEXT_SIZE {
        return None;
    }
    let plaintext = agree(ivk, &output.ephemeral_key)
        .decrypt(Nonce::from_slice(&NOTE_NONCE), output.ciphertext.as_slice())
        .ok()?;

    let mut value = [0u8; 8];
    value.copy_from_slice(&plaintext[..8]);
    let mut rseed = [0u8; 32];
    rseed.copy_from_slice(&plaintext[8..COMPACT_NOTE_SIZE]);
    let note = Note::from_parts(ivk.address(), u64::from_le_bytes(value), rseed);

    (note.cmx() == output.cmx).then_some(note)
}

/// Attempts to decrypt the memo of an output with an incoming viewing key.
pub fn try_memo_decryption(
    ivk: &IncomingViewingKey,
    ephemeral_key: &[u8; 32],
    memo_ciphertext: &[u8],
) -> Option<Memo> {
    if memo_ciphertext.len() != MEMO_CIPHERTEXT_SIZE {
        return None;
    }
    let plaintext = agree(ivk, ephemeral_key)
        .decrypt(Nonce::from_slice(&MEMO_NONCE), memo_ciphertext)
        .ok()?;

    Some(Memo::from_bytes(&plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::shielded::SpendingKey;

    fn ivk(protocol: ShieldedProtocol, seed: u8) -> IncomingViewingKey {
        SpendingKey::from_account_key(protocol, &[seed; 32])
            .to_full_viewing_key()
            .unwrap()
            .to_ivk()
    }

    fn compact(encrypted: &EncryptedNote, protocol: ShieldedProtocol) -> CompactOutput {
        CompactOutput {
            protocol,
            cmx: encrypted.cmx,
            ephemeral_key: encrypted.ephemeral_key,
            ciphertext: encrypted.enc_ciphertext.clone(),
        }
    }

    #[test]
    fn recipient_decrypts_note_and_memo() {
        let ivk = ivk(ShieldedProtocol::Orchard, 1);
        let note = Note::from_parts(ivk.address(), 50, [4u8; 32]);
        let memo = Memo::Text("lunch".to_string());
        let encrypted = encrypt_note(&note, &memo).unwrap();
        assert_eq!(encrypted.enc_ciphertext.len(), ENC_CIPHERTEXT_SIZE);

        let decrypted =
            try_compact_note_decryption(&ivk, &compact(&encrypted, ShieldedProtocol::Orchard));
        assert_eq!(decrypted, Some(note));
        assert_eq!(
            try_memo_decryption(&ivk, &encrypted.ephemeral_key, &encrypted.memo_ciphertext),
            Some(memo)
        );
    }

    #[test]
    fn other_keys_fail_to_decrypt() {
        let recipient = ivk(ShieldedProtocol::Sapling, 1);
        let note = Note::from_parts(recipient.address(), 50, [4u8; 32]);
        let encrypted = encrypt_note(&note, &Memo::Empty).unwrap();
        let output = compact(&encrypted, ShieldedProtocol::Sapling);

        assert!(try_compact_note_decryption(&ivk(ShieldedProtocol::Sapling, 2), &output).is_none());
        assert!(try_compact_note_decryption(&ivk(ShieldedProtocol::Orchard, 1), &output).is_none());
    }

    #[test]
    fn mismatched_commitment_is_rejected() {
        let ivk = ivk(ShieldedProtocol::Sapling, 1);
        let note = Note::from_parts(ivk.address(), 50, [4u8; 32]);
        let encrypted = encrypt_note(&note, &Memo::Empty).unwrap();
        let mut output = compact(&encrypted, ShieldedProtocol::Sapling);
        output.cmx = [0u8; 32];

        assert!(try_compact_note_decryption(&ivk, &output).is_none());
    }
}
