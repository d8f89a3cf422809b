//! Transaction format
//!
//! Transactions are serialized little endian. The transaction id commits to every field except the authorizing
//! data (signatures and proofs), so it is known before the transaction is signed.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::keys::transparent::TransparentAddress;
use crate::primitives::{
    BlockHeight, CompactOutput, CompactSpend, CompactTx, Nullifier, OutPoint, ShieldedProtocol,
    TxId, TxOut,
};
use crate::utils::blake2b_32;

/// Current transaction version.
pub const TX_VERSION: u32 = 1;

/// Errors associated with transaction parsing
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    /// IO error, usually a truncated transaction
    #[error("io error. {0}")]
    Io(#[from] io::Error),
    /// Unknown transaction version
    #[error("unsupported transaction version {0}")]
    InvalidVersion(u32),
    /// Unknown pool tag
    #[error("invalid pool tag {0}")]
    InvalidProtocol(u8),
    /// Bytes left after the transaction
    #[error("trailing bytes after transaction")]
    TrailingBytes,
}

/// Spend of a transparent coin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransparentInput {
    /// Spent coin
    pub prevout: OutPoint,
    /// Value of the spent coin
    pub value: u64,
    /// Compressed public key of the coin's address
    pub pubkey: Vec<u8>,
    /// Compact ECDSA signature over the sighash
    pub signature: Vec<u8>,
}

/// Spend of a shielded note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShieldedSpend {
    /// Pool of the spent note
    pub protocol: ShieldedProtocol,
    /// Tree root the spend proof is bound to
    pub anchor: [u8; 32],
    /// Revealed nullifier
    pub nullifier: Nullifier,
    /// Compressed spend validating key
    pub ak: Vec<u8>,
    /// Spend proof
    pub proof: Vec<u8>,
    /// Compact ECDSA signature over the sighash
    pub spend_auth_sig: Vec<u8>,
}

/// Shielded output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShieldedOutput {
    /// Pool of the created note
    pub protocol: ShieldedProtocol,
    /// Note commitment
    pub cmx: [u8; 32],
    /// Ephemeral public key
    pub ephemeral_key: [u8; 32],
    /// Compact note ciphertext
    pub enc_ciphertext: Vec<u8>,
    /// Memo ciphertext
    pub memo_ciphertext: Vec<u8>,
}

/// A full transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction version
    pub version: u32,
    /// Height after which the transaction can no longer be mined
    pub expiry_height: BlockHeight,
    /// Fee paid to miners
    pub fee: u64,
    /// Transparent inputs
    pub transparent_inputs: Vec<TransparentInput>,
    /// Transparent outputs
    pub transparent_outputs: Vec<TxOut>,
    /// Shielded spends
    pub shielded_spends: Vec<ShieldedSpend>,
    /// Shielded outputs
    pub shielded_outputs: Vec<ShieldedOutput>,
}

fn protocol_tag(protocol: ShieldedProtocol) -> u8 {
    match protocol {
        ShieldedProtocol::Sapling => 2,
        ShieldedProtocol::Orchard => 3,
    }
}

fn read_protocol<R: Read>(reader: &mut R) -> Result<ShieldedProtocol, TransactionError> {
    match reader.read_u8()? {
        2 => Ok(ShieldedProtocol::Sapling),
        3 => Ok(ShieldedProtocol::Orchard),
        other => Err(TransactionError::InvalidProtocol(other)),
    }
}

fn write_bytes<W: Write>(writer: &mut W, bytes: &[u8]) -> io::Result<()> {
    writer.write_u16::<LittleEndian>(bytes.len() as u16)?;
    writer.write_all(bytes)
}

fn read_bytes<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let len = reader.read_u16::<LittleEndian>()?;
    let mut bytes = vec![0u8; usize::from(len)];
    reader.read_exact(&mut bytes)?;
    Ok(bytes)
}

fn read_32<R: Read>(reader: &mut R) -> io::Result<[u8; 32]> {
    let mut bytes = [0u8; 32];
    reader.read_exact(&mut bytes)?;
    Ok(bytes)
}

fn write_vec<W: Write, T>(
    writer: &mut W,
    items: &[T],
    mut write_item: impl FnMut(&mut W, &T) -> io::Result<()>,
) -> io::Result<()> {
    writer.write_u32::<LittleEndian>(items.len() as u32)?;
    items.iter().try_for_each(|item| write_item(writer, item))
}

fn read_vec<R: Read, T>(
    reader: &mut R,
    mut read_item: impl FnMut(&mut R) -> Result<T, TransactionError>,
) -> Result<Vec<T>, TransactionError> {
    let count = reader.read_u32::<LittleEndian>()?;
    (0..count).map(|_| read_item(reader)).collect()
}

impl Transaction {
    fn write_inner<W: Write>(&self, mut writer: W, with_auth: bool) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(self.version)?;
        writer.write_u32::<LittleEndian>(u32::from(self.expiry_height))?;
        writer.write_u64::<LittleEndian>(self.fee)?;

        write_vec(&mut writer, &self.transparent_inputs, |w, input| {
            w.write_all(&input.prevout.txid.0)?;
            w.write_u32::<LittleEndian>(input.prevout.index)?;
            w.write_u64::<LittleEndian>(input.value)?;
            write_bytes(w, &input.pubkey)?;
            if with_auth {
                write_bytes(w, &input.signature)?;
            }
            Ok(())
        })?;
        write_vec(&mut writer, &self.transparent_outputs, |w, output| {
            w.write_u64::<LittleEndian>(output.value)?;
            w.write_all(&output.address.0)
        })?;
        write_vec(&mut writer, &self.shielded_spends, |w, spend| {
            w.write_u8(protocol_tag(spend.protocol))?;
            w.write_all(&spend.anchor)?;
            w.write_all(&spend.nullifier.0)?;
            write_bytes(w, &spend.ak)?;
            if with_auth {
                write_bytes(w, &spend.proof)?;
                write_bytes(w, &spend.spend_auth_sig)?;
            }
            Ok(())
        })?;
        write_vec(&mut writer, &self.shielded_outputs, |w, output| {
            w.write_u8(protocol_tag(output.protocol))?;
            w.write_all(&output.cmx)?;
            w.write_all(&output.ephemeral_key)?;
            write_bytes(w, &output.enc_ciphertext)?;
            write_bytes(w, &output.memo_ciphertext)
        })
    }

    /// Serializes the transaction.
    pub fn write<W: Write>(&self, writer: W) -> io::Result<()> {
        self.write_inner(writer, true)
    }

    /// Serializes the transaction to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        // writing to a vec does not fail
        let _ = self.write(&mut bytes);
        bytes
    }

    /// Parses a serialized transaction.
    pub fn read<R: Read>(mut reader: R) -> Result<Self, TransactionError> {
        let version = reader.read_u32::<LittleEndian>()?;
        if version != TX_VERSION {
            return Err(TransactionError::InvalidVersion(version));
        }
        let expiry_height = BlockHeight::from_u32(reader.read_u32::<LittleEndian>()?);
        let fee = reader.read_u64::<LittleEndian>()?;

        let transparent_inputs = read_vec(&mut reader, |r| {
            Ok(TransparentInput {
                prevout: OutPoint {
                    txid: TxId::from_bytes(read_32(r)?),
                    index: r.read_u32::<LittleEndian>()?,
                },
                value: r.read_u64::<LittleEndian>()?,
                pubkey: read_bytes(r)?,
                signature: read_bytes(r)?,
            })
        })?;
        let transparent_outputs = read_vec(&mut reader, |r| {
            let value = r.read_u64::<LittleEndian>()?;
            let mut address = [0u8; 20];
            r.read_exact(&mut address)?;
            Ok(TxOut {
                value,
                address: TransparentAddress(address),
            })
        })?;
        let shielded_spends = read_vec(&mut reader, |r| {
            Ok(ShieldedSpend {
                protocol: read_protocol(r)?,
                anchor: read_32(r)?,
                nullifier: Nullifier::from_bytes(read_32(r)?),
                ak: read_bytes(r)?,
                proof: read_bytes(r)?,
                spend_auth_sig: read_bytes(r)?,
            })
        })?;
        let shielded_outputs = read_vec(&mut reader, |r| {
            Ok(ShieldedOutput {
                protocol: read_protocol(r)?,
                cmx: read_32(r)?,
                ephemeral_key: read_32(r)?,
                enc_ciphertext: read_bytes(r)?,
                memo_ciphertext: read_bytes(r)?,
            })
        })?;

        Ok(Transaction {
            version,
            expiry_height,
            fee,
            transparent_inputs,
            transparent_outputs,
            shielded_spends,
            shielded_outputs,
        })
    }

    /// Parses a transaction from bytes, rejecting trailing data.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TransactionError> {
        let mut reader = bytes;
        let transaction = Self::read(&mut reader)?;
        if !reader.is_empty() {
            return Err(TransactionError::TrailingBytes);
        }

        Ok(transaction)
    }

    /// Transaction id. Does not commit to signatures or proofs.
    pub fn txid(&self) -> TxId {
        let mut body = Vec::new();
        let _ = self.write_inner(&mut body, false);

        TxId::from_bytes(blake2b_32(b"Warp_TxId_______", &[&body]))
    }

    /// Digest signed by every spend authorization.
    pub fn sighash(&self) -> [u8; 32] {
        blake2b_32(b"Warp_SigHash____", &[&self.txid().0])
    }

    /// Compact representation of the transaction at `index` within its block.
    pub fn to_compact(&self, index: u64) -> CompactTx {
        CompactTx {
            index,
            txid: self.txid(),
            spends: self
                .shielded_spends
                .iter()
                .map(|spend| CompactSpend {
                    protocol: spend.protocol,
                    nf: spend.nullifier,
                })
                .collect(),
            outputs: self
                .shielded_outputs
                .iter()
                .map(|output| CompactOutput {
                    protocol: output.protocol,
                    cmx: output.cmx,
                    ephemeral_key: output.ephemeral_key,
                    ciphertext: output.enc_ciphertext.clone(),
                })
                .collect(),
            vin: self
                .transparent_inputs
                .iter()
                .map(|input| input.prevout)
                .collect(),
            vout: self.transparent_outputs.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transaction() -> Transaction {
        Transaction {
            version: TX_VERSION,
            expiry_height: BlockHeight::from_u32(140),
            fee: 10_000,
            transparent_inputs: vec![TransparentInput {
                prevout: OutPoint {
                    txid: TxId::from_bytes([1u8; 32]),
                    index: 2,
                },
                value: 5000,
                pubkey: vec![2u8; 33],
                signature: vec![9u8; 64],
            }],
            transparent_outputs: vec![TxOut {
                value: 100,
                address: TransparentAddress([3u8; 20]),
            }],
            shielded_spends: vec![ShieldedSpend {
                protocol: ShieldedProtocol::Sapling,
                anchor: [4u8; 32],
                nullifier: Nullifier::from_bytes([5u8; 32]),
                ak: vec![2u8; 33],
                proof: vec![6u8; 32],
                spend_auth_sig: vec![7u8; 64],
            }],
            shielded_outputs: vec![ShieldedOutput {
                protocol: ShieldedProtocol::Orchard,
                cmx: [8u8; 32],
                ephemeral_key: [9u8; 32],
                enc_ciphertext: vec![1u8; 56],
                memo_ciphertext: vec![2u8; 528],
            }],
        }
    }

    #[test]
    fn parses_serialized_transaction() {
        let tx = transaction();
        assert_eq!(Transaction::from_bytes(&tx.to_bytes()).unwrap(), tx);
    }

    #[test]
    fn txid_ignores_authorization() {
        let tx = transaction();
        let mut resigned = tx.clone();
        resigned.transparent_inputs[0].signature = vec![0u8; 64];
        resigned.shielded_spends[0].proof = vec![0u8; 32];
        assert_eq!(tx.txid(), resigned.txid());

        let mut changed = tx.clone();
        changed.fee += 1;
        assert_ne!(tx.txid(), changed.txid());
    }

    #[test]
    fn rejects_truncated_and_trailing_bytes() {
        let bytes = transaction().to_bytes();
        assert!(matches!(
            Transaction::from_bytes(&bytes[..bytes.len() - 1]),
            Err(TransactionError::Io(_))
        ));
        let mut trailing = bytes.clone();
        trailing.push(0);
        assert!(matches!(
            Transaction::from_bytes(&trailing),
            Err(TransactionError::TrailingBytes)
        ));
    }

    #[test]
    fn compact_transaction_keeps_scan_data() {
        let tx = transaction();
        let compact = tx.to_compact(3);
        assert_eq!(compact.index, 3);
        assert_eq!(compact.txid, tx.txid());
        assert_eq!(compact.spends[0].nf, Nullifier::from_bytes([5u8; 32]));
        assert_eq!(compact.outputs[0].ciphertext.len(), 56);
        assert_eq!(compact.vin[0].index, 2);
    }
}
