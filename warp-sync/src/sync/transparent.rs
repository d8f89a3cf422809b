use crate::primitives::{CompactBlock, CompactTx, NoteData, NoteId, OutPoint, WalletNote};
use crate::scan::ScanningKeys;

/// Returns the outputs of `transaction` paying to a tracked transparent address as wallet notes.
pub(super) fn scan_transparent_outputs(
    block: &CompactBlock,
    transaction: &CompactTx,
    keys: &ScanningKeys,
) -> Vec<WalletNote> {
    transaction
        .vout
        .iter()
        .enumerate()
        .filter_map(|(index, output)| {
            let address_id = keys.transparent_address_id(&output.address)?;
            let outpoint = OutPoint {
                txid: transaction.txid,
                index: index as u32,
            };

            Some(WalletNote::from_parts(
                NoteId::Transparent(outpoint),
                address_id.account_id(),
                output.value,
                block.height,
                transaction.txid,
                NoteData::Transparent {
                    address: output.address,
                    address_index: address_id.address_index(),
                },
            ))
        })
        .collect()
}
