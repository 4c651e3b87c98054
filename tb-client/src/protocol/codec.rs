//! Batch encoding and decoding.
//!
//! Every element has a fixed size, so a body is simply the concatenation of
//! its elements and element `i` starts at `i * size`.

use zerocopy::{FromBytes, IntoBytes};

use super::types::{
    Account, AccountRecord, AccountResult, CreateAccountResult, CreateTransferResult,
    RegisterBody, ResultRecord, Transfer, TransferRecord, TransferResult, ACCOUNT_RESULT_SIZE,
    ACCOUNT_SIZE, REGISTER_BODY_SIZE, TRANSFER_RESULT_SIZE, TRANSFER_SIZE,
};
use crate::error::ProtocolError;

const ID_SIZE: usize = std::mem::size_of::<u128>();

/// Encode a batch of accounts.
///
/// Fails with [`ProtocolError::MalformedRecord`] if a record has a non-zero
/// reserved field.
pub fn encode_accounts(accounts: &[Account]) -> Result<Vec<u8>, ProtocolError> {
    let mut body = Vec::with_capacity(accounts.len() * ACCOUNT_SIZE);
    for (index, account) in accounts.iter().enumerate() {
        if account.reserved != 0 {
            return Err(ProtocolError::MalformedRecord { index });
        }
        body.extend_from_slice(AccountRecord::from(account).as_bytes());
    }
    Ok(body)
}

/// Decode a batch of accounts.
pub fn decode_accounts(body: &[u8]) -> Result<Vec<Account>, ProtocolError> {
    if body.len() % ACCOUNT_SIZE != 0 {
        return Err(ProtocolError::TruncatedBuffer);
    }
    body.chunks_exact(ACCOUNT_SIZE)
        .enumerate()
        .map(|(index, chunk)| {
            let record = AccountRecord::read_from_bytes(chunk)
                .map_err(|_| ProtocolError::TruncatedBuffer)?;
            if record.reserved.get() != 0 {
                return Err(ProtocolError::MalformedRecord { index });
            }
            Ok(Account::from(&record))
        })
        .collect()
}

/// Encode a batch of account ids.
pub fn encode_ids(ids: &[u128]) -> Vec<u8> {
    let mut body = Vec::with_capacity(ids.len() * ID_SIZE);
    for id in ids {
        body.extend_from_slice(&id.to_le_bytes());
    }
    body
}

/// Decode a batch of account ids.
pub fn decode_ids(body: &[u8]) -> Result<Vec<u128>, ProtocolError> {
    if body.len() % ID_SIZE != 0 {
        return Err(ProtocolError::TruncatedBuffer);
    }
    body.chunks_exact(ID_SIZE)
        .map(|chunk| {
            let bytes: [u8; ID_SIZE] = chunk
                .try_into()
                .map_err(|_| ProtocolError::TruncatedBuffer)?;
            Ok(u128::from_le_bytes(bytes))
        })
        .collect()
}

/// Encode create-account results in the given order.
pub fn encode_results(results: &[AccountResult]) -> Vec<u8> {
    let mut body = Vec::with_capacity(results.len() * ACCOUNT_RESULT_SIZE);
    for result in results {
        body.extend_from_slice(ResultRecord::from(result).as_bytes());
    }
    body
}

/// Decode create-account results for a batch of `batch_len` records.
///
/// The server may answer in any order; the returned vector is sorted so that
/// `results[i].index == i`. Exactly one result per submitted record is
/// required: a missing, duplicate or out-of-range index fails with
/// [`ProtocolError::ResultMismatch`].
pub fn decode_results(body: &[u8], batch_len: usize) -> Result<Vec<AccountResult>, ProtocolError> {
    decode_indexed(body, batch_len, |record| {
        let result = CreateAccountResult::try_from(record.result.get()).ok()?;
        Some(AccountResult {
            index: record.index.get(),
            result,
            timestamp: record.timestamp.get(),
        })
    })
}

/// Encode a batch of transfers.
///
/// Fails with [`ProtocolError::MalformedRecord`] if a record has a non-zero
/// reserved field.
pub fn encode_transfers(transfers: &[Transfer]) -> Result<Vec<u8>, ProtocolError> {
    let mut body = Vec::with_capacity(transfers.len() * TRANSFER_SIZE);
    for (index, transfer) in transfers.iter().enumerate() {
        if transfer.reserved != 0 {
            return Err(ProtocolError::MalformedRecord { index });
        }
        body.extend_from_slice(TransferRecord::from(transfer).as_bytes());
    }
    Ok(body)
}

/// Decode a batch of transfers.
pub fn decode_transfers(body: &[u8]) -> Result<Vec<Transfer>, ProtocolError> {
    if body.len() % TRANSFER_SIZE != 0 {
        return Err(ProtocolError::TruncatedBuffer);
    }
    body.chunks_exact(TRANSFER_SIZE)
        .enumerate()
        .map(|(index, chunk)| {
            let record = TransferRecord::read_from_bytes(chunk)
                .map_err(|_| ProtocolError::TruncatedBuffer)?;
            if record.reserved.get() != 0 {
                return Err(ProtocolError::MalformedRecord { index });
            }
            Ok(Transfer::from(&record))
        })
        .collect()
}

/// Encode create-transfer results in the given order.
pub fn encode_transfer_results(results: &[TransferResult]) -> Vec<u8> {
    let mut body = Vec::with_capacity(results.len() * TRANSFER_RESULT_SIZE);
    for result in results {
        body.extend_from_slice(ResultRecord::from(result).as_bytes());
    }
    body
}

/// Decode create-transfer results for a batch of `batch_len` records.
///
/// Same ordering and completeness rules as [`decode_results`].
pub fn decode_transfer_results(
    body: &[u8],
    batch_len: usize,
) -> Result<Vec<TransferResult>, ProtocolError> {
    decode_indexed(body, batch_len, |record| {
        let result = CreateTransferResult::try_from(record.result.get()).ok()?;
        Some(TransferResult {
            index: record.index.get(),
            result,
            timestamp: record.timestamp.get(),
        })
    })
}

/// Place each result at its batch index.
///
/// `convert` returns `None` for an unknown result code.
fn decode_indexed<T, F>(body: &[u8], batch_len: usize, convert: F) -> Result<Vec<T>, ProtocolError>
where
    F: Fn(&ResultRecord) -> Option<T>,
{
    const SIZE: usize = std::mem::size_of::<ResultRecord>();

    if body.len() % SIZE != 0 {
        return Err(ProtocolError::TruncatedBuffer);
    }
    if body.len() / SIZE != batch_len {
        return Err(ProtocolError::ResultMismatch);
    }

    let mut slots: Vec<Option<T>> = std::iter::repeat_with(|| None).take(batch_len).collect();
    for (position, chunk) in body.chunks_exact(SIZE).enumerate() {
        let record =
            ResultRecord::read_from_bytes(chunk).map_err(|_| ProtocolError::TruncatedBuffer)?;
        let result =
            convert(&record).ok_or(ProtocolError::MalformedRecord { index: position })?;

        let slot = slots
            .get_mut(record.index.get() as usize)
            .ok_or(ProtocolError::ResultMismatch)?;
        if slot.is_some() {
            return Err(ProtocolError::ResultMismatch);
        }
        *slot = Some(result);
    }

    // Counts match and no index repeats, so every slot is filled.
    slots
        .into_iter()
        .map(|slot| slot.ok_or(ProtocolError::ResultMismatch))
        .collect()
}

/// Decode a register body.
pub fn decode_register(body: &[u8]) -> Result<RegisterBody, ProtocolError> {
    if body.len() != REGISTER_BODY_SIZE {
        return Err(ProtocolError::TruncatedBuffer);
    }
    let register = RegisterBody::read_from_bytes(body).map_err(|_| ProtocolError::TruncatedBuffer)?;
    if register.reserved != [0; 8] {
        return Err(ProtocolError::MalformedRecord { index: 0 });
    }
    Ok(register)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(id: u128) -> Account {
        Account {
            id,
            user_data: id as u64 * 3,
            credits_posted: 100,
            debits_pending: 7,
            timestamp: 0,
            ledger: 1,
            code: 10,
            ..Default::default()
        }
    }

    fn result(index: u32, result: CreateAccountResult) -> AccountResult {
        AccountResult {
            index,
            result,
            timestamp: if result == CreateAccountResult::Ok { 1000 + index as u64 } else { 0 },
        }
    }

    #[test]
    fn test_accounts_roundtrip() {
        let mut batch: Vec<Account> = (1..=5).map(account).collect();
        batch[2].timestamp = 99;

        let body = encode_accounts(&batch).unwrap();
        assert_eq!(body.len(), 5 * ACCOUNT_SIZE);
        assert_eq!(decode_accounts(&body).unwrap(), batch);
    }

    #[test]
    fn test_encode_rejects_reserved() {
        let mut batch = vec![account(1), account(2)];
        batch[1].reserved = 1;
        assert_eq!(
            encode_accounts(&batch),
            Err(ProtocolError::MalformedRecord { index: 1 })
        );
    }

    #[test]
    fn test_decode_accounts_truncated() {
        let body = encode_accounts(&[account(1)]).unwrap();
        assert_eq!(decode_accounts(&body[..79]), Err(ProtocolError::TruncatedBuffer));
        assert_eq!(decode_accounts(&[]), Ok(Vec::new()));
    }

    #[test]
    fn test_decode_accounts_malformed() {
        let mut body = encode_accounts(&[account(1), account(2)]).unwrap();
        body[ACCOUNT_SIZE + 24] = 1;
        assert_eq!(
            decode_accounts(&body),
            Err(ProtocolError::MalformedRecord { index: 1 })
        );
    }

    #[test]
    fn test_ids_roundtrip() {
        let ids = [1u128, u128::MAX, 0x0102_0304];
        let body = encode_ids(&ids);
        assert_eq!(body.len(), 48);
        assert_eq!(body[0], 1);
        assert_eq!(decode_ids(&body).unwrap(), ids);
        assert_eq!(decode_ids(&body[..47]), Err(ProtocolError::TruncatedBuffer));
    }

    #[test]
    fn test_decode_results_reorders() {
        let shuffled = [
            result(2, CreateAccountResult::Ok),
            result(0, CreateAccountResult::Exists),
            result(1, CreateAccountResult::IdMustNotBeZero),
        ];
        let decoded = decode_results(&encode_results(&shuffled), 3).unwrap();

        for (i, r) in decoded.iter().enumerate() {
            assert_eq!(r.index as usize, i);
        }
        assert_eq!(decoded[0].result, CreateAccountResult::Exists);
        assert_eq!(decoded[1].result, CreateAccountResult::IdMustNotBeZero);
        assert!(decoded[2].is_ok());
        assert_eq!(decoded[2].timestamp, 1002);
    }

    #[test]
    fn test_decode_results_mismatch() {
        let ok = CreateAccountResult::Ok;

        // Missing result.
        let body = encode_results(&[result(0, ok)]);
        assert_eq!(decode_results(&body, 2), Err(ProtocolError::ResultMismatch));

        // Duplicate index.
        let body = encode_results(&[result(0, ok), result(0, ok)]);
        assert_eq!(decode_results(&body, 2), Err(ProtocolError::ResultMismatch));

        // Out of range index.
        let body = encode_results(&[result(0, ok), result(5, ok)]);
        assert_eq!(decode_results(&body, 2), Err(ProtocolError::ResultMismatch));

        // Partial element.
        let body = encode_results(&[result(0, ok)]);
        assert_eq!(decode_results(&body[..10], 1), Err(ProtocolError::TruncatedBuffer));
    }

    #[test]
    fn test_decode_results_unknown_code() {
        let mut body = encode_results(&[result(0, CreateAccountResult::Ok)]);
        body[4] = 2;
        assert_eq!(
            decode_results(&body, 1),
            Err(ProtocolError::MalformedRecord { index: 0 })
        );
    }

    #[test]
    fn test_decode_register() {
        use zerocopy::byteorder::little_endian::{U32, U64};

        let register = RegisterBody {
            size: U32::new(4096),
            version: U32::new(1),
            max_credits: U32::new(8),
            max_debits: U32::new(8),
            max_balance: U64::new(1_000_000),
            reserved: [0; 8],
        };
        let decoded = decode_register(register.as_bytes()).unwrap();
        assert_eq!(decoded.size.get(), 4096);
        assert_eq!(decoded.max_balance.get(), 1_000_000);
        assert_eq!(decode_register(&[0; 31]).unwrap_err(), ProtocolError::TruncatedBuffer);
    }

    fn transfer(id: u128) -> Transfer {
        Transfer {
            id,
            debit_account_id: 1,
            credit_account_id: 2,
            amount: u128::from(u64::MAX) + id,
            user_data_128: id << 64,
            user_data_32: 9,
            ledger: 1,
            code: 10,
            ..Default::default()
        }
    }

    #[test]
    fn test_transfers_roundtrip() {
        let batch: Vec<Transfer> = (1..=4).map(transfer).collect();

        let body = encode_transfers(&batch).unwrap();
        assert_eq!(body.len(), 4 * TRANSFER_SIZE);
        assert_eq!(decode_transfers(&body).unwrap(), batch);
        assert_eq!(decode_transfers(&body[..127]), Err(ProtocolError::TruncatedBuffer));
    }

    #[test]
    fn test_transfers_reserved() {
        let mut batch = vec![transfer(1), transfer(2)];
        batch[1].reserved = 3;
        assert_eq!(
            encode_transfers(&batch),
            Err(ProtocolError::MalformedRecord { index: 1 })
        );

        let mut body = encode_transfers(&[transfer(1)]).unwrap();
        body[118] = 1;
        assert_eq!(
            decode_transfers(&body),
            Err(ProtocolError::MalformedRecord { index: 0 })
        );
    }

    #[test]
    fn test_decode_transfer_results() {
        let shuffled = [
            TransferResult {
                index: 1,
                result: CreateTransferResult::DebitAccountNotFound,
                timestamp: 0,
            },
            TransferResult {
                index: 0,
                result: CreateTransferResult::Ok,
                timestamp: 77,
            },
        ];
        let decoded = decode_transfer_results(&encode_transfer_results(&shuffled), 2).unwrap();
        assert!(decoded[0].is_ok());
        assert_eq!(decoded[0].timestamp, 77);
        assert_eq!(decoded[1].result, CreateTransferResult::DebitAccountNotFound);

        assert_eq!(
            decode_transfer_results(&encode_transfer_results(&shuffled), 3),
            Err(ProtocolError::ResultMismatch)
        );

        // Code 2 is not a transfer result.
        let mut body = encode_transfer_results(&shuffled);
        body[4] = 2;
        assert_eq!(
            decode_transfer_results(&body, 2),
            Err(ProtocolError::MalformedRecord { index: 0 })
        );
    }
}
