//! Ledger data types and their fixed wire layouts.
//!
//! Public types ([`Account`], [`Transfer`] and their results) use native
//! integers. Each has a private-layout twin with little-endian byte-order
//! fields that is used only for encoding and decoding, so the wire format
//! never depends on the host's padding or alignment rules.

use zerocopy::byteorder::little_endian::{U128, U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Size of one encoded account record.
pub const ACCOUNT_SIZE: usize = 80;

/// Size of one encoded create-account result.
pub const ACCOUNT_RESULT_SIZE: usize = 16;

/// Size of one encoded transfer record.
pub const TRANSFER_SIZE: usize = 128;

/// Size of one encoded create-transfer result.
pub const TRANSFER_RESULT_SIZE: usize = 16;

/// Size of the register request/reply body.
pub const REGISTER_BODY_SIZE: usize = 32;

/// Ledger account record.
///
/// Every record encodes to exactly [`ACCOUNT_SIZE`] bytes regardless of
/// content, so a batch can be indexed in O(1) when reporting per-record
/// outcomes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct Account {
    /// Globally unique identifier.
    pub id: u128,
    /// Opaque user-defined tag.
    pub user_data: u64,
    /// Reserved (must be zero).
    pub reserved: u64,
    /// Sum of posted credits.
    pub credits_posted: u64,
    /// Sum of pending credits.
    pub credits_pending: u64,
    /// Sum of posted debits.
    pub debits_posted: u64,
    /// Sum of pending debits.
    pub debits_pending: u64,
    /// Creation timestamp. Zero on submission; assigned once by the server.
    pub timestamp: u64,
    /// The ledger this account belongs to.
    pub ledger: u32,
    /// Application-defined account category.
    pub code: u32,
}

impl Account {
    /// Total credits (posted + pending), `None` on overflow.
    pub fn credits_total(&self) -> Option<u64> {
        self.credits_posted.checked_add(self.credits_pending)
    }

    /// Total debits (posted + pending), `None` on overflow.
    pub fn debits_total(&self) -> Option<u64> {
        self.debits_posted.checked_add(self.debits_pending)
    }
}

/// Wire layout of [`Account`].
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub(crate) struct AccountRecord {
    pub id: U128,
    pub user_data: U64,
    pub reserved: U64,
    pub credits_posted: U64,
    pub credits_pending: U64,
    pub debits_posted: U64,
    pub debits_pending: U64,
    pub timestamp: U64,
    pub ledger: U32,
    pub code: U32,
}

const _: () = assert!(std::mem::size_of::<AccountRecord>() == ACCOUNT_SIZE);

impl From<&Account> for AccountRecord {
    fn from(account: &Account) -> Self {
        Self {
            id: U128::new(account.id),
            user_data: U64::new(account.user_data),
            reserved: U64::new(account.reserved),
            credits_posted: U64::new(account.credits_posted),
            credits_pending: U64::new(account.credits_pending),
            debits_posted: U64::new(account.debits_posted),
            debits_pending: U64::new(account.debits_pending),
            timestamp: U64::new(account.timestamp),
            ledger: U32::new(account.ledger),
            code: U32::new(account.code),
        }
    }
}

impl From<&AccountRecord> for Account {
    fn from(record: &AccountRecord) -> Self {
        Self {
            id: record.id.get(),
            user_data: record.user_data.get(),
            reserved: record.reserved.get(),
            credits_posted: record.credits_posted.get(),
            credits_pending: record.credits_pending.get(),
            debits_posted: record.debits_posted.get(),
            debits_pending: record.debits_pending.get(),
            timestamp: record.timestamp.get(),
            ledger: record.ledger.get(),
            code: record.code.get(),
        }
    }
}

/// Outcome for one record of a create-accounts batch.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AccountResult {
    /// Index of the account in the submitted batch.
    pub index: u32,
    /// Result code for this account.
    pub result: CreateAccountResult,
    /// Server-assigned timestamp (zero if the account was not created).
    pub timestamp: u64,
}

impl AccountResult {
    /// Returns true if the account was created.
    pub fn is_ok(&self) -> bool {
        self.result == CreateAccountResult::Ok
    }
}

/// Wire layout of [`AccountResult`] and [`TransferResult`].
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub(crate) struct ResultRecord {
    pub index: U32,
    pub result: U32,
    pub timestamp: U64,
}

const _: () = assert!(std::mem::size_of::<ResultRecord>() == ACCOUNT_RESULT_SIZE);
const _: () = assert!(ACCOUNT_RESULT_SIZE == TRANSFER_RESULT_SIZE);

impl From<&AccountResult> for ResultRecord {
    fn from(result: &AccountResult) -> Self {
        Self {
            index: U32::new(result.index),
            result: U32::new(result.result as u32),
            timestamp: U64::new(result.timestamp),
        }
    }
}

impl From<&TransferResult> for ResultRecord {
    fn from(result: &TransferResult) -> Self {
        Self {
            index: U32::new(result.index),
            result: U32::new(result.result as u32),
            timestamp: U64::new(result.timestamp),
        }
    }
}

/// Create account result codes.
///
/// Business rules live on the server; the client only transports these.
#[repr(u32)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CreateAccountResult {
    /// Account created successfully.
    Ok = 0,
    /// A linked event in the batch failed, so this event was not applied.
    LinkedEventFailed = 1,
    /// The timestamp field must be zero (server assigns timestamps).
    TimestampMustBeZero = 3,
    /// A reserved field was set to a non-zero value.
    ReservedField = 4,
    /// Account ID must not be zero.
    IdMustNotBeZero = 6,
    /// Account ID must not be `u128::MAX`.
    IdMustNotBeIntMax = 7,
    /// `debits_pending` must be zero on creation.
    DebitsPendingMustBeZero = 9,
    /// `debits_posted` must be zero on creation.
    DebitsPostedMustBeZero = 10,
    /// `credits_pending` must be zero on creation.
    CreditsPendingMustBeZero = 11,
    /// `credits_posted` must be zero on creation.
    CreditsPostedMustBeZero = 12,
    /// Ledger must not be zero.
    LedgerMustNotBeZero = 13,
    /// Code must not be zero.
    CodeMustNotBeZero = 14,
    /// Account exists with different `user_data`.
    ExistsWithDifferentUserData = 16,
    /// Account exists with different ledger.
    ExistsWithDifferentLedger = 19,
    /// Account exists with different code.
    ExistsWithDifferentCode = 20,
    /// Account already exists (idempotent success).
    Exists = 21,
}

impl TryFrom<u32> for CreateAccountResult {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(CreateAccountResult::Ok),
            1 => Ok(CreateAccountResult::LinkedEventFailed),
            3 => Ok(CreateAccountResult::TimestampMustBeZero),
            4 => Ok(CreateAccountResult::ReservedField),
            6 => Ok(CreateAccountResult::IdMustNotBeZero),
            7 => Ok(CreateAccountResult::IdMustNotBeIntMax),
            9 => Ok(CreateAccountResult::DebitsPendingMustBeZero),
            10 => Ok(CreateAccountResult::DebitsPostedMustBeZero),
            11 => Ok(CreateAccountResult::CreditsPendingMustBeZero),
            12 => Ok(CreateAccountResult::CreditsPostedMustBeZero),
            13 => Ok(CreateAccountResult::LedgerMustNotBeZero),
            14 => Ok(CreateAccountResult::CodeMustNotBeZero),
            16 => Ok(CreateAccountResult::ExistsWithDifferentUserData),
            19 => Ok(CreateAccountResult::ExistsWithDifferentLedger),
            20 => Ok(CreateAccountResult::ExistsWithDifferentCode),
            21 => Ok(CreateAccountResult::Exists),
            _ => Err(value),
        }
    }
}

/// Ledger transfer record (128 bytes on the wire).
///
/// Moves `amount` from the debit account to the credit account. Both
/// accounts must exist on the same ledger; the server enforces that.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct Transfer {
    /// Globally unique identifier.
    pub id: u128,
    /// Account to debit.
    pub debit_account_id: u128,
    /// Account to credit.
    pub credit_account_id: u128,
    /// Amount to move.
    pub amount: u128,
    /// Pending transfer to post or void (zero if not applicable).
    pub pending_id: u128,
    /// Opaque user data (128-bit).
    pub user_data_128: u128,
    /// Opaque user data (64-bit).
    pub user_data_64: u64,
    /// Opaque user data (32-bit).
    pub user_data_32: u32,
    /// Timeout in seconds for pending transfers.
    pub timeout: u32,
    /// The ledger this transfer operates on.
    pub ledger: u32,
    /// Application-defined transfer category.
    pub code: u16,
    /// Reserved (must be zero).
    pub reserved: u16,
    /// Creation timestamp. Zero on submission; assigned once by the server.
    pub timestamp: u64,
}

/// Wire layout of [`Transfer`].
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub(crate) struct TransferRecord {
    pub id: U128,
    pub debit_account_id: U128,
    pub credit_account_id: U128,
    pub amount: U128,
    pub pending_id: U128,
    pub user_data_128: U128,
    pub user_data_64: U64,
    pub user_data_32: U32,
    pub timeout: U32,
    pub ledger: U32,
    pub code: U16,
    pub reserved: U16,
    pub timestamp: U64,
}

const _: () = assert!(std::mem::size_of::<TransferRecord>() == TRANSFER_SIZE);

impl From<&Transfer> for TransferRecord {
    fn from(transfer: &Transfer) -> Self {
        Self {
            id: U128::new(transfer.id),
            debit_account_id: U128::new(transfer.debit_account_id),
            credit_account_id: U128::new(transfer.credit_account_id),
            amount: U128::new(transfer.amount),
            pending_id: U128::new(transfer.pending_id),
            user_data_128: U128::new(transfer.user_data_128),
            user_data_64: U64::new(transfer.user_data_64),
            user_data_32: U32::new(transfer.user_data_32),
            timeout: U32::new(transfer.timeout),
            ledger: U32::new(transfer.ledger),
            code: U16::new(transfer.code),
            reserved: U16::new(transfer.reserved),
            timestamp: U64::new(transfer.timestamp),
        }
    }
}

impl From<&TransferRecord> for Transfer {
    fn from(record: &TransferRecord) -> Self {
        Self {
            id: record.id.get(),
            debit_account_id: record.debit_account_id.get(),
            credit_account_id: record.credit_account_id.get(),
            amount: record.amount.get(),
            pending_id: record.pending_id.get(),
            user_data_128: record.user_data_128.get(),
            user_data_64: record.user_data_64.get(),
            user_data_32: record.user_data_32.get(),
            timeout: record.timeout.get(),
            ledger: record.ledger.get(),
            code: record.code.get(),
            reserved: record.reserved.get(),
            timestamp: record.timestamp.get(),
        }
    }
}

/// Outcome for one record of a create-transfers batch.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TransferResult {
    /// Index of the transfer in the submitted batch.
    pub index: u32,
    /// Result code for this transfer.
    pub result: CreateTransferResult,
    /// Server-assigned timestamp (zero if the transfer was not created).
    pub timestamp: u64,
}

impl TransferResult {
    /// Returns true if the transfer was created.
    pub fn is_ok(&self) -> bool {
        self.result == CreateTransferResult::Ok
    }
}

/// Create transfer result codes.
#[repr(u32)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CreateTransferResult {
    /// Transfer created successfully.
    Ok = 0,
    /// A linked event in the batch failed, so this event was not applied.
    LinkedEventFailed = 1,
    /// The timestamp field must be zero.
    TimestampMustBeZero = 3,
    /// A reserved field was set to a non-zero value.
    ReservedField = 4,
    /// Transfer ID must not be zero.
    IdMustNotBeZero = 5,
    /// Transfer ID must not be `u128::MAX`.
    IdMustNotBeIntMax = 6,
    /// Debit account ID must not be zero.
    DebitAccountIdMustNotBeZero = 8,
    /// Debit account ID must not be `u128::MAX`.
    DebitAccountIdMustNotBeIntMax = 9,
    /// Credit account ID must not be zero.
    CreditAccountIdMustNotBeZero = 10,
    /// Credit account ID must not be `u128::MAX`.
    CreditAccountIdMustNotBeIntMax = 11,
    /// Debit and credit accounts must be different.
    AccountsMustBeDifferent = 12,
    /// `pending_id` must be zero.
    PendingIdMustBeZero = 13,
    /// Timeout is only valid for pending transfers.
    TimeoutReservedForPendingTransfer = 17,
    /// Ledger must not be zero.
    LedgerMustNotBeZero = 19,
    /// Code must not be zero.
    CodeMustNotBeZero = 20,
    /// Debit account not found.
    DebitAccountNotFound = 21,
    /// Credit account not found.
    CreditAccountNotFound = 22,
    /// Debit and credit accounts must have the same ledger.
    AccountsMustHaveTheSameLedger = 23,
    /// Transfer ledger must match the accounts' ledger.
    TransferMustHaveTheSameLedgerAsAccounts = 24,
    /// Transfer exists with different debit account.
    ExistsWithDifferentDebitAccountId = 37,
    /// Transfer exists with different credit account.
    ExistsWithDifferentCreditAccountId = 38,
    /// Transfer exists with different amount.
    ExistsWithDifferentAmount = 39,
    /// Transfer exists with different `user_data_128`.
    ExistsWithDifferentUserData128 = 41,
    /// Transfer exists with different `user_data_64`.
    ExistsWithDifferentUserData64 = 42,
    /// Transfer exists with different `user_data_32`.
    ExistsWithDifferentUserData32 = 43,
    /// Transfer exists with different code.
    ExistsWithDifferentCode = 45,
    /// Transfer already exists (idempotent success).
    Exists = 46,
    /// Transfer would overflow the debit account's `debits_posted`.
    OverflowsDebitsPosted = 49,
    /// Transfer would overflow the credit account's `credits_posted`.
    OverflowsCreditsPosted = 50,
    /// Transfer exceeds the credit account's available credits.
    ExceedsCredits = 54,
    /// Transfer exceeds the debit account's available debits.
    ExceedsDebits = 55,
}

impl TryFrom<u32> for CreateTransferResult {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        let result = match value {
            0 => CreateTransferResult::Ok,
            1 => CreateTransferResult::LinkedEventFailed,
            3 => CreateTransferResult::TimestampMustBeZero,
            4 => CreateTransferResult::ReservedField,
            5 => CreateTransferResult::IdMustNotBeZero,
            6 => CreateTransferResult::IdMustNotBeIntMax,
            8 => CreateTransferResult::DebitAccountIdMustNotBeZero,
            9 => CreateTransferResult::DebitAccountIdMustNotBeIntMax,
            10 => CreateTransferResult::CreditAccountIdMustNotBeZero,
            11 => CreateTransferResult::CreditAccountIdMustNotBeIntMax,
            12 => CreateTransferResult::AccountsMustBeDifferent,
            13 => CreateTransferResult::PendingIdMustBeZero,
            17 => CreateTransferResult::TimeoutReservedForPendingTransfer,
            19 => CreateTransferResult::LedgerMustNotBeZero,
            20 => CreateTransferResult::CodeMustNotBeZero,
            21 => CreateTransferResult::DebitAccountNotFound,
            22 => CreateTransferResult::CreditAccountNotFound,
            23 => CreateTransferResult::AccountsMustHaveTheSameLedger,
            24 => CreateTransferResult::TransferMustHaveTheSameLedgerAsAccounts,
            37 => CreateTransferResult::ExistsWithDifferentDebitAccountId,
            38 => CreateTransferResult::ExistsWithDifferentCreditAccountId,
            39 => CreateTransferResult::ExistsWithDifferentAmount,
            41 => CreateTransferResult::ExistsWithDifferentUserData128,
            42 => CreateTransferResult::ExistsWithDifferentUserData64,
            43 => CreateTransferResult::ExistsWithDifferentUserData32,
            45 => CreateTransferResult::ExistsWithDifferentCode,
            46 => CreateTransferResult::Exists,
            49 => CreateTransferResult::OverflowsDebitsPosted,
            50 => CreateTransferResult::OverflowsCreditsPosted,
            54 => CreateTransferResult::ExceedsCredits,
            55 => CreateTransferResult::ExceedsDebits,
            _ => return Err(value),
        };
        Ok(result)
    }
}

/// Register request/reply body (32 bytes).
///
/// The request carries the client's proposed configuration, the reply the
/// server's defaults and limits.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct RegisterBody {
    /// Maximum message size in bytes.
    pub size: U32,
    /// Protocol version.
    pub version: U32,
    /// Maximum in-flight credit allowance.
    pub max_credits: U32,
    /// Maximum in-flight debit allowance.
    pub max_debits: U32,
    /// Maximum account balance.
    pub max_balance: U64,
    /// Reserved (must be zero).
    pub reserved: [u8; 8],
}

const _: () = assert!(std::mem::size_of::<RegisterBody>() == REGISTER_BODY_SIZE);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_sizes() {
        assert_eq!(std::mem::size_of::<AccountRecord>(), 80);
        assert_eq!(std::mem::align_of::<AccountRecord>(), 1);
        assert_eq!(std::mem::size_of::<ResultRecord>(), 16);
        assert_eq!(std::mem::size_of::<TransferRecord>(), 128);
        assert_eq!(std::mem::align_of::<TransferRecord>(), 1);
        assert_eq!(std::mem::size_of::<RegisterBody>(), 32);
    }

    #[test]
    fn test_account_record_layout() {
        let account = Account {
            id: 1,
            user_data: 2,
            credits_posted: 3,
            debits_pending: 4,
            ledger: 5,
            code: 6,
            ..Default::default()
        };
        let record = AccountRecord::from(&account);
        let bytes = record.as_bytes();

        assert_eq!(bytes[0], 1);
        assert_eq!(bytes[16], 2);
        assert_eq!(bytes[32], 3);
        assert_eq!(bytes[56], 4);
        assert_eq!(bytes[72], 5);
        assert_eq!(bytes[76], 6);
        assert_eq!(Account::from(&record), account);
    }

    #[test]
    fn test_account_totals() {
        let account = Account {
            credits_posted: 10,
            credits_pending: 5,
            debits_posted: u64::MAX,
            debits_pending: 1,
            ..Default::default()
        };
        assert_eq!(account.credits_total(), Some(15));
        assert_eq!(account.debits_total(), None);
    }

    #[test]
    fn test_create_account_result_codes() {
        assert_eq!(CreateAccountResult::try_from(0), Ok(CreateAccountResult::Ok));
        assert_eq!(CreateAccountResult::try_from(21), Ok(CreateAccountResult::Exists));
        assert_eq!(CreateAccountResult::try_from(2), Err(2));
        assert_eq!(CreateAccountResult::ReservedField as u32, 4);
    }

    #[test]
    fn test_transfer_record_layout() {
        let transfer = Transfer {
            id: 1,
            debit_account_id: 2,
            credit_account_id: 3,
            amount: 4,
            user_data_64: 5,
            ledger: 6,
            code: 7,
            timestamp: 8,
            ..Default::default()
        };
        let record = TransferRecord::from(&transfer);
        let bytes = record.as_bytes();

        assert_eq!(bytes[0], 1);
        assert_eq!(bytes[16], 2);
        assert_eq!(bytes[32], 3);
        assert_eq!(bytes[48], 4);
        assert_eq!(bytes[96], 5);
        assert_eq!(bytes[112], 6);
        assert_eq!(bytes[116], 7);
        assert_eq!(bytes[120], 8);
        assert_eq!(Transfer::from(&record), transfer);
    }

    #[test]
    fn test_create_transfer_result_codes() {
        assert_eq!(CreateTransferResult::try_from(0), Ok(CreateTransferResult::Ok));
        assert_eq!(CreateTransferResult::try_from(46), Ok(CreateTransferResult::Exists));
        assert_eq!(
            CreateTransferResult::try_from(22),
            Ok(CreateTransferResult::CreditAccountNotFound)
        );
        assert_eq!(CreateTransferResult::try_from(18), Err(18));
        assert_eq!(CreateTransferResult::AccountsMustBeDifferent as u32, 12);
    }
}
