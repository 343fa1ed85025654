//! Bank
//!
//! Exclusive-access arbiter for the shared in-game bank. Grants are strictly
//! FIFO and at most one lease is outstanding. The ledger tracks stock and
//! reservations so concurrent withdrawals cannot over-commit.

pub mod arbiter;
pub mod bank;
pub mod ledger;
pub mod protocol;

pub use arbiter::{AcquireOutcome, BankArbiter, Eviction, Lease, Occupancy};
pub use bank::{BankActor, BankHandle, BankMsg, BANK_ID};
pub use ledger::{Asset, AssetLevel, BankLedger, Reservation, Withdrawal};
pub use protocol::{BankRequest, BankResponse, BankSnapshot};
