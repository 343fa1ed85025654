//! Bank wire protocol (`bank.request` / `bank.response`)

use serde::{Deserialize, Serialize};

use super::arbiter::Occupancy;
use super::ledger::{Asset, AssetLevel, Reservation};
use crate::error::BankViolation;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BankRequest {
    Acquire { bot_id: String },
    Release { bot_id: String },
    /// Leave the wait queue, or drop the lease if already granted
    Abandon { bot_id: String },
    /// Sent by the orchestrator when a bot goes offline
    ForceRelease { bot_id: String },
    Status,
    /// Answered with `Synced` carrying the same token once every earlier
    /// request from this bot has been handled
    Sync { bot_id: String, token: u64 },
    CheckAsset { bot_id: String, asset: Asset },
    Reserve {
        bot_id: String,
        asset: Asset,
        quantity: u64,
    },
    CancelReservation {
        bot_id: String,
        reservation_id: String,
    },
    CommitWithdraw {
        bot_id: String,
        reservation_id: String,
        actual_quantity: u64,
    },
    Deposit {
        bot_id: String,
        asset: Asset,
        quantity: u64,
    },
}

impl BankRequest {
    /// Bot the request acts for
    pub fn bot_id(&self) -> Option<&str> {
        match self {
            BankRequest::Acquire { bot_id }
            | BankRequest::Release { bot_id }
            | BankRequest::Abandon { bot_id }
            | BankRequest::ForceRelease { bot_id }
            | BankRequest::Sync { bot_id, .. }
            | BankRequest::CheckAsset { bot_id, .. }
            | BankRequest::Reserve { bot_id, .. }
            | BankRequest::CancelReservation { bot_id, .. }
            | BankRequest::CommitWithdraw { bot_id, .. }
            | BankRequest::Deposit { bot_id, .. } => Some(bot_id),
            BankRequest::Status => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BankRequest::Acquire { .. } => "acquire",
            BankRequest::Release { .. } => "release",
            BankRequest::Abandon { .. } => "abandon",
            BankRequest::ForceRelease { .. } => "force_release",
            BankRequest::Status => "status",
            BankRequest::Sync { .. } => "sync",
            BankRequest::CheckAsset { .. } => "check_asset",
            BankRequest::Reserve { .. } => "reserve",
            BankRequest::CancelReservation { .. } => "cancel_reservation",
            BankRequest::CommitWithdraw { .. } => "commit_withdraw",
            BankRequest::Deposit { .. } => "deposit",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BankResponse {
    Granted {
        bot_id: String,
        lease_id: u64,
    },
    Queued {
        bot_id: String,
        position: usize,
    },
    /// Lease dropped; `next` is the bot granted after it
    Released {
        bot_id: String,
        next: Option<String>,
    },
    /// Left the wait queue without being granted
    Dequeued {
        bot_id: String,
    },
    Denied {
        bot_id: String,
        reason: BankViolation,
    },
    Status {
        snapshot: BankSnapshot,
    },
    Synced {
        bot_id: String,
        token: u64,
    },
    Asset {
        bot_id: String,
        level: AssetLevel,
    },
    Reserved {
        bot_id: String,
        reservation: Reservation,
    },
    ReservationCancelled {
        bot_id: String,
        reservation_id: String,
    },
    Withdrawn {
        bot_id: String,
        reservation_id: String,
        asset: Asset,
        quantity: u64,
        remaining: u64,
    },
    Deposited {
        bot_id: String,
        asset: Asset,
        quantity: u64,
        stock: u64,
    },
}

impl BankResponse {
    /// Bot the response is addressed to
    pub fn bot_id(&self) -> Option<&str> {
        match self {
            BankResponse::Granted { bot_id, .. }
            | BankResponse::Queued { bot_id, .. }
            | BankResponse::Released { bot_id, .. }
            | BankResponse::Dequeued { bot_id }
            | BankResponse::Denied { bot_id, .. }
            | BankResponse::Synced { bot_id, .. }
            | BankResponse::Asset { bot_id, .. }
            | BankResponse::Reserved { bot_id, .. }
            | BankResponse::ReservationCancelled { bot_id, .. }
            | BankResponse::Withdrawn { bot_id, .. }
            | BankResponse::Deposited { bot_id, .. } => Some(bot_id),
            BankResponse::Status { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankSnapshot {
    pub occupancy: Occupancy,
    pub assets: Vec<AssetLevel>,
    pub reservations: Vec<Reservation>,
}
