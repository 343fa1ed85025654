//! Bank ledger - stored quantities and outstanding reservations
//!
//! A reservation earmarks stock for one bot so two withdrawals cannot both
//! count the same items. `available = stock - reserved`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};

use crate::error::BankViolation;

const GOLD: &str = "gold";

/// Something stored in the bank: gold or an item code
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Asset {
    Gold,
    Item(String),
}

impl Asset {
    pub fn item(code: &str) -> Self {
        Asset::Item(code.to_string())
    }
}

impl From<String> for Asset {
    fn from(raw: String) -> Self {
        if raw == GOLD {
            Asset::Gold
        } else {
            Asset::Item(raw)
        }
    }
}

impl From<Asset> for String {
    fn from(asset: Asset) -> Self {
        asset.to_string()
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Asset::Gold => write!(f, "{GOLD}"),
            Asset::Item(code) => write!(f, "{code}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: String,
    pub bot_id: String,
    pub asset: Asset,
    pub quantity: u64,
}

/// Stock level of one asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetLevel {
    pub asset: Asset,
    pub stock: u64,
    pub reserved: u64,
    pub available: u64,
}

/// Result of committing a withdrawal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Withdrawal {
    pub reservation: Reservation,
    pub actual_quantity: u64,
    pub remaining: u64,
}

#[derive(Debug, Default)]
pub struct BankLedger {
    stock: BTreeMap<Asset, u64>,
    reservations: BTreeMap<String, Reservation>,
    reservation_counter: u64,
}

impl BankLedger {
    pub fn new(initial_gold: u64) -> Self {
        let mut ledger = Self::default();
        if initial_gold > 0 {
            ledger.stock.insert(Asset::Gold, initial_gold);
        }
        ledger
    }

    pub fn with_stock<I>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = (Asset, u64)>,
    {
        for (asset, quantity) in items {
            *self.stock.entry(asset).or_insert(0) += quantity;
        }
        self
    }

    pub fn stock(&self, asset: &Asset) -> u64 {
        self.stock.get(asset).copied().unwrap_or(0)
    }

    pub fn reserved(&self, asset: &Asset) -> u64 {
        self.reservations
            .values()
            .filter(|r| &r.asset == asset)
            .map(|r| r.quantity)
            .sum()
    }

    pub fn available(&self, asset: &Asset) -> u64 {
        self.stock(asset).saturating_sub(self.reserved(asset))
    }

    pub fn level(&self, asset: &Asset) -> AssetLevel {
        let stock = self.stock(asset);
        let reserved = self.reserved(asset);
        AssetLevel {
            asset: asset.clone(),
            stock,
            reserved,
            available: stock.saturating_sub(reserved),
        }
    }

    /// Levels of every asset with stock or reservations
    pub fn levels(&self) -> Vec<AssetLevel> {
        let mut assets: Vec<&Asset> = self.stock.keys().collect();
        for reservation in self.reservations.values() {
            if !assets.contains(&&reservation.asset) {
                assets.push(&reservation.asset);
            }
        }
        assets.sort();
        assets.into_iter().map(|a| self.level(a)).collect()
    }

    pub fn reservations(&self) -> impl Iterator<Item = &Reservation> {
        self.reservations.values()
    }

    pub fn reservation(&self, reservation_id: &str) -> Option<&Reservation> {
        self.reservations.get(reservation_id)
    }

    pub fn reserve(
        &mut self,
        bot_id: &str,
        asset: Asset,
        quantity: u64,
    ) -> Result<Reservation, BankViolation> {
        if quantity == 0 {
            return Err(BankViolation::InvalidQuantity(quantity));
        }
        let available = self.available(&asset);
        if quantity > available {
            return Err(BankViolation::Insufficient {
                asset: asset.to_string(),
                requested: quantity,
                available,
            });
        }

        self.reservation_counter += 1;
        let reservation = Reservation {
            id: format!("rsv-{}", self.reservation_counter),
            bot_id: bot_id.to_string(),
            asset,
            quantity,
        };
        info!(
            reservation_id = %reservation.id,
            bot_id,
            asset = %reservation.asset,
            quantity,
            "reserved"
        );
        self.reservations
            .insert(reservation.id.clone(), reservation.clone());
        Ok(reservation)
    }

    pub fn cancel_reservation(&mut self, reservation_id: &str) -> Result<Reservation, BankViolation> {
        let reservation = self
            .reservations
            .remove(reservation_id)
            .ok_or_else(|| BankViolation::UnknownReservation(reservation_id.to_string()))?;
        debug!(reservation_id, bot_id = %reservation.bot_id, "reservation cancelled");
        Ok(reservation)
    }

    /// Settle a reservation with the quantity actually withdrawn, which may
    /// differ from what was reserved
    pub fn commit_withdraw(
        &mut self,
        reservation_id: &str,
        actual_quantity: u64,
    ) -> Result<Withdrawal, BankViolation> {
        let reservation = self.cancel_reservation(reservation_id)?;
        let current = self.stock(&reservation.asset);
        let remaining = current.saturating_sub(actual_quantity);
        if remaining == 0 {
            self.stock.remove(&reservation.asset);
        } else {
            self.stock.insert(reservation.asset.clone(), remaining);
        }

        if actual_quantity != reservation.quantity {
            warn!(
                reservation_id,
                reserved = reservation.quantity,
                actual = actual_quantity,
                "withdrawal differs from reservation"
            );
        }
        info!(
            bot_id = %reservation.bot_id,
            asset = %reservation.asset,
            actual_quantity,
            remaining,
            "withdrawn"
        );
        Ok(Withdrawal {
            reservation,
            actual_quantity,
            remaining,
        })
    }

    /// Add stock; returns the new stock level
    pub fn deposit(&mut self, asset: Asset, quantity: u64) -> Result<u64, BankViolation> {
        if quantity == 0 {
            return Err(BankViolation::InvalidQuantity(quantity));
        }
        let entry = self.stock.entry(asset.clone()).or_insert(0);
        *entry = entry.saturating_add(quantity);
        info!(asset = %asset, quantity, stock = *entry, "deposited");
        Ok(*entry)
    }

    /// Drop every reservation held by `bot_id`
    pub fn release_for(&mut self, bot_id: &str) -> Vec<Reservation> {
        let ids: Vec<String> = self
            .reservations
            .values()
            .filter(|r| r.bot_id == bot_id)
            .map(|r| r.id.clone())
            .collect();
        ids.iter()
            .filter_map(|id| self.reservations.remove(id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> BankLedger {
        BankLedger::new(100).with_stock([(Asset::item("copper_ore"), 10)])
    }

    #[test]
    fn test_reservations_reduce_availability() {
        let mut ledger = ledger();
        let ore = Asset::item("copper_ore");
        ledger.reserve("a", ore.clone(), 6).unwrap();
        assert_eq!(ledger.available(&ore), 4);

        let err = ledger.reserve("b", ore.clone(), 5).unwrap_err();
        assert_eq!(
            err,
            BankViolation::Insufficient {
                asset: "copper_ore".into(),
                requested: 5,
                available: 4,
            }
        );
        assert!(ledger.reserve("b", ore, 4).is_ok());
    }

    #[test]
    fn test_commit_uses_actual_quantity() {
        let mut ledger = ledger();
        let ore = Asset::item("copper_ore");
        let reservation = ledger.reserve("a", ore.clone(), 6).unwrap();
        let withdrawal = ledger.commit_withdraw(&reservation.id, 5).unwrap();
        assert_eq!(withdrawal.remaining, 5);
        assert_eq!(ledger.stock(&ore), 5);
        assert_eq!(ledger.reserved(&ore), 0);

        assert_eq!(
            ledger.commit_withdraw(&reservation.id, 1),
            Err(BankViolation::UnknownReservation(reservation.id))
        );
    }

    #[test]
    fn test_withdrawing_everything_removes_asset() {
        let mut ledger = ledger();
        let reservation = ledger.reserve("a", Asset::Gold, 100).unwrap();
        ledger.commit_withdraw(&reservation.id, 100).unwrap();
        assert_eq!(ledger.stock(&Asset::Gold), 0);
        assert_eq!(ledger.levels().len(), 1);
    }

    #[test]
    fn test_deposit_and_zero_quantity() {
        let mut ledger = BankLedger::default();
        assert_eq!(ledger.deposit(Asset::Gold, 25).unwrap(), 25);
        assert_eq!(ledger.deposit(Asset::Gold, 5).unwrap(), 30);
        assert_eq!(
            ledger.deposit(Asset::Gold, 0),
            Err(BankViolation::InvalidQuantity(0))
        );
        assert_eq!(
            ledger.reserve("a", Asset::Gold, 0),
            Err(BankViolation::InvalidQuantity(0))
        );
    }

    #[test]
    fn test_release_for_bot() {
        let mut ledger = ledger();
        ledger.reserve("a", Asset::Gold, 10).unwrap();
        ledger.reserve("b", Asset::Gold, 10).unwrap();
        ledger.reserve("a", Asset::item("copper_ore"), 1).unwrap();

        let dropped = ledger.release_for("a");
        assert_eq!(dropped.len(), 2);
        assert_eq!(ledger.available(&Asset::Gold), 90);
        assert_eq!(ledger.reservations().count(), 1);
    }

    #[test]
    fn test_asset_wire_format() {
        assert_eq!(serde_json::to_value(Asset::Gold).unwrap(), "gold");
        let item: Asset = serde_json::from_str(r#""ash_wood""#).unwrap();
        assert_eq!(item, Asset::item("ash_wood"));
    }
}
