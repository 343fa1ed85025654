//! Bank actor
//!
//! Single owner of the bank lease and ledger. Requests arrive on
//! `bank.request`, answers go out on `bank.response` and occupancy changes
//! on `ui.bank`. Overdue leases raise one `ui.alert` each and are never
//! revoked; only the orchestrator may force a release.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::arbiter::{AcquireOutcome, BankArbiter, Eviction};
use super::ledger::BankLedger;
use super::protocol::{BankRequest, BankResponse, BankSnapshot};
use crate::actor::{Actor, ActorContext, ActorHandle};
use crate::bus::topic::{BANK_REQUEST, BANK_RESPONSE};
use crate::bus::{Envelope, Outbound, Payload};
use crate::config::BankConfig;
use crate::error::{BankViolation, FleetError, ProtocolError, Result};
use crate::orchestrator::ORCHESTRATOR_ID;
use crate::ui::{AlertLevel, UiEvent};

pub const BANK_ID: &str = "bank";

pub enum BankMsg {
    Snapshot(oneshot::Sender<BankSnapshot>),
}

pub type BankHandle = ActorHandle<BankActor>;

pub struct BankActor {
    config: BankConfig,
    arbiter: BankArbiter,
    ledger: BankLedger,
}

impl BankActor {
    pub fn new(config: BankConfig) -> Self {
        let ledger = BankLedger::new(config.initial_gold);
        Self::with_ledger(config, ledger)
    }

    pub fn with_ledger(config: BankConfig, ledger: BankLedger) -> Self {
        Self {
            config,
            arbiter: BankArbiter::new(),
            ledger,
        }
    }

    pub fn arbiter(&self) -> &BankArbiter {
        &self.arbiter
    }

    pub fn ledger(&self) -> &BankLedger {
        &self.ledger
    }

    pub fn snapshot(&self, now: Instant) -> BankSnapshot {
        BankSnapshot {
            occupancy: self.arbiter.occupancy(now),
            assets: self.ledger.levels(),
            reservations: self.ledger.reservations().cloned().collect(),
        }
    }

    /// Apply one request from `sender`. Unauthorized requests are errors;
    /// protocol violations by the bot become `Denied` responses.
    pub fn handle(&mut self, sender: &str, request: BankRequest, now: Instant) -> Result<Vec<Outbound>> {
        authorize(sender, &request)?;
        let before = (self.arbiter.holder().map(str::to_string), self.arbiter.waiting());

        let responses = match request {
            BankRequest::Acquire { bot_id } => match self.arbiter.acquire(&bot_id, now) {
                Ok(AcquireOutcome::Granted(lease)) => vec![BankResponse::Granted {
                    bot_id,
                    lease_id: lease.lease_id,
                }],
                Ok(AcquireOutcome::Queued { position }) => {
                    vec![BankResponse::Queued { bot_id, position }]
                }
                Err(reason) => vec![denied(bot_id, reason)],
            },
            BankRequest::Release { bot_id } => match self.arbiter.release(&bot_id, now) {
                Ok(next) => {
                    self.drop_reservations(&bot_id);
                    released(bot_id, next.map(|l| (l.holder, l.lease_id)))
                }
                Err(reason) => vec![denied(bot_id, reason)],
            },
            BankRequest::Abandon { bot_id } => {
                let eviction = self.arbiter.evict(&bot_id, now);
                if eviction.changed() {
                    self.eviction_responses(bot_id, eviction)
                } else {
                    let holder = self.arbiter.holder().map(str::to_string);
                    vec![denied(bot_id.clone(), BankViolation::NotHolder { bot_id, holder })]
                }
            }
            BankRequest::ForceRelease { bot_id } => {
                let eviction = self.arbiter.evict(&bot_id, now);
                if eviction.changed() {
                    warn!(bot_id = %bot_id, "bank access force-released");
                    self.eviction_responses(bot_id, eviction)
                } else {
                    debug!(bot_id = %bot_id, "force release for bot without bank access");
                    Vec::new()
                }
            }
            BankRequest::Status => vec![BankResponse::Status {
                snapshot: self.snapshot(now),
            }],
            BankRequest::Sync { bot_id, token } => vec![BankResponse::Synced { bot_id, token }],
            BankRequest::CheckAsset { bot_id, asset } => vec![BankResponse::Asset {
                level: self.ledger.level(&asset),
                bot_id,
            }],
            BankRequest::Reserve {
                bot_id,
                asset,
                quantity,
            } => match self
                .require_lease(&bot_id)
                .and_then(|_| self.ledger.reserve(&bot_id, asset, quantity))
            {
                Ok(reservation) => vec![BankResponse::Reserved {
                    bot_id,
                    reservation,
                }],
                Err(reason) => vec![denied(bot_id, reason)],
            },
            BankRequest::CancelReservation {
                bot_id,
                reservation_id,
            } => match self
                .require_lease(&bot_id)
                .and_then(|_| self.require_owner(&bot_id, &reservation_id))
                .and_then(|_| self.ledger.cancel_reservation(&reservation_id))
            {
                Ok(_) => vec![BankResponse::ReservationCancelled {
                    bot_id,
                    reservation_id,
                }],
                Err(reason) => vec![denied(bot_id, reason)],
            },
            BankRequest::CommitWithdraw {
                bot_id,
                reservation_id,
                actual_quantity,
            } => match self
                .require_lease(&bot_id)
                .and_then(|_| self.require_owner(&bot_id, &reservation_id))
                .and_then(|_| self.ledger.commit_withdraw(&reservation_id, actual_quantity))
            {
                Ok(withdrawal) => vec![BankResponse::Withdrawn {
                    bot_id,
                    reservation_id,
                    asset: withdrawal.reservation.asset,
                    quantity: withdrawal.actual_quantity,
                    remaining: withdrawal.remaining,
                }],
                Err(reason) => vec![denied(bot_id, reason)],
            },
            BankRequest::Deposit {
                bot_id,
                asset,
                quantity,
            } => match self
                .require_lease(&bot_id)
                .and_then(|_| self.ledger.deposit(asset.clone(), quantity))
            {
                Ok(stock) => vec![BankResponse::Deposited {
                    bot_id,
                    asset,
                    quantity,
                    stock,
                }],
                Err(reason) => vec![denied(bot_id, reason)],
            },
        };

        let mut out: Vec<Outbound> = responses
            .into_iter()
            .map(|r| Outbound::new(BANK_RESPONSE, Payload::BankResponse(r)))
            .collect();

        let after = (self.arbiter.holder().map(str::to_string), self.arbiter.waiting());
        if after != before {
            out.push(Outbound::ui(UiEvent::BankOccupancy {
                holder: after.0,
                waiting: after.1,
            }));
        }
        Ok(out)
    }

    /// Alert once for a lease held past the ceiling
    pub fn check_overdue(&mut self, now: Instant) -> Vec<Outbound> {
        let ceiling = Duration::from_millis(self.config.lease_ceiling_ms);
        match self.arbiter.take_overdue(now, ceiling) {
            Some(lease) => {
                let held_ms = lease.held_for(now).as_millis() as u64;
                warn!(bot_id = %lease.holder, lease_id = lease.lease_id, held_ms, "bank lease overdue");
                vec![Outbound::ui(UiEvent::alert(
                    BANK_ID,
                    AlertLevel::Warning,
                    format!(
                        "bot {} has held the bank for {}ms (ceiling {}ms)",
                        lease.holder, held_ms, self.config.lease_ceiling_ms
                    ),
                ))]
            }
            None => Vec::new(),
        }
    }

    fn require_lease(&self, bot_id: &str) -> std::result::Result<(), BankViolation> {
        if self.arbiter.is_holder(bot_id) {
            Ok(())
        } else {
            Err(BankViolation::NotHolder {
                bot_id: bot_id.to_string(),
                holder: self.arbiter.holder().map(str::to_string),
            })
        }
    }

    fn require_owner(&self, bot_id: &str, reservation_id: &str) -> std::result::Result<(), BankViolation> {
        match self.ledger.reservation(reservation_id) {
            Some(r) if r.bot_id == bot_id => Ok(()),
            _ => Err(BankViolation::UnknownReservation(reservation_id.to_string())),
        }
    }

    fn drop_reservations(&mut self, bot_id: &str) {
        let dropped = self.ledger.release_for(bot_id);
        if !dropped.is_empty() {
            info!(bot_id, count = dropped.len(), "open reservations dropped with lease");
        }
    }

    fn eviction_responses(&mut self, bot_id: String, eviction: Eviction) -> Vec<BankResponse> {
        if eviction.released {
            self.drop_reservations(&bot_id);
            released(bot_id, eviction.next.map(|l| (l.holder, l.lease_id)))
        } else {
            vec![BankResponse::Dequeued { bot_id }]
        }
    }
}

fn authorize(sender: &str, request: &BankRequest) -> std::result::Result<(), ProtocolError> {
    let allowed = match request {
        BankRequest::ForceRelease { .. } => sender == ORCHESTRATOR_ID,
        BankRequest::Status => true,
        other => other.bot_id() == Some(sender),
    };
    if allowed {
        Ok(())
    } else {
        Err(ProtocolError::Unauthorized {
            sender: sender.to_string(),
            action: request.name().to_string(),
        })
    }
}

fn denied(bot_id: String, reason: BankViolation) -> BankResponse {
    warn!(bot_id = %bot_id, reason = %reason, "bank request denied");
    BankResponse::Denied { bot_id, reason }
}

fn released(bot_id: String, next: Option<(String, u64)>) -> Vec<BankResponse> {
    let mut responses = vec![BankResponse::Released {
        bot_id,
        next: next.as_ref().map(|(holder, _)| holder.clone()),
    }];
    if let Some((holder, lease_id)) = next {
        responses.push(BankResponse::Granted {
            bot_id: holder,
            lease_id,
        });
    }
    responses
}

#[async_trait]
impl Actor for BankActor {
    type Msg = BankMsg;

    fn id(&self) -> &str {
        BANK_ID
    }

    fn subscriptions(&self) -> Vec<String> {
        vec![BANK_REQUEST.to_string()]
    }

    fn tick_interval(&self) -> Option<Duration> {
        Some(Duration::from_millis(self.config.check_interval_ms))
    }

    async fn on_start(&mut self, _ctx: &ActorContext<BankMsg>) -> Result<()> {
        info!(
            lease_ceiling_ms = self.config.lease_ceiling_ms,
            assets = self.ledger.levels().len(),
            "bank online"
        );
        Ok(())
    }

    async fn on_envelope(&mut self, envelope: Envelope, ctx: &ActorContext<BankMsg>) -> Result<()> {
        let request = match envelope.payload {
            Payload::BankRequest(request) => request,
            other => {
                return Err(FleetError::from(ProtocolError::PayloadMismatch {
                    topic: envelope.topic.to_string(),
                    kind: other.kind_name().to_string(),
                }))
            }
        };
        debug!(sender = %envelope.sender_id, request = request.name(), "bank request");
        let out = self.handle(&envelope.sender_id, request, Instant::now())?;
        if !self.arbiter.check_invariant() {
            warn!(occupancy = ?self.arbiter.occupancy(Instant::now()), "bank queue invariant violated");
        }
        ctx.publish_all(out).await;
        Ok(())
    }

    async fn on_message(&mut self, msg: BankMsg, _ctx: &ActorContext<BankMsg>) -> Result<()> {
        match msg {
            BankMsg::Snapshot(reply) => {
                let _ = reply.send(self.snapshot(Instant::now()));
            }
        }
        Ok(())
    }

    async fn on_tick(&mut self, ctx: &ActorContext<BankMsg>) -> Result<()> {
        let out = self.check_overdue(Instant::now());
        if !out.is_empty() {
            ctx.publish_all(out).await;
        }
        Ok(())
    }

    async fn on_stop(&mut self, _ctx: &ActorContext<BankMsg>) {
        info!(holder = ?self.arbiter.holder(), waiting = self.arbiter.waiting().len(), "bank stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::ledger::Asset;
    use crate::bus::topic::UI_BANK;

    fn bank() -> BankActor {
        BankActor::new(BankConfig {
            initial_gold: 50,
            ..BankConfig::default()
        })
    }

    fn responses(out: &[Outbound]) -> Vec<BankResponse> {
        out.iter()
            .filter_map(|o| match &o.payload {
                Payload::BankResponse(r) => Some(r.clone()),
                _ => None,
            })
            .collect()
    }

    fn acquire(bank: &mut BankActor, bot: &str, now: Instant) -> Vec<Outbound> {
        bank.handle(bot, BankRequest::Acquire { bot_id: bot.into() }, now)
            .unwrap()
    }

    #[test]
    fn test_release_grants_next_in_arrival_order() {
        let now = Instant::now();
        let mut bank = bank();
        acquire(&mut bank, "X", now);
        acquire(&mut bank, "Y", now);
        acquire(&mut bank, "Z", now);

        let out = bank
            .handle("X", BankRequest::Release { bot_id: "X".into() }, now)
            .unwrap();
        assert_eq!(
            responses(&out),
            vec![
                BankResponse::Released {
                    bot_id: "X".into(),
                    next: Some("Y".into()),
                },
                BankResponse::Granted {
                    bot_id: "Y".into(),
                    lease_id: 2,
                },
            ]
        );
        assert!(out.iter().any(|o| o.topic == UI_BANK
            && o.payload
                == Payload::Ui(UiEvent::BankOccupancy {
                    holder: Some("Y".into()),
                    waiting: vec!["Z".into()],
                })));
    }

    #[test]
    fn test_non_holder_release_denied_without_state_change() {
        let now = Instant::now();
        let mut bank = bank();
        acquire(&mut bank, "X", now);
        let out = bank
            .handle("Y", BankRequest::Release { bot_id: "Y".into() }, now)
            .unwrap();
        assert!(matches!(
            responses(&out)[..],
            [BankResponse::Denied {
                reason: BankViolation::NotHolder { .. },
                ..
            }]
        ));
        assert_eq!(out.len(), 1);
        assert_eq!(bank.arbiter().holder(), Some("X"));
    }

    #[test]
    fn test_force_release_only_from_orchestrator() {
        let now = Instant::now();
        let mut bank = bank();
        acquire(&mut bank, "X", now);

        let forged = bank.handle("Y", BankRequest::ForceRelease { bot_id: "X".into() }, now);
        assert!(matches!(
            forged,
            Err(FleetError::Protocol(ProtocolError::Unauthorized { .. }))
        ));

        let out = bank
            .handle(
                ORCHESTRATOR_ID,
                BankRequest::ForceRelease { bot_id: "X".into() },
                now,
            )
            .unwrap();
        assert!(matches!(
            responses(&out)[..],
            [BankResponse::Released { next: None, .. }]
        ));
        assert_eq!(bank.arbiter().holder(), None);
    }

    #[test]
    fn test_requests_must_come_from_named_bot() {
        let now = Instant::now();
        let mut bank = bank();
        let result = bank.handle("Y", BankRequest::Acquire { bot_id: "X".into() }, now);
        assert!(matches!(result, Err(FleetError::Protocol(_))));
        assert_eq!(bank.arbiter().holder(), None);
    }

    #[test]
    fn test_ledger_requires_lease() {
        let now = Instant::now();
        let mut bank = bank();
        let reserve = BankRequest::Reserve {
            bot_id: "X".into(),
            asset: Asset::Gold,
            quantity: 10,
        };
        let out = bank.handle("X", reserve.clone(), now).unwrap();
        assert!(matches!(
            responses(&out)[..],
            [BankResponse::Denied {
                reason: BankViolation::NotHolder { .. },
                ..
            }]
        ));

        acquire(&mut bank, "X", now);
        let out = bank.handle("X", reserve, now).unwrap();
        let reservation = match &responses(&out)[..] {
            [BankResponse::Reserved { reservation, .. }] => reservation.clone(),
            other => panic!("unexpected {other:?}"),
        };

        let out = bank
            .handle(
                "X",
                BankRequest::CommitWithdraw {
                    bot_id: "X".into(),
                    reservation_id: reservation.id,
                    actual_quantity: 10,
                },
                now,
            )
            .unwrap();
        assert!(matches!(
            responses(&out)[..],
            [BankResponse::Withdrawn { remaining: 40, .. }]
        ));

        // read-only check works without the lease
        let out = bank
            .handle(
                "Y",
                BankRequest::CheckAsset {
                    bot_id: "Y".into(),
                    asset: Asset::Gold,
                },
                now,
            )
            .unwrap();
        assert!(matches!(
            &responses(&out)[..],
            [BankResponse::Asset { level, .. }] if level.available == 40
        ));
    }

    #[test]
    fn test_release_drops_open_reservations() {
        let now = Instant::now();
        let mut bank = bank();
        acquire(&mut bank, "X", now);
        bank.handle(
            "X",
            BankRequest::Reserve {
                bot_id: "X".into(),
                asset: Asset::Gold,
                quantity: 30,
            },
            now,
        )
        .unwrap();
        assert_eq!(bank.ledger().available(&Asset::Gold), 20);
        bank.handle("X", BankRequest::Release { bot_id: "X".into() }, now)
            .unwrap();
        assert_eq!(bank.ledger().available(&Asset::Gold), 50);
    }

    #[test]
    fn test_abandon_leaves_queue() {
        let now = Instant::now();
        let mut bank = bank();
        acquire(&mut bank, "X", now);
        acquire(&mut bank, "Y", now);
        let out = bank
            .handle("Y", BankRequest::Abandon { bot_id: "Y".into() }, now)
            .unwrap();
        assert_eq!(
            responses(&out),
            vec![BankResponse::Dequeued { bot_id: "Y".into() }]
        );
        assert!(bank.arbiter().waiting().is_empty());
    }

    #[test]
    fn test_sync_echoes_token_without_state_change() {
        let now = Instant::now();
        let mut bank = bank();
        acquire(&mut bank, "X", now);
        let out = bank
            .handle(
                "X",
                BankRequest::Sync {
                    bot_id: "X".into(),
                    token: 7,
                },
                now,
            )
            .unwrap();
        assert_eq!(
            responses(&out),
            vec![BankResponse::Synced {
                bot_id: "X".into(),
                token: 7,
            }]
        );
        assert_eq!(out.len(), 1);
        assert_eq!(bank.arbiter().holder(), Some("X"));

        let foreign = bank.handle(
            "Y",
            BankRequest::Sync {
                bot_id: "X".into(),
                token: 8,
            },
            now,
        );
        assert!(foreign.is_err());
    }

    #[test]
    fn test_overdue_alert_emitted_once() {
        let start = Instant::now();
        let mut bank = BankActor::new(BankConfig {
            lease_ceiling_ms: 100,
            ..BankConfig::default()
        });
        acquire(&mut bank, "X", start);
        assert!(bank.check_overdue(start + Duration::from_millis(50)).is_empty());
        assert_eq!(bank.check_overdue(start + Duration::from_millis(150)).len(), 1);
        assert!(bank.check_overdue(start + Duration::from_millis(500)).is_empty());
        assert_eq!(bank.arbiter().holder(), Some("X"));
    }
}
