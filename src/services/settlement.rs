//! Booking ledger: status transitions, deposit returns and payment settlement.
//!
//! Amounts are planned by pure functions and committed through a [`Ledger`],
//! which must apply each plan as a single unit of work. The Postgres ledger
//! lives in `repositories::bookings`.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;

use super::payments::SignatureVerifier;
use super::ServiceError;
use crate::models::bookings::{
    Booking, BookingStatus, GatewayDetails, GatewayReference, PaymentMethod, MAX_AMOUNT,
};
use crate::models::ledger::{
    EarningsStatus, LedgerEntry, NewLedgerEntry, NewPlatformEarning, PlatformEarning,
    TransactionStatus, TransactionType,
};
use crate::settings::OverlapPolicy;

pub const DEPOSIT_REFUND_METHOD: &str = "wallet";
pub const DAMAGE_METHOD: &str = "damage";
pub const DEPOSIT_REFUND_NOTE: &str = "deposit refund";
pub const DAMAGE_NOTE: &str = "damage hold";

/// Platform fee in basis points of the fee base. 100 bps is 1 %.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeePolicy {
    bps: i64,
}

impl FeePolicy {
    pub const BASIS: i64 = 10_000;

    pub fn new(bps: i64) -> Self {
        Self {
            bps: bps.clamp(0, Self::BASIS),
        }
    }

    /// Floor of `base * bps / 10 000`, or `None` if the product overflows.
    pub fn fee(&self, base: i64) -> Option<i64> {
        base.max(0)
            .checked_mul(self.bps)
            .map(|product| product.div_euclid(Self::BASIS))
    }
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self::new(100)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SettlementPlan {
    pub booking_id: String,
    pub method: PaymentMethod,
    pub collected: i64,
    pub platform_fee: i64,
    pub owner_share: i64,
    pub gateway: Option<GatewayDetails>,
    pub owner_credit: NewLedgerEntry,
    pub renter_debit: NewLedgerEntry,
    pub earning: NewPlatformEarning,
}

fn out_of_range() -> ServiceError {
    ServiceError::Validation(format!("amounts must not exceed {}", MAX_AMOUNT))
}

pub fn plan_settlement(
    fees: &FeePolicy,
    booking: &Booking,
    method: PaymentMethod,
    amount: Option<i64>,
    gateway: Option<GatewayDetails>,
) -> Result<SettlementPlan, ServiceError> {
    let details = booking.details();
    if details.status == BookingStatus::Rejected {
        return Err(ServiceError::Conflict(
            "rejected bookings cannot be paid".to_string(),
        ));
    }

    let rental = details.rental_amount;
    let deposit = details.deposit_amount;
    let oversized = matches!(amount, Some(a) if a > MAX_AMOUNT);
    if rental > MAX_AMOUNT || deposit > MAX_AMOUNT || oversized {
        return Err(out_of_range());
    }
    let total = rental.checked_add(deposit).ok_or_else(out_of_range)?;
    let collected = amount.unwrap_or(total);
    if collected < 0 {
        return Err(ServiceError::Validation(
            "amount must not be negative".to_string(),
        ));
    }

    let (platform_fee, owner_share) = if method.is_online() {
        let fee = fees.fee(total).ok_or_else(out_of_range)?;
        (fee, rental.checked_sub(fee).ok_or_else(out_of_range)?)
    } else {
        let fee = fees.fee(rental).ok_or_else(out_of_range)?;
        let share = collected
            .checked_sub(deposit)
            .and_then(|rest| rest.checked_sub(fee))
            .ok_or_else(out_of_range)?;
        (fee, share)
    };

    if owner_share < 0 {
        return Err(ServiceError::Validation(format!(
            "collected amount {} does not cover deposit {} and fee {}",
            collected, deposit, platform_fee
        )));
    }

    let owner_credit = NewLedgerEntry {
        user_id: details.owner_id.clone(),
        source_user_id: details.rented_by.clone(),
        booking_id: booking.id.clone(),
        kind: TransactionType::Credit,
        method: method.as_str().to_string(),
        amount: owner_share,
        deposit_amount: deposit,
        platform_fee,
        actual_rental_amount: None,
        note: None,
        status: TransactionStatus::Success,
    };

    let renter_debit = NewLedgerEntry {
        user_id: details.rented_by.clone(),
        source_user_id: details.owner_id.clone(),
        booking_id: booking.id.clone(),
        kind: TransactionType::Debit,
        method: method.as_str().to_string(),
        amount: collected,
        deposit_amount: deposit,
        platform_fee,
        actual_rental_amount: Some(collected - deposit),
        note: None,
        status: TransactionStatus::Success,
    };

    let earning = NewPlatformEarning {
        booking_id: booking.id.clone(),
        owner_id: details.owner_id.clone(),
        customer_id: details.rented_by.clone(),
        rental_amount: rental,
        deposit_amount: deposit,
        platform_fee,
        method: method.as_str().to_string(),
        status: EarningsStatus::Earned,
    };

    Ok(SettlementPlan {
        booking_id: booking.id.clone(),
        method,
        collected,
        platform_fee,
        owner_share,
        gateway: gateway.filter(|_| method.is_online()),
        owner_credit,
        renter_debit,
        earning,
    })
}

#[derive(Clone, Debug, PartialEq)]
pub struct WalletCredit {
    pub user_id: String,
    pub amount: i64,
}

/// A transition to commit. `from` is compared against the stored status so a
/// concurrent writer that got there first turns this into a stale outcome.
#[derive(Clone, Debug, PartialEq)]
pub struct StatusChange {
    pub booking_id: String,
    pub from: BookingStatus,
    pub to: BookingStatus,
    pub entry: Option<NewLedgerEntry>,
    pub wallet_credit: Option<WalletCredit>,
    pub reject_overlap: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StatusPlan {
    Unchanged,
    Change(StatusChange),
}

pub fn plan_status_change(
    booking: &Booking,
    actor: &str,
    next: BookingStatus,
    is_damaged: bool,
    damage_amount: Option<i64>,
    overlap: OverlapPolicy,
) -> Result<StatusPlan, ServiceError> {
    let details = booking.details();
    if details.owner_id != actor {
        return Err(ServiceError::Forbidden(
            "only the owner can change a booking's status".to_string(),
        ));
    }

    let current = details.status;
    if current == next {
        return Ok(StatusPlan::Unchanged);
    }
    if !current.can_transition_to(next) {
        return Err(ServiceError::Conflict(format!(
            "cannot move booking from {} to {}",
            current.as_str(),
            next.as_str()
        )));
    }

    let mut change = StatusChange {
        booking_id: booking.id.clone(),
        from: current,
        to: next,
        entry: None,
        wallet_credit: None,
        reject_overlap: next == BookingStatus::Approved && overlap == OverlapPolicy::Reject,
    };

    if next == BookingStatus::Returned {
        let deposit = details.deposit_amount;
        if is_damaged {
            let damage = damage_amount.ok_or_else(|| {
                ServiceError::Validation("damageAmount is required for damaged returns".to_string())
            })?;
            if damage < 0 {
                return Err(ServiceError::Validation(
                    "damageAmount must not be negative".to_string(),
                ));
            }
            if damage > MAX_AMOUNT {
                return Err(out_of_range());
            }
            change.entry = Some(NewLedgerEntry {
                user_id: details.rented_by.clone(),
                source_user_id: details.owner_id.clone(),
                booking_id: booking.id.clone(),
                kind: TransactionType::Debit,
                method: DAMAGE_METHOD.to_string(),
                amount: damage,
                deposit_amount: deposit,
                platform_fee: 0,
                actual_rental_amount: None,
                note: Some(DAMAGE_NOTE.to_string()),
                status: TransactionStatus::Held,
            });
        } else {
            change.entry = Some(NewLedgerEntry {
                user_id: details.rented_by.clone(),
                source_user_id: details.owner_id.clone(),
                booking_id: booking.id.clone(),
                kind: TransactionType::Credit,
                method: DEPOSIT_REFUND_METHOD.to_string(),
                amount: deposit,
                deposit_amount: deposit,
                platform_fee: 0,
                actual_rental_amount: None,
                note: Some(DEPOSIT_REFUND_NOTE.to_string()),
                status: TransactionStatus::Success,
            });
            change.wallet_credit = Some(WalletCredit {
                user_id: details.rented_by.clone(),
                amount: deposit,
            });
        }
    }

    Ok(StatusPlan::Change(change))
}

#[derive(Clone, Debug, PartialEq)]
pub enum StatusOutcome {
    Applied {
        booking: Booking,
        entry: Option<LedgerEntry>,
    },
    /// Stored status no longer matched `from`. Carries the current row.
    Stale(Booking),
    Overlap,
    Missing,
}

/// Amounts of a settlement that already happened, recovered from its rows.
#[derive(Clone, Copy, Debug, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SettlementRecord {
    pub collected: i64,
    pub platform_fee: i64,
    pub owner_share: i64,
}

impl SettlementRecord {
    pub fn recover(
        booking: &Booking,
        entries: &[LedgerEntry],
        earning: Option<&PlatformEarning>,
    ) -> Self {
        let details = booking.details();
        let owner_share = entries
            .iter()
            .find(|e| e.kind == TransactionType::Credit && e.user_id == details.owner_id)
            .map(|e| e.amount)
            .unwrap_or_default();
        let collected = entries
            .iter()
            .find(|e| {
                e.kind == TransactionType::Debit
                    && e.user_id == details.rented_by
                    && e.method != DAMAGE_METHOD
            })
            .map(|e| e.amount)
            .unwrap_or_default();

        Self {
            collected,
            platform_fee: earning.map(|e| e.platform_fee).unwrap_or_default(),
            owner_share,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SettlementOutcome {
    Settled(Booking),
    AlreadySettled {
        booking: Booking,
        record: SettlementRecord,
    },
    /// The booking was rejected after the plan was made.
    Rejected,
    Missing,
}

#[async_trait]
pub trait Ledger: Send + Sync + 'static {
    async fn load_booking(&self, booking_id: &str) -> Result<Option<Booking>, anyhow::Error>;

    /// Commits the status, the ledger row and the wallet credit together, or
    /// nothing at all.
    async fn apply_status_change(&self, change: &StatusChange)
        -> Result<StatusOutcome, anyhow::Error>;

    /// Commits the booking patch, both ledger rows, the earnings row and the
    /// owner's wallet credit together. A booking that is already paid is
    /// left untouched.
    async fn apply_settlement(&self, plan: &SettlementPlan)
        -> Result<SettlementOutcome, anyhow::Error>;

    async fn settlement_record(&self, booking: &Booking) -> Result<SettlementRecord, anyhow::Error>;
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub booking: Booking,
    pub changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<LedgerEntry>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementResult {
    pub booking: Booking,
    pub platform_fee: i64,
    pub owner_share: i64,
    pub collected: i64,
    pub already_settled: bool,
}

#[derive(Clone)]
pub struct SettlementEngine<L> {
    ledger: L,
    fees: FeePolicy,
    overlap: OverlapPolicy,
    verifier: Option<SignatureVerifier>,
}

impl<L: Ledger> SettlementEngine<L> {
    pub fn new(
        ledger: L,
        fees: FeePolicy,
        overlap: OverlapPolicy,
        verifier: Option<SignatureVerifier>,
    ) -> Self {
        Self {
            ledger,
            fees,
            overlap,
            verifier,
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    async fn booking(&self, booking_id: &str) -> Result<Booking, ServiceError> {
        self.ledger
            .load_booking(booking_id)
            .await
            .map_err(ServiceError::database)?
            .ok_or_else(|| ServiceError::NotFound("Booking not found".to_string()))
    }

    pub async fn update_status(
        &self,
        actor: &str,
        booking_id: &str,
        next: BookingStatus,
        is_damaged: bool,
        damage_amount: Option<i64>,
    ) -> Result<StatusUpdate, ServiceError> {
        let booking = self.booking(booking_id).await?;

        let change = match plan_status_change(
            &booking,
            actor,
            next,
            is_damaged,
            damage_amount,
            self.overlap,
        )? {
            StatusPlan::Unchanged => {
                return Ok(StatusUpdate {
                    booking,
                    changed: false,
                    transaction: None,
                })
            }
            StatusPlan::Change(change) => change,
        };

        let outcome = self
            .ledger
            .apply_status_change(&change)
            .await
            .map_err(ServiceError::database)?;

        match outcome {
            StatusOutcome::Applied { booking, entry } => {
                log::info!(
                    "Booking {} moved from {} to {}.",
                    booking.id,
                    change.from.as_str(),
                    change.to.as_str()
                );
                Ok(StatusUpdate {
                    booking,
                    changed: true,
                    transaction: entry,
                })
            }
            StatusOutcome::Stale(current) if current.status() == next => Ok(StatusUpdate {
                booking: current,
                changed: false,
                transaction: None,
            }),
            StatusOutcome::Stale(current) => Err(ServiceError::Conflict(format!(
                "booking is now {}, cannot move to {}",
                current.status().as_str(),
                next.as_str()
            ))),
            StatusOutcome::Overlap => Err(ServiceError::Conflict(
                "dates overlap an approved booking for this post".to_string(),
            )),
            StatusOutcome::Missing => Err(ServiceError::NotFound("Booking not found".to_string())),
        }
    }

    pub async fn settle_payment(
        &self,
        actor: &str,
        booking_id: &str,
        method: PaymentMethod,
        amount: Option<i64>,
        reference: Option<GatewayReference>,
    ) -> Result<SettlementResult, ServiceError> {
        let booking = self.booking(booking_id).await?;
        if !booking.is_party(actor) {
            return Err(ServiceError::Forbidden(
                "only the renter or the owner can settle a booking".to_string(),
            ));
        }

        if booking.details().payment_completed {
            return self.already_settled(booking).await;
        }

        let gateway = match (method.is_online(), reference) {
            (true, Some(reference)) => Some(self.verify_reference(reference)?),
            _ => None,
        };

        let plan = plan_settlement(&self.fees, &booking, method, amount, gateway)?;
        let outcome = self
            .ledger
            .apply_settlement(&plan)
            .await
            .map_err(ServiceError::database)?;

        match outcome {
            SettlementOutcome::Settled(booking) => {
                log::info!(
                    "Settled booking {} via {}: collected {}, fee {}, owner share {}.",
                    booking.id,
                    method.as_str(),
                    plan.collected,
                    plan.platform_fee,
                    plan.owner_share
                );
                Ok(SettlementResult {
                    booking,
                    platform_fee: plan.platform_fee,
                    owner_share: plan.owner_share,
                    collected: plan.collected,
                    already_settled: false,
                })
            }
            SettlementOutcome::AlreadySettled { booking, record } => {
                log::warn!("Booking {} was settled concurrently.", booking.id);
                Ok(Self::settled_result(booking, record))
            }
            SettlementOutcome::Rejected => Err(ServiceError::Conflict(
                "rejected bookings cannot be paid".to_string(),
            )),
            SettlementOutcome::Missing => Err(ServiceError::NotFound("Booking not found".to_string())),
        }
    }

    async fn already_settled(&self, booking: Booking) -> Result<SettlementResult, ServiceError> {
        let record = self
            .ledger
            .settlement_record(&booking)
            .await
            .map_err(ServiceError::database)?;

        Ok(Self::settled_result(booking, record))
    }

    fn settled_result(booking: Booking, record: SettlementRecord) -> SettlementResult {
        SettlementResult {
            booking,
            platform_fee: record.platform_fee,
            owner_share: record.owner_share,
            collected: record.collected,
            already_settled: true,
        }
    }

    fn verify_reference(&self, reference: GatewayReference) -> Result<GatewayDetails, ServiceError> {
        if let Some(verifier) = &self.verifier {
            let (order_id, payment_id, signature) = match (
                reference.order_id.as_deref(),
                reference.payment_id.as_deref(),
                reference.signature.as_deref(),
            ) {
                (Some(o), Some(p), Some(s)) => (o, p, s),
                _ => {
                    return Err(ServiceError::Validation(
                        "gateway reference needs orderId, paymentId and signature".to_string(),
                    ))
                }
            };
            if !verifier.verify(order_id, payment_id, signature) {
                log::warn!("Rejected gateway signature for order {}.", order_id);
                return Err(ServiceError::Forbidden(
                    "payment signature does not match".to_string(),
                ));
            }
        }

        Ok(GatewayDetails {
            order_id: reference.order_id,
            payment_id: reference.payment_id,
            signature: reference.signature,
            paid_at: Utc::now(),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::bookings::{BookingDetails, PaymentStatus};
    use chrono::Duration;
    use serde_json::Map;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    pub(crate) fn booking(id: &str, status: BookingStatus, rental: i64, deposit: i64) -> Booking {
        let now = Utc::now();
        Booking {
            id: id.to_string(),
            booking_details: BookingDetails {
                post_id: "post-1".to_string(),
                owner_id: "owner".to_string(),
                rented_by: "renter".to_string(),
                start_date: now,
                end_date: now + Duration::days(2),
                status,
                rental_amount: rental,
                deposit_amount: deposit,
                product_name: Some("Camping tent".to_string()),
                booking_code: None,
                payment_status: PaymentStatus::Pending,
                payment_method: None,
                payment_completed: false,
                razorpay_details: None,
                extra: Map::new(),
            },
            created_at: now,
            updated_at: now,
        }
    }

    #[derive(Default)]
    struct State {
        bookings: HashMap<String, Booking>,
        wallets: HashMap<String, i64>,
        entries: Vec<LedgerEntry>,
        earnings: Vec<PlatformEarning>,
    }

    #[derive(Clone, Default)]
    pub(crate) struct MemoryLedger {
        state: Arc<Mutex<State>>,
    }

    impl MemoryLedger {
        pub(crate) fn with(bookings: Vec<Booking>) -> Self {
            let ledger = Self::default();
            {
                let mut state = ledger.state.lock().unwrap();
                for booking in bookings {
                    state.bookings.insert(booking.id.clone(), booking);
                }
            }
            ledger
        }

        fn wallet(&self, user: &str) -> i64 {
            self.state.lock().unwrap().wallets.get(user).copied().unwrap_or(0)
        }

        fn entries(&self) -> Vec<LedgerEntry> {
            self.state.lock().unwrap().entries.clone()
        }

        fn earnings(&self) -> usize {
            self.state.lock().unwrap().earnings.len()
        }

        fn approved_overlap(state: &State, booking: &Booking) -> bool {
            let d = booking.details();
            state.bookings.values().any(|other| {
                let o = other.details();
                other.id != booking.id
                    && o.post_id == d.post_id
                    && o.status == BookingStatus::Approved
                    && o.start_date <= d.end_date
                    && o.end_date >= d.start_date
            })
        }
    }

    fn entry(new: &NewLedgerEntry, n: usize) -> LedgerEntry {
        LedgerEntry {
            id: format!("tx-{n}"),
            user_id: new.user_id.clone(),
            source_user_id: new.source_user_id.clone(),
            booking_id: new.booking_id.clone(),
            kind: new.kind,
            method: new.method.clone(),
            amount: new.amount,
            deposit_amount: new.deposit_amount,
            platform_fee: new.platform_fee,
            actual_rental_amount: new.actual_rental_amount,
            note: new.note.clone(),
            status: new.status,
            created_at: Utc::now(),
        }
    }

    #[async_trait]
    impl Ledger for MemoryLedger {
        async fn load_booking(&self, booking_id: &str) -> Result<Option<Booking>, anyhow::Error> {
            Ok(self.state.lock().unwrap().bookings.get(booking_id).cloned())
        }

        async fn apply_status_change(
            &self,
            change: &StatusChange,
        ) -> Result<StatusOutcome, anyhow::Error> {
            let mut state = self.state.lock().unwrap();
            let Some(current) = state.bookings.get(&change.booking_id).cloned() else {
                return Ok(StatusOutcome::Missing);
            };
            if current.status() != change.from {
                return Ok(StatusOutcome::Stale(current));
            }
            if change.reject_overlap && Self::approved_overlap(&state, &current) {
                return Ok(StatusOutcome::Overlap);
            }

            let mut updated = current;
            updated.booking_details.status = change.to;
            state.bookings.insert(updated.id.clone(), updated.clone());

            let written = change.entry.as_ref().map(|new| entry(new, state.entries.len()));
            if let Some(written) = &written {
                state.entries.push(written.clone());
            }
            if let Some(credit) = &change.wallet_credit {
                *state.wallets.entry(credit.user_id.clone()).or_default() += credit.amount;
            }

            Ok(StatusOutcome::Applied {
                booking: updated,
                entry: written,
            })
        }

        async fn apply_settlement(
            &self,
            plan: &SettlementPlan,
        ) -> Result<SettlementOutcome, anyhow::Error> {
            let mut state = self.state.lock().unwrap();
            let Some(current) = state.bookings.get(&plan.booking_id).cloned() else {
                return Ok(SettlementOutcome::Missing);
            };
            if current.details().payment_completed {
                let entries: Vec<_> = state
                    .entries
                    .iter()
                    .filter(|e| e.booking_id == current.id)
                    .cloned()
                    .collect();
                let earning = state.earnings.iter().find(|e| e.booking_id == current.id);
                let record = SettlementRecord::recover(&current, &entries, earning);
                return Ok(SettlementOutcome::AlreadySettled {
                    booking: current,
                    record,
                });
            }
            if current.status() == BookingStatus::Rejected {
                return Ok(SettlementOutcome::Rejected);
            }

            let mut updated = current;
            updated.booking_details.payment_status = PaymentStatus::Completed;
            updated.booking_details.payment_method = Some(plan.method);
            updated.booking_details.payment_completed = true;
            if plan.gateway.is_some() {
                updated.booking_details.razorpay_details = plan.gateway.clone();
            }
            state.bookings.insert(updated.id.clone(), updated.clone());

            for new in [&plan.owner_credit, &plan.renter_debit] {
                let written = entry(new, state.entries.len());
                state.entries.push(written);
            }
            let earning_id = format!("earning-{}", state.earnings.len());
            state.earnings.push(PlatformEarning {
                id: earning_id,
                booking_id: plan.earning.booking_id.clone(),
                owner_id: plan.earning.owner_id.clone(),
                customer_id: plan.earning.customer_id.clone(),
                rental_amount: plan.earning.rental_amount,
                deposit_amount: plan.earning.deposit_amount,
                platform_fee: plan.earning.platform_fee,
                method: plan.earning.method.clone(),
                status: plan.earning.status,
                created_at: Utc::now(),
            });
            *state
                .wallets
                .entry(plan.owner_credit.user_id.clone())
                .or_default() += plan.owner_share;

            Ok(SettlementOutcome::Settled(updated))
        }

        async fn settlement_record(&self, booking: &Booking) -> Result<SettlementRecord, anyhow::Error> {
            let state = self.state.lock().unwrap();
            let entries: Vec<_> = state
                .entries
                .iter()
                .filter(|e| e.booking_id == booking.id)
                .cloned()
                .collect();
            let earning = state.earnings.iter().find(|e| e.booking_id == booking.id);
            Ok(SettlementRecord::recover(booking, &entries, earning))
        }
    }

    /// Serves a fixed snapshot on reads while writes go to the inner ledger,
    /// like a reader that lost a race with another writer.
    struct StaleReads {
        snapshot: Booking,
        inner: MemoryLedger,
    }

    #[async_trait]
    impl Ledger for StaleReads {
        async fn load_booking(&self, _booking_id: &str) -> Result<Option<Booking>, anyhow::Error> {
            Ok(Some(self.snapshot.clone()))
        }

        async fn apply_status_change(
            &self,
            change: &StatusChange,
        ) -> Result<StatusOutcome, anyhow::Error> {
            self.inner.apply_status_change(change).await
        }

        async fn apply_settlement(
            &self,
            plan: &SettlementPlan,
        ) -> Result<SettlementOutcome, anyhow::Error> {
            self.inner.apply_settlement(plan).await
        }

        async fn settlement_record(&self, booking: &Booking) -> Result<SettlementRecord, anyhow::Error> {
            self.inner.settlement_record(booking).await
        }
    }

    fn engine(ledger: MemoryLedger, overlap: OverlapPolicy) -> SettlementEngine<MemoryLedger> {
        SettlementEngine::new(ledger, FeePolicy::default(), overlap, None)
    }

    #[test]
    fn one_percent_fee_floors() {
        let fees = FeePolicy::default();
        assert_eq!(fees.fee(1200), Some(12));
        assert_eq!(fees.fee(1000), Some(10));
        assert_eq!(fees.fee(99), Some(0));
        assert_eq!(fees.fee(199), Some(1));
        assert_eq!(FeePolicy::new(250).fee(1000), Some(25));
    }

    #[test]
    fn fee_reports_overflow_instead_of_wrapping() {
        assert_eq!(FeePolicy::default().fee(i64::MAX), None);
        assert_eq!(FeePolicy::default().fee(2 * MAX_AMOUNT), Some(2 * MAX_AMOUNT / 100));
    }

    #[test]
    fn settlement_refuses_amounts_beyond_the_ledger_bound() {
        let fees = FeePolicy::default();

        let huge = booking("b1", BookingStatus::Approved, 100_000_000_000_000_000, 0);
        let result = plan_settlement(&fees, &huge, PaymentMethod::Upi, None, None);
        assert!(matches!(result, Err(ServiceError::Validation(_))));

        let b = booking("b2", BookingStatus::Approved, 1000, 200);
        let result = plan_settlement(&fees, &b, PaymentMethod::Cod, Some(i64::MAX), None);
        assert!(matches!(result, Err(ServiceError::Validation(_))));

        let largest = booking("b3", BookingStatus::Approved, MAX_AMOUNT, MAX_AMOUNT);
        let plan = plan_settlement(&fees, &largest, PaymentMethod::Upi, None, None).unwrap();
        assert_eq!(plan.owner_share + plan.platform_fee, MAX_AMOUNT);
        assert_eq!(plan.collected, 2 * MAX_AMOUNT);
    }

    #[test]
    fn damage_beyond_the_ledger_bound_is_refused() {
        let b = booking("b1", BookingStatus::Approved, 1000, 200);
        let result = plan_status_change(
            &b,
            "owner",
            BookingStatus::Returned,
            true,
            Some(MAX_AMOUNT + 1),
            OverlapPolicy::Advisory,
        );
        assert!(matches!(result, Err(ServiceError::Validation(_))));
    }

    #[test]
    fn online_settlement_splits_rental_and_fee() {
        let b = booking("b1", BookingStatus::Approved, 1000, 200);
        let plan = plan_settlement(&FeePolicy::default(), &b, PaymentMethod::Upi, Some(1200), None).unwrap();

        assert_eq!(plan.platform_fee, 12);
        assert_eq!(plan.owner_share, 988);
        assert_eq!(plan.owner_share + plan.platform_fee, 1000);
        assert_eq!(plan.renter_debit.amount, 1200);
        assert_eq!(plan.renter_debit.actual_rental_amount, Some(1000));
        assert_eq!(plan.owner_credit.user_id, "owner");
        assert_eq!(plan.owner_credit.source_user_id, "renter");
        assert_eq!(plan.earning.status, EarningsStatus::Earned);
    }

    #[test]
    fn cod_settlement_uses_collected_amount() {
        let b = booking("b1", BookingStatus::Approved, 1000, 200);
        let plan = plan_settlement(&FeePolicy::default(), &b, PaymentMethod::Cod, Some(1200), None).unwrap();

        assert_eq!(plan.platform_fee, 10);
        assert_eq!(plan.owner_share, 990);
        assert_eq!(plan.owner_share, 1200 - 200 - plan.platform_fee);
    }

    #[test]
    fn cod_ignores_gateway_details() {
        let b = booking("b1", BookingStatus::Approved, 1000, 200);
        let gateway = GatewayDetails {
            order_id: Some("order".into()),
            payment_id: None,
            signature: None,
            paid_at: Utc::now(),
        };
        let plan =
            plan_settlement(&FeePolicy::default(), &b, PaymentMethod::Cod, Some(1200), Some(gateway)).unwrap();
        assert!(plan.gateway.is_none());
    }

    #[test]
    fn settlement_refuses_short_collection_and_rejected_bookings() {
        let b = booking("b1", BookingStatus::Approved, 1000, 200);
        let short = plan_settlement(&FeePolicy::default(), &b, PaymentMethod::Cod, Some(100), None);
        assert!(matches!(short, Err(ServiceError::Validation(_))));

        let rejected = booking("b2", BookingStatus::Rejected, 1000, 200);
        let result = plan_settlement(&FeePolicy::default(), &rejected, PaymentMethod::Upi, None, None);
        assert!(matches!(result, Err(ServiceError::Conflict(_))));
    }

    #[test]
    fn only_the_owner_plans_status_changes() {
        let b = booking("b1", BookingStatus::Pending, 1000, 200);
        let result = plan_status_change(&b, "renter", BookingStatus::Approved, false, None, OverlapPolicy::Advisory);
        assert!(matches!(result, Err(ServiceError::Forbidden(_))));
    }

    #[test]
    fn damaged_return_requires_amount() {
        let b = booking("b1", BookingStatus::Approved, 1000, 200);
        let result = plan_status_change(&b, "owner", BookingStatus::Returned, true, None, OverlapPolicy::Advisory);
        assert!(matches!(result, Err(ServiceError::Validation(_))));
    }

    #[tokio::test]
    async fn clean_return_refunds_exactly_the_deposit() {
        let ledger = MemoryLedger::with(vec![booking("b1", BookingStatus::Approved, 1000, 200)]);
        let engine = engine(ledger.clone(), OverlapPolicy::Advisory);

        let update = engine
            .update_status("owner", "b1", BookingStatus::Returned, false, None)
            .await
            .unwrap();

        assert!(update.changed);
        assert_eq!(update.booking.status(), BookingStatus::Returned);
        assert_eq!(ledger.wallet("renter"), 200);

        let entries = ledger.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, TransactionType::Credit);
        assert_eq!(entries[0].amount, 200);
        assert_eq!(entries[0].method, "wallet");
        assert_eq!(entries[0].status, TransactionStatus::Success);
        assert_eq!(entries[0].note.as_deref(), Some(DEPOSIT_REFUND_NOTE));
    }

    #[tokio::test]
    async fn damaged_return_holds_without_touching_the_wallet() {
        let ledger = MemoryLedger::with(vec![booking("b1", BookingStatus::Approved, 1000, 200)]);
        let engine = engine(ledger.clone(), OverlapPolicy::Advisory);

        engine
            .update_status("owner", "b1", BookingStatus::Returned, true, Some(150))
            .await
            .unwrap();

        assert_eq!(ledger.wallet("renter"), 0);
        let entries = ledger.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, TransactionType::Debit);
        assert_eq!(entries[0].amount, 150);
        assert_eq!(entries[0].method, "damage");
        assert_eq!(entries[0].status, TransactionStatus::Held);
    }

    #[tokio::test]
    async fn repeating_a_return_does_not_refund_twice() {
        let ledger = MemoryLedger::with(vec![booking("b1", BookingStatus::Approved, 1000, 200)]);
        let engine = engine(ledger.clone(), OverlapPolicy::Advisory);

        engine
            .update_status("owner", "b1", BookingStatus::Returned, false, None)
            .await
            .unwrap();
        let again = engine
            .update_status("owner", "b1", BookingStatus::Returned, false, None)
            .await
            .unwrap();

        assert!(!again.changed);
        assert_eq!(ledger.wallet("renter"), 200);
        assert_eq!(ledger.entries().len(), 1);
    }

    #[tokio::test]
    async fn approval_and_rejection_write_nothing_to_the_ledger() {
        let ledger = MemoryLedger::with(vec![
            booking("b1", BookingStatus::Pending, 1000, 200),
            booking("b2", BookingStatus::Pending, 500, 0),
        ]);
        let engine = engine(ledger.clone(), OverlapPolicy::Advisory);

        engine.update_status("owner", "b1", BookingStatus::Approved, false, None).await.unwrap();
        engine.update_status("owner", "b2", BookingStatus::Rejected, false, None).await.unwrap();

        assert!(ledger.entries().is_empty());
        assert_eq!(ledger.wallet("renter"), 0);
    }

    #[tokio::test]
    async fn invalid_transitions_conflict() {
        let ledger = MemoryLedger::with(vec![booking("b1", BookingStatus::Pending, 1000, 200)]);
        let engine = engine(ledger, OverlapPolicy::Advisory);

        let result = engine
            .update_status("owner", "b1", BookingStatus::Returned, false, None)
            .await;
        assert!(matches!(result, Err(ServiceError::Conflict(_))));
    }

    #[tokio::test]
    async fn reject_policy_blocks_overlapping_approvals() {
        let ledger = MemoryLedger::with(vec![
            booking("b1", BookingStatus::Approved, 1000, 200),
            booking("b2", BookingStatus::Pending, 1000, 200),
        ]);

        let advisory = engine(ledger.clone(), OverlapPolicy::Advisory);
        let strict = engine(ledger.clone(), OverlapPolicy::Reject);

        let result = strict
            .update_status("owner", "b2", BookingStatus::Approved, false, None)
            .await;
        assert!(matches!(result, Err(ServiceError::Conflict(_))));

        let update = advisory
            .update_status("owner", "b2", BookingStatus::Approved, false, None)
            .await
            .unwrap();
        assert!(update.changed);
    }

    #[tokio::test]
    async fn settlement_credits_owner_once() {
        let ledger = MemoryLedger::with(vec![booking("b1", BookingStatus::Approved, 1000, 200)]);
        let engine = engine(ledger.clone(), OverlapPolicy::Advisory);

        let first = engine
            .settle_payment("renter", "b1", PaymentMethod::Upi, Some(1200), None)
            .await
            .unwrap();
        assert!(!first.already_settled);
        assert_eq!(first.owner_share, 988);
        assert!(first.booking.details().payment_completed);
        assert_eq!(first.booking.details().payment_status, PaymentStatus::Completed);

        let second = engine
            .settle_payment("renter", "b1", PaymentMethod::Upi, Some(1200), None)
            .await
            .unwrap();
        assert!(second.already_settled);
        assert_eq!(second.owner_share, 988);
        assert_eq!(second.platform_fee, 12);
        assert_eq!(second.collected, 1200);

        assert_eq!(ledger.wallet("owner"), 988);
        assert_eq!(ledger.entries().len(), 2);
        assert_eq!(ledger.earnings(), 1);
    }

    #[tokio::test]
    async fn deposit_conservation_spans_settlement_and_return() {
        let ledger = MemoryLedger::with(vec![booking("b1", BookingStatus::Approved, 1000, 200)]);
        let engine = engine(ledger.clone(), OverlapPolicy::Advisory);

        engine
            .settle_payment("renter", "b1", PaymentMethod::Card, Some(1200), None)
            .await
            .unwrap();

        let debits: i64 = ledger
            .entries()
            .iter()
            .filter(|e| e.kind == TransactionType::Debit)
            .map(|e| e.amount)
            .sum();
        let credits: i64 = ledger
            .entries()
            .iter()
            .filter(|e| e.kind == TransactionType::Credit)
            .map(|e| e.amount)
            .sum();
        // Settlement alone leaves the deposit and the fee unaccounted.
        assert_eq!(debits - credits, 200 + 12);

        engine
            .update_status("owner", "b1", BookingStatus::Returned, false, None)
            .await
            .unwrap();

        let credits: i64 = ledger
            .entries()
            .iter()
            .filter(|e| e.kind == TransactionType::Credit)
            .map(|e| e.amount)
            .sum();
        assert_eq!(debits - credits, 12);
        assert_eq!(ledger.wallet("owner"), 988);
        assert_eq!(ledger.wallet("renter"), 200);
    }

    #[tokio::test]
    async fn strangers_cannot_settle() {
        let ledger = MemoryLedger::with(vec![booking("b1", BookingStatus::Approved, 1000, 200)]);
        let engine = engine(ledger, OverlapPolicy::Advisory);

        let result = engine
            .settle_payment("someone-else", "b1", PaymentMethod::Upi, None, None)
            .await;
        assert!(matches!(result, Err(ServiceError::Forbidden(_))));

        let result = engine
            .settle_payment("renter", "missing", PaymentMethod::Upi, None, None)
            .await;
        assert!(matches!(result, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn forged_gateway_signature_is_refused() {
        let ledger = MemoryLedger::with(vec![booking("b1", BookingStatus::Approved, 1000, 200)]);
        let engine = SettlementEngine::new(
            ledger.clone(),
            FeePolicy::default(),
            OverlapPolicy::Advisory,
            Some(SignatureVerifier::new("key-secret")),
        );

        let forged = GatewayReference {
            order_id: Some("order_1".into()),
            payment_id: Some("pay_1".into()),
            signature: Some("00".into()),
        };
        let result = engine
            .settle_payment("renter", "b1", PaymentMethod::Upi, None, Some(forged))
            .await;
        assert!(matches!(result, Err(ServiceError::Forbidden(_))));
        assert_eq!(ledger.wallet("owner"), 0);

        let signature = SignatureVerifier::new("key-secret").sign("order_1", "pay_1");
        let genuine = GatewayReference {
            order_id: Some("order_1".into()),
            payment_id: Some("pay_1".into()),
            signature: Some(signature),
        };
        let result = engine
            .settle_payment("renter", "b1", PaymentMethod::Upi, None, Some(genuine))
            .await
            .unwrap();
        let details = result.booking.details().razorpay_details.clone().unwrap();
        assert_eq!(details.payment_id.as_deref(), Some("pay_1"));
    }

    #[tokio::test]
    async fn rejection_during_settlement_conflicts() {
        let inner = MemoryLedger::with(vec![booking("b1", BookingStatus::Rejected, 1000, 200)]);
        let engine = SettlementEngine::new(
            StaleReads {
                snapshot: booking("b1", BookingStatus::Approved, 1000, 200),
                inner: inner.clone(),
            },
            FeePolicy::default(),
            OverlapPolicy::Advisory,
            None,
        );

        let result = engine
            .settle_payment("renter", "b1", PaymentMethod::Upi, None, None)
            .await;
        assert!(matches!(result, Err(ServiceError::Conflict(_))));
        assert!(inner.entries().is_empty());
        assert_eq!(inner.wallet("owner"), 0);
    }
}
