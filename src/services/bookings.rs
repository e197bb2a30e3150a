use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, IntoActiveModel, QueryFilter, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use validator::Validate;

use crate::{
    db,
    entities::{
        account, address,
        booking::{self, BookingStatus},
        contract::ContractStatus,
        decor_service::{self, DecorServiceStatus},
        payment_transaction::TransactionType,
        time_slot,
    },
    errors::ServiceError,
    events::{Event, Outbox},
    services::{
        booking_status::{save_booking, save_contract, transition_booking},
        codes, settlement,
        support::{
            admin_account_id, commission_rate, ensure_cancel_type, ensure_reason, ensure_status,
            find_booking, find_booking_by_code, find_live_contract, refund_held_deposit,
        },
        wallet::{PaymentReference, WalletService},
        ServiceContext,
    },
};

pub const SURVEY_EXPIRED_REASON: &str = "Survey date expired";

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateBookingRequest {
    /// Customer placing the booking
    #[validate(range(min = 1))]
    pub account_id: i32,
    #[validate(range(min = 1))]
    pub decor_service_id: i32,
    #[validate(range(min = 1))]
    pub address_id: i32,
    pub survey_date: DateTime<Utc>,
    /// Agreed price; the service's base price when absent
    pub total_price: Option<Decimal>,
}

/// Drives a booking through its lifecycle. Every public operation is one
/// database transaction; events and notifications go out after commit.
#[derive(Clone)]
pub struct BookingService {
    ctx: ServiceContext,
    wallet: WalletService,
}

impl BookingService {
    pub fn new(ctx: ServiceContext, wallet: WalletService) -> Self {
        Self { ctx, wallet }
    }

    pub async fn get_booking(&self, booking_code: &str) -> Result<booking::Model, ServiceError> {
        find_booking_by_code(&*self.ctx.db, booking_code).await
    }

    #[instrument(skip(self, request), fields(account_id = request.account_id, decor_service_id = request.decor_service_id))]
    pub async fn create_booking(
        &self,
        request: CreateBookingRequest,
    ) -> Result<booking::Model, ServiceError> {
        request.validate()?;
        let now = self.ctx.clock.now();

        let txn = db::begin(&self.ctx.db).await?;

        let service = decor_service::Entity::find_by_id(request.decor_service_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Decor service", request.decor_service_id))?;
        if service.status != DecorServiceStatus::Available {
            return Err(ServiceError::InvalidState(format!(
                "Decor service {} is not available",
                service.id
            )));
        }

        let address = address::Entity::find_by_id(request.address_id)
            .one(&txn)
            .await?
            .filter(|a| a.account_id == request.account_id)
            .ok_or_else(|| ServiceError::not_found("Address", request.address_id))?;

        if request.survey_date < now {
            return Err(ServiceError::ValidationError(
                "Survey date must not be in the past".to_string(),
            ));
        }

        let total_price = request.total_price.unwrap_or(service.base_price);
        if total_price <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "Total price must be positive, got {}",
                total_price
            )));
        }

        let created = booking::ActiveModel {
            booking_code: Set(codes::booking_code()),
            status: Set(BookingStatus::Pending),
            account_id: Set(request.account_id),
            provider_id: Set(service.account_id),
            decor_service_id: Set(service.id),
            address_id: Set(address.id),
            total_price: Set(total_price),
            deposit_amount: Set(Decimal::ZERO),
            commit_deposit_amount: Set(Decimal::ZERO),
            is_commit_deposit_paid: Set(false),
            created_at: Set(now),
            construction_date: Set(None),
            cancel_at: Set(None),
            complete_at: Set(None),
            cancel_type_id: Set(None),
            cancel_reason: Set(None),
            reject_reason: Set(None),
            is_booked: Set(false),
            is_tracked: Set(false),
            is_quoted: Set(false),
            cancel_disable: Set(false),
            has_terminated: Set(false),
            previous_status: Set(None),
            version: Set(1),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        time_slot::ActiveModel {
            booking_id: Set(created.id),
            survey_date: Set(request.survey_date),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        db::commit(txn).await?;
        info!(booking_code = %created.booking_code, "Booking created");

        let mut outbox = Outbox::new();
        outbox.event(Event::BookingCreated {
            booking_id: created.id,
            booking_code: created.booking_code.clone(),
        });
        outbox.notify(
            created.provider_id,
            "New booking",
            format!(
                "Booking {} requests a survey on {}",
                created.booking_code,
                request.survey_date.format("%Y-%m-%d %H:%M")
            ),
            None,
        );
        self.ctx.deliver(outbox).await;

        Ok(created)
    }

    /// Provider accepts the survey appointment.
    #[instrument(skip(self))]
    pub async fn confirm_survey(&self, booking_code: &str) -> Result<booking::Model, ServiceError> {
        let txn = db::begin(&self.ctx.db).await?;
        let current = find_booking_by_code(&txn, booking_code).await?;
        ensure_status(&current, &[BookingStatus::Pending], "confirm the survey of")?;

        let updated = transition_booking(&txn, &current, BookingStatus::Planning, |b| {
            b.is_booked = Set(true);
        })
        .await?;
        db::commit(txn).await?;

        let mut outbox = status_changed(&current, &updated);
        outbox.notify(
            updated.account_id,
            "Survey confirmed",
            format!("The provider confirmed the survey for booking {}", updated.booking_code),
            None,
        );
        self.ctx.deliver(outbox).await;
        Ok(updated)
    }

    /// Provider turns the booking down before a contract is signed.
    #[instrument(skip(self))]
    pub async fn reject_booking(
        &self,
        booking_code: &str,
        reason: &str,
    ) -> Result<booking::Model, ServiceError> {
        ensure_reason(reason)?;
        let mut outbox = Outbox::new();

        let txn = db::begin(&self.ctx.db).await?;
        let current = find_booking_by_code(&txn, booking_code).await?;
        let updated = transition_booking(&txn, &current, BookingStatus::Rejected, |b| {
            b.reject_reason = Set(Some(reason.to_string()));
        })
        .await?;

        if let Some(contract) = find_live_contract(&txn, current.id).await? {
            let mut active = contract.clone().into_active_model();
            active.status = Set(ContractStatus::Rejected);
            active.reason = Set(Some(reason.to_string()));
            save_contract(&txn, &contract, active).await?;
        }
        refund_held_deposit(&txn, &self.wallet, &current, &mut outbox).await?;
        db::commit(txn).await?;

        outbox.extend(status_changed(&current, &updated));
        outbox.notify(
            updated.account_id,
            "Booking rejected",
            format!("Booking {} was rejected: {}", updated.booking_code, reason),
            None,
        );
        self.ctx.deliver(outbox).await;
        Ok(updated)
    }

    /// Customer asks to cancel; the provider approves or the customer revokes.
    #[instrument(skip(self, reason))]
    pub async fn request_cancellation(
        &self,
        booking_code: &str,
        cancel_type_id: i32,
        reason: &str,
    ) -> Result<booking::Model, ServiceError> {
        ensure_reason(reason)?;

        let txn = db::begin(&self.ctx.db).await?;
        let current = find_booking_by_code(&txn, booking_code).await?;
        if current.cancel_disable {
            return Err(ServiceError::InvalidState(format!(
                "The cancellation window for booking {} has closed",
                current.booking_code
            )));
        }
        ensure_cancel_type(&txn, cancel_type_id).await?;

        let previous = current.status;
        let updated = transition_booking(&txn, &current, BookingStatus::PendingCancel, |b| {
            b.previous_status = Set(Some(previous));
            b.cancel_type_id = Set(Some(cancel_type_id));
            b.cancel_reason = Set(Some(reason.to_string()));
        })
        .await?;
        db::commit(txn).await?;

        let mut outbox = status_changed(&current, &updated);
        outbox.notify(
            updated.provider_id,
            "Cancellation requested",
            format!(
                "The customer asked to cancel booking {}: {}",
                updated.booking_code, reason
            ),
            None,
        );
        self.ctx.deliver(outbox).await;
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn approve_cancellation(
        &self,
        booking_code: &str,
    ) -> Result<booking::Model, ServiceError> {
        let now = self.ctx.clock.now();
        let mut outbox = Outbox::new();

        let txn = db::begin(&self.ctx.db).await?;
        let current = find_booking_by_code(&txn, booking_code).await?;
        ensure_status(&current, &[BookingStatus::PendingCancel], "approve cancellation of")?;

        let updated = transition_booking(&txn, &current, BookingStatus::Canceled, |b| {
            b.cancel_at = Set(Some(now));
            b.previous_status = Set(None);
        })
        .await?;
        cancel_live_contract(&txn, current.id).await?;
        refund_held_deposit(&txn, &self.wallet, &current, &mut outbox).await?;
        db::commit(txn).await?;

        outbox.extend(status_changed(&current, &updated));
        outbox.notify(
            updated.account_id,
            "Cancellation approved",
            format!("Booking {} has been canceled", updated.booking_code),
            None,
        );
        self.ctx.deliver(outbox).await;
        Ok(updated)
    }

    /// Puts the booking back into the status it held when cancellation was requested.
    #[instrument(skip(self))]
    pub async fn revoke_cancellation_request(
        &self,
        booking_code: &str,
    ) -> Result<booking::Model, ServiceError> {
        let txn = db::begin(&self.ctx.db).await?;
        let current = find_booking_by_code(&txn, booking_code).await?;
        ensure_status(&current, &[BookingStatus::PendingCancel], "revoke cancellation of")?;
        let previous = current.previous_status.ok_or_else(|| {
            ServiceError::InvalidState(format!(
                "Booking {} has no recorded status to return to",
                current.booking_code
            ))
        })?;

        let updated = transition_booking(&txn, &current, previous, |b| {
            b.previous_status = Set(None);
            b.cancel_type_id = Set(None);
            b.cancel_reason = Set(None);
        })
        .await?;
        db::commit(txn).await?;

        let mut outbox = status_changed(&current, &updated);
        outbox.notify(
            updated.provider_id,
            "Cancellation withdrawn",
            format!("The customer withdrew the cancellation of booking {}", updated.booking_code),
            None,
        );
        self.ctx.deliver(outbox).await;
        Ok(updated)
    }

    /// Collects the commit deposit from the customer's wallet and holds it.
    ///
    /// Accepted while the contract awaits signature (the status stays
    /// `Contracting`) or once it is signed (`Confirm` moves to `DepositPaid`).
    #[instrument(skip(self))]
    pub async fn process_commit_deposit(
        &self,
        booking_code: &str,
    ) -> Result<booking::Model, ServiceError> {
        let mut outbox = Outbox::new();

        let txn = db::begin(&self.ctx.db).await?;
        let current = find_booking_by_code(&txn, booking_code).await?;
        if current.is_commit_deposit_paid {
            return Err(ServiceError::InvalidState(format!(
                "Commit deposit for booking {} is already paid",
                current.booking_code
            )));
        }
        ensure_status(
            &current,
            &[BookingStatus::Contracting, BookingStatus::Confirm],
            "pay the commit deposit of",
        )?;

        let amount = current.commit_deposit_amount;
        if amount > Decimal::ZERO {
            let debit = self
                .wallet
                .debit(
                    &txn,
                    current.account_id,
                    amount,
                    TransactionType::Deposit,
                    PaymentReference::Booking(current.id),
                )
                .await?;
            outbox.event(debit.to_event());
        }

        if let Some(contract) = find_live_contract(&txn, current.id).await? {
            let mut active = contract.clone().into_active_model();
            active.is_deposited = Set(true);
            save_contract(&txn, &contract, active).await?;
        }

        let updated = if current.status == BookingStatus::Confirm {
            transition_booking(&txn, &current, BookingStatus::DepositPaid, |b| {
                b.is_commit_deposit_paid = Set(true);
                b.deposit_amount = Set(amount);
            })
            .await?
        } else {
            let mut active = current.clone().into_active_model();
            active.is_commit_deposit_paid = Set(true);
            active.deposit_amount = Set(amount);
            save_booking(&txn, &current, active).await?
        };
        db::commit(txn).await?;
        info!(booking_code = %updated.booking_code, %amount, "Commit deposit held");

        if updated.status != current.status {
            outbox.extend(status_changed(&current, &updated));
        }
        outbox.notify(
            updated.provider_id,
            "Commit deposit paid",
            format!("The commit deposit for booking {} has been paid", updated.booking_code),
            None,
        );
        self.ctx.deliver(outbox).await;
        Ok(updated)
    }

    /// Provider reports the next fulfilment step.
    #[instrument(skip(self))]
    pub async fn update_progress(
        &self,
        booking_code: &str,
        target: BookingStatus,
    ) -> Result<booking::Model, ServiceError> {
        let now = self.ctx.clock.now();

        let txn = db::begin(&self.ctx.db).await?;
        let current = find_booking_by_code(&txn, booking_code).await?;
        if current.status.next_fulfilment_step() != Some(target) {
            return Err(ServiceError::InvalidState(format!(
                "Booking {} cannot progress from {} to {}",
                current.booking_code, current.status, target
            )));
        }

        let updated = transition_booking(&txn, &current, target, |b| match target {
            BookingStatus::Preparing => b.is_tracked = Set(true),
            BookingStatus::Progressing => b.construction_date = Set(Some(now)),
            _ => {}
        })
        .await?;
        db::commit(txn).await?;

        let mut outbox = status_changed(&current, &updated);
        outbox.notify(
            updated.account_id,
            "Booking progress",
            format!("Booking {} is now {}", updated.booking_code, updated.status),
            None,
        );
        self.ctx.deliver(outbox).await;
        Ok(updated)
    }

    /// Charges the rest of the price and settles the whole amount between
    /// the platform and the provider.
    #[instrument(skip(self))]
    pub async fn process_final_payment(
        &self,
        booking_code: &str,
    ) -> Result<booking::Model, ServiceError> {
        let mut outbox = Outbox::new();

        let txn = db::begin(&self.ctx.db).await?;
        let current = find_booking_by_code(&txn, booking_code).await?;
        ensure_status(&current, &[BookingStatus::AllDone], "take the final payment of")?;

        let contract = find_live_contract(&txn, current.id)
            .await?
            .filter(|c| c.is_signed)
            .ok_or_else(|| {
                ServiceError::InvalidState(format!(
                    "Booking {} has no signed contract",
                    current.booking_code
                ))
            })?;
        if contract.is_final_paid {
            return Err(ServiceError::InvalidState(format!(
                "Contract {} is already final paid",
                contract.contract_code
            )));
        }

        let rate = commission_rate(&txn).await?;
        let admin_id = admin_account_id(&txn).await?;
        let due =
            settlement::compute_final_payment_amount(current.total_price, current.held_deposit())?;
        let split = settlement::compute_commission_split(current.total_price, rate)?;
        let reference = PaymentReference::Booking(current.id);

        if due > Decimal::ZERO {
            let debit = self
                .wallet
                .debit(&txn, current.account_id, due, TransactionType::FinalPay, reference)
                .await?;
            outbox.event(debit.to_event());
        }
        if split.admin_amount > Decimal::ZERO {
            let credit = self
                .wallet
                .credit(&txn, admin_id, split.admin_amount, TransactionType::Commission, reference)
                .await?;
            outbox.event(credit.to_event());
        }
        if split.provider_amount > Decimal::ZERO {
            let credit = self
                .wallet
                .credit(
                    &txn,
                    current.provider_id,
                    split.provider_amount,
                    TransactionType::Payout,
                    reference,
                )
                .await?;
            outbox.event(credit.to_event());
        }

        let mut active = contract.clone().into_active_model();
        active.is_final_paid = Set(true);
        save_contract(&txn, &contract, active).await?;

        let updated = transition_booking(&txn, &current, BookingStatus::FinalPaid, |_| {}).await?;
        db::commit(txn).await?;
        info!(
            booking_code = %updated.booking_code,
            charged = %due,
            admin = %split.admin_amount,
            provider = %split.provider_amount,
            "Final payment settled"
        );

        outbox.extend(status_changed(&current, &updated));
        outbox.notify(
            updated.provider_id,
            "Final payment received",
            format!(
                "Booking {} is settled; {} was credited to your wallet",
                updated.booking_code, split.provider_amount
            ),
            None,
        );
        self.ctx.deliver(outbox).await;
        Ok(updated)
    }

    /// Provider closes out a fully paid booking.
    #[instrument(skip(self))]
    pub async fn confirm_completion(
        &self,
        booking_code: &str,
    ) -> Result<booking::Model, ServiceError> {
        let now = self.ctx.clock.now();

        let txn = db::begin(&self.ctx.db).await?;
        let current = find_booking_by_code(&txn, booking_code).await?;
        ensure_status(&current, &[BookingStatus::FinalPaid], "complete")?;
        let updated = transition_booking(&txn, &current, BookingStatus::Completed, |b| {
            b.complete_at = Set(Some(now));
        })
        .await?;
        db::commit(txn).await?;

        let mut outbox = status_changed(&current, &updated);
        outbox.notify(
            updated.account_id,
            "Booking completed",
            format!("Booking {} is complete", updated.booking_code),
            None,
        );
        self.ctx.deliver(outbox).await;
        Ok(updated)
    }

    /// Cancels a booking whose survey date passed without the survey being
    /// turned into a quotation, and docks the provider's reputation.
    #[instrument(skip(self))]
    pub async fn force_expire_survey(
        &self,
        booking_code: &str,
    ) -> Result<booking::Model, ServiceError> {
        let now = self.ctx.clock.now();

        let txn = db::begin(&self.ctx.db).await?;
        let current = find_booking_by_code(&txn, booking_code).await?;
        ensure_status(&current, &[BookingStatus::Planning], "expire the survey of")?;

        let slots = time_slot::Entity::find()
            .filter(time_slot::Column::BookingId.eq(current.id))
            .all(&txn)
            .await?;
        if !slots.iter().any(|slot| survey_expired(slot.survey_date, now)) {
            return Err(ServiceError::InvalidState(format!(
                "Survey date of booking {} has not passed",
                current.booking_code
            )));
        }

        let updated = transition_booking(&txn, &current, BookingStatus::Canceled, |b| {
            b.cancel_reason = Set(Some(SURVEY_EXPIRED_REASON.to_string()));
            b.cancel_at = Set(Some(now));
        })
        .await?;
        let reputation =
            penalize_provider(&txn, current.provider_id, self.ctx.policy.survey_expiry_penalty)
                .await?;
        db::commit(txn).await?;
        info!(
            booking_code = %updated.booking_code,
            provider_id = updated.provider_id,
            reputation,
            "Booking canceled after survey date expired"
        );

        let mut outbox = status_changed(&current, &updated);
        outbox.notify(
            updated.provider_id,
            "Survey expired",
            format!(
                "Booking {} was canceled because its survey date passed",
                updated.booking_code
            ),
            None,
        );
        outbox.notify(
            updated.account_id,
            "Booking canceled",
            format!(
                "Booking {} was canceled because the survey did not take place",
                updated.booking_code
            ),
            None,
        );
        self.ctx.deliver(outbox).await;
        Ok(updated)
    }

    /// Closes the customer cancellation window of a booking old enough.
    /// Returns `false` when there was nothing to do.
    pub async fn lock_cancellation(&self, booking_id: i32) -> Result<bool, ServiceError> {
        let now = self.ctx.clock.now();

        let txn = db::begin(&self.ctx.db).await?;
        let current = find_booking(&txn, booking_id).await?;
        if !cancel_lockout_due(&current, now, self.ctx.policy.cancel_lockout()) {
            return Ok(false);
        }
        let mut active = current.clone().into_active_model();
        active.cancel_disable = Set(true);
        save_booking(&txn, &current, active).await?;
        db::commit(txn).await?;
        Ok(true)
    }
}

pub(crate) fn survey_expired(survey_date: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    survey_date < now
}

pub(crate) fn cancel_lockout_due(
    booking: &booking::Model,
    now: DateTime<Utc>,
    lockout: chrono::Duration,
) -> bool {
    !booking.cancel_disable
        && !booking.status.is_terminal()
        && booking.created_at <= now - lockout
}

/// Lowers a provider's reputation, never below zero. Returns the new score.
async fn penalize_provider<C: ConnectionTrait>(
    conn: &C,
    provider_id: i32,
    penalty: i32,
) -> Result<i32, ServiceError> {
    let provider = account::Entity::find_by_id(provider_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Provider account", provider_id))?;

    let reputation = (provider.reputation - penalty).max(0);
    if reputation != provider.reputation {
        let mut active = provider.into_active_model();
        active.reputation = Set(reputation);
        active.update(conn).await?;
    } else {
        warn!(provider_id, "Provider reputation already at the floor");
    }
    Ok(reputation)
}

async fn cancel_live_contract<C: ConnectionTrait>(
    conn: &C,
    booking_id: i32,
) -> Result<(), ServiceError> {
    if let Some(contract) = find_live_contract(conn, booking_id).await? {
        let mut active = contract.clone().into_active_model();
        active.status = Set(ContractStatus::Canceled);
        active.is_terminatable = Set(false);
        save_contract(conn, &contract, active).await?;
    }
    Ok(())
}

fn status_changed(before: &booking::Model, after: &booking::Model) -> Outbox {
    let mut outbox = Outbox::new();
    outbox.event(Event::BookingStatusChanged {
        booking_id: after.id,
        booking_code: after.booking_code.clone(),
        old_status: before.status,
        new_status: after.status,
    });
    outbox
}
