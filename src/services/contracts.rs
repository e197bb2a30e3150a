use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, IntoActiveModel, PaginatorTrait,
    QueryFilter, Set,
};
use serde::Serialize;
use tracing::{error, info, instrument, warn};
use url::Url;

use crate::{
    db,
    entities::{
        booking::{self, BookingStatus},
        contract::{self, ContractStatus},
        payment_transaction::TransactionType,
        quotation::QuotationStatus,
    },
    errors::ServiceError,
    events::{Event, Outbox},
    services::{
        booking_status::{save_contract, transition_booking},
        codes,
        quotations::find_quotation_by_code,
        settlement,
        support::{
            admin_account_id, commission_rate, ensure_reason, ensure_status, find_booking,
            find_contract_by_code, refund_held_deposit,
        },
        wallet::{PaymentReference, WalletService},
        ServiceContext,
    },
};

const CONTRACT_CODE_ATTEMPTS: usize = 5;
pub const SIGNING_WINDOW_EXPIRED_REASON: &str = "Contract was not signed in time";
pub const TERMINATED_REASON: &str = "Terminated by customer";

/// Link a customer follows to sign a contract.
#[derive(Debug, Clone, Serialize)]
pub struct SignatureRequest {
    pub contract_code: String,
    pub signing_url: String,
    pub expires_at: DateTime<Utc>,
}

/// One-time password issued for terminating a signed contract.
#[derive(Debug, Clone, Serialize)]
pub struct TerminationOtp {
    pub contract_code: String,
    pub otp: String,
    pub expires_at: DateTime<Utc>,
}

/// What the auto-cancel sweep did with an unsigned contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AutoCancelOutcome {
    pub contract_id: i32,
    pub booking_id: i32,
    pub admin_amount: Decimal,
    pub provider_amount: Decimal,
}

/// Token-style check shared by signature tokens and termination OTPs:
/// valid while no more than `ttl` has elapsed since generation.
pub(crate) fn check_token(
    kind: &str,
    stored: Option<&str>,
    generated_at: Option<DateTime<Utc>>,
    presented: &str,
    ttl: Duration,
    now: DateTime<Utc>,
) -> Result<(), ServiceError> {
    let (stored, generated_at) = match (stored, generated_at) {
        (Some(s), Some(at)) => (s, at),
        _ => return Err(ServiceError::InvalidToken(format!("No {} was issued", kind))),
    };
    if stored != presented {
        return Err(ServiceError::InvalidToken(format!("{} does not match", kind)));
    }
    if now - generated_at > ttl {
        return Err(ServiceError::ExpiredToken(format!("{} has expired", kind)));
    }
    Ok(())
}

/// An unanswered cancellation request does not stop the signing clock.
pub(crate) fn signing_window_elapsed(
    contract: &contract::Model,
    now: DateTime<Utc>,
    window: Duration,
) -> bool {
    matches!(
        contract.status,
        ContractStatus::Pending | ContractStatus::PendingCancel
    ) && !contract.is_signed
        && contract.created_at <= now - window
}

pub(crate) fn terminability_elapsed(
    contract: &contract::Model,
    now: DateTime<Utc>,
    window: Duration,
) -> bool {
    contract.status == ContractStatus::Signed
        && contract.is_terminatable
        && contract
            .signed_date
            .map_or(false, |signed| now - signed > window)
}

/// Contracts drafted from quotations: signing, cancellation before
/// signature, OTP-confirmed termination after it.
#[derive(Clone)]
pub struct ContractService {
    ctx: ServiceContext,
    wallet: WalletService,
}

impl ContractService {
    pub fn new(ctx: ServiceContext, wallet: WalletService) -> Self {
        Self { ctx, wallet }
    }

    pub async fn get_contract(&self, contract_code: &str) -> Result<contract::Model, ServiceError> {
        find_contract_by_code(&*self.ctx.db, contract_code).await
    }

    #[instrument(skip(self, term_of_use_text))]
    pub async fn create_contract_by_quotation_code(
        &self,
        quotation_code: &str,
        term_of_use_text: &str,
    ) -> Result<contract::Model, ServiceError> {
        if term_of_use_text.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "Contract terms must not be empty".to_string(),
            ));
        }
        let now = self.ctx.clock.now();

        let txn = db::begin(&self.ctx.db).await?;
        let quotation = find_quotation_by_code(&txn, quotation_code).await?;

        let existing = contract::Entity::find()
            .filter(contract::Column::QuotationId.eq(quotation.id))
            .one(&txn)
            .await?;
        if let Some(existing) = existing {
            return Err(ServiceError::Conflict(format!(
                "Quotation {} already has contract {}",
                quotation.quotation_code, existing.contract_code
            )));
        }
        if quotation.status == QuotationStatus::Canceled {
            return Err(ServiceError::InvalidState(format!(
                "Quotation {} is canceled",
                quotation.quotation_code
            )));
        }

        let booking = find_booking(&txn, quotation.booking_id).await?;
        let commit_deposit =
            settlement::compute_deposit_amount(booking.total_price, quotation.deposit_percentage)?;
        let contract_code = unique_contract_code(&txn).await?;

        let created = contract::ActiveModel {
            contract_code: Set(contract_code),
            quotation_id: Set(quotation.id),
            booking_id: Set(booking.id),
            term_of_use_text: Set(term_of_use_text.to_string()),
            file_path: Set(None),
            status: Set(ContractStatus::Pending),
            created_at: Set(now),
            signed_date: Set(None),
            signature_token: Set(None),
            signature_token_generated_at: Set(None),
            termination_otp: Set(None),
            termination_otp_generated_at: Set(None),
            is_signed: Set(false),
            is_deposited: Set(false),
            is_final_paid: Set(false),
            is_terminatable: Set(false),
            reason: Set(None),
            version: Set(1),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        let mut frozen = quotation.clone().into_active_model();
        frozen.status = Set(QuotationStatus::Confirmed);
        frozen.update(&txn).await?;

        let updated = transition_booking(&txn, &booking, BookingStatus::Contracting, |b| {
            b.commit_deposit_amount = Set(commit_deposit);
        })
        .await?;
        db::commit(txn).await?;
        info!(
            contract_code = %created.contract_code,
            booking_code = %booking.booking_code,
            commit_deposit = %commit_deposit,
            "Contract created"
        );

        let mut outbox = Outbox::new();
        outbox.event(Event::ContractCreated {
            contract_id: created.id,
            contract_code: created.contract_code.clone(),
        });
        outbox.event(status_event(&booking, &updated));
        outbox.notify(
            booking.account_id,
            "Contract ready",
            format!(
                "Contract {} for booking {} is ready; commit deposit due: {}",
                created.contract_code, booking.booking_code, commit_deposit
            ),
            None,
        );
        self.ctx.deliver(outbox).await;
        Ok(created)
    }

    /// Issues a fresh signature token and returns the signing link.
    #[instrument(skip(self))]
    pub async fn request_signature(
        &self,
        contract_code: &str,
    ) -> Result<SignatureRequest, ServiceError> {
        let now = self.ctx.clock.now();
        let policy = &self.ctx.policy;

        let txn = db::begin(&self.ctx.db).await?;
        let current = find_contract_by_code(&txn, contract_code).await?;
        if current.status != ContractStatus::Pending || current.is_signed {
            return Err(ServiceError::InvalidState(format!(
                "Contract {} is {} and cannot be signed",
                current.contract_code, current.status
            )));
        }

        let token = codes::signature_token();
        let signing_url = signing_url(&policy.signing_base_url, &current.contract_code, &token)?;

        let mut active = current.clone().into_active_model();
        active.signature_token = Set(Some(token));
        active.signature_token_generated_at = Set(Some(now));
        let updated = save_contract(&txn, &current, active).await?;
        let booking = find_booking(&txn, updated.booking_id).await?;
        db::commit(txn).await?;

        let request = SignatureRequest {
            contract_code: updated.contract_code.clone(),
            signing_url,
            expires_at: now + policy.signature_token_ttl(),
        };

        let mut outbox = Outbox::new();
        outbox.notify(
            booking.account_id,
            "Sign your contract",
            format!(
                "Please sign contract {} before {}",
                request.contract_code,
                request.expires_at.format("%Y-%m-%d %H:%M UTC")
            ),
            Some(request.signing_url.clone()),
        );
        self.ctx.deliver(outbox).await;
        Ok(request)
    }

    /// Accepts a signature token. The booking moves to `Confirm`, and on to
    /// `DepositPaid` when the commit deposit is already held.
    #[instrument(skip(self, token))]
    pub async fn verify_contract_signature(
        &self,
        token: &str,
    ) -> Result<contract::Model, ServiceError> {
        let now = self.ctx.clock.now();

        let txn = db::begin(&self.ctx.db).await?;
        let current = contract::Entity::find()
            .filter(contract::Column::SignatureToken.eq(token))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::InvalidToken("Unknown signature token".to_string()))?;
        if current.status != ContractStatus::Pending || current.is_signed {
            return Err(ServiceError::InvalidState(format!(
                "Contract {} is {} and cannot be signed",
                current.contract_code, current.status
            )));
        }
        check_token(
            "Signature token",
            current.signature_token.as_deref(),
            current.signature_token_generated_at,
            token,
            self.ctx.policy.signature_token_ttl(),
            now,
        )
        .map_err(|e| {
            warn!(contract_code = %current.contract_code, "Signature rejected: {}", e);
            e
        })?;

        let booking = find_booking(&txn, current.booking_id).await?;
        ensure_status(&booking, &[BookingStatus::Contracting], "sign the contract of")?;

        let mut active = current.clone().into_active_model();
        active.status = Set(ContractStatus::Signed);
        active.is_signed = Set(true);
        active.signed_date = Set(Some(now));
        active.is_terminatable = Set(true);
        active.signature_token = Set(None);
        active.is_deposited = Set(current.is_deposited || booking.is_commit_deposit_paid);
        let signed = save_contract(&txn, &current, active).await?;

        let confirmed = transition_booking(&txn, &booking, BookingStatus::Confirm, |_| {}).await?;
        let updated = if confirmed.is_commit_deposit_paid {
            transition_booking(&txn, &confirmed, BookingStatus::DepositPaid, |b| {
                b.deposit_amount = Set(confirmed.commit_deposit_amount);
            })
            .await?
        } else {
            confirmed
        };
        db::commit(txn).await?;
        info!(contract_code = %signed.contract_code, booking_status = %updated.status, "Contract signed");

        let mut outbox = Outbox::new();
        outbox.event(Event::ContractSigned {
            contract_id: signed.id,
            booking_id: booking.id,
        });
        outbox.event(status_event(&booking, &updated));
        outbox.notify(
            booking.provider_id,
            "Contract signed",
            format!("Contract {} has been signed", signed.contract_code),
            None,
        );
        self.ctx.deliver(outbox).await;
        Ok(signed)
    }

    /// Customer declines a pending contract; the booking is canceled and a
    /// held commit deposit goes back to the customer.
    #[instrument(skip(self, reason))]
    pub async fn reject_contract(
        &self,
        contract_code: &str,
        reason: &str,
    ) -> Result<contract::Model, ServiceError> {
        ensure_reason(reason)?;
        self.close_contract(
            contract_code,
            &[ContractStatus::Pending],
            ContractStatus::Rejected,
            reason,
        )
        .await
    }

    #[instrument(skip(self, reason))]
    pub async fn request_cancellation(
        &self,
        contract_code: &str,
        reason: &str,
    ) -> Result<contract::Model, ServiceError> {
        ensure_reason(reason)?;
        self.move_pending_contract(
            contract_code,
            ContractStatus::Pending,
            ContractStatus::PendingCancel,
            Some(reason.to_string()),
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn approve_cancellation(
        &self,
        contract_code: &str,
    ) -> Result<contract::Model, ServiceError> {
        self.close_contract(
            contract_code,
            &[ContractStatus::PendingCancel],
            ContractStatus::Canceled,
            "Contract canceled before signature",
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn revoke_cancellation(
        &self,
        contract_code: &str,
    ) -> Result<contract::Model, ServiceError> {
        self.move_pending_contract(
            contract_code,
            ContractStatus::PendingCancel,
            ContractStatus::Pending,
            None,
        )
        .await
    }

    /// Issues the OTP that confirms a termination request.
    #[instrument(skip(self))]
    pub async fn request_termination_otp(
        &self,
        contract_code: &str,
    ) -> Result<TerminationOtp, ServiceError> {
        let now = self.ctx.clock.now();
        let policy = &self.ctx.policy;

        let txn = db::begin(&self.ctx.db).await?;
        let current = find_contract_by_code(&txn, contract_code).await?;
        ensure_terminatable(&current, now, policy.terminability_window())?;

        let otp = codes::numeric_otp();
        let mut active = current.clone().into_active_model();
        active.termination_otp = Set(Some(otp.clone()));
        active.termination_otp_generated_at = Set(Some(now));
        let updated = save_contract(&txn, &current, active).await?;
        let booking = find_booking(&txn, updated.booking_id).await?;
        db::commit(txn).await?;

        let issued = TerminationOtp {
            contract_code: updated.contract_code,
            otp,
            expires_at: now + policy.termination_otp_ttl(),
        };

        let mut outbox = Outbox::new();
        outbox.notify(
            booking.account_id,
            "Termination code",
            format!(
                "Your code to terminate contract {} is {}",
                issued.contract_code, issued.otp
            ),
            None,
        );
        self.ctx.deliver(outbox).await;
        Ok(issued)
    }

    /// Terminates a signed contract after checking the OTP. The booking is
    /// canceled and the held commit deposit is refunded.
    #[instrument(skip(self, otp))]
    pub async fn terminate_contract(
        &self,
        contract_code: &str,
        otp: &str,
    ) -> Result<contract::Model, ServiceError> {
        let now = self.ctx.clock.now();
        let policy = &self.ctx.policy;
        let mut outbox = Outbox::new();

        let txn = db::begin(&self.ctx.db).await?;
        let current = find_contract_by_code(&txn, contract_code).await?;
        ensure_terminatable(&current, now, policy.terminability_window())?;
        check_token(
            "Termination OTP",
            current.termination_otp.as_deref(),
            current.termination_otp_generated_at,
            otp,
            policy.termination_otp_ttl(),
            now,
        )?;

        let mut active = current.clone().into_active_model();
        active.status = Set(ContractStatus::Canceled);
        active.is_terminatable = Set(false);
        active.termination_otp = Set(None);
        active.reason = Set(Some(TERMINATED_REASON.to_string()));
        let terminated = save_contract(&txn, &current, active).await?;

        let booking = find_booking(&txn, current.booking_id).await?;
        let updated = transition_booking(&txn, &booking, BookingStatus::Canceled, |b| {
            b.has_terminated = Set(true);
            b.cancel_at = Set(Some(now));
            b.cancel_reason = Set(Some(TERMINATED_REASON.to_string()));
        })
        .await?;
        let refunded = refund_held_deposit(&txn, &self.wallet, &booking, &mut outbox).await?;
        db::commit(txn).await?;
        info!(
            contract_code = %terminated.contract_code,
            refunded = %refunded,
            "Contract terminated"
        );

        outbox.event(Event::ContractTerminated {
            contract_id: terminated.id,
            booking_id: booking.id,
            refunded,
        });
        outbox.event(status_event(&booking, &updated));
        outbox.notify(
            booking.provider_id,
            "Contract terminated",
            format!(
                "Contract {} for booking {} was terminated by the customer",
                terminated.contract_code, booking.booking_code
            ),
            None,
        );
        self.ctx.deliver(outbox).await;
        Ok(terminated)
    }

    /// Rejects a contract left unsigned past the signing window and forfeits
    /// a held commit deposit to the platform and the provider.
    ///
    /// Returns `None` when the contract no longer qualifies, so a rerun
    /// never settles the same deposit twice.
    #[instrument(skip(self))]
    pub async fn auto_cancel_expired(
        &self,
        contract_id: i32,
    ) -> Result<Option<AutoCancelOutcome>, ServiceError> {
        let now = self.ctx.clock.now();
        let mut outbox = Outbox::new();

        let txn = db::begin(&self.ctx.db).await?;
        let current = contract::Entity::find_by_id(contract_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Contract", contract_id))?;
        if !signing_window_elapsed(&current, now, self.ctx.policy.contract_signing_window()) {
            return Ok(None);
        }

        let booking = find_booking(&txn, current.booking_id).await?;
        let held = booking.held_deposit();
        let split = if held > Decimal::ZERO {
            let rate = commission_rate(&txn).await?;
            settlement::compute_auto_cancel_compensation(held, rate)?
        } else {
            settlement::CommissionSplit {
                admin_amount: Decimal::ZERO,
                provider_amount: Decimal::ZERO,
            }
        };
        let reference = PaymentReference::Booking(booking.id);

        if split.admin_amount > Decimal::ZERO {
            let admin_id = admin_account_id(&txn).await?;
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
                    booking.provider_id,
                    split.provider_amount,
                    TransactionType::Compensation,
                    reference,
                )
                .await?;
            outbox.event(credit.to_event());
        }

        let mut active = current.clone().into_active_model();
        active.status = Set(ContractStatus::Rejected);
        active.reason = Set(Some(SIGNING_WINDOW_EXPIRED_REASON.to_string()));
        active.signature_token = Set(None);
        save_contract(&txn, &current, active).await?;

        let updated = transition_booking(&txn, &booking, BookingStatus::Canceled, |b| {
            b.cancel_at = Set(Some(now));
            b.cancel_reason = Set(Some(SIGNING_WINDOW_EXPIRED_REASON.to_string()));
        })
        .await?;
        db::commit(txn).await?;
        info!(
            contract_code = %current.contract_code,
            admin = %split.admin_amount,
            provider = %split.provider_amount,
            "Unsigned contract auto-canceled"
        );

        outbox.event(Event::ContractRejected {
            contract_id: current.id,
            booking_id: booking.id,
        });
        outbox.event(status_event(&booking, &updated));
        outbox.notify(
            booking.provider_id,
            "Contract expired",
            format!(
                "Contract {} was not signed in time and booking {} was canceled",
                current.contract_code, booking.booking_code
            ),
            None,
        );
        self.ctx.deliver(outbox).await;

        Ok(Some(AutoCancelOutcome {
            contract_id: current.id,
            booking_id: booking.id,
            admin_amount: split.admin_amount,
            provider_amount: split.provider_amount,
        }))
    }

    /// Clears `is_terminatable` once the termination window has passed.
    /// Returns `false` when there was nothing to do.
    pub async fn expire_terminability(&self, contract_id: i32) -> Result<bool, ServiceError> {
        let now = self.ctx.clock.now();

        let txn = db::begin(&self.ctx.db).await?;
        let current = contract::Entity::find_by_id(contract_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Contract", contract_id))?;
        if !terminability_elapsed(&current, now, self.ctx.policy.terminability_window()) {
            return Ok(false);
        }
        let mut active = current.clone().into_active_model();
        active.is_terminatable = Set(false);
        active.termination_otp = Set(None);
        save_contract(&txn, &current, active).await?;
        db::commit(txn).await?;
        Ok(true)
    }

    async fn move_pending_contract(
        &self,
        contract_code: &str,
        from: ContractStatus,
        to: ContractStatus,
        reason: Option<String>,
    ) -> Result<contract::Model, ServiceError> {
        let txn = db::begin(&self.ctx.db).await?;
        let current = find_contract_by_code(&txn, contract_code).await?;
        if current.status != from {
            return Err(ServiceError::InvalidState(format!(
                "Contract {} is {}, expected {}",
                current.contract_code, current.status, from
            )));
        }
        let mut active = current.clone().into_active_model();
        active.status = Set(to);
        active.reason = Set(reason);
        let updated = save_contract(&txn, &current, active).await?;
        let booking = find_booking(&txn, updated.booking_id).await?;
        db::commit(txn).await?;
        info!(contract_code = %updated.contract_code, from = %from, to = %to, "Contract status updated");

        let mut outbox = Outbox::new();
        outbox.notify(
            booking.provider_id,
            "Contract update",
            format!("Contract {} is now {}", updated.contract_code, updated.status),
            None,
        );
        self.ctx.deliver(outbox).await;
        Ok(updated)
    }

    /// Ends a contract before signature, cancels its booking and refunds the
    /// held commit deposit.
    async fn close_contract(
        &self,
        contract_code: &str,
        allowed: &[ContractStatus],
        to: ContractStatus,
        reason: &str,
    ) -> Result<contract::Model, ServiceError> {
        let now = self.ctx.clock.now();
        let mut outbox = Outbox::new();

        let txn = db::begin(&self.ctx.db).await?;
        let current = find_contract_by_code(&txn, contract_code).await?;
        if !allowed.contains(&current.status) {
            return Err(ServiceError::InvalidState(format!(
                "Contract {} is {} and cannot become {}",
                current.contract_code, current.status, to
            )));
        }

        let mut active = current.clone().into_active_model();
        active.status = Set(to);
        active.reason = Set(Some(reason.to_string()));
        active.signature_token = Set(None);
        let closed = save_contract(&txn, &current, active).await?;

        let booking = find_booking(&txn, current.booking_id).await?;
        let updated = transition_booking(&txn, &booking, BookingStatus::Canceled, |b| {
            b.cancel_at = Set(Some(now));
            b.cancel_reason = Set(Some(reason.to_string()));
        })
        .await?;
        refund_held_deposit(&txn, &self.wallet, &booking, &mut outbox).await?;
        db::commit(txn).await?;

        outbox.event(match to {
            ContractStatus::Rejected => Event::ContractRejected {
                contract_id: closed.id,
                booking_id: booking.id,
            },
            _ => Event::ContractCanceled {
                contract_id: closed.id,
                booking_id: booking.id,
            },
        });
        outbox.event(status_event(&booking, &updated));
        outbox.notify(
            booking.provider_id,
            "Contract closed",
            format!(
                "Contract {} is {} and booking {} was canceled",
                closed.contract_code, closed.status, booking.booking_code
            ),
            None,
        );
        self.ctx.deliver(outbox).await;
        Ok(closed)
    }
}

fn ensure_terminatable(
    contract: &contract::Model,
    now: DateTime<Utc>,
    window: Duration,
) -> Result<(), ServiceError> {
    let within_window = contract
        .signed_date
        .map_or(false, |signed| now - signed <= window);
    if contract.status != ContractStatus::Signed || !contract.is_terminatable || !within_window {
        return Err(ServiceError::InvalidState(format!(
            "Contract {} can no longer be terminated",
            contract.contract_code
        )));
    }
    Ok(())
}

async fn unique_contract_code<C: ConnectionTrait>(conn: &C) -> Result<String, ServiceError> {
    for _ in 0..CONTRACT_CODE_ATTEMPTS {
        let candidate = codes::contract_code();
        let taken = contract::Entity::find()
            .filter(contract::Column::ContractCode.eq(candidate.as_str()))
            .count(conn)
            .await?;
        if taken == 0 {
            return Ok(candidate);
        }
    }
    error!("Could not generate a unique contract code");
    Err(ServiceError::InternalError(
        "Could not generate a unique contract code".to_string(),
    ))
}

fn signing_url(base: &str, contract_code: &str, token: &str) -> Result<String, ServiceError> {
    let mut url = Url::parse(base)
        .and_then(|base| base.join(&format!("contracts/{}/sign", contract_code)))
        .map_err(|e| ServiceError::InternalError(format!("Invalid signing base URL: {}", e)))?;
    url.query_pairs_mut().append_pair("token", token);
    Ok(url.into())
}

fn status_event(before: &booking::Model, after: &booking::Model) -> Event {
    Event::BookingStatusChanged {
        booking_id: after.id,
        booking_code: after.booking_code.clone(),
        old_status: before.status,
        new_status: after.status,
    }
}
