use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder};

use crate::{
    entities::{
        account::{self, AccountRole},
        booking::{self, BookingStatus},
        cancel_type,
        contract::{self, ContractStatus},
        payment_transaction::TransactionType,
        setting,
    },
    errors::ServiceError,
    events::Outbox,
    services::wallet::{PaymentReference, WalletService},
};

pub(crate) async fn find_booking_by_code<C: ConnectionTrait>(
    conn: &C,
    booking_code: &str,
) -> Result<booking::Model, ServiceError> {
    booking::Entity::find()
        .filter(booking::Column::BookingCode.eq(booking_code))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Booking", booking_code))
}

pub(crate) async fn find_booking<C: ConnectionTrait>(
    conn: &C,
    booking_id: i32,
) -> Result<booking::Model, ServiceError> {
    booking::Entity::find_by_id(booking_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Booking", booking_id))
}

pub(crate) async fn find_contract_by_code<C: ConnectionTrait>(
    conn: &C,
    contract_code: &str,
) -> Result<contract::Model, ServiceError> {
    contract::Entity::find()
        .filter(contract::Column::ContractCode.eq(contract_code))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Contract", contract_code))
}

/// The booking's contract that is neither rejected nor canceled, if any.
pub(crate) async fn find_live_contract<C: ConnectionTrait>(
    conn: &C,
    booking_id: i32,
) -> Result<Option<contract::Model>, ServiceError> {
    Ok(contract::Entity::find()
        .filter(contract::Column::BookingId.eq(booking_id))
        .filter(contract::Column::Status.is_not_in([ContractStatus::Rejected, ContractStatus::Canceled]))
        .one(conn)
        .await?)
}

pub(crate) async fn ensure_cancel_type<C: ConnectionTrait>(
    conn: &C,
    cancel_type_id: i32,
) -> Result<(), ServiceError> {
    cancel_type::Entity::find_by_id(cancel_type_id)
        .one(conn)
        .await?
        .map(|_| ())
        .ok_or_else(|| ServiceError::not_found("Cancel type", cancel_type_id))
}

pub(crate) fn ensure_status(
    booking: &booking::Model,
    allowed: &[BookingStatus],
    action: &str,
) -> Result<(), ServiceError> {
    if allowed.contains(&booking.status) {
        Ok(())
    } else {
        Err(ServiceError::InvalidState(format!(
            "Cannot {} booking {} while it is {}",
            action, booking.booking_code, booking.status
        )))
    }
}

pub(crate) fn ensure_reason(reason: &str) -> Result<(), ServiceError> {
    if reason.trim().is_empty() {
        return Err(ServiceError::ValidationError(
            "A reason is required".to_string(),
        ));
    }
    Ok(())
}

/// Account whose wallet receives the platform commission.
pub(crate) async fn admin_account_id<C: ConnectionTrait>(conn: &C) -> Result<i32, ServiceError> {
    account::Entity::find()
        .filter(account::Column::Role.eq(AccountRole::Admin))
        .order_by_asc(account::Column::Id)
        .one(conn)
        .await?
        .map(|admin| admin.id)
        .ok_or_else(|| ServiceError::NotFound("Admin account not found".to_string()))
}

/// Current commission rate, read at call time.
pub(crate) async fn commission_rate<C: ConnectionTrait>(conn: &C) -> Result<Decimal, ServiceError> {
    setting::Entity::find()
        .order_by_asc(setting::Column::Id)
        .one(conn)
        .await?
        .map(|s| s.commission)
        .ok_or_else(|| ServiceError::NotFound("Commission setting not found".to_string()))
}

/// Returns a held commit deposit to the customer as a `Refund` payment.
pub(crate) async fn refund_held_deposit<C: ConnectionTrait>(
    conn: &C,
    wallet: &WalletService,
    booking: &booking::Model,
    outbox: &mut Outbox,
) -> Result<Decimal, ServiceError> {
    let held = booking.held_deposit();
    if held <= Decimal::ZERO {
        return Ok(Decimal::ZERO);
    }

    let refund = wallet
        .credit(
            conn,
            booking.account_id,
            held,
            TransactionType::Refund,
            PaymentReference::Booking(booking.id),
        )
        .await?;
    outbox.event(refund.to_event());
    outbox.notify(
        booking.account_id,
        "Deposit refunded",
        format!(
            "Your commit deposit of {} for booking {} has been refunded",
            held, booking.booking_code
        ),
        None,
    );
    Ok(held)
}
