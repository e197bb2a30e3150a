//! Money arithmetic for deposits, final payments and commission splits.
//!
//! Everything here is pure. Amounts are rounded to two decimal places and the
//! provider share is always derived by subtraction, so the parts of a split
//! add up to the whole exactly.

use crate::errors::ServiceError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

const MONEY_SCALE: u32 = 2;

/// How one amount is divided between the platform and the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionSplit {
    pub admin_amount: Decimal,
    pub provider_amount: Decimal,
}

impl CommissionSplit {
    pub fn total(&self) -> Decimal {
        self.admin_amount + self.provider_amount
    }
}

fn ensure_amount(name: &str, amount: Decimal) -> Result<(), ServiceError> {
    if amount < Decimal::ZERO {
        return Err(ServiceError::ValidationError(format!(
            "{} must not be negative, got {}",
            name, amount
        )));
    }
    Ok(())
}

fn ensure_rate(rate: Decimal) -> Result<(), ServiceError> {
    if rate < Decimal::ZERO || rate > Decimal::ONE {
        return Err(ServiceError::ValidationError(format!(
            "Commission rate must be within [0, 1], got {}",
            rate
        )));
    }
    Ok(())
}

fn overflow(what: &str) -> ServiceError {
    ServiceError::ValidationError(format!("{} is too large to compute", what))
}

pub fn ensure_percentage(percentage: Decimal) -> Result<(), ServiceError> {
    if percentage < Decimal::ZERO || percentage > dec!(100) {
        return Err(ServiceError::ValidationError(format!(
            "Deposit percentage must be within [0, 100], got {}",
            percentage
        )));
    }
    Ok(())
}

/// Splits `total` into the admin commission and the provider remainder.
pub fn compute_commission_split(
    total: Decimal,
    commission_rate: Decimal,
) -> Result<CommissionSplit, ServiceError> {
    ensure_amount("Settlement total", total)?;
    ensure_rate(commission_rate)?;

    let admin_amount = total
        .checked_mul(commission_rate)
        .ok_or_else(|| overflow("Commission"))?
        .round_dp(MONEY_SCALE);
    Ok(CommissionSplit {
        admin_amount,
        provider_amount: total - admin_amount,
    })
}

/// Commit deposit owed for a booking: `percentage`% of its total price.
pub fn compute_deposit_amount(
    total_price: Decimal,
    deposit_percentage: Decimal,
) -> Result<Decimal, ServiceError> {
    ensure_amount("Total price", total_price)?;
    ensure_percentage(deposit_percentage)?;
    total_price
        .checked_mul(deposit_percentage)
        .and_then(|scaled| scaled.checked_div(dec!(100)))
        .map(|amount| amount.round_dp(MONEY_SCALE))
        .ok_or_else(|| overflow("Commit deposit"))
}

/// What the customer still owes once the commit deposit has been collected.
pub fn compute_final_payment_amount(
    total_price: Decimal,
    deposit_already_paid: Decimal,
) -> Result<Decimal, ServiceError> {
    ensure_amount("Total price", total_price)?;
    ensure_amount("Deposit paid", deposit_already_paid)?;
    if deposit_already_paid > total_price {
        return Err(ServiceError::ValidationError(format!(
            "Deposit paid {} exceeds total price {}",
            deposit_already_paid, total_price
        )));
    }
    Ok(total_price - deposit_already_paid)
}

/// Forfeited commit deposit of a contract that was never signed. The platform
/// keeps its commission and the provider receives the rest.
pub fn compute_auto_cancel_compensation(
    commit_deposit_amount: Decimal,
    commission_rate: Decimal,
) -> Result<CommissionSplit, ServiceError> {
    compute_commission_split(commit_deposit_amount, commission_rate)
}
