use std::sync::Arc;

use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, Set,
};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::{
    clock::SharedClock,
    db,
    entities::{
        payment_transaction::{self, PaymentStatus, TransactionType},
        wallet, wallet_transaction,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    metrics,
};

/// What a payment row points at. Top-ups reference nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentReference {
    None,
    Booking(i32),
    Order(i32),
}

impl PaymentReference {
    fn booking_id(self) -> Option<i32> {
        match self {
            PaymentReference::Booking(id) => Some(id),
            _ => None,
        }
    }

    fn order_id(self) -> Option<i32> {
        match self {
            PaymentReference::Order(id) => Some(id),
            _ => None,
        }
    }
}

/// Result of one ledger mutation: the wallet after the change and the
/// payment row that records it.
#[derive(Debug, Clone)]
pub struct WalletMutation {
    pub account_id: i32,
    pub wallet: wallet::Model,
    pub payment: payment_transaction::Model,
}

impl WalletMutation {
    pub fn to_event(&self) -> Event {
        Event::WalletMutated {
            account_id: self.account_id,
            amount: self.payment.amount,
            transaction_type: self.payment.transaction_type,
            booking_id: self.payment.booking_id,
        }
    }
}

/// Cached balance next to the signed sum of the ledger rows behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    pub account_id: i32,
    pub balance: Decimal,
    pub ledger_sum: Decimal,
}

impl Reconciliation {
    pub fn is_consistent(&self) -> bool {
        self.balance == self.ledger_sum
    }
}

/// Per-account balances backed by an append-only payment ledger.
///
/// `credit`, `debit` and `transfer` run on whatever connection they are given,
/// so callers compose them into their own transaction.
#[derive(Clone)]
pub struct WalletService {
    db: Arc<DatabaseConnection>,
    clock: SharedClock,
    event_sender: Option<Arc<EventSender>>,
}

impl WalletService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        clock: SharedClock,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db,
            clock,
            event_sender,
        }
    }

    /// Creates an empty wallet for an account that has none.
    #[instrument(skip(self))]
    pub async fn open_wallet(&self, account_id: i32) -> Result<wallet::Model, ServiceError> {
        let existing = wallet::Entity::find()
            .filter(wallet::Column::AccountId.eq(account_id))
            .one(&*self.db)
            .await?;
        if existing.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Account {} already has a wallet",
                account_id
            )));
        }

        let created = wallet::ActiveModel {
            account_id: Set(account_id),
            balance: Set(Decimal::ZERO),
            version: Set(1),
            ..Default::default()
        }
        .insert(&*self.db)
        .await?;
        info!(account_id, wallet_id = created.id, "Wallet opened");
        Ok(created)
    }

    pub async fn credit<C: ConnectionTrait>(
        &self,
        conn: &C,
        account_id: i32,
        amount: Decimal,
        transaction_type: TransactionType,
        reference: PaymentReference,
    ) -> Result<WalletMutation, ServiceError> {
        ensure_positive(amount)?;
        self.apply(conn, account_id, amount, transaction_type, reference)
            .await
    }

    /// Fails with `InsufficientFunds` and leaves everything untouched when the
    /// balance does not cover `amount`.
    pub async fn debit<C: ConnectionTrait>(
        &self,
        conn: &C,
        account_id: i32,
        amount: Decimal,
        transaction_type: TransactionType,
        reference: PaymentReference,
    ) -> Result<WalletMutation, ServiceError> {
        ensure_positive(amount)?;
        self.apply(conn, account_id, -amount, transaction_type, reference)
            .await
    }

    /// Debits `from` then credits `to`. The credit is never attempted when the
    /// debit fails.
    #[allow(clippy::too_many_arguments)]
    pub async fn transfer<C: ConnectionTrait>(
        &self,
        conn: &C,
        from_account_id: i32,
        to_account_id: i32,
        amount: Decimal,
        debit_type: TransactionType,
        credit_type: TransactionType,
        reference: PaymentReference,
    ) -> Result<(WalletMutation, WalletMutation), ServiceError> {
        if from_account_id == to_account_id {
            return Err(ServiceError::ValidationError(
                "Cannot transfer to the same account".to_string(),
            ));
        }
        let debited = self
            .debit(conn, from_account_id, amount, debit_type, reference)
            .await?;
        let credited = self
            .credit(conn, to_account_id, amount, credit_type, reference)
            .await?;
        Ok((debited, credited))
    }

    /// Adds funds to a wallet in a transaction of its own.
    #[instrument(skip(self), fields(account_id = %account_id, amount = %amount))]
    pub async fn top_up(
        &self,
        account_id: i32,
        amount: Decimal,
    ) -> Result<WalletMutation, ServiceError> {
        let txn = db::begin(&self.db).await?;
        let mutation = self
            .credit(
                &txn,
                account_id,
                amount,
                TransactionType::TopUp,
                PaymentReference::None,
            )
            .await?;
        db::commit(txn).await?;

        if let Some(sender) = &self.event_sender {
            sender.publish(mutation.to_event()).await;
        }
        Ok(mutation)
    }

    pub async fn balance(&self, account_id: i32) -> Result<Decimal, ServiceError> {
        Ok(find_wallet(&*self.db, account_id).await?.balance)
    }

    /// Compares the cached balance with the sum of the wallet's payment rows.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, account_id: i32) -> Result<Reconciliation, ServiceError> {
        let conn = &*self.db;
        let wallet = find_wallet(conn, account_id).await?;

        let payment_ids: Vec<i32> = wallet_transaction::Entity::find()
            .filter(wallet_transaction::Column::WalletId.eq(wallet.id))
            .all(conn)
            .await?
            .into_iter()
            .map(|link| link.payment_transaction_id)
            .collect();

        let ledger_sum = if payment_ids.is_empty() {
            Decimal::ZERO
        } else {
            payment_transaction::Entity::find()
                .filter(payment_transaction::Column::Id.is_in(payment_ids))
                .filter(payment_transaction::Column::Status.eq(PaymentStatus::Success))
                .all(conn)
                .await?
                .iter()
                .try_fold(Decimal::ZERO, |sum, p| sum.checked_add(p.amount))
                .ok_or_else(|| {
                    ServiceError::InternalError(format!(
                        "Ledger sum of account {} overflowed",
                        account_id
                    ))
                })?
        };

        let report = Reconciliation {
            account_id,
            balance: wallet.balance,
            ledger_sum,
        };
        if !report.is_consistent() {
            warn!(
                account_id,
                balance = %report.balance,
                ledger_sum = %report.ledger_sum,
                "Wallet balance does not match its ledger"
            );
        }
        Ok(report)
    }

    async fn apply<C: ConnectionTrait>(
        &self,
        conn: &C,
        account_id: i32,
        signed_amount: Decimal,
        transaction_type: TransactionType,
        reference: PaymentReference,
    ) -> Result<WalletMutation, ServiceError> {
        let current = find_wallet(conn, account_id).await?;

        let new_balance = current.balance.checked_add(signed_amount).ok_or_else(|| {
            error!(account_id, amount = %signed_amount, "Wallet balance overflow");
            ServiceError::InternalError(format!(
                "Balance of account {} cannot hold another {}",
                account_id, signed_amount
            ))
        })?;
        if new_balance < Decimal::ZERO {
            warn!(
                account_id,
                balance = %current.balance,
                requested = %(-signed_amount),
                "Debit rejected for insufficient funds"
            );
            return Err(ServiceError::InsufficientFunds {
                account_id,
                balance: current.balance,
                requested: -signed_amount,
            });
        }

        let updated = wallet::Entity::update_many()
            .col_expr(wallet::Column::Balance, Expr::value(new_balance))
            .col_expr(wallet::Column::Version, Expr::value(current.version + 1))
            .filter(wallet::Column::Id.eq(current.id))
            .filter(wallet::Column::Version.eq(current.version))
            .exec(conn)
            .await?;
        if updated.rows_affected == 0 {
            error!(account_id, "Concurrent modification of wallet {}", current.id);
            return Err(ServiceError::Conflict(format!(
                "Wallet of account {} was modified concurrently",
                account_id
            )));
        }

        let payment = payment_transaction::ActiveModel {
            amount: Set(signed_amount),
            booking_id: Set(reference.booking_id()),
            order_id: Set(reference.order_id()),
            transaction_date: Set(self.clock.now()),
            transaction_type: Set(transaction_type),
            status: Set(PaymentStatus::Success),
            ..Default::default()
        }
        .insert(conn)
        .await?;

        wallet_transaction::ActiveModel {
            wallet_id: Set(current.id),
            payment_transaction_id: Set(payment.id),
            ..Default::default()
        }
        .insert(conn)
        .await?;

        metrics::record_wallet_mutation(
            &transaction_type.to_string(),
            signed_amount > Decimal::ZERO,
        );
        info!(
            account_id,
            amount = %signed_amount,
            transaction_type = %transaction_type,
            payment_id = payment.id,
            "Wallet mutated"
        );

        Ok(WalletMutation {
            account_id,
            wallet: wallet::Model {
                balance: new_balance,
                version: current.version + 1,
                ..current
            },
            payment,
        })
    }
}

async fn find_wallet<C: ConnectionTrait>(
    conn: &C,
    account_id: i32,
) -> Result<wallet::Model, ServiceError> {
    wallet::Entity::find()
        .filter(wallet::Column::AccountId.eq(account_id))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Wallet of account", account_id))
}

fn ensure_positive(amount: Decimal) -> Result<(), ServiceError> {
    if amount <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(format!(
            "Amount must be positive, got {}",
            amount
        )));
    }
    Ok(())
}
