use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum TransactionType {
    #[sea_orm(string_value = "TopUp")]
    TopUp,
    #[sea_orm(string_value = "Deposit")]
    Deposit,
    #[sea_orm(string_value = "FinalPay")]
    FinalPay,
    #[sea_orm(string_value = "OrderPay")]
    OrderPay,
    #[sea_orm(string_value = "Refund")]
    Refund,
    /// Platform share credited to the admin wallet.
    #[sea_orm(string_value = "Commission")]
    Commission,
    /// Provider share of a completed booking.
    #[sea_orm(string_value = "Payout")]
    Payout,
    /// Provider share of a forfeited commit deposit.
    #[sea_orm(string_value = "Compensation")]
    Compensation,
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "Success")]
    Success,
    #[sea_orm(string_value = "Failed")]
    Failed,
    #[sea_orm(string_value = "Pending")]
    Pending,
}

/// Append-only ledger row. `amount` is signed: credits positive, debits negative.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payment_transactions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub amount: Decimal,
    pub booking_id: Option<i32>,
    pub order_id: Option<i32>,
    pub transaction_date: DateTime<Utc>,
    pub transaction_type: TransactionType,
    pub status: PaymentStatus,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::booking::Entity",
        from = "Column::BookingId",
        to = "super::booking::Column::Id",
        on_delete = "Restrict"
    )]
    Booking,
    #[sea_orm(has_many = "super::wallet_transaction::Entity")]
    WalletTransactions,
}

impl Related<super::booking::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Booking.def()
    }
}

impl Related<super::wallet_transaction::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::WalletTransactions.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
