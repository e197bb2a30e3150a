use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Lifecycle of a booking. Declaration order is the forward path; the last
/// three variants are side branches reachable from several forward states.
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
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum BookingStatus {
    #[sea_orm(string_value = "Pending")]
    Pending,
    #[sea_orm(string_value = "Planning")]
    Planning,
    #[sea_orm(string_value = "Quoting")]
    Quoting,
    #[sea_orm(string_value = "Contracting")]
    Contracting,
    #[sea_orm(string_value = "Confirm")]
    Confirm,
    #[sea_orm(string_value = "DepositPaid")]
    DepositPaid,
    #[sea_orm(string_value = "Preparing")]
    Preparing,
    #[sea_orm(string_value = "InTransit")]
    InTransit,
    #[sea_orm(string_value = "Progressing")]
    Progressing,
    #[sea_orm(string_value = "AllDone")]
    AllDone,
    #[sea_orm(string_value = "FinalPaid")]
    FinalPaid,
    #[sea_orm(string_value = "Completed")]
    Completed,
    #[sea_orm(string_value = "PendingCancel")]
    PendingCancel,
    #[sea_orm(string_value = "Canceled")]
    Canceled,
    #[sea_orm(string_value = "Rejected")]
    Rejected,
}

/// The `bookings` table.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "bookings")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Human-readable code, never changes after creation.
    #[sea_orm(unique)]
    pub booking_code: String,

    pub status: BookingStatus,

    /// Customer who placed the booking.
    pub account_id: i32,
    /// Provider owning the booked service.
    pub provider_id: i32,
    pub decor_service_id: i32,
    pub address_id: i32,

    pub total_price: Decimal,
    pub deposit_amount: Decimal,
    pub commit_deposit_amount: Decimal,
    pub is_commit_deposit_paid: bool,

    pub created_at: DateTime<Utc>,
    pub construction_date: Option<DateTime<Utc>>,
    pub cancel_at: Option<DateTime<Utc>>,
    pub complete_at: Option<DateTime<Utc>>,

    pub cancel_type_id: Option<i32>,
    pub cancel_reason: Option<String>,
    pub reject_reason: Option<String>,

    pub is_booked: bool,
    pub is_tracked: bool,
    pub is_quoted: bool,
    /// Set by the lockout job; blocks customer-initiated cancellation.
    pub cancel_disable: bool,
    pub has_terminated: bool,

    /// Status held when the booking entered `PendingCancel`; restored on revoke.
    pub previous_status: Option<BookingStatus>,

    /// Bumped on every write; status updates are compare-and-set on it.
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::decor_service::Entity",
        from = "Column::DecorServiceId",
        to = "super::decor_service::Column::Id",
        on_delete = "Restrict"
    )]
    DecorService,
    #[sea_orm(
        belongs_to = "super::address::Entity",
        from = "Column::AddressId",
        to = "super::address::Column::Id",
        on_delete = "Restrict"
    )]
    Address,
    #[sea_orm(has_many = "super::time_slot::Entity")]
    TimeSlots,
    #[sea_orm(has_many = "super::quotation::Entity")]
    Quotations,
}

impl Related<super::decor_service::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DecorService.def()
    }
}

impl Related<super::time_slot::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TimeSlots.def()
    }
}

impl Related<super::quotation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Quotations.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Commit deposit currently held by the platform for this booking.
    pub fn held_deposit(&self) -> Decimal {
        if self.is_commit_deposit_paid {
            self.commit_deposit_amount
        } else {
            Decimal::ZERO
        }
    }
}
