use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum QuotationStatus {
    #[sea_orm(string_value = "Pending")]
    Pending,
    /// A contract has been drafted from this quotation; its figures are frozen.
    #[sea_orm(string_value = "Confirmed")]
    Confirmed,
    #[sea_orm(string_value = "Canceled")]
    Canceled,
}

/// The `quotations` table. Canceled rows stay as history; at most one
/// non-canceled quotation exists per booking.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "quotations")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub quotation_code: String,
    pub booking_id: i32,
    pub material_cost: Decimal,
    pub labor_cost: Decimal,
    pub product_cost: Decimal,
    /// Share of the booking total collected as commit deposit, 0..=100.
    pub deposit_percentage: Decimal,
    pub status: QuotationStatus,
    pub created_at: DateTime<Utc>,
    pub cancel_type_id: Option<i32>,
    pub cancel_reason: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::booking::Entity",
        from = "Column::BookingId",
        to = "super::booking::Column::Id",
        on_delete = "Cascade"
    )]
    Booking,
    #[sea_orm(has_many = "super::material_detail::Entity")]
    MaterialDetails,
    #[sea_orm(has_many = "super::labor_detail::Entity")]
    LaborDetails,
    #[sea_orm(has_many = "super::product_detail::Entity")]
    ProductDetails,
    #[sea_orm(has_one = "super::contract::Entity")]
    Contract,
}

impl Related<super::booking::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Booking.def()
    }
}

impl Related<super::material_detail::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MaterialDetails.def()
    }
}

impl Related<super::labor_detail::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::LaborDetails.def()
    }
}

impl Related<super::product_detail::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ProductDetails.def()
    }
}

impl Related<super::contract::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Contract.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn total_cost(&self) -> Decimal {
        self.material_cost + self.labor_cost + self.product_cost
    }

    pub fn is_active(&self) -> bool {
        self.status != QuotationStatus::Canceled
    }
}
