use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum ContractStatus {
    #[sea_orm(string_value = "Pending")]
    Pending,
    #[sea_orm(string_value = "Signed")]
    Signed,
    #[sea_orm(string_value = "Rejected")]
    Rejected,
    #[sea_orm(string_value = "PendingCancel")]
    PendingCancel,
    #[sea_orm(string_value = "Canceled")]
    Canceled,
}

/// The `contracts` table, one row per quotation.
///
/// `is_deposited` and `is_final_paid` only ever move from false to true.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "contracts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub contract_code: String,
    #[sea_orm(unique)]
    pub quotation_id: i32,
    pub booking_id: i32,
    pub term_of_use_text: String,
    pub file_path: Option<String>,
    pub status: ContractStatus,
    pub created_at: DateTime<Utc>,
    pub signed_date: Option<DateTime<Utc>>,
    pub signature_token: Option<String>,
    pub signature_token_generated_at: Option<DateTime<Utc>>,
    pub termination_otp: Option<String>,
    pub termination_otp_generated_at: Option<DateTime<Utc>>,
    pub is_signed: bool,
    pub is_deposited: bool,
    pub is_final_paid: bool,
    pub is_terminatable: bool,
    pub reason: Option<String>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::quotation::Entity",
        from = "Column::QuotationId",
        to = "super::quotation::Column::Id",
        on_delete = "Cascade"
    )]
    Quotation,
}

impl Related<super::quotation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Quotation.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
