use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Lookup of cancellation reasons shared by bookings and quotations.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "cancel_types")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub type_name: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
