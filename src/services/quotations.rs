use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, IntoActiveModel, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use validator::Validate;

use crate::{
    db,
    entities::{
        booking::{self, BookingStatus},
        contract, labor_detail, material_detail, product_detail,
        quotation::{self, QuotationStatus},
    },
    errors::ServiceError,
    events::{Event, Outbox},
    services::{
        booking_status::transition_booking,
        codes, settlement,
        support::{ensure_cancel_type, ensure_reason, ensure_status, find_booking_by_code},
        ServiceContext,
    },
};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MaterialLine {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub quantity: i32,
    /// Unit cost
    pub cost: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LaborLine {
    #[validate(length(min = 1, max = 200))]
    pub task_name: String,
    pub cost: Decimal,
    pub area: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ProductLine {
    #[validate(length(min = 1, max = 200))]
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateQuotationRequest {
    /// Share of the booking total taken as commit deposit, 0..=100
    pub deposit_percentage: Decimal,
    #[validate]
    #[serde(default)]
    pub materials: Vec<MaterialLine>,
    #[validate]
    #[serde(default)]
    pub labors: Vec<LaborLine>,
    #[validate]
    #[serde(default)]
    pub products: Vec<ProductLine>,
}

/// Cost components derived from the submitted line items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotationCosts {
    pub material: Decimal,
    pub labor: Decimal,
    pub product: Decimal,
}

impl QuotationCosts {
    pub fn total(&self) -> Decimal {
        self.material + self.labor + self.product
    }
}

impl CreateQuotationRequest {
    /// Checks every line and sums the cost components.
    pub fn costs(&self) -> Result<QuotationCosts, ServiceError> {
        self.validate()?;
        settlement::ensure_percentage(self.deposit_percentage)?;
        if self.materials.is_empty() && self.labors.is_empty() && self.products.is_empty() {
            return Err(ServiceError::ValidationError(
                "A quotation needs at least one line item".to_string(),
            ));
        }

        let mut material = Decimal::ZERO;
        for line in &self.materials {
            let amount = line_total(&line.name, line.quantity, line.cost)?;
            material = add_cost(material, amount)?;
        }

        let mut labor = Decimal::ZERO;
        for line in &self.labors {
            ensure_line(&line.task_name, 1, line.cost)?;
            if matches!(line.area, Some(area) if area < Decimal::ZERO) {
                return Err(ServiceError::ValidationError(format!(
                    "Area of task '{}' must not be negative",
                    line.task_name
                )));
            }
            labor = add_cost(labor, line.cost)?;
        }

        let mut product = Decimal::ZERO;
        for line in &self.products {
            let amount = line_total(&line.product_name, line.quantity, line.unit_price)?;
            product = add_cost(product, amount)?;
        }

        // total() relies on this sum fitting.
        add_cost(add_cost(material, labor)?, product)?;

        Ok(QuotationCosts {
            material,
            labor,
            product,
        })
    }
}

fn ensure_line(name: &str, quantity: i32, cost: Decimal) -> Result<(), ServiceError> {
    if quantity <= 0 {
        return Err(ServiceError::ValidationError(format!(
            "Quantity of '{}' must be positive, got {}",
            name, quantity
        )));
    }
    if cost < Decimal::ZERO {
        return Err(ServiceError::ValidationError(format!(
            "Cost of '{}' must not be negative, got {}",
            name, cost
        )));
    }
    Ok(())
}

fn line_total(name: &str, quantity: i32, cost: Decimal) -> Result<Decimal, ServiceError> {
    ensure_line(name, quantity, cost)?;
    Decimal::from(quantity).checked_mul(cost).ok_or_else(|| {
        ServiceError::ValidationError(format!("Total cost of '{}' is too large", name))
    })
}

fn add_cost(sum: Decimal, cost: Decimal) -> Result<Decimal, ServiceError> {
    sum.checked_add(cost).ok_or_else(|| {
        ServiceError::ValidationError("Quotation total is too large".to_string())
    })
}

/// A quotation together with its line items.
#[derive(Debug, Clone, Serialize)]
pub struct QuotationDetails {
    pub quotation: quotation::Model,
    pub materials: Vec<material_detail::Model>,
    pub labors: Vec<labor_detail::Model>,
    pub products: Vec<product_detail::Model>,
}

/// Quotations priced by providers after the survey. A booking has at most
/// one non-canceled quotation; canceled ones stay as history.
#[derive(Clone)]
pub struct QuotationService {
    ctx: ServiceContext,
}

impl QuotationService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    #[instrument(skip(self, request))]
    pub async fn create_quotation(
        &self,
        booking_code: &str,
        request: CreateQuotationRequest,
    ) -> Result<quotation::Model, ServiceError> {
        let costs = request.costs()?;
        let now = self.ctx.clock.now();

        let txn = db::begin(&self.ctx.db).await?;
        let booking = find_booking_by_code(&txn, booking_code).await?;
        if let Some(existing) = find_active_quotation(&txn, booking.id).await? {
            return Err(ServiceError::Conflict(format!(
                "Booking {} already has active quotation {}",
                booking.booking_code, existing.quotation_code
            )));
        }
        ensure_status(&booking, &[BookingStatus::Planning], "quote")?;

        let created = quotation::ActiveModel {
            quotation_code: Set(codes::quotation_code()),
            booking_id: Set(booking.id),
            material_cost: Set(costs.material),
            labor_cost: Set(costs.labor),
            product_cost: Set(costs.product),
            deposit_percentage: Set(request.deposit_percentage),
            status: Set(QuotationStatus::Pending),
            created_at: Set(now),
            cancel_type_id: Set(None),
            cancel_reason: Set(None),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        for line in &request.materials {
            material_detail::ActiveModel {
                quotation_id: Set(created.id),
                name: Set(line.name.clone()),
                quantity: Set(line.quantity),
                cost: Set(line.cost),
                total_cost: Set(line_total(&line.name, line.quantity, line.cost)?),
                ..Default::default()
            }
            .insert(&txn)
            .await?;
        }
        for line in &request.labors {
            labor_detail::ActiveModel {
                quotation_id: Set(created.id),
                task_name: Set(line.task_name.clone()),
                cost: Set(line.cost),
                area: Set(line.area),
                ..Default::default()
            }
            .insert(&txn)
            .await?;
        }
        for line in &request.products {
            product_detail::ActiveModel {
                quotation_id: Set(created.id),
                product_name: Set(line.product_name.clone()),
                quantity: Set(line.quantity),
                unit_price: Set(line.unit_price),
                total_price: Set(line_total(
                    &line.product_name,
                    line.quantity,
                    line.unit_price,
                )?),
                ..Default::default()
            }
            .insert(&txn)
            .await?;
        }

        let updated = transition_booking(&txn, &booking, BookingStatus::Quoting, |b| {
            b.is_quoted = Set(true);
        })
        .await?;
        db::commit(txn).await?;
        info!(
            quotation_code = %created.quotation_code,
            booking_code = %booking.booking_code,
            total = %costs.total(),
            "Quotation created"
        );

        let mut outbox = Outbox::new();
        outbox.event(Event::QuotationCreated {
            quotation_id: created.id,
            booking_id: booking.id,
            total_cost: costs.total(),
        });
        outbox.event(Event::BookingStatusChanged {
            booking_id: updated.id,
            booking_code: updated.booking_code.clone(),
            old_status: booking.status,
            new_status: updated.status,
        });
        outbox.notify(
            booking.account_id,
            "Quotation ready",
            format!(
                "A quotation of {} is ready for booking {}",
                costs.total(),
                booking.booking_code
            ),
            None,
        );
        self.ctx.deliver(outbox).await;
        Ok(created)
    }

    /// Withdraws a quotation no contract was drafted from; the booking goes
    /// back to `Planning` for a new quotation.
    #[instrument(skip(self, reason))]
    pub async fn cancel_quotation(
        &self,
        quotation_code: &str,
        cancel_type_id: i32,
        reason: &str,
    ) -> Result<quotation::Model, ServiceError> {
        ensure_reason(reason)?;

        let txn = db::begin(&self.ctx.db).await?;
        let current = find_quotation_by_code(&txn, quotation_code).await?;
        if current.status != QuotationStatus::Pending {
            return Err(ServiceError::InvalidState(format!(
                "Quotation {} is {} and cannot be canceled",
                current.quotation_code, current.status
            )));
        }
        let has_contract = contract::Entity::find()
            .filter(contract::Column::QuotationId.eq(current.id))
            .one(&txn)
            .await?
            .is_some();
        if has_contract {
            return Err(ServiceError::InvalidState(format!(
                "Quotation {} already has a contract",
                current.quotation_code
            )));
        }
        ensure_cancel_type(&txn, cancel_type_id).await?;

        let mut active = current.clone().into_active_model();
        active.status = Set(QuotationStatus::Canceled);
        active.cancel_type_id = Set(Some(cancel_type_id));
        active.cancel_reason = Set(Some(reason.to_string()));
        let canceled = active.update(&txn).await?;

        let booking = booking::Entity::find_by_id(current.booking_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Booking", current.booking_id))?;
        let updated = transition_booking(&txn, &booking, BookingStatus::Planning, |b| {
            b.is_quoted = Set(false);
        })
        .await?;
        db::commit(txn).await?;

        let mut outbox = Outbox::new();
        outbox.event(Event::QuotationCanceled {
            quotation_id: canceled.id,
            booking_id: booking.id,
        });
        outbox.event(Event::BookingStatusChanged {
            booking_id: updated.id,
            booking_code: updated.booking_code.clone(),
            old_status: booking.status,
            new_status: updated.status,
        });
        outbox.notify(
            booking.provider_id,
            "Quotation canceled",
            format!(
                "Quotation {} for booking {} was canceled: {}",
                canceled.quotation_code, booking.booking_code, reason
            ),
            None,
        );
        self.ctx.deliver(outbox).await;
        Ok(canceled)
    }

    pub async fn get_active_quotation(
        &self,
        booking_code: &str,
    ) -> Result<QuotationDetails, ServiceError> {
        let conn = &*self.ctx.db;
        let booking = find_booking_by_code(conn, booking_code).await?;
        let quotation = find_active_quotation(conn, booking.id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "Booking {} has no active quotation",
                    booking.booking_code
                ))
            })?;

        let materials = material_detail::Entity::find()
            .filter(material_detail::Column::QuotationId.eq(quotation.id))
            .order_by_asc(material_detail::Column::Id)
            .all(conn)
            .await?;
        let labors = labor_detail::Entity::find()
            .filter(labor_detail::Column::QuotationId.eq(quotation.id))
            .order_by_asc(labor_detail::Column::Id)
            .all(conn)
            .await?;
        let products = product_detail::Entity::find()
            .filter(product_detail::Column::QuotationId.eq(quotation.id))
            .order_by_asc(product_detail::Column::Id)
            .all(conn)
            .await?;

        Ok(QuotationDetails {
            quotation,
            materials,
            labors,
            products,
        })
    }
}

pub(crate) async fn find_quotation_by_code<C: ConnectionTrait>(
    conn: &C,
    quotation_code: &str,
) -> Result<quotation::Model, ServiceError> {
    quotation::Entity::find()
        .filter(quotation::Column::QuotationCode.eq(quotation_code))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Quotation", quotation_code))
}

async fn find_active_quotation<C: ConnectionTrait>(
    conn: &C,
    booking_id: i32,
) -> Result<Option<quotation::Model>, ServiceError> {
    Ok(quotation::Entity::find()
        .filter(quotation::Column::BookingId.eq(booking_id))
        .filter(quotation::Column::Status.ne(QuotationStatus::Canceled))
        .order_by_desc(quotation::Column::CreatedAt)
        .one(conn)
        .await?)
}
