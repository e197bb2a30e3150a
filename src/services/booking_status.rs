use sea_orm::{ColumnTrait, ConnectionTrait, DbErr, EntityTrait, IntoActiveModel, QueryFilter, Set};
use tracing::{error, info};

use crate::{
    entities::{
        booking::{self, BookingStatus},
        contract,
    },
    errors::ServiceError,
    metrics,
};

impl BookingStatus {
    pub const TERMINAL: [BookingStatus; 3] = [
        BookingStatus::Completed,
        BookingStatus::Canceled,
        BookingStatus::Rejected,
    ];

    /// The allow-list every booking status write is checked against.
    pub fn can_transition_to(self, to: BookingStatus) -> bool {
        use BookingStatus::*;
        match (self, to) {
            // From pending
            (Pending, Planning) => true,

            // Survey done, provider prices the work
            (Planning, Quoting) => true,

            // From quoting; a canceled quotation sends the booking back to planning
            (Quoting, Contracting) => true,
            (Quoting, Planning) => true,

            (Contracting, Confirm) => true,
            (Confirm, DepositPaid) => true,

            // Fulfilment
            (DepositPaid, Preparing) => true,
            (Preparing, InTransit) => true,
            (InTransit, Progressing) => true,
            (Progressing, AllDone) => true,
            (AllDone, FinalPaid) => true,
            (FinalPaid, Completed) => true,

            // Provider rejection, only before confirmation
            (Pending | Planning | Quoting | Contracting, Rejected) => true,

            // Cancellation requests
            (Pending | Planning | Quoting | Contracting | Confirm | DepositPaid, PendingCancel) => {
                true
            }

            // Direct cancellation: approvals, jobs, termination
            (
                Pending | Planning | Quoting | Contracting | Confirm | DepositPaid | Preparing
                | PendingCancel,
                Canceled,
            ) => true,

            // Revoking a cancellation request returns to wherever it was raised
            (PendingCancel, previous) => {
                previous != PendingCancel && previous.can_transition_to(PendingCancel)
            }

            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        Self::TERMINAL.contains(&self)
    }

    /// Statuses before the customer has signed off on a contract.
    pub fn is_pre_confirm(self) -> bool {
        matches!(
            self,
            BookingStatus::Pending
                | BookingStatus::Planning
                | BookingStatus::Quoting
                | BookingStatus::Contracting
        )
    }

    /// The next provider-driven fulfilment step, if this status has one.
    pub fn next_fulfilment_step(self) -> Option<BookingStatus> {
        match self {
            BookingStatus::DepositPaid => Some(BookingStatus::Preparing),
            BookingStatus::Preparing => Some(BookingStatus::InTransit),
            BookingStatus::InTransit => Some(BookingStatus::Progressing),
            BookingStatus::Progressing => Some(BookingStatus::AllDone),
            _ => None,
        }
    }
}

fn ensure_transition(booking: &booking::Model, to: BookingStatus) -> Result<(), ServiceError> {
    if booking.status.can_transition_to(to) {
        Ok(())
    } else {
        error!(
            "Invalid status transition from {} to {} for booking {}",
            booking.status, to, booking.booking_code
        );
        Err(ServiceError::InvalidState(format!(
            "Booking {} cannot move from {} to {}",
            booking.booking_code, booking.status, to
        )))
    }
}

/// Writes `active` back, provided nobody else bumped the booking's version
/// since `current` was read.
pub(crate) async fn save_booking<C: ConnectionTrait>(
    conn: &C,
    current: &booking::Model,
    mut active: booking::ActiveModel,
) -> Result<booking::Model, ServiceError> {
    active.version = Set(current.version + 1);
    booking::Entity::update(active)
        .filter(booking::Column::Version.eq(current.version))
        .exec(conn)
        .await
        .map_err(|e| match e {
            DbErr::RecordNotUpdated => ServiceError::Conflict(format!(
                "Booking {} was modified concurrently",
                current.booking_code
            )),
            other => ServiceError::DatabaseError(other),
        })
}

/// Moves a booking to `to` after checking the allow-list, applying any extra
/// column changes in the same write.
pub(crate) async fn transition_booking<C, F>(
    conn: &C,
    current: &booking::Model,
    to: BookingStatus,
    changes: F,
) -> Result<booking::Model, ServiceError>
where
    C: ConnectionTrait,
    F: FnOnce(&mut booking::ActiveModel),
{
    ensure_transition(current, to)?;

    let mut active = current.clone().into_active_model();
    active.status = Set(to);
    changes(&mut active);
    let updated = save_booking(conn, current, active).await?;

    metrics::record_booking_transition(&to.to_string());
    info!(
        booking_code = %current.booking_code,
        from = %current.status,
        to = %to,
        "Booking status updated"
    );
    Ok(updated)
}

/// Version-checked write for contracts.
pub(crate) async fn save_contract<C: ConnectionTrait>(
    conn: &C,
    current: &contract::Model,
    mut active: contract::ActiveModel,
) -> Result<contract::Model, ServiceError> {
    active.version = Set(current.version + 1);
    contract::Entity::update(active)
        .filter(contract::Column::Version.eq(current.version))
        .exec(conn)
        .await
        .map_err(|e| match e {
            DbErr::RecordNotUpdated => ServiceError::Conflict(format!(
                "Contract {} was modified concurrently",
                current.contract_code
            )),
            other => ServiceError::DatabaseError(other),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::Iterable;
    use BookingStatus::*;

    const FORWARD: [BookingStatus; 12] = [
        Pending,
        Planning,
        Quoting,
        Contracting,
        Confirm,
        DepositPaid,
        Preparing,
        InTransit,
        Progressing,
        AllDone,
        FinalPaid,
        Completed,
    ];

    #[test]
    fn forward_path_is_allowed_one_step_at_a_time() {
        for pair in FORWARD.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        assert!(!Pending.can_transition_to(Quoting));
        assert!(!Confirm.can_transition_to(Preparing));
        assert!(!AllDone.can_transition_to(Completed));
    }

    #[test]
    fn no_backward_moves_except_requote() {
        for (i, from) in FORWARD.iter().enumerate() {
            for to in &FORWARD[..i] {
                let allowed = *from == Quoting && *to == Planning;
                assert_eq!(from.can_transition_to(*to), allowed, "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for from in [Completed, Canceled, Rejected] {
            assert!(from.is_terminal());
            for to in BookingStatus::iter() {
                assert!(!from.can_transition_to(to), "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn rejection_only_before_confirmation() {
        for from in BookingStatus::iter() {
            assert_eq!(
                from.can_transition_to(Rejected),
                from.is_pre_confirm(),
                "{} -> Rejected",
                from
            );
        }
    }

    #[test]
    fn cancellation_requests_stop_once_work_starts() {
        assert!(DepositPaid.can_transition_to(PendingCancel));
        assert!(!Preparing.can_transition_to(PendingCancel));
        assert!(!InTransit.can_transition_to(Canceled));
        assert!(!FinalPaid.can_transition_to(Canceled));
    }

    #[test]
    fn pending_cancel_returns_to_any_cancellable_status() {
        assert!(PendingCancel.can_transition_to(Canceled));
        assert!(PendingCancel.can_transition_to(Confirm));
        assert!(PendingCancel.can_transition_to(Pending));
        assert!(!PendingCancel.can_transition_to(Preparing));
        assert!(!PendingCancel.can_transition_to(Completed));
        assert!(!PendingCancel.can_transition_to(PendingCancel));
    }

    #[test]
    fn fulfilment_steps() {
        assert_eq!(DepositPaid.next_fulfilment_step(), Some(Preparing));
        assert_eq!(Progressing.next_fulfilment_step(), Some(AllDone));
        assert_eq!(AllDone.next_fulfilment_step(), None);
        assert_eq!(Confirm.next_fulfilment_step(), None);
    }
}
