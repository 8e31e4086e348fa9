use tracing::info;

use super::{not_found, Scheduler};
use crate::auth::Identity;
use crate::database;
use crate::error::BookingError;
use crate::models::{AppointmentDetails, AppointmentStatus};

impl Scheduler {
    /// Moves a scheduled appointment to `completed` or `cancelled`.
    ///
    /// Terminal appointments are never touched again: a repeated or
    /// different transition on them fails with `InvalidState`. Users may
    /// only cancel appointments they own; staff and admins may apply
    /// either transition to any appointment.
    pub async fn transition(
        &self,
        actor: &Identity,
        appointment_id: &str,
        target: AppointmentStatus,
    ) -> Result<AppointmentDetails, BookingError> {
        if target == AppointmentStatus::Scheduled {
            return Err(BookingError::validation(
                "status",
                "status must be 'completed' or 'cancelled'",
            ));
        }

        let current = database::find_appointment(self.pool(), appointment_id)
            .await?
            .ok_or_else(|| not_found(appointment_id))?;

        if !actor.role.is_privileged() {
            if current.user_id != actor.user_id {
                return Err(BookingError::Forbidden(
                    "You can only change your own appointments".into(),
                ));
            }
            if target != AppointmentStatus::Cancelled {
                return Err(BookingError::Forbidden(
                    "Only staff can mark an appointment as completed".into(),
                ));
            }
        }

        if current.status.is_terminal() {
            return Err(already_terminal(current.status));
        }

        if !database::advance_status(self.pool(), appointment_id, target).await? {
            // Lost to a concurrent transition between the read and the update.
            let status = database::find_appointment(self.pool(), appointment_id)
                .await?
                .map(|a| a.status)
                .unwrap_or(target);
            return Err(already_terminal(status));
        }

        info!(
            appointment_id,
            actor = %actor.user_id,
            from = %current.status,
            to = %target,
            "appointment status changed"
        );

        database::appointment_details(self.pool(), appointment_id)
            .await?
            .ok_or_else(|| not_found(appointment_id))
    }
}

fn already_terminal(status: AppointmentStatus) -> BookingError {
    BookingError::InvalidState(format!("appointment is already {status}"))
}
