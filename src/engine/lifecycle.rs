use crate::model::AppointmentStatus;

use super::EngineError;

use AppointmentStatus::*;

/// The status state machine. Everything outside this table is rejected;
/// COMPLETED, CANCELLED and NO_SHOW have no outgoing edges.
pub fn allowed_transitions(from: AppointmentStatus) -> &'static [AppointmentStatus] {
    match from {
        Created => &[Confirmed, Rescheduled, Cancelled],
        Confirmed => &[Reminded, Rescheduled, Cancelled, InProgress, NoShow],
        Reminded => &[Cancelled, InProgress, NoShow],
        InProgress => &[Completed],
        Completed | Cancelled | NoShow => &[],
        // Never a resting state; nothing transitions out of it.
        Rescheduled => &[],
    }
}

pub fn check_transition(
    from: AppointmentStatus,
    to: AppointmentStatus,
) -> Result<(), EngineError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(EngineError::InvalidTransition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_chain() {
        assert!(check_transition(Created, Confirmed).is_ok());
        assert!(check_transition(Confirmed, Reminded).is_ok());
        assert!(check_transition(Reminded, InProgress).is_ok());
        assert!(check_transition(InProgress, Completed).is_ok());
    }

    #[test]
    fn cancel_windows() {
        assert!(check_transition(Created, Cancelled).is_ok());
        assert!(check_transition(Confirmed, Cancelled).is_ok());
        assert!(check_transition(Reminded, Cancelled).is_ok());
        assert!(check_transition(InProgress, Cancelled).is_err());
    }

    #[test]
    fn no_show_requires_confirmation() {
        assert!(check_transition(Confirmed, NoShow).is_ok());
        assert!(check_transition(Reminded, NoShow).is_ok());
        assert!(check_transition(Created, NoShow).is_err());
    }

    #[test]
    fn reschedule_only_before_reminder() {
        assert!(check_transition(Created, Rescheduled).is_ok());
        assert!(check_transition(Confirmed, Rescheduled).is_ok());
        assert!(check_transition(Reminded, Rescheduled).is_err());
        assert!(check_transition(InProgress, Rescheduled).is_err());
    }

    #[test]
    fn remind_only_from_confirmed() {
        assert!(check_transition(Confirmed, Reminded).is_ok());
        assert!(check_transition(Created, Reminded).is_err());
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for terminal in [Completed, Cancelled, NoShow] {
            assert!(allowed_transitions(terminal).is_empty());
        }
    }

    #[test]
    fn error_names_both_states() {
        let err = check_transition(Completed, Cancelled).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("COMPLETED"));
        assert!(msg.contains("CANCELLED"));
    }
}
