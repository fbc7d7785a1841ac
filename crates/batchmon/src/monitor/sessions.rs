use chrono::Utc;

use crate::monitor::{CycleReport, MonitorError};
use crate::session::{SessionCloser, SessionError};

fn escalate(error: SessionError) -> Result<SessionError, MonitorError> {
    match error {
        SessionError::Fatal(message) => Err(MonitorError::Fatal(message)),
        error => Ok(error),
    }
}

/// Closes every session whose idle time exceeded its timeout.
pub(super) fn check_sessions(
    closer: &dyn SessionCloser,
    report: &mut CycleReport,
) -> Result<(), MonitorError> {
    let expired = match closer.list_expired_sessions(Utc::now()) {
        Ok(expired) => expired,
        Err(error) => {
            let error = escalate(error)?;
            log::error!("Cannot list expired sessions: {error}");
            return Ok(());
        }
    };
    for id in expired {
        match closer.close_session(&id) {
            Ok(()) => {
                log::debug!("Session {id} closed after its timeout");
                report.sessions_closed += 1;
            }
            Err(error) => {
                let error = escalate(error)?;
                log::error!("Cannot close session {id}: {error}");
                report.sessions_failed += 1;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::check_sessions;
    use crate::monitor::{CycleReport, MonitorError};
    use crate::session::SessionError;
    use crate::tests::utils::FakeSessionCloser;
    use batchcore::SessionId;

    #[test]
    fn close_expired() {
        let closer = FakeSessionCloser::new(vec!["S1", "S2"]);
        let mut report = CycleReport::default();
        check_sessions(&closer, &mut report).unwrap();
        assert_eq!(report.sessions_closed, 2);
        assert_eq!(
            closer.closed(),
            vec![SessionId::new("S1"), SessionId::new("S2")]
        );
    }

    #[test]
    fn recoverable_failure_is_isolated() {
        let closer = FakeSessionCloser::new(vec!["S1", "S2", "S3"]).fail_on("S2", || {
            SessionError::Recoverable("session is locked".to_string())
        });
        let mut report = CycleReport::default();
        check_sessions(&closer, &mut report).unwrap();
        assert_eq!(report.sessions_closed, 2);
        assert_eq!(report.sessions_failed, 1);
        assert_eq!(
            closer.closed(),
            vec![SessionId::new("S1"), SessionId::new("S3")]
        );
    }

    #[test]
    fn fatal_failure_ends_the_check() {
        let closer = FakeSessionCloser::new(vec!["S1", "S2"]).fail_on("S1", || {
            SessionError::Fatal("authentication subsystem is down".to_string())
        });
        let mut report = CycleReport::default();
        assert!(matches!(
            check_sessions(&closer, &mut report),
            Err(MonitorError::Fatal(_))
        ));
        assert!(closer.closed().is_empty());
    }
}
