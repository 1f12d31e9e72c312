//! Counting client sessions attached to the running engine.

use serde::Serialize;

use crate::constants::CLIENT_APP_NAME_PREFIX;
use crate::db::{own_application_name, ConnectParams, Database};
use crate::error::{ConduitError, Result};

/// External sessions, split by whether this application opened them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClientCount {
    pub conduit: i64,
    pub other: i64,
}

impl ClientCount {
    /// Tallies `(application_name, sessions)` pairs.
    pub fn tally(sessions: &[(String, i64)]) -> Self {
        sessions
            .iter()
            .fold(Self::default(), |mut count, (app_name, sessions)| {
                if app_name.starts_with(CLIENT_APP_NAME_PREFIX) {
                    count.conduit += sessions;
                } else {
                    count.other += sessions;
                }
                count
            })
    }

    pub fn total(&self) -> i64 {
        self.conduit + self.other
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Counts the sessions attached to the engine at `params`, excluding the one
/// used to ask.
pub async fn count_external_clients(params: ConnectParams) -> Result<ClientCount> {
    tokio::task::spawn_blocking(move || {
        let own = own_application_name();
        let mut db = Database::connect(&ConnectParams {
            application_name: own.clone(),
            ..params
        })?;
        let sessions = db.client_sessions(&own)?;
        Ok(ClientCount::tally(&sessions))
    })
    .await
    .map_err(ConduitError::join)?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tally_splits_by_prefix() {
        let sessions = vec![
            ("conduit_client_123".to_string(), 2),
            ("conduit_query".to_string(), 1),
            ("psql".to_string(), 3),
            (String::new(), 1),
        ];
        let count = ClientCount::tally(&sessions);
        assert_eq!(count, ClientCount { conduit: 3, other: 4 });
        assert_eq!(count.total(), 7);
        assert!(ClientCount::tally(&[]).is_empty());
    }
}
