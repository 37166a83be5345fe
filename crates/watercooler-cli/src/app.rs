//! Headless participant: join, report roster changes, leave on Ctrl-C

use std::sync::Arc;

use tracing::{info, warn};

use watercooler_core::{Participant, Roster};
use watercooler_runtime::RemoteConnection;
use watercooler_webrtc::WebRtcPeerConnectionFactory;
use watercooler_websocket::WebSocketTransport;

use crate::config::AppConfig;
use crate::error::Result;

/// One observed difference between two roster snapshots
#[derive(Debug, Clone, PartialEq)]
pub enum RosterChange {
    Joined(Participant),
    Left(Participant),
    Updated(Participant),
}

/// Differences from `previous` to `current`, in participant order
pub fn roster_changes(previous: &Roster, current: &Roster) -> Vec<RosterChange> {
    let mut changes: Vec<RosterChange> = previous
        .iter()
        .filter(|p| !current.contains(&p.id))
        .cloned()
        .map(RosterChange::Left)
        .collect();
    for participant in current.iter() {
        match previous.get(&participant.id) {
            None => changes.push(RosterChange::Joined(participant.clone())),
            Some(before) if before != participant => changes.push(RosterChange::Updated(participant.clone())),
            Some(_) => {}
        }
    }
    changes
}

fn report(change: &RosterChange) {
    match change {
        RosterChange::Joined(p) => info!(participant = %p.id, "Participant joined"),
        RosterChange::Left(p) => info!(participant = %p.id, "Participant left"),
        RosterChange::Updated(p) => {
            let streams: Vec<&str> = p.streams.iter().map(|s| s.id.as_str()).collect();
            info!(
                participant = %p.id,
                phase = ?p.phase,
                link = ?p.link,
                position = ?p.position(),
                ?streams,
                "Participant updated"
            );
            if let Some(error) = &p.error {
                warn!(participant = %p.id, "Negotiation failed: {}", error);
            }
        }
    }
}

/// Run until Ctrl-C, then stop the connection
pub async fn run_join(config: AppConfig) -> Result<()> {
    let transport = Arc::new(WebSocketTransport::new(config.connection.reconnect.clone()));
    let factory = Arc::new(WebRtcPeerConnectionFactory::new(&config.connection.ice_servers)?);

    let mut connection = RemoteConnection::builder(transport, factory)
        .with_config(config.connection.clone())
        .with_sampler(Arc::new(config.participant.sampler()))
        .build_and_start()
        .await?;
    info!(url = %config.connection.signaling_url, "Joined; press Ctrl-C to leave");

    let mut self_id = connection.subscribe_self_id();
    let mut roster = connection.subscribe_roster();
    let mut previous = roster.borrow_and_update().clone();
    let mut full_reported = false;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                }
                break;
            }
            changed = self_id.changed() => {
                if changed.is_err() {
                    break;
                }
                match self_id.borrow_and_update().clone() {
                    Some(id) => info!(%id, "Assigned participant id"),
                    None if connection.max_participants_reached() && !full_reported => {
                        warn!("Room is full");
                        full_reported = true;
                    }
                    None => {}
                }
            }
            changed = roster.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = roster.borrow_and_update().clone();
                for change in roster_changes(&previous, &current) {
                    report(&change);
                }
                previous = current;
            }
        }
    }

    info!("Leaving");
    connection.stop().await?;
    Ok(())
}

pub fn print_config(config: &AppConfig) -> Result<()> {
    print!("{}", config.to_toml()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use watercooler_core::{ParticipantId, ParticipantUpdate, RosterStore, SessionPhase};

    fn id(value: &str) -> ParticipantId {
        ParticipantId::from(value)
    }

    #[test]
    fn test_changes_between_snapshots() {
        let store = RosterStore::new();
        store.add_participant(id("b"));
        store.add_participant(id("c"));
        let before = store.snapshot();

        store.remove_participant(&id("b"));
        store.update_participant(&id("c"), ParticipantUpdate::new().phase(SessionPhase::Connected));
        store.add_participant(id("d"));
        let after = store.snapshot();

        let changes = roster_changes(&before, &after);
        assert_eq!(changes.len(), 3);
        assert!(matches!(&changes[0], RosterChange::Left(p) if p.id == id("b")));
        assert!(matches!(&changes[1], RosterChange::Updated(p) if p.phase == SessionPhase::Connected));
        assert!(matches!(&changes[2], RosterChange::Joined(p) if p.id == id("d")));
    }

    #[test]
    fn test_identical_snapshots_have_no_changes() {
        let store = RosterStore::new();
        store.add_participant(id("b"));
        let snapshot = store.snapshot();
        assert!(roster_changes(&snapshot, &store.snapshot()).is_empty());
    }
}
