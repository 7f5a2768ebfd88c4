use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tokio::fs;

use crate::utils::{P2PError, Result};

/// `host:port` pair naming a peer. Compared by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerIdentity {
    pub host: String,
    pub port: u16,
}

impl PeerIdentity {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for PeerIdentity {
    type Err = P2PError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || P2PError::ConfigError(format!("Invalid address:port '{}'", s));

        let (host, port) = s.split_once(':').ok_or_else(invalid)?;
        if host.is_empty() || port.contains(':') || host.chars().any(char::is_whitespace) {
            return Err(invalid());
        }
        if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;

        Ok(Self::new(host, port))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeerState {
    Online,
    Offline,
}

impl PeerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerState::Online => "ONLINE",
            PeerState::Offline => "OFFLINE",
        }
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PeerState {
    type Err = P2PError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ONLINE" => Ok(PeerState::Online),
            "OFFLINE" => Ok(PeerState::Offline),
            other => Err(P2PError::InvalidPayload(format!(
                "Unknown peer state '{}'",
                other
            ))),
        }
    }
}

/// Local belief about one remote peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub identity: PeerIdentity,
    pub state: PeerState,
    pub last_known_clock: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Ignored,
}

/// Known peers in insertion order. Records are never removed; a peer that
/// leaves stays around as OFFLINE so its clock keeps winning tie-breaks.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    records: Vec<PeerRecord>,
    index: HashMap<PeerIdentity, usize>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a neighbors file: one `host:port` per line, blank lines ignored.
    pub async fn from_neighbors_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).await.map_err(|e| {
            P2PError::ConfigError(format!(
                "Failed to read neighbors file {}: {}",
                path.display(),
                e
            ))
        })?;

        let mut registry = Self::new();
        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let identity: PeerIdentity = line.parse().map_err(|_| {
                P2PError::ConfigError(format!(
                    "{}:{}: invalid neighbor '{}'",
                    path.display(),
                    line_no + 1,
                    line
                ))
            })?;

            if registry.seed(identity.clone()) {
                info!("Adding new peer {} status {}", identity, PeerState::Offline);
            }
        }

        Ok(registry)
    }

    /// Insert `{OFFLINE, 0}` unless the peer is already known.
    pub fn seed(&mut self, identity: PeerIdentity) -> bool {
        if self.index.contains_key(&identity) {
            return false;
        }
        self.insert(identity, PeerState::Offline, 0);
        true
    }

    /// Gossip merge rule: a known record only changes when `clock` is
    /// strictly newer than what we already hold.
    pub fn upsert(&mut self, identity: PeerIdentity, state: PeerState, clock: u64) -> UpsertOutcome {
        match self.index.get(&identity) {
            None => {
                info!("Adding new peer {} status {}", identity, state);
                self.insert(identity, state, clock);
                UpsertOutcome::Inserted
            }
            Some(&pos) => {
                let record = &mut self.records[pos];
                if clock > record.last_known_clock {
                    record.state = state;
                    record.last_known_clock = clock;
                    info!("Updating peer {} status {}", record.identity, state);
                    UpsertOutcome::Updated
                } else {
                    debug!(
                        "Ignoring stale record for {} (clock {} <= {})",
                        record.identity, clock, record.last_known_clock
                    );
                    UpsertOutcome::Ignored
                }
            }
        }
    }

    /// First-hand contact with the peer itself. The state is taken as-is and
    /// the clock only moves forward.
    pub fn observe(&mut self, identity: PeerIdentity, state: PeerState, clock: u64) {
        match self.index.get(&identity) {
            None => {
                info!("Adding new peer {} status {}", identity, state);
                self.insert(identity, state, clock);
            }
            Some(&pos) => {
                let record = &mut self.records[pos];
                record.last_known_clock = record.last_known_clock.max(clock);
                if record.state != state {
                    info!("Updating peer {} status {}", record.identity, state);
                }
                record.state = state;
            }
        }
    }

    /// Liveness verdict from an outbound call; carries no clock.
    pub fn mark(&mut self, identity: &PeerIdentity, state: PeerState) {
        match self.index.get(identity) {
            None => {
                info!("Adding new peer {} status {}", identity, state);
                self.insert(identity.clone(), state, 0);
            }
            Some(&pos) => {
                let record = &mut self.records[pos];
                if record.state != state {
                    info!("Updating peer {} status {}", record.identity, state);
                }
                record.state = state;
            }
        }
    }

    pub fn find(&self, identity: &PeerIdentity) -> Option<&PeerRecord> {
        self.index.get(identity).map(|&pos| &self.records[pos])
    }

    pub fn list(&self) -> Vec<PeerRecord> {
        self.records.clone()
    }

    pub fn identities(&self) -> Vec<PeerIdentity> {
        self.records.iter().map(|r| r.identity.clone()).collect()
    }

    pub fn online(&self) -> Vec<PeerIdentity> {
        self.records
            .iter()
            .filter(|r| r.state == PeerState::Online)
            .map(|r| r.identity.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn insert(&mut self, identity: PeerIdentity, state: PeerState, clock: u64) {
        self.index.insert(identity.clone(), self.records.len());
        self.records.push(PeerRecord {
            identity,
            state,
            last_known_clock: clock,
        });
    }
}
