// charm/event.rs - Events and Deferral Queue

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;
use tracing::debug;

use crate::observability;
use crate::relation::UnitId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    #[error("Unknown hook: {0}")]
    UnknownHook(String),

    #[error("Hook {0} needs the remote unit")]
    MissingRemoteUnit(String),
}

/// Everything the agent reacts to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    Install,
    ConfigChanged,
    /// Operator-triggered package upgrade
    Upgrade,
    Start,
    Stop,
    UpdateStatus,
    ClusterJoined,
    ClusterChanged,
    ClusterDeparted(UnitId),
    /// The local unit left the peer relation
    ClusterBroken,
    CertificatesJoined,
    CertificatesChanged,
    ObjectStorageJoined,
    ObjectStorageChanged,
    PrometheusJoined,
    NrpeAvailable,
    /// Apply a pending restart
    Restart,
}

impl Event {
    /// Parse a hook name. Departure hooks need the unit that left.
    pub fn from_hook(hook: &str, remote_unit: Option<&str>) -> Result<Self, EventError> {
        let event = match hook {
            "install" => Event::Install,
            "config-changed" => Event::ConfigChanged,
            "upgrade" => Event::Upgrade,
            "start" => Event::Start,
            "stop" => Event::Stop,
            "update-status" => Event::UpdateStatus,
            "cluster-relation-joined" => Event::ClusterJoined,
            "cluster-relation-changed" => Event::ClusterChanged,
            "cluster-relation-departed" => {
                let unit =
                    remote_unit.ok_or_else(|| EventError::MissingRemoteUnit(hook.to_string()))?;
                Event::ClusterDeparted(UnitId::from(unit))
            }
            "cluster-relation-broken" => Event::ClusterBroken,
            "certificates-relation-joined" => Event::CertificatesJoined,
            "certificates-relation-changed" => Event::CertificatesChanged,
            "object-storage-relation-joined" => Event::ObjectStorageJoined,
            "object-storage-relation-changed" => Event::ObjectStorageChanged,
            "prometheus-manual-relation-joined" => Event::PrometheusJoined,
            "nrpe-external-master-relation-joined" | "nrpe-available" => Event::NrpeAvailable,
            "restart" => Event::Restart,
            other => return Err(EventError::UnknownHook(other.to_string())),
        };
        Ok(event)
    }

    /// Hook name, also used as metrics label
    pub fn name(&self) -> &'static str {
        match self {
            Event::Install => "install",
            Event::ConfigChanged => "config-changed",
            Event::Upgrade => "upgrade",
            Event::Start => "start",
            Event::Stop => "stop",
            Event::UpdateStatus => "update-status",
            Event::ClusterJoined => "cluster-relation-joined",
            Event::ClusterChanged => "cluster-relation-changed",
            Event::ClusterDeparted(_) => "cluster-relation-departed",
            Event::ClusterBroken => "cluster-relation-broken",
            Event::CertificatesJoined => "certificates-relation-joined",
            Event::CertificatesChanged => "certificates-relation-changed",
            Event::ObjectStorageJoined => "object-storage-relation-joined",
            Event::ObjectStorageChanged => "object-storage-relation-changed",
            Event::PrometheusJoined => "prometheus-manual-relation-joined",
            Event::NrpeAvailable => "nrpe-available",
            Event::Restart => "restart",
        }
    }
}

/// An event waiting for re-delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredEvent {
    pub event: Event,
    /// Deliveries that ended deferred
    pub attempts: u32,
    pub first_deferred_at: DateTime<Utc>,
}

/// FIFO of deferred events. An event is queued at most once; deferring it
/// again only bumps its attempt count.
#[derive(Debug, Clone, Default)]
pub struct EventQueue {
    events: VecDeque<DeferredEvent>,
}

impl EventQueue {
    /// Resume from persisted state
    pub fn new(events: Vec<DeferredEvent>) -> Self {
        Self {
            events: events.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn contains(&self, event: &Event) -> bool {
        self.events.iter().any(|d| &d.event == event)
    }

    /// Queue `event` for a later delivery
    pub fn defer(&mut self, event: Event) {
        observability::record_deferred(event.name());
        match self.events.iter_mut().find(|d| d.event == event) {
            Some(existing) => {
                existing.attempts += 1;
                debug!(event = event.name(), attempts = existing.attempts, "Event deferred again");
            }
            None => {
                debug!(event = event.name(), "Event deferred");
                self.events.push_back(DeferredEvent {
                    event,
                    attempts: 1,
                    first_deferred_at: Utc::now(),
                });
            }
        }
    }

    /// Put a re-delivered event back, keeping its history
    pub fn requeue(&mut self, mut deferred: DeferredEvent) {
        observability::record_deferred(deferred.event.name());
        match self.events.iter_mut().find(|d| d.event == deferred.event) {
            Some(existing) => existing.attempts = existing.attempts.max(deferred.attempts + 1),
            None => {
                deferred.attempts += 1;
                self.events.push_back(deferred);
            }
        }
    }

    /// Take every queued event, oldest first
    pub fn drain(&mut self) -> Vec<DeferredEvent> {
        self.events.drain(..).collect()
    }

    pub fn into_vec(self) -> Vec<DeferredEvent> {
        self.events.into()
    }
}
