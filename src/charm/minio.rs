// charm/minio.rs - Minio Unit Agent

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn};

use super::event::{Event, EventQueue};
use super::status::{
    BUILDING_CONTEXT, SERVICE_RUNNING, UnitStatus, WAITING_FOR_CERTIFICATES, WAITING_FOR_PEERS,
    WAITING_FOR_RESTART, WAITING_FOR_UPGRADE,
};
use super::{AgentEnv, AgentError};
use crate::cluster::{
    ClusterError, ClusterManager, LocalFacts, NotReadyReason, PEER_RELATION, PeerHealth,
    PeerLossTracker, Readiness, VolumeSet, VolumeSource,
};
use crate::command::{CommandRunner, args};
use crate::convergence::{ArtifactPaths, ArtifactRenderer, ContextInputs, ConvergenceController};
use crate::install::Installer;
use crate::monitoring::{NrpeCheck, PrometheusPublisher};
use crate::object_storage::{ObjectStorageInfo, ObjectStorageProvider};
use crate::observability;
use crate::relation::{LeaderToken, PeerDirectory, keys};
use crate::restart::{
    DirectoryRestartLock, LocalRestartLock, RestartCoordinator, RestartLock, RestartOutcome,
    ServiceManager, SystemdServices,
};
use crate::settings::Settings;
use crate::store::AgentState;
use crate::tls::{CertificateRequest, TlsResolver, TlsState};

/// Services restarted when the configuration changes
const SERVICES: &[&str] = &["minio"];

/// How a handler finished
#[derive(Debug, Clone, PartialEq, Eq)]
enum Flow {
    Done,
    /// Re-deliver the same event later
    Defer,
    /// The event was handled, but `Event` has to run again later
    DeferAs(Event),
}

/// Configuration passes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    /// First pass after installation: restart right away, no lock
    Install,
    Regular,
}

/// Lifecycle management of one Minio unit
pub struct MinioCharm {
    settings: Settings,
    env: AgentEnv,
    runner: Arc<dyn CommandRunner>,
    services: Box<dyn ServiceManager + Send + Sync>,
    installer: Installer,
    renderer: ArtifactRenderer,
    cluster: ClusterManager,
    peer_loss: PeerLossTracker,
    tls: TlsResolver,
    prometheus: PrometheusPublisher,
    object_storage: ObjectStorageProvider,
    /// Used while there is no peer relation to negotiate the lock on
    standalone_lock: LocalRestartLock,
}

impl MinioCharm {
    pub fn new(settings: Settings, env: AgentEnv, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            services: Box::new(SystemdServices::new(runner.clone())),
            installer: Installer::new(runner.clone()),
            renderer: ArtifactRenderer::new(ArtifactPaths::for_settings(&settings)),
            cluster: ClusterManager::new(PEER_RELATION),
            peer_loss: PeerLossTracker::new(PEER_RELATION),
            tls: TlsResolver::default(),
            prometheus: PrometheusPublisher::default(),
            object_storage: ObjectStorageProvider::default(),
            standalone_lock: LocalRestartLock::new(),
            settings,
            env,
            runner,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn env(&self) -> &AgentEnv {
        &self.env
    }

    /// Evaluate one event: deferred events first, then `event`. Events
    /// that cannot complete yet are kept in `state` for the next dispatch.
    pub fn dispatch(
        &self,
        event: Event,
        dir: &mut dyn PeerDirectory,
        state: &mut AgentState,
    ) -> Result<UnitStatus, AgentError> {
        let span = info_span!("dispatch", unit = %self.env.unit, event = event.name());
        let _enter = span.enter();
        let started = Instant::now();

        let mut queue = EventQueue::new(std::mem::take(&mut state.deferred));
        let mut completed = Vec::new();

        for deferred in queue.drain() {
            debug!(
                event = deferred.event.name(),
                attempts = deferred.attempts,
                "Re-delivering deferred event"
            );
            match self.handle(&deferred.event, dir, state) {
                Ok(Flow::Done) => completed.push(deferred.event),
                Ok(Flow::Defer) => queue.requeue(deferred),
                Ok(Flow::DeferAs(next)) => queue.defer(next),
                Err(e) => {
                    error!(event = deferred.event.name(), "Deferred event failed: {}", e);
                    queue.requeue(deferred);
                }
            }
        }

        if completed.contains(&event) {
            debug!("Event already handled through the deferred queue");
        } else {
            match self.handle(&event, dir, state) {
                Ok(Flow::Done) => {}
                Ok(Flow::Defer) => queue.defer(event.clone()),
                Ok(Flow::DeferAs(next)) => queue.defer(next),
                Err(e) => {
                    error!("Evaluation failed: {}", e);
                    state.deferred = queue.into_vec();
                    return Err(e);
                }
            }
        }

        state.deferred = queue.into_vec();
        observability::record_evaluation(event.name(), started.elapsed());
        info!(
            status = %state.status,
            deferred = state.deferred.len(),
            "Evaluation finished"
        );
        Ok(state.status.clone())
    }

    fn handle(
        &self,
        event: &Event,
        dir: &mut dyn PeerDirectory,
        state: &mut AgentState,
    ) -> Result<Flow, AgentError> {
        match event {
            Event::Install => self.on_install(dir, state),
            Event::ConfigChanged | Event::Start | Event::ClusterChanged => {
                self.configure(dir, state, Pass::Regular)
            }
            Event::CertificatesJoined | Event::CertificatesChanged => {
                self.configure(dir, state, Pass::Regular)
            }
            Event::Upgrade => self.on_upgrade(dir, state),
            Event::Stop => self.on_stop(dir, state),
            Event::UpdateStatus => self.on_update_status(dir, state),
            Event::ClusterJoined => self.on_cluster_joined(dir, state),
            Event::ClusterDeparted(unit) => {
                let token = LeaderToken::acquire(dir);
                let ungraceful =
                    self.peer_loss
                        .on_departed(dir, token.as_ref(), &mut state.peer_loss, unit)?;
                if ungraceful {
                    observability::record_peers_gone(self.peer_loss.peers_gone(dir));
                }
                if let Some(token) = &token {
                    if self.cluster.is_established(dir) {
                        DirectoryRestartLock::grant(dir, token, self.cluster.relation())?;
                    }
                }
                self.then_configure(dir, state)
            }
            Event::ClusterBroken => {
                info!("Left the cluster relation");
                self.peer_loss.on_left(&mut state.peer_loss);
                Ok(Flow::Done)
            }
            Event::ObjectStorageJoined | Event::ObjectStorageChanged => {
                self.on_object_storage(dir, state)
            }
            Event::PrometheusJoined => self.on_prometheus_joined(dir, state),
            Event::NrpeAvailable => self.on_nrpe_available(dir),
            Event::Restart => self.on_restart(dir, state),
        }
    }

    /// Configure, re-running as a plain config-changed when it has to wait
    fn then_configure(
        &self,
        dir: &mut dyn PeerDirectory,
        state: &mut AgentState,
    ) -> Result<Flow, AgentError> {
        match self.configure(dir, state, Pass::Regular)? {
            Flow::Defer => Ok(Flow::DeferAs(Event::ConfigChanged)),
            flow => Ok(flow),
        }
    }

    fn on_install(
        &self,
        dir: &mut dyn PeerDirectory,
        state: &mut AgentState,
    ) -> Result<Flow, AgentError> {
        state.status = UnitStatus::maintenance("Installing Minio");
        if let Err(e) = self.installer.provision(&self.settings) {
            error!("Provisioning failed: {}", e);
            state.status = UnitStatus::blocked(format!("Provisioning failed: {}", e));
            return Ok(Flow::Done);
        }
        if !self.install_package(state) {
            return Ok(Flow::Done);
        }
        state.installed = true;

        match self.configure(dir, state, Pass::Install)? {
            Flow::Defer => Ok(Flow::DeferAs(Event::ConfigChanged)),
            flow => Ok(flow),
        }
    }

    fn on_upgrade(
        &self,
        dir: &mut dyn PeerDirectory,
        state: &mut AgentState,
    ) -> Result<Flow, AgentError> {
        state.status = UnitStatus::maintenance("Upgrading Minio");
        if !self.install_package(state) {
            return Ok(Flow::Done);
        }
        // The new binary only runs after a restart
        state.upgrade_restart = true;
        self.then_configure(dir, state)
    }

    /// Install the configured package. Failures are reported through the
    /// unit status and leave the recorded package untouched.
    fn install_package(&self, state: &mut AgentState) -> bool {
        if self.settings.package.is_empty() {
            warn!("No package configured, assuming Minio is installed already");
            return true;
        }
        match self.installer.install_or_upgrade(&self.settings.package) {
            Ok(package) => {
                state.package = package;
                true
            }
            Err(e) => {
                state.status =
                    UnitStatus::blocked(format!("Installation of minio package failed: {}", e));
                false
            }
        }
    }

    fn on_cluster_joined(
        &self,
        dir: &mut dyn PeerDirectory,
        state: &mut AgentState,
    ) -> Result<Flow, AgentError> {
        let token = LeaderToken::acquire(dir);
        self.sync_root_pwd(dir, token.as_ref(), state)?;
        if self.cluster.is_established(dir) {
            self.peer_loss.on_joined(dir, &mut state.peer_loss)?;
        }
        self.configure(dir, state, Pass::Regular)
    }

    fn on_stop(
        &self,
        dir: &mut dyn PeerDirectory,
        state: &mut AgentState,
    ) -> Result<Flow, AgentError> {
        if self.cluster.is_established(dir) {
            info!("Announcing graceful departure");
            self.cluster.set_flag(dir, keys::DEPARTING, true)?;

            let token = LeaderToken::acquire(dir);
            let mut lock = DirectoryRestartLock::new(dir, token.as_ref(), self.cluster.relation());
            lock.release(&self.env.unit)?;
        }
        state.status = UnitStatus::maintenance("Stopping");
        Ok(Flow::Done)
    }

    fn on_update_status(
        &self,
        dir: &mut dyn PeerDirectory,
        state: &mut AgentState,
    ) -> Result<Flow, AgentError> {
        if !state.installed {
            return Ok(Flow::Done);
        }
        if let UnitStatus::Maintenance(message) = &state.status {
            warn!(%message, "update-status called while in maintenance, keeping status");
            return Ok(Flow::Done);
        }

        if let PeerHealth::Degraded { peers_gone } = self.peer_loss.health(dir) {
            observability::record_peers_gone(peers_gone);
            let message = if self.settings.auto_heal {
                self.heal();
                format!("{} peer(s) lost, healing", peers_gone)
            } else {
                format!("{} peer(s) lost", peers_gone)
            };
            state.status = UnitStatus::blocked(message);
            return Ok(Flow::Done);
        }

        let status = self.service_status();
        if !status.is_active() && state.status.is_blocked() {
            warn!(status = %state.status, "update-status called while blocked, keeping status");
            return Ok(Flow::Done);
        }
        state.status = status;
        Ok(Flow::Done)
    }

    fn heal(&self) {
        let alias = self.settings.heal_alias.as_str();
        match self
            .runner
            .run("mc", &args(&["admin", "heal", "--recursive", alias]))
        {
            Ok(_) => info!(alias, "Heal triggered"),
            Err(e) => warn!(alias, "Heal failed: {}", e),
        }
    }

    fn on_object_storage(
        &self,
        dir: &mut dyn PeerDirectory,
        state: &mut AgentState,
    ) -> Result<Flow, AgentError> {
        let token = LeaderToken::acquire(dir);
        if !self.sync_root_pwd(dir, token.as_ref(), state)? {
            debug!("Root password not shared yet, holding object storage details back");
            return Ok(Flow::Defer);
        }

        let tls = self.tls.resolve(&self.settings, dir, &self.env.binding_addr)?;
        let service = if self.settings.service_url.is_empty() {
            self.env.hostname.clone()
        } else {
            self.settings.service_url.clone()
        };
        let details = ObjectStorageInfo {
            access_key: self.settings.minio_root_user.clone(),
            namespace: self.settings.namespace.clone(),
            port: self.settings.minio_service_port,
            secret_key: state.minio_root_pwd.clone(),
            secure: tls.material().is_some(),
            service,
        };
        self.object_storage.send_info(dir, &details)?;
        Ok(Flow::Done)
    }

    fn on_prometheus_joined(
        &self,
        dir: &mut dyn PeerDirectory,
        state: &mut AgentState,
    ) -> Result<Flow, AgentError> {
        let tls = self.tls.resolve(&self.settings, dir, &self.env.binding_addr)?;
        let ca = tls
            .material()
            .filter(|m| m.has_ca())
            .map(|m| m.ca_chain());
        let token = LeaderToken::acquire(dir);
        self.prometheus.publish(
            dir,
            token.as_ref(),
            &self.env.hostname,
            self.settings.prometheus_port,
            &self.settings.prometheus_metrics_path,
            ca.as_deref(),
        )?;
        // Metrics become public, which changes the environment file
        self.then_configure(dir, state)
    }

    fn on_nrpe_available(&self, dir: &mut dyn PeerDirectory) -> Result<Flow, AgentError> {
        let check = NrpeCheck::tcp(
            &self.env.unit,
            &self.env.binding_addr,
            self.settings.minio_service_port,
        );
        let path = check.write(&self.settings.root_dir)?;
        debug!(?path, "Wrote NRPE check");
        check.publish(dir)?;
        Ok(Flow::Done)
    }

    /// Settle the root password: the leader publishes it, followers adopt
    /// the leader's. Returns false while a follower still waits for it.
    fn sync_root_pwd(
        &self,
        dir: &mut dyn PeerDirectory,
        token: Option<&LeaderToken>,
        state: &mut AgentState,
    ) -> Result<bool, AgentError> {
        if !self.cluster.is_established(dir) {
            return Ok(true);
        }
        match token {
            Some(token) => {
                state.minio_root_pwd =
                    self.cluster
                        .ensure_root_pwd(dir, token, &state.minio_root_pwd)?;
                Ok(true)
            }
            None => match self.cluster.root_pwd(dir) {
                Some(pwd) => {
                    state.minio_root_pwd = pwd;
                    Ok(true)
                }
                None => Ok(false),
            },
        }
    }

    fn certificate_request(&self) -> CertificateRequest {
        CertificateRequest::for_unit(&self.env.binding_addr, &self.env.hostname, &self.settings)
    }

    /// The convergence pass behind config-changed and most relation events
    fn configure(
        &self,
        dir: &mut dyn PeerDirectory,
        state: &mut AgentState,
        pass: Pass,
    ) -> Result<Flow, AgentError> {
        if !state.installed {
            debug!("Not installed yet, nothing to configure");
            return Ok(Flow::Done);
        }

        if self.settings.package != state.package {
            if !self.settings.automatic_upgrade {
                state.status = UnitStatus::blocked(WAITING_FOR_UPGRADE);
                return Ok(Flow::Done);
            }
            info!(package = %self.settings.package, "Package changed, upgrading");
            if !self.install_package(state) {
                return Ok(Flow::Done);
            }
            state.upgrade_restart = true;
        }

        let token = LeaderToken::acquire(dir);
        let request = self.certificate_request();
        if self.tls.is_related(dir) {
            self.tls.request_certificate(dir, &request)?;
        }
        let tls = self.tls.resolve(&self.settings, dir, &self.env.binding_addr)?;

        let url = format!(
            "{}://{}:{}",
            tls.scheme(),
            self.env.hostname,
            self.settings.minio_service_port
        );
        let folders = state.disks.used_folders(self.env.storage_count);
        let local_disks = folders.len() as u32;
        let clustered = self.cluster.is_established(dir);

        if clustered {
            let facts = LocalFacts {
                num_disks: local_disks,
                url: url.clone(),
                used_folders: folders.clone(),
                sans: request.sans.clone(),
            };
            self.cluster.publish_local(dir, &facts)?;
            self.track_peer_loss(dir, token.as_ref(), state)?;
        }
        let pwd_shared = self.sync_root_pwd(dir, token.as_ref(), state)?;

        if self.settings.is_clustered() {
            if let Some(flow) = self.check_readiness(dir, state, local_disks) {
                return Ok(flow);
            }
        }
        if !pwd_shared {
            state.status = UnitStatus::waiting("Waiting for leader to share the root password");
            return Ok(Flow::Defer);
        }

        if let TlsState::Pending(reason) = &tls {
            info!(%reason, "Waiting for certificates");
            state.status = UnitStatus::blocked(WAITING_FOR_CERTIFICATES);
            return Ok(Flow::Defer);
        }

        let volumes = if clustered {
            match self
                .cluster
                .resolve_volumes(dir, token.as_ref(), &url, &folders)
            {
                Ok(VolumeSource::Authoritative(volumes)) => volumes,
                Ok(VolumeSource::Pending) => {
                    state.status = UnitStatus::waiting("Waiting for leader to publish volumes");
                    return Ok(Flow::Defer);
                }
                Err(e @ ClusterError::DuplicateEndpoint(_)) => {
                    warn!("{}", e);
                    state.status = UnitStatus::blocked(e.to_string());
                    return Ok(Flow::Done);
                }
                Err(e) => return Err(e.into()),
            }
        } else {
            VolumeSet::standalone(&folders)
        };
        if volumes.is_empty() {
            state.status = UnitStatus::blocked("No storage attached");
            return Ok(Flow::Done);
        }
        if clustered && !volumes.bootstrap_is_local(&url) {
            debug!(first = ?volumes.first(), "Bootstrap volume belongs to another unit");
        }

        if clustered {
            if let Some(token) = &token {
                DirectoryRestartLock::grant(dir, token, self.cluster.relation())?;
            }
        }
        self.sync_port(state);

        let mut controller = ConvergenceController::new(state.last_applied_context.clone());
        let context = controller.build_context(&ContextInputs {
            settings: &self.settings,
            volumes: &volumes,
            root_password: &state.minio_root_pwd,
            prometheus_related: self.prometheus.is_related(dir),
            tls: tls.material(),
        });
        debug!(fingerprint = %context.fingerprint()?, volumes = volumes.len(), "Built context");

        if pass == Pass::Install {
            self.renderer.render(&context)?;
            let restarted = self.services.reload().and_then(|_| {
                SERVICES
                    .iter()
                    .try_for_each(|service| self.services.restart(service))
            });
            return match restarted {
                Ok(()) => {
                    state.last_applied_context = controller.commit(&context)?.to_string();
                    state.need_restart = false;
                    state.upgrade_restart = false;
                    state.status = UnitStatus::active(SERVICE_RUNNING);
                    Ok(Flow::Done)
                }
                Err(e) => {
                    // Nothing committed: the next pass sees the diff and retries
                    error!("Initial start failed: {}", e);
                    state.status = UnitStatus::blocked(format!("Restart failed: {}", e));
                    Ok(Flow::Done)
                }
            };
        }

        state.status = UnitStatus::maintenance(BUILDING_CONTEXT);
        if state.upgrade_restart || controller.needs_restart(&context)? {
            self.renderer.render(&context)?;
            let mut coordinator = RestartCoordinator::new(state.pending_restart.take());
            let queued = coordinator.request(context, services());
            state.pending_restart = coordinator.into_pending();
            queued?;
            state.need_restart = state.pending_restart.is_some();
            state.status = UnitStatus::blocked(WAITING_FOR_RESTART);
            return self.on_restart(dir, state);
        }

        let mut coordinator = RestartCoordinator::new(state.pending_restart.take());
        let withdrawn = coordinator.withdraw();
        state.pending_restart = coordinator.into_pending();
        state.need_restart = false;
        if withdrawn? {
            // Files on disk may still carry the abandoned context
            self.renderer.render(&context)?;
            if clustered {
                let mut lock =
                    DirectoryRestartLock::new(dir, token.as_ref(), self.cluster.relation());
                lock.release(&self.env.unit)?;
            } else {
                self.standalone_lock.clone().release(&self.env.unit)?;
            }
        }
        state.status = self.service_status();
        Ok(Flow::Done)
    }

    fn track_peer_loss(
        &self,
        dir: &mut dyn PeerDirectory,
        token: Option<&LeaderToken>,
        state: &mut AgentState,
    ) -> Result<(), AgentError> {
        let peers = self.cluster.membership(dir, 0).peers();
        self.peer_loss.observe(&mut state.peer_loss, &peers);
        self.peer_loss.on_joined(dir, &mut state.peer_loss)?;
        if let Some(token) = token {
            self.peer_loss
                .reconcile_acks(dir, token, &mut state.peer_loss, &peers)?;
        }
        self.peer_loss.clear_ack_if_healed(dir)?;
        observability::record_peers_gone(self.peer_loss.peers_gone(dir));
        Ok(())
    }

    /// Returns the flow to end the pass with when the cluster is not ready
    fn check_readiness(
        &self,
        dir: &dyn PeerDirectory,
        state: &mut AgentState,
        local_disks: u32,
    ) -> Option<Flow> {
        let membership = self.cluster.membership(dir, local_disks);
        let readiness = membership.readiness(self.settings.min_units, self.settings.min_disks);
        observability::record_readiness(
            membership.unit_count(),
            membership.total_disks(),
            readiness.is_ready(),
        );

        match readiness {
            Readiness::Ready { units, total_disks } => {
                debug!(units, total_disks, "Cluster ready");
                None
            }
            Readiness::NotReady(reason) => {
                info!(%reason, "Cluster not ready");
                state.status = match reason {
                    NotReadyReason::WaitingForDisks { .. } => {
                        UnitStatus::blocked(format!("Waiting for disks: {}", reason))
                    }
                    _ => UnitStatus::blocked(WAITING_FOR_PEERS),
                };
                Some(Flow::Defer)
            }
            Readiness::InvariantViolation { total_disks } => {
                // Only an operator change can fix this, so nothing is deferred
                let e = ClusterError::DiskCountInvariantViolation(total_disks);
                warn!("{}", e);
                state.status = UnitStatus::blocked(e.to_string());
                Some(Flow::Done)
            }
        }
    }

    /// Open the service port, closing a previously opened one
    fn sync_port(&self, state: &mut AgentState) {
        let port = self.settings.minio_service_port;
        if state.port == Some(port) {
            return;
        }
        if let Some(old) = state.port {
            if let Err(e) = self.runner.run("close-port", &[format!("{}/tcp", old)]) {
                warn!(port = old, "Failed to close port: {}", e);
            }
        }
        match self.runner.run("open-port", &[format!("{}/tcp", port)]) {
            Ok(_) => state.port = Some(port),
            Err(e) => warn!(port, "Failed to open port: {}", e),
        }
    }

    fn on_restart(
        &self,
        dir: &mut dyn PeerDirectory,
        state: &mut AgentState,
    ) -> Result<Flow, AgentError> {
        let mut coordinator = RestartCoordinator::new(state.pending_restart.take());
        let mut controller = ConvergenceController::new(state.last_applied_context.clone());
        let unit = self.env.unit.clone();

        let result = if self.cluster.is_established(dir) {
            let token = LeaderToken::acquire(dir);
            let mut lock = DirectoryRestartLock::new(dir, token.as_ref(), self.cluster.relation());
            coordinator.drive(&unit, &mut lock, &*self.services, &mut controller)
        } else {
            let mut lock = self.standalone_lock.clone();
            coordinator.drive(&unit, &mut lock, &*self.services, &mut controller)
        };

        state.pending_restart = coordinator.into_pending();
        state.need_restart = state.pending_restart.is_some();
        state.last_applied_context = controller.last_applied().to_string();

        match result? {
            RestartOutcome::NothingPending => Ok(Flow::Done),
            RestartOutcome::Deferred => {
                state.status = UnitStatus::blocked(WAITING_FOR_RESTART);
                Ok(Flow::DeferAs(Event::Restart))
            }
            RestartOutcome::Committed => {
                state.upgrade_restart = false;
                state.status = self.service_status();
                Ok(Flow::Done)
            }
            RestartOutcome::Failed(reason) => {
                state.status = UnitStatus::blocked(format!("Restart failed: {}", reason));
                Ok(Flow::DeferAs(Event::Restart))
            }
        }
    }

    fn service_status(&self) -> UnitStatus {
        let stopped: Vec<&str> = SERVICES
            .iter()
            .copied()
            .filter(|service| !self.services.is_running(service))
            .collect();
        if stopped.is_empty() {
            UnitStatus::active(SERVICE_RUNNING)
        } else {
            UnitStatus::blocked(format!(
                "Services not running that should be: {}",
                stopped.join(",")
            ))
        }
    }
}

fn services() -> Vec<String> {
    SERVICES.iter().map(|s| s.to_string()).collect()
}
