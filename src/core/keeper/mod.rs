// src/core/keeper/mod.rs

//! The keeper itself: one instance per managed Postgres node, holding
//! the persisted state, the monitor client, and the local controller,
//! and running the node-active cycle that ties them together.

pub mod service;

use crate::config::Config;
use crate::core::errors::StewardError;
use crate::core::fsm;
use crate::core::monitor::client::{MonitorClient, NodeActiveRequest, RegisterNodeRequest};
use crate::core::postgres::control::{PostgresController, StopMode};
use crate::core::postgres::observe::{self, Observation};
use crate::core::roles::Role;
use crate::core::state::{ExpectedPostgresStatus, InitStage, InitState, KeeperState, StateDir};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// The node kind reported at registration.
const NODE_KIND: &str = "standalone";

pub struct Keeper {
    pub config: Arc<Config>,
    pub state: KeeperState,
    pub expected_pg_status: ExpectedPostgresStatus,
    pub state_dir: StateDir,
    pub monitor: MonitorClient,
    pub postgres: PostgresController,
    pub observation: Observation,
}

impl Keeper {
    /// Connects to the monitor, checks the extension version, and either
    /// resumes from the persisted state or performs the first-time
    /// registration handshake.
    pub async fn bootstrap(config: Arc<Config>) -> Result<Self, StewardError> {
        let state_dir = StateDir::new(&config.state_directory);
        state_dir.ensure_exists()?;

        let postgres =
            PostgresController::new(config.postgres_setup(), config.timeouts.postgres_start);
        let mut monitor = MonitorClient::connect(&config.monitor, &config.formation).await?;
        monitor.ensure_extension_version().await?;

        let mut keeper = match state_dir.load_keeper_state() {
            Ok(state) => {
                info!(
                    "resuming node {} in group {} with role \"{}\"",
                    state.node_id, state.group_id, state.current_role
                );
                Self {
                    config,
                    state,
                    expected_pg_status: state_dir.load_pg_status().unwrap_or_default(),
                    state_dir,
                    monitor,
                    postgres,
                    observation: Observation::default(),
                }
            }
            Err(StewardError::StateMissing) => {
                let mut keeper = Self {
                    config,
                    state: KeeperState::default(),
                    expected_pg_status: ExpectedPostgresStatus::default(),
                    state_dir,
                    monitor,
                    postgres,
                    observation: Observation::default(),
                };
                keeper.register().await?;
                keeper
            }
            // A corrupt or newer-versioned state file while registering
            // for the first time is fatal; the operator must intervene.
            Err(e) => return Err(e),
        };

        keeper.observation = observe::observe(&keeper.postgres).await;
        Ok(keeper)
    }

    /// The first-time registration handshake. The monitor-side
    /// transaction commits only after the local state write succeeds, so
    /// a crash anywhere in here is resolved by the monitor's rollback
    /// and a plain retry of the same command.
    async fn register(&mut self) -> Result<(), StewardError> {
        let stage = self.inspect_data_directory().await;
        self.state_dir.store_init_state(&InitState::new(stage))?;
        info!("registering with the monitor (data directory: {stage})");

        let fingerprint = if matches!(stage, InitStage::Running | InitStage::Primary) {
            Some(observe::control_data(self.postgres.setup()).await?)
        } else {
            None
        };

        let request = RegisterNodeRequest {
            host: self.config.hostname.clone(),
            port: self.config.postgresql.port,
            dbname: self.config.postgresql.dbname.clone(),
            system_identifier: fingerprint.map_or(0, |f| f.system_identifier),
            desired_group_id: self.config.group.unwrap_or(-1),
            desired_node_id: -1,
            desired_node_name: self.config.node_name.clone(),
            initial_role: Role::Init,
            node_kind: NODE_KIND.to_string(),
            candidate_priority: self.config.replication.candidate_priority,
            replication_quorum: self.config.replication.replication_quorum,
        };

        let state_dir = self.state_dir.clone();
        let template = {
            let mut state = KeeperState {
                current_role: Role::Init,
                ..KeeperState::default()
            };
            if let Some(f) = fingerprint {
                state.system_identifier = f.system_identifier;
                state.pg_control_version = f.pg_control_version;
                state.pg_catalog_version = f.catalog_version;
                state.pg_version = f.server_version;
            }
            state
        };
        let assigned = self
            .monitor
            .register_node_with(&request, |assigned| {
                let mut state = template.clone();
                state.node_id = assigned.node_id;
                state.group_id = assigned.group_id;
                state.assigned_role = assigned.assigned_role;
                state.last_monitor_contact = chrono::Utc::now().timestamp();
                state_dir.store_keeper_state(&state)
            })
            .await?;

        info!(
            "registered as node {} in group {}, assigned role \"{}\"",
            assigned.node_id, assigned.group_id, assigned.assigned_role
        );
        self.state = self.state_dir.load_keeper_state()?;
        Ok(())
    }

    async fn inspect_data_directory(&self) -> InitStage {
        if self.postgres.data_directory_is_empty() {
            InitStage::Empty
        } else if !self.postgres.is_running() {
            InitStage::Exists
        } else {
            match observe::accepts_writes(self.postgres.setup()).await {
                Ok(true) => InitStage::Primary,
                Ok(false) => InitStage::Running,
                Err(_) => InitStage::Running,
            }
        }
    }

    /// One node-active cycle: observe, report, follow the assignment,
    /// persist. Returns an error only when the loop must stop.
    pub async fn run_cycle(&mut self) -> Result<(), StewardError> {
        // 1. Refresh the local observation; errors degrade to defaults.
        self.observation = observe::observe(&self.postgres).await;
        self.refresh_fingerprint().await?;

        // 2. Report to the monitor under the service retry policy.
        let request = NodeActiveRequest {
            node_id: self.state.node_id,
            group_id: self.state.group_id,
            current_role: self.state.current_role,
            pg_is_running: self.observation.pg_is_running,
            current_lsn: self.observation.current_lsn,
            timeline: self.observation.timeline,
            sync_state: self.observation.sync_state.clone(),
        };
        let assigned = self.monitor.node_active(&request).await?;
        self.state.last_monitor_contact = chrono::Utc::now().timestamp();

        // 3. The assignment is authoritative, never the persisted copy.
        self.state.assigned_role = assigned.assigned_role;
        self.state.node_id = assigned.node_id;
        self.state.group_id = assigned.group_id;

        // 4./5. Either walk the transition table or reconcile in place.
        let step = if self.state.assigned_role != self.state.current_role {
            fsm::reach_assigned_state(self).await
        } else {
            fsm::reconcile(self).await
        };
        if let Err(e) = step {
            if e.is_fatal_for_loop() {
                return Err(e);
            }
            // The role is not advanced; the next cycle retries.
            error!(
                "failed to reach \"{}\" from \"{}\": {e}",
                self.state.assigned_role, self.state.current_role
            );
        }

        self.update_xlog_lag().await;

        // 6. Persist. Failing to persist after a successful registration
        // is survivable: the in-memory copy remains authoritative.
        if let Err(e) = self.state_dir.store_keeper_state(&self.state) {
            warn!("could not persist keeper state, continuing in memory: {e}");
        }
        if let Err(e) = self.state_dir.store_pg_status(self.expected_pg_status) {
            warn!("could not persist expected postgres status: {e}");
        }
        Ok(())
    }

    /// Folds the cluster fingerprint into the state and fails hard on a
    /// system-identifier change, which means the data directory was
    /// swapped out from under us.
    async fn refresh_fingerprint(&mut self) -> Result<(), StewardError> {
        if !self.observation.pg_is_running {
            return Ok(());
        }
        match observe::control_data(self.postgres.setup()).await {
            Ok(control) => {
                if self.state.system_identifier != 0
                    && control.system_identifier != self.state.system_identifier
                {
                    return Err(StewardError::SystemIdMismatch {
                        on_disk: self.state.system_identifier,
                        observed: control.system_identifier,
                    });
                }
                self.state.system_identifier = control.system_identifier;
                self.state.pg_control_version = control.pg_control_version;
                self.state.pg_catalog_version = control.catalog_version;
                self.state.pg_version = control.server_version;
                Ok(())
            }
            Err(e) => {
                debug!("cluster fingerprint unavailable: {e}");
                Ok(())
            }
        }
    }

    async fn update_xlog_lag(&mut self) {
        self.state.xlog_lag = -1;
        if !self.state.current_role.is_standby_family() || !self.observation.pg_is_running {
            return;
        }
        match self.monitor.get_primary(self.state.group_id).await {
            Ok(Some(primary)) if primary.lsn.is_valid() => {
                self.state.xlog_lag = self.observation.current_lsn.lag_from(primary.lsn);
                self.state.last_peer_contact = chrono::Utc::now().timestamp();
            }
            Ok(_) => {}
            Err(e) => debug!("could not fetch primary position for lag: {e}"),
        }
    }

    pub(crate) async fn ensure_postgres_running(&mut self) -> Result<(), StewardError> {
        self.expected_pg_status = ExpectedPostgresStatus::Running;
        if !self.postgres.is_running() {
            self.postgres.start().await?;
        }
        Ok(())
    }

    pub(crate) async fn ensure_postgres_stopped(&mut self) -> Result<(), StewardError> {
        self.expected_pg_status = ExpectedPostgresStatus::Stopped;
        self.postgres.stop(StopMode::Fast).await
    }
}
