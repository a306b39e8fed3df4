// src/core/fsm/actions.rs

//! The transition actions referenced by the table. Every action is
//! idempotent and restartable: running one twice, or crashing in the
//! middle and running it again, converges on the same database state.

use crate::core::errors::StewardError;
use crate::core::keeper::Keeper;
use crate::core::monitor::protocol::NodeAddress;
use crate::core::postgres::standby::{self, StandbyInitMode};
use crate::core::postgres::{certs, hba, observe, syncrep};
use std::time::Duration;
use strum_macros::Display;
use tracing::{debug, info, warn};

/// The closed set of actions a transition row may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum TransitionAction {
    InitAsSingle,
    ReportLsn,
    PrepareReplication,
    EnableSyncRep,
    DisableSyncRep,
    ApplySettings,
    InitStandby,
    PreparePromotion,
    FastForward,
    StopReplication,
    PromoteStandby,
    FollowNewPrimary,
    EnsurePostgresRunning,
    StopPostgres,
    StartMaintenance,
    DisableReplication,
    DropNode,
}

impl Keeper {
    pub(crate) async fn run_action(&mut self, action: TransitionAction) -> Result<(), StewardError> {
        debug!("running transition action \"{action}\"");
        match action {
            TransitionAction::InitAsSingle => self.init_as_single().await,
            TransitionAction::ReportLsn => self.report_lsn().await,
            TransitionAction::PrepareReplication => self.prepare_replication().await,
            TransitionAction::EnableSyncRep => self.enable_sync_rep().await,
            TransitionAction::DisableSyncRep => self.disable_sync_rep().await,
            TransitionAction::ApplySettings => self.apply_settings().await,
            TransitionAction::InitStandby => self.init_standby().await,
            TransitionAction::PreparePromotion => self.prepare_promotion().await,
            TransitionAction::FastForward => self.fast_forward().await,
            TransitionAction::StopReplication => self.stop_replication().await,
            TransitionAction::PromoteStandby => self.promote_standby().await,
            TransitionAction::FollowNewPrimary => self.follow_new_primary().await,
            TransitionAction::EnsurePostgresRunning => self.ensure_postgres_running().await,
            TransitionAction::StopPostgres => self.ensure_postgres_stopped().await,
            TransitionAction::StartMaintenance => self.start_maintenance().await,
            TransitionAction::DisableReplication => self.disable_replication().await,
            TransitionAction::DropNode => self.drop_node().await,
        }
    }

    /// `init -> single`: create the cluster if needed and bring it up
    /// writable. The `init` record makes a restarted initialization
    /// idempotent: an existing directory is adopted, never re-created.
    async fn init_as_single(&mut self) -> Result<(), StewardError> {
        if !self.postgres.data_directory_exists() {
            self.postgres.initdb().await?;
        }
        if self.config.ssl.self_signed {
            certs::create_self_signed_cert(
                &self.config.postgresql.pgdata,
                &self.config.hostname,
            )
            .await?;
        }
        self.ensure_hba(&[]).await?;
        standby::remove_standby_signal(self.postgres.setup())?;
        self.ensure_postgres_running().await?;
        self.confirm_writes_accepted().await?;
        self.state_dir.remove_init_state()?;
        Ok(())
    }

    /// Keep the instance up so the monitor can read its replay position
    /// through the next `node_active` report.
    async fn report_lsn(&mut self) -> Result<(), StewardError> {
        self.ensure_postgres_running().await
    }

    /// Open replication access for the peers the monitor knows about.
    async fn prepare_replication(&mut self) -> Result<(), StewardError> {
        let peers = self.monitor.get_other_nodes(self.state.node_id).await?;
        let hosts: Vec<String> = peers.iter().map(|peer| peer.host.clone()).collect();
        self.ensure_hba(&hosts).await?;
        self.ensure_postgres_running().await
    }

    /// Install the monitor-computed `synchronous_standby_names`.
    async fn enable_sync_rep(&mut self) -> Result<(), StewardError> {
        self.ensure_postgres_running().await?;
        let sslist = self
            .monitor
            .synchronous_standby_names(self.state.group_id)
            .await?;
        if sslist.is_empty() {
            syncrep::disable_synchronous_replication(&self.postgres).await
        } else {
            syncrep::set_synchronous_standby_names(&self.postgres, &sslist).await
        }
    }

    async fn disable_sync_rep(&mut self) -> Result<(), StewardError> {
        self.ensure_postgres_running().await?;
        syncrep::disable_synchronous_replication(&self.postgres).await
    }

    /// Re-read replication settings from the monitor and apply them:
    /// HBA entries for the current peers, then the sync-standby list.
    async fn apply_settings(&mut self) -> Result<(), StewardError> {
        let peers = self.monitor.get_other_nodes(self.state.node_id).await?;
        let hosts: Vec<String> = peers.iter().map(|peer| peer.host.clone()).collect();
        self.ensure_hba(&hosts).await?;
        self.enable_sync_rep().await
    }

    /// `wait_standby -> catchingup` (and rejoin paths): build this node
    /// as a standby of the current primary, preferring a rewind over a
    /// full base backup.
    async fn init_standby(&mut self) -> Result<(), StewardError> {
        let upstream = self.required_primary().await?;
        let options = self.config.standby_options(self.state.node_id);
        standby::init_standby(&self.postgres, &upstream, StandbyInitMode::Fallback, &options)
            .await?;
        self.ensure_postgres_running().await?;
        self.state.last_peer_contact = chrono::Utc::now().timestamp();
        self.state_dir.remove_init_state()?;
        Ok(())
    }

    /// Make sure replay is caught up before the actual promotion step.
    async fn prepare_promotion(&mut self) -> Result<(), StewardError> {
        self.ensure_postgres_running().await?;
        // Replay may have been paused by an earlier aborted failover.
        if self.observation.is_in_recovery
            && let Err(e) = observe::resume_wal_replay(self.postgres.setup()).await
        {
            debug!("resume of WAL replay not needed: {e}");
        }
        Ok(())
    }

    /// Fetch WAL this candidate is missing from the most advanced
    /// standby, then stop and wait to be told to promote.
    async fn fast_forward(&mut self) -> Result<(), StewardError> {
        let peer = self
            .monitor
            .get_most_advanced_standby(self.state.group_id)
            .await?;
        let Some(peer) = peer else {
            warn!("no advanced standby to fast-forward from, continuing with local WAL");
            return Ok(());
        };
        if peer.node_id == self.state.node_id || peer.lsn <= self.observation.current_lsn {
            debug!("already at or past {}'s position {}", peer.name, peer.lsn);
            return Ok(());
        }
        let options = self.config.standby_options(self.state.node_id);
        standby::replay_from_peer(
            &self.postgres,
            &peer,
            peer.lsn,
            &options,
            self.config.timeouts.fast_forward,
        )
        .await
    }

    /// Detach from the failed primary without promoting yet.
    async fn stop_replication(&mut self) -> Result<(), StewardError> {
        self.ensure_postgres_running().await?;
        observe::pause_wal_replay(self.postgres.setup()).await
    }

    /// Promote to a writable primary on a new timeline and publish it.
    async fn promote_standby(&mut self) -> Result<(), StewardError> {
        self.ensure_postgres_running().await?;
        let observation = observe::observe(&self.postgres).await;
        if observation.is_in_recovery {
            if let Err(e) = observe::resume_wal_replay(self.postgres.setup()).await {
                debug!("resume of WAL replay not needed: {e}");
            }
            self.postgres.promote().await?;
        }
        self.confirm_writes_accepted().await?;
        let promoted = observe::observe(&self.postgres).await;
        info!("promotion complete, now on timeline {}", promoted.timeline);
        Ok(())
    }

    /// Point replication at the newly promoted primary and restart onto
    /// its timeline.
    async fn follow_new_primary(&mut self) -> Result<(), StewardError> {
        let upstream = self.required_primary().await?;
        let options = self.config.standby_options(self.state.node_id);
        standby::write_replication_configuration(self.postgres.setup(), &upstream, &options)?;
        self.postgres.restart().await?;
        self.expected_pg_status = crate::core::state::ExpectedPostgresStatus::Running;
        self.state.last_peer_contact = chrono::Utc::now().timestamp();
        Ok(())
    }

    async fn start_maintenance(&mut self) -> Result<(), StewardError> {
        self.ensure_postgres_stopped().await
    }

    /// The last node standing: keep serving, drop the synchronous
    /// replication requirement, and promote first if still a standby.
    async fn disable_replication(&mut self) -> Result<(), StewardError> {
        self.ensure_postgres_running().await?;
        let observation = observe::observe(&self.postgres).await;
        if observation.is_in_recovery {
            self.postgres.promote().await?;
            self.confirm_writes_accepted().await?;
        }
        syncrep::disable_synchronous_replication(&self.postgres).await
    }

    /// The node is leaving the formation; stop serving but leave the
    /// data directory for the operator.
    async fn drop_node(&mut self) -> Result<(), StewardError> {
        info!("node dropped from formation \"{}\"", self.monitor.formation());
        self.ensure_postgres_stopped().await
    }

    // --- shared helpers ---

    async fn required_primary(&mut self) -> Result<NodeAddress, StewardError> {
        self.monitor
            .get_primary(self.state.group_id)
            .await?
            .ok_or_else(|| {
                StewardError::MonitorProtocol(format!(
                    "monitor knows no primary for group {}",
                    self.state.group_id
                ))
            })
    }

    async fn ensure_hba(&mut self, peer_hosts: &[String]) -> Result<(), StewardError> {
        let changed = hba::ensure_hba_entries(
            &self.config.postgresql.pgdata,
            self.config.hba.level,
            &self.config.postgresql.dbname,
            &self.config.postgresql.username,
            peer_hosts,
        )?;
        if changed && self.postgres.is_running() {
            self.postgres.reload().await?;
        }
        Ok(())
    }

    async fn confirm_writes_accepted(&mut self) -> Result<(), StewardError> {
        let deadline = tokio::time::Instant::now() + self.config.timeouts.promotion;
        loop {
            match observe::accepts_writes(self.postgres.setup()).await {
                Ok(true) => return Ok(()),
                Ok(false) => debug!("waiting for the instance to accept writes"),
                Err(e) => debug!("waiting for the instance to accept connections: {e}"),
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(StewardError::PgTooling(
                    "timed out waiting for the instance to accept writes".to_string(),
                ));
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }
}
