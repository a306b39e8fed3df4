// src/core/postgres/mod.rs

//! The local database driver: a thin abstraction over the managed
//! Postgres installation. Process control shells out to the standard
//! tooling (`pg_ctl`, `pg_basebackup`, `pg_rewind`); introspection goes
//! through a short-lived local connection.

pub mod certs;
pub mod control;
pub mod hba;
pub mod observe;
pub mod standby;
pub mod syncrep;

pub use control::{PostgresController, PostgresSetup, StopMode};
pub use hba::HbaLevel;
pub use observe::{ControlData, Observation};
pub use standby::StandbyInitMode;
