//! Postgres connection pool.
//!
//! The pool is process-wide (spec section 5: "min 1, max 5 by default"),
//! acquired for short-lived operations — no connection is held across a
//! model call (see [`crate::orchestrator`]).

use anyhow::Result;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::ConnectOptions;
use std::time::Duration;

use crate::config::Config;

pub async fn connect(config: &Config) -> Result<sqlx::PgPool> {
    let opts: PgConnectOptions = PgConnectOptions::new()
        .host(&config.db.instance)
        .username(&config.db.user)
        .password(&config.db.password)
        .database(&config.db.name)
        .disable_statement_logging();

    let pool = PgPoolOptions::new()
        .min_connections(config.db.pool_min)
        .max_connections(config.db.pool_max)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(opts)
        .await?;

    Ok(pool)
}
