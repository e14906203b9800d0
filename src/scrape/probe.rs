//! Lightweight liveness probing, independent from the scrape path. Probes
//! open a fresh short-deadline connection so a wedged pool cannot make the
//! health endpoints lie.

use anyhow::{Context, Result, anyhow};
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{Connection, Executor};
use std::str::FromStr;
use std::time::Duration;
use tracing::instrument;

use crate::scrape::cast::{decode_scalar, truthy};

/// SQLSTATE reported by a target that is reachable but refusing queries
/// while starting up (crash recovery, archive recovery).
pub const SQLSTATE_CANNOT_CONNECT_NOW: &str = "57P03";

/// Outcome of one health probe. `starting` is reported separately from
/// `up`/`recovery` so callers can distinguish a booting target from a dead
/// one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeResult {
    pub up: bool,
    pub recovery: bool,
    pub starting: bool,
}

/// Everything needed to probe one target, cheap to clone into the
/// background health loop.
#[derive(Debug, Clone)]
pub struct ProbeTarget {
    options: PgConnectOptions,
    connect_timeout: Duration,
    pgbouncer_mode: bool,
}

impl ProbeTarget {
    /// # Errors
    ///
    /// Returns an error when the connection string cannot be parsed.
    pub fn new(dsn: &str, connect_timeout_ms: u64, pgbouncer_mode: bool) -> Result<Self> {
        let options = PgConnectOptions::from_str(dsn)
            .with_context(|| {
                format!("invalid connection string {}", crate::pgurl::shadow_pgurl(dsn))
            })?
            .application_name("pg_exporter");
        // a zero timeout would make every probe fail instantly
        let connect_timeout = Duration::from_millis(connect_timeout_ms.max(10));
        Ok(Self {
            options,
            connect_timeout,
            pgbouncer_mode,
        })
    }

    /// Probe the target once.
    ///
    /// PostgreSQL: connect and run `SELECT pg_is_in_recovery()`; SQLSTATE
    /// `57P03` maps to the starting state rather than an error. PgBouncer:
    /// issue `SHOW VERSION` over the simple protocol and treat an empty
    /// result as success (some builds answer only via NOTICE); a
    /// driver-level ping is never used because PgBouncer rejects the empty
    /// statement it sends.
    ///
    /// # Errors
    ///
    /// Returns an error when the target is unreachable or the probe query
    /// fails for reasons other than `57P03`.
    #[instrument(skip(self), fields(db.system = "postgresql", db.operation = "probe", pgbouncer = self.pgbouncer_mode))]
    pub async fn probe(&self) -> Result<ProbeResult> {
        let outcome = tokio::time::timeout(self.connect_timeout, self.run()).await;
        match outcome {
            Err(_) => Err(anyhow!(
                "health probe timed out after {:?}",
                self.connect_timeout
            )),
            Ok(Ok(result)) => Ok(result),
            Ok(Err(err)) if is_startup_error(&err) => Ok(ProbeResult {
                up: false,
                recovery: false,
                starting: true,
            }),
            Ok(Err(err)) => Err(err).context("health probe failed"),
        }
    }

    async fn run(&self) -> Result<ProbeResult, sqlx::Error> {
        let mut conn = PgConnection::connect_with(&self.options).await?;
        let result = if self.pgbouncer_mode {
            // zero rows is a healthy answer here
            conn.fetch_all("SHOW VERSION").await?;
            ProbeResult {
                up: true,
                recovery: false,
                starting: false,
            }
        } else {
            let row = conn.fetch_one("SELECT pg_is_in_recovery()").await?;
            ProbeResult {
                up: true,
                recovery: truthy(&decode_scalar(&row, 0)),
                starting: false,
            }
        };
        let _ = conn.close().await;
        Ok(result)
    }
}

/// Whether an error is SQLSTATE `57P03`, in direct or wrapped form.
#[must_use]
pub fn is_startup_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some(SQLSTATE_CANNOT_CONNECT_NOW)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_target_rejects_bad_dsn() {
        assert!(ProbeTarget::new("not a url at all \u{0}", 100, false).is_err());
    }

    #[test]
    fn test_probe_target_clamps_timeout() {
        let target = ProbeTarget::new("postgresql://localhost/postgres", 0, false).unwrap();
        assert!(target.connect_timeout >= Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_probe_unreachable_target_errors() {
        let target = ProbeTarget::new("postgresql://u@127.0.0.1:1/postgres", 200, false).unwrap();
        let err = target.probe().await.unwrap_err();
        assert!(!err.to_string().is_empty());
    }
}
