//! The virtual-user driver: validates the configuration, probes the target,
//! runs the virtual users until the deadline and aggregates their outcomes.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::TestConfig;
use crate::error::{Error, Result};
use crate::message::CloseCode;
use crate::summary::{IterationOutcome, RunSummary};
use crate::transport::{self, Connector, TcpConnector};
use crate::vu::{VuContext, vu_loop};

/// Outcomes buffered between virtual users and the aggregator.
const OUTCOME_CHANNEL_CAPACITY: usize = 1024;

/// Runs a load test against one target.
pub struct LoadDriver<C = TcpConnector> {
    config: Arc<TestConfig>,
    connector: Arc<C>,
}

impl LoadDriver<TcpConnector> {
    /// Driver connecting over TCP (and TLS for `wss://`).
    #[must_use]
    pub fn tcp(config: TestConfig) -> Self {
        Self::new(config, TcpConnector::new())
    }
}

impl<C: Connector> LoadDriver<C> {
    #[must_use]
    pub fn new(config: TestConfig, connector: C) -> Self {
        Self {
            config: Arc::new(config),
            connector: Arc::new(connector),
        }
    }

    #[must_use]
    pub fn config(&self) -> &TestConfig {
        &self.config
    }

    /// Open and close one connection to check the target is reachable.
    ///
    /// # Errors
    ///
    /// Returns `Error::Unreachable` wrapping whatever the attempt failed with.
    pub async fn preflight(&self) -> Result<()> {
        let unreachable = |e: Error| Error::Unreachable {
            target: self.config.target.to_string(),
            reason: e.to_string(),
        };

        let mut socket = transport::open(self.connector.as_ref(), &self.config)
            .await
            .map_err(unreachable)?;
        socket
            .close(CloseCode::Normal, "preflight")
            .await
            .map_err(unreachable)?;
        if let Err(e) = socket
            .wait_for_close(self.config.session.close_timeout)
            .await
        {
            debug!(error = %e, "preflight close incomplete");
        }
        Ok(())
    }

    /// Run to completion.
    ///
    /// # Errors
    ///
    /// See [`run_until`](LoadDriver::run_until).
    pub async fn run(&self) -> Result<RunSummary> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Run until the deadline, or until `shutdown` resolves.
    ///
    /// On shutdown every virtual user is cancelled and open sessions close
    /// immediately. Virtual users still running after the grace period are
    /// aborted. The summary is marked `interrupted`.
    ///
    /// # Errors
    ///
    /// - `Error::Config` if the configuration is invalid
    /// - `Error::Unreachable` if the preflight probe fails
    /// - `Error::Task` if the aggregator task fails
    pub async fn run_until<F>(&self, shutdown: F) -> Result<RunSummary>
    where
        F: Future<Output = ()>,
    {
        self.config.validate()?;

        if self.config.preflight {
            info!(url = %self.config.target, "preflight");
            self.preflight().await?;
        }

        info!(
            url = %self.config.target,
            vus = self.config.virtual_users,
            duration = ?self.config.duration,
            "starting load test"
        );

        let (tx, rx) = mpsc::channel(OUTCOME_CHANNEL_CAPACITY);
        let aggregator = spawn_aggregator(rx, self.config.max_recorded_errors);

        let started = Instant::now();
        let deadline = started + self.config.duration;
        let cancel = CancellationToken::new();

        let mut vus = JoinSet::new();
        for id in 1..=self.config.virtual_users {
            vus.spawn(vu_loop(VuContext {
                id,
                config: Arc::clone(&self.config),
                connector: Arc::clone(&self.connector),
                outcomes: tx.clone(),
                deadline,
                cancel: cancel.child_token(),
            }));
        }
        drop(tx);

        tokio::pin!(shutdown);
        let mut interrupted = false;
        loop {
            tokio::select! {
                biased;
                () = &mut shutdown => {
                    warn!(remaining = vus.len(), "shutdown requested, closing sessions");
                    interrupted = true;
                    cancel.cancel();
                    break;
                }
                joined = vus.join_next() => match joined {
                    None => break,
                    Some(Err(e)) => warn!(error = %e, "virtual user task failed"),
                    Some(Ok(_)) => {}
                },
            }
        }

        if interrupted {
            let grace = self.config.grace_period;
            let drain = async { while vus.join_next().await.is_some() {} };
            if tokio::time::timeout(grace, drain).await.is_err() {
                warn!(
                    remaining = vus.len(),
                    grace = ?grace,
                    "grace period elapsed, aborting virtual users"
                );
                vus.abort_all();
                while vus.join_next().await.is_some() {}
            }
        }

        let mut summary = aggregator
            .await
            .map_err(|e| Error::Task(format!("aggregator: {e}")))?;
        summary.elapsed = started.elapsed();
        summary.interrupted = interrupted;

        info!(
            iterations = summary.total_iterations,
            connected = summary.successful_connections,
            failed = summary.failed_connections,
            errors = summary.error_count,
            elapsed = ?summary.elapsed,
            interrupted,
            "load test finished"
        );
        Ok(summary)
    }
}

/// The single writer of the run summary.
fn spawn_aggregator(
    mut rx: mpsc::Receiver<IterationOutcome>,
    max_recorded_errors: usize,
) -> JoinHandle<RunSummary> {
    tokio::spawn(async move {
        let mut summary = RunSummary::new(max_recorded_errors);
        while let Some(outcome) = rx.recv().await {
            summary.record(&outcome);
        }
        summary
    })
}
