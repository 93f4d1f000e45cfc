//! Virtual-user task body.
//!
//! A virtual user repeats connect / hold / close / pace until the run
//! deadline passes or the run is cancelled. Each finished iteration yields
//! exactly one [`IterationOutcome`] on the outcome channel.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::check::contains_marker;
use crate::config::TestConfig;
use crate::connection::Socket;
use crate::error::{Error, Result};
use crate::message::{CloseCode, Message};
use crate::payload::Event;
use crate::summary::IterationOutcome;
use crate::transport::{self, Connector};

/// Everything one virtual user needs.
pub struct VuContext<C> {
    /// 1-based virtual user number.
    pub id: u32,
    pub config: Arc<TestConfig>,
    pub connector: Arc<C>,
    pub outcomes: mpsc::Sender<IterationOutcome>,
    /// No iteration starts at or after this instant.
    pub deadline: Instant,
    pub cancel: CancellationToken,
}

/// Run iterations until the deadline or cancellation. Returns the number of
/// iterations whose outcome was delivered.
pub async fn vu_loop<C: Connector>(ctx: VuContext<C>) -> u64 {
    let pacing = ctx.config.session.pacing;
    let mut delivered = 0;

    while Instant::now() < ctx.deadline && !ctx.cancel.is_cancelled() {
        let Some(outcome) = run_iteration(&ctx).await else {
            break;
        };
        debug!(
            vu = ctx.id,
            connected = outcome.connected,
            sent = outcome.messages_sent,
            received = outcome.messages_received,
            "iteration finished"
        );
        if ctx.outcomes.send(outcome).await.is_err() {
            break;
        }
        delivered += 1;

        let resume_at = Instant::now()
            .checked_add(pacing)
            .map_or(ctx.deadline, |at| at.min(ctx.deadline));
        tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => break,
            () = sleep_until(resume_at) => {}
        }
    }

    debug!(vu = ctx.id, iterations = delivered, "virtual user retired");
    delivered
}

/// One connect / hold / close cycle.
///
/// Returns `None` if the run was cancelled before the connection opened;
/// such an attempt is not an iteration.
pub async fn run_iteration<C: Connector>(ctx: &VuContext<C>) -> Option<IterationOutcome> {
    let started = Instant::now();

    let opened = tokio::select! {
        biased;
        () = ctx.cancel.cancelled() => return None,
        result = transport::open(ctx.connector.as_ref(), &ctx.config) => result,
    };

    let mut socket = match opened {
        Ok(socket) => socket,
        Err(e) => {
            debug!(vu = ctx.id, error = %e, "connection failed");
            return Some(IterationOutcome::failed(ctx.id, &e, started.elapsed()));
        }
    };
    debug!(vu = ctx.id, "connected");

    let mut outcome = IterationOutcome {
        vu: ctx.id,
        connected: true,
        status: Some(101),
        ..IterationOutcome::default()
    };

    if let Err(e) = run_session(&mut socket, ctx, &mut outcome).await {
        if !e.is_local_close() {
            warn!(vu = ctx.id, error = %e, "session ended with error");
            outcome.error = Some(e.to_string());
        }
    }

    outcome.duration = started.elapsed();
    Some(outcome)
}

async fn run_session<S, C>(
    socket: &mut Socket<S>,
    ctx: &VuContext<C>,
    outcome: &mut IterationOutcome,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let config = &ctx.config;
    let plan = &config.session;
    let opened = Instant::now();

    socket
        .send_text(&Event::hello(config.hello_message.as_str()).to_json()?)
        .await?;
    outcome.messages_sent += 1;

    let mut pings = interval_at(opened + plan.ping_interval, plan.ping_interval);
    pings.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let hold = sleep_until(opened + plan.hold);
    tokio::pin!(hold);

    let code = loop {
        tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => break CloseCode::GoingAway,
            () = &mut hold => break CloseCode::Normal,
            received = socket.recv() => {
                let message = received?;
                let peer_closed = matches!(message, Message::Close(_));
                observe(message, &config.ack_marker, outcome);
                socket.flush_pending().await?;
                if peer_closed {
                    debug!(vu = ctx.id, code = ?socket.peer_close_code(), "closed by server");
                    return Ok(());
                }
            }
            _ = pings.tick() => {
                socket.send_text(&Event::ping_now().to_json()?).await?;
                outcome.messages_sent += 1;
            }
        }
    };

    socket.close(code, "").await?;

    // after cancellation the outcome must reach the aggregator before the
    // driver's grace period ends
    let close_wait = match code {
        CloseCode::GoingAway => plan.close_timeout.min(config.grace_period / 2),
        _ => plan.close_timeout,
    };

    let drain = async {
        loop {
            match socket.recv().await {
                Ok(Message::Close(_)) | Err(Error::ConnectionClosed(_)) => return Ok(()),
                Ok(message) => observe(message, &config.ack_marker, outcome),
                Err(e) => return Err(e),
            }
        }
    };
    match tokio::time::timeout(close_wait, drain).await {
        Ok(result) => result,
        Err(_) => {
            debug!(vu = ctx.id, "server did not answer close in time");
            Ok(())
        }
    }
}

/// Count a received message and evaluate the acknowledgment check on text.
fn observe(message: Message, marker: &str, outcome: &mut IterationOutcome) {
    match message {
        Message::Text(text) => {
            outcome.messages_received += 1;
            if contains_marker(&text, marker) {
                outcome.acks_passed += 1;
                outcome.acknowledged_message_seen = true;
            } else {
                outcome.acks_failed += 1;
            }
        }
        Message::Binary(_) => outcome.messages_received += 1,
        Message::Ping(_) | Message::Pong(_) | Message::Close(_) => {}
    }
}
