//! Peer-initiated exchange - remote command execution
//!
//! Runs the `Validating -> Executing -> Replying -> AwaitingAck -> Done`
//! sequence for one inbound command. Each command runs on its own task so a
//! slow or stuck action cannot block the reader loop or other commands.

use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWrite;

use super::{await_ack, Registry};
use crate::actuator::{ActionTable, Actuator, ActuatorError};
use crate::protocol::{CorrelationId, Line, VERB_RUN};
use crate::transport::LineWriter;

/// Reasons a command draws an ERR reply.
///
/// None of these are fatal; the peer sees `ERR` and the session continues.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("unknown verb {0}")]
    UnknownVerb(String),

    #[error("expected 2 arguments, got {0}")]
    Arity(usize),

    #[error("unknown action {0}")]
    UnknownAction(String),

    #[error("argument {0} is not whole seconds")]
    BadArgument(String),

    #[error("action failed: {0}")]
    Failed(#[from] ActuatorError),
}

/// Check an inbound command against the action table.
///
/// `tokens` must be non-empty; the dispatcher discards token-less lines
/// before spawning a command task.
fn validate(
    tokens: &[String],
    actions: &ActionTable,
) -> Result<(Arc<dyn Actuator>, u64), CommandError> {
    let verb = &tokens[0];
    if verb != VERB_RUN {
        return Err(CommandError::UnknownVerb(verb.clone()));
    }

    let args = &tokens[1..];
    if args.len() != 2 {
        return Err(CommandError::Arity(args.len()));
    }

    let actuator = actions
        .get(&args[0])
        .ok_or_else(|| CommandError::UnknownAction(args[0].clone()))?;

    let seconds = args[1]
        .parse::<u64>()
        .map_err(|_| CommandError::BadArgument(args[1].clone()))?;

    Ok((actuator, seconds))
}

/// Execute one peer-initiated exchange to completion.
///
/// The reply reuses the inbound correlation id, and its ack slot is
/// registered before the reply is written so the peer's acknowledgement
/// always finds a waiter. An `Err` return means the transport write failed,
/// which is fatal to the whole session.
pub(super) async fn run_command<W>(
    registry: Arc<Registry>,
    actions: Arc<ActionTable>,
    writer: LineWriter<W>,
    ack_timeout: Duration,
    id: CorrelationId,
    tokens: Vec<String>,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let outcome = match validate(&tokens, &actions) {
        Ok((actuator, seconds)) => actuator.execute(seconds).await.map_err(CommandError::from),
        Err(e) => Err(e),
    };

    let reply = match outcome {
        Ok(()) => Line::done(&id),
        Err(e) => {
            tracing::warn!("command {} rejected: {}", id, e);
            Line::err(&id)
        }
    };

    let slot = match registry.register(&id).await {
        Ok(slot) => slot,
        Err(e) => {
            // Two concurrent commands on one id; the peer broke the
            // protocol. Drop this exchange and keep the session alive.
            tracing::warn!("abandoning exchange: {}", e);
            return Ok(());
        }
    };

    if let Err(e) = writer.send(&reply).await {
        registry.remove(&id).await;
        return Err(e);
    }

    await_ack(&registry, slot, ack_timeout, &id).await;
    registry.remove(&id).await;

    Ok(())
}
