//! Engine module - The correlation-multiplexed controller session
//!
//! Owns the single connection to the controller and runs:
//! - the registration handshake, once, synchronously
//! - a periodic self-initiated report loop
//! - the reader loop that routes every inbound line, either completing an
//!   outstanding exchange or spawning a task for a new inbound command
//!
//! Transport failures anywhere end the session; protocol anomalies are
//! logged and only end the exchange they belong to.

mod command;
mod registry;

pub use command::CommandError;
pub use registry::{Registry, RegistryError, RegistryResult, Slot, SlotPayload};

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, BufReader, Lines};
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;

use crate::actuator::ActionTable;
use crate::protocol::{CorrelationId, Line, VERB_ACK};
use crate::sensor::MetricSource;
use crate::transport::LineWriter;

/// Engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection closed by controller")]
    ConnectionClosed,

    #[error("Registration rejected: {0}")]
    RegistrationFailed(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Engine tunables, extracted from the application configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Role announced at registration
    pub role: String,
    /// Description announced at registration
    pub description: String,
    /// Name under which the periodic measurement is reported
    pub metric_name: String,
    /// Delay between report iterations
    pub metric_interval: Duration,
    /// How long an exchange waits for its acknowledgement before
    /// abandoning the slot
    pub ack_timeout: Duration,
}

/// The protocol engine for one controller session
pub struct Engine {
    config: EngineConfig,
    registry: Arc<Registry>,
    actions: Arc<ActionTable>,
    source: Arc<dyn MetricSource>,
}

impl Engine {
    pub fn new(config: EngineConfig, actions: ActionTable, source: Arc<dyn MetricSource>) -> Self {
        Self {
            config,
            registry: Arc::new(Registry::new()),
            actions: Arc::new(actions),
            source,
        }
    }

    /// Shared handle to the correlation registry, for diagnostics
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Drive the session over an established transport until it dies.
    ///
    /// Registers with the controller first, then runs the report loop and
    /// the reader loop concurrently. Only returns on a fatal error.
    pub async fn run<S>(self, stream: S) -> EngineResult<()>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let mut lines = BufReader::new(read_half).lines();
        let writer = LineWriter::new(write_half);

        self.register_node(&mut lines, &writer).await?;

        // Command tasks are detached; a transport write failure inside one
        // still has to end the session, so they report back on this channel.
        let (fatal_tx, mut fatal_rx) = mpsc::channel::<EngineError>(1);

        tokio::select! {
            err = self.report_loop(&writer) => Err(err),
            err = self.read_loop(&mut lines, &writer, fatal_tx) => Err(err),
            Some(err) = fatal_rx.recv() => Err(err),
        }
    }

    /// Announce this node and require the controller's acknowledgement.
    ///
    /// Exactly one reply line is consumed; anything but `<id> ACK` is fatal.
    async fn register_node<R, W>(
        &self,
        lines: &mut Lines<R>,
        writer: &LineWriter<W>,
    ) -> EngineResult<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let id = CorrelationId::generate();
        let announce = Line::register(&id, &self.config.role, &self.config.description);
        writer.send(&announce).await?;

        let raw = lines
            .next_line()
            .await?
            .ok_or(EngineError::ConnectionClosed)?;
        let reply =
            Line::parse(&raw).map_err(|_| EngineError::RegistrationFailed(raw.clone()))?;

        if reply.id != id || reply.tokens != [VERB_ACK] {
            return Err(EngineError::RegistrationFailed(raw));
        }

        tracing::info!("registered with controller as {} {}", self.config.role, self.config.description);
        Ok(())
    }

    /// Self-initiated exchange: report the measured level forever.
    ///
    /// A failed sample or a missing/mismatched acknowledgement only costs
    /// that iteration; a transport write failure ends the session.
    async fn report_loop<W>(&self, writer: &LineWriter<W>) -> EngineError
    where
        W: AsyncWrite + Unpin,
    {
        loop {
            match self.source.sample().await {
                Ok(value) => {
                    let (id, slot) = self.registry.register_new().await;
                    let report = Line::metric(&id, &self.config.metric_name, value);

                    if let Err(e) = writer.send(&report).await {
                        self.registry.remove(&id).await;
                        return e.into();
                    }

                    await_ack(&self.registry, slot, self.config.ack_timeout, &id).await;
                    self.registry.remove(&id).await;
                }
                Err(e) => {
                    tracing::warn!("could not measure {}: {}, skipping report", self.config.metric_name, e);
                }
            }

            tokio::time::sleep(self.config.metric_interval).await;
        }
    }

    /// Reader loop: route every inbound line.
    ///
    /// A line whose id matches an outstanding exchange completes it; any
    /// other id starts a new peer-initiated command on its own task. The
    /// reader itself never blocks on command execution.
    async fn read_loop<R, W>(
        &self,
        lines: &mut Lines<R>,
        writer: &LineWriter<W>,
        fatal_tx: mpsc::Sender<EngineError>,
    ) -> EngineError
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        loop {
            let raw = match lines.next_line().await {
                Ok(Some(raw)) => raw,
                Ok(None) => return EngineError::ConnectionClosed,
                Err(e) => return e.into(),
            };

            let line = match Line::parse(&raw) {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!("discarding malformed line {:?}: {}", raw, e);
                    continue;
                }
            };
            if line.tokens.is_empty() {
                tracing::warn!("discarding malformed line {:?}", raw);
                continue;
            }

            if self.registry.deliver(&line.id, line.tokens.clone()).await {
                continue;
            }

            tracing::debug!("inbound command {} {:?}", line.id, line.tokens);

            let registry = self.registry.clone();
            let actions = self.actions.clone();
            let writer = writer.clone();
            let fatal_tx = fatal_tx.clone();
            let ack_timeout = self.config.ack_timeout;
            tokio::spawn(async move {
                if let Err(e) =
                    command::run_command(registry, actions, writer, ack_timeout, line.id, line.tokens)
                        .await
                {
                    let _ = fatal_tx.try_send(e.into());
                }
            });
        }
    }
}

/// Block on a rendezvous slot for the closing acknowledgement.
///
/// On timeout the exchange is abandoned and its slot removed; a reply other
/// than `ACK` is logged. Neither outcome is fatal.
async fn await_ack(registry: &Registry, slot: Slot, timeout: Duration, id: &CorrelationId) {
    match tokio::time::timeout(timeout, slot).await {
        Ok(Ok(tokens)) => {
            if tokens.first().map(String::as_str) != Some(VERB_ACK) {
                tracing::warn!("exchange {} expected ACK, got {:?}", id, tokens);
            }
        }
        Ok(Err(_)) => {
            tracing::warn!("exchange {} slot dropped before acknowledgement", id);
        }
        Err(_) => {
            tracing::warn!("exchange {} timed out awaiting acknowledgement", id);
            registry.remove(id).await;
        }
    }
}
