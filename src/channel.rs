use crate::error::{FleetError, Result};
use crate::protocol::{
    decode_frame, encode_frame, Ack, AckStatus, Frame, HazardReport, Message, StatusReport,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

/// Inbound traffic surfaced to the orchestrator's event loop. Arrival order
/// per unit is preserved by the per-connection reader task.
#[derive(Debug, Clone)]
pub enum UnitEvent {
    Status(StatusReport),
    Hazard(HazardReport),
    HeartbeatOk { unit_id: String },
    HeartbeatMiss { unit_id: String },
    Disconnected { unit_id: String },
}

/// Send seam between the orchestrator/emergency controller and a unit.
/// Production links are TCP `CommandClient`s; tests substitute mocks.
#[async_trait]
pub trait UnitLink: Send + Sync {
    fn unit_id(&self) -> &str;

    /// One request/response exchange bounded by `deadline`.
    async fn request(&self, message: Message, deadline: Duration) -> Result<Ack>;

    /// Fail this unit's in-flight command waits immediately. Used by the
    /// emergency path; other units' waits are unaffected.
    fn cancel_inflight(&self);
}

/// Map a non-accepted ack onto the error taxonomy.
pub fn expect_accepted(unit_id: &str, ack: Ack) -> Result<Ack> {
    match ack.status {
        AckStatus::Accepted => Ok(ack),
        AckStatus::Busy => Err(FleetError::Busy(unit_id.to_string())),
        AckStatus::Rejected => Err(FleetError::Rejected {
            unit: unit_id.to_string(),
            reason: ack.message.unwrap_or_else(|| "rejected".into()),
        }),
    }
}

/// Controller-side endpoint of the remote command channel: one TCP stream
/// per unit, newline-delimited JSON frames, responses correlated to
/// requests by sequence number. Unsolicited event frames flow into the
/// orchestrator's event queue without blocking requests.
pub struct CommandClient {
    unit_id: String,
    writer: Mutex<OwnedWriteHalf>,
    pending: Arc<DashMap<u64, oneshot::Sender<Ack>>>,
    seq: AtomicU64,
    cancel: Notify,
    closed: Arc<AtomicBool>,
}

impl CommandClient {
    /// Connect to a unit agent and spawn the reader task that routes
    /// responses to waiters and events to `event_tx`.
    pub async fn connect(
        unit_id: impl Into<String>,
        endpoint: &str,
        event_tx: mpsc::Sender<UnitEvent>,
    ) -> Result<Arc<Self>> {
        let unit_id = unit_id.into();
        let stream = TcpStream::connect(endpoint).await?;
        let (reader, writer) = stream.into_split();

        let client = Arc::new(Self {
            unit_id: unit_id.clone(),
            writer: Mutex::new(writer),
            pending: Arc::new(DashMap::new()),
            seq: AtomicU64::new(0),
            cancel: Notify::new(),
            closed: Arc::new(AtomicBool::new(false)),
        });

        let pending = Arc::clone(&client.pending);
        let closed = Arc::clone(&client.closed);
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let frame = match decode_frame(line.trim()) {
                            Ok(frame) => frame,
                            Err(e) => {
                                warn!(unit = %unit_id, error = %e, "dropping malformed frame");
                                continue;
                            }
                        };
                        match frame {
                            Frame::Response(ack) => {
                                if let Some((_, tx)) = pending.remove(&ack.seq) {
                                    let _ = tx.send(ack);
                                } else {
                                    debug!(unit = %unit_id, seq = ack.seq, "late response dropped");
                                }
                            }
                            Frame::Event(Message::StatusReport(report)) => {
                                let _ = event_tx.send(UnitEvent::Status(report)).await;
                            }
                            Frame::Event(Message::HazardReport(report)) => {
                                let _ = event_tx.send(UnitEvent::Hazard(report)).await;
                            }
                            Frame::Event(other) => {
                                warn!(unit = %unit_id, kind = other.label(), "unexpected event frame");
                            }
                            Frame::Request { .. } => {
                                warn!(unit = %unit_id, "unit sent a request frame; ignored");
                            }
                        }
                    }
                    Ok(None) | Err(_) => break,
                }
            }
            closed.store(true, Ordering::SeqCst);
            // Dropping the waiters surfaces ChannelClosed to callers.
            pending.clear();
            info!(unit = %unit_id, "command channel closed");
            let _ = event_tx.send(UnitEvent::Disconnected { unit_id }).await;
        });

        Ok(client)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Per-unit heartbeat loop, independent of any outstanding command.
    /// The orchestrator turns miss streaks into unreachability.
    pub fn start_heartbeat(
        self: &Arc<Self>,
        interval: Duration,
        liveness_timeout: Duration,
        event_tx: mpsc::Sender<UnitEvent>,
    ) -> JoinHandle<()> {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if client.is_closed() {
                    break;
                }
                let event = match client.request(Message::Heartbeat, liveness_timeout).await {
                    Ok(ack) if ack.status == AckStatus::Accepted => UnitEvent::HeartbeatOk {
                        unit_id: client.unit_id.clone(),
                    },
                    Ok(_) | Err(_) => UnitEvent::HeartbeatMiss {
                        unit_id: client.unit_id.clone(),
                    },
                };
                if event_tx.send(event).await.is_err() {
                    break;
                }
            }
        })
    }
}

#[async_trait]
impl UnitLink for CommandClient {
    fn unit_id(&self) -> &str {
        &self.unit_id
    }

    async fn request(&self, message: Message, deadline: Duration) -> Result<Ack> {
        if self.is_closed() {
            return Err(FleetError::ChannelClosed(self.unit_id.clone()));
        }
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        self.pending.insert(seq, tx);

        let line = encode_frame(&Frame::Request { seq, message })?;
        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = async {
                writer.write_all(line.as_bytes()).await?;
                writer.write_all(b"\n").await
            }
            .await
            {
                self.pending.remove(&seq);
                return Err(e.into());
            }
        }

        tokio::select! {
            resp = rx => resp.map_err(|_| FleetError::ChannelClosed(self.unit_id.clone())),
            _ = time::sleep(deadline) => {
                self.pending.remove(&seq);
                Err(FleetError::Timeout { unit: self.unit_id.clone(), attempts: 1 })
            }
            _ = self.cancel.notified() => {
                self.pending.remove(&seq);
                Err(FleetError::Cancelled)
            }
        }
    }

    fn cancel_inflight(&self) {
        self.cancel.notify_waiters();
    }
}
