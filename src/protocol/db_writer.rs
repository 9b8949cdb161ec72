//! DB Writer (C9): serializes every MUX command, health, and metrics write
//! behind one executor shared across all ports, so a slow database call
//! never blocks a `PortActor`'s own event loop. Grounded in the teacher's
//! `state_manager::run_state_writer_thread`: a channel of pending operations
//! drained by one dedicated task, the caller never touching the database
//! directly.

use std::sync::Arc;

use chrono::Utc;
use flume::Sender;

use crate::db::Db;
use crate::protocol::fsm::{MetricsKind, MuxStateLabel};

const APPL_MUX_CABLE: &str = "APPL_DB/MUX_CABLE";
const APPL_MUX_CABLE_COMMAND: &str = "APPL_DB/MUX_CABLE_COMMAND";
const STATE_MUX_LINKMGR: &str = "STATE_DB/MUX_LINKMGR";
const STATE_MUX_METRICS: &str = "STATE_DB/MUX_METRICS";

fn label_field(label: MuxStateLabel) -> &'static str {
    match label {
        MuxStateLabel::Active => "active",
        MuxStateLabel::Standby => "standby",
        MuxStateLabel::Unknown => "unknown",
        MuxStateLabel::Error => "error",
        MuxStateLabel::Wait => "unknown",
    }
}

fn health_field(health: super::fsm::Health) -> &'static str {
    match health {
        super::fsm::Health::Uninitialized => "uninitialized",
        super::fsm::Health::Unhealthy => "unhealthy",
        super::fsm::Health::Healthy => "healthy",
    }
}

#[derive(Debug)]
enum WriterCommand {
    SetMux { port: String, label: MuxStateLabel },
    ProbeMux { port: String },
    SetHealth { port: String, health: super::fsm::Health },
    PostMetrics {
        port: String,
        kind: MetricsKind,
        label: MuxStateLabel,
    },
}

/// Handle cloned into every `PortActor`; cheap, non-blocking sends onto the
/// shared writer task.
#[derive(Clone)]
pub struct DbWriter {
    tx: Sender<WriterCommand>,
    db: Arc<dyn Db>,
}

impl DbWriter {
    /// Spawns the dedicated writer task and returns a handle to it.
    pub fn spawn(db: Arc<dyn Db>) -> Self {
        let (tx, rx) = flume::unbounded::<WriterCommand>();
        let worker_db = Arc::clone(&db);
        tokio::spawn(async move {
            while let Ok(cmd) = rx.recv_async().await {
                execute(&worker_db, cmd);
            }
            log::info!("db writer task shutting down");
        });
        Self { tx, db }
    }

    pub fn set_mux_state(&self, port: &str, label: MuxStateLabel) {
        self.send(WriterCommand::SetMux {
            port: port.to_string(),
            label,
        });
    }

    pub fn probe_mux_state(&self, port: &str) {
        self.send(WriterCommand::ProbeMux {
            port: port.to_string(),
        });
    }

    pub fn set_linkmgr_health(&self, port: &str, health: super::fsm::Health) {
        self.send(WriterCommand::SetHealth {
            port: port.to_string(),
            health,
        });
    }

    pub fn post_metrics(&self, port: &str, kind: MetricsKind, label: MuxStateLabel) {
        self.send(WriterCommand::PostMetrics {
            port: port.to_string(),
            kind,
            label,
        });
    }

    /// Synchronous read, per spec §4.9 ("getMuxState(port) -> label"). Reads
    /// bypass the writer queue since they don't mutate shared state.
    pub fn get_mux_state(&self, port: &str) -> Option<MuxStateLabel> {
        let reported = self.db.hget("STATE_DB/MUX_CABLE", port, "state")?;
        parse_label(&reported)
    }

    fn send(&self, cmd: WriterCommand) {
        if self.tx.send(cmd).is_err() {
            log::warn!("db writer task has shut down; dropping command");
        }
    }
}

fn execute(db: &Arc<dyn Db>, cmd: WriterCommand) {
    match cmd {
        WriterCommand::SetMux { port, label } => {
            db.hset(APPL_MUX_CABLE, &port, "state", label_field(label));
        }
        WriterCommand::ProbeMux { port } => {
            db.hset(APPL_MUX_CABLE_COMMAND, &port, "command", "probe");
        }
        WriterCommand::SetHealth { port, health } => {
            db.hset(STATE_MUX_LINKMGR, &port, "state", health_field(health));
        }
        WriterCommand::PostMetrics { port, kind, label } => {
            let field = format!("linkmgrd_switch_{}_{}", label_field(label), match kind {
                MetricsKind::Start => "start",
                MetricsKind::End => "end",
            });
            if matches!(kind, MetricsKind::Start) {
                // Invariant 5: clear any prior row before writing a fresh start.
                for existing in ["active", "standby"] {
                    for suffix in ["start", "end"] {
                        db.hdel(
                            STATE_MUX_METRICS,
                            &port,
                            &format!("linkmgrd_switch_{existing}_{suffix}"),
                        );
                    }
                }
            }
            db.hset(STATE_MUX_METRICS, &port, &field, &Utc::now().to_rfc3339());
        }
    }
}

fn parse_label(value: &str) -> Option<MuxStateLabel> {
    match value {
        "active" => Some(MuxStateLabel::Active),
        "standby" => Some(MuxStateLabel::Standby),
        "unknown" => Some(MuxStateLabel::Unknown),
        "error" => Some(MuxStateLabel::Error),
        _ => None,
    }
}
