//! SQLite worker for the ledger checkpoint and the pending-flush outbox.
//!
//! One dedicated thread owns the connection. Writes are small and frequent
//! (a checkpoint every few accrual ticks), so the file runs in WAL mode with
//! `synchronous = NORMAL`, and the WAL is folded back into the main file when
//! the worker stops.

use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex, PoisonError},
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use log::{error, info, warn};
use rusqlite::Connection;
use tokio::sync::oneshot;

use super::migrations::run_migrations;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum Message {
    Run(Job),
    Close,
}

struct Worker {
    jobs: mpsc::Sender<Message>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Worker {
    fn drop(&mut self) {
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return;
        };

        if self.jobs.send(Message::Close).is_err() {
            warn!("ledger database thread already gone");
        }
        if let Err(join_err) = handle.join() {
            error!("Failed to join ledger database thread: {join_err:?}");
        }
    }
}

fn open_ledger_connection(path: &Path) -> Result<Connection> {
    let mut conn = Connection::open(path)
        .with_context(|| format!("failed to open ledger database {}", path.display()))?;

    conn.busy_timeout(BUSY_TIMEOUT)
        .context("failed to set busy timeout")?;
    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
        warn!("WAL unavailable for {}, using default journal: {err}", path.display());
    }
    conn.pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous mode")?;

    run_migrations(&mut conn).context("failed to run database migrations")?;
    Ok(conn)
}

fn serve(mut conn: Connection, jobs: mpsc::Receiver<Message>) {
    while let Ok(message) = jobs.recv() {
        match message {
            Message::Run(job) => job(&mut conn),
            Message::Close => break,
        }
    }

    if let Err(err) = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);") {
        warn!("Failed to fold WAL into ledger database: {err}");
    }
    info!("Ledger database thread stopped");
}

/// Handle to the ledger database. Statements run on the worker thread in
/// submission order; callers await the reply. Clones share the worker.
#[derive(Clone)]
pub struct Database {
    worker: Arc<Worker>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let (jobs_tx, jobs_rx) = mpsc::channel::<Message>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let thread_path = db_path.clone();

        let thread = thread::Builder::new()
            .name("presence-ledger-db".into())
            .spawn(move || match open_ledger_connection(&thread_path) {
                Ok(conn) => {
                    if ready_tx.send(Ok(())).is_ok() {
                        serve(conn, jobs_rx);
                    }
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                }
            })
            .context("failed to spawn ledger database thread")?;

        ready_rx
            .recv()
            .context("ledger database thread exited before signaling readiness")??;

        info!("Ledger database ready at {}", db_path.display());

        Ok(Self {
            worker: Arc::new(Worker {
                jobs: jobs_tx,
                thread: Mutex::new(Some(thread)),
            }),
        })
    }

    /// Runs `task` on the worker thread and returns its result.
    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        let job: Job = Box::new(move |conn| {
            // the caller may have been cancelled; nothing to report then
            let _ = reply_tx.send(task(conn));
        });

        self.worker
            .jobs
            .send(Message::Run(job))
            .map_err(|_| anyhow!("ledger database thread is not running"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("ledger database thread dropped the request"))?
    }
}
