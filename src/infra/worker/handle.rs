//! Live worker handles
//!
//! A worker is either an in-process thread running a [`WorkerBridge`] or a
//! child process speaking framed JSON over stdio. Both expose the same pair of
//! message channels; termination is explicit.

use std::path::Path;
use std::process::Stdio;

use tokio::io::BufReader;
use tokio::process::{Child, Command};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use super::bridge::{ServiceFactory, WorkerBridge};
use super::protocol::{Notification, methods};
use super::transport;
use crate::error::WorkerError;

/// Worker-side ends of the message channel
pub struct WorkerPort {
    pub inbound: UnboundedReceiver<String>,
    pub outbound: UnboundedSender<String>,
}

/// Orchestrator-side ends of the message channel
pub struct RemotePort {
    pub to_worker: UnboundedSender<String>,
    pub from_worker: UnboundedReceiver<String>,
}

impl WorkerPort {
    pub fn pair() -> (WorkerPort, RemotePort) {
        let (to_worker, inbound) = mpsc::unbounded_channel();
        let (outbound, from_worker) = mpsc::unbounded_channel();
        (
            WorkerPort { inbound, outbound },
            RemotePort {
                to_worker,
                from_worker,
            },
        )
    }
}

enum WorkerKind {
    Thread,
    Process {
        child: Child,
        io_tasks: Vec<JoinHandle<()>>,
    },
}

pub struct WorkerHandle {
    label: String,
    to_worker: Option<UnboundedSender<String>>,
    from_worker: Option<UnboundedReceiver<String>>,
    kind: WorkerKind,
}

impl WorkerHandle {
    /// Start a worker thread hosting `factory` behind a fresh bridge
    pub fn spawn_thread(label: &str, factory: ServiceFactory) -> Result<Self, WorkerError> {
        let (port, remote) = WorkerPort::pair();
        let service = label.to_string();

        std::thread::Builder::new()
            .name(format!("worker-{}", label))
            .spawn(move || {
                let mut bridge = WorkerBridge::new();
                bridge.initialize(service, factory);
                bridge.run(port);
            })
            .map_err(|e| WorkerError::spawn_failed(label, e))?;

        tracing::debug!("Worker thread '{}' started", label);
        Ok(Self::from_remote(label, remote, WorkerKind::Thread))
    }

    /// Start a worker executable. Must be called inside a tokio runtime.
    pub fn spawn_process(
        label: &str,
        program: &Path,
        args: &[String],
    ) -> Result<Self, WorkerError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                WorkerError::spawn_failed(label, format!("{}: {}", program.display(), e))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| WorkerError::spawn_failed(label, "stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WorkerError::spawn_failed(label, "stdout not captured"))?;

        let (port, remote) = WorkerPort::pair();
        let WorkerPort {
            mut inbound,
            outbound,
        } = port;

        let writer_label = label.to_string();
        let writer = tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(message) = inbound.recv().await {
                if let Err(e) = transport::write_message(&mut stdin, &message).await {
                    tracing::warn!("Worker '{}' write failed: {}", writer_label, e);
                    break;
                }
            }
        });

        let reader_label = label.to_string();
        let reader = tokio::spawn(async move {
            let mut stdout = BufReader::new(stdout);
            loop {
                match transport::read_message(&mut stdout).await {
                    Ok(Some(message)) => {
                        if outbound.send(message).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!("Worker '{}' read failed: {}", reader_label, e);
                        break;
                    }
                }
            }
        });

        tracing::debug!("Worker process '{}' started: {}", label, program.display());
        Ok(Self::from_remote(
            label,
            remote,
            WorkerKind::Process {
                child,
                io_tasks: vec![writer, reader],
            },
        ))
    }

    fn from_remote(label: &str, remote: RemotePort, kind: WorkerKind) -> Self {
        Self {
            label: label.to_string(),
            to_worker: Some(remote.to_worker),
            from_worker: Some(remote.from_worker),
            kind,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Sender half for posting raw messages to the worker
    pub fn sender(&self) -> Option<UnboundedSender<String>> {
        self.to_worker.clone()
    }

    /// Receiver half for the worker's replies. Can be taken once.
    pub fn take_receiver(&mut self) -> Option<UnboundedReceiver<String>> {
        self.from_worker.take()
    }

    pub fn post_message(&self, message: String) -> Result<(), WorkerError> {
        let sender = self.to_worker.as_ref().ok_or_else(|| WorkerError::Terminated {
            label: self.label.clone(),
        })?;
        sender.send(message).map_err(|_| WorkerError::Terminated {
            label: self.label.clone(),
        })
    }

    pub fn is_terminated(&self) -> bool {
        self.to_worker
            .as_ref()
            .map(|tx| tx.is_closed())
            .unwrap_or(true)
    }

    /// Stop the worker. Safe to call more than once.
    pub fn terminate(&mut self) {
        if let Some(sender) = self.to_worker.take() {
            let shutdown = Notification::new(methods::SHUTDOWN, None);
            if let Ok(json) = serde_json::to_string(&shutdown) {
                let _ = sender.send(json);
            }
        }

        if let WorkerKind::Process { child, io_tasks } = &mut self.kind {
            if let Err(e) = child.start_kill() {
                tracing::debug!("Worker '{}' already exited: {}", self.label, e);
            }
            for task in io_tasks.drain(..) {
                task.abort();
            }
        }
        tracing::info!("Worker '{}' terminated", self.label);
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if self.to_worker.is_some() {
            self.terminate();
        }
    }
}
