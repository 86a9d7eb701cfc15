//! Orchestrator-side worker client
//!
//! Pairs requests with responses by JSON-RPC id over a worker's channel. A
//! reader task resolves pending requests; when the worker goes away every
//! pending request fails with `Terminated`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::handle::WorkerHandle;
use super::protocol::{InitializeParams, Message, Request, RequestId, Response, methods};
use crate::error::WorkerError;

type PendingMap = Arc<Mutex<HashMap<RequestId, oneshot::Sender<Response>>>>;

pub struct WorkerClient {
    label: String,
    handle: Mutex<WorkerHandle>,
    sender: UnboundedSender<String>,
    next_id: AtomicU64,
    pending: PendingMap,
    reader: JoinHandle<()>,
    terminated: Arc<AtomicBool>,
}

impl WorkerClient {
    /// Take ownership of a live worker and start reading its replies.
    /// Must be called inside a tokio runtime.
    pub fn start(mut handle: WorkerHandle) -> Result<Arc<Self>, WorkerError> {
        let label = handle.label().to_string();
        let terminated_err = || WorkerError::Terminated {
            label: label.clone(),
        };
        let sender = handle.sender().ok_or_else(terminated_err)?;
        let mut receiver = handle.take_receiver().ok_or_else(terminated_err)?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let terminated = Arc::new(AtomicBool::new(false));

        let reader = {
            let pending = Arc::clone(&pending);
            let terminated = Arc::clone(&terminated);
            let label = label.clone();
            tokio::spawn(async move {
                while let Some(raw) = receiver.recv().await {
                    match Message::parse(&raw) {
                        Ok(Message::Response(response)) => {
                            let Some(id) = response.id.clone() else {
                                tracing::warn!("Worker '{}' sent an error without id", label);
                                continue;
                            };
                            let waiter = lock(&pending).remove(&id);
                            match waiter {
                                Some(tx) => {
                                    let _ = tx.send(response);
                                }
                                None => {
                                    tracing::debug!("Worker '{}' late response {:?}", label, id)
                                }
                            }
                        }
                        Ok(_) => tracing::trace!("Worker '{}' message ignored", label),
                        Err(e) => tracing::warn!("Worker '{}' sent invalid message: {}", label, e),
                    }
                }
                terminated.store(true, Ordering::SeqCst);
                // Dropping the senders fails every waiter with Terminated
                lock(&pending).clear();
                tracing::debug!("Worker '{}' channel closed", label);
            })
        };

        Ok(Arc::new(Self {
            label,
            handle: Mutex::new(handle),
            sender,
            next_id: AtomicU64::new(1),
            pending,
            reader,
            terminated,
        }))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_running(&self) -> bool {
        !self.terminated.load(Ordering::SeqCst) && !self.sender.is_closed()
    }

    pub async fn request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, WorkerError> {
        if !self.is_running() {
            return Err(self.terminated_error());
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = Request::new(id, method, Some(params));
        let json = serde_json::to_string(&request)?;

        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(RequestId::Number(id), tx);

        if self.sender.send(json).is_err() {
            lock(&self.pending).remove(&RequestId::Number(id));
            return Err(self.terminated_error());
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response.into_result().map_err(WorkerError::from),
            Ok(Err(_)) => Err(self.terminated_error()),
            Err(_) => {
                lock(&self.pending).remove(&RequestId::Number(id));
                Err(WorkerError::Timeout {
                    label: self.label.clone(),
                    method: method.to_string(),
                })
            }
        }
    }

    /// Create the named service inside the worker
    pub async fn initialize(&self, options: Value, timeout: Duration) -> Result<(), WorkerError> {
        let params = InitializeParams {
            service: self.label.clone(),
            options,
        };
        self.request(methods::INITIALIZE, serde_json::to_value(params)?, timeout)
            .await
            .map(|_| ())
    }

    pub fn pending_requests(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn terminate(&self) {
        lock(&self.handle).terminate();
        self.reader.abort();
        self.terminated.store(true, Ordering::SeqCst);
        lock(&self.pending).clear();
    }

    fn terminated_error(&self) -> WorkerError {
        WorkerError::Terminated {
            label: self.label.clone(),
        }
    }
}

impl Drop for WorkerClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
