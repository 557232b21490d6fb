// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The scheduler's event loop and the handle other tasks drive it with

use super::ResourceScheduler;
use crate::error::SchedulerError;
use crate::status::StatusReport;
use crate::work::Enqueued;
use cv_adapters::Executor;
use cv_core::{Clock, DryRunId, IdGen, ResourceId, ResourceState, SchedulerConfig, TaskPriority};
use cv_storage::StatePersistence;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const COMMAND_BUFFER: usize = 64;

type Reply<T> = oneshot::Sender<T>;

/// Requests handled on the scheduler's own task
#[derive(Debug)]
pub enum Command {
    NewVersion { version: u64, reply: Reply<Result<bool, SchedulerError>> },
    ReadVersion { reply: Reply<Result<bool, SchedulerError>> },
    Deploy { reason: String, priority: TaskPriority, agent: Option<String>, reply: Reply<usize> },
    Repair { reason: String, priority: TaskPriority, agent: Option<String>, reply: Reply<usize> },
    DeployResource {
        resource: ResourceId,
        reason: String,
        priority: TaskPriority,
        reply: Reply<Result<Enqueued, SchedulerError>>,
    },
    DryRun { dryrun_id: DryRunId, version: u64, reply: Reply<Result<usize, SchedulerError>> },
    GetFacts { resource: ResourceId, reply: Reply<Result<Enqueued, SchedulerError>> },
    GetResourceState { resource: ResourceId, reply: Reply<Option<ResourceState>> },
    ReloadAllTimers { reply: Reply<()> },
    ReloadConfig { config: Box<SchedulerConfig>, reply: Reply<bool> },
    StatusReport { reply: Reply<Result<StatusReport, SchedulerError>> },
    PurgeOrphans { reply: Reply<usize> },
    PauseAgent { agent: String, reply: Reply<Result<bool, SchedulerError>> },
    ResumeAgent { agent: String, reply: Reply<Result<bool, SchedulerError>> },
    Halt { reply: Reply<Result<bool, SchedulerError>> },
    Resume { reply: Reply<Result<bool, SchedulerError>> },
}

/// Cloneable handle to a running scheduler
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<Command>,
    shutdown: CancellationToken,
}

impl SchedulerHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, SchedulerError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(build(reply)).await.map_err(|_| SchedulerError::ShutDown)?;
        rx.await.map_err(|_| SchedulerError::ShutDown)
    }

    pub async fn new_version(&self, version: u64) -> Result<bool, SchedulerError> {
        self.request(|reply| Command::NewVersion { version, reply }).await?
    }

    pub async fn read_version(&self) -> Result<bool, SchedulerError> {
        self.request(|reply| Command::ReadVersion { reply }).await?
    }

    pub async fn deploy(
        &self,
        reason: impl Into<String>,
        priority: TaskPriority,
        agent: Option<String>,
    ) -> Result<usize, SchedulerError> {
        let reason = reason.into();
        self.request(|reply| Command::Deploy { reason, priority, agent, reply }).await
    }

    pub async fn repair(
        &self,
        reason: impl Into<String>,
        priority: TaskPriority,
        agent: Option<String>,
    ) -> Result<usize, SchedulerError> {
        let reason = reason.into();
        self.request(|reply| Command::Repair { reason, priority, agent, reply }).await
    }

    pub async fn deploy_resource(
        &self,
        resource: ResourceId,
        reason: impl Into<String>,
        priority: TaskPriority,
    ) -> Result<Enqueued, SchedulerError> {
        let reason = reason.into();
        self.request(|reply| Command::DeployResource { resource, reason, priority, reply })
            .await?
    }

    pub async fn dry_run(
        &self,
        dryrun_id: DryRunId,
        version: u64,
    ) -> Result<usize, SchedulerError> {
        self.request(|reply| Command::DryRun { dryrun_id, version, reply }).await?
    }

    pub async fn get_facts(&self, resource: ResourceId) -> Result<Enqueued, SchedulerError> {
        self.request(|reply| Command::GetFacts { resource, reply }).await?
    }

    pub async fn get_resource_state(
        &self,
        resource: ResourceId,
    ) -> Result<Option<ResourceState>, SchedulerError> {
        self.request(|reply| Command::GetResourceState { resource, reply }).await
    }

    pub async fn reload_all_timers(&self) -> Result<(), SchedulerError> {
        self.request(|reply| Command::ReloadAllTimers { reply }).await
    }

    pub async fn reload_config(&self, config: SchedulerConfig) -> Result<bool, SchedulerError> {
        let config = Box::new(config);
        self.request(|reply| Command::ReloadConfig { config, reply }).await
    }

    pub async fn status_report(&self) -> Result<StatusReport, SchedulerError> {
        self.request(|reply| Command::StatusReport { reply }).await?
    }

    pub async fn purge_orphans(&self) -> Result<usize, SchedulerError> {
        self.request(|reply| Command::PurgeOrphans { reply }).await
    }

    pub async fn pause_agent(&self, agent: impl Into<String>) -> Result<bool, SchedulerError> {
        let agent = agent.into();
        self.request(|reply| Command::PauseAgent { agent, reply }).await?
    }

    pub async fn resume_agent(&self, agent: impl Into<String>) -> Result<bool, SchedulerError> {
        let agent = agent.into();
        self.request(|reply| Command::ResumeAgent { agent, reply }).await?
    }

    pub async fn halt(&self) -> Result<bool, SchedulerError> {
        self.request(|reply| Command::Halt { reply }).await?
    }

    pub async fn resume(&self) -> Result<bool, SchedulerError> {
        self.request(|reply| Command::Resume { reply }).await?
    }

    /// Ask the scheduler to stop. Queued work is dropped; in-flight work
    /// gets the configured grace period before it is cancelled.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<P, E, C, G> ResourceScheduler<P, E, C, G>
where
    P: StatePersistence,
    E: Executor,
    C: Clock,
    G: IdGen,
{
    /// Move the scheduler onto its own task. The returned join handle
    /// resolves once shutdown has finished.
    pub fn spawn(self) -> (SchedulerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let shutdown = CancellationToken::new();
        let handle = SchedulerHandle { tx, shutdown: shutdown.clone() };
        let task = tokio::spawn(self.run(rx, shutdown));
        (handle, task)
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>, shutdown: CancellationToken) {
        tracing::info!(env = %self.env, "scheduler running");
        loop {
            self.fire_timers();
            self.dispatch_ready();
            let wake = self.timers.next_deadline().map(Instant::from_std);
            let sleep = tokio::time::sleep_until(wake.unwrap_or_else(Instant::now));

            tokio::select! {
                _ = shutdown.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                Some(joined) = self.running.join_next(), if !self.running.is_empty() => {
                    self.on_joined(joined).await;
                }
                _ = sleep, if wake.is_some() => {}
            }
        }
        commands.close();
        self.shutdown().await;
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::NewVersion { version, reply } => {
                let _ = reply.send(self.new_version(version).await);
            }
            Command::ReadVersion { reply } => {
                let _ = reply.send(self.read_version().await);
            }
            Command::Deploy { reason, priority, agent, reply } => {
                let _ = reply.send(self.deploy(&reason, priority, agent.as_deref()));
            }
            Command::Repair { reason, priority, agent, reply } => {
                let _ = reply.send(self.repair(&reason, priority, agent.as_deref()));
            }
            Command::DeployResource { resource, reason, priority, reply } => {
                let _ = reply.send(self.deploy_resource(&resource, &reason, priority));
            }
            Command::DryRun { dryrun_id, version, reply } => {
                let _ = reply.send(self.dry_run(dryrun_id, version).await);
            }
            Command::GetFacts { resource, reply } => {
                let _ = reply.send(self.get_facts(&resource));
            }
            Command::GetResourceState { resource, reply } => {
                let _ = reply.send(self.get_resource_state(&resource));
            }
            Command::ReloadAllTimers { reply } => {
                self.reload_all_timers();
                let _ = reply.send(());
            }
            Command::ReloadConfig { config, reply } => {
                let _ = reply.send(self.reload_config(*config));
            }
            Command::StatusReport { reply } => {
                let _ = reply.send(self.status_report().await);
            }
            Command::PurgeOrphans { reply } => {
                let _ = reply.send(self.purge_orphans());
            }
            Command::PauseAgent { agent, reply } => {
                let _ = reply.send(self.pause_agent(&agent).await);
            }
            Command::ResumeAgent { agent, reply } => {
                let _ = reply.send(self.resume_agent(&agent).await);
            }
            Command::Halt { reply } => {
                let _ = reply.send(self.halt().await);
            }
            Command::Resume { reply } => {
                let _ = reply.send(self.resume().await);
            }
        }
    }

    /// Stop: drop queued work and timers, let in-flight tasks finish within
    /// the grace period, then cancel them and wait one more grace period
    /// before aborting what is left.
    pub async fn shutdown(&mut self) {
        self.shutting_down = true;
        let dropped = self.queue.clear_pending();
        self.dryruns.clear();
        self.pending_events.clear();
        self.timers.stop_all();
        tracing::info!(dropped, in_flight = self.running.len(), "scheduler shutting down");

        let grace = self.config.shutdown_grace();
        if !self.drain_within(grace).await {
            tracing::warn!(
                in_flight = self.running.len(),
                "grace period over, cancelling in-flight tasks"
            );
            self.cancel.cancel();
            if !self.drain_within(grace).await {
                let aborted = self.abort_executing();
                tracing::error!(aborted, "aborting in-flight tasks");
                while let Some(joined) = self.running.join_next().await {
                    self.on_joined(joined).await;
                }
            }
        }
        tracing::info!(env = %self.env, "scheduler stopped");
    }

    /// Fold in completions until none are running or `grace` runs out
    async fn drain_within(&mut self, grace: Duration) -> bool {
        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = self.running.join_next().await {
                self.on_joined(joined).await;
            }
        });
        drained.await.is_ok()
    }
}
