// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-resource and global deploy/repair timers.
//!
//! At most one timer per resource. Global cron schedules fire for the whole
//! environment and coexist with per-resource interval timers.

use chrono::{DateTime, TimeDelta, Utc};
use cv_core::{
    Blocked, Clock, Compliance, CronSchedule, ResourceId, ResourceState, SchedulerConfig,
    TaskPriority, TimerSetting,
};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Which periodic trigger a timer stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Deploy,
    Repair,
}

cv_core::simple_display! {
    TimerKind {
        Deploy => "deploy",
        Repair => "repair",
    }
}

impl TimerKind {
    pub fn priority(self) -> TaskPriority {
        match self {
            TimerKind::Deploy => TaskPriority::IntervalDeploy,
            TimerKind::Repair => TaskPriority::IntervalRepair,
        }
    }
}

/// A scheduled per-resource trigger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceTimer {
    pub kind: TimerKind,
    /// Wall-clock time the timer is due
    pub due: DateTime<Utc>,
    pub fires_at: Instant,
    pub reason: String,
}

impl ResourceTimer {
    pub fn priority(&self) -> TaskPriority {
        self.kind.priority()
    }
}

#[derive(Debug, Clone)]
struct GlobalTimer {
    kind: TimerKind,
    schedule: CronSchedule,
    fires_at: Instant,
}

/// A timer that came due
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerFire {
    /// Deploy or repair one resource
    Resource { resource: ResourceId, kind: TimerKind, reason: String },
    /// Deploy or repair the whole environment
    Global { kind: TimerKind, reason: String },
}

impl TimerFire {
    pub fn kind(&self) -> TimerKind {
        match self {
            TimerFire::Resource { kind, .. } | TimerFire::Global { kind, .. } => *kind,
        }
    }

    pub fn priority(&self) -> TaskPriority {
        self.kind().priority()
    }
}

pub struct TimerManager<C: Clock> {
    clock: C,
    deploy: TimerSetting,
    repair: TimerSetting,
    timers: HashMap<ResourceId, ResourceTimer>,
    global: Vec<GlobalTimer>,
}

impl<C: Clock> TimerManager<C> {
    pub fn new(clock: C, config: &SchedulerConfig) -> Self {
        let mut manager = Self {
            clock,
            deploy: config.deploy_interval.clone(),
            repair: config.repair_interval.clone(),
            timers: HashMap::new(),
            global: Vec::new(),
        };
        manager.register_global();
        manager
    }

    fn register_global(&mut self) {
        self.global.clear();
        let settings =
            [(TimerKind::Deploy, self.deploy.clone()), (TimerKind::Repair, self.repair.clone())];
        for (kind, setting) in settings {
            let Some(schedule) = setting.cron() else {
                continue;
            };
            match self.next_cron_fire(schedule) {
                Some(fires_at) => {
                    tracing::info!(%kind, cron = %schedule, "registered global cron schedule");
                    self.global.push(GlobalTimer { kind, schedule: schedule.clone(), fires_at });
                }
                None => tracing::warn!(%kind, cron = %schedule, "cron schedule never fires"),
            }
        }
    }

    fn next_cron_fire(&self, schedule: &CronSchedule) -> Option<Instant> {
        let now = self.clock.utc_now();
        let next = schedule.next_after(now)?;
        Some(self.instant_for(next, now))
    }

    fn instant_for(&self, due: DateTime<Utc>, now: DateTime<Utc>) -> Instant {
        let delay = (due - now).to_std().unwrap_or(Duration::ZERO);
        self.clock.now() + delay
    }

    /// Schedule, reschedule or cancel the timer of `resource` from its state.
    ///
    /// A blocked or never-deployed resource has no timer. A compliant or
    /// temporarily blocked one only gets a repair timer. Anything else
    /// gets whichever of the deploy and repair intervals comes first.
    pub fn update_timer(&mut self, resource: &ResourceId, state: &ResourceState) {
        let deploy = self.deploy.interval();
        let repair = self.repair.interval();
        if state.blocked == Blocked::Blocked || (deploy.is_none() && repair.is_none()) {
            self.cancel_timer(resource);
            return;
        }
        let Some(last_deployed) = state.last_deployed else {
            self.cancel_timer(resource);
            return;
        };

        let repair_only = state.blocked == Blocked::TemporarilyBlocked
            || state.compliance == Compliance::Compliant;
        let chosen = match (deploy, repair) {
            _ if repair_only => repair.map(|r| (TimerKind::Repair, r)),
            (Some(d), Some(r)) if r < d => Some((TimerKind::Repair, r)),
            (Some(d), _) => Some((TimerKind::Deploy, d)),
            (None, Some(r)) => Some((TimerKind::Repair, r)),
            (None, None) => None,
        };
        let Some((kind, interval)) = chosen else {
            self.cancel_timer(resource);
            return;
        };
        let due = TimeDelta::from_std(interval)
            .ok()
            .and_then(|delta| last_deployed.checked_add_signed(delta));
        match due {
            Some(due) => self.set_timer(resource, kind, due, interval),
            None => self.cancel_timer(resource),
        }
    }

    /// Like [`update_timer`](Self::update_timer), but a timer that is
    /// already due moves one interval past now. Used when a fired timer's
    /// task never ran, so it does not fire again on the next tick.
    pub fn rearm_timer(&mut self, resource: &ResourceId, state: &ResourceState) {
        self.update_timer(resource, state);
        let now = self.clock.utc_now();
        let Some(timer) = self.timers.get(resource) else {
            return;
        };
        if timer.due > now {
            return;
        }
        let kind = timer.kind;
        let interval = match kind {
            TimerKind::Deploy => self.deploy.interval(),
            TimerKind::Repair => self.repair.interval(),
        };
        let due = interval.and_then(|interval| {
            let delta = TimeDelta::from_std(interval).ok()?;
            Some((now.checked_add_signed(delta)?, interval))
        });
        match due {
            Some((due, interval)) => self.set_timer(resource, kind, due, interval),
            None => self.cancel_timer(resource),
        }
    }

    /// Replace the timer of `resource`. Setting the timer it already has is
    /// a no-op.
    pub fn set_timer(
        &mut self,
        resource: &ResourceId,
        kind: TimerKind,
        due: DateTime<Utc>,
        interval: Duration,
    ) {
        if self.timers.get(resource).is_some_and(|t| t.kind == kind && t.due == due) {
            return;
        }
        let reason = format!(
            "Individual {kind} triggered for resource {resource} \
             because last {kind} happened more than {}s ago.",
            interval.as_secs()
        );
        let fires_at = self.instant_for(due, self.clock.utc_now());
        tracing::debug!(%resource, %kind, %due, "set timer");
        self.timers.insert(resource.clone(), ResourceTimer { kind, due, fires_at, reason });
    }

    pub fn cancel_timer(&mut self, resource: &ResourceId) {
        if self.timers.remove(resource).is_some() {
            tracing::debug!(%resource, "cancelled timer");
        }
    }

    pub fn timer(&self, resource: &ResourceId) -> Option<&ResourceTimer> {
        self.timers.get(resource)
    }

    pub fn has_timers(&self) -> bool {
        !self.timers.is_empty() || !self.global.is_empty()
    }

    /// Number of per-resource timers
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Global cron schedules currently registered
    pub fn global_schedules(&self) -> Vec<(TimerKind, &CronSchedule)> {
        self.global.iter().map(|g| (g.kind, &g.schedule)).collect()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers
            .values()
            .map(|t| t.fires_at)
            .chain(self.global.iter().map(|g| g.fires_at))
            .min()
    }

    /// Remove and return every due per-resource timer, and re-arm each due
    /// global schedule for its next occurrence
    pub fn fired_timers(&mut self) -> Vec<TimerFire> {
        let now = self.clock.now();
        let mut due: Vec<(ResourceId, ResourceTimer)> = Vec::new();
        self.timers.retain(|rid, timer| {
            if timer.fires_at <= now {
                due.push((rid.clone(), timer.clone()));
                false
            } else {
                true
            }
        });
        due.sort_by(|a, b| a.1.fires_at.cmp(&b.1.fires_at).then_with(|| a.0.cmp(&b.0)));
        let mut fired: Vec<TimerFire> = due
            .into_iter()
            .map(|(resource, timer)| TimerFire::Resource {
                resource,
                kind: timer.kind,
                reason: timer.reason,
            })
            .collect();

        let mut global = std::mem::take(&mut self.global);
        global.retain_mut(|timer| {
            if timer.fires_at > now {
                return true;
            }
            fired.push(TimerFire::Global {
                kind: timer.kind,
                reason: format!(
                    "Global {} triggered because of cron expression for {} interval: '{}'",
                    timer.kind, timer.kind, timer.schedule
                ),
            });
            match self.next_cron_fire(&timer.schedule) {
                Some(fires_at) => {
                    timer.fires_at = fires_at;
                    true
                }
                None => false,
            }
        });
        self.global = global;
        fired
    }

    /// Swap in new deploy/repair settings. Returns whether anything changed;
    /// if so every per-resource timer is dropped and must be re-derived.
    pub fn reload_config(&mut self, config: &SchedulerConfig) -> bool {
        if self.deploy == config.deploy_interval && self.repair == config.repair_interval {
            return false;
        }
        tracing::info!(
            deploy = %config.deploy_interval,
            repair = %config.repair_interval,
            "timer settings changed"
        );
        self.deploy = config.deploy_interval.clone();
        self.repair = config.repair_interval.clone();
        self.timers.clear();
        self.register_global();
        true
    }

    /// Cancel everything, per-resource and global
    pub fn stop_all(&mut self) {
        self.timers.clear();
        self.global.clear();
    }
}

#[cfg(test)]
#[path = "timers_tests.rs"]
mod tests;
