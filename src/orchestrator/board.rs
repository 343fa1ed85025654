//! Task Board - the orchestrator's task-assignment state machine
//!
//! Owns tasks, the pending queue and the bot registry. It is synchronous and
//! never touches the bus: every mutation returns the messages it wants
//! published, and the orchestrator actor publishes them after the reaction.
//!
//! Task lifecycle:
//!   Pending -> Assigned -> InProgress -> Completed
//!                                     -> Failed -> Pending (retry) | Abandoned
//!   Pending | Assigned -> Cancelled
//!   InProgress + cancel -> abort ack -> Failed -> Abandoned (or retry policy)

use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::command::{Command, CommandError, CommandResponse};
use super::config::OrchestratorConfig;
use super::queue::TaskQueue;
use super::state::{Availability, BotRecord, FleetSnapshot};
use super::task::{Task, TaskSpec, TaskStatus};
use super::ORCHESTRATOR_ID;
use crate::bank::BankRequest;
use crate::bot::{BotDirective, BotReport};
use crate::bus::topic::{bot_task, BANK_REQUEST, ORCHESTRATOR_RESPONSE};
use crate::bus::{Outbound, Payload};
use crate::error::{AssignmentConflict, FleetError, OfflineTimeout, ProtocolError};
use crate::ui::{AlertLevel, UiEvent};

pub struct TaskBoard {
    config: OrchestratorConfig,
    /// Non-terminal tasks
    tasks: HashMap<String, Task>,
    /// Terminal tasks in the order they finished
    archive: Vec<Task>,
    queue: TaskQueue,
    bots: BTreeMap<String, BotRecord>,
    task_counter: u64,
    idle_counter: u64,
}

impl TaskBoard {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            tasks: HashMap::new(),
            archive: Vec::new(),
            queue: TaskQueue::new(),
            bots: BTreeMap::new(),
            task_counter: 0,
            idle_counter: 0,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks
            .get(task_id)
            .or_else(|| self.archive.iter().rev().find(|t| t.id == task_id))
    }

    pub fn bot(&self, bot_id: &str) -> Option<&BotRecord> {
        self.bots.get(bot_id)
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    /// Pending task ids in assignment order
    pub fn pending(&self) -> Vec<String> {
        self.queue.ordered()
    }

    // ---------------------------------------------------------------------
    // Control surface
    // ---------------------------------------------------------------------

    /// React to a command envelope; the response comes first in the result
    pub fn handle_command(&mut self, in_reply_to: Uuid, command: Command, now: Instant) -> Vec<Outbound> {
        let (response, effects) = match command {
            Command::EnqueueTask {
                task_kind,
                priority,
                required_capabilities,
                payload,
            } => {
                let spec = TaskSpec {
                    kind: task_kind,
                    priority,
                    required_capabilities,
                    payload,
                };
                match self.enqueue(spec) {
                    Ok((task_id, effects)) => (
                        CommandResponse::Enqueued {
                            in_reply_to,
                            task_id,
                        },
                        effects,
                    ),
                    Err(error) => (CommandResponse::Rejected { in_reply_to, error }, Vec::new()),
                }
            }
            Command::CancelTask { task_id } => match self.cancel(&task_id) {
                Ok((status, effects)) => (
                    CommandResponse::CancelAccepted {
                        in_reply_to,
                        task_id,
                        status,
                    },
                    effects,
                ),
                Err(error) => (CommandResponse::Rejected { in_reply_to, error }, Vec::new()),
            },
            Command::QueryState => (
                CommandResponse::State {
                    in_reply_to,
                    snapshot: self.snapshot(now),
                },
                Vec::new(),
            ),
        };

        if let CommandResponse::Rejected { error, .. } = &response {
            warn!(command = %in_reply_to, error = %error, "command rejected");
        }

        let mut out = vec![Outbound::new(
            ORCHESTRATOR_RESPONSE,
            Payload::CommandResponse(response),
        )];
        out.extend(effects);
        out
    }

    /// Create a task and run assignment
    pub fn enqueue(&mut self, spec: TaskSpec) -> Result<(String, Vec<Outbound>), CommandError> {
        if spec.kind.trim().is_empty() {
            return Err(CommandError::Malformed {
                reason: "task kind must not be empty".to_string(),
            });
        }
        if spec.required_capabilities.iter().any(|c| c.trim().is_empty()) {
            return Err(CommandError::Malformed {
                reason: "capability tags must not be empty".to_string(),
            });
        }

        let before = self.depth();
        self.task_counter += 1;
        let task_id = format!("task-{}", self.task_counter);
        let task = Task::new(task_id.clone(), spec);
        info!(
            task_id = %task_id,
            kind = %task.kind,
            priority = task.priority,
            "task enqueued"
        );

        let mut out = vec![task_event(&task)];
        self.queue.push(&task_id, task.priority);
        self.tasks.insert(task_id.clone(), task);
        out.extend(self.assign());
        Ok((task_id, self.with_depth(before, out)))
    }

    /// Cancel a task. Returns the status the task is in afterwards.
    pub fn cancel(&mut self, task_id: &str) -> Result<(TaskStatus, Vec<Outbound>), CommandError> {
        let Some(task) = self.tasks.get(task_id) else {
            return Err(match self.task(task_id) {
                Some(archived) => CommandError::AlreadyTerminal {
                    task_id: task_id.to_string(),
                    status: archived.status,
                },
                None => CommandError::UnknownTask {
                    task_id: task_id.to_string(),
                },
            });
        };
        let status = task.status;
        let assignee = task.assignee.clone();
        let before = self.depth();
        let mut out = Vec::new();

        let after = match (status, assignee) {
            (TaskStatus::Pending, _) => {
                self.queue.remove(task_id);
                out.extend(self.finish(task_id, TaskStatus::Cancelled, None));
                TaskStatus::Cancelled
            }
            (TaskStatus::Assigned, Some(bot_id)) => {
                out.extend(self.finish(task_id, TaskStatus::Cancelled, None));
                self.release_bot(&bot_id);
                out.push(abort_directive(&bot_id, task_id));
                out.extend(self.assign());
                TaskStatus::Cancelled
            }
            (TaskStatus::InProgress, Some(bot_id)) => {
                if let Some(task) = self.tasks.get_mut(task_id) {
                    task.cancel_requested = true;
                }
                out.push(abort_directive(&bot_id, task_id));
                TaskStatus::InProgress
            }
            (status, assignee) => {
                // Bound status without an assignee; abandon rather than guess
                let conflict = AssignmentConflict::MissingAssignee {
                    task_id: task_id.to_string(),
                    status: status.to_string(),
                };
                error!(task_id, ?assignee, error = %conflict, "inconsistent task on cancel");
                self.queue.remove(task_id);
                out.extend(self.abandon(task_id, conflict.to_string()));
                TaskStatus::Abandoned
            }
        };
        info!(task_id, from = %status, to = %after, "task cancel requested");
        Ok((after, self.with_depth(before, out)))
    }

    // ---------------------------------------------------------------------
    // Bot reports
    // ---------------------------------------------------------------------

    /// Apply a report from `bot.<id>.message`.
    ///
    /// Stale or foreign reports are returned as errors and leave state untouched.
    pub fn handle_report(&mut self, report: BotReport, now: Instant) -> Result<Vec<Outbound>, FleetError> {
        match report {
            BotReport::Heartbeat {
                bot_id,
                capabilities,
            } => Ok(self.heartbeat(&bot_id, capabilities, now)),
            BotReport::Goodbye { bot_id, reason } => {
                Ok(self.mark_offline(&bot_id, &format!("left: {reason}")))
            }
            BotReport::Started { bot_id, task_id } => {
                self.check_owner(&bot_id, &task_id)?;
                self.touch(&bot_id, now);
                Ok(self.started(&task_id))
            }
            BotReport::Completed {
                bot_id,
                task_id,
                result,
            } => {
                self.check_owner(&bot_id, &task_id)?;
                self.touch(&bot_id, now);
                debug!(task_id = %task_id, bot_id = %bot_id, %result, "task result");
                Ok(self.completed(&bot_id, &task_id))
            }
            BotReport::Failed {
                bot_id,
                task_id,
                error,
                aborted,
            } => {
                self.check_owner(&bot_id, &task_id)?;
                self.touch(&bot_id, now);
                Ok(self.failed(&bot_id, &task_id, error, aborted))
            }
        }
    }

    /// Register a bot, bring an offline bot back, or refresh its deadline
    pub fn heartbeat(&mut self, bot_id: &str, capabilities: BTreeSet<String>, now: Instant) -> Vec<Outbound> {
        let before = self.depth();
        let seq = self.next_idle_seq();
        let mut out = Vec::new();
        match self.bots.get_mut(bot_id) {
            None => {
                info!(bot_id, ?capabilities, "bot registered");
                out.push(Outbound::ui(UiEvent::log(
                    ORCHESTRATOR_ID,
                    format!("bot {bot_id} joined"),
                )));
                self.bots.insert(
                    bot_id.to_string(),
                    BotRecord {
                        id: bot_id.to_string(),
                        capabilities,
                        availability: Availability::Idle,
                        current_task: None,
                        last_heartbeat: now,
                        idle_seq: seq,
                        registered_at: Utc::now(),
                    },
                );
            }
            Some(bot) if bot.availability == Availability::Offline => {
                info!(bot_id, "bot back online");
                out.push(Outbound::ui(UiEvent::log(
                    ORCHESTRATOR_ID,
                    format!("bot {bot_id} back online"),
                )));
                bot.availability = Availability::Idle;
                bot.capabilities = capabilities;
                bot.current_task = None;
                bot.idle_seq = seq;
                bot.last_heartbeat = now;
            }
            Some(bot) => {
                bot.capabilities = capabilities;
                bot.last_heartbeat = now;
            }
        }
        out.extend(self.assign());
        self.with_depth(before, out)
    }

    /// Mark bots whose heartbeat deadline passed as offline
    pub fn sweep(&mut self, now: Instant) -> Vec<Outbound> {
        let limit = self.config.heartbeat_timeout();
        let lapsed: Vec<OfflineTimeout> = self
            .bots
            .values()
            .filter(|bot| bot.availability != Availability::Offline)
            .filter_map(|bot| {
                let silent = now.saturating_duration_since(bot.last_heartbeat);
                (silent > limit).then(|| OfflineTimeout {
                    bot_id: bot.id.clone(),
                    silent_for_ms: silent.as_millis() as u64,
                    limit_ms: limit.as_millis() as u64,
                })
            })
            .collect();

        let mut out = Vec::new();
        for timeout in lapsed {
            warn!(bot_id = %timeout.bot_id, error = %timeout, "heartbeat lapsed");
            out.extend(self.mark_offline(&timeout.bot_id, &timeout.to_string()));
        }
        out
    }

    /// Take a bot out of rotation and reclaim its task. Repeated calls for an
    /// already offline bot change nothing.
    pub fn mark_offline(&mut self, bot_id: &str, reason: &str) -> Vec<Outbound> {
        let before = self.depth();
        let Some(bot) = self.bots.get_mut(bot_id) else {
            debug!(bot_id, "offline signal for unknown bot ignored");
            return Vec::new();
        };
        if bot.availability == Availability::Offline {
            return Vec::new();
        }
        bot.availability = Availability::Offline;
        let reclaimed = bot.current_task.take();
        warn!(bot_id, ?reclaimed, reason, "bot offline");

        let mut out = vec![
            Outbound::ui(UiEvent::alert(
                ORCHESTRATOR_ID,
                AlertLevel::Warning,
                format!("bot {bot_id} offline: {reason}"),
            )),
            Outbound::new(
                BANK_REQUEST,
                Payload::BankRequest(BankRequest::ForceRelease {
                    bot_id: bot_id.to_string(),
                }),
            ),
        ];

        if let Some(task_id) = reclaimed {
            let cancel_requested = self
                .tasks
                .get(&task_id)
                .map(|t| t.cancel_requested)
                .unwrap_or(false);
            if cancel_requested {
                out.extend(self.finish(&task_id, TaskStatus::Cancelled, None));
            } else if let Some(task) = self.tasks.get_mut(&task_id) {
                task.assignee = None;
                task.set_status(TaskStatus::Pending);
                self.queue.requeue(&task_id, task.priority);
                info!(task_id = %task_id, bot_id, "task reclaimed");
                out.push(task_event(task));
            }
        }

        out.extend(self.assign());
        self.with_depth(before, out)
    }

    fn started(&mut self, task_id: &str) -> Vec<Outbound> {
        let before = self.depth();
        let Some(task) = self.tasks.get_mut(task_id) else {
            return Vec::new();
        };
        if task.status != TaskStatus::Assigned {
            return Vec::new();
        }
        task.set_status(TaskStatus::InProgress);
        let out = vec![task_event(task)];
        self.with_depth(before, out)
    }

    fn completed(&mut self, bot_id: &str, task_id: &str) -> Vec<Outbound> {
        let before = self.depth();
        let mut out: Vec<Outbound> = self
            .finish(task_id, TaskStatus::Completed, None)
            .into_iter()
            .collect();
        info!(task_id, bot_id, "task completed");
        self.release_bot(bot_id);
        out.extend(self.assign());
        self.with_depth(before, out)
    }

    fn failed(&mut self, bot_id: &str, task_id: &str, error: String, aborted: bool) -> Vec<Outbound> {
        let before = self.depth();
        let retry_limit = self.config.retry_limit;
        let retry_aborted = self.config.retry_aborted_tasks;
        let mut out = Vec::new();

        let Some(task) = self.tasks.get_mut(task_id) else {
            return out;
        };
        task.failures += 1;
        task.last_error = Some(error.clone());
        task.assignee = None;
        task.set_status(TaskStatus::Failed);
        out.push(task_event(task));

        let abandon_reason = if aborted && task.cancel_requested && !retry_aborted {
            Some("cancelled while running".to_string())
        } else if task.failures > retry_limit {
            Some(format!(
                "failed {} times (retry limit {}): {}",
                task.failures, retry_limit, error
            ))
        } else {
            None
        };

        match abandon_reason {
            Some(reason) => {
                out.extend(self.abandon(task_id, reason));
            }
            None => {
                task.cancel_requested = false;
                task.set_status(TaskStatus::Pending);
                self.queue.requeue(task_id, task.priority);
                info!(
                    task_id,
                    bot_id,
                    failures = task.failures,
                    error = %error,
                    "task failed, re-enqueued"
                );
                out.push(task_event(task));
            }
        }

        self.release_bot(bot_id);
        out.extend(self.assign());
        self.with_depth(before, out)
    }

    // ---------------------------------------------------------------------
    // Assignment
    // ---------------------------------------------------------------------

    /// Bind pending tasks to idle bots until no eligible pair remains.
    ///
    /// Tasks are visited in priority order; a task no idle bot can run is
    /// skipped and stays pending. Among capable bots the one idle longest wins.
    pub fn assign(&mut self) -> Vec<Outbound> {
        let mut out = Vec::new();
        for task_id in self.queue.ordered() {
            if !self.bots.values().any(|b| b.availability == Availability::Idle) {
                break;
            }
            let Some(task) = self.tasks.get(&task_id) else {
                warn!(task_id = %task_id, "queued task has no record, dropping");
                self.queue.remove(&task_id);
                continue;
            };
            let candidate = self
                .bots
                .values()
                .filter(|b| b.availability == Availability::Idle)
                .filter(|b| b.can_run(&task.required_capabilities))
                .min_by_key(|b| b.idle_seq)
                .map(|b| b.id.clone());
            match candidate {
                Some(bot_id) => out.extend(self.bind(&task_id, &bot_id)),
                None => debug!(task_id = %task_id, "no idle bot with required capabilities"),
            }
        }
        out
    }

    fn bind(&mut self, task_id: &str, bot_id: &str) -> Vec<Outbound> {
        let conflict = match (self.tasks.get(task_id), self.bots.get(bot_id)) {
            (Some(task), _) if task.assignee.is_some() => Some(AssignmentConflict::TaskAlreadyAssigned {
                task_id: task_id.to_string(),
                assignee: task.assignee.clone().unwrap_or_default(),
            }),
            (_, Some(bot)) if bot.current_task.is_some() => Some(AssignmentConflict::BotAlreadyBusy {
                bot_id: bot_id.to_string(),
                task_id: bot.current_task.clone().unwrap_or_default(),
            }),
            (Some(_), Some(_)) => None,
            _ => return Vec::new(),
        };
        if let Some(conflict) = conflict {
            error!(task_id, bot_id, error = %conflict, "assignment conflict");
            self.queue.remove(task_id);
            return self.abandon(task_id, conflict.to_string());
        }

        self.queue.take(task_id);
        let mut out = Vec::new();
        if let Some(task) = self.tasks.get_mut(task_id) {
            task.assignee = Some(bot_id.to_string());
            task.set_status(TaskStatus::Assigned);
            out.push(Outbound::new(
                bot_task(bot_id),
                Payload::Directive(BotDirective::Assign {
                    assignment: task.assignment(),
                }),
            ));
            out.push(task_event(task));
        }
        if let Some(bot) = self.bots.get_mut(bot_id) {
            bot.availability = Availability::Busy;
            bot.current_task = Some(task_id.to_string());
        }
        info!(task_id, bot_id, "task assigned");
        out
    }

    // ---------------------------------------------------------------------
    // Helpers
    // ---------------------------------------------------------------------

    fn check_owner(&self, bot_id: &str, task_id: &str) -> Result<(), FleetError> {
        let Some(task) = self.tasks.get(task_id) else {
            return Err(ProtocolError::UnknownTask(task_id.to_string()).into());
        };
        if task.assignee.as_deref() != Some(bot_id) {
            return Err(AssignmentConflict::NotAssignee {
                task_id: task_id.to_string(),
                bot_id: bot_id.to_string(),
            }
            .into());
        }
        let points_back = self
            .bots
            .get(bot_id)
            .map(|b| b.current_task.as_deref() == Some(task_id))
            .unwrap_or(false);
        if !points_back {
            return Err(AssignmentConflict::Dangling {
                task_id: task_id.to_string(),
                bot_id: bot_id.to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn touch(&mut self, bot_id: &str, now: Instant) {
        if let Some(bot) = self.bots.get_mut(bot_id) {
            if bot.availability != Availability::Offline {
                bot.last_heartbeat = now;
            }
        }
    }

    fn next_idle_seq(&mut self) -> u64 {
        self.idle_counter += 1;
        self.idle_counter
    }

    fn release_bot(&mut self, bot_id: &str) {
        let seq = self.next_idle_seq();
        if let Some(bot) = self.bots.get_mut(bot_id) {
            bot.current_task = None;
            if bot.availability == Availability::Busy {
                bot.availability = Availability::Idle;
                bot.idle_seq = seq;
            }
        }
    }

    /// Move a live task to the archive with a terminal status
    fn finish(&mut self, task_id: &str, status: TaskStatus, error: Option<String>) -> Option<Outbound> {
        let mut task = self.tasks.remove(task_id)?;
        task.set_status(status);
        if error.is_some() {
            task.last_error = error;
        }
        let event = task_event(&task);
        self.archive.push(task);
        Some(event)
    }

    /// Terminal failure: archive and alert the operator
    fn abandon(&mut self, task_id: &str, reason: String) -> Vec<Outbound> {
        warn!(task_id, reason = %reason, "task abandoned");
        let mut out: Vec<Outbound> = self
            .finish(task_id, TaskStatus::Abandoned, Some(reason.clone()))
            .into_iter()
            .collect();
        out.push(Outbound::ui(UiEvent::alert(
            ORCHESTRATOR_ID,
            AlertLevel::Critical,
            format!("task {task_id} abandoned: {reason}"),
        )));
        out
    }

    fn depth(&self) -> (usize, usize, usize) {
        let assigned = self
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Assigned)
            .count();
        let in_progress = self
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::InProgress)
            .count();
        (self.queue.len(), assigned, in_progress)
    }

    fn with_depth(&self, before: (usize, usize, usize), mut out: Vec<Outbound>) -> Vec<Outbound> {
        let (pending, assigned, in_progress) = self.depth();
        if (pending, assigned, in_progress) != before {
            out.push(Outbound::ui(UiEvent::QueueDepth {
                pending,
                assigned,
                in_progress,
            }));
        }
        out
    }

    pub fn snapshot(&self, now: Instant) -> FleetSnapshot {
        let pending = self.queue.ordered();
        let mut tasks: Vec<Task> = pending
            .iter()
            .filter_map(|id| self.tasks.get(id).cloned())
            .collect();
        let mut bound: Vec<Task> = self
            .tasks
            .values()
            .filter(|t| !self.queue.contains(&t.id))
            .cloned()
            .collect();
        bound.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        tasks.extend(bound);

        FleetSnapshot {
            tasks,
            archived: self.archive.clone(),
            bots: self.bots.values().map(|b| b.view(now)).collect(),
            queue: self.queue.stats(),
            taken_at: Utc::now(),
        }
    }

    /// Abandon every task caught in an invariant violation and free the
    /// bots involved. The board keeps running.
    pub fn resolve_conflicts(&mut self) -> Vec<Outbound> {
        let conflicts = self.check_invariants();
        if conflicts.is_empty() {
            return Vec::new();
        }
        let before = self.depth();
        let mut out = Vec::new();
        let mut abandoned = BTreeSet::new();

        for conflict in conflicts {
            error!(error = %conflict, "assignment invariant violated");
            let reason = conflict.to_string();
            match conflict {
                AssignmentConflict::MissingAssignee { task_id, .. } => {
                    if abandoned.insert(task_id.clone()) {
                        self.queue.remove(&task_id);
                        out.extend(self.abandon(&task_id, reason));
                    }
                }
                AssignmentConflict::Dangling { task_id, bot_id } => {
                    let holds = self
                        .bots
                        .get(&bot_id)
                        .map(|b| b.current_task.as_deref() == Some(task_id.as_str()))
                        .unwrap_or(false);
                    if holds {
                        self.release_bot(&bot_id);
                        out.push(abort_directive(&bot_id, &task_id));
                    }
                    if self.tasks.contains_key(&task_id) && abandoned.insert(task_id.clone()) {
                        self.queue.remove(&task_id);
                        out.extend(self.abandon(&task_id, reason));
                    }
                }
                AssignmentConflict::BusyWithoutTask { bot_id } => self.release_bot(&bot_id),
                _ => {}
            }
        }

        out.extend(self.assign());
        self.with_depth(before, out)
    }

    /// Scan the task/bot mutual-consistency invariant
    pub fn check_invariants(&self) -> Vec<AssignmentConflict> {
        let mut violations = Vec::new();

        for task in self.tasks.values() {
            match (&task.assignee, task.status.is_bound()) {
                (None, true) => violations.push(AssignmentConflict::MissingAssignee {
                    task_id: task.id.clone(),
                    status: task.status.to_string(),
                }),
                (Some(bot_id), true) => {
                    let points_back = self
                        .bots
                        .get(bot_id)
                        .map(|b| {
                            b.availability == Availability::Busy
                                && b.current_task.as_deref() == Some(task.id.as_str())
                        })
                        .unwrap_or(false);
                    if !points_back {
                        violations.push(AssignmentConflict::Dangling {
                            task_id: task.id.clone(),
                            bot_id: bot_id.clone(),
                        });
                    }
                }
                (Some(bot_id), false) => violations.push(AssignmentConflict::Dangling {
                    task_id: task.id.clone(),
                    bot_id: bot_id.clone(),
                }),
                (None, false) => {}
            }
        }

        for bot in self.bots.values() {
            match (&bot.current_task, bot.availability) {
                (None, Availability::Busy) => violations.push(AssignmentConflict::BusyWithoutTask {
                    bot_id: bot.id.clone(),
                }),
                (Some(task_id), availability) => {
                    let points_back = availability == Availability::Busy
                        && self
                            .tasks
                            .get(task_id)
                            .map(|t| t.assignee.as_deref() == Some(bot.id.as_str()))
                            .unwrap_or(false);
                    if !points_back {
                        violations.push(AssignmentConflict::Dangling {
                            task_id: task_id.clone(),
                            bot_id: bot.id.clone(),
                        });
                    }
                }
                (None, _) => {}
            }
        }

        violations
    }
}

fn task_event(task: &Task) -> Outbound {
    Outbound::ui(UiEvent::TaskUpdate {
        task_id: task.id.clone(),
        status: task.status,
        assignee: task.assignee.clone(),
        failures: task.failures,
        error: task.last_error.clone(),
    })
}

fn abort_directive(bot_id: &str, task_id: &str) -> Outbound {
    Outbound::new(
        bot_task(bot_id),
        Payload::Directive(BotDirective::Abort {
            task_id: task_id.to_string(),
        }),
    )
}
