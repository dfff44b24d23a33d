//! Per-task delivery coordinator.
//!
//! One [`DeliverySession`] owns the delivery of one task run's terminal
//! outcome. The session is a finite-state machine driven by a single
//! sequential loop: stream items, timer firings, and caller commands
//! are multiplexed with `select!`, so state transitions never need
//! cross-thread locking.
//!
//! Recovery escalates through three tiers: reconnect with exponential
//! backoff, a server-side resolve call, and unbounded periodic polling
//! as the durability floor. Whatever path finishes first, the terminal
//! outcome is observed exactly once.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use reportrun_core::{FinalReport, LogLevel, ProgressEvent, TaskRunId, TaskStatus};

use crate::channel::{EventStream, ProgressChannel, ResolveOutcome};
use crate::config::DeliveryConfig;
use crate::error::ClientError;

/// Connection state of a delivery session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Opening the live stream.
    Connecting,
    /// Consuming live events.
    Streaming,
    /// Waiting out a backoff before the next connection attempt.
    Reconnecting,
    /// Asking the server to resolve the run.
    FallbackResolving,
    /// Polling the status snapshot on a fixed interval.
    PeriodicPolling,
    /// Terminal; all resources released.
    Resolved,
}

/// Commands a caller can feed into a running session.
#[derive(Debug)]
pub enum DeliveryCommand {
    /// Out-of-band status check; may short-circuit to resolution or
    /// restart live delivery.
    ManualCheck,
    /// Tear the session down without resolving (navigation away).
    Abandon,
}

/// Progress updates a session reports to its caller.
#[derive(Debug, Clone)]
pub enum DeliveryUpdate {
    /// The session moved to a new state.
    StateChanged(DeliveryState),
    /// Source-processing counters advanced.
    Progress {
        sources_processed: u32,
        sources_total: u32,
    },
    /// A log line from the backend.
    Log { level: LogLevel, message: String },
    /// A reconnect attempt is scheduled.
    Reconnecting { attempt: u32, delay: Duration },
}

/// Terminal outcome of a delivery session.
#[derive(Debug, Clone)]
pub enum DeliveryOutcome {
    /// The run completed and was finalized.
    Success(FinalReport),
    /// The run finished without a report, or delivery failed
    /// permanently.
    Failure { status: TaskStatus, message: String },
    /// The caller abandoned the session before resolution.
    Abandoned,
}

/// Handle for feeding commands into a running session.
#[derive(Clone)]
pub struct DeliveryHandle {
    commands: mpsc::Sender<DeliveryCommand>,
}

impl DeliveryHandle {
    /// Request an out-of-band status check.
    pub async fn manual_check(&self) {
        let _ = self.commands.send(DeliveryCommand::ManualCheck).await;
    }

    /// Abandon the session.
    pub async fn abandon(&self) {
        let _ = self.commands.send(DeliveryCommand::Abandon).await;
    }
}

/// What woke the streaming loop up.
enum Driven {
    Item(Option<Result<ProgressEvent, ClientError>>),
    Command(DeliveryCommand),
}

/// Per-task delivery state machine.
pub struct DeliverySession<C> {
    channel: C,
    task_id: TaskRunId,
    config: DeliveryConfig,
    state: DeliveryState,
    reconnect_attempts: u32,
    last_event_time: Instant,
    task_complete: bool,
    stream: Option<EventStream>,
    commands: mpsc::Receiver<DeliveryCommand>,
    updates: mpsc::Sender<DeliveryUpdate>,
}

impl<C: ProgressChannel> DeliverySession<C> {
    /// Create a session for the given task run.
    ///
    /// Returns the session itself, a command handle, and the update
    /// receiver.
    pub fn new(
        channel: C,
        task_id: TaskRunId,
        config: DeliveryConfig,
    ) -> (Self, DeliveryHandle, mpsc::Receiver<DeliveryUpdate>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (update_tx, update_rx) = mpsc::channel(256);

        let session = Self {
            channel,
            task_id,
            config,
            state: DeliveryState::Connecting,
            reconnect_attempts: 0,
            last_event_time: Instant::now(),
            task_complete: false,
            stream: None,
            commands: cmd_rx,
            updates: update_tx,
        };
        (session, DeliveryHandle { commands: cmd_tx }, update_rx)
    }

    /// Drive the session until the terminal outcome is observed.
    pub async fn run(mut self) -> DeliveryOutcome {
        self.last_event_time = Instant::now();

        loop {
            let outcome = match self.state {
                DeliveryState::Connecting => self.connect().await,
                DeliveryState::Streaming => self.stream_events().await,
                DeliveryState::Reconnecting => self.reconnect().await,
                DeliveryState::FallbackResolving => self.fallback_resolve().await,
                DeliveryState::PeriodicPolling => self.poll_periodically().await,
                // Resolution exits through complete(); this arm is not
                // driven.
                DeliveryState::Resolved => Some(DeliveryOutcome::Abandoned),
            };

            if let Some(outcome) = outcome {
                return outcome;
            }
        }
    }

    async fn connect(&mut self) -> Option<DeliveryOutcome> {
        match self.channel.open_stream(&self.task_id).await {
            Ok(stream) => {
                self.stream = Some(stream);
                self.transition(DeliveryState::Streaming).await;
            }
            Err(error) => {
                warn!(task_id = %self.task_id, error = %error, "Failed to open progress stream");
                self.transition(DeliveryState::Reconnecting).await;
            }
        }
        None
    }

    async fn stream_events(&mut self) -> Option<DeliveryOutcome> {
        let mut stream = match self.stream.take() {
            Some(stream) => stream,
            None => {
                self.transition(DeliveryState::Reconnecting).await;
                return None;
            }
        };

        loop {
            let driven = tokio::select! {
                item = stream.next() => Driven::Item(item),
                Some(cmd) = self.commands.recv() => Driven::Command(cmd),
            };

            match driven {
                Driven::Item(Some(Ok(event))) => {
                    // A genuine event, not merely a successful open,
                    // proves the channel works again.
                    self.reconnect_attempts = 0;
                    self.last_event_time = Instant::now();

                    if let Some(outcome) = self.dispatch_event(event).await {
                        return Some(outcome);
                    }
                    if self.state != DeliveryState::Streaming {
                        return None;
                    }
                }
                Driven::Item(Some(Err(error))) => {
                    warn!(task_id = %self.task_id, error = %error, "Progress stream error");
                    self.transition(DeliveryState::Reconnecting).await;
                    return None;
                }
                Driven::Item(None) => {
                    debug!(task_id = %self.task_id, "Progress stream closed");
                    self.transition(DeliveryState::Reconnecting).await;
                    return None;
                }
                Driven::Command(DeliveryCommand::Abandon) => return self.abandon().await,
                Driven::Command(DeliveryCommand::ManualCheck) => {
                    // A healthy stream stays attached; the check only
                    // short-circuits if the task already finished.
                    if let (_, Some(outcome)) = self.manual_check().await {
                        return Some(outcome);
                    }
                }
            }
        }
    }

    /// Dispatch one live event by tag.
    async fn dispatch_event(&mut self, event: ProgressEvent) -> Option<DeliveryOutcome> {
        match event {
            ProgressEvent::Status { is_complete, .. } if is_complete => {
                // Success and failure resolve through the same path;
                // the resolve tier carries the authoritative result.
                self.transition(DeliveryState::FallbackResolving).await;
                None
            }
            ProgressEvent::Status { .. } => None,
            ProgressEvent::Progress {
                sources_processed,
                sources_total,
                ..
            } => {
                self.send_update(DeliveryUpdate::Progress {
                    sources_processed,
                    sources_total,
                })
                .await;
                None
            }
            ProgressEvent::Log { level, message } => {
                self.send_update(DeliveryUpdate::Log { level, message })
                    .await;
                None
            }
            ProgressEvent::Error { message } => {
                if is_recoverable(&message) {
                    warn!(task_id = %self.task_id, error = %message, "Recoverable stream error event");
                    self.transition(DeliveryState::Reconnecting).await;
                    None
                } else {
                    warn!(task_id = %self.task_id, error = %message, "Permanent stream error event");
                    self.complete(DeliveryOutcome::Failure {
                        status: TaskStatus::Failed,
                        message,
                    })
                    .await
                }
            }
        }
    }

    async fn reconnect(&mut self) -> Option<DeliveryOutcome> {
        self.reconnect_attempts += 1;
        let since_last_event = self.last_event_time.elapsed();

        if self.reconnect_attempts >= self.config.fast_fail_attempts
            && since_last_event < self.config.fast_fail_window
        {
            // Rapid repeated failures look non-transient (permission
            // loss, deleted run); stop burning the reconnect budget.
            warn!(
                task_id = %self.task_id,
                attempts = self.reconnect_attempts,
                ?since_last_event,
                "Stream failing fast, dropping to periodic polling"
            );
            self.transition(DeliveryState::PeriodicPolling).await;
            return None;
        }

        if self.reconnect_attempts > self.config.max_reconnect_attempts {
            warn!(
                task_id = %self.task_id,
                attempts = self.reconnect_attempts,
                "Reconnect budget exhausted, escalating to resolve"
            );
            self.transition(DeliveryState::FallbackResolving).await;
            return None;
        }

        let delay = backoff_delay(self.reconnect_attempts - 1, self.config.backoff_cap);
        debug!(
            task_id = %self.task_id,
            attempt = self.reconnect_attempts,
            delay_secs = delay.as_secs(),
            "Waiting before reconnect"
        );
        self.send_update(DeliveryUpdate::Reconnecting {
            attempt: self.reconnect_attempts,
            delay,
        })
        .await;

        if let Some(outcome) = self.wait_or_command(delay).await {
            return Some(outcome);
        }
        self.transition(DeliveryState::Connecting).await;
        None
    }

    async fn fallback_resolve(&mut self) -> Option<DeliveryOutcome> {
        match self.channel.resolve(&self.task_id).await {
            Ok(ResolveOutcome::Terminal(report)) => {
                let outcome = outcome_from_report(report);
                self.complete(outcome).await
            }
            Ok(ResolveOutcome::StillRunning) => {
                debug!(task_id = %self.task_id, "Resolve timed out server-side");
                self.transition(DeliveryState::PeriodicPolling).await;
                None
            }
            Err(error) => {
                // Escalate silently; polling is the durability floor.
                warn!(task_id = %self.task_id, error = %error, "Resolve failed");
                self.transition(DeliveryState::PeriodicPolling).await;
                None
            }
        }
    }

    async fn poll_periodically(&mut self) -> Option<DeliveryOutcome> {
        loop {
            let manual = {
                let sleep = tokio::time::sleep(self.config.poll_interval);
                tokio::pin!(sleep);
                'wait: loop {
                    let cmd = tokio::select! {
                        _ = &mut sleep => break 'wait false,
                        Some(cmd) = self.commands.recv() => cmd,
                    };
                    match cmd {
                        DeliveryCommand::Abandon => return self.abandon().await,
                        DeliveryCommand::ManualCheck => break 'wait true,
                    }
                }
            };

            match self.channel.poll_status(&self.task_id).await {
                Ok(snapshot) if snapshot.is_complete => {
                    return self.finalize_outcome(snapshot.status).await;
                }
                Ok(_) if manual => {
                    // Manual check while still running: give live
                    // delivery another chance.
                    self.reconnect_attempts = 0;
                    self.transition(DeliveryState::Connecting).await;
                    return None;
                }
                Ok(_) => {}
                Err(error) => {
                    // Polling never fails permanently; just keep going.
                    warn!(task_id = %self.task_id, error = %error, "Status poll failed, will retry");
                }
            }
        }
    }

    /// Out-of-band poll-then-finalize.
    ///
    /// Returns whether the task is still running, plus the session
    /// outcome if the check resolved it.
    async fn manual_check(&mut self) -> (bool, Option<DeliveryOutcome>) {
        match self.channel.poll_status(&self.task_id).await {
            Ok(snapshot) if snapshot.is_complete => {
                (false, self.finalize_outcome(snapshot.status).await)
            }
            Ok(_) => (true, None),
            Err(error) => {
                warn!(task_id = %self.task_id, error = %error, "Manual status check failed");
                (false, None)
            }
        }
    }

    /// Convert a terminal snapshot into the session outcome.
    async fn finalize_outcome(&mut self, status: TaskStatus) -> Option<DeliveryOutcome> {
        if status == TaskStatus::Completed {
            match self.channel.finalize(&self.task_id).await {
                Ok(report) => self.complete(DeliveryOutcome::Success(report)).await,
                Err(error) => {
                    // A finalizer error is one of the two user-visible
                    // failure modes.
                    self.complete(DeliveryOutcome::Failure {
                        status,
                        message: format!("finalize failed: {error}"),
                    })
                    .await
                }
            }
        } else {
            self.complete(DeliveryOutcome::Failure {
                status,
                message: "task run finished without a report".to_string(),
            })
            .await
        }
    }

    /// Sleep, but react to caller commands.
    ///
    /// Returns the outcome if a command resolved or abandoned the
    /// session; returns `None` when the wait ended (timer elapsed, or a
    /// manual check found the task still running and reset the
    /// reconnect budget).
    async fn wait_or_command(&mut self, duration: Duration) -> Option<DeliveryOutcome> {
        let sleep = tokio::time::sleep(duration);
        tokio::pin!(sleep);

        loop {
            let cmd = tokio::select! {
                _ = &mut sleep => return None,
                Some(cmd) = self.commands.recv() => cmd,
            };

            match cmd {
                DeliveryCommand::Abandon => return self.abandon().await,
                DeliveryCommand::ManualCheck => {
                    let (running, outcome) = self.manual_check().await;
                    if outcome.is_some() {
                        return outcome;
                    }
                    if running {
                        self.reconnect_attempts = 0;
                        return None;
                    }
                }
            }
        }
    }

    async fn abandon(&mut self) -> Option<DeliveryOutcome> {
        info!(task_id = %self.task_id, "Delivery session abandoned");
        self.complete(DeliveryOutcome::Abandoned).await
    }

    /// Resolve the session exactly once.
    ///
    /// Every resolution path funnels through here; the guard discards
    /// any late completion attempt, and resource release is idempotent.
    async fn complete(&mut self, outcome: DeliveryOutcome) -> Option<DeliveryOutcome> {
        if self.task_complete {
            return None;
        }
        self.task_complete = true;
        self.release();
        self.transition(DeliveryState::Resolved).await;
        info!(task_id = %self.task_id, "Delivery session resolved");
        Some(outcome)
    }

    /// Release owned resources. Safe to call repeatedly.
    fn release(&mut self) {
        self.stream = None;
    }

    async fn transition(&mut self, next: DeliveryState) {
        debug!(task_id = %self.task_id, from = ?self.state, to = ?next, "Delivery state change");
        self.state = next;
        self.send_update(DeliveryUpdate::StateChanged(next)).await;
    }

    async fn send_update(&self, update: DeliveryUpdate) {
        let _ = self.updates.send(update).await;
    }
}

/// Backoff before the k-th reconnect attempt (zero-based):
/// `min(2^k, cap)`.
fn backoff_delay(attempt: u32, cap: Duration) -> Duration {
    let exp = attempt.min(10);
    Duration::from_secs(1u64 << exp).min(cap)
}

/// Classify an error-event message as transient or permanent.
///
/// Unknown messages default to recoverable; the fast-fail heuristic
/// still catches a permanently broken channel.
fn is_recoverable(message: &str) -> bool {
    const PERMANENT: &[&str] = &[
        "unauthorized",
        "forbidden",
        "not found",
        "invalid task",
        "quota exceeded",
    ];

    let lower = message.to_lowercase();
    !PERMANENT.iter().any(|pattern| lower.contains(pattern))
}

fn outcome_from_report(report: FinalReport) -> DeliveryOutcome {
    match report.status {
        TaskStatus::Completed => DeliveryOutcome::Success(report),
        status => DeliveryOutcome::Failure {
            status,
            message: report
                .error
                .unwrap_or_else(|| "task run finished without a report".to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use futures_util::stream;

    use reportrun_core::StatusSnapshot;

    /// One scripted stream attempt.
    enum StreamScript {
        /// `open_stream` fails.
        OpenError(String),
        /// The stream yields these events, then closes.
        Events(Vec<ProgressEvent>),
        /// The stream opens and stays silent forever.
        Hang,
    }

    /// Scripted channel: every call pops the next scripted response and
    /// counts the call.
    struct ScriptedChannel {
        streams: Mutex<VecDeque<StreamScript>>,
        statuses: Mutex<VecDeque<StatusSnapshot>>,
        finalize_result: Mutex<Option<Result<FinalReport, String>>>,
        resolve_result: Mutex<Option<Result<ResolveOutcome, String>>>,
        open_calls: AtomicU32,
        poll_calls: AtomicU32,
        resolve_calls: AtomicU32,
        finalize_calls: AtomicU32,
    }

    impl ScriptedChannel {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                streams: Mutex::new(VecDeque::new()),
                statuses: Mutex::new(VecDeque::new()),
                finalize_result: Mutex::new(None),
                resolve_result: Mutex::new(None),
                open_calls: AtomicU32::new(0),
                poll_calls: AtomicU32::new(0),
                resolve_calls: AtomicU32::new(0),
                finalize_calls: AtomicU32::new(0),
            })
        }

        fn push_stream(&self, script: StreamScript) {
            self.streams.lock().unwrap().push_back(script);
        }

        fn push_status(&self, snapshot: StatusSnapshot) {
            self.statuses.lock().unwrap().push_back(snapshot);
        }

        fn set_resolve(&self, result: Result<ResolveOutcome, String>) {
            *self.resolve_result.lock().unwrap() = Some(result);
        }

        fn set_finalize(&self, result: Result<FinalReport, String>) {
            *self.finalize_result.lock().unwrap() = Some(result);
        }
    }

    #[async_trait]
    impl ProgressChannel for Arc<ScriptedChannel> {
        async fn open_stream(&self, _id: &TaskRunId) -> Result<EventStream, ClientError> {
            self.open_calls.fetch_add(1, Ordering::SeqCst);
            let script = self
                .streams
                .lock()
                .unwrap()
                .pop_front()
                .expect("unscripted open_stream call");
            match script {
                StreamScript::OpenError(message) => Err(ClientError::Connection(message)),
                StreamScript::Events(events) => Ok(Box::pin(stream::iter(
                    events.into_iter().map(Ok::<_, ClientError>),
                ))),
                StreamScript::Hang => {
                    Ok(Box::pin(stream::pending::<Result<ProgressEvent, ClientError>>()))
                }
            }
        }

        async fn poll_status(&self, _id: &TaskRunId) -> Result<StatusSnapshot, ClientError> {
            self.poll_calls.fetch_add(1, Ordering::SeqCst);
            let snapshot = self
                .statuses
                .lock()
                .unwrap()
                .pop_front()
                .expect("unscripted poll_status call");
            Ok(snapshot)
        }

        async fn resolve(&self, _id: &TaskRunId) -> Result<ResolveOutcome, ClientError> {
            self.resolve_calls.fetch_add(1, Ordering::SeqCst);
            match self.resolve_result.lock().unwrap().clone() {
                Some(Ok(outcome)) => Ok(outcome),
                Some(Err(message)) => Err(ClientError::Connection(message)),
                None => panic!("unscripted resolve call"),
            }
        }

        async fn finalize(&self, _id: &TaskRunId) -> Result<FinalReport, ClientError> {
            self.finalize_calls.fetch_add(1, Ordering::SeqCst);
            match self.finalize_result.lock().unwrap().clone() {
                Some(Ok(report)) => Ok(report),
                Some(Err(message)) => Err(ClientError::Connection(message)),
                None => panic!("unscripted finalize call"),
            }
        }
    }

    fn report(id: &TaskRunId, status: TaskStatus) -> FinalReport {
        FinalReport {
            task_run_id: id.clone(),
            status,
            title: Some("Scripted Report".to_string()),
            content: Some("body".to_string()),
            error: match status {
                TaskStatus::Failed => Some("backend gave up".to_string()),
                _ => None,
            },
            completed_at: None,
        }
    }

    fn session(
        channel: Arc<ScriptedChannel>,
        config: DeliveryConfig,
    ) -> (
        DeliverySession<Arc<ScriptedChannel>>,
        DeliveryHandle,
        mpsc::Receiver<DeliveryUpdate>,
        TaskRunId,
    ) {
        let id = TaskRunId::generate();
        let (session, handle, updates) = DeliverySession::new(channel, id.clone(), config);
        (session, handle, updates, id)
    }

    async fn drain(mut updates: mpsc::Receiver<DeliveryUpdate>) -> Vec<DeliveryUpdate> {
        let mut collected = Vec::new();
        while let Some(update) = updates.recv().await {
            collected.push(update);
        }
        collected
    }

    fn resolved_count(updates: &[DeliveryUpdate]) -> usize {
        updates
            .iter()
            .filter(|u| matches!(u, DeliveryUpdate::StateChanged(DeliveryState::Resolved)))
            .count()
    }

    #[test]
    fn test_backoff_table() {
        let cap = Duration::from_secs(30);
        assert_eq!(backoff_delay(0, cap), Duration::from_secs(1));
        assert_eq!(backoff_delay(1, cap), Duration::from_secs(2));
        assert_eq!(backoff_delay(2, cap), Duration::from_secs(4));
        assert_eq!(backoff_delay(4, cap), Duration::from_secs(16));
        assert_eq!(backoff_delay(5, cap), Duration::from_secs(30));
        assert_eq!(backoff_delay(10, cap), Duration::from_secs(30));
        assert_eq!(backoff_delay(31, cap), Duration::from_secs(30));
    }

    #[test]
    fn test_error_classification() {
        assert!(is_recoverable("connection reset by peer"));
        assert!(is_recoverable("read timeout"));
        assert!(is_recoverable("something entirely new"));
        assert!(!is_recoverable("401 Unauthorized"));
        assert!(!is_recoverable("quota exceeded for org"));
        assert!(!is_recoverable("task run not found"));
    }

    #[tokio::test]
    async fn test_complete_guard_fires_once() {
        let channel = ScriptedChannel::new();
        let (mut session, _handle, _updates, _id) = session(channel, DeliveryConfig::default());

        let first = session.complete(DeliveryOutcome::Abandoned).await;
        assert!(first.is_some());
        let second = session
            .complete(DeliveryOutcome::Failure {
                status: TaskStatus::Failed,
                message: "late".to_string(),
            })
            .await;
        assert!(second.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_streams_to_success() {
        let channel = ScriptedChannel::new();
        let (session, _handle, updates, id) = session(channel.clone(), DeliveryConfig::default());

        channel.push_stream(StreamScript::Events(vec![
            ProgressEvent::status(TaskStatus::Running),
            ProgressEvent::Progress {
                sources_processed: 4,
                sources_total: 8,
                recent_sources: vec![],
            },
            ProgressEvent::status(TaskStatus::Completed),
        ]));
        channel.set_resolve(Ok(ResolveOutcome::Terminal(report(
            &id,
            TaskStatus::Completed,
        ))));

        let run = tokio::spawn(session.run());
        let updates = drain(updates).await;
        let outcome = run.await.unwrap();

        assert!(matches!(outcome, DeliveryOutcome::Success(_)));
        assert_eq!(channel.open_calls.load(Ordering::SeqCst), 1);
        assert_eq!(channel.resolve_calls.load(Ordering::SeqCst), 1);
        assert_eq!(channel.finalize_calls.load(Ordering::SeqCst), 0);
        assert_eq!(resolved_count(&updates), 1);
        assert!(updates.iter().any(|u| matches!(
            u,
            DeliveryUpdate::Progress {
                sources_processed: 4,
                ..
            }
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_once_then_resolves() {
        let channel = ScriptedChannel::new();
        let (session, _handle, updates, id) = session(channel.clone(), DeliveryConfig::default());

        // First stream delivers a non-terminal status, then closes.
        channel.push_stream(StreamScript::Events(vec![ProgressEvent::status(
            TaskStatus::Running,
        )]));
        channel.push_stream(StreamScript::Events(vec![ProgressEvent::status(
            TaskStatus::Completed,
        )]));
        channel.set_resolve(Ok(ResolveOutcome::Terminal(report(
            &id,
            TaskStatus::Completed,
        ))));

        let run = tokio::spawn(session.run());
        let updates = drain(updates).await;
        let outcome = run.await.unwrap();

        assert!(matches!(outcome, DeliveryOutcome::Success(_)));
        assert_eq!(channel.open_calls.load(Ordering::SeqCst), 2);
        assert_eq!(resolved_count(&updates), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_fail_drops_to_polling() {
        let channel = ScriptedChannel::new();
        let (session, _handle, updates, id) = session(channel.clone(), DeliveryConfig::default());

        // Three immediate open failures inside the fast-fail window.
        for _ in 0..3 {
            channel.push_stream(StreamScript::OpenError("connection refused".to_string()));
        }
        channel.push_status(StatusSnapshot::of(TaskStatus::Completed));
        channel.set_finalize(Ok(report(&id, TaskStatus::Completed)));

        let run = tokio::spawn(session.run());
        let updates = drain(updates).await;
        let outcome = run.await.unwrap();

        assert!(matches!(outcome, DeliveryOutcome::Success(_)));
        // The remaining reconnect budget was skipped.
        assert_eq!(channel.open_calls.load(Ordering::SeqCst), 3);
        assert_eq!(channel.resolve_calls.load(Ordering::SeqCst), 0);
        assert_eq!(channel.finalize_calls.load(Ordering::SeqCst), 1);
        assert!(updates
            .iter()
            .any(|u| matches!(u, DeliveryUpdate::StateChanged(DeliveryState::PeriodicPolling))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_reset_only_on_genuine_event() {
        let channel = ScriptedChannel::new();
        let config = DeliveryConfig {
            // Isolate the counter behavior from the fast-fail shortcut.
            fast_fail_window: Duration::ZERO,
            ..DeliveryConfig::default()
        };
        let (session, _handle, updates, id) = session(channel.clone(), config);

        channel.push_stream(StreamScript::OpenError("refused".to_string()));
        // Opens fine but yields nothing: must NOT reset the counter.
        channel.push_stream(StreamScript::Events(vec![]));
        // Yields a genuine event: resets the counter.
        channel.push_stream(StreamScript::Events(vec![ProgressEvent::status(
            TaskStatus::Running,
        )]));
        channel.push_stream(StreamScript::OpenError("refused".to_string()));
        channel.push_stream(StreamScript::Events(vec![ProgressEvent::status(
            TaskStatus::Completed,
        )]));
        channel.set_resolve(Ok(ResolveOutcome::Terminal(report(
            &id,
            TaskStatus::Completed,
        ))));

        let run = tokio::spawn(session.run());
        let updates = drain(updates).await;
        let outcome = run.await.unwrap();

        assert!(matches!(outcome, DeliveryOutcome::Success(_)));
        let attempts: Vec<u32> = updates
            .iter()
            .filter_map(|u| match u {
                DeliveryUpdate::Reconnecting { attempt, .. } => Some(*attempt),
                _ => None,
            })
            .collect();
        // Open failure, silent close (no reset), then a reset by the
        // genuine event, then a post-event failure starting over at 1.
        assert_eq!(attempts, vec![1, 2, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_budget_escalates_to_resolve() {
        let channel = ScriptedChannel::new();
        let config = DeliveryConfig {
            max_reconnect_attempts: 2,
            fast_fail_window: Duration::ZERO,
            ..DeliveryConfig::default()
        };
        let (session, _handle, _updates, id) = session(channel.clone(), config);

        for _ in 0..3 {
            channel.push_stream(StreamScript::OpenError("refused".to_string()));
        }
        channel.set_resolve(Ok(ResolveOutcome::Terminal(report(
            &id,
            TaskStatus::Completed,
        ))));

        let outcome = session.run().await;

        assert!(matches!(outcome, DeliveryOutcome::Success(_)));
        assert_eq!(channel.open_calls.load(Ordering::SeqCst), 3);
        assert_eq!(channel.resolve_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_failure_is_delivered_not_errored() {
        let channel = ScriptedChannel::new();
        let (session, _handle, _updates, id) = session(channel.clone(), DeliveryConfig::default());

        channel.push_stream(StreamScript::Events(vec![ProgressEvent::status(
            TaskStatus::Failed,
        )]));
        channel.set_resolve(Ok(ResolveOutcome::Terminal(report(&id, TaskStatus::Failed))));

        let outcome = session.run().await;

        match outcome {
            DeliveryOutcome::Failure { status, message } => {
                assert_eq!(status, TaskStatus::Failed);
                assert_eq!(message, "backend gave up");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_failure_escalates_to_polling() {
        let channel = ScriptedChannel::new();
        let (session, _handle, _updates, id) = session(channel.clone(), DeliveryConfig::default());

        channel.push_stream(StreamScript::Events(vec![ProgressEvent::status(
            TaskStatus::Completed,
        )]));
        channel.set_resolve(Err("gateway fell over".to_string()));
        channel.push_status(StatusSnapshot::of(TaskStatus::Completed));
        channel.set_finalize(Ok(report(&id, TaskStatus::Completed)));

        let outcome = session.run().await;

        assert!(matches!(outcome, DeliveryOutcome::Success(_)));
        assert_eq!(channel.resolve_calls.load(Ordering::SeqCst), 1);
        assert_eq!(channel.finalize_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_continues_until_terminal() {
        let channel = ScriptedChannel::new();
        let (session, _handle, _updates, id) = session(channel.clone(), DeliveryConfig::default());

        for _ in 0..3 {
            channel.push_stream(StreamScript::OpenError("refused".to_string()));
        }
        // Two not-yet-terminal polls before the terminal one.
        channel.push_status(StatusSnapshot::of(TaskStatus::Running));
        channel.push_status(StatusSnapshot::of(TaskStatus::Running));
        channel.push_status(StatusSnapshot::of(TaskStatus::Completed));
        channel.set_finalize(Ok(report(&id, TaskStatus::Completed)));

        let outcome = session.run().await;

        assert!(matches!(outcome, DeliveryOutcome::Success(_)));
        assert_eq!(channel.poll_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_event_fails_session() {
        let channel = ScriptedChannel::new();
        let (session, _handle, _updates, _id) =
            session(channel.clone(), DeliveryConfig::default());

        channel.push_stream(StreamScript::Events(vec![ProgressEvent::Error {
            message: "403 Forbidden".to_string(),
        }]));

        let outcome = session.run().await;

        match outcome {
            DeliveryOutcome::Failure { message, .. } => assert_eq!(message, "403 Forbidden"),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(channel.finalize_calls.load(Ordering::SeqCst), 0);
        assert_eq!(channel.resolve_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recoverable_error_event_reconnects() {
        let channel = ScriptedChannel::new();
        let (session, _handle, _updates, id) = session(channel.clone(), DeliveryConfig::default());

        channel.push_stream(StreamScript::Events(vec![ProgressEvent::Error {
            message: "connection reset".to_string(),
        }]));
        channel.push_stream(StreamScript::Events(vec![ProgressEvent::status(
            TaskStatus::Completed,
        )]));
        channel.set_resolve(Ok(ResolveOutcome::Terminal(report(
            &id,
            TaskStatus::Completed,
        ))));

        let outcome = session.run().await;

        assert!(matches!(outcome, DeliveryOutcome::Success(_)));
        assert_eq!(channel.open_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finalizer_error_is_user_visible() {
        let channel = ScriptedChannel::new();
        let (session, _handle, _updates, _id) =
            session(channel.clone(), DeliveryConfig::default());

        for _ in 0..3 {
            channel.push_stream(StreamScript::OpenError("refused".to_string()));
        }
        channel.push_status(StatusSnapshot::of(TaskStatus::Completed));
        channel.set_finalize(Err("storage write failed".to_string()));

        let outcome = session.run().await;

        match outcome {
            DeliveryOutcome::Failure { message, .. } => {
                assert!(message.contains("finalize failed"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_check_resolves_during_backoff() {
        let channel = ScriptedChannel::new();
        let (session, handle, _updates, id) = session(channel.clone(), DeliveryConfig::default());

        channel.push_stream(StreamScript::OpenError("refused".to_string()));
        channel.push_status(StatusSnapshot::of(TaskStatus::Completed));
        channel.set_finalize(Ok(report(&id, TaskStatus::Completed)));

        handle.manual_check().await;
        let outcome = session.run().await;

        assert!(matches!(outcome, DeliveryOutcome::Success(_)));
        assert_eq!(channel.open_calls.load(Ordering::SeqCst), 1);
        assert_eq!(channel.finalize_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_check_restarts_live_delivery() {
        let channel = ScriptedChannel::new();
        let (session, handle, updates, id) = session(channel.clone(), DeliveryConfig::default());

        channel.push_stream(StreamScript::OpenError("refused".to_string()));
        // The manual check finds the task still running.
        channel.push_status(StatusSnapshot::of(TaskStatus::Running));
        channel.push_stream(StreamScript::Events(vec![ProgressEvent::status(
            TaskStatus::Completed,
        )]));
        channel.set_resolve(Ok(ResolveOutcome::Terminal(report(
            &id,
            TaskStatus::Completed,
        ))));

        handle.manual_check().await;
        let run = tokio::spawn(session.run());
        let updates = drain(updates).await;
        let outcome = run.await.unwrap();

        assert!(matches!(outcome, DeliveryOutcome::Success(_)));
        assert_eq!(channel.open_calls.load(Ordering::SeqCst), 2);
        let connecting = updates
            .iter()
            .filter(|u| matches!(u, DeliveryUpdate::StateChanged(DeliveryState::Connecting)))
            .count();
        assert!(connecting >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandon_tears_down_without_resolving() {
        let channel = ScriptedChannel::new();
        let (session, handle, _updates, _id) =
            session(channel.clone(), DeliveryConfig::default());

        channel.push_stream(StreamScript::Hang);

        let run = tokio::spawn(session.run());
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.abandon().await;
        let outcome = run.await.unwrap();

        assert!(matches!(outcome, DeliveryOutcome::Abandoned));
        assert_eq!(channel.resolve_calls.load(Ordering::SeqCst), 0);
        assert_eq!(channel.finalize_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_racing_terminal_event_and_manual_check_resolve_once() {
        let channel = ScriptedChannel::new();
        let (session, handle, updates, id) = session(channel.clone(), DeliveryConfig::default());

        channel.push_stream(StreamScript::Events(vec![ProgressEvent::status(
            TaskStatus::Completed,
        )]));
        // Either path may win the race; script both.
        channel.push_status(StatusSnapshot::of(TaskStatus::Completed));
        channel.set_resolve(Ok(ResolveOutcome::Terminal(report(
            &id,
            TaskStatus::Completed,
        ))));
        channel.set_finalize(Ok(report(&id, TaskStatus::Completed)));

        handle.manual_check().await;
        let run = tokio::spawn(session.run());
        let updates = drain(updates).await;
        let outcome = run.await.unwrap();

        assert!(matches!(outcome, DeliveryOutcome::Success(_)));
        assert_eq!(resolved_count(&updates), 1);
        let resolutions = channel.resolve_calls.load(Ordering::SeqCst)
            + channel.finalize_calls.load(Ordering::SeqCst);
        assert_eq!(resolutions, 1);
    }
}
