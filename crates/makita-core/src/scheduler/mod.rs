// Makita Scheduler
// Cooperative runtime: script tasks, run queue, timers and the host loop

pub mod clock;
pub mod task;
pub mod timer;

use std::cell::Cell;
use std::collections::VecDeque;
use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use indexmap::IndexMap;
use log::{debug, info, warn};
use mlua::{Function, HookTriggers, Lua, Table, Thread, ThreadStatus, Value, VmState};

pub use clock::{Clock, ManualClock, SystemClock};
pub use task::{decode_suspension, Resume, Suspension, Task, TaskId, TaskState};
pub use timer::{SleepEntry, TimerSet};

use crate::bridge::{QueryAnswer, QueryBridge};
use crate::dispatch::{admit, route, Addressing, Admission, Route};
use crate::event::Event;
use crate::host::{Host, HostResult, Inbound, Polled};
use crate::notification::{Disposition, Fault, Notification};
use crate::script::{
    response_to_lua, LoadError, ScriptApi, ScriptContext, ScriptRegistry, SharedContext,
};

/// Result type for runtime construction
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors creating the runtime
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("failed to initialize the script engine: {0}")]
    Lua(String),
}

/// Runtime tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Upper bound on one host wait
    pub poll_timeout: Duration,
    /// Lua instructions a task may run per resume
    pub step_budget: Option<u64>,
    pub addressing: Addressing,
    /// Keep firing timers after the host input closes, until none are left
    pub drain_timers_on_close: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(1),
            step_budget: None,
            addressing: Addressing::Auto,
            drain_timers_on_close: false,
        }
    }
}

/// Whether the host can still produce input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Closed,
}

/// Instruction budget, armed only while a task is being resumed
struct StepBudget {
    limit: u64,
    used: Cell<u64>,
    armed: Cell<bool>,
}

impl StepBudget {
    fn new(limit: u64) -> Rc<Self> {
        Rc::new(Self {
            limit,
            used: Cell::new(0),
            armed: Cell::new(false),
        })
    }

    /// Hooks are per coroutine, so every task thread gets its own
    fn attach(budget: &Rc<Self>, thread: &Thread) {
        let interval = budget.limit.clamp(1, 1000) as u32;
        let budget = Rc::clone(budget);
        thread.set_hook(
            HookTriggers::new().every_nth_instruction(interval),
            move |_lua, _debug| {
                if budget.charge(u64::from(interval)) {
                    Ok(VmState::Continue)
                } else {
                    Err(mlua::Error::RuntimeError(format!(
                        "execution step budget of {} instructions exceeded",
                        budget.limit
                    )))
                }
            },
        );
    }

    fn arm(&self) {
        self.used.set(0);
        self.armed.set(true);
    }

    fn disarm(&self) {
        self.armed.set(false);
    }

    /// Returns false once the budget is exhausted
    fn charge(&self, steps: u64) -> bool {
        if !self.armed.get() {
            return true;
        }
        let used = self.used.get() + steps;
        self.used.set(used);
        used <= self.limit
    }
}

/// The process-wide engine state.
///
/// Owns every task; hosts only see notifications, synthetic events and
/// forwarded queries. Everything runs on the thread that owns the runtime.
pub struct Runtime {
    config: RuntimeConfig,
    clock: Box<dyn Clock>,
    registry: ScriptRegistry,
    tasks: IndexMap<String, Task>,
    run_queue: VecDeque<String>,
    timers: TimerSet,
    queries: QueryBridge,
    notifications: Vec<Notification>,
    context: SharedContext,
    budget: Option<Rc<StepBudget>>,
    next_task_id: u64,
    api: ScriptApi,
    lua: Lua,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> RuntimeResult<Self> {
        Self::with_clock(config, Box::new(SystemClock))
    }

    pub fn with_clock(config: RuntimeConfig, clock: Box<dyn Clock>) -> RuntimeResult<Self> {
        let lua = Lua::new();
        let context = ScriptContext::shared();
        let api = ScriptApi::install(&lua, Rc::clone(&context))
            .map_err(|err| RuntimeError::Lua(err.to_string()))?;
        let budget = config.step_budget.map(StepBudget::new);

        Ok(Self {
            config,
            clock,
            registry: ScriptRegistry::new(),
            tasks: IndexMap::new(),
            run_queue: VecDeque::new(),
            timers: TimerSet::new(),
            queries: QueryBridge::new(),
            notifications: Vec::new(),
            context,
            budget,
            next_task_id: 0,
            api,
            lua,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &ScriptRegistry {
        &self.registry
    }

    /// Scratch table every script sees as `shared`
    pub fn shared(&self) -> &Table {
        &self.api.shared
    }

    pub fn task_state(&self, script: &str) -> Option<TaskState> {
        self.tasks.get(script).map(Task::state)
    }

    pub fn live_tasks(&self) -> usize {
        self.tasks.len()
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    pub fn pending_queries(&self) -> usize {
        self.queries.pending_count()
    }

    // ---- scripts ----

    /// Load or reload a script file; reports `Loaded` or a load fault
    pub fn load_script(&mut self, name: &str, path: &Path) -> Result<(), LoadError> {
        let result = self
            .registry
            .load(&self.lua, &self.api, name, path)
            .map(|_| ());
        self.report_load(name, result)
    }

    /// Load or reload a script from an in-memory body
    pub fn load_source(&mut self, name: &str, source: &str) -> Result<(), LoadError> {
        let result = self
            .registry
            .load_source(&self.lua, &self.api, name, source)
            .map(|_| ());
        self.report_load(name, result)
    }

    fn report_load(
        &mut self,
        name: &str,
        result: Result<(), LoadError>,
    ) -> Result<(), LoadError> {
        match &result {
            Ok(()) => {
                info!("loaded script {}", name);
                self.retire_previous(name);
                self.notifications.push(Notification::Loaded {
                    name: name.to_string(),
                });
            }
            Err(err) => {
                warn!("{}", err);
                self.fault(Fault::Load {
                    name: name.to_string(),
                    message: err.to_string(),
                });
            }
        }
        result
    }

    /// Make the next event for `script` start a task on the new body.
    /// An idle task is dropped now; a busy one finishes its cycle first.
    fn retire_previous(&mut self, script: &str) {
        match self.tasks.get_mut(script) {
            Some(task) if task.state().is_idle() => {
                debug!("dropping idle task {} after reload of {}", task.id(), script);
                self.remove_task(script);
            }
            Some(task) => task.mark_stale(),
            None => {}
        }
    }

    // ---- host loop ----

    /// One scheduler iteration: fire timers, poll the host, handle what it
    /// sent, then flush notifications, queries and synthetic events.
    /// Queries raised while handling an item are forwarded before the next item.
    pub fn tick<H: Host + ?Sized>(&mut self, host: &mut H) -> HostResult<Flow> {
        self.fire_timers();
        self.forward_queries(host)?;

        let flow = match host.poll(self.poll_timeout())? {
            Polled::Items(items) => {
                for item in items {
                    if let Inbound::Event(event) = &item {
                        host.observe(event);
                    }
                    self.handle(item);
                    // answers computed now must not see later events of the batch
                    self.forward_queries(host)?;
                }
                Flow::Continue
            }
            Polled::Closed => Flow::Closed,
        };

        self.flush(host)?;
        Ok(flow)
    }

    /// Announce readiness and loop until the host closes or `running` drops.
    pub fn run<H: Host + ?Sized>(&mut self, host: &mut H, running: &AtomicBool) -> HostResult<()> {
        self.notifications.insert(0, Notification::Ready);
        self.flush(host)?;
        info!("runtime ready with {} script(s)", self.registry.len());

        while running.load(Ordering::SeqCst) {
            if self.tick(host)? == Flow::Closed {
                info!("host input closed");
                if self.config.drain_timers_on_close {
                    self.drain_timers(host, running)?;
                }
                break;
            }
        }

        self.shutdown();
        Ok(())
    }

    /// Discard every task and queue; scripts get no chance to clean up
    pub fn shutdown(&mut self) {
        let tasks = self.tasks.len();
        self.tasks.clear();
        self.run_queue.clear();
        self.timers.clear();
        self.queries.clear();
        self.notifications.clear();
        let dropped = self.context.borrow_mut().discard_output();
        info!(
            "runtime shut down: discarded {} task(s) and {} unsent event(s)",
            tasks, dropped
        );
    }

    fn poll_timeout(&self) -> Duration {
        match self.timers.time_until_next(self.clock.now()) {
            Some(until) => until.min(self.config.poll_timeout),
            None => self.config.poll_timeout,
        }
    }

    fn drain_timers<H: Host + ?Sized>(&mut self, host: &mut H, running: &AtomicBool) -> HostResult<()> {
        debug!("draining {} pending timer(s)", self.timers.len());
        while running.load(Ordering::SeqCst) {
            let Some(wait) = self.timers.time_until_next(self.clock.now()) else {
                break;
            };
            self.clock.sleep(wait);
            self.fire_timers();
            self.flush(host)?;
        }
        Ok(())
    }

    fn handle(&mut self, item: Inbound) {
        match item {
            Inbound::Load { name, path } => {
                // failures are reported as notifications
                let _ = self.load_script(&name, &path);
            }
            Inbound::Event(event) => self.dispatch(event),
            Inbound::Answer(answer) => self.answer(answer),
            Inbound::Malformed(message) => {
                warn!("protocol error: {}", message);
                self.fault(Fault::Protocol(message));
            }
        }
    }

    fn flush<H: Host + ?Sized>(&mut self, host: &mut H) -> HostResult<()> {
        self.collect_logs();
        for notification in std::mem::take(&mut self.notifications) {
            host.notify(notification)?;
        }
        self.forward_queries(host)?;
        let events = self.context.borrow_mut().flush_output();
        if !events.is_empty() {
            host.deliver(events)?;
        }
        Ok(())
    }

    fn forward_queries<H: Host + ?Sized>(&mut self, host: &mut H) -> HostResult<()> {
        for request in self.queries.take_outgoing() {
            host.forward_query(request)?;
        }
        Ok(())
    }

    // ---- dispatch ----

    /// Hand an input event to its script(s)
    pub fn dispatch(&mut self, event: Event) {
        match route(self.config.addressing, &event) {
            Route::Script(script) => {
                if self.registry.contains(&script) {
                    self.offer(&script, event);
                } else {
                    debug!("event for unknown script {}", script);
                    self.fault(Fault::NotLoaded { script });
                }
            }
            Route::Broadcast => {
                for script in self.registry.names() {
                    self.offer(&script, event.clone());
                }
            }
            Route::Unaddressed => {
                self.fault(Fault::Protocol(format!("event has no target script: {}", event)));
            }
        }
    }

    fn offer(&mut self, script: &str, event: Event) {
        match admit(self.task_state(script)) {
            Admission::Spawn => {
                if let Err(err) = self.spawn(script) {
                    self.fault(Fault::Handler {
                        script: script.to_string(),
                        message: err.to_string(),
                    });
                    return;
                }
            }
            Admission::Hand => {}
            Admission::Busy => {
                debug!("dropping {} for busy script {}", event, script);
                self.fault(Fault::Busy {
                    script: script.to_string(),
                });
                return;
            }
        }

        if let Some(task) = self.tasks.get_mut(script) {
            task.schedule(Resume::Event(event));
            self.run_queue.push_back(script.to_string());
        }
        self.drain_run_queue();
    }

    fn spawn(&mut self, script: &str) -> mlua::Result<()> {
        let definition = self
            .registry
            .get(script)
            .ok_or_else(|| mlua::Error::RuntimeError(format!("script not loaded: {}", script)))?;
        let body: Function = self
            .api
            .task_body
            .call((definition.chunk().clone(), definition.env().clone()))?;
        let thread = self.lua.create_thread(body)?;
        if let Some(budget) = &self.budget {
            StepBudget::attach(budget, &thread);
        }

        self.next_task_id += 1;
        let id = TaskId(self.next_task_id);
        debug!("spawned task {} for {}", id, script);
        self.tasks
            .insert(script.to_string(), Task::new(id, script, thread));
        Ok(())
    }

    // ---- wakeups ----

    fn fire_timers(&mut self) {
        let due = self.timers.pop_due(self.clock.now());
        for entry in due {
            match self.tasks.get_mut(&entry.script) {
                Some(task)
                    if task.id() == entry.task && task.state() == TaskState::SleepWaiting =>
                {
                    task.schedule(Resume::Wake);
                    self.run_queue.push_back(entry.script);
                    self.drain_run_queue();
                }
                _ => debug!("dropping stale timer for {}", entry.script),
            }
        }
    }

    fn answer(&mut self, answer: QueryAnswer) {
        let Some(pending) = self.queries.resolve(answer.id) else {
            self.fault(Fault::Protocol(format!(
                "no pending state query with id {}",
                answer.id
            )));
            return;
        };

        let waiting = TaskState::QueryWaiting { id: answer.id };
        match self.tasks.get_mut(&pending.script) {
            Some(task) if task.id() == pending.task && task.state() == waiting => {
                task.schedule(Resume::Answer(answer.response));
                self.run_queue.push_back(pending.script);
                self.drain_run_queue();
            }
            _ => debug!("dropping answer {} for retired task", answer.id),
        }
    }

    // ---- execution ----

    fn drain_run_queue(&mut self) {
        while let Some(script) = self.run_queue.pop_front() {
            self.step(&script);
        }
    }

    /// Resume one runnable task until it suspends, finishes or fails
    fn step(&mut self, script: &str) {
        let Some(task) = self.tasks.get_mut(script) else {
            return;
        };
        if task.state() != TaskState::Running {
            return;
        }
        let input = task.take_input();
        let thread = task.thread().clone();
        let task_id = task.id();

        let args = match self.resume_value(input) {
            Ok(args) => args,
            Err(err) => return self.fail(script, err.to_string()),
        };

        self.context.borrow_mut().begin(script);
        if let Some(budget) = &self.budget {
            budget.arm();
        }
        let result = thread.resume::<(Option<String>, Value, Option<i64>)>(args);
        if let Some(budget) = &self.budget {
            budget.disarm();
        }
        let consumed = self.context.borrow_mut().end();
        self.collect_logs();

        if consumed {
            if let Some(task) = self.tasks.get_mut(script) {
                task.mark_consumed();
            }
        }

        let (op, first, arg) = match result {
            Ok(values) => values,
            Err(err) => return self.fail(script, err.to_string()),
        };
        if thread.status() != ThreadStatus::Resumable {
            return self.retire(script);
        }

        match decode_suspension(op, first, arg) {
            Ok(Suspension::Idle) => self.go_idle(script),
            Ok(Suspension::Sleep(duration)) => match self.clock.now().checked_add(duration) {
                Some(deadline) => {
                    self.timers.insert(script, task_id, deadline);
                    self.set_state(script, TaskState::SleepWaiting);
                }
                None => self.fail(script, format!("sleep of {:?} is out of range", duration)),
            },
            Ok(Suspension::Query(query)) => match self.queries.issue(script, task_id, query) {
                Ok(id) => self.set_state(script, TaskState::QueryWaiting { id }),
                Err(err) => self.fail(script, err.to_string()),
            },
            Err(err) => self.fail(script, err.to_string()),
        }
    }

    fn resume_value(&self, input: Option<Resume>) -> mlua::Result<Value> {
        match input {
            Some(Resume::Event(event)) => Ok(Value::UserData(self.lua.create_userdata(event)?)),
            Some(Resume::Answer(response)) => response_to_lua(&self.lua, response),
            Some(Resume::Wake) | None => Ok(Value::Nil),
        }
    }

    fn set_state(&mut self, script: &str, state: TaskState) {
        if let Some(task) = self.tasks.get_mut(script) {
            task.set_state(state);
        }
    }

    fn go_idle(&mut self, script: &str) {
        let (finished, stale) = match self.tasks.get_mut(script) {
            Some(task) => {
                task.set_state(TaskState::Idle);
                (task.finish_cycle(), task.is_stale())
            }
            None => (None, false),
        };
        if stale {
            debug!("retiring task for reloaded script {}", script);
            self.remove_task(script);
        }
        if let Some((event, consumed)) = finished {
            self.report_outcome(script, event, consumed);
        }
    }

    /// Body returned normally
    fn retire(&mut self, script: &str) {
        debug!("task for {} finished", script);
        let finished = self.remove_task(script).and_then(|mut task| task.finish_cycle());
        if let Some((event, consumed)) = finished {
            self.report_outcome(script, event, consumed);
        }
    }

    /// Tear down a failed task; its event counts as passed through
    fn fail(&mut self, script: &str, message: String) {
        warn!("handler error in {}: {}", script, message);
        let finished = self.remove_task(script).and_then(|mut task| task.finish_cycle());
        self.fault(Fault::Handler {
            script: script.to_string(),
            message,
        });
        if let Some((event, _)) = finished {
            self.report_outcome(script, event, false);
        }
    }

    fn remove_task(&mut self, script: &str) -> Option<Task> {
        let mut task = self.tasks.shift_remove(script)?;
        task.set_state(TaskState::Dead);
        self.timers.cancel_task(task.id());
        self.queries.cancel_task(task.id());
        Some(task)
    }

    fn report_outcome(&mut self, script: &str, event: Event, consumed: bool) {
        let disposition = if consumed {
            Disposition::Consume
        } else {
            Disposition::PassThrough
        };
        debug!("{} handled {} ({})", script, event, disposition);
        self.notifications.push(Notification::Outcome {
            script: script.to_string(),
            event,
            disposition,
        });
    }

    fn fault(&mut self, fault: Fault) {
        self.notifications.push(Notification::Error(fault));
    }

    fn collect_logs(&mut self) {
        let logs = self.context.borrow_mut().take_logs();
        self.notifications
            .extend(logs.into_iter().map(|log| Notification::Log {
                script: log.script,
                level: log.level,
                message: log.message,
            }));
    }
}
