//! Task generation, ordering and frame-stepped execution.
//!
//! The [`Scheduler`] owns the full pipeline: it turns a node correspondence
//! into one [`Task`] per mapped part, assigns every task a start and length
//! on a shared integer timeline, and then steps global time in fixed
//! increments, deforming geometry and appending one snapshot per frame to
//! the run's [`History`].
//!
//! Ordering happens in three phases, shrink then morph then grow, so parts
//! that disappear get out of the way before surviving parts move and new
//! parts fill in. Within the shrink and grow phases tasks are layered by
//! leaf peeling over structural adjacency; morphs all run concurrently.
//! Rigid groups collapse onto a shared start afterwards, then the timeline
//! is compacted and spaced.
//!
//! Execution is strictly sequential: each frame's blended link deltas and
//! relinked attachments feed the next frame, so frames are never computed
//! in parallel. A run can execute on a background worker through
//! [`Scheduler::spawn_blend`] and is cancelled cooperatively, keeping the
//! partial history.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use glam::DVec3;
use rand::seq::SliceRandom;

use crate::correspond::Correspondence;
use crate::depend;
use crate::error::{CorrespondError, ScheduleError};
use crate::events::{Event, EventBus};
use crate::history::History;
use crate::relink;
use crate::schedule::Schedule;
use crate::structure::{Graph, NULL_TOKEN, NodeKind};
use crate::task::{Task, TaskKind};

/// Default fraction of the run advanced per frame.
pub const DEFAULT_TIME_STEP: f64 = 0.01;

/// Sweep quantum of the gap-compaction pass, in timeline units.
const COMPACTION_QUANTUM: i32 = 50;

/// Whether links of finished shrink tasks still count as active during
/// execution. The intent behind this behavior was never settled upstream,
/// so it stays a fixed constant rather than a configuration knob.
const DEAD_LINKS_ACTIVE: bool = false;

/// Cooperative cancellation for a run in flight.
///
/// The flag is polled once per frame, so a stop lands at the next frame
/// boundary; everything appended so far stays in the history.
#[derive(Debug, Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }
}

pub struct Scheduler {
    active: Graph,
    target: Graph,
    correspondence: Correspondence,
    tasks: Vec<Task>,
    task_of: HashMap<String, usize>,
    time_step: f64,
    time_tags: BTreeSet<i32>,
    history: History,
    events: EventBus,
    stop: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    saved: Option<Box<(Graph, Graph)>>,
}

impl Scheduler {
    /// Creates a scheduler over an active and a target graph, generating
    /// one task per correspondence entry.
    ///
    /// Every entry must resolve before any task is built: a dangling node
    /// id is rejected here rather than dereferenced mid-run.
    pub fn new(
        active: Graph,
        target: Graph,
        correspondence: Correspondence,
    ) -> Result<Self, CorrespondError> {
        correspondence.validate(&active, &target)?;

        let mut scheduler = Self {
            active,
            target,
            correspondence,
            tasks: Vec::new(),
            task_of: HashMap::new(),
            time_step: DEFAULT_TIME_STEP,
            time_tags: BTreeSet::new(),
            history: History::new(),
            events: EventBus::default(),
            stop: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            saved: None,
        };

        scheduler.generate_tasks();
        Ok(scheduler)
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task(&self, node_id: &str) -> Option<&Task> {
        self.task_of.get(node_id).map(|&i| &self.tasks[i])
    }

    pub fn active_graph(&self) -> &Graph {
        &self.active
    }

    pub fn target_graph(&self) -> &Graph {
        &self.target
    }

    /// A shared handle onto the run's history; safe to read concurrently
    /// while a run appends to it.
    pub fn history(&self) -> History {
        self.history.clone()
    }

    pub fn time_step(&self) -> f64 {
        self.time_step
    }

    pub fn set_time_step(&mut self, time_step: f64) {
        self.time_step = time_step;
    }

    /// Timeline instants tagged as interesting during the last run, one per
    /// task window midpoint.
    pub fn time_tags(&self) -> &BTreeSet<i32> {
        &self.time_tags
    }

    pub fn subscribe(&self) -> std::sync::mpsc::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            flag: self.stop.clone(),
        }
    }

    pub fn stop_execution(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    fn generate_tasks(&mut self) {
        self.tasks.clear();
        self.task_of.clear();

        let pairs: Vec<(String, String)> = self
            .correspondence
            .iter()
            .map(|(s, t)| (s.to_owned(), t.to_owned()))
            .collect();

        for (source, target) in pairs {
            let source_is_null = source.contains(NULL_TOKEN);
            let target_is_null = target.contains(NULL_TOKEN);

            let kind = if source_is_null {
                TaskKind::Grow
            } else if target_is_null {
                TaskKind::Shrink
            } else {
                TaskKind::Morph
            };

            let target_id = (!target_is_null).then_some(target);

            self.task_of.insert(source.clone(), self.tasks.len());
            self.tasks.push(Task::new(source, target_id, kind));
        }
    }

    /// Lays tasks out sequentially, then orders them.
    pub fn schedule(&mut self) {
        let mut cursor = 0;
        for task in &mut self.tasks {
            task.set_start(cursor);
            cursor = task.end_time();
        }

        self.order();
    }

    /// Assigns every task its start time.
    ///
    /// Phases run in fixed order shrink, morph, grow, each picking up the
    /// timeline cursor where the previous phase ended. Ties are always
    /// broken by generation order.
    pub fn order(&mut self) {
        let mut cur_start = 0;

        for kind in [TaskKind::Shrink, TaskKind::Morph, TaskKind::Grow] {
            let phase = phase_tasks(&self.tasks, kind);
            if phase.is_empty() {
                continue;
            }

            let phase = sort_by_priority(&self.tasks, &self.active, phase);
            let mut future_start = cur_start;

            if kind == TaskKind::Morph {
                // Morphs run concurrently: one shared start.
                for &i in &phase {
                    self.tasks[i].set_start(cur_start);
                    future_start = future_start.max(self.tasks[i].end_time());
                }
            } else {
                let graph = match kind {
                    TaskKind::Shrink => &self.active,
                    _ => &self.target,
                };
                future_start = assign_layers(&mut self.tasks, graph, &phase, cur_start);
            }

            let groups = match kind {
                TaskKind::Shrink => self.active.groups.clone(),
                _ => self.target.groups.clone(),
            };
            group_start(&mut self.tasks, &groups, kind, &phase, &mut future_start);

            cur_start = future_start;
        }

        self.compact_gaps();
        self.insert_spacing();
    }

    /// Removes idle stretches left behind by phase and layer boundaries.
    fn compact_gaps(&mut self) {
        let mut cursor = 0;

        loop {
            let (before, after) = split_by_start(&self.tasks, cursor);
            if after.is_empty() {
                break;
            }

            if !before.is_empty() {
                let end = before
                    .iter()
                    .map(|&i| self.tasks[i].end_time())
                    .max()
                    .unwrap_or(0);
                let start = after
                    .iter()
                    .map(|&i| self.tasks[i].start)
                    .min()
                    .unwrap_or(0);

                let delta = end - start;
                if delta < 0 {
                    for &i in &after {
                        let slid = self.tasks[i].start + delta;
                        self.tasks[i].set_start(slid);
                    }
                }
            }

            cursor += COMPACTION_QUANTUM;
        }
    }

    /// Pushes sequential tasks apart so no two active windows touch
    /// exactly, which would create an ambiguous simultaneous transition.
    /// Tasks sharing a start are one synchronized cohort and stay together.
    fn insert_spacing(&mut self) {
        let spacing = (self.total_execution_time() as f64 * self.time_step + 1.0) as i32;
        let order = self.tasks_sorted_by_start();

        let n = order.len();
        let mut i = 0;

        while i < n {
            let cutoff = self.tasks[order[i]].end_time() - 1;

            for j in 0..self.tasks.len() {
                if self.tasks[j].start >= cutoff {
                    let pushed = self.tasks[j].start + spacing;
                    self.tasks[j].set_start(pushed);
                }
            }

            while i + 1 < n && self.tasks[order[i + 1]].start == self.tasks[order[i]].start {
                i += 1;
            }
            i += 1;
        }
    }

    /// End of the last task window, the run's total span in timeline units.
    pub fn total_execution_time(&self) -> i32 {
        self.tasks.iter().fold(0, |acc, t| acc.max(t.end_time()))
    }

    /// Task indices in increasing start order, generation order on ties.
    pub fn tasks_sorted_by_start(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.tasks.len()).collect();
        order.sort_by_key(|&i| self.tasks[i].start);
        order
    }

    /// Node ids whose tasks are active at a global timeline position.
    ///
    /// Unfinished grow tasks on cut-group nodes are kept active ahead of
    /// their window so the structure never disconnects under them.
    pub fn active_tasks(&self, global: f64) -> Vec<String> {
        let mut ids = Vec::new();

        for task in &self.tasks {
            let local = task.local_t(global);

            let is_active = task.is_active(local);
            let is_ungrown_cut = !task.done
                && task.kind == TaskKind::Grow
                && self
                    .active
                    .node(&task.node_id)
                    .is_some_and(|n| n.cut_group);
            let is_dead_link = DEAD_LINKS_ACTIVE && task.done && task.kind == TaskKind::Shrink;

            if is_active || is_ungrown_cut || is_dead_link {
                ids.push(task.node_id.clone());
            }
        }

        ids
    }

    /// Interpolates every corresponded link's delta between the two graphs
    /// and stores the result on the active link.
    fn blend_deltas(&mut self, global_time: f64) {
        if global_time >= 1.0 {
            return;
        }

        for index in 0..self.active.links().len() {
            let link = &self.active.links()[index];
            let Some(correspond) = link.correspond else {
                continue;
            };
            let (n1, n2) = (link.n1.clone(), link.n2.clone());

            let (Some(&t1), Some(&t2)) = (self.task_of.get(&n1), self.task_of.get(&n2)) else {
                continue;
            };

            let (a, b) = (&self.tasks[t1], &self.tasks[t2]);
            let alpha = if a.done && b.done {
                1.0
            } else if a.done {
                b.t
            } else {
                a.t
            };

            let Some(s_delta) = self.active.link_delta(index) else {
                continue;
            };
            let Some(t_delta) = self.target.link_delta(correspond) else {
                continue;
            };

            self.active.links_mut()[index].blended_delta = s_delta.lerp(t_delta, alpha);
        }
    }

    fn zero_null_geometry(&mut self) {
        for node in self.active.nodes_mut() {
            if node.is_null() {
                node.collapse_to(DVec3::ZERO);
                node.zero_geometry = true;
            }
        }
    }

    /// Runs the whole schedule, appending one snapshot per frame.
    ///
    /// Global time covers `0 ..= 1 + time_step` in `time_step` increments;
    /// with identical task assignments and time step the frame count and
    /// every snapshot are exactly reproducible. The stop flag is polled
    /// once per frame, and a stopped run keeps its partial history.
    pub fn execute_all(&mut self) {
        let time_step = self.time_step;
        let total = self.total_execution_time() as f64;
        let order = self.tasks_sorted_by_start();

        // First run: keep pristine copies of both graphs for reset.
        if self.history.is_empty() {
            self.saved = Some(Box::new((self.active.clone(), self.target.clone())));
        }

        self.stop.store(false, Ordering::SeqCst);
        self.events.emit(Event::ProgressStarted);
        tracing::info!(tasks = self.tasks.len(), "Execution started");

        // Tag the midpoint of every task window for external visualization.
        self.time_tags = self.tasks.iter().map(|t| t.start + t.length / 2).collect();

        // Parts that do not exist yet start from zeroed geometry and a
        // single parent attachment each.
        self.zero_null_geometry();
        relink::collapse_to_single_parent(&mut self.active);

        // Relink once so everything already present starts from a valid
        // attachment.
        let mut initial: Vec<String> = order
            .iter()
            .map(|&i| &self.tasks[i])
            .filter(|t| t.kind != TaskKind::Grow)
            .map(|t| t.node_id.clone())
            .collect();
        if initial.is_empty()
            && let Some(&first) = order.first()
        {
            initial.push(self.tasks[first].node_id.clone());
        }
        relink::execute(&mut self.active, &initial.into_iter().collect());

        let steps = (1.0 / time_step).round() as i64 + 1;

        for step in 0..=steps {
            let global_time = step as f64 * time_step;
            let global_units = global_time * total;

            let active_ids: HashSet<String> =
                self.active_tasks(global_units).into_iter().collect();

            for node in self.active.nodes_mut() {
                node.is_active = false;
            }

            self.blend_deltas(global_time);

            // Prepare and advance every task whose window has opened.
            for &i in &order {
                let local = self.tasks[i].local_t(global_units);
                if local < 0.0 || self.tasks[i].done {
                    continue;
                }

                self.tasks[i].prepare(&self.active, &self.target);
                self.tasks[i].execute(local);

                if self.tasks[i].is_active(local)
                    && let Some(node) = self.active.node_mut(&self.tasks[i].node_id)
                {
                    node.is_active = true;
                }
            }

            // Geometry morphing, including tasks already done.
            for &i in &order {
                let local = self.tasks[i].local_t(global_units);
                if local < 0.0 {
                    continue;
                }
                self.tasks[i].geometry_morph(local, &mut self.active);
            }

            relink::execute(&mut self.active, &active_ids);

            self.history.push(self.active.clone());
            self.events
                .emit(Event::ProgressChanged((global_time * 100.0) as i32));

            if self.stop.load(Ordering::SeqCst) {
                tracing::info!(frame = step, "Execution stopped");
                break;
            }
        }

        self.events.emit(Event::ProgressDone);
        tracing::info!(frames = self.history.len(), "Execution finished");
    }

    /// Runs `execute_all` on a background worker, resetting first when a
    /// previous run's history exists. At most one run per scheduler may be
    /// in flight; a second request is refused.
    pub fn spawn_blend(this: Arc<Mutex<Scheduler>>) -> Option<JoinHandle<()>> {
        let running = this.lock().unwrap().running.clone();
        if running.swap(true, Ordering::SeqCst) {
            tracing::warn!("An execution run is already in flight");
            return None;
        }

        Some(thread::spawn(move || {
            let mut scheduler = this.lock().unwrap();
            if !scheduler.history.is_empty() {
                scheduler.reset();
            }
            scheduler.execute_all();
            running.store(false, Ordering::SeqCst);
        }))
    }

    /// Discards the previous run and rebuilds tasks from the original
    /// correspondence, preserving the current `(start, length)` assignment.
    pub fn reset(&mut self) {
        let saved_schedule = Schedule::capture(&self.tasks);

        self.history.clear();
        self.time_tags.clear();

        if let Some(prev) = self.saved.take() {
            self.active = prev.0;
            self.target = prev.1;
        }

        self.generate_tasks();
        self.schedule();
        saved_schedule.apply(&mut self.tasks);

        self.events.emit(Event::ProgressChanged(0));
        self.events.emit(Event::HasReset);
    }

    fn invalidate_history(&mut self) {
        if !self.history.is_empty() {
            self.reset();
        }
    }

    /// Permutes which cohort gets which start time, keeping the set of
    /// distinct start values intact.
    pub fn shuffle_schedule(&mut self) {
        self.invalidate_history();

        let mut by_start: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
        for (i, task) in self.tasks.iter().enumerate() {
            by_start.entry(task.start).or_default().push(i);
        }

        let original: Vec<i32> = by_start.keys().copied().collect();
        let mut shuffled = original.clone();
        shuffled.shuffle(&mut rand::rng());

        for (position, old) in original.iter().enumerate() {
            for &i in &by_start[old] {
                self.tasks[i].set_start(shuffled[position]);
            }
        }
    }

    /// Moves every task to start 0.
    pub fn start_all_same_time(&mut self) {
        self.invalidate_history();

        for task in &mut self.tasks {
            task.set_start(0);
        }
    }

    /// Lays tasks out strictly sequentially in generation order.
    pub fn start_diff_time(&mut self) {
        self.invalidate_history();

        let mut cursor = 0;
        for task in &mut self.tasks {
            task.set_start(cursor);
            cursor = task.end_time();
        }
    }

    /// Sequential placement followed by a full ordering pass.
    pub fn default_schedule(&mut self) {
        self.start_diff_time();
        self.order();
    }

    /// Overwrites one task's timing, resetting the previous run first.
    pub fn edit_task(&mut self, node_id: &str, start: i32, length: i32) {
        self.invalidate_history();

        if let Some(&i) = self.task_of.get(node_id) {
            self.tasks[i].set_start(start);
            self.tasks[i].set_length(length);
        }
    }

    pub fn get_schedule(&self) -> Schedule {
        Schedule::capture(&self.tasks)
    }

    /// Applies a captured schedule to matching tasks, resetting the
    /// previous run first.
    pub fn set_schedule(&mut self, schedule: &Schedule) {
        self.invalidate_history();
        schedule.apply(&mut self.tasks);
    }

    /// Writes the current schedule to disk. An unwritable path is logged
    /// and otherwise ignored.
    pub fn save_schedule(&self, path: impl AsRef<Path>) {
        let text = Schedule::render(&self.tasks);

        if let Err(err) = fs::write(path.as_ref(), text) {
            tracing::warn!(
                "Could not write schedule to {}: {err}",
                path.as_ref().display()
            );
        }
    }

    /// Loads a schedule from disk and applies it to matching tasks.
    ///
    /// An unreadable path is logged and leaves state unchanged. A file
    /// whose declared task count differs from the current task set aborts
    /// without touching any task.
    pub fn load_schedule(&mut self, path: impl AsRef<Path>) -> Result<(), ScheduleError> {
        let text = match fs::read_to_string(path.as_ref()) {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(
                    "Could not read schedule from {}: {err}",
                    path.as_ref().display()
                );
                return Ok(());
            }
        };

        let declared = text
            .lines()
            .next()
            .and_then(|line| line.trim().parse::<usize>().ok())
            .ok_or(ScheduleError::Parse { line: 1 })?;

        if declared != self.tasks.len() {
            tracing::error!(
                "Invalid schedule: file declares {declared} tasks, current set has {}",
                self.tasks.len()
            );
            return Err(ScheduleError::Mismatch {
                expected: self.tasks.len(),
                found: declared,
            });
        }

        let (_, schedule) = Schedule::parse(&text)?;
        schedule.apply(&mut self.tasks);
        Ok(())
    }

    /// Maps a timeline position to the matching history snapshot and
    /// announces it to subscribers.
    pub fn graph_at(&self, time: i32) -> Option<Arc<Graph>> {
        let len = self.history.len();
        if len == 0 {
            return None;
        }

        let total = self.total_execution_time();
        let index = if total > 0 {
            (len as f64 * (time as f64 / total as f64)) as usize
        } else {
            0
        };

        let snapshot = self.history.get(index.min(len - 1))?;
        self.events
            .emit(Event::ActiveGraphChanged(snapshot.clone()));
        Some(snapshot)
    }
}

fn phase_tasks(tasks: &[Task], kind: TaskKind) -> Vec<usize> {
    tasks
        .iter()
        .enumerate()
        .filter(|(_, t)| t.kind == kind)
        .map(|(i, _)| i)
        .collect()
}

/// Priority order within a phase: sheets before curves, the most connected
/// parts first within each kind.
fn sort_by_priority(tasks: &[Task], graph: &Graph, phase: Vec<usize>) -> Vec<usize> {
    let mut curves: Vec<(usize, usize)> = Vec::new();
    let mut sheets: Vec<(usize, usize)> = Vec::new();

    for &i in &phase {
        let Some(node) = graph.node(&tasks[i].node_id) else {
            continue;
        };

        let entry = (graph.valence(&node.id), i);
        match node.kind {
            NodeKind::Curve => curves.push(entry),
            NodeKind::Sheet => sheets.push(entry),
        }
    }

    curves.sort_by_key(|e| e.0);
    sheets.sort_by_key(|e| e.0);

    let mut sorted: Vec<usize> = curves.into_iter().chain(sheets).map(|(_, i)| i).collect();
    sorted.reverse();
    sorted
}

/// Assigns layered start times to one shrink or grow phase and returns the
/// phase's end cursor.
///
/// Components are independent and each starts at the phase cursor; layers
/// within a component run back to back. Grow phases consume the peel order
/// reversed, so the layer adjacent to already existing material starts
/// first and the structure grows outward.
fn assign_layers(tasks: &mut [Task], graph: &Graph, phase: &[usize], cur_start: i32) -> i32 {
    let kind = tasks[phase[0]].kind;

    let ids: Vec<(usize, String)> = phase
        .iter()
        .map(|&i| {
            let task = &tasks[i];
            let id = match (kind, &task.target_id) {
                (TaskKind::Grow, Some(target)) => target.clone(),
                _ => task.node_id.clone(),
            };
            (i, id)
        })
        .collect();
    let items: Vec<depend::Item<'_>> = ids.iter().map(|(i, id)| (*i, id.as_str())).collect();

    let mut phase_future = cur_start;

    for component in depend::split(&items, graph) {
        let mut cursor = cur_start;

        let mut layers = depend::peel(&component, graph);
        if kind == TaskKind::Grow {
            layers.reverse();
        }

        for layer in layers {
            let mut next = cursor;
            for i in layer {
                tasks[i].set_start(cursor);
                next = next.max(tasks[i].end_time());
            }
            cursor = next;
        }

        phase_future = phase_future.max(cursor);
    }

    phase_future
}

/// Forces every rigid group's tasks in this phase onto their minimum
/// assigned start. Group cohesion overrides layer timing.
fn group_start(
    tasks: &mut [Task],
    groups: &[Vec<String>],
    kind: TaskKind,
    phase: &[usize],
    future_start: &mut i32,
) {
    for group in groups {
        let in_group: Vec<usize> = phase
            .iter()
            .copied()
            .filter(|&i| {
                let task = &tasks[i];
                let id = match kind {
                    TaskKind::Shrink => Some(task.node_id.as_str()),
                    _ => task.target_id.as_deref(),
                };
                id.is_some_and(|id| group.iter().any(|member| member == id))
            })
            .collect();

        if in_group.is_empty() {
            continue;
        }

        let mut start = *future_start;
        for &i in &in_group {
            start = start.min(tasks[i].start);
        }
        for &i in &in_group {
            tasks[i].set_start(start);
            *future_start = (*future_start).max(tasks[i].end_time());
        }
    }
}

/// Partitions task indices into those starting strictly before the cutoff
/// and the rest.
fn split_by_start(tasks: &[Task], cutoff: i32) -> (Vec<usize>, Vec<usize>) {
    let mut before = Vec::new();
    let mut after = Vec::new();

    for (i, task) in tasks.iter().enumerate() {
        if task.start < cutoff {
            before.push(i);
        } else {
            after.push(i);
        }
    }

    (before, after)
}
