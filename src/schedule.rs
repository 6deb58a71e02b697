//! Timeline bookkeeping and plain-text schedule persistence.
//!
//! A schedule is the `(start, length)` assignment of every task, keyed by
//! node id. The on-disk format is one header line with the task count,
//! followed by one `<nodeID> <start> <length>` line per task.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ScheduleError;
use crate::task::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub start: i32,
    pub length: i32,
}

/// A captured `(start, length)` assignment, applied back by node id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    entries: BTreeMap<String, Slot>,
}

impl Schedule {
    /// Captures the current assignment of a task set.
    pub fn capture(tasks: &[Task]) -> Self {
        let entries = tasks
            .iter()
            .map(|t| {
                (
                    t.node_id.clone(),
                    Slot {
                        start: t.start,
                        length: t.length,
                    },
                )
            })
            .collect();

        Self { entries }
    }

    /// Applies the captured slots to matching tasks. Tasks without an entry
    /// and entries without a task are both left alone.
    pub fn apply(&self, tasks: &mut [Task]) {
        for task in tasks {
            if let Some(slot) = self.entries.get(&task.node_id) {
                task.set_start(slot.start);
                task.set_length(slot.length);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Slot> {
        self.entries.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Renders a task set in the on-disk schedule format.
    pub fn render(tasks: &[Task]) -> String {
        let mut out = format!("{}\n", tasks.len());

        for task in tasks {
            out.push_str(&format!("{} {} {}\n", task.node_id, task.start, task.length));
        }

        out
    }

    /// Parses the on-disk format, returning the declared task count and the
    /// parsed entries.
    pub fn parse(text: &str) -> Result<(usize, Schedule), ScheduleError> {
        let mut lines = text.lines().enumerate();

        let declared: usize = match lines.next() {
            Some((_, line)) => line
                .trim()
                .parse()
                .map_err(|_| ScheduleError::Parse { line: 1 })?,
            None => return Err(ScheduleError::Parse { line: 1 }),
        };

        let mut entries = BTreeMap::new();

        for _ in 0..declared {
            let Some((index, line)) = lines.next() else {
                return Err(ScheduleError::Parse { line: declared + 1 });
            };

            let mut fields = line.split_whitespace();
            let entry = (|| {
                let id = fields.next()?;
                let start = fields.next()?.parse().ok()?;
                let length = fields.next()?.parse().ok()?;
                Some((id.to_owned(), Slot { start, length }))
            })();

            match entry {
                Some((id, slot)) => entries.insert(id, slot),
                None => return Err(ScheduleError::Parse { line: index + 1 }),
            };
        }

        Ok((declared, Schedule { entries }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskKind;

    fn task(id: &str, start: i32, length: i32) -> Task {
        let mut task = Task::new(id, None, TaskKind::Shrink);
        task.set_start(start);
        task.set_length(length);
        task
    }

    #[test]
    fn test_render_parse_roundtrip() {
        let tasks = vec![task("a", 0, 80), task("b", 120, 40)];

        let text = Schedule::render(&tasks);
        let (declared, parsed) = Schedule::parse(&text).unwrap();

        assert_eq!(declared, 2);
        assert_eq!(parsed, Schedule::capture(&tasks));
    }

    #[test]
    fn test_apply_is_partial() {
        let mut tasks = vec![task("a", 0, 80), task("b", 10, 80)];
        let captured = Schedule::capture(&[task("a", 99, 7), task("ghost", 1, 1)]);

        captured.apply(&mut tasks);

        assert_eq!(tasks[0].start, 99);
        assert_eq!(tasks[0].length, 7);
        // No entry for "b": untouched.
        assert_eq!(tasks[1].start, 10);
        assert_eq!(tasks[1].length, 80);
    }

    #[test]
    fn test_parse_rejects_truncated_file() {
        assert!(matches!(
            Schedule::parse("2\na 0 80\n"),
            Err(ScheduleError::Parse { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_garbage_fields() {
        assert!(matches!(
            Schedule::parse("1\na zero 80\n"),
            Err(ScheduleError::Parse { line: 2 })
        ));
    }
}
