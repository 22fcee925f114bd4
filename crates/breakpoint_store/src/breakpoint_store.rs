mod breakpoint;
pub mod session;
pub mod target;

pub use breakpoint::*;
pub use session::{SessionEvent, TargetSession};
pub use target::{BreakpointInfo, SetBreakpointResponse, TargetConnection, TargetEvent};

use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
    sync::Arc,
};

/// A diff over the desired breakpoint set, produced by a total-replace
/// declarative update. For one update, removals are always emitted before
/// additions.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    BreakpointsAdded(Vec<(BreakpointId, Arc<Breakpoint>)>),
    BreakpointsRemoved(Vec<BreakpointId>),
    Flushed,
}

/// Owns the controller-declared breakpoints and their ids.
///
/// Every `set_*` operation is a total replace of one partition key: the ids
/// present for that key afterwards are exactly the ones allocated by that
/// call. All operations complete synchronously, so diff computation and id
/// allocation are atomic with respect to interleaved declarative calls. The
/// store knows nothing about any target; subscribers observe it through
/// diffs alone.
pub struct BreakpointStore {
    state: Mutex<StoreState>,
}

#[derive(Default)]
struct StoreState {
    next_id: u64,
    source: HashMap<Arc<Path>, BTreeMap<BreakpointId, Arc<Breakpoint>>>,
    exception: BTreeMap<BreakpointId, Arc<Breakpoint>>,
    function: BTreeMap<BreakpointId, Arc<Breakpoint>>,
    subscribers: Vec<UnboundedSender<Event>>,
}

impl BreakpointStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState {
                next_id: 1,
                ..Default::default()
            }),
        }
    }

    /// Registers a subscriber. If breakpoints have already been declared, the
    /// channel is seeded with an add diff carrying the full current set, so a
    /// subscriber that appears after declarations converges without a
    /// re-declaration.
    pub fn subscribe(&self) -> UnboundedReceiver<Event> {
        let mut state = self.state.lock();
        let (tx, rx) = mpsc::unbounded();
        let existing = state.all_breakpoints();
        if !existing.is_empty() {
            tx.unbounded_send(Event::BreakpointsAdded(existing)).ok();
        }
        state.subscribers.push(tx);
        rx
    }

    /// Replaces all line and conditional breakpoints declared for `path`.
    /// Returns one descriptor per requested breakpoint, in input order, none
    /// of them verified yet.
    pub fn set_source_breakpoints(
        &self,
        path: Arc<Path>,
        uri: Arc<str>,
        breakpoints: Vec<SourceBreakpoint>,
    ) -> Vec<BreakpointStatus> {
        let mut state = self.state.lock();
        let old = state.source.remove(&path).unwrap_or_default();

        let mut added = Vec::with_capacity(breakpoints.len());
        let mut statuses = Vec::with_capacity(breakpoints.len());
        for breakpoint in breakpoints {
            let id = state.allocate_id();
            let line = breakpoint.line;
            let breakpoint = Arc::new(match breakpoint.condition {
                Some(condition) => Breakpoint::Conditional {
                    uri: uri.clone(),
                    line,
                    condition,
                },
                None => Breakpoint::Line {
                    uri: uri.clone(),
                    line,
                },
            });
            added.push((id, breakpoint));
            statuses.push(BreakpointStatus {
                id,
                verified: false,
                line: Some(line),
                message: None,
            });
        }

        if !added.is_empty() {
            state.source.insert(path, added.iter().cloned().collect());
        }
        state.emit_diff(old.keys().copied().collect(), added);
        statuses
    }

    /// Replaces the exception-filter partition.
    pub fn set_exception_breakpoints(&self, filters: Vec<String>) -> Vec<BreakpointStatus> {
        let mut state = self.state.lock();
        let old = std::mem::take(&mut state.exception);

        let mut added = Vec::with_capacity(filters.len());
        let mut statuses = Vec::with_capacity(filters.len());
        for filter in filters {
            let id = state.allocate_id();
            added.push((id, Arc::new(Breakpoint::Exception { filter })));
            statuses.push(BreakpointStatus {
                id,
                verified: false,
                line: None,
                message: None,
            });
        }

        state.exception = added.iter().cloned().collect();
        state.emit_diff(old.keys().copied().collect(), added);
        statuses
    }

    /// Replaces the function-breakpoint partition.
    pub fn set_function_breakpoints(
        &self,
        breakpoints: Vec<FunctionBreakpoint>,
    ) -> Vec<BreakpointStatus> {
        let mut state = self.state.lock();
        let old = std::mem::take(&mut state.function);

        let mut added = Vec::with_capacity(breakpoints.len());
        let mut statuses = Vec::with_capacity(breakpoints.len());
        for breakpoint in breakpoints {
            let id = state.allocate_id();
            added.push((
                id,
                Arc::new(Breakpoint::Function {
                    name: breakpoint.name,
                    condition: breakpoint.condition,
                }),
            ));
            statuses.push(BreakpointStatus {
                id,
                verified: false,
                line: None,
                message: None,
            });
        }

        state.function = added.iter().cloned().collect();
        state.emit_diff(old.keys().copied().collect(), added);
        statuses
    }

    /// Asks subscribers to converge their pending work against their targets
    /// even though no new diff was produced, e.g. once a connection has
    /// become available.
    pub fn flush(&self) {
        self.state.lock().emit(Event::Flushed);
    }
}

impl Default for BreakpointStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreState {
    fn allocate_id(&mut self) -> BreakpointId {
        let id = BreakpointId(self.next_id);
        self.next_id += 1;
        id
    }

    fn all_breakpoints(&self) -> Vec<(BreakpointId, Arc<Breakpoint>)> {
        let mut all = self
            .source
            .values()
            .flatten()
            .chain(&self.exception)
            .chain(&self.function)
            .map(|(id, breakpoint)| (*id, breakpoint.clone()))
            .collect::<Vec<_>>();
        all.sort_unstable_by_key(|(id, _)| *id);
        all
    }

    fn emit_diff(
        &mut self,
        removed: Vec<BreakpointId>,
        added: Vec<(BreakpointId, Arc<Breakpoint>)>,
    ) {
        if !removed.is_empty() {
            self.emit(Event::BreakpointsRemoved(removed));
        }
        if !added.is_empty() {
            self.emit(Event::BreakpointsAdded(added));
        }
    }

    fn emit(&mut self, event: Event) {
        self.subscribers
            .retain(|subscriber| subscriber.unbounded_send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn file(path: &str) -> Arc<Path> {
        PathBuf::from(path).into()
    }

    fn line_breakpoint(uri: &str, line: u32) -> Arc<Breakpoint> {
        Arc::new(Breakpoint::Line {
            uri: uri.into(),
            line,
        })
    }

    fn drain(events: &mut UnboundedReceiver<Event>) -> Vec<Event> {
        let mut drained = Vec::new();
        while let Ok(Some(event)) = events.try_next() {
            drained.push(event);
        }
        drained
    }

    #[test]
    fn test_source_breakpoints_are_a_total_replace() {
        let store = BreakpointStore::new();
        let mut events = store.subscribe();

        let statuses = store.set_source_breakpoints(
            file("/project/main.php"),
            "file:///project/main.php".into(),
            vec![
                SourceBreakpoint {
                    line: 10,
                    condition: None,
                },
                SourceBreakpoint {
                    line: 20,
                    condition: Some("$x > 1".into()),
                },
            ],
        );
        assert_eq!(
            statuses,
            vec![
                BreakpointStatus {
                    id: BreakpointId(1),
                    verified: false,
                    line: Some(10),
                    message: None,
                },
                BreakpointStatus {
                    id: BreakpointId(2),
                    verified: false,
                    line: Some(20),
                    message: None,
                },
            ]
        );
        assert_eq!(
            drain(&mut events),
            vec![Event::BreakpointsAdded(vec![
                (
                    BreakpointId(1),
                    line_breakpoint("file:///project/main.php", 10)
                ),
                (
                    BreakpointId(2),
                    Arc::new(Breakpoint::Conditional {
                        uri: "file:///project/main.php".into(),
                        line: 20,
                        condition: "$x > 1".into(),
                    })
                ),
            ])]
        );

        // Re-declaring the same file replaces the whole set: the old ids are
        // removed before the new ones are added, and the old ids never come
        // back.
        let statuses = store.set_source_breakpoints(
            file("/project/main.php"),
            "file:///project/main.php".into(),
            vec![SourceBreakpoint {
                line: 30,
                condition: None,
            }],
        );
        assert_eq!(statuses[0].id, BreakpointId(3));
        assert_eq!(
            drain(&mut events),
            vec![
                Event::BreakpointsRemoved(vec![BreakpointId(1), BreakpointId(2)]),
                Event::BreakpointsAdded(vec![(
                    BreakpointId(3),
                    line_breakpoint("file:///project/main.php", 30)
                )]),
            ]
        );
    }

    #[test]
    fn test_files_are_independent() {
        let store = BreakpointStore::new();
        let mut events = store.subscribe();

        store.set_source_breakpoints(
            file("/project/a.php"),
            "file:///project/a.php".into(),
            vec![SourceBreakpoint {
                line: 1,
                condition: None,
            }],
        );
        drain(&mut events);

        store.set_source_breakpoints(
            file("/project/b.php"),
            "file:///project/b.php".into(),
            vec![SourceBreakpoint {
                line: 2,
                condition: None,
            }],
        );
        assert_eq!(
            drain(&mut events),
            vec![Event::BreakpointsAdded(vec![(
                BreakpointId(2),
                line_breakpoint("file:///project/b.php", 2)
            )])]
        );

        store.set_source_breakpoints(
            file("/project/a.php"),
            "file:///project/a.php".into(),
            vec![],
        );
        assert_eq!(
            drain(&mut events),
            vec![Event::BreakpointsRemoved(vec![BreakpointId(1)])]
        );
    }

    #[test]
    fn test_ids_increase_across_partitions_and_are_never_reused() {
        let store = BreakpointStore::new();

        let source = store.set_source_breakpoints(
            file("/project/main.php"),
            "file:///project/main.php".into(),
            vec![
                SourceBreakpoint {
                    line: 10,
                    condition: None,
                },
                SourceBreakpoint {
                    line: 20,
                    condition: None,
                },
            ],
        );
        let exception = store.set_exception_breakpoints(vec!["Exception".into()]);
        let function = store.set_function_breakpoints(vec![FunctionBreakpoint {
            name: "main".into(),
            condition: None,
        }]);
        assert_eq!(
            [
                source[0].id,
                source[1].id,
                exception[0].id,
                function[0].id
            ],
            [
                BreakpointId(1),
                BreakpointId(2),
                BreakpointId(3),
                BreakpointId(4)
            ]
        );

        let exception = store.set_exception_breakpoints(vec!["Exception".into()]);
        assert_eq!(exception[0].id, BreakpointId(5));
    }

    #[test]
    fn test_exception_and_function_partitions_replace_wholesale() {
        let store = BreakpointStore::new();
        let mut events = store.subscribe();

        store.set_exception_breakpoints(vec!["Warning".into(), "Exception".into()]);
        drain(&mut events);

        store.set_exception_breakpoints(vec![]);
        assert_eq!(
            drain(&mut events),
            vec![Event::BreakpointsRemoved(vec![
                BreakpointId(1),
                BreakpointId(2)
            ])]
        );

        store.set_function_breakpoints(vec![FunctionBreakpoint {
            name: "strlen".into(),
            condition: Some("$len > 0".into()),
        }]);
        let added = drain(&mut events);
        assert_eq!(
            added,
            vec![Event::BreakpointsAdded(vec![(
                BreakpointId(3),
                Arc::new(Breakpoint::Function {
                    name: "strlen".into(),
                    condition: Some("$len > 0".into()),
                })
            )])]
        );
    }

    #[test]
    fn test_flush_carries_no_payload() {
        let store = BreakpointStore::new();
        let mut events = store.subscribe();
        store.flush();
        assert_eq!(drain(&mut events), vec![Event::Flushed]);
    }

    #[test]
    fn test_subscribing_after_declarations_seeds_the_current_set() {
        let store = BreakpointStore::new();
        store.set_source_breakpoints(
            file("/project/main.php"),
            "file:///project/main.php".into(),
            vec![SourceBreakpoint {
                line: 10,
                condition: None,
            }],
        );
        store.set_exception_breakpoints(vec!["Exception".into()]);

        let mut events = store.subscribe();
        assert_eq!(
            drain(&mut events),
            vec![Event::BreakpointsAdded(vec![
                (
                    BreakpointId(1),
                    line_breakpoint("file:///project/main.php", 10)
                ),
                (
                    BreakpointId(2),
                    Arc::new(Breakpoint::Exception {
                        filter: "Exception".into()
                    })
                ),
            ])]
        );

        let empty_store = BreakpointStore::new();
        let mut events = empty_store.subscribe();
        assert_eq!(drain(&mut events), vec![]);
    }
}
