use crate::{Breakpoint, RemoteBreakpointId};
use anyhow::Result;
use async_trait::async_trait;

/// The target's reply to a breakpoint-set command.
#[derive(Copy, Clone, Debug)]
pub struct SetBreakpointResponse {
    pub remote_id: RemoteBreakpointId,
    pub resolved: bool,
}

/// Resolution state reported by a breakpoint-get command.
#[derive(Copy, Clone, Debug, Default)]
pub struct BreakpointInfo {
    pub resolved: bool,
    pub line: Option<u32>,
}

/// Out-of-band notifications delivered by the target connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TargetEvent {
    BreakpointResolved {
        remote_id: RemoteBreakpointId,
        resolved: bool,
        line: Option<u32>,
    },
    Closed,
}

/// One remote debugging connection. The underlying channel accepts at most
/// one command at a time; every round trip must be awaited before the next
/// command is issued.
#[async_trait]
pub trait TargetConnection: Send + Sync {
    /// Whether a command is currently awaiting its response on this
    /// connection.
    fn has_pending_command(&self) -> bool;

    async fn set_breakpoint(&self, breakpoint: &Breakpoint) -> Result<SetBreakpointResponse>;

    async fn remove_breakpoint(&self, remote_id: RemoteBreakpointId) -> Result<()>;

    async fn breakpoint_info(&self, remote_id: RemoteBreakpointId) -> Result<BreakpointInfo>;
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeCommand, FakeTargetConnection};

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::*;
    use anyhow::anyhow;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// A command the fake connection was asked to run, in issue order.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum FakeCommand {
        Set(Breakpoint),
        Remove(RemoteBreakpointId),
        Info(RemoteBreakpointId),
    }

    #[derive(Default)]
    struct FakeState {
        next_remote_id: u64,
        busy: bool,
        resolve_on_set: bool,
        resolved_line: Option<u32>,
        unresolved_info: bool,
        failing_sets: usize,
        failing_removes: usize,
        failing_infos: usize,
        commands: Vec<FakeCommand>,
    }

    /// In-memory [`TargetConnection`] with scripted responses and a recorded
    /// command log.
    pub struct FakeTargetConnection(Mutex<FakeState>);

    impl FakeTargetConnection {
        pub fn new() -> Arc<Self> {
            Arc::new(Self(Mutex::new(FakeState {
                next_remote_id: 1,
                ..Default::default()
            })))
        }

        /// Marks the channel as occupied by a command issued outside this
        /// session.
        pub fn set_busy(&self, busy: bool) {
            self.0.lock().busy = busy;
        }

        /// Answer set commands as already resolved, reporting `line` from the
        /// follow-up breakpoint-get query.
        pub fn resolve_on_set(&self, line: u32) {
            let mut state = self.0.lock();
            state.resolve_on_set = true;
            state.resolved_line = Some(line);
        }

        /// Answer breakpoint-get queries as not yet resolved, regardless of
        /// how set commands were answered.
        pub fn report_unresolved_info(&self) {
            self.0.lock().unresolved_info = true;
        }

        /// Rejects the next `count` set commands.
        pub fn fail_next_sets(&self, count: usize) {
            self.0.lock().failing_sets = count;
        }

        /// Rejects the next `count` remove commands.
        pub fn fail_next_removes(&self, count: usize) {
            self.0.lock().failing_removes = count;
        }

        /// Rejects the next `count` breakpoint-get queries.
        pub fn fail_next_infos(&self, count: usize) {
            self.0.lock().failing_infos = count;
        }

        pub fn take_commands(&self) -> Vec<FakeCommand> {
            std::mem::take(&mut self.0.lock().commands)
        }
    }

    #[async_trait]
    impl TargetConnection for FakeTargetConnection {
        fn has_pending_command(&self) -> bool {
            self.0.lock().busy
        }

        async fn set_breakpoint(&self, breakpoint: &Breakpoint) -> Result<SetBreakpointResponse> {
            let mut state = self.0.lock();
            state.commands.push(FakeCommand::Set(breakpoint.clone()));
            if state.failing_sets > 0 {
                state.failing_sets -= 1;
                return Err(anyhow!("target rejected breakpoint"));
            }
            let remote_id = RemoteBreakpointId(state.next_remote_id);
            state.next_remote_id += 1;
            Ok(SetBreakpointResponse {
                remote_id,
                resolved: state.resolve_on_set,
            })
        }

        async fn remove_breakpoint(&self, remote_id: RemoteBreakpointId) -> Result<()> {
            let mut state = self.0.lock();
            state.commands.push(FakeCommand::Remove(remote_id));
            if state.failing_removes > 0 {
                state.failing_removes -= 1;
                return Err(anyhow!("target rejected removal"));
            }
            Ok(())
        }

        async fn breakpoint_info(&self, remote_id: RemoteBreakpointId) -> Result<BreakpointInfo> {
            let mut state = self.0.lock();
            state.commands.push(FakeCommand::Info(remote_id));
            if state.failing_infos > 0 {
                state.failing_infos -= 1;
                return Err(anyhow!("target rejected query"));
            }
            Ok(BreakpointInfo {
                resolved: state.resolve_on_set && !state.unresolved_info,
                line: state.resolved_line,
            })
        }
    }
}
