use std::{fmt, sync::Arc};

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct BreakpointId(pub u64);

/// Identity assigned by the target when a breakpoint is realized remotely.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct RemoteBreakpointId(pub u64);

/// A breakpoint as declared by the controller. Immutable once constructed;
/// the registry assigns the id under which it is tracked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Breakpoint {
    Line {
        uri: Arc<str>,
        line: u32,
    },
    Conditional {
        uri: Arc<str>,
        line: u32,
        condition: String,
    },
    Exception {
        filter: String,
    },
    Function {
        name: String,
        condition: Option<String>,
    },
}

impl Breakpoint {
    pub fn line(&self) -> Option<u32> {
        match self {
            Breakpoint::Line { line, .. } | Breakpoint::Conditional { line, .. } => Some(*line),
            Breakpoint::Exception { .. } | Breakpoint::Function { .. } => None,
        }
    }

    /// Whether this breakpoint is tied to a source location that the target
    /// may later resolve to an executable line.
    pub fn is_source(&self) -> bool {
        matches!(self, Breakpoint::Line { .. } | Breakpoint::Conditional { .. })
    }
}

/// A requested breakpoint within one source file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceBreakpoint {
    pub line: u32,
    pub condition: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FunctionBreakpoint {
    pub name: String,
    pub condition: Option<String>,
}

/// Controller-visible state of one breakpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BreakpointStatus {
    pub id: BreakpointId,
    pub verified: bool,
    pub line: Option<u32>,
    pub message: Option<String>,
}

impl fmt::Display for BreakpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for RemoteBreakpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
