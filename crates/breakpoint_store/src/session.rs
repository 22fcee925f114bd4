use crate::{
    target::{TargetConnection, TargetEvent},
    Breakpoint, BreakpointId, BreakpointStatus, BreakpointStore, Event, RemoteBreakpointId,
};
use futures::{
    channel::mpsc::{self, UnboundedReceiver, UnboundedSender},
    StreamExt,
};
use std::{collections::BTreeMap, sync::Arc};

/// Status notifications emitted toward the controller-facing layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    BreakpointChanged(BreakpointStatus),
    Output(String),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum PendingOp {
    None,
    Add,
    Remove,
}

struct Shadow {
    breakpoint: Arc<Breakpoint>,
    remote_id: Option<RemoteBreakpointId>,
    pending: PendingOp,
}

enum Message {
    Store(Option<Event>),
    Target(Option<TargetEvent>),
}

/// Reconciles the declared breakpoint set against one target connection.
///
/// The session exclusively owns a shadow record per controller id it has
/// observed and is the only issuer of breakpoint commands on its connection.
/// Diffs from the [`BreakpointStore`] are applied to the shadow map before
/// any remote call, so local state always reflects the latest controller
/// intent even while the remote channel is unavailable; remote traffic is one
/// awaited round trip at a time, removals strictly before additions.
pub struct TargetSession {
    store_rx: UnboundedReceiver<Event>,
    target_rx: UnboundedReceiver<TargetEvent>,
    connection: Arc<dyn TargetConnection>,
    shadows: BTreeMap<BreakpointId, Shadow>,
    subscribers: Vec<UnboundedSender<SessionEvent>>,
}

impl TargetSession {
    pub fn new(
        store: &BreakpointStore,
        connection: Arc<dyn TargetConnection>,
        target_rx: UnboundedReceiver<TargetEvent>,
    ) -> Self {
        Self {
            store_rx: store.subscribe(),
            target_rx,
            connection,
            shadows: BTreeMap::new(),
            subscribers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self) -> UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Drives the session until the store goes away or the connection closes.
    /// An in-flight round trip is never aborted; closing only stops future
    /// reconciliation.
    pub async fn run(mut self) {
        loop {
            let message = futures::select! {
                event = self.store_rx.next() => Message::Store(event),
                event = self.target_rx.next() => Message::Target(event),
            };
            match message {
                Message::Store(Some(event)) => {
                    self.apply_store_event(event);
                    self.sync().await;
                }
                Message::Target(Some(TargetEvent::BreakpointResolved {
                    remote_id,
                    resolved,
                    line,
                })) => self.breakpoint_resolved(remote_id, resolved, line),
                Message::Store(None)
                | Message::Target(Some(TargetEvent::Closed))
                | Message::Target(None) => break,
            }
        }
    }

    fn apply_store_event(&mut self, event: Event) {
        match event {
            Event::BreakpointsAdded(entries) => {
                for (id, breakpoint) in entries {
                    self.shadows.insert(
                        id,
                        Shadow {
                            breakpoint,
                            remote_id: None,
                            pending: PendingOp::Add,
                        },
                    );
                }
            }
            Event::BreakpointsRemoved(ids) => {
                for id in ids {
                    match self.shadows.get_mut(&id) {
                        Some(shadow) if shadow.remote_id.is_some() => {
                            shadow.pending = PendingOp::Remove;
                        }
                        // Never realized remotely, so there is nothing to
                        // undo on the target.
                        Some(_) => {
                            self.shadows.remove(&id);
                        }
                        None => {}
                    }
                }
            }
            Event::Flushed => {}
        }
    }

    /// Applies every queued diff, then reconciles against the target. A pass
    /// is re-run only when new diffs arrived while the previous one was
    /// awaiting the remote, so convergence needs no external re-trigger.
    /// Anything still pending after its pass (a failed add) waits for the
    /// next flush or diff.
    async fn sync(&mut self) {
        self.drain_store_events();
        loop {
            if self.connection.has_pending_command() {
                return;
            }
            if !self
                .shadows
                .values()
                .any(|shadow| shadow.pending != PendingOp::None)
            {
                return;
            }
            self.reconcile().await;
            if !self.drain_store_events() {
                return;
            }
        }
    }

    fn drain_store_events(&mut self) -> bool {
        let mut applied = false;
        while let Ok(Some(event)) = self.store_rx.try_next() {
            self.apply_store_event(event);
            applied = true;
        }
        applied
    }

    async fn reconcile(&mut self) {
        let removals = self
            .shadows
            .iter()
            .filter(|(_, shadow)| shadow.pending == PendingOp::Remove)
            .map(|(id, _)| *id)
            .collect::<Vec<_>>();
        for id in removals {
            if let Some(remote_id) = self.shadows.get(&id).and_then(|shadow| shadow.remote_id) {
                if let Err(error) = self.connection.remove_breakpoint(remote_id).await {
                    // The id is already gone from desired state; removal is
                    // not retried.
                    log::warn!("failed to remove breakpoint {}: {:#}", remote_id, error);
                    self.emit(SessionEvent::Output(format!(
                        "Failed to remove breakpoint: {:#}",
                        error
                    )));
                }
            }
            self.shadows.remove(&id);
        }

        let additions = self
            .shadows
            .iter()
            .filter(|(_, shadow)| shadow.pending == PendingOp::Add)
            .map(|(id, _)| *id)
            .collect::<Vec<_>>();
        for id in additions {
            let Some(breakpoint) = self.shadows.get(&id).map(|shadow| shadow.breakpoint.clone())
            else {
                continue;
            };
            match self.connection.set_breakpoint(&breakpoint).await {
                Ok(response) => {
                    if let Some(shadow) = self.shadows.get_mut(&id) {
                        shadow.remote_id = Some(response.remote_id);
                        shadow.pending = PendingOp::None;
                    }
                    let mut line = None;
                    if response.resolved && breakpoint.is_source() {
                        line = breakpoint.line();
                        match self.connection.breakpoint_info(response.remote_id).await {
                            // The queried line is only authoritative once the
                            // target reports the breakpoint resolved.
                            Ok(info) => {
                                if info.resolved && info.line.is_some() {
                                    line = info.line;
                                }
                            }
                            Err(error) => log::warn!(
                                "failed to query breakpoint {}: {:#}",
                                response.remote_id,
                                error
                            ),
                        }
                    }
                    self.emit(SessionEvent::BreakpointChanged(BreakpointStatus {
                        id,
                        verified: response.resolved,
                        line,
                        message: None,
                    }));
                }
                Err(error) => {
                    // Still pending, so the next pass tries again.
                    self.emit(SessionEvent::BreakpointChanged(BreakpointStatus {
                        id,
                        verified: false,
                        line: None,
                        message: Some(error.to_string()),
                    }));
                    self.emit(SessionEvent::Output(format!(
                        "Failed to set breakpoint: {:#}",
                        error
                    )));
                }
            }
        }
    }

    fn breakpoint_resolved(
        &mut self,
        remote_id: RemoteBreakpointId,
        resolved: bool,
        line: Option<u32>,
    ) {
        if !resolved {
            return;
        }
        let Some((id, shadow)) = self
            .shadows
            .iter()
            .find(|(_, shadow)| shadow.remote_id == Some(remote_id))
        else {
            return;
        };
        if !shadow.breakpoint.is_source() {
            return;
        }
        let status = BreakpointStatus {
            id: *id,
            verified: true,
            line: line.or(shadow.breakpoint.line()),
            message: None,
        };
        self.emit(SessionEvent::BreakpointChanged(status));
    }

    fn emit(&mut self, event: SessionEvent) {
        self.subscribers
            .retain(|subscriber| subscriber.unbounded_send(event.clone()).is_ok());
    }
}
