//! Construct/update/destroy notifications.
//!
//! The [`SignalHub`] keeps one ordered listener list per
//! `(component type, signal kind)`. Listeners are connected through a
//! [`Sink`] obtained from [`Registry::on_construct`],
//! [`Registry::on_update`] or [`Registry::on_destroy`], and removed again with
//! the [`Connection`] that `connect` returned.
//!
//! Listeners receive `&mut Registry`, so they may read the component that
//! triggered them and perform further mutations, including ones that fire
//! the same signal again. Listeners are `Fn` and are shared through an `Rc`,
//! so such nested firings run to completion inside the outer call; state a
//! listener mutates lives in a `Cell` or `RefCell` it captures.
//!
//! Firing snapshots the list first: listeners connected during a firing wait
//! for the next one, and listeners disconnected during a firing are skipped
//! if they have not run yet.
//!
//! [`Registry::on_construct`]: crate::registry::Registry::on_construct
//! [`Registry::on_update`]: crate::registry::Registry::on_update
//! [`Registry::on_destroy`]: crate::registry::Registry::on_destroy

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::component::ComponentTypeId;
use crate::entity::Entity;
use crate::registry::Registry;

// ---------------------------------------------------------------------------
// SignalKind / Connection
// ---------------------------------------------------------------------------

/// Which lifecycle event a listener is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    /// A component was added. Fired after the value is stored.
    Construct,
    /// A component was replaced or patched. Fired after the write.
    Update,
    /// A component is about to be removed. Fired before the value is dropped.
    Destroy,
}

/// Handle identifying one connected listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Connection {
    component: ComponentTypeId,
    kind: SignalKind,
    id: u64,
}

impl Connection {
    /// The signal this connection is attached to.
    pub fn kind(&self) -> SignalKind {
        self.kind
    }

    /// The component type this connection is attached to.
    pub fn component(&self) -> ComponentTypeId {
        self.component
    }
}

/// Listener callback.
pub type Listener = dyn Fn(&mut Registry, Entity);

pub(crate) type SharedListener = Rc<Listener>;

// ---------------------------------------------------------------------------
// SignalHub
// ---------------------------------------------------------------------------

/// Listener lists keyed by component type and signal kind.
#[derive(Default)]
pub struct SignalHub {
    slots: HashMap<(ComponentTypeId, SignalKind), Vec<(u64, SharedListener)>>,
    next_id: u64,
}

impl SignalHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    fn connect(
        &mut self,
        component: ComponentTypeId,
        kind: SignalKind,
        listener: SharedListener,
    ) -> Connection {
        let id = self.next_id;
        self.next_id += 1;
        self.slots
            .entry((component, kind))
            .or_default()
            .push((id, listener));
        Connection { component, kind, id }
    }

    /// Remove the listener behind `connection`. Returns `false` if it was
    /// already gone.
    pub fn disconnect(&mut self, connection: Connection) -> bool {
        let Some(list) = self.slots.get_mut(&(connection.component, connection.kind)) else {
            return false;
        };
        let before = list.len();
        list.retain(|(id, _)| *id != connection.id);
        before != list.len()
    }

    /// Whether `connection` is still attached.
    pub fn is_connected(&self, connection: Connection) -> bool {
        self.slots
            .get(&(connection.component, connection.kind))
            .is_some_and(|list| list.iter().any(|(id, _)| *id == connection.id))
    }

    /// Number of listeners attached to one signal.
    pub fn len(&self, component: ComponentTypeId, kind: SignalKind) -> usize {
        self.slots.get(&(component, kind)).map_or(0, Vec::len)
    }

    /// Whether no listener is attached anywhere.
    pub fn is_empty(&self) -> bool {
        self.slots.values().all(Vec::is_empty)
    }

    fn clear(&mut self, component: ComponentTypeId, kind: SignalKind) {
        self.slots.remove(&(component, kind));
    }

    /// Snapshot of the listeners for one signal, in connection order.
    pub(crate) fn listeners(
        &self,
        component: ComponentTypeId,
        kind: SignalKind,
    ) -> Vec<(Connection, SharedListener)> {
        self.slots
            .get(&(component, kind))
            .map(|list| {
                list.iter()
                    .map(|(id, listener)| {
                        (
                            Connection {
                                component,
                                kind,
                                id: *id,
                            },
                            Rc::clone(listener),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl fmt::Debug for SignalHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalHub")
            .field(
                "listeners",
                &self.slots.values().map(Vec::len).sum::<usize>(),
            )
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

/// Connect/disconnect endpoint for one `(component type, kind)` signal.
pub struct Sink<'r> {
    hub: &'r mut SignalHub,
    component: ComponentTypeId,
    kind: SignalKind,
}

impl<'r> Sink<'r> {
    pub(crate) fn new(hub: &'r mut SignalHub, component: ComponentTypeId, kind: SignalKind) -> Self {
        Self {
            hub,
            component,
            kind,
        }
    }

    /// Append a listener. Listeners fire in the order they were connected.
    pub fn connect<F>(&mut self, listener: F) -> Connection
    where
        F: Fn(&mut Registry, Entity) + 'static,
    {
        self.hub.connect(self.component, self.kind, Rc::new(listener))
    }

    /// Remove a listener connected through this sink.
    pub fn disconnect(&mut self, connection: Connection) -> bool {
        if connection.component != self.component || connection.kind != self.kind {
            return false;
        }
        self.hub.disconnect(connection)
    }

    /// Number of connected listeners.
    pub fn len(&self) -> usize {
        self.hub.len(self.component, self.kind)
    }

    /// Whether no listener is connected.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Disconnect every listener of this signal.
    pub fn clear(&mut self) {
        self.hub.clear(self.component, self.kind);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
