//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Listener groups and isolated fan-out."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};
use twinplex_msg::{DataContextListener, SystemStatusListener, UserEventListener};

/// Outcome of one fan-out pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub panicked: usize,
}

impl DispatchReport {
    pub fn invoked(&self) -> usize {
        self.delivered + self.panicked
    }
}

#[derive(Default)]
struct Groups {
    data_context: Vec<Arc<dyn DataContextListener>>,
    system_status: Vec<Arc<dyn SystemStatusListener>>,
    user_event: Vec<Arc<dyn UserEventListener>>,
}

/// Three ordered listener groups behind one mutex.
///
/// Registering the same instance twice yields two registrations; unregister
/// removes the earliest one. Dispatch iterates a copy of the group taken under
/// the lock, so listeners may (un)register from inside a callback.
#[derive(Default)]
pub struct ListenerRegistry {
    groups: Mutex<Groups>,
}

fn same_instance<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

fn remove_first<T: ?Sized>(group: &mut Vec<Arc<T>>, listener: &Arc<T>) -> bool {
    match group.iter().position(|existing| same_instance(existing, listener)) {
        Some(index) => {
            group.remove(index);
            true
        }
        None => false,
    }
}

fn fan_out<T: ?Sized>(
    group: &'static str,
    listeners: &[Arc<T>],
    mut call: impl FnMut(&Arc<T>),
) -> DispatchReport {
    let mut report = DispatchReport::default();
    for (position, listener) in listeners.iter().enumerate() {
        match catch_unwind(AssertUnwindSafe(|| call(listener))) {
            Ok(()) => report.delivered += 1,
            Err(_) => {
                report.panicked += 1;
                warn!(group, position, "listener panicked during dispatch; continuing");
            }
        }
    }
    report
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_data_context(&self, listener: Arc<dyn DataContextListener>) {
        let mut groups = self.groups.lock();
        groups.data_context.push(listener);
        debug!(count = groups.data_context.len(), "data context listener registered");
    }

    pub fn register_system_status(&self, listener: Arc<dyn SystemStatusListener>) {
        let mut groups = self.groups.lock();
        groups.system_status.push(listener);
        debug!(count = groups.system_status.len(), "system status listener registered");
    }

    pub fn register_user_event(&self, listener: Arc<dyn UserEventListener>) {
        let mut groups = self.groups.lock();
        groups.user_event.push(listener);
        debug!(count = groups.user_event.len(), "user event listener registered");
    }

    /// Remove the earliest registration of `listener`. False if it was not registered.
    pub fn unregister_data_context(&self, listener: &Arc<dyn DataContextListener>) -> bool {
        remove_first(&mut self.groups.lock().data_context, listener)
    }

    pub fn unregister_system_status(&self, listener: &Arc<dyn SystemStatusListener>) -> bool {
        remove_first(&mut self.groups.lock().system_status, listener)
    }

    pub fn unregister_user_event(&self, listener: &Arc<dyn UserEventListener>) -> bool {
        remove_first(&mut self.groups.lock().user_event, listener)
    }

    /// Empty all three groups under a single lock acquisition.
    pub fn clear_all(&self) {
        let mut groups = self.groups.lock();
        groups.data_context.clear();
        groups.system_status.clear();
        groups.user_event.clear();
        debug!("all listeners cleared");
    }

    /// Registration counts as `(data_context, system_status, user_event)`.
    pub fn counts(&self) -> (usize, usize, usize) {
        let groups = self.groups.lock();
        (
            groups.data_context.len(),
            groups.system_status.len(),
            groups.user_event.len(),
        )
    }

    pub fn dispatch_data_context(&self, mut call: impl FnMut(&dyn DataContextListener)) -> DispatchReport {
        let snapshot = self.groups.lock().data_context.clone();
        fan_out("data_context", &snapshot, |listener| call(listener.as_ref()))
    }

    pub fn dispatch_system_status(&self, mut call: impl FnMut(&dyn SystemStatusListener)) -> DispatchReport {
        let snapshot = self.groups.lock().system_status.clone();
        fan_out("system_status", &snapshot, |listener| call(listener.as_ref()))
    }

    pub fn dispatch_user_event(&self, mut call: impl FnMut(&dyn UserEventListener)) -> DispatchReport {
        let snapshot = self.groups.lock().user_event.clone();
        fan_out("user_event", &snapshot, |listener| call(listener.as_ref()))
    }
}
