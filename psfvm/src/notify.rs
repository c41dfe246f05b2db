//! Fire-and-forget notifications for external observers.

use parking_lot::Mutex;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use strum::{EnumCount, IntoStaticStr};

/// Notification kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumCount, IntoStaticStr)]
pub enum Event {
    /// A video frame boundary was crossed.
    NewFrame,
    /// The machine switched between running and paused.
    RunningStateChanged,
    /// The machine stopped somewhere observers may want to inspect it (pause, breakpoint, step).
    MachineStateChanged,
}

/// Identifies a registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Observer = Box<dyn FnMut() + Send>;

#[derive(Default)]
struct Lists {
    lists: [Vec<(SubscriptionId, Observer)>; Event::COUNT],
    /// Observers taken out of their list while being invoked.
    firing: Vec<SubscriptionId>,
    /// Observers unsubscribed while being invoked, dropped once the emission ends.
    removed: Vec<SubscriptionId>,
}

/// Per-event observer lists.
///
/// Cloning yields another handle to the same lists, so observers can be registered from the
/// caller thread while the scheduler thread fires notifications. Observers are invoked on the
/// firing thread, in registration order, without the lists locked. They may subscribe or
/// unsubscribe (themselves included) while being invoked: removals take effect right after the
/// emission, and new observers only see later emissions.
#[derive(Clone, Default)]
pub struct Observers {
    lists: Arc<Mutex<Lists>>,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lists = self.lists.lock();
        f.debug_map()
            .entries(
                [
                    Event::NewFrame,
                    Event::RunningStateChanged,
                    Event::MachineStateChanged,
                ]
                .into_iter()
                .map(|event| {
                    (
                        <&'static str>::from(event),
                        lists.lists[event as usize].len(),
                    )
                }),
            )
            .finish()
    }
}

impl Observers {
    /// Registers `observer` to be invoked whenever `event` fires.
    pub fn subscribe<F>(&self, event: Event, observer: F) -> SubscriptionId
    where
        F: FnMut() + Send + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lists.lock().lists[event as usize].push((id, Box::new(observer)));

        id
    }

    /// Removes a previously registered observer. Returns whether it was found.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut lists = self.lists.lock();
        for list in &mut lists.lists {
            if let Some(index) = list.iter().position(|(other, _)| *other == id) {
                list.remove(index);
                return true;
            }
        }

        if let Some(index) = lists.firing.iter().position(|other| *other == id) {
            lists.firing.swap_remove(index);
            lists.removed.push(id);
            return true;
        }

        false
    }

    /// Invokes every observer of `event`.
    pub fn fire(&self, event: Event) {
        let mut current = {
            let mut lists = self.lists.lock();
            let current = std::mem::take(&mut lists.lists[event as usize]);
            lists.firing.extend(current.iter().map(|(id, _)| *id));
            current
        };

        for (_, observer) in &mut current {
            observer();
        }

        let mut guard = self.lists.lock();
        let lists = &mut *guard;
        lists
            .firing
            .retain(|id| !current.iter().any(|(other, _)| other == id));
        current.retain(|(id, _)| {
            match lists.removed.iter().position(|removed| removed == id) {
                Some(index) => {
                    lists.removed.swap_remove(index);
                    false
                }
                None => true,
            }
        });

        // observers subscribed during the emission go after the existing ones
        let added = std::mem::replace(&mut lists.lists[event as usize], current);
        lists.lists[event as usize].extend(added);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn observers_run_in_registration_order() {
        let observers = Observers::default();
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let log = log.clone();
            observers.subscribe(Event::NewFrame, move || log.lock().push(i));
        }

        observers.fire(Event::NewFrame);
        observers.fire(Event::RunningStateChanged);
        assert_eq!(*log.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn observers_can_unsubscribe_themselves() {
        let observers = Observers::default();
        let count = Arc::new(AtomicU64::new(0));
        let own_id = Arc::new(Mutex::new(None));

        let id = observers.subscribe(Event::NewFrame, {
            let observers = observers.clone();
            let count = count.clone();
            let own_id = own_id.clone();
            move || {
                count.fetch_add(1, Ordering::Relaxed);
                if let Some(id) = own_id.lock().take() {
                    assert!(observers.unsubscribe(id));
                }
            }
        });
        *own_id.lock() = Some(id);

        observers.fire(Event::NewFrame);
        observers.fire(Event::NewFrame);

        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert!(!observers.unsubscribe(id));
    }

    #[test]
    fn observers_subscribed_while_firing_run_next_time() {
        let observers = Observers::default();
        let log = Arc::new(Mutex::new(Vec::new()));

        observers.subscribe(Event::RunningStateChanged, {
            let observers = observers.clone();
            let log = log.clone();
            let mut subscribed = false;
            move || {
                log.lock().push("first");
                if !subscribed {
                    subscribed = true;
                    let log = log.clone();
                    observers.subscribe(Event::RunningStateChanged, move || {
                        log.lock().push("second");
                    });
                }
            }
        });

        observers.fire(Event::RunningStateChanged);
        assert_eq!(*log.lock(), vec!["first"]);

        observers.fire(Event::RunningStateChanged);
        assert_eq!(*log.lock(), vec!["first", "first", "second"]);
    }

    #[test]
    fn unsubscribed_observers_stop_firing() {
        let observers = Observers::default();
        let count = Arc::new(AtomicU64::new(0));

        let id = observers.subscribe(Event::MachineStateChanged, {
            let count = count.clone();
            move || {
                count.fetch_add(1, Ordering::Relaxed);
            }
        });

        observers.fire(Event::MachineStateChanged);
        assert!(observers.unsubscribe(id));
        assert!(!observers.unsubscribe(id));
        observers.fire(Event::MachineStateChanged);

        assert_eq!(count.load(Ordering::Relaxed), 1);
    }
}
