use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::{
    host::{
        Clock, EventFeed, ScheduledTask, Scheduler, StateReader, StateSink, SubscriptionHandle,
        SwitchChannel, SwitchCommand, TimerHandle,
    },
    types::ThermostatStatus,
};

/// In-memory host with a manual clock for driving the core in tests.
#[derive(Debug)]
pub struct FakeHost {
    pub now: DateTime<Utc>,
    pub states: HashMap<String, String>,
    pub commands: Vec<(String, SwitchCommand)>,
    pub timers: BTreeMap<u64, (DateTime<Utc>, ScheduledTask)>,
    pub cancelled: Vec<TimerHandle>,
    pub subscriptions: HashMap<u64, Vec<String>>,
    pub written: Vec<ThermostatStatus>,
    next_id: u64,
}

impl FakeHost {
    pub fn new() -> Self {
        Self {
            now: Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0).unwrap(),
            states: HashMap::new(),
            commands: Vec::new(),
            timers: BTreeMap::new(),
            cancelled: Vec::new(),
            subscriptions: HashMap::new(),
            written: Vec::new(),
            next_id: 1,
        }
    }

    pub fn set_state(&mut self, entity_id: &str, state: &str) {
        self.states.insert(entity_id.to_string(), state.to_string());
    }

    pub fn advance(&mut self, by: Duration) {
        self.now += by;
    }

    /// Removes and returns every timer due at the current time, earliest first.
    pub fn take_due(&mut self) -> Vec<(TimerHandle, ScheduledTask)> {
        let due: Vec<u64> = self
            .timers
            .iter()
            .filter(|(_, (at, _))| *at <= self.now)
            .map(|(id, _)| *id)
            .collect();
        let mut fired: Vec<(DateTime<Utc>, TimerHandle, ScheduledTask)> = due
            .into_iter()
            .filter_map(|id| {
                self.timers
                    .remove(&id)
                    .map(|(at, task)| (at, TimerHandle(id), task))
            })
            .collect();
        fired.sort_by_key(|(at, handle, _)| (*at, handle.0));
        fired
            .into_iter()
            .map(|(_, handle, task)| (handle, task))
            .collect()
    }

    pub fn pending(&self, task: &ScheduledTask) -> Option<DateTime<Utc>> {
        self.timers
            .values()
            .find(|(_, pending)| pending == task)
            .map(|(at, _)| *at)
    }

    pub fn is_subscribed(&self, entity_id: &str) -> bool {
        self.subscriptions
            .values()
            .any(|ids| ids.iter().any(|id| id == entity_id))
    }

    fn allocate(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl Clock for FakeHost {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }
}

impl StateReader for FakeHost {
    fn entity_state(&self, entity_id: &str) -> Option<String> {
        self.states.get(entity_id).cloned()
    }
}

impl SwitchChannel for FakeHost {
    fn call_switch(&mut self, entity_id: &str, command: SwitchCommand) {
        self.commands.push((entity_id.to_string(), command));
    }
}

impl EventFeed for FakeHost {
    fn subscribe(&mut self, entity_ids: &[String]) -> SubscriptionHandle {
        let id = self.allocate();
        self.subscriptions.insert(id, entity_ids.to_vec());
        SubscriptionHandle(id)
    }

    fn unsubscribe(&mut self, handle: SubscriptionHandle) {
        self.subscriptions.remove(&handle.0);
    }
}

impl Scheduler for FakeHost {
    fn schedule_at(&mut self, at: DateTime<Utc>, task: ScheduledTask) -> TimerHandle {
        let id = self.allocate();
        self.timers.insert(id, (at, task));
        TimerHandle(id)
    }

    fn cancel(&mut self, handle: TimerHandle) {
        self.timers.remove(&handle.0);
        self.cancelled.push(handle);
    }
}

impl StateSink for FakeHost {
    fn write_state(&mut self, status: &ThermostatStatus) {
        self.written.push(status.clone());
    }
}
