use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rumqttc::{AsyncClient, QoS};
use tokio::{
    sync::{mpsc, watch},
    task::AbortHandle,
};
use tracing::{debug, warn};

use flex_thermostat_common::{
    entity_set_topic, entity_state_topic,
    host::{Clock, EventFeed, Scheduler, StateReader, StateSink, SwitchChannel},
    PersistedState, ScheduledTask, SubscriptionHandle, SwitchCommand, ThermostatStatus,
    TimerHandle, PAYLOAD_OFF, PAYLOAD_ON,
};

pub type FiredTimer = (TimerHandle, ScheduledTask);

/// Host adapter backed by the MQTT broker and the tokio runtime.
///
/// Entity states are cached from incoming state topics. Timers are tokio
/// tasks that report back on `timer_tx` once their deadline passes.
pub struct MqttHost {
    prefix: String,
    status_topic: String,
    mqtt: AsyncClient,
    states: HashMap<String, String>,
    subscriptions: HashMap<u64, Vec<String>>,
    timers: HashMap<u64, AbortHandle>,
    timer_tx: mpsc::UnboundedSender<FiredTimer>,
    persist_tx: watch::Sender<Option<PersistedState>>,
    next_id: u64,
}

impl MqttHost {
    pub fn new(
        prefix: impl Into<String>,
        status_topic: impl Into<String>,
        mqtt: AsyncClient,
        timer_tx: mpsc::UnboundedSender<FiredTimer>,
        persist_tx: watch::Sender<Option<PersistedState>>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            status_topic: status_topic.into(),
            mqtt,
            states: HashMap::new(),
            subscriptions: HashMap::new(),
            timers: HashMap::new(),
            timer_tx,
            persist_tx,
            next_id: 1,
        }
    }

    /// An empty payload (retained message cleared) means the entity is gone.
    pub fn record_state(&mut self, entity_id: &str, state: Option<&str>) {
        match state {
            Some(value) => {
                self.states.insert(entity_id.to_string(), value.to_string());
            }
            None => {
                self.states.remove(entity_id);
            }
        }
    }

    pub fn is_subscribed(&self, entity_id: &str) -> bool {
        self.subscriptions
            .values()
            .any(|ids| ids.iter().any(|id| id == entity_id))
    }

    /// Forgets a timer that fired. Returns `false` when it was cancelled in
    /// the meantime.
    pub fn timer_fired(&mut self, handle: TimerHandle) -> bool {
        self.timers.remove(&handle.0).is_some()
    }

    fn allocate(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl Clock for MqttHost {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl StateReader for MqttHost {
    fn entity_state(&self, entity_id: &str) -> Option<String> {
        self.states.get(entity_id).cloned()
    }
}

impl SwitchChannel for MqttHost {
    fn call_switch(&mut self, entity_id: &str, command: SwitchCommand) {
        let payload = match command {
            SwitchCommand::TurnOn => PAYLOAD_ON,
            SwitchCommand::TurnOff => PAYLOAD_OFF,
        };
        let topic = entity_set_topic(&self.prefix, entity_id);
        debug!("{} {entity_id} via {topic}", command.as_str());
        if let Err(err) = self
            .mqtt
            .try_publish(topic, QoS::AtLeastOnce, false, payload.as_bytes().to_vec())
        {
            warn!("switch command for {entity_id} failed: {err}");
        }
    }
}

impl EventFeed for MqttHost {
    fn subscribe(&mut self, entity_ids: &[String]) -> SubscriptionHandle {
        for entity_id in entity_ids {
            if let Err(err) = self
                .mqtt
                .try_subscribe(entity_state_topic(&self.prefix, entity_id), QoS::AtMostOnce)
            {
                warn!("subscribe to {entity_id} failed: {err}");
            }
        }
        let id = self.allocate();
        self.subscriptions.insert(id, entity_ids.to_vec());
        SubscriptionHandle(id)
    }

    fn unsubscribe(&mut self, handle: SubscriptionHandle) {
        let Some(entity_ids) = self.subscriptions.remove(&handle.0) else {
            return;
        };
        for entity_id in entity_ids {
            if self.is_subscribed(&entity_id) {
                continue;
            }
            if let Err(err) = self
                .mqtt
                .try_unsubscribe(entity_state_topic(&self.prefix, &entity_id))
            {
                warn!("unsubscribe from {entity_id} failed: {err}");
            }
        }
    }
}

impl Scheduler for MqttHost {
    fn schedule_at(&mut self, at: DateTime<Utc>, task: ScheduledTask) -> TimerHandle {
        let handle = TimerHandle(self.allocate());
        let delay = (at - Utc::now()).to_std().unwrap_or_default();
        let tx = self.timer_tx.clone();

        let join = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The receiver only goes away on shutdown.
            let _ = tx.send((handle, task));
        });
        self.timers.insert(handle.0, join.abort_handle());
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) {
        if let Some(timer) = self.timers.remove(&handle.0) {
            timer.abort();
        }
    }
}

impl StateSink for MqttHost {
    fn write_state(&mut self, status: &ThermostatStatus) {
        match serde_json::to_vec(status) {
            Ok(body) => {
                if let Err(err) =
                    self.mqtt
                        .try_publish(self.status_topic.clone(), QoS::AtLeastOnce, true, body)
                {
                    warn!("thermostat status publish failed: {err}");
                }
            }
            Err(err) => warn!("thermostat status serialization failed: {err}"),
        }

        let attributes = &status.attributes;
        self.persist_tx.send_if_modified(|current| {
            if current.as_ref() == Some(attributes) {
                return false;
            }
            *current = Some(attributes.clone());
            true
        });
    }
}
