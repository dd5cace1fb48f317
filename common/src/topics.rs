pub const PAYLOAD_ON: &str = "ON";
pub const PAYLOAD_OFF: &str = "OFF";

pub const CMD_MODE: &str = "mode";
pub const CMD_FAN_MODE: &str = "fan_mode";
pub const CMD_PRESET: &str = "preset";
pub const CMD_TEMPERATURE: &str = "temperature";

pub fn entity_state_topic(prefix: &str, entity_id: &str) -> String {
    format!("{prefix}/{entity_id}/state")
}

pub fn entity_set_topic(prefix: &str, entity_id: &str) -> String {
    format!("{prefix}/{entity_id}/set")
}

pub fn status_topic(prefix: &str, name: &str) -> String {
    format!("{prefix}/thermostat/{}/status", topic_slug(name))
}

pub fn command_topic(prefix: &str, name: &str, command: &str) -> String {
    format!("{prefix}/thermostat/{}/cmnd/{command}", topic_slug(name))
}

/// Inverse of [`entity_state_topic`].
pub fn entity_from_state_topic<'a>(prefix: &str, topic: &'a str) -> Option<&'a str> {
    topic
        .strip_prefix(prefix)?
        .strip_prefix('/')?
        .strip_suffix("/state")
        .filter(|entity_id| !entity_id.is_empty())
}

/// Inverse of [`command_topic`]; returns the command name.
pub fn command_from_topic<'a>(prefix: &str, name: &str, topic: &'a str) -> Option<&'a str> {
    let base = format!("{prefix}/thermostat/{}/cmnd/", topic_slug(name));
    topic
        .strip_prefix(base.as_str())
        .filter(|command| !command.is_empty() && !command.contains('/'))
}

/// Lowercases and replaces anything outside `[a-z0-9_]` so a display name
/// can be used as one topic level.
pub fn topic_slug(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}
