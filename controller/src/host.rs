use std::{
    collections::HashMap,
    io::ErrorKind,
    net::SocketAddr,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use tokio::{
    net::TcpListener,
    sync::{mpsc, watch, Mutex, Notify},
    task::JoinHandle,
};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use flex_thermostat_common::{
    command_from_topic, command_topic, entity_from_state_topic, entity_state_topic, status_topic,
    topic_slug, ComfortController, FanMode, HvacMode, PersistedState, RuntimeConfig,
    ThermostatError, ThermostatStatus, CMD_FAN_MODE, CMD_MODE, CMD_PRESET, CMD_TEMPERATURE,
};

use crate::platform::{FiredTimer, MqttHost};

const MAX_MQTT_PAYLOAD_BYTES: usize = 512;
const DEFAULT_CONFIG_PATH: &str = "./flex-thermostat.json";

/// The controller and its host adapter always change together.
struct Runtime {
    controller: ComfortController,
    host: MqttHost,
}

#[derive(Clone)]
struct AppState {
    runtime: Arc<Mutex<Runtime>>,
    mqtt: AsyncClient,
    prefix: Arc<String>,
    name: Arc<String>,
    topics: Arc<Vec<String>>,
    fatal: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
}

#[derive(Clone)]
struct AppStore {
    restore_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Default, Deserialize)]
struct TemperatureRequest {
    #[serde(default)]
    target: Option<f32>,
    #[serde(default)]
    low: Option<f32>,
    #[serde(default)]
    high: Option<f32>,
}

#[derive(Debug)]
enum UserRequest {
    Mode(HvacMode),
    FanMode(FanMode),
    Preset(String),
    Temperature(TemperatureRequest),
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config_path = std::env::var("FLEX_THERMOSTAT_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
    let raw = tokio::fs::read(&config_path)
        .await
        .with_context(|| format!("failed to read config {}", config_path.display()))?;
    let runtime_config = RuntimeConfig::from_json(&raw)
        .with_context(|| format!("invalid config {}", config_path.display()))?;

    let store = AppStore::new();
    let persisted = store.load_restore_state().await.unwrap_or_else(|err| {
        warn!("failed to load restore state from store: {err:#}");
        PersistedState::default()
    });

    let mut controller = ComfortController::new(&runtime_config.thermostat)
        .context("invalid thermostat configuration")?;
    controller
        .restore(&persisted)
        .context("failed to restore thermostat state")?;

    let network = &runtime_config.network;
    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or(network.mqtt_host.clone());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(network.mqtt_port);

    let client_id = format!("flex-thermostat-{}", topic_slug(controller.name()));
    let mut mqtt_options = MqttOptions::new(client_id, mqtt_host, mqtt_port);
    let mqtt_user = std::env::var("MQTT_USER").unwrap_or(network.mqtt_user.clone());
    let mqtt_pass = std::env::var("MQTT_PASS").unwrap_or(network.mqtt_pass.clone());
    if !mqtt_user.is_empty() {
        mqtt_options.set_credentials(mqtt_user, mqtt_pass);
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);
    let (timer_tx, timer_rx) = mpsc::unbounded_channel();
    let (persist_tx, persist_rx) = watch::channel(None);

    let prefix = network.topic_prefix.clone();
    let name = controller.name().to_string();
    let topics = subscription_topics(&prefix, &name, &controller.watched_entities());
    let host = MqttHost::new(
        prefix.clone(),
        status_topic(&prefix, &name),
        mqtt.clone(),
        timer_tx,
        persist_tx,
    );

    let app_state = AppState {
        runtime: Arc::new(Mutex::new(Runtime { controller, host })),
        mqtt,
        prefix: Arc::new(prefix),
        name: Arc::new(name),
        topics: Arc::new(topics),
        fatal: Arc::new(AtomicBool::new(false)),
        shutdown: Arc::new(Notify::new()),
    };

    let mqtt_task = spawn_mqtt_loop(app_state.clone(), eventloop);
    let timer_task = spawn_timer_loop(app_state.clone(), timer_rx);
    spawn_persist_loop(store, persist_rx);
    spawn_initialize(
        app_state.clone(),
        Duration::from_millis(runtime_config.startup_delay_ms),
    );

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/mode", post(handle_set_mode))
        .route("/api/fan", post(handle_set_fan_mode))
        .route("/api/preset", post(handle_set_preset))
        .route("/api/temperature", post(handle_set_temperature))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state.clone());

    let port = std::env::var("CONTROLLER_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(runtime_config.http_port);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(app_state.clone()))
        .await?;

    mqtt_task.abort();
    timer_task.abort();
    {
        let mut guard = app_state.runtime.lock().await;
        let Runtime { controller, host } = &mut *guard;
        controller.teardown(host);
    }

    if app_state.fatal.load(Ordering::Relaxed) {
        anyhow::bail!("thermostat stopped after an internal invariant violation");
    }
    Ok(())
}

fn subscription_topics(prefix: &str, name: &str, entities: &[String]) -> Vec<String> {
    let mut topics: Vec<String> = entities
        .iter()
        .map(|entity_id| entity_state_topic(prefix, entity_id))
        .collect();
    for command in [CMD_MODE, CMD_FAN_MODE, CMD_PRESET, CMD_TEMPERATURE] {
        topics.push(command_topic(prefix, name, command));
    }
    topics
}

/// Runs on every (re)connect since the broker drops subscriptions with the
/// clean session.
fn subscribe_topics(app_state: &AppState) {
    for topic in app_state.topics.iter() {
        if let Err(err) = app_state.mqtt.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
            warn!("mqtt subscribe to {topic} failed: {err}");
        }
    }
}

fn spawn_mqtt_loop(app_state: AppState, mut eventloop: rumqttc::EventLoop) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Err(err) =
                        handle_mqtt_message(&app_state, message.topic, message.payload.to_vec())
                            .await
                    {
                        warn!("mqtt message handling error: {err:#}");
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                    subscribe_topics(&app_state);
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    })
}

fn spawn_timer_loop(
    app_state: AppState,
    mut timer_rx: mpsc::UnboundedReceiver<FiredTimer>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some((handle, task)) = timer_rx.recv().await {
            let result = {
                let mut guard = app_state.runtime.lock().await;
                let Runtime { controller, host } = &mut *guard;
                if !host.timer_fired(handle) {
                    continue;
                }
                controller.handle_timer(host, handle, &task)
            };
            if let Err(err) = result {
                report_error(&app_state, "timer", &err);
            }
        }
    })
}

fn spawn_persist_loop(store: AppStore, mut persist_rx: watch::Receiver<Option<PersistedState>>) {
    tokio::spawn(async move {
        while persist_rx.changed().await.is_ok() {
            let snapshot = persist_rx.borrow_and_update().clone();
            let Some(state) = snapshot else {
                continue;
            };
            if let Err(err) = store.save_restore_state(&state).await {
                warn!("failed to persist restore state: {err:#}");
            }
        }
    });
}

/// Gives retained entity states time to arrive before the first evaluation.
fn spawn_initialize(app_state: AppState, delay: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let result = {
            let mut guard = app_state.runtime.lock().await;
            let Runtime { controller, host } = &mut *guard;
            controller.initialize(host)
        };
        match result {
            Ok(()) => info!("thermostat {} started", app_state.name),
            Err(err) => report_error(&app_state, "initialize", &err),
        }
    });
}

async fn shutdown_signal(app_state: AppState) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                warn!("failed to listen for ctrl-c: {err}");
            }
            info!("shutdown requested");
        }
        _ = app_state.shutdown.notified() => {
            info!("shutting down after fatal error");
        }
    }
}

fn report_error(app_state: &AppState, context: &str, err: &ThermostatError) {
    match err {
        ThermostatError::Invariant { .. } => {
            error!("{context}: {err}");
            app_state.fatal.store(true, Ordering::Relaxed);
            app_state.shutdown.notify_one();
        }
        ThermostatError::Stopped(_) => debug!("{context}: ignored after teardown"),
        err if err.is_user_error() => warn!("{context}: rejected request: {err}"),
        err => error!("{context}: {err}"),
    }
}

async fn handle_mqtt_message(
    app_state: &AppState,
    topic: String,
    payload: Vec<u8>,
) -> anyhow::Result<()> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }

    let message = String::from_utf8(payload).context("non utf8 mqtt payload")?;
    let message = message.trim();

    if let Some(entity_id) = entity_from_state_topic(&app_state.prefix, &topic) {
        let new_state = (!message.is_empty()).then_some(message);
        let result = {
            let mut guard = app_state.runtime.lock().await;
            let Runtime { controller, host } = &mut *guard;
            host.record_state(entity_id, new_state);
            if !host.is_subscribed(entity_id) {
                return Ok(());
            }
            controller.handle_state_change(host, entity_id, new_state)
        };
        if let Err(err) = result {
            report_error(app_state, entity_id, &err);
        }
        return Ok(());
    }

    if let Some(command) = command_from_topic(&app_state.prefix, &app_state.name, &topic) {
        let request = match parse_mqtt_command(command, message) {
            Ok(request) => request,
            Err(reason) => {
                warn!("ignoring command on {topic}: {reason}");
                return Ok(());
            }
        };
        if let Err(err) = apply_request(app_state, request).await {
            report_error(app_state, command, &err);
        }
    }
    Ok(())
}

fn parse_mqtt_command(command: &str, message: &str) -> Result<UserRequest, String> {
    match command {
        CMD_MODE => HvacMode::parse(message)
            .map(UserRequest::Mode)
            .ok_or_else(|| format!("unknown hvac mode {message:?}")),
        CMD_FAN_MODE => FanMode::parse(message)
            .map(UserRequest::FanMode)
            .ok_or_else(|| format!("unknown fan mode {message:?}")),
        CMD_PRESET => Ok(UserRequest::Preset(message.to_string())),
        CMD_TEMPERATURE => {
            if let Ok(target) = message.parse::<f32>() {
                return Ok(UserRequest::Temperature(TemperatureRequest {
                    target: Some(target),
                    ..TemperatureRequest::default()
                }));
            }
            serde_json::from_str::<TemperatureRequest>(message)
                .map(UserRequest::Temperature)
                .map_err(|err| format!("invalid temperature payload: {err}"))
        }
        other => Err(format!("unknown command {other}")),
    }
}

async fn apply_request(
    app_state: &AppState,
    request: UserRequest,
) -> Result<ThermostatStatus, ThermostatError> {
    let mut guard = app_state.runtime.lock().await;
    let Runtime { controller, host } = &mut *guard;
    info!("user request: {request:?}");
    match request {
        UserRequest::Mode(mode) => controller.set_hvac_mode(host, mode)?,
        UserRequest::FanMode(fan_mode) => controller.set_fan_mode(host, fan_mode)?,
        UserRequest::Preset(preset) => controller.set_preset_mode(host, &preset)?,
        UserRequest::Temperature(TemperatureRequest { target, low, high }) => {
            controller.set_temperature(host, target, low, high)?
        }
    }
    Ok(controller.status())
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.runtime.lock().await.controller.status();
    Json(status)
}

async fn handle_set_mode(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let Some(mode) = HvacMode::parse(value) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Invalid mode. Use 'off', 'heat', 'cool', 'heat_cool' or 'fan_only'",
        );
    };
    respond(&state, UserRequest::Mode(mode)).await
}

async fn handle_set_fan_mode(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let Some(fan_mode) = FanMode::parse(value) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Invalid fan mode. Use 'off', 'on' or 'auto'",
        );
    };
    respond(&state, UserRequest::FanMode(fan_mode)).await
}

async fn handle_set_preset(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    respond(&state, UserRequest::Preset(value.clone())).await
}

async fn handle_set_temperature(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let mut request = TemperatureRequest::default();
    for (key, slot) in [
        ("target", &mut request.target),
        ("low", &mut request.low),
        ("high", &mut request.high),
    ] {
        if let Some(value) = params.get(key) {
            let Ok(parsed) = value.parse::<f32>() else {
                return error_response(StatusCode::BAD_REQUEST, "Invalid temperature value");
            };
            *slot = Some(parsed);
        }
    }
    respond(&state, UserRequest::Temperature(request)).await
}

async fn respond(state: &AppState, request: UserRequest) -> axum::response::Response {
    match apply_request(state, request).await {
        Ok(status) => Json(status).into_response(),
        Err(err) if err.is_user_error() => {
            error_response(StatusCode::BAD_REQUEST, &err.to_string())
        }
        Err(err) => {
            report_error(state, "http request", &err);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Thermostat error")
        }
    }
}

impl AppStore {
    fn new() -> Self {
        let data_dir = std::env::var("THERMOSTAT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.thermostat"));

        Self {
            restore_path: Arc::new(data_dir.join("restore.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    async fn load_restore_state(&self) -> anyhow::Result<PersistedState> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.restore_path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice::<PersistedState>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(PersistedState::default()),
            Err(err) => Err(err.into()),
        }
    }

    async fn save_restore_state(&self, state: &PersistedState) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.restore_path.as_ref().clone();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(state)?;
        tokio::fs::write(path, payload).await?;
        Ok(())
    }
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}
