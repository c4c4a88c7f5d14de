use std::{io::ErrorKind, net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use rumqttc::{AsyncClient, Event, Incoming, LastWill, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use tokio::{
    net::TcpListener,
    sync::{mpsc, oneshot, watch},
};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use thermostat_common::{
    config::parse_mac, parse_set_topic, state_topic, AccessoryInfo, CharacteristicId,
    CharacteristicStore, CharacteristicValue, Notification, RuntimeConfig, StoreError,
    ThermostatEngine, TOPIC_ACCESSORY, TOPIC_CMD_IDENTIFY, TOPIC_STATUS,
};

use crate::{
    sampler::Sampler,
    simulated::{LoggedRelay, LoggedStatusLed, SimulatedSensor},
};

const MAX_MQTT_PAYLOAD_BYTES: usize = 64;

#[derive(Clone)]
struct AppState {
    engine: Arc<ThermostatEngine>,
    accessory: Arc<AccessoryInfo>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct CharacteristicView {
    id: CharacteristicId,
    value: CharacteristicValue,
    #[serde(rename = "remoteWritable")]
    remote_writable: bool,
}

#[derive(Debug, Deserialize)]
struct CharacteristicWrite {
    value: serde_json::Value,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut runtime = load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config: {err:#}");
        RuntimeConfig::default()
    });
    apply_env_overrides(&mut runtime);
    runtime.sanitize();

    let store = Arc::new(CharacteristicStore::new());
    let status = Arc::new(LoggedStatusLed::new(runtime.hardware.led_gpio));
    let engine = Arc::new(ThermostatEngine::new(
        store.clone(),
        LoggedRelay::new(runtime.hardware.relay_gpio),
        status,
    ));
    engine.bind();

    let mut mqtt_options = MqttOptions::new(
        "thermostat-controller-rust",
        runtime.network.mqtt_host.clone(),
        runtime.network.mqtt_port,
    );
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_last_will(LastWill::new(
        TOPIC_STATUS,
        "offline",
        QoS::AtLeastOnce,
        true,
    ));
    if !runtime.network.mqtt_user.is_empty() {
        mqtt_options.set_credentials(
            runtime.network.mqtt_user.clone(),
            runtime.network.mqtt_pass.clone(),
        );
    }
    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);

    spawn_notification_publisher(&store, mqtt.clone());

    let (ready_tx, ready_rx) = oneshot::channel();
    spawn_mqtt_loop(engine.clone(), mqtt.clone(), eventloop, ready_tx);

    info!(
        "waiting for broker at {}:{}",
        runtime.network.mqtt_host, runtime.network.mqtt_port
    );
    tokio::select! {
        ready = ready_rx => ready.context("mqtt loop exited before connecting")?,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted before network was ready");
            return Ok(());
        }
    }

    // Identity must be settled before anything is served to remote parties.
    engine.signal(thermostat_common::StatusCode::NetworkReady);
    let mac = runtime
        .accessory
        .mac
        .as_deref()
        .and_then(|raw| match parse_mac(raw) {
            Ok(mac) => Some(mac),
            Err(err) => {
                warn!("ignoring configured MAC: {err}");
                None
            }
        });
    let accessory = Arc::new(AccessoryInfo::for_device(&runtime.accessory, mac));
    info!(
        "accessory '{}' (serial {}, setup code {})",
        accessory.name, accessory.serial_number, runtime.accessory.setup_code
    );
    publish_accessory(&mqtt, &accessory, &store).await?;

    let app_state = AppState {
        engine: engine.clone(),
        accessory,
    };
    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/accessory", get(handle_get_accessory))
        .route("/api/characteristics", get(handle_get_characteristics))
        .route(
            "/api/characteristics/{id}",
            get(handle_get_characteristic).put(handle_put_characteristic),
        )
        .route("/api/identify", post(handle_identify))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], runtime.network.http_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let fail_every = std::env::var("SIM_SENSOR_FAIL_EVERY")
        .ok()
        .and_then(|value| value.parse::<u64>().ok());
    let sampler = Sampler::new(
        engine.clone(),
        SimulatedSensor::new(runtime.sensor.clone(), fail_every),
        &runtime.sampling,
    );
    let sampler_task = tokio::spawn(sampler.run(stop_rx));

    info!("controller listening on http://{addr}");
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!("failed to listen for ctrl-c: {err}");
            }
        })
        .await
        .context("controller server failed");

    info!("shutting down");
    stop_sampler(&engine, stop_tx, sampler_task).await;
    served?;

    if let Err(err) = mqtt
        .publish(TOPIC_STATUS, QoS::AtLeastOnce, true, "offline")
        .await
    {
        warn!("failed to publish offline status: {err}");
    }
    Ok(())
}

// Every exit after the sampler is spawned goes through here, so the relay
// is released even when serving failed.
async fn stop_sampler(
    engine: &ThermostatEngine,
    stop: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
) {
    // The sampler may already be gone, in which case there is nothing to stop.
    let _ = stop.send(true);
    if let Err(err) = task.await {
        warn!("sampling task failed: {err}");
    }
    engine.shutdown();
}

async fn load_runtime_config() -> anyhow::Result<RuntimeConfig> {
    let data_dir = std::env::var("THERMOSTAT_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./.thermostat"));
    let path = data_dir.join("runtime.json");

    match tokio::fs::read(&path).await {
        Ok(raw) => RuntimeConfig::from_json(&raw)
            .with_context(|| format!("failed to parse {}", path.display())),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}

fn apply_env_overrides(runtime: &mut RuntimeConfig) {
    if let Ok(host) = std::env::var("MQTT_HOST") {
        runtime.network.mqtt_host = host;
    }
    if let Some(port) = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
    {
        runtime.network.mqtt_port = port;
    }
    if let Ok(user) = std::env::var("MQTT_USER") {
        runtime.network.mqtt_user = user;
        runtime.network.mqtt_pass = std::env::var("MQTT_PASS").unwrap_or_default();
    }
    if let Some(port) = std::env::var("CONTROLLER_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
    {
        runtime.network.http_port = port;
    }
    if let Ok(mac) = std::env::var("THERMOSTAT_MAC") {
        runtime.accessory.mac = Some(mac);
    }
}

fn spawn_notification_publisher(store: &CharacteristicStore, mqtt: AsyncClient) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Notification>();
    store.observe(Arc::new(move |notification: &Notification| {
        // Receiver only goes away at process exit.
        let _ = tx.send(*notification);
    }));

    tokio::spawn(async move {
        while let Some(Notification { id, value }) = rx.recv().await {
            if let Err(err) = mqtt
                .publish(state_topic(id), QoS::AtLeastOnce, true, value.to_string())
                .await
            {
                warn!("failed to publish {id}: {err}");
            }
        }
    });
}

fn spawn_mqtt_loop(
    engine: Arc<ThermostatEngine>,
    mqtt: AsyncClient,
    mut eventloop: rumqttc::EventLoop,
    ready: oneshot::Sender<()>,
) {
    tokio::spawn(async move {
        let mut ready = Some(ready);
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Err(err) =
                        handle_mqtt_message(&engine, &message.topic, &message.payload)
                    {
                        warn!("mqtt message on {} rejected: {err:#}", message.topic);
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                    if let Err(err) = announce_online(&mqtt) {
                        warn!("failed to queue mqtt subscriptions: {err}");
                    }
                    if let Some(ready) = ready.take() {
                        let _ = ready.send(());
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

// Queued without awaiting: the event loop that would drain the request
// channel is the caller.
fn announce_online(mqtt: &AsyncClient) -> Result<(), rumqttc::ClientError> {
    mqtt.try_subscribe(TOPIC_CMD_IDENTIFY, QoS::AtLeastOnce)?;
    for (_, topic) in thermostat_common::set_topics() {
        mqtt.try_subscribe(topic, QoS::AtLeastOnce)?;
    }
    mqtt.try_publish(TOPIC_STATUS, QoS::AtLeastOnce, true, "online")
}

async fn publish_accessory(
    mqtt: &AsyncClient,
    accessory: &AccessoryInfo,
    store: &CharacteristicStore,
) -> anyhow::Result<()> {
    let body = serde_json::to_vec(accessory).context("failed to serialize accessory info")?;
    mqtt.publish(TOPIC_ACCESSORY, QoS::AtLeastOnce, true, body)
        .await
        .context("failed to publish accessory info")?;

    for id in CharacteristicId::ALL {
        mqtt.publish(
            state_topic(id),
            QoS::AtLeastOnce,
            true,
            store.get(id).to_string(),
        )
        .await
        .with_context(|| format!("failed to publish initial {id}"))?;
    }
    Ok(())
}

fn handle_mqtt_message(
    engine: &ThermostatEngine,
    topic: &str,
    payload: &[u8],
) -> anyhow::Result<()> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        anyhow::bail!("oversized payload ({} bytes)", payload.len());
    }

    if topic == TOPIC_CMD_IDENTIFY {
        info!("identify requested over mqtt");
        engine.signal(thermostat_common::StatusCode::Identify);
        return Ok(());
    }

    let Some(id) = parse_set_topic(topic) else {
        return Ok(());
    };
    let message = std::str::from_utf8(payload).context("non utf8 mqtt payload")?;
    let value = id.parse_value(message)?;
    debug!("mqtt write {id}={value}");
    engine.store().write(id, value)?;
    Ok(())
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.status())
}

async fn handle_get_accessory(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.accessory.as_ref().clone())
}

async fn handle_get_characteristics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.store().snapshot())
}

async fn handle_get_characteristic(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> axum::response::Response {
    match id.parse::<CharacteristicId>() {
        Ok(id) => Json(characteristic_view(state.engine.store(), id)).into_response(),
        Err(err) => store_error_response(&err),
    }
}

async fn handle_put_characteristic(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<CharacteristicWrite>,
) -> axum::response::Response {
    let id = match id.parse::<CharacteristicId>() {
        Ok(id) => id,
        Err(err) => return store_error_response(&err),
    };
    let Some(raw) = json_payload_text(&body.value) else {
        return error_response(StatusCode::BAD_REQUEST, "Value must be a number");
    };

    let store = state.engine.store();
    match id.parse_value(&raw).and_then(|value| store.write(id, value)) {
        Ok(()) => Json(characteristic_view(store, id)).into_response(),
        Err(err) => {
            warn!("rejected http write to {id}: {err}");
            store_error_response(&err)
        }
    }
}

async fn handle_identify(State(state): State<AppState>) -> impl IntoResponse {
    info!("identify requested over http");
    state
        .engine
        .signal(thermostat_common::StatusCode::Identify);
    StatusCode::ACCEPTED
}

fn characteristic_view(store: &CharacteristicStore, id: CharacteristicId) -> CharacteristicView {
    CharacteristicView {
        id,
        value: store.get(id),
        remote_writable: id.remote_writable(),
    }
}

fn json_payload_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Number(number) => Some(number.to_string()),
        serde_json::Value::String(text) => Some(text.clone()),
        _ => None,
    }
}

fn store_error_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::UnknownCharacteristic(_) => StatusCode::NOT_FOUND,
        StoreError::ReadOnly(_) => StatusCode::FORBIDDEN,
        StoreError::InvalidValue { .. } => StatusCode::BAD_REQUEST,
    }
}

fn store_error_response(err: &StoreError) -> axum::response::Response {
    error_response(store_error_status(err), &err.to_string())
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
