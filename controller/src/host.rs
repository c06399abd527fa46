use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::Context;
use chrono::{DateTime, FixedOffset, Offset, Utc};
use chrono_tz::Tz;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};

use doas_common::{
    overrides_topic, result_topic, sensors_topic, status_topic, ControlInput, ControlMode,
    ControlResult, DoasEngine, OverrideCommand, PersistedState, PreviousCycleSnapshot,
    SensorSnapshot,
};

use crate::store::AppStore;

const MAX_MQTT_PAYLOAD_BYTES: usize = 4096;

#[derive(Clone)]
struct AppState {
    engine: Arc<DoasEngine>,
    inputs: Arc<Mutex<Inputs>>,
    timezone: Tz,
    mqtt: AsyncClient,
    store: AppStore,
}

/// What MQTT has delivered since the last tick.
#[derive(Debug, Default)]
struct Inputs {
    snapshot: SensorSnapshot,
    snapshot_at: Option<Instant>,
    overrides: Option<OverrideCommand>,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::new();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        Default::default()
    });
    runtime.sanitize();

    if let Err(err) = runtime.equipment.validate() {
        warn!("{err}; every tick will command the safe state until fixed");
    }

    let state = store.load_state().await.unwrap_or_else(|err| {
        warn!("failed to load persisted state, starting with cleared timers: {err:#}");
        PersistedState::default()
    });

    let timezone = runtime.timezone.parse::<Tz>().unwrap_or_else(|_| {
        warn!("unknown timezone {:?}, occupancy will use UTC", runtime.timezone);
        Tz::UTC
    });

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or(runtime.mqtt.host.clone());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(runtime.mqtt.port);

    let mut mqtt_options = MqttOptions::new(runtime.mqtt.client_id.clone(), mqtt_host, mqtt_port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    let mqtt_user = std::env::var("MQTT_USER").unwrap_or(runtime.mqtt.user.clone());
    let mqtt_pass = std::env::var("MQTT_PASS").unwrap_or(runtime.mqtt.pass.clone());
    if !mqtt_user.is_empty() {
        mqtt_options.set_credentials(mqtt_user, mqtt_pass);
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);

    let equipment_id = runtime.equipment.equipment_id.clone();
    if let Some(next) = runtime
        .equipment
        .occupancy
        .next_transition_epoch(now_in_timezone(timezone))
    {
        info!("next occupancy change at epoch {next}");
    }

    let app_state = AppState {
        engine: Arc::new(DoasEngine::new(runtime.equipment)),
        inputs: Arc::new(Mutex::new(Inputs::default())),
        timezone,
        mqtt,
        store,
    };

    subscribe_topics(&app_state.mqtt, &equipment_id).await?;
    app_state
        .mqtt
        .publish(status_topic(&equipment_id), QoS::AtLeastOnce, true, "online")
        .await
        .context("failed to publish controller online status")?;
    spawn_mqtt_loop(app_state.clone(), equipment_id.clone(), eventloop);

    info!("controller for {equipment_id} started");

    tokio::select! {
        _ = control_loop(
            app_state.clone(),
            state,
            Duration::from_millis(runtime.tick_interval_ms),
        ) => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for shutdown signal")?;
            info!("shutdown requested");
        }
    }

    app_state
        .mqtt
        .publish(status_topic(&equipment_id), QoS::AtLeastOnce, true, "offline")
        .await
        .context("failed to publish controller offline status")?;
    Ok(())
}

async fn subscribe_topics(mqtt: &AsyncClient, equipment_id: &str) -> anyhow::Result<()> {
    for topic in [sensors_topic(equipment_id), overrides_topic(equipment_id)] {
        mqtt.subscribe(topic, QoS::AtMostOnce).await?;
    }
    Ok(())
}

fn spawn_mqtt_loop(
    app_state: AppState,
    equipment_id: String,
    mut eventloop: rumqttc::EventLoop,
) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Err(err) = handle_mqtt_message(
                        &app_state,
                        &equipment_id,
                        &message.topic,
                        &message.payload,
                    )
                    .await
                    {
                        warn!("mqtt message handling error: {err:#}");
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
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

/// One tick at a time against the single state instance this task owns.
async fn control_loop(app_state: AppState, mut state: PersistedState, period: Duration) {
    let mut interval = tokio::time::interval(period);
    let failover = Duration::from_millis(app_state.engine.config().failover_ms);
    let topic = result_topic(&app_state.engine.config().equipment_id);
    let mut previous: Option<PreviousCycleSnapshot> = None;
    let mut last_mode: Option<ControlMode> = None;

    loop {
        interval.tick().await;

        let (snapshot, overrides) = {
            let inputs = app_state.inputs.lock().await;
            let snapshot = if is_stale(inputs.snapshot_at, Instant::now(), failover) {
                if !inputs.snapshot.is_empty() {
                    warn!("sensor snapshot older than {failover:?}, evaluating without it");
                }
                SensorSnapshot::new()
            } else {
                inputs.snapshot.clone()
            };
            (snapshot, inputs.overrides.clone())
        };

        let input = ControlInput {
            snapshot: &snapshot,
            overrides: overrides.as_ref(),
            previous: previous.as_ref(),
            now: now_in_timezone(app_state.timezone),
        };
        let (result, computed) = app_state.engine.evaluate_cycle(&input, &mut state);

        if let Err(err) = app_state.store.save_state(&state).await {
            warn!("failed to persist control state: {err:#}");
        }

        log_result(&result, last_mode);
        last_mode = Some(result.mode);
        previous = Some(computed);

        match serde_json::to_vec(&result) {
            Ok(body) => {
                if let Err(err) = app_state
                    .mqtt
                    .publish(topic.as_str(), QoS::AtLeastOnce, true, body)
                    .await
                {
                    warn!("control result publish failed: {err}");
                }
            }
            Err(err) => warn!("control result serialization failed: {err}"),
        }
    }
}

async fn handle_mqtt_message(
    app_state: &AppState,
    equipment_id: &str,
    topic: &str,
    payload: &[u8],
) -> anyhow::Result<()> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }

    if topic == sensors_topic(equipment_id) {
        let Value::Object(fields) =
            serde_json::from_slice::<Value>(payload).context("malformed sensor payload")?
        else {
            anyhow::bail!("sensor payload must be a JSON object");
        };
        let mut inputs = app_state.inputs.lock().await;
        inputs.snapshot.merge(fields);
        inputs.snapshot_at = Some(Instant::now());
    } else if topic == overrides_topic(equipment_id) {
        let command: OverrideCommand =
            serde_json::from_slice(payload).context("malformed override payload")?;
        let mut inputs = app_state.inputs.lock().await;
        if command.is_empty() {
            info!("manual overrides cleared");
            inputs.overrides = None;
        } else {
            info!("manual overrides applied: {command:?}");
            inputs.overrides = Some(command);
        }
    }

    Ok(())
}

fn log_result(result: &ControlResult, last_mode: Option<ControlMode>) {
    if result.emergency_shutdown {
        warn!(
            "{} shut down: {}",
            result.equipment_id,
            result.shutdown_reason.as_deref().unwrap_or("unknown")
        );
    }
    if let Some(error) = &result.error {
        warn!("{} control error: {error}", result.equipment_id);
    }
    if last_mode != Some(result.mode) {
        info!(
            "{} mode {} (faults: {:?})",
            result.equipment_id,
            result.mode.as_str(),
            result.faults
        );
    }
}

fn is_stale(received: Option<Instant>, now: Instant, failover: Duration) -> bool {
    received
        .map(|at| now.saturating_duration_since(at) > failover)
        .unwrap_or(true)
}

fn now_in_timezone(timezone: Tz) -> DateTime<FixedOffset> {
    let local = Utc::now().with_timezone(&timezone);
    local.with_timezone(&local.offset().fix())
}
