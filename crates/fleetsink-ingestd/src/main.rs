mod config;
mod ingest_loop;
mod telemetry;

use config::ServiceConfig;
use fleetsink_domain::ReadingIngestService;
use fleetsink_mqtt::{qos_from_level, InboundMessage, MqttSubscriber, MqttSubscriberConfig};
use fleetsink_sqlite::{SqliteClient, SqliteSensorDatumRepository};
use ingest_loop::IngestLoop;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Everything lives inside run() so the store handle and the broker
    // session are released on every exit path before the process ends
    let exit_code = run().await;
    std::process::exit(exit_code);
}

async fn run() -> i32 {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return 1;
        }
    };

    telemetry::init_telemetry(&config.log_level);

    info!(
        broker_url = %config.mqtt_broker_url,
        topic = %config.mqtt_topic,
        sqlite_path = %config.sqlite_path,
        max_buffered_messages = config.max_buffered_messages,
        "starting fleetsink-ingestd"
    );

    let qos = match qos_from_level(config.mqtt_qos) {
        Ok(qos) => qos,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return 1;
        }
    };

    let sqlite_client = match SqliteClient::open(&config.sqlite_path) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to initialize SQLite store: {:#}", e);
            return 1;
        }
    };
    let repository = Arc::new(SqliteSensorDatumRepository::new(sqlite_client));
    let service = Arc::new(ReadingIngestService::new(repository));

    // The bounded intake queue between the subscriber and the ingestion
    // loop; its capacity is the backpressure limit
    let (intake_tx, intake_rx) = mpsc::channel::<InboundMessage>(config.max_buffered_messages);

    let subscriber = match MqttSubscriber::new(
        MqttSubscriberConfig {
            broker_url: config.mqtt_broker_url.clone(),
            client_id: config.mqtt_client_id.clone(),
            username: config.mqtt_username.clone(),
            password: config.mqtt_password.clone(),
            topic: config.mqtt_topic.clone(),
            qos,
            keep_alive: config.keep_alive(),
            reconnect: config.reconnect_policy(),
        },
        intake_tx,
    ) {
        Ok(subscriber) => subscriber,
        Err(e) => {
            error!("Failed to initialize MQTT subscriber: {}", e);
            return 1;
        }
    };

    let ingest_loop = IngestLoop::new(intake_rx, service);

    let token = CancellationToken::new();
    spawn_signal_handlers(token.clone());

    let mut tasks = JoinSet::new();
    {
        let ctx = token.clone();
        tasks.spawn(async move { subscriber.run(ctx).await.map_err(anyhow::Error::from) });
    }
    {
        let ctx = token.clone();
        tasks.spawn(async move { ingest_loop.run(ctx).await });
    }

    // First failure cancels the other task; the ingestion loop drains its
    // buffer before it stops
    let mut failed = false;
    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                if !failed {
                    error!("pipeline task failed: {:#}", err);
                    failed = true;
                }
                token.cancel();
            }
            Err(err) => {
                error!("pipeline task panicked: {}", err);
                failed = true;
                token.cancel();
            }
        }
    }

    info!("fleetsink-ingestd stopped");
    if failed {
        1
    } else {
        0
    }
}

fn spawn_signal_handlers(token: CancellationToken) {
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received shutdown signal");
                ctrl_c_token.cancel();
            }
            Err(err) => {
                error!("error setting up signal handler: {}", err);
            }
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                error!("error setting up SIGTERM handler: {}", err);
                return;
            }
        };
        sigterm.recv().await;
        info!("received SIGTERM signal");
        token.cancel();
    });
}
