//! Standalone binary running a single service instance (consumer or
//! provider, selected by `INSTANCE_ROLE`) against a Redis-backed broker.
//!
//! ```bash
//! INSTANCE_ROLE=provider INSTANCE_NAME=billing INSTANCE_ID=billing-1 \
//!     cargo run --bin messagebus-instance
//! ```

use std::env;
use std::sync::Arc;
use std::time::Duration;

use messagebus_broker::{BrokerClient, RedisBroker, RedisBrokerConfig};
use messagebus_runtime::{AllowAllAuthorization, ConsumerInstance, ProviderInstance};
use messagebus_shared::config::BusConfig;
use messagebus_shared::logging;
use tokio::signal;
use tracing::{error, info};

enum Instance {
    Consumer(Arc<ConsumerInstance>),
    Provider(Arc<ProviderInstance>),
}

impl Instance {
    async fn stop(&self) {
        match self {
            Instance::Consumer(instance) => instance.stop().await,
            Instance::Provider(instance) => instance.stop().await,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config_path = env::var("MESSAGEBUS_CONFIG").ok();
    let config = BusConfig::load(config_path.as_deref())?;

    logging::init_tracing(&config.auditing);

    let instance_name = env::var("INSTANCE_NAME").unwrap_or_else(|_| "default".to_string());
    let instance_id = env::var("INSTANCE_ID").unwrap_or_else(|_| uuid::Uuid::now_v7().to_string());
    let role = env::var("INSTANCE_ROLE").unwrap_or_else(|_| "consumer".to_string());

    info!(instance_name, instance_id, role, "starting message bus instance");

    let broker_config = RedisBrokerConfig {
        host: config.memory_cache.redis_host.clone(),
        port: config.memory_cache.redis_port,
        db: config.memory_cache.redis_db,
        auth_key: config.memory_cache.redis_auth_key.clone(),
        user: config.memory_cache.redis_user.clone(),
        retry: messagebus_broker::LinkRetryConfig {
            max_attempts: config.memory_cache.retry_max_attempts,
            max_interval: Duration::from_secs(config.memory_cache.retry_max_interval),
        },
    };
    let broker: Arc<dyn BrokerClient> =
        Arc::new(RedisBroker::connect(instance_id.clone(), broker_config).await?);

    let instance = match role.as_str() {
        "provider" => Instance::Provider(ProviderInstance::new(
            instance_name.clone(),
            instance_id.clone(),
            broker,
            config,
            Arc::new(AllowAllAuthorization),
        )),
        _ => {
            let consumer = ConsumerInstance::new(instance_name.clone(), instance_id.clone(), broker, config);
            consumer.start().await;
            Instance::Consumer(consumer)
        }
    };

    if let Instance::Provider(provider) = &instance {
        provider.start().await;
    }

    info!("instance started, press Ctrl+C to shut down");
    shutdown_signal().await;

    info!("shutdown signal received, stopping instance...");
    const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, instance.stop()).await {
        Ok(()) => info!("instance stopped cleanly"),
        Err(_) => error!(timeout_secs = SHUTDOWN_TIMEOUT.as_secs(), "graceful shutdown timed out"),
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}
