use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use event_runtime::domain::order::{register_order_events, OrderCommand, OrderCommandHandler, OrderItem};
use event_runtime::event_sourcing::{
    DispatchMode, DispatchQueue, EventDispatcher, EventRegistry, EventStore, FnHandler, InMemoryBackend,
    PostgresBackend, TopicDispatcher, TransactionalEventStore,
};
use event_runtime::{Metrics, RuntimeConfig};
use futures_util::FutureExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with environment-based filtering
    // Default to INFO level, can be overridden with RUST_LOG env var
    // Example: RUST_LOG=debug cargo run
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,event_runtime=debug")))
        .init();

    tracing::info!("🚀 Starting event runtime demo");

    // === 1. Configuration ===
    let config = RuntimeConfig::from_env()?;
    tracing::info!(
        batch_size = config.store.batch_size,
        sequence_check = ?config.store.sequence_check,
        dispatch_mode = ?config.dispatch_mode,
        postgres = config.database_url.is_some(),
        "Loaded configuration"
    );

    // === 2. Prometheus metrics ===
    let metrics = Arc::new(Metrics::new()?);

    // === 3. Event registry ===
    let mut registry = EventRegistry::new();
    register_order_events(&mut registry);
    let registry = Arc::new(registry);

    // === 4. Event store (PostgreSQL when DATABASE_URL is set) ===
    let store: Arc<dyn EventStore> = match &config.database_url {
        Some(url) => {
            let backend = PostgresBackend::connect(url, config.max_connections).await?;
            backend.ensure_schema().await?;
            Arc::new(
                TransactionalEventStore::new(backend, Arc::clone(&registry))
                    .with_config(config.store.clone())
                    .with_metrics(Arc::clone(&metrics)),
            )
        }
        None => {
            tracing::info!("DATABASE_URL not set, using in-memory backend");
            Arc::new(
                TransactionalEventStore::new(InMemoryBackend::new(), Arc::clone(&registry))
                    .with_config(config.store.clone())
                    .with_metrics(Arc::clone(&metrics)),
            )
        }
    };

    // === 5. Dispatcher with a catch-all audit handler ===
    let dispatcher = Arc::new(TopicDispatcher::new(Arc::clone(&registry)).with_metrics(Arc::clone(&metrics)));
    dispatcher.subscribe_handler(Arc::new(FnHandler::new("audit_log", &["*.*"], |envelope| {
        tracing::info!(
            event_type = %envelope.event_type(),
            aggregate_id = %envelope.aggregate_id(),
            sequence_no = envelope.sequence_no(),
            event_id = %envelope.event_id(),
            "📨 Event delivered"
        );
        async { Ok::<(), anyhow::Error>(()) }.boxed()
    })))?;

    // === 6. Run an order lifecycle ===
    let queue = match config.dispatch_mode {
        DispatchMode::Detached => Some(Arc::new(DispatchQueue::spawn(
            dispatcher.clone(),
            Some(Arc::clone(&metrics)),
        ))),
        DispatchMode::Synchronous => None,
    };

    let mut handler =
        OrderCommandHandler::new(Arc::clone(&store), dispatcher.clone()).with_metrics(Arc::clone(&metrics));
    if let Some(queue) = &queue {
        handler = handler.with_dispatch_queue(Arc::clone(queue));
    }

    let order_id = Uuid::new_v4().to_string();
    let commands = vec![
        OrderCommand::CreateOrder {
            customer_id: Uuid::new_v4(),
            items: vec![OrderItem::new(Uuid::new_v4(), 2), OrderItem::new(Uuid::new_v4(), 1)],
        },
        OrderCommand::ConfirmOrder,
        OrderCommand::ShipOrder {
            tracking_number: "TRACK-123".to_string(),
            carrier: "UPS".to_string(),
        },
        OrderCommand::DeliverOrder {
            signature: Some("J. Doe".to_string()),
        },
    ];

    for command in commands {
        tracing::info!(order_id = %order_id, command = ?command, "Handling command");
        handler.handle(&order_id, command).await?;
    }

    if let Some(order) = handler.load(&order_id).await? {
        tracing::info!(
            order_id = %order.id,
            status = ?order.status,
            version = order.version,
            "✅ Order lifecycle complete"
        );
    }

    let history = store.load(&order_id).await?;
    tracing::info!(events = history.len(), "Replayed order history");

    if let Some(queue) = &queue {
        queue.shutdown().await;
    }
    dispatcher.close().await?;

    println!("{}", metrics.encode_text()?);
    Ok(())
}
