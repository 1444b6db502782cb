use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use wrench_core::{Delivery, EventBroker, Observer};
use wrench_notifications::{
    ChannelRegistry, EmailChannel, InAppChannel, InAppStore, MemoryInAppStore,
    NotificationChannel, NotificationDispatcher, NotificationLog, SmsChannel,
};
use wrench_storage::{
    DynResourceStore, DynUserDirectory, DynWorkOrderStore, MemoryResourceStore,
    MemoryUserDirectory, MemoryWorkOrderStore,
};

use crate::{
    config::{AppConfig, AuditSinkKind},
    handlers,
    lifecycle::{DirectoryService, WorkOrderService},
    observers::{
        AuditLogger, AuditSink, JsonLinesSink, MemorySink, MetricsAggregator,
        ResourceStateProjector, TracingSink,
    },
};

/// Observers owned by the application.
///
/// The broker only keeps weak references, so these must stay alive for as
/// long as the broker should deliver to them.
pub struct Observers {
    pub audit: Option<Arc<AuditLogger>>,
    pub metrics: Arc<MetricsAggregator>,
    pub projector: Option<Arc<ResourceStateProjector>>,
    pub dispatcher: Arc<NotificationDispatcher>,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub broker: Arc<EventBroker>,
    pub work_orders: Arc<WorkOrderService>,
    pub directory: Arc<DirectoryService>,
    pub users: DynUserDirectory,
    pub resources: DynResourceStore,
    pub orders: DynWorkOrderStore,
    pub channels: Arc<ChannelRegistry>,
    pub notifications: Arc<NotificationLog>,
    pub inbox: Arc<dyn InAppStore>,
    pub observers: Arc<Observers>,
}

/// Build the broker, stores, channels and observers from configuration and
/// wire the subscriptions.
pub async fn build_state(cfg: &AppConfig) -> anyhow::Result<AppState> {
    if cfg.metrics.prometheus {
        crate::metrics::init_metrics();
    }

    let broker = Arc::new(EventBroker::from_config(&cfg.broker));
    let users: DynUserDirectory = Arc::new(MemoryUserDirectory::new());
    let resources: DynResourceStore = Arc::new(MemoryResourceStore::new());
    let orders: DynWorkOrderStore = Arc::new(MemoryWorkOrderStore::new());

    // Notification channels
    let inbox: Arc<dyn InAppStore> = Arc::new(MemoryInAppStore::new());
    let channels = Arc::new(ChannelRegistry::new());
    let notify_cfg = &cfg.notifications;
    if notify_cfg.email.enabled {
        let email = EmailChannel::new(&notify_cfg.email).context("email channel")?;
        channels.install(Arc::new(email) as Arc<dyn NotificationChannel>).await;
    }
    if notify_cfg.sms.enabled {
        let sms = SmsChannel::new(&notify_cfg.sms).context("sms channel")?;
        channels.install(Arc::new(sms) as Arc<dyn NotificationChannel>).await;
    }
    if notify_cfg.in_app.enabled {
        channels
            .install(Arc::new(InAppChannel::new(inbox.clone())) as Arc<dyn NotificationChannel>)
            .await;
    }
    let notifications = Arc::new(NotificationLog::with_capacity(notify_cfg.record_capacity));
    let dispatcher = Arc::new(NotificationDispatcher::new(
        users.clone(),
        channels.clone(),
        notifications.clone(),
    ));
    let delivery = if notify_cfg.queued {
        Delivery::Queued
    } else {
        Delivery::Inline
    };
    broker
        .subscribe_all(NotificationDispatcher::EVENT_TYPES, &dispatcher, delivery)
        .await;

    // Audit trail
    let audit = if cfg.audit.enabled {
        let sink: Arc<dyn AuditSink> = match (cfg.audit.sink, cfg.audit.path.as_ref()) {
            (AuditSinkKind::File, Some(path)) => Arc::new(
                JsonLinesSink::open(path)
                    .await
                    .with_context(|| format!("opening audit trail {}", path.display()))?,
            ),
            (AuditSinkKind::File, None) => anyhow::bail!("audit.sink = \"file\" requires audit.path"),
            (AuditSinkKind::Memory, _) => {
                Arc::new(MemorySink::with_capacity(cfg.audit.memory_capacity))
            }
            (AuditSinkKind::Tracing, _) => Arc::new(TracingSink),
        };
        let logger = Arc::new(AuditLogger::new(sink));
        broker.subscribe_any(&logger, Delivery::Inline).await;
        Some(logger)
    } else {
        None
    };

    let metrics = Arc::new(MetricsAggregator::new());
    broker
        .subscribe_all(MetricsAggregator::EVENT_TYPES, &metrics, Delivery::Inline)
        .await;

    let projector = if cfg.projector.enabled {
        let projector = Arc::new(ResourceStateProjector::with_fallback(
            resources.clone(),
            cfg.projector.fallback_status,
        ));
        broker
            .subscribe_all(ResourceStateProjector::EVENT_TYPES, &projector, Delivery::Inline)
            .await;
        Some(projector)
    } else {
        None
    };

    let observers = Observers {
        audit,
        metrics,
        projector,
        dispatcher,
    };
    let installed = channels.kinds().await;
    let subscribed = broker.subscribed_types().await;
    let catch_all = broker.catch_all_count().await;
    tracing::info!(
        channels = ?installed,
        subscribed = ?subscribed,
        catch_all,
        observers = ?observers.names(),
        "event broker wired"
    );

    let work_orders = Arc::new(WorkOrderService::new(
        orders.clone(),
        users.clone(),
        resources.clone(),
        broker.clone(),
    ));
    let directory = Arc::new(DirectoryService::new(
        users.clone(),
        resources.clone(),
        broker.clone(),
    ));

    Ok(AppState {
        config: Arc::new(cfg.clone()),
        broker,
        work_orders,
        directory,
        users,
        resources,
        orders,
        channels,
        notifications,
        inbox,
        observers: Arc::new(observers),
    })
}

impl Observers {
    pub fn names(&self) -> Vec<&str> {
        let mut names = vec![self.metrics.name(), self.dispatcher.name()];
        if let Some(audit) = &self.audit {
            names.push(audit.name());
        }
        if let Some(projector) = &self.projector {
            names.push(projector.name());
        }
        names
    }
}

pub fn router(state: AppState) -> Router {
    let body_limit = state.config.server.body_limit_bytes;
    Router::new()
        // Health and exposition
        .route("/healthz", get(handlers::healthz))
        .route("/metrics", get(handlers::prometheus_metrics))
        // Directory
        .route("/api/users", get(handlers::list_users).post(handlers::create_user))
        .route("/api/users/{id}", get(handlers::get_user))
        .route("/api/users/{id}/inbox", get(handlers::user_inbox))
        .route(
            "/api/resources",
            get(handlers::list_resources).post(handlers::create_resource),
        )
        .route("/api/resources/{id}", get(handlers::get_resource))
        .route("/api/resources/{id}/condition", post(handlers::report_condition))
        // Work-order lifecycle
        .route(
            "/api/work-orders",
            get(handlers::list_work_orders).post(handlers::create_work_order),
        )
        .route("/api/work-orders/{id}", get(handlers::get_work_order))
        .route("/api/work-orders/{id}/assign", post(handlers::assign_work_order))
        .route("/api/work-orders/{id}/start", post(handlers::start_work_order))
        .route("/api/work-orders/{id}/complete", post(handlers::complete_work_order))
        .route("/api/work-orders/{id}/cancel", post(handlers::cancel_work_order))
        // Broker and observer introspection
        .route("/api/events", get(handlers::list_events))
        .route("/api/broker", get(handlers::broker_status))
        .route("/api/metrics", get(handlers::work_order_metrics))
        .route("/api/notifications", get(handlers::list_notifications))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                        http.status_code = Empty,
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
}

pub async fn build_app(cfg: &AppConfig) -> anyhow::Result<Router> {
    Ok(router(build_state(cfg).await?))
}

pub struct WrenchServer {
    addr: SocketAddr,
    app: Router,
}

pub struct ServerBuilder {
    addr: Option<SocketAddr>,
    config: AppConfig,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            addr: None,
            config: AppConfig::default(),
        }
    }

    /// Bind to `addr` instead of `server.host`/`server.port`.
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = Some(addr);
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.config = cfg;
        self
    }

    pub async fn build(self) -> anyhow::Result<WrenchServer> {
        self.config.validate().map_err(anyhow::Error::msg)?;
        let addr = match self.addr {
            Some(addr) => addr,
            None => self.config.addr().map_err(anyhow::Error::msg)?,
        };
        let app = build_app(&self.config).await?;
        Ok(WrenchServer { addr, app })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WrenchServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
