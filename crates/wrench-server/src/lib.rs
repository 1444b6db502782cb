pub mod config;
pub mod handlers;
pub mod lifecycle;
pub mod metrics;
pub mod observability;
pub mod observers;
pub mod server;

pub use config::{AppConfig, AuditSinkKind, ServerConfig};
pub use lifecycle::{DirectoryService, LifecycleError, WorkOrderService};
pub use observability::init_tracing;
pub use server::{AppState, ServerBuilder, WrenchServer, build_app, build_state, router};
