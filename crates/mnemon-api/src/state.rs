use std::sync::Arc;

use mnemon_bus::FleetStatus;
use mnemon_dispatch::Dispatcher;
use mnemon_patterns::LifecycleReducer;
use mnemon_store::Store;
use tokio::sync::watch;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub dispatcher: Arc<Dispatcher>,
    pub lifecycle: Arc<LifecycleReducer>,
    pub fleet_status: watch::Receiver<FleetStatus>,
    pub auth_token: Arc<String>,
}
