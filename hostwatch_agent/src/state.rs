//! Shared state handed to the HTTP/WebSocket handlers.

use std::sync::Arc;

use crate::hub::BroadcastHub;
use crate::normalize::GpuSelection;
use crate::source::SharedSource;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<BroadcastHub>,
    // used only for the on-demand snapshot before the first tick lands
    pub source: SharedSource,
    pub gpu_selection: GpuSelection,
}
