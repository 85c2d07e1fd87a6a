//! Library crate backing the `watchdog` and `manager` binaries: keeps
//! the managed agent service running at the latest approved version
//! and relays remote commands from the control plane.

pub mod api_client;
pub mod command_dispatcher;
pub mod config;
pub mod error;
pub mod helper_copy;
pub mod installer;
pub mod liveness;
pub mod logging;
pub mod models;
pub mod service_control;
pub mod service_discovery;
pub mod supervisor;
pub mod update_pipeline;

pub const AGENT_SVC_NAME: &str = "PaletteInsightAgent";
pub const WATCHDOG_SVC_NAME: &str = "PaletteInsightWatchdog";
pub const WATCHDOG_SVC_DISPLAY_NAME: &str = "Palette Insight Watchdog";
pub const WATCHDOG_SVC_DESCRIPTION: &str = "Manager for Palette Insight Agent";
