mod app;
mod command;
mod config;
mod coordinator;
mod copy_request;
mod error;
mod events;
mod manager;
mod options;
mod probe;
mod progress;
mod resume;
mod runner;
mod state;
#[cfg(all(test, unix))]
mod test_support;

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use eframe::egui;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::app::CopierApp;
use crate::config::Config;
use crate::coordinator::Coordinator;

/// Console logging always; the log file is best effort.
fn init_logging(debug: bool, log_file: Option<&Path>) {
    let default_filter = if debug { "info,copier=debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let console_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let file = log_file.and_then(|path| {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok()?;
        }
        OpenOptions::new().create(true).append(true).open(path).ok()
    });
    let file_layer = file.map(|file| {
        fmt::layer()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();
}

fn main() -> eframe::Result<()> {
    let (config, load_error) = match Config::load() {
        Ok(config) => (config, None),
        Err(err) => (Config::default(), Some(err)),
    };
    let log_file = Config::log_file().ok();
    init_logging(config.debug, log_file.as_deref());
    if let Some(err) = load_error {
        warn!(%err, "using default settings");
    }
    if let Some(path) = &log_file {
        info!("logging to {}", path.display());
    }

    let mut coordinator = Coordinator::new(&config);
    coordinator.check_tool();
    let app = CopierApp::new(config, coordinator);

    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([780.0, 640.0])
            .with_drag_and_drop(true),
        ..Default::default()
    };
    eframe::run_native("Copier", native_options, Box::new(|_| Box::new(app)))
}
