use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::time::Instant;

use eframe::App;
use eframe::egui::{self, CentralPanel, Color32, Context, RichText, TextEdit, TopBottomPanel};
use tracing::{debug, warn};

use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::events::LogLevel;
use crate::manager::POLL_INTERVAL;
use crate::options::SyncOptions;
use crate::state::{AppStatus, StateChanged};

pub struct CopierApp {
    config: Config,
    coordinator: Coordinator,
    changes: Receiver<StateChanged>,
    source_input: String,
    destination_input: String,
    options: SyncOptions,
    selected: BTreeSet<PathBuf>,
    /// Where the destination row was drawn last frame; drops over it set
    /// the destination.
    destination_row: Option<egui::Rect>,
}

#[derive(Debug, PartialEq)]
enum DropTarget {
    Destination(PathBuf),
    Sources(Vec<PathBuf>),
    Ignored,
}

/// Only a single folder can become the destination.
fn route_drop(paths: Vec<PathBuf>, over_destination: bool) -> DropTarget {
    if paths.is_empty() {
        return DropTarget::Ignored;
    }
    if !over_destination {
        return DropTarget::Sources(paths);
    }
    match <[PathBuf; 1]>::try_from(paths) {
        Ok([dir]) if dir.is_dir() => DropTarget::Destination(dir),
        _ => DropTarget::Ignored,
    }
}

impl CopierApp {
    pub fn new(config: Config, mut coordinator: Coordinator) -> Self {
        let changes = coordinator.subscribe();
        let destination_input = config
            .destination
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default();
        let options = *coordinator.state().options();
        Self {
            config,
            coordinator,
            changes,
            source_input: String::new(),
            destination_input,
            options,
            selected: BTreeSet::new(),
            destination_row: None,
        }
    }

    fn refresh_drafts(&mut self) {
        let state = self.coordinator.state();
        self.options = *state.options();
        let sources = state.sources();
        self.selected.retain(|path| sources.contains(path));
    }

    fn save_config(&mut self) {
        let state = self.coordinator.state();
        self.config.destination = state.destination().cloned();
        self.config.options = *state.options();
        self.config.debug = state.debug_mode();
        if let Err(err) = self.config.save() {
            warn!(%err, "could not save settings");
        }
    }

    fn handle_close(&mut self, ctx: &Context) {
        let now = Instant::now();
        if ctx.input(|i| i.viewport().close_requested()) {
            self.coordinator.request_quit(now);
            if !self.coordinator.ready_to_quit(now) {
                ctx.send_viewport_cmd(egui::ViewportCommand::CancelClose);
            }
        } else if self.coordinator.quit_requested() && self.coordinator.ready_to_quit(now) {
            ctx.send_viewport_cmd(egui::ViewportCommand::Close);
        }
    }

    fn set_destination(&mut self, destination: Option<PathBuf>) {
        self.coordinator.set_destination(destination);
        if let Some(dir) = self.coordinator.state().destination() {
            self.destination_input = dir.to_string_lossy().to_string();
        }
        self.save_config();
    }

    fn handle_drop(&mut self, ctx: &Context, editable: bool) {
        let (dropped, pointer) = ctx.input(|i| {
            let paths: Vec<PathBuf> = i
                .raw
                .dropped_files
                .iter()
                .filter_map(|file| file.path.clone())
                .collect();
            (paths, i.pointer.latest_pos())
        });
        if !editable {
            return;
        }
        let over_destination = matches!(
            (self.destination_row, pointer),
            (Some(row), Some(pos)) if row.contains(pos)
        );
        match route_drop(dropped, over_destination) {
            DropTarget::Destination(dir) => self.set_destination(Some(dir)),
            DropTarget::Sources(paths) => self.coordinator.add_sources(paths),
            DropTarget::Ignored => {}
        }
    }

    fn inputs_panel(&mut self, ui: &mut egui::Ui, editable: bool) {
        let row = ui.horizontal(|ui| {
            ui.label("Destination:");
            ui.add_enabled(
                editable,
                TextEdit::singleline(&mut self.destination_input).desired_width(360.0),
            );
            if ui.add_enabled(editable, egui::Button::new("Set")).clicked() {
                let trimmed = self.destination_input.trim();
                let destination = (!trimmed.is_empty()).then(|| PathBuf::from(trimmed));
                self.set_destination(destination);
            }
        });
        self.destination_row = Some(row.response.rect);

        ui.horizontal(|ui| {
            ui.label("Add source:");
            let response = ui.add_enabled(
                editable,
                TextEdit::singleline(&mut self.source_input).desired_width(360.0),
            );
            let submitted = response.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
            if ui.add_enabled(editable, egui::Button::new("Add")).clicked() || submitted {
                let path = self.source_input.trim();
                if !path.is_empty() {
                    self.coordinator.add_sources([PathBuf::from(path)]);
                    self.source_input.clear();
                }
            }
        });

        ui.label(format!("Sources ({}):", self.coordinator.state().sources().len()));
        egui::ScrollArea::vertical()
            .id_source("sources")
            .max_height(120.0)
            .auto_shrink([false, true])
            .show(ui, |ui| {
                for source in self.coordinator.state().sources() {
                    let selected = self.selected.contains(source);
                    let label = source.display().to_string();
                    if ui.selectable_label(selected, label).clicked() {
                        if selected {
                            self.selected.remove(source);
                        } else {
                            self.selected.insert(source.clone());
                        }
                    }
                }
            });
        if ui
            .add_enabled(editable && !self.selected.is_empty(), egui::Button::new("Remove selected"))
            .clicked()
        {
            let doomed: Vec<PathBuf> = self.selected.iter().cloned().collect();
            self.coordinator.remove_sources(&doomed);
            self.selected.clear();
        }
    }

    fn options_panel(&mut self, ui: &mut egui::Ui, editable: bool) {
        let before = self.options;
        let options = &mut self.options;
        ui.add_enabled_ui(editable, |ui| {
            ui.horizontal_wrapped(|ui| {
                ui.checkbox(&mut options.archive, "Archive (-a)");
                ui.checkbox(&mut options.compress, "Compress (-z)");
                ui.checkbox(&mut options.verbose, "Verbose (-v)");
                ui.checkbox(&mut options.progress, "Per-file progress");
                ui.checkbox(&mut options.delete, "Delete extraneous (--delete)");
                ui.checkbox(&mut options.dry_run, "Dry run (-n)");
                ui.checkbox(&mut options.human_readable, "Human readable (-h)");
                // archive already covers permissions
                ui.add_enabled(
                    !options.archive,
                    egui::Checkbox::new(&mut options.preserve_permissions, "Preserve permissions"),
                );
            });
        });
        if self.options != before {
            self.coordinator.set_options(self.options);
            self.save_config();
        }

        let mut debug_mode = self.coordinator.state().debug_mode();
        if ui.checkbox(&mut debug_mode, "Debug logging").changed() {
            self.coordinator.set_debug_mode(debug_mode);
            self.save_config();
        }
    }

    fn controls(&mut self, ui: &mut egui::Ui, ctx: &Context) {
        let state = self.coordinator.state();
        let status = state.status();
        let run_label = if state.can_resume() { "Resume" } else { "Run" };
        let can_run = state.can_run_or_resume() && !self.coordinator.is_polling();
        let can_interrupt = status == AppStatus::Running;

        ui.horizontal(|ui| {
            if ui.add_enabled(can_run, egui::Button::new(run_label)).clicked() {
                if let Err(blocked) = self.coordinator.run_or_resume() {
                    debug!(%blocked, "run request declined");
                }
            }
            if ui.add_enabled(can_interrupt, egui::Button::new("Interrupt")).clicked() {
                self.coordinator.interrupt();
            }
            if status == AppStatus::ToolNotFound && ui.button("Check again").clicked() {
                self.coordinator.check_tool();
            }
            if ui.button("Exit").clicked() {
                ctx.send_viewport_cmd(egui::ViewportCommand::Close);
            }
        });
    }

    fn status_panel(&self, ui: &mut egui::Ui) {
        let state = self.coordinator.state();
        let mut line = format!("Status: {}", state.status());
        if let Some(err) = state.last_error() {
            line.push_str(&format!(" ({err})"));
        }
        let color = match state.status() {
            AppStatus::FinishedSuccess => Color32::from_rgb(60, 160, 60),
            AppStatus::FinishedError | AppStatus::ToolNotFound => Color32::from_rgb(200, 60, 60),
            AppStatus::Interrupting | AppStatus::Interrupted => Color32::from_rgb(210, 150, 40),
            _ => ui.visuals().text_color(),
        };
        ui.label(RichText::new(line).color(color));

        let progress = state.progress();
        let batch_text = match (progress.current_item_index, &progress.current_item_name) {
            (Some(index), Some(name)) => {
                format!("{}/{}: {}", index + 1, progress.total_items, name.display())
            }
            _ => format!("0/{}", progress.total_items),
        };
        ui.add(egui::ProgressBar::new(progress.batch_fraction()).text(batch_text));

        let item_text = match &progress.transfer {
            Some(t) => format!("{}  {}%  {}  ETA {}", t.transferred, t.percent, t.rate, t.eta),
            None => String::new(),
        };
        ui.add(egui::ProgressBar::new(progress.item_fraction()).text(item_text));
    }

    fn log_panel(&self, ui: &mut egui::Ui) {
        egui::ScrollArea::vertical()
            .id_source("log")
            .stick_to_bottom(true)
            .auto_shrink([false, false])
            .show(ui, |ui| {
                for entry in self.coordinator.logs() {
                    let color = match entry.level {
                        LogLevel::Success => Color32::from_rgb(60, 160, 60),
                        LogLevel::Warning => Color32::from_rgb(210, 150, 40),
                        LogLevel::Error => Color32::from_rgb(200, 60, 60),
                        LogLevel::Progress => Color32::GRAY,
                        LogLevel::Info => ui.visuals().text_color(),
                    };
                    ui.label(RichText::new(&entry.message).monospace().color(color));
                }
            });
    }
}

impl App for CopierApp {
    fn update(&mut self, ctx: &Context, _frame: &mut eframe::Frame) {
        if self.coordinator.is_polling() {
            self.coordinator.poll();
            ctx.request_repaint_after(POLL_INTERVAL);
        }
        if self.changes.try_iter().count() > 0 {
            self.refresh_drafts();
        }

        let editable = !self.coordinator.is_polling();
        self.handle_drop(ctx, editable);

        self.handle_close(ctx);

        TopBottomPanel::top("inputs").show(ctx, |ui| {
            self.inputs_panel(ui, editable);
            ui.separator();
            self.options_panel(ui, editable);
            ui.separator();
            self.controls(ui, ctx);
        });

        TopBottomPanel::bottom("status").show(ctx, |ui| {
            self.status_panel(ui);
        });

        CentralPanel::default().show(ctx, |ui| {
            self.log_panel(ui);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn single_folder_over_destination_row_becomes_destination() {
        let dir = TempDir::new().unwrap();
        let folder = dir.path().to_path_buf();
        assert_eq!(
            route_drop(vec![folder.clone()], true),
            DropTarget::Destination(folder.clone())
        );
        assert_eq!(
            route_drop(vec![folder.clone()], false),
            DropTarget::Sources(vec![folder])
        );
    }

    #[test]
    fn files_or_several_paths_are_not_a_destination() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("notes.txt");
        std::fs::write(&file, "x").unwrap();
        assert_eq!(route_drop(vec![file], true), DropTarget::Ignored);
        assert_eq!(
            route_drop(vec![dir.path().to_path_buf(), dir.path().join("other")], true),
            DropTarget::Ignored
        );
        assert_eq!(route_drop(Vec::new(), false), DropTarget::Ignored);
    }
}
