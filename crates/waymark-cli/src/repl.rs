//! REPL – Read-Eval-Print Loop for the Waymark desktop shell.
//!
//! Stands in for the camera and the phone sensors: markers are "scanned" by
//! hand, the simulated GPS is moved with `/move`, and `/frames` runs the
//! per-frame update the renderer would normally drive.
//!
//! Supported slash-commands:
//!   /help                              – show this list
//!   /status                            – engine snapshot
//!   /destinations                      – list the navigable catalogue
//!   /resolve <id>                      – fetch one record
//!   /scan <trackable> <id> [state]     – camera found a marker
//!   /track <trackable> <state>         – tracking confidence changed
//!   /lose <trackable>                  – camera lost a marker
//!   /navigate <id>                     – steer toward a catalogue entry
//!   /cancel                            – back to marker tracking
//!   /toggle                            – flip the application mode
//!   /heading <deg>                     – set the simulated compass
//!   /move <lat> <lon>                  – move the simulated GPS
//!   /frames [n]                        – run n frames (default 30)
//!   /cache [clear]                     – cache size, or empty it
//!   /quit | /exit                      – gracefully exit the CLI

use colored::Colorize;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::runtime::Handle;
use waymark_geo::{distance_meters, format_distance};
use waymark_navigation::SteeringOutput;
use waymark_runtime::Engine;
use waymark_sensors::SimulatedProvider;
use waymark_tracking::{SessionView, TrackedImage, TrackingBatch};
use waymark_types::{AppMode, Pose, TrackableId, TrackingState};

/// Simulated frame length for `/frames`.
const FRAME_DT: f64 = 1.0 / 30.0;
const DEFAULT_FRAMES: u32 = 30;
const MAX_FRAMES: u32 = 10_000;
/// Upper bound on how long `/scan` waits for marker content.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(15);

// ─────────────────────────────────────────────────────────────────────────────
// Command parsing
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Status,
    Destinations,
    Resolve(String),
    Scan {
        trackable: TrackableId,
        identifier: String,
        state: TrackingState,
    },
    Track {
        trackable: TrackableId,
        state: TrackingState,
    },
    Lose(TrackableId),
    Navigate(String),
    Cancel,
    Toggle,
    Heading(f64),
    Move { latitude: f64, longitude: f64 },
    Frames(u32),
    Cache { clear: bool },
    Quit,
}

/// Parse one input line.  The error is a user-facing message.
pub fn parse_command(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let Some(name) = words.next() else {
        return Err("empty command".into());
    };
    let args: Vec<&str> = words.collect();

    match name {
        "/help" => Ok(Command::Help),
        "/status" => Ok(Command::Status),
        "/destinations" => Ok(Command::Destinations),
        "/resolve" => Ok(Command::Resolve(rest(&args, "/resolve <id>")?)),
        "/scan" => parse_scan(&args),
        "/track" => match args.as_slice() {
            [trackable, state] => Ok(Command::Track {
                trackable: parse_trackable(trackable)?,
                state: parse_state(state)?,
            }),
            _ => Err(usage("/track <trackable> <none|limited|tracking>")),
        },
        "/lose" => match args.as_slice() {
            [trackable] => Ok(Command::Lose(parse_trackable(trackable)?)),
            _ => Err(usage("/lose <trackable>")),
        },
        "/navigate" => Ok(Command::Navigate(rest(&args, "/navigate <id>")?)),
        "/cancel" => Ok(Command::Cancel),
        "/toggle" => Ok(Command::Toggle),
        "/heading" => match args.as_slice() {
            [deg] => deg
                .parse::<f64>()
                .ok()
                .filter(|d| d.is_finite())
                .map(Command::Heading)
                .ok_or_else(|| format!("invalid heading '{deg}'")),
            _ => Err(usage("/heading <degrees>")),
        },
        "/move" => match args.as_slice() {
            [lat, lon] => {
                let latitude = parse_coordinate(lat, 90.0)?;
                let longitude = parse_coordinate(lon, 180.0)?;
                Ok(Command::Move { latitude, longitude })
            }
            _ => Err(usage("/move <lat> <lon>")),
        },
        "/frames" => match args.as_slice() {
            [] => Ok(Command::Frames(DEFAULT_FRAMES)),
            [n] => match n.parse::<u32>() {
                Ok(n) if (1..=MAX_FRAMES).contains(&n) => Ok(Command::Frames(n)),
                _ => Err(format!("frame count must be between 1 and {MAX_FRAMES}")),
            },
            _ => Err(usage("/frames [n]")),
        },
        "/cache" => match args.as_slice() {
            [] => Ok(Command::Cache { clear: false }),
            ["clear"] => Ok(Command::Cache { clear: true }),
            _ => Err(usage("/cache [clear]")),
        },
        "/quit" | "/exit" => Ok(Command::Quit),
        other => Err(format!("unknown command '{other}'")),
    }
}

/// `/scan <trackable> <identifier…> [state]`.  Identifiers may contain
/// spaces; a trailing word that names a tracking state is taken as the state.
fn parse_scan(args: &[&str]) -> Result<Command, String> {
    let [trackable, words @ ..] = args else {
        return Err(usage("/scan <trackable> <id> [state]"));
    };
    let trackable = parse_trackable(trackable)?;
    let (state, id_words) = match words.split_last() {
        Some((last, init)) if !init.is_empty() => match last.parse::<TrackingState>() {
            Ok(state) => (state, init),
            Err(_) => (TrackingState::Tracking, words),
        },
        _ => (TrackingState::Tracking, words),
    };
    if id_words.is_empty() {
        return Err(usage("/scan <trackable> <id> [state]"));
    }
    Ok(Command::Scan {
        trackable,
        identifier: id_words.join(" "),
        state,
    })
}

fn rest(args: &[&str], usage_line: &str) -> Result<String, String> {
    if args.is_empty() {
        Err(usage(usage_line))
    } else {
        Ok(args.join(" "))
    }
}

fn parse_trackable(s: &str) -> Result<TrackableId, String> {
    s.trim_start_matches('#')
        .parse::<u64>()
        .map(TrackableId)
        .map_err(|_| format!("invalid trackable id '{s}'"))
}

fn parse_state(s: &str) -> Result<TrackingState, String> {
    s.parse::<TrackingState>().map_err(|e| e.to_string())
}

fn parse_coordinate(s: &str, limit: f64) -> Result<f64, String> {
    match s.parse::<f64>() {
        Ok(v) if v.is_finite() && v.abs() <= limit => Ok(v),
        _ => Err(format!("invalid coordinate '{s}' (must be within ±{limit})")),
    }
}

fn usage(line: &str) -> String {
    format!("usage: {line}")
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// Everything the REPL drives: the engine, the simulated sensors and the
/// markers the user has "scanned" so far.
pub struct Session {
    engine: Engine,
    provider: Arc<SimulatedProvider>,
    runtime: Handle,
    markers: HashMap<TrackableId, String>,
    camera: Pose,
}

impl Session {
    pub fn new(engine: Engine, provider: Arc<SimulatedProvider>, runtime: Handle) -> Self {
        Self {
            engine,
            provider,
            runtime,
            markers: HashMap::new(),
            camera: Pose::default(),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Run one command.  Returns `false` when the REPL should exit.
    pub fn execute(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Help => cmd_help(),
            Command::Status => self.cmd_status(),
            Command::Destinations => self.cmd_destinations(),
            Command::Resolve(id) => self.cmd_resolve(&id),
            Command::Scan {
                trackable,
                identifier,
                state,
            } => self.cmd_scan(trackable, identifier, state),
            Command::Track { trackable, state } => self.cmd_track(trackable, state),
            Command::Lose(trackable) => self.cmd_lose(trackable),
            Command::Navigate(id) => self.cmd_navigate(&id),
            Command::Cancel => {
                self.engine.cancel_navigation();
                self.settle();
                println!("  Mode: {}", mode_label(self.engine.mode()));
            }
            Command::Toggle => {
                let mode = self.engine.toggle_mode();
                self.settle();
                println!("  Mode: {}", mode_label(mode));
            }
            Command::Heading(deg) => {
                self.provider.set_heading(deg);
                self.engine.tracker().poll();
                self.print_fix();
            }
            Command::Move {
                latitude,
                longitude,
            } => {
                self.provider.set_location(latitude, longitude);
                self.engine.tracker().poll();
                self.print_fix();
            }
            Command::Frames(n) => self.cmd_frames(n),
            Command::Cache { clear } => {
                if clear {
                    self.engine.clear_cache();
                    println!("  {} Content cache cleared.", "✓".green().bold());
                } else {
                    println!("  Cached records: {}", self.engine.status().cached_records);
                }
            }
            Command::Quit => {
                println!("{}", "Goodbye.".green());
                return false;
            }
        }
        true
    }

    /// Release overlays and sensors.
    pub fn shutdown(&mut self) {
        self.engine.shutdown();
    }

    // ── Command handlers ──────────────────────────────────────────────────

    fn cmd_status(&self) {
        let status = self.engine.status();
        println!();
        println!("{}", "Waymark Status".bold().underline());
        println!("  Mode            : {}", mode_label(status.mode));
        println!("  Location        : {:?}", status.location_state);
        match status.fix {
            Some(fix) => println!(
                "  Fix             : {:.6}, {:.6} (±{:.0} m, heading {:.0}°)",
                fix.latitude, fix.longitude, fix.accuracy_m, fix.heading_deg
            ),
            None => println!("  Fix             : {}", "none".dimmed()),
        }
        if let Some(err) = &status.sensor_error {
            println!("  Sensor error    : {}", err.red());
        }
        println!(
            "  Overlays        : {}",
            if status.spawning_enabled { "spawning".green() } else { "paused".yellow() }
        );
        println!(
            "  Markers         : {} session(s), {} pending",
            status.session_count, status.pending_resolutions
        );
        println!("  Cached records  : {}", status.cached_records);
        if let Some(dest) = &status.destination {
            println!(
                "  Destination     : {} ({:.6}, {:.6})",
                dest.name.bold(),
                dest.latitude,
                dest.longitude
            );
        }
        for view in self.engine.sessions() {
            print_session(&view);
        }
        println!();
    }

    fn cmd_destinations(&self) {
        let entries = self.runtime.block_on(self.engine.destinations());
        if entries.is_empty() {
            println!("  {}", "No destinations available.".yellow());
            return;
        }
        let fix = self.engine.tracker().fix();
        println!();
        println!("{}", "Destinations".bold().underline());
        for entry in entries {
            let distance = fix
                .filter(|_| entry.record.has_coordinates())
                .map(|f| {
                    format_distance(distance_meters(
                        f.latitude,
                        f.longitude,
                        entry.record.latitude,
                        entry.record.longitude,
                    ))
                })
                .unwrap_or_default();
            println!(
                "  {:<16} {:<28} {}",
                entry.id.cyan(),
                entry.record.title.bold(),
                distance.dimmed()
            );
        }
        println!();
    }

    fn cmd_resolve(&self, id: &str) {
        let record = self.runtime.block_on(self.engine.resolve(id));
        println!();
        println!("  {}", record.title.bold());
        for line in record.body.lines() {
            println!("    {line}");
        }
        println!("  {}", record.formatted_coordinates().dimmed());
        println!();
    }

    fn cmd_scan(&mut self, trackable: TrackableId, identifier: String, state: TrackingState) {
        self.markers.insert(trackable, identifier.clone());
        self.engine.handle_tracking_batch(TrackingBatch::added(TrackedImage::new(
            trackable, identifier, state,
        )));
        if self.engine.mode() == AppMode::Navigation {
            println!(
                "  Marker {trackable} noted; its overlay appears when navigation ends."
            );
            return;
        }
        self.settle();
        self.print_marker(trackable);
    }

    fn cmd_track(&mut self, trackable: TrackableId, state: TrackingState) {
        let Some(identifier) = self.markers.get(&trackable).cloned() else {
            println!(
                "{} marker {trackable}; {} it first.",
                "Unknown".red(),
                "/scan".bold()
            );
            return;
        };
        self.engine.handle_tracking_batch(TrackingBatch::updated(TrackedImage::new(
            trackable, identifier, state,
        )));
        self.print_marker(trackable);
    }

    fn cmd_lose(&mut self, trackable: TrackableId) {
        self.markers.remove(&trackable);
        self.engine
            .handle_tracking_batch(TrackingBatch::removed(trackable));
        println!("  Marker {trackable} removed.");
    }

    fn cmd_navigate(&mut self, id: &str) {
        match self.runtime.block_on(self.engine.navigate_to(id)) {
            Ok(dest) => {
                println!(
                    "  {} Navigating to {} ({:.6}, {:.6})",
                    "→".green().bold(),
                    dest.name.bold(),
                    dest.latitude,
                    dest.longitude
                );
                self.cmd_frames(1);
            }
            Err(e) => println!("{}: {}", "Cannot navigate".red(), e),
        }
    }

    fn cmd_frames(&mut self, n: u32) {
        let mut applied = 0;
        let mut last = None;
        for _ in 0..n {
            let report = self.engine.tick(FRAME_DT, self.camera);
            applied += report.applied_resolutions;
            last = Some(report);
        }
        if applied > 0 {
            println!("  {applied} marker overlay(s) updated.");
        }
        if let Some(report) = last {
            println!("  {}", describe_steering(&report.steering));
        }
    }

    // ── Helpers ───────────────────────────────────────────────────────────

    /// Wait for in-flight marker resolutions, bounded by [`SETTLE_TIMEOUT`].
    fn settle(&mut self) {
        let engine = &mut self.engine;
        let settled = self
            .runtime
            .block_on(async { tokio::time::timeout(SETTLE_TIMEOUT, engine.settle_resolutions()).await });
        if settled.is_err() {
            println!(
                "  {}",
                "Marker content is still loading; check /status later.".yellow()
            );
        }
    }

    fn print_marker(&self, trackable: TrackableId) {
        match self
            .engine
            .sessions()
            .into_iter()
            .find(|s| s.trackable_id == trackable)
        {
            Some(view) => print_session(&view),
            None => println!("  Marker {trackable} has no session."),
        }
    }

    fn print_fix(&self) {
        match self.engine.tracker().fix() {
            Some(fix) => println!(
                "  GPS {:.6}, {:.6}  compass {:.0}°",
                fix.latitude, fix.longitude, fix.heading_deg
            ),
            None => println!(
                "  {}",
                "Location services are not ready; the change applies once they are.".yellow()
            ),
        }
    }
}

/// One-line summary of a steering frame.
pub fn describe_steering(output: &SteeringOutput) -> String {
    match output {
        SteeringOutput::Idle => "Indicator idle.".to_string(),
        SteeringOutput::SensorsUnavailable { reason, .. } => {
            format!("Sensors unavailable: {reason}")
        }
        SteeringOutput::Steering(reading) => format!(
            "{}  {}  turn {:+.0}°",
            reading.distance_label.replace('\n', " · "),
            reading.direction_label,
            reading.relative_angle_deg
        ),
    }
}

fn mode_label(mode: AppMode) -> colored::ColoredString {
    match mode {
        AppMode::MarkerTracking => "marker tracking".cyan(),
        AppMode::Navigation => "navigation".magenta(),
    }
}

fn print_session(view: &SessionView) {
    let title = match (&view.record, view.loading) {
        (Some(record), _) => record.title.bold(),
        (None, true) => "loading…".dimmed(),
        (None, false) => "no content".dimmed(),
    };
    let visibility = if view.visible { "visible".green() } else { "hidden".yellow() };
    println!(
        "  {} {:<16} {:<9} {} [{}]",
        view.trackable_id.to_string().cyan(),
        view.identifier,
        view.tracking_state.to_string(),
        title,
        visibility
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Loop
// ─────────────────────────────────────────────────────────────────────────────

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
pub fn run(session: &mut Session, shutdown: Arc<AtomicBool>) {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("{}: {}", "Terminal error".red(), e);
            return;
        }
    };
    let prompt = format!("{} ", "waymark>".bold().cyan());

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        let line = match editor.readline(&prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(line);

        match parse_command(line) {
            Ok(cmd) => {
                if !session.execute(cmd) {
                    shutdown.store(true, Ordering::SeqCst);
                    break;
                }
            }
            Err(msg) if msg.starts_with("unknown command") => {
                println!(
                    "{} '{}'. Type {} for available commands.",
                    "Unknown command:".red(),
                    line.yellow(),
                    "/help".bold()
                );
            }
            Err(msg) => println!("{}", msg.red()),
        }
    }
}

fn cmd_help() {
    println!();
    println!("{}", "Markers".bold().underline());
    println!("  {}  – camera found a marker", "/scan <trackable> <id> [state]".bold().cyan());
    println!("  {}       – tracking confidence changed", "/track <trackable> <state>".bold().cyan());
    println!("  {}                – camera lost a marker", "/lose <trackable>".bold().cyan());
    println!("  {}                   – fetch one record", "/resolve <id>".bold().cyan());
    println!();
    println!("{}", "Navigation".bold().underline());
    println!("  {}                   – list the catalogue", "/destinations".bold().cyan());
    println!("  {}                  – steer toward an entry", "/navigate <id>".bold().cyan());
    println!("  {}                        – back to marker tracking", "/cancel".bold().cyan());
    println!("  {}                        – flip the application mode", "/toggle".bold().cyan());
    println!("  {}                   – run frames (default 30)", "/frames [n]".bold().cyan());
    println!();
    println!("{}", "Simulated sensors".bold().underline());
    println!("  {}                – set the compass", "/heading <deg>".bold().cyan());
    println!("  {}              – move the GPS", "/move <lat> <lon>".bold().cyan());
    println!();
    println!("{}", "Misc".bold().underline());
    println!("  {}                        – engine snapshot", "/status".bold().cyan());
    println!("  {}                 – cache size, or empty it", "/cache [clear]".bold().cyan());
    println!("  {}                  – exit the CLI", "/quit  /exit".bold().cyan());
    println!();
}
