//! REPL – drives the running robot from the terminal.
//!
//! Plain lines are heard as customer utterances.  Slash-commands:
//!   /help              – show this list
//!   /person            – simulate the camera detecting a customer
//!   /patrol            – start a patrol round
//!   /reset             – force the robot back to `Idle`
//!   /status            – current state and background loops
//!   /locations         – saved locations
//!   /history [n]       – the last `n` logged interactions (default 5)
//!   /quit | /exit      – shut down and exit

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use colored::Colorize;
use guidebot_hal::{Movement, SimRobot};
use guidebot_runtime::{GuideRobot, Recovery};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::runtime::Handle;

use crate::console::ConsoleSpeech;

const DEFAULT_HISTORY: usize = 5;

/// One parsed input line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Say(String),
    Help,
    Person,
    Patrol,
    Reset,
    Status,
    Locations,
    History(usize),
    Quit,
    Unknown(String),
    Empty,
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        if !line.starts_with('/') {
            return Self::Say(line.to_string());
        }
        let mut words = line.split_whitespace();
        let name = words.next().unwrap_or_default();
        match name {
            "/help" => Self::Help,
            "/person" => Self::Person,
            "/patrol" => Self::Patrol,
            "/reset" => Self::Reset,
            "/status" => Self::Status,
            "/locations" => Self::Locations,
            "/history" => Self::History(
                words
                    .next()
                    .and_then(|n| n.parse().ok())
                    .unwrap_or(DEFAULT_HISTORY),
            ),
            "/quit" | "/exit" => Self::Quit,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// Everything the REPL acts on.
pub struct Session {
    pub robot: Arc<GuideRobot>,
    pub sim: Arc<SimRobot>,
    pub speech: Arc<ConsoleSpeech>,
    pub runtime: Handle,
}

/// Read lines until `/quit`, EOF, or `shutdown` is set.
pub fn run(session: &Session, shutdown: Arc<AtomicBool>) {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("{}: {}", "Terminal error".red(), e);
            return;
        }
    };

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        let line = match editor.readline(&format!("{} ", "guidebot>".bold().cyan())) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        };
        if !line.trim().is_empty() {
            let _ = editor.add_history_entry(line.as_str());
        }

        match Command::parse(&line) {
            Command::Empty => {}
            Command::Say(text) => {
                if let Err(e) = session.robot.hear(&text) {
                    println!("{}: {}", "Not delivered".red(), e);
                }
            }
            Command::Help => cmd_help(),
            Command::Person => {
                session.sim.detect_person(true);
                println!("  {}", "👤 customer detected".dimmed());
            }
            Command::Patrol => {
                if session.robot.patrol().start() {
                    println!("  {}", "Patrol started".green());
                } else {
                    println!("  {}", "Patrol not started (robot busy or already patrolling)".yellow());
                }
            }
            Command::Reset => {
                session.runtime.block_on(session.robot.force_reset());
                println!("  {}", "Robot reset to Idle".green());
            }
            Command::Status => cmd_status(session),
            Command::Locations => {
                println!("  {}", session.sim.locations().join(", "));
            }
            Command::History(n) => cmd_history(session, n),
            Command::Quit => {
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Command::Unknown(other) => println!(
                "{} '{}'. Type {} for available commands.",
                "Unknown command:".red(),
                other.yellow(),
                "/help".bold()
            ),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "GuideBot Commands".bold().underline());
    println!("  {}          – speak to the robot as a customer", "<text>".bold().cyan());
    println!("  {}        – simulate a detected customer", "/person".bold().cyan());
    println!("  {}        – start a patrol round", "/patrol".bold().cyan());
    println!("  {}         – force the robot back to Idle", "/reset".bold().cyan());
    println!("  {}        – state and background loops", "/status".bold().cyan());
    println!("  {}     – saved locations", "/locations".bold().cyan());
    println!("  {}   – recent interactions", "/history [n]".bold().cyan());
    println!("  {}  – exit", "/quit  /exit".bold().cyan());
    println!();
}

fn cmd_status(session: &Session) {
    let robot = &session.robot;
    let on_off = |on: bool| if on { "on".green() } else { "off".dimmed() };
    println!("{}", "Status".bold().underline());
    println!("  State     : {}", robot.state().current().to_string().yellow());
    if let Some(previous) = robot.state().previous() {
        println!("  Previous  : {}", previous.to_string().dimmed());
    }
    println!("  Autonomy  : {}", on_off(robot.autonomy().is_running()));
    println!("  Patrol    : {}", on_off(robot.patrol().is_active()));
    println!("  Busy      : {}", on_off(robot.session().is_busy()));
    println!("  Queued    : {}", robot.navigation().queued());
    if let Some(text) = session.speech.last_spoken() {
        println!("  Last said : {}", text.dimmed());
    }
}

fn cmd_history(session: &Session, limit: usize) {
    let records = {
        let log = session
            .robot
            .interaction_log()
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        log.recent(limit)
    };
    match records {
        Ok(records) if records.is_empty() => println!("  {}", "No interactions yet.".dimmed()),
        Ok(records) => {
            for record in records.iter().rev() {
                let marker = if record.success { "✓".green() } else { "✗".red() };
                println!(
                    "  {} {} {} → {} {}",
                    marker,
                    record.timestamp.format("%H:%M:%S").to_string().dimmed(),
                    record.input.bold(),
                    record.output.as_deref().unwrap_or("-"),
                    format!("[{} ms, {}]", record.latency_ms, record.tools_executed.join(",")).dimmed()
                );
            }
        }
        Err(e) => println!("{}: {}", "History unavailable".red(), e),
    }
}
