//! `guidebot-cli` – GuideBot command line interface.
//!
//! The binary boots the full control core against a simulated drive base:
//!
//! 1. Checks for `~/.guidebot/config.toml`; runs a **First-Run Wizard** when
//!    the file is absent.
//! 2. Probes the model server.  When it is unreachable the robot runs with
//!    a canned offline reply so the state flow can still be explored.
//! 3. Opens the memory and interaction-log stores and starts the robot.
//! 4. Drops the user into an **interactive REPL** where typed lines are
//!    heard as customer utterances.
//! 5. Intercepts **Ctrl-C** to stop the drive base and exit cleanly.

mod config;
mod console;
mod probe;
mod repl;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::warn;

use guidebot_hal::SimRobot;
use guidebot_middleware::EventBus;
use guidebot_runtime::{GuideRobot, LlmDriver, ModelBackend, ModelResponse, ScriptedBackend, Stores};
use guidebot_types::{EventPayload, RobotEvent};

const OFFLINE_REPLY: &str = "申し訳ございません、ただいま案内システムがオフラインです。店員にお声がけください。";

fn main() {
    let _telemetry = guidebot_runtime::init_tracing("guidebot");

    print_banner();

    match config::load() {
        Ok(None) => run_first_run_wizard(),
        Ok(Some(_)) => println!(
            "  Config loaded from {}",
            config::config_path().display().to_string().bold()
        ),
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
        }
    }
    let cfg = config::load().ok().flatten().unwrap_or_else(|| {
        let mut cfg = config::Config::default();
        config::apply_env_overrides(&mut cfg);
        cfg
    });

    // ── Model discovery (blocking, before the runtime exists) ─────────────
    print!("\n  Probing model server at {} … ", cfg.model_url.dimmed());
    let online = match probe::fetch_models(&cfg.model_url, &cfg.api_key) {
        Ok(models) => {
            println!("{} ({} model(s) available)", "online".green(), models.len());
            if !models.is_empty() && !models.iter().any(|m| m.id.starts_with(&cfg.model)) {
                println!(
                    "  {} model '{}' is not listed by the server",
                    "Warning:".yellow(),
                    cfg.model.bold()
                );
            }
            true
        }
        Err(e) => {
            println!("{}", "offline".yellow());
            println!("  {}", e.dimmed());
            println!("  {}", "Running with a canned offline reply.".dimmed());
            false
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{}: {}", "Failed to start async runtime".red(), e);
            std::process::exit(1);
        }
    };
    let _enter = runtime.enter();

    // ── Robot assembly ────────────────────────────────────────────────────
    let bus = EventBus::new(256);
    let sim = Arc::new(
        SimRobot::new(bus.clone(), cfg.locations.clone()).with_travel_time(Duration::from_secs(2)),
    );
    let speech = Arc::new(console::ConsoleSpeech::new());
    let backend: Arc<dyn ModelBackend> = if online {
        let driver = LlmDriver::new(cfg.model_url.clone(), cfg.model.clone());
        if cfg.api_key.is_empty() {
            Arc::new(driver)
        } else {
            Arc::new(driver.with_api_key(cfg.api_key.clone()))
        }
    } else {
        Arc::new(ScriptedBackend::repeating(ModelResponse::text(OFFLINE_REPLY)))
    };
    let stores = match Stores::open(ensure_dir(cfg.data_path())) {
        Ok(stores) => stores,
        Err(e) => {
            warn!(error = %e, "Falling back to in-memory stores");
            match Stores::in_memory() {
                Ok(stores) => stores,
                Err(e) => {
                    eprintln!("{}: {}", "Failed to open stores".red(), e);
                    std::process::exit(1);
                }
            }
        }
    };

    let robot = GuideRobot::new(
        cfg.robot_config(),
        backend,
        sim.clone(),
        speech.clone(),
        bus.clone(),
        stores,
    );
    robot.start();

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);
    let alert_bus = bus.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping the robot …".yellow().bold());
        let _ = alert_bus.publish(RobotEvent::new(
            "guidebot-cli",
            EventPayload::SystemFault {
                component: "cli".to_string(),
                message: "operator Ctrl-C".to_string(),
            },
        ));
        shutdown_flag.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    println!();
    println!("  Type to talk to the robot, {} for commands.\n", "/help".bold().cyan());

    // ── Interactive REPL ──────────────────────────────────────────────────
    let session = repl::Session {
        robot: Arc::clone(&robot),
        sim,
        speech,
        runtime: runtime.handle().clone(),
    };
    repl::run(&session, shutdown);

    robot.shutdown();
    runtime.block_on(async {
        use guidebot_hal::Movement;
        session.sim.stop_movement().await;
    });
    drop(session);
    drop(_enter);
    runtime.shutdown_timeout(Duration::from_secs(2));
    println!("{}", "  ✓ GuideBot stopped.".green());
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║      GuideBot First-Run Wizard       ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Let's set up GuideBot.\n");

    let mut cfg = config::Config::default();

    cfg.model_url = prompt_line(
        &format!("  Model server URL [{}]: ", cfg.model_url),
        &cfg.model_url,
    );
    cfg.model = prompt_line(&format!("  Model name [{}]: ", cfg.model), &cfg.model);
    cfg.language = prompt_line(&format!("  Speech language [{}]: ", cfg.language), &cfg.language);

    let autonomy = prompt_line("  Wander and talk while idle? [Y/n]: ", "y");
    cfg.autonomy_enabled = !autonomy.trim().eq_ignore_ascii_case("n");

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ______      _     __     ____        __ "#.bold().cyan());
    println!("{}", r#"  / ____/_  __(_)___/ /__  / __ )____  / /_"#.bold().cyan());
    println!("{}", r#" / / __/ / / / / __  / _ \/ __  / __ \/ __/"#.bold().cyan());
    println!("{}", r#"/ /_/ / /_/ / / /_/ /  __/ /_/ / /_/ / /_  "#.bold().cyan());
    println!("{}", r#"\____/\__,_/_/\__,_/\___/_____/\____/\__/  "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "GuideBot".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Shop-guide robot control core");
    println!();
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn ensure_dir(path: std::path::PathBuf) -> std::path::PathBuf {
    if let Err(e) = std::fs::create_dir_all(&path) {
        warn!(path = %path.display(), error = %e, "Failed to create data directory");
    }
    path
}

fn prompt_line(msg: &str, default: &str) -> String {
    use std::io::{BufRead, Write};
    print!("{}", msg);
    std::io::stdout().flush().ok();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let t = line.trim().to_string();
            if t.is_empty() { default.to_string() } else { t }
        }
        Err(_) => default.to_string(),
    }
}
