//! patseq - headless pattern sequencer.
//!
//! Opens every MIDI output, loads (or creates) the project, starts the player
//! and applies live input until quit. Commands are read from stdin, one per
//! line.
//!
//! Usage: patseq [config.yaml]

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use patseq::clock::{ClockState, Player};
use patseq::config::SeqConfig;
use patseq::input::{parse_command, InputEvent, InputQueue, InputSender, MidiInputListener};
use patseq::midi::MidirTransport;
use patseq::persist;
use patseq::playback::Playable;
use patseq::project::Project;
use patseq::session::Session;
use patseq::transport::Transport;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(SeqConfig::default_path);
    let config = SeqConfig::load(&config_path)?;

    let outputs = Arc::new(MidirTransport::new(&config.client_name));
    match outputs.connect_all() {
        Ok(count) => info!("{} MIDI output(s) open", count),
        Err(e) => warn!("{:#}", e),
    }
    let transport: Arc<dyn Transport> = outputs;

    let project = load_or_create(&config, &*transport)?;
    let clock = ClockState::new(project.tempo());
    let project = Arc::new(RwLock::new(project));
    let player = Player::spawn(
        project.clone(),
        transport.clone(),
        clock.clone(),
        config.player_timing(),
    );

    let queue = InputQueue::new(config.input_queue_capacity, config.input_timeout());
    let _listener = match MidiInputListener::connect(&config.client_name, &config.input_port, queue.sender()) {
        Ok(listener) => Some(listener),
        Err(e) => {
            warn!("{:#}", e);
            None
        }
    };
    spawn_command_reader(queue.sender());

    let mut session = Session::new(
        project,
        transport,
        clock,
        config.history_limit,
        config.project_file.clone(),
    );
    session.run(&queue);

    player.quit();
    session
        .save()
        .with_context(|| format!("Failed to save {}", config.project_file.display()))?;
    Ok(())
}

fn load_or_create(config: &SeqConfig, transport: &dyn Transport) -> Result<Project> {
    let path = &config.project_file;
    if !path.exists() {
        info!("No project at {}, starting a new one", path.display());
        let port = if config.default_port.is_empty() {
            transport
                .list_available_ports()
                .into_keys()
                .next()
                .unwrap_or_default()
        } else {
            config.default_port.clone()
        };
        let mut project = Project::empty("Untitled", config.default_tempo, &port);
        project.bind(transport);
        return Ok(project);
    }
    let record = persist::load_project(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    Project::from_record(&record, transport)
        .with_context(|| format!("Invalid project {}", path.display()))
}

fn spawn_command_reader(sender: InputSender) {
    println!("Enter: play/pause  s: stop  u/r: undo/redo  w: save  rec: record on/off  t<n>: track  q: quit");
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            match parse_command(&line) {
                Some(event) => {
                    sender.send(event);
                    if event == InputEvent::Quit {
                        return;
                    }
                }
                None => println!("Unknown command: {}", line.trim()),
            }
        }
        // stdin closed
        sender.send(InputEvent::Quit);
    });
}
