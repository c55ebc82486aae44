//! MidiShare event monitor
//!
//! Opens the MidiShare driver and prints every translated event.
//!
//! Usage: midishare-monitor [settings.json]
//! - Without arguments the default settings are used
//! - Reads commands from stdin: "status", "quit"
//! - Exits on "quit" or end of input

use std::env;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use midishare_driver::logging::init_logging;
use midishare_driver::midishare::new_midishare_driver;
use midishare_driver::{DriverSettings, DriverStatus, MidiEvent, MidiEventQueue};

/// Interval between queue drains
const POLL_INTERVAL: Duration = Duration::from_millis(10);

fn main() {
    init_logging();

    let args: Vec<String> = env::args().collect();
    let settings = match args.get(1) {
        Some(path) => match DriverSettings::load(Path::new(path)) {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("error:{}", e);
                std::process::exit(1);
            }
        },
        None => DriverSettings::default(),
    };

    let queue = Arc::new(MidiEventQueue::new(1024));
    let mut driver = match new_midishare_driver(&settings, Arc::clone(&queue)) {
        Ok(driver) => driver,
        Err(e) => {
            log::error!("Failed to open MidiShare driver: {}", e);
            eprintln!("error:{}", e);
            std::process::exit(1);
        }
    };
    println!("ready");

    let quit = Arc::new(AtomicBool::new(false));
    let status_requested = Arc::new(AtomicBool::new(false));
    {
        let quit = Arc::clone(&quit);
        let status_requested = Arc::clone(&status_requested);
        thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in BufReader::new(stdin.lock()).lines() {
                match line.as_deref().map(str::trim) {
                    Ok("status") => status_requested.store(true, Ordering::SeqCst),
                    Ok("quit") | Err(_) => break,
                    Ok(other) => log::warn!("Unknown command: {}", other),
                }
            }
            quit.store(true, Ordering::SeqCst);
        });
    }

    let mut events = Vec::with_capacity(1024);
    while !quit.load(Ordering::SeqCst) {
        queue.drain_into(&mut events);
        for event in &events {
            println!("{}", format_event(event));
        }
        if status_requested.swap(false, Ordering::SeqCst) {
            let status = match driver.status() {
                DriverStatus::Ready => "ready",
                DriverStatus::Done => "done",
            };
            println!("status:{} ref:{}", status, driver.transport().refnum());
        }
        thread::sleep(POLL_INTERVAL);
    }

    driver.close();
    println!("closed");
}

fn format_event(event: &MidiEvent) -> String {
    match *event {
        MidiEvent::NoteOn {
            channel,
            key,
            velocity,
        } => format!("ch{:02} note-on  {:3} vel {:3}", channel, key, velocity),
        MidiEvent::NoteOff {
            channel,
            key,
            velocity,
        } => format!("ch{:02} note-off {:3} vel {:3}", channel, key, velocity),
        MidiEvent::ControlChange {
            channel,
            controller,
            value,
        } => format!("ch{:02} cc       {:3} val {:3}", channel, controller, value),
        MidiEvent::ProgramChange { channel, program } => {
            format!("ch{:02} program  {:3}", channel, program)
        }
        MidiEvent::PitchBend { channel, value } => {
            format!("ch{:02} bend     {:+5}", channel, value)
        }
    }
}
