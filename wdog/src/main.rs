extern crate clap;
use crossbeam_channel::bounded; // Inter-thread communication
use ctrlc; // exit using cntrl-c
use env_logger;
use log::{debug, error, info, warn};

use std::path::Path;

// Internal project modules
use rsbus_protocol::feedback::ModuleType;
use wdog_core::button::Buttons;
use wdog_core::constants::{cv as cvidx, dcc, timing};
use wdog_core::cv::{signature_ok, CvStore, DecoderConfig};
use wdog_core::decode::{Classifier, Command};
use wdog_core::led::{FlashLamp, LampMode};
use wdog_core::pom::{AckPin, CvOutcome, CvProtocol};
use wdog_core::receiver::BitDecoder;
use wdog_core::rsbus::{ByteSink, RsBus};
use wdog_core::safety::{Relay, StatusLeds, Supervisor};
use wdog_peripherals::bus_master::BusMaster;
use wdog_peripherals::cv_file::FileCvStore;
use wdog_peripherals::feedback_link::{FeedbackLink, LogSink};
use wdog_peripherals::track;

/// Configures command-line interface using clap
fn get_cli_config<'a>() -> clap::ArgMatches<'a> {
    let description = "Trackside safety and watchdog decoder, host simulation";
    clap::App::new("Watchdog Decoder (WDOG)")
        .version("0.1")
        .about(description)
        .arg(
            clap::Arg::with_name("cv-file")
                .long("cv-file")
                .takes_value(true)
                .help("File holding the persistent configuration variables"),
        )
        .arg(
            clap::Arg::with_name("feedback")
                .long("feedback")
                .takes_value(true)
                .help("TCP address to serve the feedback-bus bytes on"),
        )
        .subcommand(
            clap::SubCommand::with_name("local")
                .help("No computer attached; emergency button cuts and restores power"),
        )
        .subcommand(
            clap::SubCommand::with_name("watchdog")
                .help("Computer takes over, then dies while a train is running"),
        )
        .subcommand(
            clap::SubCommand::with_name("emergency")
                .help("Emergency stop under computer control; trains stop in time"),
        )
        .get_matches()
}

/// Track power relay, host rendition: the switching ends up in the log.
struct HostRelay {
    energized: bool,
}

impl Relay for HostRelay {
    fn energize(&mut self) {
        if !self.energized {
            info!("track relay energized, track power on");
            self.energized = true;
        }
    }

    fn release(&mut self) {
        if self.energized {
            warn!("track relay released, track power off");
            self.energized = false;
        }
    }
}

/// Panel LEDs; one announcement at a time, logged on change.
struct HostLeds {
    shown: &'static str,
}

impl HostLeds {
    fn show(&mut self, which: &'static str) {
        if self.shown != which {
            info!("panel led: {}", which);
            self.shown = which;
        }
    }
}

impl StatusLeds for HostLeds {
    fn local(&mut self) {
        self.show("local");
    }

    fn remote(&mut self) {
        self.show("remote");
    }

    fn fault(&mut self) {
        self.show("fault");
    }
}

/// Programming-track acknowledge: a current pulse on the target, a log
/// line here.
struct HostAck;

impl AckPin for HostAck {
    fn pulse(&mut self, ms: u8) {
        info!("acknowledge pulse, {} ms", ms);
    }
}

/// Scripted input for one run: frames put on the track at a given
/// millisecond, plus the windows the emergency button is held down.
struct Scenario {
    frames: Vec<(u64, Vec<u8>)>,
    presses: Vec<(u64, u64)>,
    run_ms: u64,
}

impl Scenario {
    fn pressed(&self, now_ms: u64) -> bool {
        self.presses
            .iter()
            .any(|&(from, to)| now_ms >= from && now_ms < to)
    }
}

/// The wire address that reaches our first decoder address, undoing the
/// remap the classifier applies for a counting-from-one master.
fn own_wire_address(cfg: &DecoderConfig) -> u16 {
    if cfg.lenz_master {
        cfg.first_address + 1
    } else {
        cfg.first_address
    }
}

fn watchdog_frame(cfg: &DecoderConfig) -> Vec<u8> {
    // alive message: first device, plus gate, coil on
    track::basic_accessory(own_wire_address(cfg), 0, 1, true)
}

/// Emergency stop without any computer: push cuts power, the next push
/// brings the decoder back up.
fn local_scenario() -> Scenario {
    Scenario {
        frames: Vec::new(),
        presses: vec![(2_000, 2_500), (6_000, 6_500)],
        run_ms: 10_000,
    }
}

/// The computer keeps the watchdog alive, then crashes while a train is
/// still running; the decoder must cut power itself. A button push at
/// the end releases the cutoff.
fn watchdog_scenario(cfg: &DecoderConfig) -> Scenario {
    let mut frames = Vec::new();
    for n in 0..6u64 {
        frames.push((500 + n * 2_000, watchdog_frame(cfg)));
    }
    // a train that nobody stops
    for n in 0..9u64 {
        frames.push((11_000 + n * 800, track::loco_speed(12, 10)));
    }
    Scenario {
        frames,
        presses: vec![(20_000, 20_500)],
        run_ms: 24_000,
    }
}

/// Emergency stop under computer control. The computer reacts within the
/// grace period, so the relay stays on and the decoder settles back.
fn emergency_scenario(cfg: &DecoderConfig) -> Scenario {
    let mut frames = Vec::new();
    for n in 0..12u64 {
        frames.push((500 + n * 2_000, watchdog_frame(cfg)));
    }
    frames.push((3_000, track::loco_speed(12, 8)));
    Scenario {
        frames,
        presses: vec![(6_000, 6_500)],
        run_ms: 25_000,
    }
}

/// Everything the firmware runs on one target, wired together for the
/// host. Rebuilt from the store whenever a configuration change demands
/// a restart.
struct Decoder {
    cfg: DecoderConfig,
    receiver: BitDecoder,
    classifier: Classifier,
    rsbus: RsBus,
    supervisor: Supervisor,
    buttons: Buttons,
    pom: CvProtocol,
    indicator: FlashLamp, // find-me / not-programmed blink
    tick: u32,
}

impl Decoder {
    fn from_store(store: &dyn CvStore) -> Decoder {
        let cfg = DecoderConfig::from_store(store);
        let mut indicator = FlashLamp::new();
        if cfg.first_address == dcc::INVALID_DECODER_ADDRESS {
            warn!("decoder address not programmed");
            indicator.set(LampMode::FlashFast);
        }
        info!(
            "decoder up: address {}, feedback slot {}",
            cfg.first_address, cfg.rs_address
        );
        Decoder {
            cfg,
            receiver: BitDecoder::new(),
            classifier: Classifier::new(cfg),
            rsbus: RsBus::new(cfg.rs_address, ModuleType::Feedback),
            supervisor: Supervisor::from_store(store),
            buttons: Buttons::from_store(store),
            pom: CvProtocol::new(),
            indicator,
            tick: 0,
        }
    }

    /// One 20 ms process tick: sample buttons, drain the packet slot,
    /// dispatch commands, advance the supervisor. Returns true when a
    /// configuration change wants the decoder rebuilt.
    fn tick_20ms(
        &mut self,
        emergency_held: bool,
        store: &mut dyn CvStore,
        relay: &mut dyn Relay,
        leds: &mut dyn StatusLeds,
        ack: &mut dyn AckPin,
    ) -> bool {
        self.tick = self.tick.wrapping_add(1);

        let pin = self.cfg.emergency_pin;
        let levels = if emergency_held && pin >= 1 && pin as usize <= wdog_core::constants::MAX_INPUT_PINS {
            1 << (pin - 1)
        } else {
            0
        };
        self.buttons.tick(levels);
        self.pom.tick();

        let mut restart = false;
        while let Some(pkt) = self.receiver.take() {
            match self.classifier.analyze(&pkt, self.tick) {
                Command::Ignore => {}
                Command::Reset => self.supervisor.reset_command(),
                Command::Accessory { device, gate, activate } => {
                    if device == 0 && gate == 1 && activate {
                        self.supervisor.watchdog_command();
                    } else {
                        debug!("accessory command for device {}, no meaning here", device);
                    }
                }
                Command::OtherAccessory { address } => {
                    debug!("accessory command for decoder {}", address);
                }
                Command::ExtendedAccessory { aspect } => {
                    debug!("extended accessory aspect {}, no meaning here", aspect);
                }
                Command::LocoFunction { device, on } => {
                    debug!("loco function F{} {}", device + 1, if on { "on" } else { "off" });
                }
                Command::LocoSpeedNonZero => self.supervisor.movement_observed(),
                Command::CvAccess { mode, req } => {
                    let quality = self.classifier.signal_quality;
                    match self.pom.cv_operation(mode, req, store, &mut self.rsbus, ack, quality) {
                        CvOutcome::None => {}
                        CvOutcome::Restart => restart = true,
                        CvOutcome::FactoryReset => {
                            store.restore_defaults();
                            restart = true;
                        }
                    }
                }
            }
        }

        let target = if self.pom.search_active
            || self.cfg.first_address == dcc::INVALID_DECODER_ADDRESS
        {
            LampMode::FlashFast
        } else {
            LampMode::Off
        };
        if self.indicator.mode() != target {
            self.indicator.set(target);
        }
        let was_lit = self.indicator.lit();
        self.indicator.tick();
        if was_lit != self.indicator.lit() {
            debug!("indicator {}", if self.indicator.lit() { "on" } else { "off" });
        }

        self.supervisor.tick(&mut self.buttons, &mut self.rsbus, relay, leds);
        restart
    }
}

fn run(
    scenario: Scenario,
    store: &mut FileCvStore,
    wire: &mut dyn ByteSink,
    stop: &crossbeam_channel::Receiver<()>,
) {
    let mut scenario = scenario;
    scenario.frames.sort_by_key(|frame| frame.0);

    let mut decoder = Decoder::from_store(store);
    let mut master = BusMaster::new();
    let mut relay = HostRelay { energized: false };
    let mut leds = HostLeds { shown: "" };
    let mut ack = HostAck;

    let mut sim_ms: u64 = 0;
    let mut next_frame = 0;
    let mut cycle_timer = std::time::Instant::now();
    while sim_ms < scenario.run_ms {
        if !stop.is_empty() {
            info!("interrupted");
            break;
        }

        let elapsed_ms = cycle_timer.elapsed().as_millis() as u64;
        if elapsed_ms == 0 {
            std::thread::sleep(std::time::Duration::from_micros(500));
            continue;
        }
        cycle_timer = std::time::Instant::now();

        for _ in 0..elapsed_ms {
            sim_ms += 1;

            // frames due this millisecond go onto the track
            while next_frame < scenario.frames.len()
                && scenario.frames[next_frame].0 <= sim_ms
            {
                track::play(
                    &mut decoder.receiver,
                    std::slice::from_ref(&scenario.frames[next_frame].1),
                );
                next_frame += 1;
            }

            master.on_ms(&mut decoder.rsbus, wire);

            if sim_ms % timing::TICK_MS as u64 == 0 {
                let held = scenario.pressed(sim_ms);
                if decoder.tick_20ms(held, store, &mut relay, &mut leds, &mut ack) {
                    info!("configuration changed, decoder restarting");
                    decoder = Decoder::from_store(store);
                }
            }
        }
    }
    info!("scenario finished in state {:?}", decoder.supervisor.state());
}

fn main() {
    env_logger::init();

    // Set up Ctrl-C handler with channel communication
    let (signal_sender, signal_receiver) = bounded(1);
    let handler_result = ctrlc::set_handler(move || {
        if signal_sender.is_full() {
            std::process::exit(-1); // Emergency exit if channel blocked
        }
        let _send_result = signal_sender.send(()); // Send shutdown signal
    });

    if let Err(e) = handler_result {
        error!("Signal handler failed: {:?}", e);
        return;
    }

    let cli_matches = get_cli_config();

    let cv_path = cli_matches.value_of("cv-file").unwrap_or("wdog-cv.bin");
    let mut store = match FileCvStore::open(Path::new(cv_path)) {
        Ok(store) => store,
        Err(e) => {
            error!("cannot open configuration store {}: {}", cv_path, e);
            return;
        }
    };

    // a corrupt table is reset, never trusted
    if !signature_ok(&store) {
        warn!("configuration signature bad, restoring factory defaults");
        store.restore_defaults();
    }

    // the simulation needs a programmed decoder to address
    if DecoderConfig::from_store(&store).first_address == dcc::INVALID_DECODER_ADDRESS {
        info!("programming decoder address 1 for this run");
        store.write(cvidx::ADDR_HIGH, 0);
    }

    let mut wire: Box<dyn ByteSink> = match cli_matches.value_of("feedback") {
        Some(addr) => Box::new(FeedbackLink::new(addr)),
        None => Box::new(LogSink),
    };

    let cfg = DecoderConfig::from_store(&store);
    let scenario = match cli_matches.subcommand_name() {
        Some("local") => local_scenario(),
        Some("watchdog") => watchdog_scenario(&cfg),
        Some("emergency") => emergency_scenario(&cfg),
        _ => {
            error!("no scenario specified, try one of: local, watchdog, emergency");
            return;
        }
    };

    run(scenario, &mut store, wire.as_mut(), &signal_receiver);
}
