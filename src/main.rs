// src/main.rs
mod config;
mod drivers;
mod engine;
mod fru;
mod iio;
mod operator;
mod report;
mod types;
use std::cell::RefCell;
use std::process::{Command, ExitCode};
use std::rc::Rc;
use anyhow::{bail, Context, Result};
use chrono::{Local, Utc};
use clap::Parser;
use config::BoardProfile;
use drivers::source::{BenchState, SimulatedDevice, SimulatedStimulus};
use drivers::{DeviceSession, ProdTestError, StimulusController};
use engine::Sequencer;
use fru::{manufacturing_minutes, FruDump, FruWriter, SimulatedFru};
use iio::IioSession;
use operator::{BenchStimulus, ConsoleOperator, Operator, SimulatedOperator};
use report::ReportWriter;
use types::{ConnectionMode, Invocation, OperatorChoice, SerialNumber};
/// DC level and path gains of the simulated bench.
const SIM_DC_INPUT: f64 = 11.0;
const SIM_BOARD_GAIN: f64 = 0.98;
const SIM_ATTENUATION: f64 = 0.25;
const SIM_NOISE_RMS: f64 = 1e-4;
/// Instruments around the board under test.
struct Bench<D, S, O, F> {
    device: D,
    stimulus: S,
    operator: O,
    fru: F,
}
type SimulatedBench = Bench<SimulatedDevice, SimulatedStimulus, SimulatedOperator, SimulatedFru>;
type HardwareBench = Bench<IioSession, BenchStimulus<ConsoleOperator>, ConsoleOperator, FruDump>;
fn simulated_bench(profile: &BoardProfile) -> SimulatedBench {
    let state = Rc::new(RefCell::new(BenchState {
        dc_input: SIM_DC_INPUT,
        ..BenchState::default()
    }));
    let plan = &profile.acquisition;
    let mut device = SimulatedDevice::new(state.clone(), plan.vref, plan.bits, plan.encoding);
    device.gain = SIM_BOARD_GAIN;
    device.noise_rms = SIM_NOISE_RMS;
    for monitor in &profile.monitors {
        device = device.with_monitor(monitor.key.clone(), (monitor.lo + monitor.hi) / 2.0);
    }
    Bench {
        device,
        stimulus: SimulatedStimulus::new(state.clone()),
        operator: SimulatedOperator::new(state, SIM_ATTENUATION),
        fru: SimulatedFru::default(),
    }
}
fn hardware_bench(profile: &BoardProfile, endpoint: &str) -> Result<HardwareBench> {
    let session = IioSession::connect(
        endpoint,
        &profile.device_name,
        profile.acquisition.vref,
        profile.acquisition.timeout(),
    )
    .with_context(|| format!("connecting to {endpoint}"))?;
    log::info!("session open on {}", session.uri());
    Ok(Bench {
        device: session,
        stimulus: BenchStimulus::new(ConsoleOperator::new()),
        operator: ConsoleOperator::new(),
        fru: FruDump::new(&profile.fru),
    })
}
fn shutdown_host() -> Result<()> {
    #[cfg(windows)]
    let status = Command::new("shutdown").args(["/s", "/t", "0"]).status();
    #[cfg(not(windows))]
    let status = Command::new("shutdown").args(["-h", "now"]).status();
    let status = status.context("running shutdown")?;
    if !status.success() {
        bail!("shutdown exited with {status}");
    }
    Ok(())
}
/// Programs the FRU, then tests the board until the operator stops.
///
/// A run that fails on the bench is reported and can be repeated. Only an
/// EEPROM failure, an unwritable report or a closed prompt stream end the
/// session with `Err`; the EEPROM is written before anything is measured.
fn session<D, S, O, F>(
    profile: &BoardProfile,
    serial: &SerialNumber,
    bench: &mut Bench<D, S, O, F>,
    console: &mut dyn Operator,
) -> Result<OperatorChoice, ProdTestError>
where
    D: DeviceSession,
    S: StimulusController,
    O: Operator,
    F: FruWriter,
{
    bench.fru.write(serial, manufacturing_minutes(Utc::now()))?;
    console.notify(&format!("FRU EEPROM programmed for {serial}"));
    loop {
        let started = Local::now().naive_local();
        let outcome = Sequencer::new(
            profile,
            &mut bench.device,
            &mut bench.stimulus,
            &mut bench.operator,
        )
        .run(serial, started);
        match outcome {
            Ok(report) => {
                let (mut writer, path) = ReportWriter::create(&profile.report_dir, &report)?;
                writer.write(&report)?;
                console.notify(&format!("{} {serial}: {}", profile.board, report.verdict()));
                console.notify(&format!("Report written to {}", path.display()));
            }
            Err(ProdTestError::Aborted) => console.notify("Test aborted."),
            Err(err) if err.is_retryable() => {
                log::error!("test run failed: {err}");
                console.notify(&format!("Test run failed: {err}"));
            }
            Err(err) => return Err(err),
        }
        let answer = match console.prompt("s = shut down, q = quit, anything else = test again:") {
            Ok(answer) => answer,
            // closed terminal
            Err(ProdTestError::Aborted) => "q".to_string(),
            Err(err) => return Err(err),
        };
        match OperatorChoice::parse(&answer) {
            OperatorChoice::Repeat => continue,
            choice => return Ok(choice),
        }
    }
}
fn run(invocation: Invocation) -> Result<()> {
    let profile = BoardProfile::from_env().context("loading board profile")?;
    let serial = &invocation.serial;
    // the end-of-run question always goes to the terminal
    let mut console = ConsoleOperator::new();
    let choice = match invocation.mode() {
        ConnectionMode::Simulation => {
            println!("Simulated {} bench", profile.board);
            session(&profile, serial, &mut simulated_bench(&profile), &mut console)
        }
        ConnectionMode::Hardware => {
            let mut bench = hardware_bench(&profile, &invocation.endpoint)?;
            session(&profile, serial, &mut bench, &mut console)
        }
    }
    .with_context(|| format!("testing {} {serial}", profile.board))?;
    if choice == OperatorChoice::Shutdown {
        shutdown_host()?;
    }
    Ok(())
}
fn main() -> ExitCode {
    env_logger::init();
    // usage errors exit with 2 from here
    let invocation = Invocation::parse();
    match run(invocation) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
