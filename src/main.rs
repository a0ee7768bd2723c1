use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use serde::Serialize;
use std::{ops::Deref, panic, thread, time::Duration};

use packbms_lib::config::{BmsConfig, CellType};
use packbms_lib::emulated::EmulatedAfe;
use packbms_lib::Bms;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq)]
enum CliCellType {
    Lfp,
    Nmc,
    NmcHv,
    Lto,
}

impl From<CliCellType> for CellType {
    fn from(value: CliCellType) -> Self {
        match value {
            CliCellType::Lfp => CellType::Lfp,
            CliCellType::Nmc => CellType::Nmc,
            CliCellType::NmcHv => CellType::NmcHv,
            CliCellType::Lto => CellType::Lto,
        }
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Show the default limits and OCV curve for a cell chemistry
    Presets,
    /// Run a charge/discharge cycle against the emulated AFE and print the
    /// BMS status each interval
    Simulate {
        /// Charge/discharge current magnitude (A)
        #[arg(long, default_value_t = 10.0)]
        current: f32,

        /// Duration of the simulation (e.g., "10s", "2m")
        #[arg(value_parser = humantime::parse_duration, long, default_value = "10s")]
        duration: Duration,

        /// Update interval (e.g., "250ms")
        #[arg(value_parser = humantime::parse_duration, long, default_value = "250ms")]
        interval: Duration,

        /// Print the status as one JSON object per line
        #[arg(long, action)]
        json: bool,
    },
    /// Show the register dump of the emulated AFE after configuration
    Registers,
}

const fn about_text() -> &'static str {
    "battery pack supervisor command line tool"
}

#[derive(Parser, Debug)]
#[command(version, about=about_text(), long_about = None)]
struct CliArgs {
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,

    /// Cell chemistry used for the configuration preset
    #[arg(value_enum, short, long, default_value = "lfp")]
    cell_type: CliCellType,

    /// Nominal capacity of the pack (Ah)
    #[arg(long, default_value_t = 45.0)]
    capacity: f32,

    /// Number of connected cells
    #[arg(long, default_value_t = 4)]
    cells: usize,

    #[command(subcommand)]
    command: CliCommands,
}

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown>", 0, 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::deref);
        let cause = cause.unwrap_or_else(|| {
            panic_info
                .payload()
                .downcast_ref::<&str>()
                .copied()
                .unwrap_or("<cause unknown>")
        });

        error!(
            "Thread '{}' panicked at {}:{}:{}: {}",
            std::thread::current().name().unwrap_or("<unknown>"),
            filename,
            line,
            column,
            cause
        );
    }));
    log_handle
}

#[derive(Debug, Serialize)]
struct StatusLine<'a> {
    state: String,
    soc: f32,
    total_voltage: f32,
    cell_voltage_min: f32,
    cell_voltage_max: f32,
    current: f32,
    balancing_status: u32,
    error_flags: &'a str,
}

fn print_status(bms: &Bms<EmulatedAfe>, json: bool) -> Result<()> {
    let flags = bms.data.error_flags.to_string();
    let line = StatusLine {
        state: bms.state().to_string(),
        soc: bms.soc,
        total_voltage: bms.data.total_voltage,
        cell_voltage_min: bms.data.cell_voltage_min,
        cell_voltage_max: bms.data.cell_voltage_max,
        current: bms.data.current,
        balancing_status: bms.data.balancing_status,
        error_flags: &flags,
    };
    if json {
        println!(
            "{}",
            serde_json::to_string(&line).with_context(|| "Cannot serialize status")?
        );
    } else {
        println!(
            "{:<6} SOC {:5.1} %  {:6.2} V  ({:.3} V .. {:.3} V)  {:6.2} A  bal 0x{:04x}  errors: {}",
            line.state,
            line.soc,
            line.total_voltage,
            line.cell_voltage_min,
            line.cell_voltage_max,
            line.current,
            line.balancing_status,
            line.error_flags
        );
    }
    Ok(())
}

fn simulation_bms(args: &CliArgs) -> Result<Bms<EmulatedAfe>> {
    let conf = BmsConfig::with_cell_type(args.cell_type.into(), args.capacity);
    let nominal = (conf.cell_chg_voltage + conf.cell_dis_voltage) / 2.0;
    let afe = EmulatedAfe::with_cells(args.cells, nominal);
    let mut bms = Bms::new(afe, conf);
    bms.apply_config().with_context(|| "Cannot apply configuration")?;
    bms.update().with_context(|| "Cannot read initial data")?;
    bms.soc_reset(-1);
    Ok(bms)
}

fn run_simulation(
    mut bms: Bms<EmulatedAfe>,
    current: f32,
    duration: Duration,
    interval: Duration,
    json: bool,
) -> Result<()> {
    use rand::Rng;

    let steps = (duration.as_millis() / interval.as_millis().max(1)).max(1) as u64;
    let mut rng = rand::thread_rng();
    let base_voltage = bms.data.cell_voltage_avg;

    for step in 0..steps {
        // charge during the first half, discharge during the second
        let set_current = if step < steps / 2 { current } else { -current };

        // crude cell model: voltage follows current with a small spread
        bms.driver_mut().set_current(set_current);
        for cell in 0..bms.data.cell_voltages.len() {
            if bms.data.cell_voltages[cell] > 0.0 {
                let noise: f32 = rng.gen_range(-0.002..0.002);
                let v = base_voltage + set_current * 0.002 + noise;
                bms.driver_mut().set_cell_voltage(cell, v);
            }
        }

        bms.update().with_context(|| "Update cycle failed")?;
        print_status(&bms, json)?;

        thread::sleep(interval);
    }

    Ok(())
}

fn main() -> Result<()> {
    let args = CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter());

    match args.command {
        CliCommands::Presets => {
            let conf = BmsConfig::with_cell_type(args.cell_type.into(), args.capacity);
            println!(
                "{}",
                serde_json::to_string_pretty(&conf).with_context(|| "Cannot serialize presets")?
            );
        }
        CliCommands::Simulate {
            current,
            duration,
            interval,
            json,
        } => {
            let bms = simulation_bms(&args)?;
            run_simulation(bms, current, duration, interval, json)?;
        }
        CliCommands::Registers => {
            let mut bms = simulation_bms(&args)?;
            print!(
                "{}",
                bms.registers_dump()
                    .with_context(|| "Cannot read registers")?
            );
        }
    }

    Ok(())
}
