//! Command-line parsing for the node binary

use std::path::PathBuf;
use vitalchain_core::{current_timestamp_ms, format_timestamp_ms};
use vitalchain_domain::Reading;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Commit simulated readings on a fixed interval until Ctrl-C
    Run,
    /// Commit one reading; `None` draws from the simulator
    Commit(Option<Reading>),
    History { patient_id: String },
    Chain { patient_id: Option<String> },
    Patients,
    Remove { patient_id: String },
    Validate,
    Help,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cli {
    pub config_path: Option<PathBuf>,
    pub command: Command,
}

/// Vital flags given to `commit`, before they become a reading
#[derive(Debug, Default)]
struct VitalFlags {
    patient_id: Option<String>,
    heart_rate: Option<u32>,
    systolic: Option<u32>,
    diastolic: Option<u32>,
    body_temp: Option<f64>,
    spo2: Option<u32>,
    glucose: Option<u32>,
}

impl VitalFlags {
    fn any_vital(&self) -> bool {
        self.heart_rate.is_some()
            || self.systolic.is_some()
            || self.diastolic.is_some()
            || self.body_temp.is_some()
            || self.spo2.is_some()
            || self.glucose.is_some()
    }

    fn into_reading(self, timestamp: u64) -> Result<Option<Reading>, String> {
        let Some(patient_id) = self.patient_id else {
            if self.any_vital() {
                return Err("--patient is required when vital flags are given".to_string());
            }
            return Ok(None);
        };

        let mut reading = Reading::new(patient_id, timestamp)
            .with_readable_time(format_timestamp_ms(timestamp));
        if let Some(bpm) = self.heart_rate {
            reading = reading.with_heart_rate(bpm);
        }
        match (self.systolic, self.diastolic) {
            (Some(systolic), Some(diastolic)) => {
                reading = reading.with_blood_pressure(systolic, diastolic);
            }
            (None, None) => {}
            _ => {
                return Err("--systolic and --diastolic must be given together".to_string());
            }
        }
        if let Some(celsius) = self.body_temp {
            reading = reading.with_body_temp(celsius);
        }
        if let Some(percent) = self.spo2 {
            reading = reading.with_spo2(percent);
        }
        if let Some(mg_dl) = self.glucose {
            reading = reading.with_glucose(mg_dl);
        }
        Ok(Some(reading))
    }
}

fn flag_value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str, String> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| format!("Missing value for {}", flag))
}

fn parse_number<T: std::str::FromStr>(value: &str, flag: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("Invalid value for {}: {}", flag, value))
}

/// Parse `args` (program name excluded).
///
/// `--config <path>` is accepted anywhere on the line.
pub fn parse(args: &[String]) -> Result<Cli, String> {
    let mut config_path = None;
    let mut rest = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                config_path = Some(PathBuf::from(flag_value(args, i, "--config")?));
                i += 2;
            }
            _ => {
                rest.push(args[i].clone());
                i += 1;
            }
        }
    }

    let command = match rest.first().map(String::as_str) {
        None | Some("help") | Some("--help") | Some("-h") => Command::Help,
        Some("run") => {
            expect_no_arguments(&rest)?;
            Command::Run
        }
        Some("commit") => parse_commit(&rest[1..], current_timestamp_ms())?,
        Some("history") => Command::History {
            patient_id: single_argument(&rest, "history <patient-id>")?,
        },
        Some("chain") => parse_chain(&rest[1..])?,
        Some("patients") => {
            expect_no_arguments(&rest)?;
            Command::Patients
        }
        Some("remove") => Command::Remove {
            patient_id: single_argument(&rest, "remove <patient-id>")?,
        },
        Some("validate") => {
            expect_no_arguments(&rest)?;
            Command::Validate
        }
        Some(other) => return Err(format!("Unknown command: {}", other)),
    };

    Ok(Cli {
        config_path,
        command,
    })
}

fn expect_no_arguments(rest: &[String]) -> Result<(), String> {
    match rest.get(1) {
        Some(extra) => Err(format!("Unexpected argument for {}: {}", rest[0], extra)),
        None => Ok(()),
    }
}

fn single_argument(rest: &[String], usage: &str) -> Result<String, String> {
    match rest.len() {
        2 => Ok(rest[1].clone()),
        _ => Err(format!("Usage: vitalchain-node {}", usage)),
    }
}

fn parse_chain(args: &[String]) -> Result<Command, String> {
    let mut patient_id = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--patient" => {
                patient_id = Some(flag_value(args, i, "--patient")?.to_string());
                i += 2;
            }
            other => return Err(format!("Unknown argument: {}", other)),
        }
    }
    Ok(Command::Chain { patient_id })
}

fn parse_commit(args: &[String], timestamp: u64) -> Result<Command, String> {
    let mut flags = VitalFlags::default();
    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--patient" => flags.patient_id = Some(flag_value(args, i, flag)?.to_string()),
            "--heart-rate" => flags.heart_rate = Some(parse_number(flag_value(args, i, flag)?, flag)?),
            "--systolic" => flags.systolic = Some(parse_number(flag_value(args, i, flag)?, flag)?),
            "--diastolic" => flags.diastolic = Some(parse_number(flag_value(args, i, flag)?, flag)?),
            "--body-temp" => flags.body_temp = Some(parse_number(flag_value(args, i, flag)?, flag)?),
            "--spo2" => flags.spo2 = Some(parse_number(flag_value(args, i, flag)?, flag)?),
            "--glucose" => flags.glucose = Some(parse_number(flag_value(args, i, flag)?, flag)?),
            other => return Err(format!("Unknown argument: {}", other)),
        }
        i += 2;
    }
    Ok(Command::Commit(flags.into_reading(timestamp)?))
}

pub fn print_usage() {
    eprintln!("VitalChain Node - encrypted vital-sign ledger");
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    vitalchain-node [--config <file>] <COMMAND> [OPTIONS]");
    eprintln!("    vitalchain-node --version-json");
    eprintln!();
    eprintln!("COMMANDS:");
    eprintln!("    run                      Commit simulated readings until Ctrl-C");
    eprintln!("    commit [OPTIONS]         Commit one reading (simulated when no --patient)");
    eprintln!("        --patient <id>");
    eprintln!("        --heart-rate <bpm>");
    eprintln!("        --systolic <mmHg> --diastolic <mmHg>");
    eprintln!("        --body-temp <celsius>");
    eprintln!("        --spo2 <percent>");
    eprintln!("        --glucose <mg/dL>");
    eprintln!("    history <patient-id>     Show a patient's readings, newest first");
    eprintln!("    chain [--patient <id>]   Show blocks joined with their readings");
    eprintln!("    patients                 List known patient ids");
    eprintln!("    remove <patient-id>      Drop a patient from the in-memory index");
    eprintln!("    validate                 Check chain integrity");
    eprintln!("    help                     Show this message");
    eprintln!();
    eprintln!("EXAMPLES:");
    eprintln!("    vitalchain-node --config vitalchain.toml run");
    eprintln!("    vitalchain-node commit --patient PAT1042 --heart-rate 128 --spo2 91");
    eprintln!("    vitalchain-node history PAT1042");
}
