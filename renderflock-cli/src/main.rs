//! RenderFlock CLI - node diagnostics
//!
//! This binary exposes the worker runtime's probing facilities for operators:
//! platform support checks, the node's hardware identity, and mirror
//! speedtests.

use clap::{Parser, Subcommand};
use std::process;

use renderflock::hardware;
use renderflock::hwid::session_hardware_id;
use renderflock::logging;
use renderflock::os;
use renderflock::speedtest::Speedtest;

#[derive(Parser)]
#[command(name = "renderflock")]
#[command(version = renderflock::VERSION)]
#[command(about = "Diagnostics for a RenderFlock worker node", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Report platform support and hardware capabilities of this machine
    Probe,
    /// Print the node's stable hardware identity
    Hwid,
    /// Rank mirror URLs by latency and bandwidth
    Speedtest {
        /// Mirror URLs pointing at the speedtest payload
        urls: Vec<String>,
        /// Number of best mirrors to report
        #[arg(long, default_value = "3")]
        count: usize,
    },
    /// Power the machine off after a delay (best effort)
    Shutdown {
        /// Minutes of grace before the power-off
        #[arg(long, default_value = "1")]
        delay: u32,
    },
}

fn main() {
    let args = Args::parse();

    let _logging = match logging::init_logging(logging::default_log_dir(), logging::default_log_file())
    {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: failed to initialize logging: {}", e);
            process::exit(1);
        }
    };

    let Some(strategy) = os::detect() else {
        eprintln!("Error: this platform is not supported by the rendering pool");
        process::exit(1);
    };

    match args.command {
        CliCommand::Probe => {
            let cpu = hardware::CpuInfo::detect();
            println!("platform:           {}", strategy.name());
            println!("supported:          {}", strategy.is_supported());
            println!("high priority:      {}", strategy.supports_high_priority());
            println!("nice available:     {}", strategy.nice_available());
            println!(
                "cpu:                {}",
                if cpu.name.is_empty() { "unknown" } else { cpu.name.as_str() }
            );
            println!("cores:              {}", cpu.cores);
            println!(
                "memory:             {} total, {} available",
                hardware::format_memory_kb(hardware::total_memory_kb()),
                hardware::format_memory_kb(hardware::available_memory_kb())
            );
            println!("config path:        {}", strategy.default_config_path().display());
        }
        CliCommand::Hwid => {
            println!("{}", session_hardware_id());
        }
        CliCommand::Speedtest { urls, count } => {
            if urls.is_empty() {
                eprintln!("Error: no mirror URLs given");
                process::exit(2);
            }
            let speedtest = match Speedtest::new() {
                Ok(speedtest) => speedtest,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    process::exit(1);
                }
            };
            let targets = speedtest.do_speedtests(&urls, count);
            if targets.is_empty() {
                eprintln!("Error: no mirror was reachable");
                process::exit(1);
            }
            for target in targets {
                println!(
                    "{}  {}  avg ping {:.1} ms ({} samples)",
                    target.url,
                    target
                        .bandwidth
                        .map(|b| format!("{:.2} MB/s", b as f64 / 1_000_000.0))
                        .unwrap_or_else(|| "-".to_string()),
                    target.ping.average_ms,
                    target.ping.count
                );
            }
        }
        CliCommand::Shutdown { delay } => {
            tracing::info!(delay_minutes = delay, "shutdown requested from the CLI");
            strategy.shutdown_computer(delay);
        }
    }
}
