use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Hearth workspace automation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the property suite repeatedly with a raised case count
    Stress {
        /// Proptest cases per run
        #[arg(long, default_value_t = 512)]
        cases: u32,

        /// Number of repetitions
        #[arg(long, default_value_t = 4)]
        runs: u32,
    },
    /// Run the collector benchmarks
    Bench {
        /// Run quickly (lower sample size/time)
        #[arg(long, default_value_t = false)]
        quick: bool,

        /// Generate the pause report only (skip running benchmarks)
        #[arg(long, default_value_t = false)]
        report_only: bool,
    },
}

const BENCHES: &[&str] = &["allocation", "collection"];

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Stress { cases, runs } => run_stress(cases, runs),
        Commands::Bench { quick, report_only } => {
            if !report_only {
                run_benchmarks(quick)?;
            }
            generate_report()
        }
    }
}

fn run_stress(cases: u32, runs: u32) -> Result<()> {
    for run in 1..=runs {
        println!(">>> Stress run {run}/{runs} ({cases} cases)");
        let start = Instant::now();
        let status = Command::new("cargo")
            .env("PROPTEST_CASES", cases.to_string())
            .args(["test", "--release", "--test", "gc_proptest"])
            .status()
            .context("failed to launch cargo test")?;
        if !status.success() {
            anyhow::bail!("stress run {run} failed");
        }
        println!("Finished run {run} in {:.2?}", start.elapsed());
    }
    Ok(())
}

fn run_benchmarks(quick: bool) -> Result<()> {
    for bench in BENCHES {
        println!("\n>>> Benchmarking {bench}");
        let start = Instant::now();

        let mut cmd = Command::new("cargo");
        cmd.env("CARGO_INCREMENTAL", "0");
        cmd.args(["bench", "--bench", bench]);
        cmd.arg("--");
        if quick {
            cmd.arg("--measurement-time").arg("0.5");
            cmd.arg("--noplot");
            cmd.arg("--sample-size").arg("10");
        }

        let status = cmd
            .status()
            .context(format!("failed to run bench {bench}"))?;
        if !status.success() {
            eprintln!("Warning: benchmark {bench} failed");
        } else {
            println!("Finished {bench} in {:.2?}", start.elapsed());
        }
    }
    Ok(())
}

fn generate_report() -> Result<()> {
    println!("\n>>> Generating pause report...");
    let criterion_dir = Path::new("target/criterion");
    if !criterion_dir.exists() {
        eprintln!("No criterion output found at {}", criterion_dir.display());
        return Ok(());
    }

    let mut means = BTreeMap::new();
    collect_means(criterion_dir, &mut means);

    use std::io::Write;
    let report_path = Path::new("benchmark_results/pauses.md");
    if let Some(parent) = report_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::File::create(report_path)?;
    writeln!(file, "# Collector Pause Report")?;
    writeln!(file)?;
    writeln!(file, "| Workload | Mean |")?;
    writeln!(file, "|---|---|")?;
    for (workload, mean_ns) in &means {
        let mean = if *mean_ns > 1e6 {
            format!("{:.2} ms", mean_ns / 1e6)
        } else if *mean_ns > 1e3 {
            format!("{:.2} us", mean_ns / 1e3)
        } else {
            format!("{mean_ns:.0} ns")
        };
        writeln!(file, "| {workload} | {mean} |")?;
    }
    println!("Report written to {}", report_path.display());
    Ok(())
}

fn collect_means(dir: &Path, means: &mut BTreeMap<String, f64>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_means(&path, means);
        } else if path.file_name().and_then(|s| s.to_str()) == Some("estimates.json")
            && path.parent().and_then(|p| p.file_name()).and_then(|s| s.to_str()) == Some("new")
        {
            let workload = path
                .parent()
                .and_then(Path::parent)
                .and_then(|p| p.file_name())
                .and_then(|s| s.to_str())
                .unwrap_or("unknown")
                .to_string();
            if workload == "report" {
                continue;
            }
            if let Ok(content) = fs::read_to_string(&path) {
                if let Ok(json) = serde_json::from_str::<serde_json::Value>(&content) {
                    if let Some(mean) = json.get("mean").and_then(|m| m.get("point_estimate")) {
                        if let Some(time_ns) = mean.as_f64() {
                            means.insert(workload, time_ns);
                        }
                    }
                }
            }
        }
    }
}
