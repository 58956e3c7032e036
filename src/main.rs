//! Lookout - camera stream supervisor
//!
//! Relays IP camera feeds to a streaming endpoint, falls back to a
//! maintenance loop while a camera is unreachable, and reports on the health
//! of the host and the fleet.

mod camera;
mod cli;
mod controller;
mod error;
mod fleet;
mod follower;
mod logbook;
mod manifest;
mod probe;
mod procs;
mod schedule;
mod sickbay;
mod unit;

use camera::{CameraIdentity, CameraUpdate};
use cli::{Cli, Commands, ScheduleAction};
use error::{Error, Result};
use fleet::Fleet;
use follower::EventKind;
use serde::Serialize;
use sickbay::{HealthReport, Metric, SystemHealth};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Subscriber id used for log follows started from the terminal
const CLI_SUBSCRIBER: &str = "cli";

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse_args();

    if let Commands::Completion { shell } = cli.command {
        Cli::generate_completion(shell);
        return Ok(());
    }

    init_tracing(cli.verbose);

    let config = manifest::load(&cli.config)?;
    let fleet = Fleet::new(config);

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(async {
        tokio::select! {
            result = dispatch(&fleet, cli.command) => result,
            _ = shutdown_signal() => {
                info!("shutdown requested");
                Ok(())
            }
        }
    });

    // Follows are owned by the fleet; end them before the runtime goes away
    rt.block_on(fleet.follower().close_all());
    result
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "lookout=debug" } else { "lookout=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn not_found(name: &str) -> Error {
    Error::CameraNotFound(name.to_string())
}

async fn dispatch(fleet: &Fleet, command: Commands) -> Result<()> {
    match command {
        Commands::Add {
            name,
            address,
            user,
            secret,
            stream_key,
            port,
            transport,
        } => {
            let defaults = &fleet.config().camera;
            let identity = CameraIdentity {
                name,
                address,
                user,
                secret,
                port: port.unwrap_or(defaults.port),
                transport: transport.unwrap_or(defaults.transport),
                stream_key,
            };
            let path = fleet.create_camera_script(&identity).await?;
            println!("Camera '{}' added ({})", identity.name, path.display());
        }

        Commands::Edit {
            name,
            address,
            user,
            secret,
            stream_key,
            port,
            transport,
        } => {
            let update = CameraUpdate {
                address,
                user,
                secret,
                port,
                transport,
                stream_key,
            };
            if update.is_empty() {
                println!("Nothing to change");
                return Ok(());
            }
            if !fleet.update_camera_details(&name, &update)? {
                return Err(not_found(&name));
            }
            println!("Camera '{}' updated", name);
        }

        Commands::Rm { name } => {
            if !fleet.remove_camera(&name).await? {
                return Err(not_found(&name));
            }
            println!("Camera '{}' removed", name);
        }

        Commands::Ls { json } => {
            let names = fleet.list_cameras();
            if json {
                print_json(&names)?;
            } else if names.is_empty() {
                println!("No cameras configured");
            } else {
                for name in names {
                    println!("{}", name);
                }
            }
        }

        Commands::Show { name, json, reveal } => {
            let identity = fleet
                .get_camera_details(&name)?
                .ok_or_else(|| not_found(&name))?;
            let identity = if reveal { identity } else { identity.redacted() };
            if json {
                print_json(&identity)?;
            } else {
                println!("Name:       {}", identity.name);
                println!("Address:    {}", identity.address);
                println!("Port:       {}", identity.port);
                println!("Transport:  {}", identity.transport);
                println!("User:       {}", identity.user);
                println!("Password:   {}", identity.secret);
                println!("Stream key: {}", identity.stream_key);
            }
        }

        Commands::Start { name } => {
            let report = fleet
                .start_stream(&name)
                .await?
                .ok_or_else(|| not_found(&name))?;
            print_json(&report)?;
        }

        Commands::Tick { name } => {
            let report = fleet
                .run_cycle(&name)
                .await?
                .ok_or_else(|| not_found(&name))?;
            info!(
                camera = %report.camera,
                action = ?report.action,
                pid = ?report.pid,
                "cycle finished"
            );
            print_json(&report)?;
        }

        Commands::Stop { name } => {
            if !fleet.stop_stream(&name).await? {
                return Err(not_found(&name));
            }
            println!("Camera '{}' stopped", name);
        }

        Commands::Ping { target } => {
            let address = match fleet.get_camera_details(&target)? {
                Some(identity) => identity.address,
                None => target,
            };
            println!("{}: {}", address, fleet.ping_camera(&address).await);
        }

        Commands::Status { name, json } => {
            let status = fleet
                .get_camera_status(&name)
                .await?
                .ok_or_else(|| not_found(&name))?;
            if json {
                print_json(&status)?;
            } else {
                println!("{}: {}", name, status.message);
                if let Some(since) = &status.since {
                    println!("  since:    {}", since);
                }
                if let Some(last_run) = &status.last_run {
                    println!("  last run: {}", last_run);
                }
            }
        }

        Commands::Logs {
            name,
            lines,
            follow,
        } => {
            let lines = lines.unwrap_or(fleet.config().logs.backlog_lines);
            if follow {
                follow_logs(fleet, &name, lines).await?;
            } else {
                let tail = fleet
                    .tail_log(&name, lines)?
                    .ok_or_else(|| not_found(&name))?;
                for line in tail {
                    println!("{}", line);
                }
            }
        }

        Commands::ClearLogs { name } => {
            if !fleet.clear_log(&name)? {
                return Err(not_found(&name));
            }
            println!("Log of camera '{}' cleared", name);
        }

        Commands::Schedule { action } => schedule(fleet, action).await?,

        Commands::Health {
            system,
            cameras,
            issues,
            json,
            watch,
        } => loop {
            if system {
                let health = fleet.collect_system_health().await;
                if json {
                    print_json(&health)?;
                } else {
                    print_system(&health);
                }
            } else if cameras {
                let cameras = fleet.collect_cameras_health().await;
                if json {
                    print_json(&cameras)?;
                } else {
                    print_cameras(&cameras);
                }
            } else if issues {
                let issues = fleet.check_for_critical_issues().await;
                if json {
                    print_json(&issues)?;
                } else {
                    print_issues(&issues);
                }
            } else {
                let report = fleet.get_full_health_report().await;
                if json {
                    print_json(&report)?;
                } else {
                    print_report(&report, fleet);
                }
            }

            match watch {
                Some(secs) => tokio::time::sleep(Duration::from_secs(secs.max(1))).await,
                None => break,
            }
        },

        Commands::Completion { shell } => Cli::generate_completion(shell),
    }

    Ok(())
}

async fn follow_logs(fleet: &Fleet, name: &str, lines: usize) -> Result<()> {
    let mut rx = fleet
        .follow_log(CLI_SUBSCRIBER, name, Some(lines))
        .await?
        .ok_or_else(|| not_found(name))?;

    while let Some(event) = rx.recv().await {
        match event.kind {
            EventKind::Status => eprintln!("[status] {}", event.content),
            EventKind::Log => println!("{}", event.content),
            EventKind::Error => eprintln!("[tail] {}", event.content),
            EventKind::System => {
                eprintln!("[system] {}", event.content);
                break;
            }
        }
    }

    fleet.follower().stop_subscriber(CLI_SUBSCRIBER).await;
    Ok(())
}

async fn schedule(fleet: &Fleet, action: ScheduleAction) -> Result<()> {
    match action {
        ScheduleAction::Set { name, rule } => {
            let scheduled = match rule {
                Some(rule) => fleet.update_cron_interval(&name, &rule).await?,
                None => fleet.add_cron_job(&name, None).await?,
            };
            if !scheduled {
                return Err(not_found(&name));
            }
            let status = fleet.get_cron_status(&name).await;
            println!(
                "Camera '{}' scheduled: {}",
                name,
                status.interval.unwrap_or_default()
            );
        }
        ScheduleAction::Rm { name } => {
            fleet.remove_cron_job(&name).await?;
            println!("Schedule of camera '{}' removed", name);
        }
        ScheduleAction::Show { name } => {
            let status = fleet.get_cron_status(&name).await;
            match status.interval {
                Some(rule) => println!("{}: {}", name, rule),
                None => println!("{}: not scheduled", name),
            }
        }
        ScheduleAction::Ls { json } => {
            let entries = fleet.list_all_cron_jobs().await;
            if json {
                print_json(&entries)?;
            } else if entries.is_empty() {
                println!("No scheduled cameras");
            } else {
                println!("{:<20} RULE", "CAMERA");
                for entry in entries {
                    println!("{:<20} {}", entry.camera, entry.rule);
                }
            }
        }
    }
    Ok(())
}

fn metric<T>(metric: &Metric<T>, show: impl Fn(&T) -> String) -> String {
    match metric {
        Metric::Ok(value) => show(value),
        Metric::Error(message) => format!("unavailable ({})", message),
    }
}

fn gib(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0 * 1024.0)
}

fn print_system(health: &SystemHealth) {
    println!("Host");
    println!(
        "  CPU:    {}",
        metric(&health.cpu, |c| format!("{:.1}% of {} cores", c.percent, c.cores))
    );
    println!(
        "  Memory: {}",
        metric(&health.memory, |m| format!(
            "{:.1}% ({:.1} / {:.1} GiB)",
            m.used_percent,
            gib(m.used_bytes),
            gib(m.total_bytes)
        ))
    );
    println!(
        "  Disk:   {}",
        metric(&health.disk, |d| format!(
            "{:.1}% of {} ({:.1} GiB free)",
            d.used_percent,
            d.mount_point,
            gib(d.available_bytes)
        ))
    );
    println!(
        "  Uptime: {}",
        metric(&health.uptime_secs, |s| format!(
            "{}d {}h {}m",
            s / 86_400,
            (s % 86_400) / 3_600,
            (s % 3_600) / 60
        ))
    );
    println!(
        "  Load:   {}",
        metric(&health.load, |l| format!("{:.2} {:.2} {:.2}", l.one, l.five, l.fifteen))
    );
}

fn print_cameras(cameras: &[sickbay::CameraHealth]) {
    if cameras.is_empty() {
        println!("No cameras configured");
        return;
    }
    println!(
        "{:<20} {:<18} {:<16} {:<12} {:>6} {:>10}",
        "CAMERA", "ADDRESS", "PING", "STATUS", "PROCS", "LOG"
    );
    for camera in cameras {
        println!(
            "{:<20} {:<18} {:<16} {:<12} {:>6} {:>9}K",
            camera.name,
            camera.address,
            camera.reachability.to_string(),
            camera.status.message,
            camera.processes.len(),
            camera.log_size / 1024
        );
    }
}

fn print_issues(issues: &[sickbay::Issue]) {
    if issues.is_empty() {
        println!("No issues");
        return;
    }
    for issue in issues {
        let severity = match issue.severity {
            sickbay::Severity::Critical => "CRITICAL",
            sickbay::Severity::Warning => "WARNING",
        };
        println!("{:<9} {}", severity, issue.message);
    }
}

fn print_report(report: &HealthReport, fleet: &Fleet) {
    println!("Report at {}", report.timestamp.to_rfc3339());
    print_system(&report.system);
    println!();
    print_cameras(&report.cameras);
    println!();
    print_issues(&sickbay::issues::anomalies(report, &fleet.config().health));
}
