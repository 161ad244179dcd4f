//! fabrollout - Entry Point
//!
//! Deployment orchestrator for the manufacturing-analytics platform. Serves
//! the local HTTP surface by default; `--deploy=<request.json>` runs a single
//! deployment and exits.

use std::collections::HashMap;
use std::env;

use colored::Colorize;
use fabrollout::app::options::AppOptions;
use fabrollout::app::run::run;
use fabrollout::app::state::AppState;
use fabrollout::filesys::file::File;
use fabrollout::logs::{init_logging, LogOptions};
use fabrollout::models::DeploymentRequest;
use fabrollout::storage::layout::StorageLayout;
use fabrollout::storage::settings::Settings;
use fabrollout::telemetry::collect_metrics;
use fabrollout::utils::version_info;

use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("failed to render version: {}", e),
        }
        return;
    }

    let layout = cli_args
        .get("base-dir")
        .map(StorageLayout::new)
        .unwrap_or_default();
    let settings_file = cli_args
        .get("config")
        .map(File::new)
        .unwrap_or_else(|| layout.settings_file());

    // Retrieve the settings file; a missing file means defaults
    let settings = if settings_file.exists().await {
        match Settings::load(&settings_file).await {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("Unable to read settings file {}: {}", settings_file.path().display(), e);
                std::process::exit(2);
            }
        }
    } else {
        Settings::default()
    };

    if cli_args.contains_key("diagnostic") || cli_args.contains_key("diag") {
        run_diagnostic(&layout, &settings_file, &settings).await;
        return;
    }

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level,
        json_format: settings.json_logs,
        log_dir: cli_args
            .get("log-dir")
            .map(std::path::PathBuf::from),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    let options = AppOptions::from_settings(&settings, layout);

    if let Some(path) = cli_args.get("deploy") {
        let code = deploy_once(options, path).await;
        std::process::exit(code);
    }

    info!(version = %version.version, "running fabrollout");
    if let Err(e) = run(options, await_shutdown_signal()).await {
        error!(error = %e, "orchestrator exited with an error");
        std::process::exit(1);
    }
}

/// Run one deployment request read from `path` and print its result
async fn deploy_once(options: AppOptions, path: &str) -> i32 {
    let request: DeploymentRequest = match File::new(path).read_json().await {
        Ok(request) => request,
        Err(e) => {
            error!(path, error = %e, "unable to read deployment request");
            return 2;
        }
    };

    let app_state = match AppState::init(&options).await {
        Ok(state) => state,
        Err(e) => {
            error!(error = %e, "failed to initialize orchestrator");
            return 1;
        }
    };

    let deployment_id = request.id.clone();
    let outcome = app_state.orchestrator.deploy(request).await;
    let code = match &outcome {
        Ok(_) => 0,
        Err(e) => {
            error!(deployment_id = %deployment_id, error = %e, "deployment failed");
            1
        }
    };

    if let Ok(Some(result)) = app_state.orchestrator.get_status(&deployment_id).await {
        match serde_json::to_string_pretty(&result) {
            Ok(json) => println!("{}", json),
            Err(e) => error!(error = %e, "failed to render result"),
        }
    }

    app_state.shutdown(&options).await;
    code
}

async fn run_diagnostic(layout: &StorageLayout, settings_file: &File, settings: &Settings) {
    fn check(label: &str, ok: bool, detail: &str) {
        let mark = if ok { "ok".green().bold() } else { "fail".red().bold() };
        println!("  [{}] {:<22} {}", mark, label, detail.dimmed());
    }

    println!("{}", "fabrollout diagnostic".bold());

    let version = version_info();
    check("version", true, &format!("{} ({})", version.version, version.git_hash));
    check(
        "settings file",
        settings_file.exists().await,
        &settings_file.path().display().to_string(),
    );
    check("settings valid", settings.validate().is_ok(), "");
    check(
        "base directory",
        tokio::fs::metadata(&layout.base_dir).await.is_ok(),
        &layout.base_dir.display().to_string(),
    );
    check(
        "collaborators",
        !settings.endpoints.is_empty(),
        &if settings.endpoints.is_empty() {
            "none configured, deployments run dry".to_string()
        } else {
            settings
                .endpoints
                .iter()
                .map(|(family, url)| format!("{}={}", family, url))
                .collect::<Vec<_>>()
                .join(" ")
        },
    );
    check(
        "server",
        settings.server.enabled,
        &settings.server.bind_address,
    );

    match tokio::task::spawn_blocking(collect_metrics).await {
        Ok(metrics) => {
            check(
                "host",
                true,
                &format!(
                    "{} cpus, {:.0}% memory, {:.0}% disk",
                    metrics.cpu_count, metrics.memory_percent, metrics.disk_percent
                ),
            );
        }
        Err(e) => check("host", false, &e.to_string()),
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                _ => {
                    error!("unable to install signal handlers, waiting for Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
        }
        info!("Ctrl+C received, shutting down...");
    }
}
