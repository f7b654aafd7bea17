//! Portal Auth command-line client
//!
//! Logs in through the captive portal, lists and evicts sessions, and runs
//! network diagnosis.

use clap::Parser;
use log::{debug, error, info, warn};
use portalauth::{
    config::Config,
    device::{KnownDeviceSet, LocalInterfaces},
    diagnosis::Diagnosis,
    error::Result,
    handler::parse_level,
    portal::{GatewayClient, LoginReconciler, LoginState},
    probe::{ConnectivityProbe, ProxyDetector},
    report::{LogReporter, Reporter},
};
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "portal-auth")]
#[command(about = "Captive portal login, session management and network diagnosis")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Login using the credentials in the config file
    #[arg(short = 'i', long)]
    login: bool,

    /// List current sessions
    #[arg(short, long)]
    sessions: bool,

    /// Logout the session with the given index (shown by --sessions)
    #[arg(short = 'o', long, value_name = "INDEX")]
    logout: Option<usize>,

    /// Check HTTP, DNS and local proxy connectivity
    #[arg(short, long)]
    diagnosis: bool,

    /// Show network adapter information
    #[arg(short, long)]
    adapters: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn init_logging(&self, configured: Option<&str>) {
        let level = if self.verbose {
            log::LevelFilter::Debug
        } else {
            configured
                .and_then(parse_level)
                .map(|level| level.to_level_filter())
                .unwrap_or(log::LevelFilter::Info)
        };
        env_logger::Builder::from_default_env()
            .filter_level(level)
            .init();
    }

    fn nothing_selected(&self) -> bool {
        !(self.login || self.sessions || self.logout.is_some() || self.diagnosis || self.adapters)
    }
}

fn load_config(path: &str) -> Result<Config> {
    let config = Config::from_file(path)?;
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            args.init_logging(None);
            LogReporter::default().error(&format!("Cannot load [{}]: {e}", args.config));
            return ExitCode::FAILURE;
        }
    };
    args.init_logging(Some(&config.logging.level));
    info!("Starting portal-auth v{}", portalauth::VERSION);

    match run(&args, config).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &Args, config: Config) -> Result<bool> {
    let reporter: Arc<dyn Reporter> = Arc::new(LogReporter::new(config.logging.hints));

    let local = LocalInterfaces::discover();
    if local.ipv4.is_empty() {
        warn!("No interface with a usable IPv4 address");
    }
    debug!("Local IPv4 address(es): {}", local.ipv4.join(", "));

    if args.adapters {
        for interface in &local.interfaces {
            println!("{interface}");
        }
    }

    let probe = Arc::new(ConnectivityProbe::new(
        &config.http,
        config.connectivity.clone(),
        reporter.clone(),
    )?);
    let mut ok = true;

    if args.diagnosis {
        let diagnosis = Diagnosis::new(
            probe.clone(),
            ProxyDetector::new(&config.proxy, reporter.clone()),
            config.error_handle.to_book(),
            reporter.clone(),
        );
        let report = diagnosis.run(&local).await;
        println!("{report}");
    }

    let wants_portal =
        args.login || args.sessions || args.logout.is_some() || args.nothing_selected();
    if !wants_portal {
        return Ok(ok);
    }

    let known = KnownDeviceSet::from_config(&config.devices, &local, &*reporter);
    let gateway = Arc::new(GatewayClient::new(&config, reporter.clone())?);
    let mut reconciler = LoginReconciler::new(
        probe,
        gateway,
        known,
        local.macs.clone(),
        config.error_handle.to_book(),
        config.portal.clone(),
        reporter.clone(),
    );

    if args.login || args.nothing_selected() {
        let state = reconciler.run().await;
        info!("Login finished: {state}");
        ok &= state == LoginState::Success;
    }

    if args.sessions {
        match reconciler.list_sessions().await {
            // With hints on, the reporter has already printed it.
            Ok(listing) if !config.logging.hints => println!("{listing}"),
            Ok(_) => {}
            Err(e) => {
                error!("{e}");
                ok = false;
            }
        }
    }

    if let Some(index) = args.logout {
        if let Err(e) = reconciler.logout_index(index).await {
            error!("{e}");
            ok = false;
        }
    }

    Ok(ok)
}
