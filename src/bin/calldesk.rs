use anyhow::Result;
use calldesk::{
    app::AppBuilder,
    config::{Config, IssueLevel},
    pipeline::CallOutcome,
    version,
};
use clap::{Parser, Subcommand};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    author,
    version = version::get_short_version(),
    about = "Files helpdesk tickets for recorded telephony calls",
    long_about = version::get_version_info()
)]
struct Cli {
    /// Path to the configuration file
    #[clap(
        long,
        global = true,
        default_value = "calldesk.toml",
        help = "Path to the configuration file (TOML format)"
    )]
    conf: String,
    #[clap(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Poll for new calls until interrupted (default)
    Run,
    /// Process the newest unprocessed call, or a specific one, and exit
    Once {
        #[clap(long, help = "Provider call id to process")]
        call_id: Option<String>,
    },
    /// Validate configuration and exit
    CheckConfig,
}

fn load_config(path: &str) -> Result<Config> {
    let mut config = if std::path::Path::new(path).exists() {
        println!("Loading config from: {}", path);
        Config::load(path)?
    } else {
        println!("Config {} not found, using defaults and environment", path);
        Config::default()
    };
    config.apply_env();
    Ok(config)
}

fn check_config(config: &Config) -> bool {
    let issues = config.validate();
    for issue in &issues {
        let level = match issue.level {
            IssueLevel::Error => "error",
            IssueLevel::Warning => "warning",
        };
        eprintln!("- [{}] {}: {}", level, issue.field, issue.message);
    }
    !issues.iter().any(|i| i.level == IssueLevel::Error)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.conf)?;

    if matches!(cli.command, Some(Commands::CheckConfig)) {
        if check_config(&config) {
            println!("Configuration is valid.");
            return Ok(());
        }
        eprintln!("Configuration validation failed");
        std::process::exit(1);
    }

    let mut env_filter = EnvFilter::from_default_env();
    if let Some(Ok(level)) = config
        .log_level
        .as_ref()
        .map(|level| level.parse::<LevelFilter>())
    {
        env_filter = env_filter.add_directive(level.into());
    }
    env_filter = env_filter.add_directive("hyper=info".parse()?);

    let mut guard_holder = None;
    if let Some(ref log_file) = config.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        guard_holder = Some(guard);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(non_blocking),
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()?;
    }
    let _guard = guard_holder; // keep the guard alive

    info!("{}", version::get_version_info());
    for issue in config.validate() {
        match issue.level {
            IssueLevel::Error => error!(field = %issue.field, "{}", issue.message),
            IssueLevel::Warning => warn!(field = %issue.field, "{}", issue.message),
        }
    }

    let interval = config.poller.interval();
    let mut processor = AppBuilder::new().with_config(config).build()?;

    match cli.command {
        Some(Commands::Once { call_id }) => {
            match processor.process_once(call_id.as_deref()).await? {
                Some((call, CallOutcome::Filed { ticket })) => {
                    println!("{} filed as ticket {}", call.id, ticket.id)
                }
                Some((call, outcome)) => println!("{}: {:?}", call.id, outcome),
                None => println!("no matching unprocessed call"),
            }
            Ok(())
        }
        _ => {
            let token = CancellationToken::new();
            let stopper = token.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                info!("shutdown requested, finishing current call");
                stopper.cancel();
            });
            processor.run(interval, token).await;
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                select! {
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
