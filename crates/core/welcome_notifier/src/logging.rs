use std::io::IsTerminal;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_MAX_LEVEL: tracing::Level = tracing::Level::INFO;

#[derive(clap::Args, Debug, Clone, Default, Eq, PartialEq)]
pub struct LogConfigArgs {
    /// Turn-on the DEBUG log level.
    ///
    /// If off only reports ERROR, WARN, and INFO, if on also reports DEBUG
    #[arg(long, global = true)]
    pub debug: bool,

    /// Configures the logging level.
    ///
    /// One of error/warn/info/debug/trace.
    /// Logs with verbosity lower or equal to the selected level will be printed,
    /// i.e. warn prints ERROR and WARN logs and trace prints logs of all levels.
    ///
    /// Overrides `--debug`
    #[arg(long, global = true)]
    pub log_level: Option<tracing::Level>,
}

impl LogConfigArgs {
    /// The level forced by the command line flags, if any.
    pub fn max_level(&self) -> Option<tracing::Level> {
        self.log_level
            .or(self.debug.then_some(tracing::Level::DEBUG))
    }
}

/// Configures and enables logging taking into account flags and env variables.
///
/// 1. If `RUST_LOG` variable is set, it overrides the default INFO level
/// 2. If `--debug` or `--log-level` flags are set, they override `RUST_LOG`
pub fn log_init(flags: &LogConfigArgs) {
    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal() && yansi::Condition::no_color())
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339());

    if let Some(log_level) = flags.max_level() {
        subscriber.with_max_level(log_level).finish().init();
        return;
    }

    if std::env::var("RUST_LOG").is_ok() {
        subscriber
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_file(true)
            .with_line_number(true)
            .finish()
            .init();
        return;
    }

    subscriber.with_max_level(DEFAULT_MAX_LEVEL).finish().init();
}
