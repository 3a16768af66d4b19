use clap::builder::TypedValueParser as _;
use clap::Parser;
use dotenvy::dotenv;
use log::LevelFilter;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Port the sure-shot host listens on unless told otherwise.
pub const DEFAULT_HOST_PORT: u16 = 8000;

/// Device name used before the user picks one.
pub const DEFAULT_DEVICE_NAME: &str = "new device";

/// How the redirect controller reacts when the stored session cannot be revalidated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RedirectMode {
    /// Keep a stored session alive if possible; never redirect when nothing is stored.
    Preserve,
    /// Trust the last persisted session without a network check.
    LastAvailable,
    /// Move to the login surface whenever revalidation fails.
    ForceRelogin,
}

#[derive(Debug, PartialEq, Eq)]
pub struct RedirectModeParseError;

impl FromStr for RedirectMode {
    type Err = RedirectModeParseError;
    fn from_str(mode: &str) -> Result<RedirectMode, Self::Err> {
        match mode.to_lowercase().as_str() {
            "preserve" => Ok(RedirectMode::Preserve),
            "last-available" => Ok(RedirectMode::LastAvailable),
            "force-relogin" => Ok(RedirectMode::ForceRelogin),
            _ => Err(RedirectModeParseError),
        }
    }
}

impl fmt::Display for RedirectMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RedirectMode::Preserve => write!(f, "preserve"),
            RedirectMode::LastAvailable => write!(f, "last-available"),
            RedirectMode::ForceRelogin => write!(f, "force-relogin"),
        }
    }
}

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// IP address (dotted quad) of the sure-shot host to bind to
    #[arg(long, env)]
    host_ip: Option<String>,

    /// TCP port of the sure-shot host
    #[arg(long, env, default_value_t = DEFAULT_HOST_PORT)]
    pub host_port: u16,

    /// Name this device logs in with (sent as the device id)
    #[arg(long, env, default_value = DEFAULT_DEVICE_NAME)]
    pub device_name: String,

    /// Password of the host
    #[arg(long, env)]
    password: Option<String>,

    /// Directory the session record is persisted in
    #[arg(long, env, default_value = ".sure_shot")]
    pub data_dir: PathBuf,

    /// Persist the session (host, token and credentials) across restarts
    #[arg(long, env, default_value_t = true, action = clap::ArgAction::Set)]
    pub persist_session: bool,

    /// Timeout in milliseconds for `POST /auth/login`
    #[arg(long, env, default_value_t = 5000)]
    pub login_timeout_ms: u64,

    /// Timeout in milliseconds for `GET /ping`
    #[arg(long, env, default_value_t = 3000)]
    pub ping_timeout_ms: u64,

    /// Timeout in milliseconds for `GET /auth/verify`
    #[arg(long, env, default_value_t = 3000)]
    pub verify_timeout_ms: u64,

    /// Fixed delay in milliseconds before the event stream reconnects
    #[arg(long, env, default_value_t = 3000, value_parser = clap::value_parser!(u64).range(1..))]
    pub reconnect_delay_ms: u64,

    /// Period in milliseconds of the event stream readiness monitor
    #[arg(long, env, default_value_t = 3000, value_parser = clap::value_parser!(u64).range(1..))]
    pub monitor_interval_ms: u64,

    /// Milliseconds an event stream may stay connecting before a reconnect is forced
    #[arg(long, env, default_value_t = 5000)]
    pub connect_timeout_ms: u64,

    /// Seconds of silence after which a connected event stream is considered dead (0 disables)
    #[arg(long, env, default_value_t = 45)]
    pub idle_timeout_secs: u64,

    /// Period in milliseconds of the redirect controller's session re-check
    #[arg(long, env, default_value_t = 3000, value_parser = clap::value_parser!(u64).range(1..))]
    pub redirect_interval_ms: u64,

    /// How the redirect controller handles a session that fails revalidation
    #[arg(
        long,
        env,
        default_value_t = RedirectMode::Preserve,
        value_parser = clap::builder::PossibleValuesParser::new([
            "preserve", "last-available", "force-relogin",
            "PRESERVE", "LAST-AVAILABLE", "FORCE-RELOGIN"
        ])
            .map(|s| s.parse::<RedirectMode>().unwrap()),
    )]
    pub redirect_mode: RedirectMode,

    /// Maximum number of retries for message history reads
    #[arg(long, env, default_value_t = 2)]
    pub history_max_retries: u32,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(
        short,
        long,
        env,
        default_value_t = LevelFilter::Info,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .map(|s| s.parse::<LevelFilter>().unwrap()),
        )]
    pub log_level_filter: LevelFilter,

    /// Forget the saved session and exit
    #[arg(long)]
    pub logout: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        // Load .env file first
        dotenv().ok();
        // Then parse the command line parameters and flags
        Config::parse()
    }

    pub fn host_ip(&self) -> Option<&str> {
        self.host_ip.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_millis(self.login_timeout_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn verify_timeout(&self) -> Duration {
        Duration::from_millis(self.verify_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// `None` when idle detection is switched off.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn redirect_interval(&self) -> Duration {
        Duration::from_millis(self.redirect_interval_ms)
    }
}
