use clap::{builder::BoolishValueParser, Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Config;
use crate::telemetry::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "fitkit-remote",
    about = "Build and simulate FITkit projects on a shared remote server",
    author,
    version
)]
pub struct Cli {
    #[command(flatten)]
    pub remote: RemoteArgs,

    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone, Default)]
pub struct RemoteArgs {
    #[arg(
        long = "server",
        global = true,
        env = "FITKIT_REMOTE_SERVER",
        value_name = "HOST[:PORT]",
        help = "Remote build server address (port defaults to 9000)"
    )]
    pub server: Option<String>,

    #[arg(
        long = "auth-request-url",
        global = true,
        env = "FITKIT_AUTH_REQUEST_URL",
        value_name = "URL",
        help = "Auth server endpoint issuing token requests"
    )]
    pub auth_request_url: Option<String>,

    #[arg(
        long = "auth-generate-url",
        global = true,
        env = "FITKIT_AUTH_GENERATE_URL",
        value_name = "URL",
        help = "Page where a token request is approved"
    )]
    pub auth_generate_url: Option<String>,

    #[arg(
        long = "debug-wire-log",
        global = true,
        env = "FITKIT_LOG_DEBUG_INFO",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = BoolishValueParser::new(),
        help = "Write protocol traffic to <PROJECT>/server_communication.log"
    )]
    pub debug_wire_log: Option<bool>,
}

impl RemoteArgs {
    /// Overlays explicit flags on `base`.
    pub fn apply(&self, mut base: Config) -> Config {
        if let Some(server) = &self.server {
            base.server_address = server.trim().to_string();
        }
        if let Some(url) = &self.auth_request_url {
            base.auth_request_url = url.clone();
        }
        if let Some(url) = &self.auth_generate_url {
            base.auth_generate_url = url.clone();
        }
        if let Some(enabled) = self.debug_wire_log {
            base.log_debug_info = enabled;
        }
        base
    }
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        global = true,
        env = "FITKIT_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        global = true,
        env = "FITKIT_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compile the project on the remote server and save the binaries
    Build(JobArgs),
    /// Run the project's ISIM simulation on the remote server
    Simulate(JobArgs),
    /// Manage the stored auth token
    Auth {
        #[command(subcommand)]
        action: AuthCommand,
    },
}

#[derive(Args, Debug, Clone)]
pub struct JobArgs {
    #[arg(value_name = "PROJECT", help = "Project directory; artifacts land in its build/ folder")]
    pub project: PathBuf,

    #[arg(
        long = "payload",
        short = 'p',
        value_name = "FILE",
        help = "Project payload JSON produced by the project assembler"
    )]
    pub payload: PathBuf,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthCommand {
    /// Acquire a token now
    Login,
    /// Remove the stored token
    Logout,
    /// Report whether a token is stored
    Status,
}
