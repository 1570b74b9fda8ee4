//! Command-line argument parsing

use crate::config::ExplorerConfig;
use crate::error::{RegistryError, Result};
use crate::reference::RegistryReference;
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug, Clone)]
#[command(name = "registry-explorer")]
#[command(about = "List repositories, manifests and tags in container registries")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Verbose output
    #[arg(long = "verbose", short = 'v', global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Only print results and errors
    #[arg(
        long = "quiet",
        short = 'q',
        global = true,
        conflicts_with = "verbose",
        help = "Suppress informational output"
    )]
    pub quiet: bool,

    /// Deadline for the whole command
    #[arg(
        long = "timeout",
        short = 't',
        global = true,
        help = "Abort the command after this many seconds"
    )]
    pub timeout: Option<u64>,

    #[arg(
        long = "request-timeout",
        global = true,
        help = "Timeout for each HTTP request in seconds"
    )]
    pub request_timeout: Option<u64>,

    /// Hosts to reach over plain HTTP
    #[arg(
        long = "plain-http",
        global = true,
        value_name = "HOST",
        help = "Talk to this registry host over plain HTTP (repeatable)"
    )]
    pub plain_http: Vec<String>,

    /// Skip TLS verification
    #[arg(
        long = "skip-tls",
        short = 'k',
        global = true,
        help = "Skip TLS certificate verification"
    )]
    pub skip_tls: bool,

    #[arg(
        long = "output",
        short = 'o',
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format"
    )]
    pub output: OutputFormat,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List the child repositories of a repository
    Repos(ListArgs),
    /// List the manifests stored in a repository
    Manifests(ListArgs),
    /// List the tags of a repository
    Tags(ListArgs),
}

impl Command {
    pub fn list_args(&self) -> &ListArgs {
        match self {
            Command::Repos(args) | Command::Manifests(args) | Command::Tags(args) => args,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Repos(_) => "repos",
            Command::Manifests(_) => "manifests",
            Command::Tags(_) => "tags",
        }
    }
}

#[derive(clap::Args, Debug, Clone, PartialEq, Eq)]
pub struct ListArgs {
    /// Reference of the form <host>/<repository>
    #[arg(value_name = "REFERENCE")]
    pub reference: String,

    #[arg(long = "recursive", short = 'r', help = "Include every descendant repository")]
    pub recursive: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// One reference per line
    #[default]
    Text,
    /// One JSON document per repository
    Json,
}

impl Args {
    pub fn parse_args() -> Self {
        Args::parse()
    }

    /// Validate arguments
    pub fn validate(&self) -> Result<()> {
        if self.timeout == Some(0) {
            return Err(RegistryError::Validation(
                "Timeout must be greater than 0".to_string(),
            ));
        }
        if self.request_timeout == Some(0) {
            return Err(RegistryError::Validation(
                "Request timeout must be greater than 0".to_string(),
            ));
        }
        self.reference()?;
        Ok(())
    }

    pub fn reference(&self) -> Result<RegistryReference> {
        RegistryReference::parse(&self.command.list_args().reference)
    }

    /// Environment configuration with the flags applied on top
    pub fn config(&self) -> ExplorerConfig {
        self.apply(ExplorerConfig::from_env())
    }

    /// Apply the flags to `config`
    pub fn apply(&self, mut config: ExplorerConfig) -> ExplorerConfig {
        if let Some(timeout) = self.timeout {
            config.operation_timeout = Some(timeout);
        }
        if let Some(timeout) = self.request_timeout {
            config.request_timeout = timeout;
        }
        config.plain_http.extend(self.plain_http.iter().cloned());
        config.skip_tls |= self.skip_tls;
        config.verbose |= self.verbose;
        config
    }
}
