//! Runs one listing command against the resolved registry client

use crate::catalog::ListOptions;
use crate::cli::args::{Args, Command};
use crate::cli::output::Printer;
use crate::error::{RegistryError, Result, ResultExt};
use crate::logging::Logger;
use crate::reference::RegistryReference;
use crate::registry::{ClientSettings, RegistryClient, Resolver, default_keychain};
use std::io::Write;
use std::time::Instant;

pub struct Runner {
    args: Args,
    logger: Logger,
    printer: Printer,
}

impl Runner {
    pub fn new(args: Args) -> Result<Self> {
        args.validate()?;

        let logger = if args.quiet {
            Logger::new_quiet()
        } else {
            Logger::new(args.verbose)
        };
        let printer = Printer::new(args.output);

        Ok(Self { args, logger, printer })
    }

    pub fn args(&self) -> &Args {
        &self.args
    }

    /// Resolve the client for the reference host and print the listing.
    ///
    /// The configured deadline and Ctrl-C both abort whatever request is in
    /// flight; results already printed for earlier repositories stay.
    pub async fn run(&self) -> Result<()> {
        let start_time = Instant::now();
        let reference = self.args.reference()?;
        let settings = ClientSettings::new(self.args.config(), default_keychain())?
            .with_logger(self.logger.clone());
        let deadline = settings.config.operation_timeout();
        let resolver = Resolver::new(settings);

        let work = async {
            let client = resolver
                .resolve(&reference.host)
                .await
                .with_context(|| format!("creating client for {}", reference.host))?;
            let mut stdout = std::io::stdout();
            self.execute(client.as_ref(), &reference, &mut stdout).await
        };
        let work = async {
            match deadline {
                Some(limit) => tokio::time::timeout(limit, work).await.map_err(|_| {
                    RegistryError::Timeout(format!(
                        "{} did not finish within {}",
                        self.args.command.name(),
                        self.logger.format_duration(limit)
                    ))
                })?,
                None => work.await,
            }
        };

        tokio::select! {
            result = work => result?,
            _ = tokio::signal::ctrl_c() => {
                self.logger.warning("Interrupted, aborting");
                return Err(RegistryError::Cancelled);
            }
        }

        self.logger.verbose(&format!(
            "{} completed in {}",
            self.args.command.name(),
            self.logger.format_duration(start_time.elapsed())
        ));
        Ok(())
    }

    /// Run the command with an already resolved client, writing to `out`.
    ///
    /// Each repository's results are written only once its listing
    /// succeeded.
    pub async fn execute<W: Write>(
        &self,
        client: &dyn RegistryClient,
        reference: &RegistryReference,
        out: &mut W,
    ) -> Result<()> {
        match &self.args.command {
            Command::Repos(list) => {
                let options = ListOptions {
                    recursive: list.recursive,
                };
                let repositories = client
                    .list_repositories(&reference.repository, &options)
                    .await
                    .with_context(|| format!("listing repositories for {}", reference.repository))?;
                self.logger.verbose(&format!(
                    "Found {} repositories under {}",
                    repositories.repositories.len(),
                    reference
                ));
                self.printer.repositories(out, reference, &repositories)
            }
            Command::Manifests(list) | Command::Tags(list) => {
                let targets = self.targets(client, reference, list.recursive).await?;
                for target in &targets {
                    self.logger.detail(&format!("Listing manifests of {}", target));
                    let manifests = client
                        .list_manifests(&target.repository, &ListOptions::default())
                        .await
                        .with_context(|| format!("listing manifests for {}", target.repository))?;
                    match self.args.command {
                        Command::Tags(_) => self.printer.tags(out, target, &manifests)?,
                        _ => self.printer.manifests(out, target, &manifests)?,
                    }
                }
                Ok(())
            }
        }
    }

    /// The reference itself, followed by every descendant when recursive
    async fn targets(
        &self,
        client: &dyn RegistryClient,
        reference: &RegistryReference,
        recursive: bool,
    ) -> Result<Vec<RegistryReference>> {
        let mut targets = vec![reference.clone()];
        if recursive {
            let descendants = client
                .list_repositories(&reference.repository, &ListOptions::recursive())
                .await
                .with_context(|| format!("listing repositories for {}", reference.repository))?;
            targets.extend(descendants.repositories.iter().map(|r| reference.child(r)));
        }
        Ok(targets)
    }
}
