//! Registry Explorer
//!
//! Command-line entry point: parses arguments, sets up logging and runs the
//! requested listing. Errors are reported on stderr with a non-zero exit.

use registry_explorer::cli::{Args, Runner};
use registry_explorer::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse_args();
    logging::init(args.verbose, args.quiet);

    let runner = Runner::new(args)?;
    runner.run().await?;
    Ok(())
}
