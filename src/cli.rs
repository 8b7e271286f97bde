//! Command-line interface definitions for the sync job.
//!
//! This module defines the CLI arguments and options using the `clap` crate.
//! Storage and queue endpoints can be provided via command-line flags or
//! environment variables, matching how the external scheduler injects them.

use clap::Parser;

/// Command-line arguments for one sync invocation.
///
/// The target list and selector rules live in the YAML config file; the
/// CLI only points at that file and at the storage/queue endpoints.
///
/// # Examples
///
/// ```sh
/// # Local run: objects under ./objects, events spooled to NDJSON
/// quest_sync -c sync.yaml
///
/// # Against S3/SQS (requires the `aws` feature)
/// quest_sync -c sync.yaml --bucket my-sync-bucket --queue-url https://sqs/...
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the YAML sync configuration
    #[arg(short, long, default_value = "sync.yaml")]
    pub config: String,

    /// Root directory of the local object store
    #[arg(short, long, env = "STORE_ROOT", default_value = "./objects")]
    pub store_root: String,

    /// Path of the local NDJSON event spool
    #[arg(short = 'e', long, env = "EVENT_SPOOL", default_value = "./events.ndjson")]
    pub event_spool: String,

    /// S3 bucket to store objects in instead of the local directory
    #[cfg(feature = "aws")]
    #[arg(long, env = "BUCKET_NAME")]
    pub bucket: Option<String>,

    /// SQS queue URL to publish events to instead of the local spool
    #[cfg(feature = "aws")]
    #[arg(long, env = "QUEUE_URL")]
    pub queue_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["quest_sync"]);
        assert_eq!(cli.config, "sync.yaml");
        assert_eq!(cli.store_root, "./objects");
        assert_eq!(cli.event_spool, "./events.ndjson");
    }

    #[test]
    fn test_cli_short_flags() {
        let cli = Cli::parse_from([
            "quest_sync",
            "-c",
            "/etc/quest/sync.yaml",
            "-s",
            "/var/lib/quest/objects",
            "-e",
            "/var/lib/quest/events.ndjson",
        ]);
        assert_eq!(cli.config, "/etc/quest/sync.yaml");
        assert_eq!(cli.store_root, "/var/lib/quest/objects");
        assert_eq!(cli.event_spool, "/var/lib/quest/events.ndjson");
    }
}
