//! CLI argument definitions using clap derive macros.

use clap::Parser;

/// Runs one crawler spider against in-process fakes of the message bus,
/// scheduler, proxy pool, and statistics sink.
///
/// Seed URLs are read from positional arguments or stdin; a built-in demo
/// agent answers every dispatched request with a synthetic 200, so this
/// binary can be exercised without any real downloader infrastructure.
#[derive(Parser, Debug)]
#[command(name = "spider")]
#[command(author, version, about)]
pub struct Args {
    /// Identity of the spider (non-blank, at most 36 characters).
    #[arg(long, default_value = "demo-spider")]
    pub id: String,

    /// Human-readable name, reported to the statistics sink.
    #[arg(long, default_value = "demo spider")]
    pub name: String,

    /// Seed URIs to crawl. Read from stdin if none are given.
    pub urls: Vec<String>,

    /// Default data-flow sink name (resolved via the storage registry).
    #[arg(long)]
    pub storage: Option<String>,

    /// Max admission attempts per request.
    #[arg(long)]
    pub retried_times: Option<u32>,

    /// Depth limit; 0 disables the check.
    #[arg(long)]
    pub depth: Option<u32>,

    /// Dispatch pacing target, requests/second.
    #[arg(long)]
    pub speed: Option<f64>,

    /// Soft cap on in-flight requests before back-pressure pauses dispatch.
    #[arg(long)]
    pub requested_queue_count: Option<u32>,

    /// Idle/paused terminal threshold, in seconds.
    #[arg(long)]
    pub empty_sleep_time: Option<u32>,

    /// In-flight timeout, in milliseconds, before a request is swept and re-admitted.
    #[arg(long)]
    pub request_timeout_ms: Option<u64>,

    /// Lease a proxy before every publish.
    #[arg(long)]
    pub use_proxy: bool,

    /// Path to a config file, overriding the default resolution order.
    #[arg(long)]
    pub config: Option<std::path::PathBuf>,

    /// Increase output verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output.
    #[arg(short, long)]
    pub quiet: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_args_parses_successfully() {
        let args = Args::try_parse_from(["spider"]).unwrap();
        assert_eq!(args.id, "demo-spider");
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert!(!args.use_proxy);
        assert!(args.storage.is_none());
    }

    #[test]
    fn verbose_flag_increments_count() {
        let args = Args::try_parse_from(["spider", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn quiet_flag_sets_quiet() {
        let args = Args::try_parse_from(["spider", "--quiet"]).unwrap();
        assert!(args.quiet);
    }

    #[test]
    fn accepts_seed_urls_as_positional_args() {
        let args = Args::try_parse_from(["spider", "https://a.example", "https://b.example"]).unwrap();
        assert_eq!(args.urls, vec!["https://a.example", "https://b.example"]);
    }

    #[test]
    fn use_proxy_flag_sets_true() {
        let args = Args::try_parse_from(["spider", "--use-proxy"]).unwrap();
        assert!(args.use_proxy);
    }

    #[test]
    fn overrides_are_none_when_not_passed() {
        let args = Args::try_parse_from(["spider"]).unwrap();
        assert!(args.retried_times.is_none());
        assert!(args.speed.is_none());
    }

    #[test]
    fn overrides_parse_when_passed() {
        let args =
            Args::try_parse_from(["spider", "--retried-times", "5", "--speed", "2.5"]).unwrap();
        assert_eq!(args.retried_times, Some(5));
        assert_eq!(args.speed, Some(2.5));
    }

    #[test]
    fn rejects_unknown_flag() {
        let result = Args::try_parse_from(["spider", "--bogus-flag"]);
        assert!(result.is_err());
    }
}
