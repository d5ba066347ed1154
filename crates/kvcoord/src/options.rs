use std::time::Duration;

use clap::{Parser, Subcommand};

#[derive(Debug, Clone, Parser)]
pub struct Options {
    /// Cluster id reported in response headers.
    #[clap(long, global = true, default_value = "1")]
    pub cluster_id: u64,
    /// Member id reported in response headers.
    #[clap(long, global = true, default_value = "1")]
    pub member_id: u64,

    /// How long to wait for the store to answer the connection check, in milliseconds.
    #[clap(long, global = true, default_value = "5000")]
    pub dial_timeout_ms: u64,

    /// Filter logs using this string, rather than the `RUST_LOG` environment variable.
    #[clap(long, global = true)]
    pub log_filter: Option<String>,

    /// Don't print logs with colour.
    #[clap(long, global = true)]
    pub no_colour: bool,

    #[clap(subcommand)]
    pub scenario: Scenario,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Scenario {
    /// Let a lease expire, then keep one alive and cancel it.
    Lease {
        #[clap(long, default_value = "/t/a")]
        key: String,
        /// Lease ttl in seconds.
        #[clap(long, default_value = "1")]
        ttl: i64,
    },
    /// Have two contenders take the same lock in turn.
    Lock {
        #[clap(long, default_value = "/lock/1")]
        key: String,
        /// Session ttl in seconds.
        #[clap(long, default_value = "3")]
        ttl: i64,
        /// How long the first holder keeps the lock, in milliseconds.
        #[clap(long, default_value = "1000")]
        hold_ms: u64,
    },
    /// Watch a prefix while writing, modifying and deleting keys under it.
    Watch {
        #[clap(long, default_value = "/test/")]
        prefix: String,
        /// Number of keys to write.
        #[clap(long, default_value = "3")]
        keys: u32,
    },
}

impl Default for Options {
    fn default() -> Self {
        Self {
            cluster_id: 1,
            member_id: 1,
            dial_timeout_ms: 5000,
            log_filter: None,
            no_colour: false,
            scenario: Scenario::Lease {
                key: "/t/a".to_owned(),
                ttl: 1,
            },
        }
    }
}

impl Options {
    /// The connection check timeout, 5s when unset.
    pub fn dial_timeout(&self) -> Duration {
        if self.dial_timeout_ms == 0 {
            Duration::from_secs(5)
        } else {
            Duration::from_millis(self.dial_timeout_ms)
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_match_parser() {
        let parsed = Options::parse_from(["kvcoord", "lease"]);
        let default = Options::default();
        assert_eq!(parsed.cluster_id, default.cluster_id);
        assert_eq!(parsed.member_id, default.member_id);
        assert_eq!(parsed.dial_timeout(), Duration::from_secs(5));
        assert_eq!(parsed.log_filter, None);
        assert!(!parsed.no_colour);
        assert!(matches!(
            parsed.scenario,
            Scenario::Lease { ref key, ttl: 1 } if key == "/t/a"
        ));
    }

    #[test]
    fn zero_dial_timeout_uses_default() {
        let options = Options::parse_from(["kvcoord", "--dial-timeout-ms", "0", "watch"]);
        assert_eq!(options.dial_timeout(), Duration::from_secs(5));
        let options = Options::parse_from(["kvcoord", "lock", "--dial-timeout-ms", "250"]);
        assert_eq!(options.dial_timeout(), Duration::from_millis(250));
        assert!(matches!(options.scenario, Scenario::Lock { ttl: 3, .. }));
    }
}
