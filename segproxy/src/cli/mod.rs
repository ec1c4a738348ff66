use crate::config::DnsTransportKind;
use crate::dispatch::Dispatching;
use clap::{Args, ValueHint};
use std::fmt::Write;
use std::path::PathBuf;

#[derive(Debug, Default, Args)]
pub(crate) struct StartOptions {
    /// YAML configuration file; command line flags take precedence over it
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub listen_host: Option<String>,
    #[arg(long)]
    pub listen_port: Option<u16>,
    /// Seconds
    #[arg(long)]
    pub connect_timeout: Option<f64>,
    /// Seconds
    #[arg(long)]
    pub idle_timeout: Option<f64>,
    #[arg(long)]
    pub max_connections: Option<usize>,
    /// Max entries for DNS cache (0 disables caching)
    #[arg(long)]
    pub dns_cache_size: Option<usize>,
    /// Use a specific DNS server instead of the system resolver
    #[arg(long)]
    pub dns_server: Option<String>,
    #[arg(long)]
    pub dns_port: Option<u16>,
    /// DNS transport for --dns-server
    #[arg(long, value_enum)]
    pub dns_transport: Option<DnsTransportKind>,
    #[arg(long)]
    pub log_level: Option<String>,
    /// Log one access line per request or CONNECT tunnel
    #[arg(long)]
    pub access_log: bool,
    /// Mode applied when no rule matches
    #[arg(long, value_parser = ["direct", "segment_upstream"])]
    pub segmentation: Option<String>,
    #[arg(long, value_parser = ["none", "fixed", "random"])]
    pub segment_strategy: Option<String>,
    #[arg(long)]
    pub segment_chunk_size: Option<usize>,
    #[arg(long)]
    pub segment_min: Option<usize>,
    #[arg(long)]
    pub segment_max: Option<usize>,
    #[arg(long)]
    pub segment_delay_ms: Option<u64>,
    /// Example: '*.example.com=segment_upstream,strategy=fixed,chunk=512,delay=5'
    #[arg(long = "segment-rule", value_hint = ValueHint::Other)]
    pub segment_rules: Vec<String>,
    /// Load rules from a text file (one rule per non-comment line)
    #[arg(long = "rules-file", value_hint = ValueHint::FilePath)]
    pub rules_files: Vec<PathBuf>,
    /// Only allow these domains; `.example.com` also matches subdomains
    #[arg(long = "allow-domain")]
    pub allow_domains: Vec<String>,
    #[arg(long = "deny-domain")]
    pub deny_domains: Vec<String>,
    /// Refuse destinations resolving to private, loopback or reserved addresses
    #[arg(long)]
    pub deny_private: bool,
}

/// Output of `--validate-rules`.
pub(crate) fn rules_summary(dispatching: &Dispatching) -> String {
    let mut out = format!("Default policy: {}\n", dispatching.default_segmentation());
    if dispatching.rules().is_empty() {
        out.push_str("Rules: (none)\n");
        return out;
    }
    out.push_str("Rules:\n");
    for (idx, rule) in dispatching.rules().iter().enumerate() {
        let _ = writeln!(out, "{:02}. {}", idx + 1, rule);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DispatchingBuilder;

    #[test]
    fn test_rules_summary() {
        let builder = DispatchingBuilder::new();
        assert_eq!(
            rules_summary(&builder.build()),
            "Default policy: mode=direct strategy=none delay=0\nRules: (none)\n"
        );

        let mut builder = DispatchingBuilder::new();
        builder
            .add_rule_line("inline", 1, "*.example.com=segment_upstream,action=block,reason=test")
            .unwrap();
        builder.add_rule_line("inline", 2, "a.com=direct").unwrap();
        let summary = rules_summary(&builder.build());
        let lines: Vec<&str> = summary.lines().collect();
        assert_eq!(lines[1], "Rules:");
        assert!(lines[2].starts_with("01. host=*.example.com action=block reason=test"));
        assert_eq!(lines[3], "02. host=a.com action=direct mode=direct strategy=none delay=0");
    }
}
