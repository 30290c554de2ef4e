use crate::logging::{LogFormat, LogLevel};
use clap::Parser;
use std::path::PathBuf;

/// Provision the ZLayer management link at boot
#[derive(Debug, Parser)]
#[command(name = "zlayer-linkd", version, about, long_about = None)]
pub(crate) struct Cli {
    /// Link configuration file (YAML)
    #[arg(short, long, env = "ZLAYER_LINK_CONFIG")]
    pub(crate) config: Option<PathBuf>,

    /// Kernel command line file to read instead of the configured one
    #[arg(long)]
    pub(crate) cmdline: Option<PathBuf>,

    /// Provisioning endpoint, overriding the kernel parameter
    #[arg(long, env = "ZLAYER_LINK_API")]
    pub(crate) api: Option<String>,

    /// Node UUID to present instead of the SMBIOS system UUID
    #[arg(long)]
    pub(crate) node_uuid: Option<String>,

    /// Directory the published resources are stored in
    #[arg(long, default_value = "/var/lib/zlayer/link")]
    pub(crate) data_dir: PathBuf,

    /// Log level (RUST_LOG takes precedence)
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    pub(crate) log_level: LogLevel,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    pub(crate) log_format: LogFormat,

    /// Seconds between network readiness probes
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u64).range(1..))]
    pub(crate) probe_interval: u64,
}
