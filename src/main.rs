use std::{path::PathBuf, process::ExitCode, time::Duration};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};

use xirsys_rtc::{
    config::{AppMode, FetchPolicy, SessionConfig, Verbosity, DEFAULT_CHANNEL, DEFAULT_PING_INTERVAL},
    error::SessionError,
    model::identity::ChannelIdentity,
    peer::{self, SessionEnd},
    util::init_log,
};

#[derive(Parser, Debug)]
#[command(name = "xirsys-rtc", version, about = "Xirsys WebRTC peer over str0m")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Negotiate a data channel with a peer in the channel
    Datachannel(CommonArgs),
    /// Negotiate a video track, streaming an IVF file
    Video {
        #[command(flatten)]
        common: CommonArgs,
        /// An IVF (VP8/VP9) file to play
        #[arg(long = "video_file", short = 'f')]
        video_file: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// An url prefix where getice.php, gethost.php and gettoken.php are
    /// located, e.g. https://your.domain.com/xirsys
    xirsys_url: String,
    /// A user name for signaling
    user_name: String,
    /// A Xirsys channel name
    #[arg(long = "channel_name", short = 'c', default_value = DEFAULT_CHANNEL)]
    channel_name: String,
    /// Do not send websocket pings at an interval
    #[arg(long = "disable_ping_interval", short = 'p')]
    disable_ping_interval: bool,
    /// Debug logging
    #[arg(long, short = 'v')]
    verbose: bool,
    /// Accept invalid TLS certificates from the credential endpoints
    #[arg(long)]
    insecure: bool,
    /// Attempts per credential endpoint
    #[arg(long = "fetch_attempts", default_value_t = 1)]
    fetch_attempts: u32,
}

fn session_config(common: CommonArgs, mode: AppMode) -> Result<SessionConfig> {
    let identity = ChannelIdentity::new(common.channel_name, common.user_name)
        .context("invalid channel identity")?;

    let ping = (!common.disable_ping_interval).then_some(DEFAULT_PING_INTERVAL);

    Ok(SessionConfig::new(&common.xirsys_url, identity, mode)?
        .with_verbosity(Verbosity::from_flag(common.verbose))
        .with_ping_interval(ping)
        .with_insecure(common.insecure)
        .with_fetch_policy(FetchPolicy {
            attempts: common.fetch_attempts,
            backoff: Duration::from_millis(500),
        }))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let (common, mode) = match cli.command {
        Command::Datachannel(common) => (common, AppMode::DataChannel),
        Command::Video { common, video_file } => (common, AppMode::Video { video_file }),
    };
    init_log(Verbosity::from_flag(common.verbose));

    let config = match session_config(common, mode) {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}, exiting...", e);
            return ExitCode::FAILURE;
        }
    };

    info!(
        "Getting Xirsys ICE hosts and tokens as {} with {}",
        config.identity.user(),
        config.base_url
    );

    match peer::run(config).await {
        Ok(SessionEnd::RemoteClosed) => {
            info!("Peer closed the session");
            ExitCode::SUCCESS
        }
        Ok(SessionEnd::Interrupted) => {
            info!("Finished running");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{:#}", report(e));
            ExitCode::FAILURE
        }
    }
}

/// Wraps a session error so `{:#}` prints its whole cause chain.
fn report(e: SessionError) -> anyhow::Error {
    anyhow::Error::new(e).context("Session failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn report_prints_nested_causes() {
        let e = SessionError::Network(io::Error::new(io::ErrorKind::AddrInUse, "port taken"));
        assert_eq!(
            format!("{:#}", report(e)),
            "Session failed: network error: port taken"
        );
    }
}
