use clamguard::{
    cli::Cli,
    daemon::Daemon,
    signals::{SignalEvent, wait_for_signal},
};
use clap::Parser;
use config::Config;
use flume::bounded;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // NOTE: The verbosity flag takes precedence over the environment variable
    // for log control. `CLAMGUARD_LOG` can still set levels per crate, e.g.
    // `CLAMGUARD_LOG=orchestrator=trace clamguard -v`.
    let env_filter = EnvFilter::builder()
        .with_default_directive("notify=warn".parse()?)
        .with_env_var("CLAMGUARD_LOG")
        .from_env()?
        .add_directive(cli.verbosity.log_level_filter().as_str().parse()?);

    let layer = tracing_subscriber::fmt::layer()
        .with_level(true)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(layer)
        .with(env_filter)
        .init();

    // load config
    let mut config = match &cli.conffile {
        Some(path) => Config::load(path)?,
        _ => {
            let mut candidates = glob::glob("/etc/clamguard/config.d/*.toml")?
                .filter_map(Result::ok)
                .collect::<Vec<_>>();
            candidates.insert(0, "/etc/clamguard/config.toml".into());
            trace!(?candidates, "config file candidates");
            Config::load_multiple(candidates)?
        }
    };
    cli.apply_overrides(&mut config);
    debug!(?config, ?cli);

    let daemon = Daemon::from_config(&config)?;

    // install signal handlers before anything is running
    let (signals_tx, signals_rx) = bounded(8);
    let cancel = CancellationToken::new();
    let mut signal_handle = tokio::spawn(wait_for_signal(signals_tx, cancel.clone()));

    if let Err(err) = daemon.start() {
        error!(%err, "failed to start");
        daemon.shutdown();
        return Err(err.into());
    }

    let outcome = loop {
        tokio::select! {
            // bubble up any errors from the signal handlers
            res = &mut signal_handle => {
                let res = res.map_err(anyhow::Error::from).and_then(|res| Ok(res?));
                if let Err(err) = &res {
                    error!("error happened during handling signals: {}", err);
                }
                break res;
            }

            // handle the signal events
            event_res = signals_rx.recv_async() => {
                let event = match event_res {
                    Ok(event) => event,
                    Err(err) => break Err(err.into()),
                };
                debug!(?event, "Received signal event");

                match event {
                    SignalEvent::DumpStatus => daemon.dump_status(),
                    SignalEvent::ReapplyPolicy => daemon.reapply_policy(),
                    SignalEvent::Shutdown => {
                        info!("shutting down");
                        break Ok(());
                    }
                }
            }
        }
    };

    cancel.cancel();
    tokio::task::block_in_place(|| daemon.shutdown());
    outcome
}
