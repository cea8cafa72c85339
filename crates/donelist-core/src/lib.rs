pub mod cli;
pub mod commands;
pub mod completion;
pub mod config;
pub mod datastore;
pub mod day;
pub mod effects;
pub mod gateway;
pub mod memory;
pub mod prefs;
pub mod record;
pub mod reference;
pub mod render;
pub mod session;
pub mod store;
pub mod views;

use std::ffi::OsString;
use std::io;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info};

#[tracing::instrument(skip_all)]
pub fn run(raw_args: Vec<OsString>) -> anyhow::Result<()> {
    let pre = cli::preprocess_args(&raw_args)?;
    let cli = cli::GlobalCli::parse_from(pre.cleaned_args);

    cli::init_tracing(cli.verbose, cli.quiet)?;

    info!(
        verbose = cli.verbose,
        quiet = cli.quiet,
        "starting donelist CLI"
    );
    debug!(?pre.rc_overrides, "preprocessed rc overrides");

    let mut cfg = config::Config::load(cli.rc_file.as_deref())?;
    cfg.apply_overrides(
        pre.rc_overrides
            .into_iter()
            .chain(cli.rc_overrides.into_iter().map(|kv| (kv.key, kv.value))),
    );

    let data_dir = config::resolve_data_dir(&cfg, cli.data.as_deref())
        .context("failed to resolve data directory")?;

    let gateway = datastore::FileGateway::open(&data_dir)
        .with_context(|| format!("failed to open datastore at {}", data_dir.display()))?;
    let user_id = match cfg.user_id()? {
        Some(id) => id,
        None => gateway.local_user()?,
    };
    let options = cfg.session_options()?;
    let renderer = render::Renderer::new(&cfg)?;
    let command = cli.command.unwrap_or(cli::Command::List {
        projects: vec![],
        all: false,
    });

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context("failed to start async runtime")?;

    runtime.block_on(async move {
        let mut session = session::Session::open(
            Arc::new(gateway),
            user_id,
            options,
            commands::TerminalFeedback,
        )
        .await;
        let result =
            commands::dispatch(&mut session, &renderer, command, io::stdout().lock()).await;
        session.shutdown();
        result
    })?;

    info!("done");
    Ok(())
}
