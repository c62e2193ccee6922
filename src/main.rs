//! quotafs - Entry Point
//!
//! Serves a quota-enforced storage root and logs every change under it.
//! `quotafs migrate <new_root>` copies the tree to a new root and records
//! it as the root for the next start.

use log::{error, info};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

use quotafs::{
    FilePathProvider, MigrationCoordinator, PathProvider, SecureFileStore, StoreError,
    StoreEvent, StoreSettings,
};

const DEFAULT_STATE_FILE: &str = "quotafs.root";

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize the logger (env_logger picks up RUST_LOG environment variable)
    env_logger::init();

    let settings = match StoreSettings::load() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to load settings: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("{}", e.user_message());
            ExitCode::FAILURE
        }
    }
}

async fn run(settings: StoreSettings) -> Result<(), StoreError> {
    let state_file = settings
        .root_state_file
        .clone()
        .unwrap_or_else(|| DEFAULT_STATE_FILE.to_string());
    let provider = FilePathProvider::new(settings.root_path.clone(), state_file);
    let root = provider.get_root_path();

    let config = settings.quota_config(&root)?;
    let store = SecureFileStore::new(config, settings.store_options())?;
    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.as_slice() {
        [command, new_root] if command == "migrate" => {
            let cancel = CancellationToken::new();
            let on_ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_ctrl_c.cancel();
                }
            });
            let progress = |fraction: f64| info!("Migration {:.0}%", fraction * 100.0);
            let report = MigrationCoordinator::new(&store)
                .migrate(new_root, Some(&progress), &cancel)
                .await?;
            if !report.skipped {
                provider.set_root_path(new_root)?;
            }
            info!(
                "Migration finished: {} files, {} directories, {} bytes",
                report.files_copied, report.directories_created, report.bytes_copied
            );
        }
        [] => serve(&store).await?,
        _ => {
            return Err(StoreError::InvalidConfig(
                "usage: quotafs [migrate <new_root>]".into(),
            ));
        }
    }

    store.shutdown();
    Ok(())
}

async fn serve(store: &SecureFileStore) -> Result<(), StoreError> {
    let quota = store.quota_info(&CancellationToken::new()).await?;
    info!(
        "Serving {} ({} of {} bytes used)",
        store.root().display(),
        quota.current_usage_bytes,
        quota.max_quota_bytes
    );

    store.start_watching()?;
    let mut events = store.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                break;
            }
            event = events.recv() => match event {
                Some(StoreEvent::FileSystemChanged(change)) => {
                    let paths = store.path_guard();
                    match &change.new_path {
                        Some(to) => info!(
                            "{:?} {} -> {}",
                            change.change_kind,
                            paths.virtual_path(&change.path),
                            paths.virtual_path(to)
                        ),
                        None => info!(
                            "{:?} {}",
                            change.change_kind,
                            paths.virtual_path(&change.path)
                        ),
                    }
                }
                Some(StoreEvent::QuotaWarningRaised { current_usage, quota_limit, usage_percentage }) => {
                    info!(
                        "Quota warning: {current_usage} of {quota_limit} bytes ({:.1}%)",
                        usage_percentage * 100.0
                    );
                }
                None => break,
            },
        }
    }
    Ok(())
}
