use clap::Parser;
use color_eyre::eyre::{Result, WrapErr, eyre};
use futures_util::future::join_all;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use imgcache::domain::services::normalize_url;
use imgcache::infrastructure::{
    AppConfig, CliArgs, Command, ConfigStore, DiskImageCache, ImageLoader, Prefetcher,
};

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(log_path) = config.log_file() {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();

        info!(path = %log_path.display(), "Logging initialized");
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}

fn load_config() -> Result<(AppConfig, Command)> {
    let args = CliArgs::parse();

    let mut config = ConfigStore::locate(args.config.as_deref())
        .and_then(|store| store.load())
        .wrap_err("Failed to load configuration")?;
    config.merge_with_args(&args);

    Ok((config, args.command))
}

async fn create_loader(config: &AppConfig) -> Result<ImageLoader> {
    let loader = ImageLoader::with_defaults(config.loader.clone(), config.cache_dir.clone())
        .await
        .wrap_err("Failed to create image loader")?;
    if !loader.has_persistent_store() {
        warn!("Running without a persistent store");
    }
    Ok(loader)
}

async fn open_store(config: &AppConfig) -> Result<DiskImageCache> {
    let retention = config.loader.persistent_retention();
    let store = match &config.cache_dir {
        Some(dir) => DiskImageCache::open(dir.clone(), retention).await,
        None => DiskImageCache::default_location(retention).await,
    };
    store.wrap_err("Failed to open persistent store")
}

async fn load_all(config: &AppConfig, urls: &[String]) -> Result<()> {
    let loader = create_loader(config).await?;
    let results = join_all(urls.iter().map(|url| loader.load(url))).await;

    let mut failed = 0;
    for (url, result) in urls.iter().zip(results) {
        match result {
            Ok(loaded) => {
                let dimensions = loaded
                    .handle
                    .dimensions()
                    .map_or_else(|| "?".to_string(), |(w, h)| format!("{w}x{h}"));
                println!(
                    "{}\t{}\t{} bytes\t{}",
                    loaded.source,
                    loaded.key,
                    loaded.handle.len(),
                    dimensions
                );
            }
            Err(e) => {
                failed += 1;
                println!("failed\t{url}\t{e}");
            }
        }
    }

    loader.flush().await;
    info!(stats = %loader.cache_stats(), "Load finished");
    println!("{}", loader.memory_cache_stats());
    if failed > 0 {
        return Err(eyre!("{failed} of {} images failed to load", urls.len()));
    }
    Ok(())
}

async fn run(command: Command, config: &AppConfig) -> Result<()> {
    match command {
        Command::Normalize { urls } => {
            for url in urls {
                println!("{}", normalize_url(&url));
            }
        }
        Command::Load { urls } => load_all(config, &urls).await?,
        Command::Prefetch { urls } => {
            let loader = create_loader(config).await?;
            let report = Prefetcher::new(loader.clone()).run(&urls).await;
            loader.flush().await;
            println!("{report}");
        }
        Command::Sweep => {
            let loader = create_loader(config).await?;
            let removed = loader.sweep_store().await;
            println!("Removed {removed} expired images");
        }
        Command::Clear => {
            let loader = create_loader(config).await?;
            loader.clear_cache().await;
            println!("Cache cleared");
        }
        Command::Stats => {
            let store = open_store(config).await?;
            let entries = store.len().await;
            let stats = serde_json::json!({
                "cache_dir": store.cache_dir(),
                "entries": entries,
                "loader": config.loader,
            });
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let (config, command) = load_config()?;
    init_logging(&config)?;

    info!(version = imgcache::VERSION, "Starting imgcache");

    run(command, &config).await
}
