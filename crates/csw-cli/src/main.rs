use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use dotenvy::dotenv;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use csw_cli::{
    apply_record, format_record_line, load_snapshot, resolve_targets, save_snapshot, CliReporter,
    Command, Config, DisplayMode, HarvestArgs, HarvestTarget,
};
use csw_client::{EndpointOptions, ServiceEndpoint};
use csw_core::{
    load_catalogs_config, BatchHarvestSummary, CacheSnapshot, CatalogHarvestResult, HarvestReport,
    Harvester,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    // Setup logging (stderr to keep stdout clean for reports)
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set default tracing subscriber")?;

    let config = Config::parse();

    match config.command {
        Command::Inspect {
            url,
            log_all_requests,
        } => inspect(&url, log_all_requests).await,
        Command::Harvest(args) => harvest(&args).await,
    }
}

/// Print the capabilities of a service
async fn inspect(url: &str, log_requests: bool) -> anyhow::Result<()> {
    let options = EndpointOptions {
        log_requests,
        ..EndpointOptions::default()
    };
    let endpoint = ServiceEndpoint::with_options(url, options).context("Invalid CSW service URL")?;

    let capabilities = match endpoint.capabilities().await {
        Ok(capabilities) => capabilities,
        Err(e) => {
            error!("{}", e.user_message());
            return Err(e).context("Failed to fetch capabilities");
        }
    };
    println!("{}", serde_json::to_string_pretty(&capabilities)?);

    Ok(())
}

/// Harvest one URL, one named catalog or every enabled catalog
async fn harvest(args: &HarvestArgs) -> anyhow::Result<()> {
    let catalogs = if args.url.is_none() {
        load_catalogs_config(args.config.as_deref()).context("Failed to load catalogs file")?
    } else {
        None
    };
    let targets = resolve_targets(args, catalogs.as_ref())?;

    if targets.len() == 1 {
        let target = &targets[0];
        let cache = match &args.cache {
            Some(path) => Some(
                load_snapshot(path)
                    .with_context(|| format!("Failed to load cache {}", path.display()))?,
            ),
            None => None,
        };

        let (report, snapshot) = harvest_target(target, args, cache).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);

        if !report.is_success() {
            bail!(
                "Harvest of {} failed: {}",
                target.url,
                report.error.as_deref().unwrap_or("cancelled")
            );
        }
        if let Some(path) = &args.save_cache {
            save_snapshot(path, &snapshot)
                .with_context(|| format!("Failed to save cache {}", path.display()))?;
        }
        return Ok(());
    }

    if args.cache.is_some() || args.save_cache.is_some() {
        bail!("--cache and --save-cache require a single URL or --catalog");
    }
    batch_harvest(&targets, args).await
}

/// Harvest every target in turn, going on when one fails
async fn batch_harvest(targets: &[HarvestTarget], args: &HarvestArgs) -> anyhow::Result<()> {
    info!("Starting batch harvest of {} catalogs", targets.len());
    let mut summary = BatchHarvestSummary::new();

    for (i, target) in targets.iter().enumerate() {
        info!(
            "[{}/{}] Harvesting {} ({})",
            i + 1,
            targets.len(),
            target.name,
            target.url
        );
        let result = match harvest_target(target, args, None).await {
            Ok((report, _)) => {
                CatalogHarvestResult::from_report(target.name.clone(), target.url.clone(), report)
            }
            Err(e) => {
                error!("[{}/{}] {} failed: {:#}", i + 1, targets.len(), target.name, e);
                CatalogHarvestResult::failure(
                    target.name.clone(),
                    target.url.clone(),
                    format!("{:#}", e),
                )
            }
        };
        summary.add(result);
    }

    let reports: serde_json::Map<String, serde_json::Value> = summary
        .results
        .iter()
        .map(|result| {
            let value = match &result.report {
                Some(report) => serde_json::to_value(report)?,
                None => serde_json::json!({ "error": result.error }),
            };
            Ok((result.catalog_name.clone(), value))
        })
        .collect::<Result<_, serde_json::Error>>()?;
    println!("{}", serde_json::to_string_pretty(&reports)?);

    info!(
        "Batch harvest complete: {} successful, {} failed, {} records",
        summary.successful_count(),
        summary.failed_count(),
        summary.total_records()
    );

    if summary.failed_count() > 0 {
        bail!("{} of {} catalogs failed", summary.failed_count(), summary.total_catalogs());
    }
    Ok(())
}

/// Run one harvesting session, returning its report and the updated snapshot
async fn harvest_target(
    target: &HarvestTarget,
    args: &HarvestArgs,
    cache: Option<CacheSnapshot>,
) -> anyhow::Result<(HarvestReport, CacheSnapshot)> {
    let endpoint = ServiceEndpoint::with_options(
        &target.url,
        args.endpoint_options(target.compat_options.clone()),
    )
    .context("Invalid CSW service URL")?;

    let mut snapshot = cache.clone().unwrap_or_default();
    let mut harvester = Harvester::new(Arc::new(endpoint), args.harvest_config(target.schema))?
        .with_reporter(CliReporter::new(args.display));
    if let Some(cache) = cache {
        harvester = harvester.with_cache(cache);
    }

    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    loop {
        let next = tokio::select! {
            item = harvester.next() => Some(item),
            _ = &mut interrupt => None,
        };
        match next {
            Some(Some(Ok(record))) => {
                if args.display == DisplayMode::List {
                    println!("{}", format_record_line(&record));
                }
                apply_record(&mut snapshot, &record);
            }
            Some(Some(Err(e))) => error!("{}", e.user_message()),
            Some(None) => break,
            None => {
                warn!("Interrupted, stopping harvest");
                harvester.stop();
                break;
            }
        }
    }

    Ok((harvester.report(), snapshot))
}
