use anyhow::{Context as _, Result};
use snapgraph::batch_manager::BatchStatusView;
use snapgraph::bridge::ConversationalBridge;
use snapgraph::config::Config;
use snapgraph::context::AppContext;
use snapgraph::error::AppError;
use snapgraph::job_queue::{BatchEvent, ProcessOutcome};
use snapgraph::model::{AnalysisMeta, DuplicateHandling, ImageRecord, Job, JobPayload};
use snapgraph::analysis::AnalysisClient;
use std::path::PathBuf;

enum Command {
    Batch {
        album_id: String,
        name: Option<String>,
        duplicate_handling: DuplicateHandling,
        concurrency: usize,
        force_reprocessing: bool,
    },
    Status {
        batch_id: Option<String>,
    },
    Search {
        query: String,
        page: usize,
        page_size: usize,
    },
}

fn parse_args() -> Option<(PathBuf, Command)> {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = None;
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("snapgraph {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                    continue;
                }
                eprintln!("Error: --config requires a path argument");
                std::process::exit(1);
            }
            _ => break,
        }
    }

    let command_args = &args[i..];
    let config_path = config_path.unwrap_or_else(|| Config::config_dir().join("config.toml"));

    let command = match command_args.first().map(String::as_str) {
        Some("batch") => parse_batch_command(&command_args[1..]),
        Some("status") => Command::Status {
            batch_id: command_args.get(1).cloned(),
        },
        Some("search") => parse_search_command(&command_args[1..]),
        _ => {
            print_help();
            std::process::exit(1);
        }
    };

    Some((config_path, command))
}

fn parse_batch_command(args: &[String]) -> Command {
    let Some(album_id) = args.first().cloned() else {
        eprintln!("Error: batch requires an album id");
        std::process::exit(1);
    };
    let mut name = None;
    let mut duplicate_handling = DuplicateHandling::Skip;
    let mut concurrency = 1;
    let mut force_reprocessing = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--name" if i + 1 < args.len() => {
                name = Some(args[i + 1].clone());
                i += 2;
            }
            "--duplicate-handling" if i + 1 < args.len() => {
                duplicate_handling = match args[i + 1].as_str() {
                    "update" => DuplicateHandling::Update,
                    "replace" => DuplicateHandling::Replace,
                    _ => DuplicateHandling::Skip,
                };
                i += 2;
            }
            "--concurrency" if i + 1 < args.len() => {
                concurrency = args[i + 1].parse().unwrap_or(1);
                i += 2;
            }
            "--force-reprocessing" => {
                force_reprocessing = true;
                i += 1;
            }
            _ => i += 1,
        }
    }

    Command::Batch {
        album_id,
        name,
        duplicate_handling,
        concurrency,
        force_reprocessing,
    }
}

fn parse_search_command(args: &[String]) -> Command {
    let Some(query) = args.first().cloned() else {
        eprintln!("Error: search requires a query string");
        std::process::exit(1);
    };
    let mut page = 1;
    let mut page_size = 10;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--page" if i + 1 < args.len() => {
                page = args[i + 1].parse().unwrap_or(1);
                i += 2;
            }
            "--page-size" if i + 1 < args.len() => {
                page_size = args[i + 1].parse().unwrap_or(10);
                i += 2;
            }
            _ => i += 1,
        }
    }

    Command::Search {
        query,
        page,
        page_size,
    }
}

fn print_help() {
    println!(
        r#"snapgraph - batch image enrichment and relevance search engine

USAGE:
    snapgraph [OPTIONS] <COMMAND>

OPTIONS:
    --config, -c PATH   Path to config file
    --version, -V       Show version
    --help, -h          Show this help message

COMMANDS:
    batch <album-id> [--name NAME] [--duplicate-handling skip|update|replace] [--concurrency N] [--force-reprocessing]
        Runs one enrichment batch against an album, blocking until it completes.

    status [batch-id]
        Prints the status of one batch, or every tracked batch if omitted.

    search <query> [--page N] [--page-size N]
        Runs a conversational search against the enriched collection.

ENVIRONMENT:
    SNAPGRAPH_LOG       Log level (trace, debug, info, warn, error)
"#
    );
}

/// Runs one job end to end: fetch from the photo host, normalize and
/// analyze via the vision LLM, then persist via the store. Mirrors the
/// ingest path in spec §2: fetchImage -> ImageNormalizer -> analyze ->
/// putImage.
fn process_job(context: &AppContext, job: &Job) -> ProcessOutcome {
    let fetch_result = context.photo_host.fetch_image(&job.payload.fetch_url);
    let bytes = match fetch_result {
        Ok(bytes) => bytes,
        Err(err) => return ProcessOutcome::Failure(err),
    };

    let client = AnalysisClient::new(context.llm.as_ref());
    let analysis = match client.analyze(
        &bytes,
        context.config.llm.custom_prompt.as_deref(),
        None,
        &context.config.llm.model,
    ) {
        Ok(result) => result,
        Err(err) => return ProcessOutcome::Failure(err),
    };

    let now = chrono::Utc::now();
    let record = ImageRecord {
        id: format!("{}-{}", job.payload.album_key, job.payload.source_image_key),
        source_image_key: job.payload.source_image_key.clone(),
        filename: job.payload.filename.clone(),
        source_url: job.payload.fetch_url.clone(),
        title: None,
        caption: None,
        album_key: job.payload.album_key.clone(),
        album_name: job.payload.album_name.clone(),
        album_path: job.payload.album_path.clone(),
        album_hierarchy: job.payload.album_hierarchy.clone(),
        description: Some(analysis.description),
        keywords: analysis.keywords,
        analysis: Some(AnalysisMeta {
            model_id: analysis.model_id,
            timestamp: now,
            batch_id: None,
            job_id: Some(job.id.clone()),
            starred: false,
        }),
        created_at: now,
        last_updated_at: now,
    };

    match context.store.put_image(record, job.duplicate_handling) {
        Ok(outcome) => match outcome {
            snapgraph::model::PutOutcome::Added => ProcessOutcome::Success,
            snapgraph::model::PutOutcome::Skipped => ProcessOutcome::DuplicateSkipped,
            snapgraph::model::PutOutcome::Updated => ProcessOutcome::DuplicateUpdated,
            snapgraph::model::PutOutcome::Replaced => ProcessOutcome::DuplicateReplaced,
        },
        Err(err) => ProcessOutcome::Failure(AppError::StoreWrite(err.to_string())),
    }
}

fn run_batch(
    context: &AppContext,
    album_id: &str,
    name: Option<String>,
    duplicate_handling: DuplicateHandling,
    concurrency: usize,
    force_reprocessing: bool,
) -> Result<()> {
    let album_details = context
        .photo_host
        .get_album_details(album_id)
        .context("fetching album details")?;
    let images = context
        .photo_host
        .list_album_images(album_id)
        .context("listing album images")?;

    // Duplicate-skip images never become jobs: a skip should never reach the
    // photo host or the LLM.
    let skip_existing = duplicate_handling == DuplicateHandling::Skip && !force_reprocessing;
    let mut skipped = 0usize;
    let mut jobs = Vec::new();
    for image in images {
        if skip_existing
            && context
                .store
                .find_by_source_key(&image.source_image_key)?
                .is_some()
        {
            skipped += 1;
            continue;
        }
        let mut job = Job::new(
            image.source_image_key.clone(),
            JobPayload {
                source_image_key: image.source_image_key,
                fetch_url: image.fetch_url,
                filename: image.filename,
                album_key: album_id.to_string(),
                album_name: album_details.name.clone(),
                album_path: album_details.path.clone(),
                album_hierarchy: album_details.hierarchy.clone(),
            },
        );
        job.duplicate_handling = duplicate_handling;
        job.force_reprocessing = force_reprocessing;
        jobs.push(job);
    }

    if jobs.is_empty() {
        println!("No new images to process ({skipped} skipped as duplicates)");
        return Ok(());
    }

    let batch_name = name.unwrap_or_else(|| album_id.to_string());
    let batch_id = context
        .batch_manager
        .create_batch(jobs, batch_name, album_id)?;

    context.batch_manager.start_batch(
        &batch_id,
        concurrency,
        |job| process_job(context, job),
        |id, event| log_batch_event(id, &event),
    )?;

    let status = context.batch_manager.batch_status(&batch_id)?;
    println!(
        "batch {} finished: {} processed, {} failed, phase={:?} (created_at={})",
        batch_id, status.processed_count, status.failed_count, status.phase, status.created_at
    );
    Ok(())
}

fn log_batch_event(batch_id: &str, event: &BatchEvent) {
    match event {
        BatchEvent::Started { total } => {
            tracing::info!(batch_id, total, "batch started");
        }
        BatchEvent::Progress {
            processed,
            failed,
            total,
            current_job,
        } => {
            tracing::info!(
                batch_id,
                processed,
                failed,
                total,
                ?current_job,
                "batch progress"
            );
        }
        BatchEvent::Completed { message } => {
            tracing::info!(batch_id, message, "batch completed");
        }
        BatchEvent::Cancelled => {
            tracing::warn!(batch_id, "batch cancelled");
        }
        BatchEvent::Failed { error } => {
            tracing::error!(batch_id, error, "batch failed");
        }
    }
}

fn print_status(view: &BatchStatusView) {
    let eta = view
        .eta
        .map(|d| format!("{}s", d.as_secs()))
        .unwrap_or_else(|| "n/a".to_string());
    println!(
        "{} [{}] {}/{} processed ({}%), {} failed, phase={:?}, eta={}",
        view.batch_id,
        view.name,
        view.processed_count,
        view.total_jobs,
        view.progress_percent,
        view.failed_count,
        view.phase,
        eta
    );
}

fn run_status(context: &AppContext, batch_id: Option<String>) -> Result<()> {
    match batch_id {
        Some(id) => print_status(&context.batch_manager.batch_status(&id)?),
        None => {
            for view in context.batch_manager.all_statuses() {
                print_status(&view);
            }
        }
    }
    Ok(())
}

fn run_search(context: &AppContext, query: &str, page: usize, page_size: usize) -> Result<()> {
    let bridge = ConversationalBridge::new(&context.store, context.llm.as_ref());
    let response = bridge.ask(query, &context.config.llm.model, page, Some(page_size))?;

    println!("{}", response.final_text);
    for record in &response.results {
        println!(
            "  - {} ({}): {}",
            record.filename,
            record.album_name,
            record.description.as_deref().unwrap_or("")
        );
    }
    println!(
        "page {}/{} ({} total results)",
        response.pagination.page, response.pagination.total_pages, response.pagination.total_results
    );
    Ok(())
}

fn main() -> Result<()> {
    let Some((config_path, command)) = parse_args() else {
        return Ok(());
    };

    let config = if config_path.exists() {
        Config::load_from(&config_path)?
    } else {
        Config::load()?
    };

    snapgraph::logging::init(None)?;
    let context = AppContext::build(config)?;

    match command {
        Command::Batch {
            album_id,
            name,
            duplicate_handling,
            concurrency,
            force_reprocessing,
        } => run_batch(
            &context,
            &album_id,
            name,
            duplicate_handling,
            concurrency,
            force_reprocessing,
        ),
        Command::Status { batch_id } => run_status(&context, batch_id),
        Command::Search {
            query,
            page,
            page_size,
        } => run_search(&context, &query, page, page_size),
    }
}
