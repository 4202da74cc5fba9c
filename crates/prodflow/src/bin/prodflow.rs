//! Runner: load config, open the store, discover work, drive the
//! pipeline to its fixed point, then write publish pointers back to
//! the task source. SIGINT flips the orchestrator's shutdown flag;
//! in-flight stage calls drain naturally.

use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::{error, info};

use prodflow::db::{self, Database};
use prodflow::executors::standard_executors;
use prodflow::source::{discover_into_store, write_back_published, CatalogSource};
use prodflow::{load_config, logging, Orchestrator, PipelineConfig, ProdflowError};

fn main() -> ExitCode {
    logging::init("info");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "prodflow.json".to_string());

    match run(&config_path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(config_path: &str) -> Result<(), ProdflowError> {
    let config = load_config(config_path)?;

    let db_path = config
        .db_path
        .clone()
        .or_else(db::default_database_path)
        .unwrap_or_else(|| "prodflow.db".into());
    let db = Database::open(&db_path)?;

    let source = CatalogSource::new(&config.source)?;
    let report = discover_into_store(&db, &source)?;
    info!(
        "{} records from the task source, {} new",
        report.seen, report.created
    );

    let executors = standard_executors(&config)?;
    let orchestrator = Orchestrator::new(
        db.clone(),
        Arc::new(PipelineConfig::from_config(&config)),
        executors,
    );

    let shutdown = orchestrator.shutdown_handle();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Interrupt received, finishing in-flight work...");
        shutdown.store(true, Ordering::Relaxed);
    }) {
        error!("Failed to install interrupt handler: {}", e);
    }

    let summary = orchestrator.run()?;
    info!(
        "Run finished: {} committed, {} retried, {} invalidated",
        summary.committed, summary.retried, summary.invalidated
    );

    let written = write_back_published(&db, &source)?;
    info!("{} publish pointers written back", written);

    Ok(())
}
