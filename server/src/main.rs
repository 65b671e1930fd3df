use std::error::Error;
use std::sync::Arc;
use std::thread;

use clap::Parser;
use log::info;
use serde_derive::{Deserialize, Serialize};

use shmkv::queue::RequestQueue;
use shmkv::shutdown::ShutdownCoordinator;
use shmkv::table::ShardedTable;
use shmkv::worker::run_worker;
use shmkv::{SegmentConfig, ShmKvError};

#[derive(clap::Parser)]
#[clap()]
struct Opts {
    #[clap(short = 'c', long = "config", default_value = "shmkv-server.toml")]
    config: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ServerConfig {
    segment: SegmentConfig,
    shards: usize,
    workers: usize,
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            segment: SegmentConfig::default(),
            shards: 16,
            workers: 4,
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let opts: Opts = Opts::parse();
    let cfg: ServerConfig = confy::load_path(&opts.config)?;
    if cfg.shards == 0 || cfg.workers == 0 {
        return Err(Box::new(ShmKvError::Logic(format!(
            "shards and workers must be positive, got shards={} workers={}",
            cfg.shards, cfg.workers
        ))));
    }

    let queue = Arc::new(RequestQueue::create(&cfg.segment)?);
    let table = Arc::new(ShardedTable::new(cfg.shards)?);
    let coordinator = Arc::new(ShutdownCoordinator::new());
    Arc::clone(&coordinator).install_signal_handler(Arc::clone(&queue))?;
    info!(
        "serving with {} workers over {} shards, ring capacity {}",
        cfg.workers,
        cfg.shards,
        queue.capacity()
    );

    let mut workers = Vec::with_capacity(cfg.workers);
    for worker_id in 0..cfg.workers {
        let queue = Arc::clone(&queue);
        let table = Arc::clone(&table);
        workers.push(thread::spawn(move || -> Result<u64, ShmKvError> {
            let processed = run_worker(&queue, &table)?;
            info!("worker {} processed {} requests", worker_id, processed);
            Ok(processed)
        }));
    }

    let mut total = 0u64;
    for worker in workers {
        total += worker.join().expect("worker thread panicked")?;
    }
    info!(
        "drained {} requests in total, {} entries stored",
        total,
        table.len()?
    );
    queue.teardown()?;
    Ok(())
}
