use std::error::Error;
use std::sync::Arc;
use std::thread;

use clap::Parser;
use log::info;
use serde_derive::{Deserialize, Serialize};

use shmkv::queue::{Request, RequestQueue};
use shmkv::{SegmentConfig, ShmKvError};

#[derive(clap::Parser)]
#[clap()]
struct Opts {
    #[clap(short = 'c', long = "config", default_value = "shmkv-client.toml")]
    config: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ClientConfig {
    segment: SegmentConfig,
    producers: usize,
    requests_per_producer: usize,
}

impl Default for ClientConfig {
    fn default() -> ClientConfig {
        ClientConfig {
            segment: SegmentConfig::default(),
            producers: 4,
            requests_per_producer: 10_000,
        }
    }
}

/// Deterministic per-producer workload: two inserts, a read and a delete
/// cycling over a small key space owned by that producer.
fn nth_request(producer_id: usize, n: usize) -> Request {
    let key = format!("p{}-k{}", producer_id, n % 64);
    match n % 4 {
        0 | 1 => Request::insert(key, format!("v{}", n)),
        2 => Request::read(key),
        _ => Request::delete(key),
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let opts: Opts = Opts::parse();
    let cfg: ClientConfig = confy::load_path(&opts.config)?;
    if cfg.producers == 0 || cfg.requests_per_producer == 0 {
        return Err(Box::new(ShmKvError::Logic(format!(
            "producers and requests_per_producer must be positive, got {} and {}",
            cfg.producers, cfg.requests_per_producer
        ))));
    }

    let queue = Arc::new(RequestQueue::attach(&cfg.segment)?);
    info!(
        "attached to {} with ring capacity {}",
        cfg.segment.flink_path(),
        queue.capacity()
    );

    let mut producers = Vec::with_capacity(cfg.producers);
    for producer_id in 0..cfg.producers {
        let queue = Arc::clone(&queue);
        let count = cfg.requests_per_producer;
        producers.push(thread::spawn(move || -> Result<usize, ShmKvError> {
            for n in 0..count {
                match queue.enqueue(&nth_request(producer_id, n)) {
                    Ok(()) => {}
                    Err(ShmKvError::Stopped) => {
                        info!(
                            "producer {} stopped by server shutdown after {} requests",
                            producer_id, n
                        );
                        return Ok(n);
                    }
                    Err(e) => return Err(e),
                }
            }
            Ok(count)
        }));
    }

    let mut sent = 0usize;
    for producer in producers {
        sent += producer.join().expect("producer thread panicked")?;
    }
    info!("sent {} requests", sent);
    Ok(())
}
