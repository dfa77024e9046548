use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use conveyor::config::parse_duration;
use conveyor::{
    CommandExecutor, JobPriority, JobSpec, JobState, JobStore, ListFilter, OutputStore,
    QueueConfig, QueueService, Result, WorkerPool,
};

/// conveyor - persistent background job queue
#[derive(Parser, Debug)]
#[command(name = "conveyor")]
#[command(version, about = "Persistent multi-worker background job queue", long_about = None)]
struct Cli {
    /// Path to the queue database
    #[arg(long, global = true, default_value = "conveyor.db")]
    data: PathBuf,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Enqueue a new job
    Enqueue {
        /// Shell command to execute
        command: String,
        /// Explicit job id (defaults to a fresh UUID)
        #[arg(long)]
        id: Option<String>,
        /// Priority: critical, high, medium or low
        #[arg(long)]
        priority: Option<String>,
        /// Retries allowed after the first failure
        #[arg(long)]
        max_retries: Option<u32>,
        /// Execution timeout, e.g. 30s, 5m
        #[arg(long)]
        timeout: Option<String>,
        /// Delay before the job becomes eligible, e.g. 10s, 1h
        #[arg(long)]
        run_in: Option<String>,
    },
    /// List jobs
    List {
        /// Filter by state
        #[arg(long)]
        state: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Show one job
    Status { id: String },
    /// Queue statistics
    Stats,
    /// Cancel a job
    Cancel { id: String },
    /// Dead-letter queue operations
    Dlq {
        #[command(subcommand)]
        command: DlqCommands,
    },
    /// Worker pool
    Worker {
        #[command(subcommand)]
        command: WorkerCommands,
    },
    /// Runtime configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum DlqCommands {
    /// List dead jobs, most recent first
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Re-queue a dead job
    Retry {
        id: String,
        /// Reset the attempt counter to zero
        #[arg(long)]
        reset_attempts: bool,
        /// Give the job a new retry budget
        #[arg(long)]
        max_retries: Option<u32>,
    },
    /// Delete dead jobs
    Purge {
        /// Only delete jobs older than this, e.g. 7d
        #[arg(long)]
        older_than: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum WorkerCommands {
    /// Start workers and process jobs until interrupted
    Start {
        /// Number of workers (defaults to workers.max-workers)
        #[arg(long)]
        count: Option<usize>,
        /// Keep running in the background until signalled
        #[arg(long)]
        daemon: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    Get { key: String },
    Set { key: String, value: String },
    List,
    Reset,
}

const CONFIG_KEY: &str = "config:current";

fn load_config(db: &sled::Db) -> Result<QueueConfig> {
    match db.get(CONFIG_KEY)? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map_err(|e| conveyor::QueueError::Codec(e.to_string())),
        None => Ok(QueueConfig::default()),
    }
}

fn save_config(db: &sled::Db, config: &QueueConfig) -> Result<()> {
    let bytes =
        serde_json::to_vec(config).map_err(|e| conveyor::QueueError::Codec(e.to_string()))?;
    db.insert(CONFIG_KEY, bytes)?;
    db.flush()?;
    Ok(())
}

fn print_job(job: &conveyor::Job, json: bool) {
    if json {
        println!("{}", serde_json::to_string_pretty(job).unwrap_or_default());
    } else {
        println!(
            "{}  {:<10}  {:<8}  attempts {}/{}  {}",
            job.id,
            job.state,
            job.priority,
            job.attempts,
            job.max_retries + 1,
            job.command
        );
        if let Some(err) = &job.error_message {
            println!("    error: {err}");
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let db = conveyor::store::open_db(&cli.data)?;
    let config = Arc::new(RwLock::new(load_config(&db)?));
    let store = Arc::new(JobStore::new(db.clone())?);
    let service = QueueService::new(store, Arc::clone(&config));

    match cli.command {
        Commands::Enqueue {
            command,
            id,
            priority,
            max_retries,
            timeout,
            run_in,
        } => {
            let mut spec = JobSpec::new(command);
            spec.id = id;
            spec.priority = priority
                .as_deref()
                .map(JobPriority::from_str)
                .transpose()?;
            spec.max_retries = max_retries;
            spec.timeout = timeout.as_deref().map(parse_duration).transpose()?;
            spec.run_at = run_in
                .as_deref()
                .map(parse_duration)
                .transpose()?
                .map(|d| chrono::Utc::now() + chrono::Duration::seconds(d.as_secs() as i64));

            let job = service.enqueue(spec)?;
            if cli.json {
                print_job(&job, true);
            } else {
                println!("Enqueued job {} ({})", job.id, job.state);
            }
        }
        Commands::List { state, limit } => {
            let filter = ListFilter {
                state: state.as_deref().map(JobState::from_str).transpose()?,
                limit,
                newest_first: true,
                ..Default::default()
            };
            for job in service.list(&filter)? {
                print_job(&job, cli.json);
            }
        }
        Commands::Status { id } => match service.get(&id)? {
            Some(job) => print_job(&job, cli.json),
            None => return Err(conveyor::QueueError::NotFound(id)),
        },
        Commands::Stats => {
            let stats = service.stats();
            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&stats).unwrap_or_default()
                );
            } else {
                println!("total:      {}", stats.total);
                println!("pending:    {}", stats.pending);
                println!("scheduled:  {}", stats.scheduled);
                println!("processing: {}", stats.processing);
                println!("completed:  {}", stats.completed);
                println!("dead:       {}", stats.dead);
                println!("cancelled:  {}", stats.cancelled);
                for (priority, count) in &stats.priorities {
                    println!("  {priority}: {count} live");
                }
            }
        }
        Commands::Cancel { id } => match service.cancel(&id)? {
            Some(_) => println!("Cancelled job {id}"),
            None => return Err(conveyor::QueueError::NotFound(id)),
        },
        Commands::Dlq { command } => match command {
            DlqCommands::List { limit } => {
                for job in service.dlq_list(limit)? {
                    print_job(&job, cli.json);
                }
            }
            DlqCommands::Retry {
                id,
                reset_attempts,
                max_retries,
            } => {
                let job = service.dlq_retry(&id, reset_attempts, max_retries)?;
                println!("Re-queued job {} (attempts {})", job.id, job.attempts);
            }
            DlqCommands::Purge { older_than } => {
                let purged = match older_than {
                    Some(age) => service.dlq_purge_older_than(parse_duration(&age)?)?,
                    None => service.dlq_purge_all()?,
                };
                println!("Purged {purged} dead jobs");
            }
        },
        Commands::Worker { command } => match command {
            WorkerCommands::Start { count, daemon } => {
                let count =
                    count.unwrap_or_else(|| config.read().unwrap().workers.max_workers);
                let shutdown_timeout = config.read().unwrap().workers.shutdown_timeout;

                service.start().await?;
                let executor = Arc::new(CommandExecutor::new(Arc::new(OutputStore::new(db))));
                let pool = WorkerPool::new(service.clone(), executor);
                let started = pool.start(count);

                if daemon {
                    println!("✅ {started} workers running in daemon mode");
                } else {
                    println!("✅ {started} workers running, press Ctrl+C to stop");
                }

                tokio::signal::ctrl_c().await?;
                println!("Stopping workers...");
                pool.stop_graceful(shutdown_timeout).await;
                service.stop().await;
            }
        },
        Commands::Config { command } => match command {
            ConfigCommands::Get { key } => match config.read().unwrap().get(&key) {
                Some(value) => println!("{key} = {value}"),
                None => {
                    return Err(conveyor::QueueError::InvalidValue(format!(
                        "unknown configuration key: {key}"
                    )))
                }
            },
            ConfigCommands::Set { key, value } => {
                {
                    let mut config = config.write().unwrap();
                    config.set(&key, &value)?;
                }
                save_config(&db, &config.read().unwrap())?;
                println!("{key} = {value}");
            }
            ConfigCommands::List => {
                for (key, value) in config.read().unwrap().entries() {
                    println!("{key} = {value}");
                }
            }
            ConfigCommands::Reset => {
                {
                    config.write().unwrap().reset();
                }
                save_config(&db, &config.read().unwrap())?;
                println!("Configuration reset to defaults");
            }
        },
    }

    Ok(())
}
