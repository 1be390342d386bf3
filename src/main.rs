use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use jobd::config::SchedulerConfig;
use jobd::job::{Job, JobId};
use jobd::jobtype::{JobTypeRegistry, ShellJobType, SHELL_JOB_TYPE_ID};
use jobd::queue::CommandQueue;
use jobd::scheduler::JobScheduler;
use jobd::shutdown::cancel_on_termination;
use jobd::spawn::ProcessSpawner;
use jobd::store::JsonFileStore;
use jobd::worker::run_job;

#[derive(Parser, Debug)]
#[command(name = "jobd")]
#[command(version)]
#[command(about = "A single-node background job scheduler")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug)]
struct BrokerArgs {
    /// Broker URL: redis://host:port/db or unix_socket:///some/dir
    #[arg(long, default_value = "unix_socket:///tmp/jobd")]
    broker: String,

    /// Path of the JSON job store
    #[arg(long, default_value = "jobs.json")]
    store: PathBuf,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the job scheduler daemon
    Server {
        #[command(flatten)]
        broker: BrokerArgs,

        /// Maximum number of concurrently running user jobs
        #[arg(long, default_value = "8")]
        max_user_jobs: usize,
    },

    /// Run a single job to completion (spawned by the scheduler)
    RunJob {
        #[command(flatten)]
        broker: BrokerArgs,

        #[arg(long)]
        job_id: JobId,
    },

    /// Submit a shell job and notify the scheduler
    Submit {
        #[command(flatten)]
        broker: BrokerArgs,

        /// Shell command to run
        #[arg(long)]
        command: String,

        /// Owning user of the job
        #[arg(long, default_value = "cli")]
        owner: String,
    },

    /// Check that the scheduler daemon is alive
    Ping {
        #[command(flatten)]
        broker: BrokerArgs,
    },
}

fn default_registry() -> Arc<JobTypeRegistry> {
    let mut registry = JobTypeRegistry::new();
    registry.register(Arc::new(ShellJobType));
    Arc::new(registry)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Server {
            broker,
            max_user_jobs,
        } => {
            let config = SchedulerConfig::new(&broker.broker)
                .with_max_user_jobs(max_user_jobs)
                .with_store_path(&broker.store);
            let queue = CommandQueue::from_broker_url(&config.broker_url)?;
            let store = Arc::new(JsonFileStore::new(&config.store_path));
            let spawner = Arc::new(ProcessSpawner::new(&config));

            let scheduler =
                JobScheduler::new(config, store, default_registry(), spawner, queue);
            let shutdown = cancel_on_termination()?;
            scheduler.start(shutdown).await?;
        }

        Commands::RunJob { broker, job_id } => {
            let store = JsonFileStore::new(&broker.store);
            let queue = CommandQueue::from_broker_url(&broker.broker)?;
            run_job(&store, &default_registry(), &queue, job_id).await?;
        }

        Commands::Submit {
            broker,
            command,
            owner,
        } => {
            let store = JsonFileStore::new(&broker.store);
            let mut job = Job::new_user(0, owner, SHELL_JOB_TYPE_ID);
            job.data = Some(serde_json::json!({ "command": command }));
            let job = store.insert_new(job).await?;

            let queue = CommandQueue::from_broker_url(&broker.broker)?;
            match queue.start_job(&job).await {
                Ok(()) => println!("Job {} submitted", job.id),
                // The row is saved; only the wakeup hint was lost.
                Err(e) => {
                    tracing::warn!(job_id = job.id, error = %e, "Could not notify the scheduler");
                    println!(
                        "Job {} saved, but the job manager does not respond, \
                         please contact your administrator",
                        job.id
                    );
                }
            }
        }

        Commands::Ping { broker } => {
            let queue = CommandQueue::from_broker_url(&broker.broker)?;
            match queue.ping().await {
                Ok(()) => println!("Job scheduler is alive"),
                Err(msg) => {
                    eprintln!("{msg}");
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
