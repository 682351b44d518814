use std::{path::PathBuf, process, sync::Arc};

use sealed_eval::{
    client::{HttpClient, RetryPolicy},
    crypto::{self, SharedKey},
    evaluator::Evaluator,
    model::LexiconLoader,
    rest,
    settings::{ApiSettings, EvaluatorSettings, PeerSettings, StorageBackend, WorkerSettings},
    storage::{BundleStore, FsStore, MemoryStore, RedisStore, Store, TaskStore},
    task::{task_queue, TaskRunner},
};
use structopt::StructOpt;
use tokio::signal;
use tracing_subscriber::*;

#[macro_use]
extern crate tracing;

#[derive(Debug, StructOpt)]
#[structopt(name = "Evaluator")]
struct Opt {
    /// Path of the configuration file
    #[structopt(short, parse(from_os_str))]
    config_path: PathBuf,
}

/// Everything the evaluator needs besides its storage.
struct Context {
    api: ApiSettings,
    key: SharedKey,
    peer: PeerSettings,
    dataset: PathBuf,
    workers: WorkerSettings,
    delivery: RetryPolicy,
}

#[tokio::main]
async fn main() {
    let opt = Opt::from_args();

    let settings = EvaluatorSettings::new(opt.config_path).unwrap_or_else(|err| {
        eprintln!("{}", err);
        process::exit(1);
    });
    let EvaluatorSettings {
        api,
        log,
        crypto: crypto_settings,
        peer,
        storage,
        dataset,
        workers,
        delivery,
    } = settings;

    let _fmt_subscriber = FmtSubscriber::builder()
        .with_env_filter(log.filter)
        .with_ansi(true)
        .init();

    if let Err(err) = crypto::init() {
        error!("{}", err);
        process::exit(1);
    }

    let ctx = Context {
        api,
        key: crypto_settings.key,
        peer,
        dataset: dataset.path,
        workers,
        delivery: delivery.into(),
    };

    match storage.backend {
        StorageBackend::Memory => run(MemoryStore::new(), ctx).await,
        StorageBackend::Filesystem => run(fs_store(storage.path).await, ctx).await,
        StorageBackend::Redis => {
            let url = storage.redis_url.unwrap_or_default();
            let tasks = RedisStore::new(url.as_str()).await.unwrap_or_else(|err| {
                error!("failed to connect to redis: {}", err);
                process::exit(1);
            });
            let bundles = fs_store(storage.path).await;
            run(Store::new(tasks, bundles), ctx).await
        }
    }
}

async fn fs_store(path: PathBuf) -> FsStore {
    FsStore::new(path).await.unwrap_or_else(|err| {
        error!("failed to initialize storage: {:#}", err);
        process::exit(1);
    })
}

async fn run<S>(store: S, ctx: Context)
where
    S: TaskStore + BundleStore,
{
    let Context {
        api,
        key,
        peer,
        dataset,
        workers,
        delivery,
    } = ctx;

    let timeout = peer.timeout_duration();
    let client = HttpClient::new(peer.url, timeout).unwrap_or_else(|err| {
        error!("failed to create the developer client: {}", err);
        process::exit(1);
    });

    let (sender, receiver) = task_queue(workers.queue_capacity);
    let runner = TaskRunner::new(
        store.clone(),
        client,
        Arc::new(LexiconLoader),
        key.clone(),
        dataset,
        workers.count,
        delivery,
    );
    let runner = tokio::spawn(runner.run(receiver));

    let evaluator = Arc::new(Evaluator::new(store, key, sender));
    if let Err(err) = evaluator.is_ready().await {
        error!("storage is not ready: {}", err);
        process::exit(1);
    }
    // the runner is already draining the queue, so requeuing cannot block forever
    if let Err(err) = evaluator.recover().await {
        error!("failed to recover the evaluations: {}", err);
        process::exit(1);
    }
    let routes = rest::evaluator::routes(evaluator, &api);

    tokio::select! {
        _ = rest::serve(routes, api.bind_address) => {
            warn!("shutting down: REST server terminated");
        }
        _ = runner => {
            warn!("shutting down: task runner terminated");
        }
        _ = signal::ctrl_c() => {
            info!("shutting down");
        }
    }
}
