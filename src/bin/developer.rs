use std::{path::PathBuf, process, sync::Arc};

use sealed_eval::{
    client::HttpClient,
    crypto,
    developer::Developer,
    rest,
    settings::{ApiSettings, CryptoSettings, DeveloperSettings, PeerSettings, StorageBackend},
    storage::{FsStore, MemoryStore, ResultStore, UploadStore},
};
use structopt::StructOpt;
use tokio::signal;
use tracing_subscriber::*;

#[macro_use]
extern crate tracing;

#[derive(Debug, StructOpt)]
#[structopt(name = "Developer")]
struct Opt {
    /// Path of the configuration file
    #[structopt(short, parse(from_os_str))]
    config_path: PathBuf,
}

#[tokio::main]
async fn main() {
    let opt = Opt::from_args();

    let settings = DeveloperSettings::new(opt.config_path).unwrap_or_else(|err| {
        eprintln!("{}", err);
        process::exit(1);
    });

    let DeveloperSettings {
        api,
        log,
        crypto: crypto_settings,
        peer,
        storage,
    } = settings;

    let _fmt_subscriber = FmtSubscriber::builder()
        .with_env_filter(log.filter)
        .with_ansi(true)
        .init();

    if let Err(err) = crypto::init() {
        error!("{}", err);
        process::exit(1);
    }

    match storage.backend {
        StorageBackend::Memory => run(MemoryStore::new(), api, crypto_settings, peer).await,
        StorageBackend::Filesystem => match FsStore::new(&storage.path).await {
            Ok(store) => run(store, api, crypto_settings, peer).await,
            Err(err) => {
                error!("failed to initialize storage: {:#}", err);
                process::exit(1);
            }
        },
        StorageBackend::Redis => {
            error!("the developer cannot store its uploads in redis");
            process::exit(1);
        }
    }
}

async fn run<S>(store: S, api: ApiSettings, crypto_settings: CryptoSettings, peer: PeerSettings)
where
    S: UploadStore + ResultStore,
{
    let timeout = peer.timeout_duration();
    let client = HttpClient::new(peer.url, timeout).unwrap_or_else(|err| {
        error!("failed to create the evaluator client: {}", err);
        process::exit(1);
    });
    let developer = Arc::new(Developer::new(store, client, crypto_settings.key));
    let routes = rest::developer::routes(developer, &api);

    tokio::select! {
        _ = rest::serve(routes, api.bind_address) => {
            warn!("shutting down: REST server terminated");
        }
        _ = signal::ctrl_c() => {
            info!("shutting down");
        }
    }
}
