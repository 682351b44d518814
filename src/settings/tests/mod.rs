use std::env;

use serial_test::serial;

use super::*;

const KEY_VAR: &str = "SEALED_EVAL_CRYPTO__KEY";

/// Runs `f` with the shared key set in the environment.
fn with_key<T>(f: impl FnOnce() -> T) -> T {
    env::set_var(KEY_VAR, SharedKey::generate().to_base64());
    let out = f();
    env::remove_var(KEY_VAR);
    out
}

fn storage(backend: StorageBackend, redis_url: Option<&str>) -> StorageSettings {
    StorageSettings {
        backend,
        path: PathBuf::from("data"),
        redis_url: redis_url.map(str::to_string),
    }
}

#[test]
#[serial]
fn test_settings_new() {
    with_key(|| {
        let developer = DeveloperSettings::new("configs/developer.toml").unwrap();
        assert_eq!(developer.storage.backend, StorageBackend::Filesystem);

        assert_eq!(developer.api.cors_origins, vec!["http://localhost:3000"]);

        let evaluator = EvaluatorSettings::new("configs/evaluator.toml").unwrap();
        assert_eq!(evaluator.workers.count, 2);
        assert_eq!(evaluator.delivery.retries, 3);
        assert_eq!(evaluator.peer.timeout_duration(), Duration::from_secs(30));
    });
    assert!(DeveloperSettings::new("").is_err());
}

#[test]
#[serial]
fn test_key_is_required() {
    env::remove_var(KEY_VAR);
    assert!(matches!(
        EvaluatorSettings::new("configs/evaluator.toml"),
        Err(SettingsError::Loading(_))
    ));
}

#[test]
#[serial]
fn test_invalid_key_is_not_echoed() {
    let bad = "c2hvcnQ=";
    env::set_var(KEY_VAR, bad);
    let err = EvaluatorSettings::new("configs/evaluator.toml").unwrap_err();
    env::remove_var(KEY_VAR);
    assert!(!err.to_string().contains(bad));
}

#[test]
#[serial]
fn test_environment_overrides() {
    env::set_var("SEALED_EVAL_WORKERS__COUNT", "8");
    let evaluator = with_key(|| EvaluatorSettings::new("configs/evaluator.toml"));
    env::remove_var("SEALED_EVAL_WORKERS__COUNT");
    assert_eq!(evaluator.unwrap().workers.count, 8);

    env::set_var("SEALED_EVAL_WORKERS__COUNT", "65");
    let evaluator = with_key(|| EvaluatorSettings::new("configs/evaluator.toml"));
    env::remove_var("SEALED_EVAL_WORKERS__COUNT");
    assert!(matches!(evaluator, Err(SettingsError::Validation(_))));
}

#[test]
fn test_validate_workers() {
    assert!(WorkerSettings {
        count: 1,
        queue_capacity: 1
    }
    .validate()
    .is_ok());
    assert!(WorkerSettings {
        count: 0,
        queue_capacity: 1
    }
    .validate()
    .is_err());
    assert!(WorkerSettings {
        count: 4,
        queue_capacity: 0
    }
    .validate()
    .is_err());
}

#[test]
fn test_validate_peer_and_delivery() {
    let peer = |url: &str, timeout| PeerSettings {
        url: url.to_string(),
        timeout,
    };
    assert!(peer("http://127.0.0.1:5001", 30).validate().is_ok());
    assert!(peer("http://127.0.0.1:5001", 0).validate().is_err());
    assert!(peer("http://127.0.0.1:5001", 301).validate().is_err());
    assert!(peer("not a url", 30).validate().is_err());

    assert!(DeliverySettings::default().validate().is_ok());
    assert!(DeliverySettings {
        retries: 4,
        backoff: 0
    }
    .validate()
    .is_err());
    assert_eq!(
        RetryPolicy::from(DeliverySettings::default()),
        RetryPolicy {
            retries: 3,
            backoff: Duration::from_millis(500)
        }
    );
}

#[test]
fn test_validate_cors_origins() {
    let api = |origins: &[&str]| ApiSettings {
        bind_address: ([127, 0, 0, 1], 5000).into(),
        max_upload_size: 1024,
        cors_origins: origins.iter().map(|o| o.to_string()).collect(),
    };
    assert!(api(&["*"]).validate().is_ok());
    assert!(api(&[]).validate().is_ok());
    assert!(api(&["http://localhost:3000", "https://lab.example.org"])
        .validate()
        .is_ok());
    assert!(api(&["localhost:3000"]).validate().is_err());
    assert!(api(&["http://localhost:3000/app"]).validate().is_err());
    assert!(api(&["ftp://localhost"]).validate().is_err());
    assert!(api(&["https://"]).validate().is_err());
}

#[test]
fn test_validate_storage() {
    assert!(storage(StorageBackend::Memory, None).validate().is_ok());
    assert!(storage(StorageBackend::Filesystem, None).validate().is_ok());
    assert!(storage(StorageBackend::Redis, Some("redis://127.0.0.1/"))
        .validate()
        .is_ok());
    assert!(storage(StorageBackend::Redis, None).validate().is_err());
    assert!(storage(StorageBackend::Redis, Some("http://127.0.0.1/"))
        .validate()
        .is_err());
}

#[test]
#[serial]
fn test_developer_rejects_redis() {
    env::set_var("SEALED_EVAL_STORAGE__BACKEND", "redis");
    env::set_var("SEALED_EVAL_STORAGE__REDIS_URL", "redis://127.0.0.1/");
    let developer = with_key(|| DeveloperSettings::new("configs/developer.toml"));
    env::remove_var("SEALED_EVAL_STORAGE__BACKEND");
    env::remove_var("SEALED_EVAL_STORAGE__REDIS_URL");
    assert!(matches!(developer, Err(SettingsError::Validation(_))));
}
