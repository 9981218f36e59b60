use clap::Parser;

use super::*;

#[test]
fn defaults_resolve_without_any_sources() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.server.addr.port(), DEFAULT_PORT);
    assert!(settings.cache.enabled);
    assert_eq!(settings.cache.default_ttl, Duration::from_secs(7 * 24 * 60 * 60));
    assert!(settings.cache.redis_url.is_none());
    assert_eq!(settings.jobs.refresh_schedule, DEFAULT_REFRESH_SCHEDULE);
    assert_eq!(settings.jobs.channel_capacity.get(), 100);

    let ids: Vec<&str> = settings.documents.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, ["bylaws", "tournament-rules"]);
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());
    raw.cache.enabled = Some(true);

    let overrides = ServeOverrides {
        server_port: Some(4321),
        cache_enabled: Some(false),
        shared: SharedOverrides {
            log_level: Some("debug".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert!(!settings.cache.enabled);
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = SharedOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_shared_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn invalid_cron_expression_is_rejected() {
    let mut raw = RawSettings::default();
    raw.jobs.refresh_schedule = Some("every night".to_string());

    let err = Settings::from_raw(raw).expect_err("invalid schedule");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "jobs.refresh_schedule",
            ..
        }
    ));
}

#[test]
fn zero_values_are_rejected() {
    let mut raw = RawSettings::default();
    raw.jobs.refresh_concurrency = Some(0);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "jobs.refresh_concurrency",
            ..
        })
    ));

    let mut raw = RawSettings::default();
    raw.cache.default_ttl_seconds = Some(0);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "cache.default_ttl_seconds",
            ..
        })
    ));
}

#[test]
fn source_base_url_must_be_hierarchical() {
    let mut raw = RawSettings::default();
    raw.source.base_url = Some("mailto:docs@example.com".to_string());
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "source.base_url",
            ..
        })
    ));
}

#[test]
fn configured_documents_fill_in_defaults() {
    let mut raw = RawSettings::default();
    raw.documents = Some(vec![RawDocument {
        id: "league-schedule".to_string(),
        title: Some("League Schedule".to_string()),
        source_name: None,
        container: None,
        blob_name: None,
        content_ttl_seconds: Some(3600),
    }]);

    let settings = Settings::from_raw(raw).expect("valid settings");
    let document = &settings.documents[0];
    assert_eq!(document.id.as_str(), "league-schedule");
    assert_eq!(document.source_name, "League Schedule");
    assert_eq!(document.container, "documents");
    assert_eq!(document.blob_name, "league-schedule.html");
    assert_eq!(document.content_ttl, Duration::from_secs(3600));
}

#[test]
fn duplicate_or_malformed_document_ids_are_rejected() {
    let entry = |id: &str| RawDocument {
        id: id.to_string(),
        title: None,
        source_name: None,
        container: None,
        blob_name: None,
        content_ttl_seconds: None,
    };

    let mut raw = RawSettings::default();
    raw.documents = Some(vec![entry("bylaws"), entry("bylaws")]);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "documents.id",
            ..
        })
    ));

    let mut raw = RawSettings::default();
    raw.documents = Some(vec![entry("Bylaws!")]);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "documents.id",
            ..
        })
    ));

    let mut raw = RawSettings::default();
    raw.documents = Some(Vec::new());
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid { key: "documents", .. })
    ));
}

#[test]
fn file_values_are_read_from_toml() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("pinfall.toml");
    std::fs::write(
        &path,
        r#"
[server]
port = 8088

[cache]
memory_entry_limit = 32

[jobs]
refresh_schedule = "0 30 2 * * *"

[[documents]]
id = "bylaws"
title = "Association Bylaws"
"#,
    )
    .expect("write config");

    let args = CliArgs::parse_from([
        "pinfall",
        "--config-file",
        path.to_str().expect("utf-8 path"),
        "serve",
    ]);
    let settings = load(&args).expect("settings");

    assert_eq!(settings.server.addr.port(), 8088);
    assert_eq!(settings.cache.memory_entry_limit.get(), 32);
    assert_eq!(settings.jobs.refresh_schedule, "0 30 2 * * *");
    assert_eq!(settings.documents.len(), 1);
    assert_eq!(settings.documents[0].title, "Association Bylaws");
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["pinfall"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "pinfall",
        "serve",
        "--server-port",
        "8080",
        "--cache-enabled",
        "false",
        "--jobs-refresh-schedule",
        "0 0 4 * * *",
        "--log-json",
        "true",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.server_port, Some(8080));
            assert_eq!(serve.overrides.cache_enabled, Some(false));
            assert_eq!(
                serve.overrides.jobs_refresh_schedule.as_deref(),
                Some("0 0 4 * * *")
            );
            assert_eq!(serve.overrides.shared.log_json, Some(true));
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn parse_refresh_arguments() {
    let args = CliArgs::parse_from([
        "pinfall",
        "refresh",
        "bylaws",
        "--source-base-url",
        "https://docs.example.org/library/",
    ]);

    match args.command.expect("refresh command") {
        Command::Refresh(refresh) => {
            assert_eq!(refresh.document, "bylaws");
            assert_eq!(
                refresh.overrides.source_base_url.as_deref(),
                Some("https://docs.example.org/library/")
            );
        }
        other => panic!("unexpected command: {other:?}"),
    }
}
