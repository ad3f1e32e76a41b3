use std::io::Write;

use serial_test::serial;

use super::*;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_apply_without_any_source() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.api.base_url.as_str(), "http://127.0.0.1:3000/");
    assert_eq!(settings.api.session_token, None);
    assert_eq!(settings.api.timeout, Duration::from_secs(10));
    assert_eq!(settings.cache.max_entries.get(), 500);
    assert_eq!(settings.cache.list_stale, Duration::from_secs(30));
    assert_eq!(settings.cache.notification_poll, Duration::from_secs(30));
    assert_eq!(settings.logging.level, LevelFilter::WARN);
    assert!(matches!(settings.logging.format, LogFormat::Compact));
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.api.base_url = Some("http://file.example".to_string());
    raw.logging.level = Some("info".to_string());

    let overrides = Overrides {
        api_url: Some("https://cli.example".to_string()),
        log_level: Some("debug".to_string()),
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.api.base_url.as_str(), "https://cli.example/");
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn blank_session_token_is_treated_as_absent() {
    let mut raw = RawSettings::default();
    raw.api.session_token = Some("   ".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.api.session_token, None);
}

#[test]
fn zero_capacity_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.max_entries = Some(0);
    let err = Settings::from_raw(raw).expect_err("zero capacity");
    assert!(matches!(err, LoadError::Invalid { key: "cache.max_entries", .. }));
}

#[test]
fn zero_poll_interval_is_rejected_but_zero_staleness_is_not() {
    let mut raw = RawSettings::default();
    raw.cache.post_stale_seconds = Some(0);
    let settings = Settings::from_raw(raw.clone()).expect("zero staleness allowed");
    assert_eq!(settings.cache.post_stale, Duration::ZERO);

    raw.cache.notification_poll_seconds = Some(0);
    let err = Settings::from_raw(raw).expect_err("zero poll interval");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.notification_poll_seconds",
            ..
        }
    ));
}

#[test]
fn non_http_base_url_is_rejected() {
    let mut raw = RawSettings::default();
    raw.api.base_url = Some("ftp://files.example".to_string());
    let err = Settings::from_raw(raw).expect_err("ftp scheme");
    assert!(matches!(err, LoadError::Invalid { key: "api.base_url", .. }));
}

#[test]
fn cache_settings_feed_the_cache_config() {
    let mut raw = RawSettings::default();
    raw.cache.max_entries = Some(64);
    raw.cache.comments_stale_seconds = Some(5);
    let settings = Settings::from_raw(raw).expect("valid settings");

    let config = crate::cache::CacheConfig::from(&settings.cache);
    assert_eq!(config.max_entries, 64);
    assert_eq!(config.comments_stale_secs, 5);
}

#[test]
#[serial]
fn config_file_is_layered_under_cli_flags() {
    let file = write_config(
        r#"
[api]
base_url = "https://api.devlog.example"
timeout_seconds = 3

[cache]
max_entries = 42
notification_poll_seconds = 12
"#,
    );
    let path = file.path().to_str().expect("utf-8 path").to_string();
    let args = CliArgs::parse_from([
        "devlog",
        "--config-file",
        path.as_str(),
        "--notification-poll-seconds",
        "7",
        "saved",
    ]);

    let settings = load(&args).expect("settings");

    assert_eq!(settings.api.base_url.as_str(), "https://api.devlog.example/");
    assert_eq!(settings.api.timeout, Duration::from_secs(3));
    assert_eq!(settings.cache.max_entries.get(), 42);
    assert_eq!(settings.cache.notification_poll, Duration::from_secs(7));
}

#[test]
fn parse_feed_arguments() {
    let author = uuid::Uuid::new_v4();
    let author_arg = author.to_string();
    let args = CliArgs::parse_from([
        "devlog",
        "feed",
        "--tag",
        "rust",
        "--tag",
        "async",
        "--search",
        "borrow checker",
        "--author",
        author_arg.as_str(),
    ]);

    match args.command {
        Command::Feed(feed) => {
            assert_eq!(feed.tags, vec!["rust".to_string(), "async".to_string()]);
            assert_eq!(feed.search.as_deref(), Some("borrow checker"));
            assert_eq!(feed.author, Some(author));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_comment_reaction_and_global_flags() {
    let id = uuid::Uuid::new_v4();
    let id_arg = id.to_string();
    let args = CliArgs::parse_from([
        "devlog",
        "like",
        id_arg.as_str(),
        "--comment",
        "--log-json",
        "true",
    ]);

    assert_eq!(args.overrides.log_json, Some(true));
    match args.command {
        Command::Like(reaction) => {
            assert_eq!(reaction.id, id);
            assert!(reaction.comment);
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_notifications_flags() {
    let args = CliArgs::parse_from(["devlog", "notifications", "--mark-all-read"]);
    match args.command {
        Command::Notifications(notifications) => {
            assert!(notifications.mark_all_read);
            assert!(!notifications.watch);
        }
        _ => panic!("wrong command parsed"),
    }
}
