use crate::config::Config;
use crate::domain::errors::ConfigError;
use std::env;
use std::sync::Mutex;
use std::sync::OnceLock;
use std::time::Duration;

// Global lock to prevent race conditions when modifying environment variables in tests
static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn get_env_lock() -> &'static Mutex<()> {
    ENV_LOCK.get_or_init(|| Mutex::new(()))
}

const SUBMISSION_URL: &str = "http://127.0.0.1:56104/blah/blah";

fn with_url() -> Config {
    Config::with_submission_url(SUBMISSION_URL)
}

#[test]
fn test_config_from_env() {
    let _guard = get_env_lock().lock().unwrap();
    // SAFETY: env mutation is serialized by ENV_LOCK
    unsafe {
        env::set_var("TRAPMETRICS_SUBMISSION_URL", SUBMISSION_URL);
        env::set_var("TRAPMETRICS_INTERVAL", "30s");
        env::set_var("TRAPMETRICS_RESET_GAUGES", "1");
        env::set_var("TRAPMETRICS_CHECK_TAGS", "env:prod, team:core");
        env::set_var("TRAPMETRICS_METRIC_FILTERS", r#"[["allow","^.+$",""]]"#);
    }

    let settings = Config::from_env().unwrap().validate().unwrap();

    assert_eq!(settings.interval, Duration::from_secs(30));
    assert!(settings.reset.gauges);
    assert_eq!(settings.check.tags, vec!["env:prod", "team:core"]);
    assert!(settings.check.uses_metric_rules());

    // Cleanup
    unsafe {
        env::remove_var("TRAPMETRICS_SUBMISSION_URL");
        env::remove_var("TRAPMETRICS_INTERVAL");
        env::remove_var("TRAPMETRICS_RESET_GAUGES");
        env::remove_var("TRAPMETRICS_CHECK_TAGS");
        env::remove_var("TRAPMETRICS_METRIC_FILTERS");
    }
}

#[test]
fn test_config_from_env_bad_filters() {
    let _guard = get_env_lock().lock().unwrap();
    unsafe {
        env::set_var("TRAPMETRICS_METRIC_FILTERS", "allow everything");
    }

    assert!(matches!(Config::from_env(), Err(ConfigError::Parse(_))));

    unsafe {
        env::remove_var("TRAPMETRICS_METRIC_FILTERS");
    }
}

#[test]
fn test_config_from_toml() {
    let raw = r#"
        [flush]
        interval = "1m30s"
        reset_counters = "false"
        debug = "true"

        [check]
        api_token = "abc123"
        target = "web01"
        tags = ["env:prod"]
        metric_filters = [["allow", "^.+$", ""]]
    "#;

    let settings = Config::from_toml_str(raw).unwrap().validate().unwrap();

    assert_eq!(settings.interval, Duration::from_secs(90));
    assert!(!settings.reset.counters);
    assert!(settings.debug);
    assert_eq!(settings.check.target, "web01");
    assert!(settings.check.submission_url.is_none());
    assert!(settings.check.api.is_some());
}

#[test]
fn test_config_toml_syntax_error() {
    assert!(matches!(
        Config::from_toml_str("[flush\ninterval = 3"),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn test_no_api_token_no_submission_url() {
    let err = Config::default().validate().unwrap_err();
    assert_eq!(
        err.to_string(),
        "invalid check manager configuration (no API token AND no submission url)"
    );
}

#[test]
fn test_flush_interval() {
    let mut good = with_url();
    good.flush.interval = "30s".to_string();
    assert_eq!(good.validate().unwrap().interval, Duration::from_secs(30));

    let mut bad = with_url();
    bad.flush.interval = "thirty seconds".to_string();
    assert!(matches!(
        bad.validate(),
        Err(ConfigError::InvalidDuration { option: "interval", .. })
    ));
}

#[test]
fn test_reset_flags_accept_true_and_one() {
    for value in ["true", "1"] {
        let mut config = with_url();
        config.flush.reset_counters = value.to_string();
        config.flush.reset_gauges = value.to_string();
        config.flush.reset_histograms = value.to_string();
        config.flush.reset_text = value.to_string();

        let reset = config.validate().unwrap().reset;
        assert!(reset.counters && reset.gauges && reset.histograms && reset.text);
    }
}

#[test]
fn test_debug_from_env_rejects_yes() {
    let _guard = get_env_lock().lock().unwrap();
    unsafe {
        env::set_var("TRAPMETRICS_SUBMISSION_URL", SUBMISSION_URL);
        env::set_var("TRAPMETRICS_DEBUG", "yes");
    }

    let result = Config::from_env().unwrap().validate();
    assert_eq!(
        result,
        Err(ConfigError::InvalidBool {
            option: "debug",
            value: "yes".to_string()
        })
    );

    unsafe {
        env::remove_var("TRAPMETRICS_SUBMISSION_URL");
        env::remove_var("TRAPMETRICS_DEBUG");
    }
}

#[test]
fn test_reset_flags_reject_yes() {
    let options: [(&str, fn(&mut Config)); 4] = [
        ("reset_counters", |c| c.flush.reset_counters = "yes".to_string()),
        ("reset_gauges", |c| c.flush.reset_gauges = "yes".to_string()),
        ("reset_histograms", |c| c.flush.reset_histograms = "yes".to_string()),
        ("reset_text", |c| c.flush.reset_text = "yes".to_string()),
    ];

    for (option, apply) in options {
        let mut config = with_url();
        apply(&mut config);
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidBool {
                option,
                value: "yes".to_string()
            })
        );
    }
}
