use super::*;
use serial_test::serial;

fn clear_env() {
    for key in [
        "BRAIN_API_URL",
        "RUNNER_POLL_INTERVAL",
        "RUNNER_TASK_POLL_INTERVAL",
        "RUNNER_MAX_PARALLEL",
        "RUNNER_MAX_TOTAL_PROCESSES",
        "RUNNER_MEMORY_THRESHOLD",
        "RUNNER_IDLE_THRESHOLD",
        "RUNNER_STATE_DIR",
        "RUNNER_LOG_DIR",
        "RUNNER_WORK_DIR",
        "RUNNER_API_TIMEOUT",
        "RUNNER_TASK_TIMEOUT",
        "DEBUG",
        "XDG_STATE_HOME",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
#[serial]
fn from_env_applies_documented_defaults() {
    clear_env();
    let config = RunnerConfig::from_env().expect("defaults validate");
    assert_eq!(config.brain_api_url, "http://localhost:3333");
    assert_eq!(config.poll_interval, Duration::from_secs(30));
    assert_eq!(config.task_poll_interval, Duration::from_secs(5));
    assert_eq!(config.max_parallel, 2);
    assert_eq!(config.max_total_processes, 10);
    assert_eq!(config.memory_threshold_percent, 10);
    assert_eq!(config.idle_threshold_ms, 60_000);
    assert_eq!(config.api_timeout, Duration::from_millis(5_000));
    assert_eq!(config.task_timeout_ms, 1_800_000);
    assert!(!config.debug);
}

#[test]
#[serial]
fn from_env_reads_overrides() {
    clear_env();
    std::env::set_var("RUNNER_MAX_PARALLEL", "4");
    std::env::set_var("RUNNER_MAX_TOTAL_PROCESSES", "8");
    std::env::set_var("DEBUG", "1");
    let config = RunnerConfig::from_env().expect("overrides validate");
    assert_eq!(config.max_parallel, 4);
    assert_eq!(config.max_total_processes, 8);
    assert!(config.debug);
    clear_env();
}

#[test]
#[serial]
fn from_env_rejects_non_integer_value() {
    clear_env();
    std::env::set_var("RUNNER_MAX_PARALLEL", "not-a-number");
    let error = RunnerConfig::from_env().expect_err("non-integer must fail");
    assert!(matches!(error, ConfigError::NotAnInteger { name: "RUNNER_MAX_PARALLEL", .. }));
    clear_env();
}

#[test]
fn validate_rejects_max_parallel_out_of_range() {
    let mut config = base_config();
    config.max_parallel = 0;
    assert_eq!(config.validate(), Err(ConfigError::MaxParallelOutOfRange(0)));

    config.max_parallel = 101;
    assert_eq!(config.validate(), Err(ConfigError::MaxParallelOutOfRange(101)));
}

#[test]
fn validate_rejects_max_total_processes_below_max_parallel() {
    let mut config = base_config();
    config.max_parallel = 5;
    config.max_total_processes = 4;
    assert_eq!(
        config.validate(),
        Err(ConfigError::MaxTotalProcessesBelowMaxParallel {
            max_total_processes: 4,
            max_parallel: 5,
        })
    );
}

#[test]
fn validate_rejects_memory_threshold_above_100() {
    let mut config = base_config();
    config.memory_threshold_percent = 101;
    assert_eq!(config.validate(), Err(ConfigError::MemoryThresholdOutOfRange(101)));
}

#[test]
fn validate_rejects_sub_second_intervals() {
    let mut config = base_config();
    config.poll_interval = Duration::from_millis(0);
    assert_eq!(config.validate(), Err(ConfigError::PollIntervalTooSmall(0)));

    let mut config = base_config();
    config.task_poll_interval = Duration::from_millis(0);
    assert_eq!(config.validate(), Err(ConfigError::TaskPollIntervalTooSmall(0)));
}

#[test]
fn validate_accepts_documented_defaults() {
    assert_eq!(base_config().validate(), Ok(()));
}

fn base_config() -> RunnerConfig {
    RunnerConfig {
        brain_api_url: "http://localhost:3333".to_string(),
        poll_interval: Duration::from_secs(30),
        task_poll_interval: Duration::from_secs(5),
        max_parallel: 2,
        max_total_processes: 10,
        memory_threshold_percent: 10,
        idle_threshold_ms: 60_000,
        state_dir: PathBuf::from("/tmp/oj-runner/state"),
        log_dir: PathBuf::from("/tmp/oj-runner/logs"),
        work_dir: PathBuf::from("/tmp/oj-runner/work"),
        api_timeout: Duration::from_millis(5_000),
        task_timeout_ms: 1_800_000,
        debug: false,
    }
}
