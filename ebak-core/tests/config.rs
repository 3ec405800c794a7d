use ebak_core::config::{default_concurrency, staging_threshold, EngineConfig, GIB, MIB};

#[test]
fn concurrency_is_twice_cpus_clamped() {
    assert_eq!(default_concurrency(0), 2);
    assert_eq!(default_concurrency(1), 2);
    assert_eq!(default_concurrency(4), 8);
    assert_eq!(default_concurrency(8), 16);
    assert_eq!(default_concurrency(64), 16);
}

#[test]
fn staging_threshold_bounds() {
    // tiny host: floor wins
    assert_eq!(staging_threshold(32 * MIB, 100 * MIB), 64 * MIB);
    // 15% of total is the binding term
    let t = staging_threshold(8 * GIB, 10 * GIB);
    assert!(t.abs_diff(10 * GIB * 15 / 100) <= 1, "got {}", t);
    // half of available is the binding term
    assert_eq!(staging_threshold(2 * GIB, 64 * GIB), GIB);
    // huge host: cap wins
    assert_eq!(staging_threshold(512 * GIB, 1024 * GIB), 4 * GIB);
}

#[test]
fn builders_override_defaults() {
    let cfg = EngineConfig::default()
        .with_concurrency(0)
        .with_max_episode_bytes(0)
        .with_max_total_bytes(10)
        .with_exclude(["*.tmp", "cache/**"]);
    assert_eq!(cfg.concurrency, 1);
    assert_eq!(cfg.max_episode_bytes, 1);
    assert_eq!(cfg.max_total_bytes, 10);
    assert_eq!(cfg.exclude, vec!["*.tmp".to_string(), "cache/**".to_string()]);
}

#[test]
fn detected_config_is_in_range() {
    let cfg = EngineConfig::detect();
    assert!((2..=16).contains(&cfg.concurrency));
    assert!(cfg.small_file_threshold_bytes >= 64 * MIB);
    assert!(cfg.small_file_threshold_bytes <= 4 * GIB);
}
