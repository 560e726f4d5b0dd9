use dirwatch::Settings;
use std::env;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_env_overrides_file_and_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let original_dir = env::current_dir().unwrap();
    env::set_current_dir(&temp_dir).unwrap();

    let config_dir = temp_dir.path().join(".dirwatch");
    fs::create_dir_all(&config_dir).unwrap();
    fs::write(
        config_dir.join("settings.toml"),
        r#"
[watch]
recursive = true
ignore_patterns = ["*.log"]

[logging]
default = "info"
"#,
    )
    .unwrap();

    unsafe {
        // Double underscore separates nested levels
        env::set_var("DIRWATCH_WATCH__RECURSIVE", "false");
        env::set_var("DIRWATCH_LOGGING__DEFAULT", "debug");
    }

    let settings = Settings::load().unwrap();

    // Environment beats the file
    assert!(!settings.watch.recursive);
    assert_eq!(settings.logging.default, "debug");
    // File value used where no env var is set
    assert_eq!(settings.watch.ignore_patterns, vec!["*.log"]);
    // Defaults fill the rest
    assert_eq!(settings.version, 1);

    unsafe {
        env::remove_var("DIRWATCH_WATCH__RECURSIVE");
        env::remove_var("DIRWATCH_LOGGING__DEFAULT");
    }
    env::set_current_dir(original_dir).unwrap();
}
