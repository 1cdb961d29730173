use clap::Parser;

pub const DEFAULT_URL: &str = "ws://localhost:10000/dashboard";
pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "cdash-dashboard", about = "Terminal dashboard for remote instances")]
pub struct Args {
    /// WebSocket endpoint of the instance server.
    #[arg(long, default_value = "")]
    pub url: String,
    #[arg(long, default_value = "")]
    pub log_dir: String,
    #[arg(long, default_value_t = false)]
    pub debug: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub url: String,
    pub log_dir: Option<String>,
    pub log_level: String,
    pub log_stdout: bool,
}

pub fn load_config(args: &Args) -> Config {
    resolve_config(args, |key| std::env::var(key).ok())
}

/// Flag first, then environment, then default.
pub fn resolve_config<F>(args: &Args, env: F) -> Config
where
    F: Fn(&str) -> Option<String>,
{
    Config {
        url: resolve_url(&args.url, env("CDASH_URL")),
        log_dir: resolve_log_dir(&args.log_dir, env("CDASH_LOG_DIR")),
        log_level: resolve_log_level(args.debug, env("CDASH_LOG_LEVEL")),
        log_stdout: env("CDASH_LOG_STDOUT")
            .and_then(|value| parse_bool_flag(&value))
            .unwrap_or(false),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn resolve_url(flag: &str, env: Option<String>) -> String {
    if !flag.trim().is_empty() {
        return flag.trim().to_string();
    }
    non_blank(env)
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|| DEFAULT_URL.to_string())
}

fn resolve_log_dir(flag: &str, env: Option<String>) -> Option<String> {
    if !flag.trim().is_empty() {
        return Some(flag.to_string());
    }
    non_blank(env)
}

fn resolve_log_level(debug: bool, env: Option<String>) -> String {
    if debug {
        return "debug".to_string();
    }
    non_blank(env).unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string())
}

pub fn parse_bool_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_without_flags_or_env() {
        let config = resolve_config(&Args::default(), env_from(&[]));
        assert_eq!(config.url, DEFAULT_URL);
        assert_eq!(config.log_dir, None);
        assert_eq!(config.log_level, "info");
        assert!(!config.log_stdout);
    }

    #[test]
    fn flag_wins_over_env() {
        let args = Args {
            url: "ws://flag:1/dashboard".to_string(),
            log_dir: "/tmp/flag".to_string(),
            debug: true,
        };
        let env = env_from(&[
            ("CDASH_URL", "ws://env:2/dashboard"),
            ("CDASH_LOG_DIR", "/tmp/env"),
            ("CDASH_LOG_LEVEL", "warn"),
        ]);
        let config = resolve_config(&args, env);
        assert_eq!(config.url, "ws://flag:1/dashboard");
        assert_eq!(config.log_dir.as_deref(), Some("/tmp/flag"));
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn env_fills_blank_flags() {
        let env = env_from(&[
            ("CDASH_URL", " wss://env:2/dashboard "),
            ("CDASH_LOG_DIR", "   "),
            ("CDASH_LOG_LEVEL", "warn"),
            ("CDASH_LOG_STDOUT", "YES"),
        ]);
        let config = resolve_config(&Args::default(), env);
        assert_eq!(config.url, "wss://env:2/dashboard");
        assert_eq!(config.log_dir, None);
        assert_eq!(config.log_level, "warn");
        assert!(config.log_stdout);
    }

    #[test]
    fn parse_bool_flag_accepts_common_spellings() {
        assert_eq!(parse_bool_flag("1"), Some(true));
        assert_eq!(parse_bool_flag(" On "), Some(true));
        assert_eq!(parse_bool_flag("off"), Some(false));
        assert_eq!(parse_bool_flag("NO"), Some(false));
        assert_eq!(parse_bool_flag("maybe"), None);
    }
}
