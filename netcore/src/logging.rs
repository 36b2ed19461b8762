use sloggers::Config;

/// Builds the process-wide logger, grounded on `flux::logging::init()` in the
/// teacher. Unlike the teacher (which builds and immediately drops the
/// logger), this returns it: every closed connection and process-fatal
/// error logs through it, per §7's "every closed connection emits one
/// structured log line" requirement.
pub fn init() -> slog::Logger {
    init_with_config(default_config_toml())
}

/// Builds a logger from caller-supplied `sloggers` TOML, falling back to the
/// terminal/debug/stderr default on any parse or build failure rather than
/// panicking, since a logging misconfiguration should never be what takes
/// the server down.
pub fn init_with_config(toml: &str) -> slog::Logger {
    let config: Result<sloggers::LoggerConfig, _> = serdeconv::from_toml_str(toml);
    let logger = config.ok().and_then(|c| c.build_logger().ok());
    logger.unwrap_or_else(|| {
        let fallback: sloggers::LoggerConfig =
            serdeconv::from_toml_str(default_config_toml()).expect("built-in logger config is valid");
        fallback.build_logger().expect("built-in logger config always builds")
    })
}

fn default_config_toml() -> &'static str {
    r#"
type = "terminal"
level = "info"
destination = "stderr"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use slog::info;

    #[test]
    fn default_logger_builds_and_can_log() {
        let logger = init();
        info!(logger, "smoke test"; "module" => "logging");
    }

    #[test]
    fn malformed_config_falls_back_to_default() {
        let logger = init_with_config("not valid toml {{{");
        info!(logger, "still logs after falling back");
    }
}
