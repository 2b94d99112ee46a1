use env_logger::{Builder, Target};
use log::{LevelFilter, SetLoggerError};

/// Builds the console logger from a `RUST_LOG` value, falling back to info
/// level. The second value is a warning to log once the logger is installed.
fn console_builder(rust_log: Option<&str>, debug: bool) -> (Builder, Option<String>) {
    let mut builder = Builder::new();
    builder
        .target(Target::Stderr)
        .format_timestamp_millis()
        .filter_level(LevelFilter::Info);
    let mut warning = None;

    if let Some(spec) = rust_log.filter(|spec| !spec.trim().is_empty()) {
        // env_logger accepts anything; validate first so a typo is reported
        match env_filter::Builder::new().try_parse(spec) {
            Ok(_) => {
                builder.parse_filters(spec);
            }
            Err(err) => {
                warning = Some(format!(
                    "Ignoring invalid RUST_LOG value '{}': {}. Falling back to info-level console logging",
                    spec, err
                ));
            }
        }
    }

    if debug {
        builder.filter_level(LevelFilter::Debug);
    }

    (builder, warning)
}

/// Installs the console logger. Logs go to stderr so stdout stays free for
/// session output.
pub fn init_logging(debug: bool) -> Result<(), SetLoggerError> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let (mut builder, warning) = console_builder(rust_log.as_deref(), debug);
    builder.try_init()?;

    if let Some(warning) = warning {
        log::warn!("{}", warning);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_info() {
        let (mut builder, warning) = console_builder(None, false);
        assert_eq!(builder.build().filter(), LevelFilter::Info);
        assert!(warning.is_none());
    }

    #[test]
    fn debug_flag_raises_level() {
        let (mut builder, _) = console_builder(Some("warn"), true);
        assert_eq!(builder.build().filter(), LevelFilter::Debug);
    }

    #[test]
    fn rust_log_is_honoured() {
        let (mut builder, warning) = console_builder(Some("warn"), false);
        assert_eq!(builder.build().filter(), LevelFilter::Warn);
        assert!(warning.is_none());
    }

    #[test]
    fn invalid_rust_log_falls_back_with_warning() {
        let (mut builder, warning) = console_builder(Some("cuepartner=loud"), false);
        assert_eq!(builder.build().filter(), LevelFilter::Info);
        assert!(warning.unwrap().contains("cuepartner=loud"));
    }
}
