//! Tracing subscriber setup for the binary.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_FILTER: &str = "screening_harness=info,screening=info";

/// Install a stderr subscriber.
///
/// Filter precedence: `RUST_LOG`, then `SCREENING_LOG`, then `level`
/// (a bare level applies to this crate only), then the default.
pub fn init_tracing(level: Option<&str>, log_json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_from_env("SCREENING_LOG"))
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(level)));

    let registry = tracing_subscriber::registry().with(filter);

    if log_json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    }

    Ok(())
}

fn filter_directive(level: Option<&str>) -> String {
    match level {
        None => DEFAULT_FILTER.to_string(),
        Some(level) if level.contains('=') => level.to_string(),
        Some(level) => format!("screening_harness={level},screening={level}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_level_is_scoped_to_crate() {
        assert_eq!(
            filter_directive(Some("debug")),
            "screening_harness=debug,screening=debug"
        );
        assert_eq!(filter_directive(Some("tower_http=trace")), "tower_http=trace");
        assert_eq!(filter_directive(None), DEFAULT_FILTER);
    }
}
