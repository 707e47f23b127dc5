use takoden::config::LoggingConfig;
use takoden::logging::{LogContext, StructuredLogger, get_logger, init_logging};

#[test]
fn init_and_log_through_structured_logger() {
    let tmp_dir = tempfile::tempdir().unwrap();

    let config = LoggingConfig {
        file: tmp_dir
            .path()
            .join("takoden.log")
            .to_string_lossy()
            .into_owned(),
        ..LoggingConfig::default()
    };
    init_logging(&config).unwrap();

    let logger = get_logger("test");
    logger.info("info line");
    logger.debug("debug line");
    logger.warn("warn line");
    logger.error("error line");

    let contextual = StructuredLogger::new(
        LogContext::new("poller")
            .with_account_number("A-1".to_string())
            .with_field("cycle", "1".to_string()),
    );
    contextual.info("cycle started");
}
