use ampwise::logging::{LogContext, get_logger, get_logger_with_context, level_rank, min_level, parse_log_level};
use tracing::Level;

#[test]
fn parse_accepts_python_style_names() {
    assert_eq!(parse_log_level("WARNING").unwrap(), Level::WARN);
    assert_eq!(parse_log_level("trace").unwrap(), Level::TRACE);
    assert!(parse_log_level("loud").is_err());
}

#[test]
fn min_level_picks_the_more_verbose() {
    assert_eq!(min_level(Level::INFO, Level::DEBUG), Level::DEBUG);
    assert_eq!(min_level(Level::ERROR, Level::WARN), Level::WARN);
    assert!(level_rank(Level::TRACE) < level_rank(Level::ERROR));
}

#[test]
fn component_loggers_carry_context() {
    let logger = get_logger("solar_surplus");
    assert_eq!(logger.component(), "solar_surplus");

    let ctx = LogContext::new("sequencer").with_field("charger", "wallbox".to_string());
    let logger = get_logger_with_context(ctx);
    assert_eq!(logger.component(), "sequencer");
    // Emitting without an installed subscriber must not panic
    logger.info("sequencer ready");
    logger.with_field("op", "stop".to_string()).debug("queued");
}
