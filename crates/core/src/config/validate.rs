use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Default concurrency is at least 1
/// - Event buffer is not 0
/// - ffmpeg log level still prints `volumedetect` output when levels are measured
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    // Server validation
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    // Coordinator validation
    if config.coordinator.max_concurrent_transcodes == 0 {
        return Err(ConfigError::ValidationError(
            "coordinator.max_concurrent_transcodes must be at least 1".to_string(),
        ));
    }
    if config.coordinator.event_buffer == 0 {
        return Err(ConfigError::ValidationError(
            "coordinator.event_buffer cannot be 0".to_string(),
        ));
    }

    // Transcoder validation
    if config.transcoder.measure_level && !config.transcoder.log_level_reports_volume() {
        return Err(ConfigError::ValidationError(format!(
            "transcoder.ffmpeg_log_level \"{}\" hides volume measurements; use \"info\" or disable measure_level",
            config.transcoder.ffmpeg_log_level
        )));
    }

    Ok(())
}
