use std::path::PathBuf;

use clap::{ArgAction, Parser};

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_sampling_value(value: &str) -> Result<f32, String> {
    let parsed = value
        .parse::<f32>()
        .map_err(|error| format!("failed to parse float: {error}"))?;
    if !parsed.is_finite() || !(-2.0..=2.0).contains(&parsed) {
        return Err("value must be a finite number in range -2.0..=2.0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "parley",
    about = "Mention-triggered conversation bot for NodeBB forums",
    version
)]
pub struct Cli {
    #[arg(
        long,
        env = "PARLEY_MODEL",
        default_value = "gpt-4o-mini",
        help = "Model name sent to the completion service"
    )]
    pub model: String,

    #[arg(
        long,
        env = "PARLEY_API_BASE",
        default_value = "https://api.openai.com/v1",
        help = "Base URL of the OpenAI-compatible completion API"
    )]
    pub api_base: String,

    #[arg(
        long,
        env = "PARLEY_API_KEY",
        hide_env_values = true,
        help = "API key for the completion service (falls back to OPENAI_API_KEY)"
    )]
    pub api_key: Option<String>,

    #[arg(
        long = "character-limit",
        env = "PARLEY_CHARACTER_LIMIT",
        default_value_t = 25_000,
        value_parser = parse_positive_usize,
        help = "Maximum characters of thread history forwarded to the model"
    )]
    pub character_limit: usize,

    #[arg(
        long = "min-messages",
        env = "PARLEY_MIN_MESSAGES",
        default_value_t = 5,
        help = "Minimum number of messages kept regardless of the character limit"
    )]
    pub min_messages: usize,

    #[arg(
        long = "post-limit",
        env = "PARLEY_POST_LIMIT",
        default_value_t = 100,
        value_parser = parse_positive_usize,
        help = "Maximum recent posts read from a topic per run"
    )]
    pub post_limit: usize,

    #[arg(
        long,
        env = "PARLEY_TEMPERATURE",
        default_value_t = 0.7,
        value_parser = parse_sampling_value,
        help = "Sampling temperature"
    )]
    pub temperature: f32,

    #[arg(
        long = "presence-penalty",
        env = "PARLEY_PRESENCE_PENALTY",
        default_value_t = 0.0,
        value_parser = parse_sampling_value,
        help = "Presence penalty"
    )]
    pub presence_penalty: f32,

    #[arg(
        long = "max-tokens",
        env = "PARLEY_MAX_TOKENS",
        help = "Optional cap on generated tokens per reply"
    )]
    pub max_tokens: Option<u32>,

    #[arg(
        long = "completion-timeout-ms",
        env = "PARLEY_COMPLETION_TIMEOUT_MS",
        default_value_t = 120_000,
        value_parser = parse_positive_u64,
        help = "Upper bound on a single completion, including transport retries"
    )]
    pub completion_timeout_ms: u64,

    #[arg(
        long = "request-timeout-ms",
        env = "PARLEY_REQUEST_TIMEOUT_MS",
        default_value_t = 60_000,
        value_parser = parse_positive_u64,
        help = "Per-request HTTP timeout for forum and completion calls"
    )]
    pub request_timeout_ms: u64,

    #[arg(
        long = "provider-max-retries",
        env = "PARLEY_PROVIDER_MAX_RETRIES",
        default_value_t = 2,
        help = "Retries for retryable completion-service failures"
    )]
    pub provider_max_retries: usize,

    #[arg(
        long = "forum-base-url",
        env = "PARLEY_FORUM_BASE_URL",
        help = "Base URL of the NodeBB forum"
    )]
    pub forum_base_url: String,

    #[arg(
        long = "forum-token",
        env = "PARLEY_FORUM_TOKEN",
        hide_env_values = true,
        help = "NodeBB API bearer token of the bot account"
    )]
    pub forum_token: String,

    #[arg(
        long = "forum-retry-max-attempts",
        env = "PARLEY_FORUM_RETRY_MAX_ATTEMPTS",
        default_value_t = 4,
        value_parser = parse_positive_usize,
        help = "Maximum attempts for retryable forum api failures (429/5xx/transport)"
    )]
    pub forum_retry_max_attempts: usize,

    #[arg(
        long = "forum-min-request-interval-ms",
        env = "PARLEY_FORUM_MIN_REQUEST_INTERVAL_MS",
        default_value_t = 0,
        help = "Minimum gap between forum requests; a longer robots.txt Crawl-delay wins"
    )]
    pub forum_min_request_interval_ms: u64,

    #[arg(
        long = "bot-username",
        env = "PARLEY_BOT_USERNAME",
        default_value = "parley",
        help = "Forum username of the bot; its posts become assistant messages"
    )]
    pub bot_username: String,

    #[arg(
        long = "default-instruction",
        env = "PARLEY_DEFAULT_INSTRUCTION",
        conflicts_with = "default_instruction_file",
        help = "System instruction used for topics without an override"
    )]
    pub default_instruction: Option<String>,

    #[arg(
        long = "default-instruction-file",
        env = "PARLEY_DEFAULT_INSTRUCTION_FILE",
        help = "Read the default system instruction from this file"
    )]
    pub default_instruction_file: Option<PathBuf>,

    #[arg(
        long = "state-dir",
        env = "PARLEY_STATE_DIR",
        default_value = ".parley",
        help = "Directory for topic instruction overrides and the bridge checkpoint"
    )]
    pub state_dir: PathBuf,

    #[arg(
        long = "poll-interval-ms",
        env = "PARLEY_POLL_INTERVAL_MS",
        default_value_t = 60_000,
        value_parser = parse_positive_u64,
        help = "Delay between notification polls"
    )]
    pub poll_interval_ms: u64,

    #[arg(
        long = "poll-once",
        env = "PARLEY_POLL_ONCE",
        default_value_t = false,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "Run one poll cycle, wait for its runs, and exit"
    )]
    pub poll_once: bool,

    #[arg(
        long = "processed-notification-cap",
        env = "PARLEY_PROCESSED_NOTIFICATION_CAP",
        default_value_t = 10_000,
        value_parser = parse_positive_usize,
        help = "Maximum processed notification ids kept for duplicate protection"
    )]
    pub processed_notification_cap: usize,

    #[arg(
        long = "max-concurrent-runs",
        env = "PARLEY_MAX_CONCURRENT_RUNS",
        default_value_t = 4,
        value_parser = parse_positive_usize,
        help = "Maximum mention runs executing at once"
    )]
    pub max_concurrent_runs: usize,

    #[arg(
        long = "reply-max-chars",
        env = "PARLEY_REPLY_MAX_CHARS",
        default_value_t = 32_000,
        value_parser = parse_positive_usize,
        help = "Replies longer than this are truncated before posting"
    )]
    pub reply_max_chars: usize,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::Cli;

    const REQUIRED: [&str; 5] = [
        "parley",
        "--forum-base-url",
        "https://forum.example",
        "--forum-token",
        "token",
    ];

    #[test]
    fn unit_cli_defaults_match_documented_values() {
        let cli = Cli::try_parse_from(REQUIRED).expect("parse");
        assert_eq!(cli.character_limit, 25_000);
        assert_eq!(cli.min_messages, 5);
        assert_eq!(cli.post_limit, 100);
        assert_eq!(cli.temperature, 0.7);
        assert_eq!(cli.presence_penalty, 0.0);
        assert_eq!(cli.completion_timeout_ms, 120_000);
        assert_eq!(cli.poll_interval_ms, 60_000);
        assert!(!cli.poll_once);
        assert_eq!(cli.forum_min_request_interval_ms, 0);
        assert_eq!(cli.state_dir, std::path::PathBuf::from(".parley"));
    }

    #[test]
    fn functional_poll_once_flag_accepts_bare_form() {
        let mut args = REQUIRED.to_vec();
        args.push("--poll-once");
        let cli = Cli::try_parse_from(args).expect("parse");
        assert!(cli.poll_once);
    }

    #[test]
    fn functional_forum_request_interval_flag_is_parsed() {
        let mut args = REQUIRED.to_vec();
        args.extend(["--forum-min-request-interval-ms", "1500"]);
        let cli = Cli::try_parse_from(args).expect("parse");
        assert_eq!(cli.forum_min_request_interval_ms, 1_500);
    }

    #[test]
    fn regression_zero_limits_are_rejected() {
        let mut args = REQUIRED.to_vec();
        args.extend(["--post-limit", "0"]);
        assert!(Cli::try_parse_from(args).is_err());

        let mut args = REQUIRED.to_vec();
        args.extend(["--temperature", "3.5"]);
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn unit_default_instruction_sources_conflict() {
        let mut args = REQUIRED.to_vec();
        args.extend([
            "--default-instruction",
            "Be terse.",
            "--default-instruction-file",
            "instruction.txt",
        ]);
        assert!(Cli::try_parse_from(args).is_err());
    }
}
