use clap::{Arg, Command};
use floodgate::action::{ActionConfig, ActionEngine, PlatformAdapter, PlatformError};
use floodgate::backpressure::BackpressureController;
use floodgate::cache::CacheService;
use floodgate::collectors::ContentCollector;
use floodgate::network::{NetworkAnalyzer, NoopSimilarityProvider};
use floodgate::pipeline::{MessagePipeline, PipelineOutcome};
use floodgate::rate_limiter::AdaptiveRateLimiter;
use floodgate::scorer::RiskScorer;
use floodgate::store::MemoryStore;
use floodgate::types::{GroupKind, JoinEvent, MessageContext, SenderProfile};
use floodgate::FloodgateConfig;
use log::LevelFilter;
use std::process;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() {
    let matches = Command::new("floodgate")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Risk scoring and admission control for group messaging")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("/etc/floodgate.yaml"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("test-config")
                .long("test-config")
                .help("Validate configuration and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("demo")
                .long("demo")
                .help("Run sample traffic through the pipeline against an in-memory store")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        generate_default_config(generate_path);
        return;
    }

    let config_path = matches.get_one::<String>("config").unwrap();
    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            process::exit(1);
        }
    };

    if matches.get_flag("test-config") {
        match config.validate() {
            Ok(()) => {
                println!("Configuration valid.");
                println!(
                    "  rate limit: {}/user per {}s, {}/group per {}s",
                    config.rate_limit.user_limit,
                    config.rate_limit.user_window_secs,
                    config.rate_limit.group_limit,
                    config.rate_limit.group_window_secs
                );
                println!(
                    "  public thresholds: flag {} / restrict {} / ban {}",
                    config.scoring.thresholds_public.flag_min,
                    config.scoring.thresholds_public.restrict_min,
                    config.scoring.thresholds_public.ban_min
                );
                println!("  max concurrent messages: {}", config.backpressure.max_concurrent);
            }
            Err(e) => {
                eprintln!("Configuration invalid: {e}");
                process::exit(1);
            }
        }
        return;
    }

    if matches.get_flag("demo") {
        run_demo(config).await;
        return;
    }

    println!("floodgate is a library; embed MessagePipeline behind your platform's");
    println!("event source, or run with --demo to exercise the pipeline against an");
    println!("in-memory store.");
}

fn load_config(path: &str) -> anyhow::Result<FloodgateConfig> {
    if std::path::Path::new(path).exists() {
        FloodgateConfig::from_file(path)
    } else {
        log::warn!("Configuration file '{path}' not found, using default configuration");
        Ok(FloodgateConfig::default())
    }
}

fn generate_default_config(path: &str) {
    let config = FloodgateConfig::default();
    match config.to_file(path) {
        Ok(()) => {
            println!("Default configuration written to: {path}");
            println!("Please edit the configuration file to suit your needs.");
        }
        Err(e) => {
            eprintln!("Error writing configuration file: {e}");
            process::exit(1);
        }
    }
}

/// Adapter that logs what a real platform integration would do.
struct LoggingAdapter;

#[async_trait::async_trait]
impl PlatformAdapter for LoggingAdapter {
    async fn delete_message(&self, group: i64, message: i64) -> Result<(), PlatformError> {
        log::info!("[platform] delete message {message} in group {group}");
        Ok(())
    }

    async fn restrict_user(
        &self,
        group: i64,
        user: i64,
        duration: Duration,
    ) -> Result<(), PlatformError> {
        log::info!(
            "[platform] restrict user {user} in group {group} for {}s",
            duration.as_secs()
        );
        Ok(())
    }

    async fn ban_user(&self, group: i64, user: i64) -> Result<(), PlatformError> {
        log::info!("[platform] ban user {user} in group {group}");
        Ok(())
    }

    async fn unrestrict_user(&self, group: i64, user: i64) -> Result<(), PlatformError> {
        log::info!("[platform] unrestrict user {user} in group {group}");
        Ok(())
    }

    async fn notify_admins(&self, group: i64, text: &str) -> Result<(), PlatformError> {
        log::info!("[platform] notify admins of group {group}: {text}");
        Ok(())
    }
}

async fn run_demo(config: FloodgateConfig) {
    println!("Running demo traffic against an in-memory store...");
    println!();

    let cache = Arc::new(CacheService::new(
        Arc::new(MemoryStore::new()),
        config.cache_breaker.to_breaker_config(),
        config.cache_ttls.to_cache_ttls(),
    ));
    let network = Arc::new(NetworkAnalyzer::new(
        Arc::clone(&cache),
        Arc::new(NoopSimilarityProvider),
        config.similarity_timeout(),
    ));
    let pipeline = MessagePipeline::new(
        Arc::clone(&cache),
        Arc::clone(&network),
        BackpressureController::new(config.backpressure.clone()),
        AdaptiveRateLimiter::new(config.rate_limit.to_rate_limit_config()),
        ContentCollector::new(config.patterns.clone()),
        RiskScorer::new(config.scoring.clone()),
        config.pipeline_breaker.to_breaker_config(),
        config.pipeline.clone(),
    );
    let engine = ActionEngine::new(
        Arc::new(LoggingAdapter),
        Arc::clone(&cache),
        network,
        ActionConfig {
            retry_base_delay_ms: 10,
            ..config.actions.clone()
        },
    );

    let samples: [(i64, &str); 4] = [
        (1001, "hey all, great to be here"),
        (1002, "GUARANTEED PROFIT!!! double your investment, send BTC to 1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2 NOW, limited time!"),
        (1003, "anyone know when the next meetup is?"),
        (1002, "GUARANTEED PROFIT!!! double your investment, send BTC to 1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2 NOW, limited time!"),
    ];

    // A burst of joins first, so the last sender lands in raid mode.
    for user in 2000..2012 {
        pipeline
            .handle_join(&JoinEvent {
                group_id: 42,
                user_id: user,
                timestamp: chrono::Utc::now(),
            })
            .await;
    }

    for (i, (user, text)) in samples.iter().enumerate() {
        let ctx = MessageContext {
            message_id: i as i64 + 1,
            group_id: 42,
            user_id: *user,
            group_kind: GroupKind::Public,
            text: text.to_string(),
            has_attachment: false,
            has_links: false,
            is_forward: false,
            forward_from_channel: false,
            is_reply: false,
            timestamp: chrono::Utc::now(),
            sender: SenderProfile {
                username: Some(format!("user{user}")),
                has_avatar: *user != 1002,
                ..SenderProfile::default()
            },
        };

        match pipeline.process(&ctx).await {
            PipelineOutcome::Processed(result) => {
                println!(
                    "message {} from user {}: score {:>3}, verdict {}",
                    ctx.message_id,
                    ctx.user_id,
                    result.score,
                    result.verdict.as_str()
                );
                for factor in &result.contributing_factors {
                    println!("    + {factor}");
                }
                for factor in &result.mitigating_factors {
                    println!("    - {factor}");
                }
                let outcome = engine
                    .execute(ctx.group_id, ctx.user_id, ctx.message_id, &result)
                    .await;
                println!("    enforcement: {outcome:?}");
            }
            PipelineOutcome::Shed => println!("message {} shed under load", ctx.message_id),
            PipelineOutcome::RateLimited => {
                println!("message {} rate limited", ctx.message_id)
            }
        }
        println!();
    }

    println!(
        "raid mode for group 42: {}",
        pipeline.raid_mode_active(42).await
    );
}
