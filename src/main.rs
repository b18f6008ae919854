mod cli;

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use dns_watch::config::AppConfig;
use dns_watch::engine::TestEngine;
use dns_watch::hub::{MessageKind, Subscription};
use dns_watch::{domains, output, resolver};

use crate::cli::Cli;

fn init_logging(level: &str) {
	let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_target(true)
		.with_thread_ids(false)
		.with_level(true)
		.init();

	info!("Logging initialized at level: {}", level);
}

/// Print the window table every time a round lands.
async fn run_console(engine: Arc<TestEngine>, mut subscription: Subscription) {
	while let Some(message) = subscription.recv().await {
		if message.kind == MessageKind::Round {
			output::print_round_table(message.iteration, &engine.statistics().await);
		}
	}
	warn!("Console observer fell behind and was dropped");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();
	init_logging(&cli.log_level);

	let mut config = AppConfig::load(&cli.config, &cli.overrides())?;

	// From CLI flags
	for s in &cli.servers {
		config.dns_servers.push(resolver::parse_server(s)?);
	}

	// System resolvers
	if cli.system_resolvers {
		config.dns_servers.extend(resolver::system_servers());
	}

	// Extra domains
	if let Some(path) = &cli.domains_file {
		domains::merge_domains(&mut config.domains, domains::read_domain_file(path)?);
	}
	config.validate()?;

	output::print_config_summary(&config);

	let engine = Arc::new(TestEngine::new(config));
	let console = if cli.quiet {
		None
	} else {
		let subscription = engine.subscribe().await?;
		Some(tokio::spawn(run_console(engine.clone(), subscription)))
	};

	engine.start().await?;

	tokio::select! {
		signal = tokio::signal::ctrl_c() => {
			signal?;
			info!("Shutdown requested");
		}
		_ = engine.stopped() => {}
	}
	engine.stop().await;
	if let Some(console) = console {
		console.abort();
	}

	let status = engine.status().await;
	if let Some(fault) = &status.fault {
		error!(fault = %fault, "Test engine stopped on fault");
	}
	let stats = engine.statistics().await;
	info!(
		iterations = stats.global.iteration_count,
		total = stats.global.total_queries,
		failed = stats.global.failed_queries,
		sink_failures = status.sink_failures,
		"Final statistics"
	);

	if let Some(path) = &cli.output {
		output::write_csv(path, &stats.windowed)?;
	}

	if status.fault.is_some() {
		anyhow::bail!("test engine stopped on fault");
	}
	Ok(())
}
