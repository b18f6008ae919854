use comfy_table::{Table, ContentArrangement, presets::UTF8_FULL};

use anyhow::Result;

use crate::config::AppConfig;
use crate::engine::StatisticsSnapshot;
use crate::stats::WindowedStatistics;

/// Print a summary of the configuration before the loop starts.
pub fn print_config_summary(config: &AppConfig) {
	println!("DNS Watch Configuration");
	println!("=======================");
	println!("DNS servers:    {}", config.dns_servers.len());
	for s in &config.dns_servers {
		println!("  - {} ({}:{})", s.name, s.ip, s.port);
	}
	println!("Domains:        {}", config.domains.len());
	for d in &config.domains {
		println!("  - {}", d);
	}
	println!("Interval:       {:.1} s", config.testing.interval_seconds);
	println!("Timeout:        {:.1} s", config.testing.timeout_seconds);
	println!("Concurrency:    {}", config.testing.max_concurrent_queries);
	println!("History:        {} results", config.web.history_buffer_size);
	if config.logging.enabled {
		println!(
			"Result log:     {} ({} MB x {})",
			config.logging.file_path,
			config.logging.max_file_size_mb,
			config.logging.rotation_count,
		);
	} else {
		println!("Result log:     disabled");
	}
	println!();
}

fn server_table(windowed: &WindowedStatistics) -> Table {
	let mut table = Table::new();
	table.load_preset(UTF8_FULL);
	table.set_content_arrangement(ContentArrangement::Dynamic);
	table.set_header(vec![
		"Server", "Queries", "Failed",
		"Success %", "Avg", "p95",
	]);

	for (name, s) in &windowed.stats_by_server {
		table.add_row(vec![
			name.clone(),
			s.total.to_string(),
			s.failed.to_string(),
			format!("{:.1}%", s.success_rate),
			format!("{:.1} ms", s.avg_response_time_ms),
			format!("{:.1} ms", s.p95_ms),
		]);
	}
	table
}

/// Print the per-server window table after a round.
pub fn print_round_table(iteration: u64, stats: &StatisticsSnapshot) {
	let windowed = &stats.windowed;
	let global = &stats.global;
	println!(
		"\nRound {}: window {:.1}% ok, p50 {:.1} ms, p95 {:.1} ms | lifetime {}/{} failed",
		iteration,
		windowed.success_rate,
		windowed.p50_ms,
		windowed.p95_ms,
		global.failed_queries,
		global.total_queries,
	);
	println!("{}", server_table(windowed));

	if !windowed.errors_by_kind.is_empty() {
		let errors: Vec<String> = windowed.errors_by_kind.iter()
			.map(|(kind, count)| format!("{}={}", kind, count))
			.collect();
		println!("Errors: {}", errors.join(", "));
	}
}

/// Write the final per-server window statistics to a CSV file.
pub fn write_csv(path: &str, windowed: &WindowedStatistics) -> Result<()> {
	let mut writer = csv::Writer::from_path(path)?;

	writer.write_record([
		"server", "total", "successful", "failed",
		"success_rate", "avg_response_time_ms", "p95_ms",
	])?;

	for (name, s) in &windowed.stats_by_server {
		writer.write_record([
			name.clone(),
			s.total.to_string(),
			s.successful.to_string(),
			s.failed.to_string(),
			format!("{:.2}", s.success_rate),
			format!("{:.2}", s.avg_response_time_ms),
			format!("{:.2}", s.p95_ms),
		])?;
	}

	writer.flush()?;
	println!("\nStatistics written to: {}", path);
	Ok(())
}
