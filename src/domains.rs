use anyhow::{anyhow, Result};

/// Domains probed when the configuration file is absent.
pub fn default_domains() -> Vec<String> {
	vec![
		"google.com",
		"github.com",
		"stackoverflow.com",
	].into_iter().map(String::from).collect()
}

/// Read domains from a file, one per line.
///
/// Blank lines and lines starting with '#' are skipped.
pub fn read_domain_file(path: &str) -> Result<Vec<String>> {
	let content = std::fs::read_to_string(path)
		.map_err(|e| anyhow!("failed to read domain file '{}': {}", path, e))?;
	Ok(parse_domain_list(&content))
}

fn parse_domain_list(content: &str) -> Vec<String> {
	content.lines()
		.map(|line| line.trim().to_string())
		.filter(|line| !line.is_empty() && !line.starts_with('#'))
		.collect()
}

/// Append `extra` to `domains`, skipping names already present.
pub fn merge_domains(domains: &mut Vec<String>, extra: Vec<String>) {
	for domain in extra {
		if !domains.iter().any(|d| d.eq_ignore_ascii_case(&domain)) {
			domains.push(domain);
		}
	}
}
