use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;

use crate::config::LoggingConfig;
use crate::error::SinkError;
use crate::transport::QueryResult;

/// Append-only JSONL record of every result, one object per line, with
/// size-based rotation (`file` -> `file.1` -> ... -> `file.N`).
#[derive(Debug)]
pub struct JsonlLogger {
	path: PathBuf,
	max_file_size_bytes: u64,
	rotation_count: usize,
	enabled: bool,
	lock: Mutex<()>,
}

/// Snapshot of the active log file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogFileInfo {
	pub enabled: bool,
	pub path: String,
	pub exists: bool,
	pub size_bytes: u64,
	pub max_size_bytes: u64,
	pub rotation_count: usize,
}

impl JsonlLogger {
	pub fn new(config: &LoggingConfig) -> Self {
		Self::with_limits(
			&config.file_path,
			config.max_file_size_bytes(),
			config.rotation_count,
			config.enabled,
		)
	}

	pub fn with_limits(
		path: impl AsRef<Path>,
		max_file_size_bytes: u64,
		rotation_count: usize,
		enabled: bool,
	) -> Self {
		Self {
			path: path.as_ref().to_path_buf(),
			max_file_size_bytes,
			rotation_count: rotation_count.max(1),
			enabled,
			lock: Mutex::new(()),
		}
	}

	pub fn is_enabled(&self) -> bool {
		self.enabled
	}

	fn generation(&self, n: usize) -> PathBuf {
		let mut name = OsString::from(self.path.as_os_str());
		name.push(format!(".{}", n));
		PathBuf::from(name)
	}

	/// Append a round with a single write. Encoding failures are reported
	/// before the file is touched; an I/O error mid-write may leave a
	/// partial round behind and is returned.
	pub async fn log(&self, results: &[QueryResult]) -> Result<(), SinkError> {
		if !self.enabled || results.is_empty() {
			return Ok(());
		}

		let mut lines = String::new();
		for result in results {
			lines.push_str(&serde_json::to_string(result)?);
			lines.push('\n');
		}

		let _guard = self.lock.lock().await;
		if let Some(parent) = self.path.parent() {
			if !parent.as_os_str().is_empty() {
				fs::create_dir_all(parent).await?;
			}
		}

		match fs::metadata(&self.path).await {
			Ok(meta) if meta.len() >= self.max_file_size_bytes => self.rotate().await?,
			Ok(_) => {}
			Err(e) if e.kind() == io::ErrorKind::NotFound => {}
			Err(e) => return Err(e.into()),
		}

		let mut file = OpenOptions::new()
			.create(true)
			.append(true)
			.open(&self.path)
			.await?;
		file.write_all(lines.as_bytes()).await?;
		file.flush().await?;
		Ok(())
	}

	async fn rotate(&self) -> Result<(), SinkError> {
		remove_if_exists(&self.generation(self.rotation_count)).await?;
		for i in (1..self.rotation_count).rev() {
			rename_if_exists(&self.generation(i), &self.generation(i + 1)).await?;
		}
		rename_if_exists(&self.path, &self.generation(1)).await?;
		info!(path = %self.path.display(), keep = self.rotation_count, "Rotated result log");
		Ok(())
	}

	/// The last `lines` entries of the active file, oldest first.
	/// Lines that fail to parse are skipped.
	pub async fn read_recent(&self, lines: usize) -> Result<Vec<QueryResult>, SinkError> {
		if !self.enabled {
			return Ok(Vec::new());
		}
		let _guard = self.lock.lock().await;
		let content = match fs::read_to_string(&self.path).await {
			Ok(c) => c,
			Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(e.into()),
		};
		let all: Vec<&str> = content.lines().collect();
		let skip = all.len().saturating_sub(lines);
		Ok(all[skip..].iter()
			.filter_map(|line| serde_json::from_str(line.trim()).ok())
			.collect())
	}

	pub async fn file_info(&self) -> LogFileInfo {
		let size = if self.enabled {
			fs::metadata(&self.path).await.ok().map(|m| m.len())
		} else {
			None
		};
		LogFileInfo {
			enabled: self.enabled,
			path: self.path.display().to_string(),
			exists: size.is_some(),
			size_bytes: size.unwrap_or(0),
			max_size_bytes: self.max_file_size_bytes,
			rotation_count: self.rotation_count,
		}
	}
}

async fn remove_if_exists(path: &Path) -> io::Result<()> {
	match fs::remove_file(path).await {
		Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
		_ => Ok(()),
	}
}

async fn rename_if_exists(from: &Path, to: &Path) -> io::Result<()> {
	match fs::rename(from, to).await {
		Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
		_ => Ok(()),
	}
}
