//! Path exclusion by substring containment.
//!
//! A file is excluded when its path relative to the tree root contains any
//! configured pattern anywhere, not just at a segment boundary. This is a
//! deliberately simple, order-independent containment test carried over from
//! the original settings format. Known imprecision: a short pattern such as
//! `"log"` also excludes unrelated paths like `blogs/index.php`.

use std::path::Path;

/// Ordered set of path-fragment exclusion patterns
#[derive(Debug, Clone, Default)]
pub struct ExclusionSet {
	patterns: Vec<String>,
}

impl ExclusionSet {
	/// Build a set from configured patterns, dropping empty entries
	pub fn new<I, S>(patterns: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let patterns = patterns
			.into_iter()
			.map(Into::into)
			.filter(|p: &String| !p.trim().is_empty())
			.collect();
		ExclusionSet { patterns }
	}

	/// Append a pattern the caller must never sync or archive, such as the
	/// backup storage directory, unless an identical pattern is already
	/// configured
	pub fn with_forced(mut self, pattern: &str) -> Self {
		if !pattern.is_empty() && !self.patterns.iter().any(|p| p == pattern) {
			self.patterns.push(pattern.to_string());
		}
		self
	}

	/// Containment test against a relative path string
	pub fn is_excluded(&self, rel_path: &str) -> bool {
		self.patterns.iter().any(|p| rel_path.contains(p.as_str()))
	}

	/// Containment test against a relative `Path`, normalizing separators
	pub fn matches_path(&self, rel_path: &Path) -> bool {
		let text = rel_path.to_string_lossy();
		if std::path::MAIN_SEPARATOR == '/' {
			self.is_excluded(&text)
		} else {
			self.is_excluded(&text.replace(std::path::MAIN_SEPARATOR, "/"))
		}
	}

	/// Translate into the transport's native exclude syntax
	pub fn to_rsync_args(&self) -> Vec<String> {
		self.patterns.iter().map(|p| format!("--exclude={}", p)).collect()
	}

	pub fn is_empty(&self) -> bool {
		self.patterns.is_empty()
	}

	pub fn patterns(&self) -> &[String] {
		&self.patterns
	}
}


// vim: ts=4
