//! Application id checks.

use std::sync::LazyLock;

use regex::Regex;

/// Longest accepted application id.
const MAX_LEN: usize = 255;

static APP_ID_RE: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"^[A-Za-z_-][A-Za-z0-9_-]*(\.[A-Za-z_-][A-Za-z0-9_-]*)+$").unwrap());

/// Returns true if `id` is a well-formed reverse-DNS application id with at
/// least two elements, none starting with a digit.
pub fn is_valid(id: &str) -> bool {
	id.len() <= MAX_LEN && APP_ID_RE.is_match(id)
}

/// Object path an application exports its actions on: `/` + id with `.`
/// replaced by `/` and `-` by `_`.
pub fn object_path(id: &str) -> String {
	let mut path = String::with_capacity(id.len() + 1);
	path.push('/');
	path.extend(id.chars().map(|c| match c {
		'.' => '/',
		'-' => '_',
		c => c,
	}));
	path
}
