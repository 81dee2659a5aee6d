//! Shell-style wildcard patterns for issuers and claim values, compiled to anchored regexes.
//!
//! Supports `*` (any run of characters, including `/` and `.`), `?` (one character), bracket
//! classes with ranges and `!`/`^` negation, and `\` escapes. Matching is case-sensitive and
//! anchored at both ends. An unterminated `[` is an ordinary character.

// crates.io
use regex::Regex;
// self
use crate::_prelude::*;

/// Compiled wildcard pattern.
#[derive(Clone, Debug)]
pub struct Pattern {
	source: String,
	regex: Regex,
}
impl Pattern {
	/// Compile `pattern`.
	pub fn new(pattern: &str) -> Result<Self> {
		Ok(Self { source: pattern.to_owned(), regex: Regex::new(&to_regex(pattern))? })
	}

	/// Wildcard text the pattern was compiled from.
	pub fn as_str(&self) -> &str {
		&self.source
	}

	/// Whether `text` matches the whole pattern.
	pub fn matches(&self, text: &str) -> bool {
		self.regex.is_match(text)
	}
}

/// Whether `text` matches the wildcard `pattern`. A pattern that does not compile matches nothing.
pub fn matches(pattern: &str, text: &str) -> bool {
	match Pattern::new(pattern) {
		Ok(pattern) => pattern.matches(text),
		Err(err) => {
			tracing::debug!(pattern, error = %err, "invalid wildcard pattern");

			false
		},
	}
}

fn to_regex(pattern: &str) -> String {
	let chars = pattern.chars().collect::<Vec<_>>();
	let mut out = String::from(r"\A(?s:");
	let mut i = 0;

	while i < chars.len() {
		match chars[i] {
			'*' => out.push_str(".*"),
			'?' => out.push('.'),
			'\\' => {
				let escaped = chars.get(i + 1).copied().unwrap_or('\\');

				push_literal(&mut out, escaped);

				if i + 1 < chars.len() {
					i += 1;
				}
			},
			'[' => match class(&chars[i..]) {
				Some((width, class)) => {
					out.push_str(&class);

					i += width;

					continue;
				},
				None => push_literal(&mut out, '['),
			},
			literal => push_literal(&mut out, literal),
		}

		i += 1;
	}

	out.push_str(r")\z");

	out
}

// Translate a bracket class starting at `[`; `None` when it is not terminated.
fn class(chars: &[char]) -> Option<(usize, String)> {
	let mut i = 1;
	let mut class = String::from("[");

	if matches!(chars.get(i), Some('!' | '^')) {
		class.push('^');

		i += 1;
	}

	let mut first = true;

	loop {
		let mut low = *chars.get(i)?;

		if low == ']' && !first {
			class.push(']');

			return Some((i + 1, class));
		}

		first = false;

		if low == '\\' {
			i += 1;
			low = *chars.get(i)?;
		}

		i += 1;
		push_literal(&mut class, low);

		if chars.get(i) == Some(&'-') && chars.get(i + 1).is_some_and(|next| *next != ']') {
			let mut high = chars[i + 1];

			i += 2;

			if high == '\\' {
				high = *chars.get(i)?;
				i += 1;
			}

			class.push('-');
			push_literal(&mut class, high);
		}
	}
}

fn push_literal(out: &mut String, c: char) {
	out.push_str(&regex::escape(c.encode_utf8(&mut [0; 4])));
}
