//! Pattern analysis for `$regex`: anchored, metacharacter-free patterns
//! reduce to `=` or `LIKE`, which SQLite can drive from an index. Anything
//! else stays a real regex and is evaluated by the fallback matcher.

use rill::prelude::*;

/// How a reducible pattern matches the field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReductionKind {
	/// `^text$` — exact equality.
	Exact,
	/// `^text` — LIKE 'text%'.
	Prefix,
	/// `text$` — LIKE '%text'.
	Suffix,
	/// No anchors — LIKE '%text%'.
	Contains,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Reduction {
	pub kind: ReductionKind,
	/// The literal text, with regex escapes resolved.
	pub text: String,
	pub case_insensitive: bool,
}

/// Validates a `$options` string. MongoDB accepts exactly `i m s x u`;
/// anything else (notably JavaScript's `g`) is a hard error.
pub(crate) fn validate_options(options: &str) -> ClResult<()> {
	for c in options.chars() {
		if !matches!(c, 'i' | 'm' | 's' | 'x' | 'u') {
			return Err(Error::ConfigError(format!("unsupported regex option '{}'", c)));
		}
	}
	Ok(())
}

/// Tries to reduce a pattern to a literal form. Returns `None` when the
/// pattern contains any real regex construct.
pub(crate) fn reduce(pattern: &str, options: &str) -> Option<Reduction> {
	let case_insensitive = options.contains('i');
	// `s` only changes `.`, which a literal pattern cannot contain; `x`
	// strips whitespace we would mis-handle.
	if options.contains('x') {
		return None;
	}

	let (body, anchored_start) = match pattern.strip_prefix('^') {
		Some(rest) => (rest, true),
		None => (pattern, false),
	};
	let (body, anchored_end) = match strip_unescaped_dollar(body) {
		Some(rest) => (rest, true),
		None => (body, false),
	};
	// Under `m` the anchors match line boundaries, not string boundaries.
	if options.contains('m') && (anchored_start || anchored_end) {
		return None;
	}

	let text = literal_text(body)?;
	if text.is_empty() && !(anchored_start && anchored_end) {
		return None;
	}
	// SQLite's LOWER folds ASCII only; a non-ASCII case-insensitive literal
	// would diverge from real regex semantics.
	if case_insensitive && !text.is_ascii() {
		return None;
	}

	let kind = match (anchored_start, anchored_end) {
		(true, true) => ReductionKind::Exact,
		(true, false) => ReductionKind::Prefix,
		(false, true) => ReductionKind::Suffix,
		(false, false) => ReductionKind::Contains,
	};
	Some(Reduction { kind, text, case_insensitive })
}

/// Escapes a literal for use in a LIKE pattern with `ESCAPE '\'`.
pub(crate) fn escape_like(text: &str) -> String {
	let mut out = String::with_capacity(text.len());
	for c in text.chars() {
		if c == '%' || c == '_' || c == '\\' {
			out.push('\\');
		}
		out.push(c);
	}
	out
}

/// Strips a terminal unescaped `$` anchor.
fn strip_unescaped_dollar(body: &str) -> Option<&str> {
	let rest = body.strip_suffix('$')?;
	// An even run of trailing backslashes means the `$` itself is unescaped.
	let backslashes = rest.bytes().rev().take_while(|&b| b == b'\\').count();
	if backslashes % 2 == 0 { Some(rest) } else { None }
}

/// Resolves a metacharacter-free pattern body into its literal text.
/// `\.` and friends become the plain character; any live metacharacter
/// (including the unescaped `.`, which LIKE cannot express) fails.
fn literal_text(body: &str) -> Option<String> {
	let mut out = String::with_capacity(body.len());
	let mut chars = body.chars();
	while let Some(c) = chars.next() {
		match c {
			'\\' => {
				let next = chars.next()?;
				match next {
					'.' | '*' | '+' | '?' | '(' | ')' | '[' | ']' | '{' | '}' | '|' | '^' | '$'
					| '\\' | '/' | '-' => out.push(next),
					// \d, \w, \s, \b … are character classes, not literals.
					_ => return None,
				}
			}
			'.' | '*' | '+' | '?' | '(' | ')' | '[' | ']' | '{' | '}' | '|' | '^' | '$' => {
				return None;
			}
			_ => out.push(c),
		}
	}
	Some(out)
}


// vim: ts=4
