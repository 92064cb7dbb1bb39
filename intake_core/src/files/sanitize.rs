use super::error::StoreError;

/// Longest file name most filesystems accept, in bytes.
const MAX_NAME_BYTES: usize = 255;

/// Room kept free for a `-NNNNN` disambiguation suffix.
const SUFFIX_RESERVE: usize = 6;

const FORBIDDEN_CHARS: &[char] = &[
    '?', '[', ']', '/', '\\', '=', '<', '>', ':', ';', ',', '\'', '"', '&', '$', '#', '*', '(',
    ')', '|', '~', '`', '!', '{', '}', '%', '+', '\u{2019}', '\u{ab}', '\u{bb}', '\u{201c}',
    '\u{201d}',
];

const EDGE_CHARS: &[char] = &['.', '-', '_'];

/// Turns untrusted upload names into safe base names carrying one required
/// extension.
#[derive(Debug, Clone)]
pub struct NameSanitizer {
    extension: String,
}

impl NameSanitizer {
    /// `extension` may be given with or without its leading dot.
    pub fn new(extension: &str) -> Self {
        Self {
            extension: extension.trim_start_matches('.').to_ascii_lowercase(),
        }
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Reduces `raw_name` to a single path component free of separators,
    /// control characters and traversal segments, then appends the required
    /// extension when it is missing.
    pub fn sanitize(&self, raw_name: &str) -> Result<String, StoreError> {
        let last = raw_name
            .rsplit(|c| c == '/' || c == '\\')
            .next()
            .unwrap_or(raw_name);

        let mut cleaned = String::with_capacity(last.len());
        for c in last.chars() {
            if c.is_control() || FORBIDDEN_CHARS.contains(&c) {
                continue;
            }
            let c = if c.is_whitespace() { '-' } else { c };
            // Runs of dots or dashes collapse, so no `..` can survive.
            if (c == '.' || c == '-') && cleaned.ends_with(c) {
                continue;
            }
            cleaned.push(c);
        }
        let cleaned = cleaned.trim_matches(EDGE_CHARS);

        let (base, extension) = match self.split_extension(cleaned) {
            Some((base, extension)) => (base, extension.to_string()),
            None => (cleaned, format!(".{}", self.extension)),
        };

        let budget = MAX_NAME_BYTES
            .saturating_sub(SUFFIX_RESERVE)
            .saturating_sub(extension.len());
        let base = truncate_at_char_boundary(base.trim_end_matches(EDGE_CHARS), budget)
            .trim_end_matches(EDGE_CHARS);

        if base.trim().is_empty() {
            return Err(self.invalid(raw_name));
        }

        Ok(format!("{}{}", base, extension))
    }

    /// Case-insensitive check for a non-empty name ending in `.<extension>`.
    pub fn has_required_extension(&self, name: &str) -> bool {
        self.split_extension(name).is_some()
    }

    /// Splits `name` into its base and its `.<extension>` suffix, keeping the
    /// suffix's original casing.
    pub fn split_extension<'a>(&self, name: &'a str) -> Option<(&'a str, &'a str)> {
        let suffix_len = self.extension.len() + 1;
        if name.len() <= suffix_len {
            return None;
        }

        let split = name.len() - suffix_len;
        let bytes = name.as_bytes();
        if bytes[split] == b'.' && bytes[split + 1..].eq_ignore_ascii_case(self.extension.as_bytes())
        {
            Some(name.split_at(split))
        } else {
            None
        }
    }

    pub(crate) fn invalid(&self, name: &str) -> StoreError {
        StoreError::InvalidName {
            name: name.to_string(),
            extension: self.extension.clone(),
        }
    }
}

fn truncate_at_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
