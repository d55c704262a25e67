//! Value-key tokenizer and substitution.
//!
//! Templates are split into literal text and value-key occurrences before
//! anything is substituted. At each position the longest matching key wins,
//! so `[IN]` never matches inside `[IN]2`, and substituted values are never
//! re-scanned for keys.

/// What to do with a key that has no value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unresolved {
    /// Drop the key and one preceding space (command lines).
    Remove,
    /// Drop the whole template (configuration-file lines).
    Clear,
    /// Leave the key text in place (first output-path pass).
    Keep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'t> {
    Text(&'t str),
    Key { key: &'t str, offset: usize },
}

/// The value-keys of one descriptor, longest first.
#[derive(Debug, Clone)]
pub struct KeySet<'k> {
    keys: Vec<&'k str>,
}

impl<'k> KeySet<'k> {
    pub fn new(keys: impl IntoIterator<Item = &'k str>) -> Self {
        let mut keys: Vec<&str> = keys.into_iter().filter(|key| !key.is_empty()).collect();
        keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        keys.dedup();
        Self { keys }
    }

    pub fn tokenize<'t>(&self, template: &'t str) -> Vec<Segment<'t>> {
        let mut segments = Vec::new();
        let mut text_start = 0;
        let mut idx = 0;
        while idx < template.len() {
            let rest = &template[idx..];
            if let Some(key) = self.keys.iter().find(|key| rest.starts_with(**key)) {
                if text_start < idx {
                    segments.push(Segment::Text(&template[text_start..idx]));
                }
                segments.push(Segment::Key {
                    key: &template[idx..idx + key.len()],
                    offset: idx,
                });
                idx += key.len();
                text_start = idx;
            } else {
                idx += rest.chars().next().map_or(1, char::len_utf8);
            }
        }
        if text_start < template.len() {
            segments.push(Segment::Text(&template[text_start..]));
        }
        segments
    }

    pub fn contains_key(&self, template: &str) -> bool {
        self.tokenize(template)
            .iter()
            .any(|segment| matches!(segment, Segment::Key { .. }))
    }
}

/// Substitute every key occurrence in `template`. `resolve` gets the key and
/// its byte offset in the template. Returns `None` only under
/// [`Unresolved::Clear`] when some key had no value.
pub fn substitute<F>(template: &str, keys: &KeySet<'_>, policy: Unresolved, mut resolve: F) -> Option<String>
where
    F: FnMut(&str, usize) -> Option<String>,
{
    let mut out = String::with_capacity(template.len());
    for segment in keys.tokenize(template) {
        match segment {
            Segment::Text(text) => out.push_str(text),
            Segment::Key { key, offset } => match resolve(key, offset) {
                Some(value) => out.push_str(&value),
                None => match policy {
                    Unresolved::Remove => {
                        if out.ends_with(' ') {
                            out.pop();
                        }
                    }
                    Unresolved::Clear => return None,
                    Unresolved::Keep => out.push_str(key),
                },
            },
        }
    }
    Some(out)
}
