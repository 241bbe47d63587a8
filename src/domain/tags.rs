//! Tag parsing and the inline stream-tag metric name form `name|ST[k:v,...]`.

use crate::domain::errors::TagError;
use std::fmt;

const STREAM_TAG_OPEN: &str = "|ST[";
const STREAM_TAG_CLOSE: char = ']';

/// A single `key:value` tag. A bare `key` carries an empty value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn parse(raw: &str) -> Result<Tag, TagError> {
        let mut parts = raw.splitn(3, ':');
        let key = parts.next().unwrap_or_default();
        let value = parts.next().unwrap_or_default();
        if parts.next().is_some() {
            return Err(TagError::Malformed {
                tag: raw.to_string(),
            });
        }
        if key.is_empty() {
            return Err(TagError::EmptyKey {
                tag: raw.to_string(),
            });
        }
        Ok(Tag {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.key, self.value)
    }
}

/// Ordered tags with unique keys; merging an existing key replaces its value
/// in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet {
    tags: Vec<Tag>,
}

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses every tag or none of them.
    pub fn parse_all<S: AsRef<str>>(raw: &[S]) -> Result<TagSet, TagError> {
        let mut set = TagSet::new();
        for tag in raw {
            set.insert(Tag::parse(tag.as_ref())?);
        }
        Ok(set)
    }

    pub fn insert(&mut self, tag: Tag) {
        match self.tags.iter_mut().find(|t| t.key == tag.key) {
            Some(existing) => existing.value = tag.value,
            None => self.tags.push(tag),
        }
    }

    /// Folds `other` into `self`, last value per key wins.
    pub fn merge(&mut self, other: TagSet) {
        for tag in other.tags {
            self.insert(tag);
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.key == key)
            .map(|t| t.value.as_str())
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.tags.iter()
    }

    /// Tags rendered as `key:value` strings, in order.
    pub fn to_strings(&self) -> Vec<String> {
        self.tags.iter().map(Tag::to_string).collect()
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, tag) in self.tags.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{tag}")?;
        }
        Ok(())
    }
}

/// A metric name split into its base and its inline stream tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricName {
    pub base: String,
    pub tags: TagSet,
}

impl MetricName {
    /// Splits `name|ST[...]`. A name without the suffix has no tags.
    pub fn parse(name: &str) -> Result<MetricName, TagError> {
        let Some(start) = name.find(STREAM_TAG_OPEN) else {
            return Ok(MetricName {
                base: name.to_string(),
                tags: TagSet::new(),
            });
        };
        let inner = &name[start + STREAM_TAG_OPEN.len()..];
        let Some(inner) = inner.strip_suffix(STREAM_TAG_CLOSE) else {
            return Err(TagError::Malformed {
                tag: name[start..].to_string(),
            });
        };
        let raw: Vec<&str> = if inner.is_empty() {
            Vec::new()
        } else {
            inner.split(',').collect()
        };
        Ok(MetricName {
            base: name[..start].to_string(),
            tags: TagSet::parse_all(&raw)?,
        })
    }

    /// Canonical form; a name without tags renders as the bare base.
    pub fn render(&self) -> String {
        if self.tags.is_empty() {
            self.base.clone()
        } else {
            format!("{}{STREAM_TAG_OPEN}{}{STREAM_TAG_CLOSE}", self.base, self.tags)
        }
    }

    pub fn with_stream_tags(base: &str, tags: TagSet) -> String {
        MetricName {
            base: base.to_string(),
            tags,
        }
        .render()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_parse() {
        assert_eq!(
            Tag::parse("env:prod").expect("valid"),
            Tag {
                key: "env".to_string(),
                value: "prod".to_string()
            }
        );
        assert_eq!(Tag::parse("canary").expect("valid").value, "");
        assert!(matches!(
            Tag::parse("badtag:a:b"),
            Err(TagError::Malformed { .. })
        ));
        assert!(matches!(Tag::parse(":v"), Err(TagError::EmptyKey { .. })));
    }

    #[test]
    fn test_tagset_last_value_wins_in_place() {
        let set = TagSet::parse_all(&["env:prod", "zone:a", "env:staging"]).expect("valid");
        assert_eq!(set.to_string(), "env:staging,zone:a");
    }

    #[test]
    fn test_parse_all_is_all_or_nothing() {
        let result = TagSet::parse_all(&["env:prod", "x:y:z"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_metric_name_round_trip() {
        let name = MetricName::parse("latency|ST[env:prod,zone:a]").expect("valid");
        assert_eq!(name.base, "latency");
        assert_eq!(name.tags.get("zone"), Some("a"));
        assert_eq!(name.render(), "latency|ST[env:prod,zone:a]");
    }

    #[test]
    fn test_metric_name_without_tags() {
        let name = MetricName::parse("latency").expect("valid");
        assert!(name.tags.is_empty());
        assert_eq!(name.render(), "latency");
        assert_eq!(MetricName::parse("latency|ST[]").expect("valid").render(), "latency");
    }

    #[test]
    fn test_unterminated_stream_tags_rejected() {
        assert!(MetricName::parse("latency|ST[env:prod").is_err());
    }
}
