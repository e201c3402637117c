//! Parser for Luanti-style configuration files (`minetest.conf`).
//!
//! Supported syntax: `key = value` lines, `#` comments, `key = {` … `}` groups which may nest, and
//! `key = """` … `"""` multiline values.

use std::{fs, mem, path::Path};

use anyhow::{Context, Result, bail};
use flexstr::SharedStr;

/// A parsed configuration file or group.
#[derive(Debug, Default)]
pub(crate) struct Config {
    items: Vec<(SharedStr, ConfigValue)>,
}

#[derive(Debug)]
pub(crate) enum ConfigValue {
    String(SharedStr),
    Group(Config),
}

impl Config {
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub(crate) fn parse(text: &str) -> Result<Self> {
        let mut builder = ConfigBuilder::new(0);
        for (number, line) in text.lines().enumerate() {
            if builder.parse_line(line)? {
                bail!("line {}: unexpected '}}' at top level", number + 1);
            }
        }
        builder.finish()
    }

    /// Returns the string value of a key; the last assignment wins.
    pub(crate) fn get(&self, key: &str) -> Option<&str> {
        self.items.iter().rev().find_map(|(item_key, value)| match value {
            ConfigValue::String(value) if item_key.as_ref() == key => Some(value.as_ref()),
            ConfigValue::String(_) | ConfigValue::Group(_) => None,
        })
    }

    /// Returns a group; the last assignment wins.
    #[cfg_attr(not(test), expect(dead_code, reason = "groups are only inspected by tests"))]
    pub(crate) fn group(&self, key: &str) -> Option<&Config> {
        self.items.iter().rev().find_map(|(item_key, value)| match value {
            ConfigValue::Group(group) if item_key.as_ref() == key => Some(group),
            ConfigValue::String(_) | ConfigValue::Group(_) => None,
        })
    }

    pub(crate) fn keys(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|(key, _)| key.as_ref())
    }
}

#[derive(Default)]
enum BuilderState {
    #[default]
    Default,
    Group {
        key: SharedStr,
        builder: Box<ConfigBuilder>,
    },
    Multiline {
        key: SharedStr,
        lines: Vec<String>,
    },
    Complete,
}

struct ConfigBuilder {
    config: Config,
    depth: u32,
    state: BuilderState,
}

impl ConfigBuilder {
    fn new(depth: u32) -> Self {
        Self {
            config: Config::default(),
            depth,
            state: BuilderState::Default,
        }
    }

    /// Consumes one line. Returns `true` once the closing brace of a group has been read.
    fn parse_line(&mut self, line: &str) -> Result<bool> {
        let trimmed = line.trim();

        self.state = match mem::take(&mut self.state) {
            BuilderState::Default => {
                if trimmed.is_empty() || trimmed.starts_with('#') {
                    BuilderState::Default
                } else if trimmed == "}" {
                    if self.depth == 0 {
                        return Ok(true);
                    }
                    BuilderState::Complete
                } else {
                    let Some((key, value)) = trimmed.split_once('=') else {
                        bail!("invalid config line: {line}");
                    };
                    let key = SharedStr::from(key.trim().to_owned());
                    if key.is_empty() {
                        bail!("missing key in config line: {line}");
                    }
                    match value.trim() {
                        "{" => BuilderState::Group {
                            key,
                            builder: Box::new(Self::new(self.depth + 1)),
                        },
                        r#"""""# => BuilderState::Multiline {
                            key,
                            lines: Vec::new(),
                        },
                        value => {
                            self.push(key, ConfigValue::String(value.to_owned().into()));
                            BuilderState::Default
                        }
                    }
                }
            }
            BuilderState::Group { key, mut builder } => {
                if builder.parse_line(line)? {
                    let group = builder.finish()?;
                    self.push(key, ConfigValue::Group(group));
                    BuilderState::Default
                } else {
                    BuilderState::Group { key, builder }
                }
            }
            BuilderState::Multiline { key, mut lines } => {
                if trimmed == r#"""""# {
                    self.push(key, ConfigValue::String(lines.join("\n").into()));
                    BuilderState::Default
                } else {
                    lines.push(line.to_owned());
                    BuilderState::Multiline { key, lines }
                }
            }
            BuilderState::Complete => bail!("unexpected line after the end of a group"),
        };

        Ok(matches!(self.state, BuilderState::Complete))
    }

    fn push(&mut self, key: SharedStr, value: ConfigValue) {
        self.config.items.push((key, value));
    }

    fn finish(self) -> Result<Config> {
        match self.state {
            BuilderState::Default => {
                if self.depth > 0 {
                    bail!("missing '}}' at the end of a group");
                }
            }
            BuilderState::Group { key, .. } => bail!("missing '}}' for group `{key}`"),
            BuilderState::Multiline { key, .. } => {
                bail!(r#"missing '"""' for multiline value of `{key}`"#);
            }
            BuilderState::Complete => {}
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_values_groups_and_multilines() {
        let config = Config::parse(
            r#"
# a comment
mg_name = flat
   chunksize=3
mg_name = singlenode
mgflat = {
    ground_level = 12
    inner = {
        deep = yes
    }
}
motd = """
first
  second
"""
"#,
        )
        .unwrap();

        assert_eq!(config.get("mg_name"), Some("singlenode"), "last one wins");
        assert_eq!(config.get("chunksize"), Some("3"));
        let group = config.group("mgflat").unwrap();
        assert_eq!(group.get("ground_level"), Some("12"));
        assert_eq!(group.group("inner").unwrap().get("deep"), Some("yes"));
        assert_eq!(config.get("mgflat"), None, "groups are not strings");
        assert_eq!(config.get("motd"), Some("first\n  second"));
        assert_eq!(config.keys().count(), 5);
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(Config::parse("just words").is_err());
        assert!(Config::parse("= value").is_err());
        assert!(Config::parse("group = {\nkey = 1\n").is_err());
        assert!(Config::parse("text = \"\"\"\nunterminated").is_err());
        assert!(Config::parse("}").is_err());
    }
}
