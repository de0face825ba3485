// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Component inspection.
//!
//! A patched file usually belongs to a plugin or theme, which is called its
//! __component__. The component is recognized from the shape of the path
//! alone: the directory right after `plugins/` or `themes/` is the slug. Any
//! other path is of kind [`ComponentKind::Other`], and version reasoning is
//! disabled for it.
//!
//! Component versions are asked from WP-CLI. Version metadata is best effort:
//! every failure yields `None`. PHP frequently dies with "Allowed memory size
//! exhausted" on large installs, so that specific failure is retried once
//! with a doubled memory ceiling.

use crate::{
    config::SiteConfig,
    remote::{shell_quote, RemoteChannel},
};

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use tracing::{debug, instrument, warn};

const MEMORY_EXHAUSTED: &str = "Allowed memory size";
const FALLBACK_MEMORY_LIMIT: &str = "1024M";

/// Kind of component owning a file.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Plugin,
    Theme,
    #[default]
    Other,
}

impl ComponentKind {
    fn wp_cli_noun(self) -> Option<&'static str> {
        match self {
            Self::Plugin => Some("plugin"),
            Self::Theme => Some("theme"),
            Self::Other => None,
        }
    }
}

impl Display for ComponentKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(match self {
            Self::Plugin => "plugin",
            Self::Theme => "theme",
            Self::Other => "other",
        })
    }
}

/// Component that owns a file.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Component {
    pub kind: ComponentKind,
    pub slug: String,
}

impl Component {
    /// Classify a site-relative file path.
    pub fn from_path(path: &str) -> Self {
        let parts = path.split('/').collect::<Vec<_>>();
        for (kind, marker) in [
            (ComponentKind::Plugin, "plugins"),
            (ComponentKind::Theme, "themes"),
        ] {
            // INVARIANT: Marker must be a directory, not the file itself.
            let position = parts[..parts.len().saturating_sub(1)]
                .iter()
                .position(|part| *part == marker);
            if let Some(index) = position {
                let slug = parts.get(index + 1).copied().unwrap_or_default();
                if index + 2 < parts.len() && !slug.is_empty() {
                    return Self {
                        kind,
                        slug: slug.into(),
                    };
                }
                return Self {
                    kind,
                    slug: String::new(),
                };
            }
        }

        Self::default()
    }

    /// Component version reasoning applies.
    pub fn is_versioned(&self) -> bool {
        self.kind != ComponentKind::Other && !self.slug.is_empty()
    }
}

/// Where WP-CLI is run.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Invocation {
    /// `cd <root> && php -d memory_limit=<limit> $(which wp) ...`
    Php { root: String },

    /// `ddev wp ...` from the local project directory.
    Ddev,

    /// `wp ...` from the local project directory.
    Plain,
}

/// WP-CLI backed version probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WpCli {
    invocation: Invocation,
    memory_limit: String,
}

impl WpCli {
    /// Probe for the remote WordPress root of a site.
    ///
    /// Returns `None` when the configuration has no `[wp_cli]` section.
    pub fn remote(config: &SiteConfig) -> Option<Self> {
        config.wp_cli.as_ref().map(|wp_cli| Self {
            invocation: Invocation::Php {
                root: config.remote_root().to_string(),
            },
            memory_limit: wp_cli.memory_limit.clone(),
        })
    }

    /// Probe for the local development copy of a site.
    ///
    /// Must be run through a channel whose working directory is the local
    /// site root. Returns `None` when the configuration has no `[wp_cli]`
    /// section.
    pub fn local(config: &SiteConfig) -> Option<Self> {
        config.wp_cli.as_ref().map(|wp_cli| Self {
            invocation: if config.local.use_ddev {
                Invocation::Ddev
            } else {
                Invocation::Plain
            },
            memory_limit: wp_cli.memory_limit.clone(),
        })
    }

    /// Determine version of the component owning a file.
    ///
    /// Returns `None` for unversioned components and on any failure.
    #[instrument(skip(self, channel), level = "debug")]
    pub fn version(&self, channel: &impl RemoteChannel, component: &Component) -> Option<String> {
        let noun = component.kind.wp_cli_noun()?;
        if component.slug.is_empty() {
            return None;
        }

        let args = format!("{noun} get {} --format=json", shell_quote(&component.slug));
        let output = match channel.execute(&self.command(&args, &self.memory_limit)) {
            Ok(output) => output,
            Err(error) => {
                warn!("cannot query version of {}: {error}", component.slug);
                return None;
            }
        };

        let output = if !output.success() && output.stderr.contains(MEMORY_EXHAUSTED) {
            let enlarged = enlarge_memory_limit(&self.memory_limit);
            warn!(
                "php ran out of memory while querying {}, retrying with {enlarged}",
                component.slug
            );
            match channel.execute(&self.command(&args, &enlarged)) {
                Ok(output) => output,
                Err(error) => {
                    warn!("cannot query version of {}: {error}", component.slug);
                    return None;
                }
            }
        } else {
            output
        };

        if !output.success() {
            debug!(
                "wp-cli failed for {} with code {}: {}",
                component.slug,
                output.code,
                output.stderr.trim()
            );
            return None;
        }

        parse_version(&output.stdout)
    }

    fn command(&self, args: &str, memory_limit: &str) -> String {
        match &self.invocation {
            Invocation::Php { root } => format!(
                "cd {} && php -d memory_limit={} $(which wp) {args}",
                shell_quote(root),
                shell_quote(memory_limit)
            ),
            Invocation::Ddev => format!("ddev wp {args}"),
            Invocation::Plain => format!("wp {args}"),
        }
    }
}

/// Double a PHP memory limit such as "512M" or "1G".
///
/// Falls back to 1024M when the limit cannot be understood.
pub fn enlarge_memory_limit(limit: &str) -> String {
    let limit = limit.trim();
    let (number, unit) = match limit.char_indices().last() {
        Some((index, _)) => limit.split_at(index),
        None => (limit, ""),
    };
    let megabytes = match unit.to_ascii_uppercase().as_str() {
        "M" => number.parse::<u64>().ok(),
        "G" => number.parse::<u64>().ok().map(|value| value * 1024),
        "K" => number.parse::<u64>().ok().map(|value| value / 1024),
        _ => limit.parse::<u64>().ok().map(|bytes| bytes / (1024 * 1024)),
    };

    match megabytes {
        Some(value) if value > 0 => format!("{}M", value * 2),
        _ => FALLBACK_MEMORY_LIMIT.into(),
    }
}

fn parse_version(stdout: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct Item {
        version: Option<String>,
    }

    serde_json::from_str::<Item>(stdout.trim())
        .ok()
        .and_then(|item| item.version)
        .map(|version| version.trim().to_string())
        .filter(|version| !version.is_empty())
}
