// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resolves include/exclude glob patterns against the list of projects a
//! multi-project runner knows about.

use glob::Pattern;
use oj_core::ProjectId;
use std::collections::BTreeSet;

/// Patterns are compiled once so a misconfigured pattern fails fast at
/// construction rather than silently matching nothing on every tick.
pub struct GlobProjectFilter {
    includes: Vec<Pattern>,
    excludes: Vec<Pattern>,
}

#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("invalid glob pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
}

impl GlobProjectFilter {
    pub fn new(includes: &[String], excludes: &[String]) -> Result<Self, FilterError> {
        Ok(Self {
            includes: compile(includes)?,
            excludes: compile(excludes)?,
        })
    }

    /// Idempotent, sorted, set-semantics: the same patterns over the same
    /// projects always produce the same result regardless of input order,
    /// and applying the filter twice changes nothing further.
    pub fn filter(&self, all_projects: &[ProjectId]) -> Vec<ProjectId> {
        let mut matched: BTreeSet<String> = BTreeSet::new();

        for project_id in all_projects {
            let name = project_id.as_str();
            let included = self.includes.is_empty()
                || self.includes.iter().any(|pattern| pattern.matches(name));
            let excluded = self.excludes.iter().any(|pattern| pattern.matches(name));
            if included && !excluded {
                matched.insert(name.to_string());
            }
        }

        matched.into_iter().map(ProjectId::new).collect()
    }
}

fn compile(patterns: &[String]) -> Result<Vec<Pattern>, FilterError> {
    patterns
        .iter()
        .map(|pattern| {
            Pattern::new(pattern).map_err(|source| FilterError::InvalidPattern {
                pattern: pattern.clone(),
                source,
            })
        })
        .collect()
}

#[cfg(test)]
#[path = "glob_project_filter_tests.rs"]
mod tests;
