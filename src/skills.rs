//! Skill Matcher / Injector (C6): loads Markdown-with-YAML-front-matter
//! skill files once at startup, scores them against the latest user message,
//! and renders the winners into one system-role Markdown message.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use tracing::debug;

use crate::types::{Message, SkillScope, SkillSpec};

pub const DEFAULT_SCORE_THRESHOLD: i32 = 30;
pub const DEFAULT_MAX_SKILLS: usize = 5;
const SCORE_EXACT_TRIGGER: i32 = 50;
const SCORE_NAME_IN_TEXT: i32 = 40;
const SCORE_TRIGGER_SUBSTRING: i32 = 30;
const SCORE_PER_DESCRIPTION_KEYWORD: i32 = 10;

// ============================================================================
// LOADER
// ============================================================================

/// Parses a single skill file: a YAML front-matter block delimited by `---`
/// lines, followed by the Markdown body.
pub fn parse_skill_file(text: &str) -> crate::Result<SkillSpec> {
    let text = text.trim_start();
    let Some(rest) = text.strip_prefix("---") else {
        return Err(crate::Error::invalid_input(
            "skill file missing YAML front-matter delimiter '---'",
        ));
    };
    let Some(end) = rest.find("\n---") else {
        return Err(crate::Error::invalid_input(
            "skill file missing closing '---' for front-matter",
        ));
    };
    let front_matter = &rest[..end];
    let body = rest[end + 4..].trim_start_matches('\n').to_string();

    let mut spec: SkillSpec = serde_yaml::from_str(front_matter)?;
    spec.body = body;
    Ok(spec)
}

/// Walks `dir` once, loading every `*.md` file as a [`SkillSpec`]. Not
/// consulted again per step; the result is held in memory for the session.
pub fn load_skills_dir(dir: impl AsRef<Path>) -> crate::Result<Vec<SkillSpec>> {
    let dir = dir.as_ref();
    let mut skills = Vec::new();
    if !dir.exists() {
        debug!(dir = %dir.display(), "skills directory does not exist, skipping");
        return Ok(skills);
    }

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        let text = std::fs::read_to_string(&path)?;
        match parse_skill_file(&text) {
            Ok(spec) => skills.push(spec),
            Err(e) => {
                return Err(crate::Error::config(format!(
                    "failed to parse skill file {}: {e}",
                    path.display()
                )));
            }
        }
    }
    Ok(skills)
}

// ============================================================================
// MATCHER
// ============================================================================

fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn score_skill(spec: &SkillSpec, input_lower: &str, keywords: &HashSet<String>) -> i32 {
    let mut score = 0;

    if spec
        .triggers
        .iter()
        .any(|t| keywords.contains(&t.to_lowercase()))
    {
        score += SCORE_EXACT_TRIGGER;
    }

    if input_lower.contains(&spec.name.to_lowercase()) {
        score += SCORE_NAME_IN_TEXT;
    }

    if spec
        .triggers
        .iter()
        .any(|t| input_lower.contains(&t.to_lowercase()))
    {
        score += SCORE_TRIGGER_SUBSTRING;
    }

    let description_words = tokenize(&spec.description);
    let hits = description_words.intersection(keywords).count() as i32;
    score += hits * SCORE_PER_DESCRIPTION_KEYWORD;

    score
}

/// Matches [`SkillSpec`]s against the latest user message, caching results
/// (LRU + TTL) keyed by the hashed input text.
pub struct SkillMatcher {
    skills: Vec<Arc<SkillSpec>>,
    score_threshold: i32,
    max_skills: usize,
    cache: Cache<String, Arc<Vec<Arc<SkillSpec>>>>,
}

impl SkillMatcher {
    pub fn new(skills: Vec<SkillSpec>) -> Self {
        Self::with_config(
            skills,
            DEFAULT_SCORE_THRESHOLD,
            DEFAULT_MAX_SKILLS,
            Duration::from_secs(600),
            512,
        )
    }

    pub fn with_config(
        skills: Vec<SkillSpec>,
        score_threshold: i32,
        max_skills: usize,
        cache_ttl: Duration,
        cache_capacity: u64,
    ) -> Self {
        let cache = Cache::builder()
            .max_capacity(cache_capacity)
            .time_to_live(cache_ttl)
            .build();
        Self {
            skills: skills.into_iter().map(Arc::new).collect(),
            score_threshold,
            max_skills,
            cache,
        }
    }

    /// Match against `user_text` for skills whose scope is in `active_scopes`.
    pub fn match_skills(
        &self,
        user_text: &str,
        active_scopes: &[SkillScope],
    ) -> Arc<Vec<Arc<SkillSpec>>> {
        let cache_key = format!("{:x}", md5_like_hash(user_text));
        if let Some(cached) = self.cache.get(&cache_key) {
            return cached;
        }

        let input_lower = user_text.to_lowercase();
        let keywords = tokenize(user_text);

        let mut scored: Vec<(i32, Arc<SkillSpec>)> = self
            .skills
            .iter()
            .filter(|s| active_scopes.contains(&s.scope))
            .map(|s| (score_skill(s, &input_lower, &keywords), s.clone()))
            .filter(|(score, _)| *score >= self.score_threshold)
            .collect();

        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.truncate(self.max_skills);

        let result = Arc::new(scored.into_iter().map(|(_, s)| s).collect::<Vec<_>>());
        self.cache.insert(cache_key, result.clone());
        result
    }
}

/// A small, fast, non-cryptographic hash used only to key the in-process
/// match cache; collisions merely cost a cache miss, never correctness.
fn md5_like_hash(input: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    input.hash(&mut hasher);
    hasher.finish()
}

// ============================================================================
// INJECTOR
// ============================================================================

/// Renders matched skills as one system-role Markdown message. The caller is
/// responsible for checking each skill's "already active" status before
/// calling this (invariant 5: a skill is injected at most once per session).
pub fn render_injection_message(skills: &[Arc<SkillSpec>]) -> Option<Message> {
    if skills.is_empty() {
        return None;
    }

    let mut body = String::from("# Activated skills\n\n");
    for skill in skills {
        body.push_str(&format!("## {}\n\n{}\n\n{}\n\n---\n\n", skill.name, skill.description, skill.body));
    }

    Some(Message::system(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, triggers: &[&str], description: &str) -> SkillSpec {
        SkillSpec {
            name: name.to_string(),
            description: description.to_string(),
            triggers: triggers.iter().map(|s| s.to_string()).collect(),
            body: format!("body of {name}"),
            scope: SkillScope::Global,
        }
    }

    #[test]
    fn parses_front_matter_and_body() {
        let text = "---\nname: git-helper\ndescription: helps with git\ntriggers: [\"git\", \"commit\"]\n---\n# Git Helper\nDo things.\n";
        let spec = parse_skill_file(text).unwrap();
        assert_eq!(spec.name, "git-helper");
        assert_eq!(spec.triggers, vec!["git", "commit"]);
        assert_eq!(spec.body.trim(), "# Git Helper\nDo things.");
    }

    #[test]
    fn missing_front_matter_errors() {
        assert!(parse_skill_file("# just markdown").is_err());
    }

    #[test]
    fn exact_trigger_match_scores_fifty() {
        let s = spec("helper", &["deploy"], "something unrelated");
        let keywords = tokenize("please deploy the app");
        let score = score_skill(&s, "please deploy the app", &keywords);
        assert_eq!(score, SCORE_EXACT_TRIGGER);
    }

    #[test]
    fn matcher_sorts_by_score_and_caps_at_max_skills() {
        let skills = vec![
            spec("alpha", &["alpha-trigger"], "alpha description"),
            spec("beta", &["beta-trigger"], "beta description"),
        ];
        let matcher = SkillMatcher::with_config(
            skills,
            10,
            1,
            Duration::from_secs(60),
            100,
        );
        let result = matcher.match_skills("alpha-trigger", &[SkillScope::Global]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].name, "alpha");
    }

    #[test]
    fn below_threshold_skills_are_dropped() {
        let skills = vec![spec("niche", &[], "totally unrelated text")];
        let matcher = SkillMatcher::new(skills);
        let result = matcher.match_skills("hello there", &[SkillScope::Global]);
        assert!(result.is_empty());
    }

    #[test]
    fn scope_filtering_excludes_inactive_scope() {
        let mut project_skill = spec("proj", &["widget"], "widget helper");
        project_skill.scope = SkillScope::Project;
        let matcher = SkillMatcher::new(vec![project_skill]);
        let result = matcher.match_skills("widget widget widget", &[SkillScope::Global]);
        assert!(result.is_empty());
    }

    #[test]
    fn injector_renders_markdown_with_all_matched_skills() {
        let skills: Vec<Arc<SkillSpec>> = vec![Arc::new(spec("a", &[], "desc a"))];
        let message = render_injection_message(&skills).unwrap();
        assert!(message.content.as_text().contains("## a"));
        assert!(message.content.as_text().contains("body of a"));
    }

    #[test]
    fn injector_returns_none_for_empty_match_list() {
        assert!(render_injection_message(&[]).is_none());
    }
}
