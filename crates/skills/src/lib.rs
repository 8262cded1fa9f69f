//! Markdown skill library.
//!
//! A skill is a `SKILL.md` file, optionally opening with a front-matter
//! block declaring `name`, `description`, `tags`, `requires`, `pipeline`,
//! and `tool`. The library rereads disk on demand with an mtime cache,
//! selects skills for a message by explicit mention or TF-IDF match,
//! resolves `requires` recursively (cycles fall back to the primary alone),
//! and appends usage telemetry to a JSONL log.

use chrono::Utc;
use picoagent_core::error::SkillError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::SystemTime;
use tracing::{debug, warn};

const EXPLICIT_MENTION_SCORE: f64 = 10.0;
const MIN_TOKEN_LEN: usize = 3;

/// A parsed skill file. Immutable snapshot; the library reparses when the
/// file's mtime changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub name: String,
    pub path: PathBuf,
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub pipeline: Vec<String>,
    /// Tool an explicit mention short-circuits the scheduler to
    #[serde(default)]
    pub tool: Option<String>,
    pub content: String,
}

/// Why a skill was activated for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActivationReason {
    ExplicitMention,
    KeywordMatch,
    Dependency,
    PipelineStep,
}

/// One selected skill with its score and the reason it was picked.
#[derive(Debug, Clone)]
pub struct SkillActivation {
    pub skill: Skill,
    pub score: f64,
    pub reason: ActivationReason,
}

#[derive(Debug, Serialize, Deserialize)]
struct UsageRecord {
    ts: String,
    skill: String,
    session_id: String,
}

struct CachedSkill {
    mtime: SystemTime,
    skill: Skill,
}

/// The skill library rooted at a directory of `<name>/SKILL.md` files.
pub struct SkillLibrary {
    skills_dir: PathBuf,
    usage_path: PathBuf,
    cache: Mutex<HashMap<PathBuf, CachedSkill>>,
    parse_count: AtomicUsize,
}

impl SkillLibrary {
    pub fn new(skills_dir: impl Into<PathBuf>, usage_path: impl Into<PathBuf>) -> Self {
        Self {
            skills_dir: skills_dir.into(),
            usage_path: usage_path.into(),
            cache: Mutex::new(HashMap::new()),
            parse_count: AtomicUsize::new(0),
        }
    }

    /// How many files have been parsed since construction. Reparses happen
    /// only when a file's mtime changes.
    pub fn parse_count(&self) -> usize {
        self.parse_count.load(Ordering::SeqCst)
    }

    /// All skills on disk, sorted by name. Hot-reloads changed files.
    pub fn list(&self) -> Vec<Skill> {
        let mut files = Vec::new();
        collect_skill_files(&self.skills_dir, &mut files);
        files.sort();

        let mut cache = self.cache.lock().expect("skill cache lock");
        let mut skills = Vec::new();
        for file in files {
            let Ok(meta) = std::fs::metadata(&file) else { continue };
            let Ok(mtime) = meta.modified() else { continue };

            let cached = cache.get(&file);
            let skill = match cached {
                Some(c) if c.mtime == mtime => c.skill.clone(),
                _ => {
                    let Some(skill) = parse_skill_file(&file) else { continue };
                    self.parse_count.fetch_add(1, Ordering::SeqCst);
                    cache.insert(file.clone(), CachedSkill { mtime, skill: skill.clone() });
                    skill
                }
            };
            skills.push(skill);
        }
        skills.sort_by(|a, b| a.name.cmp(&b.name));
        skills
    }

    /// One-line-per-skill summary for the system prompt.
    pub fn summary(&self) -> String {
        let skills = self.list();
        if skills.is_empty() {
            return String::new();
        }
        let mut lines = vec!["Available skills:".to_string()];
        for skill in &skills {
            lines.push(format!("- {}: {}", skill.name, skill.description));
        }
        lines.join("\n")
    }

    /// Select skills for a message.
    ///
    /// 1. Explicit `$name` or bare-word mention ranks highest.
    /// 2. Otherwise TF-IDF of message tokens against description + tags.
    /// 3. The primary's `requires` are added recursively; a dependency
    ///    cycle falls back to the primary alone.
    /// 4. The primary's `pipeline` steps are appended in declared order.
    pub fn select_for_message(&self, message: &str, max_active: usize) -> Vec<SkillActivation> {
        if max_active == 0 {
            return Vec::new();
        }
        let available = self.list();
        if available.is_empty() {
            return Vec::new();
        }
        let by_name: HashMap<&str, &Skill> =
            available.iter().map(|s| (s.name.as_str(), s)).collect();

        let text = message.to_lowercase();
        let message_tokens = tokenize(&text);
        let idf = inverse_document_frequencies(&available);

        let mut scored: Vec<(f64, ActivationReason, &Skill)> = Vec::new();
        for skill in &available {
            let explicit = mentions_skill(&text, &skill.name);
            let tfidf = tfidf_score(&message_tokens, skill, &idf);
            if explicit {
                scored.push((EXPLICIT_MENTION_SCORE + tfidf, ActivationReason::ExplicitMention, skill));
            } else if tfidf > 0.0 {
                scored.push((tfidf, ActivationReason::KeywordMatch, skill));
            }
        }
        if scored.is_empty() {
            return Vec::new();
        }
        scored.sort_by(|(sa, _, a), (sb, _, b)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.name.cmp(&b.name))
        });
        scored.truncate(max_active);

        let mut activations: Vec<SkillActivation> = scored
            .iter()
            .map(|(score, reason, skill)| SkillActivation {
                skill: (*skill).clone(),
                score: *score,
                reason: *reason,
            })
            .collect();
        let mut selected: HashSet<String> =
            activations.iter().map(|a| a.skill.name.clone()).collect();

        // Dependencies of the primary, at full activation
        let primary = activations[0].skill.clone();
        let primary_score = activations[0].score;
        match resolve_requires(&by_name, &primary.name) {
            Ok(deps) => {
                for dep in deps {
                    if selected.insert(dep.clone()) {
                        if let Some(skill) = by_name.get(dep.as_str()) {
                            activations.push(SkillActivation {
                                skill: (*skill).clone(),
                                score: primary_score,
                                reason: ActivationReason::Dependency,
                            });
                        }
                    }
                }
            }
            Err(e) => {
                // Cycle: keep the primary alone (dependencies dropped)
                warn!(skill = %primary.name, error = %e, "Skill dependency resolution failed");
                activations.truncate(1);
                selected = activations.iter().map(|a| a.skill.name.clone()).collect();
            }
        }

        // Pipeline steps of the primary, in declared order
        for step in &primary.pipeline {
            if selected.insert(step.clone()) {
                if let Some(skill) = by_name.get(step.as_str()) {
                    activations.push(SkillActivation {
                        skill: (*skill).clone(),
                        score: primary_score,
                        reason: ActivationReason::PipelineStep,
                    });
                }
            }
        }

        debug!(count = activations.len(), primary = %primary.name, "Skills selected");
        activations
    }

    /// Append a usage record to the telemetry log.
    pub fn record_use(&self, skill_name: &str, session_id: &str) {
        let record = UsageRecord {
            ts: Utc::now().to_rfc3339(),
            skill: skill_name.to_string(),
            session_id: session_id.to_string(),
        };
        if let Err(e) = append_jsonl(&self.usage_path, &record) {
            warn!(error = %e, "Failed to record skill usage");
        }
    }

    /// Fold the telemetry log into per-skill counts.
    pub fn usage_stats(&self) -> BTreeMap<String, u64> {
        let mut counts = BTreeMap::new();
        let Ok(raw) = std::fs::read_to_string(&self.usage_path) else {
            return counts;
        };
        for line in raw.lines().filter(|l| !l.trim().is_empty()) {
            if let Ok(record) = serde_json::from_str::<UsageRecord>(line) {
                *counts.entry(record.skill).or_insert(0) += 1;
            }
        }
        counts
    }
}

/// Transitive `requires` of `start` in dependency order, excluding `start`
/// itself. Fails with the offending path on a cycle.
pub fn resolve_requires(
    by_name: &HashMap<&str, &Skill>,
    start: &str,
) -> Result<Vec<String>, SkillError> {
    let mut resolved = Vec::new();
    let mut visited = HashSet::new();
    let mut path = Vec::new();
    visit(by_name, start, &mut visited, &mut path, &mut resolved)?;
    resolved.retain(|n| n != start);
    Ok(resolved)
}

fn visit(
    by_name: &HashMap<&str, &Skill>,
    name: &str,
    visited: &mut HashSet<String>,
    path: &mut Vec<String>,
    resolved: &mut Vec<String>,
) -> Result<(), SkillError> {
    if path.iter().any(|p| p == name) {
        let mut cycle = path.clone();
        cycle.push(name.to_string());
        return Err(SkillError::Cycle(cycle));
    }
    if !visited.insert(name.to_string()) {
        return Ok(());
    }
    path.push(name.to_string());
    if let Some(skill) = by_name.get(name) {
        for dep in &skill.requires {
            visit(by_name, dep, visited, path, resolved)?;
        }
    }
    path.pop();
    resolved.push(name.to_string());
    Ok(())
}

// ── Parsing ────────────────────────────────────────────────────────────

fn collect_skill_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else { return };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_skill_files(&path, out);
        } else if path.file_name().is_some_and(|n| n == "SKILL.md") {
            out.push(path);
        }
    }
}

fn parse_skill_file(path: &Path) -> Option<Skill> {
    let content = std::fs::read_to_string(path).ok()?;
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return None;
    }

    let (front_matter, body) = split_front_matter(trimmed);
    let default_name = path
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "skill".to_string());

    Some(Skill {
        name: front_matter
            .get("name")
            .map(|v| v.scalar.clone())
            .filter(|n| !n.is_empty())
            .unwrap_or(default_name),
        path: path.to_path_buf(),
        description: front_matter
            .get("description")
            .map(|v| v.scalar.clone())
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| first_prose_line(body)),
        tags: front_matter.get("tags").map(|v| v.list.clone()).unwrap_or_default(),
        requires: front_matter.get("requires").map(|v| v.list.clone()).unwrap_or_default(),
        pipeline: front_matter.get("pipeline").map(|v| v.list.clone()).unwrap_or_default(),
        tool: front_matter
            .get("tool")
            .map(|v| v.scalar.clone())
            .filter(|t| !t.is_empty()),
        content: trimmed.to_string(),
    })
}

#[derive(Default)]
struct FrontMatterValue {
    scalar: String,
    list: Vec<String>,
}

/// Split the optional leading `---` block into typed key/values. A file
/// without a closing fence is treated as having no front matter at all.
fn split_front_matter(content: &str) -> (HashMap<String, FrontMatterValue>, &str) {
    let Some(rest) = content.strip_prefix("---") else {
        return (HashMap::new(), content);
    };
    let Some(rest) = rest.strip_prefix('\n') else {
        return (HashMap::new(), content);
    };
    let Some(end) = rest.find("\n---") else {
        return (HashMap::new(), content);
    };

    let block = &rest[..end];
    let body_start = rest[end + 1..]
        .find('\n')
        .map(|i| end + 2 + i)
        .unwrap_or(rest.len());
    let body = &rest[body_start.min(rest.len())..];

    let mut values = HashMap::new();
    for line in block.lines() {
        if let Some((key, value)) = line.split_once(':') {
            values.insert(key.trim().to_string(), parse_front_matter_value(value.trim()));
        }
    }
    (values, body)
}

fn parse_front_matter_value(value: &str) -> FrontMatterValue {
    let list = if value.starts_with('[') && value.ends_with(']') {
        value[1..value.len() - 1]
            .split(',')
            .map(|item| item.trim().trim_matches(|c| c == '\'' || c == '"').to_string())
            .filter(|item| !item.is_empty())
            .collect()
    } else {
        Vec::new()
    };
    FrontMatterValue {
        scalar: value.trim_matches(|c| c == '\'' || c == '"').to_string(),
        list,
    }
}

fn first_prose_line(body: &str) -> String {
    body.lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.chars().take(180).collect())
        .unwrap_or_else(|| "Skill instructions".to_string())
}

// ── Scoring ────────────────────────────────────────────────────────────

fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            current.push(ch.to_ascii_lowercase());
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens.retain(|t| t.len() >= MIN_TOKEN_LEN);
    tokens
}

fn skill_document(skill: &Skill) -> Vec<String> {
    let mut doc = tokenize(&skill.name.to_lowercase());
    doc.extend(tokenize(&skill.description.to_lowercase()));
    for tag in &skill.tags {
        doc.extend(tokenize(&tag.to_lowercase()));
    }
    doc
}

fn inverse_document_frequencies(skills: &[Skill]) -> HashMap<String, f64> {
    let n = skills.len() as f64;
    let mut document_frequency: HashMap<String, usize> = HashMap::new();
    for skill in skills {
        let unique: HashSet<String> = skill_document(skill).into_iter().collect();
        for token in unique {
            *document_frequency.entry(token).or_insert(0) += 1;
        }
    }
    document_frequency
        .into_iter()
        .map(|(token, df)| (token, (1.0 + n / (1.0 + df as f64)).ln()))
        .collect()
}

fn tfidf_score(message_tokens: &[String], skill: &Skill, idf: &HashMap<String, f64>) -> f64 {
    if message_tokens.is_empty() {
        return 0.0;
    }
    let doc = skill_document(skill);
    if doc.is_empty() {
        return 0.0;
    }
    let mut term_frequency: HashMap<&str, usize> = HashMap::new();
    for token in &doc {
        *term_frequency.entry(token.as_str()).or_insert(0) += 1;
    }

    let unique_message: HashSet<&str> = message_tokens.iter().map(String::as_str).collect();
    unique_message
        .iter()
        .filter_map(|token| {
            let tf = *term_frequency.get(*token)? as f64 / doc.len() as f64;
            Some(tf * idf.get(*token).copied().unwrap_or(1.0))
        })
        .sum()
}

fn mentions_skill(text: &str, name: &str) -> bool {
    let name = name.to_lowercase();
    if text.contains(&format!("${name}")) {
        return true;
    }
    // Bare-word mention with boundary checks
    let bytes = text.as_bytes();
    let mut from = 0;
    while let Some(pos) = text[from..].find(&name) {
        let start = from + pos;
        let end = start + name.len();
        let left_ok = start == 0 || !is_word_byte(bytes[start - 1]);
        let right_ok = end == bytes.len() || !is_word_byte(bytes[end]);
        if left_ok && right_ok {
            return true;
        }
        from = end;
    }
    false
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

fn append_jsonl<T: Serialize>(path: &Path, record: &T) -> std::io::Result<()> {
    use std::io::Write;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    let line = serde_json::to_string(record)?;
    writeln!(file, "{line}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_skill(dir: &TempDir, name: &str, content: &str) {
        let skill_dir = dir.path().join(name);
        std::fs::create_dir_all(&skill_dir).unwrap();
        std::fs::write(skill_dir.join("SKILL.md"), content).unwrap();
    }

    fn library(dir: &TempDir) -> SkillLibrary {
        SkillLibrary::new(dir.path(), dir.path().join("skill_usage.jsonl"))
    }

    #[test]
    fn parses_front_matter_fields() {
        let dir = TempDir::new().unwrap();
        write_skill(
            &dir,
            "deploy",
            "---\nname: deploy\ndescription: Ship the service to production\ntags: [release, ship]\nrequires: [build]\npipeline: [build, deploy, announce]\ntool: shell\n---\n\n# Deploy\n\nRun the deploy script.\n",
        );
        write_skill(&dir, "build", "# Build\n\nCompile everything first.\n");

        let skills = library(&dir).list();
        assert_eq!(skills.len(), 2);
        let deploy = skills.iter().find(|s| s.name == "deploy").unwrap();
        assert_eq!(deploy.description, "Ship the service to production");
        assert_eq!(deploy.tags, vec!["release", "ship"]);
        assert_eq!(deploy.requires, vec!["build"]);
        assert_eq!(deploy.pipeline, vec!["build", "deploy", "announce"]);
        assert_eq!(deploy.tool.as_deref(), Some("shell"));

        // No front matter: name from directory, description from first prose line
        let build = skills.iter().find(|s| s.name == "build").unwrap();
        assert_eq!(build.description, "Compile everything first.");
    }

    #[test]
    fn explicit_mention_outranks_keyword_match() {
        let dir = TempDir::new().unwrap();
        write_skill(&dir, "deploy", "---\ndescription: Ship code to production servers\n---\nbody");
        write_skill(&dir, "review", "---\ndescription: Review code changes carefully\n---\nbody");

        let lib = library(&dir);
        let picked = lib.select_for_message("please $review this code before production", 3);
        assert!(!picked.is_empty());
        assert_eq!(picked[0].skill.name, "review");
        assert_eq!(picked[0].reason, ActivationReason::ExplicitMention);
    }

    #[test]
    fn keyword_match_via_tfidf() {
        let dir = TempDir::new().unwrap();
        write_skill(&dir, "deploy", "---\ndescription: Ship the release to production\n---\nbody");
        write_skill(&dir, "notes", "---\ndescription: Take meeting notes\n---\nbody");

        let lib = library(&dir);
        let picked = lib.select_for_message("how do I get this release into production?", 3);
        assert_eq!(picked[0].skill.name, "deploy");
        assert_eq!(picked[0].reason, ActivationReason::KeywordMatch);
    }

    #[test]
    fn no_match_returns_empty() {
        let dir = TempDir::new().unwrap();
        write_skill(&dir, "deploy", "---\ndescription: Ship the release\n---\nbody");
        let picked = library(&dir).select_for_message("completely unrelated chatter", 3);
        assert!(picked.is_empty());
    }

    #[test]
    fn requires_are_added_recursively() {
        let dir = TempDir::new().unwrap();
        write_skill(&dir, "deploy", "---\ndescription: Ship to production\nrequires: [build]\n---\nbody");
        write_skill(&dir, "build", "---\ndescription: Compile artifacts\nrequires: [lint]\n---\nbody");
        write_skill(&dir, "lint", "---\ndescription: Check style\n---\nbody");

        let picked = library(&dir).select_for_message("$deploy now", 5);
        let names: Vec<&str> = picked.iter().map(|a| a.skill.name.as_str()).collect();
        assert!(names.contains(&"deploy"));
        assert!(names.contains(&"build"));
        assert!(names.contains(&"lint"));
        assert!(picked
            .iter()
            .filter(|a| a.skill.name != "deploy")
            .all(|a| a.reason == ActivationReason::Dependency));
    }

    #[test]
    fn dependency_cycle_falls_back_to_primary() {
        let dir = TempDir::new().unwrap();
        write_skill(&dir, "deploy", "---\ndescription: Ship it\nrequires: [build]\n---\nbody");
        write_skill(&dir, "build", "---\ndescription: Compile it\nrequires: [deploy]\n---\nbody");

        let picked = library(&dir).select_for_message("$deploy now", 5);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].skill.name, "deploy");
    }

    #[test]
    fn resolve_requires_reports_cycle_path() {
        let a = Skill {
            name: "a".into(),
            path: PathBuf::new(),
            description: String::new(),
            tags: vec![],
            requires: vec!["b".into()],
            pipeline: vec![],
            tool: None,
            content: String::new(),
        };
        let mut b = a.clone();
        b.name = "b".into();
        b.requires = vec!["a".into()];
        let by_name: HashMap<&str, &Skill> = [("a", &a), ("b", &b)].into_iter().collect();

        let err = resolve_requires(&by_name, "a").unwrap_err();
        match err {
            SkillError::Cycle(path) => assert_eq!(path, vec!["a", "b", "a"]),
            other => panic!("expected Cycle, got {other:?}"),
        }
    }

    #[test]
    fn pipeline_steps_follow_in_declared_order() {
        let dir = TempDir::new().unwrap();
        write_skill(
            &dir,
            "release",
            "---\ndescription: Cut a release\npipeline: [changelog, tag]\n---\nbody",
        );
        write_skill(&dir, "changelog", "---\ndescription: Write the changelog\n---\nbody");
        write_skill(&dir, "tag", "---\ndescription: Tag the commit\n---\nbody");

        let picked = library(&dir).select_for_message("$release please", 5);
        let names: Vec<&str> = picked.iter().map(|a| a.skill.name.as_str()).collect();
        assert_eq!(names, vec!["release", "changelog", "tag"]);
        assert_eq!(picked[1].reason, ActivationReason::PipelineStep);
        assert_eq!(picked[2].reason, ActivationReason::PipelineStep);
    }

    #[test]
    fn mtime_cache_avoids_reparsing() {
        let dir = TempDir::new().unwrap();
        write_skill(&dir, "deploy", "---\ndescription: first version\n---\nbody");

        let lib = library(&dir);
        lib.list();
        lib.list();
        assert_eq!(lib.parse_count(), 1, "unchanged file must not be reparsed");

        // Rewriting bumps mtime and triggers a reparse
        std::thread::sleep(std::time::Duration::from_millis(20));
        write_skill(&dir, "deploy", "---\ndescription: second version\n---\nbody");
        let skills = lib.list();
        assert_eq!(skills[0].description, "second version");
        assert_eq!(lib.parse_count(), 2);
    }

    #[test]
    fn usage_telemetry_roundtrip() {
        let dir = TempDir::new().unwrap();
        let lib = library(&dir);
        lib.record_use("deploy", "cli:local");
        lib.record_use("deploy", "cli:local");
        lib.record_use("review", "telegram:42");

        let stats = lib.usage_stats();
        assert_eq!(stats.get("deploy"), Some(&2));
        assert_eq!(stats.get("review"), Some(&1));

        let raw = std::fs::read_to_string(dir.path().join("skill_usage.jsonl")).unwrap();
        assert_eq!(raw.lines().count(), 3);
        assert!(raw.contains("\"session_id\":\"telegram:42\""));
    }

    #[test]
    fn missing_skills_dir_is_empty() {
        let lib = SkillLibrary::new("/nonexistent/skills", "/nonexistent/usage.jsonl");
        assert!(lib.list().is_empty());
        assert!(lib.summary().is_empty());
    }
}
