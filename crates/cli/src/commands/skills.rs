//! `picoagent reload-skills` — re-scan the skills directory.

use picoagent_config::AppConfig;
use picoagent_skills::SkillLibrary;

use crate::CliResult;

pub async fn reload() -> CliResult {
    let library = SkillLibrary::new(AppConfig::skills_dir(), AppConfig::skill_usage_path());
    let skills = library.list();
    if skills.is_empty() {
        println!(
            "no skills found under {} (add <name>/SKILL.md files)",
            AppConfig::skills_dir().display()
        );
        return Ok(());
    }

    let stats = library.usage_stats();
    println!("{} skill(s) loaded:", skills.len());
    for skill in &skills {
        let uses = stats.get(&skill.name).copied().unwrap_or(0);
        let mut annotations = Vec::new();
        if !skill.requires.is_empty() {
            annotations.push(format!("requires: {}", skill.requires.join(", ")));
        }
        if !skill.pipeline.is_empty() {
            annotations.push(format!("pipeline: {}", skill.pipeline.join(" -> ")));
        }
        if let Some(tool) = &skill.tool {
            annotations.push(format!("tool: {tool}"));
        }
        let suffix = if annotations.is_empty() {
            String::new()
        } else {
            format!(" [{}]", annotations.join("; "))
        };
        println!("- {} ({} uses): {}{suffix}", skill.name, uses, skill.description);
    }
    Ok(())
}
