//! Long-lived coaching profile
//!
//! A single Markdown file the model rewrites wholesale at the end of each day.
//! The plan generator reads it so tomorrow's schedule reflects today's streaks
//! and weak spots.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::llm::{ModelOutcome, ModelRouter};
use crate::logging;
use crate::prompts;

pub const DEFAULT_PROFILE: &str = "# COACHING PROFILE\n**Status:** Active\n";

#[derive(Debug, Clone, PartialEq)]
pub enum RewriteOutcome {
    Updated,
    /// The old profile is still on disk.
    Kept { reason: String },
}

pub struct ProfileMemory {
    path: PathBuf,
}

/// Drop ```markdown fences the model likes to wrap documents in.
fn clean_profile_response(text: &str) -> String {
    text.replace("```markdown", "")
        .replace("```md", "")
        .replace("```", "")
        .trim()
        .to_string()
}

impl ProfileMemory {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current profile text, writing the default header first if the file is missing.
    pub fn read(&self) -> io::Result<String> {
        if !self.path.exists() {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            fs::write(&self.path, DEFAULT_PROFILE)?;
        }
        fs::read_to_string(&self.path)
    }

    /// Replace the file contents through a temp file so a crash never leaves
    /// half a profile behind.
    fn write(&self, content: &str) -> io::Result<()> {
        let tmp = self.path.with_extension("md.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)
    }

    /// Ask the model to rewrite the profile from today's logs and chat. Only a
    /// non-empty reply replaces the file.
    pub async fn rewrite(
        &self,
        router: &ModelRouter,
        logs: &str,
        chat_summary: &str,
        session: Option<&str>,
    ) -> io::Result<RewriteOutcome> {
        let current = self.read()?;
        let prompt = prompts::profile_rewrite_prompt(&current, logs, chat_summary);

        let text = match router.complete(&prompt, session).await {
            ModelOutcome::Reply { text, .. } => clean_profile_response(&text),
            ModelOutcome::Failed { reason, .. } => {
                logging::log_conversation(session, &format!("Profile rewrite skipped: {}", reason));
                return Ok(RewriteOutcome::Kept { reason });
            }
        };

        if text.is_empty() {
            return Ok(RewriteOutcome::Kept {
                reason: "the model returned an empty profile".to_string(),
            });
        }

        self.write(&text)?;
        logging::log_conversation(session, &format!("Profile rewritten ({} chars)", text.len()));
        Ok(RewriteOutcome::Updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::{router, ScriptedClient};
    use std::sync::Arc;

    fn temp_profile() -> PathBuf {
        std::env::temp_dir().join(format!("coach-profile-{}.md", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_read_creates_default() {
        let path = temp_profile();
        let memory = ProfileMemory::new(&path);
        assert_eq!(memory.read().unwrap(), DEFAULT_PROFILE);
        assert!(path.exists());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_clean_profile_response() {
        assert_eq!(clean_profile_response("```markdown\n# P\nok\n```"), "# P\nok");
    }

    #[tokio::test]
    async fn test_rewrite_replaces_file() {
        let path = temp_profile();
        let memory = ProfileMemory::new(&path);
        let client = Arc::new(ScriptedClient::new(vec![Ok("```markdown\n# NEW\nSkips dips.\n```".to_string())]));

        let outcome = memory
            .rewrite(&router(client.clone()), "Dips 0/20", "user: tired", None)
            .await
            .unwrap();
        assert_eq!(outcome, RewriteOutcome::Updated);
        assert_eq!(memory.read().unwrap(), "# NEW\nSkips dips.");

        let prompt = client.last_prompt().unwrap();
        assert!(prompt.contains(DEFAULT_PROFILE.trim()));
        assert!(prompt.contains("Dips 0/20"));
        let _ = fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_failed_rewrite_keeps_old_profile() {
        let path = temp_profile();
        fs::write(&path, "# OLD").unwrap();
        let memory = ProfileMemory::new(&path);
        let client = Arc::new(ScriptedClient::new(vec![]));

        let outcome = memory.rewrite(&router(client), "logs", "chat", None).await.unwrap();
        assert!(matches!(outcome, RewriteOutcome::Kept { .. }));
        assert_eq!(memory.read().unwrap(), "# OLD");
        let _ = fs::remove_file(&path);
    }
}
