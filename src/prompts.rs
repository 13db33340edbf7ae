// Prompt templates for the coach. Placeholders are `{name}` markers filled in
// a single pass, so text that gets substituted is never scanned again.

use crate::db::ChatTurn;

pub const COACH_REPLY_PROMPT: &str = r#"You are a strict but fair discipline coach. You track the user's habits and goals and answer in two to four short sentences.

CURRENT TIME: {time}

TODAY'S PROGRESS:
{progress}

SYSTEM UPDATE:
{update}

RECENT CONVERSATION:
{history}

USER: "{message}"

RULES:
- If the system update lists saved entries, acknowledge them first (e.g. "Logged 15 pullups.").
- Point at the goal that is furthest behind when it is relevant.
- No lists, no markdown headings, no emojis.
- Never invent numbers that are not in the progress above."#;

pub const PLAN_PROMPT: &str = r#"You are a strict discipline coach building today's schedule.

USER PROFILE:
{profile}

CURRENT STATUS:
Time: {time}
Goals:
{progress}

REQUEST: "{request}"

TASK: Create a strict time-blocked schedule for the rest of today, starting after the current time. Prioritise goals that are still incomplete.

OUTPUT FORMAT: one task per line as HH:MM|Task, nothing else. Example:
09:00|DSA practice
10:00|Deep Work block"#;

pub const PROFILE_REWRITE_PROMPT: &str = r#"You are the Super Coach. Rewrite the student profile based on today's logs.

OLD PROFILE:
{profile}

LOGS:
{logs}

CHAT:
{chat}

TASK: Return the complete updated profile in Markdown. Keep what is still true, note weaknesses, consistency streaks and excuses that keep coming back. Output the profile only."#;

fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 1..];
        let hit = values.iter().find(|(key, _)| {
            tail.strip_prefix(*key).is_some_and(|after| after.starts_with('}'))
        });
        match hit {
            Some((key, value)) => {
                out.push_str(value);
                rest = &tail[key.len() + 1..];
            }
            None => {
                out.push('{');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Chat turns as `sender: message` lines, oldest first.
pub fn format_chat(turns: &[ChatTurn]) -> String {
    if turns.is_empty() {
        return "(no earlier messages)".to_string();
    }
    turns
        .iter()
        .map(|t| format!("{}: {}", t.sender.as_str(), t.message))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn coach_reply_prompt(time: &str, progress: &str, update: &str, history: &str, message: &str) -> String {
    let update = if update.is_empty() { "Nothing logged." } else { update };
    fill(
        COACH_REPLY_PROMPT,
        &[
            ("time", time),
            ("progress", progress),
            ("update", update),
            ("history", history),
            ("message", message),
        ],
    )
}

pub fn plan_prompt(time: &str, progress: &str, profile: Option<&str>, request: &str) -> String {
    let profile = profile
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or("(no profile yet)");
    fill(
        PLAN_PROMPT,
        &[
            ("profile", profile),
            ("time", time),
            ("progress", progress),
            ("request", request),
        ],
    )
}

pub fn profile_rewrite_prompt(profile: &str, logs: &str, chat: &str) -> String {
    fill(
        PROFILE_REWRITE_PROMPT,
        &[("profile", profile), ("logs", logs), ("chat", chat)],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Sender;
    use chrono::NaiveDate;

    #[test]
    fn test_plan_prompt_embeds_everything() {
        let prompt = plan_prompt("07:30", "- Pullups [Athleticism]: 0/15 reps (0%)", None, "Plan my day");
        assert!(prompt.contains("Time: 07:30"));
        assert!(prompt.contains("Pullups [Athleticism]"));
        assert!(prompt.contains("(no profile yet)"));
        assert!(prompt.contains("REQUEST: \"Plan my day\""));
        assert!(prompt.contains("HH:MM|Task"));
        assert!(!prompt.contains('{'));
    }

    #[test]
    fn test_reply_prompt_defaults_empty_update() {
        let prompt = coach_reply_prompt("10:00", "none", "", "(no earlier messages)", "hi");
        assert!(prompt.contains("Nothing logged."));
        assert!(prompt.contains("USER: \"hi\""));
    }

    #[test]
    fn test_format_chat() {
        let ts = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(9, 0, 0).unwrap();
        let turns = vec![
            ChatTurn {
                timestamp: ts,
                sender: Sender::User,
                message: "did 15 pullups".to_string(),
            },
            ChatTurn {
                timestamp: ts,
                sender: Sender::Assistant,
                message: "Logged.".to_string(),
            },
        ];
        assert_eq!(format_chat(&turns), "user: did 15 pullups\nassistant: Logged.");
        assert_eq!(format_chat(&[]), "(no earlier messages)");
    }

    #[test]
    fn test_placeholders_inside_user_text_are_left_alone() {
        let prompt = plan_prompt("07:30", "none", Some("Likes {request} and {time} jokes"), "plan {profile}");
        assert!(prompt.contains("Likes {request} and {time} jokes"));
        assert!(prompt.contains("Time: 07:30"));
        assert!(prompt.contains("REQUEST: \"plan {profile}\""));

        let prompt = coach_reply_prompt("10:00", "none", "", "user: {message}", "hi {update}");
        assert!(prompt.contains("user: {message}"));
        assert!(prompt.contains("USER: \"hi {update}\""));
    }
}
