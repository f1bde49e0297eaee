//! Markdown export of a conversation

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::Result;
use crate::state::{ChatMessage, ChatRole};

pub const EXPORT_FILE_NAME: &str = "conversation.md";

/// Each user turn becomes `# Question n`; each sibling answer `# Answer n.k`
pub fn to_markdown(messages: &[ChatMessage]) -> String {
    let mut sections: Vec<String> = Vec::new();
    let mut question = 0usize;

    for msg in messages {
        match msg.role {
            ChatRole::System => {}
            ChatRole::User => {
                question += 1;
                sections.push(format!("# Question {}\n\n{}", question, msg.content.trim_end()));
            }
            ChatRole::Assistant => {
                for (k, answer) in msg.sibling_answers().iter().enumerate() {
                    sections.push(format!("# Answer {}.{}\n\n{}", question, k + 1, answer.trim_end()));
                }
            }
        }
    }

    if sections.is_empty() {
        return String::new();
    }
    let mut document = sections.join("\n\n");
    document.push('\n');
    document
}

/// Write `conversation.md` into `dir` and return its path
pub fn export_markdown(messages: &[ChatMessage], dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(EXPORT_FILE_NAME);
    fs::write(&path, to_markdown(messages))?;
    info!(path = %path.display(), messages = messages.len(), "conversation exported");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_two_sibling_answers() {
        let mut answer = ChatMessage::assistant("First answer");
        let slot = answer.push_sibling();
        answer.set_answer(slot, "Second answer");
        let messages = vec![ChatMessage::user("Why is the sky blue?", Vec::new()), answer];

        let doc = to_markdown(&messages);

        assert_eq!(
            doc,
            "# Question 1\n\nWhy is the sky blue?\n\n\
             # Answer 1.1\n\nFirst answer\n\n\
             # Answer 1.2\n\nSecond answer\n"
        );
        assert_eq!(doc.matches("# Question").count(), 1);
        let first = doc.find("# Answer 1.1").unwrap();
        let second = doc.find("# Answer 1.2").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_numbering_follows_questions() {
        let messages = vec![
            ChatMessage::system("ignored"),
            ChatMessage::user("one", Vec::new()),
            ChatMessage::assistant("a"),
            ChatMessage::user("two", Vec::new()),
            ChatMessage::assistant("b"),
        ];

        let doc = to_markdown(&messages);

        assert!(!doc.contains("ignored"));
        assert!(doc.contains("# Question 2\n\ntwo"));
        assert!(doc.contains("# Answer 2.1\n\nb"));
    }

    #[test]
    fn test_empty_conversation() {
        assert_eq!(to_markdown(&[]), "");
    }

    #[test]
    fn test_export_writes_conversation_md() {
        let dir = tempdir().unwrap();
        let messages = vec![ChatMessage::user("hi", Vec::new())];

        let path = export_markdown(&messages, dir.path()).unwrap();

        assert_eq!(path.file_name().unwrap(), EXPORT_FILE_NAME);
        assert_eq!(fs::read_to_string(path).unwrap(), "# Question 1\n\nhi\n");
    }
}
