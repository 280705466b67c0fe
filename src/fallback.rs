// Pre-authored questions used to keep the round going when chat is silent

use crate::error::{PickerError, PickerResult};
use std::path::Path;

pub const DEFAULT_QUESTIONS: &[&str] = &[
    "什么是宇宙中最神秘的事物？",
    "如果你能拥有任何一个超能力，你会选择什么？",
    "在这个世界上，什么东西最让你感到惊奇？",
    "假如你能够和一个历史人物进行面对面的交流，你会选择谁？为什么？",
    "如果你有一百万美元，你会用它来做什么？",
    "什么是最好的书籍？为什么？",
    "你最喜欢的电影是哪一部？为什么？",
    "你认为人工智能能够取代人类吗？",
    "如果你能够设计一个机器人，你会让它具备哪些功能？",
    "你认为世界上最大的难题是什么？",
    "你认为自然界中最有趣的生物是什么？为什么？",
    "你认为宇宙中最有趣的行星是什么？为什么？",
    "你觉得哪个发明最改变了世界？",
    "如果你能够拥有一个超能力，你会选择什么？",
    "如果你能够穿越时间，你会选择去哪个年代？",
    "你认为最有趣的科学理论是什么？",
    "你最喜欢的食物是什么？为什么？",
    "你最喜欢的音乐类型是什么？",
    "你认为哪种技术能够改变世界？",
    "你认为自然界中最美的景色是什么？为什么？",
    "你认为未来最有可能会发生什么事情？",
    "如果你能够前往任何一个地方，你会去哪里？为什么？",
    "你最喜欢的运动是什么？",
    "你认为人类最伟大的成就是什么？",
    "你认为未来的交通方式会是什么样子？",
    "你认为人类最需要改变的习惯是什么？",
    "你认为哪个国家最有可能成为全球领导者？",
    "如果你能够拥有一个神秘的能力，你会选择什么？",
    "你最喜欢的艺术形式是什么？为什么？",
    "你认为未来的教育方式会是什么样子？",
];

pub fn default_questions() -> Vec<String> {
    DEFAULT_QUESTIONS.iter().map(|q| q.to_string()).collect()
}

/// Parse a question list: one question per line, blank lines and `#` comments skipped
pub fn parse_questions(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

pub fn load_questions(path: &Path) -> PickerResult<Vec<String>> {
    let contents = std::fs::read_to_string(path)?;
    let questions = parse_questions(&contents);
    if questions.is_empty() {
        return Err(PickerError::InvalidConfig(format!(
            "fallback question file {} has no questions",
            path.display()
        )));
    }
    Ok(questions)
}
