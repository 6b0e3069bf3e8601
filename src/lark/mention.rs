//! 群聊 @ 判断与清理

use std::sync::OnceLock;

use regex::Regex;

use crate::lark::event::MessageData;

static PLACEHOLDER_RE: OnceLock<Regex> = OnceLock::new();
static AT_TAG_RE: OnceLock<Regex> = OnceLock::new();

/// 名字归一化：去空白、小写、去掉前导 @ 与所有空格
fn normalize_name(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .trim_start_matches('@')
        .replace(' ', "")
}

/// 群消息是否 @ 了机器人
///
/// 任一条件成立即可：mentions 中的名字与 bot_name 相同（宽松比较）、
/// mentions 中的 open_id 等于 bot_open_id、正文以 `@<bot_name>` 开头。
pub fn is_bot_mentioned(message: &MessageData, bot_name: &str, bot_open_id: Option<&str>) -> bool {
    let want = normalize_name(bot_name);
    let bot_open_id = bot_open_id.map(str::trim).filter(|id| !id.is_empty());

    for mention in &message.mentions {
        if !want.is_empty() {
            if let Some(name) = mention.name.as_deref() {
                if normalize_name(name) == want {
                    return true;
                }
            }
        }
        if let (Some(bot_id), Some(open_id)) = (
            bot_open_id,
            mention.id.as_ref().and_then(|id| id.open_id.as_deref()),
        ) {
            if bot_id == open_id {
                return true;
            }
        }
    }

    if want.is_empty() {
        return false;
    }
    let text = message.text();
    text.trim_start().starts_with('@') && normalize_name(&text).starts_with(&want)
}

/// 去掉 `@_user_N` 占位符、`<at ...>...</at>` 标签与前导的 `@<bot_name>`
pub fn strip_mentions(text: &str, bot_name: &str) -> String {
    let placeholder = PLACEHOLDER_RE.get_or_init(|| Regex::new(r"@_user_\d+").unwrap());
    let at_tag = AT_TAG_RE.get_or_init(|| Regex::new(r"(?s)<at\b[^>]*>.*?</at>").unwrap());

    let cleaned = at_tag.replace_all(text, "");
    let cleaned = placeholder.replace_all(&cleaned, "");
    let cleaned = cleaned.trim();

    let bot = bot_name.trim();
    if !bot.is_empty() {
        if let Some(rest) = cleaned.strip_prefix('@') {
            if rest.len() >= bot.len()
                && rest.is_char_boundary(bot.len())
                && rest[..bot.len()].eq_ignore_ascii_case(bot)
            {
                return rest[bot.len()..].trim().to_string();
            }
        }
    }
    cleaned.to_string()
}
