//! 文本指令解析
//!
//! - `/help` `/time` `/date` `/summary`
//! - 关键词 `摘要` `總結` `总结` `summary`
//! - `#summary once|on|off|at HH[:MM]|tz <Area/City>|lang zh|en`

use std::sync::OnceLock;

use regex::Regex;

use crate::llm::Lang;

pub const HELP_TEXT: &str = "指令：\n\
/time 现在时间\n\
/date 今日日期\n\
/summary 立即汇整昨天摘要（只此群）\n\
#summary on|off 开启/关闭本群每日摘要\n\
#summary at HH 设定每日摘要时间\n\
#summary tz Asia/Taipei 设定时区\n\
#summary lang zh|en 设定摘要语言";

pub const SUMMARY_USAGE: &str = "用法：#summary once|on|off|at HH[:MM]|tz <Area/City>|lang zh|en";

/// 直接触发摘要的关键词（整句匹配）
const SUMMARY_KEYWORDS: [&str; 4] = ["摘要", "總結", "总结", "summary"];

static AT_RE: OnceLock<Regex> = OnceLock::new();
static TZ_RE: OnceLock<Regex> = OnceLock::new();
static LANG_RE: OnceLock<Regex> = OnceLock::new();

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Time,
    Date,
    /// 立即摘要昨日（`/summary`、关键词、`#summary once`）
    SummaryNow,
    SummaryOn,
    SummaryOff,
    /// 已夹到 0..=23
    SummaryAt(u32),
    SummaryTz(String),
    SummaryLang(Lang),
    /// `#summary` 后的参数无法识别
    SummaryUsage,
}

impl Command {
    /// 是否修改本群的摘要订阅设置
    pub fn changes_subscription(&self) -> bool {
        matches!(
            self,
            Command::SummaryOn
                | Command::SummaryOff
                | Command::SummaryAt(_)
                | Command::SummaryTz(_)
                | Command::SummaryLang(_)
        )
    }
}

/// 解析指令；普通文本返回 None
pub fn parse_command(text: &str) -> Option<Command> {
    let text = text.trim();
    let lower = text.to_lowercase();

    if lower.starts_with("/help") {
        return Some(Command::Help);
    }
    if lower.starts_with("/time") {
        return Some(Command::Time);
    }
    if lower.starts_with("/date") {
        return Some(Command::Date);
    }
    if lower.starts_with("/summary") || SUMMARY_KEYWORDS.contains(&lower.as_str()) {
        return Some(Command::SummaryNow);
    }
    if lower.starts_with("#summary") {
        return Some(parse_summary_subcommand(text));
    }
    None
}

fn parse_summary_subcommand(text: &str) -> Command {
    let lower = text.to_lowercase();
    let args = lower.trim_start_matches("#summary").trim_start();

    // once 要先于 on 判断
    if args.starts_with("once") {
        return Command::SummaryNow;
    }
    if args.starts_with("off") {
        return Command::SummaryOff;
    }
    if args.starts_with("on") {
        return Command::SummaryOn;
    }

    let at = AT_RE.get_or_init(|| Regex::new(r"^#summary\s+at\s+(\d{1,2})(?::\d{2})?").unwrap());
    if let Some(caps) = at.captures(&lower) {
        if let Ok(hour) = caps[1].parse::<u32>() {
            return Command::SummaryAt(hour.min(23));
        }
    }

    // 时区区分大小写，在原文上匹配
    let tz = TZ_RE.get_or_init(|| Regex::new(r"(?i)^#summary\s+tz\s+([\w/+\-]+)").unwrap());
    if let Some(caps) = tz.captures(text) {
        return Command::SummaryTz(caps[1].to_string());
    }

    let lang = LANG_RE.get_or_init(|| Regex::new(r"^#summary\s+lang\s+(zh|en)\b").unwrap());
    if let Some(caps) = lang.captures(&lower) {
        return Command::SummaryLang(Lang::from_code(&caps[1]));
    }

    Command::SummaryUsage
}
