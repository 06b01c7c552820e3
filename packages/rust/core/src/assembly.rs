//! Numeral-ordered assembly for ordered-output formatters.
//!
//! Display order is re-derived from a number parsed out of each title. Titles with
//! no recognizable number sort first as [`ChapterNumber::Unparsed`]. Gaps between
//! parsed numbers get an explicit stand-in chapter.

use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use novelpull_shared::{ChapterNumber, ContentMap, OrderedChapter, PLACEHOLDER_TEXT};

/// Widest numbering gap that is filled with stand-ins; wider gaps are left as is.
pub const MAX_GAP_FILL: u32 = 10_000;

/// Which capture a title pattern yields.
enum Capture {
    Arabic,
    Chinese,
}

static TITLE_PATTERNS: LazyLock<Vec<(Regex, Capture)>> = LazyLock::new(|| {
    [
        (r"第\s*(\d+)\s*章", Capture::Arabic),
        (r"第\s*([零〇一二两三四五六七八九十百千万]+)\s*章", Capture::Chinese),
        (r"章节?\s*(\d+)", Capture::Arabic),
        (r"(\d+)\s*章", Capture::Arabic),
        (r"(?i)chapter\s*(\d+)", Capture::Arabic),
        (r"(?i)ch\s*(\d+)", Capture::Arabic),
        (r"^(\d+)", Capture::Arabic),
    ]
    .into_iter()
    .map(|(pattern, capture)| (Regex::new(pattern).expect("valid regex"), capture))
    .collect()
});

/// Parse the chapter number out of a title.
///
/// Patterns are tried in order; a pattern whose capture does not parse (for example
/// a non-ASCII digit run) falls through to the next one.
pub fn chapter_number(title: &str) -> ChapterNumber {
    for (regex, capture) in TITLE_PATTERNS.iter() {
        let Some(digits) = regex.captures(title).and_then(|c| c.get(1)) else {
            continue;
        };
        let parsed = match capture {
            Capture::Arabic => digits.as_str().parse::<u32>().ok(),
            Capture::Chinese => parse_chinese_numeral(digits.as_str()),
        };
        if let Some(n) = parsed {
            return ChapterNumber::Number(n);
        }
    }
    ChapterNumber::Unparsed
}

/// Parse a spelled-out Chinese numeral such as `十二`, `二十`, `一百零五`, `两千`.
pub fn parse_chinese_numeral(text: &str) -> Option<u32> {
    let mut total: u32 = 0;
    let mut section: u32 = 0;
    let mut digit: u32 = 0;
    let mut seen = false;

    for c in text.chars() {
        seen = true;
        let value = match c {
            '零' | '〇' => Some(0),
            '一' => Some(1),
            '二' | '两' => Some(2),
            '三' => Some(3),
            '四' => Some(4),
            '五' => Some(5),
            '六' => Some(6),
            '七' => Some(7),
            '八' => Some(8),
            '九' => Some(9),
            _ => None,
        };
        if let Some(v) = value {
            digit = v;
            continue;
        }

        let unit = match c {
            '十' => 10,
            '百' => 100,
            '千' => 1000,
            '万' => 10_000,
            _ => return None,
        };
        if unit == 10_000 {
            total = total.checked_add(section + digit)?.checked_mul(unit)?;
            section = 0;
        } else {
            // A bare unit ("十二") means one of it.
            let multiplier = if digit == 0 { 1 } else { digit };
            section = section.checked_add(multiplier * unit)?;
        }
        digit = 0;
    }

    if !seen {
        return None;
    }
    total.checked_add(section)?.checked_add(digit)
}

/// Stand-in title for a missing chapter number.
pub fn missing_title(number: u32) -> String {
    format!("第 {number} 章 当前章节缺失")
}

/// Order `content` by title numeral and fill numbering gaps.
///
/// Unparsed titles come first in their original order; the sort is stable, so
/// chapters sharing a number keep resolution order.
pub fn assemble_ordered(content: &ContentMap) -> Vec<OrderedChapter> {
    let mut chapters: Vec<OrderedChapter> = content
        .iter()
        .map(|(title, body)| OrderedChapter {
            number: chapter_number(title),
            title: title.to_string(),
            content: body.to_string(),
            missing: false,
        })
        .collect();
    chapters.sort_by_key(|c| c.number);

    let mut ordered = Vec::with_capacity(chapters.len());
    let mut previous: Option<u32> = None;
    for chapter in chapters {
        if let (Some(prev), Some(current)) = (previous, chapter.number.value()) {
            let gap = current.saturating_sub(prev).saturating_sub(1);
            if gap > MAX_GAP_FILL {
                warn!(from = prev, to = current, "numbering gap too wide to fill");
            } else if gap > 0 {
                // gap > 0 means current >= prev + 2, so prev + 1 cannot overflow.
                for n in (prev + 1)..current {
                    warn!(number = n, "missing chapter in numbering");
                    ordered.push(OrderedChapter {
                        number: ChapterNumber::Number(n),
                        title: missing_title(n),
                        content: PLACEHOLDER_TEXT.to_string(),
                        missing: true,
                    });
                }
            }
        }
        if let Some(current) = chapter.number.value() {
            previous = Some(current);
        }
        ordered.push(chapter);
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(titles: &[&str]) -> ContentMap {
        let mut map = ContentMap::new();
        for title in titles {
            map.insert(*title, format!("{title} 正文")).unwrap();
        }
        map
    }

    #[test]
    fn parses_title_conventions() {
        assert_eq!(chapter_number("第12章 风起"), ChapterNumber::Number(12));
        assert_eq!(chapter_number("第 3 章"), ChapterNumber::Number(3));
        assert_eq!(chapter_number("第十二章 云涌"), ChapterNumber::Number(12));
        assert_eq!(chapter_number("第一百零五章"), ChapterNumber::Number(105));
        assert_eq!(chapter_number("章节7"), ChapterNumber::Number(7));
        assert_eq!(chapter_number("8章 夜"), ChapterNumber::Number(8));
        assert_eq!(chapter_number("CHAPTER 9: Dawn"), ChapterNumber::Number(9));
        assert_eq!(chapter_number("Ch 10"), ChapterNumber::Number(10));
        assert_eq!(chapter_number("11 回归"), ChapterNumber::Number(11));
        assert_eq!(chapter_number("序章 楔子"), ChapterNumber::Unparsed);
    }

    #[test]
    fn chinese_numerals() {
        assert_eq!(parse_chinese_numeral("十"), Some(10));
        assert_eq!(parse_chinese_numeral("二十"), Some(20));
        assert_eq!(parse_chinese_numeral("两千零一"), Some(2001));
        assert_eq!(parse_chinese_numeral("一万二千"), Some(12000));
        assert_eq!(parse_chinese_numeral("零"), Some(0));
        assert_eq!(parse_chinese_numeral(""), None);
        assert_eq!(parse_chinese_numeral("十x"), None);
    }

    #[test]
    fn unparsed_is_distinct_from_zero_and_sorts_first() {
        assert_ne!(chapter_number("第0章"), chapter_number("楔子"));
        let ordered = assemble_ordered(&content(&["第0章 序", "第1章", "楔子"]));
        let titles: Vec<_> = ordered.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["楔子", "第0章 序", "第1章"]);
    }

    #[test]
    fn fills_numbering_gaps_with_stand_ins() {
        let ordered = assemble_ordered(&content(&["第1章 开端", "第2章 转折", "第4章 终章"]));
        let titles: Vec<_> = ordered.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(
            titles,
            vec!["第1章 开端", "第2章 转折", "第 3 章 当前章节缺失", "第4章 终章"]
        );
        assert!(ordered[2].missing);
        assert_eq!(ordered[2].content, PLACEHOLDER_TEXT);
        assert_eq!(ordered[2].number, ChapterNumber::Number(3));
    }

    #[test]
    fn reorders_by_numeral_and_keeps_ties_stable() {
        let ordered = assemble_ordered(&content(&["第3章 a", "第1章", "第3章 b", "第2章"]));
        let titles: Vec<_> = ordered.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["第1章", "第2章", "第3章 a", "第3章 b"]);
        assert!(ordered.iter().all(|c| !c.missing));
    }

    #[test]
    fn repeated_maximum_numeral_does_not_overflow() {
        let ordered = assemble_ordered(&content(&["第4294967295章 a", "第4294967295章 b"]));
        let titles: Vec<_> = ordered.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["第4294967295章 a", "第4294967295章 b"]);
        assert_eq!(ordered[1].number, ChapterNumber::Number(u32::MAX));
    }

    #[test]
    fn very_wide_gap_is_not_filled() {
        let ordered = assemble_ordered(&content(&["第1章", "第99999章"]));
        assert_eq!(ordered.len(), 2);
    }
}
